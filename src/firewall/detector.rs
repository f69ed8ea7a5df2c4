use super::command::CommandRunner;
use crate::error::DetectionError;
use crate::models::BackendKind;
use log::{debug, info};
use std::sync::Arc;

/// Valeur de configuration qui déclenche la détection automatique
pub const AUTO: &str = "auto";

/// Cherche le pare-feu installé sur l'hôte
pub struct BackendDetector {
    runner: Arc<dyn CommandRunner>,
}

impl BackendDetector {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Premier exécutable présent dans l'ordre ufw, iptables, firewall-cmd
    pub fn detect(&self) -> Result<BackendKind, DetectionError> {
        for kind in BackendKind::PRIORITY {
            let program = kind.control_program();
            if self.runner.is_available(program) {
                info!("Pare-feu détecté: {}", kind);
                return Ok(kind);
            }
            debug!("{} absent du PATH", program);
        }
        Err(DetectionError::NotFound)
    }

    /// Un choix explicite est pris tel quel, sans vérifier la présence de
    /// l'outil: une erreur de configuration se verra au premier appel.
    pub fn resolve(&self, configured: &str) -> Result<BackendKind, DetectionError> {
        if configured.trim().eq_ignore_ascii_case(AUTO) {
            self.detect()
        } else {
            configured.parse()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::testing::FakeRunner;

    fn detector(installed: &[&str]) -> BackendDetector {
        BackendDetector::new(Arc::new(FakeRunner::with_installed(installed)))
    }

    #[test]
    fn test_priority_order() {
        let all = detector(&["firewall-cmd", "iptables", "ufw"]);
        assert_eq!(all.detect().unwrap(), BackendKind::RuleBased);

        let no_ufw = detector(&["firewall-cmd", "iptables"]);
        assert_eq!(no_ufw.detect().unwrap(), BackendKind::TableBased);

        let zone_only = detector(&["firewall-cmd"]);
        assert_eq!(zone_only.detect().unwrap(), BackendKind::ZoneBased);
    }

    #[test]
    fn test_nothing_installed() {
        assert!(matches!(
            detector(&[]).detect(),
            Err(DetectionError::NotFound)
        ));
    }

    #[test]
    fn test_explicit_choice_skips_path_lookup() {
        let none = detector(&[]);
        assert_eq!(none.resolve("firewalld").unwrap(), BackendKind::ZoneBased);
        assert_eq!(none.resolve("ufw").unwrap(), BackendKind::RuleBased);
        assert!(matches!(
            none.resolve("invalid"),
            Err(DetectionError::Unsupported(_))
        ));
    }

    #[test]
    fn test_auto_is_case_insensitive() {
        assert_eq!(
            detector(&["iptables"]).resolve("AUTO").unwrap(),
            BackendKind::TableBased
        );
    }
}
