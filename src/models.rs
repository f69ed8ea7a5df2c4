use crate::error::{ExecError, LedgerError, OrchestrationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Famille de pare-feu pilotée par le processus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// Pare-feu à règles (ufw)
    RuleBased,
    /// Pare-feu à tables (iptables / ip6tables)
    TableBased,
    /// Pare-feu à zones (firewalld)
    ZoneBased,
}

impl BackendKind {
    /// Ordre de priorité de la détection automatique
    pub const PRIORITY: [BackendKind; 3] = [
        BackendKind::RuleBased,
        BackendKind::TableBased,
        BackendKind::ZoneBased,
    ];

    /// Exécutable de contrôle dont la présence signale le pare-feu
    pub fn control_program(&self) -> &'static str {
        match self {
            BackendKind::RuleBased => "ufw",
            BackendKind::TableBased => "iptables",
            BackendKind::ZoneBased => "firewall-cmd",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::RuleBased => "ufw",
            BackendKind::TableBased => "iptables",
            BackendKind::ZoneBased => "firewalld",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BackendKind {
    type Err = crate::error::DetectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ufw" => Ok(BackendKind::RuleBased),
            "iptables" => Ok(BackendKind::TableBased),
            "firewalld" | "firewall-cmd" => Ok(BackendKind::ZoneBased),
            other => Err(crate::error::DetectionError::Unsupported(other.to_string())),
        }
    }
}

/// Enregistrement du serveur courant dans la base (table `servidores`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostIdentity {
    /// Identifiant stable du serveur (`uid`)
    pub host_id: String,
    /// Compte responsable du serveur (`titular`)
    pub principal_id: String,
    /// IP sortante du serveur
    pub outbound_ip: String,
    /// Nom d'hôte (`nome`)
    pub hostname: String,
}

/// Une adresse bannie pour un serveur (table `banned_ips`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRecord {
    pub host_id: String,
    pub principal_id: String,
    pub host_ip: String,
    pub address: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// IP suspecte remontée par une source de détection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateIp {
    pub ip: String,
    pub count: u32,
    #[serde(rename = "timestamp")]
    pub observed_at: DateTime<Utc>,
}

impl CandidateIp {
    pub fn new(ip: impl Into<String>, count: u32) -> Self {
        Self {
            ip: ip.into(),
            count,
            observed_at: Utc::now(),
        }
    }
}

/// Quatre entiers de 0 à 255 séparés par des points
pub fn is_dotted_quad(address: &str) -> bool {
    let parts: Vec<&str> = address.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|part| {
            !part.is_empty()
                && part.len() <= 3
                && part.chars().all(|c| c.is_ascii_digit())
                && part.parse::<u16>().map_or(false, |n| n <= 255)
        })
}

/// Effet d'un bannissement sur le registre
#[derive(Debug)]
pub enum Persistence {
    /// Nouvelle ligne créée
    Inserted,
    /// Ligne existante rafraîchie et réactivée
    Refreshed,
    /// Ligne marquée inactive (débannissement)
    Deactivated,
    /// Aucune ligne à désactiver
    NotRecorded,
    /// Pas de registre configuré
    Skipped,
    /// Écriture échouée alors que la règle est appliquée
    Failed(LedgerError),
}

impl Persistence {
    pub fn is_failed(&self) -> bool {
        matches!(self, Persistence::Failed(_))
    }
}

/// Résultat d'un bannissement (ou débannissement) appliqué sur l'hôte
#[derive(Debug)]
pub struct BanOutcome {
    pub address: String,
    pub backend: &'static str,
    pub persistence: Persistence,
}

impl BanOutcome {
    /// Vrai si la règle est appliquée et que le registre n'a pas échoué
    pub fn is_complete(&self) -> bool {
        !self.persistence.is_failed()
    }

    /// Transforme un enregistrement raté en erreur, pour les appelants qui exigent les deux
    pub fn require_persisted(self) -> Result<Self, OrchestrationError> {
        match self.persistence {
            Persistence::Failed(source) => Err(OrchestrationError::Persistence {
                address: self.address,
                source,
            }),
            _ => Ok(self),
        }
    }
}

/// Compteurs d'une écriture groupée
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub inserted: usize,
    pub updated: usize,
}

/// Résultat d'un bannissement groupé
#[derive(Debug)]
pub struct BatchOutcome {
    /// Adresses bloquées sur l'hôte
    pub enforced: Vec<String>,
    /// Adresses que le pare-feu a refusées
    pub rejected: Vec<(String, ExecError)>,
    /// `None` si aucun registre n'est configuré ou rien à écrire
    pub persisted: Option<Result<BatchSummary, LedgerError>>,
}

impl BatchOutcome {
    pub fn persistence_failed(&self) -> bool {
        matches!(self.persisted, Some(Err(_)))
    }
}

/// Bilan d'un passage de détection
#[derive(Debug, Default)]
pub struct SweepReport {
    pub collected: usize,
    pub eligible: usize,
    pub enforced: usize,
    pub rejected: usize,
    pub summary: Option<BatchSummary>,
    pub persistence_error: Option<LedgerError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("ufw".parse::<BackendKind>().unwrap(), BackendKind::RuleBased);
        assert_eq!("IPTABLES".parse::<BackendKind>().unwrap(), BackendKind::TableBased);
        assert_eq!("firewalld".parse::<BackendKind>().unwrap(), BackendKind::ZoneBased);
        assert!("nftables".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_dotted_quad() {
        assert!(is_dotted_quad("203.0.113.7"));
        assert!(is_dotted_quad("0.0.0.0"));
        assert!(!is_dotted_quad("256.1.1.1"));
        assert!(!is_dotted_quad("1.2.3"));
        assert!(!is_dotted_quad("1.2.3.4.5"));
        assert!(!is_dotted_quad("a.b.c.d"));
        assert!(!is_dotted_quad("1..2.3"));
        assert!(!is_dotted_quad("2001:db8::1"));
    }

    #[test]
    fn test_partial_outcome_becomes_persistence_error() {
        let outcome = BanOutcome {
            address: "203.0.113.7".to_string(),
            backend: "ufw",
            persistence: Persistence::Failed(LedgerError::NoPrincipal),
        };
        assert!(!outcome.is_complete());

        let err = outcome.require_persisted().unwrap_err();
        assert!(err.enforced());
    }
}
