//! Erreurs du domaine
//!
//! Chaque étape d'un bannissement (détection du pare-feu, exécution des
//! commandes, registre en base, orchestration) a son propre type d'erreur.

use std::time::Duration;
use thiserror::Error;

/// Aucun pare-feu utilisable n'a été trouvé au démarrage
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("aucun pare-feu supporté trouvé (ufw, iptables, firewall-cmd)")]
    NotFound,
    #[error("type de pare-feu non supporté: {0}")]
    Unsupported(String),
}

/// Échec d'une commande externe
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("impossible de lancer '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{command}' a échoué (code {code:?}): {output}")]
    Failed {
        command: String,
        code: Option<i32>,
        output: String,
    },
    #[error("'{command}' n'a pas terminé en {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

impl ExecError {
    pub fn command(&self) -> &str {
        match self {
            ExecError::Spawn { command, .. }
            | ExecError::Failed { command, .. }
            | ExecError::Timeout { command, .. } => command,
        }
    }
}

/// Erreur du registre des bannissements
#[derive(Debug, Error)]
pub enum LedgerError {
    /// La base ne contient aucun administrateur pour devenir titulaire du serveur.
    /// Base mal provisionnée: jamais réessayé.
    #[error("aucun utilisateur administrateur trouvé dans la base")]
    NoPrincipal,
    #[error("connexion à la base impossible: {0}")]
    Connection(#[source] sqlx::Error),
    #[error("{context}: {source}")]
    Query {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("violation de contrainte: {0}")]
    Constraint(String),
    #[error("opération sur la base interrompue après {0:?}")]
    Timeout(Duration),
}

impl LedgerError {
    pub fn query<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        LedgerError::Query {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Vrai quand l'erreur traduit un problème de provisionnement et non un incident passager
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::NoPrincipal)
    }
}

/// Échec global d'un bannissement ou d'un débannissement
///
/// Seul l'échec de la mise en application est une erreur: une écriture en base
/// ratée après une règle appliquée est rapportée dans le résultat.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("règle non appliquée sur le pare-feu {backend}: {source}")]
    Enforcement {
        backend: &'static str,
        #[source]
        source: ExecError,
    },
    #[error("règle appliquée sur {address} mais non enregistrée: {source}")]
    Persistence {
        address: String,
        #[source]
        source: LedgerError,
    },
}

impl OrchestrationError {
    /// L'adresse est-elle malgré tout bloquée sur l'hôte ?
    pub fn enforced(&self) -> bool {
        matches!(self, OrchestrationError::Persistence { .. })
    }
}

/// Erreur d'une source de candidats (historique de connexions, fichier de log)
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("lecture de {path} impossible: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON invalide dans {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_error_keeps_command() {
        let err = ExecError::Failed {
            command: "ufw status".to_string(),
            code: Some(1),
            output: "ERROR".to_string(),
        };
        assert_eq!(err.command(), "ufw status");
        assert!(err.to_string().contains("ufw status"));
    }

    #[test]
    fn test_only_missing_principal_is_fatal() {
        assert!(LedgerError::NoPrincipal.is_fatal());
        assert!(!LedgerError::Timeout(Duration::from_secs(5)).is_fatal());
        assert!(!LedgerError::Constraint("dup".into()).is_fatal());
    }
}
