use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Destination des logs du processus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogMode {
    /// Sortie d'erreur standard (env_logger)
    #[default]
    Console,
    /// Journal via systemd-journal
    SystemdJournal,
}

impl FromStr for LogMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "console" | "stderr" => Ok(LogMode::Console),
            "journal" | "systemd" | "systemd-journal" => Ok(LogMode::SystemdJournal),
            other => Err(format!("mode de journalisation inconnu: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("journal".parse::<LogMode>().unwrap(), LogMode::SystemdJournal);
        assert_eq!("Console".parse::<LogMode>().unwrap(), LogMode::Console);
        assert!("fichier".parse::<LogMode>().is_err());
    }
}
