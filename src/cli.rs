//! Ligne de commande

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "guardian",
    version,
    about = "Bannissement d'IP via le pare-feu de l'hôte, journalisé en base"
)]
pub struct Cli {
    /// Fichier de configuration JSON
    #[arg(short, long, default_value = crate::config::CONFIG_FILE)]
    pub config: PathBuf,

    /// Pare-feu à utiliser (auto, ufw, iptables, firewalld)
    #[arg(long)]
    pub firewall: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Active le pare-feu, lance l'API et la détection périodique
    Start {
        /// Ne lance pas la détection par lastb
        #[arg(long)]
        no_sweep: bool,
    },
    /// Bannit une adresse
    Ban { ip: String },
    /// Débannit une adresse
    Unban { ip: String },
    /// État du pare-feu et adresses bannies en base
    Status,
    /// Active le pare-feu
    Enable,
    /// Désactive le pare-feu
    Disable,
    /// Importe un journal de détection
    Import {
        /// Fichier journal à analyser
        #[arg(long)]
        log: PathBuf,
        /// Seuil de tentatives (valeur de la configuration par défaut)
        #[arg(long)]
        min: Option<u32>,
    },
    /// Enregistre la chaîne de connexion PostgreSQL
    Setup {
        #[arg(long = "db-conn-string")]
        db_conn_string: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_import() {
        let cli = Cli::parse_from(["guardian", "import", "--log", "/var/log/bf.log", "--min", "5"]);
        assert_eq!(
            cli.command,
            Command::Import {
                log: PathBuf::from("/var/log/bf.log"),
                min: Some(5)
            }
        );
    }

    #[test]
    fn test_parse_setup_and_globals() {
        let cli = Cli::parse_from([
            "guardian",
            "--firewall",
            "iptables",
            "setup",
            "--db-conn-string",
            "postgres://guardian@db/guardian",
        ]);
        assert_eq!(cli.firewall.as_deref(), Some("iptables"));
        assert!(matches!(cli.command, Command::Setup { .. }));
    }

    #[test]
    fn test_ban_requires_ip() {
        assert!(Cli::try_parse_from(["guardian", "ban"]).is_err());
    }
}
