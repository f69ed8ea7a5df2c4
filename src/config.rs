use crate::firewall::detector::AUTO;
use crate::ledger::postgres::is_valid_schema;
use crate::log_mode::LogMode;
use anyhow::{bail, Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "/etc/guardian/config.json";
pub const ENV_FILE: &str = "/etc/guardian/config.env";

/// Variable écrite par `guardian setup`
pub const DB_CONN_STRING_KEY: &str = "GUARDIAN_DB_CONN_STRING";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// IP d'écoute de l'API et identité du serveur dans la base.
    /// Détectée via la route sortante si absente.
    pub server_ip: Option<String>,

    /// Port de l'API (aussi autorisé et protégé sur le pare-feu)
    pub port: u16,

    /// Jeton Bearer attendu par l'API
    pub auth_token: Option<String>,

    /// `auto`, `ufw`, `iptables` ou `firewalld`
    pub firewall_type: String,

    pub install_dir: PathBuf,

    /// Registre désactivé si absent
    pub db_conn_string: Option<String>,
    pub db_schema: String,

    pub log_level: String,
    pub log_mode: LogMode,

    /// Seuil de tentatives échouées avant bannissement
    pub min_attempts: u32,

    /// Intervalle entre deux balayages (secondes)
    pub sweep_interval: u64,

    /// Délai maximal d'une commande pare-feu (secondes), aucun si absent
    pub command_timeout: Option<u64>,

    /// Délai maximal d'un appel à la base (secondes)
    pub store_timeout: u64,

    /// Répertoire des règles iptables sauvegardées
    pub rules_dir: PathBuf,

    /// Nom enregistré pour ce serveur, `/etc/hostname` sinon
    pub hostname: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_ip: None,
            port: 4554,
            auth_token: None,
            firewall_type: AUTO.to_string(),
            install_dir: PathBuf::from("/opt/guardian"),
            db_conn_string: None,
            db_schema: "mtm".to_string(),
            log_level: "info".to_string(),
            log_mode: LogMode::Console,
            min_attempts: 3,
            sweep_interval: 300,
            command_timeout: None,
            store_timeout: 5,
            rules_dir: PathBuf::from("/etc/iptables"),
            hostname: None,
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("{} invalide ({}): {}", key, value, e))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl Config {
    /// Valeurs par défaut, puis fichier JSON, puis fichiers `.env`, puis variables `GUARDIAN_*`
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;

        for env_file in [PathBuf::from(ENV_FILE), PathBuf::from(".env")] {
            if dotenv::from_path(&env_file).is_ok() {
                debug!("Variables chargées depuis {}", env_file.display());
            }
        }
        let install_dir = std::env::var("GUARDIAN_INSTALL_DIR")
            .ok()
            .and_then(non_empty)
            .map(PathBuf::from)
            .unwrap_or_else(|| config.install_dir.clone());
        let _ = dotenv::from_path(Self::env_file_in(&install_dir));

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration par défaut si le fichier n'existe pas
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("lecture de {} impossible", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("configuration invalide dans {}", path.display()))
    }

    /// Applique les variables `GUARDIAN_*` fournies par `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).and_then(non_empty);

        if let Some(v) = var("GUARDIAN_IP") {
            self.server_ip = Some(v);
        }
        if let Some(v) = var("GUARDIAN_PORT") {
            self.port = parse_var("GUARDIAN_PORT", &v)?;
        }
        if let Some(v) = var("GUARDIAN_AUTH_TOKEN") {
            self.auth_token = Some(v);
        }
        if let Some(v) = var("GUARDIAN_FIREWALL_TYPE") {
            self.firewall_type = v.to_lowercase();
        }
        if let Some(v) = var("GUARDIAN_INSTALL_DIR") {
            self.install_dir = PathBuf::from(v);
        }
        if let Some(v) = var(DB_CONN_STRING_KEY) {
            self.db_conn_string = Some(v);
        }
        if let Some(v) = var("GUARDIAN_DB_SCHEMA") {
            self.db_schema = v;
        }
        if let Some(v) = var("GUARDIAN_LOG_LEVEL") {
            self.log_level = v.to_lowercase();
        }
        if let Some(v) = var("GUARDIAN_LOG_MODE") {
            self.log_mode = parse_var("GUARDIAN_LOG_MODE", &v)?;
        }
        if let Some(v) = var("GUARDIAN_MIN_ATTEMPTS") {
            self.min_attempts = parse_var("GUARDIAN_MIN_ATTEMPTS", &v)?;
        }
        if let Some(v) = var("GUARDIAN_SWEEP_INTERVAL") {
            self.sweep_interval = parse_var("GUARDIAN_SWEEP_INTERVAL", &v)?;
        }
        if let Some(v) = var("GUARDIAN_COMMAND_TIMEOUT") {
            self.command_timeout = Some(parse_var("GUARDIAN_COMMAND_TIMEOUT", &v)?);
        }
        if let Some(v) = var("GUARDIAN_STORE_TIMEOUT") {
            self.store_timeout = parse_var("GUARDIAN_STORE_TIMEOUT", &v)?;
        }
        if let Some(v) = var("GUARDIAN_RULES_DIR") {
            self.rules_dir = PathBuf::from(v);
        }
        if let Some(v) = var("GUARDIAN_HOSTNAME") {
            self.hostname = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("le port de l'API ne peut pas être 0");
        }
        if self.db_schema.is_empty() || !is_valid_schema(&self.db_schema) {
            bail!("nom de schéma invalide: '{}'", self.db_schema);
        }
        if self.min_attempts == 0 {
            bail!("le seuil de tentatives doit être au moins 1");
        }
        if self.sweep_interval == 0 {
            bail!("l'intervalle de balayage doit être positif");
        }
        if self.store_timeout == 0 {
            bail!("le délai d'accès à la base doit être positif");
        }
        if self.command_timeout == Some(0) {
            bail!("le délai des commandes doit être positif");
        }
        if let Some(ip) = &self.server_ip {
            if ip.parse::<std::net::IpAddr>().is_err() {
                bail!("GUARDIAN_IP invalide: {}", ip);
            }
        }
        Ok(())
    }

    pub fn env_file_in(install_dir: &Path) -> PathBuf {
        install_dir.join("config").join("config.env")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.install_dir.join("data").join("bruteforce_processed.json")
    }

    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }

    pub fn store_deadline(&self) -> Duration {
        Duration::from_secs(self.store_timeout)
    }

    pub fn command_deadline(&self) -> Option<Duration> {
        self.command_timeout.map(Duration::from_secs)
    }

    /// IP configurée, sinon celle de la route sortante
    pub fn host_ip(&self) -> Result<String> {
        match &self.server_ip {
            Some(ip) => Ok(ip.clone()),
            None => detect_outbound_ip().context("détection de l'IP sortante impossible"),
        }
    }

    pub fn host_name(&self) -> String {
        self.hostname.clone().unwrap_or_else(|| {
            fs::read_to_string("/etc/hostname")
                .map(|name| name.trim().to_string())
                .unwrap_or_default()
        })
    }
}

/// Aucun paquet n'est envoyé: `connect` sur UDP fixe seulement la route
pub fn detect_outbound_ip() -> std::io::Result<String> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip().to_string())
}

/// Écrit ou remplace `GUARDIAN_DB_CONN_STRING` dans le fichier d'environnement
pub fn write_db_conn_string(env_file: &Path, dsn: &str) -> Result<()> {
    if let Some(dir) = env_file.parent() {
        fs::create_dir_all(dir).with_context(|| format!("création de {} impossible", dir.display()))?;
    }
    let current = if env_file.exists() {
        fs::read_to_string(env_file)
            .with_context(|| format!("lecture de {} impossible", env_file.display()))?
    } else {
        String::new()
    };

    let entry = format!("{}={}", DB_CONN_STRING_KEY, dsn);
    let prefix = format!("{}=", DB_CONN_STRING_KEY);
    let mut replaced = false;
    let mut lines: Vec<String> = current
        .lines()
        .map(|line| {
            if !replaced && line.starts_with(&prefix) {
                replaced = true;
                entry.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(entry);
    }

    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(env_file, content).with_context(|| format!("écriture de {} impossible", env_file.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.port, 4554);
        assert_eq!(config.firewall_type, "auto");
        assert_eq!(config.db_schema, "mtm");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(lookup(&[
                ("GUARDIAN_IP", "192.0.2.10"),
                ("GUARDIAN_PORT", "8080"),
                ("GUARDIAN_FIREWALL_TYPE", "IPTABLES"),
                ("GUARDIAN_DB_CONN_STRING", "postgres://guardian@db/guardian"),
                ("GUARDIAN_MIN_ATTEMPTS", "5"),
                ("GUARDIAN_COMMAND_TIMEOUT", "30"),
                ("GUARDIAN_AUTH_TOKEN", "  "),
            ]))
            .unwrap();

        assert_eq!(config.server_ip.as_deref(), Some("192.0.2.10"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.firewall_type, "iptables");
        assert!(config.db_conn_string.is_some());
        assert_eq!(config.min_attempts, 5);
        assert_eq!(config.command_deadline(), Some(Duration::from_secs(30)));
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_bad_number_is_reported() {
        let mut config = Config::default();
        let err = config
            .apply_env(lookup(&[("GUARDIAN_PORT", "http")]))
            .unwrap_err();
        assert!(err.to_string().contains("GUARDIAN_PORT"));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.db_schema = "mtm; DROP SCHEMA mtm".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.min_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server_ip = Some("serveur".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "port": 9000, "db_schema": "audit" }"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.db_schema, "audit");
        assert_eq!(config.min_attempts, 3);
        assert_eq!(config.firewall_type, Config::default().firewall_type);
    }

    #[test]
    fn test_write_db_conn_string_replaces_existing() {
        let dir = tempdir().unwrap();
        let env_file = Config::env_file_in(dir.path());

        write_db_conn_string(&env_file, "postgres://a").unwrap();
        fs::write(
            &env_file,
            "GUARDIAN_PORT=4554\nGUARDIAN_DB_CONN_STRING=postgres://a\n",
        )
        .unwrap();
        write_db_conn_string(&env_file, "postgres://b").unwrap();

        let content = fs::read_to_string(&env_file).unwrap();
        assert_eq!(
            content,
            "GUARDIAN_PORT=4554\nGUARDIAN_DB_CONN_STRING=postgres://b\n"
        );
    }

    #[test]
    fn test_write_db_conn_string_creates_file() {
        let dir = tempdir().unwrap();
        let env_file = Config::env_file_in(dir.path());
        write_db_conn_string(&env_file, "postgres://a").unwrap();
        assert_eq!(
            fs::read_to_string(&env_file).unwrap(),
            "GUARDIAN_DB_CONN_STRING=postgres://a\n"
        );
    }
}
