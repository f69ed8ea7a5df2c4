//! Module pare-feu
//!
//! Les trois pare-feux supportés (ufw, iptables, firewalld) exposent le même
//! contrat [`FirewallBackend`] malgré des mécanismes très différents. Chaque
//! opération est une suite ordonnée de commandes indépendantes: aucun de ces
//! outils n'offre d'application atomique de plusieurs règles.

pub mod command;
pub mod detector;
pub mod firewalld;
pub mod iptables;
pub mod testing;
pub mod ufw;

pub use command::{CommandOutput, CommandRunner, Step, SystemCommandRunner};
pub use detector::BackendDetector;
pub use firewalld::FirewalldBackend;
pub use iptables::IptablesBackend;
pub use ufw::UfwBackend;

use crate::error::ExecError;
use crate::models::BackendKind;
use async_trait::async_trait;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Ports toujours protégés: SSH, HTTP, HTTPS. Le port de l'API s'y ajoute.
pub const BASE_PORTS: [u16; 3] = [22, 80, 443];

/// Port SSH laissé ouvert à l'activation
pub const SSH_PORT: u16 = 22;

/// Ensemble des ports fermés à une adresse bannie
pub fn managed_ports(api_port: u16) -> Vec<u16> {
    let mut ports = BASE_PORTS.to_vec();
    if !ports.contains(&api_port) {
        ports.push(api_port);
    }
    ports
}

/// Famille d'adresse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn parse(address: &str) -> Option<Family> {
        match address.parse::<IpAddr>().ok()? {
            IpAddr::V4(_) => Some(Family::V4),
            IpAddr::V6(_) => Some(Family::V6),
        }
    }

    /// Une adresse illisible est traitée comme IPv4
    pub fn of(address: &str) -> Family {
        Family::parse(address).unwrap_or(Family::V4)
    }
}

/// Contrat commun des pare-feux
#[async_trait]
pub trait FirewallBackend: Send + Sync {
    /// La politique de protection est-elle active ?
    async fn is_enabled(&self) -> Result<bool, ExecError>;

    /// Refus en entrée par défaut, SSH et API autorisés, configuration persistée
    async fn enable(&self) -> Result<(), ExecError>;

    /// Retour à un état totalement permissif. Idempotent.
    async fn disable(&self) -> Result<(), ExecError>;

    /// Bloque l'adresse sur tous les ports gérés
    async fn ban_ip(&self, address: &str) -> Result<(), ExecError>;

    /// Retire les règles posées par `ban_ip`
    async fn unban_ip(&self, address: &str) -> Result<(), ExecError>;

    fn kind(&self) -> BackendKind;

    /// Nom fixe du pare-feu, pour les logs
    fn type_name(&self) -> &'static str {
        self.kind().label()
    }
}

/// Paramètres communs aux pare-feux
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub api_port: u16,
    /// Répertoire des fichiers de règles iptables sauvegardées
    pub rules_dir: PathBuf,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            api_port: 4554,
            rules_dir: PathBuf::from("/etc/iptables"),
        }
    }
}

/// Crée le pare-feu correspondant au type choisi
pub fn create_backend(
    kind: BackendKind,
    runner: Arc<dyn CommandRunner>,
    settings: &BackendSettings,
) -> Arc<dyn FirewallBackend> {
    match kind {
        BackendKind::RuleBased => Arc::new(UfwBackend::new(runner, settings.api_port)),
        BackendKind::TableBased => Arc::new(IptablesBackend::new(
            runner,
            settings.api_port,
            settings.rules_dir.clone(),
        )),
        BackendKind::ZoneBased => Arc::new(FirewalldBackend::new(runner, settings.api_port)),
    }
}
