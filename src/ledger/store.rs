use crate::error::LedgerError;
use crate::models::{BanRecord, HostIdentity};
use async_trait::async_trait;
use std::collections::HashSet;

/// Accès aux tables `servidores`, `banned_ips` et `users`.
///
/// Les insertions de bannissement se comportent comme un upsert sur
/// (serveur, adresse): la contrainte d'unicité de la base tranche entre deux
/// écritures concurrentes.
#[async_trait]
pub trait BanStore: Send + Sync {
    async fn find_host(&self, outbound_ip: &str) -> Result<Option<HostIdentity>, LedgerError>;

    /// Identifiant d'un utilisateur administrateur, s'il en existe un
    async fn find_admin(&self) -> Result<Option<String>, LedgerError>;

    /// Insère le serveur. Si un autre processus l'a créé entre-temps pour la
    /// même IP, c'est cette ligne qui est renvoyée.
    async fn insert_host(&self, host: &HostIdentity) -> Result<HostIdentity, LedgerError>;

    async fn ban_exists(&self, host_id: &str, address: &str) -> Result<bool, LedgerError>;

    /// `updated_at = maintenant`, `active = vrai`
    async fn refresh_ban(&self, host_id: &str, address: &str) -> Result<(), LedgerError>;

    async fn insert_ban(&self, host: &HostIdentity, address: &str) -> Result<(), LedgerError>;

    /// Renvoie faux si aucune ligne ne correspond
    async fn deactivate_ban(&self, host_id: &str, address: &str) -> Result<bool, LedgerError>;

    async fn list_bans(&self, host_id: &str, only_active: bool) -> Result<Vec<BanRecord>, LedgerError>;

    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError>;
}

/// Transaction ouverte sur le registre. Abandonnée sans `commit`, rien n'est conservé.
#[async_trait]
pub trait LedgerTx: Send {
    /// Adresses déjà présentes pour ce serveur, en une seule requête
    async fn existing_bans(
        &mut self,
        host_id: &str,
        addresses: &[String],
    ) -> Result<HashSet<String>, LedgerError>;

    async fn refresh_ban(&mut self, host_id: &str, address: &str) -> Result<(), LedgerError>;

    async fn insert_ban(&mut self, host: &HostIdentity, address: &str) -> Result<(), LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError>;
}
