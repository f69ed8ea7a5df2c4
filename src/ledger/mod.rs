//! Registre des bannissements
//!
//! Chaque serveur est identifié par son IP sortante. À la première écriture,
//! si le serveur est inconnu, il est créé avec un identifiant neuf et un
//! administrateur comme titulaire.

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::MemoryBanStore;
pub use postgres::PgBanStore;
pub use store::{BanStore, LedgerTx};

use crate::error::LedgerError;
use crate::models::{BanRecord, BatchSummary, HostIdentity};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Délai accordé à chaque appel au registre
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Effet d'une écriture unitaire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanWrite {
    Inserted,
    Refreshed,
}

#[derive(Clone)]
pub struct BanLedger {
    store: Arc<dyn BanStore>,
    hostname: String,
    timeout: Duration,
}

impl BanLedger {
    pub fn new(store: Arc<dyn BanStore>, hostname: impl Into<String>) -> Self {
        Self {
            store,
            hostname: hostname.into(),
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(self.timeout)),
        }
    }

    /// Serveur associé à `host_ip`, créé si besoin
    pub async fn resolve_host(&self, host_ip: &str) -> Result<HostIdentity, LedgerError> {
        if let Some(host) = self.bounded(self.store.find_host(host_ip)).await? {
            return Ok(host);
        }

        let principal_id = self
            .bounded(self.store.find_admin())
            .await?
            .ok_or(LedgerError::NoPrincipal)?;

        let candidate = HostIdentity {
            host_id: Uuid::new_v4().to_string(),
            principal_id,
            outbound_ip: host_ip.to_string(),
            hostname: self.hostname_for(host_ip),
        };
        let host = self.bounded(self.store.insert_host(&candidate)).await?;
        if host.host_id == candidate.host_id {
            info!("Serveur {} enregistré ({})", host_ip, host.host_id);
        } else {
            debug!("Serveur {} créé par un autre processus", host_ip);
        }
        Ok(host)
    }

    fn hostname_for(&self, host_ip: &str) -> String {
        if self.hostname.is_empty() {
            format!("servidor-{}", host_ip)
        } else {
            self.hostname.clone()
        }
    }

    /// Enregistre (ou rafraîchit) une adresse bannie
    pub async fn record_ban(&self, host_ip: &str, address: &str) -> Result<BanWrite, LedgerError> {
        let host = self.resolve_host(host_ip).await?;

        if self.bounded(self.store.ban_exists(&host.host_id, address)).await? {
            self.bounded(self.store.refresh_ban(&host.host_id, address))
                .await?;
            debug!("IP {} déjà enregistrée, date mise à jour", address);
            return Ok(BanWrite::Refreshed);
        }

        // Un insert concurrent sur la même paire devient un rafraîchissement
        self.bounded(self.store.insert_ban(&host, address)).await?;
        debug!("IP {} enregistrée", address);
        Ok(BanWrite::Inserted)
    }

    /// Écrit un lot d'adresses dans une seule transaction: tout ou rien
    pub async fn record_bans(
        &self,
        host_ip: &str,
        addresses: &[String],
    ) -> Result<BatchSummary, LedgerError> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = addresses
            .iter()
            .filter(|a| seen.insert(a.as_str()))
            .cloned()
            .collect();
        if unique.is_empty() {
            return Ok(BatchSummary::default());
        }

        let host = self.resolve_host(host_ip).await?;
        let mut tx = self.bounded(self.store.begin()).await?;

        let written = self.write_batch(tx.as_mut(), &host, &unique).await;
        match written {
            Ok(summary) => {
                self.bounded(tx.commit()).await?;
                info!(
                    "{} IP(s) enregistrée(s), {} mise(s) à jour",
                    summary.inserted, summary.updated
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("Annulation de la transaction impossible: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn write_batch(
        &self,
        tx: &mut dyn LedgerTx,
        host: &HostIdentity,
        addresses: &[String],
    ) -> Result<BatchSummary, LedgerError> {
        let existing = self
            .bounded(tx.existing_bans(&host.host_id, addresses))
            .await?;

        let mut summary = BatchSummary::default();
        for address in addresses {
            if existing.contains(address) {
                self.bounded(tx.refresh_ban(&host.host_id, address)).await?;
                summary.updated += 1;
            } else {
                self.bounded(tx.insert_ban(host, address)).await?;
                summary.inserted += 1;
            }
        }
        Ok(summary)
    }

    /// Marque l'adresse inactive. Faux si elle n'était pas enregistrée.
    pub async fn record_unban(&self, host_ip: &str, address: &str) -> Result<bool, LedgerError> {
        let Some(host) = self.bounded(self.store.find_host(host_ip)).await? else {
            return Ok(false);
        };
        self.bounded(self.store.deactivate_ban(&host.host_id, address))
            .await
    }

    /// Adresses actuellement bannies pour ce serveur, les plus récentes d'abord
    pub async fn active_bans(&self, host_ip: &str) -> Result<Vec<BanRecord>, LedgerError> {
        match self.bounded(self.store.find_host(host_ip)).await? {
            Some(host) => {
                self.bounded(self.store.list_bans(&host.host_id, true))
                    .await
            }
            None => Ok(Vec::new()),
        }
    }
}
