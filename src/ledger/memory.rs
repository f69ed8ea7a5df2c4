//! Registre en mémoire
//!
//! Même sémantique que le registre PostgreSQL (upsert sur serveur + adresse,
//! IP de serveur unique). Une transaction garde le verrou jusqu'à sa fin et
//! travaille sur une copie, remise en place au `commit`.

use super::store::{BanStore, LedgerTx};
use crate::error::LedgerError;
use crate::models::{BanRecord, HostIdentity};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct Tables {
    admins: Vec<String>,
    hosts: Vec<HostIdentity>,
    bans: BTreeMap<(String, String), BanRecord>,
    failing: HashSet<String>,
}

impl Tables {
    fn check(&self, address: &str) -> Result<(), LedgerError> {
        if self.failing.contains(address) {
            return Err(LedgerError::Constraint(format!(
                "écriture refusée pour {}",
                address
            )));
        }
        Ok(())
    }

    fn refresh(&mut self, host_id: &str, address: &str) -> Result<(), LedgerError> {
        self.check(address)?;
        if let Some(record) = self.bans.get_mut(&(host_id.to_string(), address.to_string())) {
            record.active = true;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    fn upsert(&mut self, host: &HostIdentity, address: &str) -> Result<(), LedgerError> {
        self.check(address)?;
        let now = Utc::now();
        self.bans
            .entry((host.host_id.clone(), address.to_string()))
            .and_modify(|record| {
                record.active = true;
                record.updated_at = now;
            })
            .or_insert_with(|| BanRecord {
                host_id: host.host_id.clone(),
                principal_id: host.principal_id.clone(),
                host_ip: host.outbound_ip.clone(),
                address: address.to_string(),
                active: true,
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBanStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryBanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_admin(&self, id: &str) {
        self.tables.lock().await.admins.push(id.to_string());
    }

    /// Toute écriture visant cette adresse échouera
    pub async fn fail_on(&self, address: &str) {
        self.tables.lock().await.failing.insert(address.to_string());
    }

    pub async fn hosts(&self) -> Vec<HostIdentity> {
        self.tables.lock().await.hosts.clone()
    }

    pub async fn bans(&self) -> Vec<BanRecord> {
        self.tables.lock().await.bans.values().cloned().collect()
    }
}

#[async_trait]
impl BanStore for MemoryBanStore {
    async fn find_host(&self, outbound_ip: &str) -> Result<Option<HostIdentity>, LedgerError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .hosts
            .iter()
            .find(|h| h.outbound_ip == outbound_ip)
            .cloned())
    }

    async fn find_admin(&self) -> Result<Option<String>, LedgerError> {
        Ok(self.tables.lock().await.admins.first().cloned())
    }

    async fn insert_host(&self, host: &HostIdentity) -> Result<HostIdentity, LedgerError> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.hosts.iter().find(|h| h.outbound_ip == host.outbound_ip) {
            return Ok(existing.clone());
        }
        tables.hosts.push(host.clone());
        Ok(host.clone())
    }

    async fn ban_exists(&self, host_id: &str, address: &str) -> Result<bool, LedgerError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .bans
            .contains_key(&(host_id.to_string(), address.to_string())))
    }

    async fn refresh_ban(&self, host_id: &str, address: &str) -> Result<(), LedgerError> {
        self.tables.lock().await.refresh(host_id, address)
    }

    async fn insert_ban(&self, host: &HostIdentity, address: &str) -> Result<(), LedgerError> {
        self.tables.lock().await.upsert(host, address)
    }

    async fn deactivate_ban(&self, host_id: &str, address: &str) -> Result<bool, LedgerError> {
        let mut tables = self.tables.lock().await;
        match tables
            .bans
            .get_mut(&(host_id.to_string(), address.to_string()))
        {
            Some(record) => {
                record.active = false;
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_bans(&self, host_id: &str, only_active: bool) -> Result<Vec<BanRecord>, LedgerError> {
        let tables = self.tables.lock().await;
        let mut records: Vec<BanRecord> = tables
            .bans
            .values()
            .filter(|r| r.host_id == host_id && (r.active || !only_active))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError> {
        let guard = self.tables.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn existing_bans(
        &mut self,
        host_id: &str,
        addresses: &[String],
    ) -> Result<HashSet<String>, LedgerError> {
        Ok(addresses
            .iter()
            .filter(|a| {
                self.staged
                    .bans
                    .contains_key(&(host_id.to_string(), a.to_string()))
            })
            .cloned()
            .collect())
    }

    async fn refresh_ban(&mut self, host_id: &str, address: &str) -> Result<(), LedgerError> {
        self.staged.refresh(host_id, address)
    }

    async fn insert_ban(&mut self, host: &HostIdentity, address: &str) -> Result<(), LedgerError> {
        self.staged.upsert(host, address)
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostIdentity {
        HostIdentity {
            host_id: "h-1".to_string(),
            principal_id: "admin-1".to_string(),
            outbound_ip: "192.0.2.10".to_string(),
            hostname: "web-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_host_keeps_first_row() {
        let store = MemoryBanStore::new();
        store.insert_host(&host()).await.unwrap();

        let mut other = host();
        other.host_id = "h-2".to_string();
        let kept = store.insert_host(&other).await.unwrap();

        assert_eq!(kept.host_id, "h-1");
        assert_eq!(store.hosts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_ban_is_an_upsert() {
        let store = MemoryBanStore::new();
        store.insert_ban(&host(), "203.0.113.7").await.unwrap();
        store.deactivate_ban("h-1", "203.0.113.7").await.unwrap();
        store.insert_ban(&host(), "203.0.113.7").await.unwrap();

        let bans = store.bans().await;
        assert_eq!(bans.len(), 1);
        assert!(bans[0].active);
    }

    #[tokio::test]
    async fn test_uncommitted_tx_leaves_no_trace() {
        let store = MemoryBanStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_ban(&host(), "203.0.113.7").await.unwrap();
            tx.rollback().await.unwrap();
        }
        assert!(store.bans().await.is_empty());

        let mut tx = store.begin().await.unwrap();
        tx.insert_ban(&host(), "203.0.113.8").await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.bans().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_address_is_rejected() {
        let store = MemoryBanStore::new();
        store.fail_on("198.51.100.9").await;
        assert!(matches!(
            store.insert_ban(&host(), "198.51.100.9").await,
            Err(LedgerError::Constraint(_))
        ));
    }
}
