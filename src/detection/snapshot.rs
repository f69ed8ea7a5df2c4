//! Sauvegarde JSON des candidats retenus, utilisée quand aucune base n'est configurée.
//! Le prochain import avec une base la rejoue.

use super::{sweep_once, CandidateSource};
use crate::error::SourceError;
use crate::models::{CandidateIp, SweepReport};
use crate::orchestrator::BanOrchestrator;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Écrit `[{ "ip", "count", "timestamp" }]`, répertoire parent compris
pub async fn write_snapshot(path: &Path, candidates: &[CandidateIp]) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("création de {} impossible", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(candidates)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("écriture de {} impossible", path.display()))?;
    info!("{} IP(s) sauvegardée(s) dans {}", candidates.len(), path.display());
    Ok(())
}

pub async fn read_snapshot(path: &Path) -> Result<Vec<CandidateIp>, SourceError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SourceError::Io {
            path: path.display().to_string(),
            source,
        })?;
    serde_json::from_str(&content).map_err(|source| SourceError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// Candidats relus depuis une sauvegarde
pub struct SnapshotSource {
    path: PathBuf,
}

impl SnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CandidateSource for SnapshotSource {
    fn name(&self) -> &'static str {
        "sauvegarde"
    }

    async fn collect(&self) -> Result<Vec<CandidateIp>, SourceError> {
        read_snapshot(&self.path).await
    }
}

/// Rejoue la sauvegarde en attente puis la supprime si chaque adresse est
/// bloquée et enregistrée. `None` sans sauvegarde ou sans base.
pub async fn replay_pending(
    path: &Path,
    orchestrator: &BanOrchestrator,
    min_attempts: u32,
) -> Result<Option<SweepReport>> {
    if orchestrator.ledger().is_none() || !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(None);
    }

    let report = sweep_once(&SnapshotSource::new(path), orchestrator, min_attempts).await?;
    if report.rejected == 0 && report.persistence_error.is_none() {
        tokio::fs::remove_file(path)
            .await
            .with_context(|| format!("suppression de {} impossible", path.display()))?;
        info!("Sauvegarde {} rejouée puis supprimée", path.display());
    } else {
        warn!("Sauvegarde {} conservée pour un prochain import", path.display());
    }
    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::testing::FakeRunner;
    use crate::firewall::UfwBackend;
    use crate::ledger::{BanLedger, MemoryBanStore};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn orchestrator(store: Option<MemoryBanStore>) -> BanOrchestrator {
        BanOrchestrator::new(
            Arc::new(UfwBackend::new(Arc::new(FakeRunner::new()), 4554)),
            store.map(|s| BanLedger::new(Arc::new(s), "web-1")),
            "192.0.2.10",
        )
    }

    #[tokio::test]
    async fn test_write_creates_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("bruteforce_processed.json");
        let candidates = vec![CandidateIp::new("203.0.113.7", 5)];

        write_snapshot(&path, &candidates).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"timestamp\""));
        assert_eq!(read_snapshot(&path).await.unwrap(), candidates);
    }

    #[tokio::test]
    async fn test_replay_records_then_removes_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bruteforce_processed.json");
        write_snapshot(
            &path,
            &[CandidateIp::new("203.0.113.7", 5), CandidateIp::new("198.51.100.2", 4)],
        )
        .await
        .unwrap();

        let store = MemoryBanStore::new();
        store.add_admin("admin-1").await;
        let report = replay_pending(&path, &orchestrator(Some(store.clone())), 3)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.enforced, 2);
        assert_eq!(store.bans().await.len(), 2);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_replay_keeps_snapshot_when_ledger_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bruteforce_processed.json");
        write_snapshot(&path, &[CandidateIp::new("203.0.113.7", 5)])
            .await
            .unwrap();

        // aucun administrateur: l'écriture échoue
        let report = replay_pending(&path, &orchestrator(Some(MemoryBanStore::new())), 3)
            .await
            .unwrap()
            .unwrap();

        assert!(report.persistence_error.is_some());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_replay_needs_ledger_and_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bruteforce_processed.json");
        assert!(replay_pending(&path, &orchestrator(Some(MemoryBanStore::new())), 3)
            .await
            .unwrap()
            .is_none());

        write_snapshot(&path, &[CandidateIp::new("203.0.113.7", 5)])
            .await
            .unwrap();
        assert!(replay_pending(&path, &orchestrator(None), 3).await.unwrap().is_none());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_invalid_snapshot_is_json_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bruteforce_processed.json");
        std::fs::write(&path, "pas du json").unwrap();

        let err = read_snapshot(&path).await.unwrap_err();
        assert!(matches!(err, SourceError::Json { .. }));
    }
}
