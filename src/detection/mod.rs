//! Détection des attaques par force brute
//!
//! Une source produit des candidats `(ip, nombre de tentatives, date)`. Le
//! balayage filtre par seuil puis confie les adresses retenues à l'orchestrateur.

pub mod lastb;
pub mod logfile;
pub mod snapshot;

pub use lastb::LastbSource;
pub use logfile::LogFileSource;
pub use snapshot::SnapshotSource;

use crate::error::SourceError;
use crate::models::{CandidateIp, SweepReport};
use crate::orchestrator::{eligible_addresses, BanOrchestrator};
use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Intervalle par défaut entre deux balayages
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Seuil par défaut de tentatives échouées
pub const DEFAULT_MIN_ATTEMPTS: u32 = 3;

#[async_trait]
pub trait CandidateSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn collect(&self) -> Result<Vec<CandidateIp>, SourceError>;
}

/// Un passage: collecte, filtrage, bannissement
pub async fn sweep_once(
    source: &dyn CandidateSource,
    orchestrator: &BanOrchestrator,
    min_attempts: u32,
) -> Result<SweepReport, SourceError> {
    let candidates = source.collect().await?;
    let addresses = eligible_addresses(&candidates, min_attempts);

    let mut report = SweepReport {
        collected: candidates.len(),
        eligible: addresses.len(),
        ..SweepReport::default()
    };
    if addresses.is_empty() {
        return Ok(report);
    }

    let outcome = orchestrator.ban_batch(&addresses).await;
    report.enforced = outcome.enforced.len();
    report.rejected = outcome.rejected.len();
    match outcome.persisted {
        Some(Ok(summary)) => report.summary = Some(summary),
        Some(Err(e)) => report.persistence_error = Some(e),
        None => {}
    }
    Ok(report)
}

/// Premier passage immédiat, puis un passage par intervalle. Ne rend jamais la main.
pub async fn run_periodic(
    source: Arc<dyn CandidateSource>,
    orchestrator: BanOrchestrator,
    min_attempts: u32,
    period: Duration,
) {
    info!(
        "Détection {} active (toutes les {} s, seuil {})",
        source.name(),
        period.as_secs(),
        min_attempts
    );
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        match sweep_once(source.as_ref(), &orchestrator, min_attempts).await {
            Ok(report) => {
                info!(
                    "Balayage {}: {} candidat(s), {} retenu(s), {} bloqué(s)",
                    source.name(),
                    report.collected,
                    report.eligible,
                    report.enforced
                );
                match report.persistence_error {
                    Some(e) if e.is_fatal() => {
                        error!("Registre inutilisable, bannissements non enregistrés: {}", e)
                    }
                    Some(e) => warn!("Registre non mis à jour, nouvel essai au prochain passage: {}", e),
                    None => {}
                }
            }
            Err(e) => error!("Balayage {} échoué: {}", source.name(), e),
        }
    }
}
