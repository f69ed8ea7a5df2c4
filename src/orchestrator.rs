//! Bannissement appliqué puis enregistré
//!
//! La règle est d'abord posée sur le pare-feu; le registre n'est écrit que si
//! elle l'a été. Un registre en échec ne fait pas échouer le bannissement: le
//! résultat le signale pour que l'appelant décide de réessayer.

use crate::error::{LedgerError, OrchestrationError};
use crate::firewall::FirewallBackend;
use crate::ledger::{BanLedger, BanWrite};
use crate::models::{BanOutcome, BatchOutcome, CandidateIp, Persistence};
use log::{error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;

/// Adresses dont le nombre de tentatives atteint le seuil, sans doublon,
/// dans l'ordre d'arrivée
pub fn eligible_addresses(candidates: &[CandidateIp], min_attempts: u32) -> Vec<String> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|c| c.count >= min_attempts)
        .filter(|c| seen.insert(c.ip.as_str()))
        .map(|c| c.ip.clone())
        .collect()
}

/// Un registre mal provisionné ne se corrige pas seul: il mérite une erreur
fn log_ledger_failure(message: String, e: &LedgerError) {
    if e.is_fatal() {
        error!("{}: {}", message, e);
    } else {
        warn!("{}: {}", message, e);
    }
}

#[derive(Clone)]
pub struct BanOrchestrator {
    backend: Arc<dyn FirewallBackend>,
    ledger: Option<BanLedger>,
    host_ip: String,
}

impl BanOrchestrator {
    pub fn new(
        backend: Arc<dyn FirewallBackend>,
        ledger: Option<BanLedger>,
        host_ip: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            ledger,
            host_ip: host_ip.into(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn FirewallBackend> {
        &self.backend
    }

    pub fn ledger(&self) -> Option<&BanLedger> {
        self.ledger.as_ref()
    }

    pub fn host_ip(&self) -> &str {
        &self.host_ip
    }

    fn enforcement(&self, source: crate::error::ExecError) -> OrchestrationError {
        OrchestrationError::Enforcement {
            backend: self.backend.type_name(),
            source,
        }
    }

    /// Active le pare-feu s'il ne l'est pas. Renvoie vrai s'il a fallu l'activer.
    pub async fn ensure_enabled(&self) -> Result<bool, OrchestrationError> {
        let enabled = self
            .backend
            .is_enabled()
            .await
            .map_err(|e| self.enforcement(e))?;
        if enabled {
            info!("Pare-feu {} déjà actif", self.backend.type_name());
            return Ok(false);
        }

        info!("Activation du pare-feu {}", self.backend.type_name());
        self.backend.enable().await.map_err(|e| self.enforcement(e))?;
        Ok(true)
    }

    pub async fn disable(&self) -> Result<(), OrchestrationError> {
        self.backend.disable().await.map_err(|e| self.enforcement(e))
    }

    pub async fn ban(&self, address: &str) -> Result<BanOutcome, OrchestrationError> {
        if let Err(e) = self.backend.ban_ip(address).await {
            error!("Échec du blocage de {}: {}", address, e);
            return Err(self.enforcement(e));
        }
        info!("IP {} bloquée ({})", address, self.backend.type_name());

        let persistence = match &self.ledger {
            None => Persistence::Skipped,
            Some(ledger) => match ledger.record_ban(&self.host_ip, address).await {
                Ok(BanWrite::Inserted) => Persistence::Inserted,
                Ok(BanWrite::Refreshed) => Persistence::Refreshed,
                Err(e) => {
                    log_ledger_failure(format!("IP {} bloquée mais non enregistrée", address), &e);
                    Persistence::Failed(e)
                }
            },
        };

        Ok(BanOutcome {
            address: address.to_string(),
            backend: self.backend.type_name(),
            persistence,
        })
    }

    /// Retire la règle puis marque l'enregistrement inactif
    pub async fn unban(&self, address: &str) -> Result<BanOutcome, OrchestrationError> {
        if let Err(e) = self.backend.unban_ip(address).await {
            error!("Échec du déblocage de {}: {}", address, e);
            return Err(self.enforcement(e));
        }
        info!("IP {} débloquée ({})", address, self.backend.type_name());

        let persistence = match &self.ledger {
            None => Persistence::Skipped,
            Some(ledger) => match ledger.record_unban(&self.host_ip, address).await {
                Ok(true) => Persistence::Deactivated,
                Ok(false) => Persistence::NotRecorded,
                Err(e) => {
                    log_ledger_failure(
                        format!("IP {} débloquée mais registre non mis à jour", address),
                        &e,
                    );
                    Persistence::Failed(e)
                }
            },
        };

        Ok(BanOutcome {
            address: address.to_string(),
            backend: self.backend.type_name(),
            persistence,
        })
    }

    /// Bloque chaque adresse puis enregistre les adresses bloquées en une transaction
    pub async fn ban_batch(&self, addresses: &[String]) -> BatchOutcome {
        let mut enforced = Vec::new();
        let mut rejected = Vec::new();

        for address in addresses {
            match self.backend.ban_ip(address).await {
                Ok(()) => enforced.push(address.clone()),
                Err(e) => {
                    error!("Échec du blocage de {}: {}", address, e);
                    rejected.push((address.clone(), e));
                }
            }
        }

        let persisted = match &self.ledger {
            Some(ledger) if !enforced.is_empty() => {
                let result = ledger.record_bans(&self.host_ip, &enforced).await;
                if let Err(e) = &result {
                    log_ledger_failure(
                        format!("{} IP(s) bloquée(s) mais non enregistrée(s)", enforced.len()),
                        e,
                    );
                }
                Some(result)
            }
            _ => None,
        };

        BatchOutcome {
            enforced,
            rejected,
            persisted,
        }
    }

    /// Seuil appliqué ici: seules les adresses avec `count >= min_attempts` sont bannies
    pub async fn ban_candidates(&self, candidates: &[CandidateIp], min_attempts: u32) -> BatchOutcome {
        let addresses = eligible_addresses(candidates, min_attempts);
        info!(
            "{} candidat(s), {} au-dessus du seuil de {}",
            candidates.len(),
            addresses.len(),
            min_attempts
        );
        self.ban_batch(&addresses).await
    }
}
