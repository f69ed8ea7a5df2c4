//! Historique des connexions échouées (`lastb`)

use super::CandidateSource;
use crate::error::SourceError;
use crate::firewall::command::run_checked;
use crate::firewall::CommandRunner;
use crate::models::{is_dotted_quad, CandidateIp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

const LASTB: &str = "lastb";

pub struct LastbSource {
    runner: Arc<dyn CommandRunner>,
}

impl LastbSource {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

/// Compte les échecs par adresse. La troisième colonne de `lastb -i` est
/// l'adresse d'origine; les connexions locales et la ligne `btmp begins` sont ignorées.
/// Tri par nombre décroissant.
pub fn parse_lastb(output: &str, observed_at: DateTime<Utc>) -> Vec<CandidateIp> {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    for line in output.lines() {
        let Some(address) = line.split_whitespace().nth(2) else {
            continue;
        };
        if is_dotted_quad(address) && address != "0.0.0.0" {
            *counts.entry(address).or_insert(0) += 1;
        }
    }

    let mut candidates: Vec<CandidateIp> = counts
        .into_iter()
        .map(|(ip, count)| CandidateIp {
            ip: ip.to_string(),
            count,
            observed_at,
        })
        .collect();
    candidates.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.ip.cmp(&b.ip)));
    candidates
}

#[async_trait]
impl CandidateSource for LastbSource {
    fn name(&self) -> &'static str {
        LASTB
    }

    async fn collect(&self) -> Result<Vec<CandidateIp>, SourceError> {
        let output = run_checked(self.runner.as_ref(), LASTB, &["-i".to_string()]).await?;
        let candidates = parse_lastb(&output.stdout, Utc::now());
        debug!("lastb: {} adresse(s) distincte(s)", candidates.len());
        Ok(candidates)
    }
}
