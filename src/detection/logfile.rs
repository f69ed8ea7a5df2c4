//! Journal de détection au format texte
//!
//! Lignes attendues:
//! `[2026-10-12 10:00:00] Detected IP with multiple attempts: 203.0.113.7 (count: 5)`.
//! Le libellé entre la date et l'adresse est libre, et l'ancien format
//! `(contagem: N)` reste accepté.

use super::CandidateSource;
use crate::error::SourceError;
use crate::models::{is_dotted_quad, CandidateIp};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;

static LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([^\]]+)\][^\[]*?\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}) \((?:count|contagem): (\d+)\)")
        .expect("regex de journal valide")
});

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Une date illisible est remplacée par `now`
pub fn parse_line(line: &str, now: DateTime<Utc>) -> Option<CandidateIp> {
    let caps = LINE_RE.captures(line)?;
    let ip = caps.get(2)?.as_str();
    if !is_dotted_quad(ip) {
        return None;
    }
    let count = match caps[3].parse::<u32>() {
        Ok(count) => count,
        Err(e) => {
            warn!("Nombre de tentatives illisible pour {}: {}", ip, e);
            return None;
        }
    };
    let observed_at = NaiveDateTime::parse_from_str(caps[1].trim(), TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .unwrap_or(now);

    Some(CandidateIp {
        ip: ip.to_string(),
        count,
        observed_at,
    })
}

pub fn parse_log(content: &str, now: DateTime<Utc>) -> Vec<CandidateIp> {
    content.lines().filter_map(|line| parse_line(line, now)).collect()
}

pub struct LogFileSource {
    path: PathBuf,
}

impl LogFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CandidateSource for LogFileSource {
    fn name(&self) -> &'static str {
        "journal"
    }

    async fn collect(&self) -> Result<Vec<CandidateIp>, SourceError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
        let candidates = parse_log(&content, Utc::now());
        debug!(
            "{}: {} entrée(s) reconnue(s)",
            self.path.display(),
            candidates.len()
        );
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_both_wordings() {
        let now = Utc::now();
        let english =
            parse_line("[2026-10-12 10:00:00] Detected IP with multiple attempts: 203.0.113.7 (count: 5)", now)
                .unwrap();
        assert_eq!(english.ip, "203.0.113.7");
        assert_eq!(english.count, 5);
        assert_eq!(
            english.observed_at,
            Utc.with_ymd_and_hms(2026, 10, 12, 10, 0, 0).unwrap()
        );

        let legacy = parse_line(
            "[2026-10-12 10:05:00] Detectado IP com múltiplas tentativas: 198.51.100.2 (contagem: 2)",
            now,
        )
        .unwrap();
        assert_eq!(legacy.ip, "198.51.100.2");
        assert_eq!(legacy.count, 2);
    }

    #[test]
    fn test_bad_timestamp_falls_back_to_now() {
        let now = Utc::now();
        let entry = parse_line("[hier soir] IP 203.0.113.7 (count: 4)", now).unwrap();
        assert_eq!(entry.observed_at, now);
    }

    #[test]
    fn test_rejects_noise() {
        let now = Utc::now();
        assert!(parse_line("Service started", now).is_none());
        assert!(parse_line("[2026-10-12 10:00:00] IP 999.1.1.1 (count: 4)", now).is_none());
        assert!(parse_line("[2026-10-12 10:00:00] IP 203.0.113.7 (tries: 4)", now).is_none());
    }

    #[tokio::test]
    async fn test_collect_reads_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[2026-10-12 10:00:00] Detected IP with multiple attempts: 203.0.113.7 (count: 5)").unwrap();
        writeln!(file, "autre ligne").unwrap();
        writeln!(file, "[2026-10-12 10:01:00] Detected IP with multiple attempts: 198.51.100.2 (count: 2)").unwrap();

        let source = LogFileSource::new(file.path());
        let candidates = source.collect().await.unwrap();
        assert_eq!(candidates.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let source = LogFileSource::new("/nonexistent/guardian/bruteforce.log");
        assert!(matches!(source.collect().await, Err(SourceError::Io { .. })));
    }
}
