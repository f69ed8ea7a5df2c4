//! Bibliothèque Guardian pour le bannissement d'adresses IP
//!
//! Une adresse est bloquée via le pare-feu installé sur l'hôte (ufw, iptables
//! ou firewalld), puis enregistrée dans une base PostgreSQL partagée par tous
//! les serveurs, pour survivre aux redémarrages et rester auditable.

// Modules principaux
pub mod error;        // Erreurs du domaine
pub mod models;       // Structures de données et modèles
pub mod config;       // Configuration du système
pub mod log_mode;     // Modes de journalisation
pub mod logger;       // Installation du logger

// Bannissement
pub mod firewall;     // Pare-feux supportés et détection
pub mod ledger;       // Registre des bannissements en base
pub mod orchestrator; // Application puis enregistrement

// Sources et interfaces
pub mod detection;    // Détection de force brute
pub mod api;          // API HTTP
pub mod cli;          // Interface en ligne de commande

// Re-export des structures principales pour faciliter l'utilisation
pub use error::{DetectionError, ExecError, LedgerError, OrchestrationError, SourceError};
pub use firewall::{create_backend, BackendDetector, BackendSettings, FirewallBackend};
pub use ledger::{BanLedger, BanStore, MemoryBanStore, PgBanStore};
pub use log_mode::LogMode;
pub use models::{BackendKind, BanOutcome, BanRecord, CandidateIp, HostIdentity, Persistence};
pub use orchestrator::BanOrchestrator;
