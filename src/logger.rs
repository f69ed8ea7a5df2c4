//! Installation du logger
//!
//! Appelé une seule fois au démarrage. Les composants écrivent ensuite via les
//! macros `log` sans jamais toucher à la destination.

use crate::log_mode::LogMode;
use log::LevelFilter;

pub fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

fn init_console(level: &str) {
    // RUST_LOG garde la priorité sur le niveau configuré
    let env = env_logger::Env::default().default_filter_or(level);
    if let Err(e) = env_logger::Builder::from_env(env).try_init() {
        eprintln!("Logger déjà installé: {}", e);
    }
}

pub fn init(level: &str, mode: LogMode) {
    match mode {
        LogMode::Console => init_console(level),
        LogMode::SystemdJournal => {
            #[cfg(feature = "systemd")]
            {
                use systemd_journal_logger::JournalLog;

                match JournalLog::new() {
                    Ok(logger) => {
                        if let Err(e) = logger
                            .with_syslog_identifier("guardian".to_string())
                            .install()
                        {
                            eprintln!("Erreur lors de l'installation du logger systemd: {}", e);
                            init_console(level);
                        } else {
                            log::set_max_level(parse_level(level));
                        }
                    }
                    Err(e) => {
                        eprintln!("Erreur lors de l'initialisation du logger systemd: {}", e);
                        init_console(level);
                    }
                }
            }

            #[cfg(not(feature = "systemd"))]
            {
                eprintln!("AVERTISSEMENT: le mode SystemdJournal nécessite la feature 'systemd'. Logger standard utilisé.");
                init_console(level);
            }
        }
    }
}
