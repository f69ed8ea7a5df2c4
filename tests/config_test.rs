use guardian::config::{write_db_conn_string, Config};
use guardian::log_mode::LogMode;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::sync::RwLock;

#[tokio::test]
async fn test_update_settings() {
    let config_arc = Arc::new(RwLock::new(Config::default()));

    // Passage au pare-feu iptables
    {
        let mut config = config_arc.write().await;
        config.firewall_type = "iptables".to_string();
        assert!(config.validate().is_ok());
    }

    // Seuil relevé
    {
        let mut config = config_arc.write().await;
        config
            .apply_env(|key| (key == "GUARDIAN_MIN_ATTEMPTS").then(|| "10".to_string()))
            .unwrap();
        assert_eq!(config.min_attempts, 10);
    }

    // Journal systemd
    {
        let mut config = config_arc.write().await;
        config
            .apply_env(|key| (key == "GUARDIAN_LOG_MODE").then(|| "journal".to_string()))
            .unwrap();
        assert_eq!(config.log_mode, LogMode::SystemdJournal);
    }

    let config = config_arc.read().await;
    assert_eq!(config.firewall_type, "iptables");
    assert_eq!(config.port, 4554);
}

#[test]
fn test_setup_writes_connection_string_where_load_reads_it() {
    let dir = tempdir().unwrap();
    let env_file = Config::env_file_in(dir.path());
    write_db_conn_string(&env_file, "postgres://guardian:secret@db:5432/guardian").unwrap();

    let vars = dotenv::from_path_iter(&env_file)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(
        vars,
        vec![(
            "GUARDIAN_DB_CONN_STRING".to_string(),
            "postgres://guardian:secret@db:5432/guardian".to_string()
        )]
    );

    let mut config = Config::default();
    config
        .apply_env(|key| {
            vars.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        })
        .unwrap();
    assert_eq!(
        config.db_conn_string.as_deref(),
        Some("postgres://guardian:secret@db:5432/guardian")
    );
}
