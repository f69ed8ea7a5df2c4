use anyhow::{bail, Context, Result};
use clap::Parser;
use guardian::api::{self, ApiState};
use guardian::cli::{Cli, Command};
use guardian::config::{write_db_conn_string, Config};
use guardian::detection::{self, snapshot, CandidateSource, LastbSource, LogFileSource};
use guardian::firewall::{
    create_backend, BackendDetector, BackendSettings, CommandRunner, SystemCommandRunner,
};
use guardian::ledger::{BanLedger, PgBanStore};
use guardian::models::{is_dotted_quad, BanOutcome, Persistence, SweepReport};
use guardian::logger;
use guardian::orchestrator::BanOrchestrator;
use log::{error, info, warn};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    logger::init(&config.log_level, config.log_mode);

    if let Command::Setup { db_conn_string } = &cli.command {
        let env_file = Config::env_file_in(&config.install_dir);
        write_db_conn_string(&env_file, db_conn_string)?;
        println!("Chaîne de connexion enregistrée dans {}", env_file.display());
        println!("Redémarrez le service pour l'appliquer: sudo systemctl restart guardian");
        return Ok(());
    }

    let runner: Arc<dyn CommandRunner> =
        Arc::new(SystemCommandRunner::with_timeout(config.command_deadline()));
    let configured = cli.firewall.as_deref().unwrap_or(&config.firewall_type);
    let kind = BackendDetector::new(runner.clone()).resolve(configured)?;
    let settings = BackendSettings {
        api_port: config.port,
        rules_dir: config.rules_dir.clone(),
    };
    let backend = create_backend(kind, runner.clone(), &settings);

    let host_ip = config.host_ip()?;
    let ledger = open_ledger(&config).await;
    let orchestrator = BanOrchestrator::new(backend, ledger, host_ip.clone());

    match cli.command {
        Command::Start { no_sweep } => start(&config, orchestrator, runner, &host_ip, no_sweep).await,
        Command::Ban { ip } => {
            check_address(&ip)?;
            let outcome = orchestrator.ban(&ip).await?;
            println!("IP {} bloquée ({})", outcome.address, outcome.backend);
            report_persistence(outcome)
        }
        Command::Unban { ip } => {
            check_address(&ip)?;
            let outcome = orchestrator.unban(&ip).await?;
            println!("IP {} débloquée ({})", outcome.address, outcome.backend);
            report_persistence(outcome)
        }
        Command::Status => status(&orchestrator).await,
        Command::Enable => {
            if orchestrator.ensure_enabled().await? {
                println!("Pare-feu {} activé", orchestrator.backend().type_name());
            } else {
                println!("Pare-feu {} déjà actif", orchestrator.backend().type_name());
            }
            Ok(())
        }
        Command::Disable => {
            orchestrator.disable().await?;
            println!("Pare-feu {} désactivé", orchestrator.backend().type_name());
            Ok(())
        }
        Command::Import { log, min } => {
            let min = min.unwrap_or(config.min_attempts);
            import(&config, &orchestrator, LogFileSource::new(log), min).await
        }
        Command::Setup { .. } => Ok(()),
    }
}

/// Sans base joignable, les bannissements restent appliqués mais ne sont pas enregistrés
async fn open_ledger(config: &Config) -> Option<BanLedger> {
    let dsn = config.db_conn_string.as_deref()?;
    let store = match PgBanStore::connect(dsn, &config.db_schema).await {
        Ok(store) => store,
        Err(e) => {
            error!("Registre indisponible: {}", e);
            return None;
        }
    };
    if let Err(e) = store.ensure_schema().await {
        warn!("Vérification du schéma {} impossible: {}", config.db_schema, e);
    }
    info!("Registre PostgreSQL connecté (schéma {})", store.schema());
    Some(BanLedger::new(Arc::new(store), config.host_name()).with_timeout(config.store_deadline()))
}

fn check_address(ip: &str) -> Result<()> {
    ip.parse::<IpAddr>()
        .map(|_| ())
        .with_context(|| format!("adresse IP invalide: {}", ip))
}

/// Une base non mise à jour donne un code de sortie non nul
fn report_persistence(outcome: BanOutcome) -> Result<()> {
    match &outcome.persistence {
        Persistence::Inserted => println!("Enregistrée dans la base"),
        Persistence::Refreshed => println!("Déjà enregistrée, date mise à jour"),
        Persistence::Deactivated => println!("Marquée inactive dans la base"),
        Persistence::NotRecorded => println!("Absente de la base"),
        Persistence::Skipped => println!("Aucune base configurée"),
        Persistence::Failed(_) => {}
    }
    outcome.require_persisted()?;
    Ok(())
}

fn print_sweep(report: &SweepReport) {
    println!(
        "{} entrée(s), {} IP(s) retenue(s), {} bloquée(s), {} refusée(s)",
        report.collected, report.eligible, report.enforced, report.rejected
    );
    if let Some(summary) = report.summary {
        println!(
            "Base: {} insérée(s), {} mise(s) à jour",
            summary.inserted, summary.updated
        );
    }
}

async fn start(
    config: &Config,
    orchestrator: BanOrchestrator,
    runner: Arc<dyn CommandRunner>,
    host_ip: &str,
    no_sweep: bool,
) -> Result<()> {
    let Some(auth_token) = config.auth_token.clone() else {
        bail!("GUARDIAN_AUTH_TOKEN doit être défini pour lancer l'API");
    };

    if let Err(e) = orchestrator.ensure_enabled().await {
        error!("Activation du pare-feu impossible: {}", e);
        return Err(e.into());
    }

    if !no_sweep {
        let source: Arc<dyn CandidateSource> = Arc::new(LastbSource::new(runner));
        tokio::spawn(detection::run_periodic(
            source,
            orchestrator.clone(),
            config.min_attempts,
            config.sweep_period(),
        ));
    }

    let ip: IpAddr = host_ip
        .parse()
        .with_context(|| format!("IP d'écoute invalide: {}", host_ip))?;
    let state = Arc::new(ApiState::new(orchestrator, &auth_token));
    api::serve(state, SocketAddr::new(ip, config.port), shutdown_signal()).await?;
    info!("Guardian arrêté");
    Ok(())
}

async fn status(orchestrator: &BanOrchestrator) -> Result<()> {
    let backend = orchestrator.backend();
    let enabled = backend.is_enabled().await?;
    println!(
        "Pare-feu: {} ({})",
        backend.type_name(),
        if enabled { "actif" } else { "inactif" }
    );
    println!("Serveur: {}", orchestrator.host_ip());

    let Some(ledger) = orchestrator.ledger() else {
        println!("Aucune base configurée");
        return Ok(());
    };
    let bans = ledger.active_bans(orchestrator.host_ip()).await?;
    println!("{} IP(s) bannie(s) en base", bans.len());
    for ban in bans {
        println!(
            "  {:<16} depuis {}  (mise à jour {})",
            ban.address,
            ban.created_at.format("%Y-%m-%d %H:%M:%S"),
            ban.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn import(
    config: &Config,
    orchestrator: &BanOrchestrator,
    source: LogFileSource,
    min_attempts: u32,
) -> Result<()> {
    if orchestrator.ledger().is_none() {
        let candidates = source.collect().await?;
        let eligible: Vec<_> = candidates
            .into_iter()
            .filter(|c| c.count >= min_attempts && is_dotted_quad(&c.ip))
            .collect();
        let path = config.snapshot_path();
        snapshot::write_snapshot(&path, &eligible).await?;
        println!(
            "Aucune base configurée: {} entrée(s) sauvegardée(s) dans {}",
            eligible.len(),
            path.display()
        );
        return Ok(());
    }

    let pending = config.snapshot_path();
    if let Some(report) = snapshot::replay_pending(&pending, orchestrator, min_attempts).await? {
        println!("Sauvegarde {} rejouée:", pending.display());
        print_sweep(&report);
    }

    let report = detection::sweep_once(&source, orchestrator, min_attempts).await?;
    print_sweep(&report);
    if let Some(e) = report.persistence_error {
        bail!("IPs bloquées mais base non mise à jour: {}", e);
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Écoute de Ctrl+C impossible: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Écoute de SIGTERM impossible: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Signal d'arrêt reçu");
}
