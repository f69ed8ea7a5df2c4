//! Pare-feu à zones (firewalld)
//!
//! Les bannissements sont des rich rules ajoutées à la configuration active,
//! puis recopiées dans la configuration permanente. firewalld signale une règle
//! déjà présente (ALREADY_ENABLED) ou absente (NOT_ENABLED) sans échouer.

use super::command::{run_steps, CommandRunner, Step};
use super::{managed_ports, Family, FirewallBackend};
use crate::error::ExecError;
use crate::models::BackendKind;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;

const FIREWALL_CMD: &str = "firewall-cmd";
const SYSTEMCTL: &str = "systemctl";

pub struct FirewalldBackend {
    runner: Arc<dyn CommandRunner>,
    api_port: u16,
}

impl FirewalldBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, api_port: u16) -> Self {
        Self { runner, api_port }
    }

    /// Une rich rule ne vise qu'une famille: seule celle de l'adresse est utilisée
    fn rich_rule(address: &str, port: u16) -> String {
        let family = match Family::of(address) {
            Family::V4 => "ipv4",
            Family::V6 => "ipv6",
        };
        format!(
            "rule family=\"{}\" source address=\"{}\" port port=\"{}\" protocol=\"tcp\" reject",
            family, address, port
        )
    }

    fn rule_steps(&self, flag: &str, address: &str) -> Vec<Step> {
        managed_ports(self.api_port)
            .into_iter()
            .map(|port| {
                let arg = format!("--{}={}", flag, Self::rich_rule(address, port));
                Step::from_args(FIREWALL_CMD, vec![arg])
            })
            .collect()
    }

    fn enable_steps(&self) -> Vec<Step> {
        let api = format!("--add-port={}/tcp", self.api_port);
        vec![
            Step::new(SYSTEMCTL, &["start", "firewalld"]),
            Step::new(SYSTEMCTL, &["enable", "firewalld"]),
            Step::new(FIREWALL_CMD, &["--permanent", "--add-service=ssh"]),
            Step::new(FIREWALL_CMD, &["--permanent", &api]),
            Step::new(FIREWALL_CMD, &["--reload"]),
        ]
    }

    async fn persist(&self) {
        let step = Step::new(FIREWALL_CMD, &["--runtime-to-permanent"]).optional();
        if let Err(e) = run_steps(self.runner.as_ref(), &[step]).await {
            warn!("Persistance des règles firewalld impossible: {}", e);
        }
    }
}

#[async_trait]
impl FirewallBackend for FirewalldBackend {
    async fn is_enabled(&self) -> Result<bool, ExecError> {
        let args = vec!["--state".to_string()];
        let output = self.runner.run(FIREWALL_CMD, &args).await?;
        let state = output.combined();
        let state = state.trim();
        if state == "running" {
            return Ok(true);
        }
        if state.contains("not running") {
            return Ok(false);
        }
        if output.success() {
            Ok(false)
        } else {
            Err(ExecError::Failed {
                command: format!("{} --state", FIREWALL_CMD),
                code: output.code,
                output: state.to_string(),
            })
        }
    }

    async fn enable(&self) -> Result<(), ExecError> {
        run_steps(self.runner.as_ref(), &self.enable_steps()).await?;
        info!("firewalld démarré (SSH et port {} autorisés)", self.api_port);
        Ok(())
    }

    /// `systemctl stop` et `disable` réussissent sur un service déjà arrêté
    async fn disable(&self) -> Result<(), ExecError> {
        let steps = [
            Step::new(SYSTEMCTL, &["stop", "firewalld"]),
            Step::new(SYSTEMCTL, &["disable", "firewalld"]),
        ];
        run_steps(self.runner.as_ref(), &steps).await?;
        info!("firewalld arrêté");
        Ok(())
    }

    async fn ban_ip(&self, address: &str) -> Result<(), ExecError> {
        run_steps(self.runner.as_ref(), &self.rule_steps("add-rich-rule", address)).await?;
        self.persist().await;
        debug!("IP {} bloquée via firewalld", address);
        Ok(())
    }

    async fn unban_ip(&self, address: &str) -> Result<(), ExecError> {
        run_steps(self.runner.as_ref(), &self.rule_steps("remove-rich-rule", address)).await?;
        self.persist().await;
        debug!("IP {} débloquée via firewalld", address);
        Ok(())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::ZoneBased
    }
}
