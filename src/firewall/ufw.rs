//! Pare-feu à règles (ufw)
//!
//! ufw gère lui-même les deux familles d'adresses et écrit ses règles sur disque
//! à chaque modification: aucune étape de sauvegarde n'est nécessaire.

use super::command::{run_checked, run_steps, CommandRunner, Step};
use super::{managed_ports, FirewallBackend, SSH_PORT};
use crate::error::ExecError;
use crate::models::BackendKind;
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;

const UFW: &str = "ufw";

pub struct UfwBackend {
    runner: Arc<dyn CommandRunner>,
    api_port: u16,
}

impl UfwBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, api_port: u16) -> Self {
        Self { runner, api_port }
    }

    fn enable_steps(&self) -> Vec<Step> {
        let ssh = format!("{}/tcp", SSH_PORT);
        let api = format!("{}/tcp", self.api_port);
        vec![
            Step::new(UFW, &["default", "deny", "incoming"]),
            Step::new(UFW, &["default", "allow", "outgoing"]),
            Step::new(UFW, &["allow", &ssh]),
            Step::new(UFW, &["allow", &api]),
            Step::new(UFW, &["--force", "enable"]),
        ]
    }

    /// Les règles de refus passent en tête, avant les `allow`. `prepend` accepte
    /// une table vide et les adresses IPv6, contrairement à `insert 1`.
    fn ban_steps(&self, address: &str) -> Vec<Step> {
        managed_ports(self.api_port)
            .into_iter()
            .map(|port| {
                let port = port.to_string();
                Step::new(
                    UFW,
                    &["prepend", "deny", "from", address, "to", "any", "port", &port, "proto", "tcp"],
                )
            })
            .collect()
    }

    /// ufw signale une règle absente sans échouer
    fn unban_steps(&self, address: &str) -> Vec<Step> {
        managed_ports(self.api_port)
            .into_iter()
            .map(|port| {
                let port = port.to_string();
                Step::new(
                    UFW,
                    &["delete", "deny", "from", address, "to", "any", "port", &port, "proto", "tcp"],
                )
            })
            .collect()
    }
}

#[async_trait]
impl FirewallBackend for UfwBackend {
    async fn is_enabled(&self) -> Result<bool, ExecError> {
        let output = run_checked(self.runner.as_ref(), UFW, &["status".to_string()]).await?;
        Ok(output.stdout.contains("Status: active"))
    }

    async fn enable(&self) -> Result<(), ExecError> {
        run_steps(self.runner.as_ref(), &self.enable_steps()).await?;
        info!("ufw activé (SSH et port {} autorisés)", self.api_port);
        Ok(())
    }

    async fn disable(&self) -> Result<(), ExecError> {
        run_steps(self.runner.as_ref(), &[Step::new(UFW, &["--force", "disable"])]).await?;
        info!("ufw désactivé");
        Ok(())
    }

    async fn ban_ip(&self, address: &str) -> Result<(), ExecError> {
        run_steps(self.runner.as_ref(), &self.ban_steps(address)).await?;
        debug!("IP {} bloquée via ufw", address);
        Ok(())
    }

    async fn unban_ip(&self, address: &str) -> Result<(), ExecError> {
        run_steps(self.runner.as_ref(), &self.unban_steps(address)).await?;
        debug!("IP {} débloquée via ufw", address);
        Ok(())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::RuleBased
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::testing::FakeRunner;

    fn backend() -> (Arc<FakeRunner>, UfwBackend) {
        let runner = Arc::new(FakeRunner::new());
        let backend = UfwBackend::new(runner.clone(), 4554);
        (runner, backend)
    }

    #[tokio::test]
    async fn test_enable_then_status_active() {
        let (runner, ufw) = backend();
        runner.succeed("ufw status", "Status: inactive\n");
        runner.succeed("ufw status", "Status: active\n\nTo  Action  From\n");

        assert!(!ufw.is_enabled().await.unwrap());
        ufw.enable().await.unwrap();
        assert!(ufw.is_enabled().await.unwrap());

        assert!(runner.was_called("ufw default deny incoming"));
        assert!(runner.was_called("ufw default allow outgoing"));
        assert!(runner.was_called("ufw allow 22/tcp"));
        assert!(runner.was_called("ufw allow 4554/tcp"));
        assert!(runner.was_called("ufw --force enable"));
    }

    #[tokio::test]
    async fn test_disable_then_status_inactive() {
        let (runner, ufw) = backend();
        runner.succeed("ufw status", "Status: inactive\n");

        ufw.disable().await.unwrap();
        ufw.disable().await.unwrap();
        assert!(!ufw.is_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_enable_aborts_on_failed_step() {
        let (runner, ufw) = backend();
        runner.fail("ufw allow 22/tcp", 1, "ERROR: problem running");

        let err = ufw.enable().await.unwrap_err();
        assert_eq!(err.command(), "ufw allow 22/tcp");
        assert!(!runner.was_called("ufw --force enable"));
    }

    #[tokio::test]
    async fn test_ban_denies_every_managed_port() {
        let (runner, ufw) = backend();
        ufw.ban_ip("203.0.113.7").await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 4);
        for port in [22, 80, 443, 4554] {
            let expected = format!(
                "ufw prepend deny from 203.0.113.7 to any port {} proto tcp",
                port
            );
            assert!(calls.contains(&expected), "manquant: {}", expected);
        }
    }

    #[tokio::test]
    async fn test_ban_then_unban_removes_same_rules() {
        let (runner, ufw) = backend();
        ufw.ban_ip("203.0.113.7").await.unwrap();
        ufw.unban_ip("203.0.113.7").await.unwrap();

        let added: Vec<String> = runner
            .calls()
            .iter()
            .filter_map(|c| c.strip_prefix("ufw prepend ").map(str::to_string))
            .collect();
        let removed: Vec<String> = runner
            .calls()
            .iter()
            .filter_map(|c| c.strip_prefix("ufw delete ").map(str::to_string))
            .collect();
        assert_eq!(added, removed);
    }

    #[tokio::test]
    async fn test_ban_on_active_firewall_without_rules() {
        let (runner, ufw) = backend();
        runner.succeed("ufw status", "Status: active\n");
        runner.fail(
            "ufw insert 1 deny from 203.0.113.7 to any port 22 proto tcp",
            1,
            "ERROR: Invalid position '1'",
        );

        assert!(ufw.is_enabled().await.unwrap());
        ufw.ban_ip("203.0.113.7").await.unwrap();

        assert!(!runner.calls().iter().any(|c| c.starts_with("ufw insert")));
        assert!(runner.was_called("ufw prepend deny from 203.0.113.7 to any port 22 proto tcp"));
    }

    #[tokio::test]
    async fn test_ban_ipv6_address() {
        let (runner, ufw) = backend();
        runner.fail(
            "ufw insert 1 deny from 2001:db8::7 to any port 22 proto tcp",
            1,
            "ERROR: Invalid position '1'",
        );

        ufw.ban_ip("2001:db8::7").await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 4);
        for port in [22, 80, 443, 4554] {
            let expected = format!("ufw prepend deny from 2001:db8::7 to any port {} proto tcp", port);
            assert!(calls.contains(&expected), "manquant: {}", expected);
        }
    }
}
