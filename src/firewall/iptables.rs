//! Pare-feu à tables (iptables / ip6tables)
//!
//! iptables ne persiste rien de lui-même: après chaque modification les règles
//! sont écrites dans `rules.v4` / `rules.v6`. L'IPv6 passe par ip6tables, qui
//! peut être absent: tout ce qui touche la famille secondaire est au mieux.
//! Une adresse lisible ne touche que sa propre famille.

use super::command::{command_line, run_checked, run_steps, CommandRunner, Step};
use super::{managed_ports, Family, FirewallBackend, SSH_PORT};
use crate::error::ExecError;
use crate::models::BackendKind;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

fn tool(family: Family) -> &'static str {
    match family {
        Family::V4 => "iptables",
        Family::V6 => "ip6tables",
    }
}

fn rules_file(family: Family) -> &'static str {
    match family {
        Family::V4 => "rules.v4",
        Family::V6 => "rules.v6",
    }
}

/// Protège une valeur pour `sh -c`
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Famille imposée et famille tentée au mieux. Une adresse illisible est
/// essayée sur les deux.
fn ban_families(address: &str) -> (Family, Option<Family>) {
    match Family::parse(address) {
        Some(family) => (family, None),
        None => (Family::V4, Some(Family::V6)),
    }
}

pub struct IptablesBackend {
    runner: Arc<dyn CommandRunner>,
    api_port: u16,
    rules_dir: PathBuf,
}

impl IptablesBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, api_port: u16, rules_dir: PathBuf) -> Self {
        Self {
            runner,
            api_port,
            rules_dir,
        }
    }

    /// `mkdir -p '<dir>' && iptables-save > '<dir>/rules.v4'`
    fn save_step(&self, family: Family) -> Step {
        let dir = shell_quote(&self.rules_dir.to_string_lossy());
        let file = shell_quote(&self.rules_dir.join(rules_file(family)).to_string_lossy());
        let script = format!(
            "mkdir -p {dir} && {tool}-save > {file}",
            dir = dir,
            tool = tool(family),
            file = file
        );
        Step::from_args("sh", vec!["-c".to_string(), script])
    }

    fn enable_steps_for(&self, family: Family) -> Vec<Step> {
        let program = tool(family);
        let ssh = SSH_PORT.to_string();
        let api = self.api_port.to_string();
        let mut steps = vec![
            Step::new(program, &["-F"]),
            Step::new(program, &["-X"]),
            Step::new(program, &["-P", "INPUT", "DROP"]),
            Step::new(program, &["-P", "FORWARD", "DROP"]),
            Step::new(program, &["-P", "OUTPUT", "ACCEPT"]),
            Step::new(
                program,
                &["-A", "INPUT", "-m", "conntrack", "--ctstate", "ESTABLISHED,RELATED", "-j", "ACCEPT"],
            ),
            Step::new(program, &["-A", "INPUT", "-i", "lo", "-j", "ACCEPT"]),
        ];
        if family == Family::V6 {
            // découverte de voisins
            steps.push(Step::new(program, &["-A", "INPUT", "-p", "ipv6-icmp", "-j", "ACCEPT"]));
        }
        steps.push(Step::new(program, &["-A", "INPUT", "-p", "tcp", "--dport", &ssh, "-j", "ACCEPT"]));
        steps.push(Step::new(program, &["-A", "INPUT", "-p", "tcp", "--dport", &api, "-j", "ACCEPT"]));
        steps.push(self.save_step(family));
        steps
    }

    fn enable_steps(&self) -> Vec<Step> {
        let mut steps = self.enable_steps_for(Family::V4);
        steps.extend(self.enable_steps_for(Family::V6).into_iter().map(Step::optional));
        steps
    }

    fn disable_steps(&self) -> Vec<Step> {
        let permissive = |family: Family| {
            let program = tool(family);
            vec![
                Step::new(program, &["-F"]),
                Step::new(program, &["-X"]),
                Step::new(program, &["-P", "INPUT", "ACCEPT"]),
                Step::new(program, &["-P", "FORWARD", "ACCEPT"]),
                Step::new(program, &["-P", "OUTPUT", "ACCEPT"]),
            ]
        };
        let mut steps = permissive(Family::V4);
        steps.extend(permissive(Family::V6).into_iter().map(Step::optional));
        steps.push(self.save_step(Family::V4).optional());
        steps.push(self.save_step(Family::V6).optional());
        steps
    }

    fn rule_args(op: &str, address: &str, port: u16) -> Vec<String> {
        vec![
            op.to_string(),
            "INPUT".to_string(),
            "-s".to_string(),
            address.to_string(),
            "-p".to_string(),
            "tcp".to_string(),
            "--dport".to_string(),
            port.to_string(),
            "-j".to_string(),
            "DROP".to_string(),
        ]
    }

    /// `-C` sort en erreur quand la règle n'existe pas
    async fn rule_present(&self, family: Family, address: &str, port: u16) -> Result<bool, ExecError> {
        let output = self
            .runner
            .run(tool(family), &Self::rule_args("-C", address, port))
            .await?;
        Ok(output.success())
    }

    async fn add_rule(&self, family: Family, address: &str, port: u16) -> Result<(), ExecError> {
        if self.rule_present(family, address, port).await? {
            debug!("Règle {} déjà présente pour {} port {}", tool(family), address, port);
            return Ok(());
        }
        // -I: la règle passe devant les ACCEPT posés à l'activation
        run_checked(self.runner.as_ref(), tool(family), &Self::rule_args("-I", address, port)).await?;
        Ok(())
    }

    async fn remove_rule(&self, family: Family, address: &str, port: u16) -> Result<(), ExecError> {
        if !self.rule_present(family, address, port).await? {
            return Ok(());
        }
        run_checked(self.runner.as_ref(), tool(family), &Self::rule_args("-D", address, port)).await?;
        Ok(())
    }

    /// Sauvegarde au mieux: la règle active est déjà en place
    async fn persist(&self, families: impl IntoIterator<Item = Family>) {
        for family in families {
            let step = self.save_step(family);
            if let Err(e) = run_checked(self.runner.as_ref(), &step.program, &step.args).await {
                warn!("Sauvegarde des règles {} impossible: {}", tool(family), e);
            }
        }
    }
}

#[async_trait]
impl FirewallBackend for IptablesBackend {
    async fn is_enabled(&self) -> Result<bool, ExecError> {
        let args = vec!["-S".to_string(), "INPUT".to_string()];
        let output = run_checked(self.runner.as_ref(), "iptables", &args).await?;
        let enabled = output.stdout.lines().map(str::trim).any(|line| {
            line == "-P INPUT DROP" || line == "-P INPUT REJECT" || line.starts_with("-A INPUT")
        });
        Ok(enabled)
    }

    async fn enable(&self) -> Result<(), ExecError> {
        run_steps(self.runner.as_ref(), &self.enable_steps()).await?;
        info!("iptables configuré (SSH et port {} autorisés)", self.api_port);
        Ok(())
    }

    async fn disable(&self) -> Result<(), ExecError> {
        run_steps(self.runner.as_ref(), &self.disable_steps()).await?;
        info!("iptables remis en mode permissif");
        Ok(())
    }

    async fn ban_ip(&self, address: &str) -> Result<(), ExecError> {
        let (primary, fallback) = ban_families(address);
        for port in managed_ports(self.api_port) {
            self.add_rule(primary, address, port).await?;
            if let Some(family) = fallback {
                if let Err(e) = self.add_rule(family, address, port).await {
                    debug!("Règle {} ignorée pour {}: {}", tool(family), address, e);
                }
            }
        }
        self.persist(std::iter::once(primary).chain(fallback)).await;
        debug!("IP {} bloquée via iptables", address);
        Ok(())
    }

    async fn unban_ip(&self, address: &str) -> Result<(), ExecError> {
        let (primary, fallback) = ban_families(address);
        for port in managed_ports(self.api_port) {
            self.remove_rule(primary, address, port).await?;
            if let Some(family) = fallback {
                if let Err(e) = self.remove_rule(family, address, port).await {
                    debug!(
                        "Suppression {} ignorée ({}): {}",
                        tool(family),
                        command_line(tool(family), &Self::rule_args("-D", address, port)),
                        e
                    );
                }
            }
        }
        self.persist(std::iter::once(primary).chain(fallback)).await;
        debug!("IP {} débloquée via iptables", address);
        Ok(())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::TableBased
    }
}
