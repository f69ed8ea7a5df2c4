//! Exécution des commandes externes
//!
//! Toutes les interactions avec l'OS passent par [`CommandRunner`], ce qui permet
//! de tester les pare-feux et la détection avec un exécuteur scripté.

use crate::error::ExecError;
use async_trait::async_trait;
use log::{debug, warn};
use std::time::Duration;
use tokio::process::Command;

/// Sortie capturée d'une commande
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout suivi de stderr
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.stderr);
        }
        text
    }
}

/// Port d'exécution des commandes externes
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Lance la commande et capture sa sortie. Un code de sortie non nul n'est
    /// pas une erreur à ce niveau: seul l'échec du lancement l'est.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, ExecError>;

    /// L'exécutable est-il présent dans le PATH ?
    fn is_available(&self, program: &str) -> bool;
}

pub fn command_line(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Lance une commande et exige un code de sortie nul
pub async fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
) -> Result<CommandOutput, ExecError> {
    let output = runner.run(program, args).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(ExecError::Failed {
            command: command_line(program, args),
            code: output.code,
            output: output.combined().trim().to_string(),
        })
    }
}

/// Une étape d'une séquence de commandes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub program: String,
    pub args: Vec<String>,
    /// Une étape requise qui échoue interrompt la séquence
    pub required: bool,
}

impl Step {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            required: true,
        }
    }

    pub fn from_args(program: &str, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args,
            required: true,
        }
    }

    /// Étape au mieux: un échec est journalisé puis ignoré
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn command_line(&self) -> String {
        command_line(&self.program, &self.args)
    }
}

/// Exécute les étapes dans l'ordre.
///
/// La première étape requise en échec arrête la séquence et son erreur est
/// renvoyée; les étapes déjà appliquées ne sont pas annulées.
pub async fn run_steps(runner: &dyn CommandRunner, steps: &[Step]) -> Result<(), ExecError> {
    for step in steps {
        debug!("Exécution de '{}'", step.command_line());
        match run_checked(runner, &step.program, &step.args).await {
            Ok(_) => {}
            Err(e) if step.required => return Err(e),
            Err(e) => warn!("Étape facultative ignorée: {}", e),
        }
    }
    Ok(())
}

/// Exécuteur réel basé sur `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner {
    timeout: Option<Duration>,
}

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limite la durée de chaque commande; le processus est tué à l'échéance
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, ExecError> {
        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);

        let pending = command.output();
        let result = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, pending).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ExecError::Timeout {
                        command: command_line(program, args),
                        timeout,
                    })
                }
            },
            None => pending.await,
        };

        let output = result.map_err(|source| ExecError::Spawn {
            command: command_line(program, args),
            source,
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn is_available(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::testing::FakeRunner;

    #[tokio::test]
    async fn test_sequence_stops_at_first_required_failure() {
        let runner = FakeRunner::new();
        runner.fail("iptables -P INPUT DROP", 1, "iptables: Permission denied");

        let steps = vec![
            Step::new("iptables", &["-F"]),
            Step::new("iptables", &["-P", "INPUT", "DROP"]),
            Step::new("iptables", &["-P", "OUTPUT", "ACCEPT"]),
        ];

        let err = run_steps(&runner, &steps).await.unwrap_err();
        assert_eq!(err.command(), "iptables -P INPUT DROP");
        // pas de retour arrière sur -F, et l'étape suivante n'est pas lancée
        assert_eq!(runner.calls(), vec!["iptables -F", "iptables -P INPUT DROP"]);
    }

    #[tokio::test]
    async fn test_optional_step_failure_is_ignored() {
        let runner = FakeRunner::new();
        runner.fail("ip6tables -F", 1, "ip6tables: not found");

        let steps = vec![
            Step::new("ip6tables", &["-F"]).optional(),
            Step::new("iptables", &["-F"]),
        ];

        assert!(run_steps(&runner, &steps).await.is_ok());
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_system_runner_reports_exit_code() {
        let runner = SystemCommandRunner::new();
        let output = runner
            .run("sh", &["-c".to_string(), "echo bonjour; exit 3".to_string()])
            .await
            .unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "bonjour");
    }

    #[tokio::test]
    async fn test_system_runner_timeout() {
        let runner = SystemCommandRunner::with_timeout(Some(Duration::from_millis(50)));
        let err = runner
            .run("sleep", &["5".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
    }
}
