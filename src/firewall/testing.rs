//! Exécuteur de commandes scripté pour les tests

use super::command::{command_line, CommandOutput, CommandRunner};
use crate::error::ExecError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Exécuteur qui enregistre les appels et renvoie des réponses préparées.
///
/// Les réponses sont associées à la ligne de commande exacte. Plusieurs réponses
/// pour la même commande sont consommées dans l'ordre, la dernière restant
/// active. Une commande sans réponse réussit avec une sortie vide.
#[derive(Debug, Default)]
pub struct FakeRunner {
    installed: Mutex<HashSet<String>>,
    responses: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    unspawnable: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Déclare les exécutables présents dans le PATH
    pub fn with_installed(programs: &[&str]) -> Self {
        let runner = Self::new();
        locked(&runner.installed).extend(programs.iter().map(|p| p.to_string()));
        runner
    }

    pub fn respond(&self, command: &str, output: CommandOutput) {
        locked(&self.responses)
            .entry(command.to_string())
            .or_default()
            .push_back(output);
    }

    pub fn succeed(&self, command: &str, stdout: &str) {
        self.respond(command, CommandOutput::ok(stdout));
    }

    pub fn fail(&self, command: &str, code: i32, stderr: &str) {
        self.respond(command, CommandOutput::failed(code, stderr));
    }

    /// Le lancement du programme échoue (exécutable absent)
    pub fn unspawnable(&self, program: &str) {
        locked(&self.unspawnable).insert(program.to_string());
    }

    /// Lignes de commande exécutées, dans l'ordre
    pub fn calls(&self) -> Vec<String> {
        locked(&self.calls).clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<String> {
        let prefix = format!("{} ", program);
        self.calls()
            .into_iter()
            .filter(|c| c == program || c.starts_with(&prefix))
            .collect()
    }

    pub fn was_called(&self, command: &str) -> bool {
        locked(&self.calls).iter().any(|c| c == command)
    }

    pub fn clear_calls(&self) {
        locked(&self.calls).clear();
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, ExecError> {
        let line = command_line(program, args);
        locked(&self.calls).push(line.clone());

        if locked(&self.unspawnable).contains(program) {
            return Err(ExecError::Spawn {
                command: line,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "introuvable"),
            });
        }

        let mut responses = locked(&self.responses);
        let output = match responses.get_mut(&line) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => CommandOutput::ok(""),
        };
        Ok(output)
    }

    fn is_available(&self, program: &str) -> bool {
        locked(&self.installed).contains(program)
    }
}
