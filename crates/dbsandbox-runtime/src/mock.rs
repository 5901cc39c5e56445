use crate::runner::{CommandOutput, CommandRunner, ExecCommand};
use crate::RuntimeError;
use std::sync::Mutex;

/// Recording runner for tests: never spawns anything.
///
/// Every command is appended to an in-memory log. Commands whose display
/// form contains a registered pattern fail with exit status 1.
#[derive(Default)]
pub struct MockRunner {
    calls: Mutex<Vec<ExecCommand>>,
    fail_patterns: Mutex<Vec<String>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every command containing `pattern` fail.
    pub fn fail_on(&self, pattern: impl Into<String>) -> Result<(), RuntimeError> {
        self.fail_patterns
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?
            .push(pattern.into());
        Ok(())
    }

    /// Commands run so far, in completion order.
    pub fn calls(&self) -> Vec<ExecCommand> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn script_names(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| c.script_name().to_owned())
            .collect()
    }
}

impl CommandRunner for MockRunner {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn run(&self, command: &ExecCommand) -> Result<CommandOutput, RuntimeError> {
        let rendered = command.to_string();
        self.calls
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?
            .push(command.clone());

        let failing = self
            .fail_patterns
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?
            .iter()
            .any(|p| rendered.contains(p.as_str()));
        if failing {
            return Err(RuntimeError::ChildProcess {
                command: rendered,
                code: Some(1),
                stderr: "mock failure".to_owned(),
            });
        }
        Ok(CommandOutput {
            stdout: format!("mock-exec: {rendered}\n"),
            stderr: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls_in_order() {
        let runner = MockRunner::new();
        runner.run(&ExecCommand::new("/sb/a/start")).unwrap();
        runner.run(&ExecCommand::new("/sb/b/start")).unwrap();
        assert_eq!(runner.script_names(), vec!["start", "start"]);
        assert_eq!(runner.calls()[1].program, std::path::Path::new("/sb/b/start"));
    }

    #[test]
    fn fails_matching_commands() {
        let runner = MockRunner::new();
        runner.fail_on("node2").unwrap();
        assert!(runner.run(&ExecCommand::new("/sb/node1/start")).is_ok());
        assert!(matches!(
            runner.run(&ExecCommand::new("/sb/node2/start")),
            Err(RuntimeError::ChildProcess { code: Some(1), .. })
        ));
        assert_eq!(runner.calls().len(), 2);
    }
}
