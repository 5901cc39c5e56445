use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::debug;

/// A program invocation, usually one of a sandbox's generated scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl ExecCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Script name without its directory, e.g. `start`.
    pub fn script_name(&self) -> &str {
        self.program
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    pub fn is_in(&self, dir: &Path) -> bool {
        self.program.parent() == Some(dir)
    }
}

impl fmt::Display for ExecCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Blocking process execution.
///
/// A non-zero exit is reported as [`RuntimeError::ChildProcess`].
pub trait CommandRunner: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, command: &ExecCommand) -> Result<CommandOutput, RuntimeError>;
}

/// Runs commands with `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn run(&self, command: &ExecCommand) -> Result<CommandOutput, RuntimeError> {
        debug!("exec: {command}");
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }
        let output = cmd.output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(RuntimeError::ChildProcess {
                command: command.to_string(),
                code: output.status.code(),
                stderr: stderr.trim().to_owned(),
            });
        }
        Ok(CommandOutput { stdout, stderr })
    }
}

pub fn select_runner(name: &str) -> Result<Arc<dyn CommandRunner>, RuntimeError> {
    match name {
        "shell" => Ok(Arc::new(ShellRunner)),
        "mock" => Ok(Arc::new(crate::mock::MockRunner::new())),
        other => Err(RuntimeError::RunnerUnavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_valid_runners() {
        assert_eq!(select_runner("shell").unwrap().name(), "shell");
        assert_eq!(select_runner("mock").unwrap().name(), "mock");
        assert!(matches!(
            select_runner("ssh"),
            Err(RuntimeError::RunnerUnavailable(_))
        ));
    }

    #[test]
    fn display_joins_program_and_args() {
        let cmd = ExecCommand::new("/sb/msb_8_0_30/start").args(["--wsrep-new-cluster"]);
        assert_eq!(cmd.to_string(), "/sb/msb_8_0_30/start --wsrep-new-cluster");
        assert_eq!(cmd.script_name(), "start");
        assert!(cmd.is_in(Path::new("/sb/msb_8_0_30")));
    }

    #[cfg(unix)]
    #[test]
    fn shell_runner_reports_non_zero_exit() {
        let cmd = ExecCommand::new("sh").args(["-c", "echo nope >&2; exit 4"]);
        let err = ShellRunner.run(&cmd).unwrap_err();
        match err {
            RuntimeError::ChildProcess { code, stderr, .. } => {
                assert_eq!(code, Some(4));
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn shell_runner_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ExecCommand::new("sh")
            .args(["-c", "pwd"])
            .current_dir(dir.path());
        let out = ShellRunner.run(&cmd).unwrap();
        assert!(out.stdout.trim().ends_with(
            dir.path()
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap()
        ));
    }
}
