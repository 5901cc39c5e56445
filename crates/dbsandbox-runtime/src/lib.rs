//! Execution layer for dbsandbox.
//!
//! Nothing in the deployer spawns a process directly: every script run goes
//! through a [`CommandRunner`] (the real [`ShellRunner`] or the recording
//! [`MockRunner`]), either inline or batched into an [`ExecutionList`] and
//! handed to the [`WaveScheduler`]. This crate also owns the built-in script
//! templates and the basedir prerequisite checks.

pub mod mock;
pub mod prereq;
pub mod runner;
pub mod scheduler;
pub mod template;

pub use mock::MockRunner;
pub use prereq::{check_basedir_prereqs, format_missing, MissingPrereq};
pub use runner::{select_runner, CommandOutput, CommandRunner, ExecCommand, ShellRunner};
pub use scheduler::{ExecutionEntry, ExecutionList, Stage, WaveFailure, WaveReport, WaveScheduler};
pub use template::{write_script, TemplateCollection, TemplateData};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command '{command}' exited with {}: {stderr}", exit_label(.code))]
    ChildProcess {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("{} command(s) failed in wave {priority}: {}", .failures.len(), join_failures(.failures))]
    WaveFailed {
        priority: u32,
        failures: Vec<WaveFailure>,
    },
    #[error("unknown template: {0}")]
    UnknownTemplate(String),
    #[error("template error: {0}")]
    Template(String),
    #[error("command runner '{0}' is not available")]
    RunnerUnavailable(String),
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_owned(), |c| format!("status {c}"))
}

fn join_failures(failures: &[WaveFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<tera::Error> for RuntimeError {
    fn from(e: tera::Error) -> Self {
        use std::error::Error as _;
        let mut msg = e.to_string();
        let mut source = e.source();
        while let Some(s) = source {
            msg.push_str(": ");
            msg.push_str(&s.to_string());
            source = s.source();
        }
        RuntimeError::Template(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_process_display_includes_status() {
        let e = RuntimeError::ChildProcess {
            command: "/sb/start".to_owned(),
            code: Some(3),
            stderr: "boom".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("/sb/start"));
        assert!(msg.contains("status 3"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn wave_failed_display_lists_failures() {
        let e = RuntimeError::WaveFailed {
            priority: 1,
            failures: vec![
                WaveFailure {
                    label: "node1 start".to_owned(),
                    error: "exit 1".to_owned(),
                },
                WaveFailure {
                    label: "node2 start".to_owned(),
                    error: "exit 2".to_owned(),
                },
            ],
        };
        let msg = e.to_string();
        assert!(msg.starts_with("2 command(s) failed in wave 1"));
        assert!(msg.contains("node2 start"));
    }
}
