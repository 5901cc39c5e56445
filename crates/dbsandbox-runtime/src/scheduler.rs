//! Deferred command lists and the wave/barrier scheduler.
//!
//! Entries that share a priority form a wave and run concurrently; a wave
//! starts only after every entry of the previous wave has finished. When an
//! entry fails, the rest of its wave still runs to completion, all failures
//! of the wave are reported together, and no later wave is started.

use crate::runner::{CommandRunner, ExecCommand};
use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{mpsc, Arc};
use tracing::{debug, info, warn};

/// Installation stage of a deferred command; its ordinal is the default
/// priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Init,
    Start,
    Grants,
}

impl Stage {
    pub fn priority(self) -> u32 {
        match self {
            Stage::Init => 0,
            Stage::Start => 1,
            Stage::Grants => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEntry {
    pub command: ExecCommand,
    pub priority: u32,
    pub stage: Stage,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionList {
    entries: Vec<ExecutionEntry>,
}

impl ExecutionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: ExecCommand, stage: Stage, label: impl Into<String>) {
        self.entries.push(ExecutionEntry {
            command,
            priority: stage.priority(),
            stage,
            label: label.into(),
        });
    }

    pub fn append(&mut self, mut other: ExecutionList) {
        self.entries.append(&mut other.entries);
    }

    /// Reassign priorities, e.g. to serialise cluster joins behind a
    /// bootstrap node.
    pub fn reprioritize(&mut self, mut f: impl FnMut(&ExecutionEntry) -> u32) {
        for entry in &mut self.entries {
            entry.priority = f(entry);
        }
    }

    pub fn entries(&self) -> &[ExecutionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries grouped by priority, ascending; list order is kept inside a
    /// wave.
    pub fn waves(&self) -> BTreeMap<u32, Vec<&ExecutionEntry>> {
        let mut waves: BTreeMap<u32, Vec<&ExecutionEntry>> = BTreeMap::new();
        for entry in &self.entries {
            waves.entry(entry.priority).or_default().push(entry);
        }
        waves
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveFailure {
    pub label: String,
    pub error: String,
}

impl fmt::Display for WaveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.error)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaveReport {
    pub waves: usize,
    pub commands: usize,
}

pub struct WaveScheduler {
    runner: Arc<dyn CommandRunner>,
}

impl WaveScheduler {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Run `list` wave by wave on scoped threads.
    pub fn run(&self, list: &ExecutionList) -> Result<WaveReport, RuntimeError> {
        let mut report = WaveReport::default();
        for (priority, wave) in list.waves() {
            info!("wave {priority}: {} command(s)", wave.len());
            let (tx, rx) = mpsc::channel::<(String, Result<(), String>)>();

            std::thread::scope(|scope| {
                for entry in &wave {
                    let tx = tx.clone();
                    let runner = &self.runner;
                    scope.spawn(move || {
                        debug!("wave {priority}: start {}", entry.label);
                        let result = runner
                            .run(&entry.command)
                            .map(|_| ())
                            .map_err(|e| e.to_string());
                        let _ = tx.send((entry.label.clone(), result));
                    });
                }
            });
            drop(tx);

            let failures: Vec<WaveFailure> = rx
                .iter()
                .filter_map(|(label, result)| result.err().map(|error| WaveFailure { label, error }))
                .collect();

            report.waves += 1;
            report.commands += wave.len();
            if !failures.is_empty() {
                warn!("wave {priority}: {} command(s) failed", failures.len());
                return Err(RuntimeError::WaveFailed { priority, failures });
            }
        }
        Ok(report)
    }

    /// Run `list` in list order on the calling thread, stopping at the first
    /// failure.
    pub fn run_sequential(&self, list: &ExecutionList) -> Result<WaveReport, RuntimeError> {
        let mut report = WaveReport::default();
        for entry in list.entries() {
            debug!("run: {}", entry.label);
            self.runner.run(&entry.command)?;
            report.commands += 1;
        }
        report.waves = usize::from(!list.is_empty());
        Ok(report)
    }
}
