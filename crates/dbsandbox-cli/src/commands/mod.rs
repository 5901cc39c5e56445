pub mod capabilities;
pub mod delete;
pub mod deploy;
pub mod list;

pub use deploy::{DeployOptions, TopologyOptions};

use dbsandbox_core::{CoreError, Deployer, ErrorKind};
use dbsandbox_runtime::select_runner;
use dbsandbox_schema::{Defaults, SandboxType};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_VALIDATION_ERROR: u8 = 2;
pub const EXIT_CONFLICT: u8 = 3;
pub const EXIT_PREREQUISITE: u8 = 4;
pub const EXIT_CHILD_PROCESS: u8 = 5;

/// Render a core error with its kind as prefix so `main` can pick the exit status.
pub fn describe(err: &CoreError) -> String {
    format!("{}: {err}", err.kind())
}

pub fn exit_code_for(msg: &str) -> u8 {
    let kind = msg.split_once(':').map_or("", |(kind, _)| kind);
    match kind {
        k if k == ErrorKind::Validation.as_str() => EXIT_VALIDATION_ERROR,
        k if k == ErrorKind::ResourceConflict.as_str()
            || k == ErrorKind::PortExhaustion.as_str() =>
        {
            EXIT_CONFLICT
        }
        k if k == ErrorKind::Prerequisite.as_str() => EXIT_PREREQUISITE,
        k if k == ErrorKind::ChildProcess.as_str() => EXIT_CHILD_PROCESS,
        _ => EXIT_FAILURE,
    }
}

pub fn open_deployer(defaults: Defaults, runner: &str) -> Result<Deployer, String> {
    let runner = select_runner(runner).map_err(|e| format!("prerequisite: {e}"))?;
    Deployer::new(defaults, runner).map_err(|e| describe(&e))
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        style("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_type(sb_type: SandboxType) -> String {
    use console::Style;
    let name = sb_type.as_str();
    match sb_type {
        SandboxType::Single => Style::new().green().apply_to(name).to_string(),
        SandboxType::MasterSlave => Style::new().cyan().apply_to(name).to_string(),
        SandboxType::GroupReplication => Style::new().cyan().bold().apply_to(name).to_string(),
        SandboxType::Pxc | SandboxType::Ndb => Style::new().blue().apply_to(name).to_string(),
        SandboxType::Multiple => Style::new().dim().apply_to(name).to_string(),
        _ => Style::new().yellow().apply_to(name).to_string(),
    }
}
