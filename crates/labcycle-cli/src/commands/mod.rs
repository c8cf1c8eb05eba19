pub mod backups;
pub mod clean;
pub mod completions;
pub mod config;
pub mod doctor;
pub mod hard_reset;
pub mod install;
pub mod man_pages;
pub mod personalize;
pub mod soft_reset;
pub mod status;

use crate::settings::Settings;
use clap::ValueEnum;
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use labcycle_core::{CoreError, Lifecycle, LifecycleState, OperationReport};
use labcycle_host::{Detector, FixedDetector, HostDetector, SystemHost};
use labcycle_schema::PlatformProfile;
use labcycle_store::WorkspaceLayout;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_VALIDATION_ERROR: u8 = 2;
pub const EXIT_ABORTED: u8 = 3;
pub const EXIT_WORKSPACE_ERROR: u8 = 4;

/// `--platform` override for host detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum PlatformChoice {
    #[default]
    Auto,
    Embedded,
    Simulated,
}

/// Everything a command needs from the global flags.
pub struct Context {
    pub settings: Settings,
    pub platform: PlatformChoice,
    pub json: bool,
}

impl Context {
    pub fn layout(&self) -> WorkspaceLayout {
        WorkspaceLayout::new(&self.settings.root, &self.settings.backup_root)
    }

    pub fn detector(&self) -> Box<dyn Detector> {
        match self.platform {
            PlatformChoice::Auto => Box::new(HostDetector::new(SystemHost::new())),
            PlatformChoice::Embedded => Box::new(FixedDetector(PlatformProfile::embedded(
                "embedded (--platform override)",
            ))),
            PlatformChoice::Simulated => Box::new(FixedDetector(
                PlatformProfile::simulation_only("simulated (--platform override)"),
            )),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::new(self.layout(), self.detector()).with_policy(self.settings.policy)
    }
}

/// Render a core error with the prefix `main` uses to pick an exit code.
pub fn describe(err: &CoreError) -> String {
    if err.is_validation() {
        return format!("validation error: {err}");
    }
    match err {
        CoreError::ConfirmationDeclined(op) => format!("aborted: {op} not confirmed"),
        CoreError::NotInstalled
        | CoreError::UnfinishedReset(_)
        | CoreError::RootNotWritable { .. } => format!("workspace error: {err}"),
        _ => err.to_string(),
    }
}

pub fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("validation error:") {
        EXIT_VALIDATION_ERROR
    } else if msg.starts_with("aborted:") {
        EXIT_ABORTED
    } else if msg.starts_with("workspace error:") {
        EXIT_WORKSPACE_ERROR
    } else {
        EXIT_FAILURE
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .map(|s| s.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]))
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Spinner for non-JSON runs; `None` keeps stdout clean for `--json`.
pub fn maybe_spinner(json: bool, msg: &str) -> Option<ProgressBar> {
    (!json).then(|| spinner(msg))
}

pub fn finish_spinner<T>(pb: Option<ProgressBar>, result: &Result<T, CoreError>, msg: &str) {
    if let Some(pb) = pb {
        match result {
            Ok(_) => spin_ok(&pb, msg),
            Err(_) => spin_fail(&pb, msg),
        }
    }
}

pub fn colorize_state(state: LifecycleState) -> String {
    let text = state.to_string();
    match state {
        LifecycleState::Installed => Style::new().green().apply_to(text).to_string(),
        LifecycleState::Personalized => Style::new().cyan().apply_to(text).to_string(),
        LifecycleState::Active => Style::new().cyan().bold().apply_to(text).to_string(),
        LifecycleState::ResetPending | LifecycleState::Reset => {
            Style::new().yellow().apply_to(text).to_string()
        }
        LifecycleState::Uninstalled => Style::new().dim().apply_to(text).to_string(),
    }
}

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Print an operation report as JSON or as a short human summary followed
/// by every warning collected.
pub fn print_report(report: &OperationReport, json: bool) -> Result<(), String> {
    if json {
        println!("{}", json_pretty(report)?);
        return Ok(());
    }
    println!(
        "{}: {} -> {} on {}",
        report.operation,
        colorize_state(report.from),
        colorize_state(report.to),
        report.profile.display_name()
    );
    if let Some(backup) = &report.backup {
        println!(
            "backup: {} ({}, blake3 {})",
            backup.path.display(),
            human_bytes(backup.size_bytes),
            &backup.blake3[..backup.blake3.len().min(16)]
        );
    }
    if let Some(purge) = &report.purge {
        println!(
            "removed {} files and {} directories ({})",
            purge.files_removed,
            purge.dirs_removed,
            human_bytes(purge.bytes_removed)
        );
    }
    let dim = Style::new().dim();
    for note in &report.notes {
        println!("{}", dim.apply_to(note));
    }
    let yellow = Style::new().yellow();
    for warning in &report.warnings {
        eprintln!("{} {warning}", yellow.apply_to("warning:"));
    }
    Ok(())
}
