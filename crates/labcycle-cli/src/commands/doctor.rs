use super::{describe, json_pretty, Context, EXIT_FAILURE, EXIT_SUCCESS};
use labcycle_core::{LifecycleState, StatusReport};
use labcycle_host::{check_prereqs, format_missing};
use labcycle_schema::PlatformProfile;

pub fn run(ctx: &Context) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();

    let status = ctx.lifecycle().status().map_err(|e| describe(&e))?;
    check_platform(&status.profile, &mut checks);
    check_prereq_tools(&status.profile, &mut checks);
    check_workspace(&status, &mut checks);
    if !matches!(status.state, LifecycleState::Uninstalled) {
        check_secrets(&status, &mut checks);
        check_permissions(&status, &mut checks);
        check_sensor_mode(&status, &mut checks);
    }
    check_backup_root(&status, &mut checks);

    let all_pass = checks.iter().all(|c| c.status != "fail");
    print_results(&checks, all_pass, ctx.json)
}

fn check_platform(profile: &PlatformProfile, checks: &mut Vec<Check>) {
    let mode = if profile.supports_hardware_interfaces() {
        "hardware sensors available"
    } else {
        "simulation only"
    };
    checks.push(Check::info(
        "platform",
        &format!("Platform: {} ({mode})", profile.display_name()),
    ));
}

fn check_prereq_tools(profile: &PlatformProfile, checks: &mut Vec<Check>) {
    let missing = check_prereqs(profile);
    if missing.is_empty() {
        checks.push(Check::pass("prereqs", "Host prerequisites satisfied"));
    } else {
        checks.push(Check::warn(
            "prereqs",
            &format!("Missing prerequisites: {}", format_missing(&missing)),
        ));
    }
}

fn check_workspace(status: &StatusReport, checks: &mut Vec<Check>) {
    let root = status.root.display();
    match status.state {
        LifecycleState::Uninstalled => checks.push(Check::info(
            "workspace",
            &format!("Workspace {root} not installed (run `labcycle install`)"),
        )),
        LifecycleState::ResetPending | LifecycleState::Reset => checks.push(Check::fail(
            "workspace",
            &format!(
                "Workspace {root} has an unfinished soft reset ({}); run `labcycle install` to finish it",
                status.state
            ),
        )),
        state => checks.push(Check::pass(
            "workspace",
            &format!("Workspace {root} is {state}"),
        )),
    }
}

fn check_secrets(status: &StatusReport, checks: &mut Vec<Check>) {
    if status.missing_secrets.is_empty() {
        checks.push(Check::pass("secrets", "All secrets present"));
    } else {
        checks.push(Check::fail(
            "secrets",
            &format!(
                "Missing secrets: {} (run `labcycle install` to repair)",
                status.missing_secrets.join(", ")
            ),
        ));
    }
}

fn check_permissions(status: &StatusReport, checks: &mut Vec<Check>) {
    if status.permission_issues.is_empty() {
        checks.push(Check::pass("permissions", "Credential permissions are owner-only"));
        return;
    }
    for issue in &status.permission_issues {
        checks.push(Check::fail("permissions", &issue.to_string()));
    }
}

fn check_sensor_mode(status: &StatusReport, checks: &mut Vec<Check>) {
    let simulating = status.simulation.as_deref() == Some("true");
    if !status.profile.supports_hardware_interfaces() && !simulating {
        checks.push(Check::fail(
            "sensor_mode",
            "Simulation is disabled on a simulation-only host (run `labcycle install` to repair)",
        ));
        return;
    }
    let sensor = status.sensor.as_deref().unwrap_or("unset");
    checks.push(Check::pass(
        "sensor_mode",
        &format!("Sensor {sensor}, simulation {}", if simulating { "on" } else { "off" }),
    ));
}

fn check_backup_root(status: &StatusReport, checks: &mut Vec<Check>) {
    let path = status.backup_root.display();
    if status.backup_root.is_dir() {
        checks.push(Check::pass(
            "backup_root",
            &format!("Backup root {path} ({} archives)", status.backups),
        ));
    } else if status.backup_root.exists() {
        checks.push(Check::fail(
            "backup_root",
            &format!("Backup root {path} is not a directory"),
        ));
    } else {
        checks.push(Check::info(
            "backup_root",
            &format!("Backup root {path} will be created on install"),
        ));
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&json)?);
    } else {
        println!("labcycle doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
