use super::{colorize_state, describe, json_pretty, Context, EXIT_SUCCESS};
use console::Style;

pub fn run(ctx: &Context) -> Result<u8, String> {
    let report = ctx.lifecycle().status().map_err(|e| describe(&e))?;
    let findings = report.findings();

    if ctx.json {
        let mut value = serde_json::to_value(&report)
            .map_err(|e| format!("JSON serialization failed: {e}"))?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("findings".to_owned(), serde_json::json!(findings));
        }
        println!("{}", json_pretty(&value)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("state:       {}", colorize_state(report.state));
    println!(
        "platform:    {} ({})",
        report.profile.display_name(),
        report.profile.kind()
    );
    println!("root:        {}", report.root.display());
    println!("backups:     {} in {}", report.backups, report.backup_root.display());
    if let Some(at) = &report.installed_at {
        println!("installed:   {at}");
    }
    if let Some(student) = &report.student {
        println!("student:     {student}");
    }
    if let Some(sensor) = &report.sensor {
        let simulation = report.simulation.as_deref().unwrap_or("unset");
        println!("sensor:      {sensor} (simulation {simulation})");
    }
    if !findings.is_empty() {
        println!();
        let yellow = Style::new().yellow();
        for finding in &findings {
            println!("  {} {finding}", yellow.apply_to("⚠"));
        }
    }
    Ok(EXIT_SUCCESS)
}
