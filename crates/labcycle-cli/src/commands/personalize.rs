use super::{describe, finish_spinner, maybe_spinner, print_report, Context, EXIT_SUCCESS};
use dialoguer::{Input, Select};
use labcycle_schema::{ExperienceLevel, Personalization, SensorType};
use std::io::{stderr, stdin, IsTerminal};

fn parse_level(raw: &str) -> Result<ExperienceLevel, String> {
    raw.parse().map_err(|e| format!("validation error: {e}"))
}

fn parse_sensor(raw: &str) -> Result<SensorType, String> {
    raw.parse().map_err(|e| format!("validation error: {e}"))
}

fn prompt_name() -> Result<String, String> {
    Input::<String>::new()
        .with_prompt("Student name")
        .interact_text()
        .map_err(|e| format!("prompt failed: {e}"))
}

fn prompt_level() -> Result<ExperienceLevel, String> {
    let labels: Vec<_> = ExperienceLevel::ALL.iter().map(|l| l.as_str()).collect();
    let idx = Select::new()
        .with_prompt("Experience level")
        .items(&labels)
        .default(0)
        .interact()
        .map_err(|e| format!("prompt failed: {e}"))?;
    Ok(ExperienceLevel::ALL[idx])
}

fn prompt_sensor(ctx: &Context) -> Result<Option<SensorType>, String> {
    if !ctx.detector().detect().supports_hardware_interfaces() {
        return Ok(None);
    }
    let mut labels = vec!["keep current"];
    labels.extend(SensorType::ALL.iter().map(|s| s.as_str()));
    let idx = Select::new()
        .with_prompt("Sensor")
        .items(&labels)
        .default(0)
        .interact()
        .map_err(|e| format!("prompt failed: {e}"))?;
    Ok(idx.checked_sub(1).map(|i| SensorType::ALL[i]))
}

pub fn run(
    ctx: &Context,
    name: Option<&str>,
    level: Option<&str>,
    sensor: Option<&str>,
) -> Result<u8, String> {
    let is_tty = stdin().is_terminal() && stderr().is_terminal() && !ctx.json;
    let interactive = is_tty && name.is_none();

    let student_name = match name {
        Some(n) => n.to_owned(),
        None if is_tty => prompt_name()?,
        None => return Err("validation error: --name is required without a terminal".to_owned()),
    };
    let experience_level = match level {
        Some(raw) => parse_level(raw)?,
        None if interactive => prompt_level()?,
        None => ExperienceLevel::Beginner,
    };
    let sensor = match sensor {
        Some(raw) => Some(parse_sensor(raw)?),
        None if interactive => prompt_sensor(ctx)?,
        None => None,
    };

    let personalization = Personalization {
        student_name,
        experience_level,
        sensor,
    };
    let mut lifecycle = ctx.lifecycle();
    let pb = maybe_spinner(ctx.json, "personalizing workspace...");
    let result = lifecycle.personalize(&personalization);
    finish_spinner(pb, &result, "personalize");
    let report = result.map_err(|e| describe(&e))?;
    print_report(&report, ctx.json)?;
    Ok(EXIT_SUCCESS)
}
