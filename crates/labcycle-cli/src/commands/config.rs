use super::{describe, json_pretty, Context, EXIT_SUCCESS};
use labcycle_schema::{is_secret_key, mask_secret};
use std::collections::BTreeMap;

/// Print the workspace configuration. Secret values are masked unless
/// `reveal` is set.
pub fn run(ctx: &Context, reveal: bool) -> Result<u8, String> {
    let env = ctx
        .lifecycle()
        .application_env()
        .map_err(|e| describe(&e))?;
    let shown: BTreeMap<String, String> = env
        .into_iter()
        .map(|(key, value)| {
            let value = if !reveal && is_secret_key(&key) {
                mask_secret(&value)
            } else {
                value
            };
            (key, value)
        })
        .collect();

    if ctx.json {
        println!("{}", json_pretty(&shown)?);
    } else {
        for (key, value) in &shown {
            println!("{key}={value}");
        }
    }
    Ok(EXIT_SUCCESS)
}
