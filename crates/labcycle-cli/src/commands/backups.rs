use super::{human_bytes, json_pretty, Context, EXIT_SUCCESS};
use labcycle_store::list_backups;

pub fn run(ctx: &Context) -> Result<u8, String> {
    let backup_root = &ctx.settings.backup_root;
    let entries = list_backups(backup_root).map_err(|e| format!("workspace error: {e}"))?;

    if ctx.json {
        let payload = serde_json::json!({
            "backup_root": backup_root,
            "backups": entries,
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    if entries.is_empty() {
        println!("no backups in {}", backup_root.display());
        return Ok(EXIT_SUCCESS);
    }
    println!("{:<10} {:<17} {:>10}  FILE", "OWNER", "TAKEN", "SIZE");
    for entry in &entries {
        let file = entry
            .path
            .file_name()
            .map_or_else(|| entry.path.display().to_string(), |n| n.to_string_lossy().into_owned());
        println!(
            "{:<10} {:<17} {:>10}  {file}",
            entry.owner.as_deref().unwrap_or("-"),
            entry.taken.as_deref().unwrap_or("-"),
            human_bytes(entry.size_bytes),
        );
    }
    Ok(EXIT_SUCCESS)
}
