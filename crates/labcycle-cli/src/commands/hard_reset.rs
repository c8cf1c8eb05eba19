use super::{describe, print_report, Context, EXIT_SUCCESS};
use crate::operator::TerminalOperator;
use labcycle_core::{BackupMode, ResetOptions};

pub fn run(ctx: &Context, backup: BackupMode, owner: Option<&str>) -> Result<u8, String> {
    let options = ResetOptions {
        backup,
        owner: owner.unwrap_or(&ctx.settings.owner).to_owned(),
    };
    let mut lifecycle = ctx.lifecycle();
    let report = lifecycle
        .hard_reset(&options, &mut TerminalOperator::new())
        .map_err(|e| describe(&e))?;
    print_report(&report, ctx.json)?;
    if !ctx.json {
        println!("workspace removed; run `labcycle install` to start over");
    }
    Ok(EXIT_SUCCESS)
}
