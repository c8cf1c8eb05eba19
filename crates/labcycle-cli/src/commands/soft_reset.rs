use super::{describe, print_report, Context, EXIT_SUCCESS};
use crate::operator::{PreApproved, TerminalOperator};
use labcycle_core::{BackupMode, Operator, ResetOptions};

pub fn run(
    ctx: &Context,
    backup: BackupMode,
    yes: bool,
    owner: Option<&str>,
) -> Result<u8, String> {
    let options = ResetOptions {
        backup,
        owner: owner.unwrap_or(&ctx.settings.owner).to_owned(),
    };
    let mut operator: Box<dyn Operator> = if yes {
        Box::new(PreApproved(TerminalOperator::new()))
    } else {
        Box::new(TerminalOperator::new())
    };

    let mut lifecycle = ctx.lifecycle();
    let report = lifecycle
        .soft_reset(&options, operator.as_mut())
        .map_err(|e| describe(&e))?;
    print_report(&report, ctx.json)?;
    if !ctx.json {
        println!("workspace reset to install-time defaults; all secrets rotated");
    }
    Ok(EXIT_SUCCESS)
}
