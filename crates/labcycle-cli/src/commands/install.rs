use super::{describe, finish_spinner, maybe_spinner, print_report, Context, EXIT_SUCCESS};

pub fn run(ctx: &Context) -> Result<u8, String> {
    let mut lifecycle = ctx.lifecycle();
    let pb = maybe_spinner(ctx.json, "installing workspace...");
    let result = lifecycle.install();
    finish_spinner(pb, &result, "install");
    let report = result.map_err(|e| describe(&e))?;
    print_report(&report, ctx.json)?;
    if !ctx.json {
        println!("workspace ready at {}", lifecycle.layout().root().display());
    }
    Ok(EXIT_SUCCESS)
}
