use super::{describe, finish_spinner, maybe_spinner, print_report, Context, EXIT_SUCCESS};

pub fn run(ctx: &Context) -> Result<u8, String> {
    let mut lifecycle = ctx.lifecycle();
    let pb = maybe_spinner(ctx.json, "removing caches and temporary files...");
    let result = lifecycle.clean();
    finish_spinner(pb, &result, "clean");
    let report = result.map_err(|e| describe(&e))?;
    print_report(&report, ctx.json)?;
    Ok(EXIT_SUCCESS)
}
