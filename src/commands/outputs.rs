use crate::cli::OutputsArgs;
use crate::{Context, ui};
use anyhow::Result;
use provision::StateStore;

pub fn run(ctx: &Context, args: &OutputsArgs) -> Result<()> {
    let store = StateStore::new(&ctx.state_path);
    let state = store.load()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&state.outputs)?);
        return Ok(());
    }

    if state.outputs.is_empty() {
        ui::info("No outputs recorded, run apply first");
        return Ok(());
    }

    ui::header("Outputs");
    for (key, value) in &state.outputs {
        ui::kv(key, &ui::render_value(Some(value), false));
    }

    Ok(())
}
