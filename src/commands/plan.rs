use crate::commands::load_stack;
use crate::{Context, config, ui};
use anyhow::Result;
use provision::{StateStore, plan};

pub fn run(ctx: &Context) -> Result<()> {
    let (stack, graph) = load_stack(ctx)?;
    let store = StateStore::new(&ctx.state_path);
    let state = store.load()?;
    let registry = config::registry(&ctx.state_path);

    let planned = plan::compute(&stack, &graph, &state, &registry)?;

    ui::header(&format!("Plan: {}", stack.name));
    if planned.has_changes() {
        ui::render_plan(&planned, ctx.verbose > 0);
    } else {
        ui::success("No changes, infrastructure matches the declaration");
    }

    Ok(())
}
