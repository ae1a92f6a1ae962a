use crate::Context;
use crate::commands::load_stack;
use crate::ui;
use anyhow::Result;

pub fn run(ctx: &Context) -> Result<()> {
    let (stack, graph) = load_stack(ctx)?;
    provision::plan::validate(&stack)?;

    ui::success(&format!(
        "{}: {} resources, {} outputs, dependency graph is valid",
        stack.name,
        stack.resources.len(),
        stack.exports.len()
    ));

    if ctx.verbose > 0 {
        let order = graph.topo_order();
        ui::section("Apply order");
        for node in order {
            let deps = graph.dependency_names(node);
            if deps.is_empty() {
                ui::dim(graph.name(node));
            } else {
                ui::dim(&format!("{} (after {})", graph.name(node), deps.join(", ")));
            }
        }
    }

    Ok(())
}
