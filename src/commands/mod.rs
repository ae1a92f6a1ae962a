pub mod apply;
pub mod destroy;
pub mod outputs;
pub mod plan;
pub mod state;
pub mod validate;

use crate::Context;
use anyhow::{Context as AnyhowContext, Result};
use provision::{DependencyGraph, Stack};

/// Load the stack file and build its dependency graph.
pub fn load_stack(ctx: &Context) -> Result<(Stack, DependencyGraph)> {
    let stack = stackfile::load(&ctx.stack_file)
        .with_context(|| format!("loading stack from {}", ctx.stack_file.display()))?;
    let graph = DependencyGraph::build(&stack.resources)?;
    Ok((stack, graph))
}
