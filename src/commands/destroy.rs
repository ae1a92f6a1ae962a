use crate::progress::BarProgress;
use crate::{Context, cli::DestroyArgs, config, ui};
use anyhow::{Result, bail};
use dialoguer::Confirm;
use provision::{DependencyGraph, ExecuteOptions, RetryConfig, Stack, StateStore, execute, plan};
use std::sync::atomic::AtomicBool;

pub fn run(ctx: &Context, args: &DestroyArgs) -> Result<()> {
    let store = StateStore::new(&ctx.state_path);
    let _lock = store.lock()?;
    let mut state = store.load()?;
    let registry = config::registry(&ctx.state_path);

    if state.resources.is_empty() {
        ui::success("Nothing to destroy, state is empty");
        return Ok(());
    }

    // Protected records refuse deletion before anything runs.
    let planned = plan::compute_destroy(&state)?;

    ui::header("Destroy");
    ui::render_plan(&planned, ctx.verbose > 0);
    println!();

    if !args.yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Destroy all {} resources? This cannot be undone",
                planned.ops.len()
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            ui::warn("Aborted");
            return Ok(());
        }
    }

    // Deletes resolve nothing from the declaration, so an empty stack
    // stands in for it.
    let stack = Stack::new("destroy");
    let graph = DependencyGraph::build(&stack.resources)?;
    let opts = ExecuteOptions {
        jobs: args.jobs,
        dry_run: false,
        retry: RetryConfig::default(),
    };
    let mut progress = BarProgress::new(planned.ops.len() as u64);
    let summary = execute(
        &stack,
        &graph,
        &planned,
        &registry,
        &store,
        &mut state,
        &opts,
        &mut progress,
        &AtomicBool::new(false),
    )?;
    progress.finish();

    if !ctx.quiet {
        ui::render_summary(&summary);
        println!();
    }

    if summary.is_success() {
        ui::success("Destroy complete!");
        Ok(())
    } else {
        ui::error("Destroy finished with failures");
        bail!("some resources could not be destroyed")
    }
}
