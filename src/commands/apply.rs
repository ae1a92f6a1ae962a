use crate::commands::load_stack;
use crate::progress::BarProgress;
use crate::{Context, cli::ApplyArgs, config, ui};
use anyhow::{Result, bail};
use dialoguer::Confirm;
use provision::{ExecuteOptions, RetryConfig, StateStore, execute, plan, refresh, resolve_exports};
use std::sync::atomic::AtomicBool;

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let (stack, graph) = load_stack(ctx)?;
    let store = StateStore::new(&ctx.state_path);
    let _lock = store.lock()?;
    let mut state = store.load()?;
    let registry = config::registry(&ctx.state_path);

    if args.refresh {
        let gone = refresh(&mut state, &registry)?;
        for name in &gone {
            ui::warn(&format!("{name} no longer exists remotely, will recreate"));
        }
        store.save(&mut state)?;
    }

    let planned = plan::compute(&stack, &graph, &state, &registry)?;

    ui::header(&format!("Apply: {}", stack.name));
    if !planned.has_changes() {
        // Exports can change without any resource changing.
        let resolved = resolve_exports(&stack, &state);
        if state.outputs != resolved {
            state.outputs = resolved;
            store.save(&mut state)?;
        }
        ui::success("No changes, infrastructure matches the declaration");
        return Ok(());
    }
    ui::render_plan(&planned, ctx.verbose > 0);
    println!();

    if args.dry_run {
        ui::warn("Dry run - no changes were made");
        return Ok(());
    }

    if !args.yes {
        let confirmed = Confirm::new()
            .with_prompt("Apply these changes?")
            .default(false)
            .interact()?;
        if !confirmed {
            ui::warn("Aborted");
            return Ok(());
        }
    }

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
        ui::success("Apply complete!");
        Ok(())
    } else {
        ui::error("Apply finished with failures");
        bail!("some resources could not be applied")
    }
}
