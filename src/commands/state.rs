use crate::cli::StateCommand;
use crate::{Context, ui};
use anyhow::{Result, bail};
use colored::Colorize;
use provision::StateStore;

pub fn run(ctx: &Context, cmd: StateCommand) -> Result<()> {
    let store = StateStore::new(&ctx.state_path);

    match cmd {
        StateCommand::List => {
            let state = store.load()?;
            if state.resources.is_empty() {
                ui::info("State is empty");
                return Ok(());
            }
            ui::header(&format!("State (serial {})", state.serial));
            for (name, record) in &state.resources {
                println!(
                    "  {} {} {}",
                    name,
                    format!("({})", record.resource_type).dimmed(),
                    record.id.dimmed()
                );
            }
            Ok(())
        }
        StateCommand::Show { name } => {
            let state = store.load()?;
            let Some(record) = state.get(&name) else {
                bail!("no resource named '{name}' in state");
            };
            println!("{}", serde_json::to_string_pretty(record)?);
            Ok(())
        }
        StateCommand::Rm { name } => {
            let _lock = store.lock()?;
            let mut state = store.load()?;
            if state.resources.remove(&name).is_none() {
                bail!("no resource named '{name}' in state");
            }
            store.save(&mut state)?;
            ui::success(&format!(
                "{name} removed from state (the remote object was not touched)"
            ));
            Ok(())
        }
    }
}
