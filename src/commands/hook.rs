//! `gt hook` — attach, inspect, and introspect hooks.

use clap::{Args, Subcommand};

use super::Invocation;
use crate::beads::{AgentBead, IssueStore, slots};
use crate::hook::Hooks;

#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
pub struct HookArgs {
    /// Work unit to hook to this agent (omit for `hook status`)
    pub bead: Option<String>,
    /// Take over an existing hook
    #[arg(long)]
    pub force: bool,
    #[command(subcommand)]
    pub command: Option<HookCommand>,
}

#[derive(Debug, Subcommand)]
pub enum HookCommand {
    /// Show this agent's hook
    Status,
    /// Show another agent's hook
    Show { agent: String },
}

impl HookArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let invocation = Invocation::resolve()?;
        invocation.warn_on_mismatch();
        let store = invocation.store();

        match &self.command {
            Some(HookCommand::Show { agent }) => {
                let address: crate::address::Address = agent.parse()?;
                let prefix = address
                    .rig()
                    .map_or_else(|| "gt".to_string(), |rig| invocation.town.rig_prefix(rig));
                show_hook(&store, &address.bead_id(&prefix), agent);
            }
            Some(HookCommand::Status) | None => match &self.bead {
                Some(bead) => {
                    let store = invocation.store_for(bead);
                    let hooks = Hooks::new(&store);
                    let outcome = hooks.hook(
                        &invocation.identity.address,
                        &invocation.identity.bead_id,
                        bead,
                        self.force,
                    )?;
                    println!("hooked {bead} ({outcome:?})");
                }
                None => {
                    let hooks = Hooks::new(&store);
                    match hooks
                        .discover(&invocation.identity.address, &invocation.identity.bead_id)?
                    {
                        Some(unit) => {
                            println!("hooked: {} — {} ({})", unit.id, unit.title, unit.status);
                            if let Some(molecule) = unit.field(slots::ATTACHED_MOLECULE)
                                && let Some(step) = store.current_step(&molecule)?
                            {
                                println!(
                                    "next step: {} — {} ({}/{})",
                                    step.step_id, step.title, step.done, step.total
                                );
                            }
                        }
                        None => println!("no hook"),
                    }
                }
            },
        }
        Ok(())
    }
}

fn show_hook(store: &dyn IssueStore, bead_id: &str, agent: &str) {
    match store.show(bead_id) {
        Ok(unit) => {
            let bead = AgentBead::from_unit(&unit);
            match bead.hook_bead {
                Some(hook) => println!("{agent}: hooked to {hook}"),
                None => println!("{agent}: no hook"),
            }
            if let Some(state) = bead.agent_state {
                println!("state: {}", state.as_str());
            }
        }
        Err(e) => println!("{agent}: {e}"),
    }
}
