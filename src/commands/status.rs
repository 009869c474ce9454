//! `gt status` — town overview.

use clap::Args;
use serde::Serialize;

use super::Invocation;
use crate::beads::{BdStore, IssueStore, IssueType, ListFilter, Status};
use crate::mux::Multiplexer;

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Emit JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct TownStatus {
    town: String,
    rigs: Vec<RigStatus>,
    sessions: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RigStatus {
    name: String,
    polecats: Vec<String>,
    hooked: Vec<HookedUnit>,
}

#[derive(Debug, Serialize)]
struct HookedUnit {
    id: String,
    title: String,
    assignee: String,
}

impl StatusArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let invocation = Invocation::resolve()?;
        let mux = invocation.mux();

        let sessions: Vec<String> = mux
            .list_sessions()
            .unwrap_or_default()
            .into_iter()
            .filter(|s| s.starts_with("gt-"))
            .collect();

        let mut rigs = Vec::new();
        for name in invocation.town.rigs()?.rigs.keys() {
            let polecats: Vec<String> =
                std::fs::read_dir(invocation.town.rig_dir(name).join("polecats"))
                    .map(|entries| {
                        entries
                            .filter_map(std::result::Result::ok)
                            .filter(|e| e.path().is_dir())
                            .filter_map(|e| e.file_name().to_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();

            let store = BdStore::at(
                invocation.town.rig_clone(name).join(".beads"),
                &invocation.identity.address.to_string(),
            );
            let hooked = store
                .list(&ListFilter {
                    status: Some(Status::Hooked),
                    ..Default::default()
                })
                .map(|units| {
                    units
                        .into_iter()
                        .filter(|u| u.issue_type != IssueType::Agent)
                        .map(|u| HookedUnit {
                            id: u.id,
                            title: u.title,
                            assignee: u.assignee,
                        })
                        .collect()
                })
                .unwrap_or_default();

            rigs.push(RigStatus {
                name: name.clone(),
                polecats,
                hooked,
            });
        }

        let status = TownStatus {
            town: invocation.town.config.name.clone(),
            rigs,
            sessions,
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }

        println!("town: {}", status.town);
        println!("sessions: {}", status.sessions.len());
        for session in &status.sessions {
            println!("  {session}");
        }
        for rig in &status.rigs {
            println!("rig {} — {} polecat(s)", rig.name, rig.polecats.len());
            for polecat in &rig.polecats {
                println!("  polecat: {polecat}");
            }
            for unit in &rig.hooked {
                println!("  hooked: {} → {} ({})", unit.id, unit.assignee, unit.title);
            }
        }
        Ok(())
    }
}
