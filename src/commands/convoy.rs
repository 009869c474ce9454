//! `gt convoy` — tracking units for related work.

use clap::{Args, Subcommand};

use super::Invocation;
use crate::beads::{CreateOpts, IssueStore, IssueType, ListFilter, Status};

#[derive(Debug, Args)]
pub struct ConvoyArgs {
    #[command(subcommand)]
    pub command: ConvoyCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConvoyCommand {
    /// Create a tracking convoy
    Create {
        title: String,
        /// Work units to track from the start
        beads: Vec<String>,
    },
    /// Track another work unit
    Add { convoy: String, bead: String },
    /// Show a convoy and the state of everything it tracks
    Status { convoy: String },
    /// List open convoys
    List,
}

impl ConvoyArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let invocation = Invocation::resolve()?;
        let store = invocation.store();

        match &self.command {
            ConvoyCommand::Create { title, beads } => {
                let convoy = store.create(&CreateOpts {
                    title: format!("Convoy: {title}"),
                    issue_type: Some(IssueType::Convoy),
                    ..Default::default()
                })?;
                for bead in beads {
                    store.add_tracks(&convoy.id, bead)?;
                }
                println!("{} created ({} tracked)", convoy.id, beads.len());
            }
            ConvoyCommand::Add { convoy, bead } => {
                store.add_tracks(convoy, bead)?;
                println!("{convoy} now tracks {bead}");
            }
            ConvoyCommand::Status { convoy } => {
                let unit = store.show(convoy)?;
                println!("{}: {} ({})", unit.id, unit.title, unit.status);
                let mut closed = 0usize;
                for tracked_id in &unit.tracks {
                    match store.show(tracked_id) {
                        Ok(tracked) => {
                            if tracked.status == Status::Closed {
                                closed += 1;
                            }
                            println!(
                                "  {} [{}] {} — {}",
                                tracked.id, tracked.status, tracked.title, tracked.assignee
                            );
                        }
                        Err(e) => println!("  {tracked_id}: {e}"),
                    }
                }
                println!("progress: {closed}/{}", unit.tracks.len());
            }
            ConvoyCommand::List => {
                let convoys = store.list(&ListFilter {
                    issue_type: Some(IssueType::Convoy),
                    status: Some(Status::Open),
                    ..Default::default()
                })?;
                if convoys.is_empty() {
                    println!("no open convoys");
                }
                for convoy in convoys {
                    println!(
                        "{} — {} ({} tracked)",
                        convoy.id,
                        convoy.title,
                        convoy.tracks.len()
                    );
                }
            }
        }
        Ok(())
    }
}
