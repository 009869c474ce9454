//! `gt done` — signal that this agent finished (or gave up on) its hook.
//!
//! Done never tears anything down itself; it records the outcome and an
//! honest cleanup report, then lets the witness verify and clean up.

use clap::{Args, ValueEnum};

use super::Invocation;
use crate::address::Address;
use crate::beads::{
    CleanupStatus, IssueStore, MailDraft, MailPriority, ProtocolSubject, slots,
};
use crate::hook::Hooks;
use crate::vcs::{UncommittedWork, Vcs};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ExitKind {
    Completed,
    Escalated,
    Deferred,
}

#[derive(Debug, Args)]
pub struct DoneArgs {
    /// How this work ended
    #[arg(long = "exit", value_enum, default_value = "completed")]
    pub exit: ExitKind,
}

impl DoneArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let invocation = Invocation::resolve()?;
        invocation.warn_on_mismatch();
        let store = invocation.store();
        let identity = &invocation.identity;

        let hooks = Hooks::new(&store);
        let hooked = hooks.discover(&identity.address, &identity.bead_id)?;

        // An honest cleanliness report is the contract with the witness.
        let cleanup = invocation
            .vcs()
            .check_uncommitted_work(&invocation.cwd)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "cleanup check failed; reporting unknown");
                UncommittedWork {
                    has_uncommitted_changes: true,
                    stash_count: 0,
                    unpushed_commits: 0,
                }
            });
        let cleanup_status = classify_cleanup(&cleanup);
        store.slot_set(
            &identity.bead_id,
            slots::CLEANUP_STATUS,
            cleanup_status.as_str(),
        )?;

        match self.exit {
            ExitKind::Completed => {
                store.slot_set(&identity.bead_id, slots::AGENT_STATE, "done")?;
                if let Address::Polecat { rig, name } = &identity.address {
                    store.mail_send(&MailDraft {
                        to: format!("{rig}/witness"),
                        subject: ProtocolSubject::PolecatDone { name: name.clone() }.subject(),
                        body: hooked
                            .as_ref()
                            .map_or_else(String::new, |u| format!("finished {}", u.id)),
                        priority: MailPriority::Normal,
                    })?;
                }
                println!("done (cleanup: {})", cleanup_status.as_str());
            }
            ExitKind::Escalated => {
                store.slot_set(&identity.bead_id, slots::AGENT_STATE, "stuck")?;
                let detail = hooked
                    .as_ref()
                    .map_or_else(|| "no hook".to_string(), |u| u.id.clone());
                store.mail_send(&MailDraft {
                    to: Address::Mayor.to_string(),
                    subject: format!("ESCALATION: {} stuck on {detail}", identity.address),
                    body: "agent exited with --exit escalated".to_string(),
                    priority: MailPriority::Urgent,
                })?;
                println!("escalated to mayor");
            }
            ExitKind::Deferred => {
                store.slot_set(&identity.bead_id, slots::AGENT_STATE, "idle")?;
                if let Some(ref unit) = hooked {
                    hooks.unhook(&identity.bead_id, &unit.id, Some("deferred"))?;
                    println!("deferred: {} released back to open", unit.id);
                } else {
                    println!("deferred: nothing hooked");
                }
            }
        }
        Ok(())
    }
}

const fn classify_cleanup(work: &UncommittedWork) -> CleanupStatus {
    if work.has_uncommitted_changes {
        CleanupStatus::HasUncommitted
    } else if work.stash_count > 0 {
        CleanupStatus::HasStash
    } else if work.unpushed_commits > 0 {
        CleanupStatus::HasUnpushed
    } else {
        CleanupStatus::Clean
    }
}
