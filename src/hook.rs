//! The hook manager.
//!
//! A hook is the at-most-one durable binding between an agent and a work
//! unit. It is represented on both sides — `W.status=hooked` +
//! `W.assignee=agent` on the work unit, `hook_bead` on the agent bead —
//! but the two updates are not atomic. The work-unit side is authoritative:
//! every reader tolerates a missing or stale agent slot and heals it.

use crate::address::Address;
use crate::beads::{
    IssueStore, ListFilter, MailDraft, MailPriority, Patch, ProtocolSubject, Status, WorkUnit,
    slots,
};
use crate::error::ExitError;

/// What `hook` actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// Fresh attach.
    Hooked,
    /// Already hooked to this agent; nothing to do.
    NoOp,
    /// Previous hook was complete and was closed out of the way.
    ReplacedComplete { previous: String },
    /// Previous hook was incomplete; force moved it back to open.
    ForcedReplace { previous: String },
    /// The unit was hooked to someone else; force took it over.
    ForcedReassign { previous_owner: String },
}

pub struct Hooks<'a> {
    store: &'a dyn IssueStore,
}

impl<'a> Hooks<'a> {
    pub const fn new(store: &'a dyn IssueStore) -> Self {
        Self { store }
    }

    /// Atomically hook `bead` to the agent.
    ///
    /// Drives the store's update of the work unit (authoritative), then the
    /// agent bead's slot. A failed slot write is tolerated; the next prime
    /// self-heals it.
    pub fn hook(
        &self,
        agent: &Address,
        agent_bead: &str,
        bead: &str,
        force: bool,
    ) -> anyhow::Result<HookOutcome> {
        let agent_addr = agent.to_string();
        let unit = self.store.show(bead)?;

        // Idempotence: re-hooking our own hook succeeds without mutation.
        if unit.status == Status::Hooked && unit.assignee == agent_addr {
            self.heal_slot(agent_bead, bead);
            return Ok(HookOutcome::NoOp);
        }

        let mut outcome = HookOutcome::Hooked;

        // Someone else holds the unit.
        if unit.status == Status::Hooked && !unit.assignee.is_empty() {
            if !force {
                return Err(ExitError::AlreadyHooked {
                    bead: bead.to_string(),
                    owner: unit.assignee,
                }
                .into());
            }
            self.force_reassign(&unit)?;
            outcome = HookOutcome::ForcedReassign {
                previous_owner: unit.assignee.clone(),
            };
        }

        // At-most-one: the agent may already hold a different hook.
        if let Some(previous) = self.store.slot_get(agent_bead, slots::HOOK_BEAD)?
            && previous != bead
        {
            if self.is_complete(&previous)? {
                self.store
                    .close(&[previous.clone()], Some("auto-replaced, molecule complete"))?;
                outcome = HookOutcome::ReplacedComplete { previous };
            } else if force {
                self.store.release(&previous, Some("force-replaced"))?;
                outcome = HookOutcome::ForcedReplace { previous };
            } else {
                return Err(ExitError::AlreadyHooked {
                    bead: previous,
                    owner: agent_addr,
                }
                .into());
            }
        }

        self.store.update(
            bead,
            &Patch {
                status: Some(Status::Hooked),
                assignee: Some(agent_addr),
                ..Default::default()
            },
        )?;
        self.heal_slot(agent_bead, bead);

        Ok(outcome)
    }

    /// Detach the agent's hook, returning the unit to open.
    pub fn unhook(&self, agent_bead: &str, bead: &str, reason: Option<&str>) -> anyhow::Result<()> {
        self.store.release(bead, reason)?;
        if let Err(e) = self.store.slot_clear(agent_bead, slots::HOOK_BEAD) {
            tracing::warn!(agent_bead, error = %e, "hook slot clear failed; prime will heal");
        }
        Ok(())
    }

    /// Hook discovery for the startup protocol.
    ///
    /// Hooked units win; `in_progress` covers the claimed-then-interrupted
    /// case. Whatever is found heals the agent slot.
    pub fn discover(&self, agent: &Address, agent_bead: &str) -> anyhow::Result<Option<WorkUnit>> {
        let agent_addr = agent.to_string();
        for status in [Status::Hooked, Status::InProgress] {
            let mut units = self.store.list(&ListFilter {
                status: Some(status),
                assignee: Some(agent_addr.clone()),
                ..Default::default()
            })?;
            if !units.is_empty() {
                let unit = units.remove(0);
                self.heal_slot(agent_bead, &unit.id);
                return Ok(Some(unit));
            }
        }
        Ok(None)
    }

    /// A hooked unit is complete iff it has no attached workflow, or the
    /// workflow has no remaining open steps.
    pub fn is_complete(&self, bead: &str) -> anyhow::Result<bool> {
        let unit = self.store.show(bead)?;
        let Some(molecule) = unit.field(slots::ATTACHED_MOLECULE) else {
            return Ok(true);
        };
        Ok(self.store.current_step(&molecule)?.is_none())
    }

    /// Force path for a unit hooked to another agent: notify that agent's
    /// witness, then unhook. The old owner itself is left for the witness.
    fn force_reassign(&self, unit: &WorkUnit) -> anyhow::Result<()> {
        let old_owner = &unit.assignee;
        let witness_addr = old_owner
            .parse::<Address>()
            .ok()
            .and_then(|a| a.rig().map(|rig| format!("{rig}/witness")))
            .unwrap_or_else(|| Address::Deacon.to_string());

        let name = old_owner
            .rsplit('/')
            .next()
            .unwrap_or(old_owner)
            .to_string();
        let draft = MailDraft {
            to: witness_addr,
            subject: ProtocolSubject::LifecycleShutdown { name }.subject(),
            body: format!(
                "{} was reassigned from {old_owner} to a new agent by {}; \
                 shut the old owner down when convenient",
                unit.id,
                self.store.actor()
            ),
            priority: MailPriority::High,
        };
        if let Err(e) = self.store.mail_send(&draft) {
            tracing::warn!(error = %e, "shutdown notice failed; witness will find out on patrol");
        }

        self.store.release(&unit.id, Some("force-reassigned"))?;
        Ok(())
    }

    /// Write the agent slot from the authoritative work-unit side.
    fn heal_slot(&self, agent_bead: &str, bead: &str) {
        match self.store.slot_get(agent_bead, slots::HOOK_BEAD) {
            Ok(Some(current)) if current == bead => {}
            Ok(_) => {
                if let Err(e) = self.store.slot_set(agent_bead, slots::HOOK_BEAD, bead) {
                    tracing::warn!(agent_bead, bead, error = %e, "hook slot write failed");
                }
            }
            Err(e) => {
                tracing::warn!(agent_bead, error = %e, "hook slot read failed");
            }
        }
    }
}

/// A reconciliation discrepancy, for doctor and the invariant tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrepancy {
    pub bead: String,
    pub detail: String,
}

/// Check the two-sided hook invariant across the whole store: every hooked
/// work unit has exactly one agent bead pointing back at it.
pub fn reconcile(store: &dyn IssueStore) -> anyhow::Result<Vec<Discrepancy>> {
    let hooked = store.list(&ListFilter {
        status: Some(Status::Hooked),
        ..Default::default()
    })?;
    let agents = store.list(&ListFilter {
        issue_type: Some(crate::beads::IssueType::Agent),
        ..Default::default()
    })?;

    let mut discrepancies = Vec::new();
    for unit in &hooked {
        if unit.is_agent_bead() {
            continue;
        }
        let holders: Vec<&WorkUnit> = agents
            .iter()
            .filter(|a| a.field(slots::HOOK_BEAD).as_deref() == Some(unit.id.as_str()))
            .collect();
        match holders.len() {
            1 => {}
            0 => discrepancies.push(Discrepancy {
                bead: unit.id.clone(),
                detail: format!(
                    "hooked to {} but no agent bead has hook_bead={}",
                    unit.assignee, unit.id
                ),
            }),
            n => discrepancies.push(Discrepancy {
                bead: unit.id.clone(),
                detail: format!("{n} agent beads claim hook_bead={}", unit.id),
            }),
        }
    }
    Ok(discrepancies)
}
