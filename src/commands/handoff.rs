//! `gt handoff` — end a session cleanly, leaving context for the next one.

use clap::Args;

use super::Invocation;
use crate::beads::{IssueStore, MailDraft, MailPriority, ProtocolSubject};
use crate::hook::Hooks;

#[derive(Debug, Args)]
pub struct HandoffArgs {
    /// Notes for the successor session
    #[arg(long)]
    pub notes: Option<String>,
}

impl HandoffArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let invocation = Invocation::resolve()?;
        invocation.warn_on_mismatch();
        let store = invocation.store();
        let identity = &invocation.identity;

        let hooked = Hooks::new(&store).discover(&identity.address, &identity.bead_id)?;

        let mut body = String::new();
        if let Some(ref unit) = hooked {
            body.push_str(&format!("hook: {} — {}\n", unit.id, unit.title));
        }
        if let Some(cp) = crate::checkpoint::load_fresh(&invocation.cwd) {
            body.push_str(&cp.render());
        }
        if let Some(ref notes) = self.notes {
            body.push_str(&format!("notes: {notes}\n"));
        }

        // Mail to our own address: the next prime injects it.
        store.mail_send(&MailDraft {
            to: identity.address.to_string(),
            subject: ProtocolSubject::Handoff.subject(),
            body,
            priority: MailPriority::High,
        })?;

        // The lock dies with this session; the hook survives it.
        crate::identity::release_lock(&invocation.cwd)?;

        match hooked {
            Some(unit) => println!("handoff recorded; {} stays hooked", unit.id),
            None => println!("handoff recorded"),
        }
        Ok(())
    }
}
