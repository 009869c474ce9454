//! `gt shutdown` — stop agents by scope.

use clap::Args;
use dialoguer::Confirm;

use super::Invocation;
use crate::beads::{BdStore, IssueStore, MailDraft, MailPriority, ProtocolSubject};
use crate::mux::Multiplexer;

#[derive(Debug, Args)]
pub struct ShutdownArgs {
    /// Every gt session in the town
    #[arg(long)]
    pub all: bool,
    /// Only polecat sessions
    #[arg(long)]
    pub polecats_only: bool,
    /// Mail agents a shutdown notice before killing
    #[arg(long)]
    pub graceful: bool,
    /// Kill everything without ceremony (asks for confirmation)
    #[arg(long)]
    pub nuclear: bool,
}

impl ShutdownArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let invocation = Invocation::resolve()?;
        let mux = invocation.mux();

        if self.nuclear {
            let confirmed = Confirm::new()
                .with_prompt("kill every gt session in this town, no notices, no cleanup?")
                .default(false)
                .interact()?;
            if !confirmed {
                println!("aborted");
                return Ok(());
            }
        }

        let sessions: Vec<String> = mux
            .list_sessions()
            .unwrap_or_default()
            .into_iter()
            .filter(|s| s.starts_with("gt-"))
            .filter(|s| !self.polecats_only || self.is_polecat_session(&invocation, s))
            .collect();

        if sessions.is_empty() {
            println!("nothing to shut down");
            return Ok(());
        }

        if self.graceful && !self.nuclear {
            let store = BdStore::at(
                invocation.town.root.join(".beads"),
                &invocation.identity.address.to_string(),
            );
            for session in &sessions {
                let Some(address) = self.session_address(&invocation, session) else {
                    continue;
                };
                let name = match &address {
                    crate::address::Address::Polecat { name, .. } => name.clone(),
                    other => other.role().to_string(),
                };
                let draft = MailDraft {
                    to: address.to_string(),
                    subject: ProtocolSubject::LifecycleShutdown { name }.subject(),
                    body: "town is shutting down; finish or checkpoint now".to_string(),
                    priority: MailPriority::Urgent,
                };
                if let Err(e) = store.mail_send(&draft) {
                    tracing::warn!(session = %session, error = %e, "shutdown notice failed");
                }
            }
        }

        for session in &sessions {
            match mux.kill_session(session) {
                Ok(()) => println!("killed {session}"),
                Err(e) => eprintln!("could not kill {session}: {e}"),
            }
        }
        Ok(())
    }

    /// Polecat sessions are `gt-<rig>-<name>` where rig is registered and
    /// the name matches a polecat workspace.
    fn is_polecat_session(&self, invocation: &Invocation, session: &str) -> bool {
        self.session_address(invocation, session)
            .is_some_and(|a| matches!(a, crate::address::Address::Polecat { .. }))
    }

    /// Map a session name back to an agent address, where possible.
    fn session_address(
        &self,
        invocation: &Invocation,
        session: &str,
    ) -> Option<crate::address::Address> {
        use crate::address::Address;
        let town = &invocation.town.config.name;
        if session == format!("gt-{town}-mayor") {
            return Some(Address::Mayor);
        }
        if session == format!("gt-{town}-deacon") {
            return Some(Address::Deacon);
        }
        let registry = invocation.town.rigs().ok()?;
        for rig in registry.rigs.keys() {
            if session == format!("gt-{rig}-witness") {
                return Some(Address::Witness { rig: rig.clone() });
            }
            if session == format!("gt-{rig}-refinery") {
                return Some(Address::Refinery { rig: rig.clone() });
            }
            let prefix = format!("gt-{rig}-");
            if let Some(rest) = session.strip_prefix(&prefix) {
                if let Some(name) = rest.strip_prefix("crew-") {
                    return Some(Address::Crew {
                        rig: rig.clone(),
                        name: name.to_string(),
                    });
                }
                if invocation.town.polecat_dir(rig, rest).is_dir() {
                    return Some(Address::Polecat {
                        rig: rig.clone(),
                        name: rest.to_string(),
                    });
                }
            }
        }
        None
    }
}
