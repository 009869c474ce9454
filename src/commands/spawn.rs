//! `gt spawn` — launch a polecat by hand.

use clap::Args;

use super::Invocation;
use crate::beads::BdStore;
use crate::spawn::{SpawnRequest, Spawner};

#[derive(Debug, Args)]
pub struct SpawnArgs {
    /// Rig to spawn into
    pub rig: String,
    /// Worker name (default: from the rig's name pool)
    #[arg(long)]
    pub name: Option<String>,
    /// Account handle from mayor/accounts.json
    #[arg(long)]
    pub account: Option<String>,
    /// Hook this work unit at spawn
    #[arg(long)]
    pub hook: Option<String>,
}

impl SpawnArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let invocation = Invocation::resolve()?;
        invocation.warn_on_mismatch();

        let store = BdStore::at(
            invocation.town.rig_clone(&self.rig).join(".beads"),
            &invocation.identity.address.to_string(),
        );
        let mux = invocation.mux();
        let vcs = invocation.vcs();
        let spawner = Spawner {
            town: &invocation.town,
            store: &store,
            mux: &mux,
            vcs: &vcs,
        };

        let mut request = SpawnRequest::new(&self.rig);
        request.name.clone_from(&self.name);
        request.account.clone_from(&self.account);
        request.hook_bead.clone_from(&self.hook);

        let spawned = spawner.spawn(&request)?;
        println!(
            "spawned {} in session {} ({})",
            spawned.address,
            spawned.session,
            if spawned.runtime_ready {
                "runtime up"
            } else {
                "runtime pending"
            }
        );
        if let Some(ref hook) = self.hook {
            let hooks = crate::hook::Hooks::new(&store);
            hooks.hook(&spawned.address, &spawned.bead_id, hook, false)?;
            println!("hooked {hook}");
        }
        Ok(())
    }
}
