//! The polecat spawner.
//!
//! Spawning is the only place where all four externals meet: a worktree is
//! cut from the rig's canonical clone, an agent bead is registered, a
//! multiplexer session comes up with the right identity env, and the LLM
//! runtime is launched and nudged into motion.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::address::Address;
use crate::beads::{CreateOpts, IssueStore, IssueType, redirect, slots};
use crate::config::Town;
use crate::mux::Multiplexer;
use crate::namepool::NamePool;
use crate::runtime::Runtime;
use crate::telemetry;
use crate::vcs::Vcs;

pub const READINESS_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SpawnRequest {
    pub rig: String,
    pub name: Option<String>,
    pub account: Option<String>,
    /// Hook set atomically at spawn so the first prime finds work waiting.
    pub hook_bead: Option<String>,
    pub readiness_timeout: Duration,
}

impl SpawnRequest {
    pub fn new(rig: &str) -> Self {
        Self {
            rig: rig.to_string(),
            name: None,
            account: None,
            hook_bead: None,
            readiness_timeout: READINESS_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpawnedPolecat {
    pub address: Address,
    pub bead_id: String,
    pub workdir: PathBuf,
    pub session: String,
    pub runtime_ready: bool,
}

pub struct Spawner<'a> {
    pub town: &'a Town,
    pub store: &'a dyn IssueStore,
    pub mux: &'a dyn Multiplexer,
    pub vcs: &'a dyn Vcs,
}

impl Spawner<'_> {
    pub fn spawn(&self, request: &SpawnRequest) -> anyhow::Result<SpawnedPolecat> {
        let rig = &request.rig;
        let registry = self.town.rigs()?;
        if !registry.rigs.contains_key(rig) {
            anyhow::bail!("rig {rig:?} is not registered — add it to mayor/rigs.json first");
        }
        let clone = self.town.rig_clone(rig);
        if !clone.is_dir() {
            anyhow::bail!(
                "canonical clone missing at {} — the rig is registered but not set up",
                clone.display()
            );
        }

        let settings = self.town.rig_settings(rig)?;
        let name = match request.name.clone() {
            Some(name) => name,
            None => {
                let pool = NamePool::from_config(settings.namepool.as_ref());
                pool.pick(&self.taken_names(rig))
            }
        };

        let address = Address::Polecat {
            rig: rig.clone(),
            name: name.clone(),
        };
        let prefix = self.town.rig_prefix(rig);
        let bead_id = address.bead_id(&prefix);
        let workdir = self.town.polecat_dir(rig, &name);
        let session = address.session_name(&self.town.config.name);

        self.vcs
            .worktree_add(&clone, &workdir, &format!("polecat/{name}"))
            .with_context(|| format!("creating worktree for {address}"))?;

        redirect::ensure(&workdir, &clone.join(".beads"))
            .with_context(|| format!("writing beads redirect for {address}"))?;

        self.register_bead(&bead_id, &address, request.hook_bead.as_deref())?;

        let runtime = Runtime::resolve(settings.runtime.as_ref());
        self.launch(&session, &workdir, &address, request, &runtime)?;

        let runtime_ready =
            self.mux
                .wait_for_command(&session, &[&runtime.process_name], request.readiness_timeout);
        if !runtime_ready {
            tracing::warn!(
                session = %session,
                runtime = %runtime.process_name,
                "runtime not detected in pane; proceeding — prime will self-heal"
            );
        }

        self.nudge(&session, &address, request.hook_bead.as_deref());

        telemetry::emit_event(
            "spawn",
            self.store.actor(),
            serde_json::json!({
                "agent": address.to_string(),
                "session": session,
                "hook": request.hook_bead,
            }),
        );

        Ok(SpawnedPolecat {
            address,
            bead_id,
            workdir,
            session,
            runtime_ready,
        })
    }

    /// Names already in use: worktree directories plus live sessions.
    fn taken_names(&self, rig: &str) -> Vec<String> {
        let polecats = self.town.rig_dir(rig).join("polecats");
        let mut names: Vec<String> = std::fs::read_dir(&polecats)
            .map(|entries| {
                entries
                    .filter_map(std::result::Result::ok)
                    .filter(|e| e.path().is_dir())
                    .filter_map(|e| e.file_name().to_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    fn register_bead(
        &self,
        bead_id: &str,
        address: &Address,
        hook_bead: Option<&str>,
    ) -> anyhow::Result<()> {
        match self.store.show(bead_id) {
            Ok(_) => {}
            Err(crate::beads::StoreError::NotFound(_)) => {
                self.store.create(&CreateOpts {
                    id: Some(bead_id.to_string()),
                    title: format!("agent: {address}"),
                    issue_type: Some(IssueType::Agent),
                    ..Default::default()
                })?;
            }
            Err(e) => return Err(e.into()),
        }
        self.store.slot_set(bead_id, slots::AGENT_STATE, "spawning")?;
        self.store
            .slot_set(bead_id, slots::ROLE_BEAD, &format!("gt-role-{}", address.role()))?;
        if let Some(hook) = hook_bead {
            self.store.slot_set(bead_id, slots::HOOK_BEAD, hook)?;
        }
        Ok(())
    }

    fn launch(
        &self,
        session: &str,
        workdir: &std::path::Path,
        address: &Address,
        request: &SpawnRequest,
        runtime: &Runtime,
    ) -> anyhow::Result<()> {
        self.mux
            .new_session(session, workdir)
            .with_context(|| format!("creating session {session}"))?;

        let Address::Polecat { rig, name } = address else {
            anyhow::bail!("spawner only launches polecats, got {address}");
        };
        let env = [
            ("GT_ROLE", "polecat".to_string()),
            ("GT_RIG", rig.clone()),
            ("GT_POLECAT", name.clone()),
            ("BD_ACTOR", address.to_string()),
            ("BEADS_NO_DAEMON", "1".to_string()),
        ];
        for (key, value) in &env {
            self.mux
                .set_environment(session, key, value)
                .with_context(|| format!("setting {key} on {session}"))?;
        }
        if let Some(ref account) = request.account {
            let accounts = self.town.accounts()?;
            let entry = accounts
                .accounts
                .get(account)
                .with_context(|| format!("unknown account {account:?}"))?;
            self.mux
                .set_environment(session, "CLAUDE_CONFIG_DIR", &entry.config_dir)?;
        }

        self.mux
            .send_keys(session, &runtime.command_line(), true)
            .with_context(|| format!("launching runtime in {session}"))?;
        Ok(())
    }

    /// Startup and propulsion nudges. Best-effort: the runtime may not be
    /// listening yet, and prime covers for lost keystrokes.
    fn nudge(&self, session: &str, address: &Address, hook_bead: Option<&str>) {
        let hello = format!(
            "[gt] {} spawned you as {address}; your identity env is set",
            self.store.actor()
        );
        if let Err(e) = self.mux.send_keys(session, &hello, true) {
            tracing::warn!(session, error = %e, "startup nudge failed");
        }
        let propulsion = hook_bead.map_or_else(
            || "If work is on your hook, run it now: gt prime".to_string(),
            |bead| format!("Work is on your hook ({bead}). Run it now: gt prime"),
        );
        if let Err(e) = self.mux.send_keys(session, &propulsion, true) {
            tracing::warn!(session, error = %e, "propulsion nudge failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beads::FakeStore;
    use crate::mux::FakeMux;
    use crate::vcs::FakeVcs;

    fn town_fixture() -> (tempfile::TempDir, Town) {
        let dir = tempfile::tempdir().unwrap();
        let mayor = dir.path().join("mayor");
        std::fs::create_dir_all(&mayor).unwrap();
        std::fs::write(
            mayor.join("town.json"),
            r#"{"type":"town","version":1,"name":"gastown"}"#,
        )
        .unwrap();
        std::fs::write(
            mayor.join("rigs.json"),
            r#"{"rigs":{"wyvern":{"git_url":"https://example.com/w.git",
                "beads":{"repo":"mayor/rig","prefix":"gt"},
                "added_at":"2026-01-01T00:00:00Z"}}}"#,
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("wyvern/mayor/rig/.beads")).unwrap();
        let town = Town::discover(dir.path()).unwrap();
        (dir, town)
    }

    fn request(name: &str) -> SpawnRequest {
        SpawnRequest {
            rig: "wyvern".into(),
            name: Some(name.into()),
            account: None,
            hook_bead: None,
            readiness_timeout: Duration::from_millis(10),
        }
    }

    #[test]
    fn spawn_wires_everything_up() {
        let (_dir, town) = town_fixture();
        let store = FakeStore::new("gt").as_actor("mayor");
        let mux = FakeMux::new();
        let vcs = FakeVcs::new();
        let spawner = Spawner {
            town: &town,
            store: &store,
            mux: &mux,
            vcs: &vcs,
        };

        let spawned = spawner.spawn(&request("toast")).unwrap();
        assert_eq!(spawned.address.to_string(), "wyvern/polecats/toast");
        assert_eq!(spawned.session, "gt-wyvern-toast");
        assert!(!spawned.runtime_ready, "fake pane never shows claude");

        // Worktree and branch exist.
        assert!(vcs.has_worktree(&town.polecat_dir("wyvern", "toast")));
        assert!(vcs.has_branch("polecat/toast"));

        // Redirect points at the canonical store.
        let resolved = redirect::resolve(&town.polecat_dir("wyvern", "toast"));
        assert!(resolved.ends_with("wyvern/mayor/rig/.beads"));

        // Agent bead registered as spawning.
        let bead = store.unit("gt-wyvern-polecat-toast").unwrap();
        assert_eq!(bead.slots.get("agent_state").map(String::as_str), Some("spawning"));

        // Session env carries the identity.
        let env = mux.env_of("gt-wyvern-toast");
        assert_eq!(env.get("GT_ROLE").map(String::as_str), Some("polecat"));
        assert_eq!(env.get("BD_ACTOR").map(String::as_str), Some("wyvern/polecats/toast"));

        // Runtime command then two nudges.
        let keys = mux.sent_keys("gt-wyvern-toast");
        assert_eq!(keys[0], "claude --dangerously-skip-permissions\n");
        assert!(keys[1].contains("spawned you"));
        assert!(keys[2].contains("gt prime"));
    }

    #[test]
    fn spawn_with_hook_sets_slot_and_names_it() {
        let (_dir, town) = town_fixture();
        let store = FakeStore::new("gt").as_actor("mayor");
        let mux = FakeMux::new();
        let vcs = FakeVcs::new();
        let spawner = Spawner {
            town: &town,
            store: &store,
            mux: &mux,
            vcs: &vcs,
        };

        let mut req = request("toast");
        req.hook_bead = Some("gt-u1".into());
        spawner.spawn(&req).unwrap();

        let bead = store.unit("gt-wyvern-polecat-toast").unwrap();
        assert_eq!(bead.slots.get("hook_bead").map(String::as_str), Some("gt-u1"));

        let keys = mux.sent_keys("gt-wyvern-toast");
        assert!(keys.iter().any(|k| k.contains("gt-u1")));
    }

    #[test]
    fn unregistered_rig_is_rejected() {
        let (_dir, town) = town_fixture();
        let store = FakeStore::new("gt");
        let mux = FakeMux::new();
        let vcs = FakeVcs::new();
        let spawner = Spawner {
            town: &town,
            store: &store,
            mux: &mux,
            vcs: &vcs,
        };

        let err = spawner.spawn(&request("toast").with_rig("nowhere")).unwrap_err();
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn auto_name_skips_existing_worktrees() {
        let (dir, town) = town_fixture();
        // Pre-existing polecat directory occupies a name.
        std::fs::create_dir_all(dir.path().join("wyvern/polecats/toast")).unwrap();

        let store = FakeStore::new("gt");
        let mux = FakeMux::new();
        let vcs = FakeVcs::new();
        let spawner = Spawner {
            town: &town,
            store: &store,
            mux: &mux,
            vcs: &vcs,
        };

        let mut req = SpawnRequest::new("wyvern");
        req.readiness_timeout = Duration::from_millis(10);
        let spawned = spawner.spawn(&req).unwrap();
        let Address::Polecat { name, .. } = &spawned.address else {
            panic!("expected polecat");
        };
        assert_ne!(name, "toast");
    }

    impl SpawnRequest {
        fn with_rig(mut self, rig: &str) -> Self {
            self.rig = rig.to_string();
            self
        }
    }
}
