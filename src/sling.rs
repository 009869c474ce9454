//! The dispatch engine.
//!
//! `sling` is the one verb that moves work: resolve a target agent
//! (existing, spawned on demand, or an idle dog), optionally wrap the work
//! unit in an instantiated workflow, hook atomically, and wake the agent
//! with an activation nudge. Dry-run walks the same path without touching
//! the store.

use std::time::Duration;

use anyhow::Context;

use crate::address::Address;
use crate::beads::{
    CreateOpts, Delegation, DelegationTerms, IssueStore, IssueType, ListFilter, Patch, Status,
    slots, valid_bead_id,
};
use crate::config::Town;
use crate::error::ExitError;
use crate::hook::Hooks;
use crate::mux::Multiplexer;
use crate::runtime::Runtime;
use crate::spawn::{SpawnRequest, Spawner};
use crate::vcs::Vcs;

const NUDGE_READINESS_TIMEOUT: Duration = Duration::from_secs(5);

/// The standard workflow auto-attached to polecat dispatches.
pub const POLECAT_WORK_FORMULA: &str = "polecat-work";

#[derive(Debug, Clone, Default)]
pub struct SlingOptions {
    pub force: bool,
    pub create: bool,
    pub no_convoy: bool,
    pub dry_run: bool,
    /// Formula to instantiate and bond onto the work unit.
    pub formula: Option<String>,
    pub vars: Vec<(String, String)>,
    /// Natural-language instructions recorded on the hooked unit.
    pub args: Option<String>,
    /// Record the dispatched unit as delegated from this parent.
    pub delegate_from: Option<String>,
    /// Readiness wait before the activation nudge.
    pub nudge_timeout: Option<Duration>,
}

/// Where one work unit ended up.
#[derive(Debug, Clone)]
pub struct SlingReport {
    pub bead: String,
    pub hook_target: String,
    pub agent: Address,
    pub spawned: bool,
    pub nudged: bool,
    pub dry_run: bool,
}

/// Resolved dispatch target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Existing(Address),
    SpawnPolecat { rig: String, name: Option<String> },
    Dog { name: Option<String> },
}

pub struct Dispatch<'a> {
    pub town: &'a Town,
    pub store: &'a dyn IssueStore,
    pub mux: &'a dyn Multiplexer,
    pub vcs: &'a dyn Vcs,
    /// The dispatching agent (self-target and provenance).
    pub self_address: Address,
}

impl Dispatch<'_> {
    /// Resolve a target specifier (§ target resolution priority).
    pub fn resolve_target(&self, spec: Option<&str>) -> anyhow::Result<Target> {
        let Some(spec) = spec.filter(|s| !s.is_empty() && *s != ".") else {
            return Ok(Target::Existing(self.self_address.clone()));
        };

        if spec == "deacon/dogs" {
            return Ok(Target::Dog { name: None });
        }
        if let Ok(address) = spec.parse::<Address>() {
            if let Address::Dog { name } = address {
                return Ok(Target::Dog { name: Some(name) });
            }
            // A registered polecat with no live session needs a fresh spawn
            // under the same name, not a nudge into the void.
            if let Address::Polecat { ref rig, ref name } = address {
                let session = address.session_name(&self.town.config.name);
                if !self.mux.has_session(&session).unwrap_or(false) {
                    return Ok(Target::SpawnPolecat {
                        rig: rig.clone(),
                        name: Some(name.clone()),
                    });
                }
            }
            return Ok(Target::Existing(address));
        }

        // Bare rig name → fresh polecat.
        if self.town.rigs()?.rigs.contains_key(spec) {
            return Ok(Target::SpawnPolecat {
                rig: spec.to_string(),
                name: None,
            });
        }

        anyhow::bail!("unknown sling target {spec:?}: not an address, dog, or registered rig")
    }

    /// Dispatch a batch of work units to one target.
    ///
    /// Batch rule: two or more units aimed at a bare rig fan out, one
    /// fresh polecat each.
    pub fn sling(
        &self,
        beads: &[String],
        target_spec: Option<&str>,
        opts: &SlingOptions,
    ) -> anyhow::Result<Vec<SlingReport>> {
        for bead in beads {
            if !valid_bead_id(bead) {
                anyhow::bail!("malformed work unit id {bead:?}");
            }
        }
        if beads.is_empty() {
            anyhow::bail!("nothing to sling");
        }

        let target = self.resolve_target(target_spec)?;

        let fan_out = beads.len() >= 2 && matches!(target, Target::SpawnPolecat { name: None, .. });
        let mut reports = Vec::new();
        let mut convoy: Option<String> = None;

        for (index, bead) in beads.iter().enumerate() {
            let target = if fan_out {
                target.clone()
            } else if index > 0 {
                // Same agent takes the whole batch when not fanning out.
                reports
                    .last()
                    .map_or_else(|| target.clone(), |r: &SlingReport| {
                        Target::Existing(r.agent.clone())
                    })
            } else {
                target.clone()
            };
            let report = self.sling_one(bead, &target, opts, index == 0, &mut convoy)?;
            reports.push(report);
        }
        Ok(reports)
    }

    fn sling_one(
        &self,
        bead: &str,
        target: &Target,
        opts: &SlingOptions,
        first_in_batch: bool,
        convoy: &mut Option<String>,
    ) -> anyhow::Result<SlingReport> {
        let unit = self.store.show(bead).context("looking up work unit")?;

        // Refuse early without force; the hook manager re-checks under the
        // same rules when we actually attach. Re-slinging to the unit's own
        // holder is the idempotent no-op path, not a conflict.
        let rehook_of_own = matches!(
            target, Target::Existing(address) if unit.assignee == address.to_string()
        );
        if unit.status == Status::Hooked
            && !unit.assignee.is_empty()
            && !rehook_of_own
            && !opts.force
        {
            return Err(ExitError::AlreadyHooked {
                bead: bead.to_string(),
                owner: unit.assignee,
            }
            .into());
        }

        if opts.dry_run {
            let agent = match target {
                Target::Existing(address) => address.clone(),
                Target::SpawnPolecat { rig, name } => Address::Polecat {
                    rig: rig.clone(),
                    name: name.clone().unwrap_or_else(|| "<new>".to_string()),
                },
                Target::Dog { name } => Address::Dog {
                    name: name.clone().unwrap_or_else(|| "<idle>".to_string()),
                },
            };
            return Ok(SlingReport {
                bead: bead.to_string(),
                hook_target: bead.to_string(),
                agent,
                spawned: matches!(target, Target::SpawnPolecat { .. }),
                nudged: false,
                dry_run: true,
            });
        }

        if first_in_batch && !opts.no_convoy {
            *convoy = Some(self.ensure_convoy(&unit.title, opts)?);
        }
        if let Some(convoy_id) = convoy.as_ref() {
            self.store.add_tracks(convoy_id, bead)?;
        }

        // Formula path: the instantiated root becomes the hook target.
        let hook_target = if let Some(ref formula) = opts.formula {
            self.instantiate(formula, bead, &unit.title, &opts.vars)?
        } else {
            bead.to_string()
        };

        // Materialize the target agent, spawning if needed. Spawn carries
        // the hook bead so the slot is set before the runtime's first prime.
        let (agent, spawned) = self.materialize(target, &hook_target, opts)?;
        let prefix = agent
            .rig()
            .map_or_else(|| "gt".to_string(), |rig| self.town.rig_prefix(rig));
        let agent_bead = agent.bead_id(&prefix);

        Hooks::new(self.store).hook(&agent, &agent_bead, &hook_target, opts.force)?;

        self.annotate(&hook_target, opts)?;

        if let Some(ref parent) = opts.delegate_from {
            record_delegation(
                self.store,
                &Delegation {
                    parent: parent.clone(),
                    child: bead.to_string(),
                    delegated_by: self.effective_actor(),
                    delegated_to: agent.to_string(),
                    terms: DelegationTerms {
                        portion: opts.args.clone(),
                        ..Default::default()
                    },
                    created_at: chrono::Utc::now().to_rfc3339(),
                },
            )?;
        }

        // Polecats always work a molecule; attach the standard one when the
        // dispatcher didn't bring a formula.
        if matches!(agent, Address::Polecat { .. })
            && opts.formula.is_none()
            && self
                .store
                .show(&hook_target)?
                .field(slots::ATTACHED_MOLECULE)
                .is_none()
        {
            self.attach_polecat_work(&hook_target, &unit.title)?;
        }

        let nudged = if spawned {
            // The spawner already sent the propulsion nudge.
            false
        } else {
            self.activation_nudge(&agent, &hook_target, opts)
        };

        Ok(SlingReport {
            bead: bead.to_string(),
            hook_target,
            agent,
            spawned,
            nudged,
            dry_run: false,
        })
    }

    fn effective_actor(&self) -> String {
        self.store.actor().to_string()
    }

    /// Find or create the convoy tracking unit for this dispatch.
    fn ensure_convoy(&self, first_title: &str, opts: &SlingOptions) -> anyhow::Result<String> {
        let title = opts.args.as_ref().map_or_else(
            || format!("Convoy: {first_title}"),
            |args| format!("Convoy: {args}"),
        );
        let existing = self.store.list(&ListFilter {
            issue_type: Some(IssueType::Convoy),
            status: Some(Status::Open),
            ..Default::default()
        })?;
        if let Some(found) = existing.into_iter().find(|c| c.title == title) {
            return Ok(found.id);
        }
        let convoy = self.store.create(&CreateOpts {
            title,
            issue_type: Some(IssueType::Convoy),
            ..Default::default()
        })?;
        Ok(convoy.id)
    }

    /// Cook + wisp + bond; returns the wisp root (the new hook target).
    fn instantiate(
        &self,
        formula: &str,
        bead: &str,
        title: &str,
        extra_vars: &[(String, String)],
    ) -> anyhow::Result<String> {
        let cooked = self
            .store
            .cook(formula)
            .with_context(|| format!("cooking formula {formula}"))?;

        let mut vars = vec![
            ("feature".to_string(), title.to_string()),
            ("issue".to_string(), bead.to_string()),
        ];
        vars.extend(extra_vars.iter().cloned());

        let wisp = self
            .store
            .wisp(&cooked, &vars)
            .with_context(|| format!("instantiating {formula}"))?;
        self.store
            .bond(&wisp.root, bead)
            .with_context(|| format!("bonding {} to {bead}", wisp.root))?;
        self.store
            .slot_set(&wisp.root, slots::ATTACHED_MOLECULE, &wisp.root)?;
        Ok(wisp.root)
    }

    fn attach_polecat_work(&self, bead: &str, title: &str) -> anyhow::Result<()> {
        match self.store.cook(POLECAT_WORK_FORMULA) {
            Ok(cooked) => {
                let vars = vec![
                    ("feature".to_string(), title.to_string()),
                    ("issue".to_string(), bead.to_string()),
                ];
                let wisp = self.store.wisp(&cooked, &vars)?;
                self.store.bond(&wisp.root, bead)?;
                self.store
                    .slot_set(bead, slots::ATTACHED_MOLECULE, &wisp.root)?;
            }
            Err(crate::beads::StoreError::NotFound(_)) => {
                tracing::debug!("no {POLECAT_WORK_FORMULA} formula in this store; skipping");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Turn a target into a live agent address.
    fn materialize(
        &self,
        target: &Target,
        hook_bead: &str,
        opts: &SlingOptions,
    ) -> anyhow::Result<(Address, bool)> {
        match target {
            Target::Existing(address) => Ok((address.clone(), false)),
            Target::SpawnPolecat { rig, name } => {
                let spawner = Spawner {
                    town: self.town,
                    store: self.store,
                    mux: self.mux,
                    vcs: self.vcs,
                };
                let mut request = SpawnRequest::new(rig);
                request.name.clone_from(name);
                request.hook_bead = Some(hook_bead.to_string());
                if let Some(timeout) = opts.nudge_timeout {
                    request.readiness_timeout = timeout;
                }
                let spawned = spawner.spawn(&request)?;
                Ok((spawned.address, true))
            }
            Target::Dog { name } => {
                let address = self.find_idle_dog(name.as_deref(), opts)?;
                Ok((address, false))
            }
        }
    }

    /// An idle dog has an agent bead with no hook and a live session.
    fn find_idle_dog(&self, name: Option<&str>, opts: &SlingOptions) -> anyhow::Result<Address> {
        let dogs = self.store.list(&ListFilter {
            issue_type: Some(IssueType::Agent),
            ..Default::default()
        })?;
        for bead in dogs {
            let Some(dog_name) = bead.id.split("-dog-").nth(1).map(String::from) else {
                continue;
            };
            if name.is_some_and(|n| n != dog_name) {
                continue;
            }
            if bead.field(slots::HOOK_BEAD).is_some() {
                continue;
            }
            let address = Address::Dog { name: dog_name };
            let session = address.session_name(&self.town.config.name);
            if self.mux.has_session(&session).unwrap_or(false) {
                return Ok(address);
            }
        }
        if opts.create {
            anyhow::bail!(
                "no idle dog available — dog spawning is owned by the deacon; \
                 start one with `gt deacon` and retry"
            );
        }
        anyhow::bail!("no idle dog available (pass --create to allow spawning)")
    }

    /// Record dispatcher and natural-language args on the hooked unit.
    fn annotate(&self, bead: &str, opts: &SlingOptions) -> anyhow::Result<()> {
        let unit = self.store.show(bead)?;
        let mut description = unit.description.clone();
        let dispatcher = self.effective_actor();
        if crate::beads::issue::description_field(&description, "dispatched_by").is_none() {
            if !description.is_empty() && !description.ends_with('\n') {
                description.push('\n');
            }
            description.push_str(&format!("dispatched_by: {dispatcher}\n"));
        }
        if let Some(ref args) = opts.args {
            description.push_str(&format!("args: {args}\n"));
        }
        if description != unit.description {
            self.store.update(
                bead,
                &Patch {
                    description: Some(description),
                    ..Default::default()
                },
            )?;
        }
        Ok(())
    }

    /// Wake a live agent: wait for its runtime, then type `gt prime`.
    /// Skipped silently when the pane isn't ready — the next prime will
    /// find the hook anyway.
    fn activation_nudge(&self, agent: &Address, bead: &str, opts: &SlingOptions) -> bool {
        let session = agent.session_name(&self.town.config.name);
        if !self.mux.has_session(&session).unwrap_or(false) {
            return false;
        }
        let settings = agent
            .rig()
            .and_then(|rig| self.town.rig_settings(rig).ok())
            .unwrap_or_default();
        let runtime = Runtime::resolve(settings.runtime.as_ref());
        let timeout = opts.nudge_timeout.unwrap_or(NUDGE_READINESS_TIMEOUT);
        if !self
            .mux
            .wait_for_command(&session, &[&runtime.process_name], timeout)
        {
            tracing::warn!(session = %session, "runtime not ready; skipping activation nudge");
            return false;
        }
        let nudge = format!("gt prime — {bead} is on your hook, run it now");
        match self.mux.send_keys(&session, &nudge, true) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(session = %session, error = %e, "activation nudge failed");
                false
            }
        }
    }
}

/// Record a delegation: the child carries the terms in its
/// `delegated_from` slot, and the parent is blocked by the child so credit
/// cascades when the child's completion closes the chain.
pub fn record_delegation(
    store: &dyn IssueStore,
    delegation: &Delegation,
) -> anyhow::Result<()> {
    let json = serde_json::to_string(delegation)?;
    store.slot_set(&delegation.child, slots::DELEGATED_FROM, &json)?;
    store.add_dep(&delegation.parent, &delegation.child)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beads::FakeStore;
    use crate::mux::FakeMux;
    use crate::vcs::FakeVcs;

    struct Fixture {
        _dir: tempfile::TempDir,
        town: Town,
        store: FakeStore,
        mux: FakeMux,
        vcs: FakeVcs,
    }

    fn fixture() -> Fixture {
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
        Fixture {
            _dir: dir,
            town,
            store: FakeStore::new("gt").as_actor("mayor"),
            mux: FakeMux::new(),
            vcs: FakeVcs::new(),
        }
    }

    fn dispatch(fixture: &Fixture) -> Dispatch<'_> {
        Dispatch {
            town: &fixture.town,
            store: &fixture.store,
            mux: &fixture.mux,
            vcs: &fixture.vcs,
            self_address: Address::Mayor,
        }
    }

    fn register_agent(store: &FakeStore, address: &str) -> String {
        let addr: Address = address.parse().unwrap();
        let bead_id = addr.bead_id("gt");
        store
            .create(&CreateOpts {
                id: Some(bead_id.clone()),
                title: format!("agent: {address}"),
                issue_type: Some(IssueType::Agent),
                ..Default::default()
            })
            .unwrap();
        bead_id
    }

    fn task(store: &FakeStore, id: &str, title: &str) -> String {
        store
            .create(&CreateOpts {
                id: Some(id.to_string()),
                title: title.to_string(),
                ..Default::default()
            })
            .unwrap()
            .id
    }

    fn quick_opts() -> SlingOptions {
        SlingOptions {
            nudge_timeout: Some(Duration::from_millis(10)),
            ..Default::default()
        }
    }

    #[test]
    fn malformed_id_rejected_early() {
        let fixture = fixture();
        let d = dispatch(&fixture);
        let err = d
            .sling(&["BAD ID".to_string()], None, &quick_opts())
            .unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn target_defaults_to_self() {
        let fixture = fixture();
        let d = dispatch(&fixture);
        assert_eq!(
            d.resolve_target(None).unwrap(),
            Target::Existing(Address::Mayor)
        );
        assert_eq!(
            d.resolve_target(Some(".")).unwrap(),
            Target::Existing(Address::Mayor)
        );
    }

    #[test]
    fn bare_rig_means_spawn() {
        let fixture = fixture();
        let d = dispatch(&fixture);
        assert_eq!(
            d.resolve_target(Some("wyvern")).unwrap(),
            Target::SpawnPolecat {
                rig: "wyvern".into(),
                name: None
            }
        );
    }

    #[test]
    fn polecat_without_session_needs_spawn() {
        let fixture = fixture();
        let d = dispatch(&fixture);
        // No session exists for toast → treated like a bare-rig spawn with
        // the requested name.
        assert_eq!(
            d.resolve_target(Some("wyvern/polecats/toast")).unwrap(),
            Target::SpawnPolecat {
                rig: "wyvern".into(),
                name: Some("toast".into())
            }
        );
    }

    #[test]
    fn polecat_with_session_is_existing() {
        let fixture = fixture();
        fixture
            .mux
            .new_session("gt-wyvern-toast", std::path::Path::new("/tmp"))
            .unwrap();
        let d = dispatch(&fixture);
        assert_eq!(
            d.resolve_target(Some("wyvern/polecats/toast")).unwrap(),
            Target::Existing("wyvern/polecats/toast".parse().unwrap())
        );
    }

    #[test]
    fn unknown_target_rejected() {
        let fixture = fixture();
        let d = dispatch(&fixture);
        assert!(d.resolve_target(Some("nonsense")).is_err());
    }

    #[test]
    fn sling_to_existing_agent_hooks_and_nudges() {
        let fixture = fixture();
        register_agent(&fixture.store, "wyvern/polecats/toast");
        fixture
            .mux
            .new_session("gt-wyvern-toast", std::path::Path::new("/tmp"))
            .unwrap();
        fixture.mux.set_pane_command("gt-wyvern-toast", "claude");
        let bead = task(&fixture.store, "gt-u1", "fix the parser");

        let d = dispatch(&fixture);
        let reports = d
            .sling(
                &[bead.clone()],
                Some("wyvern/polecats/toast"),
                &quick_opts(),
            )
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].nudged);
        assert!(!reports[0].spawned);

        let unit = fixture.store.show(&bead).unwrap();
        assert_eq!(unit.status, Status::Hooked);
        assert_eq!(unit.assignee, "wyvern/polecats/toast");
        assert!(unit.description.contains("dispatched_by: mayor"));

        let keys = fixture.mux.sent_keys("gt-wyvern-toast");
        assert!(keys.iter().any(|k| k.contains("gt prime")));
        assert!(keys.iter().any(|k| k.contains("gt-u1")));
    }

    #[test]
    fn sling_to_rig_spawns_polecat() {
        let fixture = fixture();
        let bead = task(&fixture.store, "gt-u1", "fix the parser");

        let d = dispatch(&fixture);
        let reports = d.sling(&[bead.clone()], Some("wyvern"), &quick_opts()).unwrap();
        assert!(reports[0].spawned);

        let unit = fixture.store.show(&bead).unwrap();
        assert_eq!(unit.status, Status::Hooked);
        assert_eq!(unit.assignee, reports[0].agent.to_string());

        // Agent bead got the hook slot at spawn.
        let agent_bead = reports[0].agent.bead_id("gt");
        assert_eq!(
            fixture
                .store
                .slot_get(&agent_bead, slots::HOOK_BEAD)
                .unwrap(),
            Some(bead)
        );
    }

    #[test]
    fn already_hooked_refused_without_force() {
        let fixture = fixture();
        register_agent(&fixture.store, "wyvern/polecats/toast");
        fixture
            .mux
            .new_session("gt-wyvern-toast", std::path::Path::new("/tmp"))
            .unwrap();
        let bead = task(&fixture.store, "gt-u1", "work");
        fixture
            .store
            .update(
                &bead,
                &Patch {
                    status: Some(Status::Hooked),
                    assignee: Some("wyvern/polecats/nux".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let d = dispatch(&fixture);
        let err = d
            .sling(&[bead], Some("wyvern/polecats/toast"), &quick_opts())
            .unwrap_err();
        assert!(
            err.downcast_ref::<ExitError>()
                .is_some_and(|e| matches!(e, ExitError::AlreadyHooked { .. }))
        );
    }

    #[test]
    fn dry_run_performs_no_mutation() {
        let fixture = fixture();
        register_agent(&fixture.store, "wyvern/polecats/toast");
        fixture
            .mux
            .new_session("gt-wyvern-toast", std::path::Path::new("/tmp"))
            .unwrap();
        let bead = task(&fixture.store, "gt-u1", "work");
        let before = fixture.store.fingerprint();

        let d = dispatch(&fixture);
        let mut opts = quick_opts();
        opts.dry_run = true;
        let reports = d
            .sling(&[bead], Some("wyvern/polecats/toast"), &opts)
            .unwrap();
        assert!(reports[0].dry_run);
        assert_eq!(fixture.store.fingerprint(), before);
        assert!(fixture.mux.sent_keys("gt-wyvern-toast").is_empty());
    }

    #[test]
    fn convoy_created_and_tracks_unit() {
        let fixture = fixture();
        register_agent(&fixture.store, "wyvern/polecats/toast");
        fixture
            .mux
            .new_session("gt-wyvern-toast", std::path::Path::new("/tmp"))
            .unwrap();
        let bead = task(&fixture.store, "gt-u1", "fix parser");

        let d = dispatch(&fixture);
        d.sling(&[bead.clone()], Some("wyvern/polecats/toast"), &quick_opts())
            .unwrap();

        let convoys = fixture
            .store
            .list(&ListFilter {
                issue_type: Some(IssueType::Convoy),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(convoys.len(), 1);
        assert_eq!(convoys[0].tracks, vec![bead.clone()]);
        // Tracking never blocks readiness.
        let ready: Vec<String> = fixture
            .store
            .ready(None)
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert!(!ready.contains(&bead), "hooked unit is not ready");
    }

    #[test]
    fn no_convoy_flag_suppresses_tracking() {
        let fixture = fixture();
        register_agent(&fixture.store, "wyvern/polecats/toast");
        fixture
            .mux
            .new_session("gt-wyvern-toast", std::path::Path::new("/tmp"))
            .unwrap();
        let bead = task(&fixture.store, "gt-u1", "fix parser");

        let d = dispatch(&fixture);
        let mut opts = quick_opts();
        opts.no_convoy = true;
        d.sling(&[bead], Some("wyvern/polecats/toast"), &opts).unwrap();

        let convoys = fixture
            .store
            .list(&ListFilter {
                issue_type: Some(IssueType::Convoy),
                ..Default::default()
            })
            .unwrap();
        assert!(convoys.is_empty());
    }

    #[test]
    fn formula_bonds_and_roots_become_hook_target() {
        let fixture = fixture();
        register_agent(&fixture.store, "wyvern/polecats/toast");
        fixture
            .mux
            .new_session("gt-wyvern-toast", std::path::Path::new("/tmp"))
            .unwrap();
        fixture
            .store
            .register_formula("mega-feature", &["design", "build", "test"]);
        let bead = task(&fixture.store, "gt-u1", "big feature");

        let d = dispatch(&fixture);
        let mut opts = quick_opts();
        opts.formula = Some("mega-feature".into());
        let reports = d
            .sling(&[bead.clone()], Some("wyvern/polecats/toast"), &opts)
            .unwrap();

        let root = &reports[0].hook_target;
        assert_ne!(root, &bead, "hook target must be the wisp root");

        let root_unit = fixture.store.show(root).unwrap();
        assert_eq!(root_unit.status, Status::Hooked);
        assert!(root_unit.depends_on.contains(&bead));
        assert!(root_unit.title.contains("big feature"));

        // The original unit is tracked but not itself hooked.
        assert_eq!(fixture.store.show(&bead).unwrap().status, Status::Open);
    }

    #[test]
    fn polecat_dispatch_auto_attaches_standard_molecule() {
        let fixture = fixture();
        fixture
            .store
            .register_formula(POLECAT_WORK_FORMULA, &["announce", "work", "done"]);
        let bead = task(&fixture.store, "gt-u1", "fix parser");

        let d = dispatch(&fixture);
        let reports = d.sling(&[bead.clone()], Some("wyvern"), &quick_opts()).unwrap();
        assert!(reports[0].spawned);

        let unit = fixture.store.show(&bead).unwrap();
        let molecule = unit.field(slots::ATTACHED_MOLECULE).expect("molecule attached");
        let step = fixture.store.current_step(&molecule).unwrap().unwrap();
        assert_eq!(step.title, "announce");
    }

    #[test]
    fn batch_to_rig_fans_out() {
        let fixture = fixture();
        let a = task(&fixture.store, "gt-u1", "one");
        let b = task(&fixture.store, "gt-u2", "two");

        let d = dispatch(&fixture);
        let reports = d
            .sling(&[a.clone(), b.clone()], Some("wyvern"), &quick_opts())
            .unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.spawned));
        assert_ne!(
            reports[0].agent, reports[1].agent,
            "each unit gets its own polecat"
        );
        assert_eq!(fixture.store.show(&a).unwrap().status, Status::Hooked);
        assert_eq!(fixture.store.show(&b).unwrap().status, Status::Hooked);
    }

    #[test]
    fn dog_dispatch_finds_idle_dog() {
        let fixture = fixture();
        // Dog bead + live session, no hook.
        fixture
            .store
            .create(&CreateOpts {
                id: Some("gt-dog-rex".into()),
                title: "agent: deacon/dogs/rex".into(),
                issue_type: Some(IssueType::Agent),
                ..Default::default()
            })
            .unwrap();
        fixture
            .mux
            .new_session("gt-gastown-dog-rex", std::path::Path::new("/tmp"))
            .unwrap();
        fixture.mux.set_pane_command("gt-gastown-dog-rex", "claude");
        let bead = task(&fixture.store, "gt-u1", "chore");

        let d = dispatch(&fixture);
        let reports = d
            .sling(&[bead.clone()], Some("deacon/dogs"), &quick_opts())
            .unwrap();
        assert_eq!(reports[0].agent.to_string(), "deacon/dogs/rex");
        assert_eq!(
            fixture.store.show(&bead).unwrap().assignee,
            "deacon/dogs/rex"
        );
    }

    #[test]
    fn delegation_records_slot_and_blocks_dep() {
        let fixture = fixture();
        register_agent(&fixture.store, "wyvern/polecats/toast");
        fixture
            .mux
            .new_session("gt-wyvern-toast", std::path::Path::new("/tmp"))
            .unwrap();
        let parent = task(&fixture.store, "gt-p1", "the epic");
        let child = task(&fixture.store, "gt-c1", "one slice");

        let d = dispatch(&fixture);
        let mut opts = quick_opts();
        opts.delegate_from = Some(parent.clone());
        d.sling(&[child.clone()], Some("wyvern/polecats/toast"), &opts)
            .unwrap();

        // Parent blocked by child: credit cascades on completion closure.
        assert!(fixture.store.show(&parent).unwrap().depends_on.contains(&child));

        let slot = fixture
            .store
            .slot_get(&child, slots::DELEGATED_FROM)
            .unwrap()
            .expect("delegation slot written");
        let delegation: Delegation = serde_json::from_str(&slot).unwrap();
        assert_eq!(delegation.parent, parent);
        assert_eq!(delegation.delegated_by, "mayor");
        assert_eq!(delegation.delegated_to, "wyvern/polecats/toast");
    }

    #[test]
    fn busy_dogs_are_skipped() {
        let fixture = fixture();
        fixture
            .store
            .create(&CreateOpts {
                id: Some("gt-dog-rex".into()),
                title: "agent: deacon/dogs/rex".into(),
                issue_type: Some(IssueType::Agent),
                ..Default::default()
            })
            .unwrap();
        fixture
            .store
            .slot_set("gt-dog-rex", slots::HOOK_BEAD, "gt-other")
            .unwrap();
        fixture
            .mux
            .new_session("gt-gastown-dog-rex", std::path::Path::new("/tmp"))
            .unwrap();
        let bead = task(&fixture.store, "gt-u1", "chore");

        let d = dispatch(&fixture);
        let err = d
            .sling(&[bead], Some("deacon/dogs"), &quick_opts())
            .unwrap_err();
        assert!(err.to_string().contains("no idle dog"));
    }
}
