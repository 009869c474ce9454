//! The startup protocol.
//!
//! Prime runs on every session start — startup, resume, clear, compact —
//! and must be idempotent. It turns a stateless LLM session into a
//! deterministic resumption: read the hook, print the current step, tell
//! the agent to run it. No prompting, no waiting.

use std::io::Read;
use std::path::Path;

use clap::Args;

use super::Invocation;
use crate::address::Address;
use crate::beads::{IssueStore, ListFilter, Status, StoreError, slots};
use crate::checkpoint;
use crate::config::Town;
use crate::hook::Hooks;
use crate::identity::Identity;
use crate::telemetry;
use crate::template;

#[derive(Debug, Args)]
pub struct PrimeArgs {
    /// Runtime-hook mode: read the session envelope from stdin.
    #[arg(long)]
    pub hook: bool,
}

/// Session metadata from the runtime's SessionStart hook.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    #[serde(default)]
    pub source: Option<String>,
}

impl PrimeArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let invocation = Invocation::resolve()?;
        invocation.warn_on_mismatch();

        let meta = session_meta(self.hook);
        persist_session_id(&invocation.cwd, &meta.session_id);

        // Workers hold the identity lock for the life of the workspace.
        if invocation.identity.address.is_worker() {
            crate::identity::acquire_lock(
                &invocation.cwd,
                &invocation.identity.address.to_string(),
                &meta.session_id,
            )?;
        }

        ensure_worktree_redirect(&invocation.town, &invocation.identity, &invocation.cwd);

        telemetry::emit_event(
            "session_start",
            &invocation.identity.address.to_string(),
            serde_json::json!({
                "session": meta.session_id,
                "source": meta.source,
            }),
        );

        let store = invocation.store();
        let output = render(
            &invocation.town,
            &invocation.identity,
            &store,
            &invocation.cwd,
            &meta,
        )?;
        println!("{}", termimad::term_text(&output));
        Ok(())
    }
}

/// Resolve the session id: stdin envelope, then env, then generated.
fn session_meta(hook_mode: bool) -> SessionMeta {
    if hook_mode {
        let mut buffer = String::new();
        if std::io::stdin().read_to_string(&mut buffer).is_ok()
            && let Ok(meta) = serde_json::from_str::<SessionMeta>(&buffer)
        {
            return meta;
        }
    }
    for var in ["GT_SESSION_ID", "CLAUDE_SESSION_ID"] {
        if let Ok(id) = std::env::var(var)
            && !id.is_empty()
        {
            return SessionMeta {
                session_id: id,
                source: None,
            };
        }
    }
    SessionMeta {
        session_id: format!(
            "{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_millis()
        ),
        source: None,
    }
}

fn persist_session_id(workdir: &Path, session_id: &str) {
    let runtime_dir = workdir.join(".runtime");
    if let Err(e) = std::fs::create_dir_all(&runtime_dir)
        .and_then(|()| std::fs::write(runtime_dir.join("session_id"), session_id))
    {
        tracing::warn!(error = %e, "could not persist session id");
    }
}

/// Worktree-based roles need the redirect so bd hits the rig store.
/// Non-fatal: a broken redirect is a doctor problem, not a prime problem.
fn ensure_worktree_redirect(town: &Town, identity: &Identity, workdir: &Path) {
    let Address::Polecat { rig, .. } = &identity.address else {
        return;
    };
    if workdir.join(".beads").join("redirect").is_file() {
        return;
    }
    let canonical = town.rig_clone(rig).join(".beads");
    if let Err(e) = crate::beads::redirect::ensure(workdir, &canonical) {
        tracing::warn!(error = %e, "could not write beads redirect");
    }
}

/// Assemble the full prime output. Pure against the store trait.
pub fn render(
    town: &Town,
    identity: &Identity,
    store: &dyn IssueStore,
    workdir: &Path,
    meta: &SessionMeta,
) -> anyhow::Result<String> {
    let mut out = String::new();
    let address = &identity.address;

    out.push_str(&format!(
        "[GAS TOWN] role:{address} pid:{} session:{}\n\n",
        std::process::id(),
        meta.session_id
    ));

    // Hook discovery first: it decides how the role block reads.
    let hooks = Hooks::new(store);
    let hooked = hooks.discover(address, &identity.bead_id)?;

    out.push_str(&template::render_role(
        address,
        &town.config.name,
        hooked.is_some(),
    )?);
    out.push('\n');

    if let Some(ref unit) = hooked {
        let step = match unit.field(slots::ATTACHED_MOLECULE) {
            Some(molecule) => store.current_step(&molecule)?,
            None => None,
        };
        out.push_str(&template::render_work_mode(
            &unit.id,
            &unit.title,
            step.as_ref(),
        )?);
        out.push('\n');
    }

    if let Some(cp) = checkpoint::load_fresh(workdir) {
        out.push_str(&cp.render());
        out.push('\n');
    }

    // The store's own workflow context, verbatim.
    match store.prime_context() {
        Ok(context) if !context.trim().is_empty() => {
            out.push_str(&context);
            out.push('\n');
        }
        Ok(_) => {}
        Err(StoreError::NotInstalled | StoreError::NotARepo(_)) => {}
        Err(e) => tracing::warn!(error = %e, "store prime context failed"),
    }

    // Mail injection: dump unread mail into the context.
    match store.mail_inbox(true) {
        Ok(inbox) if !inbox.is_empty() => {
            out.push_str(&format!("## MAIL ({} unread)\n\n", inbox.len()));
            for message in &inbox {
                out.push_str(&format!(
                    "- [{}] {} — from {}\n",
                    message.priority, message.subject, message.from
                ));
            }
            out.push('\n');
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "mail inject failed"),
    }

    if matches!(address, Address::Mayor) {
        out.push_str(&escalation_block(store)?);
    }

    Ok(out)
}

/// Open escalations, rendered loudly for the mayor.
fn escalation_block(store: &dyn IssueStore) -> anyhow::Result<String> {
    let escalations = store.list(&ListFilter {
        status: Some(Status::Open),
        label: Some("escalation".to_string()),
        ..Default::default()
    })?;
    if escalations.is_empty() {
        return Ok(String::new());
    }
    let mut out = String::from("## ⚠ OPEN ESCALATIONS\n\n");
    for unit in &escalations {
        out.push_str(&format!("- {}: {}\n", unit.id, unit.title));
    }
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beads::{CreateOpts, FakeStore, IssueType, Patch};

    struct Fixture {
        _dir: tempfile::TempDir,
        town: Town,
        workdir: std::path::PathBuf,
        store: FakeStore,
        identity: Identity,
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
        let town = Town::discover(dir.path()).unwrap();
        let workdir = dir.path().join("wyvern/polecats/toast");
        std::fs::create_dir_all(&workdir).unwrap();

        let address: Address = "wyvern/polecats/toast".parse().unwrap();
        let bead_id = address.bead_id("gt");
        let store = FakeStore::new("gt").as_actor("wyvern/polecats/toast");
        store
            .create(&CreateOpts {
                id: Some(bead_id.clone()),
                title: "agent: wyvern/polecats/toast".into(),
                issue_type: Some(IssueType::Agent),
                ..Default::default()
            })
            .unwrap();

        Fixture {
            _dir: dir,
            town,
            workdir,
            store,
            identity: Identity {
                address,
                bead_id,
                mismatch: None,
            },
        }
    }

    fn meta() -> SessionMeta {
        SessionMeta {
            session_id: "sess-1".into(),
            source: Some("startup".into()),
        }
    }

    fn hook_unit(fixture: &Fixture, id: &str, title: &str) {
        fixture
            .store
            .create(&CreateOpts {
                id: Some(id.to_string()),
                title: title.to_string(),
                ..Default::default()
            })
            .unwrap();
        fixture
            .store
            .update(
                id,
                &Patch {
                    status: Some(Status::Hooked),
                    assignee: Some("wyvern/polecats/toast".into()),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn no_hook_prints_role_and_mail_directive() {
        let fixture = fixture();
        let out = render(
            &fixture.town,
            &fixture.identity,
            &fixture.store,
            &fixture.workdir,
            &meta(),
        )
        .unwrap();
        assert!(out.contains("[GAS TOWN] role:wyvern/polecats/toast"));
        assert!(out.contains("session:sess-1"));
        assert!(out.contains("POLECAT toast"));
        assert!(!out.contains("AUTONOMOUS WORK MODE"));
    }

    #[test]
    fn hooked_unit_triggers_work_mode_block() {
        let fixture = fixture();
        hook_unit(&fixture, "gt-u1", "fix the parser");

        let out = render(
            &fixture.town,
            &fixture.identity,
            &fixture.store,
            &fixture.workdir,
            &meta(),
        )
        .unwrap();
        assert!(out.contains("AUTONOMOUS WORK MODE"));
        assert!(out.contains("gt-u1"));
        assert!(out.contains("bd show gt-u1"));
    }

    #[test]
    fn attached_molecule_renders_next_step() {
        let fixture = fixture();
        fixture.store.register_formula("work", &["plan", "build"]);
        let wisp = fixture.store.wisp("work", &[]).unwrap();
        hook_unit(&fixture, "gt-u1", "fix the parser");
        fixture
            .store
            .slot_set("gt-u1", slots::ATTACHED_MOLECULE, &wisp.root)
            .unwrap();

        let out = render(
            &fixture.town,
            &fixture.identity,
            &fixture.store,
            &fixture.workdir,
            &meta(),
        )
        .unwrap();
        assert!(out.contains(&wisp.steps[0]), "next step id must be emitted");
        assert!(out.contains("EXECUTE THIS STEP NOW"));
        assert!(out.contains("0/2"));
    }

    #[test]
    fn in_progress_fallback_is_discovered() {
        let fixture = fixture();
        fixture
            .store
            .create(&CreateOpts {
                id: Some("gt-u9".into()),
                title: "interrupted work".into(),
                ..Default::default()
            })
            .unwrap();
        fixture
            .store
            .update(
                "gt-u9",
                &Patch {
                    status: Some(Status::InProgress),
                    assignee: Some("wyvern/polecats/toast".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let out = render(
            &fixture.town,
            &fixture.identity,
            &fixture.store,
            &fixture.workdir,
            &meta(),
        )
        .unwrap();
        assert!(out.contains("AUTONOMOUS WORK MODE"));
        assert!(out.contains("gt-u9"));
    }

    #[test]
    fn render_is_idempotent() {
        let fixture = fixture();
        hook_unit(&fixture, "gt-u1", "fix the parser");

        let first = render(
            &fixture.town,
            &fixture.identity,
            &fixture.store,
            &fixture.workdir,
            &meta(),
        )
        .unwrap();
        let second = render(
            &fixture.town,
            &fixture.identity,
            &fixture.store,
            &fixture.workdir,
            &meta(),
        )
        .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unread_mail_is_injected() {
        let fixture = fixture();
        fixture
            .store
            .as_actor("wyvern/witness")
            .mail_send(&crate::beads::MailDraft {
                to: "wyvern/polecats/toast".into(),
                subject: "HEALTH_CHECK: ping".into(),
                body: String::new(),
                priority: crate::beads::MailPriority::High,
            })
            .unwrap();

        let out = render(
            &fixture.town,
            &fixture.identity,
            &fixture.store,
            &fixture.workdir,
            &meta(),
        )
        .unwrap();
        assert!(out.contains("MAIL (1 unread)"));
        assert!(out.contains("HEALTH_CHECK"));
    }

    #[test]
    fn mayor_sees_escalations() {
        let fixture = fixture();
        let mayor_identity = Identity {
            address: Address::Mayor,
            bead_id: "gt-mayor".into(),
            mismatch: None,
        };
        fixture
            .store
            .create(&CreateOpts {
                id: Some("gt-mayor".into()),
                title: "agent: mayor".into(),
                issue_type: Some(IssueType::Agent),
                ..Default::default()
            })
            .unwrap();
        fixture
            .store
            .create(&CreateOpts {
                id: Some("gt-esc1".into()),
                title: "polecat toast needs recovery".into(),
                labels: vec!["escalation".into()],
                ..Default::default()
            })
            .unwrap();

        let mayor_store = fixture.store.as_actor("mayor");
        let out = render(
            &fixture.town,
            &mayor_identity,
            &mayor_store,
            &fixture.workdir,
            &meta(),
        )
        .unwrap();
        assert!(out.contains("OPEN ESCALATIONS"));
        assert!(out.contains("gt-esc1"));
    }

    #[test]
    fn fresh_checkpoint_is_displayed() {
        let fixture = fixture();
        let cp_dir = fixture.workdir.join(".runtime");
        std::fs::create_dir_all(&cp_dir).unwrap();
        std::fs::write(
            cp_dir.join("checkpoint.json"),
            serde_json::json!({
                "step_title": "halfway through the parser",
                "updated_at": chrono::Utc::now().to_rfc3339(),
            })
            .to_string(),
        )
        .unwrap();

        let out = render(
            &fixture.town,
            &fixture.identity,
            &fixture.store,
            &fixture.workdir,
            &meta(),
        )
        .unwrap();
        assert!(out.contains("RECOVERED CHECKPOINT"));
        assert!(out.contains("halfway through the parser"));
    }
}
