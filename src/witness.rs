//! The witness: per-rig operational manager.
//!
//! The witness owns polecat cleanup. Work flows in as protocol mail —
//! POLECAT_DONE opens a cleanup wisp, MERGED authorizes teardown — and the
//! nuke preflight is deliberately paranoid: a worktree is only removed when
//! the bead says the workspace is clean AND the polecat's last commit is
//! reachable from main on the canonical clone. Everything else escalates
//! to the mayor and leaves the evidence in place.

use crate::address::Address;
use crate::beads::{
    AgentBead, CleanupStatus, CreateOpts, IssueStore, IssueType, ListFilter, MailDraft,
    MailPriority, ProtocolSubject, Status, slots,
};
use crate::config::Town;
use crate::mux::Multiplexer;
use crate::telemetry;
use crate::vcs::Vcs;

/// What the decision table says to do with a polecat workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NukeDecision {
    /// Workspace is clean; teardown authorized.
    Nuke,
    /// Work would be lost; hand to the mayor.
    Escalate,
    /// Unpushed commits; never nuke, escalate RECOVERY_NEEDED.
    EscalateRecovery,
    /// No cleanup report at all: old records predate the field.
    /// Conservative nuke, logged.
    ConservativeNuke,
}

/// Pure decision table over the bead's cleanup_status.
pub const fn decide(cleanup_status: Option<CleanupStatus>) -> NukeDecision {
    match cleanup_status {
        Some(CleanupStatus::Clean) => NukeDecision::Nuke,
        Some(CleanupStatus::HasUncommitted | CleanupStatus::HasStash) => NukeDecision::Escalate,
        Some(CleanupStatus::HasUnpushed) => NukeDecision::EscalateRecovery,
        Some(CleanupStatus::Unknown) | None => NukeDecision::ConservativeNuke,
    }
}

#[derive(Debug, Default)]
pub struct PatrolReport {
    pub surveyed: Vec<String>,
    pub nudged: Vec<String>,
    pub needs_cleanup: Vec<String>,
    pub nuked: Vec<String>,
    pub escalated: Vec<String>,
}

pub struct Witness<'a> {
    pub town: &'a Town,
    pub store: &'a dyn IssueStore,
    pub mux: &'a dyn Multiplexer,
    pub vcs: &'a dyn Vcs,
    pub rig: String,
}

impl Witness<'_> {
    fn polecat_address(&self, name: &str) -> Address {
        Address::Polecat {
            rig: self.rig.clone(),
            name: name.to_string(),
        }
    }

    fn polecat_bead_id(&self, name: &str) -> String {
        self.polecat_address(name)
            .bead_id(&self.town.rig_prefix(&self.rig))
    }

    /// Names of polecats known to this rig: worktree dirs plus agent beads.
    pub fn polecat_names(&self) -> anyhow::Result<Vec<String>> {
        let mut names: Vec<String> = std::fs::read_dir(self.town.rig_dir(&self.rig).join("polecats"))
            .map(|entries| {
                entries
                    .filter_map(std::result::Result::ok)
                    .filter(|e| e.path().is_dir())
                    .filter_map(|e| e.file_name().to_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let marker = format!("-{}-polecat-", self.rig);
        for bead in self.store.list(&ListFilter {
            issue_type: Some(IssueType::Agent),
            ..Default::default()
        })? {
            if bead.status == Status::Closed {
                continue;
            }
            if let Some(idx) = bead.id.find(&marker) {
                let name = bead.id[idx + marker.len()..].to_string();
                if !name.is_empty() && !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// One patrol round: survey every polecat, then process protocol mail.
    pub fn patrol(&self) -> anyhow::Result<PatrolReport> {
        let mut report = PatrolReport::default();
        for name in self.polecat_names()? {
            self.survey(&name, &mut report)?;
        }
        self.process_mail(&mut report)?;
        Ok(report)
    }

    fn survey(&self, name: &str, report: &mut PatrolReport) -> anyhow::Result<()> {
        report.surveyed.push(name.to_string());
        let bead_id = self.polecat_bead_id(name);
        let bead = match self.store.show(&bead_id) {
            Ok(unit) => AgentBead::from_unit(&unit),
            Err(crate::beads::StoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let address = self.polecat_address(name);
        let session = address.session_name(&self.town.config.name);
        let alive = self.mux.has_session(&session).unwrap_or(false);

        // A "working" polecat with no session died mid-flight.
        if !alive && bead.agent_state == Some(crate::beads::AgentState::Working) {
            report.needs_cleanup.push(name.to_string());
            return Ok(());
        }

        // No cleanliness report yet: ask for one.
        if alive && bead.cleanup_status.is_none() {
            let draft = MailDraft {
                to: address.to_string(),
                subject: ProtocolSubject::HealthCheck.subject(),
                body: "report cleanup_status on your agent bead".to_string(),
                priority: MailPriority::Normal,
            };
            if let Err(e) = self.store.mail_send(&draft) {
                tracing::warn!(polecat = name, error = %e, "health nudge failed");
            } else {
                report.nudged.push(name.to_string());
            }
        }
        Ok(())
    }

    fn process_mail(&self, report: &mut PatrolReport) -> anyhow::Result<()> {
        for message in self.store.mail_inbox(true)? {
            match ProtocolSubject::parse(&message.subject) {
                Some(ProtocolSubject::PolecatDone { name }) => {
                    self.open_cleanup_wisp(&name)?;
                    self.store.mail_ack(&message.id)?;
                }
                Some(ProtocolSubject::Merged { name }) => {
                    self.handle_merged(&name, report)?;
                    self.store.mail_ack(&message.id)?;
                }
                Some(ProtocolSubject::LifecycleShutdown { name }) => {
                    report.needs_cleanup.push(name);
                    self.store.mail_ack(&message.id)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// POLECAT_DONE: record that this polecat is waiting on its merge.
    pub fn open_cleanup_wisp(&self, name: &str) -> anyhow::Result<String> {
        if let Some(existing) = self.find_cleanup_wisp(name)? {
            return Ok(existing);
        }
        let wisp = self.store.create(&CreateOpts {
            title: format!("cleanup: {}/{name}", self.rig),
            description: "teardown after merge confirmation".to_string(),
            issue_type: Some(IssueType::Task),
            labels: vec![format!("polecat:{name}"), "state:merge-requested".to_string()],
            ..Default::default()
        })?;
        Ok(wisp.id)
    }

    fn find_cleanup_wisp(&self, name: &str) -> anyhow::Result<Option<String>> {
        let open = self.store.list(&ListFilter {
            status: Some(Status::Open),
            label: Some(format!("polecat:{name}")),
            ..Default::default()
        })?;
        Ok(open
            .into_iter()
            .find(|u| u.labels.iter().any(|l| l == "state:merge-requested"))
            .map(|u| u.id))
    }

    /// MERGED: verify, then either nuke or escalate. The nuke preflight:
    /// the polecat's HEAD must be an ancestor of main on the canonical
    /// clone, and the bead must say the workspace is clean.
    pub fn handle_merged(&self, name: &str, report: &mut PatrolReport) -> anyhow::Result<()> {
        let bead_id = self.polecat_bead_id(name);
        let bead = match self.store.show(&bead_id) {
            Ok(unit) => AgentBead::from_unit(&unit),
            Err(crate::beads::StoreError::NotFound(_)) => {
                tracing::warn!(polecat = name, "MERGED for unknown polecat");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let workdir = self.town.polecat_dir(&self.rig, name);
        let clone = self.town.rig_clone(&self.rig);

        let on_main = match self.vcs.rev(&workdir, "HEAD") {
            Ok(head) => self.vcs.is_ancestor(&clone, &head, "main").unwrap_or(false),
            Err(e) => {
                tracing::warn!(polecat = name, error = %e, "cannot read polecat HEAD");
                false
            }
        };

        let decision = decide(bead.cleanup_status);
        let authorized = match decision {
            NukeDecision::Nuke | NukeDecision::ConservativeNuke => on_main,
            NukeDecision::Escalate | NukeDecision::EscalateRecovery => false,
        };

        if authorized {
            if decision == NukeDecision::ConservativeNuke {
                tracing::warn!(polecat = name, "no cleanup_status on bead; conservative nuke");
            }
            self.nuke(name)?;
            report.nuked.push(name.to_string());
        } else {
            self.escalate(name, &bead, on_main)?;
            report.escalated.push(name.to_string());
        }
        Ok(())
    }

    fn escalate(&self, name: &str, bead: &AgentBead, on_main: bool) -> anyhow::Result<()> {
        let target = format!("{}/{name}", self.rig);
        let status = bead
            .cleanup_status
            .map_or("missing", CleanupStatus::as_str);
        let draft = MailDraft {
            to: Address::Mayor.to_string(),
            subject: ProtocolSubject::RecoveryNeeded {
                target: target.clone(),
            }
            .subject(),
            body: format!(
                "refusing to nuke {target}: cleanup_status={status}, \
                 head_on_main={on_main}; workspace and branch left untouched"
            ),
            priority: MailPriority::Urgent,
        };
        self.store.mail_send(&draft)?;
        telemetry::emit_event(
            "escalation",
            self.store.actor(),
            serde_json::json!({"polecat": target, "cleanup_status": status}),
        );
        Ok(())
    }

    /// Tear a polecat down: worktree, branch, cleanup wisp, agent bead,
    /// session. Callers are responsible for the preflight.
    pub fn nuke(&self, name: &str) -> anyhow::Result<()> {
        let clone = self.town.rig_clone(&self.rig);
        let workdir = self.town.polecat_dir(&self.rig, name);
        let address = self.polecat_address(name);

        let session = address.session_name(&self.town.config.name);
        if self.mux.has_session(&session).unwrap_or(false)
            && let Err(e) = self.mux.kill_session(&session)
        {
            tracing::warn!(polecat = name, error = %e, "session kill failed");
        }

        self.vcs.worktree_remove(&clone, &workdir, true)?;
        if let Err(e) = self.vcs.branch_delete(&clone, &format!("polecat/{name}"), true) {
            tracing::warn!(polecat = name, error = %e, "branch delete failed");
        }

        if let Some(wisp) = self.find_cleanup_wisp(name)? {
            self.store.close(&[wisp], Some("polecat nuked"))?;
        }
        let bead_id = self.polecat_bead_id(name);
        if self.store.show(&bead_id).is_ok() {
            self.store.close(&[bead_id], Some("polecat nuked"))?;
        }

        telemetry::emit_event(
            "nuke",
            self.store.actor(),
            serde_json::json!({"polecat": format!("{}/{name}", self.rig)}),
        );
        Ok(())
    }
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
        std::fs::create_dir_all(dir.path().join("wyvern/mayor/rig")).unwrap();
        let town = Town::discover(dir.path()).unwrap();
        Fixture {
            _dir: dir,
            town,
            store: FakeStore::new("gt").as_actor("wyvern/witness"),
            mux: FakeMux::new(),
            vcs: FakeVcs::new(),
        }
    }

    fn witness(fixture: &Fixture) -> Witness<'_> {
        Witness {
            town: &fixture.town,
            store: &fixture.store,
            mux: &fixture.mux,
            vcs: &fixture.vcs,
            rig: "wyvern".into(),
        }
    }

    /// A polecat with a worktree, branch, and agent bead.
    fn install_polecat(fixture: &Fixture, name: &str, cleanup_status: Option<&str>) {
        let workdir = fixture.town.polecat_dir("wyvern", name);
        std::fs::create_dir_all(&workdir).unwrap();
        fixture
            .vcs
            .worktree_add(
                &fixture.town.rig_clone("wyvern"),
                &workdir,
                &format!("polecat/{name}"),
            )
            .unwrap();
        let bead_id = format!("gt-wyvern-polecat-{name}");
        fixture
            .store
            .create(&CreateOpts {
                id: Some(bead_id.clone()),
                title: format!("agent: wyvern/polecats/{name}"),
                issue_type: Some(IssueType::Agent),
                ..Default::default()
            })
            .unwrap();
        if let Some(status) = cleanup_status {
            fixture
                .store
                .slot_set(&bead_id, slots::CLEANUP_STATUS, status)
                .unwrap();
        }
    }

    #[test]
    fn decision_table() {
        assert_eq!(decide(Some(CleanupStatus::Clean)), NukeDecision::Nuke);
        assert_eq!(
            decide(Some(CleanupStatus::HasUncommitted)),
            NukeDecision::Escalate
        );
        assert_eq!(decide(Some(CleanupStatus::HasStash)), NukeDecision::Escalate);
        assert_eq!(
            decide(Some(CleanupStatus::HasUnpushed)),
            NukeDecision::EscalateRecovery
        );
        assert_eq!(
            decide(Some(CleanupStatus::Unknown)),
            NukeDecision::ConservativeNuke
        );
        assert_eq!(decide(None), NukeDecision::ConservativeNuke);
    }

    #[test]
    fn merged_clean_polecat_is_nuked() {
        let fixture = fixture();
        install_polecat(&fixture, "toast", Some("clean"));
        fixture.vcs.set_rev("HEAD", "abc123");
        fixture.vcs.set_ancestor("abc123", "main");

        let w = witness(&fixture);
        let wisp = w.open_cleanup_wisp("toast").unwrap();

        let mut report = PatrolReport::default();
        w.handle_merged("toast", &mut report).unwrap();
        assert_eq!(report.nuked, vec!["toast"]);

        assert!(!fixture.vcs.has_worktree(&fixture.town.polecat_dir("wyvern", "toast")));
        assert!(!fixture.vcs.has_branch("polecat/toast"));
        assert_eq!(
            fixture.store.show(&wisp).unwrap().status,
            Status::Closed
        );
        assert_eq!(
            fixture
                .store
                .show("gt-wyvern-polecat-toast")
                .unwrap()
                .status,
            Status::Closed
        );
    }

    #[test]
    fn merged_with_unpushed_escalates_and_preserves_everything() {
        let fixture = fixture();
        install_polecat(&fixture, "toast", Some("has_unpushed"));
        fixture.vcs.set_rev("HEAD", "abc123");
        fixture.vcs.set_ancestor("abc123", "main");

        let w = witness(&fixture);
        let wisp = w.open_cleanup_wisp("toast").unwrap();

        let mut report = PatrolReport::default();
        w.handle_merged("toast", &mut report).unwrap();
        assert_eq!(report.escalated, vec!["toast"]);
        assert!(report.nuked.is_empty());

        // Workspace and branch untouched, wisp still open.
        assert!(fixture.vcs.has_worktree(&fixture.town.polecat_dir("wyvern", "toast")));
        assert!(fixture.vcs.has_branch("polecat/toast"));
        assert_eq!(fixture.store.show(&wisp).unwrap().status, Status::Open);

        // RECOVERY_NEEDED mail to the mayor.
        let mail = fixture.store.all_mail();
        assert_eq!(mail.len(), 1);
        assert_eq!(mail[0].to, "mayor");
        assert!(mail[0].subject.contains("RECOVERY_NEEDED wyvern/toast"));
    }

    #[test]
    fn merged_clean_but_not_on_main_escalates() {
        let fixture = fixture();
        install_polecat(&fixture, "toast", Some("clean"));
        fixture.vcs.set_rev("HEAD", "abc123");
        // No ancestry fact: HEAD is not on main.

        let w = witness(&fixture);
        let mut report = PatrolReport::default();
        w.handle_merged("toast", &mut report).unwrap();
        assert_eq!(report.escalated, vec!["toast"]);
        assert!(fixture.vcs.has_worktree(&fixture.town.polecat_dir("wyvern", "toast")));
    }

    #[test]
    fn merged_without_cleanup_status_nukes_conservatively() {
        let fixture = fixture();
        install_polecat(&fixture, "toast", None);
        fixture.vcs.set_rev("HEAD", "abc123");
        fixture.vcs.set_ancestor("abc123", "main");

        let w = witness(&fixture);
        let mut report = PatrolReport::default();
        w.handle_merged("toast", &mut report).unwrap();
        assert_eq!(report.nuked, vec!["toast"]);
    }

    #[test]
    fn polecat_done_mail_opens_cleanup_wisp() {
        let fixture = fixture();
        install_polecat(&fixture, "toast", Some("clean"));
        let polecat = fixture.store.as_actor("wyvern/polecats/toast");
        polecat
            .mail_send(&MailDraft {
                to: "wyvern/witness".into(),
                subject: ProtocolSubject::PolecatDone {
                    name: "toast".into(),
                }
                .subject(),
                body: String::new(),
                priority: MailPriority::Normal,
            })
            .unwrap();

        let w = witness(&fixture);
        let report = w.patrol().unwrap();
        assert!(report.surveyed.contains(&"toast".to_string()));

        let wisp = w.find_cleanup_wisp("toast").unwrap();
        assert!(wisp.is_some());

        // Mail is acked: a second patrol does not duplicate the wisp.
        let first = wisp.unwrap();
        w.patrol().unwrap();
        assert_eq!(w.find_cleanup_wisp("toast").unwrap(), Some(first));
    }

    #[test]
    fn dead_working_polecat_flagged_for_cleanup() {
        let fixture = fixture();
        install_polecat(&fixture, "toast", None);
        fixture
            .store
            .slot_set("gt-wyvern-polecat-toast", slots::AGENT_STATE, "working")
            .unwrap();
        // No session exists.

        let report = witness(&fixture).patrol().unwrap();
        assert_eq!(report.needs_cleanup, vec!["toast"]);
    }

    #[test]
    fn live_polecat_without_cleanup_status_is_nudged() {
        let fixture = fixture();
        install_polecat(&fixture, "toast", None);
        fixture
            .mux
            .new_session("gt-wyvern-toast", std::path::Path::new("/tmp"))
            .unwrap();

        let report = witness(&fixture).patrol().unwrap();
        assert_eq!(report.nudged, vec!["toast"]);

        let inbox = fixture
            .store
            .as_actor("wyvern/polecats/toast")
            .mail_inbox(true)
            .unwrap();
        assert_eq!(inbox.len(), 1);
        assert!(inbox[0].subject.starts_with("HEALTH_CHECK"));
    }
}
