//! Deterministic in-memory issue store for tests.
//!
//! Shares one state between any number of actor handles so a test can play
//! dispatcher, witness, and polecat against the same store. Timestamps are
//! a monotonic sequence, not wall-clock, so assertions stay deterministic.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::issue::{IssueType, Status, WorkUnit};
use super::mail::{MailDraft, MailMessage};
use super::{
    CreateOpts, IssueStore, ListFilter, Patch, Result, StepInfo, StoreError, StoreStats, Wisp,
};

#[derive(Debug, Default)]
struct State {
    prefix: String,
    seq: u64,
    units: BTreeMap<String, WorkUnit>,
    mail: Vec<MailMessage>,
    formulas: BTreeMap<String, Vec<String>>,
    prime_output: String,
}

impl State {
    fn next_ts(&mut self) -> String {
        self.seq += 1;
        format!("ts-{:06}", self.seq)
    }

    fn next_id(&mut self) -> String {
        self.seq += 1;
        format!("{}-{}", self.prefix, self.seq)
    }
}

/// In-memory [`IssueStore`] handle bound to one actor.
#[derive(Clone)]
pub struct FakeStore {
    state: Arc<Mutex<State>>,
    actor: String,
}

impl FakeStore {
    pub fn new(prefix: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                prefix: prefix.to_string(),
                ..State::default()
            })),
            actor: "test".to_string(),
        }
    }

    /// Another handle to the same store, acting as someone else.
    #[must_use]
    pub fn as_actor(&self, actor: &str) -> Self {
        Self {
            state: Arc::clone(&self.state),
            actor: actor.to_string(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }

    /// Register a formula so `wisp` can instantiate it.
    pub fn register_formula(&self, name: &str, step_titles: &[&str]) {
        self.lock().formulas.insert(
            name.to_string(),
            step_titles.iter().map(|s| (*s).to_string()).collect(),
        );
    }

    pub fn set_prime_output(&self, output: &str) {
        self.lock().prime_output = output.to_string();
    }

    /// Direct read for assertions.
    pub fn unit(&self, id: &str) -> Option<WorkUnit> {
        self.lock().units.get(id).cloned()
    }

    /// Bump a unit's updated_at (simulates agent activity).
    pub fn touch(&self, id: &str) {
        let mut state = self.lock();
        let ts = state.next_ts();
        if let Some(unit) = state.units.get_mut(id) {
            unit.updated_at = Some(ts);
        }
    }

    /// Every message ever sent, for assertions.
    pub fn all_mail(&self) -> Vec<MailMessage> {
        self.lock().mail.clone()
    }

    /// Fingerprint of all units, for the dry-run "no mutation" law.
    pub fn fingerprint(&self) -> String {
        let state = self.lock();
        let mut out = String::new();
        for (id, unit) in &state.units {
            out.push_str(&format!(
                "{id}|{}|{}|{:?}\n",
                unit.status, unit.assignee, unit.slots
            ));
        }
        out
    }

    fn step_children(state: &State, molecule: &str) -> Vec<WorkUnit> {
        let mut steps: Vec<WorkUnit> = state
            .units
            .values()
            .filter(|u| u.parent.as_deref() == Some(molecule))
            .cloned()
            .collect();
        steps.sort_by(|a, b| a.id.cmp(&b.id));
        steps
    }
}

impl IssueStore for FakeStore {
    fn list(&self, filter: &ListFilter) -> Result<Vec<WorkUnit>> {
        let state = self.lock();
        Ok(state
            .units
            .values()
            .filter(|u| filter.status.is_none_or(|s| u.status == s))
            .filter(|u| filter.issue_type.is_none_or(|t| u.issue_type == t))
            .filter(|u| {
                filter
                    .assignee
                    .as_ref()
                    .is_none_or(|a| &u.assignee == a)
            })
            .filter(|u| {
                filter
                    .label
                    .as_ref()
                    .is_none_or(|l| u.labels.contains(l))
            })
            .cloned()
            .collect())
    }

    fn show(&self, id: &str) -> Result<WorkUnit> {
        self.lock()
            .units
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn ready(&self, issue_type: Option<IssueType>) -> Result<Vec<WorkUnit>> {
        let state = self.lock();
        Ok(state
            .units
            .values()
            .filter(|u| u.status == Status::Open)
            .filter(|u| issue_type.is_none_or(|t| u.issue_type == t))
            .filter(|u| {
                u.depends_on.iter().all(|dep| {
                    state
                        .units
                        .get(dep)
                        .is_none_or(|d| d.status == Status::Closed)
                })
            })
            .cloned()
            .collect())
    }

    fn create(&self, opts: &CreateOpts) -> Result<WorkUnit> {
        let mut state = self.lock();
        let id = opts.id.clone().unwrap_or_else(|| state.next_id());
        if state.units.contains_key(&id) {
            return Err(StoreError::Generic {
                command: "create".into(),
                stderr: format!("duplicate id {id}"),
            });
        }
        let ts = state.next_ts();
        let unit = WorkUnit {
            id: id.clone(),
            title: opts.title.clone(),
            description: opts.description.clone(),
            status: Status::Open,
            priority: opts.priority.unwrap_or(2),
            issue_type: opts.issue_type.unwrap_or(IssueType::Task),
            assignee: opts.assignee.clone().unwrap_or_default(),
            parent: opts.parent.clone(),
            depends_on: vec![],
            blocks: vec![],
            tracks: vec![],
            slots: BTreeMap::new(),
            labels: opts.labels.clone(),
            created_at: Some(ts.clone()),
            updated_at: Some(ts),
            closed_at: None,
        };
        state.units.insert(id, unit.clone());
        Ok(unit)
    }

    fn update(&self, id: &str, patch: &Patch) -> Result<()> {
        let mut state = self.lock();
        let ts = state.next_ts();
        let unit = state
            .units
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if let Some(status) = patch.status {
            unit.status = status;
        }
        if let Some(ref assignee) = patch.assignee {
            unit.assignee = assignee.clone();
        }
        if let Some(priority) = patch.priority {
            unit.priority = priority;
        }
        if let Some(ref title) = patch.title {
            unit.title = title.clone();
        }
        if let Some(ref description) = patch.description {
            unit.description = description.clone();
        }
        unit.updated_at = Some(ts);
        Ok(())
    }

    fn close(&self, ids: &[String], _reason: Option<&str>) -> Result<()> {
        let mut state = self.lock();
        for id in ids {
            if !state.units.contains_key(id) {
                return Err(StoreError::NotFound(id.clone()));
            }
        }
        for id in ids {
            let ts = state.next_ts();
            if let Some(unit) = state.units.get_mut(id) {
                unit.status = Status::Closed;
                unit.closed_at = Some(ts.clone());
                unit.updated_at = Some(ts);
            }
        }
        Ok(())
    }

    fn release(&self, id: &str, _reason: Option<&str>) -> Result<()> {
        let mut state = self.lock();
        let ts = state.next_ts();
        let unit = state
            .units
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        unit.status = Status::Open;
        unit.assignee.clear();
        unit.updated_at = Some(ts);
        Ok(())
    }

    fn add_dep(&self, issue: &str, depends_on: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.units.contains_key(issue) {
            return Err(StoreError::NotFound(issue.to_string()));
        }
        if let Some(unit) = state.units.get_mut(issue)
            && !unit.depends_on.contains(&depends_on.to_string())
        {
            unit.depends_on.push(depends_on.to_string());
        }
        if let Some(dep) = state.units.get_mut(depends_on)
            && !dep.blocks.contains(&issue.to_string())
        {
            dep.blocks.push(issue.to_string());
        }
        Ok(())
    }

    fn remove_dep(&self, issue: &str, depends_on: &str) -> Result<()> {
        let mut state = self.lock();
        if let Some(unit) = state.units.get_mut(issue) {
            unit.depends_on.retain(|d| d != depends_on);
        }
        if let Some(dep) = state.units.get_mut(depends_on) {
            dep.blocks.retain(|b| b != issue);
        }
        Ok(())
    }

    fn add_tracks(&self, tracker: &str, tracked: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.units.contains_key(tracked) {
            return Err(StoreError::NotFound(tracked.to_string()));
        }
        let unit = state
            .units
            .get_mut(tracker)
            .ok_or_else(|| StoreError::NotFound(tracker.to_string()))?;
        if !unit.tracks.contains(&tracked.to_string()) {
            unit.tracks.push(tracked.to_string());
        }
        Ok(())
    }

    fn slot_set(&self, id: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.lock();
        let ts = state.next_ts();
        let unit = state
            .units
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        unit.slots.insert(key.to_string(), value.to_string());
        unit.updated_at = Some(ts);
        Ok(())
    }

    fn slot_get(&self, id: &str, key: &str) -> Result<Option<String>> {
        let state = self.lock();
        let unit = state
            .units
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(unit.slots.get(key).filter(|v| !v.is_empty()).cloned())
    }

    fn slot_clear(&self, id: &str, key: &str) -> Result<()> {
        let mut state = self.lock();
        let ts = state.next_ts();
        let unit = state
            .units
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        unit.slots.remove(key);
        unit.updated_at = Some(ts);
        Ok(())
    }

    fn mail_send(&self, draft: &MailDraft) -> Result<()> {
        let mut state = self.lock();
        let ts = state.next_ts();
        let id = format!("{}-m{}", state.prefix, state.seq);
        let message = MailMessage {
            id,
            to: draft.to.clone(),
            from: self.actor.clone(),
            subject: draft.subject.clone(),
            body: draft.body.clone(),
            priority: draft.priority,
            kind: Some("message".to_string()),
            timestamp: Some(ts),
            read: false,
        };
        state.mail.push(message);
        Ok(())
    }

    fn mail_inbox(&self, unread_only: bool) -> Result<Vec<MailMessage>> {
        let state = self.lock();
        let me = self.actor.trim_end_matches('/');
        Ok(state
            .mail
            .iter()
            .filter(|m| m.to.trim_end_matches('/') == me)
            .filter(|m| !unread_only || !m.read)
            .cloned()
            .collect())
    }

    fn mail_read(&self, id: &str) -> Result<MailMessage> {
        let mut state = self.lock();
        let message = state
            .mail
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        message.read = true;
        Ok(message.clone())
    }

    fn mail_ack(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        let message = state
            .mail
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        message.read = true;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn sync_from_main(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> Result<StoreStats> {
        let state = self.lock();
        let mut stats = StoreStats::default();
        for unit in state.units.values() {
            match unit.status {
                Status::Open | Status::Pinned => stats.open += 1,
                Status::InProgress => stats.in_progress += 1,
                Status::Hooked => stats.hooked += 1,
                Status::Closed => stats.closed += 1,
            }
        }
        Ok(stats)
    }

    fn cook(&self, formula: &str) -> Result<String> {
        let state = self.lock();
        if state.formulas.contains_key(formula) {
            Ok(formula.to_string())
        } else {
            Err(StoreError::NotFound(format!("formula {formula}")))
        }
    }

    fn wisp(&self, formula: &str, vars: &[(String, String)]) -> Result<Wisp> {
        let mut state = self.lock();
        let step_titles = state
            .formulas
            .get(formula)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("formula {formula}")))?;

        let feature = vars
            .iter()
            .find(|(k, _)| k == "feature")
            .map_or_else(|| formula.to_string(), |(_, v)| v.clone());

        let root_id = state.next_id();
        let ts = state.next_ts();
        let root = WorkUnit {
            id: root_id.clone(),
            title: format!("{formula}: {feature}"),
            description: String::new(),
            status: Status::Open,
            priority: 2,
            issue_type: IssueType::Molecule,
            assignee: String::new(),
            parent: None,
            depends_on: vec![],
            blocks: vec![],
            tracks: vec![],
            slots: BTreeMap::new(),
            labels: vec![],
            created_at: Some(ts.clone()),
            updated_at: Some(ts),
            closed_at: None,
        };
        state.units.insert(root_id.clone(), root);

        let mut steps = Vec::new();
        for (index, title) in step_titles.iter().enumerate() {
            let step_id = format!("{root_id}.{}", index + 1);
            let ts = state.next_ts();
            let step = WorkUnit {
                id: step_id.clone(),
                title: title.clone(),
                description: String::new(),
                status: Status::Open,
                priority: 2,
                issue_type: IssueType::Task,
                assignee: String::new(),
                parent: Some(root_id.clone()),
                depends_on: vec![],
                blocks: vec![],
                tracks: vec![],
                slots: BTreeMap::new(),
                labels: vec![],
                created_at: Some(ts.clone()),
                updated_at: Some(ts),
                closed_at: None,
            };
            state.units.insert(step_id.clone(), step);
            steps.push(step_id);
        }

        Ok(Wisp {
            root: root_id,
            steps,
        })
    }

    fn bond(&self, root: &str, target: &str) -> Result<()> {
        self.add_dep(root, target)
    }

    fn current_step(&self, molecule: &str) -> Result<Option<StepInfo>> {
        let state = self.lock();
        if !state.units.contains_key(molecule) {
            return Err(StoreError::NotFound(molecule.to_string()));
        }
        let steps = Self::step_children(&state, molecule);
        let total = u32::try_from(steps.len()).unwrap_or(u32::MAX);
        let done = u32::try_from(
            steps
                .iter()
                .filter(|s| s.status == Status::Closed)
                .count(),
        )
        .unwrap_or(u32::MAX);
        let next = steps.into_iter().find(|s| s.status != Status::Closed);
        Ok(next.map(|step| StepInfo {
            molecule_id: molecule.to_string(),
            step_id: step.id,
            title: step.title,
            description: step.description,
            done,
            total,
        }))
    }

    fn prime_context(&self) -> Result<String> {
        Ok(self.lock().prime_output.clone())
    }

    fn actor(&self) -> &str {
        &self.actor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> FakeStore {
        FakeStore::new("gt")
    }

    fn create_task(store: &FakeStore, title: &str) -> WorkUnit {
        store
            .create(&CreateOpts {
                title: title.to_string(),
                ..Default::default()
            })
            .unwrap()
    }

    #[test]
    fn create_show_update() {
        let store = store();
        let unit = create_task(&store, "first");
        assert_eq!(unit.status, Status::Open);

        store
            .update(
                &unit.id,
                &Patch {
                    status: Some(Status::Hooked),
                    assignee: Some("wyvern/polecats/toast".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let shown = store.show(&unit.id).unwrap();
        assert_eq!(shown.status, Status::Hooked);
        assert_eq!(shown.assignee, "wyvern/polecats/toast");
    }

    #[test]
    fn release_clears_assignee() {
        let store = store();
        let unit = create_task(&store, "work");
        store
            .update(
                &unit.id,
                &Patch {
                    status: Some(Status::Hooked),
                    assignee: Some("wyvern/polecats/toast".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        store.release(&unit.id, None).unwrap();
        let shown = store.show(&unit.id).unwrap();
        assert_eq!(shown.status, Status::Open);
        assert!(shown.assignee.is_empty());
    }

    #[test]
    fn deps_are_reciprocal() {
        let store = store();
        let a = create_task(&store, "a");
        let b = create_task(&store, "b");
        store.add_dep(&a.id, &b.id).unwrap();
        assert_eq!(store.show(&a.id).unwrap().depends_on, vec![b.id.clone()]);
        assert_eq!(store.show(&b.id).unwrap().blocks, vec![a.id.clone()]);

        store.remove_dep(&a.id, &b.id).unwrap();
        assert!(store.show(&a.id).unwrap().depends_on.is_empty());
        assert!(store.show(&b.id).unwrap().blocks.is_empty());
    }

    #[test]
    fn ready_respects_deps() {
        let store = store();
        let a = create_task(&store, "a");
        let b = create_task(&store, "b");
        store.add_dep(&a.id, &b.id).unwrap();

        let ready: Vec<String> = store.ready(None).unwrap().into_iter().map(|u| u.id).collect();
        assert!(ready.contains(&b.id));
        assert!(!ready.contains(&a.id));

        store.close(&[b.id], None).unwrap();
        let ready: Vec<String> = store.ready(None).unwrap().into_iter().map(|u| u.id).collect();
        assert!(ready.contains(&a.id));
    }

    #[test]
    fn mail_routing_by_actor() {
        let store = store();
        let witness = store.as_actor("wyvern/witness");
        witness
            .mail_send(&MailDraft {
                to: "mayor".into(),
                subject: "RECOVERY_NEEDED wyvern/toast".into(),
                body: String::new(),
                priority: super::super::MailPriority::Urgent,
            })
            .unwrap();

        let mayor = store.as_actor("mayor");
        let inbox = mayor.mail_inbox(true).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].from, "wyvern/witness");

        mayor.mail_ack(&inbox[0].id).unwrap();
        assert!(mayor.mail_inbox(true).unwrap().is_empty());
    }

    #[test]
    fn mail_trailing_slash_matches() {
        let store = store();
        store
            .mail_send(&MailDraft {
                to: "mayor/".into(),
                subject: "hi".into(),
                body: String::new(),
                priority: super::super::MailPriority::Normal,
            })
            .unwrap();
        let mayor = store.as_actor("mayor");
        assert_eq!(mayor.mail_inbox(false).unwrap().len(), 1);
    }

    #[test]
    fn wisp_creates_root_and_steps() {
        let store = store();
        store.register_formula("polecat-work", &["plan", "build", "verify"]);
        let wisp = store
            .wisp(
                "polecat-work",
                &[("feature".to_string(), "parser".to_string())],
            )
            .unwrap();
        assert_eq!(wisp.steps.len(), 3);

        let root = store.show(&wisp.root).unwrap();
        assert_eq!(root.issue_type, IssueType::Molecule);
        assert!(root.title.contains("parser"));

        let step = store.current_step(&wisp.root).unwrap().unwrap();
        assert_eq!(step.title, "plan");
        assert_eq!(step.done, 0);
        assert_eq!(step.total, 3);
    }

    #[test]
    fn current_step_advances_and_completes() {
        let store = store();
        store.register_formula("f", &["one", "two"]);
        let wisp = store.wisp("f", &[]).unwrap();

        store.close(&[wisp.steps[0].clone()], None).unwrap();
        let step = store.current_step(&wisp.root).unwrap().unwrap();
        assert_eq!(step.title, "two");
        assert_eq!(step.done, 1);

        store.close(&[wisp.steps[1].clone()], None).unwrap();
        assert!(store.current_step(&wisp.root).unwrap().is_none());
    }

    #[test]
    fn bond_records_dependency() {
        let store = store();
        store.register_formula("f", &["one"]);
        let wisp = store.wisp("f", &[]).unwrap();
        let target = create_task(&store, "target");
        store.bond(&wisp.root, &target.id).unwrap();
        assert!(
            store
                .show(&wisp.root)
                .unwrap()
                .depends_on
                .contains(&target.id)
        );
    }

    #[test]
    fn fingerprint_stable_across_reads() {
        let store = store();
        create_task(&store, "a");
        let before = store.fingerprint();
        let _ = store.list(&ListFilter::default()).unwrap();
        let _ = store.ready(None).unwrap();
        assert_eq!(before, store.fingerprint());
    }
}
