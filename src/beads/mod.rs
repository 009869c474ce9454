//! Typed facade over the beads issue store.
//!
//! The store is an external CLI (`bd`) treated as an opaque, durable data
//! layer; it provides the concurrency control, we provide types. Everything
//! that drives coordination goes through the [`IssueStore`] trait so tests
//! can substitute the deterministic in-memory fake.

pub mod cli;
pub mod fake;
pub mod issue;
pub mod mail;
pub mod redirect;
pub mod routes;

pub use cli::BdStore;
pub use fake::FakeStore;
pub use issue::{
    AgentBead, AgentState, CleanupStatus, Delegation, DelegationTerms, IssueType, Status, WorkUnit,
    slots,
};
pub use mail::{MailDraft, MailMessage, MailPriority, ProtocolSubject};

/// Store-level errors, classified from the CLI's stderr.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("beads CLI not installed — install bd and re-run")]
    NotInstalled,

    #[error("not a beads repo: {0}")]
    NotARepo(String),

    #[error("sync conflict: {0}")]
    SyncConflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{command} failed: {stderr}")]
    Generic { command: String, stderr: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Filter for `list`.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<Status>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<String>,
    pub label: Option<String>,
}

/// Inputs to `create`.
#[derive(Debug, Clone, Default)]
pub struct CreateOpts {
    pub id: Option<String>,
    pub title: String,
    pub description: String,
    pub issue_type: Option<IssueType>,
    pub priority: Option<u8>,
    pub assignee: Option<String>,
    pub parent: Option<String>,
    pub labels: Vec<String>,
}

/// Partial update for `update`. Unset fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct Patch {
    pub status: Option<Status>,
    /// `Some("")` clears the assignee.
    pub assignee: Option<String>,
    pub priority: Option<u8>,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Aggregate counters from `stats`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct StoreStats {
    #[serde(default)]
    pub open: u64,
    #[serde(default)]
    pub in_progress: u64,
    #[serde(default)]
    pub hooked: u64,
    #[serde(default)]
    pub closed: u64,
}

/// An instantiated workflow: root plus ordered step ids.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Wisp {
    pub root: String,
    pub steps: Vec<String>,
}

/// The next open step of a molecule, with progress.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StepInfo {
    pub molecule_id: String,
    pub step_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub done: u32,
    pub total: u32,
}

/// The issue-store contract (spec'd verbs only; the CLI has more).
pub trait IssueStore {
    fn list(&self, filter: &ListFilter) -> Result<Vec<WorkUnit>>;
    fn show(&self, id: &str) -> Result<WorkUnit>;
    fn ready(&self, issue_type: Option<IssueType>) -> Result<Vec<WorkUnit>>;
    fn create(&self, opts: &CreateOpts) -> Result<WorkUnit>;
    fn update(&self, id: &str, patch: &Patch) -> Result<()>;
    fn close(&self, ids: &[String], reason: Option<&str>) -> Result<()>;
    /// Back to `open` with the assignee cleared.
    fn release(&self, id: &str, reason: Option<&str>) -> Result<()>;
    fn add_dep(&self, issue: &str, depends_on: &str) -> Result<()>;
    fn remove_dep(&self, issue: &str, depends_on: &str) -> Result<()>;
    /// Non-blocking `tracks` link; never affects readiness.
    fn add_tracks(&self, tracker: &str, tracked: &str) -> Result<()>;
    fn slot_set(&self, id: &str, key: &str, value: &str) -> Result<()>;
    fn slot_get(&self, id: &str, key: &str) -> Result<Option<String>>;
    fn slot_clear(&self, id: &str, key: &str) -> Result<()>;
    fn mail_send(&self, draft: &MailDraft) -> Result<()>;
    /// Inbox of the store's own actor.
    fn mail_inbox(&self, unread_only: bool) -> Result<Vec<MailMessage>>;
    fn mail_read(&self, id: &str) -> Result<MailMessage>;
    fn mail_ack(&self, id: &str) -> Result<()>;
    fn sync(&self) -> Result<()>;
    fn sync_from_main(&self) -> Result<()>;
    fn stats(&self) -> Result<StoreStats>;
    /// Materialize a workflow template into the store.
    fn cook(&self, formula: &str) -> Result<String>;
    /// Instantiate a cooked template into a root + step chain.
    fn wisp(&self, formula: &str, vars: &[(String, String)]) -> Result<Wisp>;
    /// Stitch an instantiated root onto another work unit.
    fn bond(&self, root: &str, target: &str) -> Result<()>;
    fn current_step(&self, molecule: &str) -> Result<Option<StepInfo>>;
    /// The store's own rendered workflow context (verbatim passthrough).
    fn prime_context(&self) -> Result<String>;
    /// Who mutations are attributed to.
    fn actor(&self) -> &str;
}

/// Permissive id shape check used before hitting the store: 2–3 lowercase
/// letters, a hyphen, then a non-empty body.
pub fn valid_bead_id(id: &str) -> bool {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re =
        RE.get_or_init(|| regex::Regex::new(r"^[a-z]{2,3}-[a-zA-Z0-9][a-zA-Z0-9.-]*$").unwrap());
    re.is_match(id)
}
