//! Work units and the agent-bead view.
//!
//! Typed slots are authoritative for agent state. Older records carry the
//! same fields as `key: value` lines embedded in the description; readers
//! fall back to those, writers never produce new ones.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Work unit status lifecycle: open → hooked (dispatch) → in_progress
/// (agent claim) → closed, or back to open on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Open,
    InProgress,
    Hooked,
    Pinned,
    Closed,
}

impl Status {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Hooked => "hooked",
            Self::Pinned => "pinned",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    Task,
    Bug,
    Feature,
    Epic,
    Agent,
    Role,
    MergeRequest,
    Convoy,
    Molecule,
    Message,
}

impl IssueType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Epic => "epic",
            Self::Agent => "agent",
            Self::Role => "role",
            Self::MergeRequest => "merge-request",
            Self::Convoy => "convoy",
            Self::Molecule => "molecule",
            Self::Message => "message",
        }
    }
}

/// A work unit as the store reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: Status,
    #[serde(default)]
    pub priority: u8,
    #[serde(rename = "type", default = "default_issue_type")]
    pub issue_type: IssueType,
    #[serde(default)]
    pub assignee: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub blocks: Vec<String>,
    /// Non-blocking tracking links (convoy → tracked unit).
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub slots: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub closed_at: Option<String>,
}

const fn default_issue_type() -> IssueType {
    IssueType::Task
}

impl WorkUnit {
    /// Read a field: typed slot first, then legacy `key: value` description
    /// line.
    pub fn field(&self, key: &str) -> Option<String> {
        if let Some(value) = self.slots.get(key) {
            if value.is_empty() {
                return None;
            }
            return Some(value.clone());
        }
        description_field(&self.description, key)
    }

    pub fn is_agent_bead(&self) -> bool {
        self.issue_type == IssueType::Agent
    }
}

/// Scan description text for a `key: value` line.
pub fn description_field(description: &str, key: &str) -> Option<String> {
    for line in description.lines() {
        if let Some(rest) = line.strip_prefix(key)
            && let Some(value) = rest.strip_prefix(':')
        {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Lifecycle state recorded on an agent bead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Spawning,
    Working,
    Done,
    Stuck,
    Idle,
    Killed,
}

impl AgentState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spawning => "spawning",
            Self::Working => "working",
            Self::Done => "done",
            Self::Stuck => "stuck",
            Self::Idle => "idle",
            Self::Killed => "killed",
        }
    }
}

impl FromStr for AgentState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spawning" => Ok(Self::Spawning),
            "working" => Ok(Self::Working),
            "done" => Ok(Self::Done),
            "stuck" => Ok(Self::Stuck),
            "idle" => Ok(Self::Idle),
            "killed" => Ok(Self::Killed),
            other => Err(anyhow::anyhow!("unknown agent_state: {other:?}")),
        }
    }
}

/// Workspace cleanliness recorded on an agent bead; gates nuking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStatus {
    Clean,
    HasUncommitted,
    HasStash,
    HasUnpushed,
    Unknown,
}

impl CleanupStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::HasUncommitted => "has_uncommitted",
            Self::HasStash => "has_stash",
            Self::HasUnpushed => "has_unpushed",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for CleanupStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clean" => Ok(Self::Clean),
            "has_uncommitted" => Ok(Self::HasUncommitted),
            "has_stash" => Ok(Self::HasStash),
            "has_unpushed" => Ok(Self::HasUnpushed),
            "unknown" => Ok(Self::Unknown),
            other => Err(anyhow::anyhow!("unknown cleanup_status: {other:?}")),
        }
    }
}

/// Slot keys used on agent beads.
pub mod slots {
    pub const HOOK_BEAD: &str = "hook_bead";
    pub const ROLE_BEAD: &str = "role_bead";
    pub const AGENT_STATE: &str = "agent_state";
    pub const CLEANUP_STATUS: &str = "cleanup_status";
    pub const ACTIVE_MR: &str = "active_mr";
    pub const HOOK: &str = "hook";
    pub const ROLE: &str = "role";
    pub const DELEGATED_FROM: &str = "delegated_from";
    pub const ATTACHED_MOLECULE: &str = "attached_molecule";
}

/// Typed view over an agent bead's slots (with description fallback).
#[derive(Debug, Clone)]
pub struct AgentBead {
    pub id: String,
    pub hook_bead: Option<String>,
    pub role_bead: Option<String>,
    pub agent_state: Option<AgentState>,
    pub cleanup_status: Option<CleanupStatus>,
    pub active_mr: Option<String>,
    pub updated_at: Option<String>,
}

impl AgentBead {
    pub fn from_unit(unit: &WorkUnit) -> Self {
        Self {
            id: unit.id.clone(),
            hook_bead: unit.field(slots::HOOK_BEAD),
            role_bead: unit.field(slots::ROLE_BEAD),
            agent_state: unit
                .field(slots::AGENT_STATE)
                .and_then(|s| s.parse().ok()),
            cleanup_status: unit
                .field(slots::CLEANUP_STATUS)
                .and_then(|s| s.parse().ok()),
            active_mr: unit.field(slots::ACTIVE_MR),
            updated_at: unit.updated_at.clone(),
        }
    }
}

/// Delegation record stored in the `delegated_from` slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegation {
    pub parent: String,
    pub child: String,
    pub delegated_by: String,
    pub delegated_to: String,
    pub terms: DelegationTerms,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelegationTerms {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_share: Option<String>,
}
