//! Mail envelopes and protocol subjects.
//!
//! Mail rides the issue store. A handful of subjects double as wire
//! protocol between the loops (witness, deacon) and the agents; those are
//! constructed and recognized here so the magic strings live in one place.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl fmt::Display for MailPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

/// An outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailDraft {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub priority: MailPriority,
}

/// A message as the store reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailMessage {
    pub id: String,
    pub to: String,
    pub from: String,
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub priority: MailPriority,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub read: bool,
}

/// Protocol subjects recognized by the loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolSubject {
    HealthCheck,
    ForceKill,
    PolecatDone { name: String },
    LifecycleShutdown { name: String },
    Merged { name: String },
    RecoveryNeeded { target: String },
    Handoff,
}

impl ProtocolSubject {
    /// Render the canonical subject line.
    pub fn subject(&self) -> String {
        match self {
            Self::HealthCheck => "HEALTH_CHECK: respond by touching your agent bead".into(),
            Self::ForceKill => "FORCE_KILL: unresponsive".into(),
            Self::PolecatDone { name } => format!("POLECAT_DONE {name}"),
            Self::LifecycleShutdown { name } => format!("LIFECYCLE:Shutdown {name}"),
            Self::Merged { name } => format!("MERGED {name}"),
            Self::RecoveryNeeded { target } => format!("RECOVERY_NEEDED {target}"),
            Self::Handoff => "🤝 HANDOFF: session ending, context attached".into(),
        }
    }

    /// Recognize a subject line.
    pub fn parse(subject: &str) -> Option<Self> {
        if subject.starts_with("HEALTH_CHECK") {
            return Some(Self::HealthCheck);
        }
        if subject.starts_with("FORCE_KILL") {
            return Some(Self::ForceKill);
        }
        if let Some(rest) = subject.strip_prefix("POLECAT_DONE ") {
            return Some(Self::PolecatDone {
                name: rest.trim().to_string(),
            });
        }
        if let Some(rest) = subject.strip_prefix("LIFECYCLE:Shutdown ") {
            return Some(Self::LifecycleShutdown {
                name: rest.trim().to_string(),
            });
        }
        if let Some(rest) = subject.strip_prefix("MERGED ") {
            return Some(Self::Merged {
                name: rest.trim().to_string(),
            });
        }
        if let Some(rest) = subject.strip_prefix("RECOVERY_NEEDED ") {
            return Some(Self::RecoveryNeeded {
                target: rest.trim().to_string(),
            });
        }
        if subject.starts_with("🤝 HANDOFF") {
            return Some(Self::Handoff);
        }
        None
    }
}
