//! Canonical agent addresses.
//!
//! The address is the string form used everywhere an agent is named:
//! assignee fields, mail envelopes, sling targets, session lookups.
//! One parser, one formatter; malformed addresses are rejected here and
//! nowhere else.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A parsed agent address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    Mayor,
    Deacon,
    Witness { rig: String },
    Refinery { rig: String },
    Polecat { rig: String, name: String },
    Crew { rig: String, name: String },
    Dog { name: String },
}

impl Address {
    /// The rig this agent belongs to, if any.
    pub fn rig(&self) -> Option<&str> {
        match self {
            Self::Witness { rig }
            | Self::Refinery { rig }
            | Self::Polecat { rig, .. }
            | Self::Crew { rig, .. } => Some(rig),
            Self::Mayor | Self::Deacon | Self::Dog { .. } => None,
        }
    }

    /// The short role name.
    pub const fn role(&self) -> &'static str {
        match self {
            Self::Mayor => "mayor",
            Self::Deacon => "deacon",
            Self::Witness { .. } => "witness",
            Self::Refinery { .. } => "refinery",
            Self::Polecat { .. } => "polecat",
            Self::Crew { .. } => "crew",
            Self::Dog { .. } => "dog",
        }
    }

    /// Worker roles are the ones that live in disposable or per-person
    /// workspaces and must hold the identity lock.
    pub const fn is_worker(&self) -> bool {
        matches!(self, Self::Polecat { .. } | Self::Crew { .. })
    }

    /// Canonical agent-bead id: `prefix-[rig-]role[-name]`.
    pub fn bead_id(&self, prefix: &str) -> String {
        match self {
            Self::Mayor => format!("{prefix}-mayor"),
            Self::Deacon => format!("{prefix}-deacon"),
            Self::Witness { rig } => format!("{prefix}-{rig}-witness"),
            Self::Refinery { rig } => format!("{prefix}-{rig}-refinery"),
            Self::Polecat { rig, name } => format!("{prefix}-{rig}-polecat-{name}"),
            Self::Crew { rig, name } => format!("{prefix}-{rig}-crew-{name}"),
            Self::Dog { name } => format!("{prefix}-dog-{name}"),
        }
    }

    /// Multiplexer session name for this agent in the given town.
    pub fn session_name(&self, town: &str) -> String {
        match self {
            Self::Mayor => format!("gt-{town}-mayor"),
            Self::Deacon => format!("gt-{town}-deacon"),
            Self::Witness { rig } => format!("gt-{rig}-witness"),
            Self::Refinery { rig } => format!("gt-{rig}-refinery"),
            Self::Polecat { rig, name } => format!("gt-{rig}-{name}"),
            Self::Crew { rig, name } => format!("gt-{rig}-crew-{name}"),
            Self::Dog { name } => format!("gt-{town}-dog-{name}"),
        }
    }
}

/// Validate a rig or agent name segment: `[a-z0-9][a-z0-9-]*`, max 64.
fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 64
        && !s.starts_with('-')
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        let parsed = match parts.as_slice() {
            ["mayor"] => Some(Self::Mayor),
            ["deacon"] => Some(Self::Deacon),
            ["deacon", "dogs", name] if valid_segment(name) => Some(Self::Dog {
                name: (*name).to_string(),
            }),
            [rig, "witness"] if valid_segment(rig) => Some(Self::Witness {
                rig: (*rig).to_string(),
            }),
            [rig, "refinery"] if valid_segment(rig) => Some(Self::Refinery {
                rig: (*rig).to_string(),
            }),
            [rig, "polecats", name] if valid_segment(rig) && valid_segment(name) => {
                Some(Self::Polecat {
                    rig: (*rig).to_string(),
                    name: (*name).to_string(),
                })
            }
            [rig, "crew", name] if valid_segment(rig) && valid_segment(name) => Some(Self::Crew {
                rig: (*rig).to_string(),
                name: (*name).to_string(),
            }),
            _ => None,
        };
        parsed.ok_or_else(|| anyhow::anyhow!("malformed agent address: {s:?}"))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mayor => write!(f, "mayor"),
            Self::Deacon => write!(f, "deacon"),
            Self::Witness { rig } => write!(f, "{rig}/witness"),
            Self::Refinery { rig } => write!(f, "{rig}/refinery"),
            Self::Polecat { rig, name } => write!(f, "{rig}/polecats/{name}"),
            Self::Crew { rig, name } => write!(f, "{rig}/crew/{name}"),
            Self::Dog { name } => write!(f, "deacon/dogs/{name}"),
        }
    }
}
