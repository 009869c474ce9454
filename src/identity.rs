//! Identity and role resolution.
//!
//! Who am I? Environment wins, the working directory confirms. When the two
//! disagree we record the mismatch and surface it loudly — never guess,
//! never auto-correct. Worker roles additionally hold an exclusive identity
//! lock file in their workspace so two sessions cannot claim the same
//! polecat.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::config::Town;
use crate::error::ExitError;
use crate::subprocess::Tool;

/// Environment inputs to role resolution, captured once for testability.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    pub role: Option<String>,
    pub rig: Option<String>,
    pub polecat: Option<String>,
    pub crew: Option<String>,
    pub actor: Option<String>,
}

impl EnvSnapshot {
    pub fn from_env() -> Self {
        Self {
            role: std::env::var("GT_ROLE").ok().filter(|s| !s.is_empty()),
            rig: std::env::var("GT_RIG").ok().filter(|s| !s.is_empty()),
            polecat: std::env::var("GT_POLECAT").ok().filter(|s| !s.is_empty()),
            crew: std::env::var("GT_CREW").ok().filter(|s| !s.is_empty()),
            actor: std::env::var("BD_ACTOR").ok().filter(|s| !s.is_empty()),
        }
    }
}

/// A resolved identity: the address plus how we got there.
#[derive(Debug, Clone)]
pub struct Identity {
    pub address: Address,
    pub bead_id: String,
    /// Set when env and cwd disagree about who we are.
    pub mismatch: Option<Mismatch>,
}

#[derive(Debug, Clone)]
pub struct Mismatch {
    pub env_says: Address,
    pub cwd_says: Address,
}

/// Resolve identity from env (authoritative) and cwd (confirmation).
pub fn resolve(town: &Town, cwd: &Path, env: &EnvSnapshot) -> anyhow::Result<Identity> {
    let from_env = address_from_env(env)?;
    let from_cwd = address_from_cwd(&town.root, cwd);

    let (address, mismatch) = match (from_env, from_cwd) {
        (Some(e), Some(c)) if e != c => (
            e.clone(),
            Some(Mismatch {
                env_says: e,
                cwd_says: c,
            }),
        ),
        (Some(e), _) => (e, None),
        (None, Some(c)) => (c, None),
        (None, None) => anyhow::bail!(
            "cannot determine role: GT_ROLE is unset and {} is not inside the town layout",
            cwd.display()
        ),
    };

    let prefix = address
        .rig()
        .map_or_else(|| "gt".to_string(), |rig| town.rig_prefix(rig));
    let bead_id = address.bead_id(&prefix);

    Ok(Identity {
        address,
        bead_id,
        mismatch,
    })
}

/// Build an address from environment variables alone.
fn address_from_env(env: &EnvSnapshot) -> anyhow::Result<Option<Address>> {
    if let Some(ref role) = env.role {
        let addr = match role.as_str() {
            "mayor" => Address::Mayor,
            "deacon" => Address::Deacon,
            "witness" => Address::Witness {
                rig: require_rig(env, "witness")?,
            },
            "refinery" => Address::Refinery {
                rig: require_rig(env, "refinery")?,
            },
            "polecat" => Address::Polecat {
                rig: require_rig(env, "polecat")?,
                name: env
                    .polecat
                    .clone()
                    .context("GT_ROLE=polecat requires GT_POLECAT")?,
            },
            "crew" => Address::Crew {
                rig: require_rig(env, "crew")?,
                name: env.crew.clone().context("GT_ROLE=crew requires GT_CREW")?,
            },
            other => anyhow::bail!("unknown GT_ROLE: {other:?}"),
        };
        return Ok(Some(addr));
    }
    if let Some(ref actor) = env.actor {
        return Ok(Some(actor.parse()?));
    }
    Ok(None)
}

fn require_rig(env: &EnvSnapshot, role: &str) -> anyhow::Result<String> {
    env.rig
        .clone()
        .with_context(|| format!("GT_ROLE={role} requires GT_RIG"))
}

/// Derive an address from the cwd's position in the town layout.
///
/// Recognized segment patterns relative to the town root: the root itself
/// and `mayor/…` are Mayor; `deacon/…` is Deacon; `<rig>/mayor/…` is also
/// Mayor (the canonical clone); `<rig>/witness|refinery/…`;
/// `<rig>/polecats/<name>/…`; `<rig>/crew/<name>/…`.
pub fn address_from_cwd(town_root: &Path, cwd: &Path) -> Option<Address> {
    let rel = cwd.strip_prefix(town_root).ok()?;
    let segments: Vec<&str> = rel
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();

    match segments.as_slice() {
        [] | ["mayor", ..] => Some(Address::Mayor),
        ["deacon", ..] => Some(Address::Deacon),
        [_rig, "mayor", ..] => Some(Address::Mayor),
        [rig, "witness", ..] => Some(Address::Witness {
            rig: (*rig).to_string(),
        }),
        [rig, "refinery", ..] => Some(Address::Refinery {
            rig: (*rig).to_string(),
        }),
        [rig, "polecats", name, ..] => Some(Address::Polecat {
            rig: (*rig).to_string(),
            name: (*name).to_string(),
        }),
        [rig, "crew", name, ..] => Some(Address::Crew {
            rig: (*rig).to_string(),
            name: (*name).to_string(),
        }),
        _ => None,
    }
}

/// Contents of `.runtime/agent.lock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityLock {
    pub pid: u32,
    pub session_id: String,
    pub acquired_at: String,
}

/// Path of the lock file inside an agent workspace.
pub fn lock_path(workspace: &Path) -> PathBuf {
    workspace.join(".runtime").join("agent.lock")
}

/// Acquire the identity lock for `workspace`.
///
/// Stale detection is best-effort: a lock whose recorded PID is dead is
/// reclaimed. Re-acquiring our own lock is a no-op (prime runs on every
/// session start).
pub fn acquire_lock(workspace: &Path, identity: &str, session_id: &str) -> anyhow::Result<()> {
    let path = lock_path(workspace);

    if let Ok(contents) = std::fs::read_to_string(&path)
        && let Ok(existing) = serde_json::from_str::<IdentityLock>(&contents)
    {
        let own_pid = std::process::id();
        if existing.pid == own_pid {
            return Ok(());
        }
        if pid_alive(existing.pid) {
            return Err(ExitError::IdentityCollision {
                identity: identity.to_string(),
                pid: existing.pid,
                session: existing.session_id,
                acquired_at: existing.acquired_at,
            }
            .into());
        }
        tracing::warn!(pid = existing.pid, "reclaiming stale identity lock");
    }

    let lock = IdentityLock {
        pid: std::process::id(),
        session_id: session_id.to_string(),
        acquired_at: chrono::Utc::now().to_rfc3339(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(&lock)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Drop the lock if this process owns it.
pub fn release_lock(workspace: &Path) -> anyhow::Result<()> {
    let path = lock_path(workspace);
    let Ok(contents) = std::fs::read_to_string(&path) else {
        return Ok(());
    };
    if let Ok(lock) = serde_json::from_str::<IdentityLock>(&contents)
        && lock.pid == std::process::id()
    {
        std::fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
    }
    Ok(())
}

/// Is the given PID a live process?
pub fn pid_alive(pid: u32) -> bool {
    if Path::new("/proc").is_dir() {
        return Path::new(&format!("/proc/{pid}")).exists();
    }
    // No procfs (macOS): fall back to kill -0.
    Tool::new("kill")
        .args(&["-0", &pid.to_string()])
        .run()
        .map(|o| o.success())
        .unwrap_or(false)
}
