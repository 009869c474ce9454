//! The deacon: town-wide health monitor.
//!
//! Two duties. Health rounds nudge an agent and watch its bead's
//! updated_at; three consecutive silent rounds recommend a force-kill
//! (exit status 2). The zombie scan is the backstop for witnesses that
//! died before cleaning up their polecats.
//!
//! All counters live in the persisted health state, never in memory: the
//! deacon itself is a family of short-lived invocations.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::beads::{
    AgentBead, IssueStore, MailDraft, MailPriority, ProtocolSubject, StoreError, slots,
};
use crate::config::Town;
use crate::mux::Multiplexer;
use crate::telemetry;
use crate::vcs::Vcs;
use crate::witness::Witness;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);
pub const DEFAULT_ZOMBIE_STALENESS: Duration = Duration::from_secs(600);

/// Persisted per-agent health counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentHealth {
    #[serde(default)]
    pub last_ping: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_response: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_force_kill: Option<DateTime<Utc>>,
    #[serde(default)]
    pub force_kill_count: u32,
}

/// mayor/health.json — the town's health-check state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthState {
    #[serde(default)]
    pub agents: BTreeMap<String, AgentHealth>,
}

impl HealthState {
    pub fn path(town: &Town) -> PathBuf {
        town.mayor_dir().join("health.json")
    }

    pub fn load(town: &Town) -> Self {
        let path = Self::path(town);
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default()
    }

    /// Atomic rewrite: temp file in the same directory, then rename.
    pub fn save(&self, town: &Town) -> anyhow::Result<()> {
        let path = Self::path(town);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("renaming to {}", path.display()))?;
        Ok(())
    }

    pub fn agent(&mut self, address: &str) -> &mut AgentHealth {
        self.agents.entry(address.to_string()).or_default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HealthCheckOptions {
    pub timeout: Option<Duration>,
    pub poll_interval: Option<Duration>,
    pub failure_threshold: Option<u32>,
    pub cooldown: Option<Duration>,
}

/// Outcome of one health round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthVerdict {
    /// The agent's bead moved: alive.
    Responded,
    /// Within the force-kill cooldown; counters untouched.
    Cooldown,
    /// No session to nudge.
    NoSession,
    /// Silent, but under the failure threshold.
    Failed { consecutive: u32 },
    /// Silent for the Nth consecutive round: recommend force-kill.
    ShouldForceKill { consecutive: u32 },
}

#[derive(Debug, Default)]
pub struct ZombieReport {
    pub scanned: Vec<String>,
    pub zombies: Vec<String>,
    pub nuked: Vec<String>,
}

pub struct Deacon<'a> {
    pub town: &'a Town,
    pub store: &'a dyn IssueStore,
    pub mux: &'a dyn Multiplexer,
    pub vcs: &'a dyn Vcs,
}

impl Deacon<'_> {
    /// One health round for one agent.
    pub fn health_check(
        &self,
        agent: &Address,
        opts: &HealthCheckOptions,
    ) -> anyhow::Result<HealthVerdict> {
        let address = agent.to_string();
        let cooldown = opts.cooldown.unwrap_or(DEFAULT_COOLDOWN);
        let timeout = opts.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let poll_interval = opts.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL);
        let threshold = opts.failure_threshold.unwrap_or(DEFAULT_FAILURE_THRESHOLD);

        let mut state = HealthState::load(self.town);
        if within_cooldown(state.agent(&address).last_force_kill, cooldown) {
            return Ok(HealthVerdict::Cooldown);
        }

        let prefix = agent
            .rig()
            .map_or_else(|| "gt".to_string(), |rig| self.town.rig_prefix(rig));
        let bead_id = agent.bead_id(&prefix);
        let before = self.bead_updated_at(&bead_id)?;

        let session = agent.session_name(&self.town.config.name);
        if !self.mux.has_session(&session).unwrap_or(false) {
            return Ok(HealthVerdict::NoSession);
        }

        self.nudge_health_check(agent, &session);
        state.agent(&address).last_ping = Some(Utc::now());

        // Poll the bead for movement.
        let deadline = std::time::Instant::now() + timeout;
        let responded = loop {
            let now_value = self.bead_updated_at(&bead_id)?;
            if now_value != before {
                break true;
            }
            if std::time::Instant::now() >= deadline {
                break false;
            }
            std::thread::sleep(poll_interval);
        };

        let verdict = if responded {
            let entry = state.agent(&address);
            entry.last_response = Some(Utc::now());
            entry.consecutive_failures = 0;
            HealthVerdict::Responded
        } else {
            let entry = state.agent(&address);
            entry.consecutive_failures += 1;
            let consecutive = entry.consecutive_failures;
            if consecutive >= threshold {
                HealthVerdict::ShouldForceKill { consecutive }
            } else {
                HealthVerdict::Failed { consecutive }
            }
        };
        state.save(self.town)?;
        Ok(verdict)
    }

    fn bead_updated_at(&self, bead_id: &str) -> anyhow::Result<Option<String>> {
        match self.store.show(bead_id) {
            Ok(unit) => Ok(unit.updated_at),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn nudge_health_check(&self, agent: &Address, session: &str) {
        let draft = MailDraft {
            to: agent.to_string(),
            subject: ProtocolSubject::HealthCheck.subject(),
            body: "touch your agent bead to confirm you are alive".to_string(),
            priority: MailPriority::High,
        };
        if let Err(e) = self.store.mail_send(&draft) {
            tracing::warn!(agent = %agent, error = %e, "health-check mail failed");
        }
        if let Err(e) = self.mux.send_keys(
            session,
            "HEALTH_CHECK: touch your agent bead (any slot write) to confirm you are alive",
            true,
        ) {
            tracing::warn!(session = %session, error = %e, "health-check keystroke failed");
        }
    }

    /// Force-kill an agent. Respects the cooldown: inside the window this
    /// is a status-only no-op and the kill counter does not move.
    pub fn force_kill(
        &self,
        agent: &Address,
        reason: &str,
        notify_mayor: bool,
        cooldown: Option<Duration>,
    ) -> anyhow::Result<bool> {
        let address = agent.to_string();
        let cooldown = cooldown.unwrap_or(DEFAULT_COOLDOWN);
        let mut state = HealthState::load(self.town);
        if within_cooldown(state.agent(&address).last_force_kill, cooldown) {
            tracing::info!(agent = %address, "force-kill suppressed by cooldown");
            return Ok(false);
        }

        // Best-effort goodbye so the transcript shows why it died.
        let draft = MailDraft {
            to: address.clone(),
            subject: ProtocolSubject::ForceKill.subject(),
            body: format!("force-kill: {reason}"),
            priority: MailPriority::Urgent,
        };
        if let Err(e) = self.store.mail_send(&draft) {
            tracing::warn!(agent = %address, error = %e, "force-kill mail failed");
        }

        let session = agent.session_name(&self.town.config.name);
        if let Err(e) = self.mux.kill_session(&session) {
            tracing::warn!(session = %session, error = %e, "session kill failed");
        }

        let prefix = agent
            .rig()
            .map_or_else(|| "gt".to_string(), |rig| self.town.rig_prefix(rig));
        let bead_id = agent.bead_id(&prefix);
        if self.store.show(&bead_id).is_ok() {
            self.store
                .slot_set(&bead_id, slots::AGENT_STATE, "killed")?;
        }

        if notify_mayor {
            let notice = MailDraft {
                to: Address::Mayor.to_string(),
                subject: format!("FORCE_KILL: {address}"),
                body: format!("killed {address}: {reason}"),
                priority: MailPriority::High,
            };
            if let Err(e) = self.store.mail_send(&notice) {
                tracing::warn!(error = %e, "mayor notice failed");
            }
        }

        let entry = state.agent(&address);
        entry.last_force_kill = Some(Utc::now());
        entry.force_kill_count += 1;
        entry.consecutive_failures = 0;
        state.save(self.town)?;

        telemetry::emit_event(
            "force_kill",
            self.store.actor(),
            serde_json::json!({"agent": address, "reason": reason}),
        );
        Ok(true)
    }

    /// Zombie scan over one rig's polecats.
    ///
    /// A polecat is a zombie iff it has no live session, no hooked work,
    /// and its workspace has been untouched past the staleness threshold.
    pub fn zombie_scan(
        &self,
        rig: &str,
        staleness: Duration,
        nuke: bool,
    ) -> anyhow::Result<ZombieReport> {
        let mut report = ZombieReport::default();
        let polecats_dir = self.town.rig_dir(rig).join("polecats");
        let Ok(entries) = std::fs::read_dir(&polecats_dir) else {
            return Ok(report);
        };

        let prefix = self.town.rig_prefix(rig);
        for entry in entries.filter_map(std::result::Result::ok) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            report.scanned.push(name.clone());

            let address = Address::Polecat {
                rig: rig.to_string(),
                name: name.clone(),
            };
            let session = address.session_name(&self.town.config.name);
            if self.mux.has_session(&session).unwrap_or(false) {
                continue;
            }

            let bead_id = address.bead_id(&prefix);
            let hooked = match self.store.show(&bead_id) {
                Ok(unit) => AgentBead::from_unit(&unit).hook_bead.is_some(),
                Err(StoreError::NotFound(_)) => false,
                Err(e) => return Err(e.into()),
            };
            if hooked {
                continue;
            }

            if !is_stale(&path, staleness) {
                continue;
            }
            report.zombies.push(name.clone());

            if nuke {
                let witness = Witness {
                    town: self.town,
                    store: self.store,
                    mux: self.mux,
                    vcs: self.vcs,
                    rig: rig.to_string(),
                };
                witness.nuke(&name)?;
                report.nuked.push(name.clone());

                // The witness should have gotten here first.
                let notice = MailDraft {
                    to: Address::Mayor.to_string(),
                    subject: format!("ZOMBIE: {rig}/{name}"),
                    body: format!(
                        "deacon nuked zombie polecat {rig}/{name}; \
                         {rig}/witness failed to clean it up"
                    ),
                    priority: MailPriority::High,
                };
                if let Err(e) = self.store.mail_send(&notice) {
                    tracing::warn!(error = %e, "zombie notice failed");
                }
            }
        }
        Ok(report)
    }
}

fn within_cooldown(last: Option<DateTime<Utc>>, cooldown: Duration) -> bool {
    let Some(last) = last else {
        return false;
    };
    let elapsed = Utc::now().signed_duration_since(last);
    elapsed
        .to_std()
        .map(|elapsed| elapsed < cooldown)
        .unwrap_or(true)
}

/// Workspace staleness: mtime of `.beads/last-touched` when present,
/// otherwise the directory itself.
fn is_stale(workdir: &std::path::Path, threshold: Duration) -> bool {
    let marker = workdir.join(".beads").join("last-touched");
    let probe = if marker.exists() { marker } else { workdir.to_path_buf() };
    let Ok(metadata) = std::fs::metadata(&probe) else {
        return false;
    };
    let Ok(modified) = metadata.modified() else {
        return false;
    };
    std::time::SystemTime::now()
        .duration_since(modified)
        .map(|elapsed| elapsed >= threshold)
        .unwrap_or(false)
}
