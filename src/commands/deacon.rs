//! `gt deacon` — health rounds, force-kill, zombie scan, patrol.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Args, Subcommand};

use super::Invocation;
use crate::address::Address;
use crate::deacon::{
    DEFAULT_ZOMBIE_STALENESS, Deacon, HealthCheckOptions, HealthVerdict,
};
use crate::error::ExitError;

#[derive(Debug, Args)]
pub struct DeaconArgs {
    #[command(subcommand)]
    pub command: DeaconCommand,
}

#[derive(Debug, Subcommand)]
pub enum DeaconCommand {
    /// Nudge an agent and watch its bead; exits 2 when a kill is due
    HealthCheck {
        agent: String,
        /// Seconds to wait for the bead to move
        #[arg(long)]
        timeout: Option<u64>,
        /// Consecutive failures before recommending a kill
        #[arg(long)]
        failures: Option<u32>,
    },
    /// Kill an agent's session and mark its bead killed
    ForceKill {
        agent: String,
        #[arg(long, default_value = "unresponsive")]
        reason: String,
        /// Skip the mayor notification
        #[arg(long)]
        quiet: bool,
    },
    /// Sweep a rig (or all rigs) for dead polecats
    ZombieScan {
        rig: Option<String>,
        /// Actually nuke what the scan finds
        #[arg(long)]
        nuke: bool,
        /// Staleness threshold in seconds
        #[arg(long)]
        staleness: Option<u64>,
    },
    /// Long-lived patrol: zombie scans on the daemon heartbeat
    Patrol,
}

impl DeaconArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let invocation = Invocation::resolve()?;
        invocation.warn_on_mismatch();

        // Route through the store that owns the target's agent bead; the
        // town store is the default for town-wide duties.
        let store_dir = match &self.command {
            DeaconCommand::HealthCheck { agent, .. }
            | DeaconCommand::ForceKill { agent, .. } => {
                let address: Address = agent.parse()?;
                let prefix = address
                    .rig()
                    .map_or_else(|| "gt".to_string(), |rig| invocation.town.rig_prefix(rig));
                crate::beads::routes::store_dir_for(
                    &invocation.town,
                    &address.bead_id(&prefix),
                )
            }
            DeaconCommand::ZombieScan { .. } | DeaconCommand::Patrol => {
                invocation.town.root.join(".beads")
            }
        };
        let store = crate::beads::BdStore::at(store_dir, "deacon");
        let mux = invocation.mux();
        let vcs = invocation.vcs();
        let deacon = Deacon {
            town: &invocation.town,
            store: &store,
            mux: &mux,
            vcs: &vcs,
        };

        match &self.command {
            DeaconCommand::HealthCheck {
                agent,
                timeout,
                failures,
            } => {
                let address: Address = agent.parse()?;
                let opts = HealthCheckOptions {
                    timeout: timeout.map(Duration::from_secs),
                    failure_threshold: *failures,
                    ..Default::default()
                };
                match deacon.health_check(&address, &opts)? {
                    HealthVerdict::Responded => println!("{agent}: responded"),
                    HealthVerdict::Cooldown => println!("{agent}: within force-kill cooldown"),
                    HealthVerdict::NoSession => println!("{agent}: no session"),
                    HealthVerdict::Failed { consecutive } => {
                        println!("{agent}: silent ({consecutive} consecutive)");
                    }
                    HealthVerdict::ShouldForceKill { consecutive } => {
                        return Err(ExitError::ShouldForceKill(format!(
                            "{agent} silent for {consecutive} consecutive rounds"
                        ))
                        .into());
                    }
                }
            }
            DeaconCommand::ForceKill {
                agent,
                reason,
                quiet,
            } => {
                let address: Address = agent.parse()?;
                if deacon.force_kill(&address, reason, !quiet, None)? {
                    println!("killed {agent}");
                } else {
                    println!("{agent}: within cooldown, not killed");
                }
            }
            DeaconCommand::ZombieScan {
                rig,
                nuke,
                staleness,
            } => {
                let staleness = staleness
                    .map_or(DEFAULT_ZOMBIE_STALENESS, Duration::from_secs);
                let rigs: Vec<String> = match rig {
                    Some(rig) => vec![rig.clone()],
                    None => invocation.town.rigs()?.rigs.keys().cloned().collect(),
                };
                for rig in rigs {
                    let report = deacon.zombie_scan(&rig, staleness, *nuke)?;
                    println!(
                        "{rig}: {} scanned, {} zombies, {} nuked",
                        report.scanned.len(),
                        report.zombies.len(),
                        report.nuked.len()
                    );
                    for name in &report.zombies {
                        println!("  zombie: {rig}/{name}");
                    }
                }
            }
            DeaconCommand::Patrol => {
                let heartbeat = invocation.town.daemon()?.heartbeat.max(5);
                let cancelled = Arc::new(AtomicBool::new(false));
                let flag = Arc::clone(&cancelled);
                ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

                while !cancelled.load(Ordering::SeqCst) {
                    for rig in invocation.town.rigs()?.rigs.keys() {
                        match deacon.zombie_scan(rig, DEFAULT_ZOMBIE_STALENESS, true) {
                            Ok(report) if !report.nuked.is_empty() => {
                                tracing::info!(rig = %rig, nuked = report.nuked.len(), "zombies cleared");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(rig = %rig, error = %e, "zombie scan failed"),
                        }
                    }
                    let deadline =
                        std::time::Instant::now() + Duration::from_secs(heartbeat);
                    while std::time::Instant::now() < deadline {
                        if cancelled.load(Ordering::SeqCst) {
                            return Ok(());
                        }
                        std::thread::sleep(Duration::from_millis(250));
                    }
                }
            }
        }
        Ok(())
    }
}
