//! `gt witness` — the per-rig patrol.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Args, Subcommand};

use super::Invocation;
use crate::address::Address;
use crate::beads::BdStore;
use crate::witness::Witness;

#[derive(Debug, Args)]
pub struct WitnessArgs {
    #[command(subcommand)]
    pub command: WitnessCommand,
}

#[derive(Debug, Subcommand)]
pub enum WitnessCommand {
    /// Survey polecats and process protocol mail
    Patrol {
        /// Rig to patrol (defaults to this witness's rig)
        rig: Option<String>,
        /// Keep patrolling at this interval (seconds)
        #[arg(long)]
        watch: Option<u64>,
    },
}

impl WitnessArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let invocation = Invocation::resolve()?;
        invocation.warn_on_mismatch();

        let WitnessCommand::Patrol { rig, watch } = &self.command;
        let rig = rig
            .clone()
            .or_else(|| invocation.identity.address.rig().map(String::from))
            .ok_or_else(|| anyhow::anyhow!("no rig: pass one or run from a rig workspace"))?;

        let actor = Address::Witness { rig: rig.clone() }.to_string();
        let store = BdStore::at(
            invocation.town.rig_clone(&rig).join(".beads"),
            &actor,
        );
        let mux = invocation.mux();
        let vcs = invocation.vcs();
        let witness = Witness {
            town: &invocation.town,
            store: &store,
            mux: &mux,
            vcs: &vcs,
            rig: rig.clone(),
        };

        let Some(interval) = watch else {
            let report = witness.patrol()?;
            print_report(&rig, &report);
            return Ok(());
        };

        // Long-lived mode: check the cancellation flag at every iteration
        // boundary.
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

        while !cancelled.load(Ordering::SeqCst) {
            match witness.patrol() {
                Ok(report) => print_report(&rig, &report),
                Err(e) => tracing::warn!(error = %e, "patrol round failed"),
            }
            let deadline = std::time::Instant::now() + Duration::from_secs(*interval);
            while std::time::Instant::now() < deadline {
                if cancelled.load(Ordering::SeqCst) {
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(250));
            }
        }
        Ok(())
    }
}

fn print_report(rig: &str, report: &crate::witness::PatrolReport) {
    println!(
        "patrol {rig}: {} surveyed, {} nudged, {} need cleanup, {} nuked, {} escalated",
        report.surveyed.len(),
        report.nudged.len(),
        report.needs_cleanup.len(),
        report.nuked.len(),
        report.escalated.len()
    );
    for name in &report.escalated {
        println!("  escalated: {name}");
    }
    for name in &report.needs_cleanup {
        println!("  needs cleanup: {name}");
    }
}
