//! CLI subcommands.
//!
//! Each command resolves the same invocation context — town, identity,
//! adapters — and hands off to the core modules. The adapters here are
//! always the real ones; the core is tested against fakes.

pub mod convoy;
pub mod deacon;
pub mod doctor;
pub mod done;
pub mod handoff;
pub mod hook;
pub mod mail;
pub mod prime;
pub mod schema;
pub mod shutdown;
pub mod sling;
pub mod spawn;
pub mod start;
pub mod status;
pub mod witness;

use std::path::PathBuf;

use anyhow::Context;

use crate::beads::{BdStore, routes};
use crate::config::Town;
use crate::identity::{EnvSnapshot, Identity};
use crate::mux::TmuxAdapter;
use crate::vcs::GitAdapter;

/// Everything a command needs to act: where we are and who we are.
pub struct Invocation {
    pub town: Town,
    pub identity: Identity,
    pub cwd: PathBuf,
}

impl Invocation {
    pub fn resolve() -> anyhow::Result<Self> {
        let cwd = std::env::current_dir().context("determining current directory")?;
        let town = Town::discover(&cwd)?;
        let identity = crate::identity::resolve(&town, &cwd, &EnvSnapshot::from_env())?;
        Ok(Self {
            town,
            identity,
            cwd,
        })
    }

    /// The store serving the current workspace (redirect-resolved).
    pub fn store(&self) -> BdStore {
        BdStore::open(&self.cwd, &self.identity.address.to_string())
    }

    /// The store owning a specific work unit (prefix-routed).
    pub fn store_for(&self, bead: &str) -> BdStore {
        let dir = routes::store_dir_for(&self.town, bead);
        BdStore::at(dir, &self.identity.address.to_string())
    }

    pub const fn mux(&self) -> TmuxAdapter {
        TmuxAdapter::new()
    }

    pub const fn vcs(&self) -> GitAdapter {
        GitAdapter::new()
    }

    /// Print the loud mismatch warning if env and cwd disagree.
    pub fn warn_on_mismatch(&self) {
        if let Some(ref mismatch) = self.identity.mismatch {
            eprintln!("╔══════════════════════════════════════════════════════╗");
            eprintln!("║  ROLE MISMATCH — NOT GUESSING                        ║");
            eprintln!("╚══════════════════════════════════════════════════════╝");
            eprintln!("  environment says: {}", mismatch.env_says);
            eprintln!("  cwd implies:      {}", mismatch.cwd_says);
            eprintln!("  proceeding as:    {} (environment wins)", self.identity.address);
            eprintln!("  fix GT_ROLE/GT_RIG or cd to the right workspace");
        }
    }
}
