//! `gt sling` — dispatch work to agents.

use clap::Args;

use super::Invocation;
use crate::beads::{BdStore, routes, valid_bead_id};
use crate::sling::{Dispatch, SlingOptions};

#[derive(Debug, Args)]
pub struct SlingArgs {
    /// Work unit ids (or a formula name with --on), optionally followed by
    /// a target: an agent address, a rig, `deacon/dogs`, or `.`
    #[arg(required = true)]
    pub items: Vec<String>,
    /// Take over hooks that are already attached
    #[arg(long)]
    pub force: bool,
    /// Allow spawning where dispatch needs it (dogs)
    #[arg(long)]
    pub create: bool,
    /// Act as this agent address instead of the resolved identity
    #[arg(long)]
    pub agent: Option<String>,
    /// Bond the named work unit under the instantiated formula
    #[arg(long)]
    pub on: Option<String>,
    /// Template variables, key=value (repeatable)
    #[arg(long = "var")]
    pub vars: Vec<String>,
    /// Natural-language instructions recorded on the hooked unit
    #[arg(long)]
    pub args: Option<String>,
    /// Skip convoy auto-tracking
    #[arg(long)]
    pub no_convoy: bool,
    /// Record the dispatched unit as delegated from this parent
    #[arg(long)]
    pub delegate_from: Option<String>,
    /// Resolve and report without mutating anything
    #[arg(long)]
    pub dry_run: bool,
}

impl SlingArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let invocation = Invocation::resolve()?;
        invocation.warn_on_mismatch();

        let (beads, formula, target) = self.split_items()?;

        let actor = self
            .agent
            .clone()
            .unwrap_or_else(|| invocation.identity.address.to_string());
        let self_address = actor.parse()?;

        // Route through the store that owns the first unit.
        let store_dir = routes::store_dir_for(&invocation.town, &beads[0]);
        let store = BdStore::at(store_dir, &actor);

        let mux = invocation.mux();
        let vcs = invocation.vcs();
        let dispatch = Dispatch {
            town: &invocation.town,
            store: &store,
            mux: &mux,
            vcs: &vcs,
            self_address,
        };

        let opts = SlingOptions {
            force: self.force,
            create: self.create,
            no_convoy: self.no_convoy,
            dry_run: self.dry_run,
            formula,
            vars: self
                .vars
                .iter()
                .filter_map(|v| {
                    v.split_once('=')
                        .map(|(k, value)| (k.to_string(), value.to_string()))
                })
                .collect(),
            args: self.args.clone(),
            delegate_from: self.delegate_from.clone(),
            nudge_timeout: None,
        };

        let reports = dispatch.sling(&beads, target.as_deref(), &opts)?;
        for report in &reports {
            let verb = if report.dry_run {
                "would hook"
            } else {
                "hooked"
            };
            let spawn_note = if report.spawned { " (spawned)" } else { "" };
            println!(
                "{verb} {} → {}{spawn_note}",
                report.hook_target, report.agent
            );
        }
        Ok(())
    }

    /// Positional grammar: beads... [target], or formula --on bead [target].
    fn split_items(&self) -> anyhow::Result<(Vec<String>, Option<String>, Option<String>)> {
        let mut items = self.items.clone();

        // A trailing non-bead item is the target.
        let target = if items.len() >= 2 && !valid_bead_id(items[items.len() - 1].as_str()) {
            items.pop()
        } else if items.len() == 1 && items[0] == "." {
            items.pop()
        } else {
            None
        };

        if let Some(ref on) = self.on {
            if items.len() != 1 {
                anyhow::bail!("--on takes exactly one formula name, got {items:?}");
            }
            return Ok((vec![on.clone()], Some(items.remove(0)), target));
        }
        if items.is_empty() {
            anyhow::bail!("nothing to sling");
        }
        Ok((items, None, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str], on: Option<&str>) -> SlingArgs {
        SlingArgs {
            items: items.iter().map(|s| (*s).to_string()).collect(),
            force: false,
            create: false,
            agent: None,
            on: on.map(String::from),
            vars: vec![],
            args: None,
            no_convoy: false,
            delegate_from: None,
            dry_run: false,
        }
    }

    #[test]
    fn beads_with_target() {
        let (beads, formula, target) =
            args(&["gt-u1", "gt-u2", "wyvern"], None).split_items().unwrap();
        assert_eq!(beads, vec!["gt-u1", "gt-u2"]);
        assert!(formula.is_none());
        assert_eq!(target.as_deref(), Some("wyvern"));
    }

    #[test]
    fn single_bead_no_target() {
        let (beads, _, target) = args(&["gt-u1"], None).split_items().unwrap();
        assert_eq!(beads, vec!["gt-u1"]);
        assert!(target.is_none());
    }

    #[test]
    fn address_target_is_recognized() {
        let (beads, _, target) = args(&["gt-u1", "wyvern/polecats/toast"], None)
            .split_items()
            .unwrap();
        assert_eq!(beads, vec!["gt-u1"]);
        assert_eq!(target.as_deref(), Some("wyvern/polecats/toast"));
    }

    #[test]
    fn formula_with_on() {
        let (beads, formula, target) = args(&["mega-feature", "wyvern"], Some("gt-u1"))
            .split_items()
            .unwrap();
        assert_eq!(beads, vec!["gt-u1"]);
        assert_eq!(formula.as_deref(), Some("mega-feature"));
        assert_eq!(target.as_deref(), Some("wyvern"));
    }

    #[test]
    fn self_target_dot() {
        let (beads, _, target) = args(&["gt-u1", "."], None).split_items().unwrap();
        assert_eq!(beads, vec!["gt-u1"]);
        assert_eq!(target.as_deref(), Some("."));
    }
}
