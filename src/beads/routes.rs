//! Prefix routing.
//!
//! Work-unit ids carry a prefix (`gt-ab3` → `gt`); the prefix decides which
//! store owns the unit. `gm-` and `hq-` always route to the town-level
//! store; everything else goes through the town's `routes.jsonl` manifest,
//! one JSON object per line.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::Town;

/// One line of mayor/routes.jsonl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub prefix: String,
    pub rig: String,
}

/// Extract the prefix of a work-unit id (`wy-ab3` → `wy`).
pub fn id_prefix(id: &str) -> Option<&str> {
    let (prefix, rest) = id.split_once('-')?;
    if prefix.is_empty() || rest.is_empty() {
        return None;
    }
    Some(prefix)
}

/// Load the routes manifest. Missing file means no rig routes yet.
pub fn load_routes(town: &Town) -> Vec<Route> {
    let path = town.mayor_dir().join("routes.jsonl");
    let Ok(contents) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<Route>(line) {
            Ok(route) => Some(route),
            Err(e) => {
                tracing::warn!(line, error = %e, "skipping malformed route");
                None
            }
        })
        .collect()
}

/// Append a route for a rig's prefix.
pub fn add_route(town: &Town, prefix: &str, rig: &str) -> anyhow::Result<()> {
    let path = town.mayor_dir().join("routes.jsonl");
    let mut routes = load_routes(town);
    if routes.iter().any(|r| r.prefix == prefix) {
        return Ok(());
    }
    routes.push(Route {
        prefix: prefix.to_string(),
        rig: rig.to_string(),
    });
    let mut out = String::new();
    for route in &routes {
        out.push_str(&serde_json::to_string(route)?);
        out.push('\n');
    }
    std::fs::write(&path, out)?;
    Ok(())
}

/// Resolve the beads directory owning `id`.
///
/// `gm-`/`hq-` are town-level by definition; unknown prefixes also fall
/// back to the town store (the store itself will report NotFound).
pub fn store_dir_for(town: &Town, id: &str) -> PathBuf {
    let town_store = town.root.join(".beads");
    let Some(prefix) = id_prefix(id) else {
        return town_store;
    };
    if prefix == "gm" || prefix == "hq" {
        return town_store;
    }
    for route in load_routes(town) {
        if route.prefix == prefix {
            return town.rig_clone(&route.rig).join(".beads");
        }
    }
    town_store
}
