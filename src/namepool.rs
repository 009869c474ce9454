//! Themed worker name pools.
//!
//! Polecats get names from the rig's pool; once a pool has been mined past
//! the suffix threshold, names gain a numeric suffix so spawning never
//! blocks on pool exhaustion.

use rand::seq::IndexedRandom;

use crate::config::NamePoolConfig;

const DEFAULT_SUFFIX_THRESHOLD: u32 = 50;

const MAD_MAX: &[&str] = &[
    "furiosa", "nux", "slit", "rictus", "capable", "toast", "dag", "cheedo", "valkyrie", "ace",
    "scrotus", "chumbucket", "organic", "coma", "immortan",
];

const MINERALS: &[&str] = &[
    "quartz", "basalt", "gypsum", "mica", "shale", "flint", "jasper", "onyx", "pyrite", "galena",
    "beryl", "halite", "zircon", "garnet", "topaz",
];

const WASTELAND: &[&str] = &[
    "rust", "ash", "cinder", "grit", "smog", "ember", "scrap", "soot", "dust", "slag", "tar",
    "fume", "shard", "crank", "diesel",
];

/// A resolved name pool for one rig.
#[derive(Debug, Clone)]
pub struct NamePool {
    names: Vec<String>,
    suffix_threshold: u32,
}

impl NamePool {
    pub fn from_config(config: Option<&NamePoolConfig>) -> Self {
        let suffix_threshold = config
            .and_then(|c| c.suffix_threshold)
            .unwrap_or(DEFAULT_SUFFIX_THRESHOLD);

        let names = config.and_then(|c| c.names.clone()).unwrap_or_else(|| {
            let style = config.and_then(|c| c.style.as_deref()).unwrap_or("mad-max");
            style_names(style).iter().map(|s| (*s).to_string()).collect()
        });

        Self {
            names,
            suffix_threshold,
        }
    }

    /// Pick a name not in `taken`. Falls back to numeric suffixes once the
    /// pool is exhausted or the threshold is crossed.
    pub fn pick(&self, taken: &[String]) -> String {
        let used = taken.len() as u32;
        if used < self.suffix_threshold {
            let available: Vec<&String> = self
                .names
                .iter()
                .filter(|n| !taken.contains(n))
                .collect();
            if let Some(name) = available.choose(&mut rand::rng()) {
                return (*name).clone();
            }
        }

        // Suffix mode: base name plus the first free number.
        let base = self
            .names
            .choose(&mut rand::rng())
            .map_or("polecat", |s| s.as_str());
        let mut n = 2;
        loop {
            let candidate = format!("{base}-{n}");
            if !taken.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

fn style_names(style: &str) -> &'static [&'static str] {
    match style {
        "minerals" => MINERALS,
        "wasteland" => WASTELAND,
        _ => MAD_MAX,
    }
}
