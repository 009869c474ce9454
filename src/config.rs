//! Town and rig configuration.
//!
//! All persisted orchestrator state is JSON under the town root (see the
//! workspace layout in the README). Config structs follow one rule: load
//! and parse are split so parsing is testable without a filesystem.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ExitError;

/// mayor/town.json — identity of the town itself.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TownConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_name: Option<String>,
}

/// mayor/rigs.json — the rig registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RigsRegistry {
    #[serde(default)]
    pub rigs: BTreeMap<String, RigEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RigEntry {
    pub git_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beads: Option<RigBeads>,
    pub added_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RigBeads {
    pub repo: String,
    pub prefix: String,
}

/// mayor/accounts.json — runtime account handles.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AccountsConfig {
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccountEntry {
    pub email: String,
    pub config_dir: String,
}

/// mayor/daemon.json — heartbeat and patrol schedule.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DaemonConfig {
    #[serde(default = "default_heartbeat")]
    pub heartbeat: u64,
    #[serde(default)]
    pub patrols: BTreeMap<String, PatrolEntry>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            heartbeat: default_heartbeat(),
            patrols: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PatrolEntry {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between patrol rounds.
    pub interval: u64,
    pub agent: String,
}

/// `<rig>/config.json` — the rig's own identity.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RigConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub git_url: String,
    pub beads: RigBeads,
}

/// `<rig>/settings/config.json` — per-rig tunables.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RigSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_queue: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namepool: Option<NamePoolConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crew: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<crate::runtime::RuntimeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

/// Worker name pool selection: a built-in style or an explicit list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct NamePoolConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix_threshold: Option<u32>,
}

macro_rules! json_config {
    ($ty:ty, $label:expr) => {
        impl $ty {
            pub fn load(path: &Path) -> anyhow::Result<Self> {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                Self::parse(&contents)
            }

            pub fn parse(json: &str) -> anyhow::Result<Self> {
                serde_json::from_str(json)
                    .map_err(|e| ExitError::Config(format!("invalid {}: {e}", $label)).into())
            }

            pub fn save(&self, path: &Path) -> anyhow::Result<()> {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                let json = serde_json::to_string_pretty(self)?;
                std::fs::write(path, json + "\n")
                    .with_context(|| format!("writing {}", path.display()))
            }
        }
    };
}

json_config!(TownConfig, "town.json");
json_config!(RigsRegistry, "rigs.json");
json_config!(AccountsConfig, "accounts.json");
json_config!(DaemonConfig, "daemon.json");
json_config!(RigConfig, "rig config.json");
json_config!(RigSettings, "rig settings/config.json");

const fn default_true() -> bool {
    true
}
const fn default_heartbeat() -> u64 {
    60
}

/// A located town: root directory plus the loaded town config.
#[derive(Debug, Clone)]
pub struct Town {
    pub root: PathBuf,
    pub config: TownConfig,
}

impl Town {
    /// Walk up from `start` looking for `mayor/town.json`.
    pub fn discover(start: &Path) -> anyhow::Result<Self> {
        let mut dir = start.to_path_buf();
        loop {
            let marker = dir.join("mayor").join("town.json");
            if marker.is_file() {
                let config = TownConfig::load(&marker)?;
                return Ok(Self { root: dir, config });
            }
            if !dir.pop() {
                anyhow::bail!(
                    "no town found at or above {} — run `gt start` to create one",
                    start.display()
                );
            }
        }
    }

    /// Discover from the current directory.
    pub fn discover_cwd() -> anyhow::Result<Self> {
        let cwd = std::env::current_dir().context("determining current directory")?;
        Self::discover(&cwd)
    }

    pub fn mayor_dir(&self) -> PathBuf {
        self.root.join("mayor")
    }

    pub fn rig_dir(&self, rig: &str) -> PathBuf {
        self.root.join(rig)
    }

    /// The canonical clone for a rig (owns the rig's beads store).
    pub fn rig_clone(&self, rig: &str) -> PathBuf {
        self.root.join(rig).join("mayor").join("rig")
    }

    pub fn polecat_dir(&self, rig: &str, name: &str) -> PathBuf {
        self.root.join(rig).join("polecats").join(name)
    }

    pub fn rigs(&self) -> anyhow::Result<RigsRegistry> {
        let path = self.mayor_dir().join("rigs.json");
        if path.is_file() {
            RigsRegistry::load(&path)
        } else {
            Ok(RigsRegistry::default())
        }
    }

    pub fn accounts(&self) -> anyhow::Result<AccountsConfig> {
        let path = self.mayor_dir().join("accounts.json");
        if path.is_file() {
            AccountsConfig::load(&path)
        } else {
            Ok(AccountsConfig::default())
        }
    }

    pub fn daemon(&self) -> anyhow::Result<DaemonConfig> {
        let path = self.mayor_dir().join("daemon.json");
        if path.is_file() {
            DaemonConfig::load(&path)
        } else {
            Ok(DaemonConfig::default())
        }
    }

    pub fn rig_settings(&self, rig: &str) -> anyhow::Result<RigSettings> {
        let path = self.rig_dir(rig).join("settings").join("config.json");
        if path.is_file() {
            RigSettings::load(&path)
        } else {
            Ok(RigSettings::default())
        }
    }

    /// The issue prefix for a rig, from the registry (default "gt").
    pub fn rig_prefix(&self, rig: &str) -> String {
        self.rigs()
            .ok()
            .and_then(|r| r.rigs.get(rig).cloned())
            .and_then(|e| e.beads)
            .map_or_else(|| "gt".to_string(), |b| b.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn town_fixture() -> (tempfile::TempDir, Town) {
        let dir = tempfile::tempdir().unwrap();
        let town_json = dir.path().join("mayor").join("town.json");
        std::fs::create_dir_all(town_json.parent().unwrap()).unwrap();
        std::fs::write(
            &town_json,
            r#"{"type":"town","version":1,"name":"gastown"}"#,
        )
        .unwrap();
        let town = Town::discover(dir.path()).unwrap();
        (dir, town)
    }

    #[test]
    fn parse_town_config() {
        let config = TownConfig::parse(
            r#"{"type":"town","version":1,"name":"gastown","owner":"alice"}"#,
        )
        .unwrap();
        assert_eq!(config.kind, "town");
        assert_eq!(config.name, "gastown");
        assert_eq!(config.owner.as_deref(), Some("alice"));
        assert!(config.public_name.is_none());
    }

    #[test]
    fn parse_malformed_config() {
        let result = TownConfig::parse("not json");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("town.json"));
    }

    #[test]
    fn parse_rigs_registry() {
        let registry = RigsRegistry::parse(
            r#"{"rigs":{"wyvern":{"git_url":"https://example.com/w.git",
                "beads":{"repo":"mayor/rig","prefix":"wy"},
                "added_at":"2026-01-01T00:00:00Z"}}}"#,
        )
        .unwrap();
        let rig = registry.rigs.get("wyvern").unwrap();
        assert_eq!(rig.beads.as_ref().unwrap().prefix, "wy");
    }

    #[test]
    fn discover_walks_up() {
        let (dir, town) = town_fixture();
        let nested = dir.path().join("wyvern").join("polecats").join("toast");
        std::fs::create_dir_all(&nested).unwrap();
        let found = Town::discover(&nested).unwrap();
        assert_eq!(found.root, town.root);
        assert_eq!(found.config.name, "gastown");
    }

    #[test]
    fn discover_fails_outside_town() {
        let dir = tempfile::tempdir().unwrap();
        let result = Town::discover(dir.path());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("gt start"));
    }

    #[test]
    fn rig_prefix_defaults_to_gt() {
        let (_dir, town) = town_fixture();
        assert_eq!(town.rig_prefix("nowhere"), "gt");
    }

    #[test]
    fn rig_prefix_from_registry() {
        let (dir, town) = town_fixture();
        let registry = RigsRegistry::parse(
            r#"{"rigs":{"wyvern":{"git_url":"u","beads":{"repo":"r","prefix":"wy"},
                "added_at":"2026-01-01T00:00:00Z"}}}"#,
        )
        .unwrap();
        registry
            .save(&dir.path().join("mayor").join("rigs.json"))
            .unwrap();
        assert_eq!(town.rig_prefix("wyvern"), "wy");
    }

    #[test]
    fn daemon_defaults() {
        let daemon = DaemonConfig::parse("{}").unwrap();
        assert_eq!(daemon.heartbeat, 60);
        assert!(daemon.patrols.is_empty());
    }

    #[test]
    fn layout_paths() {
        let (_dir, town) = town_fixture();
        assert!(town.rig_clone("wyvern").ends_with("wyvern/mayor/rig"));
        assert!(
            town.polecat_dir("wyvern", "toast")
                .ends_with("wyvern/polecats/toast")
        );
    }
}
