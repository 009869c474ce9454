//! Crash-recovery checkpoints.
//!
//! Agents maintain `.runtime/checkpoint.json` themselves as they work; the
//! core only reads it back on session start so a crashed agent can pick up
//! where it left off. Checkpoints older than 24 hours are dropped.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const STALE_AFTER_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub step_title: Option<String>,
    #[serde(default)]
    pub molecule_id: Option<String>,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub hooked_bead: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub modified_files: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.updated_at) > chrono::Duration::hours(STALE_AFTER_HOURS)
    }

    /// Render for display in the prime output.
    pub fn render(&self) -> String {
        let mut out = String::from("RECOVERED CHECKPOINT\n");
        if let Some(ref title) = self.step_title {
            let _ = writeln!(out, "  working on: {title}");
        }
        if let (Some(mol), Some(step)) = (&self.molecule_id, &self.current_step) {
            let _ = writeln!(out, "  molecule:   {mol} (step {step})");
        }
        if let Some(ref bead) = self.hooked_bead {
            let _ = writeln!(out, "  hooked:     {bead}");
        }
        if let Some(ref branch) = self.branch {
            let _ = writeln!(out, "  branch:     {branch}");
        }
        if !self.modified_files.is_empty() {
            let _ = writeln!(out, "  modified:   {}", self.modified_files.join(", "));
        }
        if let Some(ref notes) = self.notes {
            let _ = writeln!(out, "  notes:      {notes}");
        }
        let _ = writeln!(out, "  updated:    {}", self.updated_at.to_rfc3339());
        out
    }
}

pub fn checkpoint_path(workspace: &Path) -> PathBuf {
    workspace.join(".runtime").join("checkpoint.json")
}

/// Load the workspace checkpoint, dropping it if stale or unreadable.
pub fn load_fresh(workspace: &Path) -> Option<Checkpoint> {
    let path = checkpoint_path(workspace);
    let contents = std::fs::read_to_string(&path).ok()?;
    let Ok(checkpoint) = serde_json::from_str::<Checkpoint>(&contents) else {
        tracing::warn!(path = %path.display(), "unreadable checkpoint, dropping");
        let _ = std::fs::remove_file(&path);
        return None;
    };
    if checkpoint.is_stale_at(Utc::now()) {
        tracing::info!(path = %path.display(), "stale checkpoint, dropping");
        let _ = std::fs::remove_file(&path);
        return None;
    }
    Some(checkpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(updated_at: DateTime<Utc>) -> Checkpoint {
        Checkpoint {
            step_title: Some("wire up parser".into()),
            molecule_id: Some("gt-mol1".into()),
            current_step: Some("gt-mol1.3".into()),
            hooked_bead: Some("gt-u1".into()),
            branch: Some("polecat/toast".into()),
            modified_files: vec!["src/parser.rs".into()],
            notes: Some("halfway through".into()),
            updated_at,
        }
    }

    #[test]
    fn staleness_boundary() {
        let now = Utc::now();
        assert!(!checkpoint(now - chrono::Duration::hours(23)).is_stale_at(now));
        assert!(checkpoint(now - chrono::Duration::hours(25)).is_stale_at(now));
    }

    #[test]
    fn fresh_checkpoint_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let cp = checkpoint(Utc::now());
        std::fs::write(&path, serde_json::to_string(&cp).unwrap()).unwrap();

        let loaded = load_fresh(dir.path()).expect("should load");
        assert_eq!(loaded.hooked_bead.as_deref(), Some("gt-u1"));
        assert!(path.is_file(), "fresh checkpoint must not be removed");
    }

    #[test]
    fn stale_checkpoint_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let cp = checkpoint(Utc::now() - chrono::Duration::hours(48));
        std::fs::write(&path, serde_json::to_string(&cp).unwrap()).unwrap();

        assert!(load_fresh(dir.path()).is_none());
        assert!(!path.is_file(), "stale checkpoint must be removed");
    }

    #[test]
    fn garbage_checkpoint_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();

        assert!(load_fresh(dir.path()).is_none());
        assert!(!path.is_file());
    }

    #[test]
    fn missing_checkpoint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_fresh(dir.path()).is_none());
    }

    #[test]
    fn render_names_the_essentials() {
        let out = checkpoint(Utc::now()).render();
        assert!(out.contains("wire up parser"));
        assert!(out.contains("gt-u1"));
        assert!(out.contains("polecat/toast"));
        assert!(out.contains("src/parser.rs"));
    }
}
