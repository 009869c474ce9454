//! The bd-CLI-backed store.
//!
//! Every call shells out to `bd` with the working directory set to the
//! resolved beads directory, `--json` on reads, and `--actor` on
//! mutations. Stderr is classified into the [`StoreError`] taxonomy so
//! callers can tell "not found" from "the tool is broken".

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ExitError;
use crate::subprocess::{RunOutput, Tool};

use super::issue::{IssueType, WorkUnit};
use super::mail::{MailDraft, MailMessage};
use super::{
    CreateOpts, IssueStore, ListFilter, Patch, Result, StepInfo, StoreError, StoreStats, Wisp,
    redirect,
};

const BD_TIMEOUT: Duration = Duration::from_secs(30);

/// Issue store backed by the `bd` CLI.
pub struct BdStore {
    beads_dir: PathBuf,
    actor: String,
}

impl BdStore {
    /// Open the store serving `workdir`, resolving any redirect.
    ///
    /// The redirect is re-resolved on every open; never hold a `BdStore`
    /// across invocations.
    pub fn open(workdir: &Path, actor: &str) -> Self {
        Self {
            beads_dir: redirect::resolve(workdir),
            actor: actor.to_string(),
        }
    }

    /// Open against an explicit beads directory (prefix routing).
    pub fn at(beads_dir: PathBuf, actor: &str) -> Self {
        Self {
            beads_dir,
            actor: actor.to_string(),
        }
    }

    pub fn beads_dir(&self) -> &Path {
        &self.beads_dir
    }

    fn bd(&self, args: &[&str]) -> Result<RunOutput> {
        let tool = Tool::new("bd")
            .args(args)
            .current_dir(&self.beads_dir)
            .timeout(BD_TIMEOUT)
            .env("BEADS_NO_DAEMON", "1")
            .install_hint("see the beads README for install instructions");
        let command = tool.describe();
        let output = tool.run().map_err(|e| from_spawn_error(&e, &command))?;
        if output.success() {
            Ok(output)
        } else {
            Err(classify(&command, &output.stderr))
        }
    }

    fn bd_mut(&self, args: &[&str]) -> Result<RunOutput> {
        let mut full: Vec<&str> = args.to_vec();
        full.push("--actor");
        full.push(&self.actor);
        self.bd(&full)
    }

    fn parse_units(output: &RunOutput, command: &str) -> Result<Vec<WorkUnit>> {
        serde_json::from_str(&output.stdout).map_err(|e| StoreError::Generic {
            command: command.to_string(),
            stderr: format!("unparseable JSON output: {e}"),
        })
    }
}

/// Map a Tool spawn failure into the store taxonomy.
fn from_spawn_error(e: &anyhow::Error, command: &str) -> StoreError {
    if let Some(exit) = e.downcast_ref::<ExitError>() {
        match exit {
            ExitError::ToolNotFound { .. } => return StoreError::NotInstalled,
            ExitError::Timeout { .. } => {
                return StoreError::Generic {
                    command: command.to_string(),
                    stderr: "timed out".to_string(),
                };
            }
            _ => {}
        }
    }
    StoreError::Generic {
        command: command.to_string(),
        stderr: e.to_string(),
    }
}

/// Classify a failed bd invocation by its stderr.
pub fn classify(command: &str, stderr: &str) -> StoreError {
    let lower = stderr.to_lowercase();
    if lower.contains("not a beads") || lower.contains("no beads repo") {
        StoreError::NotARepo(stderr.trim().to_string())
    } else if lower.contains("sync conflict") || lower.contains("merge conflict") {
        StoreError::SyncConflict(stderr.trim().to_string())
    } else if lower.contains("not found") || lower.contains("no such") {
        StoreError::NotFound(stderr.trim().to_string())
    } else {
        StoreError::Generic {
            command: command.to_string(),
            stderr: stderr.trim().to_string(),
        }
    }
}

impl IssueStore for BdStore {
    fn list(&self, filter: &ListFilter) -> Result<Vec<WorkUnit>> {
        let mut args = vec!["list".to_string(), "--json".to_string()];
        if let Some(status) = filter.status {
            args.push("--status".into());
            args.push(status.as_str().into());
        }
        if let Some(issue_type) = filter.issue_type {
            args.push("--type".into());
            args.push(issue_type.as_str().into());
        }
        if let Some(ref assignee) = filter.assignee {
            args.push("--assignee".into());
            args.push(assignee.clone());
        }
        if let Some(ref label) = filter.label {
            args.push("--label".into());
            args.push(label.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.bd(&arg_refs)?;
        Self::parse_units(&output, "bd list")
    }

    fn show(&self, id: &str) -> Result<WorkUnit> {
        let output = self.bd(&["show", id, "--json"])?;
        serde_json::from_str(&output.stdout).map_err(|e| StoreError::Generic {
            command: format!("bd show {id}"),
            stderr: format!("unparseable JSON output: {e}"),
        })
    }

    fn ready(&self, issue_type: Option<IssueType>) -> Result<Vec<WorkUnit>> {
        let mut args = vec!["ready", "--json"];
        let type_str;
        if let Some(t) = issue_type {
            type_str = t.as_str();
            args.push("--type");
            args.push(type_str);
        }
        let output = self.bd(&args)?;
        Self::parse_units(&output, "bd ready")
    }

    fn create(&self, opts: &CreateOpts) -> Result<WorkUnit> {
        let mut args: Vec<String> = vec!["create".into(), "--json".into()];
        if let Some(ref id) = opts.id {
            args.push("--id".into());
            args.push(id.clone());
        }
        args.push("--title".into());
        args.push(opts.title.clone());
        if !opts.description.is_empty() {
            args.push("--description".into());
            args.push(opts.description.clone());
        }
        if let Some(t) = opts.issue_type {
            args.push("--type".into());
            args.push(t.as_str().into());
        }
        if let Some(p) = opts.priority {
            args.push("--priority".into());
            args.push(p.to_string());
        }
        if let Some(ref assignee) = opts.assignee {
            args.push("--assignee".into());
            args.push(assignee.clone());
        }
        if let Some(ref parent) = opts.parent {
            args.push("--parent".into());
            args.push(parent.clone());
        }
        for label in &opts.labels {
            args.push("--label".into());
            args.push(label.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.bd_mut(&arg_refs)?;
        serde_json::from_str(&output.stdout).map_err(|e| StoreError::Generic {
            command: "bd create".to_string(),
            stderr: format!("unparseable JSON output: {e}"),
        })
    }

    fn update(&self, id: &str, patch: &Patch) -> Result<()> {
        let mut args: Vec<String> = vec!["update".into(), id.into()];
        if let Some(status) = patch.status {
            args.push("--status".into());
            args.push(status.as_str().into());
        }
        if let Some(ref assignee) = patch.assignee {
            args.push("--assignee".into());
            args.push(assignee.clone());
        }
        if let Some(priority) = patch.priority {
            args.push("--priority".into());
            args.push(priority.to_string());
        }
        if let Some(ref title) = patch.title {
            args.push("--title".into());
            args.push(title.clone());
        }
        if let Some(ref description) = patch.description {
            args.push("--description".into());
            args.push(description.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.bd_mut(&arg_refs)?;
        Ok(())
    }

    fn close(&self, ids: &[String], reason: Option<&str>) -> Result<()> {
        let mut args: Vec<&str> = vec!["close"];
        args.extend(ids.iter().map(String::as_str));
        if let Some(reason) = reason {
            args.push("--reason");
            args.push(reason);
        }
        self.bd_mut(&args)?;
        Ok(())
    }

    fn release(&self, id: &str, reason: Option<&str>) -> Result<()> {
        let mut args = vec!["release", id];
        if let Some(reason) = reason {
            args.push("--reason");
            args.push(reason);
        }
        self.bd_mut(&args)?;
        Ok(())
    }

    fn add_dep(&self, issue: &str, depends_on: &str) -> Result<()> {
        self.bd_mut(&["dep", "add", issue, depends_on])?;
        Ok(())
    }

    fn remove_dep(&self, issue: &str, depends_on: &str) -> Result<()> {
        self.bd_mut(&["dep", "remove", issue, depends_on])?;
        Ok(())
    }

    fn add_tracks(&self, tracker: &str, tracked: &str) -> Result<()> {
        self.bd_mut(&["dep", "add", tracker, tracked, "--type", "tracks"])?;
        Ok(())
    }

    fn slot_set(&self, id: &str, key: &str, value: &str) -> Result<()> {
        self.bd_mut(&["slot", "set", id, key, value])?;
        Ok(())
    }

    fn slot_get(&self, id: &str, key: &str) -> Result<Option<String>> {
        match self.bd(&["slot", "get", id, key]) {
            Ok(output) => {
                let value = output.stdout.trim();
                if value.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(value.to_string()))
                }
            }
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn slot_clear(&self, id: &str, key: &str) -> Result<()> {
        self.bd_mut(&["slot", "clear", id, key])?;
        Ok(())
    }

    fn mail_send(&self, draft: &MailDraft) -> Result<()> {
        let priority = draft.priority.to_string();
        self.bd_mut(&[
            "mail", "send", "--to", &draft.to, "--subject", &draft.subject, "--body", &draft.body,
            "--priority", &priority,
        ])?;
        Ok(())
    }

    fn mail_inbox(&self, unread_only: bool) -> Result<Vec<MailMessage>> {
        let mut args = vec!["mail", "inbox", "--json"];
        if unread_only {
            args.push("--unread");
        }
        let output = self.bd(&args)?;
        serde_json::from_str(&output.stdout).map_err(|e| StoreError::Generic {
            command: "bd mail inbox".to_string(),
            stderr: format!("unparseable JSON output: {e}"),
        })
    }

    fn mail_read(&self, id: &str) -> Result<MailMessage> {
        let output = self.bd(&["mail", "read", id, "--json"])?;
        serde_json::from_str(&output.stdout).map_err(|e| StoreError::Generic {
            command: format!("bd mail read {id}"),
            stderr: format!("unparseable JSON output: {e}"),
        })
    }

    fn mail_ack(&self, id: &str) -> Result<()> {
        self.bd_mut(&["mail", "ack", id])?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.bd(&["sync"])?;
        Ok(())
    }

    fn sync_from_main(&self) -> Result<()> {
        self.bd(&["sync", "--from-main"])?;
        Ok(())
    }

    fn stats(&self) -> Result<StoreStats> {
        let output = self.bd(&["stats", "--json"])?;
        serde_json::from_str(&output.stdout).map_err(|e| StoreError::Generic {
            command: "bd stats".to_string(),
            stderr: format!("unparseable JSON output: {e}"),
        })
    }

    fn cook(&self, formula: &str) -> Result<String> {
        let output = self.bd_mut(&["cook", formula])?;
        Ok(output.stdout.trim().to_string())
    }

    fn wisp(&self, formula: &str, vars: &[(String, String)]) -> Result<Wisp> {
        let mut args: Vec<String> = vec![
            "mol".into(),
            "wisp".into(),
            formula.into(),
            "--json".into(),
        ];
        for (key, value) in vars {
            args.push("--var".into());
            args.push(format!("{key}={value}"));
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.bd_mut(&arg_refs)?;
        serde_json::from_str(&output.stdout).map_err(|e| StoreError::Generic {
            command: format!("bd mol wisp {formula}"),
            stderr: format!("unparseable JSON output: {e}"),
        })
    }

    fn bond(&self, root: &str, target: &str) -> Result<()> {
        self.bd_mut(&["mol", "bond", root, target])?;
        Ok(())
    }

    fn current_step(&self, molecule: &str) -> Result<Option<StepInfo>> {
        match self.bd(&["mol", "current", molecule, "--json"]) {
            Ok(output) => {
                if output.stdout.trim().is_empty() || output.stdout.trim() == "null" {
                    return Ok(None);
                }
                serde_json::from_str(&output.stdout)
                    .map(Some)
                    .map_err(|e| StoreError::Generic {
                        command: format!("bd mol current {molecule}"),
                        stderr: format!("unparseable JSON output: {e}"),
                    })
            }
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn prime_context(&self) -> Result<String> {
        let output = self.bd(&["prime"])?;
        Ok(output.stdout)
    }

    fn actor(&self) -> &str {
        &self.actor
    }
}
