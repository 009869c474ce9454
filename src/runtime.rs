//! Agent runtime resolution.
//!
//! A runtime is the LLM CLI launched inside an agent's pane. Rigs may pick
//! a preset by name or supply a full command line; the spawner only needs
//! two things from us: the startup command to type into the pane, and the
//! process name to poll for readiness.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Per-rig runtime selection (rig settings `runtime` block).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RuntimeConfig {
    /// Preset name (claude | codex | gemini) or a binary on PATH.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Extra args appended to the preset's command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Env var the runtime exports carrying its session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id_env: Option<String>,
}

/// A fully resolved runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runtime {
    pub command: String,
    pub args: Vec<String>,
    /// Pane command name that signals the runtime is up.
    pub process_name: String,
    pub session_id_env: String,
}

impl Runtime {
    /// Resolve a runtime config against the built-in presets.
    pub fn resolve(config: Option<&RuntimeConfig>) -> Self {
        let command = config
            .and_then(|c| c.command.as_deref())
            .unwrap_or("claude");

        let mut runtime = match command {
            "claude" => Self {
                command: "claude".into(),
                args: vec!["--dangerously-skip-permissions".into()],
                process_name: "claude".into(),
                session_id_env: "CLAUDE_SESSION_ID".into(),
            },
            "codex" => Self {
                command: "codex".into(),
                args: vec![],
                process_name: "codex".into(),
                session_id_env: "GT_SESSION_ID".into(),
            },
            "gemini" => Self {
                command: "gemini".into(),
                args: vec!["--approval-mode".into(), "yolo".into()],
                process_name: "gemini".into(),
                session_id_env: "GT_SESSION_ID".into(),
            },
            other => Self {
                command: other.into(),
                args: vec![],
                process_name: other.into(),
                session_id_env: "GT_SESSION_ID".into(),
            },
        };

        if let Some(extra) = config.and_then(|c| c.args.clone()) {
            runtime.args.extend(extra);
        }
        if let Some(env) = config.and_then(|c| c.session_id_env.clone()) {
            runtime.session_id_env = env;
        }
        runtime
    }

    /// The single command line typed into the pane.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}
