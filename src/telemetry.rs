//! Tracing setup and the append-only lifecycle events log.
//!
//! Traces go to stderr, filtered by `GT_LOG` (default: warn). Lifecycle
//! events (session_start, spawn, force_kill, nuke, escalation) go to a
//! user-level JSONL file so every gt invocation on the machine appends to
//! the same stream. Event emission is best-effort and never fails the
//! caller.

use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Guard returned by `init`; kept alive for the duration of main.
pub struct Telemetry;

/// Initialize tracing. Safe to call once per process.
pub fn init() -> Telemetry {
    let filter = EnvFilter::try_from_env("GT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    Telemetry
}

/// A single lifecycle event.
#[derive(Debug, Serialize)]
pub struct Event<'a> {
    pub ts: String,
    pub event: &'a str,
    pub actor: &'a str,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

/// Path of the user-level events file.
pub fn events_path() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gastown")
        .join("events.jsonl")
}

/// Append a lifecycle event. Best-effort: failures are logged and swallowed.
pub fn emit_event(event: &str, actor: &str, detail: serde_json::Value) {
    let record = Event {
        ts: chrono::Utc::now().to_rfc3339(),
        event,
        actor,
        detail,
    };
    if let Err(e) = append_event(&record) {
        tracing::warn!(event, error = %e, "failed to append lifecycle event");
    }
}

fn append_event(record: &Event<'_>) -> anyhow::Result<()> {
    let path = events_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    file.write_all(line.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_without_null_detail() {
        let ev = Event {
            ts: "2026-01-01T00:00:00Z".into(),
            event: "session_start",
            actor: "wyvern/polecats/toast",
            detail: serde_json::Value::Null,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("session_start"));
        assert!(!json.contains("detail"));
    }

    #[test]
    fn event_serializes_with_detail() {
        let ev = Event {
            ts: "2026-01-01T00:00:00Z".into(),
            event: "force_kill",
            actor: "deacon",
            detail: serde_json::json!({"target": "wyvern/polecats/toast"}),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("target"));
    }
}
