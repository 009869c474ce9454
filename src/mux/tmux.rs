//! tmux-backed multiplexer.

use std::path::Path;
use std::time::Duration;

use crate::error::ExitError;
use crate::subprocess::{RunOutput, Tool};

use super::{Multiplexer, MuxError, Pane, Result};

const TMUX_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default)]
pub struct TmuxAdapter;

impl TmuxAdapter {
    pub const fn new() -> Self {
        Self
    }

    fn tmux(args: &[&str]) -> Result<RunOutput> {
        Tool::new("tmux")
            .args(args)
            .timeout(TMUX_TIMEOUT)
            .run()
            .map_err(|e| {
                if let Some(ExitError::ToolNotFound { .. }) = e.downcast_ref::<ExitError>() {
                    MuxError::NotInstalled
                } else {
                    MuxError::CommandFailed(e.to_string())
                }
            })
    }
}

impl Multiplexer for TmuxAdapter {
    fn has_session(&self, name: &str) -> Result<bool> {
        let output = Self::tmux(&["has-session", "-t", name])?;
        Ok(output.success())
    }

    fn new_session(&self, name: &str, cwd: &Path) -> Result<()> {
        if !cwd.is_dir() {
            return Err(MuxError::SpawnFailed(format!(
                "working directory does not exist: {}",
                cwd.display()
            )));
        }
        let cwd_str = cwd.display().to_string();
        let output = Self::tmux(&["new-session", "-d", "-s", name, "-c", &cwd_str])?;
        if output.success() {
            Ok(())
        } else {
            Err(MuxError::SpawnFailed(output.stderr.trim().to_string()))
        }
    }

    fn kill_session(&self, name: &str) -> Result<()> {
        // Already-dead sessions are fine; killing is idempotent.
        let _ = Self::tmux(&["kill-session", "-t", name])?;
        Ok(())
    }

    fn list_sessions(&self) -> Result<Vec<String>> {
        let output = Self::tmux(&["list-sessions", "-F", "#{session_name}"])?;
        if !output.success() {
            // No server running means no sessions.
            return Ok(Vec::new());
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn list_panes(&self, session: &str) -> Result<Vec<Pane>> {
        let output = Self::tmux(&[
            "list-panes",
            "-t",
            session,
            "-F",
            "#{pane_id}\t#{pane_pid}\t#{pane_current_command}",
        ])?;
        if !output.success() {
            return Err(MuxError::NotFound(session.to_string()));
        }
        Ok(output
            .stdout
            .lines()
            .filter_map(|line| {
                let mut parts = line.split('\t');
                let pane_id = parts.next()?.to_string();
                let pid = parts.next()?.trim().parse().ok()?;
                let command = parts.next().unwrap_or("").to_string();
                Some(Pane {
                    pane_id,
                    pid,
                    command,
                })
            })
            .collect())
    }

    fn send_keys(&self, session: &str, text: &str, enter: bool) -> Result<()> {
        // -l literal mode; -- guards text beginning with a dash.
        let output = Self::tmux(&["send-keys", "-t", session, "-l", "--", text])?;
        if !output.success() {
            return Err(MuxError::NotFound(session.to_string()));
        }
        if enter {
            let output = Self::tmux(&["send-keys", "-t", session, "Enter"])?;
            if !output.success() {
                return Err(MuxError::NotFound(session.to_string()));
            }
        }
        Ok(())
    }

    fn send_raw(&self, session: &str, keycode: &str) -> Result<()> {
        let output = Self::tmux(&["send-keys", "-t", session, keycode])?;
        if !output.success() {
            return Err(MuxError::NotFound(session.to_string()));
        }
        Ok(())
    }

    fn set_environment(&self, session: &str, key: &str, value: &str) -> Result<()> {
        let output = Self::tmux(&["set-environment", "-t", session, key, value])?;
        if !output.success() {
            return Err(MuxError::NotFound(session.to_string()));
        }
        Ok(())
    }

    fn capture_pane(&self, session: &str) -> Result<String> {
        let output = Self::tmux(&["capture-pane", "-t", session, "-p"])?;
        if !output.success() {
            return Err(MuxError::NotFound(session.to_string()));
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_requires_existing_cwd() {
        let adapter = TmuxAdapter::new();
        let result = adapter.new_session("gt-test-nope", Path::new("/definitely/not/a/dir"));
        assert!(matches!(result, Err(MuxError::SpawnFailed(_))));
    }
}
