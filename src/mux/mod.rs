//! Terminal-multiplexer adapter.
//!
//! Sessions are the unit of agent life: one agent, one session, one pane
//! running the LLM runtime. Keystroke injection is best-effort by design;
//! styling operations never fail the caller.

pub mod fake;
pub mod tmux;

pub use fake::FakeMux;
pub use tmux::TmuxAdapter;

use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("multiplexer not installed — install tmux and re-run")]
    NotInstalled,

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    #[error("{0}")]
    CommandFailed(String),
}

pub type Result<T> = std::result::Result<T, MuxError>;

/// One pane of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pane {
    pub pane_id: String,
    pub pid: u32,
    /// Current foreground command name (e.g. "claude", "zsh").
    pub command: String,
}

pub trait Multiplexer {
    fn has_session(&self, name: &str) -> Result<bool>;
    fn new_session(&self, name: &str, cwd: &Path) -> Result<()>;
    fn kill_session(&self, name: &str) -> Result<()>;
    fn list_sessions(&self) -> Result<Vec<String>>;
    fn list_panes(&self, session: &str) -> Result<Vec<Pane>>;
    /// Type text into the session's active pane; `enter` appends a newline.
    fn send_keys(&self, session: &str, text: &str, enter: bool) -> Result<()>;
    /// Send a raw key name (e.g. "Escape", "C-c").
    fn send_raw(&self, session: &str, keycode: &str) -> Result<()>;
    fn set_environment(&self, session: &str, key: &str, value: &str) -> Result<()>;
    fn capture_pane(&self, session: &str) -> Result<String>;

    /// Poll the pane's command name until one of `expected` shows up.
    ///
    /// Default implementation polls [`Multiplexer::list_panes`] once a
    /// second; returns false on timeout (never an error — callers proceed
    /// anyway and let the startup protocol self-heal).
    fn wait_for_command(&self, session: &str, expected: &[&str], timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        loop {
            if let Ok(panes) = self.list_panes(session)
                && panes
                    .iter()
                    .any(|p| expected.iter().any(|e| p.command.contains(e)))
            {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            std::thread::sleep(Duration::from_secs(1));
        }
    }
}
