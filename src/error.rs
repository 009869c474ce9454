use std::process::ExitCode;

/// Errors that cause gt to exit with a specific code.
///
/// The contract callers rely on: 0 success, 1 error, 2 "should force-kill"
/// (health-check recommendation). `Silent` conveys a status purely through
/// the exit code without printing anything.
#[derive(Debug, thiserror::Error)]
pub enum ExitError {
    #[error("config error: {0}")]
    Config(String),

    #[error("tool not found: {tool} — install it and re-run ({hint})")]
    ToolNotFound { tool: String, hint: String },

    #[error("{tool} failed (exit {code}): {message}")]
    ToolFailed {
        tool: String,
        code: i32,
        message: String,
    },

    #[error("{tool} timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("not a beads repo: {0}")]
    NotARepo(String),

    #[error("sync conflict in {0} — resolve manually, gt will not auto-merge")]
    SyncConflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{bead} is already hooked to {owner} — pass --force to reassign")]
    AlreadyHooked { bead: String, owner: String },

    #[error(
        "identity {identity} is locked by pid {pid} (session {session}, acquired {acquired_at})\n\
         remove .runtime/agent.lock if that process is gone, or run `gt doctor --fix`"
    )]
    IdentityCollision {
        identity: String,
        pid: u32,
        session: String,
        acquired_at: String,
    },

    /// Health-check verdict: the target should be force-killed.
    #[error("agent unresponsive: {0}")]
    ShouldForceKill(String),

    /// Exit with a code and no output at all.
    #[error("")]
    Silent(u8),

    #[error("{0}")]
    Other(String),
}

impl ExitError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::ShouldForceKill(_) => ExitCode::from(2),
            Self::Silent(code) => ExitCode::from(*code),
            _ => ExitCode::FAILURE,
        }
    }

    /// Silent errors print nothing; everything else goes to stderr.
    pub const fn is_silent(&self) -> bool {
        matches!(self, Self::Silent(_))
    }
}
