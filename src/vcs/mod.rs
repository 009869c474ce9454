//! Version-control adapter.
//!
//! Stateless facade over the git CLI; every operation names the repository
//! it acts on. The orchestrator only ever needs porcelain-level facts:
//! is the tree clean, is this commit on main, is the branch pushed.

pub mod fake;
pub mod git;

pub use fake::FakeVcs;
pub use git::GitAdapter;

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("git not installed — install git and re-run")]
    NotInstalled,

    #[error("not a git repository: {0}")]
    NotARepo(String),

    #[error("{0}")]
    CommandFailed(String),
}

pub type Result<T> = std::result::Result<T, VcsError>;

/// Parsed `git status --porcelain`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoStatus {
    pub untracked: Vec<String>,
    pub modified: Vec<String>,
    pub staged: Vec<String>,
}

impl RepoStatus {
    pub fn clean(&self) -> bool {
        self.untracked.is_empty() && self.modified.is_empty() && self.staged.is_empty()
    }
}

/// Everything that would be lost if the workspace disappeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UncommittedWork {
    pub has_uncommitted_changes: bool,
    pub stash_count: u32,
    pub unpushed_commits: u32,
}

impl UncommittedWork {
    pub const fn is_clean(&self) -> bool {
        !self.has_uncommitted_changes && self.stash_count == 0 && self.unpushed_commits == 0
    }
}

pub trait Vcs {
    /// Clone with `--reference` so objects are shared via alternates.
    fn clone_with_reference(&self, src: &str, dst: &Path, reference: &Path) -> Result<()>;
    /// Add a worktree on a fresh branch.
    fn worktree_add(&self, repo: &Path, path: &Path, branch: &str) -> Result<()>;
    fn worktree_remove(&self, repo: &Path, path: &Path, force: bool) -> Result<()>;
    fn branch_create(&self, repo: &Path, name: &str) -> Result<()>;
    fn branch_delete(&self, repo: &Path, name: &str, force: bool) -> Result<()>;
    fn current_branch(&self, repo: &Path) -> Result<String>;
    fn rev(&self, repo: &Path, reference: &str) -> Result<String>;
    fn status(&self, repo: &Path) -> Result<RepoStatus>;
    fn has_uncommitted_changes(&self, repo: &Path) -> Result<bool> {
        Ok(!self.status(repo)?.clean())
    }
    /// Would merging `branch_a` into `branch_b` conflict? Never touches the
    /// working tree.
    fn check_conflicts(&self, repo: &Path, branch_a: &str, branch_b: &str) -> Result<bool>;
    /// (fully pushed, commits ahead of the remote).
    fn branch_pushed_to_remote(&self, repo: &Path, branch: &str, remote: &str)
    -> Result<(bool, u32)>;
    fn is_ancestor(&self, repo: &Path, sha: &str, reference: &str) -> Result<bool>;
    fn check_uncommitted_work(&self, repo: &Path) -> Result<UncommittedWork>;
}

/// Parse `git status --porcelain` output.
pub fn parse_porcelain(output: &str) -> RepoStatus {
    let mut status = RepoStatus::default();
    for line in output.lines() {
        if line.len() < 4 {
            continue;
        }
        let (code, path) = line.split_at(3);
        let path = path.to_string();
        let bytes = code.as_bytes();
        let (x, y) = (bytes[0], bytes[1]);
        if x == b'?' && y == b'?' {
            status.untracked.push(path);
            continue;
        }
        if x != b' ' {
            status.staged.push(path.clone());
        }
        if y != b' ' {
            status.modified.push(path);
        }
    }
    status
}
