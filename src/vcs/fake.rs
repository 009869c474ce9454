//! In-memory VCS for tests.
//!
//! Models only what the loops ask about: which worktrees and branches
//! exist, what the cleanliness report says, and which ancestry facts hold.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::{RepoStatus, Result, UncommittedWork, Vcs, VcsError};

#[derive(Debug, Default)]
struct State {
    branches: BTreeSet<String>,
    worktrees: BTreeMap<PathBuf, String>,
    current_branch: String,
    status: RepoStatus,
    uncommitted: UncommittedWork,
    /// (sha, reference) pairs for which is_ancestor holds.
    ancestry: BTreeSet<(String, String)>,
    /// branch → commits ahead of the remote.
    ahead: BTreeMap<String, u32>,
    conflicts: BTreeSet<(String, String)>,
    revs: BTreeMap<String, String>,
}

#[derive(Clone, Default)]
pub struct FakeVcs {
    state: Arc<Mutex<State>>,
}

impl FakeVcs {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.lock().current_branch = "main".to_string();
        fake.lock().branches.insert("main".to_string());
        fake
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }

    pub fn set_uncommitted(&self, work: UncommittedWork) {
        self.lock().uncommitted = work;
    }

    pub fn set_ancestor(&self, sha: &str, reference: &str) {
        self.lock()
            .ancestry
            .insert((sha.to_string(), reference.to_string()));
    }

    pub fn set_rev(&self, reference: &str, sha: &str) {
        self.lock()
            .revs
            .insert(reference.to_string(), sha.to_string());
    }

    pub fn set_ahead(&self, branch: &str, count: u32) {
        self.lock().ahead.insert(branch.to_string(), count);
    }

    pub fn set_conflict(&self, branch_a: &str, branch_b: &str) {
        self.lock()
            .conflicts
            .insert((branch_a.to_string(), branch_b.to_string()));
    }

    pub fn has_branch(&self, name: &str) -> bool {
        self.lock().branches.contains(name)
    }

    pub fn has_worktree(&self, path: &Path) -> bool {
        self.lock().worktrees.contains_key(path)
    }
}

impl Vcs for FakeVcs {
    fn clone_with_reference(&self, _src: &str, dst: &Path, _reference: &Path) -> Result<()> {
        self.lock()
            .worktrees
            .insert(dst.to_path_buf(), "main".to_string());
        Ok(())
    }

    fn worktree_add(&self, _repo: &Path, path: &Path, branch: &str) -> Result<()> {
        let mut state = self.lock();
        if state.branches.contains(branch) {
            return Err(VcsError::CommandFailed(format!(
                "branch already exists: {branch}"
            )));
        }
        state.branches.insert(branch.to_string());
        state.worktrees.insert(path.to_path_buf(), branch.to_string());
        Ok(())
    }

    fn worktree_remove(&self, _repo: &Path, path: &Path, _force: bool) -> Result<()> {
        let mut state = self.lock();
        state
            .worktrees
            .remove(path)
            .ok_or_else(|| VcsError::CommandFailed(format!("no worktree at {}", path.display())))?;
        Ok(())
    }

    fn branch_create(&self, _repo: &Path, name: &str) -> Result<()> {
        self.lock().branches.insert(name.to_string());
        Ok(())
    }

    fn branch_delete(&self, _repo: &Path, name: &str, _force: bool) -> Result<()> {
        let mut state = self.lock();
        if !state.branches.remove(name) {
            return Err(VcsError::CommandFailed(format!("no branch {name}")));
        }
        Ok(())
    }

    fn current_branch(&self, _repo: &Path) -> Result<String> {
        Ok(self.lock().current_branch.clone())
    }

    fn rev(&self, _repo: &Path, reference: &str) -> Result<String> {
        let state = self.lock();
        Ok(state
            .revs
            .get(reference)
            .cloned()
            .unwrap_or_else(|| format!("sha-of-{reference}")))
    }

    fn status(&self, _repo: &Path) -> Result<RepoStatus> {
        Ok(self.lock().status.clone())
    }

    fn check_conflicts(&self, _repo: &Path, branch_a: &str, branch_b: &str) -> Result<bool> {
        let state = self.lock();
        Ok(state
            .conflicts
            .contains(&(branch_a.to_string(), branch_b.to_string())))
    }

    fn branch_pushed_to_remote(
        &self,
        _repo: &Path,
        branch: &str,
        _remote: &str,
    ) -> Result<(bool, u32)> {
        let ahead = self.lock().ahead.get(branch).copied().unwrap_or(0);
        Ok((ahead == 0, ahead))
    }

    fn is_ancestor(&self, _repo: &Path, sha: &str, reference: &str) -> Result<bool> {
        Ok(self
            .lock()
            .ancestry
            .contains(&(sha.to_string(), reference.to_string())))
    }

    fn check_uncommitted_work(&self, _repo: &Path) -> Result<UncommittedWork> {
        Ok(self.lock().uncommitted.clone())
    }
}
