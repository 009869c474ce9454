//! git-CLI-backed VCS adapter.

use std::path::Path;
use std::time::Duration;

use crate::error::ExitError;
use crate::subprocess::{RunOutput, Tool};

use super::{RepoStatus, Result, UncommittedWork, Vcs, VcsError, parse_porcelain};

const LOCAL_TIMEOUT: Duration = Duration::from_secs(5);
const NETWORK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default)]
pub struct GitAdapter;

impl GitAdapter {
    pub const fn new() -> Self {
        Self
    }

    fn git(repo: Option<&Path>, args: &[&str], timeout: Duration) -> Result<RunOutput> {
        let mut tool = Tool::new("git").timeout(timeout);
        if let Some(repo) = repo {
            let repo_str = repo.display().to_string();
            tool = tool.args(&["-C", &repo_str]).args(args);
        } else {
            tool = tool.args(args);
        }
        tool.run().map_err(|e| {
            if let Some(ExitError::ToolNotFound { .. }) = e.downcast_ref::<ExitError>() {
                VcsError::NotInstalled
            } else {
                VcsError::CommandFailed(e.to_string())
            }
        })
    }

    fn git_ok(repo: Option<&Path>, args: &[&str], timeout: Duration) -> Result<RunOutput> {
        let output = Self::git(repo, args, timeout)?;
        if output.success() {
            Ok(output)
        } else {
            let stderr = output.stderr.trim();
            if stderr.contains("not a git repository") {
                Err(VcsError::NotARepo(stderr.to_string()))
            } else {
                Err(VcsError::CommandFailed(format!(
                    "git {}: {stderr}",
                    args.join(" ")
                )))
            }
        }
    }
}

impl Vcs for GitAdapter {
    fn clone_with_reference(&self, src: &str, dst: &Path, reference: &Path) -> Result<()> {
        let dst_str = dst.display().to_string();
        let ref_str = reference.display().to_string();
        Self::git_ok(
            None,
            &["clone", "--reference-if-able", &ref_str, src, &dst_str],
            NETWORK_TIMEOUT,
        )?;
        Ok(())
    }

    fn worktree_add(&self, repo: &Path, path: &Path, branch: &str) -> Result<()> {
        let path_str = path.display().to_string();
        Self::git_ok(
            Some(repo),
            &["worktree", "add", "-b", branch, &path_str],
            LOCAL_TIMEOUT,
        )?;
        Ok(())
    }

    fn worktree_remove(&self, repo: &Path, path: &Path, force: bool) -> Result<()> {
        let path_str = path.display().to_string();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&path_str);
        Self::git_ok(Some(repo), &args, LOCAL_TIMEOUT)?;
        Ok(())
    }

    fn branch_create(&self, repo: &Path, name: &str) -> Result<()> {
        Self::git_ok(Some(repo), &["branch", name], LOCAL_TIMEOUT)?;
        Ok(())
    }

    fn branch_delete(&self, repo: &Path, name: &str, force: bool) -> Result<()> {
        let flag = if force { "-D" } else { "-d" };
        Self::git_ok(Some(repo), &["branch", flag, name], LOCAL_TIMEOUT)?;
        Ok(())
    }

    fn current_branch(&self, repo: &Path) -> Result<String> {
        let output = Self::git_ok(Some(repo), &["branch", "--show-current"], LOCAL_TIMEOUT)?;
        Ok(output.stdout.trim().to_string())
    }

    fn rev(&self, repo: &Path, reference: &str) -> Result<String> {
        let output = Self::git_ok(Some(repo), &["rev-parse", reference], LOCAL_TIMEOUT)?;
        Ok(output.stdout.trim().to_string())
    }

    fn status(&self, repo: &Path) -> Result<RepoStatus> {
        let output = Self::git_ok(Some(repo), &["status", "--porcelain"], LOCAL_TIMEOUT)?;
        Ok(parse_porcelain(&output.stdout))
    }

    fn check_conflicts(&self, repo: &Path, branch_a: &str, branch_b: &str) -> Result<bool> {
        // merge-tree is plumbing: it computes the merge in the object
        // database and leaves the working tree alone. Exit 1 = conflicts.
        let output = Self::git(
            Some(repo),
            &["merge-tree", "--write-tree", branch_a, branch_b],
            LOCAL_TIMEOUT,
        )?;
        match output.exit_code {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(VcsError::CommandFailed(format!(
                "git merge-tree: {}",
                output.stderr.trim()
            ))),
        }
    }

    fn branch_pushed_to_remote(
        &self,
        repo: &Path,
        branch: &str,
        remote: &str,
    ) -> Result<(bool, u32)> {
        let remote_ref = format!("{remote}/{branch}");
        let exists = Self::git(
            Some(repo),
            &["rev-parse", "--verify", "--quiet", &remote_ref],
            LOCAL_TIMEOUT,
        )?
        .success();

        let range;
        let count_args: Vec<&str> = if exists {
            range = format!("{remote_ref}..{branch}");
            vec!["rev-list", "--count", &range]
        } else {
            vec!["rev-list", "--count", branch]
        };
        let output = Self::git_ok(Some(repo), &count_args, LOCAL_TIMEOUT)?;
        let ahead: u32 = output.stdout.trim().parse().unwrap_or(0);
        Ok((exists && ahead == 0, ahead))
    }

    fn is_ancestor(&self, repo: &Path, sha: &str, reference: &str) -> Result<bool> {
        let output = Self::git(
            Some(repo),
            &["merge-base", "--is-ancestor", sha, reference],
            LOCAL_TIMEOUT,
        )?;
        Ok(output.success())
    }

    fn check_uncommitted_work(&self, repo: &Path) -> Result<UncommittedWork> {
        let status = self.status(repo)?;

        let stash = Self::git_ok(Some(repo), &["stash", "list"], LOCAL_TIMEOUT)?;
        let stash_count =
            u32::try_from(stash.stdout.lines().filter(|l| !l.is_empty()).count()).unwrap_or(0);

        // Commits on HEAD not reachable from any remote branch. Works with
        // or without an upstream configured.
        let unpushed = Self::git_ok(
            Some(repo),
            &["rev-list", "--count", "HEAD", "--not", "--remotes"],
            LOCAL_TIMEOUT,
        )?;
        let unpushed_commits: u32 = unpushed.stdout.trim().parse().unwrap_or(0);

        Ok(UncommittedWork {
            has_uncommitted_changes: !status.clean(),
            stash_count,
            unpushed_commits,
        })
    }
}
