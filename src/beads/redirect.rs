//! `.beads/redirect` resolution.
//!
//! Worktrees share their rig's canonical store through a redirect file:
//! `.beads/redirect` holds a path, relative to the *working directory*
//! (not to `.beads/`), naming the real beads directory. Resolution is
//! deliberately shallow: chains are not followed, and a redirect pointing
//! back at its own `.beads/` deletes itself.
//!
//! Resolution happens on every invocation. Worktrees get reconfigured
//! between calls, so the result is never cached.

use std::path::{Component, Path, PathBuf};

/// Resolve the beads directory for `workdir`.
pub fn resolve(workdir: &Path) -> PathBuf {
    let local = workdir.join(".beads");
    let redirect_file = local.join("redirect");

    let Ok(contents) = std::fs::read_to_string(&redirect_file) else {
        return local;
    };
    let target = contents.trim();
    if target.is_empty() {
        return local;
    }

    let resolved = clean_path(&workdir.join(target));
    if resolved == clean_path(&local) {
        tracing::warn!(
            path = %redirect_file.display(),
            "circular self-redirect, deleting"
        );
        let _ = std::fs::remove_file(&redirect_file);
        return local;
    }

    // One hop only. A redirect inside the target is reported, not chased.
    if resolved.join("redirect").is_file() {
        tracing::warn!(
            from = %redirect_file.display(),
            to = %resolved.display(),
            "redirect target contains its own redirect; not following the chain"
        );
    }

    resolved
}

/// Write a redirect so `workdir`'s store resolves to `target` (an absolute
/// beads directory). The stored path is made relative to `workdir` when
/// possible.
pub fn ensure(workdir: &Path, target: &Path) -> anyhow::Result<()> {
    let beads_dir = workdir.join(".beads");
    std::fs::create_dir_all(&beads_dir)?;
    let value = pathdiff_relative(workdir, target)
        .unwrap_or_else(|| target.to_path_buf());
    std::fs::write(
        beads_dir.join("redirect"),
        format!("{}\n", value.display()),
    )?;
    Ok(())
}

/// Logical path normalization: strips `.` and folds `..` without touching
/// the filesystem.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Express `target` relative to `base` using `..` hops. Both must be
/// absolute; returns None otherwise.
fn pathdiff_relative(base: &Path, target: &Path) -> Option<PathBuf> {
    if !base.is_absolute() || !target.is_absolute() {
        return None;
    }
    let base = clean_path(base);
    let target = clean_path(target);
    let base_parts: Vec<_> = base.components().collect();
    let target_parts: Vec<_> = target.components().collect();

    let common = base_parts
        .iter()
        .zip(target_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base_parts.len() {
        out.push("..");
    }
    for part in &target_parts[common..] {
        out.push(part);
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_redirect_uses_local() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve(dir.path()), dir.path().join(".beads"));
    }

    #[test]
    fn empty_redirect_uses_local() {
        let dir = tempfile::tempdir().unwrap();
        let beads = dir.path().join(".beads");
        std::fs::create_dir_all(&beads).unwrap();
        std::fs::write(beads.join("redirect"), "  \n").unwrap();
        assert_eq!(resolve(dir.path()), beads);
    }

    #[test]
    fn relative_redirect_resolves_against_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let worktree = dir.path().join("wyvern/polecats/toast");
        let canonical = dir.path().join("wyvern/mayor/rig/.beads");
        std::fs::create_dir_all(worktree.join(".beads")).unwrap();
        std::fs::create_dir_all(&canonical).unwrap();
        std::fs::write(
            worktree.join(".beads/redirect"),
            "../../mayor/rig/.beads\n",
        )
        .unwrap();

        assert_eq!(resolve(&worktree), clean_path(&canonical));
    }

    #[test]
    fn self_redirect_deletes_itself() {
        let dir = tempfile::tempdir().unwrap();
        let beads = dir.path().join(".beads");
        std::fs::create_dir_all(&beads).unwrap();
        let redirect = beads.join("redirect");
        std::fs::write(&redirect, ".beads\n").unwrap();

        assert_eq!(resolve(dir.path()), beads);
        assert!(!redirect.exists(), "self-redirect must be deleted");
    }

    #[test]
    fn chains_are_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b_beads = dir.path().join("b/.beads");
        let c_beads = dir.path().join("c/.beads");
        std::fs::create_dir_all(a.join(".beads")).unwrap();
        std::fs::create_dir_all(&b_beads).unwrap();
        std::fs::create_dir_all(&c_beads).unwrap();
        std::fs::write(a.join(".beads/redirect"), "../b/.beads\n").unwrap();
        std::fs::write(b_beads.join("redirect"), "../../c/.beads\n").unwrap();

        // First hop only: a resolves to b, never to c.
        assert_eq!(resolve(&a), clean_path(&b_beads));
    }

    #[test]
    fn resolution_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let worktree = dir.path().join("wt");
        let canonical = dir.path().join("store");
        std::fs::create_dir_all(worktree.join(".beads")).unwrap();
        std::fs::create_dir_all(canonical.join(".beads")).unwrap();
        std::fs::write(worktree.join(".beads/redirect"), "../store/.beads\n").unwrap();

        let first = resolve(&worktree);
        // Resolving from the directory that owns the resolved store yields
        // the same store.
        let second = resolve(first.parent().unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn ensure_writes_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let worktree = dir.path().join("wyvern/polecats/toast");
        let canonical = dir.path().join("wyvern/mayor/rig/.beads");
        std::fs::create_dir_all(&worktree).unwrap();
        std::fs::create_dir_all(&canonical).unwrap();

        ensure(&worktree, &canonical).unwrap();
        let written = std::fs::read_to_string(worktree.join(".beads/redirect")).unwrap();
        assert_eq!(written.trim(), "../../mayor/rig/.beads");
        assert_eq!(resolve(&worktree), clean_path(&canonical));
    }

    #[test]
    fn clean_path_folds_dots() {
        assert_eq!(
            clean_path(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(clean_path(Path::new("a/./b")), PathBuf::from("a/b"));
    }
}
