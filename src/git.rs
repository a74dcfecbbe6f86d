//! Thin wrapper over the `git` CLI: repository discovery plus the worktree
//! and branch plumbing the workspace lifecycle needs.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::subprocess::Tool;

fn git(repo: &Path) -> Tool {
    Tool::new("git").cwd(repo)
}

/// Root of the working tree containing `dir`.
pub fn repo_root(dir: &Path) -> anyhow::Result<PathBuf> {
    let out = Tool::new("git")
        .args(&["rev-parse", "--show-toplevel"])
        .cwd(dir)
        .run_ok()?;
    Ok(PathBuf::from(out.stdout.trim()))
}

/// The repository's common git dir, shared by all worktrees. Relative
/// output (plain `.git`) is resolved against `repo`.
pub fn common_dir(repo: &Path) -> anyhow::Result<PathBuf> {
    let out = git(repo).args(&["rev-parse", "--git-common-dir"]).run_ok()?;
    let path = PathBuf::from(out.stdout.trim());
    Ok(if path.is_absolute() {
        path
    } else {
        repo.join(path)
    })
}

/// Name of the currently checked-out branch.
pub fn current_branch(repo: &Path) -> anyhow::Result<String> {
    let out = git(repo)
        .args(&["rev-parse", "--abbrev-ref", "HEAD"])
        .run_ok()?;
    Ok(out.stdout.trim().to_string())
}

pub fn branch_exists(repo: &Path, branch: &str) -> anyhow::Result<bool> {
    let out = git(repo)
        .args(&["rev-parse", "--verify", "--quiet"])
        .arg(&format!("refs/heads/{branch}"))
        .run()?;
    Ok(out.success())
}

/// `git worktree add -b <branch> <path> <base>`: new branch forked from
/// `base`, checked out at `path`.
pub fn add_worktree_new_branch(
    repo: &Path,
    worktree: &Path,
    branch: &str,
    base: &str,
) -> anyhow::Result<()> {
    git(repo)
        .args(&["worktree", "add", "-b", branch])
        .arg(&worktree.to_string_lossy())
        .arg(base)
        .run_ok()
        .with_context(|| format!("creating worktree for branch '{branch}'"))?;
    Ok(())
}

/// `git worktree add <path> <branch>`: check out an existing branch.
pub fn add_worktree_existing_branch(
    repo: &Path,
    worktree: &Path,
    branch: &str,
) -> anyhow::Result<()> {
    git(repo)
        .args(&["worktree", "add"])
        .arg(&worktree.to_string_lossy())
        .arg(branch)
        .run_ok()
        .with_context(|| format!("checking out branch '{branch}' into a worktree"))?;
    Ok(())
}

pub fn remove_worktree(repo: &Path, worktree: &Path) -> anyhow::Result<()> {
    git(repo)
        .args(&["worktree", "remove", "--force"])
        .arg(&worktree.to_string_lossy())
        .run_ok()
        .with_context(|| format!("removing worktree {}", worktree.display()))?;
    Ok(())
}

/// Number of commits on `branch` that `base` does not have.
pub fn ahead_count(repo: &Path, base: &str, branch: &str) -> anyhow::Result<u64> {
    let out = git(repo)
        .args(&["rev-list", "--count"])
        .arg(&format!("{base}..{branch}"))
        .run_ok()?;
    out.stdout
        .trim()
        .parse()
        .with_context(|| format!("parsing rev-list count {:?}", out.stdout.trim()))
}

pub fn delete_branch(repo: &Path, branch: &str) -> anyhow::Result<()> {
    git(repo)
        .args(&["branch", "-D", branch])
        .run_ok()
        .with_context(|| format!("deleting branch '{branch}'"))?;
    Ok(())
}

/// Whether `path` (relative to `repo`) is tracked.
pub fn is_tracked(repo: &Path, path: &Path) -> anyhow::Result<bool> {
    let out = git(repo)
        .args(&["ls-files", "--error-unmatch"])
        .arg(&path.to_string_lossy())
        .run()?;
    Ok(out.success())
}

/// Register `pattern` in `<common-dir>/info/exclude` exactly once.
/// Returns true when the pattern was appended this call.
pub fn ensure_excluded(repo: &Path, pattern: &str) -> anyhow::Result<bool> {
    let info_dir = common_dir(repo)?.join("info");
    std::fs::create_dir_all(&info_dir)
        .with_context(|| format!("creating {}", info_dir.display()))?;
    let exclude = info_dir.join("exclude");
    let current = std::fs::read_to_string(&exclude).unwrap_or_default();
    if current.lines().any(|line| line.trim() == pattern) {
        return Ok(false);
    }
    let mut contents = current;
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(pattern);
    contents.push('\n');
    std::fs::write(&exclude, contents)
        .with_context(|| format!("writing {}", exclude.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{init_repo, sh};

    #[test]
    fn repo_root_from_subdirectory() {
        let (_dir, repo) = init_repo();
        let sub = repo.join("src");
        std::fs::create_dir_all(&sub).unwrap();

        let root = repo_root(&sub).unwrap();
        assert_eq!(
            root.canonicalize().unwrap(),
            repo.canonicalize().unwrap()
        );
    }

    #[test]
    fn current_branch_after_init() {
        let (_dir, repo) = init_repo();
        assert_eq!(current_branch(&repo).unwrap(), "main");
    }

    #[test]
    fn branch_exists_checks_local_heads() {
        let (_dir, repo) = init_repo();
        assert!(branch_exists(&repo, "main").unwrap());
        assert!(!branch_exists(&repo, "feature/nope").unwrap());
    }

    #[test]
    fn worktree_lifecycle() {
        let (dir, repo) = init_repo();
        let wt = dir.path().join("wt");

        add_worktree_new_branch(&repo, &wt, "feature/x", "main").unwrap();
        assert!(wt.join("README.md").exists());
        assert!(branch_exists(&repo, "feature/x").unwrap());
        assert_eq!(ahead_count(&repo, "main", "feature/x").unwrap(), 0);

        std::fs::write(wt.join("new.txt"), "work\n").unwrap();
        sh(&wt, &["add", "."]);
        sh(&wt, &["commit", "-m", "feature work"]);
        assert_eq!(ahead_count(&repo, "main", "feature/x").unwrap(), 1);

        remove_worktree(&repo, &wt).unwrap();
        assert!(!wt.exists());
        assert!(branch_exists(&repo, "feature/x").unwrap());

        delete_branch(&repo, "feature/x").unwrap();
        assert!(!branch_exists(&repo, "feature/x").unwrap());
    }

    #[test]
    fn worktree_from_existing_branch() {
        let (dir, repo) = init_repo();
        sh(&repo, &["branch", "feature/kept", "main"]);

        let wt = dir.path().join("wt-kept");
        add_worktree_existing_branch(&repo, &wt, "feature/kept").unwrap();
        assert!(wt.join("README.md").exists());
        assert_eq!(current_branch(&wt).unwrap(), "feature/kept");
    }

    #[test]
    fn tracked_files() {
        let (_dir, repo) = init_repo();
        std::fs::write(repo.join("scratch.txt"), "x").unwrap();

        assert!(is_tracked(&repo, Path::new("README.md")).unwrap());
        assert!(!is_tracked(&repo, Path::new("scratch.txt")).unwrap());
        assert!(!is_tracked(&repo, Path::new("missing.txt")).unwrap());
    }

    #[test]
    fn ensure_excluded_appends_once() {
        let (_dir, repo) = init_repo();

        assert!(ensure_excluded(&repo, ".fanout/").unwrap());
        assert!(!ensure_excluded(&repo, ".fanout/").unwrap());

        let exclude = common_dir(&repo).unwrap().join("info/exclude");
        let contents = std::fs::read_to_string(exclude).unwrap();
        assert_eq!(
            contents.lines().filter(|l| *l == ".fanout/").count(),
            1
        );
    }
}
