//! Workspace lifecycle: one git worktree per feature, on branch
//! `feature/<slug>`, living at `<parent>/<slug>`.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::git;

/// Branch a feature's work lands on.
pub fn branch_name(slug: &str) -> String {
    format!("feature/{slug}")
}

/// Where a feature's worktree lives.
pub fn workspace_path(parent: &Path, slug: &str) -> PathBuf {
    parent.join(slug)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A worktree was checked out (new branch, or a surviving one).
    Created,
    /// The workspace path already existed and was left as found.
    Reused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// Worktree removed and branch deleted.
    Clean,
    /// Worktree removed; the branch has commits past base and survives.
    BranchKept { ahead: u64 },
}

/// Create the workspace for `slug`, forking `feature/<slug>` from `base`.
///
/// An existing workspace path is reused rather than recreated, so a crashed
/// worker can be rerun without losing uncommitted work. A surviving branch
/// from an earlier run is checked out instead of recreated.
pub fn create(
    repo: &Path,
    parent: &Path,
    slug: &str,
    base: &str,
) -> anyhow::Result<CreateOutcome> {
    let path = workspace_path(parent, slug);
    if path.exists() {
        tracing::info!("reusing existing workspace {}", path.display());
        return Ok(CreateOutcome::Reused);
    }

    std::fs::create_dir_all(parent)
        .with_context(|| format!("creating {}", parent.display()))?;
    ensure_parent_excluded(repo, parent)?;

    let branch = branch_name(slug);
    if git::branch_exists(repo, &branch)? {
        tracing::info!("branch '{branch}' already exists, checking it out");
        git::add_worktree_existing_branch(repo, &path, &branch)?;
    } else {
        git::add_worktree_new_branch(repo, &path, &branch, base)?;
    }
    Ok(CreateOutcome::Created)
}

/// Remove the workspace for `slug`. The branch is deleted only when it has
/// zero commits ahead of `base`; committed work always survives teardown.
pub fn teardown(
    repo: &Path,
    parent: &Path,
    slug: &str,
    base: &str,
) -> anyhow::Result<TeardownOutcome> {
    let path = workspace_path(parent, slug);
    if path.exists() {
        git::remove_worktree(repo, &path)?;
    }

    let branch = branch_name(slug);
    if !git::branch_exists(repo, &branch)? {
        return Ok(TeardownOutcome::Clean);
    }
    let ahead = git::ahead_count(repo, base, &branch)?;
    if ahead == 0 {
        git::delete_branch(repo, &branch)?;
        Ok(TeardownOutcome::Clean)
    } else {
        tracing::info!("keeping branch '{branch}': {ahead} commit(s) ahead of {base}");
        Ok(TeardownOutcome::BranchKept { ahead })
    }
}

/// When the parent directory sits inside the repository, register it in the
/// repo's exclude file so workspaces never show up as untracked noise.
fn ensure_parent_excluded(repo: &Path, parent: &Path) -> anyhow::Result<()> {
    let (Ok(repo_abs), Ok(parent_abs)) = (repo.canonicalize(), parent.canonicalize()) else {
        return Ok(());
    };
    if let Ok(rel) = parent_abs.strip_prefix(&repo_abs) {
        let pattern = format!("{}/", rel.to_string_lossy());
        git::ensure_excluded(repo, &pattern)?;
    }
    Ok(())
}
