//! Helpers for unit tests that drive a real throwaway git repository.

use std::path::{Path, PathBuf};

/// Run a git command in `repo`, panicking on failure.
pub fn sh(repo: &Path, args: &[&str]) {
    let status = std::process::Command::new("git")
        .args(args)
        .current_dir(repo)
        .status()
        .expect("spawn git");
    assert!(status.success(), "git {args:?} failed");
}

/// A repository with one commit on `main`, inside its own temp dir.
pub fn init_repo() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let repo = dir.path().join("repo");
    std::fs::create_dir_all(&repo).expect("mkdir repo");
    sh(&repo, &["init", "-b", "main"]);
    sh(&repo, &["config", "user.email", "test@example.com"]);
    sh(&repo, &["config", "user.name", "Test"]);
    std::fs::write(repo.join("README.md"), "hello\n").expect("write README");
    sh(&repo, &["add", "."]);
    sh(&repo, &["commit", "-m", "init"]);
    (dir, repo)
}
