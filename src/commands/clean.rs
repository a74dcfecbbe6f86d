use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;

use crate::config::Config;
use crate::error::ExitError;
use crate::git;
use crate::lockfile::{self, FeatureLock};
use crate::workspace::{self, TeardownOutcome};

#[derive(Debug, Args)]
pub struct CleanArgs {
    /// Workspaces to remove
    #[arg(value_name = "SLUG")]
    pub slugs: Vec<String>,
    /// Remove every workspace under the parent directory
    #[arg(long, conflicts_with = "slugs")]
    pub all: bool,
    /// Skip the confirmation prompt
    #[arg(long)]
    pub force: bool,
    /// Workspace parent directory (defaults to the configured one)
    #[arg(long, value_name = "PATH")]
    pub dir: Option<PathBuf>,
}

impl CleanArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        if self.slugs.is_empty() && !self.all {
            return Err(
                ExitError::Input("nothing to clean: pass slugs or --all".to_string()).into(),
            );
        }

        let repo = super::run::find_repo_root()?;
        let config = Config::load_or_default(&repo)?;
        let parent = match &self.dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => repo.join(dir),
            None => repo.join(&config.workspaces.dir),
        };

        let targets = if self.all {
            discover_slugs(&parent)?
        } else {
            self.slugs.clone()
        };
        if targets.is_empty() {
            println!("Nothing to clean under {}", parent.display());
            return Ok(());
        }

        // Live locks gate removal before anything is touched. The manifest
        // stays as-is either way; it is a run ledger, not current state.
        let mut live = Vec::new();
        let mut removable = Vec::new();
        for slug in &targets {
            match lockfile::owner(&parent, slug) {
                Some(pid) if lockfile::pid_alive(pid) => live.push((slug.clone(), pid)),
                _ => removable.push(slug.clone()),
            }
        }
        for (slug, pid) in &live {
            eprintln!("✗ {slug}: still running (pid {pid}), skipping");
        }
        if removable.is_empty() {
            return Err(
                ExitError::Other(format!("{} feature(s) still running", live.len())).into(),
            );
        }

        if !self.force {
            let prompt = format!(
                "Remove {} workspace(s) under {}?",
                removable.len(),
                parent.display()
            );
            if !prompt_confirm(&prompt, false)? {
                println!("Aborted.");
                return Ok(());
            }
        }

        let base = match &config.workspaces.base {
            Some(base) => base.clone(),
            None => git::current_branch(&repo)?,
        };

        let mut failures = 0usize;
        for slug in &removable {
            match workspace::teardown(&repo, &parent, slug, &base) {
                Ok(TeardownOutcome::Clean) => println!("✓ {slug}: removed"),
                Ok(TeardownOutcome::BranchKept { ahead }) => {
                    println!("✓ {slug}: removed (branch kept, {ahead} commit(s) ahead)");
                }
                Err(e) => {
                    failures += 1;
                    eprintln!("✗ {slug}: {e:#}");
                }
            }
            let lock = lockfile::lock_path(&parent, slug);
            if lock.exists() {
                FeatureLock::release_path(&lock);
            }
        }

        let skipped = failures + live.len();
        if skipped > 0 {
            return Err(ExitError::Other(format!("{skipped} workspace(s) not cleaned")).into());
        }
        Ok(())
    }
}

/// The directory listing is the source of truth for --all; the manifest may
/// lag behind or mention workspaces already gone.
fn discover_slugs(parent: &Path) -> anyhow::Result<Vec<String>> {
    let mut slugs = Vec::new();
    let entries = match fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(slugs),
        Err(e) => {
            return Err(
                anyhow::Error::new(e).context(format!("reading {}", parent.display()))
            );
        }
    };
    for entry in entries {
        let entry = entry.with_context(|| format!("reading {}", parent.display()))?;
        if !entry.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(ToString::to_string) else {
            continue;
        };
        if name == "logs" || name.starts_with('.') {
            continue;
        }
        slugs.push(name);
    }
    slugs.sort();
    Ok(slugs)
}

fn prompt_confirm(prompt: &str, default: bool) -> anyhow::Result<bool> {
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(default)
        .interact()
        .context("reading user confirmation")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_lists_workspace_directories_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let parent = dir.path();
        fs::create_dir(parent.join("add-auth")).expect("mkdir");
        fs::create_dir(parent.join("fix-bug")).expect("mkdir");
        fs::create_dir(parent.join("logs")).expect("mkdir");
        fs::create_dir(parent.join(".feature-context")).expect("mkdir");
        fs::write(parent.join("manifest.json"), "{}").expect("write");

        let slugs = discover_slugs(parent).expect("discovers");
        assert_eq!(slugs, vec!["add-auth".to_string(), "fix-bug".to_string()]);
    }

    #[test]
    fn discovery_of_a_missing_parent_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let slugs = discover_slugs(&dir.path().join("nope")).expect("discovers");
        assert!(slugs.is_empty());
    }

    #[test]
    fn cleaning_nothing_is_an_input_error() {
        let args = CleanArgs {
            slugs: Vec::new(),
            all: false,
            force: true,
            dir: None,
        };
        let err = args.execute().expect_err("rejects");
        assert!(matches!(
            err.downcast_ref::<ExitError>(),
            Some(ExitError::Input(_))
        ));
    }
}
