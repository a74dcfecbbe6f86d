use std::path::{Path, PathBuf};

use clap::Args;
use serde::Serialize;

use super::doctor::OutputFormat;
use crate::config::Config;
use crate::error::ExitError;
use crate::lockfile;
use crate::manifest::{FeatureStatus, Manifest, ManifestEntry, ManifestStore};

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Workspace parent directory (defaults to the configured one)
    #[arg(long, value_name = "PATH")]
    pub dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

impl StatusArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let parent = resolve_parent(self.dir.as_deref())?;
        let store = ManifestStore::new(&parent);
        if !store.exists() {
            return Err(ExitError::Input(format!(
                "no manifest at {} (has `fanout run` been run here?)",
                store.path().display()
            ))
            .into());
        }
        print_report(&store, OutputFormat::resolve(self.format))
    }
}

/// An explicit --dir is taken as given; otherwise the manifest lives under
/// the configured workspace dir at the repository root.
fn resolve_parent(dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = dir {
        return Ok(dir.to_path_buf());
    }
    let repo = super::run::find_repo_root()?;
    let config = Config::load_or_default(&repo)?;
    Ok(repo.join(&config.workspaces.dir))
}

#[derive(Debug, Serialize)]
struct StatusReport {
    manifest: String,
    created: String,
    features: Vec<FeatureRow>,
}

/// A manifest entry plus liveness derived at read time. Staleness is
/// display-only; the manifest itself is never rewritten here.
#[derive(Debug, Serialize)]
struct FeatureRow {
    #[serde(flatten)]
    entry: ManifestEntry,
    stale: bool,
}

/// Render the manifest in the requested format. Also used by the run
/// monitor for its final summary.
pub fn print_report(store: &ManifestStore, format: OutputFormat) -> anyhow::Result<()> {
    let manifest = store.load()?;
    let report = StatusReport {
        manifest: store.path().display().to_string(),
        created: manifest.created.clone(),
        features: rows(&manifest),
    };

    match format {
        OutputFormat::Pretty => print_pretty(&report),
        OutputFormat::Text => print_text(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn rows(manifest: &Manifest) -> Vec<FeatureRow> {
    manifest
        .features
        .iter()
        .map(|entry| FeatureRow {
            stale: entry.status == FeatureStatus::Running && !lockfile::pid_alive(entry.pid),
            entry: entry.clone(),
        })
        .collect()
}

fn print_pretty(report: &StatusReport) {
    println!("=== Fanout Status ===\n");
    println!("Manifest: {} (created {})", report.manifest, report.created);

    if report.features.is_empty() {
        println!("\nNo features recorded.");
        return;
    }
    println!();

    let width = report
        .features
        .iter()
        .map(|f| f.entry.slug.len())
        .max()
        .unwrap_or(0);
    for row in &report.features {
        let entry = &row.entry;
        let glyph = match entry.status {
            FeatureStatus::Running => "•",
            FeatureStatus::Completed => "✓",
            FeatureStatus::Failed => "✗",
        };
        let mut label = entry.status.as_str().to_string();
        if row.stale {
            label.push_str(" (stale)");
        }
        let detail = match entry.status {
            FeatureStatus::Running => format!("pid {}", entry.pid),
            FeatureStatus::Completed | FeatureStatus::Failed => entry
                .exit_code
                .map_or_else(|| "-".to_string(), |code| format!("exit {code}")),
        };
        println!(
            "  {glyph} {:<width$}  {label:<16}  {detail:<10}  {}",
            entry.slug, entry.branch
        );
    }
}

fn print_text(report: &StatusReport) {
    println!("manifest  {}  created={}", report.manifest, report.created);
    for row in &report.features {
        let entry = &row.entry;
        println!(
            "feature  {}  status={}  pid={}  exit={}  branch={}  stale={}",
            entry.slug,
            entry.status.as_str(),
            entry.pid,
            entry
                .exit_code
                .map_or_else(|| "-".to_string(), |code| code.to_string()),
            entry.branch,
            row.stale
        );
    }
}
