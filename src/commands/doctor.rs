use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::config::{self, Config};
use crate::git;
use crate::manifest::{FeatureStatus, ManifestStore};
use crate::subprocess::Tool;

#[derive(Debug, Args)]
pub struct DoctorArgs {
    /// Workspace parent directory (defaults to the configured one)
    #[arg(long, value_name = "PATH")]
    pub dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Text,
    Json,
}

impl OutputFormat {
    /// Explicit flag wins; otherwise pretty on a terminal, text in a pipe.
    pub fn resolve(flag: Option<Self>) -> Self {
        flag.unwrap_or_else(|| {
            if std::io::stdout().is_terminal() {
                Self::Pretty
            } else {
                Self::Text
            }
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DoctorReport {
    pub repo: Option<String>,
    pub config_source: String,
    pub agent: String,
    pub tools: Vec<ToolStatus>,
    pub manifest: Option<ManifestStatus>,
    pub issues: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolStatus {
    pub name: String,
    pub required: bool,
    pub version: Option<String>,
    pub present: bool,
    pub purpose: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestStatus {
    pub path: String,
    pub parseable: bool,
    pub features: usize,
    pub running: usize,
}

impl DoctorArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let cwd = std::env::current_dir().context("could not determine current directory")?;
        let format = OutputFormat::resolve(self.format);

        let mut issues = Vec::new();
        let mut tools = Vec::new();

        let git_present = probe_tool(&mut tools, "git", "--version", true, "worktrees and branches");
        let repo = if git_present {
            git::repo_root(&cwd).ok()
        } else {
            issues.push("Tool not found: git".to_string());
            None
        };
        if git_present && repo.is_none() {
            issues.push("not inside a git repository".to_string());
        }

        let config_root = repo.clone().unwrap_or_else(|| cwd.clone());
        let (config, config_source) = match config::find_config(&config_root) {
            Some(path) => match Config::load(&path) {
                Ok(config) => (config, config::CONFIG_TOML.to_string()),
                Err(e) => {
                    issues.push(e.to_string());
                    (Config::default(), format!("{} (unreadable)", config::CONFIG_TOML))
                }
            },
            None => (Config::default(), "defaults".to_string()),
        };

        if !probe_tool(&mut tools, &config.agent.command, "--version", true, "the coding agent") {
            issues.push(format!("Tool not found: {}", config.agent.command));
        }
        probe_tool(&mut tools, "gh", "--version", false, "issue lookups (--issue)");
        probe_tool(&mut tools, "tmux", "-V", false, "worker windows (default dispatch)");

        let parent = match &self.dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => config_root.join(dir),
            None => config_root.join(&config.workspaces.dir),
        };
        let store = ManifestStore::new(&parent);
        let manifest = if store.exists() {
            match store.load() {
                Ok(manifest) => {
                    let running = manifest
                        .features
                        .iter()
                        .filter(|f| f.status == FeatureStatus::Running)
                        .count();
                    Some(ManifestStatus {
                        path: store.path().display().to_string(),
                        parseable: true,
                        features: manifest.features.len(),
                        running,
                    })
                }
                Err(e) => {
                    issues.push(format!("manifest unreadable: {e:#}"));
                    Some(ManifestStatus {
                        path: store.path().display().to_string(),
                        parseable: false,
                        features: 0,
                        running: 0,
                    })
                }
            }
        } else {
            None
        };

        let report = DoctorReport {
            repo: repo.map(|p| p.display().to_string()),
            config_source,
            agent: config.agent.command.clone(),
            tools,
            manifest,
            issues,
        };
        let issue_count = report.issues.len();

        match format {
            OutputFormat::Pretty => Self::print_pretty(&report),
            OutputFormat::Text => Self::print_text(&report),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        }

        if issue_count > 0 {
            return Err(crate::error::ExitError::new(
                u8::try_from(std::cmp::min(issue_count, 125)).unwrap_or(125),
                format!("{issue_count} issue(s) found"),
            )
            .into());
        }

        Ok(())
    }

    fn print_pretty(report: &DoctorReport) {
        println!("=== Fanout Doctor ===\n");
        match &report.repo {
            Some(repo) => println!("Repo:   {repo}"),
            None => println!("Repo:   (not inside a git repository)"),
        }
        println!("Config: {}", report.config_source);
        println!("Agent:  {}", report.agent);
        println!();

        println!("Tools:");
        for tool in &report.tools {
            if tool.present {
                println!(
                    "  ✓ {}: {}",
                    tool.name,
                    tool.version.as_deref().unwrap_or("OK")
                );
            } else if tool.required {
                println!("  ✗ {}: NOT FOUND ({})", tool.name, tool.purpose);
            } else {
                println!("  - {}: not found ({})", tool.name, tool.purpose);
            }
        }

        if let Some(manifest) = &report.manifest {
            println!("\nManifest:");
            if manifest.parseable {
                println!(
                    "  ✓ {} ({} feature(s), {} running)",
                    manifest.path, manifest.features, manifest.running
                );
            } else {
                println!("  ✗ {} (unreadable)", manifest.path);
            }
        }

        if report.issues.is_empty() {
            println!("\n✓ No issues found");
        } else {
            println!("\nIssues ({}):", report.issues.len());
            for issue in &report.issues {
                println!("  • {issue}");
            }
        }
    }

    fn print_text(report: &DoctorReport) {
        println!(
            "fanout-doctor  repo={}  config={}  agent={}",
            report.repo.as_deref().unwrap_or("-"),
            report.config_source,
            report.agent
        );

        for tool in &report.tools {
            let status = if tool.present {
                format!("ok  {}", tool.version.as_deref().unwrap_or(""))
            } else if tool.required {
                "missing".to_string()
            } else {
                "absent".to_string()
            };
            println!("tool  {}  {}", tool.name, status);
        }

        if let Some(manifest) = &report.manifest {
            let status = if manifest.parseable { "ok" } else { "unreadable" };
            println!(
                "manifest  {}  {}  features={}  running={}",
                manifest.path, status, manifest.features, manifest.running
            );
        }

        if !report.issues.is_empty() {
            println!("issues  count={}", report.issues.len());
            for issue in &report.issues {
                println!("issue  {issue}");
            }
        }
    }
}

/// Probe one binary; a spawnable tool counts as present even when the
/// version flag itself exits nonzero.
fn probe_tool(
    tools: &mut Vec<ToolStatus>,
    name: &str,
    probe_arg: &str,
    required: bool,
    purpose: &str,
) -> bool {
    let version = Tool::new(name)
        .arg(probe_arg)
        .run()
        .ok()
        .map(|output| output.stdout.trim().to_string());
    let present = version.is_some();
    tools.push(ToolStatus {
        name: name.to_string(),
        required,
        version: version.filter(|v| !v.is_empty()),
        present,
        purpose: purpose.to_string(),
    });
    present
}
