//! `fanout run` - fan feature descriptions out to parallel agent runs.
//!
//! One binary, two roles. The coordinator resolves inputs into features,
//! assigns slugs and indices, then re-invokes this same executable once per
//! feature with hidden `--worker-*` flags. Each worker owns one feature
//! lifecycle end to end in its own process, so a crash in one feature never
//! takes down the others.

mod dispatch;
mod monitor;
mod worker;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;

use crate::agent::AgentInvocation;
use crate::config::Config;
use crate::error::ExitError;
use crate::git;
use crate::issues;
use crate::manifest::{FeatureSource, ManifestStore};
use crate::slug;
use crate::subprocess::Tool;
use crate::workspace;

#[derive(Debug, Args)]
#[allow(clippy::struct_excessive_bools)]
pub struct RunArgs {
    /// Feature descriptions, one isolated workspace and agent per feature
    #[arg(value_name = "FEATURE")]
    pub features: Vec<String>,

    /// Read feature descriptions from a file, one per line
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Work a tracker issue by number (repeatable)
    #[arg(long = "issue", value_name = "N")]
    pub issues: Vec<u64>,

    /// Revision feature branches fork from (defaults to the current branch)
    #[arg(long, value_name = "REV")]
    pub base: Option<String>,

    /// Directory holding workspaces, the manifest, and worker logs
    #[arg(long, value_name = "PATH")]
    pub dir: Option<PathBuf>,

    /// Agent command to run in each workspace
    #[arg(long, value_name = "CMD")]
    pub agent: Option<String>,

    /// Model passed to the agent
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Agent turn budget per feature
    #[arg(long, value_name = "N")]
    pub turns: Option<u32>,

    /// Port shift between adjacent features
    #[arg(long, value_name = "N")]
    pub port_offset: Option<u16>,

    /// Leave copied env files untouched
    #[arg(long)]
    pub no_ports: bool,

    /// Tear each workspace down after its agent succeeds
    #[arg(long)]
    pub cleanup: bool,

    /// Spawn workers as monitored background processes instead of tmux windows
    #[arg(long)]
    pub background: bool,

    /// Print the worker commands without dispatching anything
    #[arg(long)]
    pub dry_run: bool,

    // Hidden worker-role flags. The coordinator injects these when
    // re-invoking itself; they are not part of the user-facing surface.
    #[arg(long, hide = true)]
    pub worker: bool,
    #[arg(long, hide = true, requires = "worker", value_name = "N")]
    pub worker_index: Option<usize>,
    #[arg(long, hide = true, requires = "worker", value_name = "SLUG")]
    pub worker_slug: Option<String>,
    #[arg(long, hide = true, requires = "worker", value_name = "TEXT")]
    pub worker_description: Option<String>,
    #[arg(long, hide = true, requires = "worker", value_name = "N")]
    pub worker_issue: Option<u64>,
    #[arg(long, hide = true, requires = "worker", value_name = "TEXT")]
    pub worker_issue_context: Option<String>,
    #[arg(long, hide = true, requires = "worker", value_enum, value_name = "SOURCE")]
    pub worker_source: Option<FeatureSource>,
    #[arg(
        long = "worker-extra-arg",
        hide = true,
        requires = "worker",
        value_name = "ARG",
        allow_hyphen_values = true
    )]
    pub worker_extra_args: Vec<String>,
}

impl RunArgs {
    pub fn execute(self) -> anyhow::Result<()> {
        match Role::resolve(&self)? {
            Role::Worker(params) => worker::run_worker(&self, params),
            Role::Coordinator => run_coordinator(&self),
        }
    }
}

/// Which half of the binary this invocation is.
#[derive(Debug)]
enum Role {
    Coordinator,
    Worker(WorkerParams),
}

/// Feature identity handed to a worker by the coordinator.
#[derive(Debug, Clone)]
pub struct WorkerParams {
    pub index: usize,
    pub slug: String,
    pub description: String,
    pub issue_number: Option<u64>,
    pub issue_context: Option<String>,
    pub source: FeatureSource,
}

impl Role {
    fn resolve(args: &RunArgs) -> anyhow::Result<Self> {
        if !args.worker {
            return Ok(Self::Coordinator);
        }
        Ok(Self::Worker(WorkerParams {
            index: require(args.worker_index, "--worker-index")?,
            slug: require(args.worker_slug.clone(), "--worker-slug")?,
            description: require(args.worker_description.clone(), "--worker-description")?,
            issue_number: args.worker_issue,
            issue_context: args.worker_issue_context.clone(),
            source: args.worker_source.unwrap_or(FeatureSource::Features),
        }))
    }
}

fn require<T>(value: Option<T>, flag: &str) -> anyhow::Result<T> {
    value.ok_or_else(|| {
        anyhow::Error::from(ExitError::Input(format!("--worker requires {flag}")))
    })
}

/// Effective settings after config values and CLI flags are merged.
/// Flags win; the coordinator passes every resolved value to workers
/// explicitly, so both roles agree even if the config changes mid-run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub repo: PathBuf,
    pub parent: PathBuf,
    pub base: String,
    pub agent: AgentInvocation,
    pub port_offset: u16,
    pub rewrite_ports: bool,
    pub cleanup: bool,
}

impl RunSettings {
    pub fn resolve(args: &RunArgs, repo: PathBuf, config: &Config) -> anyhow::Result<Self> {
        let dir = args
            .dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.workspaces.dir));
        let parent = if dir.is_absolute() { dir } else { repo.join(dir) };

        let base = match args.base.clone().or_else(|| config.workspaces.base.clone()) {
            Some(base) => base,
            None => git::current_branch(&repo)?,
        };

        // A dispatched worker's argv is complete; config fills gaps for the
        // coordinator only.
        let agent = AgentInvocation {
            command: args
                .agent
                .clone()
                .unwrap_or_else(|| config.agent.command.clone()),
            model: if args.worker {
                args.model.clone()
            } else {
                args.model.clone().or_else(|| config.agent.model.clone())
            },
            turns: args.turns.unwrap_or(config.agent.turns),
            extra_args: if args.worker {
                args.worker_extra_args.clone()
            } else {
                config.agent.extra_args.clone()
            },
        };

        Ok(Self {
            repo,
            parent,
            base,
            agent,
            port_offset: args.port_offset.unwrap_or(config.ports.offset),
            rewrite_ports: if args.worker {
                !args.no_ports
            } else {
                !args.no_ports && config.ports.rewrite
            },
            cleanup: args.cleanup,
        })
    }
}

/// One resolved unit of work, in input order.
#[derive(Debug, Clone)]
struct FeatureInput {
    description: String,
    slug: String,
    index: usize,
    source: FeatureSource,
    issue_number: Option<u64>,
    issue_context: Option<String>,
}

fn run_coordinator(args: &RunArgs) -> anyhow::Result<()> {
    let repo = find_repo_root()?;
    let config = Config::load_or_default(&repo)?;
    let settings = RunSettings::resolve(args, repo, &config)?;

    if !args.issues.is_empty() && !tool_available("gh", "--version") {
        return Err(ExitError::ToolNotFound {
            tool: "gh".to_string(),
        }
        .into());
    }

    let features = resolve_features(args, &settings.repo)?;
    if features.is_empty() {
        return Err(ExitError::Input(
            "no features given: pass descriptions, --file, or --issue".to_string(),
        )
        .into());
    }
    slug::validate_unique(features.iter().map(|f| f.slug.as_str()))?;

    let exe = std::env::current_exe().context("could not locate the fanout executable")?;
    let commands: Vec<Vec<String>> = features
        .iter()
        .map(|feature| worker_command(&exe, &settings, feature))
        .collect();

    if args.dry_run {
        for argv in &commands {
            println!("{}", dispatch::escape_line(argv)?);
        }
        return Ok(());
    }

    if !tool_available(&settings.agent.command, "--version") {
        return Err(ExitError::ToolNotFound {
            tool: settings.agent.command.clone(),
        }
        .into());
    }

    if !args.background && !tool_available("tmux", "-V") {
        return Err(ExitError::ToolNotFound {
            tool: "tmux".to_string(),
        }
        .into());
    }

    let store = ManifestStore::new(&settings.parent);
    store.init()?;

    eprintln!(
        "Fanning out {} feature(s) from {}:",
        features.len(),
        settings.base
    );
    for feature in &features {
        eprintln!(
            "  • {} on {}",
            feature.slug,
            workspace::branch_name(&feature.slug)
        );
    }

    if args.background {
        let mut workers = Vec::with_capacity(commands.len());
        for (feature, argv) in features.iter().zip(&commands) {
            workers.push(dispatch::spawn_background(
                &settings.repo,
                &settings.parent,
                &feature.slug,
                argv,
            )?);
        }
        monitor::watch(workers, &store)
    } else {
        for (feature, argv) in features.iter().zip(&commands) {
            let line = dispatch::escape_line(argv)?;
            dispatch::spawn_tmux_window(&settings.repo, &feature.slug, &line)?;
        }
        eprintln!();
        eprintln!(
            "Dispatched {} tmux window(s). Check progress with `fanout status`.",
            features.len()
        );
        Ok(())
    }
}

/// Locate the enclosing repository, turning "not a repo" into a usage error
/// while letting a missing git binary surface as its own failure.
pub(crate) fn find_repo_root() -> anyhow::Result<PathBuf> {
    let cwd = std::env::current_dir().context("could not determine current directory")?;
    match git::repo_root(&cwd) {
        Ok(root) => Ok(root),
        Err(e)
            if e.downcast_ref::<ExitError>()
                .is_some_and(|ee| matches!(ee, ExitError::ToolFailed { .. })) =>
        {
            Err(ExitError::Input(
                "not inside a git repository (run fanout from within one)".to_string(),
            )
            .into())
        }
        Err(e) => Err(e),
    }
}

/// Gather features in input order: positional descriptions, then file
/// lines, then issues. Issues are fetched here, once; workers receive the
/// rendered context and never talk to the tracker themselves.
fn resolve_features(args: &RunArgs, repo: &Path) -> anyhow::Result<Vec<FeatureInput>> {
    let mut features = Vec::new();

    for description in &args.features {
        push_feature(&mut features, description, FeatureSource::Features, None, None)?;
    }

    if let Some(path) = &args.file {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExitError::Input(format!("reading feature list {}: {e}", path.display()))
        })?;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            push_feature(&mut features, line, FeatureSource::File, None, None)?;
        }
    }

    for &number in &args.issues {
        let issue = issues::fetch_issue(repo, number)?;
        let slug = slug::issue_slug(number, &issue.title);
        let context = issue.render_context(number);
        features.push(FeatureInput {
            description: issue.title.clone(),
            slug,
            index: features.len(),
            source: FeatureSource::Issue,
            issue_number: Some(number),
            issue_context: Some(context),
        });
    }

    Ok(features)
}

fn push_feature(
    features: &mut Vec<FeatureInput>,
    description: &str,
    source: FeatureSource,
    issue_number: Option<u64>,
    issue_context: Option<String>,
) -> anyhow::Result<()> {
    let slug = slug::normalize(description);
    if slug.is_empty() {
        return Err(ExitError::Input(format!(
            "feature description '{description}' has no usable characters for a slug"
        ))
        .into());
    }
    features.push(FeatureInput {
        description: description.to_string(),
        slug,
        index: features.len(),
        source,
        issue_number,
        issue_context,
    });
    Ok(())
}

/// Build the argv that re-invokes this binary as a worker for one feature.
/// Everything stays a plain argv here; shell escaping happens only at the
/// dispatch boundary.
fn worker_command(exe: &Path, settings: &RunSettings, feature: &FeatureInput) -> Vec<String> {
    let mut argv = vec![
        exe.to_string_lossy().into_owned(),
        "run".to_string(),
        "--worker".to_string(),
        "--worker-index".to_string(),
        feature.index.to_string(),
        "--worker-slug".to_string(),
        feature.slug.clone(),
        "--worker-description".to_string(),
        feature.description.clone(),
        "--worker-source".to_string(),
        feature.source.as_str().to_string(),
        "--dir".to_string(),
        settings.parent.to_string_lossy().into_owned(),
        "--base".to_string(),
        settings.base.clone(),
        "--agent".to_string(),
        settings.agent.command.clone(),
        "--turns".to_string(),
        settings.agent.turns.to_string(),
        "--port-offset".to_string(),
        settings.port_offset.to_string(),
    ];
    if let Some(model) = &settings.agent.model {
        argv.push("--model".to_string());
        argv.push(model.clone());
    }
    for arg in &settings.agent.extra_args {
        argv.push("--worker-extra-arg".to_string());
        argv.push(arg.clone());
    }
    if !settings.rewrite_ports {
        argv.push("--no-ports".to_string());
    }
    if settings.cleanup {
        argv.push("--cleanup".to_string());
    }
    if let Some(number) = feature.issue_number {
        argv.push("--worker-issue".to_string());
        argv.push(number.to_string());
    }
    if let Some(context) = &feature.issue_context {
        argv.push("--worker-issue-context".to_string());
        argv.push(context.clone());
    }
    argv
}

/// A tool counts as available when it can be spawned at all; a nonzero
/// exit from the probe still proves the binary exists.
fn tool_available(program: &str, probe_arg: &str) -> bool {
    match Tool::new(program).arg(probe_arg).run() {
        Ok(_) => true,
        Err(e) => !e
            .downcast_ref::<ExitError>()
            .is_some_and(|ee| matches!(ee, ExitError::ToolNotFound { .. })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        args: RunArgs,
    }

    fn parse(args: &[&str]) -> RunArgs {
        TestCli::try_parse_from(std::iter::once("fanout").chain(args.iter().copied()))
            .expect("args should parse")
            .args
    }

    #[test]
    fn coordinator_role_without_worker_flag() {
        let args = parse(&["add auth"]);
        assert!(matches!(
            Role::resolve(&args).expect("resolves"),
            Role::Coordinator
        ));
    }

    #[test]
    fn worker_role_carries_identity() {
        let args = parse(&[
            "--worker",
            "--worker-index",
            "2",
            "--worker-slug",
            "add-auth",
            "--worker-description",
            "Add auth",
            "--worker-source",
            "features",
        ]);
        let Role::Worker(params) = Role::resolve(&args).expect("resolves") else {
            panic!("expected worker role");
        };
        assert_eq!(params.index, 2);
        assert_eq!(params.slug, "add-auth");
        assert_eq!(params.description, "Add auth");
        assert_eq!(params.source, FeatureSource::Features);
        assert_eq!(params.issue_number, None);
    }

    #[test]
    fn worker_flags_require_worker_mode() {
        let result = TestCli::try_parse_from(["fanout", "--worker-index", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn worker_without_slug_is_an_input_error() {
        let args = parse(&["--worker", "--worker-index", "0"]);
        let err = Role::resolve(&args).expect_err("missing slug");
        match err.downcast_ref::<ExitError>() {
            Some(ExitError::Input(msg)) => assert!(msg.contains("--worker-slug")),
            other => panic!("expected input error, got {other:?}"),
        }
    }

    #[test]
    fn settings_prefer_flags_over_config() {
        let mut config = Config::default();
        config.workspaces.dir = ".features".to_string();
        config.workspaces.base = Some("develop".to_string());
        config.agent.command = "claude".to_string();
        config.agent.turns = 40;
        config.ports.offset = 10;

        let args = parse(&[
            "add auth",
            "--dir",
            "/tmp/ws",
            "--base",
            "main",
            "--agent",
            "goose",
            "--turns",
            "5",
            "--port-offset",
            "100",
            "--no-ports",
            "--cleanup",
        ]);
        let settings = RunSettings::resolve(&args, PathBuf::from("/repo"), &config)
            .expect("resolves without touching git");

        assert_eq!(settings.parent, PathBuf::from("/tmp/ws"));
        assert_eq!(settings.base, "main");
        assert_eq!(settings.agent.command, "goose");
        assert_eq!(settings.agent.turns, 5);
        assert_eq!(settings.port_offset, 100);
        assert!(!settings.rewrite_ports);
        assert!(settings.cleanup);
    }

    #[test]
    fn settings_fall_back_to_config() {
        let mut config = Config::default();
        config.workspaces.dir = ".features".to_string();
        config.workspaces.base = Some("develop".to_string());
        config.agent.model = Some("opus".to_string());
        config.ports.offset = 25;

        let args = parse(&["add auth"]);
        let settings = RunSettings::resolve(&args, PathBuf::from("/repo"), &config)
            .expect("resolves without touching git");

        assert_eq!(settings.parent, PathBuf::from("/repo/.features"));
        assert_eq!(settings.base, "develop");
        assert_eq!(settings.agent.model.as_deref(), Some("opus"));
        assert_eq!(settings.port_offset, 25);
        assert!(settings.rewrite_ports);
        assert!(!settings.cleanup);
    }

    #[test]
    fn no_ports_flag_disables_rewrites() {
        let mut config = Config::default();
        config.workspaces.base = Some("main".to_string());
        let args = parse(&["add auth", "--no-ports"]);
        let settings =
            RunSettings::resolve(&args, PathBuf::from("/repo"), &config).expect("resolves");
        assert!(!settings.rewrite_ports);
    }

    #[test]
    fn worker_settings_ignore_config_for_forwarded_values() {
        let mut config = Config::default();
        config.agent.model = Some("config-model".to_string());
        config.agent.extra_args = vec!["--from-config".to_string()];
        config.ports.rewrite = false;

        let args = parse(&[
            "--worker",
            "--worker-index",
            "0",
            "--worker-slug",
            "demo",
            "--worker-description",
            "Demo",
            "--worker-extra-arg",
            "--verbose",
            "--worker-extra-arg",
            "acceptEdits",
            "--base",
            "main",
        ]);
        let settings =
            RunSettings::resolve(&args, PathBuf::from("/repo"), &config).expect("resolves");

        assert_eq!(settings.agent.extra_args, vec!["--verbose", "acceptEdits"]);
        assert_eq!(settings.agent.model, None);
        assert!(settings.rewrite_ports);
    }

    #[test]
    fn worker_command_round_trips_through_the_shell() {
        let settings = RunSettings {
            repo: PathBuf::from("/repo"),
            parent: PathBuf::from("/repo/.fanout"),
            base: "main".to_string(),
            agent: AgentInvocation {
                command: "claude".to_string(),
                model: Some("opus".to_string()),
                turns: 40,
                extra_args: Vec::new(),
            },
            port_offset: 10,
            rewrite_ports: true,
            cleanup: false,
        };
        let feature = FeatureInput {
            description: "Add OAuth2 & JWT auth".to_string(),
            slug: "add-oauth2-jwt-auth".to_string(),
            index: 1,
            source: FeatureSource::Features,
            issue_number: None,
            issue_context: None,
        };

        let argv = worker_command(Path::new("/usr/bin/fanout"), &settings, &feature);
        let line = dispatch::escape_line(&argv).expect("escapes");
        let reparsed = shlex::split(&line).expect("splits");
        assert_eq!(reparsed, argv);
        assert!(argv.contains(&"--worker".to_string()));
        assert!(argv.contains(&"Add OAuth2 & JWT auth".to_string()));
    }

    #[test]
    fn worker_command_forwards_agent_extra_args() {
        let settings = RunSettings {
            repo: PathBuf::from("/repo"),
            parent: PathBuf::from("/repo/.fanout"),
            base: "main".to_string(),
            agent: AgentInvocation {
                command: "claude".to_string(),
                model: None,
                turns: 40,
                extra_args: vec!["--verbose".to_string(), "acceptEdits".to_string()],
            },
            port_offset: 10,
            rewrite_ports: true,
            cleanup: false,
        };
        let feature = FeatureInput {
            description: "Add auth".to_string(),
            slug: "add-auth".to_string(),
            index: 0,
            source: FeatureSource::Features,
            issue_number: None,
            issue_context: None,
        };

        let argv = worker_command(Path::new("/usr/bin/fanout"), &settings, &feature);
        let positions: Vec<usize> = argv
            .iter()
            .enumerate()
            .filter(|(_, arg)| *arg == "--worker-extra-arg")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(positions.len(), 2);
        assert_eq!(argv[positions[0] + 1], "--verbose");
        assert_eq!(argv[positions[1] + 1], "acceptEdits");
    }

    #[test]
    fn worker_command_forwards_issue_context() {
        let settings = RunSettings {
            repo: PathBuf::from("/repo"),
            parent: PathBuf::from("/repo/.fanout"),
            base: "main".to_string(),
            agent: AgentInvocation {
                command: "claude".to_string(),
                model: None,
                turns: 40,
                extra_args: Vec::new(),
            },
            port_offset: 10,
            rewrite_ports: true,
            cleanup: false,
        };
        let feature = FeatureInput {
            description: "Fix login".to_string(),
            slug: "issue-7-fix-login".to_string(),
            index: 0,
            source: FeatureSource::Issue,
            issue_number: Some(7),
            issue_context: Some("## Issue #7: Fix login".to_string()),
        };

        let argv = worker_command(Path::new("/usr/bin/fanout"), &settings, &feature);
        let issue_pos = argv
            .iter()
            .position(|a| a == "--worker-issue")
            .expect("issue flag present");
        assert_eq!(argv[issue_pos + 1], "7");
        assert!(argv.contains(&"## Issue #7: Fix login".to_string()));
    }
}
