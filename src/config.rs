use std::path::{Path, PathBuf};

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ExitError;

/// Config file name, looked up at the repository root.
pub const CONFIG_TOML: &str = ".fanout.toml";

/// Returns the config file path if one exists in `dir`.
pub fn find_config(dir: &Path) -> Option<PathBuf> {
    let path = dir.join(CONFIG_TOML);
    path.exists().then_some(path)
}

/// Top-level `.fanout.toml` config. Every section and field is optional;
/// CLI flags override whatever is set here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub workspaces: WorkspacesConfig,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Where feature workspaces live and what they fork from.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkspacesConfig {
    /// Directory holding all feature workspaces, the manifest, lock files,
    /// and worker logs. Relative paths are resolved against the repo root.
    #[serde(default = "default_workspaces_dir")]
    pub dir: String,
    /// Revision feature branches fork from. Defaults to the branch checked
    /// out when `fanout run` starts.
    #[serde(default)]
    pub base: Option<String>,
}

impl Default for WorkspacesConfig {
    fn default() -> Self {
        Self {
            dir: default_workspaces_dir(),
            base: None,
        }
    }
}

/// Port rewriting for copied env files.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PortsConfig {
    /// Per-feature port offset; feature N gets `value + N * offset`.
    #[serde(default = "default_port_offset")]
    pub offset: u16,
    /// Set false to leave copied env files untouched.
    #[serde(default = "default_true")]
    pub rewrite: bool,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            offset: default_port_offset(),
            rewrite: true,
        }
    }
}

/// The coding agent each worker hands its feature to.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentConfig {
    /// Agent executable. Invoked as `<command> -p <task brief> --max-turns N`.
    #[serde(default = "default_agent_command")]
    pub command: String,
    /// Model override passed as `--model`. Omit to use the agent's default.
    #[serde(default)]
    pub model: Option<String>,
    /// Turn budget per feature.
    #[serde(default = "default_turns")]
    pub turns: u32,
    /// Extra arguments appended to every agent invocation.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            model: None,
            turns: default_turns(),
            extra_args: Vec::new(),
        }
    }
}

// Default value functions for serde
fn default_workspaces_dir() -> String {
    ".fanout".into()
}
fn default_port_offset() -> u16 {
    10
}
fn default_true() -> bool {
    true
}
fn default_agent_command() -> String {
    "claude".into()
}
fn default_turns() -> u32 {
    40
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse_toml(&contents)
    }

    /// Load the config found in `root`, or defaults when there is none.
    pub fn load_or_default(root: &Path) -> anyhow::Result<Self> {
        match find_config(root) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string.
    pub fn parse_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| ExitError::Config(format!("invalid {CONFIG_TOML}: {e}")).into())
    }

    /// Serialize config to a TOML string with helpful comments.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        let raw = toml::to_string_pretty(self).context("serializing config to TOML")?;

        // Use toml_edit to add comments for each section
        let mut doc: toml_edit::DocumentMut = raw
            .parse()
            .context("parsing generated TOML for comment injection")?;

        doc.decor_mut()
            .set_prefix("# Fanout project configuration\n# CLI flags on `fanout run` override these values per run.\n\n");

        fn set_table_comment(doc: &mut toml_edit::DocumentMut, key: &str, comment: &str) {
            if let Some(item) = doc.get_mut(key) {
                if let Some(tbl) = item.as_table_mut() {
                    tbl.decor_mut().set_prefix(comment);
                }
            }
        }

        set_table_comment(
            &mut doc,
            "workspaces",
            "# Where feature worktrees, the manifest, and worker logs live\n",
        );
        set_table_comment(
            &mut doc,
            "ports",
            "\n# PORT-variable rewriting in copied env files (feature N gets value + N * offset)\n",
        );
        set_table_comment(
            &mut doc,
            "agent",
            "\n# Coding agent each worker runs (omit fields to use defaults)\n",
        );

        Ok(doc.to_string())
    }
}
