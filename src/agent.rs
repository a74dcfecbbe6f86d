//! Invokes the coding agent on a workspace.
//!
//! One invocation per feature: `<command> -p <task brief> --max-turns N
//! [--model M] [extra args]`, run with the workspace as cwd. The agent's
//! exit code is the sole success signal; nothing is parsed from its output.

use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::ExitError;

#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub command: String,
    pub model: Option<String>,
    pub turns: u32,
    pub extra_args: Vec<String>,
}

impl AgentInvocation {
    /// Arguments for one run, with `brief` as the prompt.
    pub fn build_args(&self, brief: &str) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            brief.to_string(),
            "--max-turns".to_string(),
            self.turns.to_string(),
        ];
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Run the agent in `workspace`, streaming its output to our own
    /// stdout/stderr, and return its exit code.
    pub fn run(&self, workspace: &Path, brief: &str) -> anyhow::Result<i32> {
        tracing::debug!(
            "running agent '{}' with {} turn(s) in {}",
            self.command,
            self.turns,
            workspace.display()
        );
        let status = Command::new(&self.command)
            .args(self.build_args(brief))
            .current_dir(workspace)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| -> anyhow::Error {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ExitError::ToolNotFound {
                        tool: self.command.clone(),
                    }
                    .into()
                } else {
                    anyhow::Error::new(e).context(format!("spawning {}", self.command))
                }
            })?;
        Ok(status.code().unwrap_or(-1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(command: &str) -> AgentInvocation {
        AgentInvocation {
            command: command.to_string(),
            model: None,
            turns: 40,
            extra_args: Vec::new(),
        }
    }

    #[test]
    fn build_args_minimal() {
        let args = invocation("claude").build_args("do the thing");
        assert_eq!(args, ["-p", "do the thing", "--max-turns", "40"]);
    }

    #[test]
    fn build_args_with_model_and_extras() {
        let mut inv = invocation("claude");
        inv.model = Some("opus".to_string());
        inv.extra_args = vec!["--permission-mode".to_string(), "acceptEdits".to_string()];

        let args = inv.build_args("brief");
        assert_eq!(
            args,
            [
                "-p",
                "brief",
                "--max-turns",
                "40",
                "--model",
                "opus",
                "--permission-mode",
                "acceptEdits",
            ]
        );
    }

    #[test]
    fn run_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        // `true` ignores its arguments and exits 0
        let code = invocation("true").run(dir.path(), "brief").unwrap();
        assert_eq!(code, 0);

        let code = invocation("false").run(dir.path(), "brief").unwrap();
        assert_eq!(code, 1);
    }

    #[test]
    fn run_maps_missing_agent_to_tool_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = invocation("definitely-not-a-real-agent-xyz")
            .run(dir.path(), "brief")
            .unwrap_err();
        match err.downcast_ref::<ExitError>().unwrap() {
            ExitError::ToolNotFound { tool } => {
                assert_eq!(tool, "definitely-not-a-real-agent-xyz");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
