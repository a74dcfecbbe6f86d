//! The task brief: rendered natural-language instructions handed to the
//! coding agent as its prompt.

use minijinja::Environment;
use serde::Serialize;

const TASK_BRIEF_TEMPLATE: &str = include_str!("templates/task-brief.md.jinja");

/// Context data passed to the task brief template.
#[derive(Debug, Serialize)]
pub struct TaskBrief {
    pub description: String,
    pub branch: String,
    /// Whether port rewriting shifted this workspace's env files.
    pub ports_shifted: bool,
    /// Pre-rendered issue block for issue-sourced features.
    pub issue_context: Option<String>,
}

/// Render the instructions for one feature.
pub fn render_task_brief(brief: &TaskBrief) -> anyhow::Result<String> {
    let mut env = Environment::new();
    env.add_template("task-brief", TASK_BRIEF_TEMPLATE)?;
    let template = env.get_template("task-brief")?;
    Ok(template.render(brief)?)
}
