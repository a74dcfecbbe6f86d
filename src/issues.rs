//! GitHub issue lookup via the `gh` CLI.
//!
//! Issues are fetched once, by the coordinator, while it resolves the
//! feature set: the title seeds the slug and the rendered context block
//! travels to the worker as a parameter, so workers never call `gh`.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::subprocess::Tool;

const GH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub assignees: Vec<Assignee>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Assignee {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    /// Null for comments whose author account was deleted.
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub body: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub login: String,
}

impl Comment {
    fn author_login(&self) -> &str {
        self.author.as_ref().map_or("unknown", |a| a.login.as_str())
    }
}

/// Fetch one issue with `gh issue view`, run inside the repository.
pub fn fetch_issue(repo: &Path, number: u64) -> anyhow::Result<Issue> {
    let out = Tool::new("gh")
        .args(&["issue", "view"])
        .arg(&number.to_string())
        .args(&["--json", "title,body,labels,assignees,state,comments"])
        .cwd(repo)
        .timeout(GH_TIMEOUT)
        .run_ok()
        .with_context(|| format!("fetching issue #{number}"))?;
    out.parse_json()
        .with_context(|| format!("parsing issue #{number}"))
}

impl Issue {
    /// Plain-markdown context block embedded in the agent's task brief.
    pub fn render_context(&self, number: u64) -> String {
        let mut out = format!("## Issue #{number}: {}\n", self.title);
        out.push_str(&format!("State: {}\n", self.state));
        if !self.labels.is_empty() {
            let names: Vec<&str> = self.labels.iter().map(|l| l.name.as_str()).collect();
            out.push_str(&format!("Labels: {}\n", names.join(", ")));
        }
        if !self.assignees.is_empty() {
            let logins: Vec<&str> = self.assignees.iter().map(|a| a.login.as_str()).collect();
            out.push_str(&format!("Assignees: {}\n", logins.join(", ")));
        }
        if !self.body.is_empty() {
            out.push('\n');
            out.push_str(self.body.trim_end());
            out.push('\n');
        }
        if !self.comments.is_empty() {
            out.push_str("\n### Comments\n");
            for comment in &self.comments {
                out.push_str(&format!(
                    "\n{} ({}):\n{}\n",
                    comment.author_login(),
                    comment.created_at,
                    comment.body.trim_end()
                ));
            }
        }
        out
    }
}
