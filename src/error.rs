use std::process::ExitCode;

/// Errors that cause fanout to exit with a specific code.
#[derive(Debug, thiserror::Error)]
pub enum ExitError {
    #[error("{0}")]
    Input(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("{tool} failed (exit {code}): {message}")]
    ToolFailed {
        tool: String,
        code: i32,
        message: String,
    },

    #[error("feature '{slug}' is already being worked on by pid {pid}")]
    AlreadyRunning { slug: String, pid: u32 },

    #[error("duplicate slug '{slug}': feature descriptions must normalize to distinct slugs")]
    DuplicateSlug { slug: String },

    #[error("{tool} timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("{message}")]
    WithCode { code: u8, message: String },

    #[error("{0}")]
    Other(String),
}

impl ExitError {
    pub fn new(code: u8, message: String) -> Self {
        ExitError::WithCode { code, message }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            ExitError::Input(_) | ExitError::Config(_) => ExitCode::from(2),
            ExitError::ToolNotFound { .. } => ExitCode::from(3),
            ExitError::ToolFailed { .. } => ExitCode::from(4),
            ExitError::AlreadyRunning { .. } => ExitCode::from(5),
            ExitError::DuplicateSlug { .. } => ExitCode::from(6),
            ExitError::Timeout { .. } => ExitCode::from(7),
            ExitError::WithCode { code, .. } => ExitCode::from(*code),
            ExitError::Other(_) => ExitCode::from(1),
        }
    }
}
