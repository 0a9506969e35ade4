use thiserror::Error;

use crate::types::ErrorKind;

/// Failures reported by the browser-page collaborator.
#[derive(Debug, Error)]
pub enum PageError {
    /// The page handle is gone. This is the only fatal page failure.
    #[error("page is closed or its browser connection was lost")]
    Closed,
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("page script failed: {0}")]
    Script(String),
    #[error("element not found: {0}")]
    NotFound(String),
    #[error("operation not supported by this page: {0}")]
    Unsupported(&'static str),
    #[error("{0}")]
    Other(String),
}

impl PageError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PageError::Closed)
    }

    /// Classify a backend error by its message. CDP backends report a dead
    /// tab or websocket only through the error text.
    pub fn from_backend(err: impl std::fmt::Display) -> Self {
        let text = err.to_string();
        let lower = text.to_lowercase();
        if lower.contains("connection closed")
            || lower.contains("connection is closed")
            || lower.contains("target closed")
            || lower.contains("no such target")
            || lower.contains("channel closed")
            || lower.contains("connectionclosed")
        {
            PageError::Closed
        } else if lower.contains("timed out") || lower.contains("timeout") {
            PageError::Timeout(text)
        } else {
            PageError::Other(text)
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("could not decode completion: {0}")]
    Decode(String),
}

/// A tool call that cannot be dispatched as given.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("invalid arguments for `{tool}`: {message}")]
    Argument { tool: String, message: String },
}

impl ToolError {
    pub fn argument(tool: &str, message: impl Into<String>) -> Self {
        ToolError::Argument {
            tool: tool.to_string(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::UnknownTool(_) => ErrorKind::UnknownTool,
            ToolError::Argument { .. } => ErrorKind::ToolArgumentError,
        }
    }
}

/// Errors that end an agent loop. Everything else is turned into
/// conversation feedback.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("page lost while working on {task:?}: {source}")]
    PageClosed {
        task: Option<String>,
        #[source]
        source: PageError,
    },
    #[error("agent is not in a state that allows this: {0}")]
    InvalidState(&'static str),
}
