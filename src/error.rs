// src/error.rs

//! Error types shared by the proxy, the target adapters and the session

use thiserror::Error;

/// Result type used throughout pipkin
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid invocation: bad flags, missing files, conflicting targets
    #[error("{0}")]
    User(String),

    /// A distribution file name or record could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// Upstream index answered with a non-404 failure or timed out
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The target transport failed
    #[error("communication error: {0}")]
    Communication(String),

    /// The external installer or an on-device script failed
    #[error("{message}")]
    Management {
        message: String,
        command: String,
        stdout: String,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn user(msg: impl Into<String>) -> Self {
        Self::User(msg.into())
    }

    pub fn management(
        message: impl Into<String>,
        command: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::Management {
            message: message.into(),
            command: command.into(),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Whether this error belongs to the target transport
    pub fn is_communication(&self) -> bool {
        matches!(self, Self::Communication(_))
    }
}
