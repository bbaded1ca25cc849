//! Error types for the devserver client

use thiserror::Error;

/// Main error type for the devserver client
#[derive(Error, Debug)]
pub enum DevServerError {
    #[error("RPC {method} timed out on devserver {host}")]
    Timeout { method: String, host: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("Devserver is overloaded (proxy error)")]
    Overloaded,

    #[error("{0}")]
    Devserver(String),

    #[error("{0}")]
    BadBuild(String),

    #[error("{0}")]
    RetryableProvision(String),

    #[error("Fail to locate devserver: {0}")]
    FailToLocate(String),

    #[error("Timed out polling: {0}")]
    PollTimeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DevServerError {
    /// Whether the call policy may retry the failed call.
    ///
    /// Only network-level failures and the overload signal qualify; anything
    /// the devserver reported on purpose is terminal for the current call.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DevServerError::Timeout { .. }
                | DevServerError::Connection(_)
                | DevServerError::Ssh(_)
                | DevServerError::Overloaded
        )
    }

    /// Whether this failure is a transport timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, DevServerError::Timeout { .. })
    }
}

impl From<reqwest::Error> for DevServerError {
    fn from(err: reqwest::Error) -> Self {
        // Timeouts are mapped at the call site where the method is known.
        DevServerError::Connection(err.to_string())
    }
}
