use std::time::Duration;

/// Failures surfaced by the core. Glue code wraps these in `anyhow`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`{command}` exited with status {status:?}: {output}")]
    Process {
        command: String,
        status: Option<i32>,
        output: String,
    },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` did not finish within {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("permission not granted: {0}")]
    Permission(String),

    /// An OS service refused or failed a call
    #[error("platform call failed: {0}")]
    Platform(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn permission(what: impl Into<String>) -> Self {
        Error::Permission(what.into())
    }

    pub fn platform(what: impl Into<String>) -> Self {
        Error::Platform(what.into())
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, Error::Permission(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
