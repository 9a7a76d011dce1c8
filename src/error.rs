//! Error types for the extension scripting engine.

use thiserror::Error;

use crate::validator::ValidationError;

/// Result type alias using our error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the engine.
///
/// The first four variants are the script-facing taxonomy: callers of
/// `fire_sync` match on them to decide whether to proceed, retry or fail the
/// encompassing operation.
#[derive(Error, Debug)]
pub enum Error {
    /// Source rejected by the static validator or by metadata extraction.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A previously accepted script failed to compile at execution time.
    #[error("Compile error: {script}: {message}")]
    Compile { script: String, message: String },

    /// The script raised an exception (or exhausted its time budget).
    #[error("Runtime error: {script}: {message}")]
    Runtime { script: String, message: String },

    /// The script's return value could not be coerced to the expected type.
    #[error("Conversion error: {script}: {message}")]
    Conversion { script: String, message: String },

    /// Scope path with an empty segment or illegal characters
    #[error("Invalid scope path: {0:?}")]
    InvalidScopePath(String),

    /// No script with this identity
    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    /// Script store errors
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] Box<std::io::Error>),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] Box<serde_json::Error>),

    /// HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] Box<reqwest::Error>),
}

impl Error {
    /// Create a compile error for the given script identity.
    pub fn compile(script: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Compile {
            script: script.into(),
            message: message.into(),
        }
    }

    /// Create a runtime error for the given script identity.
    pub fn runtime(script: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Runtime {
            script: script.into(),
            message: message.into(),
        }
    }

    /// Create a conversion error for the given script identity.
    pub fn conversion(script: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conversion {
            script: script.into(),
            message: message.into(),
        }
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error came out of running a script (as opposed to the
    /// host's own plumbing).
    #[must_use]
    pub const fn is_script_failure(&self) -> bool {
        matches!(
            self,
            Self::Compile { .. } | Self::Runtime { .. } | Self::Conversion { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Box::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(Box::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(Box::new(value))
    }
}
