//! Error types for the candela daemon

use thiserror::Error;

/// Result type alias for candela operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or capture error
    #[error("audio error: {0}")]
    Audio(String),

    /// Wake word backend error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Speech was captured but could not be understood
    #[error("could not understand audio")]
    NotUnderstood,

    /// Recognition service error (unreachable, bad response)
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Device bridge error (fetch or mutation failure)
    #[error("bridge error: {0}")]
    Bridge(String),

    /// Pipeline stage error
    #[error("stage error: {0}")]
    Stage(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What the pipeline does about an error of a given kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Transient perception error: log it and move on
    Ignore,
    /// Device error: drop the cached handles, continue the chain
    InvalidateCache,
    /// Count toward the supervisor's restart threshold
    Escalate,
    /// Not recoverable inside the pipeline
    Fatal,
}

impl Error {
    /// Recovery policy for this error kind
    #[must_use]
    pub const fn recovery(&self) -> Recovery {
        match self {
            Self::NotUnderstood => Recovery::Ignore,
            Self::Bridge(_) => Recovery::InvalidateCache,
            Self::Audio(_)
            | Self::Recognition(_)
            | Self::Stage(_)
            | Self::Io(_)
            | Self::Http(_)
            | Self::Serialization(_) => Recovery::Escalate,
            Self::Config(_) | Self::WakeWord(_) => Recovery::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_policy_per_kind() {
        assert_eq!(Error::NotUnderstood.recovery(), Recovery::Ignore);
        assert_eq!(
            Error::Bridge("timeout".to_string()).recovery(),
            Recovery::InvalidateCache
        );
        assert_eq!(
            Error::Recognition("unreachable".to_string()).recovery(),
            Recovery::Escalate
        );
        assert_eq!(
            Error::WakeWord("no model".to_string()).recovery(),
            Recovery::Fatal
        );
    }
}
