//! Error types for tierkv

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Usage Errors ===
    #[error("Invalid argument `{argument}`: {reason}")]
    Validation {
        argument: &'static str,
        reason: String,
    },

    #[error("Cannot {operation} while coordinator is {state}")]
    NotRunning {
        operation: &'static str,
        state: String,
    },

    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Tier chain is empty")]
    EmptyTierChain,

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration source error: {0}")]
    Config(#[from] config::ConfigError),

    // === Storage Errors ===
    #[error("Shard {shard} failed: {reason}")]
    Shard { shard: String, reason: String },

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(argument: &'static str, reason: impl Into<String>) -> Self {
        Error::Validation {
            argument,
            reason: reason.into(),
        }
    }

    pub fn shard(shard: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Shard {
            shard: shard.into(),
            reason: reason.to_string(),
        }
    }

    /// Usage errors are fatal to the call and must not be retried.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. }
                | Error::NotRunning { .. }
                | Error::InvalidTransition { .. }
                | Error::EmptyTierChain
        )
    }

    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Shard { .. } | Error::Io(_))
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::validation("table", "empty").is_usage());
        assert!(Error::EmptyTierChain.is_usage());
        assert!(!Error::EmptyTierChain.is_retryable());

        let err = Error::shard("tier0/shard1", "disk full");
        assert!(err.is_retryable());
        assert!(!err.is_usage());
    }

    #[test]
    fn test_validation_message_names_argument() {
        let err = Error::validation("key", "must not be empty");
        assert_eq!(err.to_string(), "Invalid argument `key`: must not be empty");
    }
}
