//! Error types for Botcast

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BotcastError>;

#[derive(Error, Debug)]
pub enum BotcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Lookback limit cannot exceed {ceiling}, but it was {requested}")]
    LimitExceeded { requested: usize, ceiling: usize },
}

impl BotcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BotcastError::InvalidArgument(_) => 3,
            BotcastError::LimitExceeded { .. } => 3,
            BotcastError::Config(_) => 2,
            BotcastError::History(_) => 1,
            BotcastError::Persistence(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Missing credential {key} for {destination} in {}", .dir.display())]
    MissingCredential {
        destination: String,
        key: String,
        dir: PathBuf,
    },

    #[error("No network client available for {0}")]
    NoClient(String),

    #[error("Failed to create {destination} client: {reason}")]
    ClientSetup { destination: String, reason: String },
}

/// Failures reading the history file. A corrupt file is recovered from by the
/// record store; only unreadable files reach the caller.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("History file {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("Failed to read history file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to back up corrupt history to {}: {source}", .path.display())]
    Backup {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to create history file {}: {source}", .path.display())]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write history file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize history: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure reported by a destination's network client
///
/// Never propagated past a destination: it is folded into the
/// `DestinationRecord` of the attempt that produced it.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{message}")]
pub struct ClientError {
    /// Numeric API error code, when the upstream exposes one
    pub code: Option<i64>,
    pub message: String,
    /// Raw upstream payload, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ClientError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// String form stored in a record's `error` field.
    ///
    /// Falls back to the display string if the payload cannot be encoded.
    pub fn serialized(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_argument() {
        let error = BotcastError::InvalidArgument("files must not be empty".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_limit_exceeded() {
        let error = BotcastError::LimitExceeded {
            requested: 51,
            ceiling: 50,
        };
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_config_error() {
        let error = BotcastError::Config(ConfigError::MissingField("secrets_dir".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_persistence_error() {
        let error = BotcastError::Persistence(PersistenceError::Write {
            path: PathBuf::from("/nonexistent/history.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        });
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_limit_exceeded_formatting() {
        let error = BotcastError::LimitExceeded {
            requested: 51,
            ceiling: 50,
        };
        assert_eq!(
            error.to_string(),
            "Lookback limit cannot exceed 50, but it was 51"
        );
    }

    #[test]
    fn test_missing_credential_formatting() {
        let error = ConfigError::MissingCredential {
            destination: "mastodon".to_string(),
            key: "ACCESS_TOKEN".to_string(),
            dir: PathBuf::from("/secrets/credentials_mastodon"),
        };
        let message = error.to_string();
        assert!(message.contains("ACCESS_TOKEN"));
        assert!(message.contains("mastodon"));
        assert!(message.contains("/secrets/credentials_mastodon"));
    }

    #[test]
    fn test_error_conversion_from_config_error() {
        let config_error = ConfigError::NoClient("birdsite".to_string());
        let error: BotcastError = config_error.into();

        match error {
            BotcastError::Config(_) => {}
            _ => panic!("Expected BotcastError::Config"),
        }
    }

    #[test]
    fn test_client_error_serialized_with_code() {
        let error = ClientError::new("Status is a duplicate.").with_code(187);
        let encoded = error.serialized();

        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["code"], 187);
        assert_eq!(value["message"], "Status is a duplicate.");
        assert!(value.get("details").is_none());
    }

    #[test]
    fn test_client_error_display_is_message() {
        let error = ClientError::new("Connection refused").with_code(503);
        assert_eq!(error.to_string(), "Connection refused");
    }
}
