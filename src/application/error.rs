use std::error::Error as StdError;

use thiserror::Error;

use crate::config::LoadError;
use crate::infra::error::InfraError;
use crate::infra::http::ApiError;
use crate::infra::storage::StorageError;

/// The error chain of a failure, flattened for logging.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Short text for the terminal.
    pub fn presentation_message(&self) -> String {
        match self {
            AppError::Api(err) => err.user_message(),
            AppError::Config(_) | AppError::Infra(InfraError::InvalidBaseUrl { .. }) => {
                "Client misconfigured".to_string()
            }
            AppError::Infra(InfraError::HttpClient(_)) => {
                "HTTP client could not start".to_string()
            }
            AppError::Infra(InfraError::Telemetry(_)) => {
                "Logging subsystem could not start".to_string()
            }
            AppError::Storage(_) => {
                "Local storage is unavailable".to_string()
            }
            AppError::Validation(message) => message.clone(),
            AppError::Unexpected(_) => "Unexpected error occurred".to_string(),
        }
    }

    /// Process exit status for the command-line front end.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Validation(_) => 2,
            AppError::Config(_) => 78,
            AppError::Infra(err) if err.is_configuration() => 78,
            AppError::Api(ApiError::SessionExpired | ApiError::Refresh(_)) => 77,
            _ => 1,
        }
    }
}
