//! Failures while setting up the client's local infrastructure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    /// `api.base_url` did not parse as an absolute URL.
    #[error("invalid api.base_url `{url}`: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    /// The HTTP client could not be built (TLS backend, proxy settings).
    #[error("http client unavailable: {0}")]
    HttpClient(String),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
}

impl InfraError {
    pub fn invalid_base_url(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidBaseUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }

    /// The failure comes from settings the user can correct.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidBaseUrl { .. })
    }
}
