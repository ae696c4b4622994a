//! The call that exchanges a credential for a fresh one.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::infra::http::{ApiResponse, RequestDescriptor, Transport, TransportError};

/// Path of the renewal endpoint, relative to the API base.
pub const RENEWAL_PATH: &str = "/auth/refresh";

/// A successful renewal: the new token and its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewedCredential {
    pub token: String,
    #[serde(alias = "tokenTimeout", alias = "expiresInSeconds")]
    pub expires_in: i64,
}

#[derive(Debug, Error)]
pub enum RenewError {
    #[error("renewal rejected with code {code}: {message}")]
    Rejected { code: i64, message: String },
    #[error("renewal transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("malformed renewal response: {0}")]
    Malformed(String),
}

impl RenewError {
    /// The renewal endpoint itself said the session is over.
    pub fn is_expiry(&self) -> bool {
        match self {
            Self::Rejected { code, .. } => *code == ApiResponse::EXPIRED,
            Self::Transport(err) => err.status() == Some(401),
            Self::Malformed(_) => false,
        }
    }
}

#[async_trait]
pub trait CredentialRenewer: Send + Sync {
    async fn renew(&self, current_token: &str) -> Result<RenewedCredential, RenewError>;
}

/// Renews through the raw transport, bypassing the request pipeline so an
/// expiry answer can never trigger another renewal.
pub struct TransportRenewer {
    transport: Arc<dyn Transport>,
}

impl TransportRenewer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl CredentialRenewer for TransportRenewer {
    async fn renew(&self, current_token: &str) -> Result<RenewedCredential, RenewError> {
        let request = RequestDescriptor::post(RENEWAL_PATH)
            .renewal()
            .silent()
            .with_authorization(Some(current_token.to_string()));

        let response = self.transport.dispatch(&request).await?;
        if !response.is_success() {
            return Err(RenewError::Rejected {
                code: response.code,
                message: response.message.unwrap_or_default(),
            });
        }

        serde_json::from_value(response.data).map_err(|err| RenewError::Malformed(err.to_string()))
    }
}
