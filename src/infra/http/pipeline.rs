//! The request/response interceptor chain.
//!
//! Every API call goes through `RequestPipeline::execute`: the current
//! credential is attached, the call is dispatched, an expiry answer is routed
//! through the refresh coordinator and the call is retried once with the
//! renewed credential. Failures are mapped to user-facing text and reported
//! through the deduplicating `ErrorReporter`.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{Instrument, debug, info_span, warn};

use crate::auth::{CredentialStore, RefreshCoordinator, RefreshError};

use super::notify::{ErrorReporter, SESSION_EXPIRED_MESSAGE, business_message, transport_message};
use super::transport::{ApiResponse, RequestDescriptor, RequestOptions, Transport, TransportError};

pub(crate) const METRIC_REQUEST_MS: &str = "nebula_request_ms";

/// When the pipeline itself notifies the user about a failed call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyPolicy {
    /// Every failure that is not marked silent.
    #[default]
    Always,
    /// Only calls that set `show_error_in_interceptor`.
    OptIn,
}

impl NotifyPolicy {
    fn should_report(self, options: RequestOptions) -> bool {
        if options.silent {
            return false;
        }
        match self {
            Self::Always => true,
            Self::OptIn => options.show_error_in_interceptor,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request rejected with code {code}")]
    Business { code: i64, message: Option<String> },
    #[error(transparent)]
    Transport(TransportError),
    #[error("session expired")]
    SessionExpired,
    #[error(transparent)]
    Refresh(#[from] RefreshError),
    #[error("request cancelled")]
    Cancelled,
    #[error("unexpected response payload: {0}")]
    Decode(String),
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => Self::Cancelled,
            other => Self::Transport(other),
        }
    }
}

impl ApiError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Business { code, message } => business_message(*code, message.as_deref()),
            Self::Transport(err) => transport_message(err),
            Self::SessionExpired | Self::Refresh(RefreshError::RenewalFailed(_)) => {
                SESSION_EXPIRED_MESSAGE.to_string()
            }
            Self::Refresh(RefreshError::NotAuthenticated) => "Please sign in first".to_string(),
            Self::Refresh(RefreshError::QueueFull | RefreshError::TimedOut) => {
                "Request timed out, please check your network connection".to_string()
            }
            Self::Cancelled => "Request cancelled".to_string(),
            Self::Decode(_) => "Request failed".to_string(),
        }
    }

    /// Whether the pipeline should surface this error; some are reported
    /// elsewhere or deliberately kept quiet.
    fn is_reportable(&self) -> bool {
        match self {
            Self::Business { .. } | Self::Transport(_) | Self::Decode(_) => true,
            Self::Refresh(RefreshError::QueueFull | RefreshError::TimedOut) => true,
            // Session loss is announced once by the refresh coordinator.
            Self::SessionExpired | Self::Refresh(_) => false,
            Self::Cancelled => false,
        }
    }
}

/// How a single dispatch ended.
enum Attempt {
    Success(Value),
    Expired,
    Failed(ApiError),
}

impl Attempt {
    fn classify(result: Result<ApiResponse, TransportError>) -> Self {
        match result {
            Ok(response) if response.is_success() => Self::Success(response.data),
            Ok(response) if response.is_expired() => Self::Expired,
            Ok(response) => Self::Failed(ApiError::Business {
                code: response.code,
                message: response.message,
            }),
            Err(err) if err.status() == Some(401) => Self::Expired,
            Err(err) => Self::Failed(err.into()),
        }
    }
}

pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    refresh: RefreshCoordinator,
    reporter: Arc<ErrorReporter>,
    policy: NotifyPolicy,
}

impl RequestPipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        refresh: RefreshCoordinator,
        reporter: Arc<ErrorReporter>,
        policy: NotifyPolicy,
    ) -> Self {
        Self {
            transport,
            credentials: Arc::clone(refresh.credentials()),
            refresh,
            reporter,
            policy,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn refresh(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    pub fn reporter(&self) -> &Arc<ErrorReporter> {
        &self.reporter
    }

    /// Run one call and return the envelope's `data` on success.
    pub async fn execute(&self, descriptor: RequestDescriptor) -> Result<Value, ApiError> {
        let span = info_span!(
            "api_request",
            method = %descriptor.method,
            path = %descriptor.path
        );
        let options = descriptor.options;
        let started_at = Instant::now();
        let result = self.run(descriptor).instrument(span).await;
        histogram!(
            METRIC_REQUEST_MS,
            "outcome" => if result.is_ok() { "ok" } else { "error" }
        )
        .record(started_at.elapsed().as_secs_f64() * 1000.0);

        if let Err(err) = &result
            && err.is_reportable()
            && self.policy.should_report(options)
        {
            self.reporter.error(&err.user_message());
        }
        result
    }

    /// Like `execute`, decoding `data` into `T`.
    pub async fn execute_as<T: DeserializeOwned>(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<T, ApiError> {
        let data = self.execute(descriptor).await?;
        serde_json::from_value(data).map_err(|err| ApiError::Decode(err.to_string()))
    }

    /// Like `execute`, abandoned as soon as `cancel` completes.
    ///
    /// A renewal started by this call keeps running for the other callers.
    pub async fn execute_cancellable<C>(
        &self,
        descriptor: RequestDescriptor,
        cancel: C,
    ) -> Result<Value, ApiError>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            () = cancel => {
                debug!("Request cancelled by caller");
                Err(ApiError::Cancelled)
            }
            result = self.execute(descriptor) => result,
        }
    }

    async fn run(&self, mut descriptor: RequestDescriptor) -> Result<Value, ApiError> {
        descriptor.authorization = self.credentials.token();

        match Attempt::classify(self.transport.dispatch(&descriptor).await) {
            Attempt::Success(data) => return Ok(data),
            Attempt::Failed(err) => return Err(err),
            Attempt::Expired => {}
        }

        if descriptor.options.renewal {
            warn!("Renewal endpoint rejected the credential");
            self.refresh.terminate_session();
            return Err(ApiError::SessionExpired);
        }

        let credential = self
            .refresh
            .renew(descriptor.authorization.as_deref())
            .await?;
        debug!("Retrying with renewed credential");
        descriptor.authorization = Some(credential.token);

        match Attempt::classify(self.transport.dispatch(&descriptor).await) {
            Attempt::Success(data) => Ok(data),
            Attempt::Failed(err) => Err(err),
            Attempt::Expired => {
                warn!("Renewed credential rejected; ending session");
                self.refresh.terminate_session();
                Err(ApiError::SessionExpired)
            }
        }
    }
}
