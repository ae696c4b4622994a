//! Wire transport for the blog API.
//!
//! The server wraps every payload in a `{ code, message, data }` envelope.
//! A transport only moves envelopes; interpreting `code` is left to the
//! request pipeline.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::infra::error::InfraError;

/// Flags that change how a single call is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Never notify the user about this call's failure.
    pub silent: bool,
    /// Ask the pipeline to notify even when it only notifies on request.
    pub show_error_in_interceptor: bool,
    /// This call is the credential renewal itself; an expiry is terminal.
    pub renewal: bool,
}

/// One logical API call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub payload: Option<Value>,
    /// Raw credential sent in the `Authorization` header.
    pub authorization: Option<String>,
    pub options: RequestOptions,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            payload: None,
            authorization: None,
            options: RequestOptions::default(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Append `name=value` only when a value is present.
    pub fn query_opt(self, name: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.query(name, value),
            None => self,
        }
    }

    pub fn json(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn silent(mut self) -> Self {
        self.options.silent = true;
        self
    }

    pub fn show_errors(mut self) -> Self {
        self.options.show_error_in_interceptor = true;
        self
    }

    pub fn renewal(mut self) -> Self {
        self.options.renewal = true;
        self
    }

    pub fn with_authorization(mut self, token: Option<String>) -> Self {
        self.authorization = token;
        self
    }
}

/// The server's response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub code: i64,
    #[serde(default, alias = "msg")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl ApiResponse {
    pub const SUCCESS: i64 = 200;
    pub const EXPIRED: i64 = 401;

    pub fn ok(data: Value) -> Self {
        Self {
            code: Self::SUCCESS,
            message: None,
            data,
        }
    }

    pub fn failure(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            data: Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Self::SUCCESS
    }

    pub fn is_expired(&self) -> bool {
        self.code == Self::EXPIRED
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("http status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("request cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Issues a described call and returns the server envelope.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dispatch(&self, request: &RequestDescriptor) -> Result<ApiResponse, TransportError>;
}

/// `reqwest`-backed transport rooted at the API base URL.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    base: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, InfraError> {
        Url::parse(base_url).map_err(|err| InfraError::invalid_base_url(base_url, err))?;
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::HttpClient(err.to_string()))?;
        Ok(Self {
            client,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("nebula-client/", env!("CARGO_PKG_VERSION"))
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, request: &RequestDescriptor) -> Result<Url, TransportError> {
        let path = request.path.trim_start_matches('/');
        let mut url = Url::parse(&format!("{}/{path}", self.base))
            .map_err(|err| TransportError::Network(format!("invalid url: {err}")))?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &request.query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn dispatch(&self, request: &RequestDescriptor) -> Result<ApiResponse, TransportError> {
        let url = self.url(request)?;
        debug!(method = %request.method, %url, "Dispatching request");

        let mut builder = self.client.request(request.method.clone(), url);
        if let Some(token) = &request.authorization {
            builder = builder.header(AUTHORIZATION, token.as_str());
        }
        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        let response = builder.send().await.map_err(TransportError::from_reqwest)?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(TransportError::from_reqwest)?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: status_message(&bytes),
            });
        }

        serde_json::from_slice(&bytes).map_err(|err| TransportError::Decode(err.to_string()))
    }
}

/// Prefer the envelope's message; fall back to the raw body.
fn status_message(body: &[u8]) -> String {
    serde_json::from_slice::<ApiResponse>(body)
        .ok()
        .and_then(|envelope| envelope.message)
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}
