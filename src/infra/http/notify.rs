//! User-facing notifications and error message mapping.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::util::clock::{Clock, duration_millis};

use super::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Success,
    Warning,
    Error,
    Info,
}

/// Fire-and-forget sink for messages meant for the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NotifyLevel, message: &str);
}

/// Routes notifications into the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, level: NotifyLevel, message: &str) {
        match level {
            NotifyLevel::Success | NotifyLevel::Info => info!(target: "nebula::notify", %message),
            NotifyLevel::Warning => warn!(target: "nebula::notify", %message),
            NotifyLevel::Error => error!(target: "nebula::notify", %message),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _level: NotifyLevel, _message: &str) {}
}

/// Forwards messages to a `Notifier`, dropping repeats of the same text
/// inside a rolling window.
pub struct ErrorReporter {
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    window: Duration,
    recent: DashMap<String, i64>,
}

impl ErrorReporter {
    pub const DEFAULT_WINDOW: Duration = Duration::from_millis(1_000);

    pub fn new(notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            notifier,
            clock,
            window,
            recent: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Deliver `message` unless the same text went out within the window.
    ///
    /// Returns whether the notifier was called.
    pub fn report(&self, level: NotifyLevel, message: &str) -> bool {
        let now = self.clock.now_millis();
        let window = duration_millis(self.window);
        self.recent.retain(|_, sent_at| now.saturating_sub(*sent_at) < window);

        match self.recent.entry(message.to_string()) {
            Entry::Occupied(_) => {
                debug!(%message, "Suppressed duplicate notification");
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }

        self.notifier.notify(level, message);
        true
    }

    pub fn error(&self, message: &str) -> bool {
        self.report(NotifyLevel::Error, message)
    }

    pub fn warning(&self, message: &str) -> bool {
        self.report(NotifyLevel::Warning, message)
    }
}

pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired, please sign in again";
const SERVER_ERROR_MESSAGE: &str = "Server error, please try again later";
const FORBIDDEN_MESSAGE: &str = "Permission denied";
const NOT_FOUND_MESSAGE: &str = "The requested resource does not exist";

/// Human-readable text for a business error code.
pub fn business_message(code: i64, server_message: Option<&str>) -> String {
    let server_message = server_message.filter(|text| !text.trim().is_empty());
    match code {
        40001 => "Incorrect username or password".to_string(),
        40002 => match server_message {
            // Lockouts report how long they last; keep that text.
            Some(text) if text.chars().any(|c| c.is_ascii_digit()) => text.to_string(),
            _ => "Account is locked, please try again later".to_string(),
        },
        40003 => "Username already exists".to_string(),
        40004 => "Too many registration attempts, please try again later".to_string(),
        403 => FORBIDDEN_MESSAGE.to_string(),
        404 => NOT_FOUND_MESSAGE.to_string(),
        500 => SERVER_ERROR_MESSAGE.to_string(),
        _ => server_message.unwrap_or("Request failed").to_string(),
    }
}

/// Human-readable text for a transport failure.
pub fn transport_message(err: &TransportError) -> String {
    match err {
        TransportError::Timeout => {
            "Request timed out, please check your network connection".to_string()
        }
        TransportError::Status { status: 403, .. } => FORBIDDEN_MESSAGE.to_string(),
        TransportError::Status { status: 404, .. } => NOT_FOUND_MESSAGE.to_string(),
        TransportError::Status {
            status: 500 | 502 | 503 | 504,
            ..
        } => SERVER_ERROR_MESSAGE.to_string(),
        TransportError::Network(_) => {
            "Network connection failed, please check your network".to_string()
        }
        other => other.to_string(),
    }
}
