//! The signed-in user's credential.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::infra::storage::KvStore;
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "auth::credential";

/// Durable slot holding the current credential.
pub const CREDENTIAL_SLOT: &str = "auth.credential";

/// An opaque token and the instant it stops being accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: OffsetDateTime) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Build a credential that lives `expires_in_secs` from `now`.
    ///
    /// A non-positive lifetime gives a credential that is already expired.
    pub fn from_lifetime(token: impl Into<String>, expires_in_secs: i64, now: OffsetDateTime) -> Self {
        let lifetime = time::Duration::seconds(expires_in_secs.max(0));
        Self::new(token, now.saturating_add(lifetime))
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self, now: OffsetDateTime) -> Duration {
        Duration::try_from(self.expires_at - now).unwrap_or(Duration::ZERO)
    }
}

/// Process-wide holder of the current credential, persisted on every change.
pub struct CredentialStore {
    storage: Arc<dyn KvStore>,
    slot: RwLock<Option<Credential>>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn KvStore>) -> Self {
        let credential = storage
            .load(CREDENTIAL_SLOT)
            .and_then(|raw| match serde_json::from_str::<Credential>(&raw) {
                Ok(credential) => Some(credential),
                Err(err) => {
                    warn!(error = %err, "Discarding unreadable stored credential");
                    None
                }
            });
        debug!(signed_in = credential.is_some(), "Credential store hydrated");

        Self {
            storage,
            slot: RwLock::new(credential),
        }
    }

    pub fn current(&self) -> Option<Credential> {
        rw_read(&self.slot, SOURCE, "current").clone()
    }

    pub fn token(&self) -> Option<String> {
        rw_read(&self.slot, SOURCE, "token")
            .as_ref()
            .map(|credential| credential.token.clone())
    }

    /// Replace the credential after a login or a renewal.
    pub fn set(&self, credential: Credential) {
        let mut slot = rw_write(&self.slot, SOURCE, "set");
        match serde_json::to_string(&credential) {
            Ok(raw) => {
                if let Err(err) = self.storage.save(CREDENTIAL_SLOT, &raw) {
                    warn!(error = %err, "Credential save failed");
                }
            }
            Err(err) => warn!(error = %err, "Credential encode failed"),
        }
        *slot = Some(credential);
    }

    pub fn clear(&self) {
        let mut slot = rw_write(&self.slot, SOURCE, "clear");
        self.storage.remove(CREDENTIAL_SLOT);
        *slot = None;
    }

    /// No credential counts as expired.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        rw_read(&self.slot, SOURCE, "is_expired")
            .as_ref()
            .is_none_or(|credential| credential.is_expired(now))
    }

    /// Still valid, but expires within `threshold`.
    pub fn is_expiring(&self, now: OffsetDateTime, threshold: Duration) -> bool {
        rw_read(&self.slot, SOURCE, "is_expiring")
            .as_ref()
            .is_some_and(|credential| {
                !credential.is_expired(now) && credential.remaining(now) < threshold
            })
    }
}
