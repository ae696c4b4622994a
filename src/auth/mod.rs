//! Credential state and its renewal.

mod credential;
mod refresh;
mod renewer;

pub use credential::{CREDENTIAL_SLOT, Credential, CredentialStore};
pub use refresh::{RefreshCoordinator, RefreshError, RefreshSettings};
pub use renewer::{CredentialRenewer, RENEWAL_PATH, RenewError, RenewedCredential, TransportRenewer};

pub(crate) use refresh::{METRIC_REFRESH_TOTAL, METRIC_REFRESH_WAITERS};
