//! Wiring for one client session: storage, credentials, transport,
//! pipeline and the response stores built on top of them.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::auth::{CredentialStore, RefreshCoordinator, TransportRenewer};
use crate::config::Settings;
use crate::infra::http::{ErrorReporter, HttpTransport, RequestPipeline, TracingNotifier, Transport};
use crate::infra::storage::{FileStore, KvStore};
use crate::util::clock::{Clock, SystemClock};

use super::articles::ArticleStore;
use super::catalog::CatalogStore;
use super::error::AppError;

/// Everything a command needs, built once from resolved settings.
pub struct ClientContext {
    pub settings: Settings,
    pub storage: Arc<dyn KvStore>,
    pub clock: Arc<dyn Clock>,
    pub pipeline: Arc<RequestPipeline>,
    pub articles: ArticleStore,
    pub catalog: CatalogStore,
}

impl ClientContext {
    /// Build the production graph: file-backed storage, the system clock and
    /// an HTTP transport pointed at `settings.api.base_url`.
    pub fn from_settings(settings: Settings) -> Result<Self, AppError> {
        let storage: Arc<dyn KvStore> = Arc::new(FileStore::new(settings.cache.storage_dir.clone())?);
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(
            &settings.api.base_url,
            settings.api.request_timeout,
        )?);
        Ok(Self::assemble(
            settings,
            storage,
            transport,
            Arc::new(SystemClock),
        ))
    }

    /// Build the graph around caller-supplied storage, transport and clock.
    pub fn assemble(
        settings: Settings,
        storage: Arc<dyn KvStore>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let reporter = Arc::new(ErrorReporter::new(
            Arc::new(TracingNotifier),
            Arc::clone(&clock),
            settings.notifications.error_dedupe_window,
        ));
        let credentials = Arc::new(CredentialStore::new(Arc::clone(&storage)));
        let renewer = Arc::new(TransportRenewer::new(Arc::clone(&transport)));
        let refresh = RefreshCoordinator::new(
            credentials,
            renewer,
            Arc::clone(&reporter),
            Arc::clone(&clock),
            settings.auth.refresh_settings(),
        );
        let pipeline = Arc::new(RequestPipeline::new(
            transport,
            refresh,
            reporter,
            settings.api.notify_policy,
        ));

        let articles = ArticleStore::new(
            Arc::clone(&pipeline),
            Arc::clone(&storage),
            Arc::clone(&clock),
            settings.cache.articles.clone(),
        );
        let catalog = CatalogStore::new(
            Arc::clone(&pipeline),
            Arc::clone(&storage),
            Arc::clone(&clock),
            settings.cache.catalog.clone(),
        );

        info!(
            base_url = %settings.api.base_url,
            storage_dir = %settings.cache.storage_dir.display(),
            "client context ready"
        );

        Self {
            settings,
            storage,
            clock,
            pipeline,
            articles,
            catalog,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        self.pipeline.credentials()
    }

    pub fn refresh(&self) -> &RefreshCoordinator {
        self.pipeline.refresh()
    }

    /// Renew once if the credential is inside `auth.refresh_threshold`.
    ///
    /// For one-shot callers that exit before a proactive tick would fire.
    /// Returns whether a renewal succeeded.
    pub async fn renew_if_expiring(&self) -> bool {
        match self
            .refresh()
            .refresh_if_expiring(self.settings.auth.refresh_threshold)
            .await
        {
            Some(Ok(_)) => true,
            Some(Err(err)) => {
                warn!(error = %err, "Renewal ahead of expiry failed");
                false
            }
            None => false,
        }
    }

    /// Start the background task that renews the credential ahead of expiry.
    pub fn spawn_proactive_refresh(&self) -> JoinHandle<()> {
        self.refresh().spawn_proactive_refresh(
            self.settings.auth.proactive_interval,
            self.settings.auth.refresh_threshold,
        )
    }
}
