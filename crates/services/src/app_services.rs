use std::sync::Arc;

use learn_core::Clock;
use storage::kv::{FileKeyValueStore, InMemoryKeyValueStore, KeyValueStore};
use storage::mirror::LocalMirror;
use storage::repository::{CompletionStore, ProgressStore};
use tracing::info;

use crate::collaborators::{Catalog, IdentityProvider, StaticIdentity};
use crate::config::SyncConfig;
use crate::error::AppServicesError;
use crate::gate_service::GateService;
use crate::http_store::HttpProgressStore;
use crate::quiz_tracker::QuizCompletionTracker;
use crate::reconciler::SyncReconciler;

/// Assembles the client-side progression services from configuration.
#[derive(Clone)]
pub struct AppServices {
    reconciler: Arc<SyncReconciler>,
    tracker: Arc<QuizCompletionTracker>,
    gates: GateService,
}

impl AppServices {
    /// Build services talking to the HTTP durable store named in `config`,
    /// or local-only when none is configured.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the mirror directory cannot be opened or
    /// the HTTP client cannot be built.
    pub fn from_config(
        config: &SyncConfig,
        catalog: Arc<dyn Catalog>,
        clock: Clock,
    ) -> Result<Self, AppServicesError> {
        let store: Arc<dyn KeyValueStore> = match &config.mirror_dir {
            Some(dir) => Arc::new(FileKeyValueStore::open(dir)?),
            None => Arc::new(InMemoryKeyValueStore::new()),
        };

        let http = match &config.api_base_url {
            Some(url) => Some(HttpProgressStore::new(url.clone(), config.request_timeout)?),
            None => None,
        };
        let progress = http
            .clone()
            .map(|h| Arc::new(h) as Arc<dyn ProgressStore>);
        let completions = http.map(|h| Arc::new(h) as Arc<dyn CompletionStore>);

        let identity = StaticIdentity(config.identity);
        Ok(Self::assemble(
            config,
            &identity,
            store,
            progress,
            completions,
            catalog,
            clock,
        ))
    }

    /// Build services over explicit stores. Mirror keys are scoped to the
    /// identity the provider reports now.
    #[must_use]
    pub fn assemble(
        config: &SyncConfig,
        identity: &dyn IdentityProvider,
        store: Arc<dyn KeyValueStore>,
        progress: Option<Arc<dyn ProgressStore>>,
        completions: Option<Arc<dyn CompletionStore>>,
        catalog: Arc<dyn Catalog>,
        clock: Clock,
    ) -> Self {
        let identity = identity.current();
        let mirror = LocalMirror::new(store, identity);
        let reconciler = Arc::new(SyncReconciler::new(
            identity,
            mirror.clone(),
            progress,
            config.start_section,
        ));
        let tracker = Arc::new(QuizCompletionTracker::new(
            mirror,
            completions,
            Arc::clone(&reconciler),
            Arc::clone(&catalog),
            clock,
        ));
        let gates = GateService::new(catalog, config.forced_unlock);

        info!(
            %identity,
            local_only = reconciler.is_local_only(),
            "progress services ready"
        );

        Self {
            reconciler,
            tracker,
            gates,
        }
    }

    #[must_use]
    pub fn reconciler(&self) -> Arc<SyncReconciler> {
        Arc::clone(&self.reconciler)
    }

    #[must_use]
    pub fn tracker(&self) -> Arc<QuizCompletionTracker> {
        Arc::clone(&self.tracker)
    }

    #[must_use]
    pub fn gates(&self) -> &GateService {
        &self.gates
    }
}
