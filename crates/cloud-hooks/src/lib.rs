//! Reactive, login-gated adapter over a backend-as-a-service SDK.
//!
//! [`CloudHooks`] owns one session per instance. Every capability it exposes
//! (uploads, temporary file URLs, realtime watches, raw handles) first awaits
//! the single-flight login coordinator, so no backend call runs before a
//! session exists and concurrent callers never trigger duplicate handshakes.

use std::{future::Future, sync::Arc};

use cloud_core::{
    BackendConnector, CloudBackend, CloudError, Credential, DocumentStore, ErrorCategory,
    ProviderParams, SessionPersistence, SessionPhase, StateStream, StrategyKind, WatchQuery,
};
use tracing::{info, trace};

/// Observable bindings, one per capability.
pub mod bindings;
mod coordinator;
/// Strategy identifiers and handshake procedures.
pub mod strategy;
#[cfg(test)]
mod testing;

pub use bindings::{FileUrlBinding, LoginStateBinding, UploadBinding, WatchBinding};
pub use strategy::{HandshakeProcedure, StrategyParams, TicketFetcher, ticket_fetcher};

use coordinator::LoginCoordinator;

/// Construction-time adapter configuration.
#[derive(Debug, Clone)]
pub struct HooksConfig {
    /// Backend environment identifier.
    pub service_endpoint: String,
    /// Strategy identifier (`custom-ticket`, `provider-based`, `none`, or an alias).
    pub strategy: String,
    /// Parameters required by the selected strategy.
    pub strategy_params: StrategyParams,
    /// Passed through to the backend connector.
    pub persistence: SessionPersistence,
}

impl HooksConfig {
    pub fn new(service_endpoint: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self {
            service_endpoint: service_endpoint.into(),
            strategy: strategy.into(),
            strategy_params: StrategyParams::default(),
            persistence: SessionPersistence::default(),
        }
    }

    pub fn with_ticket_fetcher(mut self, fetcher: TicketFetcher) -> Self {
        self.strategy_params.ticket_fetcher = Some(fetcher);
        self
    }

    pub fn with_provider(mut self, provider: ProviderParams) -> Self {
        self.strategy_params.provider = Some(provider);
        self
    }

    pub fn with_persistence(mut self, persistence: SessionPersistence) -> Self {
        self.persistence = persistence;
        self
    }
}

/// Adapter instance; cheap to clone, clones share one session.
#[derive(Clone)]
pub struct CloudHooks {
    inner: Arc<HooksInner>,
}

struct HooksInner {
    backend: Arc<dyn CloudBackend>,
    coordinator: LoginCoordinator,
    strategy: StrategyKind,
}

impl CloudHooks {
    /// Connect to the configured environment and resolve the login strategy.
    ///
    /// Configuration errors are fatal here; no handshake runs until first use.
    pub fn new(config: HooksConfig, connector: &dyn BackendConnector) -> Result<Self, CloudError> {
        let endpoint = config.service_endpoint.trim();
        if endpoint.is_empty() {
            return Err(CloudError::new(
                ErrorCategory::Config,
                "missing_service_endpoint",
                "service endpoint must not be empty",
            ));
        }

        let backend = connector.connect(endpoint, config.persistence)?;
        Self::with_backend(&config.strategy, &config.strategy_params, backend)
    }

    /// Build an adapter around an already connected backend.
    pub fn with_backend(
        strategy: &str,
        params: &StrategyParams,
        backend: Arc<dyn CloudBackend>,
    ) -> Result<Self, CloudError> {
        let (strategy, procedure) = strategy::resolve(strategy, params, Arc::clone(&backend))?;
        info!(endpoint = backend.endpoint(), %strategy, "cloud hooks configured");

        Ok(Self {
            inner: Arc::new(HooksInner {
                coordinator: LoginCoordinator::new(Arc::clone(&backend), procedure),
                backend,
                strategy,
            }),
        })
    }

    pub fn strategy(&self) -> StrategyKind {
        self.inner.strategy
    }

    /// Current session phase.
    pub fn phase(&self) -> SessionPhase {
        self.inner.coordinator.phase()
    }

    /// Observe session phase transitions.
    pub fn subscribe_phase(&self) -> StateStream<SessionPhase> {
        self.inner.coordinator.subscribe_phase()
    }

    /// Whether a session has been established at least once.
    pub fn established_once(&self) -> bool {
        self.inner.coordinator.established_once()
    }

    /// Return the session credential, running at most one handshake for all concurrent callers.
    pub async fn ensure_authenticated(&self) -> Result<Credential, CloudError> {
        self.inner.coordinator.ensure_authenticated().await
    }

    /// Sign out of the current session.
    pub async fn sign_out(&self) -> Result<(), CloudError> {
        self.inner.coordinator.sign_out().await
    }

    /// Run `op` only after authentication has settled successfully.
    ///
    /// Errors from either step propagate unchanged.
    pub async fn gated<T, F, Fut>(&self, op: F) -> Result<T, CloudError>
    where
        F: FnOnce(Credential) -> Fut,
        Fut: Future<Output = Result<T, CloudError>>,
    {
        let credential = self.ensure_authenticated().await?;
        trace!("capability gate open");
        op(credential).await
    }

    /// Backend client, available once authenticated.
    pub async fn app(&self) -> Result<Arc<dyn CloudBackend>, CloudError> {
        let backend = Arc::clone(&self.inner.backend);
        self.gated(|_| async move { Ok(backend) }).await
    }

    /// Document database, available once authenticated.
    pub async fn database(&self) -> Result<Arc<dyn DocumentStore>, CloudError> {
        let backend = Arc::clone(&self.inner.backend);
        self.gated(|_| async move { Ok(backend.database()) }).await
    }

    /// Binding that establishes the session once and publishes the outcome.
    pub fn login_state(&self) -> LoginStateBinding {
        LoginStateBinding::new(self.clone())
    }

    /// Binding for object uploads.
    pub fn upload(&self) -> UploadBinding {
        UploadBinding::new(self.clone())
    }

    /// Binding resolving a temporary URL for `path`.
    pub fn file_url(&self, path: impl Into<String>) -> FileUrlBinding {
        FileUrlBinding::new(self.clone(), path.into())
    }

    /// Binding watching `query` in realtime.
    pub fn watch(&self, query: WatchQuery) -> WatchBinding {
        WatchBinding::new(self.clone(), query)
    }

    /// Ungated backend access for bindings that already went through [`CloudHooks::gated`].
    pub(crate) fn backend(&self) -> Arc<dyn CloudBackend> {
        Arc::clone(&self.inner.backend)
    }
}
