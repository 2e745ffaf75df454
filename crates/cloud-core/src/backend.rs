use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    error::CloudError,
    types::{
        Credential, ProviderParams, SessionInfo, SessionPersistence, TempFileUrl, UploadProgress,
        UploadRequest, UploadResult, WatchEvent, WatchQuery,
    },
};

/// Callback receiving upload progress notifications.
pub type ProgressFn = Arc<dyn Fn(UploadProgress) + Send + Sync + 'static>;

/// Channel a realtime watch pushes its changes and errors into.
pub type WatchSink = mpsc::UnboundedSender<WatchEvent>;

/// Builds a backend client for one service environment.
pub trait BackendConnector: Send + Sync {
    fn connect(
        &self,
        endpoint: &str,
        persistence: SessionPersistence,
    ) -> Result<Arc<dyn CloudBackend>, CloudError>;
}

/// Backend SDK surface consumed by the adapter.
#[async_trait]
pub trait CloudBackend: Send + Sync {
    /// Service environment this client talks to.
    fn endpoint(&self) -> &str;

    /// Session the backend already holds, if any.
    async fn session_state(&self) -> Result<Option<SessionInfo>, CloudError>;

    async fn sign_in_with_ticket(&self, ticket: &str) -> Result<Credential, CloudError>;

    async fn sign_in_with_provider(&self, params: &ProviderParams)
    -> Result<Credential, CloudError>;

    async fn sign_out(&self) -> Result<(), CloudError>;

    /// Store an object, reporting progress through `progress`.
    async fn upload_object(
        &self,
        request: UploadRequest,
        progress: ProgressFn,
    ) -> Result<UploadResult, CloudError>;

    /// Resolve time-limited download URLs; unknown paths are omitted from the result.
    async fn resolve_temporary_urls(&self, paths: &[String])
    -> Result<Vec<TempFileUrl>, CloudError>;

    /// Start a realtime watch; events flow into `sink` until the handle is closed.
    async fn watch_query(
        &self,
        query: &WatchQuery,
        sink: WatchSink,
    ) -> Result<Box<dyn WatchHandle>, CloudError>;

    /// Raw document database handle.
    fn database(&self) -> Arc<dyn DocumentStore>;
}

/// Live realtime watch.
///
/// `close` consumes the handle, so a subscription can be released only once.
pub trait WatchHandle: Send {
    fn id(&self) -> &str;

    fn close(self: Box<Self>);
}

/// Minimal document database surface.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document and return its id (taken from `_id` when present).
    async fn add(&self, collection: &str, doc: Value) -> Result<String, CloudError>;

    /// Delete a document by id and return the number of removed documents.
    async fn remove(&self, collection: &str, id: &str) -> Result<u64, CloudError>;
}
