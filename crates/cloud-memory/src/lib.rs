//! In-memory backend for the cloud collaborator traits.
//!
//! [`InMemoryCloud`] hands out one [`CloudBackend`] per `connect` call. Clients
//! connected to the same environment share objects, documents and, with
//! [`SessionPersistence::Local`], the signed-in session.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, RwLock},
};

use async_trait::async_trait;
use cloud_core::{
    BackendConnector, CloudBackend, CloudError, Credential, DocumentStore, ErrorCategory,
    ProgressFn, ProviderParams, SessionInfo, SessionPersistence, TempFileUrl, UploadProgress,
    UploadRequest, UploadResult, WatchHandle, WatchQuery, WatchSink,
};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

mod documents;

use documents::MemoryDocuments;

/// Base of generated temporary download URLs.
pub const DEFAULT_URL_BASE: &str = "https://storage.cloud.invalid/";
/// Validity window of generated temporary download URLs.
pub const TEMP_URL_MAX_AGE_SECS: u64 = 3_600;
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("in-memory state lock poisoned")]
    Poisoned,
    #[error("ticket rejected")]
    TicketRejected,
    #[error("provider '{0}' rejected")]
    ProviderRejected(String),
    #[error("no signed-in session")]
    Unauthenticated,
    #[error("invalid object path '{0}'")]
    InvalidPath(String),
    #[error("document must be a JSON object")]
    InvalidDocument,
    #[error("document '{0}' already exists")]
    DuplicateId(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl From<MemoryError> for CloudError {
    fn from(err: MemoryError) -> Self {
        let (category, code) = match &err {
            MemoryError::Poisoned => (ErrorCategory::Internal, "state_poisoned"),
            MemoryError::TicketRejected => (ErrorCategory::Handshake, "ticket_rejected"),
            MemoryError::ProviderRejected(_) => (ErrorCategory::Handshake, "provider_rejected"),
            MemoryError::Unauthenticated => (ErrorCategory::Capability, "unauthenticated"),
            MemoryError::InvalidPath(_) => (ErrorCategory::Capability, "invalid_path"),
            MemoryError::InvalidDocument => (ErrorCategory::Capability, "invalid_document"),
            MemoryError::DuplicateId(_) => (ErrorCategory::Capability, "duplicate_id"),
            MemoryError::InvalidUrl(_) => (ErrorCategory::Internal, "invalid_url"),
        };
        CloudError::new(category, code, err.to_string())
    }
}

/// Connector owning every in-memory environment.
#[derive(Clone)]
pub struct InMemoryCloud {
    environments: Arc<RwLock<HashMap<String, Arc<Environment>>>>,
    accepted_tickets: Option<Arc<HashSet<String>>>,
    url_base: Option<Url>,
    chunk_size: usize,
    anonymous_access: bool,
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCloud {
    /// Cloud accepting any non-empty ticket.
    pub fn new() -> Self {
        Self {
            environments: Arc::new(RwLock::new(HashMap::new())),
            accepted_tickets: None,
            url_base: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            anonymous_access: false,
        }
    }

    /// Only accept the given tickets.
    pub fn with_tickets<I, T>(mut self, tickets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.accepted_tickets = Some(Arc::new(tickets.into_iter().map(Into::into).collect()));
        self
    }

    pub fn with_url_base(mut self, base: Url) -> Self {
        self.url_base = Some(base);
        self
    }

    /// Size of the slices upload progress is reported in.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Serve capability calls from clients that never signed in.
    pub fn with_anonymous_access(mut self) -> Self {
        self.anonymous_access = true;
        self
    }

    fn environment(&self, endpoint: &str) -> Result<Arc<Environment>, MemoryError> {
        if let Some(env) = self
            .environments
            .read()
            .map_err(|_| MemoryError::Poisoned)?
            .get(endpoint)
        {
            return Ok(Arc::clone(env));
        }

        let mut environments = self
            .environments
            .write()
            .map_err(|_| MemoryError::Poisoned)?;
        let env = environments.entry(endpoint.to_owned()).or_insert_with(|| {
            info!(%endpoint, "creating in-memory environment");
            Arc::new(Environment::default())
        });
        Ok(Arc::clone(env))
    }
}

impl BackendConnector for InMemoryCloud {
    fn connect(
        &self,
        endpoint: &str,
        persistence: SessionPersistence,
    ) -> Result<Arc<dyn CloudBackend>, CloudError> {
        let env = self.environment(endpoint)?;
        let url_base = match &self.url_base {
            Some(base) => base.clone(),
            None => Url::parse(DEFAULT_URL_BASE)
                .map_err(|err| MemoryError::InvalidUrl(err.to_string()))?,
        };
        debug!(%endpoint, ?persistence, "in-memory client connected");

        Ok(Arc::new(MemoryBackend {
            endpoint: endpoint.to_owned(),
            persistence,
            env,
            session: Mutex::new(None),
            accepted_tickets: self.accepted_tickets.clone(),
            url_base,
            chunk_size: self.chunk_size,
            anonymous_access: self.anonymous_access,
        }))
    }
}

#[derive(Default)]
struct Environment {
    persisted_session: RwLock<Option<SessionInfo>>,
    objects: RwLock<HashMap<String, StoredObject>>,
    documents: Arc<MemoryDocuments>,
}

struct StoredObject {
    file_id: String,
    content: Vec<u8>,
}

/// Client bound to one environment and persistence mode.
struct MemoryBackend {
    endpoint: String,
    persistence: SessionPersistence,
    env: Arc<Environment>,
    session: Mutex<Option<SessionInfo>>,
    accepted_tickets: Option<Arc<HashSet<String>>>,
    url_base: Url,
    chunk_size: usize,
    anonymous_access: bool,
}

impl MemoryBackend {
    fn current_session(&self) -> Result<Option<SessionInfo>, MemoryError> {
        if let Some(session) = self
            .session
            .lock()
            .map_err(|_| MemoryError::Poisoned)?
            .clone()
        {
            return Ok(Some(session));
        }
        if self.persistence == SessionPersistence::Local {
            return Ok(self
                .env
                .persisted_session
                .read()
                .map_err(|_| MemoryError::Poisoned)?
                .clone());
        }
        Ok(None)
    }

    fn store_session(&self, session: Option<SessionInfo>) -> Result<(), MemoryError> {
        if self.persistence == SessionPersistence::Local {
            *self
                .env
                .persisted_session
                .write()
                .map_err(|_| MemoryError::Poisoned)? = session.clone();
        }
        *self.session.lock().map_err(|_| MemoryError::Poisoned)? = session;
        Ok(())
    }

    fn authorize(&self, action: &str) -> Result<(), MemoryError> {
        if self.current_session()?.is_some() {
            return Ok(());
        }
        if self.anonymous_access {
            debug!(endpoint = %self.endpoint, action, "serving anonymous client");
            return Ok(());
        }
        Err(MemoryError::Unauthenticated)
    }

    fn establish(&self, uid: String) -> Result<Credential, MemoryError> {
        let credential = Credential::new(format!("mem-{}", Uuid::new_v4()));
        self.store_session(Some(SessionInfo {
            uid: uid.clone(),
            credential: credential.clone(),
        }))?;
        info!(endpoint = %self.endpoint, %uid, "in-memory session established");
        Ok(credential)
    }

    fn temporary_url(&self, path: &str) -> Result<Url, MemoryError> {
        let mut url = self
            .url_base
            .join(&format!("{}/{}", self.endpoint, path))
            .map_err(|err| MemoryError::InvalidUrl(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("sig", &Uuid::new_v4().simple().to_string())
            .append_pair("max_age", &TEMP_URL_MAX_AGE_SECS.to_string());
        Ok(url)
    }
}

#[async_trait]
impl CloudBackend for MemoryBackend {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn session_state(&self) -> Result<Option<SessionInfo>, CloudError> {
        // Sessions kept without persistence are never offered for adoption.
        if self.persistence == SessionPersistence::None {
            return Ok(None);
        }
        Ok(self.current_session()?)
    }

    async fn sign_in_with_ticket(&self, ticket: &str) -> Result<Credential, CloudError> {
        let accepted = !ticket.is_empty()
            && self
                .accepted_tickets
                .as_ref()
                .is_none_or(|tickets| tickets.contains(ticket));
        if !accepted {
            warn!(endpoint = %self.endpoint, "ticket rejected");
            return Err(MemoryError::TicketRejected.into());
        }
        Ok(self.establish(format!("ticket-{}", Uuid::new_v4().simple()))?)
    }

    async fn sign_in_with_provider(
        &self,
        params: &ProviderParams,
    ) -> Result<Credential, CloudError> {
        if params.provider_id.trim().is_empty() {
            return Err(MemoryError::ProviderRejected(params.provider_id.clone()).into());
        }
        Ok(self.establish(format!("{}-{}", params.provider_id, Uuid::new_v4().simple()))?)
    }

    async fn sign_out(&self) -> Result<(), CloudError> {
        self.store_session(None)?;
        info!(endpoint = %self.endpoint, "in-memory session cleared");
        Ok(())
    }

    async fn upload_object(
        &self,
        request: UploadRequest,
        progress: ProgressFn,
    ) -> Result<UploadResult, CloudError> {
        self.authorize("upload")?;
        let path = request.path.trim_matches('/').to_owned();
        if path.is_empty() {
            return Err(MemoryError::InvalidPath(request.path).into());
        }

        let total = request.content.len() as u64;
        let mut loaded = 0_u64;
        progress(UploadProgress { loaded, total });
        for chunk in request.content.chunks(self.chunk_size) {
            loaded += chunk.len() as u64;
            progress(UploadProgress { loaded, total });
            tokio::task::yield_now().await;
        }

        let file_id = format!("cloud://{}/{}", self.endpoint, Uuid::new_v4());
        self.env
            .objects
            .write()
            .map_err(|_| MemoryError::Poisoned)?
            .insert(
                path.clone(),
                StoredObject {
                    file_id: file_id.clone(),
                    content: request.content,
                },
            );
        debug!(endpoint = %self.endpoint, %path, bytes = total, "object stored");
        Ok(UploadResult { file_id, path })
    }

    async fn resolve_temporary_urls(
        &self,
        paths: &[String],
    ) -> Result<Vec<TempFileUrl>, CloudError> {
        self.authorize("resolve_temporary_urls")?;
        let objects = self.env.objects.read().map_err(|_| MemoryError::Poisoned)?;

        let mut urls = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(object) = objects.get(path.trim_matches('/')) else {
                debug!(%path, "no object stored at path");
                continue;
            };
            debug!(%path, file_id = %object.file_id, bytes = object.content.len(), "issuing temporary url");
            urls.push(TempFileUrl {
                path: path.clone(),
                url: self.temporary_url(path.trim_matches('/'))?.into(),
                max_age_secs: TEMP_URL_MAX_AGE_SECS,
            });
        }
        Ok(urls)
    }

    async fn watch_query(
        &self,
        query: &WatchQuery,
        sink: WatchSink,
    ) -> Result<Box<dyn WatchHandle>, CloudError> {
        self.authorize("watch_query")?;
        let handle = self.env.documents.watch(query, sink)?;
        Ok(Box::new(handle))
    }

    fn database(&self) -> Arc<dyn DocumentStore> {
        self.env.documents.clone()
    }
}
