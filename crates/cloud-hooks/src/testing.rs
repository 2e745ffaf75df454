//! Scripted backend used by unit tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use cloud_core::{
    CloudBackend, CloudError, Credential, DocumentStore, ProgressFn, ProviderParams, SessionInfo,
    TempFileUrl, UploadProgress, UploadRequest, UploadResult, WatchEvent, WatchHandle, WatchQuery,
    WatchSink,
};
use serde_json::Value;
use tokio::sync::Notify;

type CallLog = Arc<Mutex<Vec<String>>>;
type Sinks = Arc<Mutex<HashMap<String, WatchSink>>>;

/// Records every call in order and lets tests hold individual calls open.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    calls: CallLog,
    holds: Mutex<HashMap<String, Arc<Notify>>>,
    session: Mutex<Option<SessionInfo>>,
    sign_in_failures: AtomicU32,
    failing_paths: Mutex<HashSet<String>>,
    fail_watches: Mutex<bool>,
    sinks: Sinks,
    next_watch_id: AtomicU64,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("call log").clone()
    }

    pub(crate) fn count_calls(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub(crate) fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|entry| entry == call)
    }

    /// Hold the next sign-in until the returned notify fires.
    pub(crate) fn hold_sign_in(&self) -> Arc<Notify> {
        self.hold("sign_in")
    }

    /// Hold the next upload, URL resolution or watch for `key` until notified.
    pub(crate) fn hold(&self, key: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.holds
            .lock()
            .expect("holds")
            .insert(key.to_owned(), Arc::clone(&notify));
        notify
    }

    pub(crate) fn fail_next_sign_ins(&self, count: u32) {
        self.sign_in_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn set_session(&self, session: Option<SessionInfo>) {
        *self.session.lock().expect("session") = session;
    }

    pub(crate) fn fail_path(&self, path: &str) {
        self.failing_paths
            .lock()
            .expect("failing paths")
            .insert(path.to_owned());
    }

    pub(crate) fn fail_watches(&self, fail: bool) {
        *self.fail_watches.lock().expect("fail watches") = fail;
    }

    pub(crate) fn active_watches(&self) -> Vec<String> {
        let mut ids = self
            .sinks
            .lock()
            .expect("sinks")
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }

    /// Push an event into an open watch.
    pub(crate) fn emit(&self, watch_id: &str, event: WatchEvent) -> bool {
        self.sinks
            .lock()
            .expect("sinks")
            .get(watch_id)
            .is_some_and(|sink| sink.send(event).is_ok())
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().expect("call log").push(call.into());
    }

    async fn wait_if_held(&self, key: &str) {
        let hold = self.holds.lock().expect("holds").remove(key);
        if let Some(hold) = hold {
            hold.notified().await;
        }
    }

    async fn sign_in(&self, call: String, credential: Credential) -> Result<Credential, CloudError> {
        self.record(call);
        self.wait_if_held("sign_in").await;

        let remaining = self.sign_in_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.sign_in_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(CloudError::handshake("ticket_rejected", "scripted rejection"));
        }

        self.set_session(Some(SessionInfo {
            uid: "scripted-user".to_owned(),
            credential: credential.clone(),
        }));
        Ok(credential)
    }
}

#[async_trait]
impl CloudBackend for ScriptedBackend {
    fn endpoint(&self) -> &str {
        "scripted-env"
    }

    async fn session_state(&self) -> Result<Option<SessionInfo>, CloudError> {
        self.record("session_state");
        Ok(self.session.lock().expect("session").clone())
    }

    async fn sign_in_with_ticket(&self, ticket: &str) -> Result<Credential, CloudError> {
        self.sign_in(
            format!("sign_in_with_ticket:{ticket}"),
            Credential::new(format!("cred-{ticket}")),
        )
        .await
    }

    async fn sign_in_with_provider(
        &self,
        params: &ProviderParams,
    ) -> Result<Credential, CloudError> {
        self.sign_in(
            format!("sign_in_with_provider:{}", params.provider_id),
            Credential::new(format!("cred-{}", params.provider_id)),
        )
        .await
    }

    async fn sign_out(&self) -> Result<(), CloudError> {
        self.record("sign_out");
        self.wait_if_held("sign_out").await;
        self.set_session(None);
        Ok(())
    }

    async fn upload_object(
        &self,
        request: UploadRequest,
        progress: ProgressFn,
    ) -> Result<UploadResult, CloudError> {
        self.record(format!("upload:{}", request.path));
        let total = request.content.len() as u64;
        progress(UploadProgress {
            loaded: total / 2,
            total,
        });
        self.wait_if_held(&request.path).await;

        if self
            .failing_paths
            .lock()
            .expect("failing paths")
            .contains(&request.path)
        {
            return Err(CloudError::capability("upload_failed", "scripted upload failure"));
        }

        progress(UploadProgress {
            loaded: total,
            total,
        });
        Ok(UploadResult {
            file_id: format!("file-{}", request.path),
            path: request.path,
        })
    }

    async fn resolve_temporary_urls(
        &self,
        paths: &[String],
    ) -> Result<Vec<TempFileUrl>, CloudError> {
        self.record(format!("resolve:{}", paths.join(",")));
        for path in paths {
            self.wait_if_held(path).await;
        }

        let failing = self.failing_paths.lock().expect("failing paths").clone();
        Ok(paths
            .iter()
            .filter(|path| !failing.contains(*path))
            .map(|path| TempFileUrl {
                path: path.clone(),
                url: format!("https://tmp.example/{path}?sig=1"),
                max_age_secs: 600,
            })
            .collect())
    }

    async fn watch_query(
        &self,
        query: &WatchQuery,
        sink: WatchSink,
    ) -> Result<Box<dyn WatchHandle>, CloudError> {
        self.record(format!("watch:{}:{}", query.collection, query.filter));
        self.wait_if_held(&format!("watch:{}", query.collection))
            .await;

        if *self.fail_watches.lock().expect("fail watches") {
            return Err(CloudError::capability("watch_failed", "scripted watch failure"));
        }

        let id = format!("w{}", self.next_watch_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.sinks
            .lock()
            .expect("sinks")
            .insert(id.clone(), sink);
        Ok(Box::new(ScriptedWatch {
            id,
            calls: Arc::clone(&self.calls),
            sinks: Arc::clone(&self.sinks),
            closed: false,
        }))
    }

    fn database(&self) -> Arc<dyn DocumentStore> {
        Arc::new(ScriptedStore {
            calls: Arc::clone(&self.calls),
        })
    }
}

struct ScriptedWatch {
    id: String,
    calls: CallLog,
    sinks: Sinks,
    closed: bool,
}

impl WatchHandle for ScriptedWatch {
    fn id(&self) -> &str {
        &self.id
    }

    fn close(mut self: Box<Self>) {
        self.closed = true;
        self.sinks.lock().expect("sinks").remove(&self.id);
        self.calls
            .lock()
            .expect("call log")
            .push(format!("close:{}", self.id));
    }
}

impl Drop for ScriptedWatch {
    fn drop(&mut self) {
        if !self.closed {
            self.calls
                .lock()
                .expect("call log")
                .push(format!("leaked:{}", self.id));
        }
    }
}

struct ScriptedStore {
    calls: CallLog,
}

#[async_trait]
impl DocumentStore for ScriptedStore {
    async fn add(&self, collection: &str, doc: Value) -> Result<String, CloudError> {
        self.calls
            .lock()
            .expect("call log")
            .push(format!("db_add:{collection}"));
        Ok(doc
            .get("_id")
            .and_then(Value::as_str)
            .unwrap_or("doc-1")
            .to_owned())
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<u64, CloudError> {
        self.calls
            .lock()
            .expect("call log")
            .push(format!("db_remove:{collection}:{id}"));
        Ok(1)
    }
}
