use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use cloud_core::{
    CloudError, DocumentStore, WatchEvent, WatchHandle, WatchQuery, WatchSink, WatchSnapshot,
};
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::MemoryError;

/// Collections of JSON documents plus the realtime watches observing them.
#[derive(Default)]
pub(crate) struct MemoryDocuments {
    inner: Mutex<DocumentsInner>,
}

#[derive(Default)]
struct DocumentsInner {
    collections: HashMap<String, Vec<Value>>,
    watchers: HashMap<String, Watcher>,
}

struct Watcher {
    query: WatchQuery,
    sink: WatchSink,
    version: u64,
}

impl MemoryDocuments {
    fn lock(&self) -> Result<MutexGuard<'_, DocumentsInner>, MemoryError> {
        self.inner.lock().map_err(|_| MemoryError::Poisoned)
    }

    /// Register a watch and push the initial snapshot.
    pub(crate) fn watch(
        self: &Arc<Self>,
        query: &WatchQuery,
        sink: WatchSink,
    ) -> Result<MemoryWatch, MemoryError> {
        let mut inner = self.lock()?;
        let id = Uuid::new_v4().to_string();
        let mut watcher = Watcher {
            query: query.clone(),
            sink,
            version: 0,
        };
        let docs = inner.matching(query);
        watcher.push(docs);
        inner.watchers.insert(id.clone(), watcher);
        debug!(watch_id = %id, collection = %query.collection, "watch registered");

        Ok(MemoryWatch {
            id,
            documents: Arc::clone(self),
        })
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(&self) -> usize {
        self.lock().map(|inner| inner.watchers.len()).unwrap_or_default()
    }

    fn unregister(&self, id: &str) -> Result<bool, MemoryError> {
        Ok(self.lock()?.watchers.remove(id).is_some())
    }
}

impl DocumentsInner {
    fn matching(&self, query: &WatchQuery) -> Vec<Value> {
        self.collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches_filter(&query.filter, doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Push fresh snapshots to watches on `collection` that `changed` is visible to.
    fn notify(&mut self, collection: &str, changed: &[Value]) {
        let affected = self
            .watchers
            .iter()
            .filter(|(_, watcher)| {
                watcher.query.collection == collection
                    && changed
                        .iter()
                        .any(|doc| matches_filter(&watcher.query.filter, doc))
            })
            .map(|(id, watcher)| (id.clone(), self.matching(&watcher.query)))
            .collect::<Vec<_>>();

        for (id, docs) in affected {
            let delivered = self
                .watchers
                .get_mut(&id)
                .is_some_and(|watcher| watcher.push(docs));
            if !delivered {
                debug!(watch_id = %id, "watch receiver gone, dropping watcher");
                self.watchers.remove(&id);
            }
        }
    }
}

impl Watcher {
    fn push(&mut self, docs: Vec<Value>) -> bool {
        self.version += 1;
        trace!(version = self.version, docs = docs.len(), "pushing watch snapshot");
        self.sink
            .send(WatchEvent::Change(WatchSnapshot {
                version: self.version,
                docs,
            }))
            .is_ok()
    }
}

/// Equality match on every field of an object filter; `null` matches everything.
fn matches_filter(filter: &Value, doc: &Value) -> bool {
    match filter {
        Value::Null => true,
        Value::Object(fields) => fields.iter().all(|(key, want)| doc.get(key) == Some(want)),
        _ => false,
    }
}

#[async_trait]
impl DocumentStore for MemoryDocuments {
    async fn add(&self, collection: &str, doc: Value) -> Result<String, CloudError> {
        let Value::Object(mut fields) = doc else {
            return Err(MemoryError::InvalidDocument.into());
        };
        let id = document_id(&mut fields);

        let mut inner = self.lock()?;
        let docs = inner.collections.entry(collection.to_owned()).or_default();
        if docs
            .iter()
            .any(|existing| existing.get("_id").and_then(Value::as_str) == Some(id.as_str()))
        {
            return Err(MemoryError::DuplicateId(id).into());
        }

        let doc = Value::Object(fields);
        docs.push(doc.clone());
        inner.notify(collection, &[doc]);
        debug!(%collection, %id, "document added");
        Ok(id)
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<u64, CloudError> {
        let mut inner = self.lock()?;
        let Some(docs) = inner.collections.get_mut(collection) else {
            return Ok(0);
        };

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(docs)
            .into_iter()
            .partition(|doc| doc.get("_id").and_then(Value::as_str) == Some(id));
        *docs = kept;

        if !removed.is_empty() {
            inner.notify(collection, &removed);
        }
        debug!(%collection, %id, removed = removed.len(), "document removed");
        Ok(removed.len() as u64)
    }
}

fn document_id(fields: &mut Map<String, Value>) -> String {
    if let Some(id) = fields.get("_id").and_then(Value::as_str) {
        return id.to_owned();
    }
    let id = Uuid::new_v4().to_string();
    fields.insert("_id".to_owned(), Value::String(id.clone()));
    id
}

/// Handle for a watch registered in [`MemoryDocuments`].
pub(crate) struct MemoryWatch {
    id: String,
    documents: Arc<MemoryDocuments>,
}

impl WatchHandle for MemoryWatch {
    fn id(&self) -> &str {
        &self.id
    }

    fn close(self: Box<Self>) {
        match self.documents.unregister(&self.id) {
            Ok(true) => debug!(watch_id = %self.id, "watch closed"),
            Ok(false) => debug!(watch_id = %self.id, "watch already gone"),
            Err(err) => warn!(watch_id = %self.id, error = %err, "failed to close watch"),
        }
    }
}
