use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use cloud_core::{CloudError, FileUrlState, StateCell, StateStream, TempFileUrl};
use tracing::{debug, trace};

use crate::CloudHooks;

/// Resolves a temporary download URL for a path key.
///
/// Resolution reruns on every key change; a result for a superseded key is
/// discarded, so the published URL always belongs to the latest key.
pub struct FileUrlBinding {
    hooks: CloudHooks,
    state: StateCell<FileUrlState>,
    generation: Arc<AtomicU64>,
    lifecycle: Mutex<Lifecycle>,
}

struct Lifecycle {
    key: String,
    activated: bool,
}

impl FileUrlBinding {
    pub(crate) fn new(hooks: CloudHooks, key: String) -> Self {
        Self {
            hooks,
            state: StateCell::new(FileUrlState {
                key: key.clone(),
                ..FileUrlState::default()
            }),
            generation: Arc::new(AtomicU64::new(0)),
            lifecycle: Mutex::new(Lifecycle {
                key,
                activated: false,
            }),
        }
    }

    /// Resolve the current key. Later calls have no effect.
    pub fn activate(&self) -> bool {
        let mut lifecycle = self.lock();
        if lifecycle.activated {
            return false;
        }
        lifecycle.activated = true;
        self.start_resolution(lifecycle.key.clone());
        true
    }

    /// Switch to a new key, re-resolving when active. Unchanged keys are ignored.
    pub fn set_key(&self, key: impl Into<String>) -> bool {
        let key = key.into();
        let mut lifecycle = self.lock();
        if lifecycle.key == key {
            return false;
        }
        lifecycle.key = key.clone();

        if lifecycle.activated {
            self.start_resolution(key);
        } else {
            self.state.replace(FileUrlState {
                key,
                ..FileUrlState::default()
            });
        }
        true
    }

    pub fn snapshot(&self) -> FileUrlState {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> StateStream<FileUrlState> {
        self.state.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Caller holds the lifecycle lock, so generation bumps and resets are ordered.
    fn start_resolution(&self, key: String) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.replace(FileUrlState {
            key: key.clone(),
            loading: true,
            ..FileUrlState::default()
        });

        let hooks = self.hooks.clone();
        let state = self.state.clone();
        let current = Arc::clone(&self.generation);
        tokio::spawn(async move {
            let outcome = resolve_one(&hooks, &key).await;
            let published = state.update_if(|file| {
                if current.load(Ordering::SeqCst) != generation {
                    return false;
                }
                file.loading = false;
                match outcome {
                    Ok(url) => file.url = Some(url),
                    Err(err) => file.error = Some(err),
                }
                true
            });

            if published {
                trace!(%key, generation, "temporary url published");
            } else {
                debug!(%key, generation, "discarding result for superseded key");
            }
        });
    }
}

async fn resolve_one(hooks: &CloudHooks, key: &str) -> Result<TempFileUrl, CloudError> {
    let backend = hooks.backend();
    let paths = vec![key.to_owned()];
    let urls = hooks
        .gated(|_| async move { backend.resolve_temporary_urls(&paths).await })
        .await?;

    urls.into_iter().find(|url| url.path == key).ok_or_else(|| {
        CloudError::capability(
            "temp_url_missing",
            format!("backend returned no temporary url for '{key}'"),
        )
    })
}
