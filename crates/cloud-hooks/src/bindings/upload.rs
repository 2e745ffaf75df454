use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use cloud_core::{
    CloudError, ProgressFn, StateCell, StateStream, UploadRequest, UploadResult, UploadState,
};
use tracing::{debug, warn};

use crate::CloudHooks;

/// Object upload trigger with observable progress.
///
/// Overlapping triggers are not deduplicated: each runs its own upload, and
/// only the most recently triggered one writes the published state.
pub struct UploadBinding {
    hooks: CloudHooks,
    state: StateCell<UploadState>,
    generation: Arc<AtomicU64>,
}

impl UploadBinding {
    pub(crate) fn new(hooks: CloudHooks) -> Self {
        Self {
            hooks,
            state: StateCell::new(UploadState::default()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Upload `content` to `path` once the session is established.
    ///
    /// The published state is cleared right away, but `in_flight` only turns
    /// on once login has settled and the upload itself starts. The outcome is
    /// returned and also published; failures never touch the shared session.
    pub async fn trigger(
        &self,
        path: impl Into<String>,
        content: Vec<u8>,
    ) -> Result<UploadResult, CloudError> {
        let path = path.into();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        publish_if_current(&self.state, &self.generation, generation, |upload| {
            *upload = UploadState::default();
        });

        let progress: ProgressFn = {
            let state = self.state.clone();
            let current = Arc::clone(&self.generation);
            Arc::new(move |progress| {
                publish_if_current(&state, &current, generation, |upload| {
                    upload.progress = Some(progress);
                });
            })
        };

        let backend = self.hooks.backend();
        let request = UploadRequest {
            path: path.clone(),
            content,
        };
        let outcome = self
            .hooks
            .gated(|_| {
                publish_if_current(&self.state, &self.generation, generation, |upload| {
                    upload.in_flight = true;
                });
                async move { backend.upload_object(request, progress).await }
            })
            .await;

        let published = publish_if_current(&self.state, &self.generation, generation, |upload| {
            upload.in_flight = false;
            match &outcome {
                Ok(result) => upload.result = Some(result.clone()),
                Err(err) => upload.error = Some(err.clone()),
            }
        });

        match &outcome {
            Ok(result) => debug!(%path, file_id = %result.file_id, published, "upload finished"),
            Err(err) => warn!(%path, code = %err.code, published, "upload failed"),
        }
        outcome
    }

    pub fn snapshot(&self) -> UploadState {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> StateStream<UploadState> {
        self.state.subscribe()
    }
}

fn publish_if_current(
    state: &StateCell<UploadState>,
    current: &AtomicU64,
    generation: u64,
    apply: impl FnOnce(&mut UploadState),
) -> bool {
    state.update_if(|upload| {
        if current.load(Ordering::SeqCst) != generation {
            return false;
        }
        apply(upload);
        true
    })
}
