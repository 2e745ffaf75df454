use cloud_core::{CloudError, StateCell, StateStream, WatchEvent, WatchQuery, WatchState};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::CloudHooks;

/// Realtime watch over a collection query.
///
/// At most one backend watch is live per binding. Replacing the query stops
/// the running watch, and waits for its handle to be closed, before the next
/// one is requested. Disposal and drop release the handle too, including a
/// handle that arrives after teardown began.
pub struct WatchBinding {
    hooks: CloudHooks,
    state: StateCell<WatchState>,
    lifecycle: Mutex<WatchLifecycle>,
}

struct WatchLifecycle {
    query: WatchQuery,
    activated: bool,
    running: Option<RunningWatch>,
}

struct RunningWatch {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl RunningWatch {
    async fn shutdown(self) {
        self.stop.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "watch task ended abnormally");
        }
    }
}

impl WatchBinding {
    pub(crate) fn new(hooks: CloudHooks, query: WatchQuery) -> Self {
        Self {
            hooks,
            state: StateCell::new(WatchState::default()),
            lifecycle: Mutex::new(WatchLifecycle {
                query,
                activated: false,
                running: None,
            }),
        }
    }

    /// Start watching the current query. Returns `false` when already active.
    pub async fn activate(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.activated {
            return false;
        }
        lifecycle.activated = true;
        lifecycle.running = Some(self.start(lifecycle.query.clone()));
        true
    }

    /// Replace the watched query.
    ///
    /// When active, the previous watch is closed before the new one is
    /// requested. Returns `false` for an unchanged query.
    pub async fn set_key(&self, query: WatchQuery) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.query == query {
            return false;
        }
        lifecycle.query = query.clone();

        if let Some(running) = lifecycle.running.take() {
            running.shutdown().await;
        }
        self.state.replace(WatchState::default());
        if lifecycle.activated {
            lifecycle.running = Some(self.start(query));
        }
        true
    }

    /// Stop the watch and release its handle. A later [`activate`](Self::activate) starts over.
    pub async fn dispose(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        lifecycle.activated = false;
        if let Some(running) = lifecycle.running.take() {
            running.shutdown().await;
        }
    }

    pub fn snapshot(&self) -> WatchState {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> StateStream<WatchState> {
        self.state.subscribe()
    }

    fn start(&self, query: WatchQuery) -> RunningWatch {
        let stop = CancellationToken::new();
        let task = tokio::spawn(run_watch(
            self.hooks.clone(),
            query,
            self.state.clone(),
            stop.child_token(),
        ));
        RunningWatch { stop, task }
    }
}

impl Drop for WatchBinding {
    fn drop(&mut self) {
        // The task closes the handle once it observes the cancellation.
        if let Some(running) = self.lifecycle.get_mut().running.take() {
            running.stop.cancel();
        }
    }
}

async fn run_watch(
    hooks: CloudHooks,
    query: WatchQuery,
    state: StateCell<WatchState>,
    stop: CancellationToken,
) {
    // Nothing is allocated while the session is being established, so waiting
    // for it may be abandoned.
    let authenticated = tokio::select! {
        biased;
        _ = stop.cancelled() => return,
        result = hooks.ensure_authenticated() => result,
    };
    if let Err(err) = authenticated {
        publish_failure(&state, &stop, &query, err);
        return;
    }

    // Once requested, the handle must come back to be closed.
    let (sink, mut events) = mpsc::unbounded_channel();
    let backend = hooks.backend();
    let request = query.clone();
    let opened = hooks
        .gated(|_| async move { backend.watch_query(&request, sink).await })
        .await;
    let handle = match opened {
        Ok(handle) => handle,
        Err(err) => {
            publish_failure(&state, &stop, &query, err);
            return;
        }
    };
    let watch_id = handle.id().to_owned();
    debug!(collection = %query.collection, %watch_id, "watch opened");

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            event = events.recv() => match event {
                Some(WatchEvent::Change(snapshot)) => {
                    trace!(%watch_id, version = snapshot.version, "watch snapshot");
                    state.update(|watch| {
                        watch.connecting = false;
                        watch.snapshot = Some(snapshot);
                        watch.error = None;
                    });
                }
                Some(WatchEvent::Error(err)) => {
                    warn!(%watch_id, code = %err.code, "watch reported an error");
                    state.update(|watch| watch.error = Some(err));
                }
                None => {
                    stop.cancelled().await;
                    break;
                }
            },
        }
    }

    debug!(collection = %query.collection, %watch_id, "closing watch");
    handle.close();
}

fn publish_failure(
    state: &StateCell<WatchState>,
    stop: &CancellationToken,
    query: &WatchQuery,
    err: CloudError,
) {
    if stop.is_cancelled() {
        debug!(collection = %query.collection, code = %err.code, "dropping failure for stopped watch");
        return;
    }
    warn!(collection = %query.collection, code = %err.code, "watch could not be opened");
    state.update(|watch| {
        watch.connecting = false;
        watch.error = Some(err);
    });
}
