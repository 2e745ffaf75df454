//! Single-flight login coordination.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use cloud_core::{
    CloudBackend, CloudError, Credential, ErrorCategory, SessionPhase, SessionStateMachine,
    StateCell, StateStream,
};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, trace, warn};

use crate::strategy::HandshakeProcedure;

/// Awaitable outcome of the running handshake, cloned to every waiter.
type PendingHandle = Shared<BoxFuture<'static, Result<Credential, CloudError>>>;

/// Owns the session state of one adapter and deduplicates login attempts.
#[derive(Clone)]
pub(crate) struct LoginCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    machine: Mutex<SessionStateMachine<PendingHandle>>,
    /// Serializes backend session changes: handshake attempts and sign-out.
    session_io: AsyncMutex<()>,
    phase: StateCell<SessionPhase>,
    procedure: HandshakeProcedure,
    backend: Arc<dyn CloudBackend>,
}

impl LoginCoordinator {
    pub(crate) fn new(backend: Arc<dyn CloudBackend>, procedure: HandshakeProcedure) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                machine: Mutex::new(SessionStateMachine::default()),
                session_io: AsyncMutex::new(()),
                phase: StateCell::new(SessionPhase::Unauthenticated),
                procedure,
                backend,
            }),
        }
    }

    pub(crate) fn phase(&self) -> SessionPhase {
        self.inner.lock().phase()
    }

    pub(crate) fn subscribe_phase(&self) -> StateStream<SessionPhase> {
        self.inner.phase.subscribe()
    }

    pub(crate) fn established_once(&self) -> bool {
        self.inner.lock().established_once()
    }

    /// Return the established credential, joining or starting the single handshake.
    ///
    /// Concurrent callers arriving while no session exists share one attempt
    /// and all observe its outcome. A failure leaves the session
    /// unauthenticated so the next call starts over.
    pub(crate) async fn ensure_authenticated(&self) -> Result<Credential, CloudError> {
        let pending = {
            let mut machine = self.inner.lock();
            if let Some(credential) = machine.credential() {
                return Ok(credential);
            }

            match machine.pending() {
                Some(pending) => {
                    trace!("joining in-flight handshake");
                    pending
                }
                None => match &self.inner.procedure {
                    HandshakeProcedure::Immediate(credential) => {
                        let ready = futures::future::ready(Ok(credential.clone()));
                        let (epoch, _) = machine.begin(|_| ready.boxed().shared())?;
                        self.inner.phase.replace(SessionPhase::Authenticating);
                        let phase = machine.settle(epoch, Ok(credential))?;
                        self.inner.phase.replace(phase);
                        debug!(epoch, "session established without handshake");
                        return Ok(credential.clone());
                    }
                    HandshakeProcedure::Deferred(_) => {
                        let (epoch, pending) =
                            machine.begin(|epoch| self.inner.spawn_attempt(epoch))?;
                        self.inner.phase.replace(SessionPhase::Authenticating);
                        debug!(epoch, "handshake started");
                        pending
                    }
                },
            }
        };

        pending.await
    }

    /// Sign out of an established session.
    ///
    /// Rejected while unauthenticated or while a handshake is in flight. The
    /// session is dropped locally before the backend is told, so no caller is
    /// handed the credential being revoked.
    pub(crate) async fn sign_out(&self) -> Result<(), CloudError> {
        let phase = self.phase();
        if phase != SessionPhase::Authenticated {
            return Err(CloudError::invalid_state(phase, "sign_out"));
        }

        let _io = self.inner.session_io.lock().await;
        {
            let mut machine = self.inner.lock();
            machine.sign_out()?;
            self.inner.phase.replace(machine.phase());
        }

        if matches!(self.inner.procedure, HandshakeProcedure::Deferred(_)) {
            self.inner.backend.sign_out().await.inspect_err(|err| {
                warn!(code = %err.code, "backend sign out failed; local session already cleared");
            })?;
        }
        info!("signed out");
        Ok(())
    }
}

impl CoordinatorInner {
    fn lock(&self) -> MutexGuard<'_, SessionStateMachine<PendingHandle>> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one attempt on its own task so it completes even if every waiter goes away.
    fn spawn_attempt(self: &Arc<Self>, epoch: u64) -> PendingHandle {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            let _io = inner.session_io.lock().await;
            let outcome = inner.attempt().await;
            inner.settle(epoch, &outcome);
            outcome
        });

        let weak: Weak<Self> = Arc::downgrade(self);
        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    let err = CloudError::new(
                        ErrorCategory::Internal,
                        "handshake_task_failed",
                        join_err.to_string(),
                    );
                    if let Some(inner) = weak.upgrade() {
                        inner.settle(epoch, &Err(err.clone()));
                    }
                    Err(err)
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn attempt(&self) -> Result<Credential, CloudError> {
        match self.backend.session_state().await {
            Ok(Some(session)) => {
                info!(uid = %session.uid, "adopting existing backend session");
                return Ok(session.credential);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "session lookup failed; running handshake");
            }
        }

        self.procedure.run().await
    }

    fn settle(&self, epoch: u64, outcome: &Result<Credential, CloudError>) {
        let mut machine = self.lock();
        match machine.settle(epoch, outcome.as_ref()) {
            Ok(phase) => {
                self.phase.replace(phase);
                match outcome {
                    Ok(_) => info!(epoch, "handshake succeeded"),
                    Err(err) => warn!(epoch, code = %err.code, "handshake failed"),
                }
            }
            Err(_) => debug!(epoch, "ignoring settlement for stale handshake"),
        }
    }
}
