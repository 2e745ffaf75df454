use std::sync::atomic::{AtomicBool, Ordering};

use cloud_core::{LoginState, StateCell, StateStream};
use tracing::warn;

use crate::CloudHooks;

/// Establishes the session on first activation and publishes the outcome.
pub struct LoginStateBinding {
    hooks: CloudHooks,
    state: StateCell<LoginState>,
    activated: AtomicBool,
}

impl LoginStateBinding {
    pub(crate) fn new(hooks: CloudHooks) -> Self {
        Self {
            hooks,
            state: StateCell::new(LoginState::default()),
            activated: AtomicBool::new(false),
        }
    }

    /// Start authentication in the background.
    ///
    /// Only the first call has an effect; returns whether it did.
    pub fn activate(&self) -> bool {
        if self.activated.swap(true, Ordering::SeqCst) {
            return false;
        }

        let hooks = self.hooks.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            match hooks.ensure_authenticated().await {
                Ok(credential) => state.replace(LoginState {
                    established: true,
                    credential: Some(credential),
                    error: None,
                }),
                Err(err) => {
                    warn!(code = %err.code, "login binding failed to establish session");
                    state.update(|login| login.error = Some(err));
                }
            }
        });
        true
    }

    pub fn snapshot(&self) -> LoginState {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> StateStream<LoginState> {
        self.state.subscribe()
    }
}
