use crate::{
    error::CloudError,
    types::{Credential, SessionPhase},
};

/// Session state owned by one adapter instance.
///
/// `P` is the pending handle shared by every caller waiting on the running
/// handshake.
#[derive(Debug, Clone)]
pub enum SessionState<P> {
    Unauthenticated,
    Authenticating { epoch: u64, pending: P },
    Authenticated(Credential),
}

impl<P> SessionState<P> {
    pub fn phase(&self) -> SessionPhase {
        match self {
            Self::Unauthenticated => SessionPhase::Unauthenticated,
            Self::Authenticating { .. } => SessionPhase::Authenticating,
            Self::Authenticated(_) => SessionPhase::Authenticated,
        }
    }
}

/// Three-state login machine enforcing at most one in-flight handshake.
///
/// Every handshake gets a fresh epoch; settlement is only accepted for the
/// epoch currently in flight, so a late result can never clobber a newer attempt.
#[derive(Debug)]
pub struct SessionStateMachine<P> {
    state: SessionState<P>,
    next_epoch: u64,
    established_once: bool,
}

impl<P> Default for SessionStateMachine<P> {
    fn default() -> Self {
        Self {
            state: SessionState::Unauthenticated,
            next_epoch: 1,
            established_once: false,
        }
    }
}

impl<P: Clone> SessionStateMachine<P> {
    pub fn state(&self) -> &SessionState<P> {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    /// Whether `Authenticated` was reached at least once.
    pub fn established_once(&self) -> bool {
        self.established_once
    }

    /// Established credential, if any.
    pub fn credential(&self) -> Option<Credential> {
        match &self.state {
            SessionState::Authenticated(credential) => Some(credential.clone()),
            _ => None,
        }
    }

    /// Pending handle of the running handshake, if any.
    pub fn pending(&self) -> Option<P> {
        match &self.state {
            SessionState::Authenticating { pending, .. } => Some(pending.clone()),
            _ => None,
        }
    }

    /// `Unauthenticated -> Authenticating`, installing the handle built by `make_pending`.
    pub fn begin(&mut self, make_pending: impl FnOnce(u64) -> P) -> Result<(u64, P), CloudError> {
        if !matches!(self.state, SessionState::Unauthenticated) {
            return Err(CloudError::invalid_state(self.phase(), "begin_handshake"));
        }

        let epoch = self.next_epoch;
        self.next_epoch += 1;
        let pending = make_pending(epoch);
        self.state = SessionState::Authenticating {
            epoch,
            pending: pending.clone(),
        };
        Ok((epoch, pending))
    }

    /// `Authenticating -> Authenticated | Unauthenticated`, clearing the pending handle.
    pub fn settle(
        &mut self,
        epoch: u64,
        outcome: Result<&Credential, &CloudError>,
    ) -> Result<SessionPhase, CloudError> {
        match &self.state {
            SessionState::Authenticating { epoch: current, .. } if *current == epoch => {}
            _ => return Err(CloudError::invalid_state(self.phase(), "settle_handshake")),
        }

        self.state = match outcome {
            Ok(credential) => {
                self.established_once = true;
                SessionState::Authenticated(credential.clone())
            }
            Err(_) => SessionState::Unauthenticated,
        };
        Ok(self.phase())
    }

    /// `Authenticated -> Unauthenticated`.
    pub fn sign_out(&mut self) -> Result<Credential, CloudError> {
        let SessionState::Authenticated(credential) = &self.state else {
            return Err(CloudError::invalid_state(self.phase(), "sign_out"));
        };
        let credential = credential.clone();
        self.state = SessionState::Unauthenticated;
        Ok(credential)
    }
}
