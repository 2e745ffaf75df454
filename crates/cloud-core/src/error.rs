use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SessionPhase;

/// Broad error category used for caller-side handling and retry decisions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Unknown strategy, missing strategy parameters, or other configuration issue.
    Config,
    /// The sign-in call (or the ticket fetch feeding it) was rejected.
    Handshake,
    /// Upload, temporary-URL or raw database call failed after authentication.
    Capability,
    /// Asynchronous error pushed by an active realtime watch.
    Subscription,
    /// Transient transport failure reported by the backend collaborator.
    Network,
    /// Internal adapter bug or invariant break.
    Internal,
}

/// Stable error payload shared by the coordinator, the gate and every binding.
///
/// The type is `Clone` because one handshake failure is fanned out to every
/// caller waiting on the same attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct CloudError {
    /// High-level error category.
    pub category: ErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl CloudError {
    /// Construct a new error.
    pub fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Strategy identifier outside the recognised set.
    pub fn unknown_strategy(identifier: &str) -> Self {
        Self::new(
            ErrorCategory::Config,
            "unknown_strategy",
            format!("unknown login strategy '{identifier}'"),
        )
    }

    /// Strategy selected without the parameters it needs.
    pub fn missing_strategy_param(strategy: &str, param: &str) -> Self {
        Self::new(
            ErrorCategory::Config,
            "missing_strategy_param",
            format!("login strategy '{strategy}' requires '{param}'"),
        )
    }

    /// Rejected sign-in attempt.
    pub fn handshake(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Handshake, code, message)
    }

    /// Failed capability call made after authentication succeeded.
    pub fn capability(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Capability, code, message)
    }

    /// Error pushed by a live realtime watch.
    pub fn subscription(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Subscription, code, message)
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: SessionPhase, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while session is {current:?}"),
        )
    }

    /// Re-label a non-handshake error raised during sign-in as a handshake failure.
    ///
    /// Configuration and handshake errors keep their category.
    pub fn into_handshake(self) -> Self {
        match self.category {
            ErrorCategory::Config | ErrorCategory::Handshake => self,
            _ => Self {
                category: ErrorCategory::Handshake,
                ..self
            },
        }
    }

    /// Whether a caller-side retry may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category,
            ErrorCategory::Handshake | ErrorCategory::Network
        )
    }
}
