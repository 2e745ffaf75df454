//! Core contract shared by the cloud-hooks adapter and backend implementations.
//!
//! This crate defines the session state machine, the error taxonomy, the
//! observable state cell used by bindings, and the collaborator traits a
//! backend SDK has to provide.

/// Backend collaborator traits.
pub mod backend;
/// Observable state cell primitives.
pub mod channel;
/// Stable error type and categories.
pub mod error;
/// Caller-side retry policy.
pub mod retry;
/// Three-state login machine.
pub mod state_machine;
/// Data model and binding state records.
pub mod types;

pub use backend::{BackendConnector, CloudBackend, DocumentStore, ProgressFn, WatchHandle, WatchSink};
pub use channel::{StateCell, StateStream};
pub use error::{CloudError, ErrorCategory};
pub use retry::RetryPolicy;
pub use state_machine::{SessionState, SessionStateMachine};
pub use types::{
    Credential, FileUrlState, LoginState, ProviderParams, SessionInfo, SessionPersistence,
    SessionPhase, StrategyKind, TempFileUrl, UploadProgress, UploadRequest, UploadResult,
    UploadState, WatchEvent, WatchQuery, WatchSnapshot, WatchState,
};
