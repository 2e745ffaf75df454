use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CloudError;

/// Opaque token representing an authenticated identity.
///
/// The adapter never interprets the token; the `none` strategy produces the
/// anonymous (empty) credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Credential(Option<String>);

impl Credential {
    /// Wrap a backend-issued token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// The empty credential used when no login is configured.
    pub fn anonymous() -> Self {
        Self(None)
    }

    /// Raw token, if any.
    pub fn token(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.is_none()
    }
}

/// Session already held by the backend collaborator (for example restored from storage).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionInfo {
    /// Backend user identifier.
    pub uid: String,
    /// Credential attached to the session.
    pub credential: Credential,
}

/// Projection of the adapter session state that can be published to observers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session and no handshake running.
    Unauthenticated,
    /// One handshake is in flight.
    Authenticating,
    /// A credential is established.
    Authenticated,
}

/// Closed set of login strategies understood by the resolver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StrategyKind {
    /// Application-supplied ticket exchanged via `sign_in_with_ticket`.
    CustomTicket,
    /// Third-party identity provider sign-in.
    Provider,
    /// No login; every capability runs with the anonymous credential.
    None,
}

impl StrategyKind {
    /// Canonical identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CustomTicket => "custom-ticket",
            Self::Provider => "provider-based",
            Self::None => "none",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = CloudError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "custom" | "custom-ticket" => Ok(Self::CustomTicket),
            "provider" | "provider-based" => Ok(Self::Provider),
            "none" => Ok(Self::None),
            other => Err(CloudError::unknown_strategy(other)),
        }
    }
}

/// Parameters for provider-based sign-in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderParams {
    /// Provider identifier, for example `wechat-open`.
    pub provider_id: String,
    /// Requested scope.
    pub scope: String,
}

/// Whether the backend keeps credentials across process restarts.
///
/// Passed through to the collaborator untouched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SessionPersistence {
    /// Survives restarts.
    #[default]
    Local,
    /// Lives as long as the backend connection.
    Session,
    /// Never stored.
    None,
}

impl FromStr for SessionPersistence {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "local" => Ok(Self::Local),
            "session" => Ok(Self::Session),
            "none" => Ok(Self::None),
            other => Err(format!("expected one of local|session|none, got '{other}'")),
        }
    }
}

/// Object upload request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadRequest {
    /// Remote object path.
    pub path: String,
    /// Raw object bytes.
    pub content: Vec<u8>,
}

/// Upload progress notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadProgress {
    /// Bytes sent so far.
    pub loaded: u64,
    /// Total bytes to send.
    pub total: u64,
}

/// Successful upload outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadResult {
    /// Backend file identifier.
    pub file_id: String,
    /// Remote object path the file was stored under.
    pub path: String,
}

/// Temporary access URL for a stored object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TempFileUrl {
    /// Remote object path.
    pub path: String,
    /// Time-limited download URL.
    pub url: String,
    /// Validity window in seconds.
    pub max_age_secs: u64,
}

/// Realtime watch target: a collection plus an equality filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchQuery {
    /// Collection name.
    pub collection: String,
    /// Field equality filter, usually a JSON object.
    pub filter: Value,
}

impl WatchQuery {
    pub fn new(collection: impl Into<String>, filter: Value) -> Self {
        Self {
            collection: collection.into(),
            filter,
        }
    }
}

/// Snapshot pushed by a realtime watch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchSnapshot {
    /// Monotonic per-watch snapshot counter.
    pub version: u64,
    /// Documents currently matching the query.
    pub docs: Vec<Value>,
}

/// Event emitted by a realtime watch.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// New snapshot of the matching documents.
    Change(WatchSnapshot),
    /// Asynchronous watch failure.
    Error(CloudError),
}

/// Published by the login-state binding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoginState {
    /// `true` once the coordinator resolved successfully.
    pub established: bool,
    /// Credential returned by the coordinator.
    pub credential: Option<Credential>,
    /// Last authentication failure.
    pub error: Option<CloudError>,
}

/// Published by the upload binding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UploadState {
    /// Latest progress of the most recent upload.
    pub progress: Option<UploadProgress>,
    /// Result of the most recent upload.
    pub result: Option<UploadResult>,
    /// Whether the most recent upload is still running.
    pub in_flight: bool,
    /// Failure of the most recent upload.
    pub error: Option<CloudError>,
}

/// Published by the file-URL binding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileUrlState {
    /// Path key the state refers to.
    pub key: String,
    /// Resolved URL for `key`.
    pub url: Option<TempFileUrl>,
    /// Whether a resolution for `key` is running.
    pub loading: bool,
    /// Resolution failure for `key`.
    pub error: Option<CloudError>,
}

/// Published by the realtime-subscription binding.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchState {
    /// Latest snapshot for the current query.
    pub snapshot: Option<WatchSnapshot>,
    /// `true` until the first snapshot for the current query arrives.
    pub connecting: bool,
    /// Setup failure or error pushed by the watch.
    pub error: Option<CloudError>,
}

impl Default for WatchState {
    fn default() -> Self {
        Self {
            snapshot: None,
            connecting: true,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn parses_strategy_identifiers_and_aliases() {
        assert_eq!("custom".parse::<StrategyKind>(), Ok(StrategyKind::CustomTicket));
        assert_eq!(
            "custom-ticket".parse::<StrategyKind>(),
            Ok(StrategyKind::CustomTicket)
        );
        assert_eq!("provider".parse::<StrategyKind>(), Ok(StrategyKind::Provider));
        assert_eq!(
            " provider-based ".parse::<StrategyKind>(),
            Ok(StrategyKind::Provider)
        );
        assert_eq!("none".parse::<StrategyKind>(), Ok(StrategyKind::None));
    }

    #[test]
    fn rejects_unknown_strategy_as_config_error() {
        let err = "anonymous-guest"
            .parse::<StrategyKind>()
            .expect_err("unknown identifier must fail");
        assert_eq!(err.category, ErrorCategory::Config);
        assert_eq!(err.code, "unknown_strategy");
    }

    #[test]
    fn anonymous_credential_has_no_token() {
        assert!(Credential::anonymous().is_anonymous());
        assert_eq!(Credential::new("tok").token(), Some("tok"));
    }

    #[test]
    fn watch_state_starts_connecting() {
        let state = WatchState::default();
        assert!(state.connecting);
        assert!(state.snapshot.is_none());
    }
}
