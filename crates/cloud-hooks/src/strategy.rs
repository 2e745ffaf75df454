//! Login strategy resolution.
//!
//! A strategy identifier plus its parameters resolve into a
//! [`HandshakeProcedure`]: either an immediate credential (`none`) or a
//! deferred procedure that performs exactly one sign-in attempt per call.

use std::{fmt, future::Future, sync::Arc};

use cloud_core::{CloudBackend, CloudError, Credential, ProviderParams, StrategyKind};
use futures::{FutureExt, future::BoxFuture};
use tracing::debug;

/// Application callback producing a fresh custom-login ticket.
pub type TicketFetcher =
    Arc<dyn Fn() -> BoxFuture<'static, Result<String, CloudError>> + Send + Sync + 'static>;

/// One sign-in attempt.
pub type HandshakeFn =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Credential, CloudError>> + Send + Sync + 'static>;

/// Wrap an async closure as a [`TicketFetcher`].
pub fn ticket_fetcher<F, Fut>(fetch: F) -> TicketFetcher
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, CloudError>> + Send + 'static,
{
    Arc::new(move || fetch().boxed())
}

/// Strategy-specific parameters supplied at construction.
#[derive(Clone, Default)]
pub struct StrategyParams {
    /// Required for `custom-ticket`.
    pub ticket_fetcher: Option<TicketFetcher>,
    /// Required for `provider-based`.
    pub provider: Option<ProviderParams>,
}

impl fmt::Debug for StrategyParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyParams")
            .field("ticket_fetcher_set", &self.ticket_fetcher.is_some())
            .field("provider", &self.provider)
            .finish()
    }
}

/// Procedure run by the coordinator when no session exists.
#[derive(Clone)]
pub enum HandshakeProcedure {
    /// Resolves without any backend call.
    Immediate(Credential),
    /// Performs one sign-in attempt per invocation.
    Deferred(HandshakeFn),
}

impl HandshakeProcedure {
    /// Invoke the procedure once.
    pub async fn run(&self) -> Result<Credential, CloudError> {
        match self {
            Self::Immediate(credential) => Ok(credential.clone()),
            Self::Deferred(handshake) => handshake().await,
        }
    }
}

impl fmt::Debug for HandshakeProcedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate(credential) => f.debug_tuple("Immediate").field(credential).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Resolve a strategy identifier into its handshake procedure.
///
/// Fails with a `Config` error for unknown identifiers or missing parameters.
/// Nothing is called on `backend` until the returned procedure runs.
pub fn resolve(
    identifier: &str,
    params: &StrategyParams,
    backend: Arc<dyn CloudBackend>,
) -> Result<(StrategyKind, HandshakeProcedure), CloudError> {
    let kind = identifier.parse::<StrategyKind>()?;

    let procedure = match kind {
        StrategyKind::None => HandshakeProcedure::Immediate(Credential::anonymous()),
        StrategyKind::CustomTicket => {
            let fetcher = params
                .ticket_fetcher
                .clone()
                .ok_or_else(|| CloudError::missing_strategy_param(kind.as_str(), "ticket_fetcher"))?;
            HandshakeProcedure::Deferred(custom_ticket_handshake(fetcher, backend))
        }
        StrategyKind::Provider => {
            let provider = params
                .provider
                .clone()
                .ok_or_else(|| CloudError::missing_strategy_param(kind.as_str(), "provider"))?;
            HandshakeProcedure::Deferred(provider_handshake(provider, backend))
        }
    };

    Ok((kind, procedure))
}

fn custom_ticket_handshake(fetcher: TicketFetcher, backend: Arc<dyn CloudBackend>) -> HandshakeFn {
    Arc::new(move || {
        let fetcher = Arc::clone(&fetcher);
        let backend = Arc::clone(&backend);
        async move {
            let ticket = fetcher().await.map_err(CloudError::into_handshake)?;
            debug!(ticket_len = ticket.len(), "signing in with custom ticket");
            backend
                .sign_in_with_ticket(&ticket)
                .await
                .map_err(CloudError::into_handshake)
        }
        .boxed()
    })
}

fn provider_handshake(provider: ProviderParams, backend: Arc<dyn CloudBackend>) -> HandshakeFn {
    Arc::new(move || {
        let provider = provider.clone();
        let backend = Arc::clone(&backend);
        async move {
            debug!(provider_id = %provider.provider_id, "signing in with provider");
            backend
                .sign_in_with_provider(&provider)
                .await
                .map_err(CloudError::into_handshake)
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use cloud_core::ErrorCategory;

    use super::*;
    use crate::testing::ScriptedBackend;

    fn counting_fetcher(ticket: &'static str, calls: Arc<AtomicU32>) -> TicketFetcher {
        ticket_fetcher(move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(ticket.to_owned())
            }
        })
    }

    #[test]
    fn rejects_unknown_strategy() {
        let backend = ScriptedBackend::new();
        let err = resolve("magic-link", &StrategyParams::default(), backend.clone())
            .expect_err("unknown strategy must fail");
        assert_eq!(err.category, ErrorCategory::Config);
        assert_eq!(err.code, "unknown_strategy");
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn custom_ticket_requires_fetcher() {
        let err = resolve("custom", &StrategyParams::default(), ScriptedBackend::new())
            .expect_err("missing fetcher must fail");
        assert_eq!(err.code, "missing_strategy_param");
    }

    #[test]
    fn provider_requires_params() {
        let err = resolve("provider-based", &StrategyParams::default(), ScriptedBackend::new())
            .expect_err("missing provider params must fail");
        assert_eq!(err.code, "missing_strategy_param");
    }

    #[tokio::test]
    async fn none_resolves_to_anonymous_credential_without_backend_calls() {
        let backend = ScriptedBackend::new();
        let (kind, procedure) = resolve("none", &StrategyParams::default(), backend.clone())
            .expect("none must resolve");
        assert_eq!(kind, StrategyKind::None);

        let credential = procedure.run().await.expect("immediate procedure");
        assert!(credential.is_anonymous());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn resolution_has_no_side_effects_and_each_run_is_one_attempt() {
        let backend = ScriptedBackend::new();
        let calls = Arc::new(AtomicU32::new(0));
        let params = StrategyParams {
            ticket_fetcher: Some(counting_fetcher("T1", Arc::clone(&calls))),
            provider: None,
        };

        let (_, procedure) = resolve("custom-ticket", &params, backend.clone())
            .expect("custom strategy must resolve");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let credential = procedure.run().await.expect("handshake should succeed");
        assert_eq!(credential.token(), Some("cred-T1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls(), vec!["sign_in_with_ticket:T1".to_owned()]);
    }

    #[tokio::test]
    async fn ticket_fetch_failure_is_a_handshake_failure() {
        let params = StrategyParams {
            ticket_fetcher: Some(ticket_fetcher(|| async {
                Err(CloudError::new(
                    ErrorCategory::Network,
                    "ticket_endpoint_down",
                    "503",
                ))
            })),
            provider: None,
        };
        let backend = ScriptedBackend::new();
        let (_, procedure) =
            resolve("custom", &params, backend.clone()).expect("custom strategy must resolve");

        let err = procedure.run().await.expect_err("fetch failure must surface");
        assert_eq!(err.category, ErrorCategory::Handshake);
        assert_eq!(err.code, "ticket_endpoint_down");
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn provider_strategy_signs_in_with_params() {
        let backend = ScriptedBackend::new();
        let params = StrategyParams {
            ticket_fetcher: None,
            provider: Some(ProviderParams {
                provider_id: "wx-open".to_owned(),
                scope: "snsapi_base".to_owned(),
            }),
        };

        let (kind, procedure) =
            resolve("provider", &params, backend.clone()).expect("provider must resolve");
        assert_eq!(kind, StrategyKind::Provider);

        let credential = procedure.run().await.expect("provider sign-in");
        assert_eq!(credential.token(), Some("cred-wx-open"));
        assert_eq!(
            backend.calls(),
            vec!["sign_in_with_provider:wx-open".to_owned()]
        );
    }
}
