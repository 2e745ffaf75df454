mod config;
mod logging;

use std::{process::ExitCode, time::Duration};

use cloud_core::{
    CloudError, Credential, ErrorCategory, RetryPolicy, StateStream, StrategyKind, WatchQuery,
    WatchState,
};
use cloud_hooks::CloudHooks;
use cloud_memory::InMemoryCloud;
use config::SmokeConfig;
use futures::future::{join_all, try_join_all};
use serde_json::json;
use tracing::{debug, error, info, warn};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);
const WATCH_COLLECTION: &str = "smoke_orders";

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    info!("starting cloud-smoke");

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            eprintln!("cloud-smoke: {err}");
            return ExitCode::from(2);
        }
    };

    match run(&config).await {
        Ok(()) => {
            info!("smoke run finished");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(category = ?err.category, code = %err.code, "smoke run failed: {}", err.message);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &SmokeConfig) -> Result<(), CloudError> {
    let mut cloud = InMemoryCloud::new();
    if let Some(ticket) = &config.ticket {
        cloud = cloud.with_tickets([ticket.clone()]);
    }
    if config.strategy == StrategyKind::None {
        cloud = cloud.with_anonymous_access();
    }
    let hooks = CloudHooks::new(config.hooks_config(), &cloud)?;

    let login = hooks.login_state();
    login.activate();
    let policy = RetryPolicy::new(250, 5_000, config.login_attempts);
    let credential = login_with_retry(&hooks, policy).await?;
    info!(
        strategy = %hooks.strategy(),
        anonymous = credential.is_anonymous(),
        "session established"
    );

    // Late callers must observe the same credential without another handshake.
    let again = join_all((0..3).map(|_| hooks.ensure_authenticated())).await;
    if again.iter().any(|result| result.as_ref() != Ok(&credential)) {
        return Err(smoke_failure("credential_mismatch", "callers observed different credentials"));
    }
    let published = wait_for(login.subscribe(), "login binding", |state| {
        state.established || state.error.is_some()
    })
    .await?;
    debug!(established = published.established, "login binding settled");

    let path = "smoke/hello.txt";
    let upload = hooks.upload();
    let uploaded = upload.trigger(path, b"hello from cloud-smoke".to_vec()).await?;
    info!(file_id = %uploaded.file_id, progress = ?upload.snapshot().progress, "upload finished");

    let file_url = hooks.file_url(path);
    file_url.activate();
    let resolved = wait_for(file_url.subscribe(), "file url", |state| !state.loading).await?;
    match (resolved.url, resolved.error) {
        (Some(url), _) => info!(url = %url.url, max_age_secs = url.max_age_secs, "temporary url"),
        (None, Some(err)) => return Err(err),
        (None, None) => return Err(smoke_failure("temp_url_missing", "no url resolved")),
    }

    run_watch(&hooks).await?;

    hooks.sign_out().await?;
    info!(phase = ?hooks.phase(), "signed out");
    Ok(())
}

async fn login_with_retry(
    hooks: &CloudHooks,
    policy: RetryPolicy,
) -> Result<Credential, CloudError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match hooks.ensure_authenticated().await {
            Ok(credential) => return Ok(credential),
            Err(err) => {
                let Some(delay) = policy.next_delay(attempts, &err) else {
                    return Err(err);
                };
                warn!(
                    attempts,
                    code = %err.code,
                    delay_ms = delay.as_millis() as u64,
                    "login failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn run_watch(hooks: &CloudHooks) -> Result<(), CloudError> {
    let watch = hooks.watch(WatchQuery::new(WATCH_COLLECTION, json!({ "status": "open" })));
    watch.activate().await;
    let initial = wait_for(watch.subscribe(), "initial snapshot", |state| {
        !state.connecting || state.error.is_some()
    })
    .await?;
    check_watch(&initial)?;

    let db = hooks.database().await?;
    let ids = try_join_all([
        db.add(WATCH_COLLECTION, json!({ "status": "open", "item": "tea" })),
        db.add(WATCH_COLLECTION, json!({ "status": "closed", "item": "cake" })),
    ])
    .await?;
    debug!(?ids, "seeded documents");

    let open = wait_for(watch.subscribe(), "open orders", |state| {
        state.snapshot.as_ref().is_some_and(|s| !s.docs.is_empty())
    })
    .await?;
    info!(docs = docs_len(&open), "open orders observed");

    watch
        .set_key(WatchQuery::new(WATCH_COLLECTION, json!({ "status": "closed" })))
        .await;
    let closed = wait_for(watch.subscribe(), "closed orders", |state| {
        !state.connecting || state.error.is_some()
    })
    .await?;
    check_watch(&closed)?;
    info!(docs = docs_len(&closed), "closed orders observed");

    for id in &ids {
        db.remove(WATCH_COLLECTION, id).await?;
    }
    watch.dispose().await;
    Ok(())
}

fn check_watch(state: &WatchState) -> Result<(), CloudError> {
    match &state.error {
        Some(err) => Err(err.clone()),
        None => Ok(()),
    }
}

fn docs_len(state: &WatchState) -> usize {
    state.snapshot.as_ref().map_or(0, |snapshot| snapshot.docs.len())
}

async fn wait_for<T: Clone>(
    mut rx: StateStream<T>,
    what: &str,
    predicate: impl FnMut(&T) -> bool,
) -> Result<T, CloudError> {
    match tokio::time::timeout(STEP_TIMEOUT, rx.wait_for(predicate)).await {
        Ok(Ok(state)) => Ok(state.clone()),
        Ok(Err(_)) => Err(smoke_failure("state_closed", format!("{what} stopped publishing"))),
        Err(_) => Err(smoke_failure("smoke_timeout", format!("timed out waiting for {what}"))),
    }
}

fn smoke_failure(code: &str, message: impl Into<String>) -> CloudError {
    CloudError::new(ErrorCategory::Internal, code, message)
}
