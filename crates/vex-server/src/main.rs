//! VEX Gatekeeper — standalone server binary.
//!
//! The `Signer`, `Store`, `LedgerWorker`, `PolicyEngine`, `ApprovalGateway`,
//! and upstream client are all constructed here and injected into one
//! `vex_router::AppState`, rather than living behind in-process singletons.
//! Binds two listeners — the JSON-RPC proxy surface and the localhost
//! control API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use vex_core::Signer;
use vex_persist::{SqliteLedgerStore, Store};
use vex_queue::LedgerWorker;
use vex_router::{
    control_router, proxy_router, ApprovalGateway, AppState, GatekeeperConfig, PolicyEngine,
    ReqwestUpstream,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = std::env::var("VEX_GATEKEEPER_CONFIG").ok().map(PathBuf::from);
    let config = GatekeeperConfig::load(config_path.as_deref()).context("failed to load gatekeeper configuration")?;

    info!(
        proxy = %format!("{}:{}", config.proxy_listener.host, config.proxy_listener.port),
        control = %format!("{}:{}", config.control_listener.host, config.control_listener.port),
        upstream = %config.upstream_url,
        "starting vex-gatekeeper"
    );

    let signer = Arc::new(
        Signer::load_or_generate(&config.signing_key_path)
            .with_context(|| format!("failed to load signing key at {}", config.signing_key_path.display()))?,
    );

    let sqlite_store = Arc::new(
        SqliteLedgerStore::connect(&config.database_url)
            .await
            .with_context(|| format!("failed to open ledger store at {}", config.database_url))?,
    );
    let store: Arc<dyn Store> = sqlite_store.clone();

    let run_id = match store.get_run_id().await? {
        Some(existing) => {
            info!(run_id = %existing, "resuming existing run");
            existing
        }
        None => {
            let fresh = uuid::Uuid::new_v4().to_string();
            info!(run_id = %fresh, "no prior run found; starting a fresh run");
            fresh
        }
    };

    let worker = LedgerWorker::start_with_capacity(sqlite_store, signer.clone(), run_id.clone(), config.queue_capacity)
        .await
        .context("failed to start ledger worker")?;

    let policy = Arc::new(match &config.policy_path {
        Some(path) => PolicyEngine::load(path).with_context(|| format!("failed to load policy file {}", path.display()))?,
        None => {
            warn!("no policy_path configured; defaulting to allow-all with no redaction");
            PolicyEngine::empty()
        }
    });

    let gateway = Arc::new(ApprovalGateway::new());
    let upstream: Arc<dyn vex_router::Upstream> = Arc::new(
        ReqwestUpstream::new(config.upstream_url.clone(), config.upstream_timeout)
            .context("failed to build upstream HTTP client")?,
    );

    let state = Arc::new(AppState::new(
        worker,
        store,
        policy.clone(),
        gateway,
        upstream,
        run_id,
        config.stall_deadline,
        config.body_limit_bytes,
    ));

    spawn_reload_on_sighup(policy, config.policy_path.clone());

    let proxy_addr = format!("{}:{}", config.proxy_listener.host, config.proxy_listener.port);
    let control_addr = format!("{}:{}", config.control_listener.host, config.control_listener.port);

    let proxy_listener = tokio::net::TcpListener::bind(&proxy_addr)
        .await
        .with_context(|| format!("failed to bind proxy listener on {proxy_addr}"))?;
    let control_listener = tokio::net::TcpListener::bind(&control_addr)
        .await
        .with_context(|| format!("failed to bind control listener on {control_addr}"))?;

    let proxy_app = proxy_router(state.clone());
    let control_app = control_router(state.clone());

    info!(addr = %proxy_addr, "JSON-RPC proxy surface listening");
    info!(addr = %control_addr, "control API listening");

    let proxy_server = axum::serve(proxy_listener, proxy_app).with_graceful_shutdown(shutdown_signal());
    let control_server = axum::serve(control_listener, control_app).with_graceful_shutdown(shutdown_signal());

    tokio::try_join!(
        async { proxy_server.await.context("proxy listener failed") },
        async { control_server.await.context("control listener failed") },
    )?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

/// Waits for Ctrl+C or SIGTERM. `axum`'s graceful shutdown stops accepting
/// connections, in-flight requests finish (submitting whatever ledger
/// events they still owe), and only then does the process exit.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

/// Reload the policy document on `SIGHUP`. The `PolicyEngine`'s `ArcSwap`
/// makes this safe to do concurrently with live `evaluate` calls.
#[cfg(unix)]
fn spawn_reload_on_sighup(policy: Arc<PolicyEngine>, policy_path: Option<PathBuf>) {
    tokio::spawn(async move {
        let Some(path) = policy_path else {
            return;
        };
        let Ok(mut stream) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) else {
            warn!("failed to install SIGHUP handler; policy reload disabled");
            return;
        };
        loop {
            stream.recv().await;
            match policy.reload(&path) {
                Ok(()) => info!(path = %path.display(), "policy reloaded on SIGHUP"),
                Err(e) => warn!(path = %path.display(), error = %e, "policy reload failed"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_sighup(_policy: Arc<PolicyEngine>, _policy_path: Option<PathBuf>) {}
