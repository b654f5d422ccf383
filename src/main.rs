//! Portal Cache - debug panel server
//!
//! Runs a cache manager with its expiry sweep and serves the maintenance
//! endpoints (stats, entry listing, invalidation, clearing) over HTTP.

use std::net::SocketAddr;

use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use portal_cache::api::create_router;
use portal_cache::{AppState, CacheConfig};

/// Main entry point for the cache debug panel.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the cache manager and log fetch latency from cache events
/// 4. Start the background expiry sweep
/// 5. Serve the debug router on the configured port
/// 6. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portal_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Portal Cache debug panel");

    let config = CacheConfig::from_env();
    info!(
        "Configuration loaded: default_ttl={}ms, sweep_interval={}s, failure_ttl_multiplier={}, port={}",
        config.ttl_policy.fallback().as_millis(),
        config.sweep_interval.as_secs(),
        config.failure_ttl_multiplier,
        config.server_port
    );

    let state = AppState::from_config(&config);
    // Failures are already logged by the manager; this adds fetch latency
    state.cache.on_event(|event| {
        if let Some(elapsed) = event.duration {
            debug!(
                key = %event.key,
                outcome = %event.kind,
                elapsed_ms = elapsed.as_millis() as u64,
                "Fetch finished"
            );
        }
    });
    info!("Cache manager initialized");

    let sweep_handle = state.cache.start_sweeper();
    info!("Background expiry sweep started");

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sweep_handle))
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the sweep task and allows graceful shutdown.
async fn shutdown_signal(sweep_handle: Option<JoinHandle<()>>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    if let Some(handle) = sweep_handle {
        handle.abort();
        warn!("Expiry sweep aborted");
    }
}
