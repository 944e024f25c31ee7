//! Stream Gateway
//!
//! Entry point for the camera-to-HLS conversion gateway.

use std::net::SocketAddr;
use std::sync::Arc;
use stream_gateway::auth::capability::CapabilityService;
use stream_gateway::config::Config;
use stream_gateway::observability::metrics::init_metrics_recorder;
use stream_gateway::routes::{self, AppState};
use stream_gateway::services::{RestDirectoryClient, SessionManager};
use stream_gateway::transcoder::FfmpegLauncher;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stream_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Stream Gateway");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        public_base_url = %config.public_base_url,
        output_root = %config.output_root.display(),
        transcoder_bin = %config.transcoder_bin,
        capability_ttl_seconds = config.capability_ttl_seconds,
        startup_timeout_ms = config.startup_timeout_ms,
        "Configuration loaded successfully"
    );

    // Must happen before any metric is recorded
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        std::io::Error::other(e)
    })?;

    tokio::fs::create_dir_all(&config.output_root)
        .await
        .map_err(|e| {
            error!("Failed to create output root: {}", e);
            e
        })?;

    let directory = Arc::new(
        RestDirectoryClient::new(&config.directory_url, config.directory_service_key.clone())
            .map_err(|e| {
                error!("Failed to create directory client: {}", e);
                e
            })?,
    );
    let capabilities = Arc::new(CapabilityService::new(
        &config.streaming_secret,
        config.jwt_clock_skew(),
    ));
    let launcher = Arc::new(FfmpegLauncher::new(config.transcoder_bin.clone()));

    let sessions = Arc::new(SessionManager::new(
        &config,
        launcher,
        capabilities,
        directory.clone(),
        directory,
    ));

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState {
        config,
        sessions: Arc::clone(&sessions),
    });
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Stream Gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(Arc::clone(&sessions)))
    .await;

    // Runs even if the server failed; a no-op after a clean signal-driven sweep
    let remaining = sessions.shutdown().await;
    if remaining > 0 {
        info!(remaining, "Terminated sessions left after server stop");
    }

    serve_result?;
    info!("Stream Gateway shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
///
/// Closes the registry and tears down every session before the server
/// stops accepting connections, so in-flight start requests fail fast
/// instead of holding the drain open.
async fn shutdown_signal(sessions: Arc<SessionManager>) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    let terminated = sessions.shutdown().await;
    info!(terminated, "Sessions torn down");
}
