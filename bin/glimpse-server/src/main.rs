//! glimpse-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Construct the captioning backend; model problems abort startup here.
//! 4. Start the caption task runner (bounded queue + background worker).
//! 5. Build the Axum router and start the HTTP server with graceful shutdown.
//! 6. Stop the task runner.

mod config;
mod error;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use glimpse_core::backend::mock::MockBackend;
use glimpse_core::backend::remote::{RemoteBackend, RemoteOptions};
use glimpse_core::backend::{BackendKind, CaptionBackend};
use glimpse_core::{RunnerOptions, TaskRunner};

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env()?;

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: GLIMPSE_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "glimpse-server starting");
    info!(
        backend = %cfg.backend,
        device = %cfg.device,
        queue_capacity = cfg.queue_capacity,
        max_image_size = cfg.max_image_size,
        "configuration loaded"
    );

    // ── 3. Captioning backend ────────────────────────────────────────────────────
    // Weights load (or remote clients build) here, so a bad model name or a
    // missing download kills the process before it starts accepting requests.
    let backend = build_backend(&cfg)?;
    info!(model = backend.name(), "caption backend ready");

    // ── 4. Caption task runner ───────────────────────────────────────────────────
    let runner = TaskRunner::start(
        Arc::clone(&backend),
        RunnerOptions {
            queue_capacity: cfg.queue_capacity,
            poll_interval:  Duration::from_millis(cfg.poll_interval_ms),
        },
    );

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        backend,
        runner: runner.clone(),
    });

    let app = routes::build(state);
    let addr: SocketAddr = cfg
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address '{}'", cfg.bind_address))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ── 6. Drain ────────────────────────────────────────────────────────────────
    // Stop the worker; anything still PENDING or PROCESSING is abandoned.
    runner.stop().await;

    info!("glimpse-server stopped");
    Ok(())
}

/// Construct the backend named by the configuration.
fn build_backend(cfg: &Config) -> anyhow::Result<Arc<dyn CaptionBackend>> {
    let backend: Arc<dyn CaptionBackend> = match cfg.backend {
        BackendKind::Mock => Arc::new(MockBackend::default()),

        BackendKind::Remote => {
            let base_url = cfg
                .remote_url
                .clone()
                .context("GLIMPSE_REMOTE_URL is required for the remote backend")?;
            let model = cfg
                .remote_model
                .clone()
                .context("GLIMPSE_REMOTE_MODEL is required for the remote backend")?;
            Arc::new(RemoteBackend::new(RemoteOptions {
                base_url,
                model,
                api_key: cfg.remote_api_key.clone(),
            })?)
        }

        #[cfg(feature = "blip")]
        BackendKind::Blip => {
            Arc::new(glimpse_core::backend::blip::BlipBackend::load(&cfg.device)?)
        }
        #[cfg(not(feature = "blip"))]
        BackendKind::Blip => anyhow::bail!(
            "this build does not include the blip backend; rebuild with `--features blip`"
        ),
    };
    Ok(backend)
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c    => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
