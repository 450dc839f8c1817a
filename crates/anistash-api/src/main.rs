//! API server binary with the embedded scheduler.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use anistash_api::{create_router, metrics, ApiConfig, AppState};
use anistash_worker::{Scheduler, WorkerStack};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("anistash=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting anistash-api");

    let config = ApiConfig::from_env();
    info!("API config: {:?}", config);
    if !config.trigger_auth_enabled() {
        warn!("No trigger secret configured; /trigger accepts unauthenticated requests");
    }

    let stack = match WorkerStack::from_env() {
        Ok(stack) => stack,
        Err(e) => {
            error!("Failed to build worker: {}", e);
            std::process::exit(1);
        }
    };
    info!("Worker config: {:?}", stack.config);

    let metrics_handle = if config.metrics_enabled {
        match metrics::init_metrics() {
            Ok(handle) => {
                info!("Prometheus metrics enabled at /metrics");
                Some(handle)
            }
            Err(e) => {
                warn!("Failed to install Prometheus recorder: {}", e);
                None
            }
        }
    } else {
        None
    };

    let scheduler = Arc::clone(&stack.scheduler);
    let worker = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move {
            if let Err(e) = scheduler.run().await {
                error!("Scheduler error: {}", e);
            }
        }
    });

    let state = AppState::from_stack(config.clone(), &stack);
    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid bind address: {}", e);
            std::process::exit(1);
        }
    };

    info!("Listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&scheduler)))
        .await
    {
        error!("Server error: {}", e);
    }

    scheduler.shutdown();
    if let Err(e) = worker.await {
        error!("Scheduler task panicked: {}", e);
    }

    info!("Server shutdown complete");
}

async fn shutdown_signal(scheduler: Arc<Scheduler>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Received shutdown signal");
    scheduler.shutdown();
}
