//! Episode acquisition worker binary (poll loop only).

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use anistash_worker::WorkerStack;

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

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

    info!("Starting anistash-worker");

    let stack = match WorkerStack::from_env() {
        Ok(stack) => stack,
        Err(e) => {
            error!("Failed to build worker: {}", e);
            std::process::exit(1);
        }
    };
    info!("Worker config: {:?}", stack.config);

    let scheduler = stack.scheduler.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        scheduler.shutdown();
    });

    if let Err(e) = stack.scheduler.run().await {
        error!("Scheduler error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
