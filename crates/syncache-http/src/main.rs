//! syncache-watch: subscribes to one resource and prints every change.

use anyhow::Context;
use serde_json::Value;
use syncache_engine::{EntryState, ResourceOptions, ResourceState, SyncClient};
use syncache_http::{HttpLoader, Settings};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::load().context("failed to load settings")?;

    tracing::info!("Starting syncache-watch v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Base URL: {}", settings.base_url);
    tracing::info!(
        "Watching: {} {} (poll interval {}ms)",
        settings.watch.method,
        settings.watch.path,
        settings.watch.poll_interval_ms
    );

    let loader = HttpLoader::from_settings(&settings).context("failed to build HTTP client")?;
    let client = SyncClient::with_loader(loader, settings.engine.clone());

    let mut options = ResourceOptions::new().consumer("syncache-watch");
    if let Some(interval) = settings.watch.poll_interval() {
        options = options.poll_interval(interval);
    }

    let mut handle = client.use_resource(
        settings.watch.method,
        &settings.watch.path,
        &settings.watch.params(),
        options,
    )?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            change = handle.changed() => match change {
                Some(state) => print_state(&state)?,
                None => break,
            },
        }
    }

    drop(handle);
    client.shutdown();
    Ok(())
}

fn print_state(state: &ResourceState<Value>) -> anyhow::Result<()> {
    match state.state {
        EntryState::Fresh => {
            if let Some(data) = &state.data {
                println!("{}", serde_json::to_string_pretty(data.as_ref())?);
            }
        }
        EntryState::Failed => {
            if let Some(error) = &state.error {
                eprintln!("error: {}", error);
            }
        }
        other => tracing::debug!(state = ?other, revision = state.revision, "State changed"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
