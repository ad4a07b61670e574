//! Recording relay over WebSocket.
//!
//! Run with: cargo run -p relay-server -- --bind 127.0.0.1:3000
//!
//! Each WebSocket connection becomes an execution context whose origin is
//! taken from the `Origin` header. Recorder state is only reachable through
//! the gated recording API on `/ws`.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context as _;
use axum::Router;
use clap::Parser;
use shellbus_core::{ChannelRegistry, SessionSink};
use shellbus_recorder::{Recorder, RecorderConfig, storage::FileSink};
use shellbus_transport::{RecordingService, websocket::create_ws_router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "relay-server", version, about = "Serve the recording API over WebSocket")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "SHELLBUS_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Recorder configuration file (TOML).
    #[arg(long, env = "SHELLBUS_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => RecorderConfig::load(path)?,
        None => RecorderConfig::default(),
    };

    let sink = FileSink::from_config(&config);
    tracing::info!(dir = %sink.dir().display(), "Exports go to the recordings directory");

    let recorder = Arc::new(Recorder::new(config));
    let _changes = recorder.subscribe({
        let recorder = Arc::downgrade(&recorder);
        move || {
            if let Some(recorder) = recorder.upgrade() {
                tracing::debug!(
                    recording = recorder.is_recording(),
                    events = recorder.event_count(),
                    "Recorder changed"
                );
            }
        }
    });

    let service = Arc::new(RecordingService::new(
        Arc::new(ChannelRegistry::new()),
        Arc::clone(&recorder),
        Arc::new(sink) as Arc<dyn SessionSink>,
    ));

    let router = app(service);

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    tracing::info!("Server listening on ws://{}/ws", args.bind);

    axum::serve(listener, router).await?;
    Ok(())
}

/// The relay's routes. Nothing is served outside the gated `/ws` bridge.
fn app(service: Arc<RecordingService>) -> Router {
    Router::new().merge(create_ws_router(service))
}
