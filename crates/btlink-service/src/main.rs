//! btlink service - WebSocket bridge to Bluetooth devices.
//!
//! Run with: `cargo run -p btlink-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use btlink_core::btle::BtleRadio;
use btlink_core::radio::{BleRadio, ClassicRadio};
use btlink_service::{AppState, Config, ws};

/// btlink service - WebSocket bridge to Bluetooth devices.
#[derive(Parser, Debug)]
#[command(name = "btlink-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Disable the BLE endpoint.
    #[arg(long)]
    no_ble: bool,

    /// Disable the Bluetooth Classic endpoint.
    #[arg(long)]
    no_bt: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("btlink_service=info".parse()?)
                .add_directive("btlink_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load_validated(path)?,
        None => Config::default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    config.validate()?;

    let ble = if args.no_ble { None } else { open_ble().await };
    let classic = if args.no_bt { None } else { open_classic().await };
    let state = AppState::new(config.clone(), ble, classic);

    let app = Router::new()
        .merge(ws::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr: SocketAddr = config.server.bind.parse()?;
    info!("Starting bridge on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Open the BLE radio; the endpoint stays up (answering 503) if it fails.
async fn open_ble() -> Option<Arc<dyn BleRadio>> {
    match BtleRadio::new().await {
        Ok(radio) => Some(Arc::new(radio)),
        Err(err) => {
            warn!(%err, "BLE adapter unavailable; /session/ble will answer 503");
            None
        }
    }
}

#[cfg(target_os = "linux")]
async fn open_classic() -> Option<Arc<dyn ClassicRadio>> {
    match btlink_core::bluez::BluezRadio::new().await {
        Ok(radio) => Some(Arc::new(radio)),
        Err(err) => {
            warn!(%err, "BlueZ unavailable; /session/bt will answer 503");
            None
        }
    }
}

#[cfg(not(target_os = "linux"))]
async fn open_classic() -> Option<Arc<dyn ClassicRadio>> {
    info!("Bluetooth Classic is not supported on this platform; /session/bt will answer 503");
    None
}
