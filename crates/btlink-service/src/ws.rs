//! WebSocket endpoints: one session per connection.
//!
//! `/session/ble` and `/session/bt` each upgrade to a WebSocket and run a
//! [`Session`] over it until the client disconnects or the session fails.
//! Session failures are logged per connection and never take the service
//! down.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{info, warn};

use btlink_core::ble::BleHandler;
use btlink_core::classic::ClassicHandler;
use btlink_core::error::{Error, Result};
use btlink_core::session::Session;
use btlink_core::transport::MessageTransport;

use crate::state::AppState;

/// Create the session router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/session/ble", get(ble_handler))
        .route("/session/bt", get(bt_handler))
}

async fn ble_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(radio) = state.ble.clone() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "BLE is unavailable").into_response();
    };
    ws.on_upgrade(move |socket| async move {
        info!("BLE session started");
        let session = Session::new(WsTransport::new(socket), |notifier| {
            BleHandler::new(radio, notifier)
        });
        if let Err(err) = session.run().await {
            warn!(%err, "BLE session ended with error");
        } else {
            info!("BLE session closed");
        }
    })
}

async fn bt_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(radio) = state.classic.clone() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Bluetooth Classic is unavailable")
            .into_response();
    };
    let channel = state.config.session.rfcomm_channel;
    ws.on_upgrade(move |socket| async move {
        info!("Classic session started");
        let session = Session::new(WsTransport::new(socket), |notifier| {
            ClassicHandler::new(radio, notifier, channel)
        });
        if let Err(err) = session.run().await {
            warn!(%err, "Classic session ended with error");
        } else {
            info!("Classic session closed");
        }
    })
}

/// [`MessageTransport`] over an axum WebSocket.
pub struct WsTransport {
    socket: WebSocket,
}

impl WsTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait::async_trait]
impl MessageTransport for WsTransport {
    async fn recv(&mut self) -> Result<Option<String>> {
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Pongs are generated by axum; binary frames are not part
                // of the protocol and are ignored.
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    warn!(%err, "WebSocket receive error");
                    return Err(Error::TransportClosed);
                }
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.socket
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| Error::TransportClosed)
    }
}
