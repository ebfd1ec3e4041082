//! Generic session loop shared by the Classic and BLE handlers.
//!
//! One session owns one transport. The loop multiplexes three sources onto
//! it: inbound request frames, worker notifications queued through the
//! [`Notifier`], and a periodic liveness ping. Worker notifications are
//! drained even while a request handler is awaited, so a worker blocked on
//! [`Notifier::notify`] can never deadlock a request that waits on worker
//! state.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use btlink_types::method;
use btlink_types::rpc::{Request, Response, notification};

use crate::error::{Error, Result};
use crate::transport::{MessageTransport, Notifier, Outbound, notify_channel};

/// Quiet period after which a liveness ping is sent, for handlers that ask
/// for one. A client that cannot be written to is gone and the session ends.
pub const PING_INTERVAL: Duration = Duration::from_secs(5);

const NOTIFY_QUEUE: usize = 32;

/// Protocol logic behind a session: request dispatch plus lifecycle hooks.
#[async_trait::async_trait]
pub trait SessionHandler: Send {
    /// Handle one request. Errors become a JSON-RPC error response for the
    /// triggering request; the session keeps running.
    async fn handle_request(&mut self, method: &str, params: Value) -> Result<Value>;

    /// Called before dispatching a request.
    fn begin_request(&mut self) {}

    /// Called after the response (if any) has been sent.
    fn end_request(&mut self) {}

    /// True when the session should ping the client after [`PING_INTERVAL`]
    /// of outbound silence. The ping is the only way a session whose worker
    /// rarely notifies can detect a dead client.
    fn wants_ping(&self) -> bool {
        false
    }

    /// True once the handler has reached its terminal state.
    fn finished(&self) -> bool;

    /// Release device resources. Called exactly once, when the session ends.
    async fn shutdown(&mut self);
}

/// Drives one transport with one protocol handler until either side ends.
pub struct Session<T, H> {
    transport: T,
    handler: H,
    outbound_rx: mpsc::Receiver<Outbound>,
    /// Time of the last successful outbound send; drives the liveness ping.
    last_send: Instant,
}

impl<T: MessageTransport, H: SessionHandler> Session<T, H> {
    /// Build a session. The handler is constructed against the notifier its
    /// workers will push through.
    pub fn new(transport: T, build: impl FnOnce(Notifier) -> H) -> Self {
        let (notifier, outbound_rx) = notify_channel(NOTIFY_QUEUE);
        Self {
            transport,
            handler: build(notifier),
            outbound_rx,
            last_send: Instant::now(),
        }
    }

    /// Run the session to completion. Device resources are released before
    /// returning, whatever the outcome.
    pub async fn run(mut self) -> Result<()> {
        let result = self.serve().await;
        self.handler.shutdown().await;
        result
    }

    async fn serve(&mut self) -> Result<()> {
        loop {
            let ping_at = self.last_send + PING_INTERVAL;
            tokio::select! {
                frame = self.transport.recv() => {
                    match frame? {
                        Some(text) => self.handle_frame(text).await?,
                        None => {
                            debug!("client closed the connection");
                            return Ok(());
                        }
                    }
                }
                Some(out) = self.outbound_rx.recv() => {
                    self.deliver(out).await?;
                }
                _ = tokio::time::sleep_until(ping_at), if self.handler.wants_ping() => {
                    let frame = notification(method::PING, json!({}));
                    self.transport.send(serde_json::to_string(&frame)?).await?;
                    self.last_send = Instant::now();
                }
            }
            if self.handler.finished() {
                return Ok(());
            }
        }
    }

    async fn handle_frame(&mut self, text: String) -> Result<()> {
        let request = match Request::parse(&text) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "dropping malformed frame");
                return Ok(());
            }
        };
        let Request {
            method, params, id, ..
        } = request;
        debug!(%method, has_id = id.is_some(), "request");

        self.handler.begin_request();

        // Keep draining worker notifications while the handler runs; a
        // worker blocked in notify() may be exactly what the handler is
        // waiting on. Gated messages are still dropped here, so nothing
        // slips in between gate-close and the pending response.
        let outcome = {
            let fut = self.handler.handle_request(&method, params);
            tokio::pin!(fut);
            loop {
                tokio::select! {
                    outcome = &mut fut => break outcome,
                    Some(out) = self.outbound_rx.recv() => {
                        if gate_closed(&out) {
                            debug!("gate closed; dropping notification");
                            let _ = out.ack.send(Ok(()));
                            continue;
                        }
                        match self.transport.send(out.text).await {
                            Ok(()) => {
                                self.last_send = Instant::now();
                                let _ = out.ack.send(Ok(()));
                            }
                            Err(err) => {
                                let _ = out.ack.send(Err(Error::TransportClosed));
                                return Err(err);
                            }
                        }
                    }
                }
            }
        };

        if let Some(id) = id {
            let response = match outcome {
                Ok(value) => Response::result(id, value),
                Err(err) => {
                    warn!(%method, %err, "request failed");
                    Response::error(id, err.to_string())
                }
            };
            self.transport.send(serde_json::to_string(&response)?).await?;
            self.last_send = Instant::now();
        } else if let Err(err) = outcome {
            warn!(%method, %err, "request without id failed; no response sent");
        }

        self.handler.end_request();
        Ok(())
    }

    async fn deliver(&mut self, out: Outbound) -> Result<()> {
        if gate_closed(&out) {
            debug!("gate closed; dropping notification");
            let _ = out.ack.send(Ok(()));
            return Ok(());
        }
        match self.transport.send(out.text).await {
            Ok(()) => {
                self.last_send = Instant::now();
                let _ = out.ack.send(Ok(()));
                Ok(())
            }
            Err(err) => {
                let _ = out.ack.send(Err(Error::TransportClosed));
                Err(err)
            }
        }
    }
}

fn gate_closed(out: &Outbound) -> bool {
    out.gate.as_ref().is_some_and(|gate| !gate.is_open())
}
