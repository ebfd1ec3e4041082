//! Message transport abstraction and the worker-to-transport notify bridge.
//!
//! A session owns exactly one [`MessageTransport`] and drives it from a
//! single task. Background workers must never write the transport directly;
//! they hand outbound notifications to the session task through a
//! [`Notifier`], which pairs each message with a one-shot acknowledgment so
//! the worker can observe delivery (or transport loss) synchronously.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::gate::DeliveryGate;

/// One bidirectional text-message channel to a control client.
#[async_trait]
pub trait MessageTransport: Send {
    /// Receive the next text frame. `Ok(None)` means the peer closed the
    /// connection cleanly.
    async fn recv(&mut self) -> Result<Option<String>>;

    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<()>;
}

/// An outbound notification queued by a worker, carrying the delivery
/// acknowledgment the worker blocks on.
pub(crate) struct Outbound {
    pub(crate) text: String,
    /// When set, the session task re-checks the gate at send time and drops
    /// the message if it has closed since the worker queued it.
    pub(crate) gate: Option<DeliveryGate>,
    pub(crate) ack: oneshot::Sender<Result<()>>,
}

/// Handle workers use to push device events to the control client.
///
/// Cloneable and usable from any task. [`Notifier::notify`] completes only
/// once the session task has performed the transport send (or the transport
/// is gone), so the transport is never written from two tasks at once.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Outbound>,
}

/// Create a notifier and the receiving end the session loop drains.
pub(crate) fn notify_channel(capacity: usize) -> (Notifier, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Notifier { tx }, rx)
}

impl Notifier {
    /// Send a server-push notification (no correlation id) and wait for
    /// delivery. Any failure means the control client is unreachable.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.queue(method, params, None).await
    }

    /// Like [`Notifier::notify`], but delivery is subject to the gate: the
    /// session task checks it immediately before the transport send and
    /// drops the message if the gate is closed. A dropped message still
    /// resolves with `Ok(())`; only transport loss is an error.
    pub async fn notify_gated(
        &self,
        method: &str,
        params: Value,
        gate: &DeliveryGate,
    ) -> Result<()> {
        self.queue(method, params, Some(gate.clone())).await
    }

    async fn queue(&self, method: &str, params: Value, gate: Option<DeliveryGate>) -> Result<()> {
        let frame = btlink_types::rpc::notification(method, params);
        let text = serde_json::to_string(&frame)?;
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Outbound {
                text,
                gate,
                ack: ack_tx,
            })
            .await
            .map_err(|_| Error::TransportClosed)?;
        ack_rx.await.map_err(|_| Error::TransportClosed)?
    }
}

/// In-memory transport over a pair of channels.
///
/// Used by the test suites and by anything that wants to drive a session
/// without a network socket.
pub struct ChannelTransport {
    inbound: mpsc::Receiver<String>,
    outbound: mpsc::Sender<String>,
}

impl ChannelTransport {
    /// Returns the transport plus the client-side handles: a sender for
    /// frames into the session and a receiver for frames out of it.
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<String>, mpsc::Receiver<String>) {
        let (to_session, inbound) = mpsc::channel(capacity);
        let (outbound, from_session) = mpsc::channel(capacity);
        (Self { inbound, outbound }, to_session, from_session)
    }
}

#[async_trait]
impl MessageTransport for ChannelTransport {
    async fn recv(&mut self) -> Result<Option<String>> {
        Ok(self.inbound.recv().await)
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.outbound
            .send(text)
            .await
            .map_err(|_| Error::TransportClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn notify_blocks_until_acked() {
        let (notifier, mut rx) = notify_channel(4);

        let consumer = tokio::spawn(async move {
            let out = rx.recv().await.expect("notification queued");
            assert!(out.text.contains("\"method\":\"ping\""));
            assert!(!out.text.contains("\"id\""));
            out.ack.send(Ok(())).ok();
        });

        notifier.notify("ping", json!({})).await.unwrap();
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn notify_fails_when_receiver_dropped() {
        let (notifier, rx) = notify_channel(4);
        drop(rx);
        let err = notifier.notify("ping", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::TransportClosed));
    }

    #[tokio::test]
    async fn notify_surfaces_send_failure() {
        let (notifier, mut rx) = notify_channel(4);

        tokio::spawn(async move {
            let out = rx.recv().await.unwrap();
            out.ack.send(Err(Error::TransportClosed)).ok();
        });

        let err = notifier.notify("didReceiveMessage", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::TransportClosed));
    }
}
