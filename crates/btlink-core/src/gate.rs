//! Notification delivery gate.
//!
//! While a `read` request with `startNotifications` is being answered, the
//! worker must not interleave a `characteristicDidChange` push ahead of the
//! read response. The session closes the gate on entry to such a request and
//! reopens it after the response has been sent; the worker waits on the gate
//! before delivering each notification batch.

use std::sync::Arc;

use tokio::sync::watch;

/// A reopenable barrier for worker-side notification delivery.
#[derive(Clone)]
pub struct DeliveryGate {
    inner: Arc<watch::Sender<bool>>,
}

impl Default for DeliveryGate {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryGate {
    /// A new gate starts open.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { inner: Arc::new(tx) }
    }

    /// Hold back notification delivery.
    pub fn close(&self) {
        self.inner.send_replace(false);
    }

    /// Allow notification delivery again, waking waiters.
    pub fn open(&self) {
        self.inner.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.inner.borrow()
    }

    /// Wait until the gate is open. Returns immediately if it already is.
    pub async fn wait_open(&self) {
        let mut rx = self.inner.subscribe();
        // The sender half lives in self, so wait_for cannot fail.
        let _ = rx.wait_for(|open| *open).await;
    }
}
