//! Subscription registry for BLE value-change notifications.
//!
//! `characteristicDidChange` payloads must echo the service and
//! characteristic ids exactly as the client wrote them in the `read` request
//! that started notifications, so the registry keeps the original wire
//! strings keyed by the characteristic's resolved UUID.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

/// Wire ids as the client spelled them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireIds {
    pub service_id: String,
    pub characteristic_id: String,
}

/// Maps subscribed characteristics back to their wire ids.
#[derive(Debug, Default)]
pub struct Delegate {
    inner: Mutex<HashMap<Uuid, WireIds>>,
}

impl Delegate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription. Re-registering a characteristic overwrites the
    /// stored ids.
    pub fn register(&self, characteristic: Uuid, service_id: &str, characteristic_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.insert(
            characteristic,
            WireIds {
                service_id: service_id.to_owned(),
                characteristic_id: characteristic_id.to_owned(),
            },
        );
    }

    /// True once at least one characteristic has been subscribed.
    pub fn has_subscriptions(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        !inner.is_empty()
    }

    /// Look up the wire ids of a subscribed characteristic. `None` means the
    /// notification came from a characteristic the client never subscribed
    /// to and should be dropped.
    pub fn lookup(&self, characteristic: &Uuid) -> Option<WireIds> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.get(characteristic).cloned()
    }
}
