//! Application state shared across WebSocket handlers.

use std::sync::Arc;

use btlink_core::radio::{BleRadio, ClassicRadio};

use crate::config::Config;

/// Shared application state.
///
/// A radio slot is `None` when that stack is unavailable on this host; the
/// matching endpoint then answers 503 instead of accepting sessions.
pub struct AppState {
    pub config: Config,
    pub ble: Option<Arc<dyn BleRadio>>,
    pub classic: Option<Arc<dyn ClassicRadio>>,
}

impl AppState {
    pub fn new(
        config: Config,
        ble: Option<Arc<dyn BleRadio>>,
        classic: Option<Arc<dyn ClassicRadio>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            ble,
            classic,
        })
    }
}
