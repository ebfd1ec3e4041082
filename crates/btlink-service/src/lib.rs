//! WebSocket bridge between visual-programming clients and Bluetooth
//! devices.
//!
//! The service listens on loopback and exposes two endpoints:
//!
//! - `WS /session/ble` - one Bluetooth Low Energy session per connection
//! - `WS /session/bt` - one Bluetooth Classic (RFCOMM) session per connection
//!
//! Each connection speaks JSON-RPC 2.0 text frames and is bridged to at most
//! one device; closing the socket releases the device.
//!
//! # Configuration
//!
//! Optional TOML configuration, passed with `--config`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:20110"
//!
//! [session]
//! rfcomm_channel = 1
//! ```

pub mod config;
pub mod state;
pub mod ws;

pub use config::Config;
pub use state::AppState;
