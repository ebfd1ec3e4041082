//! Session engine for the btlink Bluetooth bridge.
//!
//! A session couples one control-client transport (normally a WebSocket) to
//! one Bluetooth device. The [`session::Session`] loop parses JSON-RPC
//! frames, dispatches them to a protocol handler, and merges in the device
//! events that the handler's background worker pushes through a
//! [`transport::Notifier`].
//!
//! Two handlers exist: [`classic::ClassicHandler`] for Bluetooth Classic
//! (RFCOMM) peripherals and [`ble::BleHandler`] for Bluetooth Low Energy.
//! Both talk to the host stacks only through the capability traits in
//! [`radio`], so they run unchanged against the scriptable radios in
//! [`mock`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use btlink_core::ble::BleHandler;
//! use btlink_core::btle::BtleRadio;
//! use btlink_core::session::Session;
//! use btlink_core::transport::ChannelTransport;
//!
//! # async fn run() -> btlink_core::Result<()> {
//! let radio = Arc::new(BtleRadio::new().await?);
//! let (transport, _to_session, _from_session) = ChannelTransport::new(16);
//! let session = Session::new(transport, |notifier| BleHandler::new(radio, notifier));
//! session.run().await
//! # }
//! ```

pub mod ble;
pub mod btle;
pub mod classic;
pub mod codec;
pub mod delegate;
pub mod error;
pub mod gate;
pub mod mock;
pub mod radio;
pub mod session;
pub mod state;
pub mod transport;

#[cfg(target_os = "linux")]
pub mod bluez;

pub use error::{Error, Result};
pub use session::{Session, SessionHandler};
pub use transport::{MessageTransport, Notifier};
