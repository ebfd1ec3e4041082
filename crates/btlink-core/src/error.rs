//! Error types for btlink-core.
//!
//! Failure handling follows a small taxonomy:
//!
//! - **Envelope errors** never reach this type; the session logs and drops
//!   the frame (see [`crate::session`]).
//! - **Illegal-state and parameter errors** become a JSON-RPC error result
//!   for the triggering request; the session continues.
//! - **Device errors** become an error result when detected on the request
//!   path and terminate the session when a worker detects them.
//! - **Transport-gone errors** ([`Error::TransportClosed`]) are always fatal
//!   to the session; the worker exits and the device resource is released.

use thiserror::Error;

/// Errors that can occur inside a bridge session.
///
/// Marked `#[non_exhaustive]` to allow new variants without breaking
/// downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy host-stack error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// BlueZ (Bluetooth Classic) host-stack error.
    #[cfg(target_os = "linux")]
    #[error("BlueZ error: {0}")]
    Bluez(#[from] bluer::Error),

    /// I/O error on a device stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The control-client transport is gone; the session cannot continue.
    #[error("transport closed")]
    TransportClosed,

    /// No Bluetooth adapter is available on this host.
    #[error("no Bluetooth adapter available")]
    NoAdapter,

    /// The request is not legal in the session's current state.
    #[error("method '{method}' is not valid in state {state}")]
    InvalidState {
        method: String,
        state: &'static str,
    },

    /// The request parameters did not deserialize.
    #[error("invalid params for '{method}': {source}")]
    InvalidParams {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    /// The request named an encoding other than base64.
    #[error("unsupported encoding: {0:?} (only base64 is supported)")]
    UnsupportedEncoding(String),

    /// The request payload was not valid base64.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A service or characteristic id was neither a UUID nor a 16-bit value.
    #[error("invalid service or characteristic id: {0:?}")]
    InvalidUuid(String),

    /// A malformed peripheral address was supplied.
    #[error("invalid device address: {0:?}")]
    InvalidAddress(String),

    /// A BLE discover request had no usable service filter.
    #[error("discovery request must include at least one filter with services")]
    MissingFilters,

    /// A BLE connect named an index outside the discovered device list.
    #[error("peripheral {0} is not in the discovered device list")]
    UnknownPeripheral(usize),

    /// The discovery scan found no device matching the filters.
    #[error("no device matched the discovery filters")]
    NoMatchingDevices,

    /// Connecting to the device failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Operation attempted without a connected device.
    #[error("not connected to a device")]
    NotConnected,

    /// The requested characteristic does not exist on the peripheral.
    #[error("characteristic not found: {0}")]
    CharacteristicNotFound(String),

    /// The peripheral reports the characteristic under a different service.
    /// The session treats this as fatal.
    #[error("characteristic {characteristic} belongs to service {actual}, not {expected}")]
    CharacteristicMismatch {
        characteristic: String,
        expected: String,
        actual: String,
    },

    /// JSON serialization failed while building an outbound frame.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    /// Build an invalid-params error with method context.
    pub fn invalid_params(method: impl Into<String>, source: serde_json::Error) -> Self {
        Self::InvalidParams {
            method: method.into(),
            source,
        }
    }
}

/// Result type alias using btlink-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
