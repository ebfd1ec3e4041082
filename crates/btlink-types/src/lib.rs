//! Wire protocol types for the btlink Bluetooth bridge.
//!
//! This crate defines the data model shared between the bridge service and
//! its sessions: the JSON-RPC 2.0 envelope carried over the WebSocket
//! transport, the typed parameters and results of every session method, and
//! small Bluetooth helpers (Classic device-class decoding, 16-bit UUID
//! expansion) that the protocol layer needs without pulling in any I/O.
//!
//! # Protocol summary
//!
//! Requests arrive as `{"jsonrpc":"2.0","method":...,"params":...,"id":...}`.
//! Responses echo the request `id` and carry either `result` or `error`.
//! Server-push notifications (device events) carry no `id` at all.
//!
//! | Session | Method | Direction |
//! |---------|--------|-----------|
//! | Classic | `discover`, `connect`, `send` | request |
//! | Classic | `didDiscoverPeripheral`, `didReceiveMessage`, `ping` | push |
//! | BLE | `discover`, `connect`, `read`, `write` | request |
//! | BLE | `didDiscoverPeripheral`, `characteristicDidChange` | push |

pub mod class;
pub mod methods;
pub mod rpc;
pub mod uuid;

pub use class::DeviceClass;
pub use methods::{
    BleConnectParams, BleDiscoverParams, BleFilter, CharacteristicDidChange,
    ClassicConnectParams, ClassicDiscoverParams, DidDiscoverPeripheral, DidReceiveMessage,
    PeripheralId, ReadParams, ReadResult, SendParams, WriteParams, ENCODING_BASE64, method,
};
pub use rpc::{EnvelopeError, Request, Response, RpcError, JSONRPC_VERSION};
