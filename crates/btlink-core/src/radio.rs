//! Capability traits over the host Bluetooth stacks.
//!
//! Sessions never touch btleplug or BlueZ directly; they talk to these
//! traits so the same state machines run against the real radios, and
//! against [`crate::mock`] in tests. All device waits take an explicit
//! timeout so workers can interleave cancellation checks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use btlink_types::DeviceClass;

use crate::error::Result;

/// One device reported by a Classic inquiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundDevice {
    /// Bluetooth device address, `AA:BB:CC:DD:EE:FF`.
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub class: DeviceClass,
}

/// Outcome of one bounded inquiry poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InquiryPoll {
    /// Devices reported since the last poll.
    Found(Vec<FoundDevice>),
    /// Nothing yet; poll again.
    Pending,
    /// The inquiry ended on its own.
    Complete,
}

/// A running Classic inquiry.
#[async_trait]
pub trait ClassicInquiry: Send {
    /// Wait up to `timeout` for inquiry results.
    async fn poll(&mut self, timeout: Duration) -> Result<InquiryPoll>;

    /// Stop the inquiry. Idempotent.
    async fn cancel(&mut self) -> Result<()>;
}

/// A connected RFCOMM byte stream.
#[async_trait]
pub trait ClassicStream: Send {
    /// Write bytes to the peripheral.
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for inbound bytes. `Ok(None)` on timeout;
    /// an empty read means the peripheral closed the link and is an error.
    async fn poll_recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Close the stream. Idempotent.
    async fn close(&mut self) -> Result<()>;
}

/// Bluetooth Classic host capability.
#[async_trait]
pub trait ClassicRadio: Send + Sync {
    async fn start_inquiry(&self) -> Result<Box<dyn ClassicInquiry>>;

    /// Open an RFCOMM connection to `address` on `channel`.
    async fn connect(&self, address: &str, channel: u8) -> Result<Box<dyn ClassicStream>>;
}

/// One BLE advertisement observed during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    /// Advertised 128-bit service UUIDs.
    pub services_128: Vec<Uuid>,
    /// Advertised 16-bit service assigned numbers.
    pub services_16: Vec<u16>,
}

/// A GATT characteristic resolved on a connected peripheral, together with
/// the service it actually belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub uuid: Uuid,
}

/// A connected BLE peripheral.
#[async_trait]
pub trait BlePeripheral: Send + Sync {
    /// Resolve a characteristic by UUID. The returned reference names the
    /// service the peripheral reports it under, which the caller checks
    /// against the requested service.
    async fn characteristic(&self, characteristic: Uuid) -> Result<CharacteristicRef>;

    async fn read(&self, characteristic: &CharacteristicRef) -> Result<Vec<u8>>;

    async fn write(&self, characteristic: &CharacteristicRef, bytes: &[u8]) -> Result<()>;

    /// Enable value-change notifications for the characteristic.
    async fn subscribe(&self, characteristic: &CharacteristicRef) -> Result<()>;

    /// Wait up to `timeout` for the next notification from any subscribed
    /// characteristic. `Ok(None)` on timeout.
    async fn poll_notification(&self, timeout: Duration) -> Result<Option<(Uuid, Vec<u8>)>>;

    /// Drop the link. Idempotent.
    async fn disconnect(&self) -> Result<()>;
}

/// Bluetooth Low Energy host capability.
#[async_trait]
pub trait BleRadio: Send + Sync {
    /// Scan for `duration` and return every advertisement seen.
    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>>;

    async fn connect(&self, address: &str) -> Result<Arc<dyn BlePeripheral>>;
}
