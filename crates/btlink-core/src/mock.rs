//! In-memory mock radios.
//!
//! Scriptable implementations of the radio traits for exercising the session
//! state machines without Bluetooth hardware. Shipped in the library (not
//! behind `cfg(test)`) so downstream crates can drive sessions in their own
//! tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::radio::{
    Advertisement, BlePeripheral, BleRadio, CharacteristicRef, ClassicInquiry, ClassicRadio,
    ClassicStream, FoundDevice, InquiryPoll,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Mock Bluetooth Classic radio.
///
/// Inquiries report the scripted device list once, then stay pending.
/// `connect` hands out a stream whose inbound bytes are fed with
/// [`MockClassicRadio::push_incoming`] and whose outbound writes are
/// captured for assertion.
pub struct MockClassicRadio {
    devices: Mutex<Vec<FoundDevice>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    incoming_tx: mpsc::UnboundedSender<Vec<u8>>,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    connected: Mutex<Option<(String, u8)>>,
    fail_connect: AtomicBool,
}

impl Default for MockClassicRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClassicRadio {
    pub fn new() -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            devices: Mutex::new(Vec::new()),
            sent: Arc::new(Mutex::new(Vec::new())),
            incoming_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
            connected: Mutex::new(None),
            fail_connect: AtomicBool::new(false),
        }
    }

    pub fn add_device(&self, device: FoundDevice) {
        lock(&self.devices).push(device);
    }

    /// Feed bytes that the next `poll_recv` on the connected stream returns.
    pub fn push_incoming(&self, bytes: Vec<u8>) {
        let _ = self.incoming_tx.send(bytes);
    }

    /// Everything the session has written to the stream so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        lock(&self.sent).clone()
    }

    /// The `(address, channel)` of the last successful connect.
    pub fn connected_to(&self) -> Option<(String, u8)> {
        lock(&self.connected).clone()
    }

    pub fn fail_next_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClassicRadio for MockClassicRadio {
    async fn start_inquiry(&self) -> Result<Box<dyn ClassicInquiry>> {
        Ok(Box::new(MockInquiry {
            pending: Some(lock(&self.devices).clone()),
        }))
    }

    async fn connect(&self, address: &str, channel: u8) -> Result<Box<dyn ClassicStream>> {
        if self.fail_connect.swap(false, Ordering::SeqCst) {
            return Err(Error::ConnectFailed("mock connect refused".into()));
        }
        let incoming = lock(&self.incoming_rx)
            .take()
            .ok_or(Error::NotConnected)?;
        *lock(&self.connected) = Some((address.to_owned(), channel));
        Ok(Box::new(MockStream {
            sent: self.sent.clone(),
            incoming,
            closed: false,
        }))
    }
}

struct MockInquiry {
    pending: Option<Vec<FoundDevice>>,
}

#[async_trait]
impl ClassicInquiry for MockInquiry {
    async fn poll(&mut self, timeout: Duration) -> Result<InquiryPoll> {
        match self.pending.take() {
            Some(devices) => Ok(InquiryPoll::Found(devices)),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(InquiryPoll::Pending)
            }
        }
    }

    async fn cancel(&mut self) -> Result<()> {
        Ok(())
    }
}

struct MockStream {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: bool,
}

#[async_trait]
impl ClassicStream for MockStream {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        lock(&self.sent).push(bytes.to_vec());
        Ok(())
    }

    async fn poll_recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        match tokio::time::timeout(timeout, self.incoming.recv()).await {
            Ok(Some(bytes)) => Ok(Some(bytes)),
            Ok(None) => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "mock peer closed",
            ))),
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Mock Bluetooth Low Energy radio backed by a single scriptable peripheral.
pub struct MockBleRadio {
    ads: Mutex<Vec<Advertisement>>,
    peripheral: Arc<MockPeripheral>,
    connected: Mutex<Option<String>>,
    fail_connect: AtomicBool,
}

impl Default for MockBleRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBleRadio {
    pub fn new() -> Self {
        Self {
            ads: Mutex::new(Vec::new()),
            peripheral: Arc::new(MockPeripheral::new()),
            connected: Mutex::new(None),
            fail_connect: AtomicBool::new(false),
        }
    }

    pub fn add_advertisement(&self, ad: Advertisement) {
        lock(&self.ads).push(ad);
    }

    /// The peripheral every successful connect resolves to.
    pub fn peripheral(&self) -> Arc<MockPeripheral> {
        self.peripheral.clone()
    }

    pub fn connected_to(&self) -> Option<String> {
        lock(&self.connected).clone()
    }

    pub fn fail_next_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BleRadio for MockBleRadio {
    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>> {
        tokio::time::sleep(duration).await;
        Ok(lock(&self.ads).clone())
    }

    async fn connect(&self, address: &str) -> Result<Arc<dyn BlePeripheral>> {
        if self.fail_connect.swap(false, Ordering::SeqCst) {
            return Err(Error::ConnectFailed("mock connect refused".into()));
        }
        *lock(&self.connected) = Some(address.to_owned());
        Ok(self.peripheral.clone())
    }
}

/// Scriptable GATT peripheral.
pub struct MockPeripheral {
    characteristics: Mutex<HashMap<Uuid, CharacteristicRef>>,
    values: Mutex<HashMap<Uuid, Vec<u8>>>,
    written: Mutex<Vec<(Uuid, Vec<u8>)>>,
    subscribed: Mutex<HashSet<Uuid>>,
    notify_tx: mpsc::UnboundedSender<(Uuid, Vec<u8>)>,
    notify_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Uuid, Vec<u8>)>>,
    disconnected: AtomicBool,
}

impl Default for MockPeripheral {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPeripheral {
    pub fn new() -> Self {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        Self {
            characteristics: Mutex::new(HashMap::new()),
            values: Mutex::new(HashMap::new()),
            written: Mutex::new(Vec::new()),
            subscribed: Mutex::new(HashSet::new()),
            notify_tx,
            notify_rx: tokio::sync::Mutex::new(notify_rx),
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn add_characteristic(&self, service: Uuid, characteristic: Uuid) {
        lock(&self.characteristics).insert(
            characteristic,
            CharacteristicRef {
                service,
                uuid: characteristic,
            },
        );
    }

    pub fn set_value(&self, characteristic: Uuid, value: Vec<u8>) {
        lock(&self.values).insert(characteristic, value);
    }

    /// Queue a value-change notification.
    pub fn push_notification(&self, characteristic: Uuid, value: Vec<u8>) {
        let _ = self.notify_tx.send((characteristic, value));
    }

    pub fn written(&self) -> Vec<(Uuid, Vec<u8>)> {
        lock(&self.written).clone()
    }

    pub fn is_subscribed(&self, characteristic: &Uuid) -> bool {
        lock(&self.subscribed).contains(characteristic)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlePeripheral for MockPeripheral {
    async fn characteristic(&self, characteristic: Uuid) -> Result<CharacteristicRef> {
        lock(&self.characteristics)
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound(characteristic.to_string()))
    }

    async fn read(&self, characteristic: &CharacteristicRef) -> Result<Vec<u8>> {
        lock(&self.values)
            .get(&characteristic.uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound(characteristic.uuid.to_string()))
    }

    async fn write(&self, characteristic: &CharacteristicRef, bytes: &[u8]) -> Result<()> {
        lock(&self.written).push((characteristic.uuid, bytes.to_vec()));
        Ok(())
    }

    async fn subscribe(&self, characteristic: &CharacteristicRef) -> Result<()> {
        lock(&self.subscribed).insert(characteristic.uuid);
        Ok(())
    }

    async fn poll_notification(&self, timeout: Duration) -> Result<Option<(Uuid, Vec<u8>)>> {
        let mut rx = self.notify_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(event)) => Ok(Some(event)),
            Ok(None) => Ok(None),
            Err(_) => Ok(None),
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}
