//! Bluetooth Low Energy session handler.
//!
//! State machine: `INITIAL -> DISCOVERY -> CONNECTED -> DONE`. The
//! `discover` request performs one bounded scan and fixes the discovered
//! device list; indices into that list are the wire peripheral ids. The
//! worker then re-announces the list every second until the client connects,
//! so a client that drops a frame still sees the full picture. Once
//! connected the worker polls for value-change notifications, dropping any
//! that arrive while the [`DeliveryGate`] is closed for an in-flight
//! request.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use btlink_types::uuid::{parse_uuid, uuid16_of};
use btlink_types::{
    BleConnectParams, BleDiscoverParams, CharacteristicDidChange, DidDiscoverPeripheral,
    ENCODING_BASE64, PeripheralId, ReadParams, ReadResult, WriteParams, method,
};

use crate::codec::{decode_payload, encode_payload};
use crate::delegate::Delegate;
use crate::error::{Error, Result};
use crate::gate::DeliveryGate;
use crate::radio::{Advertisement, BlePeripheral, BleRadio, CharacteristicRef};
use crate::session::SessionHandler;
use crate::state::StateCell;
use crate::transport::Notifier;

/// Length of the single discovery scan.
const SCAN_DURATION: Duration = Duration::from_secs(1);
/// Cadence of discovery re-announcements.
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1);
/// Notification poll bound while connected.
const NOTIFICATION_POLL: Duration = Duration::from_secs(1);
/// Worker back-off while there is nothing to poll.
const IDLE_SLEEP: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BleState {
    Initial,
    Discovery,
    Connected,
    Done,
}

impl BleState {
    fn name(self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::Discovery => "DISCOVERY",
            Self::Connected => "CONNECTED",
            Self::Done => "DONE",
        }
    }
}

/// A discovery filter with its service ids resolved to UUIDs.
#[derive(Debug, Clone)]
struct ServiceFilter {
    services: Vec<Uuid>,
}

impl ServiceFilter {
    /// A filter is satisfied when any of its services is advertised, either
    /// as a 128-bit UUID or as the matching 16-bit assigned number.
    fn matches(&self, ad: &Advertisement) -> bool {
        self.services.iter().any(|service| {
            ad.services_128.contains(service)
                || uuid16_of(service).is_some_and(|short| ad.services_16.contains(&short))
        })
    }
}

struct ConnectedLink {
    peripheral: Arc<dyn BlePeripheral>,
    delegate: Arc<Delegate>,
}

type SharedLink = Arc<Mutex<Option<ConnectedLink>>>;
type SharedAds = Arc<std::sync::Mutex<Vec<Advertisement>>>;

/// Session handler for one `/session/ble` connection.
pub struct BleHandler {
    radio: Arc<dyn BleRadio>,
    notifier: Notifier,
    state: StateCell<BleState>,
    gate: DeliveryGate,
    /// Fixed at `discover` time; indices are the wire peripheral ids.
    discovered: SharedAds,
    link: SharedLink,
    /// Serializes GATT traffic between the request path and the worker's
    /// notification poll.
    device_lock: Arc<Mutex<()>>,
    worker: Option<JoinHandle<()>>,
}

impl BleHandler {
    pub fn new(radio: Arc<dyn BleRadio>, notifier: Notifier) -> Self {
        Self {
            radio,
            notifier,
            state: StateCell::new(BleState::Initial),
            gate: DeliveryGate::new(),
            discovered: Arc::new(std::sync::Mutex::new(Vec::new())),
            link: Arc::new(Mutex::new(None)),
            device_lock: Arc::new(Mutex::new(())),
            worker: None,
        }
    }

    async fn discover(&mut self, params: Value) -> Result<Value> {
        let state = self.state.get();
        if state != BleState::Initial {
            return Err(Error::InvalidState {
                method: method::DISCOVER.into(),
                state: state.name(),
            });
        }
        let params: BleDiscoverParams = serde_json::from_value(params)
            .map_err(|e| Error::invalid_params(method::DISCOVER, e))?;
        let filters = parse_filters(&params)?;

        let matched: Vec<Advertisement> = self
            .radio
            .scan(SCAN_DURATION)
            .await?
            .into_iter()
            .filter(|ad| filters.iter().any(|f| f.matches(ad)))
            .collect();
        if matched.is_empty() {
            self.state.set(BleState::Done);
            return Err(Error::NoMatchingDevices);
        }
        for ad in &matched {
            debug!(address = %ad.address, name = ?ad.name, "discovered peripheral");
        }
        *self.discovered.lock().unwrap_or_else(|e| e.into_inner()) = matched;

        self.state.set(BleState::Discovery);
        self.worker = Some(tokio::spawn(worker(
            self.notifier.clone(),
            self.state.clone(),
            self.gate.clone(),
            self.discovered.clone(),
            self.link.clone(),
            self.device_lock.clone(),
        )));
        Ok(Value::Null)
    }

    async fn connect(&mut self, params: Value) -> Result<Value> {
        let state = self.state.get();
        if state != BleState::Discovery {
            return Err(Error::InvalidState {
                method: method::CONNECT.into(),
                state: state.name(),
            });
        }
        let params: BleConnectParams = serde_json::from_value(params)
            .map_err(|e| Error::invalid_params(method::CONNECT, e))?;
        let address = {
            let discovered = self.discovered.lock().unwrap_or_else(|e| e.into_inner());
            discovered
                .get(params.peripheral_id)
                .map(|ad| ad.address.clone())
                .ok_or(Error::UnknownPeripheral(params.peripheral_id))?
        };

        let peripheral = match self.radio.connect(&address).await {
            Ok(peripheral) => peripheral,
            Err(err) => {
                self.state.set(BleState::Done);
                return Err(Error::ConnectFailed(err.to_string()));
            }
        };
        *self.link.lock().await = Some(ConnectedLink {
            peripheral,
            delegate: Arc::new(Delegate::new()),
        });
        self.state.set(BleState::Connected);
        debug!(%address, "BLE connected");
        Ok(Value::Null)
    }

    async fn read(&mut self, params: Value) -> Result<Value> {
        let params: ReadParams =
            serde_json::from_value(params).map_err(|e| Error::invalid_params(method::READ, e))?;
        let (peripheral, delegate) = self.connected_link(method::READ).await?;
        let characteristic = self
            .resolve(&peripheral, &params.service_id, &params.characteristic_id)
            .await?;

        let _guard = self.device_lock.lock().await;
        let bytes = peripheral.read(&characteristic).await?;
        if params.start_notifications {
            peripheral.subscribe(&characteristic).await?;
            delegate.register(
                characteristic.uuid,
                &params.service_id,
                &params.characteristic_id,
            );
        }
        let result = ReadResult {
            message: encode_payload(&bytes),
            encode: ENCODING_BASE64.into(),
        };
        Ok(serde_json::to_value(result)?)
    }

    async fn write(&mut self, params: Value) -> Result<Value> {
        let params: WriteParams =
            serde_json::from_value(params).map_err(|e| Error::invalid_params(method::WRITE, e))?;
        // Decode before touching the device so a bad payload writes nothing.
        let bytes = decode_payload(&params.message, &params.encoding)?;
        let (peripheral, _) = self.connected_link(method::WRITE).await?;
        let characteristic = self
            .resolve(&peripheral, &params.service_id, &params.characteristic_id)
            .await?;

        let _guard = self.device_lock.lock().await;
        peripheral.write(&characteristic, &bytes).await?;
        Ok(json!(bytes.len()))
    }

    async fn connected_link(&self, method: &str) -> Result<(Arc<dyn BlePeripheral>, Arc<Delegate>)> {
        let state = self.state.get();
        if state != BleState::Connected {
            return Err(Error::InvalidState {
                method: method.to_owned(),
                state: state.name(),
            });
        }
        let link = self.link.lock().await;
        let link = link.as_ref().ok_or(Error::NotConnected)?;
        Ok((link.peripheral.clone(), link.delegate.clone()))
    }

    /// Resolve the characteristic and check it lives under the requested
    /// service. A mismatch means the client's model of the device is wrong;
    /// the session is failed after the error response goes out.
    async fn resolve(
        &self,
        peripheral: &Arc<dyn BlePeripheral>,
        service_id: &str,
        characteristic_id: &str,
    ) -> Result<CharacteristicRef> {
        let service = parse_uuid(service_id).ok_or_else(|| Error::InvalidUuid(service_id.into()))?;
        let characteristic = parse_uuid(characteristic_id)
            .ok_or_else(|| Error::InvalidUuid(characteristic_id.into()))?;

        let _guard = self.device_lock.lock().await;
        let resolved = peripheral.characteristic(characteristic).await?;
        if resolved.service != service {
            self.state.set(BleState::Done);
            return Err(Error::CharacteristicMismatch {
                characteristic: characteristic_id.into(),
                expected: service_id.into(),
                actual: resolved.service.to_string(),
            });
        }
        Ok(resolved)
    }
}

fn parse_filters(params: &BleDiscoverParams) -> Result<Vec<ServiceFilter>> {
    let mut filters = Vec::new();
    for filter in &params.filters {
        if filter.has_unsupported_criteria() {
            warn!("ignoring name/manufacturer discovery criteria; only services are matched");
        }
        if filter.services.is_empty() {
            continue;
        }
        let services = filter
            .services
            .iter()
            .map(|s| parse_uuid(s).ok_or_else(|| Error::InvalidUuid(s.clone())))
            .collect::<Result<Vec<_>>>()?;
        filters.push(ServiceFilter { services });
    }
    if filters.is_empty() {
        return Err(Error::MissingFilters);
    }
    Ok(filters)
}

#[async_trait::async_trait]
impl SessionHandler for BleHandler {
    async fn handle_request(&mut self, method_name: &str, params: Value) -> Result<Value> {
        match method_name {
            method::DISCOVER => self.discover(params).await,
            method::CONNECT => self.connect(params).await,
            method::READ => self.read(params).await,
            method::WRITE => self.write(params).await,
            other => Err(Error::InvalidState {
                method: other.to_owned(),
                state: self.state.get().name(),
            }),
        }
    }

    fn begin_request(&mut self) {
        // No notification may slip in ahead of the pending response.
        self.gate.close();
    }

    fn end_request(&mut self) {
        self.gate.open();
    }

    fn finished(&self) -> bool {
        self.state.get() == BleState::Done
    }

    async fn shutdown(&mut self) {
        self.state.set(BleState::Done);
        self.gate.open();
        // take() ensures the peripheral is released exactly once.
        if let Some(link) = self.link.lock().await.take() {
            if let Err(err) = link.peripheral.disconnect().await {
                warn!(%err, "error disconnecting peripheral");
            }
        }
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn worker(
    notifier: Notifier,
    state: StateCell<BleState>,
    gate: DeliveryGate,
    discovered: SharedAds,
    link: SharedLink,
    device_lock: Arc<Mutex<()>>,
) {
    loop {
        match state.get() {
            BleState::Discovery => {
                if announce_all(&notifier, &discovered).await.is_err() {
                    return;
                }
                tokio::time::sleep(ANNOUNCE_INTERVAL).await;
            }
            BleState::Connected => {
                let Some((peripheral, delegate)) = snapshot_link(&link).await else {
                    tokio::time::sleep(IDLE_SLEEP).await;
                    continue;
                };
                // Nothing subscribed, nothing to poll.
                if !delegate.has_subscriptions() {
                    tokio::time::sleep(IDLE_SLEEP).await;
                    continue;
                }
                gate.wait_open().await;
                let polled = {
                    let _guard = device_lock.lock().await;
                    peripheral.poll_notification(NOTIFICATION_POLL).await
                };
                match polled {
                    Ok(None) => {}
                    Ok(Some((characteristic, bytes))) => {
                        let Some(ids) = delegate.lookup(&characteristic) else {
                            debug!(%characteristic, "dropping unsubscribed notification");
                            continue;
                        };
                        let payload = CharacteristicDidChange {
                            service_id: ids.service_id,
                            characteristic_id: ids.characteristic_id,
                            encoding: ENCODING_BASE64.into(),
                            message: encode_payload(&bytes),
                        };
                        let Ok(payload) = serde_json::to_value(payload) else {
                            continue;
                        };
                        // The session re-checks the gate right before the
                        // transport send and drops the message if a request
                        // closed it after this point; checking here instead
                        // would race with an arriving request.
                        if notifier
                            .notify_gated(method::CHARACTERISTIC_DID_CHANGE, payload, &gate)
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!(%err, "notification poll failed");
                        release_link(&link).await;
                        state.set(BleState::Done);
                        return;
                    }
                }
            }
            BleState::Initial => tokio::time::sleep(IDLE_SLEEP).await,
            BleState::Done => return,
        }
    }
}

async fn announce_all(notifier: &Notifier, discovered: &SharedAds) -> Result<()> {
    let snapshot: Vec<(usize, Advertisement)> = {
        let discovered = discovered.lock().unwrap_or_else(|e| e.into_inner());
        discovered.iter().cloned().enumerate().collect()
    };
    for (index, ad) in snapshot {
        let payload = DidDiscoverPeripheral {
            rssi: ad.rssi,
            peripheral_id: PeripheralId::Index(index),
            name: ad.name,
        };
        notifier
            .notify(method::DID_DISCOVER_PERIPHERAL, serde_json::to_value(payload)?)
            .await?;
    }
    Ok(())
}

async fn snapshot_link(link: &SharedLink) -> Option<(Arc<dyn BlePeripheral>, Arc<Delegate>)> {
    let link = link.lock().await;
    link.as_ref()
        .map(|l| (l.peripheral.clone(), l.delegate.clone()))
}

async fn release_link(link: &SharedLink) {
    if let Some(link) = link.lock().await.take() {
        if let Err(err) = link.peripheral.disconnect().await {
            warn!(%err, "error disconnecting peripheral");
        }
    }
}
