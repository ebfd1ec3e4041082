//! btleplug-backed [`BleRadio`] implementation.
//!
//! One scan pass is start-scan, sleep, stop-scan, then a snapshot of the
//! adapter's peripheral cache. Connecting discovers services once and caches
//! the characteristics by UUID so later lookups are O(1).

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, ValueNotification,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::{Stream, StreamExt};
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

use btlink_types::uuid::uuid16_of;

use crate::error::{Error, Result};
use crate::radio::{Advertisement, BlePeripheral, BleRadio, CharacteristicRef};

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// BLE radio over the first available host adapter.
pub struct BtleRadio {
    adapter: Adapter,
}

impl BtleRadio {
    /// Grab the first Bluetooth adapter on the host.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NoAdapter)?;
        Ok(Self { adapter })
    }
}

#[async_trait]
impl BleRadio for BtleRadio {
    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        sleep(duration).await;
        self.adapter.stop_scan().await?;

        let mut ads = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            let Some(props) = peripheral.properties().await? else {
                continue;
            };
            let mut services_128 = Vec::new();
            let mut services_16 = Vec::new();
            for service in props.services {
                match uuid16_of(&service) {
                    Some(short) => services_16.push(short),
                    None => services_128.push(service),
                }
            }
            ads.push(Advertisement {
                address: props.address.to_string(),
                name: props.local_name,
                rssi: props.rssi,
                services_128,
                services_16,
            });
        }
        debug!(count = ads.len(), "scan pass complete");
        Ok(ads)
    }

    async fn connect(&self, address: &str) -> Result<Arc<dyn BlePeripheral>> {
        let mut target = None;
        for peripheral in self.adapter.peripherals().await? {
            if let Some(props) = peripheral.properties().await? {
                if props.address.to_string().eq_ignore_ascii_case(address) {
                    target = Some(peripheral);
                    break;
                }
            }
        }
        let peripheral = target.ok_or_else(|| Error::InvalidAddress(address.to_owned()))?;

        peripheral.connect().await?;
        peripheral.discover_services().await?;

        let mut characteristics = HashMap::new();
        for characteristic in peripheral.characteristics() {
            characteristics.insert(characteristic.uuid, characteristic);
        }
        info!(%address, characteristics = characteristics.len(), "peripheral connected");

        let notifications: NotificationStream = peripheral.notifications().await?;
        Ok(Arc::new(BtlePeripheral {
            peripheral,
            characteristics,
            notifications: tokio::sync::Mutex::new(notifications),
        }))
    }
}

struct BtlePeripheral {
    peripheral: Peripheral,
    characteristics: HashMap<Uuid, Characteristic>,
    notifications: tokio::sync::Mutex<NotificationStream>,
}

impl BtlePeripheral {
    fn lookup(&self, characteristic: &CharacteristicRef) -> Result<&Characteristic> {
        self.characteristics
            .get(&characteristic.uuid)
            .ok_or_else(|| Error::CharacteristicNotFound(characteristic.uuid.to_string()))
    }
}

#[async_trait]
impl BlePeripheral for BtlePeripheral {
    async fn characteristic(&self, characteristic: Uuid) -> Result<CharacteristicRef> {
        let found = self
            .characteristics
            .get(&characteristic)
            .ok_or_else(|| Error::CharacteristicNotFound(characteristic.to_string()))?;
        Ok(CharacteristicRef {
            service: found.service_uuid,
            uuid: found.uuid,
        })
    }

    async fn read(&self, characteristic: &CharacteristicRef) -> Result<Vec<u8>> {
        Ok(self.peripheral.read(self.lookup(characteristic)?).await?)
    }

    async fn write(&self, characteristic: &CharacteristicRef, bytes: &[u8]) -> Result<()> {
        self.peripheral
            .write(self.lookup(characteristic)?, bytes, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, characteristic: &CharacteristicRef) -> Result<()> {
        self.peripheral.subscribe(self.lookup(characteristic)?).await?;
        Ok(())
    }

    async fn poll_notification(&self, timeout: Duration) -> Result<Option<(Uuid, Vec<u8>)>> {
        let mut stream = self.notifications.lock().await;
        match tokio::time::timeout(timeout, stream.next()).await {
            Ok(Some(event)) => Ok(Some((event.uuid, event.value))),
            Ok(None) => Ok(None),
            Err(_) => Ok(None),
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
