//! BlueZ-backed [`ClassicRadio`] implementation (Linux only).
//!
//! Discovery rides the BlueZ device-added event stream with the transport
//! filter pinned to BR/EDR; dropping the stream ends the inquiry. RFCOMM
//! links are plain `bluer::rfcomm::Stream` sockets.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr, Stream};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport};
use futures::{Stream as FutStream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use btlink_types::DeviceClass;

use crate::error::{Error, Result};
use crate::radio::{ClassicInquiry, ClassicRadio, ClassicStream, FoundDevice, InquiryPoll};

const READ_BUF: usize = 1024;

type EventStream = Pin<Box<dyn FutStream<Item = AdapterEvent> + Send>>;

/// Bluetooth Classic radio over the default BlueZ adapter.
pub struct BluezRadio {
    adapter: Adapter,
}

impl BluezRadio {
    /// Open the default adapter and power it on.
    pub async fn new() -> Result<Self> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await.map_err(|_| Error::NoAdapter)?;
        adapter.set_powered(true).await?;
        Ok(Self { adapter })
    }
}

#[async_trait]
impl ClassicRadio for BluezRadio {
    async fn start_inquiry(&self) -> Result<Box<dyn ClassicInquiry>> {
        self.adapter
            .set_discovery_filter(DiscoveryFilter {
                transport: DiscoveryTransport::BrEdr,
                ..Default::default()
            })
            .await?;
        let events: EventStream = Box::pin(self.adapter.discover_devices().await?);
        debug!("BR/EDR inquiry started");
        Ok(Box::new(BluezInquiry {
            adapter: self.adapter.clone(),
            events: Some(events),
        }))
    }

    async fn connect(&self, address: &str, channel: u8) -> Result<Box<dyn ClassicStream>> {
        let address: Address = address
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_owned()))?;
        let stream = Stream::connect(SocketAddr::new(address, channel)).await?;
        info!(%address, channel, "RFCOMM stream open");
        Ok(Box::new(BluezStream {
            stream: Some(stream),
        }))
    }
}

struct BluezInquiry {
    adapter: Adapter,
    /// Dropping the event stream stops discovery.
    events: Option<EventStream>,
}

impl BluezInquiry {
    async fn describe(adapter: &Adapter, address: Address) -> Result<Option<FoundDevice>> {
        let device = adapter.device(address)?;
        // Devices without a Class of Device are BLE-only; the BR/EDR filter
        // usually hides them but BlueZ does not guarantee it.
        let Some(class_bits) = device.class().await? else {
            return Ok(None);
        };
        Ok(Some(FoundDevice {
            address: address.to_string(),
            name: device.name().await?,
            rssi: device.rssi().await?,
            class: DeviceClass::from_bits(class_bits),
        }))
    }
}

#[async_trait]
impl ClassicInquiry for BluezInquiry {
    async fn poll(&mut self, timeout: Duration) -> Result<InquiryPoll> {
        let Some(events) = self.events.as_mut() else {
            return Ok(InquiryPoll::Complete);
        };
        let event = match tokio::time::timeout(timeout, events.next()).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                self.events = None;
                return Ok(InquiryPoll::Complete);
            }
            Err(_) => return Ok(InquiryPoll::Pending),
        };
        match event {
            AdapterEvent::DeviceAdded(address) => match Self::describe(&self.adapter, address).await? {
                Some(device) => Ok(InquiryPoll::Found(vec![device])),
                None => Ok(InquiryPoll::Pending),
            },
            _ => Ok(InquiryPoll::Pending),
        }
    }

    async fn cancel(&mut self) -> Result<()> {
        self.events = None;
        debug!("inquiry cancelled");
        Ok(())
    }
}

struct BluezStream {
    stream: Option<Stream>,
}

#[async_trait]
impl ClassicStream for BluezStream {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        stream.write_all(bytes).await?;
        Ok(())
    }

    async fn poll_recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        let mut buf = [0u8; READ_BUF];
        match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
            Ok(Ok(0)) => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peripheral closed the connection",
            ))),
            Ok(Ok(n)) => Ok(Some(buf[..n].to_vec())),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }
}
