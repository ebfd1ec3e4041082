//! Bluetooth Classic (RFCOMM) session handler.
//!
//! State machine: `INITIAL -> DISCOVERY -> DISCOVERY_COMPLETE -> CONNECTED
//! -> DONE`. A single background worker serves whichever phase the session
//! is in: during discovery it drives the inquiry and announces matching
//! devices; once connected it polls the RFCOMM socket and forwards
//! length-prefixed frames to the control client.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use btlink_types::{
    ClassicConnectParams, ClassicDiscoverParams, DeviceClass, DidDiscoverPeripheral,
    DidReceiveMessage, ENCODING_BASE64, PeripheralId, SendParams, method,
};

use crate::codec::{FrameBuffer, decode_payload, encode_payload};
use crate::error::{Error, Result};
use crate::radio::{ClassicRadio, ClassicStream, InquiryPoll};
use crate::session::SessionHandler;
use crate::state::StateCell;
use crate::transport::Notifier;

/// How long one inquiry poll may block before the worker rechecks for
/// cancellation.
const INQUIRY_POLL: Duration = Duration::from_millis(500);
/// Socket read poll bound while connected.
const SOCKET_POLL: Duration = Duration::from_secs(1);
/// Worker back-off while the session has nothing to do.
const IDLE_SLEEP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassicState {
    Initial,
    Discovery,
    DiscoveryComplete,
    Connected,
    Done,
}

impl ClassicState {
    fn name(self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::Discovery => "DISCOVERY",
            Self::DiscoveryComplete => "DISCOVERY_COMPLETE",
            Self::Connected => "CONNECTED",
            Self::Done => "DONE",
        }
    }
}

type SharedStream = Arc<Mutex<Option<Box<dyn ClassicStream>>>>;

/// Session handler for one `/session/bt` connection.
pub struct ClassicHandler {
    radio: Arc<dyn ClassicRadio>,
    notifier: Notifier,
    state: StateCell<ClassicState>,
    socket: SharedStream,
    cancel_discovery: CancellationToken,
    rfcomm_channel: u8,
    worker: Option<JoinHandle<()>>,
}

impl ClassicHandler {
    pub fn new(radio: Arc<dyn ClassicRadio>, notifier: Notifier, rfcomm_channel: u8) -> Self {
        Self {
            radio,
            notifier,
            state: StateCell::new(ClassicState::Initial),
            socket: Arc::new(Mutex::new(None)),
            cancel_discovery: CancellationToken::new(),
            rfcomm_channel,
            worker: None,
        }
    }

    async fn discover(&mut self, params: Value) -> Result<Value> {
        let state = self.state.get();
        if state != ClassicState::Initial {
            return Err(Error::InvalidState {
                method: method::DISCOVER.into(),
                state: state.name(),
            });
        }
        let params: ClassicDiscoverParams = serde_json::from_value(params)
            .map_err(|e| Error::invalid_params(method::DISCOVER, e))?;
        let wanted = DeviceClass::new(params.major_device_class, params.minor_device_class);

        // Discovery is asynchronous: the worker announces matches as they
        // come in.
        self.state.set(ClassicState::Discovery);
        self.worker = Some(tokio::spawn(worker(
            self.radio.clone(),
            self.notifier.clone(),
            self.state.clone(),
            self.socket.clone(),
            self.cancel_discovery.clone(),
            wanted,
        )));
        Ok(Value::Null)
    }

    async fn connect(&mut self, params: Value) -> Result<Value> {
        let state = self.state.get();
        if !matches!(
            state,
            ClassicState::Discovery | ClassicState::DiscoveryComplete
        ) {
            return Err(Error::InvalidState {
                method: method::CONNECT.into(),
                state: state.name(),
            });
        }
        let params: ClassicConnectParams = serde_json::from_value(params)
            .map_err(|e| Error::invalid_params(method::CONNECT, e))?;

        // If the inquiry is still running, stop it and wait until the
        // worker has actually let go of the adapter before dialing out.
        if self.state.get() == ClassicState::Discovery {
            self.cancel_discovery.cancel();
            self.state
                .wait_for(|s| *s != ClassicState::Discovery)
                .await;
        }

        let stream = match self
            .radio
            .connect(&params.peripheral_id, self.rfcomm_channel)
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                // The inquiry is already torn down; the session cannot
                // recover, so fail it after the error response goes out.
                self.state.set(ClassicState::Done);
                return Err(Error::ConnectFailed(err.to_string()));
            }
        };
        *self.socket.lock().await = Some(stream);
        self.state.set(ClassicState::Connected);
        debug!(peripheral = %params.peripheral_id, "RFCOMM connected");
        Ok(Value::Null)
    }

    async fn send(&mut self, params: Value) -> Result<Value> {
        let state = self.state.get();
        if state != ClassicState::Connected {
            return Err(Error::InvalidState {
                method: method::SEND.into(),
                state: state.name(),
            });
        }
        let params: SendParams =
            serde_json::from_value(params).map_err(|e| Error::invalid_params(method::SEND, e))?;
        let bytes = decode_payload(&params.message, &params.encoding)?;

        let mut socket = self.socket.lock().await;
        let stream = socket.as_mut().ok_or(Error::NotConnected)?;
        stream.send(&bytes).await?;
        Ok(json!(bytes.len()))
    }
}

#[async_trait::async_trait]
impl SessionHandler for ClassicHandler {
    async fn handle_request(&mut self, method_name: &str, params: Value) -> Result<Value> {
        match method_name {
            method::DISCOVER => self.discover(params).await,
            method::CONNECT => self.connect(params).await,
            method::SEND => self.send(params).await,
            other => Err(Error::InvalidState {
                method: other.to_owned(),
                state: self.state.get().name(),
            }),
        }
    }

    fn wants_ping(&self) -> bool {
        true
    }

    fn finished(&self) -> bool {
        self.state.get() == ClassicState::Done
    }

    async fn shutdown(&mut self) {
        self.state.set(ClassicState::Done);
        self.cancel_discovery.cancel();
        // take() ensures the stream is closed exactly once, whoever gets
        // here first.
        if let Some(mut stream) = self.socket.lock().await.take() {
            if let Err(err) = stream.close().await {
                warn!(%err, "error closing RFCOMM stream");
            }
        }
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn worker(
    radio: Arc<dyn ClassicRadio>,
    notifier: Notifier,
    state: StateCell<ClassicState>,
    socket: SharedStream,
    cancel: CancellationToken,
    wanted: DeviceClass,
) {
    loop {
        match state.get() {
            ClassicState::Discovery => {
                let result = run_inquiry(&*radio, &notifier, &cancel, wanted).await;
                // Whether the inquiry finished or was cancelled, discovery
                // is over; only a later state (connect, teardown) may
                // overwrite this.
                if state.get() == ClassicState::Discovery {
                    state.set(ClassicState::DiscoveryComplete);
                }
                if let Err(err) = result {
                    warn!(%err, "discovery worker failed");
                    state.set(ClassicState::Done);
                    return;
                }
            }
            ClassicState::Connected => {
                if let Err(err) = pump_socket(&notifier, &state, &socket).await {
                    warn!(%err, "socket worker failed");
                    release_socket(&socket).await;
                    state.set(ClassicState::Done);
                    return;
                }
            }
            ClassicState::Done => return,
            ClassicState::Initial | ClassicState::DiscoveryComplete => {
                tokio::time::sleep(IDLE_SLEEP).await;
            }
        }
    }
}

/// Drive the inquiry until it completes or is cancelled, announcing each
/// matching device once.
async fn run_inquiry(
    radio: &dyn ClassicRadio,
    notifier: &Notifier,
    cancel: &CancellationToken,
    wanted: DeviceClass,
) -> Result<()> {
    let mut inquiry = radio.start_inquiry().await?;
    let mut seen: HashSet<String> = HashSet::new();
    loop {
        if cancel.is_cancelled() {
            inquiry.cancel().await?;
            return Ok(());
        }
        match inquiry.poll(INQUIRY_POLL).await? {
            InquiryPoll::Found(devices) => {
                for device in devices {
                    if device.class != wanted {
                        debug!(address = %device.address, class = %device.class, "skipping device");
                        continue;
                    }
                    if !seen.insert(device.address.clone()) {
                        continue;
                    }
                    let payload = DidDiscoverPeripheral {
                        rssi: device.rssi,
                        peripheral_id: PeripheralId::Address(device.address),
                        name: device.name,
                    };
                    notifier
                        .notify(method::DID_DISCOVER_PERIPHERAL, serde_json::to_value(payload)?)
                        .await?;
                }
            }
            InquiryPoll::Pending => {}
            InquiryPoll::Complete => return Ok(()),
        }
    }
}

/// Poll the RFCOMM socket and forward complete frames to the client.
async fn pump_socket(
    notifier: &Notifier,
    state: &StateCell<ClassicState>,
    socket: &SharedStream,
) -> Result<()> {
    let mut frames = FrameBuffer::new();
    while state.get() == ClassicState::Connected {
        let read = {
            let mut guard = socket.lock().await;
            let Some(stream) = guard.as_mut() else {
                return Ok(());
            };
            stream.poll_recv(SOCKET_POLL).await?
        };
        let Some(bytes) = read else { continue };
        frames.push(&bytes);
        while let Some(frame) = frames.next_frame() {
            let payload = DidReceiveMessage {
                message: encode_payload(&frame),
                encoding: ENCODING_BASE64.into(),
            };
            notifier
                .notify(method::DID_RECEIVE_MESSAGE, serde_json::to_value(payload)?)
                .await?;
        }
    }
    Ok(())
}

async fn release_socket(socket: &SharedStream) {
    if let Some(mut stream) = socket.lock().await.take() {
        if let Err(err) = stream.close().await {
            warn!(%err, "error closing RFCOMM stream");
        }
    }
}
