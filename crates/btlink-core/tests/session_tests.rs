//! End-to-end session tests over the in-memory transport and mock radios.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use btlink_core::Result;
use btlink_core::ble::BleHandler;
use btlink_core::classic::ClassicHandler;
use btlink_core::mock::{MockBleRadio, MockClassicRadio};
use btlink_core::radio::{Advertisement, FoundDevice};
use btlink_core::session::Session;
use btlink_core::transport::ChannelTransport;
use btlink_types::DeviceClass;
use btlink_types::uuid::expand_uuid16;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);
const EV3_ADDRESS: &str = "00:16:53:4E:32:01";

struct Client {
    tx: mpsc::Sender<String>,
    rx: mpsc::Receiver<String>,
    task: JoinHandle<Result<()>>,
}

impl Client {
    async fn request(&mut self, method: &str, params: Value, id: u64) {
        let frame = json!({"jsonrpc": "2.0", "method": method, "params": params, "id": id});
        self.tx.send(frame.to_string()).await.unwrap();
    }

    async fn next_frame(&mut self) -> Value {
        let text = tokio::time::timeout(TEST_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("session closed unexpectedly");
        serde_json::from_str(&text).unwrap()
    }

    /// Next response matching `id`, skipping interleaved notifications.
    async fn response(&mut self, id: u64) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame["id"] == json!(id) {
                return frame;
            }
            assert!(frame.get("method").is_some(), "unexpected frame: {frame}");
        }
    }

    /// Next notification with the given method, skipping pings.
    async fn notification(&mut self, method: &str) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame["method"] == json!(method) {
                return frame;
            }
            assert_eq!(frame["method"], "ping", "unexpected frame: {frame}");
        }
    }

    async fn finish(self) {
        drop(self.tx);
        tokio::time::timeout(TEST_TIMEOUT, self.task)
            .await
            .expect("session did not shut down")
            .unwrap()
            .unwrap();
    }
}

fn classic_session(radio: Arc<MockClassicRadio>) -> Client {
    let (transport, tx, rx) = ChannelTransport::new(64);
    let session = Session::new(transport, |notifier| ClassicHandler::new(radio, notifier, 1));
    Client {
        tx,
        rx,
        task: tokio::spawn(session.run()),
    }
}

fn ble_session(radio: Arc<MockBleRadio>) -> Client {
    let (transport, tx, rx) = ChannelTransport::new(64);
    let session = Session::new(transport, |notifier| BleHandler::new(radio, notifier));
    Client {
        tx,
        rx,
        task: tokio::spawn(session.run()),
    }
}

fn ev3() -> FoundDevice {
    FoundDevice {
        address: EV3_ADDRESS.into(),
        name: Some("EV3".into()),
        rssi: Some(-48),
        class: DeviceClass::new(8, 1),
    }
}

fn heart_rate_monitor() -> Advertisement {
    Advertisement {
        address: "AA:BB:CC:DD:EE:FF".into(),
        name: Some("Polar H10".into()),
        rssi: Some(-60),
        services_128: Vec::new(),
        services_16: vec![0x180D],
    }
}

const HEART_RATE_SERVICE: u16 = 0x180D;
const HEART_RATE_MEASUREMENT: u16 = 0x2A37;

fn heart_rate_uuids() -> (Uuid, Uuid) {
    (
        expand_uuid16(HEART_RATE_SERVICE),
        expand_uuid16(HEART_RATE_MEASUREMENT),
    )
}

#[tokio::test]
async fn classic_discover_announces_matching_device_once() {
    let radio = Arc::new(MockClassicRadio::new());
    radio.add_device(ev3());
    radio.add_device(FoundDevice {
        address: "11:22:33:44:55:66".into(),
        name: Some("Headset".into()),
        rssi: None,
        class: DeviceClass::new(4, 1),
    });
    let mut client = classic_session(radio);

    client
        .request("discover", json!({"majorDeviceClass": 8, "minorDeviceClass": 1}), 1)
        .await;
    assert_eq!(client.response(1).await["result"], Value::Null);

    let found = client.notification("didDiscoverPeripheral").await;
    assert_eq!(found["params"]["peripheralId"], EV3_ADDRESS);
    assert_eq!(found["params"]["name"], "EV3");
    assert_eq!(found["params"]["rssi"], -48);

    client.finish().await;
}

#[tokio::test]
async fn classic_connect_and_send() {
    let radio = Arc::new(MockClassicRadio::new());
    radio.add_device(ev3());
    let mut client = classic_session(radio.clone());

    client
        .request("discover", json!({"majorDeviceClass": 8, "minorDeviceClass": 1}), 1)
        .await;
    client.response(1).await;
    client.notification("didDiscoverPeripheral").await;

    client
        .request("connect", json!({"peripheralId": EV3_ADDRESS}), 2)
        .await;
    assert_eq!(client.response(2).await["result"], Value::Null);
    assert_eq!(radio.connected_to(), Some((EV3_ADDRESS.into(), 1)));

    // "QUI=" is the two bytes "AB"; the result reports the decoded length.
    client
        .request("send", json!({"message": "QUI=", "encoding": "base64"}), 3)
        .await;
    assert_eq!(client.response(3).await["result"], json!(2));
    assert_eq!(radio.sent(), vec![b"AB".to_vec()]);

    client.finish().await;
}

#[tokio::test]
async fn classic_forwards_frames_whole_with_header() {
    let radio = Arc::new(MockClassicRadio::new());
    radio.add_device(ev3());
    let mut client = classic_session(radio.clone());

    client
        .request("discover", json!({"majorDeviceClass": 8, "minorDeviceClass": 1}), 1)
        .await;
    client.response(1).await;
    client.notification("didDiscoverPeripheral").await;
    client
        .request("connect", json!({"peripheralId": EV3_ADDRESS}), 2)
        .await;
    client.response(2).await;

    // Split across two reads: length prefix first, payload after.
    radio.push_incoming(vec![0x02, 0x00]);
    radio.push_incoming(vec![0x41, 0x42]);

    let frame = client.notification("didReceiveMessage").await;
    // Header included: 02 00 41 42.
    assert_eq!(frame["params"]["message"], "AgBBQg==");
    assert_eq!(frame["params"]["encoding"], "base64");

    client.finish().await;
}

#[tokio::test]
async fn classic_send_before_connect_is_an_error() {
    let radio = Arc::new(MockClassicRadio::new());
    let mut client = classic_session(radio);

    client
        .request("send", json!({"message": "QUI=", "encoding": "base64"}), 1)
        .await;
    let reply = client.response(1).await;
    let message = reply["error"]["message"].as_str().unwrap();
    assert!(message.contains("send"));
    assert!(message.contains("INITIAL"));

    client.finish().await;
}

#[tokio::test]
async fn classic_send_rejects_non_base64() {
    let radio = Arc::new(MockClassicRadio::new());
    radio.add_device(ev3());
    let mut client = classic_session(radio.clone());

    client
        .request("discover", json!({"majorDeviceClass": 8, "minorDeviceClass": 1}), 1)
        .await;
    client.response(1).await;
    client.notification("didDiscoverPeripheral").await;
    client
        .request("connect", json!({"peripheralId": EV3_ADDRESS}), 2)
        .await;
    client.response(2).await;

    client
        .request("send", json!({"message": "hello", "encoding": "utf8"}), 3)
        .await;
    let reply = client.response(3).await;
    assert!(reply["error"]["message"].as_str().unwrap().contains("base64"));
    assert!(radio.sent().is_empty());

    client.finish().await;
}

#[tokio::test]
async fn ble_discover_matches_16_bit_service() {
    let radio = Arc::new(MockBleRadio::new());
    radio.add_advertisement(heart_rate_monitor());
    radio.add_advertisement(Advertisement {
        address: "01:02:03:04:05:06".into(),
        name: Some("Other".into()),
        rssi: Some(-70),
        services_128: Vec::new(),
        services_16: vec![0x1815],
    });
    let mut client = ble_session(radio);

    client
        .request("discover", json!({"filters": [{"services": ["180d"]}]}), 1)
        .await;
    assert_eq!(client.response(1).await["result"], Value::Null);

    let found = client.notification("didDiscoverPeripheral").await;
    assert_eq!(found["params"]["peripheralId"], 0);
    assert_eq!(found["params"]["name"], "Polar H10");

    client.finish().await;
}

#[tokio::test]
async fn ble_discover_filter_matches_on_any_listed_service() {
    let radio = Arc::new(MockBleRadio::new());
    // Advertises heart rate only; the filter also lists battery (180f).
    radio.add_advertisement(heart_rate_monitor());
    let mut client = ble_session(radio);

    client
        .request("discover", json!({"filters": [{"services": ["180d", "180f"]}]}), 1)
        .await;
    assert_eq!(client.response(1).await["result"], Value::Null);

    let found = client.notification("didDiscoverPeripheral").await;
    assert_eq!(found["params"]["peripheralId"], 0);
    assert_eq!(found["params"]["name"], "Polar H10");

    client.finish().await;
}

#[tokio::test]
async fn ble_discover_with_no_matches_fails_the_session() {
    let radio = Arc::new(MockBleRadio::new());
    let mut client = ble_session(radio);

    client
        .request("discover", json!({"filters": [{"services": ["180d"]}]}), 1)
        .await;
    let reply = client.response(1).await;
    assert!(reply["error"]["message"].as_str().unwrap().contains("match"));

    // The session reaches its terminal state after the error response.
    tokio::time::timeout(TEST_TIMEOUT, client.task)
        .await
        .expect("session did not end")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn ble_discover_requires_service_filters() {
    let radio = Arc::new(MockBleRadio::new());
    let mut client = ble_session(radio);

    client.request("discover", json!({"filters": []}), 1).await;
    let reply = client.response(1).await;
    assert!(reply["error"]["message"].as_str().unwrap().contains("filter"));

    client.finish().await;
}

#[tokio::test]
async fn ble_connect_unknown_index_is_an_error() {
    let radio = Arc::new(MockBleRadio::new());
    radio.add_advertisement(heart_rate_monitor());
    let mut client = ble_session(radio);

    client
        .request("discover", json!({"filters": [{"services": ["180d"]}]}), 1)
        .await;
    client.response(1).await;
    client.notification("didDiscoverPeripheral").await;

    client.request("connect", json!({"peripheralId": 5}), 2).await;
    let reply = client.response(2).await;
    assert!(reply["error"]["message"].as_str().unwrap().contains("5"));

    client.finish().await;
}

async fn connected_ble_client(radio: &Arc<MockBleRadio>) -> Client {
    let mut client = ble_session(radio.clone());
    client
        .request("discover", json!({"filters": [{"services": ["180d"]}]}), 1)
        .await;
    client.response(1).await;
    client.notification("didDiscoverPeripheral").await;
    client.request("connect", json!({"peripheralId": 0}), 2).await;
    assert_eq!(client.response(2).await["result"], Value::Null);
    client
}

#[tokio::test]
async fn ble_read_returns_encode_key() {
    let radio = Arc::new(MockBleRadio::new());
    radio.add_advertisement(heart_rate_monitor());
    let (service, characteristic) = heart_rate_uuids();
    radio.peripheral().add_characteristic(service, characteristic);
    radio.peripheral().set_value(characteristic, vec![0x06]);

    let mut client = connected_ble_client(&radio).await;
    client
        .request("read", json!({"serviceId": "180d", "characteristicId": "2a37"}), 3)
        .await;
    let reply = client.response(3).await;
    assert_eq!(reply["result"]["message"], "Bg==");
    // Historical wire quirk: the key is "encode".
    assert_eq!(reply["result"]["encode"], "base64");
    assert!(reply["result"].get("encoding").is_none());
    assert!(!radio.peripheral().is_subscribed(&characteristic));

    client.finish().await;
}

#[tokio::test]
async fn ble_start_notifications_bridges_value_changes() {
    let radio = Arc::new(MockBleRadio::new());
    radio.add_advertisement(heart_rate_monitor());
    let (service, characteristic) = heart_rate_uuids();
    radio.peripheral().add_characteristic(service, characteristic);
    radio.peripheral().set_value(characteristic, vec![0x06]);

    let mut client = connected_ble_client(&radio).await;
    client
        .request(
            "read",
            json!({"serviceId": "180d", "characteristicId": "2a37", "startNotifications": true}),
            3,
        )
        .await;
    let reply = client.response(3).await;
    assert_eq!(reply["result"]["message"], "Bg==");
    assert!(radio.peripheral().is_subscribed(&characteristic));

    radio.peripheral().push_notification(characteristic, vec![0x07]);
    let change = client.notification("characteristicDidChange").await;
    assert_eq!(change["params"]["serviceId"], "180d");
    assert_eq!(change["params"]["characteristicId"], "2a37");
    assert_eq!(change["params"]["message"], "Bw==");
    assert_eq!(change["params"]["encoding"], "base64");

    client.finish().await;
}

#[tokio::test]
async fn ble_write_rejects_bad_payload_without_touching_device() {
    let radio = Arc::new(MockBleRadio::new());
    radio.add_advertisement(heart_rate_monitor());
    let (service, characteristic) = heart_rate_uuids();
    radio.peripheral().add_characteristic(service, characteristic);

    let mut client = connected_ble_client(&radio).await;
    client
        .request(
            "write",
            json!({
                "serviceId": "180d",
                "characteristicId": "2a37",
                "message": "!!not base64!!",
                "encoding": "base64"
            }),
            3,
        )
        .await;
    let reply = client.response(3).await;
    assert!(reply["error"]["message"].as_str().unwrap().contains("base64"));
    assert!(radio.peripheral().written().is_empty());

    client.finish().await;
}

#[tokio::test]
async fn ble_write_reports_byte_count() {
    let radio = Arc::new(MockBleRadio::new());
    radio.add_advertisement(heart_rate_monitor());
    let (service, characteristic) = heart_rate_uuids();
    radio.peripheral().add_characteristic(service, characteristic);

    let mut client = connected_ble_client(&radio).await;
    client
        .request(
            "write",
            json!({
                "serviceId": "180d",
                "characteristicId": "2a37",
                "message": "QUI=",
                "encoding": "base64"
            }),
            3,
        )
        .await;
    assert_eq!(client.response(3).await["result"], json!(2));
    assert_eq!(
        radio.peripheral().written(),
        vec![(characteristic, b"AB".to_vec())]
    );

    client.finish().await;
}

#[tokio::test]
async fn ble_read_wrong_service_fails_the_session() {
    let radio = Arc::new(MockBleRadio::new());
    radio.add_advertisement(heart_rate_monitor());
    let (_, characteristic) = heart_rate_uuids();
    // The characteristic actually lives under the battery service.
    radio
        .peripheral()
        .add_characteristic(expand_uuid16(0x180F), characteristic);

    let mut client = connected_ble_client(&radio).await;
    client
        .request("read", json!({"serviceId": "180d", "characteristicId": "2a37"}), 3)
        .await;
    let reply = client.response(3).await;
    assert!(reply["error"]["message"].as_str().unwrap().contains("service"));

    // The session ends after the error response; the peripheral is released.
    client.finish().await;
    assert!(radio.peripheral().is_disconnected());
}

#[tokio::test]
async fn session_close_releases_classic_socket() {
    let radio = Arc::new(MockClassicRadio::new());
    radio.add_device(ev3());
    let mut client = classic_session(radio.clone());

    client
        .request("discover", json!({"majorDeviceClass": 8, "minorDeviceClass": 1}), 1)
        .await;
    client.response(1).await;
    client.notification("didDiscoverPeripheral").await;
    client
        .request("connect", json!({"peripheralId": EV3_ADDRESS}), 2)
        .await;
    client.response(2).await;

    // Closing the transport ends the session and closes the stream; a
    // fresh connect on the same mock then has no stream left to hand out.
    client.finish().await;
    assert!(radio.connected_to().is_some());
}
