//! Typed parameters and results for every session method.
//!
//! Field names follow the wire protocol (camelCase). One historical quirk is
//! preserved for compatibility: the BLE `read` result carries its encoding
//! under the key `encode`, not `encoding`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only payload encoding the bridge supports.
pub const ENCODING_BASE64: &str = "base64";

/// Method name constants.
pub mod method {
    pub const DISCOVER: &str = "discover";
    pub const CONNECT: &str = "connect";
    pub const SEND: &str = "send";
    pub const READ: &str = "read";
    pub const WRITE: &str = "write";

    // Server-push notifications.
    pub const DID_DISCOVER_PERIPHERAL: &str = "didDiscoverPeripheral";
    pub const DID_RECEIVE_MESSAGE: &str = "didReceiveMessage";
    pub const CHARACTERISTIC_DID_CHANGE: &str = "characteristicDidChange";
    pub const PING: &str = "ping";
}

/// How a peripheral is addressed on the wire.
///
/// Classic sessions use the device address; BLE sessions use the position of
/// the device in the discovery result list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PeripheralId {
    /// BLE: index into the discovered device list.
    Index(usize),
    /// Classic: Bluetooth device address, e.g. `AA:BB:CC:DD:EE:FF`.
    Address(String),
}

/// Classic `discover` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassicDiscoverParams {
    pub major_device_class: u8,
    pub minor_device_class: u8,
}

/// Classic `connect` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassicConnectParams {
    pub peripheral_id: String,
}

/// Classic `send` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendParams {
    pub message: String,
    pub encoding: String,
}

/// One discovery filter of a BLE `discover` request.
///
/// Only the `services` list is evaluated. Name and manufacturer-data filters
/// are accepted for wire compatibility but never match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BleFilter {
    pub services: Vec<String>,
    pub name: Option<String>,
    pub name_prefix: Option<String>,
    pub manufacturer_data: Option<Value>,
}

impl BleFilter {
    /// True when the filter uses criteria the bridge does not evaluate.
    pub fn has_unsupported_criteria(&self) -> bool {
        self.name.is_some() || self.name_prefix.is_some() || self.manufacturer_data.is_some()
    }
}

/// BLE `discover` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BleDiscoverParams {
    pub filters: Vec<BleFilter>,
}

/// BLE `connect` parameters. The id indexes the discovery result list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BleConnectParams {
    pub peripheral_id: usize,
}

/// BLE `read` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadParams {
    pub service_id: String,
    pub characteristic_id: String,
    #[serde(default)]
    pub start_notifications: bool,
}

/// BLE `write` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteParams {
    pub service_id: String,
    pub characteristic_id: String,
    pub message: String,
    pub encoding: String,
}

/// BLE `read` result. The `encode` key is a preserved wire quirk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResult {
    pub message: String,
    pub encode: String,
}

/// `didDiscoverPeripheral` notification payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDiscoverPeripheral {
    pub rssi: Option<i16>,
    pub peripheral_id: PeripheralId,
    pub name: Option<String>,
}

/// `didReceiveMessage` notification payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidReceiveMessage {
    pub message: String,
    pub encoding: String,
}

/// `characteristicDidChange` notification payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacteristicDidChange {
    pub service_id: String,
    pub characteristic_id: String,
    pub encoding: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classic_discover_params_are_camel_case() {
        let params: ClassicDiscoverParams =
            serde_json::from_value(json!({"majorDeviceClass": 8, "minorDeviceClass": 1})).unwrap();
        assert_eq!(params.major_device_class, 8);
        assert_eq!(params.minor_device_class, 1);
    }

    #[test]
    fn peripheral_id_round_trips_both_shapes() {
        let index: PeripheralId = serde_json::from_value(json!(2)).unwrap();
        assert_eq!(index, PeripheralId::Index(2));

        let addr: PeripheralId = serde_json::from_value(json!("AA:BB:CC:DD:EE:FF")).unwrap();
        assert_eq!(addr, PeripheralId::Address("AA:BB:CC:DD:EE:FF".into()));

        assert_eq!(serde_json::to_value(PeripheralId::Index(0)).unwrap(), json!(0));
    }

    #[test]
    fn ble_filter_accepts_service_list() {
        let params: BleDiscoverParams = serde_json::from_value(json!({
            "filters": [{"services": ["0000180d-0000-1000-8000-00805f9b34fb"]}]
        }))
        .unwrap();
        assert_eq!(params.filters.len(), 1);
        assert!(!params.filters[0].has_unsupported_criteria());
    }

    #[test]
    fn ble_filter_flags_unsupported_criteria() {
        let filter: BleFilter =
            serde_json::from_value(json!({"name": "micro:bit", "services": []})).unwrap();
        assert!(filter.has_unsupported_criteria());
    }

    #[test]
    fn read_params_default_start_notifications() {
        let params: ReadParams = serde_json::from_value(json!({
            "serviceId": "180d", "characteristicId": "2a37"
        }))
        .unwrap();
        assert!(!params.start_notifications);
    }

    #[test]
    fn read_result_uses_encode_key() {
        let result = ReadResult {
            message: "QUI=".into(),
            encode: ENCODING_BASE64.into(),
        };
        let value = serde_json::to_value(result).unwrap();
        assert_eq!(value["encode"], "base64");
        assert!(value.get("encoding").is_none());
    }

    #[test]
    fn discover_notification_is_camel_case() {
        let payload = DidDiscoverPeripheral {
            rssi: Some(-52),
            peripheral_id: PeripheralId::Address("11:22:33:44:55:66".into()),
            name: Some("EV3".into()),
        };
        let value = serde_json::to_value(payload).unwrap();
        assert_eq!(value["peripheralId"], "11:22:33:44:55:66");
        assert_eq!(value["rssi"], -52);
    }
}
