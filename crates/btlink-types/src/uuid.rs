//! Bluetooth UUID helpers.
//!
//! GATT service and characteristic ids arrive from the control client either
//! as full 128-bit UUID strings or as bare 16-bit assigned numbers
//! (e.g. `"180d"`). Short forms expand onto the Bluetooth base UUID
//! `0000xxxx-0000-1000-8000-00805f9b34fb`.

use uuid::Uuid;

/// Tail of the Bluetooth base UUID (fields d2..d4).
const BASE_D2: u16 = 0x0000;
const BASE_D3: u16 = 0x1000;
const BASE_D4: [u8; 8] = [0x80, 0x00, 0x00, 0x80, 0x5F, 0x9B, 0x34, 0xFB];

/// Expand a 16-bit assigned number onto the Bluetooth base UUID.
pub fn expand_uuid16(short: u16) -> Uuid {
    Uuid::from_fields(short as u32, BASE_D2, BASE_D3, &BASE_D4)
}

/// If `uuid` lies on the Bluetooth base, return its 16-bit assigned number.
pub fn uuid16_of(uuid: &Uuid) -> Option<u16> {
    let (d1, d2, d3, d4) = uuid.as_fields();
    if d2 == BASE_D2 && d3 == BASE_D3 && *d4 == BASE_D4 && d1 <= u16::MAX as u32 {
        Some(d1 as u16)
    } else {
        None
    }
}

/// Parse a wire-level id: a full UUID string, or a bare 16-bit hex value
/// (with or without a `0x` prefix) expanded onto the base UUID.
pub fn parse_uuid(text: &str) -> Option<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(text) {
        return Some(uuid);
    }
    let hex = text.strip_prefix("0x").unwrap_or(text);
    u16::from_str_radix(hex, 16).ok().map(expand_uuid16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::uuid;

    #[test]
    fn expands_heart_rate_service() {
        assert_eq!(
            expand_uuid16(0x180D),
            uuid!("0000180d-0000-1000-8000-00805f9b34fb")
        );
    }

    #[test]
    fn recognizes_base_uuids() {
        assert_eq!(uuid16_of(&uuid!("00002a37-0000-1000-8000-00805f9b34fb")), Some(0x2A37));
        assert_eq!(uuid16_of(&uuid!("e95d0753-251d-470a-a062-fa1922dfa9a8")), None);
    }

    #[test]
    fn parses_full_uuid() {
        assert_eq!(
            parse_uuid("e95d0753-251d-470a-a062-fa1922dfa9a8"),
            Some(uuid!("e95d0753-251d-470a-a062-fa1922dfa9a8"))
        );
    }

    #[test]
    fn parses_short_forms() {
        let heart_rate = uuid!("0000180d-0000-1000-8000-00805f9b34fb");
        assert_eq!(parse_uuid("180d"), Some(heart_rate));
        assert_eq!(parse_uuid("0x180D"), Some(heart_rate));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_uuid("not-a-uuid"), None);
        assert_eq!(parse_uuid(""), None);
        // Too wide for a 16-bit assigned number.
        assert_eq!(parse_uuid("12345"), None);
    }

    #[test]
    fn expansion_round_trips() {
        for short in [0x0000u16, 0x180D, 0x2A37, 0xFFFF] {
            assert_eq!(uuid16_of(&expand_uuid16(short)), Some(short));
        }
    }
}
