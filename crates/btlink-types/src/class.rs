//! Bluetooth Classic device-class decoding.
//!
//! A Classic inquiry reports each device's Class of Device as a 24-bit
//! field. Discovery filters select on the major class (bits 8..13) and the
//! minor class (bits 2..8).

/// The (major, minor) device class pair extracted from a Class of Device
/// bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceClass {
    pub major: u8,
    pub minor: u8,
}

impl DeviceClass {
    /// Build a class pair directly, e.g. from discovery filter parameters.
    pub fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Extract the class pair from a raw Class of Device bitmask.
    pub fn from_bits(bits: u32) -> Self {
        Self {
            major: ((bits >> 8) & 0x1F) as u8,
            minor: ((bits >> 2) & 0x3F) as u8,
        }
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "major={} minor={}", self.major, self.minor)
    }
}
