//! BLE GATT constants for the PillNow dispenser
//!
//! The dispenser exposes a single serial-style characteristic (an HM-10 style
//! module). Commands are plain ASCII written with response.

use uuid::Uuid;

/// Service UUID: 0000FFE0-0000-1000-8000-00805F9B34FB
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);

/// Command characteristic UUID (write): 0000FFE1-0000-1000-8000-00805F9B34FB
pub const COMMAND_UUID: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

/// Substring every dispenser carries in its advertised or local name
pub const DEVICE_NAME_MARKER: &str = "PillNow";

/// How long a scan runs before giving up on finding a dispenser
pub const SCAN_TIMEOUT_SECS: u64 = 30;

/// Returns true if either advertised name identifies a dispenser
pub fn is_dispenser_name(name: Option<&str>, local_name: Option<&str>, marker: &str) -> bool {
    name.is_some_and(|n| n.contains(marker)) || local_name.is_some_and(|n| n.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuids_match_the_serial_profile() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "0000ffe0-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            COMMAND_UUID.to_string(),
            "0000ffe1-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn name_marker_matches_either_name() {
        assert!(is_dispenser_name(Some("PillNow-01"), None, DEVICE_NAME_MARKER));
        assert!(is_dispenser_name(None, Some("nimble [PillNow]"), DEVICE_NAME_MARKER));
        assert!(!is_dispenser_name(Some("HC-08"), Some("speaker"), DEVICE_NAME_MARKER));
        assert!(!is_dispenser_name(None, None, DEVICE_NAME_MARKER));
    }
}
