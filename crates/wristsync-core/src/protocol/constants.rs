//! GATT layout and protocol constants

use uuid::Uuid;

/// Custom service advertised by the companion
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fff0_0000_1000_8000_00805f9b34fb);

/// Notify characteristic carrying CSV rows and structured replies
pub const CSV_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000fff1_0000_1000_8000_00805f9b34fb);

/// Write characteristic receiving structured commands from the headset
pub const COMMAND_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000fff2_0000_1000_8000_00805f9b34fb);

/// Client characteristic configuration descriptor
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// Largest single notification the companion sends
pub const MAX_NOTIFY_BYTES: usize = 180;

/// Terminator of every frame and CSV row
pub const LINE_TERMINATOR: u8 = b'\n';

/// Header row sent once per subscription
pub const CSV_HEADER: &str = "Timestamp,HeartRate,RMSSD,SDNN,StressLevel,AccelX,AccelY,AccelZ\n";

/// Number of columns in a CSV data row
pub const CSV_FIELD_COUNT: usize = 8;

/// Placeholder for unavailable CSV fields
pub const CSV_NULL: &str = "null";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuids_render_in_canonical_form() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "0000fff0-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            CSV_CHARACTERISTIC_UUID.to_string(),
            "0000fff1-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(CCCD_UUID.to_string(), "00002902-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn header_has_one_column_per_field() {
        assert_eq!(CSV_HEADER.trim_end().split(',').count(), CSV_FIELD_COUNT);
    }
}
