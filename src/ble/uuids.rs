//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUID constants used to talk to the FT95 thermometer.

use uuid::Uuid;

use crate::error::{Error, Result};

/// Bluetooth SIG base UUID (`0000xxxx-0000-1000-8000-00805f9b34fb`).
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit assigned number onto the Bluetooth base UUID.
pub const fn from_short(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

// Health Thermometer Service (Standard BLE)
/// Standard BLE Health Thermometer Service UUID.
pub const HEALTH_THERMOMETER_SERVICE_UUID: Uuid = from_short(0x1809);
/// Temperature Measurement characteristic UUID (Indicate).
pub const TEMPERATURE_MEASUREMENT_UUID: Uuid = from_short(0x2A1C);

// FT95 vendor service
/// FT95 vendor service UUID.
pub const FT95_SERVICE_UUID: Uuid = from_short(0xFFF0);
/// FT95 battery characteristic UUID.
pub const FT95_BATTERY_UUID: Uuid = from_short(0xFFF1);
/// FT95 unit characteristic UUID.
pub const FT95_UNIT_UUID: Uuid = from_short(0xFFF2);
/// FT95 temperature characteristic UUID (Notify).
pub const FT95_TEMPERATURE_UUID: Uuid = from_short(0xFFF4);

/// Characteristics tried, in order, when subscribing for temperatures.
pub const DEFAULT_NOTIFY_CHARACTERISTICS: [Uuid; 2] =
    [TEMPERATURE_MEASUREMENT_UUID, FT95_TEMPERATURE_UUID];

/// Parse a characteristic id from configuration.
///
/// Accepts a full UUID or a 16-bit short form (`"2a1c"`, `"0x2A1C"`).
pub fn parse_characteristic(value: &str) -> Result<Uuid> {
    let trimmed = value.trim();
    let short = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if short.len() == 4 {
        if let Ok(number) = u16::from_str_radix(short, 16) {
            return Ok(from_short(number));
        }
    }

    Uuid::parse_str(trimmed).map_err(|_| Error::config(format!("invalid characteristic id '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            TEMPERATURE_MEASUREMENT_UUID.to_string(),
            "00002a1c-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            FT95_TEMPERATURE_UUID.to_string(),
            "0000fff4-0000-1000-8000-00805f9b34fb"
        );
        assert!(HEALTH_THERMOMETER_SERVICE_UUID.to_string().contains("1809"));
    }

    #[test]
    fn test_parse_characteristic() {
        assert_eq!(
            parse_characteristic("2a1c").unwrap(),
            TEMPERATURE_MEASUREMENT_UUID
        );
        assert_eq!(
            parse_characteristic("0xFFF4").unwrap(),
            FT95_TEMPERATURE_UUID
        );
        assert_eq!(
            parse_characteristic("0000fff0-0000-1000-8000-00805f9b34fb").unwrap(),
            FT95_SERVICE_UUID
        );
        assert!(parse_characteristic("not-a-uuid").unwrap_err().is_fatal());
    }
}
