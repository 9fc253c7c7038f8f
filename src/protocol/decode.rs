//! Temperature notification decoding.
//!
//! Turns the raw bytes of a temperature notification into degrees Celsius.
//! Two layouts are supported:
//!
//! - **Fixed offset** (default): little-endian `u16` at bytes 1-2, in tenths
//!   of a degree Celsius. A bare 2-byte payload is read as the same `u16`.
//!   `[0x00, 0x76, 0x01, 0xFF, 0xFE]` decodes to 37.4 °C.
//! - **IEEE 11073**: Bluetooth SIG Temperature Measurement (0x2A1C): a
//!   flags byte followed by a 32-bit FLOAT (24-bit signed mantissa, 8-bit
//!   signed base-10 exponent). Flag bit 0 marks a Fahrenheit value.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::utils::fahrenheit_to_celsius;

/// Byte layout of the temperature notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecodeStrategy {
    /// Little-endian tenths of a degree at bytes 1-2.
    #[default]
    FixedOffset,
    /// Standard Temperature Measurement characteristic.
    Ieee11073,
}

/// Decoder for temperature notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoder {
    strategy: DecodeStrategy,
    range: Option<(f64, f64)>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DecodeStrategy::default())
    }
}

impl Decoder {
    /// Scale of the fixed-offset layout (tenths of a degree).
    const FIXED_OFFSET_SCALE: f64 = 10.0;

    /// Create a decoder with no range validation.
    pub fn new(strategy: DecodeStrategy) -> Self {
        Self {
            strategy,
            range: None,
        }
    }

    /// Reject decoded values outside `min..=max` °C.
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    /// The configured layout.
    pub fn strategy(&self) -> DecodeStrategy {
        self.strategy
    }

    /// Decode a notification payload into degrees Celsius.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] for short or reserved payloads and
    /// [`Error::OutOfRange`] when range validation is enabled and the value
    /// falls outside it.
    pub fn decode_celsius(&self, data: &[u8]) -> Result<f64> {
        let celsius = match self.strategy {
            DecodeStrategy::FixedOffset => Self::decode_fixed_offset(data)?,
            DecodeStrategy::Ieee11073 => Self::decode_ieee11073(data)?,
        };

        if !celsius.is_finite() {
            return Err(Error::InvalidData {
                context: format!("Non-finite temperature decoded from {:02X?}", data),
            });
        }

        if let Some((min, max)) = self.range {
            if !(min..=max).contains(&celsius) {
                return Err(Error::OutOfRange { celsius, min, max });
            }
        }

        Ok(celsius)
    }

    fn decode_fixed_offset(data: &[u8]) -> Result<f64> {
        let raw = match data {
            [_, lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
            [lo, hi] => u16::from_le_bytes([*lo, *hi]),
            _ => {
                return Err(Error::InvalidData {
                    context: format!(
                        "Temperature payload too short: {} bytes (need at least 2)",
                        data.len()
                    ),
                })
            }
        };

        Ok(f64::from(raw) / Self::FIXED_OFFSET_SCALE)
    }

    fn decode_ieee11073(data: &[u8]) -> Result<f64> {
        if data.len() < 5 {
            return Err(Error::InvalidData {
                context: format!(
                    "Temperature measurement too short: {} bytes (need at least 5)",
                    data.len()
                ),
            });
        }

        let flags = data[0];
        let raw_mantissa = u32::from_le_bytes([data[1], data[2], data[3], 0]);

        // Reserved mantissas: NaN, NRes, +INF, -INF, reserved
        if matches!(
            raw_mantissa,
            0x7F_FFFF | 0x80_0000 | 0x7F_FFFE | 0x80_0002 | 0x80_0001
        ) {
            return Err(Error::InvalidData {
                context: format!("Reserved FLOAT value {:#08x}", raw_mantissa),
            });
        }

        // Sign-extend the 24-bit mantissa
        let mantissa = ((raw_mantissa << 8) as i32) >> 8;
        let exponent = data[4] as i8;
        let value = f64::from(mantissa) * 10f64.powi(i32::from(exponent));

        if flags & 0x01 != 0 {
            Ok(fahrenheit_to_celsius(value))
        } else {
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: [u8; 5] = [0x00, 0x76, 0x01, 0xFF, 0xFE];

    #[test]
    fn test_fixed_offset_sample() {
        let celsius = Decoder::default().decode_celsius(&SAMPLE).unwrap();
        assert!((celsius - 37.4).abs() < 1e-9);
    }

    #[test]
    fn test_fixed_offset_two_bytes() {
        let celsius = Decoder::default().decode_celsius(&[0x6E, 0x01]).unwrap();
        assert!((celsius - 36.6).abs() < 1e-9);
    }

    #[test]
    fn test_fixed_offset_too_short() {
        let err = Decoder::default().decode_celsius(&[0x01]).unwrap_err();
        assert!(matches!(err, Error::InvalidData { .. }));
        assert!(Decoder::default().decode_celsius(&[]).is_err());
    }

    #[test]
    fn test_range_validation() {
        let decoder = Decoder::default().with_range(20.0, 50.0);
        assert!(decoder.decode_celsius(&SAMPLE).is_ok());

        // 0x0258 = 600 -> 60.0 °C
        let err = decoder.decode_celsius(&[0x00, 0x58, 0x02]).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { .. }));
    }

    #[test]
    fn test_ieee11073_celsius() {
        // mantissa 370, exponent -1
        let decoder = Decoder::new(DecodeStrategy::Ieee11073);
        let celsius = decoder
            .decode_celsius(&[0x00, 0x72, 0x01, 0x00, 0xFF])
            .unwrap();
        assert!((celsius - 37.0).abs() < 1e-9);
    }

    #[test]
    fn test_ieee11073_fahrenheit_flag() {
        // 986 * 10^-1 = 98.6 °F
        let decoder = Decoder::new(DecodeStrategy::Ieee11073);
        let celsius = decoder
            .decode_celsius(&[0x01, 0xDA, 0x03, 0x00, 0xFF])
            .unwrap();
        assert!((celsius - 37.0).abs() < 1e-6);
    }

    #[test]
    fn test_ieee11073_negative_mantissa() {
        // -50 * 10^-1 = -5.0
        let decoder = Decoder::new(DecodeStrategy::Ieee11073);
        let celsius = decoder
            .decode_celsius(&[0x00, 0xCE, 0xFF, 0xFF, 0xFF])
            .unwrap();
        assert!((celsius + 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_ieee11073_reserved() {
        let decoder = Decoder::new(DecodeStrategy::Ieee11073);
        let err = decoder
            .decode_celsius(&[0x00, 0xFF, 0xFF, 0x7F, 0x00])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidData { .. }));
    }

    #[test]
    fn test_strategy_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            strategy: DecodeStrategy,
        }
        let w: Wrapper = toml::from_str("strategy = \"ieee11073\"").unwrap();
        assert_eq!(w.strategy, DecodeStrategy::Ieee11073);
        let w: Wrapper = toml::from_str("strategy = \"fixed-offset\"").unwrap();
        assert_eq!(w.strategy, DecodeStrategy::FixedOffset);
    }
}
