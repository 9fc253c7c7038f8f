//! Utility functions for the ft95-monitor crate.

use std::time::Duration;

/// Convert Celsius to Fahrenheit.
///
/// # Example
///
/// ```
/// use ft95_monitor::celsius_to_fahrenheit;
///
/// let fahrenheit = celsius_to_fahrenheit(100.0);
/// assert!((fahrenheit - 212.0).abs() < 0.001);
/// ```
#[inline]
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Convert Fahrenheit to Celsius.
///
/// # Example
///
/// ```
/// use ft95_monitor::fahrenheit_to_celsius;
///
/// let celsius = fahrenheit_to_celsius(212.0);
/// assert!((celsius - 100.0).abs() < 0.001);
/// ```
#[inline]
pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

/// Format an uptime as `H:MM:SS`, prefixed with `N day(s), ` past 24 hours.
///
/// Sub-second precision is dropped.
///
/// ```
/// use std::time::Duration;
/// use ft95_monitor::utils::format_uptime;
///
/// assert_eq!(format_uptime(Duration::from_secs(3725)), "1:02:05");
/// assert_eq!(format_uptime(Duration::from_secs(90_000)), "1 day, 1:00:00");
/// ```
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    let clock = format!("{hours}:{minutes:02}:{seconds:02}");
    match days {
        0 => clock,
        1 => format!("1 day, {clock}"),
        n => format!("{n} days, {clock}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_celsius_to_fahrenheit() {
        assert!((celsius_to_fahrenheit(0.0) - 32.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(100.0) - 212.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(-40.0) - (-40.0)).abs() < 0.001);
        assert!((celsius_to_fahrenheit(37.4) - 99.32).abs() < 0.001);
    }

    #[test]
    fn test_fahrenheit_to_celsius() {
        assert!((fahrenheit_to_celsius(32.0) - 0.0).abs() < 0.001);
        assert!((fahrenheit_to_celsius(212.0) - 100.0).abs() < 0.001);
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::ZERO), "0:00:00");
        assert_eq!(format_uptime(Duration::from_millis(59_999)), "0:00:59");
        assert_eq!(format_uptime(Duration::from_secs(36_000)), "10:00:00");
        assert_eq!(format_uptime(Duration::from_secs(2 * 86_400 + 61)), "2 days, 0:01:01");
    }
}
