// Copyright 2025 Netgauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Throughput arithmetic and display formatting.
//!
//! Rates use binary byte units (1 MiB = 1,048,576 bytes) combined with a
//! decimal bit conversion (x8), so `mbps = bytes * 8 / (1_048_576 * secs)`.

use std::time::Duration;

/// Bytes in one mebibyte.
pub const BYTES_PER_MIB: u64 = 1_048_576;

/// Throughput in Mbps for `bytes` transferred over `elapsed`.
///
/// Returns `None` when no time has elapsed.
pub fn mbps(bytes: u64, elapsed: Duration) -> Option<f64> {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return None;
    }
    Some((bytes as f64 * 8.0) / (BYTES_PER_MIB as f64 * secs))
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Format speed for display (e.g., "125.5 Mbps" or "1.2 Gbps").
pub fn format_speed(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.1} Gbps", mbps / 1000.0)
    } else if mbps >= 100.0 {
        format!("{:.0} Mbps", mbps)
    } else if mbps >= 10.0 {
        format!("{:.1} Mbps", mbps)
    } else {
        format!("{:.2} Mbps", mbps)
    }
}

/// Format a latency value for display.
pub fn format_latency(ms: f64) -> String {
    format!("{:.2} ms", ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mbps_reference_value() {
        let rate = mbps(125_000_000, Duration::from_secs(10)).unwrap();
        assert!((rate - 95.367_431_640_625).abs() < 1e-9);
        assert_eq!(round2(rate), 95.37);
    }

    #[test]
    fn test_one_mib_per_second_is_eight_mbps() {
        assert_eq!(mbps(BYTES_PER_MIB, Duration::from_secs(1)), Some(8.0));
    }

    #[test]
    fn test_mbps_zero_elapsed() {
        assert_eq!(mbps(1_000, Duration::ZERO), None);
    }

    #[test]
    fn test_mbps_monotonic_in_bytes() {
        let elapsed = Duration::from_millis(2_500);
        let mut last = 0.0;
        for bytes in [0u64, 1, 1_000, 65_536, 1_048_576, 50_000_000] {
            let rate = mbps(bytes, elapsed).unwrap();
            assert!(rate >= last);
            last = rate;
        }
    }

    #[test]
    fn test_mbps_decreasing_in_elapsed() {
        let mut last = f64::INFINITY;
        for ms in [1u64, 10, 200, 1_000, 10_000, 60_000] {
            let rate = mbps(10_000_000, Duration::from_millis(ms)).unwrap();
            assert!(rate < last);
            last = rate;
        }
    }

    #[test]
    fn test_format_speed_tiers() {
        assert_eq!(format_speed(1200.0), "1.2 Gbps");
        assert_eq!(format_speed(500.0), "500 Mbps");
        assert_eq!(format_speed(50.5), "50.5 Mbps");
        assert_eq!(format_speed(0.5), "0.50 Mbps");
    }

    #[test]
    fn test_format_latency() {
        assert_eq!(format_latency(50.0), "50.00 ms");
    }
}
