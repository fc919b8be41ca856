//! Utility functions for the facial-tracker-ble crate.

use std::fmt::Write;

/// Format bytes as a `0x`-prefixed lowercase hex string.
///
/// # Arguments
///
/// * `bytes` - The bytes to format
///
/// # Example
///
/// ```
/// use facial_tracker_ble::hex_string;
///
/// assert_eq!(hex_string(&[0xAB, 0x01, 0x02]), "0xab0102");
/// assert_eq!(hex_string(&[]), "0x");
/// ```
pub fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() + 1) * 2);
    out.push_str("0x");
    for byte in bytes {
        // Writing to a String cannot fail.
        let _ = write!(out, "{:02x}", byte);
    }
    out
}
