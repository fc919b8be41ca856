//! BLE UUIDs used by the simple facial tracker.
//!
//! All three identifiers live on the Bluetooth Base UUID; only the leading
//! 32 bits differ.

use uuid::Uuid;

/// Bluetooth Base UUID (`00000000-0000-1000-8000-00805F9B34FB`).
pub const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// Expand a 16- or 32-bit short UUID onto the Bluetooth Base UUID.
///
/// # Example
///
/// ```
/// use facial_tracker_ble::ble::uuids::uuid_from_short;
///
/// let uuid = uuid_from_short(0x180a);
/// assert_eq!(uuid.to_string(), "0000180a-0000-1000-8000-00805f9b34fb");
/// ```
pub const fn uuid_from_short(short: u32) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | BLUETOOTH_BASE_UUID)
}

/// Facial tracker service, advertised by the peripheral.
pub const SERVICE_UUID: Uuid = uuid_from_short(0x1069);

/// Tracking value characteristic (Read, Notify).
pub const CHARACTERISTIC_UUID: Uuid = uuid_from_short(0x7777);

/// Client Characteristic Configuration Descriptor (Bluetooth SIG defined).
pub const CLIENT_CONFIG_DESCRIPTOR_UUID: Uuid = uuid_from_short(0x2902);
