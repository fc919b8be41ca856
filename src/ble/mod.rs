//! BLE communication layer.
//!
//! This module handles discovery of facial trackers and the GATT plumbing
//! for their connections.

pub mod address;
pub mod btleplug_platform;
pub mod connection;
#[cfg(test)]
pub(crate) mod fake;
pub mod platform;
pub mod scanner;
pub mod uuids;

pub use address::PeripheralAddress;
pub use connection::{ConnectionEvent, ConnectionState};
pub use scanner::{DeviceScanner, ScanConfig, DEFAULT_SCAN_TIMEOUT};
