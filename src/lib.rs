// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # facial-tracker-ble
//!
//! A Rust library for receiving tracking data from simple
//! facial tracker peripherals via Bluetooth Low Energy.
//!
//! A tracker advertises the service `00001069-0000-1000-8000-00805F9B34FB`
//! and streams raw tracking samples through notifications on the
//! characteristic `00007777-0000-1000-8000-00805F9B34FB`.
//!
//! ## Features
//!
//! - **Tracker Discovery**: Time-bounded scan that stops at the first tracker
//! - **Notifications**: Timestamped raw payloads delivered to callbacks
//! - **On-demand Reads**: Read the current tracking value
//! - **Clean Teardown**: Every failed connect and every disconnect releases
//!   all GATT resources
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use facial_tracker_ble::{DeviceScanner, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let scanner = DeviceScanner::new().await?;
//!     let trackers = scanner.scan_default().await?;
//!
//!     let Some(tracker) = trackers.first() else {
//!         return Ok(());
//!     };
//!
//!     let _handle = tracker.on_value_changed(|data| println!("Notify: {}", data));
//!     if tracker.connect().await {
//!         tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!     }
//!
//!     tracker.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Not supported. Trackers are identified by their 48-bit address, which
//! CoreBluetooth never reports; the scanner ignores address-less
//! peripherals and therefore finds nothing.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod data;
pub mod error;
pub mod tracker;
pub mod utils;

// Re-exports for convenience
pub use ble::address::PeripheralAddress;
pub use ble::connection::{ConnectionEvent, ConnectionState};
pub use ble::platform::{AdvertisementWatcher, GattClient, ScanningMode};
pub use ble::scanner::{DeviceScanner, ScanConfig, DEFAULT_SCAN_TIMEOUT};
pub use ble::uuids::{CHARACTERISTIC_UUID, CLIENT_CONFIG_DESCRIPTOR_UUID, SERVICE_UUID};
pub use data::TrackingData;
pub use error::{Error, Result};
pub use tracker::{CallbackHandle, TrackerHandle};
pub use utils::hex_string;
