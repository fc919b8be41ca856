//! Error types for the facial-tracker-ble crate.

use thiserror::Error;

use crate::ble::platform::GattStatus;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// No peripheral with the given address is known to the adapter.
    #[error("Peripheral not found: {address}")]
    PeripheralNotFound {
        /// The address that was searched for.
        address: String,
    },

    /// Operation requires a connection but the tracker is not connected.
    #[error("Tracker not connected")]
    NotConnected,

    /// The tracker service was not exposed by the peripheral.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// The tracking characteristic was not found within the tracker service.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// The peripheral did not accept the client configuration descriptor write.
    #[error("Notification subscription rejected: {status}")]
    NotificationsRejected {
        /// The status reported by the GATT layer.
        status: GattStatus,
    },

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// A peripheral address could not be parsed.
    #[error("Invalid peripheral address: {value}")]
    InvalidAddress {
        /// The text that failed to parse.
        value: String,
    },
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
