//! Platform Bluetooth collaborators.
//!
//! The scanner and tracker talk to the OS Bluetooth stack only through the
//! two traits in this module. [`crate::ble::btleplug_platform`] provides the
//! implementation used on real hardware.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use futures::stream::BoxStream;
use std::fmt;
use uuid::Uuid;

use crate::ble::address::PeripheralAddress;
use crate::error::Result;

/// Advertisement scanning mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScanningMode {
    /// Only listen for advertisements.
    Passive,
    /// Request scan-response data, which carries the advertised service list.
    #[default]
    Active,
}

/// A single received advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Address of the advertising peripheral.
    pub address: PeripheralAddress,
    /// Service UUIDs listed in the advertisement and scan response.
    pub service_uuids: Vec<Uuid>,
    /// Advertised local name, if any.
    pub local_name: Option<String>,
}

impl Advertisement {
    /// Check if the advertisement lists the given service.
    pub fn advertises(&self, service: &Uuid) -> bool {
        self.service_uuids.contains(service)
    }
}

/// A value-changed notification delivered by the GATT layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueChanged {
    /// When the platform received the notification.
    pub timestamp: DateTime<Local>,
    /// The new characteristic value.
    pub value: Vec<u8>,
}

/// Value written to a client characteristic configuration descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientConfiguration {
    /// Disable notifications and indications.
    None,
    /// Enable notifications.
    Notify,
    /// Enable indications.
    Indicate,
}

impl ClientConfiguration {
    /// The descriptor value, little-endian on the wire.
    pub fn to_raw(self) -> u16 {
        match self {
            Self::None => 0x0000,
            Self::Notify => 0x0001,
            Self::Indicate => 0x0002,
        }
    }
}

/// Outcome reported by the GATT layer for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GattStatus {
    /// The request completed.
    Success,
    /// The peripheral could not be reached.
    Unreachable,
    /// The peripheral answered with an ATT protocol error.
    ProtocolError(u8),
    /// The peripheral refused access.
    AccessDenied,
}

impl GattStatus {
    /// Check if the request completed.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::Unreachable => write!(f, "Unreachable"),
            Self::ProtocolError(code) => write!(f, "ProtocolError({:#04x})", code),
            Self::AccessDenied => write!(f, "AccessDenied"),
        }
    }
}

/// Advertisement watching primitive.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdvertisementWatcher: Send + Sync {
    /// Start watching and return the stream of received advertisements.
    async fn start(&self, mode: ScanningMode) -> Result<BoxStream<'static, Advertisement>>;

    /// Stop watching.
    async fn stop(&self) -> Result<()>;
}

/// GATT client primitive.
///
/// Each acquired resource is handed back through exactly one release call.
#[async_trait]
pub trait GattClient: Send + Sync + 'static {
    /// An open link to a peripheral.
    type Link: Send + Sync + 'static;
    /// A resolved GATT service.
    type Service: Send + Sync + 'static;
    /// A resolved GATT characteristic.
    type Characteristic: Send + Sync + 'static;

    /// Open a link to the peripheral with the given address.
    async fn open_link(&self, address: PeripheralAddress) -> Result<Self::Link>;

    /// Look up a service on the peripheral.
    async fn find_service(&self, link: &Self::Link, uuid: Uuid) -> Result<Option<Self::Service>>;

    /// Look up a characteristic within a service.
    async fn find_characteristic(
        &self,
        link: &Self::Link,
        service: &Self::Service,
        uuid: Uuid,
    ) -> Result<Option<Self::Characteristic>>;

    /// Register for value-changed events on a characteristic.
    ///
    /// Dropping the returned stream unregisters.
    async fn value_changed(
        &self,
        link: &Self::Link,
        characteristic: &Self::Characteristic,
    ) -> Result<BoxStream<'static, ValueChanged>>;

    /// Write the characteristic's client configuration descriptor.
    async fn write_client_configuration(
        &self,
        link: &Self::Link,
        characteristic: &Self::Characteristic,
        value: ClientConfiguration,
    ) -> Result<GattStatus>;

    /// Read the current characteristic value.
    async fn read_value(
        &self,
        link: &Self::Link,
        characteristic: &Self::Characteristic,
    ) -> Result<Vec<u8>>;

    /// Release a service obtained from [`GattClient::find_service`].
    async fn release_service(&self, link: &Self::Link, service: Self::Service);

    /// Release a link obtained from [`GattClient::open_link`].
    async fn release_link(&self, link: Self::Link);
}
