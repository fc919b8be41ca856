//! `btleplug` implementation of the platform collaborators.
//!
//! btleplug exposes neither a scanning mode switch nor notification
//! timestamps: scans use the backend's default (active on BlueZ and WinRT)
//! and notifications are stamped on receipt.
//!
//! Peripherals are identified by their 48-bit address. CoreBluetooth hides
//! addresses, so this backend finds no trackers on macOS.

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _,
    PeripheralProperties, ScanFilter, Service,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use chrono::Local;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::address::PeripheralAddress;
use crate::ble::platform::{
    Advertisement, AdvertisementWatcher, ClientConfiguration, GattClient, GattStatus,
    ScanningMode, ValueChanged,
};
use crate::ble::uuids::CLIENT_CONFIG_DESCRIPTOR_UUID;
use crate::error::{Error, Result};

/// Get the first Bluetooth adapter on this system.
///
/// # Errors
///
/// Returns an error if Bluetooth is not available.
pub async fn first_adapter() -> Result<Adapter> {
    let manager = Manager::new()
        .await
        .map_err(|_e| Error::BluetoothUnavailable)?;

    let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

    let adapter = adapters
        .into_iter()
        .next()
        .ok_or(Error::BluetoothUnavailable)?;

    info!(
        "Using Bluetooth adapter: {:?}",
        adapter.adapter_info().await.ok()
    );

    Ok(adapter)
}

/// Advertisement watcher backed by a btleplug adapter.
#[derive(Clone)]
pub struct BtleplugWatcher {
    adapter: Adapter,
}

impl BtleplugWatcher {
    /// Create a watcher on the given adapter.
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    async fn advertisement_for(adapter: &Adapter, id: &PeripheralId) -> Option<Advertisement> {
        let peripheral = match adapter.peripheral(id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let properties = peripheral.properties().await.ok().flatten()?;
        advertisement_from(properties)
    }
}

/// Convert advertised properties, dropping peripherals without an address.
///
/// CoreBluetooth never reports addresses, so on macOS every peripheral is
/// dropped here.
fn advertisement_from(properties: PeripheralProperties) -> Option<Advertisement> {
    let address = PeripheralAddress::from(properties.address);
    if address.is_unspecified() {
        trace!(
            "Ignoring {:?} without a peripheral address",
            properties.local_name
        );
        return None;
    }

    Some(Advertisement {
        address,
        service_uuids: properties.services,
        local_name: properties.local_name,
    })
}

#[async_trait]
impl AdvertisementWatcher for BtleplugWatcher {
    async fn start(&self, mode: ScanningMode) -> Result<BoxStream<'static, Advertisement>> {
        if mode == ScanningMode::Passive {
            debug!("Passive scanning not selectable through btleplug, using backend default");
        }

        // Subscribe before starting so no early advertisement is missed.
        let events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        let adapter = self.adapter.clone();
        let stream = events
            .filter_map(move |event| {
                let adapter = adapter.clone();
                async move {
                    match event {
                        CentralEvent::DeviceDiscovered(id)
                        | CentralEvent::DeviceUpdated(id)
                        | CentralEvent::ServicesAdvertisement { id, .. } => {
                            Self::advertisement_for(&adapter, &id).await
                        }
                        _ => None,
                    }
                }
            })
            .boxed();

        Ok(stream)
    }

    async fn stop(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }
}

/// Peripheral being connected by `open_link`.
///
/// Disconnects on drop unless kept, so a failed or abandoned `open_link`
/// leaves no connection behind.
struct PendingLink {
    peripheral: Peripheral,
    kept: bool,
}

impl PendingLink {
    fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            kept: false,
        }
    }

    fn keep(mut self) -> Peripheral {
        self.kept = true;
        self.peripheral.clone()
    }
}

impl Drop for PendingLink {
    fn drop(&mut self) {
        if self.kept {
            return;
        }

        let peripheral = self.peripheral.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    debug!("Disconnect of unfinished link {}: {}", peripheral.address(), e);
                }
            });
        }
    }
}

/// GATT client backed by a btleplug adapter.
#[derive(Clone)]
pub struct BtleplugGatt {
    adapter: Adapter,
}

impl BtleplugGatt {
    /// Create a GATT client on the given adapter.
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl GattClient for BtleplugGatt {
    type Link = Peripheral;
    type Service = Service;
    type Characteristic = Characteristic;

    async fn open_link(&self, address: PeripheralAddress) -> Result<Peripheral> {
        if address.is_unspecified() {
            return Err(Error::PeripheralNotFound {
                address: address.to_string(),
            });
        }

        let target = BDAddr::from(address);
        let peripheral = self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.address() == target)
            .ok_or_else(|| Error::PeripheralNotFound {
                address: address.to_string(),
            })?;

        let pending = PendingLink::new(peripheral);

        if !pending.peripheral.is_connected().await.unwrap_or(false) {
            pending.peripheral.connect().await?;
        }

        if let Err(e) = pending.peripheral.discover_services().await {
            warn!("Failed to discover services on {}: {}", address, e);
            return Err(Error::Bluetooth(e));
        }

        Ok(pending.keep())
    }

    async fn find_service(&self, link: &Peripheral, uuid: Uuid) -> Result<Option<Service>> {
        Ok(link.services().into_iter().find(|s| s.uuid == uuid))
    }

    async fn find_characteristic(
        &self,
        _link: &Peripheral,
        service: &Service,
        uuid: Uuid,
    ) -> Result<Option<Characteristic>> {
        Ok(service
            .characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned())
    }

    async fn value_changed(
        &self,
        link: &Peripheral,
        characteristic: &Characteristic,
    ) -> Result<BoxStream<'static, ValueChanged>> {
        let uuid = characteristic.uuid;
        let notifications = link.notifications().await?;

        Ok(notifications
            .filter_map(move |notification| {
                future::ready((notification.uuid == uuid).then(|| ValueChanged {
                    timestamp: Local::now(),
                    value: notification.value,
                }))
            })
            .boxed())
    }

    async fn write_client_configuration(
        &self,
        link: &Peripheral,
        characteristic: &Characteristic,
        value: ClientConfiguration,
    ) -> Result<GattStatus> {
        debug!(
            "Writing {:#06x} to {} of {}",
            value.to_raw(),
            CLIENT_CONFIG_DESCRIPTOR_UUID,
            characteristic.uuid
        );
        if !characteristic
            .descriptors
            .iter()
            .any(|d| d.uuid == CLIENT_CONFIG_DESCRIPTOR_UUID)
        {
            debug!("{} lists no client configuration descriptor", characteristic.uuid);
        }

        // btleplug performs the descriptor write itself.
        match value {
            ClientConfiguration::Notify | ClientConfiguration::Indicate => {
                link.subscribe(characteristic).await?
            }
            ClientConfiguration::None => link.unsubscribe(characteristic).await?,
        }
        Ok(GattStatus::Success)
    }

    async fn read_value(&self, link: &Peripheral, characteristic: &Characteristic) -> Result<Vec<u8>> {
        Ok(link.read(characteristic).await?)
    }

    async fn release_service(&self, _link: &Peripheral, service: Service) {
        // Services are plain data in btleplug; nothing to close.
        trace!("Released service {}", service.uuid);
    }

    async fn release_link(&self, link: Peripheral) {
        if let Err(e) = link.disconnect().await {
            warn!("Failed to disconnect {}: {}", link.address(), e);
        }
    }
}
