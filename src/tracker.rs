//! Tracker handle and methods.
//!
//! Represents a single facial tracker peripheral and its connection
//! lifecycle.

use chrono::Local;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::ble::address::PeripheralAddress;
use crate::ble::btleplug_platform::BtleplugGatt;
use crate::ble::connection::{
    release_detached, ConnectionEvent, ConnectionState, HeldResources, NotificationPump,
    StateTracker, Subscribers,
};
use crate::ble::platform::{ClientConfiguration, GattClient};
use crate::ble::uuids::{CHARACTERISTIC_UUID, SERVICE_UUID};
use crate::data::TrackingData;
use crate::error::{Error, Result};

/// Callback handle for unregistering callbacks.
///
/// Dropping the handle unregisters the callback.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Keep the callback registered for as long as the tracker lives.
    pub fn detach(mut self) {
        self.unregister_fn.take();
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Turn a lookup result into the resource or the given error.
fn required<T>(found: Result<Option<T>>, missing: impl FnOnce() -> Error) -> Result<T> {
    found?.ok_or_else(missing)
}

/// Run one connection step unless the caller cancels first.
async fn until_cancelled<C, T>(
    cancel: &mut Pin<&mut C>,
    step: impl Future<Output = Result<T>>,
) -> Result<T>
where
    C: Future<Output = ()>,
{
    tokio::select! {
        biased;
        _ = cancel.as_mut() => Err(Error::Cancelled),
        result = step => result,
    }
}

/// A discovered facial tracker.
///
/// Created by [`crate::DeviceScanner`] for each matching peripheral.
/// Connecting resolves the tracker service and characteristic and
/// subscribes to notifications; every failure rolls back whatever was
/// acquired. Dropping the handle disconnects it.
pub struct TrackerHandle<G: GattClient = BtleplugGatt> {
    address: PeripheralAddress,
    gatt: Arc<G>,
    held: Mutex<HeldResources<G>>,
    status: StateTracker,
    subscribers: Subscribers,
}

impl<G: GattClient> TrackerHandle<G> {
    /// Create a handle bound to a peripheral address.
    pub(crate) fn new(address: PeripheralAddress, gatt: Arc<G>) -> Self {
        Self {
            address,
            gatt,
            held: Mutex::new(HeldResources::Nothing),
            status: StateTracker::new(address),
            subscribers: Subscribers::default(),
        }
    }

    // === Identification ===

    /// Get the peripheral address.
    pub fn address(&self) -> PeripheralAddress {
        self.address
    }

    // === Connection ===

    /// Get the current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.status.get()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.status.subscribe()
    }

    /// Connect and subscribe to tracking notifications.
    ///
    /// Returns `false` if any step failed; the reason is logged. Use
    /// [`TrackerHandle::try_connect`] to get it as an error instead.
    pub async fn connect(&self) -> bool {
        match self.try_connect().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to connect to tracker {}: {}", self.address, e);
                false
            }
        }
    }

    /// Connect and subscribe to tracking notifications.
    ///
    /// Succeeds immediately if already connected.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error. Nothing stays acquired.
    pub async fn try_connect(&self) -> Result<()> {
        self.try_connect_with_cancel(futures::future::pending()).await
    }

    /// Connect, giving up when `cancel` completes first.
    ///
    /// Dropping the returned future before it completes has the same effect
    /// as cancelling: whatever was acquired is released and the previous
    /// state restored.
    ///
    /// # Errors
    ///
    /// As [`TrackerHandle::try_connect`], plus [`Error::Cancelled`].
    pub async fn try_connect_with_cancel<C>(&self, cancel: C) -> Result<()>
    where
        C: Future<Output = ()> + Send,
    {
        let held = self.held.lock().await;

        if held.is_subscribed() {
            debug!("Already connected to {}", self.address);
            return Ok(());
        }

        let mut attempt = Attempt::begin(self, held);

        tokio::pin!(cancel);
        match self.establish(&mut attempt.held, &mut cancel).await {
            Ok(()) => {
                attempt.succeed();
                Ok(())
            }
            Err(e) => attempt.fail(e).await,
        }
    }

    /// Acquire link, service, characteristic and notifications in order.
    ///
    /// Each resource goes into `held` as soon as it exists.
    async fn establish<C>(
        &self,
        held: &mut HeldResources<G>,
        cancel: &mut Pin<&mut C>,
    ) -> Result<()>
    where
        C: Future<Output = ()> + Send,
    {
        let gatt = &*self.gatt;

        *held = HeldResources::Link(until_cancelled(cancel, gatt.open_link(self.address)).await?);

        let found = until_cancelled(cancel, gatt.find_service(held.link()?, SERVICE_UUID)).await;
        let service = required(found, || Error::ServiceNotFound {
            uuid: SERVICE_UUID.to_string(),
        })?;
        held.add_service(service);

        let found = until_cancelled(
            cancel,
            gatt.find_characteristic(held.link()?, held.service()?, CHARACTERISTIC_UUID),
        )
        .await;
        let characteristic = required(found, || Error::CharacteristicNotFound {
            uuid: CHARACTERISTIC_UUID.to_string(),
        })?;

        let events =
            until_cancelled(cancel, gatt.value_changed(held.link()?, &characteristic)).await?;
        let pump = NotificationPump::spawn(self.address, events, self.subscribers.clone());
        held.add_subscription(characteristic, pump);

        let (link, characteristic) = held.subscription()?;
        let status = until_cancelled(
            cancel,
            gatt.write_client_configuration(link, characteristic, ClientConfiguration::Notify),
        )
        .await?;

        if !status.is_success() {
            return Err(Error::NotificationsRejected { status });
        }
        Ok(())
    }

    /// Unsubscribe and release the connection.
    ///
    /// Does nothing if not connected; safe to call repeatedly.
    pub async fn disconnect(&self) {
        let mut held = self.held.lock().await;
        let resources = std::mem::replace(&mut *held, HeldResources::Nothing);

        if resources.is_empty() {
            debug!("Tracker {} not connected, nothing to release", self.address);
            return;
        }

        info!("Disconnecting from tracker {}", self.address);
        resources.release(&self.gatt).await;
        self.status.set(ConnectionState::Disconnected);
    }

    // === Tracking Data ===

    /// Read the current tracking value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if not connected.
    pub async fn read(&self) -> Result<TrackingData> {
        let held = self.held.lock().await;
        let (link, characteristic) = held.subscription()?;

        let value = self.gatt.read_value(link, characteristic).await?;
        Ok(TrackingData::new(Local::now(), value))
    }

    /// Register a callback for tracking notifications.
    ///
    /// Callbacks run in registration order on the notification task and
    /// must not block. A panicking callback stops delivery for this
    /// connection.
    pub fn on_value_changed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&TrackingData) + Send + Sync + 'static,
    {
        let callback_id = self.subscribers.add(Arc::new(callback));
        let subscribers = self.subscribers.clone();

        CallbackHandle::new(callback_id, move || {
            subscribers.remove(callback_id);
        })
    }
}

impl<G: GattClient> Drop for TrackerHandle<G> {
    fn drop(&mut self) {
        let resources = std::mem::replace(self.held.get_mut(), HeldResources::Nothing);
        if resources.is_empty() {
            return;
        }

        if tokio::runtime::Handle::try_current().is_ok() {
            release_detached(resources, self.gatt.clone());
        } else {
            resources.abort_notifications();
            warn!(
                "Tracker {} dropped outside a runtime, connection not released",
                self.address
            );
        }
    }
}

/// A connection attempt holding the tracker's resource lock.
///
/// Unless settled through [`Attempt::succeed`] or [`Attempt::fail`],
/// dropping it releases what was acquired and restores the prior state.
struct Attempt<'a, G: GattClient> {
    tracker: &'a TrackerHandle<G>,
    held: MutexGuard<'a, HeldResources<G>>,
    previous: ConnectionState,
    settled: bool,
}

impl<'a, G: GattClient> Attempt<'a, G> {
    fn begin(tracker: &'a TrackerHandle<G>, held: MutexGuard<'a, HeldResources<G>>) -> Self {
        let previous = tracker.status.get();
        info!("Connecting to tracker {}", tracker.address);
        tracker.status.set(ConnectionState::Connecting);

        Self {
            tracker,
            held,
            previous,
            settled: false,
        }
    }

    fn succeed(mut self) {
        self.settled = true;
        self.tracker.status.set(ConnectionState::Connected);
        info!("Connected to tracker {}", self.tracker.address);
    }

    async fn fail(mut self, error: Error) -> Result<()> {
        debug!(
            "Rolling back connection to {}: {}",
            self.tracker.address, error
        );

        let resources = std::mem::replace(&mut *self.held, HeldResources::Nothing);
        if let Err(e) = release_detached(resources, self.tracker.gatt.clone()).await {
            warn!("Rollback for {} did not finish: {}", self.tracker.address, e);
        }

        self.settled = true;
        self.tracker.status.set(self.previous);
        Err(error)
    }
}

impl<G: GattClient> Drop for Attempt<'_, G> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let resources = std::mem::replace(&mut *self.held, HeldResources::Nothing);
        if !resources.is_empty() {
            warn!(
                "Connection attempt to {} abandoned, releasing",
                self.tracker.address
            );
            if tokio::runtime::Handle::try_current().is_ok() {
                release_detached(resources, self.tracker.gatt.clone());
            } else {
                resources.abort_notifications();
            }
        }

        self.tracker.status.set(self.previous);
    }
}

impl<G: GattClient> std::fmt::Debug for TrackerHandle<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerHandle")
            .field("address", &self.address)
            .field("state", &self.connection_state())
            .finish()
    }
}
