//! BLE connection management.
//!
//! Connection state for a tracker, the resources a connection holds, and
//! the notification pump that feeds subscribers.

use futures::stream::{BoxStream, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::ble::address::PeripheralAddress;
use crate::ble::platform::{GattClient, ValueChanged};
use crate::data::TrackingData;
use crate::error::{Error, Result};

/// Connection state for a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Never connected.
    #[default]
    Unconnected,
    /// Resolving the service and characteristic and subscribing.
    Connecting,
    /// Subscribed to tracking notifications.
    Connected,
    /// Was connected, all resources released.
    Disconnected,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unconnected => write!(f, "Unconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Event for connection state changes.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    /// The address of the peripheral.
    pub address: PeripheralAddress,
    /// The new connection state.
    pub state: ConnectionState,
}

/// Current state plus the channel announcing its changes.
pub(crate) struct StateTracker {
    address: PeripheralAddress,
    state: RwLock<ConnectionState>,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl StateTracker {
    pub(crate) fn new(address: PeripheralAddress) -> Self {
        let (event_tx, _) = broadcast::channel(16);

        Self {
            address,
            state: RwLock::new(ConnectionState::Unconnected),
            event_tx,
        }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.state.read()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// Update the connection state and emit an event.
    pub(crate) fn set(&self, new_state: ConnectionState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            debug!(
                "Connection state changed for {}: {} -> {}",
                self.address, old_state, new_state
            );

            let _ = self.event_tx.send(ConnectionEvent {
                address: self.address,
                state: new_state,
            });
        }
    }
}

type Callback = Arc<dyn Fn(&TrackingData) + Send + Sync>;

/// Registered notification subscribers, in registration order.
#[derive(Clone, Default)]
pub(crate) struct Subscribers {
    callbacks: Arc<RwLock<Vec<(u64, Callback)>>>,
    next_id: Arc<AtomicU64>,
}

impl Subscribers {
    pub(crate) fn add(&self, callback: Callback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks.write().push((id, callback));
        id
    }

    pub(crate) fn remove(&self, id: u64) {
        self.callbacks.write().retain(|(cb_id, _)| *cb_id != id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Invoke every subscriber with the same sample.
    ///
    /// Runs on a snapshot so callbacks may register or unregister freely.
    pub(crate) fn dispatch(&self, data: &TrackingData) {
        let snapshot: Vec<Callback> = self
            .callbacks
            .read()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        for callback in snapshot {
            callback(data);
        }
    }
}

/// Task forwarding value-changed events to subscribers.
///
/// Owns the platform registration: the event stream is dropped when the
/// task ends, which unregisters it.
pub(crate) struct NotificationPump {
    handle: JoinHandle<()>,
}

impl NotificationPump {
    pub(crate) fn spawn(
        address: PeripheralAddress,
        mut events: BoxStream<'static, ValueChanged>,
        subscribers: Subscribers,
    ) -> Self {
        let handle = tokio::spawn(async move {
            trace!("Notification pump for {} started", address);

            while let Some(event) = events.next().await {
                let data = TrackingData::new(event.timestamp, event.value);
                debug!("Notification from {}: {}", address, data.payload_hex());
                subscribers.dispatch(&data);
            }

            trace!("Notification pump for {} ended", address);
        });

        Self { handle }
    }

    /// Stop the pump without waiting for it.
    pub(crate) fn abort(&self) {
        self.handle.abort();
    }

    /// Stop the pump and wait until no subscriber can run anymore.
    pub(crate) async fn stop(self) {
        self.handle.abort();
        match self.handle.await {
            Err(e) if e.is_panic() => {
                warn!("Notification delivery had stopped: a subscriber panicked");
            }
            _ => {}
        }
    }
}

/// Resources held by a tracker, released in reverse order of acquisition.
pub(crate) enum HeldResources<G: GattClient> {
    /// Nothing acquired.
    Nothing,
    /// Link to the peripheral open.
    Link(G::Link),
    /// Tracker service resolved.
    Service(G::Link, G::Service),
    /// Notifications registered on the tracking characteristic.
    Subscribed {
        link: G::Link,
        service: G::Service,
        characteristic: G::Characteristic,
        pump: NotificationPump,
    },
}

impl<G: GattClient> HeldResources<G> {
    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, Self::Nothing)
    }

    pub(crate) fn is_subscribed(&self) -> bool {
        matches!(self, Self::Subscribed { .. })
    }

    /// Borrow the open link.
    pub(crate) fn link(&self) -> Result<&G::Link> {
        match self {
            Self::Nothing => Err(Error::NotConnected),
            Self::Link(link) | Self::Service(link, _) | Self::Subscribed { link, .. } => Ok(link),
        }
    }

    /// Borrow the resolved tracker service.
    pub(crate) fn service(&self) -> Result<&G::Service> {
        match self {
            Self::Service(_, service) | Self::Subscribed { service, .. } => Ok(service),
            _ => Err(Error::NotConnected),
        }
    }

    /// Borrow the link and characteristic of an active subscription.
    pub(crate) fn subscription(&self) -> Result<(&G::Link, &G::Characteristic)> {
        match self {
            Self::Subscribed {
                link,
                characteristic,
                ..
            } => Ok((link, characteristic)),
            _ => Err(Error::NotConnected),
        }
    }

    /// Record the tracker service on top of an open link.
    pub(crate) fn add_service(&mut self, service: G::Service) {
        *self = match std::mem::replace(self, Self::Nothing) {
            Self::Link(link) => Self::Service(link, service),
            other => other,
        };
    }

    /// Record a notification registration on top of a resolved service.
    pub(crate) fn add_subscription(
        &mut self,
        characteristic: G::Characteristic,
        pump: NotificationPump,
    ) {
        *self = match std::mem::replace(self, Self::Nothing) {
            Self::Service(link, service) => Self::Subscribed {
                link,
                service,
                characteristic,
                pump,
            },
            other => {
                pump.abort();
                other
            }
        };
    }

    /// Stop notification delivery immediately, without releasing anything.
    pub(crate) fn abort_notifications(&self) {
        if let Self::Subscribed { pump, .. } = self {
            pump.abort();
        }
    }

    /// Release everything held.
    ///
    /// The notification pump is stopped before the service goes away.
    pub(crate) async fn release(self, gatt: &G) {
        match self {
            Self::Nothing => {}
            Self::Link(link) => gatt.release_link(link).await,
            Self::Service(link, service) => {
                gatt.release_service(&link, service).await;
                gatt.release_link(link).await;
            }
            Self::Subscribed {
                link,
                service,
                characteristic,
                pump,
            } => {
                pump.stop().await;
                drop(characteristic);
                gatt.release_service(&link, service).await;
                gatt.release_link(link).await;
            }
        }
    }
}

/// Release `resources` on a task of their own.
///
/// The release runs to completion even if whoever asked for it goes away.
pub(crate) fn release_detached<G: GattClient>(
    resources: HeldResources<G>,
    gatt: Arc<G>,
) -> JoinHandle<()> {
    resources.abort_notifications();
    tokio::spawn(async move {
        resources.release(&gatt).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Unconnected.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert_eq!(ConnectionState::default(), ConnectionState::Unconnected);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Connected), "Connected");
        assert_eq!(format!("{}", ConnectionState::Unconnected), "Unconnected");
    }

    #[test]
    fn test_state_tracker_emits_changes_only() {
        let tracker = StateTracker::new(PeripheralAddress::new([1, 2, 3, 4, 5, 6]));
        let mut rx = tracker.subscribe();

        tracker.set(ConnectionState::Connecting);
        tracker.set(ConnectionState::Connecting);
        tracker.set(ConnectionState::Connected);

        assert_eq!(rx.try_recv().unwrap().state, ConnectionState::Connecting);
        assert_eq!(rx.try_recv().unwrap().state, ConnectionState::Connected);
        assert!(rx.try_recv().is_err());
        assert_eq!(tracker.get(), ConnectionState::Connected);
    }

    #[test]
    fn test_subscribers_dispatch_in_order() {
        let subscribers = Subscribers::default();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            subscribers.add(Arc::new(move |data: &TrackingData| {
                seen.lock().push((tag, data.first_byte()));
            }));
        }

        subscribers.dispatch(&TrackingData::new(Local::now(), vec![7]));

        assert_eq!(
            *seen.lock(),
            vec![("first", Some(7)), ("second", Some(7)), ("third", Some(7))]
        );
    }

    #[tokio::test]
    async fn test_held_resources_grow_step_by_step() {
        use crate::ble::fake::{FakeCharacteristic, FakeGatt, FakeLink, FakeService};

        let gatt = FakeGatt::new();
        let mut held = HeldResources::<FakeGatt>::Nothing;
        assert!(matches!(held.link(), Err(Error::NotConnected)));

        held = HeldResources::Link(FakeLink);
        assert!(held.link().is_ok());
        assert!(held.service().is_err());

        held.add_service(FakeService);
        assert!(held.service().is_ok());
        assert!(held.subscription().is_err());

        let pump = NotificationPump::spawn(
            PeripheralAddress::default(),
            futures::stream::pending().boxed(),
            Subscribers::default(),
        );
        held.add_subscription(FakeCharacteristic, pump);
        assert!(held.is_subscribed());
        assert!(held.subscription().is_ok());

        release_detached(held, gatt.clone()).await.unwrap();
        assert_eq!(gatt.log(), vec!["release_service", "release_link"]);
    }

    #[test]
    fn test_subscribers_remove() {
        let subscribers = Subscribers::default();
        let a = subscribers.add(Arc::new(|_: &TrackingData| {}));
        let b = subscribers.add(Arc::new(|_: &TrackingData| {}));
        assert_ne!(a, b);
        assert_eq!(subscribers.len(), 2);

        subscribers.remove(a);
        assert_eq!(subscribers.len(), 1);
        subscribers.remove(a);
        assert_eq!(subscribers.len(), 1);
    }
}
