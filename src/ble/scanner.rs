//! BLE scanning functionality.
//!
//! Provides the scanner for discovering facial trackers.

use btleplug::platform::Adapter;
use futures::stream::StreamExt;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::address::PeripheralAddress;
use crate::ble::btleplug_platform::{first_adapter, BtleplugGatt, BtleplugWatcher};
use crate::ble::platform::{Advertisement, AdvertisementWatcher, GattClient, ScanningMode};
use crate::ble::uuids::SERVICE_UUID;
use crate::error::Result;
use crate::tracker::TrackerHandle;

/// Scan timeout used when none is given.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(60);

/// Scan parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// How long to wait for a matching advertisement.
    pub timeout: Duration,
    /// Scanning mode requested from the adapter.
    pub mode: ScanningMode,
    /// Service a peripheral must advertise to be reported.
    pub target_service: Uuid,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SCAN_TIMEOUT,
            mode: ScanningMode::Active,
            target_service: SERVICE_UUID,
        }
    }
}

impl ScanConfig {
    /// Default configuration with a different timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// State of a single scan call.
struct ScanSession<G: GattClient> {
    target_service: Uuid,
    gatt: Arc<G>,
    seen: HashSet<PeripheralAddress>,
    trackers: Vec<TrackerHandle<G>>,
}

impl<G: GattClient> ScanSession<G> {
    fn new(target_service: Uuid, gatt: Arc<G>) -> Self {
        Self {
            target_service,
            gatt,
            seen: HashSet::new(),
            trackers: Vec::new(),
        }
    }

    /// Handle one advertisement. Returns true if it produced a tracker.
    ///
    /// Only the first advertisement from an address is considered.
    fn observe(&mut self, advertisement: Advertisement) -> bool {
        if !self.seen.insert(advertisement.address) {
            return false;
        }

        info!(
            "[{} ({})]",
            advertisement.local_name.as_deref().unwrap_or(""),
            advertisement.address
        );
        for uuid in &advertisement.service_uuids {
            info!("Service UUID: {}", uuid);
        }

        if !advertisement.advertises(&self.target_service) {
            return false;
        }

        info!("Tracker found at {}", advertisement.address);
        self.trackers
            .push(TrackerHandle::new(advertisement.address, self.gatt.clone()));
        true
    }

    fn into_trackers(self) -> Vec<TrackerHandle<G>> {
        self.trackers
    }
}

/// A started advertisement watch.
///
/// Dropped without [`ActiveWatch::stop`], it stops the watch on a task of
/// its own, so an abandoned scan does not leave the adapter scanning.
struct ActiveWatch<W: AdvertisementWatcher + 'static> {
    watcher: Arc<W>,
    stopped: bool,
}

impl<W: AdvertisementWatcher + 'static> ActiveWatch<W> {
    fn new(watcher: Arc<W>) -> Self {
        Self {
            watcher,
            stopped: false,
        }
    }

    async fn stop(mut self) {
        self.stopped = true;
        if let Err(e) = self.watcher.stop().await {
            warn!("Failed to stop advertisement watch: {}", e);
        }
    }
}

impl<W: AdvertisementWatcher + 'static> Drop for ActiveWatch<W> {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }

        debug!("Scan abandoned, stopping advertisement watch");
        let watcher = self.watcher.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(e) = watcher.stop().await {
                    warn!("Failed to stop advertisement watch: {}", e);
                }
            });
        }
    }
}

/// BLE scanner for discovering facial trackers.
pub struct DeviceScanner<W = BtleplugWatcher, G = BtleplugGatt> {
    watcher: Arc<W>,
    gatt: Arc<G>,
}

impl DeviceScanner {
    /// Create a scanner on the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        Ok(Self::with_adapter(first_adapter().await?))
    }

    /// Create a scanner on a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self::with_platform(
            BtleplugWatcher::new(adapter.clone()),
            Arc::new(BtleplugGatt::new(adapter)),
        )
    }
}

impl<W: AdvertisementWatcher + 'static, G: GattClient> DeviceScanner<W, G> {
    /// Create a scanner on explicit platform collaborators.
    pub fn with_platform(watcher: W, gatt: Arc<G>) -> Self {
        Self {
            watcher: Arc::new(watcher),
            gatt,
        }
    }

    /// Scan with the default 60 second timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the advertisement watch cannot be started.
    pub async fn scan_default(&self) -> Result<Vec<TrackerHandle<G>>> {
        self.scan_with_config(&ScanConfig::default()).await
    }

    /// Scan until the first tracker is found or `timeout` elapses.
    ///
    /// An empty list means nothing matched in time.
    ///
    /// # Errors
    ///
    /// Returns an error if the advertisement watch cannot be started.
    pub async fn scan(&self, timeout: Duration) -> Result<Vec<TrackerHandle<G>>> {
        self.scan_with_config(&ScanConfig::with_timeout(timeout))
            .await
    }

    /// Scan with explicit parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the advertisement watch cannot be started.
    pub async fn scan_with_config(&self, config: &ScanConfig) -> Result<Vec<TrackerHandle<G>>> {
        self.scan_with_cancel(config, futures::future::pending())
            .await
    }

    /// Scan, also stopping early when `cancel` completes.
    ///
    /// Cancellation is not an error: trackers found so far are returned.
    /// The advertisement watch is stopped on every exit, including when the
    /// returned future is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the advertisement watch cannot be started.
    pub async fn scan_with_cancel<C>(
        &self,
        config: &ScanConfig,
        cancel: C,
    ) -> Result<Vec<TrackerHandle<G>>>
    where
        C: Future<Output = ()> + Send,
    {
        info!(
            "Scanning for facial trackers (service {})",
            config.target_service
        );

        let mut advertisements = self.watcher.start(config.mode).await?.fuse();
        let watch = ActiveWatch::new(self.watcher.clone());
        let mut session = ScanSession::new(config.target_service, self.gatt.clone());

        let deadline = tokio::time::sleep(config.timeout);
        tokio::pin!(deadline);
        tokio::pin!(cancel);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    debug!("Scan timed out after {:?}", config.timeout);
                    break;
                }
                _ = &mut cancel => {
                    debug!("Scan cancelled");
                    break;
                }
                Some(advertisement) = advertisements.next() => {
                    if session.observe(advertisement) {
                        break;
                    }
                }
            }
        }

        drop(advertisements);
        watch.stop().await;

        Ok(session.into_trackers())
    }
}
