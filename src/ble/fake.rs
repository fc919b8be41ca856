//! In-memory GATT client for tests.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

use crate::ble::address::PeripheralAddress;
use crate::ble::platform::{ClientConfiguration, GattClient, GattStatus, ValueChanged};
use crate::error::{Error, Result};

#[derive(Debug)]
pub(crate) struct FakeLink;

#[derive(Debug)]
pub(crate) struct FakeService;

#[derive(Debug)]
pub(crate) struct FakeCharacteristic;

/// Step at which the fake peripheral misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    OpenLink,
    MissingService,
    MissingCharacteristic,
    Register,
    Rejected(GattStatus),
    WriteError,
    /// The descriptor write never completes.
    StallWrite,
}

/// Records every call so tests can check acquisition and release order.
#[derive(Default)]
pub(crate) struct FakeGatt {
    fault: Mutex<Option<Fault>>,
    read_value: Mutex<Vec<u8>>,
    log: Arc<Mutex<Vec<&'static str>>>,
    notify_tx: Mutex<Option<mpsc::UnboundedSender<ValueChanged>>>,
}

/// Logs when the value-changed stream is dropped.
struct Unregister(Arc<Mutex<Vec<&'static str>>>);

impl Drop for Unregister {
    fn drop(&mut self) {
        self.0.lock().push("unregister");
    }
}

impl FakeGatt {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing(fault: Fault) -> Arc<Self> {
        let gatt = Self::default();
        *gatt.fault.lock() = Some(fault);
        Arc::new(gatt)
    }

    pub(crate) fn set_fault(&self, fault: Option<Fault>) {
        *self.fault.lock() = fault;
    }

    pub(crate) fn set_read_value(&self, value: Vec<u8>) {
        *self.read_value.lock() = value;
    }

    pub(crate) fn log(&self) -> Vec<&'static str> {
        self.log.lock().clone()
    }

    pub(crate) fn count(&self, entry: &str) -> usize {
        self.log.lock().iter().filter(|e| **e == entry).count()
    }

    /// Deliver a value-changed event; false once unregistered.
    pub(crate) fn notify(&self, event: ValueChanged) -> bool {
        match self.notify_tx.lock().as_ref() {
            Some(tx) => tx.unbounded_send(event).is_ok(),
            None => false,
        }
    }

    fn record(&self, entry: &'static str) {
        self.log.lock().push(entry);
    }

    fn fault(&self) -> Option<Fault> {
        *self.fault.lock()
    }
}

#[async_trait]
impl GattClient for FakeGatt {
    type Link = FakeLink;
    type Service = FakeService;
    type Characteristic = FakeCharacteristic;

    async fn open_link(&self, address: PeripheralAddress) -> Result<FakeLink> {
        if self.fault() == Some(Fault::OpenLink) {
            return Err(Error::PeripheralNotFound {
                address: address.to_string(),
            });
        }
        self.record("open_link");
        Ok(FakeLink)
    }

    async fn find_service(&self, _link: &FakeLink, _uuid: Uuid) -> Result<Option<FakeService>> {
        if self.fault() == Some(Fault::MissingService) {
            return Ok(None);
        }
        self.record("find_service");
        Ok(Some(FakeService))
    }

    async fn find_characteristic(
        &self,
        _link: &FakeLink,
        _service: &FakeService,
        _uuid: Uuid,
    ) -> Result<Option<FakeCharacteristic>> {
        if self.fault() == Some(Fault::MissingCharacteristic) {
            return Ok(None);
        }
        self.record("find_characteristic");
        Ok(Some(FakeCharacteristic))
    }

    async fn value_changed(
        &self,
        _link: &FakeLink,
        _characteristic: &FakeCharacteristic,
    ) -> Result<BoxStream<'static, ValueChanged>> {
        if self.fault() == Some(Fault::Register) {
            return Err(Error::NotConnected);
        }
        self.record("register");

        let (tx, rx) = mpsc::unbounded();
        *self.notify_tx.lock() = Some(tx);

        let guard = Unregister(self.log.clone());
        Ok(rx
            .map(move |event| {
                let _guard = &guard;
                event
            })
            .boxed())
    }

    async fn write_client_configuration(
        &self,
        _link: &FakeLink,
        _characteristic: &FakeCharacteristic,
        _value: ClientConfiguration,
    ) -> Result<GattStatus> {
        self.record("write_cccd");
        match self.fault() {
            Some(Fault::Rejected(status)) => Ok(status),
            Some(Fault::WriteError) => Err(Error::NotConnected),
            Some(Fault::StallWrite) => futures::future::pending().await,
            _ => Ok(GattStatus::Success),
        }
    }

    async fn read_value(
        &self,
        _link: &FakeLink,
        _characteristic: &FakeCharacteristic,
    ) -> Result<Vec<u8>> {
        self.record("read");
        Ok(self.read_value.lock().clone())
    }

    async fn release_service(&self, _link: &FakeLink, _service: FakeService) {
        self.record("release_service");
    }

    async fn release_link(&self, _link: FakeLink) {
        self.record("release_link");
    }
}
