//! In-memory implementation of the [`api`](crate::api) seam.
//!
//! Every behavior is scripted per peripheral: how connect resolves,
//! what each read returns, which subscriptions fail, and when the link
//! drops. Tests (and the demo) advertise devices and inject
//! notifications from the outside, then observe what the session core
//! does about it.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::StreamExt;
use log::trace;
use static_assertions::assert_impl_all;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::api::{
    AdvertisedProperties, Central, CentralEvent, CentralEventStream, Characteristic, DeviceId,
    NotificationStream, Peripheral, Service, ValueNotification,
};
use crate::{Error, Result};

/// How a scripted peripheral answers `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectScript {
    /// Resolves and the link comes up.
    Succeed,
    /// Resolves but the link never comes up.
    Refuse,
    /// Raises.
    Fail,
    /// Never resolves; drive timeouts against this.
    Hang,
}

struct CentralState {
    peripherals: DashMap<DeviceId, MockPeripheral>,
    /// Discovery order; `DashMap` iteration order is arbitrary.
    order: Mutex<Vec<DeviceId>>,
    events: broadcast::Sender<CentralEvent>,
    scanning: AtomicBool,
    scans_started: AtomicUsize,
    scans_stopped: AtomicUsize,
}

/// A scripted central. Cloning shares the underlying state, so tests
/// can keep a handle for advertising and assertions while the session
/// owns another.
#[derive(Clone)]
pub struct MockCentral {
    state: Arc<CentralState>,
}

impl MockCentral {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        MockCentral {
            state: Arc::new(CentralState {
                peripherals: DashMap::new(),
                order: Mutex::new(Vec::new()),
                events,
                scanning: AtomicBool::new(false),
                scans_started: AtomicUsize::new(0),
                scans_stopped: AtomicUsize::new(0),
            }),
        }
    }

    /// Make a peripheral visible, as if its advertisement just arrived.
    /// Re-advertising a known device announces an update instead.
    pub fn advertise(&self, peripheral: MockPeripheral) {
        let id = peripheral.id();
        if self.state.peripherals.insert(id.clone(), peripheral).is_some() {
            self.emit(CentralEvent::DeviceUpdated(id));
        } else {
            self.state.order.lock().unwrap().push(id.clone());
            self.emit(CentralEvent::DeviceDiscovered(id));
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.state.scanning.load(Ordering::SeqCst)
    }

    pub fn scans_started(&self) -> usize {
        self.state.scans_started.load(Ordering::SeqCst)
    }

    pub fn scans_stopped(&self) -> usize {
        self.state.scans_stopped.load(Ordering::SeqCst)
    }

    fn emit(&self, event: CentralEvent) {
        if let Err(lost) = self.state.events.send(event) {
            trace!("no event subscribers, dropping {:?}", lost.0);
        }
    }
}

impl Default for MockCentral {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for MockCentral {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("MockCentral")
            .field("peripherals", &self.state.peripherals.len())
            .field("scanning", &self.is_scanning())
            .finish()
    }
}

#[async_trait]
impl Central for MockCentral {
    type Peripheral = MockPeripheral;

    async fn events(&self) -> Result<CentralEventStream> {
        let receiver = self.state.events.subscribe();
        Ok(Box::pin(
            BroadcastStream::new(receiver).filter_map(|event| async move { event.ok() }),
        ))
    }

    async fn start_scan(&self) -> Result<()> {
        self.state.scanning.store(true, Ordering::SeqCst);
        self.state.scans_started.fetch_add(1, Ordering::SeqCst);
        // Re-announce everything already seen, the way platform stacks
        // replay cached devices when an observer attaches.
        let known = self.state.order.lock().unwrap().clone();
        for id in known {
            self.emit(CentralEvent::DeviceDiscovered(id));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        // Stopping an idle scan is a no-op.
        self.state.scanning.store(false, Ordering::SeqCst);
        self.state.scans_stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn peripherals(&self) -> Result<Vec<MockPeripheral>> {
        let order = self.state.order.lock().unwrap();
        Ok(order
            .iter()
            .filter_map(|id| self.state.peripherals.get(id).map(|entry| entry.value().clone()))
            .collect())
    }

    async fn peripheral(&self, id: &DeviceId) -> Result<MockPeripheral> {
        self.state
            .peripherals
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or(Error::DeviceNotFound)
    }
}

struct PeripheralState {
    id: DeviceId,
    name: Option<String>,
    rssi: Option<i16>,
    connect_script: ConnectScript,
    discovery_fails: bool,
    notifications_fail: bool,
    services: Vec<Service>,
    reads: HashMap<Uuid, Result<Vec<u8>>>,
    subscribe_errors: HashMap<Uuid, Error>,
    connected: AtomicBool,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    subscriptions: Mutex<Vec<Uuid>>,
    notify_sender: Mutex<Option<mpsc::UnboundedSender<ValueNotification>>>,
    notify_receiver: Mutex<Option<mpsc::UnboundedReceiver<ValueNotification>>>,
}

/// A scripted peripheral. Build one with [`MockPeripheral::builder`].
#[derive(Clone)]
pub struct MockPeripheral {
    state: Arc<PeripheralState>,
}

impl MockPeripheral {
    pub fn builder(id: &str) -> MockPeripheralBuilder {
        MockPeripheralBuilder {
            id: DeviceId::new(id),
            name: None,
            rssi: None,
            connect_script: ConnectScript::Succeed,
            discovery_fails: false,
            notifications_fail: false,
            services: Vec::new(),
            reads: HashMap::new(),
            subscribe_errors: HashMap::new(),
        }
    }

    /// Inject a notification, as if the device pushed a value. Frames
    /// are delivered to the notification stream in injection order.
    pub fn push_notification(&self, uuid: Uuid, value: Vec<u8>) {
        if let Some(sender) = self.state.notify_sender.lock().unwrap().as_ref() {
            let _ = sender.send(ValueNotification { uuid, value });
        }
    }

    /// Drop the link out from under the session: the notification
    /// stream ends and the device reports itself disconnected.
    pub fn drop_link(&self) {
        self.state.connected.store(false, Ordering::SeqCst);
        self.state.notify_sender.lock().unwrap().take();
    }

    pub fn connect_calls(&self) -> usize {
        self.state.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.disconnect_calls.load(Ordering::SeqCst)
    }

    /// The currently requested subscriptions, in request order.
    pub fn subscriptions(&self) -> Vec<Uuid> {
        self.state.subscriptions.lock().unwrap().clone()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }
}

impl Debug for MockPeripheral {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("MockPeripheral")
            .field("id", &self.state.id)
            .field("name", &self.state.name)
            .finish()
    }
}

#[async_trait]
impl Peripheral for MockPeripheral {
    fn id(&self) -> DeviceId {
        self.state.id.clone()
    }

    async fn properties(&self) -> Result<AdvertisedProperties> {
        Ok(AdvertisedProperties {
            local_name: self.state.name.clone(),
            rssi: self.state.rssi,
        })
    }

    async fn connect(&self) -> Result<()> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);
        match self.state.connect_script {
            ConnectScript::Succeed => {
                self.state.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            ConnectScript::Refuse => Ok(()),
            ConnectScript::Fail => Err(Error::RuntimeError(
                "connection attempt rejected".to_string(),
            )),
            ConnectScript::Hang => std::future::pending().await,
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.state.connected.store(false, Ordering::SeqCst);
        // Ends the notification stream; nothing is delivered after
        // disconnect.
        self.state.notify_sender.lock().unwrap().take();
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool> {
        Ok(self.state.connected.load(Ordering::SeqCst))
    }

    async fn discover_services(&self) -> Result<Vec<Service>> {
        self.ensure_connected()?;
        if self.state.discovery_fails {
            return Err(Error::RuntimeError("service discovery failed".to_string()));
        }
        Ok(self.state.services.clone())
    }

    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>> {
        self.ensure_connected()?;
        self.state
            .reads
            .get(&characteristic.uuid)
            .cloned()
            .unwrap_or(Err(Error::NoSuchCharacteristic))
    }

    async fn subscribe(&self, characteristic: &Characteristic) -> Result<()> {
        self.ensure_connected()?;
        if let Some(error) = self.state.subscribe_errors.get(&characteristic.uuid) {
            return Err(error.clone());
        }
        self.state
            .subscriptions
            .lock()
            .unwrap()
            .push(characteristic.uuid);
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: &Characteristic) -> Result<()> {
        self.ensure_connected()?;
        self.state
            .subscriptions
            .lock()
            .unwrap()
            .retain(|uuid| *uuid != characteristic.uuid);
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        if self.state.notifications_fail {
            return Err(Error::NotSupported(
                "notification streams unavailable".to_string(),
            ));
        }
        let receiver = self
            .state
            .notify_receiver
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| {
                Error::RuntimeError("notification stream already taken".to_string())
            })?;
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }
}

/// Script for one [`MockPeripheral`].
pub struct MockPeripheralBuilder {
    id: DeviceId,
    name: Option<String>,
    rssi: Option<i16>,
    connect_script: ConnectScript,
    discovery_fails: bool,
    notifications_fail: bool,
    services: Vec<Service>,
    reads: HashMap<Uuid, Result<Vec<u8>>>,
    subscribe_errors: HashMap<Uuid, Error>,
}

impl MockPeripheralBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    pub fn connect(mut self, script: ConnectScript) -> Self {
        self.connect_script = script;
        self
    }

    /// Append a service to the topology, in discovery order.
    pub fn service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    pub fn read_value(mut self, uuid: Uuid, value: Vec<u8>) -> Self {
        self.reads.insert(uuid, Ok(value));
        self
    }

    pub fn read_error(mut self, uuid: Uuid, error: Error) -> Self {
        self.reads.insert(uuid, Err(error));
        self
    }

    pub fn subscribe_error(mut self, uuid: Uuid, error: Error) -> Self {
        self.subscribe_errors.insert(uuid, error);
        self
    }

    pub fn discovery_fails(mut self) -> Self {
        self.discovery_fails = true;
        self
    }

    pub fn notifications_fail(mut self) -> Self {
        self.notifications_fail = true;
        self
    }

    pub fn build(self) -> MockPeripheral {
        let (notify_sender, notify_receiver) = mpsc::unbounded_channel();
        MockPeripheral {
            state: Arc::new(PeripheralState {
                id: self.id,
                name: self.name,
                rssi: self.rssi,
                connect_script: self.connect_script,
                discovery_fails: self.discovery_fails,
                notifications_fail: self.notifications_fail,
                services: self.services,
                reads: self.reads,
                subscribe_errors: self.subscribe_errors,
                connected: AtomicBool::new(false),
                connect_calls: AtomicUsize::new(0),
                disconnect_calls: AtomicUsize::new(0),
                subscriptions: Mutex::new(Vec::new()),
                notify_sender: Mutex::new(Some(notify_sender)),
                notify_receiver: Mutex::new(Some(notify_receiver)),
            }),
        }
    }
}

assert_impl_all!(MockCentral: Central, Clone, Debug, Send, Sized, Sync);
assert_impl_all!(MockPeripheral: Peripheral, Clone, Debug, Send, Sized, Sync);
