//! The capability seam between the session core and whatever BLE stack
//! actually owns the radio.
//!
//! A backend implements [`Central`] (advertisement observation) and
//! [`Peripheral`] (one remote device) and the rest of the crate drives
//! those traits without knowing what sits behind them. The in-memory
//! implementation lives in [`crate::mock`].

use std::fmt::{self, Debug, Display, Formatter};
use std::pin::Pin;

use async_trait::async_trait;
use bitflags::bitflags;
use futures::stream::Stream;
use uuid::Uuid;

use crate::registry;
use crate::Result;

/// Opaque, platform-defined identifier for a peripheral.
///
/// On some stacks this is a MAC address, on others an assigned UUID;
/// the session never interprets it, only displays and compares it.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for DeviceId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        <Self as Display>::fmt(self, f)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        DeviceId(id.to_string())
    }
}

/// What a peripheral advertised about itself, as last seen by the scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisedProperties {
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
}

bitflags! {
    /// Capability flags attached to a characteristic at discovery time.
    ///
    /// Bit values follow the GATT characteristic properties field.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct CharProps: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
    }
}

/// One characteristic of a discovered service. Immutable after
/// discovery; the `service_uuid` is a back-reference only.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub properties: CharProps,
}

impl Characteristic {
    pub fn new(service_uuid: Uuid, uuid: Uuid, properties: CharProps) -> Self {
        Characteristic {
            uuid,
            service_uuid,
            properties,
        }
    }
}

impl Display for Characteristic {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "uuid: {}, properties: {:?}", self.uuid, self.properties)
    }
}

/// One GATT service of a connected peripheral, with its characteristics
/// in discovery order. The tree of these is built exactly once per
/// connection and never mutated afterward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub uuid: Uuid,
    /// Human label resolved through the identity registry; `"Unknown"`
    /// when the registry has no entry.
    pub label: &'static str,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn new(uuid: Uuid, characteristics: Vec<Characteristic>) -> Self {
        Service {
            uuid,
            label: registry::service_label(&uuid),
            characteristics,
        }
    }
}

/// A value pushed by a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueNotification {
    pub uuid: Uuid,
    pub value: Vec<u8>,
}

/// Advertisement-level events announced by a [`Central`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralEvent {
    DeviceDiscovered(DeviceId),
    DeviceUpdated(DeviceId),
    DeviceDisconnected(DeviceId),
}

pub type CentralEventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;
pub type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// The central (client) side of the BLE stack: observes advertisements
/// and hands out peripherals. The radio is a process-wide singleton, so
/// callers must stop an active scan before connecting.
#[async_trait]
pub trait Central: Send + Sync + Clone {
    type Peripheral: Peripheral;

    /// Stream of advertisement events. Subscribe before starting a scan
    /// so no discovery can slip past.
    async fn events(&self) -> Result<CentralEventStream>;

    /// Start observing advertisements. Discovered devices are announced
    /// on [`events`](Central::events) and available via
    /// [`peripherals`](Central::peripherals).
    async fn start_scan(&self) -> Result<()>;

    /// Stop observing advertisements. Stopping an idle scan is a no-op,
    /// never an error.
    async fn stop_scan(&self) -> Result<()>;

    /// Every peripheral discovered so far, in discovery order.
    async fn peripherals(&self) -> Result<Vec<Self::Peripheral>>;

    /// Look up a discovered peripheral by its identifier.
    async fn peripheral(&self, id: &DeviceId) -> Result<Self::Peripheral>;
}

/// One remote device. Operations may suspend until the platform stack
/// answers; every one of them can fail independently.
#[async_trait]
pub trait Peripheral: Send + Sync + Clone + Debug {
    fn id(&self) -> DeviceId;

    /// The advertisement data last seen for this device.
    async fn properties(&self) -> Result<AdvertisedProperties>;

    /// Establish a GATT connection. Peripherals allow only one
    /// connection at a time.
    async fn connect(&self) -> Result<()>;

    /// Tear the connection down. All active subscriptions are
    /// invalidated.
    async fn disconnect(&self) -> Result<()>;

    async fn is_connected(&self) -> Result<bool>;

    /// Enumerate the full service/characteristic topology.
    async fn discover_services(&self) -> Result<Vec<Service>>;

    /// Read the current value of a characteristic.
    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>>;

    /// Enable notify (or indicate) delivery for a characteristic.
    async fn subscribe(&self, characteristic: &Characteristic) -> Result<()>;

    /// Disable notify (or indicate) delivery for a characteristic.
    async fn unsubscribe(&self, characteristic: &Characteristic) -> Result<()>;

    /// Stream of value notifications, in arrival order. Ends when the
    /// link goes down.
    async fn notifications(&self) -> Result<NotificationStream>;
}
