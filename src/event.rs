//! Structured events describing one session, in the order things
//! happened. The session core emits these; how they are rendered is the
//! consumer's business.

use std::time::SystemTime;

use log::trace;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::api::{DeviceId, Service};
use crate::session::DisconnectReason;
use crate::Result;

/// Everything a session reports to its presentation sink.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The scan matched an advertisement.
    DeviceFound {
        name: Option<String>,
        id: DeviceId,
        rssi: Option<i16>,
    },
    /// No matching advertisement arrived within the scan budget.
    NotFound,
    Connected,
    ConnectFailed {
        reason: DisconnectReason,
    },
    /// One per discovered service, in discovery order.
    ServiceDiscovered(Service),
    /// Outcome of one best-effort characteristic read.
    ReadResult {
        service: Uuid,
        characteristic: Uuid,
        result: Result<Vec<u8>>,
    },
    /// Battery percentage, only when the read succeeded.
    BatteryLevel(u8),
    /// Outcome of one subscription attempt.
    SubscribeResult {
        characteristic: Uuid,
        result: Result<()>,
    },
    /// One value push from a subscribed characteristic, stamped at
    /// receipt.
    Notification {
        characteristic: Uuid,
        value: Vec<u8>,
        timestamp: SystemTime,
    },
    /// Terminal event of every session that attempted a connection.
    Disconnected {
        reason: DisconnectReason,
    },
}

/// Where session events go. Implementations must not block: the session
/// emits from inside its own suspension points.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

/// Queue-backed sink: events are buffered in arrival order and drained
/// by whoever holds the receiving end. A closed receiver just drops
/// events rather than failing the session.
impl EventSink for mpsc::UnboundedSender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        if let Err(lost) = self.send(event) {
            trace!("presentation sink closed, dropping event: {:?}", lost.0);
        }
    }
}

/// A connected sink/stream pair for consumers that want the events as a
/// stream.
pub fn event_channel() -> (
    mpsc::UnboundedSender<SessionEvent>,
    UnboundedReceiverStream<SessionEvent>,
) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (sender, UnboundedReceiverStream::new(receiver))
}
