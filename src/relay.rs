//! Subscription management and the notification pump.
//!
//! Subscriptions are attempted independently: one characteristic
//! refusing to subscribe never blocks the others. Once listening, every
//! arriving notification is stamped and forwarded to the sink in strict
//! arrival order.

use std::time::{Duration, SystemTime};

use futures::stream::StreamExt;
use log::{debug, info, warn};
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

use crate::api::{CharProps, Characteristic, Peripheral, Service};
use crate::event::{EventSink, SessionEvent};
use crate::registry;
use crate::session::CancelToken;
use crate::{Error, Result};

/// Outcome of one subscription attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRecord {
    pub characteristic: Uuid,
    pub result: Result<()>,
}

/// Why the listen window ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenEnd {
    /// The dwell time ran to completion.
    WindowElapsed,
    Cancelled,
    /// The notification stream ended underneath us.
    LinkLost,
    /// The platform refused to hand out a notification stream.
    Fault(Error),
}

/// Try to subscribe to each target characteristic, independently.
pub async fn subscribe_all<P: Peripheral>(
    peripheral: &P,
    services: &[Service],
    targets: &[Uuid],
) -> Vec<SubscribeRecord> {
    let mut records = Vec::with_capacity(targets.len());
    for target in targets {
        let result = subscribe_one(peripheral, services, target).await;
        match result {
            Ok(()) => info!("subscribed to {}", target),
            Err(ref e) => warn!("could not subscribe to {}: {}", target, e),
        }
        records.push(SubscribeRecord {
            characteristic: *target,
            result,
        });
    }
    records
}

async fn subscribe_one<P: Peripheral>(
    peripheral: &P,
    services: &[Service],
    target: &Uuid,
) -> Result<()> {
    let Some(characteristic) = find_characteristic(services, target) else {
        return Err(Error::NoSuchCharacteristic);
    };
    // Capability flags were validated at discovery; don't ask the
    // platform for a subscription the device never advertised.
    if !characteristic
        .properties
        .intersects(CharProps::NOTIFY | CharProps::INDICATE)
    {
        if let Some(expected) = registry::expected_props(target) {
            debug!(
                "{} discovered without notify support, expected {:?}",
                target, expected
            );
        }
        return Err(Error::NotSupported(format!(
            "characteristic {} is not notifiable",
            target
        )));
    }
    peripheral.subscribe(characteristic).await
}

/// Forward notifications to the sink in arrival order until the window
/// elapses, the link drops, or the session is cancelled.
pub async fn listen<P: Peripheral>(
    peripheral: &P,
    sink: &dyn EventSink,
    window: Duration,
    cancel: &CancelToken,
) -> ListenEnd {
    let mut notifications = match peripheral.notifications().await {
        Ok(stream) => stream,
        Err(e) => return ListenEnd::Fault(e),
    };
    info!("listening for notifications ({:?} window)", window);

    let deadline = Instant::now() + window;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return ListenEnd::Cancelled,
            _ = sleep_until(deadline) => return ListenEnd::WindowElapsed,
            notification = notifications.next() => match notification {
                Some(notification) => sink.emit(SessionEvent::Notification {
                    characteristic: notification.uuid,
                    value: notification.value,
                    timestamp: SystemTime::now(),
                }),
                None => {
                    warn!("notification stream ended, link lost");
                    return ListenEnd::LinkLost;
                }
            },
        }
    }
}

/// Best-effort teardown of the subscriptions that succeeded. Failures
/// are logged and forgotten: the disconnect that follows invalidates
/// them anyway.
pub async fn unsubscribe_all<P: Peripheral>(
    peripheral: &P,
    services: &[Service],
    records: &[SubscribeRecord],
) {
    for record in records.iter().filter(|record| record.result.is_ok()) {
        let Some(characteristic) = find_characteristic(services, &record.characteristic) else {
            continue;
        };
        if let Err(e) = peripheral.unsubscribe(characteristic).await {
            debug!("unsubscribe from {} failed: {}", record.characteristic, e);
        }
    }
}

fn find_characteristic<'a>(services: &'a [Service], uuid: &Uuid) -> Option<&'a Characteristic> {
    services
        .iter()
        .flat_map(|service| service.characteristics.iter())
        .find(|characteristic| characteristic.uuid == *uuid)
}
