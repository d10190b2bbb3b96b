//! Advertisement discovery: find the first peripheral whose advertised
//! name matches, within a bounded wait.

use std::time::Duration;

use futures::stream::StreamExt;
use log::{debug, info, warn};
use tokio::time::{sleep_until, Instant};

use crate::api::{Central, CentralEvent, CentralEventStream, DeviceId, Peripheral};
use crate::session::CancelToken;
use crate::{Error, Result};

/// A peripheral captured at scan time, before any connection attempt.
#[derive(Debug, Clone)]
pub struct DeviceHandle<P> {
    pub peripheral: P,
    /// The advertised name that matched the filter.
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

impl<P: Peripheral> DeviceHandle<P> {
    pub fn id(&self) -> DeviceId {
        self.peripheral.id()
    }
}

/// Scan until an advertised name contains `name_filter` (case
/// sensitive), first match wins regardless of signal strength.
///
/// Fails with [`Error::DeviceNotFound`] once `timeout` elapses, or
/// immediately on cancellation. Whatever happens, the underlying scan
/// is stopped before this returns: the radio is a process-wide
/// singleton and must be free before anyone connects.
pub async fn scan<C: Central>(
    central: &C,
    name_filter: &str,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<DeviceHandle<C::Peripheral>> {
    // Subscribe before starting so no advertisement can slip past.
    let mut events = central.events().await?;
    central.start_scan().await?;
    debug!("scanning for \"{}\" ({:?} budget)", name_filter, timeout);

    let deadline = Instant::now() + timeout;
    let result = first_match(central, &mut events, name_filter, deadline, cancel).await;

    if let Err(e) = central.stop_scan().await {
        warn!("failed to stop scan: {}", e);
    }
    result
}

async fn first_match<C: Central>(
    central: &C,
    events: &mut CentralEventStream,
    name_filter: &str,
    deadline: Instant,
    cancel: &CancelToken,
) -> Result<DeviceHandle<C::Peripheral>> {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("scan cancelled");
                return Err(Error::DeviceNotFound);
            }
            _ = sleep_until(deadline) => {
                debug!("no advertisement matched \"{}\"", name_filter);
                return Err(Error::DeviceNotFound);
            }
            event = events.next() => match event {
                Some(event) => event,
                None => return Err(Error::RuntimeError("central event stream closed".to_string())),
            },
        };

        let id = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
            CentralEvent::DeviceDisconnected(_) => continue,
        };
        let peripheral = central.peripheral(&id).await?;
        let properties = peripheral.properties().await?;
        match properties.local_name {
            Some(name) if name.contains(name_filter) => {
                info!("found {} ({})", name, id);
                return Ok(DeviceHandle {
                    peripheral,
                    name: Some(name),
                    rssi: properties.rssi,
                });
            }
            _ => debug!("advertisement from {} does not match", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCentral, MockPeripheral};
    use crate::session::cancel_pair;
    use std::time::Duration;
    use tokio::time::sleep;

    fn device(id: &str, name: &str) -> MockPeripheral {
        MockPeripheral::builder(id).name(name).build()
    }

    #[tokio::test]
    async fn first_match_wins_over_signal_strength() {
        let central = MockCentral::new();
        let advertiser = central.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            advertiser.advertise(device("11:22", "Other"));
            advertiser.advertise(
                MockPeripheral::builder("AA:BB")
                    .name("Lumenate Nova")
                    .rssi(-90)
                    .build(),
            );
            advertiser.advertise(
                MockPeripheral::builder("CC:DD")
                    .name("Lumenate Max")
                    .rssi(-10)
                    .build(),
            );
        });

        let (_handle, cancel) = cancel_pair();
        let found = scan(&central, "Lumenate", Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        assert_eq!(found.name.as_deref(), Some("Lumenate Nova"));
        assert_eq!(found.id().as_str(), "AA:BB");
        assert_eq!(found.rssi, Some(-90));
        assert!(!central.is_scanning());
    }

    #[tokio::test]
    async fn devices_seen_before_the_scan_still_match() {
        let central = MockCentral::new();
        central.advertise(device("11:22", "Other"));
        central.advertise(device("AA:BB", "Lumenate Nova"));

        let (_handle, cancel) = cancel_pair();
        let found = scan(&central, "Lumenate", Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        assert_eq!(found.id().as_str(), "AA:BB");
    }

    #[tokio::test]
    async fn not_found_within_budget() {
        let central = MockCentral::new();
        central.advertise(device("11:22", "Other"));

        let (_handle, cancel) = cancel_pair();
        let started = std::time::Instant::now();
        let err = scan(&central, "Lumenate", Duration::from_millis(50), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, Error::DeviceNotFound);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!central.is_scanning());
        assert_eq!(central.scans_stopped(), 1);
    }

    #[tokio::test]
    async fn name_match_is_case_sensitive() {
        let central = MockCentral::new();
        central.advertise(device("AA:BB", "lumenate nova"));

        let (_handle, cancel) = cancel_pair();
        let err = scan(&central, "Lumenate", Duration::from_millis(50), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, Error::DeviceNotFound);
    }

    #[tokio::test]
    async fn cancellation_ends_the_wait_early() {
        let central = MockCentral::new();
        let (handle, cancel) = cancel_pair();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });

        let started = std::time::Instant::now();
        let err = scan(&central, "Lumenate", Duration::from_secs(10), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, Error::DeviceNotFound);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!central.is_scanning());
    }
}
