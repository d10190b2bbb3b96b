//! The connection lifecycle state machine: scan, connect, discover,
//! subscribe, listen, disconnect.
//!
//! One [`Session`] drives at most one peripheral connection. Whatever
//! goes wrong and wherever it goes wrong, a session that began a
//! connection attempt issues exactly one disconnect call before it
//! terminates, and reports a single terminal reason.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::timeout;
use uuid::Uuid;

use crate::api::{Central, Peripheral};
use crate::event::{EventSink, SessionEvent};
use crate::relay::ListenEnd;
use crate::scanner;
use crate::{explore, registry, relay, Error};

/// Where the controller currently is in the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Discovering,
    Ready,
    Listening,
    Disconnecting,
    Disconnected,
}

/// Why a session that attempted a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The listen window ran to completion.
    ListenComplete,
    /// Cancelled from outside; a normal terminal trigger, not an error.
    Cancelled,
    /// The connect call did not resolve within its budget.
    ConnectTimeout,
    /// The platform failed the connection attempt, or reported the link
    /// down right after claiming success.
    ConnectRefused,
    /// Service enumeration failed on a live link.
    DiscoveryFailed,
    /// The peripheral dropped the link while we were listening.
    ConnectionLost,
    /// Some other platform error while the link was live.
    Fault(Error),
}

impl Display for DisconnectReason {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            DisconnectReason::ListenComplete => f.write_str("listen window complete"),
            DisconnectReason::Cancelled => f.write_str("cancelled"),
            DisconnectReason::ConnectTimeout => f.write_str("connect timed out"),
            DisconnectReason::ConnectRefused => f.write_str("connect refused"),
            DisconnectReason::DiscoveryFailed => f.write_str("service discovery failed"),
            DisconnectReason::ConnectionLost => f.write_str("connection lost"),
            DisconnectReason::Fault(e) => write!(f, "platform fault: {}", e),
        }
    }
}

/// Terminal outcome of [`Session::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// No matching advertisement arrived within the scan budget; no
    /// connection was attempted.
    NotFound,
    /// Cancelled before a connection attempt began.
    Cancelled,
    /// A connection was attempted; the reason records how it ended.
    Disconnected(DisconnectReason),
}

/// Budgets and targets for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Case-sensitive substring the advertised name must contain.
    pub name_filter: String,
    pub scan_timeout: Duration,
    /// Connection negotiation is slower than advertisement reception,
    /// so this budget is the longer one.
    pub connect_timeout: Duration,
    pub listen_window: Duration,
    /// Characteristics to subscribe to once the topology is known.
    pub subscribe_targets: Vec<Uuid>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            name_filter: "Lumenate".to_string(),
            scan_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
            listen_window: Duration::from_secs(30),
            subscribe_targets: vec![
                registry::DATA_CHARACTERISTIC,
                registry::STATUS_CHARACTERISTIC,
            ],
        }
    }
}

/// Create a linked cancellation handle/token pair. The handle requests
/// cancellation; the token is what the session watches.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (sender, receiver) = watch::channel(false);
    (CancelHandle { sender }, CancelToken { receiver })
}

/// The requesting end of a cancellation pair.
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }
}

/// Cooperative cancellation signal, honored at every suspension point.
#[derive(Debug, Clone)]
pub struct CancelToken {
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the
    /// handle was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow() {
                return;
            }
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

enum ConnectOutcome {
    Connected,
    Cancelled,
    Failed(DisconnectReason),
}

/// Drives one peripheral through the
/// scan → connect → discover → subscribe → listen → disconnect
/// lifecycle, reporting everything it learns to the event sink.
pub struct Session<C: Central> {
    central: C,
    config: SessionConfig,
    state: SessionState,
}

impl<C: Central> Session<C> {
    pub fn new(central: C, config: SessionConfig) -> Self {
        Session {
            central,
            config,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn set_state(&mut self, next: SessionState) {
        debug!("session state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run the session to completion.
    ///
    /// The scan is stopped before any connection attempt, and every
    /// path that entered `Connecting` issues exactly one disconnect
    /// call and emits a single terminal
    /// [`Disconnected`](SessionEvent::Disconnected) event.
    pub async fn run(mut self, sink: &dyn EventSink, cancel: &CancelToken) -> SessionEnd {
        let handle = match scanner::scan(
            &self.central,
            &self.config.name_filter,
            self.config.scan_timeout,
            cancel,
        )
        .await
        {
            Ok(handle) => handle,
            Err(_) if cancel.is_cancelled() => {
                info!("session cancelled during scan");
                return SessionEnd::Cancelled;
            }
            Err(e) => {
                info!("no matching device: {}", e);
                sink.emit(SessionEvent::NotFound);
                return SessionEnd::NotFound;
            }
        };
        sink.emit(SessionEvent::DeviceFound {
            name: handle.name.clone(),
            id: handle.id(),
            rssi: handle.rssi,
        });
        self.drive(handle.peripheral, sink, cancel).await
    }

    async fn drive(
        &mut self,
        peripheral: C::Peripheral,
        sink: &dyn EventSink,
        cancel: &CancelToken,
    ) -> SessionEnd {
        self.set_state(SessionState::Connecting);
        let reason = match self.connect(&peripheral, cancel).await {
            ConnectOutcome::Connected => {
                info!("connected to {}", peripheral.id());
                sink.emit(SessionEvent::Connected);
                tokio::select! {
                    reason = self.connected_pipeline(&peripheral, sink, cancel) => reason,
                    _ = cancel.cancelled() => DisconnectReason::Cancelled,
                }
            }
            ConnectOutcome::Cancelled => DisconnectReason::Cancelled,
            ConnectOutcome::Failed(reason) => {
                sink.emit(SessionEvent::ConnectFailed {
                    reason: reason.clone(),
                });
                reason
            }
        };

        // Resource-safety invariant: exactly one disconnect attempt,
        // whatever happened above. Disconnect itself is best-effort.
        self.set_state(SessionState::Disconnecting);
        if let Err(e) = peripheral.disconnect().await {
            warn!("disconnect failed: {}", e);
        }
        self.set_state(SessionState::Disconnected);
        info!("session over: {}", reason);
        sink.emit(SessionEvent::Disconnected {
            reason: reason.clone(),
        });
        SessionEnd::Disconnected(reason)
    }

    async fn connect(&mut self, peripheral: &C::Peripheral, cancel: &CancelToken) -> ConnectOutcome {
        let attempt = tokio::select! {
            attempt = timeout(self.config.connect_timeout, peripheral.connect()) => attempt,
            _ = cancel.cancelled() => return ConnectOutcome::Cancelled,
        };
        match attempt {
            Err(_elapsed) => {
                warn!(
                    "connect did not resolve within {:?}",
                    self.config.connect_timeout
                );
                ConnectOutcome::Failed(DisconnectReason::ConnectTimeout)
            }
            Ok(Err(e)) => {
                warn!("connect failed: {}", e);
                ConnectOutcome::Failed(DisconnectReason::ConnectRefused)
            }
            Ok(Ok(())) => match peripheral.is_connected().await {
                Ok(true) => ConnectOutcome::Connected,
                Ok(false) => {
                    warn!("platform reported success but the link is down");
                    ConnectOutcome::Failed(DisconnectReason::ConnectRefused)
                }
                Err(e) => {
                    warn!("liveness check failed: {}", e);
                    ConnectOutcome::Failed(DisconnectReason::ConnectRefused)
                }
            },
        }
    }

    /// Everything that happens on a live link. Per-characteristic
    /// failures are contained here; only discovery and the listen
    /// window can end the session.
    async fn connected_pipeline(
        &mut self,
        peripheral: &C::Peripheral,
        sink: &dyn EventSink,
        cancel: &CancelToken,
    ) -> DisconnectReason {
        self.set_state(SessionState::Connected);

        self.set_state(SessionState::Discovering);
        let services = match peripheral.discover_services().await {
            Ok(services) => services,
            Err(e) => {
                warn!("service discovery failed: {}", e);
                return DisconnectReason::DiscoveryFailed;
            }
        };
        for service in &services {
            debug!(
                "service {} ({}) with {} characteristics",
                service.uuid,
                service.label,
                service.characteristics.len()
            );
            sink.emit(SessionEvent::ServiceDiscovered(service.clone()));
        }
        self.set_state(SessionState::Ready);

        for record in explore::explore(peripheral, &services).await {
            sink.emit(SessionEvent::ReadResult {
                service: record.service,
                characteristic: record.characteristic,
                result: record.result,
            });
        }
        if let Some(percent) = explore::read_battery_level(peripheral, &services).await {
            sink.emit(SessionEvent::BatteryLevel(percent));
        }

        let subscriptions =
            relay::subscribe_all(peripheral, &services, &self.config.subscribe_targets).await;
        for record in &subscriptions {
            sink.emit(SessionEvent::SubscribeResult {
                characteristic: record.characteristic,
                result: record.result.clone(),
            });
        }
        self.set_state(SessionState::Listening);

        let reason = match relay::listen(peripheral, sink, self.config.listen_window, cancel).await
        {
            ListenEnd::WindowElapsed => DisconnectReason::ListenComplete,
            ListenEnd::Cancelled => DisconnectReason::Cancelled,
            ListenEnd::LinkLost => DisconnectReason::ConnectionLost,
            ListenEnd::Fault(e) => DisconnectReason::Fault(e),
        };
        if reason == DisconnectReason::ListenComplete {
            relay::unsubscribe_all(peripheral, &services, &subscriptions).await;
        }
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CharProps, Characteristic, Service};
    use crate::mock::{ConnectScript, MockCentral, MockPeripheral, MockPeripheralBuilder};
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    fn config() -> SessionConfig {
        SessionConfig {
            scan_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_millis(500),
            listen_window: Duration::from_millis(50),
            ..SessionConfig::default()
        }
    }

    fn nova_builder() -> MockPeripheralBuilder {
        let battery = Service::new(
            registry::BATTERY_SERVICE,
            vec![Characteristic::new(
                registry::BATTERY_SERVICE,
                registry::BATTERY_LEVEL_CHARACTERISTIC,
                CharProps::READ,
            )],
        );
        let control = Service::new(
            registry::CONTROL_SERVICE,
            vec![
                Characteristic::new(
                    registry::CONTROL_SERVICE,
                    registry::DATA_CHARACTERISTIC,
                    CharProps::READ | CharProps::WRITE | CharProps::NOTIFY,
                ),
                Characteristic::new(
                    registry::CONTROL_SERVICE,
                    registry::COMMAND_CHARACTERISTIC,
                    CharProps::WRITE,
                ),
                Characteristic::new(
                    registry::CONTROL_SERVICE,
                    registry::STATUS_CHARACTERISTIC,
                    CharProps::READ | CharProps::NOTIFY,
                ),
            ],
        );
        MockPeripheral::builder("AA:BB")
            .name("Lumenate Nova")
            .service(battery)
            .service(control)
            .read_value(registry::BATTERY_LEVEL_CHARACTERISTIC, vec![78])
            .read_value(registry::DATA_CHARACTERISTIC, vec![0x10, 0x20])
            .read_value(registry::STATUS_CHARACTERISTIC, vec![0x01])
    }

    fn drain(receiver: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    async fn run_session(
        central: MockCentral,
        config: SessionConfig,
    ) -> (SessionEnd, Vec<SessionEvent>) {
        let (sink, mut receiver) = mpsc::unbounded_channel();
        let (_handle, cancel) = cancel_pair();
        let session = Session::new(central, config);
        assert_eq!(session.state(), SessionState::Idle);
        let end = session.run(&sink, &cancel).await;
        (end, drain(&mut receiver))
    }

    #[tokio::test]
    async fn happy_path_reports_the_whole_session_in_order() {
        let central = MockCentral::new();
        let peripheral = nova_builder().build();
        central.advertise(peripheral.clone());

        let injector = peripheral.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            injector.push_notification(registry::DATA_CHARACTERISTIC, vec![0xaa]);
            injector.push_notification(registry::STATUS_CHARACTERISTIC, vec![0xbb]);
        });

        let (end, events) = run_session(central, config()).await;
        assert_eq!(
            end,
            SessionEnd::Disconnected(DisconnectReason::ListenComplete)
        );
        assert_eq!(peripheral.disconnect_calls(), 1);
        // Listen teardown unsubscribed both live characteristics.
        assert!(peripheral.subscriptions().is_empty());

        assert!(matches!(
            events[0],
            SessionEvent::DeviceFound { ref name, .. } if name.as_deref() == Some("Lumenate Nova")
        ));
        assert_eq!(events[1], SessionEvent::Connected);
        assert!(matches!(
            events[2],
            SessionEvent::ServiceDiscovered(ref s) if s.label == "Battery Service"
        ));
        assert!(matches!(
            events[3],
            SessionEvent::ServiceDiscovered(ref s) if s.label == "Control Service"
        ));
        // Reads in discovery order: battery, data, status (command is
        // write-only and leaves no record).
        assert!(matches!(
            events[4],
            SessionEvent::ReadResult { characteristic, ref result, .. }
                if characteristic == registry::BATTERY_LEVEL_CHARACTERISTIC
                    && *result == Ok(vec![78])
        ));
        assert!(matches!(
            events[5],
            SessionEvent::ReadResult { characteristic, .. }
                if characteristic == registry::DATA_CHARACTERISTIC
        ));
        assert!(matches!(
            events[6],
            SessionEvent::ReadResult { characteristic, .. }
                if characteristic == registry::STATUS_CHARACTERISTIC
        ));
        assert_eq!(events[7], SessionEvent::BatteryLevel(78));
        assert!(matches!(
            events[8],
            SessionEvent::SubscribeResult { characteristic, result: Ok(()) }
                if characteristic == registry::DATA_CHARACTERISTIC
        ));
        assert!(matches!(
            events[9],
            SessionEvent::SubscribeResult { characteristic, result: Ok(()) }
                if characteristic == registry::STATUS_CHARACTERISTIC
        ));
        assert!(matches!(
            events[10],
            SessionEvent::Notification { ref value, .. } if *value == vec![0xaa]
        ));
        assert!(matches!(
            events[11],
            SessionEvent::Notification { ref value, .. } if *value == vec![0xbb]
        ));
        assert_eq!(
            events[12],
            SessionEvent::Disconnected {
                reason: DisconnectReason::ListenComplete
            }
        );
        assert_eq!(events.len(), 13);
    }

    #[tokio::test]
    async fn no_match_ends_with_not_found_and_no_disconnect() {
        let central = MockCentral::new();
        let peripheral = MockPeripheral::builder("11:22").name("Other").build();
        central.advertise(peripheral.clone());

        let mut cfg = config();
        cfg.scan_timeout = Duration::from_millis(50);
        let (end, events) = run_session(central, cfg).await;
        assert_eq!(end, SessionEnd::NotFound);
        assert_eq!(events, vec![SessionEvent::NotFound]);
        assert_eq!(peripheral.disconnect_calls(), 0);
    }

    #[tokio::test]
    async fn hanging_connect_times_out_within_budget() {
        let central = MockCentral::new();
        let peripheral = nova_builder().connect(ConnectScript::Hang).build();
        central.advertise(peripheral.clone());

        let mut cfg = config();
        cfg.connect_timeout = Duration::from_millis(50);
        let started = std::time::Instant::now();
        let (end, events) = run_session(central, cfg).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(
            end,
            SessionEnd::Disconnected(DisconnectReason::ConnectTimeout)
        );
        assert_eq!(peripheral.disconnect_calls(), 1);

        assert!(matches!(events[0], SessionEvent::DeviceFound { .. }));
        assert_eq!(
            events[1],
            SessionEvent::ConnectFailed {
                reason: DisconnectReason::ConnectTimeout
            }
        );
        assert_eq!(
            events[2],
            SessionEvent::Disconnected {
                reason: DisconnectReason::ConnectTimeout
            }
        );
    }

    #[tokio::test]
    async fn refused_and_failed_connects_are_reported() {
        for script in [ConnectScript::Refuse, ConnectScript::Fail] {
            let central = MockCentral::new();
            let peripheral = nova_builder().connect(script).build();
            central.advertise(peripheral.clone());

            let (end, events) = run_session(central, config()).await;
            assert_eq!(
                end,
                SessionEnd::Disconnected(DisconnectReason::ConnectRefused)
            );
            assert_eq!(peripheral.disconnect_calls(), 1);
            assert_eq!(
                events[1],
                SessionEvent::ConnectFailed {
                    reason: DisconnectReason::ConnectRefused
                }
            );
        }
    }

    #[tokio::test]
    async fn discovery_failure_is_fatal_but_still_disconnects_once() {
        let central = MockCentral::new();
        let peripheral = nova_builder().discovery_fails().build();
        central.advertise(peripheral.clone());

        let (end, events) = run_session(central, config()).await;
        assert_eq!(
            end,
            SessionEnd::Disconnected(DisconnectReason::DiscoveryFailed)
        );
        assert_eq!(peripheral.disconnect_calls(), 1);
        assert!(events
            .iter()
            .all(|event| !matches!(event, SessionEvent::ServiceDiscovered(_))));
        assert_eq!(
            *events.last().unwrap(),
            SessionEvent::Disconnected {
                reason: DisconnectReason::DiscoveryFailed
            }
        );
    }

    #[tokio::test]
    async fn read_failures_are_contained_per_characteristic() {
        let central = MockCentral::new();
        let peripheral = nova_builder()
            .read_error(registry::DATA_CHARACTERISTIC, Error::PermissionDenied)
            .build();
        central.advertise(peripheral.clone());

        let (end, events) = run_session(central, config()).await;
        assert_eq!(
            end,
            SessionEnd::Disconnected(DisconnectReason::ListenComplete)
        );

        let reads: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::ReadResult {
                    characteristic,
                    result,
                    ..
                } => Some((*characteristic, result.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(reads.len(), 3);
        assert_eq!(
            reads[1],
            (registry::DATA_CHARACTERISTIC, Err(Error::PermissionDenied))
        );
        // The characteristic after the failing one still got read.
        assert_eq!(
            reads[2],
            (registry::STATUS_CHARACTERISTIC, Ok(vec![0x01]))
        );
    }

    #[tokio::test]
    async fn battery_read_failure_stays_quiet() {
        let central = MockCentral::new();
        let peripheral = nova_builder()
            .read_error(
                registry::BATTERY_LEVEL_CHARACTERISTIC,
                Error::RuntimeError("gatt error".to_string()),
            )
            .build();
        central.advertise(peripheral.clone());

        let (_end, events) = run_session(central, config()).await;
        assert!(events
            .iter()
            .all(|event| !matches!(event, SessionEvent::BatteryLevel(_))));
    }

    #[tokio::test]
    async fn one_failed_subscription_still_enters_listening() {
        let central = MockCentral::new();
        let peripheral = nova_builder()
            .subscribe_error(
                registry::DATA_CHARACTERISTIC,
                Error::RuntimeError("busy".to_string()),
            )
            .build();
        central.advertise(peripheral.clone());

        let injector = peripheral.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            injector.push_notification(registry::STATUS_CHARACTERISTIC, vec![0x05]);
        });

        let (end, events) = run_session(central, config()).await;
        assert_eq!(
            end,
            SessionEnd::Disconnected(DisconnectReason::ListenComplete)
        );

        let subscribes: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::SubscribeResult {
                    characteristic,
                    result,
                } => Some((*characteristic, result.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(subscribes.len(), 2);
        assert!(subscribes[0].1.is_err());
        assert_eq!(subscribes[1], (registry::STATUS_CHARACTERISTIC, Ok(())));
        // The surviving subscription still delivered.
        assert!(events
            .iter()
            .any(|event| matches!(event, SessionEvent::Notification { .. })));
    }

    #[tokio::test]
    async fn cancellation_during_listen_disconnects_once() {
        let central = MockCentral::new();
        let peripheral = nova_builder().build();
        central.advertise(peripheral.clone());

        let (handle, cancel) = cancel_pair();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });

        let mut cfg = config();
        cfg.listen_window = Duration::from_secs(10);
        let (sink, mut receiver) = mpsc::unbounded_channel();
        let started = std::time::Instant::now();
        let end = Session::new(central, cfg).run(&sink, &cancel).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(end, SessionEnd::Disconnected(DisconnectReason::Cancelled));
        assert_eq!(peripheral.disconnect_calls(), 1);

        let events = drain(&mut receiver);
        assert_eq!(
            *events.last().unwrap(),
            SessionEvent::Disconnected {
                reason: DisconnectReason::Cancelled
            }
        );
    }

    #[tokio::test]
    async fn cancellation_during_connect_disconnects_once() {
        let central = MockCentral::new();
        let peripheral = nova_builder().connect(ConnectScript::Hang).build();
        central.advertise(peripheral.clone());

        let (handle, cancel) = cancel_pair();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });

        let mut cfg = config();
        cfg.connect_timeout = Duration::from_secs(10);
        let (sink, mut receiver) = mpsc::unbounded_channel();
        let started = std::time::Instant::now();
        let end = Session::new(central, cfg).run(&sink, &cancel).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(end, SessionEnd::Disconnected(DisconnectReason::Cancelled));
        assert_eq!(peripheral.disconnect_calls(), 1);

        let events = drain(&mut receiver);
        // Cancellation is not a connect failure; the session just winds
        // down.
        assert!(events
            .iter()
            .all(|event| !matches!(event, SessionEvent::ConnectFailed { .. })));
        assert_eq!(
            *events.last().unwrap(),
            SessionEvent::Disconnected {
                reason: DisconnectReason::Cancelled
            }
        );
    }

    #[tokio::test]
    async fn cancellation_before_any_match_skips_the_connection() {
        let central = MockCentral::new();
        let (handle, cancel) = cancel_pair();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });

        let (sink, mut receiver) = mpsc::unbounded_channel();
        let mut cfg = config();
        cfg.scan_timeout = Duration::from_secs(10);
        let end = Session::new(central, cfg).run(&sink, &cancel).await;
        assert_eq!(end, SessionEnd::Cancelled);
        assert!(drain(&mut receiver).is_empty());
    }

    #[tokio::test]
    async fn link_loss_while_listening_is_terminal() {
        let central = MockCentral::new();
        let peripheral = nova_builder().build();
        central.advertise(peripheral.clone());

        let dropper = peripheral.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            dropper.drop_link();
        });

        let mut cfg = config();
        cfg.listen_window = Duration::from_secs(10);
        let started = std::time::Instant::now();
        let (end, events) = run_session(central, cfg).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(
            end,
            SessionEnd::Disconnected(DisconnectReason::ConnectionLost)
        );
        assert_eq!(peripheral.disconnect_calls(), 1);
        assert_eq!(
            *events.last().unwrap(),
            SessionEvent::Disconnected {
                reason: DisconnectReason::ConnectionLost
            }
        );
    }

    #[tokio::test]
    async fn notification_stream_fault_is_terminal() {
        let central = MockCentral::new();
        let peripheral = nova_builder().notifications_fail().build();
        central.advertise(peripheral.clone());

        let (end, _events) = run_session(central, config()).await;
        assert!(matches!(
            end,
            SessionEnd::Disconnected(DisconnectReason::Fault(_))
        ));
        assert_eq!(peripheral.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn scan_is_stopped_before_connecting() {
        let central = MockCentral::new();
        let peripheral = nova_builder().build();
        central.advertise(peripheral.clone());

        let observer = central.clone();
        let (end, _events) = run_session(central, config()).await;
        assert!(matches!(end, SessionEnd::Disconnected(_)));
        assert!(!observer.is_scanning());
        assert_eq!(observer.scans_stopped(), 1);
        // The radio was already free when connect was issued.
        assert_eq!(peripheral.connect_calls(), 1);
    }
}
