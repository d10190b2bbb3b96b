//! End-to-end session against the in-memory backend, scripted to look
//! like a Lumenate Nova: advertise, connect, walk the topology, stream
//! a few notification frames, disconnect.
//!
//! Usage: `cargo run --example nova_session [scan_secs] [listen_secs]`

use std::time::Duration;

use novalink::api::{CharProps, Characteristic, Service};
use novalink::event::event_channel;
use novalink::mock::{MockCentral, MockPeripheral};
use novalink::session::{cancel_pair, Session, SessionConfig};
use novalink::{registry, SessionEvent};
use tokio::time::sleep;
use tokio_stream::StreamExt;

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn nova() -> MockPeripheral {
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
    let mcumgr = Service::new(registry::MCUMGR_SERVICE, Vec::new());

    MockPeripheral::builder("C4:9E:82:11:5A:01")
        .name("Lumenate Nova")
        .rssi(-58)
        .service(battery)
        .service(control)
        .service(mcumgr)
        .read_value(registry::BATTERY_LEVEL_CHARACTERISTIC, vec![78])
        .read_value(registry::DATA_CHARACTERISTIC, vec![0x01, 0x00, 0x3c])
        .read_value(registry::STATUS_CHARACTERISTIC, vec![0x01])
        .build()
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let mut args = std::env::args().skip(1);
    let scan_secs: u64 = args.next().and_then(|a| a.parse().ok()).unwrap_or(10);
    let listen_secs: u64 = args.next().and_then(|a| a.parse().ok()).unwrap_or(5);

    let central = MockCentral::new();
    let nova = nova();

    // The "radio": one unrelated device right away, the Nova a moment
    // later, then a trickle of notification frames.
    let advertiser = central.clone();
    let device = nova.clone();
    tokio::spawn(async move {
        advertiser.advertise(MockPeripheral::builder("55:44:33:22:11:00").name("Kitchen TV").build());
        sleep(Duration::from_millis(300)).await;
        advertiser.advertise(device.clone());
        sleep(Duration::from_millis(500)).await;
        for frame in 0u8..4 {
            device.push_notification(registry::DATA_CHARACTERISTIC, vec![0x10, frame]);
            device.push_notification(registry::STATUS_CHARACTERISTIC, vec![0x01, frame]);
            sleep(Duration::from_millis(400)).await;
        }
    });

    let config = SessionConfig {
        scan_timeout: Duration::from_secs(scan_secs),
        listen_window: Duration::from_secs(listen_secs),
        ..SessionConfig::default()
    };

    println!("Scanning for {}...", config.name_filter);
    let (sink, mut events) = event_channel();
    let (_cancel, token) = cancel_pair();
    let session = tokio::spawn(async move {
        Session::new(central, config).run(&sink, &token).await
    });

    while let Some(event) = events.next().await {
        match event {
            SessionEvent::DeviceFound { name, id, rssi } => {
                println!(
                    "Found: {} [{}] rssi {}",
                    name.as_deref().unwrap_or("(unnamed)"),
                    id,
                    rssi.map(|r| r.to_string()).unwrap_or_else(|| "?".to_string()),
                );
            }
            SessionEvent::NotFound => {
                println!("Device not found. Is it powered on and in range?");
            }
            SessionEvent::Connected => println!("Connected!"),
            SessionEvent::ConnectFailed { reason } => println!("Connect failed: {}", reason),
            SessionEvent::ServiceDiscovered(service) => {
                println!("[{}] {}", service.label, service.uuid);
                for characteristic in &service.characteristics {
                    println!("  └─ {}", characteristic);
                }
            }
            SessionEvent::ReadResult {
                characteristic,
                result,
                ..
            } => match result {
                Ok(value) => println!("  {} = {}", characteristic, hex(&value)),
                Err(e) => println!("  {} read error: {}", characteristic, e),
            },
            SessionEvent::BatteryLevel(percent) => println!("Battery: {}%", percent),
            SessionEvent::SubscribeResult {
                characteristic,
                result,
            } => match result {
                Ok(()) => println!(
                    "Subscribed to {} notifications",
                    registry::characteristic_label(&characteristic)
                ),
                Err(e) => println!("Could not subscribe to {}: {}", characteristic, e),
            },
            SessionEvent::Notification {
                characteristic,
                value,
                ..
            } => {
                let short = characteristic.to_string();
                println!("[NOTIFY {}] {}", &short[..8], hex(&value));
            }
            SessionEvent::Disconnected { reason } => println!("Disconnected: {}", reason),
        }
    }

    match session.await {
        Ok(end) => println!("Session ended: {:?}", end),
        Err(e) => eprintln!("session task failed: {}", e),
    }
}
