//! Best-effort sweep of everything readable on a connected peripheral.

use log::debug;
use uuid::Uuid;

use crate::api::{CharProps, Peripheral, Service};
use crate::registry;
use crate::Result;

/// Outcome of one read attempt, tagged with the characteristic it
/// belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRecord {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub result: Result<Vec<u8>>,
}

/// Read every READ-capable characteristic once, in discovery order.
///
/// Failures are recorded and the sweep moves on; one bad characteristic
/// never aborts the rest. Characteristics without the READ flag produce
/// no record at all.
pub async fn explore<P: Peripheral>(peripheral: &P, services: &[Service]) -> Vec<ReadRecord> {
    let mut records = Vec::new();
    for service in services {
        for characteristic in &service.characteristics {
            if !characteristic.properties.contains(CharProps::READ) {
                continue;
            }
            let result = peripheral.read(characteristic).await;
            if let Err(ref e) = result {
                debug!("read of {} failed: {}", characteristic.uuid, e);
            }
            records.push(ReadRecord {
                service: service.uuid,
                characteristic: characteristic.uuid,
                result,
            });
        }
    }
    records
}

/// Battery percentage, if the peripheral exposes the battery level
/// characteristic and the read succeeds.
///
/// A missing characteristic and a failed read collapse into the same
/// `None`; callers are expected to stay quiet about it.
pub async fn read_battery_level<P: Peripheral>(
    peripheral: &P,
    services: &[Service],
) -> Option<u8> {
    let characteristic = services
        .iter()
        .flat_map(|service| service.characteristics.iter())
        .find(|characteristic| characteristic.uuid == registry::BATTERY_LEVEL_CHARACTERISTIC)?;
    match peripheral.read(characteristic).await {
        Ok(value) => value.first().copied(),
        Err(e) => {
            debug!("battery read failed: {}", e);
            None
        }
    }
}
