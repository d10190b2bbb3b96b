//! Well-known identifiers on the Nova GATT surface.
//!
//! Pure lookup tables: UUIDs to human labels plus the capability set
//! each known characteristic is expected to advertise. Nothing here
//! holds state.

use uuid::Uuid;

use crate::api::CharProps;

const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit short UUID against the standard Bluetooth Base UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

pub const GENERIC_ACCESS_SERVICE: Uuid = uuid_from_u16(0x1800);
pub const GENERIC_ATTRIBUTE_SERVICE: Uuid = uuid_from_u16(0x1801);
pub const BATTERY_SERVICE: Uuid = uuid_from_u16(0x180f);
pub const CONTROL_SERVICE: Uuid = Uuid::from_u128(0x47bbfb1e_670e_4f81_bfb3_78daffc9a783);
pub const MCUMGR_SERVICE: Uuid = Uuid::from_u128(0xb568de7c_b6c6_42cb_8303_fcc9cb25007c);

/// Read, write, notify.
pub const DATA_CHARACTERISTIC: Uuid = Uuid::from_u128(0x2b35ef1f_11a6_4089_8cd5_843c5d0c9c55);
/// Write only.
pub const COMMAND_CHARACTERISTIC: Uuid = Uuid::from_u128(0x3e25a3bf_bfe1_4c71_97c5_5bdb73fac89e);
/// Read, notify.
pub const STATUS_CHARACTERISTIC: Uuid = Uuid::from_u128(0x964fbffe_6940_4371_8d48_fe43b07ed00b);
/// Single byte, 0-100 percent.
pub const BATTERY_LEVEL_CHARACTERISTIC: Uuid = uuid_from_u16(0x2a19);

// Matched against the hyphenated lowercase form of the UUID; first hit
// in table order wins.
const SERVICE_LABELS: &[(&str, &str)] = &[
    ("180f", "Battery Service"),
    ("47bbfb1e", "Control Service"),
    ("b568de7c", "McuMgr DFU"),
    ("1800", "Generic Access"),
    ("1801", "Generic Attribute"),
];

/// Human label for a service UUID, `"Unknown"` when nothing matches.
pub fn service_label(uuid: &Uuid) -> &'static str {
    let text = uuid.to_string();
    for &(needle, label) in SERVICE_LABELS {
        if text.contains(needle) {
            return label;
        }
    }
    "Unknown"
}

/// A characteristic we know by sight: its label and the capability set
/// the device is expected to advertise for it.
#[derive(Debug, Clone, Copy)]
pub struct KnownCharacteristic {
    pub uuid: Uuid,
    pub label: &'static str,
    pub expected: CharProps,
}

pub const KNOWN_CHARACTERISTICS: &[KnownCharacteristic] = &[
    KnownCharacteristic {
        uuid: DATA_CHARACTERISTIC,
        label: "Data",
        expected: CharProps::READ.union(CharProps::WRITE).union(CharProps::NOTIFY),
    },
    KnownCharacteristic {
        uuid: COMMAND_CHARACTERISTIC,
        label: "Command",
        expected: CharProps::WRITE,
    },
    KnownCharacteristic {
        uuid: STATUS_CHARACTERISTIC,
        label: "Status",
        expected: CharProps::READ.union(CharProps::NOTIFY),
    },
    KnownCharacteristic {
        uuid: BATTERY_LEVEL_CHARACTERISTIC,
        label: "Battery Level",
        expected: CharProps::READ,
    },
];

/// Human label for a characteristic UUID, `"Unknown"` when nothing
/// matches.
pub fn characteristic_label(uuid: &Uuid) -> &'static str {
    KNOWN_CHARACTERISTICS
        .iter()
        .find(|known| known.uuid == *uuid)
        .map(|known| known.label)
        .unwrap_or("Unknown")
}

/// The capability set a known characteristic should advertise, if we
/// know it at all.
pub fn expected_props(uuid: &Uuid) -> Option<CharProps> {
    KNOWN_CHARACTERISTICS
        .iter()
        .find(|known| known.uuid == *uuid)
        .map(|known| known.expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_from_u16_expands_against_base() {
        assert_eq!(
            uuid_from_u16(0x2a19),
            Uuid::parse_str("00002a19-0000-1000-8000-00805f9b34fb").unwrap()
        );
    }

    #[test]
    fn known_service_labels() {
        assert_eq!(service_label(&BATTERY_SERVICE), "Battery Service");
        assert_eq!(service_label(&CONTROL_SERVICE), "Control Service");
        assert_eq!(service_label(&MCUMGR_SERVICE), "McuMgr DFU");
        assert_eq!(service_label(&GENERIC_ACCESS_SERVICE), "Generic Access");
        assert_eq!(service_label(&GENERIC_ATTRIBUTE_SERVICE), "Generic Attribute");
    }

    #[test]
    fn unknown_service_label_defaults() {
        let unrelated = Uuid::from_u128(0xdeadbeef_0000_4000_8000_000000000000);
        assert_eq!(service_label(&unrelated), "Unknown");
    }

    #[test]
    fn characteristic_lookup() {
        assert_eq!(characteristic_label(&STATUS_CHARACTERISTIC), "Status");
        assert_eq!(characteristic_label(&GENERIC_ACCESS_SERVICE), "Unknown");
        let data = expected_props(&DATA_CHARACTERISTIC).unwrap();
        assert!(data.contains(CharProps::READ | CharProps::WRITE | CharProps::NOTIFY));
        assert_eq!(expected_props(&GENERIC_ACCESS_SERVICE), None);
    }
}
