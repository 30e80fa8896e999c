//! Mediums: the physical transports a logical connection can ride on, plus
//! translation between the internal enum and the two wire enumerations.

use serde::{Deserialize, Serialize};

/// A physical transport. `Unknown` covers any wire value outside the known
/// set; it is excluded from medium selection, never coerced to a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Medium {
    Unknown,
    Bluetooth,
    WifiHotspot,
    Ble,
    WifiLan,
    WebRtc,
}

/// All known mediums, in wire-tag order. Used for iteration in tests and
/// for building connection-request medium lists.
pub const KNOWN_MEDIUMS: [Medium; 5] = [
    Medium::Bluetooth,
    Medium::WifiHotspot,
    Medium::Ble,
    Medium::WifiLan,
    Medium::WebRtc,
];

/// Medium enumeration carried in a ConnectionRequest frame's medium list.
/// Tags are part of the wire format; do not renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionRequestMedium {
    UnknownMedium = 0,
    Bluetooth = 2,
    WifiHotspot = 3,
    Ble = 4,
    WifiLan = 5,
    WebRtc = 9,
}

/// Medium enumeration carried in a bandwidth-upgrade path info.
/// Independent from [`ConnectionRequestMedium`]; tags are wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradePathMedium {
    UnknownMedium = 0,
    Bluetooth = 2,
    WifiHotspot = 3,
    Ble = 4,
    WifiLan = 5,
    WebRtc = 9,
}

/// Translate an internal medium to the connection-request wire enum.
pub fn medium_to_connection_request_medium(medium: Medium) -> ConnectionRequestMedium {
    match medium {
        Medium::Bluetooth => ConnectionRequestMedium::Bluetooth,
        Medium::WifiHotspot => ConnectionRequestMedium::WifiHotspot,
        Medium::Ble => ConnectionRequestMedium::Ble,
        Medium::WifiLan => ConnectionRequestMedium::WifiLan,
        Medium::WebRtc => ConnectionRequestMedium::WebRtc,
        Medium::Unknown => ConnectionRequestMedium::UnknownMedium,
    }
}

/// Translate a connection-request wire medium back to the internal enum.
pub fn connection_request_medium_to_medium(medium: ConnectionRequestMedium) -> Medium {
    match medium {
        ConnectionRequestMedium::Bluetooth => Medium::Bluetooth,
        ConnectionRequestMedium::WifiHotspot => Medium::WifiHotspot,
        ConnectionRequestMedium::Ble => Medium::Ble,
        ConnectionRequestMedium::WifiLan => Medium::WifiLan,
        ConnectionRequestMedium::WebRtc => Medium::WebRtc,
        ConnectionRequestMedium::UnknownMedium => Medium::Unknown,
    }
}

/// Translate an internal medium to the upgrade-path wire enum.
pub fn medium_to_upgrade_path_medium(medium: Medium) -> UpgradePathMedium {
    match medium {
        Medium::Bluetooth => UpgradePathMedium::Bluetooth,
        Medium::WifiHotspot => UpgradePathMedium::WifiHotspot,
        Medium::Ble => UpgradePathMedium::Ble,
        Medium::WifiLan => UpgradePathMedium::WifiLan,
        Medium::WebRtc => UpgradePathMedium::WebRtc,
        Medium::Unknown => UpgradePathMedium::UnknownMedium,
    }
}

/// Translate an upgrade-path wire medium back to the internal enum.
pub fn upgrade_path_medium_to_medium(medium: UpgradePathMedium) -> Medium {
    match medium {
        UpgradePathMedium::Bluetooth => Medium::Bluetooth,
        UpgradePathMedium::WifiHotspot => Medium::WifiHotspot,
        UpgradePathMedium::Ble => Medium::Ble,
        UpgradePathMedium::WifiLan => Medium::WifiLan,
        UpgradePathMedium::WebRtc => Medium::WebRtc,
        UpgradePathMedium::UnknownMedium => Medium::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_request_translation_is_bijective() {
        for &m in &KNOWN_MEDIUMS {
            let wire = medium_to_connection_request_medium(m);
            assert_eq!(connection_request_medium_to_medium(wire), m);
        }
    }

    #[test]
    fn upgrade_path_translation_is_bijective() {
        for &m in &KNOWN_MEDIUMS {
            let wire = medium_to_upgrade_path_medium(m);
            assert_eq!(upgrade_path_medium_to_medium(wire), m);
        }
    }

    #[test]
    fn unknown_maps_to_unknown_both_ways() {
        assert_eq!(
            connection_request_medium_to_medium(ConnectionRequestMedium::UnknownMedium),
            Medium::Unknown
        );
        assert_eq!(
            upgrade_path_medium_to_medium(UpgradePathMedium::UnknownMedium),
            Medium::Unknown
        );
        assert_eq!(
            medium_to_connection_request_medium(Medium::Unknown),
            ConnectionRequestMedium::UnknownMedium
        );
        assert_eq!(
            medium_to_upgrade_path_medium(Medium::Unknown),
            UpgradePathMedium::UnknownMedium
        );
    }
}
