//! Frame codec: length-prefix (4 bytes LE) + tagged envelope + bincode body.
//!
//! Stateless and deterministic. The envelope is `version` byte, frame-type
//! tag byte, then the bincode-encoded body for that tag. Trailing bytes after
//! a recognized body are ignored so newer peers can append fields without
//! breaking older ones.

use crate::medium::{
    connection_request_medium_to_medium, medium_to_connection_request_medium,
    medium_to_upgrade_path_medium, Medium,
};
use crate::protocol::{
    BandwidthUpgradeNegotiationFrame, BwuEvent, ConnectionRequestFrame, ConnectionResponseFrame,
    ControlMessage, FrameType, OfflineFrame, PayloadChunk, PayloadHeader, PayloadTransferBody,
    PayloadTransferFrame, UpgradeCredentials, UpgradePathInfo, V1Frame,
    FRAME_TAG_BANDWIDTH_UPGRADE_NEGOTIATION, FRAME_TAG_CONNECTION_REQUEST,
    FRAME_TAG_CONNECTION_RESPONSE, FRAME_TAG_KEEP_ALIVE, FRAME_TAG_PAYLOAD_TRANSFER,
    PROTOCOL_VERSION,
};

const LEN_SIZE: usize = 4;
const ENVELOPE_HEADER: usize = 2; // version + tag
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

/// Error encoding a frame (bincode, size limit, or an unencodable frame).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
    #[error("unknown frames cannot be encoded")]
    UnknownFrame,
}

/// Error decoding a frame. `NeedMore` means the caller should retry with a
/// longer buffer; the rest are invalid encodings, which drop the frame but
/// never the connection.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

/// Encode a frame: 4 bytes LE length + version + tag + bincode body.
pub fn encode(frame: &OfflineFrame) -> Result<Vec<u8>, FrameEncodeError> {
    let (tag, body) = match &frame.v1 {
        V1Frame::ConnectionRequest(f) => (FRAME_TAG_CONNECTION_REQUEST, bincode::serialize(f)?),
        V1Frame::ConnectionResponse(f) => (FRAME_TAG_CONNECTION_RESPONSE, bincode::serialize(f)?),
        V1Frame::PayloadTransfer(f) => (FRAME_TAG_PAYLOAD_TRANSFER, bincode::serialize(f)?),
        V1Frame::BandwidthUpgradeNegotiation(f) => {
            (FRAME_TAG_BANDWIDTH_UPGRADE_NEGOTIATION, bincode::serialize(f)?)
        }
        V1Frame::KeepAlive => (FRAME_TAG_KEEP_ALIVE, Vec::new()),
        V1Frame::Unknown { .. } => return Err(FrameEncodeError::UnknownFrame),
    };
    let len = (ENVELOPE_HEADER + body.len()) as u64;
    if len > MAX_FRAME_LEN as u64 {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + len as usize);
    out.extend_from_slice(&(len as u32).to_le_bytes());
    out.push(frame.version);
    out.push(tag);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode one frame from the front of `bytes`. Returns the frame and the
/// number of bytes consumed. Never panics or reads out of bounds; truncated
/// input yields `NeedMore`. A valid envelope with an unrecognized tag parses
/// as [`V1Frame::Unknown`], not an error.
pub fn parse(bytes: &[u8]) -> Result<(OfflineFrame, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_FRAME_LEN as usize {
        return Err(FrameDecodeError::TooLarge);
    }
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    if len < ENVELOPE_HEADER {
        return Err(FrameDecodeError::Decode(Box::new(bincode::ErrorKind::Custom(
            "envelope shorter than header".into(),
        ))));
    }
    let version = bytes[LEN_SIZE];
    if version != PROTOCOL_VERSION {
        return Err(FrameDecodeError::UnsupportedVersion(version));
    }
    let tag = bytes[LEN_SIZE + 1];
    let body = &bytes[LEN_SIZE + ENVELOPE_HEADER..LEN_SIZE + len];
    // bincode ignores trailing bytes: unknown appended fields don't
    // invalidate a recognized frame.
    let v1 = match tag {
        FRAME_TAG_CONNECTION_REQUEST => V1Frame::ConnectionRequest(bincode::deserialize(body)?),
        FRAME_TAG_CONNECTION_RESPONSE => V1Frame::ConnectionResponse(bincode::deserialize(body)?),
        FRAME_TAG_PAYLOAD_TRANSFER => V1Frame::PayloadTransfer(bincode::deserialize(body)?),
        FRAME_TAG_BANDWIDTH_UPGRADE_NEGOTIATION => {
            V1Frame::BandwidthUpgradeNegotiation(bincode::deserialize(body)?)
        }
        FRAME_TAG_KEEP_ALIVE => V1Frame::KeepAlive,
        other => V1Frame::Unknown { tag: other },
    };
    Ok((OfflineFrame { version, v1 }, LEN_SIZE + len))
}

/// Classify a frame. Total; returns `Unknown` for content it cannot classify.
pub fn frame_type(frame: &OfflineFrame) -> FrameType {
    match &frame.v1 {
        V1Frame::ConnectionRequest(_) => FrameType::ConnectionRequest,
        V1Frame::ConnectionResponse(_) => FrameType::ConnectionResponse,
        V1Frame::PayloadTransfer(_) => FrameType::PayloadTransfer,
        V1Frame::BandwidthUpgradeNegotiation(_) => FrameType::BandwidthUpgradeNegotiation,
        V1Frame::KeepAlive => FrameType::KeepAlive,
        V1Frame::Unknown { .. } => FrameType::Unknown,
    }
}

fn envelope(v1: V1Frame) -> OfflineFrame {
    OfflineFrame {
        version: PROTOCOL_VERSION,
        v1,
    }
}

/// Build a ConnectionRequest frame. The nonce must be unpredictable; it
/// disambiguates simultaneous connect attempts from both sides.
pub fn for_connection_request(
    endpoint_id: &str,
    endpoint_info: &[u8],
    nonce: i32,
    mediums: &[Medium],
) -> Result<Vec<u8>, FrameEncodeError> {
    encode(&envelope(V1Frame::ConnectionRequest(ConnectionRequestFrame {
        endpoint_id: endpoint_id.to_string(),
        endpoint_info: endpoint_info.to_vec(),
        nonce,
        mediums: mediums
            .iter()
            .map(|&m| medium_to_connection_request_medium(m))
            .collect(),
    })))
}

pub fn for_connection_response(status: i32) -> Result<Vec<u8>, FrameEncodeError> {
    encode(&envelope(V1Frame::ConnectionResponse(
        ConnectionResponseFrame { status },
    )))
}

pub fn for_data_payload_transfer(
    header: PayloadHeader,
    chunk: PayloadChunk,
) -> Result<Vec<u8>, FrameEncodeError> {
    encode(&envelope(V1Frame::PayloadTransfer(PayloadTransferFrame {
        header,
        body: PayloadTransferBody::Chunk(chunk),
    })))
}

pub fn for_control_payload_transfer(
    header: PayloadHeader,
    control: ControlMessage,
) -> Result<Vec<u8>, FrameEncodeError> {
    encode(&envelope(V1Frame::PayloadTransfer(PayloadTransferFrame {
        header,
        body: PayloadTransferBody::Control(control),
    })))
}

pub fn for_bwu_introduction(endpoint_id: &str) -> Result<Vec<u8>, FrameEncodeError> {
    encode(&envelope(V1Frame::BandwidthUpgradeNegotiation(
        BandwidthUpgradeNegotiationFrame {
            event: BwuEvent::ClientIntroduction {
                endpoint_id: endpoint_id.to_string(),
            },
        },
    )))
}

pub fn for_bwu_wifi_hotspot_path_available(
    ssid: &str,
    password: &str,
    port: i32,
) -> Result<Vec<u8>, FrameEncodeError> {
    encode(&envelope(V1Frame::BandwidthUpgradeNegotiation(
        BandwidthUpgradeNegotiationFrame {
            event: BwuEvent::UpgradePathAvailable(UpgradePathInfo {
                medium: medium_to_upgrade_path_medium(Medium::WifiHotspot),
                credentials: Some(UpgradeCredentials::WifiHotspot {
                    ssid: ssid.to_string(),
                    password: password.to_string(),
                    port,
                }),
            }),
        },
    )))
}

pub fn for_bwu_wifi_lan_path_available(
    ip_address: &str,
    port: i32,
) -> Result<Vec<u8>, FrameEncodeError> {
    encode(&envelope(V1Frame::BandwidthUpgradeNegotiation(
        BandwidthUpgradeNegotiationFrame {
            event: BwuEvent::UpgradePathAvailable(UpgradePathInfo {
                medium: medium_to_upgrade_path_medium(Medium::WifiLan),
                credentials: Some(UpgradeCredentials::WifiLan {
                    ip_address: ip_address.to_string(),
                    port,
                }),
            }),
        },
    )))
}

pub fn for_bwu_bluetooth_path_available(
    service_id: &str,
    mac_address: &str,
) -> Result<Vec<u8>, FrameEncodeError> {
    encode(&envelope(V1Frame::BandwidthUpgradeNegotiation(
        BandwidthUpgradeNegotiationFrame {
            event: BwuEvent::UpgradePathAvailable(UpgradePathInfo {
                medium: medium_to_upgrade_path_medium(Medium::Bluetooth),
                credentials: Some(UpgradeCredentials::Bluetooth {
                    service_id: service_id.to_string(),
                    mac_address: mac_address.to_string(),
                }),
            }),
        },
    )))
}

pub fn for_bwu_failure(info: UpgradePathInfo) -> Result<Vec<u8>, FrameEncodeError> {
    encode(&envelope(V1Frame::BandwidthUpgradeNegotiation(
        BandwidthUpgradeNegotiationFrame {
            event: BwuEvent::UpgradeFailure(info),
        },
    )))
}

pub fn for_bwu_last_write() -> Result<Vec<u8>, FrameEncodeError> {
    encode(&envelope(V1Frame::BandwidthUpgradeNegotiation(
        BandwidthUpgradeNegotiationFrame {
            event: BwuEvent::LastWriteToPriorChannel,
        },
    )))
}

pub fn for_bwu_safe_to_close() -> Result<Vec<u8>, FrameEncodeError> {
    encode(&envelope(V1Frame::BandwidthUpgradeNegotiation(
        BandwidthUpgradeNegotiationFrame {
            event: BwuEvent::SafeToClosePriorChannel,
        },
    )))
}

/// Empty liveness probe.
pub fn for_keep_alive() -> Result<Vec<u8>, FrameEncodeError> {
    encode(&envelope(V1Frame::KeepAlive))
}

/// Flatten a request frame's medium list to internal mediums. Unknown wire
/// values survive as `Medium::Unknown` so callers can exclude them.
pub fn connection_request_mediums_to_mediums(frame: &ConnectionRequestFrame) -> Vec<Medium> {
    frame
        .mediums
        .iter()
        .map(|&m| connection_request_medium_to_medium(m))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ControlEvent, PayloadKind, CHUNK_FLAG_LAST_CHUNK};

    fn parse_one(bytes: &[u8]) -> OfflineFrame {
        let (frame, consumed) = parse(bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        frame
    }

    #[test]
    fn roundtrip_connection_request() {
        let mediums = [Medium::Bluetooth, Medium::WifiLan];
        let bytes = for_connection_request("ABCD", &[1, 2, 3], 0x1234_5678, &mediums).unwrap();
        let frame = parse_one(&bytes);
        assert_eq!(frame_type(&frame), FrameType::ConnectionRequest);
        match frame.v1 {
            V1Frame::ConnectionRequest(f) => {
                assert_eq!(f.endpoint_id, "ABCD");
                assert_eq!(f.endpoint_info, vec![1, 2, 3]);
                assert_eq!(f.nonce, 0x1234_5678);
                assert_eq!(connection_request_mediums_to_mediums(&f), mediums);
            }
            other => panic!("expected ConnectionRequest, got {other:?}"),
        }
    }

    #[test]
    fn roundtrip_connection_response() {
        let bytes = for_connection_response(13).unwrap();
        let frame = parse_one(&bytes);
        assert_eq!(frame_type(&frame), FrameType::ConnectionResponse);
        match frame.v1 {
            V1Frame::ConnectionResponse(f) => assert_eq!(f.status, 13),
            other => panic!("expected ConnectionResponse, got {other:?}"),
        }
    }

    #[test]
    fn roundtrip_data_payload_transfer() {
        let header = PayloadHeader {
            id: 42,
            payload_type: PayloadKind::Bytes,
            total_size: 10,
        };
        let chunk = PayloadChunk {
            offset: 0,
            flags: CHUNK_FLAG_LAST_CHUNK,
            body: vec![9; 10],
        };
        let bytes = for_data_payload_transfer(header.clone(), chunk.clone()).unwrap();
        let frame = parse_one(&bytes);
        assert_eq!(frame_type(&frame), FrameType::PayloadTransfer);
        match frame.v1 {
            V1Frame::PayloadTransfer(f) => {
                assert_eq!(f.header, header);
                assert_eq!(f.body, PayloadTransferBody::Chunk(chunk));
            }
            other => panic!("expected PayloadTransfer, got {other:?}"),
        }
    }

    #[test]
    fn roundtrip_control_payload_transfer() {
        let header = PayloadHeader {
            id: 7,
            payload_type: PayloadKind::File,
            total_size: 100,
        };
        let control = ControlMessage {
            event: ControlEvent::PayloadCanceled,
            offset: 30,
        };
        let bytes = for_control_payload_transfer(header.clone(), control.clone()).unwrap();
        match parse_one(&bytes).v1 {
            V1Frame::PayloadTransfer(f) => {
                assert_eq!(f.header, header);
                assert_eq!(f.body, PayloadTransferBody::Control(control));
            }
            other => panic!("expected PayloadTransfer, got {other:?}"),
        }
    }

    #[test]
    fn roundtrip_bwu_frames() {
        let cases: Vec<(Vec<u8>, BwuEvent)> = vec![
            (
                for_bwu_introduction("WXYZ").unwrap(),
                BwuEvent::ClientIntroduction {
                    endpoint_id: "WXYZ".into(),
                },
            ),
            (
                for_bwu_wifi_hotspot_path_available("ssid", "pw", 8080).unwrap(),
                BwuEvent::UpgradePathAvailable(UpgradePathInfo {
                    medium: medium_to_upgrade_path_medium(Medium::WifiHotspot),
                    credentials: Some(UpgradeCredentials::WifiHotspot {
                        ssid: "ssid".into(),
                        password: "pw".into(),
                        port: 8080,
                    }),
                }),
            ),
            (
                for_bwu_wifi_lan_path_available("192.168.1.2", 4443).unwrap(),
                BwuEvent::UpgradePathAvailable(UpgradePathInfo {
                    medium: medium_to_upgrade_path_medium(Medium::WifiLan),
                    credentials: Some(UpgradeCredentials::WifiLan {
                        ip_address: "192.168.1.2".into(),
                        port: 4443,
                    }),
                }),
            ),
            (
                for_bwu_bluetooth_path_available("svc", "AA:BB:CC:DD:EE:FF").unwrap(),
                BwuEvent::UpgradePathAvailable(UpgradePathInfo {
                    medium: medium_to_upgrade_path_medium(Medium::Bluetooth),
                    credentials: Some(UpgradeCredentials::Bluetooth {
                        service_id: "svc".into(),
                        mac_address: "AA:BB:CC:DD:EE:FF".into(),
                    }),
                }),
            ),
            (
                for_bwu_failure(UpgradePathInfo {
                    medium: medium_to_upgrade_path_medium(Medium::WifiLan),
                    credentials: None,
                })
                .unwrap(),
                BwuEvent::UpgradeFailure(UpgradePathInfo {
                    medium: medium_to_upgrade_path_medium(Medium::WifiLan),
                    credentials: None,
                }),
            ),
            (
                for_bwu_last_write().unwrap(),
                BwuEvent::LastWriteToPriorChannel,
            ),
            (
                for_bwu_safe_to_close().unwrap(),
                BwuEvent::SafeToClosePriorChannel,
            ),
        ];
        for (bytes, expected) in cases {
            let frame = parse_one(&bytes);
            assert_eq!(frame_type(&frame), FrameType::BandwidthUpgradeNegotiation);
            match frame.v1 {
                V1Frame::BandwidthUpgradeNegotiation(f) => assert_eq!(f.event, expected),
                other => panic!("expected BWU frame, got {other:?}"),
            }
        }
    }

    #[test]
    fn roundtrip_keep_alive() {
        let bytes = for_keep_alive().unwrap();
        let frame = parse_one(&bytes);
        assert_eq!(frame_type(&frame), FrameType::KeepAlive);
        assert_eq!(frame.v1, V1Frame::KeepAlive);
    }

    #[test]
    fn unknown_tag_classifies_unknown_without_error() {
        // Valid envelope, unrecognized inner tag, arbitrary body bytes.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&6u32.to_le_bytes());
        bytes.push(PROTOCOL_VERSION);
        bytes.push(0x2A);
        bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let frame = parse_one(&bytes);
        assert_eq!(frame_type(&frame), FrameType::Unknown);
        assert_eq!(frame.v1, V1Frame::Unknown { tag: 0x2A });
    }

    #[test]
    fn unknown_frames_cannot_be_encoded() {
        let frame = OfflineFrame {
            version: PROTOCOL_VERSION,
            v1: V1Frame::Unknown { tag: 0x2A },
        };
        assert!(matches!(encode(&frame), Err(FrameEncodeError::UnknownFrame)));
    }

    #[test]
    fn partial_read_need_more() {
        let bytes = for_keep_alive().unwrap();
        assert!(matches!(parse(&bytes[..2]), Err(FrameDecodeError::NeedMore)));
        assert!(matches!(
            parse(&bytes[..LEN_SIZE]),
            Err(FrameDecodeError::NeedMore)
        ));
        assert!(matches!(parse(&[]), Err(FrameDecodeError::NeedMore)));
    }

    #[test]
    fn unsupported_version_rejected() {
        let mut bytes = for_keep_alive().unwrap();
        bytes[LEN_SIZE] = 99;
        assert!(matches!(
            parse(&bytes),
            Err(FrameDecodeError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn oversized_length_prefix_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(MAX_FRAME_LEN + 1).to_le_bytes());
        bytes.extend_from_slice(&[0; 8]);
        assert!(matches!(parse(&bytes), Err(FrameDecodeError::TooLarge)));
    }

    #[test]
    fn malformed_body_is_decode_error() {
        // ConnectionResponse tag with a truncated body.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.push(PROTOCOL_VERSION);
        bytes.push(FRAME_TAG_CONNECTION_RESPONSE);
        bytes.push(0x01);
        assert!(matches!(parse(&bytes), Err(FrameDecodeError::Decode(_))));
    }

    #[test]
    fn trailing_bytes_in_recognized_body_are_ignored() {
        // Append bytes a newer peer might add after the known fields.
        let canonical = for_connection_response(0).unwrap();
        let body = &canonical[LEN_SIZE + 2..];
        let mut extended = Vec::new();
        extended.extend_from_slice(&((2 + body.len() + 3) as u32).to_le_bytes());
        extended.push(PROTOCOL_VERSION);
        extended.push(FRAME_TAG_CONNECTION_RESPONSE);
        extended.extend_from_slice(body);
        extended.extend_from_slice(&[1, 2, 3]);
        let frame = parse_one(&extended);
        match frame.v1 {
            V1Frame::ConnectionResponse(f) => assert_eq!(f.status, 0),
            other => panic!("expected ConnectionResponse, got {other:?}"),
        }
    }

    #[test]
    fn multiple_frames_in_one_buffer() {
        let a = for_keep_alive().unwrap();
        let b = for_connection_response(5).unwrap();
        let mut buf = Vec::new();
        buf.extend_from_slice(&a);
        buf.extend_from_slice(&b);
        let (f1, n1) = parse(&buf).unwrap();
        assert_eq!(n1, a.len());
        assert_eq!(frame_type(&f1), FrameType::KeepAlive);
        let (f2, n2) = parse(&buf[n1..]).unwrap();
        assert_eq!(n2, b.len());
        assert_eq!(frame_type(&f2), FrameType::ConnectionResponse);
    }
}
