//! ProxLink wire protocol: frame types and version.
//!
//! Encoding is bincode; framing is a length prefix plus a tagged envelope
//! (see frames module). The envelope tag, not the bincode enum index, is
//! what peers dispatch on, so unknown frame kinds can be skipped.

use serde::{Deserialize, Serialize};

use crate::medium::{ConnectionRequestMedium, UpgradePathMedium};

/// Current envelope version. Only V1 is understood.
pub const PROTOCOL_VERSION: u8 = 1;

/// Wire frame-type tags. Part of the wire format; do not renumber.
pub const FRAME_TAG_CONNECTION_REQUEST: u8 = 1;
pub const FRAME_TAG_CONNECTION_RESPONSE: u8 = 2;
pub const FRAME_TAG_PAYLOAD_TRANSFER: u8 = 3;
pub const FRAME_TAG_BANDWIDTH_UPGRADE_NEGOTIATION: u8 = 4;
pub const FRAME_TAG_KEEP_ALIVE: u8 = 5;

/// Flag bit on a payload chunk marking the final chunk of its payload.
pub const CHUNK_FLAG_LAST_CHUNK: u32 = 1;

/// Top-level envelope exchanged between peers.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineFrame {
    pub version: u8,
    pub v1: V1Frame,
}

/// One decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum V1Frame {
    ConnectionRequest(ConnectionRequestFrame),
    ConnectionResponse(ConnectionResponseFrame),
    PayloadTransfer(PayloadTransferFrame),
    BandwidthUpgradeNegotiation(BandwidthUpgradeNegotiationFrame),
    KeepAlive,
    /// Envelope was valid but the inner type tag is not recognized.
    /// Receivers ignore these without dropping the connection.
    Unknown { tag: u8 },
}

/// Classification of a frame, total over all frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    ConnectionRequest,
    ConnectionResponse,
    PayloadTransfer,
    BandwidthUpgradeNegotiation,
    KeepAlive,
    Unknown,
}

/// Handshake request: who is connecting and over which mediums it can talk.
/// The nonce disambiguates simultaneous connect attempts from both sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRequestFrame {
    pub endpoint_id: String,
    pub endpoint_info: Vec<u8>,
    pub nonce: i32,
    pub mediums: Vec<ConnectionRequestMedium>,
}

/// Handshake response: accept (status 0) or a rejection status code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionResponseFrame {
    pub status: i32,
}

/// One unit of payload traffic: a data chunk or a control message, always
/// carrying the payload header it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadTransferFrame {
    pub header: PayloadHeader,
    pub body: PayloadTransferBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PayloadTransferBody {
    Chunk(PayloadChunk),
    Control(ControlMessage),
}

/// Kind of payload being transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadKind {
    Bytes,
    File,
    Stream,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadHeader {
    pub id: i64,
    pub payload_type: PayloadKind,
    pub total_size: i64,
}

/// Sequential byte range of a payload. Offsets are monotonically
/// non-decreasing within a payload; the last chunk carries
/// [`CHUNK_FLAG_LAST_CHUNK`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadChunk {
    pub offset: i64,
    pub flags: u32,
    pub body: Vec<u8>,
}

impl PayloadChunk {
    pub fn is_last(&self) -> bool {
        self.flags & CHUNK_FLAG_LAST_CHUNK != 0
    }
}

/// In-band payload control, distinct from data chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub event: ControlEvent,
    pub offset: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlEvent {
    PayloadError,
    PayloadCanceled,
}

/// Bandwidth-upgrade negotiation. The LastWrite/SafeToClose pair implements
/// the teardown handshake: neither side closes the old medium before the new
/// one is confirmed usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthUpgradeNegotiationFrame {
    pub event: BwuEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BwuEvent {
    /// Sent on the new channel so the receiver can associate it with the
    /// endpoint that negotiated the upgrade.
    ClientIntroduction { endpoint_id: String },
    UpgradePathAvailable(UpgradePathInfo),
    UpgradeFailure(UpgradePathInfo),
    LastWriteToPriorChannel,
    SafeToClosePriorChannel,
}

/// Where to find the upgraded channel, per medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradePathInfo {
    pub medium: UpgradePathMedium,
    pub credentials: Option<UpgradeCredentials>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpgradeCredentials {
    WifiHotspot {
        ssid: String,
        password: String,
        port: i32,
    },
    WifiLan {
        ip_address: String,
        port: i32,
    },
    Bluetooth {
        service_id: String,
        mac_address: String,
    },
}
