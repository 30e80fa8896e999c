//! ProxLink connectivity protocol reference implementation.
//! Host-driven: no I/O; the host feeds in medium-layer events and ticks,
//! and the core drives the adapter and listeners.

pub mod endpoint;
pub mod frames;
pub mod manager;
pub mod medium;
pub mod payload;
pub mod protocol;
pub mod transfer;

pub use endpoint::{
    ConnectionInfo, DataUsage, EndpointId, EndpointState, PowerLevel, TransportType,
};
pub use frames::{FrameDecodeError, FrameEncodeError};
pub use manager::{
    AdapterError, ConnectCallback, ConnectError, ConnectResult, ConnectionsManager,
    ConnectionsStatus, DiscoveryListener, IncomingConnectionListener, ManagerConfig,
    MediumAdapter, PayloadStatusListener, STATUS_ACCEPTED,
};
pub use medium::Medium;
pub use payload::{Payload, PayloadStatus, PayloadTransferUpdate};
pub use protocol::{OfflineFrame, UpgradePathInfo, V1Frame, PROTOCOL_VERSION};
pub use transfer::UpgradeConfig;
