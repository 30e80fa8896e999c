//! Endpoint registry: one record per remote device, keyed by endpoint id.
//!
//! The record collapses the per-endpoint bookkeeping (connection info, live
//! connection, connect deadline, transfer manager, flags) into a single
//! table entry. Invariant: an entry exists for exactly the endpoints the
//! application knows about, and each holds at most one live connection.

use std::collections::VecDeque;

use serde::Deserialize;

use crate::medium::Medium;
use crate::payload::Payload;
use crate::transfer::TransferManager;

/// Opaque remote device identifier.
pub type EndpointId = String;

/// Data-usage policy requested by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DataUsage {
    Unknown,
    Online,
    WifiOnly,
    Offline,
}

/// Transport preference for an outgoing connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TransportType {
    Any,
    NonDisruptive,
    HighQuality,
}

/// Advertising power level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PowerLevel {
    LowPower,
    HighPower,
}

/// Lifecycle state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Discovered,
    Connecting,
    Connected,
    BandwidthUpgrading,
    Disconnected,
}

/// Handshake details recorded when a connection is initiated, surfaced to
/// the accept/reject listener.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub authentication_token: String,
    pub raw_authentication_token: Vec<u8>,
    pub endpoint_info: Vec<u8>,
    pub is_incoming_connection: bool,
}

/// The logical channel bound to an endpoint once accepted. Exclusively owned
/// by the registry entry; all writes funnel through the manager.
#[derive(Debug)]
pub struct Connection {
    pub medium: Medium,
    /// Payloads deferred while a bandwidth upgrade is in flight. Flushed on
    /// the new medium once the old one is safe to close.
    pub queued_payloads: VecDeque<Payload>,
}

impl Connection {
    pub fn new(medium: Medium) -> Self {
        Self {
            medium,
            queued_payloads: VecDeque::new(),
        }
    }
}

/// One registry entry. Optional fields track the phases the endpoint has
/// actually entered; `Discovered` endpoints carry none of the heavyweight
/// state.
pub struct Endpoint {
    pub state: EndpointState,
    pub endpoint_info: Vec<u8>,
    pub bluetooth_mac: Option<Vec<u8>>,
    pub data_usage: DataUsage,
    pub transport_type: TransportType,
    pub connection_info: Option<ConnectionInfo>,
    pub connection: Option<Connection>,
    pub transfer: Option<TransferManager>,
    /// Tick at which a pending outgoing connect times out.
    pub connect_deadline: Option<u64>,
    /// Tick the peer was last heard from (any inbound frame).
    pub last_heard_tick: u64,
    /// Last medium reported by a bandwidth change, kept for metrics.
    pub upgraded_medium: Option<Medium>,
    /// Suppresses re-entrant disconnects while one is in flight.
    pub disconnecting: bool,
    /// Set when the endpoint came from discovery; duplicate found
    /// notifications for it are suppressed.
    pub discovered: bool,
}

impl Endpoint {
    pub fn new(endpoint_info: Vec<u8>, now_tick: u64, discovered: bool) -> Self {
        Self {
            state: EndpointState::Discovered,
            endpoint_info,
            bluetooth_mac: None,
            data_usage: DataUsage::Unknown,
            transport_type: TransportType::Any,
            connection_info: None,
            connection: None,
            transfer: None,
            connect_deadline: None,
            last_heard_tick: now_tick,
            upgraded_medium: None,
            disconnecting: false,
            discovered,
        }
    }
}
