//! Connection orchestrator: the central state machine.
//!
//! Host-driven, like the rest of the crate: the host serializes access (a
//! mutex around the manager), feeds in medium-layer events, and calls
//! `tick()` on its clock. The manager never blocks on I/O; radio work goes
//! out through the [`MediumAdapter`] and results come back as events.
//! Listener callbacks fire only after internal state mutation completes, so
//! a listener may re-enter the public API through the host.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Weak;

use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::endpoint::{
    Connection, ConnectionInfo, DataUsage, Endpoint, EndpointId, EndpointState, PowerLevel,
    TransportType,
};
use crate::frames::{self, FrameDecodeError};
use crate::medium::{upgrade_path_medium_to_medium, Medium};
use crate::payload::{
    split_into_chunks, ChunkApplyResult, IncomingAssembly, Payload, PayloadStatus,
    PayloadTransferUpdate, DEFAULT_CHUNK_SIZE,
};
use crate::protocol::{
    BwuEvent, ConnectionRequestFrame, ControlEvent, ControlMessage, PayloadChunk, PayloadHeader,
    PayloadTransferBody, UpgradePathInfo, V1Frame,
};
use crate::transfer::{TransferManager, UpgradeConfig};

/// ConnectionResponse status meaning "accepted". Any other value is a
/// rejection status code.
pub const STATUS_ACCEPTED: i32 = 0;

/// Logical connections come up on the baseline channel; upgrades move them
/// to faster mediums afterwards.
const INITIAL_MEDIUM: Medium = Medium::Bluetooth;

/// Orchestrator tunables. Hosts may deserialize this from their config file;
/// every field has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagerConfig {
    /// Ticks before a pending outgoing connect times out.
    #[serde(default = "default_connect_timeout_ticks")]
    pub connect_timeout_ticks: u64,
    /// Ticks between KeepAlive probes to connected endpoints (0 disables).
    #[serde(default = "default_keep_alive_interval_ticks")]
    pub keep_alive_interval_ticks: u64,
    /// Ticks of silence from a peer before the connection is torn down.
    #[serde(default = "default_keep_alive_timeout_ticks")]
    pub keep_alive_timeout_ticks: u64,
    /// Outgoing payload chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub upgrade: UpgradeConfig,
}

fn default_connect_timeout_ticks() -> u64 {
    30
}
fn default_keep_alive_interval_ticks() -> u64 {
    3
}
fn default_keep_alive_timeout_ticks() -> u64 {
    15
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ticks: default_connect_timeout_ticks(),
            keep_alive_interval_ticks: default_keep_alive_interval_ticks(),
            keep_alive_timeout_ticks: default_keep_alive_timeout_ticks(),
            chunk_size: default_chunk_size(),
            upgrade: UpgradeConfig::default(),
        }
    }
}

/// Error reported by the medium layer for an operation it could not start.
#[derive(Debug, thiserror::Error)]
#[error("medium adapter error: {0}")]
pub struct AdapterError(pub String);

/// Boundary to the per-medium radio drivers. The adapter dispatches work
/// asynchronously; outcomes arrive back through the manager's event
/// handlers (`on_*` methods).
pub trait MediumAdapter: Send {
    fn start_advertising(
        &mut self,
        endpoint_info: &[u8],
        power_level: PowerLevel,
        data_usage: DataUsage,
    ) -> Result<(), AdapterError>;

    fn start_discovery(&mut self, data_usage: DataUsage) -> Result<(), AdapterError>;

    /// Deliver a serialized ConnectionRequest to the endpoint over whatever
    /// medium can currently reach it.
    fn request_connection(
        &mut self,
        endpoint_id: &str,
        request_frame: Vec<u8>,
    ) -> Result<(), AdapterError>;

    /// Tear down the radio-level connection. Completion is reported via
    /// `on_disconnected`.
    fn disconnect(&mut self, endpoint_id: &str);

    /// Write one frame on the given medium's channel for the endpoint.
    fn send_frame(&mut self, endpoint_id: &str, medium: Medium, frame: Vec<u8>);

    /// Provision a faster channel for the endpoint (we asked for an
    /// upgrade). The new medium is reported via `on_bandwidth_changed`.
    fn request_upgrade_path(&mut self, endpoint_id: &str);

    /// Dial the upgrade path the peer advertised. The new medium is
    /// reported via `on_bandwidth_changed`.
    fn connect_upgrade_path(&mut self, endpoint_id: &str, info: &UpgradePathInfo);
}

/// Receives discovery events. Held strongly for the lifetime of discovery.
pub trait DiscoveryListener: Send + Sync {
    fn on_endpoint_found(&self, endpoint_id: &str, endpoint_info: &[u8]);
    fn on_endpoint_lost(&self, endpoint_id: &str);
}

/// Receives incoming connection requests for the accept/reject decision.
pub trait IncomingConnectionListener: Send + Sync {
    fn on_connection_initiated(&self, endpoint_id: &str, info: &ConnectionInfo);
}

/// Receives payload progress. Registered weakly: a dropped listener is
/// treated as absent and updates are silently discarded.
pub trait PayloadStatusListener: Send + Sync {
    fn on_status_update(&self, endpoint_id: &str, update: &PayloadTransferUpdate);
}

/// How a pending connect resolved. Exactly one of these reaches each
/// callback, exactly once.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("a connect is already pending for this endpoint")]
    AlreadyConnecting,
    #[error("connect timed out")]
    Timeout,
    #[error("peer rejected the connection (status {0})")]
    Rejected(i32),
    #[error("transport failure")]
    Transport,
}

pub type ConnectResult = Result<(), ConnectError>;
pub type ConnectCallback = Box<dyn FnOnce(&str, ConnectResult) + Send>;

/// Outcome delivered to bookkeeping callbacks (e.g. register_payload_path).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionsStatus {
    Success,
    Error,
}

pub type ConnectionsCallback = Box<dyn FnOnce(ConnectionsStatus) + Send>;

/// The orchestration engine. One instance per process; all state is
/// in-memory and endpoint-scoped, lost on restart.
pub struct ConnectionsManager {
    adapter: Box<dyn MediumAdapter>,
    config: ManagerConfig,
    endpoints: HashMap<EndpointId, Endpoint>,
    /// At most one pending outgoing connect per endpoint.
    pending_outgoing: HashMap<EndpointId, ConnectCallback>,
    /// Fully assembled incoming payloads, by payload id.
    incoming_payloads: HashMap<i64, Payload>,
    /// In-flight incoming assemblies, with the endpoint they arrived from.
    incoming_assemblies: HashMap<i64, (EndpointId, IncomingAssembly)>,
    payload_listeners: HashMap<i64, Weak<dyn PayloadStatusListener>>,
    payload_paths: HashMap<i64, PathBuf>,
    discovery_listener: Option<Box<dyn DiscoveryListener>>,
    incoming_listener: Option<Box<dyn IncomingConnectionListener>>,
    tick_count: u64,
}

impl ConnectionsManager {
    pub fn new(adapter: Box<dyn MediumAdapter>, config: ManagerConfig) -> Self {
        Self {
            adapter,
            config,
            endpoints: HashMap::new(),
            pending_outgoing: HashMap::new(),
            incoming_payloads: HashMap::new(),
            incoming_assemblies: HashMap::new(),
            payload_listeners: HashMap::new(),
            payload_paths: HashMap::new(),
            discovery_listener: None,
            incoming_listener: None,
            tick_count: 0,
        }
    }

    // ---- application-facing API ----

    /// Begin discovery; found/lost events flow to `listener`.
    pub fn start_discovery(
        &mut self,
        listener: Box<dyn DiscoveryListener>,
        data_usage: DataUsage,
    ) -> Result<(), AdapterError> {
        self.adapter.start_discovery(data_usage)?;
        self.discovery_listener = Some(listener);
        Ok(())
    }

    /// Begin accepting inbound connection requests, reported to `listener`.
    pub fn start_advertising(
        &mut self,
        endpoint_info: &[u8],
        listener: Box<dyn IncomingConnectionListener>,
        power_level: PowerLevel,
        data_usage: DataUsage,
    ) -> Result<(), AdapterError> {
        self.adapter
            .start_advertising(endpoint_info, power_level, data_usage)?;
        self.incoming_listener = Some(listener);
        Ok(())
    }

    /// Start an outgoing connection attempt. Exactly one of
    /// success/failure/timeout resolves `callback`, exactly once. A second
    /// call while one is pending fails fast with `AlreadyConnecting`.
    pub fn connect(
        &mut self,
        endpoint_info: &[u8],
        endpoint_id: &str,
        bluetooth_mac: Option<Vec<u8>>,
        data_usage: DataUsage,
        transport_type: TransportType,
        callback: ConnectCallback,
    ) {
        if self.pending_outgoing.contains_key(endpoint_id) {
            warn!(endpoint_id, "connect already pending");
            callback(endpoint_id, Err(ConnectError::AlreadyConnecting));
            return;
        }
        // A live connection must not be clobbered by re-arming the connect
        // state; callers disconnect first if they want a fresh attempt.
        if self.is_connected(endpoint_id) {
            warn!(endpoint_id, "connect for already connected endpoint");
            callback(endpoint_id, Err(ConnectError::AlreadyConnecting));
            return;
        }
        let now = self.tick_count;
        let deadline = now + self.config.connect_timeout_ticks;
        let ep = self
            .endpoints
            .entry(endpoint_id.to_string())
            .or_insert_with(|| Endpoint::new(endpoint_info.to_vec(), now, false));
        ep.endpoint_info = endpoint_info.to_vec();
        ep.bluetooth_mac = bluetooth_mac;
        ep.data_usage = data_usage;
        ep.transport_type = transport_type;
        ep.state = EndpointState::Connecting;
        ep.connect_deadline = Some(deadline);

        let mediums = supported_mediums(transport_type, data_usage);
        let nonce: i32 = rand::thread_rng().gen();
        let frame = match frames::for_connection_request(endpoint_id, endpoint_info, nonce, &mediums)
        {
            Ok(frame) => frame,
            Err(err) => {
                warn!(endpoint_id, %err, "failed to build connection request");
                self.release_connect_state(endpoint_id);
                callback(endpoint_id, Err(ConnectError::Transport));
                return;
            }
        };
        debug!(endpoint_id, ?mediums, "connecting");
        self.pending_outgoing
            .insert(endpoint_id.to_string(), callback);
        if let Err(err) = self.adapter.request_connection(endpoint_id, frame) {
            warn!(endpoint_id, %err, "connect dispatch failed");
            if let Some(cb) = self.pending_outgoing.remove(endpoint_id) {
                cb(endpoint_id, Err(ConnectError::Transport));
            }
            self.release_connect_state(endpoint_id);
        }
    }

    /// Tear down the connection to an endpoint. Idempotent: re-entrant
    /// disconnects while one is in flight are suppressed.
    pub fn disconnect(&mut self, endpoint_id: &str) {
        match self.endpoints.get_mut(endpoint_id) {
            Some(ep) if ep.disconnecting => {
                debug!(endpoint_id, "disconnect already in flight");
            }
            Some(ep) => {
                ep.disconnecting = true;
                info!(endpoint_id, "disconnecting");
                self.adapter.disconnect(endpoint_id);
            }
            None => {
                debug!(endpoint_id, "disconnect for unknown endpoint ignored");
            }
        }
    }

    /// Send a payload. Immediate when no bandwidth upgrade is in flight;
    /// queued until the transition resolves otherwise. Failures surface
    /// through the status listener, never a return value.
    pub fn send(
        &mut self,
        endpoint_id: &str,
        payload: Payload,
        listener: Weak<dyn PayloadStatusListener>,
    ) {
        let payload_id = payload.id;
        let total = payload.data.len() as i64;
        self.payload_listeners.insert(payload_id, listener);

        let connected = self
            .endpoints
            .get(endpoint_id)
            .is_some_and(|ep| ep.connection.is_some());
        if !connected {
            warn!(endpoint_id, payload_id, "send to endpoint without connection");
            self.notify_payload_update(
                payload_id,
                endpoint_id,
                PayloadTransferUpdate {
                    payload_id,
                    status: PayloadStatus::Failure,
                    total_bytes: total,
                    bytes_transferred: 0,
                },
            );
            return;
        }
        let upgrading = self
            .endpoints
            .get(endpoint_id)
            .and_then(|ep| ep.transfer.as_ref())
            .is_some_and(|tm| tm.upgrade_in_progress());
        if upgrading {
            debug!(endpoint_id, payload_id, "medium transition in flight; payload queued");
            if let Some(conn) = self
                .endpoints
                .get_mut(endpoint_id)
                .and_then(|ep| ep.connection.as_mut())
            {
                conn.queued_payloads.push_back(payload);
            }
            return;
        }
        self.send_payload_now(endpoint_id, payload);
    }

    /// Register a status listener for a payload id. Weak: a dropped
    /// listener is treated as absent.
    pub fn register_payload_status_listener(
        &mut self,
        payload_id: i64,
        listener: Weak<dyn PayloadStatusListener>,
    ) {
        self.payload_listeners.insert(payload_id, listener);
    }

    /// Record the destination path for a file payload. Acts only on the
    /// caller-owned map; connection state is untouched.
    pub fn register_payload_path(
        &mut self,
        payload_id: i64,
        file_path: PathBuf,
        callback: ConnectionsCallback,
    ) {
        self.payload_paths.insert(payload_id, file_path);
        callback(ConnectionsStatus::Success);
    }

    /// Drop all fully received payloads and in-flight assemblies, releasing
    /// their listener and path registrations.
    pub fn clear_incoming_payloads(&mut self) {
        let ids: Vec<i64> = self
            .incoming_payloads
            .keys()
            .chain(self.incoming_assemblies.keys())
            .copied()
            .collect();
        self.incoming_payloads.clear();
        self.incoming_assemblies.clear();
        for payload_id in ids {
            self.payload_listeners.remove(&payload_id);
            self.payload_paths.remove(&payload_id);
        }
    }

    pub fn get_incoming_payload(&self, payload_id: i64) -> Option<&Payload> {
        self.incoming_payloads.get(&payload_id)
    }

    pub fn get_raw_authentication_token(&self, endpoint_id: &str) -> Option<Vec<u8>> {
        self.endpoints
            .get(endpoint_id)
            .and_then(|ep| ep.connection_info.as_ref())
            .map(|info| info.raw_authentication_token.clone())
    }

    /// Last medium reported by a bandwidth change, for metrics.
    pub fn upgraded_medium(&self, endpoint_id: &str) -> Option<Medium> {
        self.endpoints
            .get(endpoint_id)
            .and_then(|ep| ep.upgraded_medium)
    }

    pub fn endpoint_state(&self, endpoint_id: &str) -> Option<EndpointState> {
        self.endpoints.get(endpoint_id).map(|ep| ep.state)
    }

    pub fn is_connected(&self, endpoint_id: &str) -> bool {
        self.endpoints
            .get(endpoint_id)
            .is_some_and(|ep| ep.connection.is_some())
    }

    /// Accept an incoming connection surfaced via the incoming listener.
    pub fn accept_connection(&mut self, endpoint_id: &str) {
        let medium = self.current_medium(endpoint_id);
        if let Ok(bytes) = frames::for_connection_response(STATUS_ACCEPTED) {
            self.adapter.send_frame(endpoint_id, medium, bytes);
        }
    }

    /// Reject an incoming connection with a status code.
    pub fn reject_connection(&mut self, endpoint_id: &str, status: i32) {
        let medium = self.current_medium(endpoint_id);
        if let Ok(bytes) = frames::for_connection_response(status) {
            self.adapter.send_frame(endpoint_id, medium, bytes);
        }
    }

    // ---- host clock ----

    /// Advance the host-driven clock: fire connect timeouts, emit
    /// keep-alive probes, and tear down silent peers.
    pub fn tick(&mut self) {
        self.tick_count += 1;
        let now = self.tick_count;

        let expired: Vec<EndpointId> = self
            .endpoints
            .iter()
            .filter(|(_, ep)| ep.connect_deadline.is_some_and(|d| now >= d))
            .map(|(id, _)| id.clone())
            .collect();
        for endpoint_id in expired {
            warn!(endpoint_id, "connect timed out");
            if let Some(cb) = self.pending_outgoing.remove(&endpoint_id) {
                cb(&endpoint_id, Err(ConnectError::Timeout));
            }
            self.release_connect_state(&endpoint_id);
        }

        let interval = self.config.keep_alive_interval_ticks;
        if interval > 0 && now % interval == 0 {
            let targets: Vec<(EndpointId, Medium)> = self
                .endpoints
                .iter()
                .filter_map(|(id, ep)| ep.connection.as_ref().map(|c| (id.clone(), c.medium)))
                .collect();
            for (endpoint_id, medium) in targets {
                if let Ok(bytes) = frames::for_keep_alive() {
                    self.adapter.send_frame(&endpoint_id, medium, bytes);
                }
            }
        }

        let timeout = self.config.keep_alive_timeout_ticks;
        let silent: Vec<EndpointId> = self
            .endpoints
            .iter()
            .filter(|(_, ep)| {
                ep.connection.is_some() && now.saturating_sub(ep.last_heard_tick) > timeout
            })
            .map(|(id, _)| id.clone())
            .collect();
        for endpoint_id in silent {
            warn!(endpoint_id, "peer silent past keep-alive timeout");
            self.disconnect(&endpoint_id);
        }
    }

    // ---- medium-layer event handlers ----

    /// Discovery reported a nearby endpoint. Duplicate founds for an
    /// already-known endpoint are suppressed.
    pub fn on_endpoint_found(&mut self, endpoint_id: &str, endpoint_info: &[u8]) {
        let now = self.tick_count;
        match self.endpoints.get_mut(endpoint_id) {
            Some(ep) if ep.discovered => {
                debug!(endpoint_id, "duplicate endpoint-found suppressed");
                return;
            }
            Some(ep) => {
                ep.discovered = true;
                ep.endpoint_info = endpoint_info.to_vec();
            }
            None => {
                self.endpoints.insert(
                    endpoint_id.to_string(),
                    Endpoint::new(endpoint_info.to_vec(), now, true),
                );
            }
        }
        info!(endpoint_id, "endpoint found");
        if let Some(listener) = &self.discovery_listener {
            listener.on_endpoint_found(endpoint_id, endpoint_info);
        }
    }

    /// Discovery lost sight of an endpoint. Unknown endpoints are a no-op.
    pub fn on_endpoint_lost(&mut self, endpoint_id: &str) {
        let (known, remove) = match self.endpoints.get_mut(endpoint_id) {
            Some(ep) if ep.discovered => {
                ep.discovered = false;
                (true, ep.state == EndpointState::Discovered)
            }
            _ => (false, false),
        };
        if remove {
            self.endpoints.remove(endpoint_id);
        }
        if known {
            info!(endpoint_id, "endpoint lost");
            if let Some(listener) = &self.discovery_listener {
                listener.on_endpoint_lost(endpoint_id);
            }
        } else {
            debug!(endpoint_id, "endpoint-lost for unknown endpoint ignored");
        }
    }

    /// A connection handshake started (either direction). Records the info
    /// and surfaces incoming requests for the accept/reject decision.
    pub fn on_connection_initiated(&mut self, endpoint_id: &str, info: ConnectionInfo) {
        let now = self.tick_count;
        let listener_info = info.clone();
        let incoming = info.is_incoming_connection;
        let ep = self
            .endpoints
            .entry(endpoint_id.to_string())
            .or_insert_with(|| Endpoint::new(info.endpoint_info.clone(), now, false));
        ep.endpoint_info = info.endpoint_info.clone();
        ep.state = EndpointState::Connecting;
        ep.connection_info = Some(info);
        debug!(endpoint_id, incoming, "connection initiated");
        if incoming {
            if let Some(listener) = &self.incoming_listener {
                listener.on_connection_initiated(endpoint_id, &listener_info);
            }
        }
    }

    /// Both sides accepted: the endpoint is now connected.
    pub fn on_connection_accepted(&mut self, endpoint_id: &str) {
        let now = self.tick_count;
        let Some(ep) = self.endpoints.get_mut(endpoint_id) else {
            warn!(endpoint_id, "accept for unknown endpoint ignored");
            return;
        };
        if ep.connection.is_some() {
            warn!(endpoint_id, "duplicate accept ignored");
            return;
        }
        ep.state = EndpointState::Connected;
        ep.connect_deadline = None;
        ep.last_heard_tick = now;
        ep.connection = Some(Connection::new(INITIAL_MEDIUM));
        ep.transfer = Some(TransferManager::new(
            INITIAL_MEDIUM,
            self.config.upgrade.clone(),
        ));
        info!(endpoint_id, "connected");
        if let Some(cb) = self.pending_outgoing.remove(endpoint_id) {
            cb(endpoint_id, Ok(()));
        }
    }

    /// The peer rejected the handshake.
    pub fn on_connection_rejected(&mut self, endpoint_id: &str, status: i32) {
        info!(endpoint_id, status, "connection rejected");
        if let Some(cb) = self.pending_outgoing.remove(endpoint_id) {
            cb(endpoint_id, Err(ConnectError::Rejected(status)));
        }
        self.release_connect_state(endpoint_id);
    }

    /// The radio-level connection dropped (peer, transport error, or our
    /// own disconnect completing). Forces the endpoint to its terminal
    /// state from wherever it was.
    pub fn on_disconnected(&mut self, endpoint_id: &str) {
        if let Some(cb) = self.pending_outgoing.remove(endpoint_id) {
            cb(endpoint_id, Err(ConnectError::Transport));
        }
        if self.endpoints.remove(endpoint_id).is_none() {
            debug!(endpoint_id, "disconnect event for unknown endpoint");
            return;
        }
        info!(endpoint_id, "disconnected");
        let failed: Vec<(i64, i64, i64)> = self
            .incoming_assemblies
            .iter()
            .filter(|(_, (eid, _))| eid == endpoint_id)
            .map(|(&id, (_, a))| (id, a.header.total_size, a.bytes_received()))
            .collect();
        for (payload_id, total, received) in failed {
            self.incoming_assemblies.remove(&payload_id);
            self.notify_payload_update(
                payload_id,
                endpoint_id,
                PayloadTransferUpdate {
                    payload_id,
                    status: PayloadStatus::Failure,
                    total_bytes: total,
                    bytes_transferred: received,
                },
            );
        }
    }

    /// The medium layer moved the connection to a different medium. Records
    /// it for metrics; when a negotiated upgrade was pending, runs the
    /// teardown handshake and flushes queued payloads on the new medium.
    pub fn on_bandwidth_changed(&mut self, endpoint_id: &str, medium: Medium) {
        let (old, negotiated) = match self.endpoints.get_mut(endpoint_id) {
            Some(ep) => {
                ep.upgraded_medium = Some(medium);
                let Some(conn) = ep.connection.as_mut() else {
                    return;
                };
                let old = conn.medium;
                conn.medium = medium;
                let negotiated = ep
                    .transfer
                    .as_ref()
                    .is_some_and(|tm| tm.upgrade_in_progress());
                if let Some(tm) = ep.transfer.as_mut() {
                    tm.complete_upgrade(medium);
                }
                ep.state = EndpointState::Connected;
                (old, negotiated)
            }
            None => {
                debug!(endpoint_id, "bandwidth change for unknown endpoint");
                return;
            }
        };
        info!(endpoint_id, ?old, new = ?medium, "bandwidth changed");
        if negotiated && old != medium {
            // Introduce ourselves on the new channel, then drain the old
            // one: LastWrite strictly before SafeToClose, and no payload
            // frame on the old medium afterwards.
            if let Ok(bytes) = frames::for_bwu_introduction(endpoint_id) {
                self.adapter.send_frame(endpoint_id, medium, bytes);
            }
            if let Ok(bytes) = frames::for_bwu_last_write() {
                self.adapter.send_frame(endpoint_id, old, bytes);
            }
            if let Ok(bytes) = frames::for_bwu_safe_to_close() {
                self.adapter.send_frame(endpoint_id, old, bytes);
            }
        }
        self.flush_queued_payloads(endpoint_id);
    }

    /// One inbound frame from the endpoint's channel. Undecodable bytes
    /// drop the frame, never the connection.
    pub fn on_frame_received(
        &mut self,
        endpoint_id: &str,
        bytes: &[u8],
    ) -> Result<(), FrameDecodeError> {
        let (frame, _consumed) = frames::parse(bytes).map_err(|err| {
            warn!(endpoint_id, %err, "dropping undecodable frame");
            err
        })?;
        let now = self.tick_count;
        if let Some(ep) = self.endpoints.get_mut(endpoint_id) {
            ep.last_heard_tick = now;
        }
        match frame.v1 {
            V1Frame::ConnectionRequest(request) => self.handle_connection_request(request),
            V1Frame::ConnectionResponse(response) => {
                if response.status == STATUS_ACCEPTED {
                    self.on_connection_accepted(endpoint_id);
                } else {
                    self.on_connection_rejected(endpoint_id, response.status);
                }
            }
            V1Frame::PayloadTransfer(transfer) => match transfer.body {
                PayloadTransferBody::Chunk(chunk) => {
                    self.handle_payload_chunk(endpoint_id, transfer.header, chunk)
                }
                PayloadTransferBody::Control(control) => {
                    self.handle_payload_control(endpoint_id, transfer.header, control)
                }
            },
            V1Frame::BandwidthUpgradeNegotiation(bwu) => {
                self.handle_bwu_event(endpoint_id, bwu.event)
            }
            V1Frame::KeepAlive => {
                debug!(endpoint_id, "keep-alive received");
            }
            V1Frame::Unknown { tag } => {
                debug!(endpoint_id, tag, "ignoring unknown frame type");
            }
        }
        Ok(())
    }

    // ---- internals ----

    fn handle_connection_request(&mut self, request: ConnectionRequestFrame) {
        let remote_id = request.endpoint_id.clone();
        let mediums: Vec<Medium> = frames::connection_request_mediums_to_mediums(&request)
            .into_iter()
            .filter(|m| *m != Medium::Unknown)
            .collect();
        debug!(endpoint_id = %remote_id, ?mediums, "incoming connection request");
        // The handshake's auth token derivation lives outside this crate;
        // the nonce stands in as the raw token material here.
        let info = ConnectionInfo {
            authentication_token: format!("{:08X}", request.nonce as u32),
            raw_authentication_token: request.nonce.to_le_bytes().to_vec(),
            endpoint_info: request.endpoint_info.clone(),
            is_incoming_connection: true,
        };
        self.on_connection_initiated(&remote_id, info);
    }

    fn handle_payload_chunk(
        &mut self,
        endpoint_id: &str,
        header: PayloadHeader,
        chunk: PayloadChunk,
    ) {
        let payload_id = header.id;
        let total = header.total_size;
        let payload_type = header.payload_type;
        let entry = self
            .incoming_assemblies
            .entry(payload_id)
            .or_insert_with(|| (endpoint_id.to_string(), IncomingAssembly::new(header)));
        match entry.1.apply_chunk(&chunk) {
            Ok(ChunkApplyResult::InProgress) => {
                let received = entry.1.bytes_received();
                self.notify_payload_update(
                    payload_id,
                    endpoint_id,
                    PayloadTransferUpdate {
                        payload_id,
                        status: PayloadStatus::InProgress,
                        total_bytes: total,
                        bytes_transferred: received,
                    },
                );
            }
            Ok(ChunkApplyResult::Complete) => {
                let Some((_, assembly)) = self.incoming_assemblies.remove(&payload_id) else {
                    return;
                };
                let payload = Payload {
                    id: payload_id,
                    payload_type,
                    data: assembly.into_bytes(),
                    file_path: self.payload_paths.get(&payload_id).cloned(),
                };
                debug!(endpoint_id, payload_id, "payload complete");
                self.incoming_payloads.insert(payload_id, payload);
                self.notify_payload_update(
                    payload_id,
                    endpoint_id,
                    PayloadTransferUpdate {
                        payload_id,
                        status: PayloadStatus::Success,
                        total_bytes: total,
                        bytes_transferred: total,
                    },
                );
            }
            Err(err) => {
                // Per-payload error: abandon this payload, keep the
                // connection.
                warn!(endpoint_id, payload_id, %err, "dropping payload");
                self.incoming_assemblies.remove(&payload_id);
                self.notify_payload_update(
                    payload_id,
                    endpoint_id,
                    PayloadTransferUpdate {
                        payload_id,
                        status: PayloadStatus::Failure,
                        total_bytes: total,
                        bytes_transferred: 0,
                    },
                );
            }
        }
    }

    fn handle_payload_control(
        &mut self,
        endpoint_id: &str,
        header: PayloadHeader,
        control: ControlMessage,
    ) {
        let payload_id = header.id;
        self.incoming_assemblies.remove(&payload_id);
        let status = match control.event {
            ControlEvent::PayloadCanceled => PayloadStatus::Canceled,
            ControlEvent::PayloadError => PayloadStatus::Failure,
        };
        debug!(endpoint_id, payload_id, ?status, "payload control received");
        self.notify_payload_update(
            payload_id,
            endpoint_id,
            PayloadTransferUpdate {
                payload_id,
                status,
                total_bytes: header.total_size,
                bytes_transferred: control.offset,
            },
        );
    }

    fn handle_bwu_event(&mut self, endpoint_id: &str, event: BwuEvent) {
        match event {
            BwuEvent::ClientIntroduction {
                endpoint_id: introduced,
            } => {
                debug!(endpoint_id, %introduced, "bwu introduction received");
                if let Some(ep) = self.endpoints.get_mut(endpoint_id) {
                    let began = ep
                        .transfer
                        .as_mut()
                        .is_some_and(|tm| tm.begin_upgrade());
                    if began {
                        ep.state = EndpointState::BandwidthUpgrading;
                    }
                }
            }
            BwuEvent::UpgradePathAvailable(info) => {
                let medium = upgrade_path_medium_to_medium(info.medium);
                if medium == Medium::Unknown {
                    warn!(endpoint_id, "upgrade path over unsupported medium");
                    let current = self.current_medium(endpoint_id);
                    if let Ok(bytes) = frames::for_bwu_failure(info) {
                        self.adapter.send_frame(endpoint_id, current, bytes);
                    }
                    return;
                }
                let began = match self.endpoints.get_mut(endpoint_id) {
                    Some(ep) => {
                        let began = ep
                            .transfer
                            .as_mut()
                            .is_some_and(|tm| tm.begin_upgrade());
                        if began {
                            ep.state = EndpointState::BandwidthUpgrading;
                        }
                        began
                    }
                    None => false,
                };
                if began {
                    debug!(endpoint_id, ?medium, "dialing upgrade path");
                    self.adapter.connect_upgrade_path(endpoint_id, &info);
                } else {
                    debug!(endpoint_id, "upgrade already pending; path ignored");
                }
            }
            BwuEvent::UpgradeFailure(_info) => {
                warn!(endpoint_id, "bandwidth upgrade failed; staying on current medium");
                if let Some(ep) = self.endpoints.get_mut(endpoint_id) {
                    if let Some(tm) = ep.transfer.as_mut() {
                        tm.abort_upgrade();
                    }
                    ep.state = EndpointState::Connected;
                }
                self.flush_queued_payloads(endpoint_id);
            }
            BwuEvent::LastWriteToPriorChannel => {
                debug!(endpoint_id, "peer finished writing to prior channel");
                let medium = self.current_medium(endpoint_id);
                if let Ok(bytes) = frames::for_bwu_safe_to_close() {
                    self.adapter.send_frame(endpoint_id, medium, bytes);
                }
            }
            BwuEvent::SafeToClosePriorChannel => {
                debug!(endpoint_id, "prior channel safe to close");
            }
        }
    }

    fn send_payload_now(&mut self, endpoint_id: &str, payload: Payload) {
        let payload_id = payload.id;
        let total = payload.data.len() as i64;
        let Some(medium) = self
            .endpoints
            .get(endpoint_id)
            .and_then(|ep| ep.connection.as_ref())
            .map(|conn| conn.medium)
        else {
            self.notify_payload_update(
                payload_id,
                endpoint_id,
                PayloadTransferUpdate {
                    payload_id,
                    status: PayloadStatus::Failure,
                    total_bytes: total,
                    bytes_transferred: 0,
                },
            );
            return;
        };

        let header = payload.header();
        let chunks = split_into_chunks(&payload.data, self.config.chunk_size);
        let mut updates = Vec::with_capacity(chunks.len());
        let mut transferred = 0i64;
        for chunk in chunks {
            transferred += chunk.body.len() as i64;
            let last = chunk.is_last();
            match frames::for_data_payload_transfer(header.clone(), chunk) {
                Ok(bytes) => self.adapter.send_frame(endpoint_id, medium, bytes),
                Err(err) => {
                    warn!(endpoint_id, payload_id, %err, "failed to encode payload chunk");
                    updates.push(PayloadTransferUpdate {
                        payload_id,
                        status: PayloadStatus::Failure,
                        total_bytes: total,
                        bytes_transferred: transferred,
                    });
                    break;
                }
            }
            updates.push(PayloadTransferUpdate {
                payload_id,
                status: if last {
                    PayloadStatus::Success
                } else {
                    PayloadStatus::InProgress
                },
                total_bytes: total,
                bytes_transferred: transferred,
            });
        }

        let trigger = self
            .endpoints
            .get_mut(endpoint_id)
            .and_then(|ep| ep.transfer.as_mut())
            .is_some_and(|tm| tm.record_sent_bytes(total.max(0) as u64));
        if trigger {
            self.request_bandwidth_upgrade(endpoint_id, medium);
        }
        for update in updates {
            self.notify_payload_update(payload_id, endpoint_id, update);
        }
    }

    fn request_bandwidth_upgrade(&mut self, endpoint_id: &str, medium: Medium) {
        info!(endpoint_id, ?medium, "requesting bandwidth upgrade");
        if let Some(ep) = self.endpoints.get_mut(endpoint_id) {
            ep.state = EndpointState::BandwidthUpgrading;
        }
        if let Ok(bytes) = frames::for_bwu_introduction(endpoint_id) {
            self.adapter.send_frame(endpoint_id, medium, bytes);
        }
        self.adapter.request_upgrade_path(endpoint_id);
    }

    fn flush_queued_payloads(&mut self, endpoint_id: &str) {
        let queued: Vec<Payload> = match self
            .endpoints
            .get_mut(endpoint_id)
            .and_then(|ep| ep.connection.as_mut())
        {
            Some(conn) => conn.queued_payloads.drain(..).collect(),
            None => return,
        };
        for payload in queued {
            self.send_payload_now(endpoint_id, payload);
        }
    }

    /// Clear connect-phase state after timeout/rejection. Discovered
    /// endpoints fall back to their discovered record; others are removed.
    fn release_connect_state(&mut self, endpoint_id: &str) {
        let remove = match self.endpoints.get_mut(endpoint_id) {
            Some(ep) => {
                ep.connect_deadline = None;
                ep.connection = None;
                ep.transfer = None;
                ep.connection_info = None;
                if ep.discovered {
                    ep.state = EndpointState::Discovered;
                    false
                } else {
                    true
                }
            }
            None => false,
        };
        if remove {
            self.endpoints.remove(endpoint_id);
        }
    }

    fn current_medium(&self, endpoint_id: &str) -> Medium {
        self.endpoints
            .get(endpoint_id)
            .and_then(|ep| ep.connection.as_ref())
            .map(|conn| conn.medium)
            .unwrap_or(INITIAL_MEDIUM)
    }

    /// Deliver a status update. A terminal status (anything but
    /// `InProgress`) also releases the payload's listener and path
    /// registrations; the maps hold entries only for payloads still moving.
    fn notify_payload_update(
        &mut self,
        payload_id: i64,
        endpoint_id: &str,
        update: PayloadTransferUpdate,
    ) {
        let terminal = update.status != PayloadStatus::InProgress;
        match self
            .payload_listeners
            .get(&payload_id)
            .and_then(|weak| weak.upgrade())
        {
            Some(listener) => listener.on_status_update(endpoint_id, &update),
            None => debug!(payload_id, "no live status listener; update dropped"),
        }
        if terminal {
            self.payload_listeners.remove(&payload_id);
            self.payload_paths.remove(&payload_id);
        }
    }
}

/// Mediums offered in an outgoing connection request, by preference.
fn supported_mediums(transport: TransportType, data_usage: DataUsage) -> Vec<Medium> {
    let mut mediums = match transport {
        TransportType::Any => vec![
            Medium::Bluetooth,
            Medium::WifiHotspot,
            Medium::Ble,
            Medium::WifiLan,
            Medium::WebRtc,
        ],
        TransportType::NonDisruptive => vec![Medium::Ble, Medium::WifiLan],
        TransportType::HighQuality => vec![
            Medium::WifiLan,
            Medium::WifiHotspot,
            Medium::WebRtc,
            Medium::Bluetooth,
        ],
    };
    // WebRTC needs an internet-backed signaling channel.
    if matches!(data_usage, DataUsage::Offline | DataUsage::WifiOnly) {
        mediums.retain(|m| *m != Medium::WebRtc);
    }
    mediums
}
