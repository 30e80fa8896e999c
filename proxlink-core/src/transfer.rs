//! Transfer manager: per-endpoint medium tracking and bandwidth-upgrade
//! trigger policy.
//!
//! The trigger policy is deliberately explicit and configurable: once the
//! byte threshold is crossed on a medium not in the fast set, exactly one
//! upgrade request is recommended; re-entry while one is pending is a no-op.

use serde::Deserialize;

use crate::medium::Medium;

/// Upgrade trigger policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Bytes sent on a slow medium before an upgrade is requested.
    pub trigger_bytes: u64,
    /// Mediums that never trigger an upgrade.
    pub fast_mediums: Vec<Medium>,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            trigger_bytes: 512 * 1024,
            fast_mediums: vec![Medium::WifiLan, Medium::WifiHotspot, Medium::WebRtc],
        }
    }
}

/// Tracks the active medium and upgrade state for one connected endpoint.
#[derive(Debug)]
pub struct TransferManager {
    config: UpgradeConfig,
    active_medium: Medium,
    bytes_since_medium_change: u64,
    upgrade_in_progress: bool,
}

impl TransferManager {
    pub fn new(initial_medium: Medium, config: UpgradeConfig) -> Self {
        Self {
            config,
            active_medium: initial_medium,
            bytes_since_medium_change: 0,
            upgrade_in_progress: false,
        }
    }

    pub fn active_medium(&self) -> Medium {
        self.active_medium
    }

    pub fn upgrade_in_progress(&self) -> bool {
        self.upgrade_in_progress
    }

    /// Record outbound traffic. Returns true when this crosses the trigger
    /// threshold and an upgrade request should go out; at most one true per
    /// negotiation (guarded by the in-progress flag).
    pub fn record_sent_bytes(&mut self, bytes: u64) -> bool {
        self.bytes_since_medium_change = self.bytes_since_medium_change.saturating_add(bytes);
        if self.upgrade_in_progress {
            return false;
        }
        if self.config.fast_mediums.contains(&self.active_medium) {
            return false;
        }
        if self.bytes_since_medium_change >= self.config.trigger_bytes {
            self.upgrade_in_progress = true;
            return true;
        }
        false
    }

    /// Mark an externally initiated negotiation (e.g. the peer sent an
    /// upgrade path). No-op if one is already pending.
    pub fn begin_upgrade(&mut self) -> bool {
        if self.upgrade_in_progress {
            return false;
        }
        self.upgrade_in_progress = true;
        true
    }

    /// The negotiation failed; stay on the current medium and allow a later
    /// retry once more traffic accrues.
    pub fn abort_upgrade(&mut self) {
        self.upgrade_in_progress = false;
        self.bytes_since_medium_change = 0;
    }

    /// Swap to the new medium after the teardown handshake. Clears the
    /// in-progress flag and resets the traffic counter.
    pub fn complete_upgrade(&mut self, new_medium: Medium) {
        self.active_medium = new_medium;
        self.bytes_since_medium_change = 0;
        self.upgrade_in_progress = false;
    }
}
