//! Ambient tuning knobs for a [`crate::database::Database`]: cache sizing
//! and the commit retry window, kept as one plain struct the way durability
//! sweep/test configuration is modeled elsewhere in this workspace.

use std::time::Duration;

/// Process-wide tuning for every store a [`crate::database::Database`] opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendConfig {
    /// Per-transaction `readNodesCache` capacity (spec §4.C).
    pub read_node_cache_capacity: usize,
    /// Lower bound on the process-wide L1 node cache (spec §9).
    pub l1_min_capacity: usize,
    /// Upper bound on the process-wide L1 node cache (spec §9).
    pub l1_max_capacity: usize,
    /// How long the two-phase commit orchestrator's retry loop (spec §4.E)
    /// keeps retrying a conflicting attempt before giving up with a timeout.
    pub commit_max_time: Duration,
    /// Whether the transaction logger actually appends stage entries, or
    /// runs as a no-op pass-through. Off only makes sense in tests that
    /// don't exercise crash recovery.
    pub logging_enabled: bool,
}

impl BackendConfig {
    /// Small caches, a short commit window, logging on — the shape that
    /// keeps unit tests fast without changing what they exercise.
    pub fn for_testing() -> Self {
        BackendConfig {
            read_node_cache_capacity: 64,
            l1_min_capacity: 8,
            l1_max_capacity: 64,
            commit_max_time: Duration::from_millis(200),
            logging_enabled: true,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            read_node_cache_capacity: 1_024,
            l1_min_capacity: 256,
            l1_max_capacity: 16_384,
            commit_max_time: Duration::from_secs(30),
            logging_enabled: true,
        }
    }
}
