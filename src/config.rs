//! Configuration types.

use std::time::Duration;

/// Funnel configuration.
#[derive(Debug, Clone)]
pub struct FunnelConfig {
    /// Budget for a single external identity verification round trip.
    pub verification_timeout: Duration,
    /// Sessions untouched for longer than this are reset on route entry.
    pub session_ttl: Duration,
    /// Key prefix for persisted session snapshots.
    pub key_prefix: String,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            verification_timeout: Duration::from_secs(15),
            session_ttl: Duration::from_secs(24 * 3600), // 24 hours
            key_prefix: "funnel_state".to_string(),
        }
    }
}
