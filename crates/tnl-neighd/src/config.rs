//! Daemon configuration
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-6: Configuration Settings - Validated runtime parameters

use crate::cache::{CacheOptions, DEFAULT_BUCKETS, DEFAULT_IDLE_TIME_SECS, MAX_BUCKETS};
use crate::error::{Result, TnlNeighError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default control socket location
pub const DEFAULT_CONTROL_SOCKET: &str = "/var/run/tnl-neighd.sock";

/// Default aging period (milliseconds)
pub const DEFAULT_AGING_INTERVAL_MS: u64 = 1000;

/// Runtime configuration for tnl-neighd
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TnlNeighConfig {
    /// Idle lifetime of a binding (seconds)
    pub idle_time_secs: u64,
    /// Hash bucket count
    pub buckets: usize,
    /// Aging sweep period (milliseconds)
    pub aging_interval_ms: u64,
    /// Unix socket for administrative commands
    pub control_socket: PathBuf,
}

impl Default for TnlNeighConfig {
    fn default() -> Self {
        Self {
            idle_time_secs: DEFAULT_IDLE_TIME_SECS,
            buckets: DEFAULT_BUCKETS,
            aging_interval_ms: DEFAULT_AGING_INTERVAL_MS,
            control_socket: PathBuf::from(DEFAULT_CONTROL_SOCKET),
        }
    }
}

impl TnlNeighConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| TnlNeighError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// NIST: CM-6 - Reject settings the cache cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.idle_time_secs == 0 {
            return Err(TnlNeighError::Config(
                "idle_time_secs must be greater than zero".to_string(),
            ));
        }
        if self.buckets == 0 {
            return Err(TnlNeighError::Config(
                "buckets must be greater than zero".to_string(),
            ));
        }
        if self.buckets > MAX_BUCKETS {
            return Err(TnlNeighError::Config(format!(
                "buckets must be at most {}",
                MAX_BUCKETS
            )));
        }
        if self.aging_interval_ms == 0 {
            return Err(TnlNeighError::Config(
                "aging_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            idle_time: Duration::from_secs(self.idle_time_secs),
            buckets: self.buckets,
        }
    }

    pub fn aging_interval(&self) -> Duration {
        Duration::from_millis(self.aging_interval_ms)
    }
}
