//! Error types for tnl-neighd
//!
//! A lookup miss is not an error; it is reported as `None`.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-11: Error Handling - Structured error types with contextual information
//! - AU-3: Content of Audit Records - Errors include sufficient detail for audit

use thiserror::Error;

/// Errors that can occur in tnl-neighd
#[derive(Debug, Error)]
pub enum TnlNeighError {
    /// Snooped traffic is not the resolution message the learner expects
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Administrative address literal did not parse and did not resolve
    #[error("bad IP address")]
    BadIpAddress(String),

    /// Administrative MAC literal did not parse
    #[error("bad MAC address")]
    BadMacAddress(String),

    /// Control command not recognized
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Control command given the wrong number of arguments
    #[error("usage: {command} {usage}")]
    Usage {
        command: &'static str,
        usage: &'static str,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Control reply encoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TnlNeighError {
    /// True for the administrative literal failures (`bad IP address`,
    /// `bad MAC address`).
    pub fn is_malformed_address(&self) -> bool {
        matches!(self, Self::BadIpAddress(_) | Self::BadMacAddress(_))
    }
}

/// Result type alias for tnl-neighd operations
pub type Result<T> = std::result::Result<T, TnlNeighError>;
