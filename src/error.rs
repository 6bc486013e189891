//! Error taxonomy for the bootstrap and stack binaries
//!
//! Every fatal path surfaces exactly one of these variants as a single
//! human-readable diagnostic line and exits non-zero. Lower layers never
//! retry; bounded retries live only in the health poller.

use crate::health::HealthOutcome;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowgateError {
    /// Missing or malformed configuration parameter. Raised before any
    /// artifact is written.
    #[error("configuration error: {0}")]
    Config(String),

    /// Missing template file or unresolved placeholder. Never leaves a
    /// partially rendered artifact behind.
    #[error("template error: {0}")]
    Template(String),

    /// The proxy binary rejected the rendered configuration. Carries the
    /// validator's diagnostic output verbatim.
    #[error("config validation failed:\n{diagnostics}")]
    Validation { diagnostics: String },

    /// A monitored service failed to become healthy.
    #[error("service '{service}' failed health check: {outcome}")]
    Health {
        service: String,
        outcome: HealthOutcome,
    },

    /// Container or network operation failed in a non-recoverable way.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),
}

impl FlowgateError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Self::Lifecycle(msg.into())
    }
}
