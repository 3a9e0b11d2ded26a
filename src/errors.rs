//! Error taxonomy for the tracking engine
//!
//! Per-tick numerical failures are values, not panics: the orchestrator
//! treats `PropagateTransient` as "drop this row for this tick" and keeps
//! going. Only `ConfigInvalid` at startup is fatal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackError {
    /// Malformed two-line element set. The offending object is skipped at
    /// load time; the rest of the group continues.
    #[error("element set rejected for {name}: {reason}")]
    ElementParse { name: String, reason: String },

    /// Numerical failure at a single instant. Not an error condition for
    /// the tick loop; the object simply produces no row this tick.
    #[error("propagation failed transiently")]
    PropagateTransient,

    /// Element-set or transmitter-database download failure. Callers fall
    /// back to the disk cache and continue with fewer groups if need be.
    #[error("network fetch failed: {0}")]
    NetworkFetch(String),

    /// An effector command failed. The link is marked disconnected and a
    /// reconnect is attempted on the next tick.
    #[error("effector link lost: {0}")]
    AdapterDisconnect(#[from] std::io::Error),

    /// Rejected configuration. Fatal at startup; on hot reload the old
    /// configuration is kept instead.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

pub type Result<T> = std::result::Result<T, TrackError>;
