// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared across the bus client, device engines, and the
//! orchestrator. See spec §7 "ERROR HANDLING DESIGN".

use std::fmt;

/// A single error kind from the taxonomy in §7.
#[derive(Debug, thiserror::Error)]
pub enum OwError {
    /// Cannot reach owserver. Retried at scan boundaries; never fatal while
    /// running.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed response or unexpected path shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O to a specific device failed; device-local, rest of scan proceeds.
    #[error("bus operation failed for {device}: {message}")]
    BusOperation { device: String, message: String },

    /// Invalid mode string, conflicting polarities, unknown action module,
    /// non-existent target — detected eagerly at config time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A cross-cutting invariant was violated (e.g. duplicate simultaneous
    /// temperature batch).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl OwError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn bus_operation(device: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::BusOperation {
            device: device.into(),
            message: msg.into(),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// The taxonomy category, used for statistics / log correlation.
    pub fn kind(&self) -> OwErrorKind {
        match self {
            Self::Connection(_) => OwErrorKind::Connection,
            Self::Protocol(_) => OwErrorKind::Protocol,
            Self::BusOperation { .. } => OwErrorKind::BusOperation,
            Self::Configuration(_) => OwErrorKind::Configuration,
            Self::InvariantViolation(_) => OwErrorKind::InvariantViolation,
        }
    }

    /// True for error kinds the orchestrator's scan loop should swallow and
    /// continue from (vs. treat as a per-device/per-handler skip).
    pub fn is_scan_recoverable(&self) -> bool {
        matches!(self.kind(), OwErrorKind::Connection | OwErrorKind::Protocol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwErrorKind {
    Connection,
    Protocol,
    BusOperation,
    Configuration,
    InvariantViolation,
}

impl fmt::Display for OwErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connection => "connection",
            Self::Protocol => "protocol",
            Self::BusOperation => "bus_operation",
            Self::Configuration => "configuration",
            Self::InvariantViolation => "invariant_violation",
        };
        f.write_str(s)
    }
}

pub type OwResult<T> = Result<T, OwError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_is_scan_recoverable() {
        assert!(OwError::connection("refused").is_scan_recoverable());
    }

    #[test]
    fn configuration_is_not_scan_recoverable() {
        assert!(!OwError::configuration("bad mode").is_scan_recoverable());
    }
}
