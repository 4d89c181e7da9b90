// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type for the PubSub subscribe-side control plane.

/// Boundary error kind returned by every PubSub management operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubSubError {
    /// A required argument was null, empty or otherwise malformed.
    InvalidArgument(String),
    /// The referenced Connection/ReaderGroup/DataSetReader id is unknown.
    NotFound,
    /// Allocation failed during entity creation; state was rolled back.
    OutOfMemory,
    /// The requested feature or combination of settings is not supported
    /// (e.g. blocking sockets without a custom scheduler, RT with more
    /// than one DataSetReader).
    NotSupported(String),
    /// The operation is illegal because the parent is frozen.
    ConfigurationError(String),
    /// An internal contract was violated (unreachable state, codec
    /// contract violation, security misconfiguration).
    InternalError(String),
    /// A cascaded state change whose cause is resource unavailability.
    ResourceUnavailable,
    /// The parent Connection no longer exists.
    ConnectionClosed,
    /// The cause stamped on transitions driven by teardown.
    Shutdown,
}

impl std::fmt::Display for PubSubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PubSubError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            PubSubError::NotFound => write!(f, "entity not found"),
            PubSubError::OutOfMemory => write!(f, "out of memory"),
            PubSubError::NotSupported(msg) => write!(f, "not supported: {msg}"),
            PubSubError::ConfigurationError(msg) => write!(f, "configuration error: {msg}"),
            PubSubError::InternalError(msg) => write!(f, "internal error: {msg}"),
            PubSubError::ResourceUnavailable => write!(f, "resource unavailable"),
            PubSubError::ConnectionClosed => write!(f, "connection closed"),
            PubSubError::Shutdown => write!(f, "shutdown"),
        }
    }
}

impl std::error::Error for PubSubError {}

/// Convenience alias for PubSub management results.
pub type PubSubResult<T> = std::result::Result<T, PubSubError>;

/// The secondary status stamped alongside a state transition to explain
/// it to the user's state-change callback (spec §6, "Cause status").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CauseStatus {
    /// Transition succeeded / is the steady-state outcome.
    Good,
    /// Cascaded because a resource (parent, channel) became unavailable.
    BadResourceUnavailable,
    /// Cascaded because the parent connection was closed.
    BadConnectionClosed,
    /// Driven by an explicit teardown (remove/delete) path.
    Shutdown,
    /// Driven by a transport-connect failure; carries no further detail
    /// beyond the fact that connect failed.
    BadConnectionFailed,
}
