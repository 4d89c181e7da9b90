// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # hdds-pubsub — OPC UA PubSub subscribe-side control plane
//!
//! The subsystem that binds receive channels to a Connection, dispatches
//! inbound Network Messages to the correct DataSetReader, verifies and
//! decrypts them, and drives the three-level `Connection` ->
//! `ReaderGroup` -> `DataSetReader` lifecycle state machine.
//!
//! ## Quick start
//!
//! ```rust
//! use hdds::pubsub::config::{PubSubConnectionConfig, PublisherId, ReaderGroupConfig, TransportProfile};
//! use hdds::pubsub::manager::PubSubManager;
//! use hdds::pubsub::reader_group::ReaderGroup;
//! use hdds::pubsub::transport::InlineEventLoop;
//! use std::sync::Arc;
//!
//! let manager = PubSubManager::new();
//! let event_loop = InlineEventLoop::new();
//!
//! let connection = manager.add_connection(PubSubConnectionConfig::new(
//!     "c1",
//!     PublisherId::UInt16(7),
//!     TransportProfile::UdpUadp,
//!     "239.0.0.1:4840",
//! ));
//! connection.connect(&event_loop).unwrap();
//!
//! let group = Arc::new(ReaderGroup::new(
//!     manager.mint_id(),
//!     connection.id(),
//!     ReaderGroupConfig::default(),
//! ));
//! connection.add_reader_group(group).unwrap();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------------------+
//! |                         PubSubManager                           |
//! |         (process-wide Connection registry, id minting)          |
//! +-----------------------------------------------------------------+
//! |  PubSubConnection  ->  ReaderGroup  ->  DataSetReader            |
//! |  (transport binding)  (cadence/security)  (identifier match,     |
//! |                                            target variables)     |
//! +-----------------------------------------------------------------+
//! |                      receive pipeline (`pubsub::pipeline`)       |
//! |   decode headers -> select group -> verify/decrypt -> decode     |
//! |   payload -> dispatch to matching readers                        |
//! +-----------------------------------------------------------------+
//! ```
//!
//! ## Out of scope
//!
//! The transport event loop, the bit-exact OPC UA Part 14 Network
//! Message codec, the Information Model node surface, the Security
//! Policy crypto provider and the publish side (WriterGroups /
//! DataSetWriters) are external collaborators. This crate models each
//! as a narrow trait or a deliberately minimal implementation — see
//! [`pubsub::transport`], [`pubsub::codec`] and [`pubsub::security`].

/// The PubSub subscribe-side control plane: Manager, Connection,
/// ReaderGroup, DataSetReader, the receive pipeline, and their
/// supporting config/error/codec/security/transport modules.
pub mod pubsub;

pub use pubsub::connection::PubSubConnection;
pub use pubsub::error::{CauseStatus, PubSubError, PubSubResult};
pub use pubsub::manager::PubSubManager;
pub use pubsub::reader::DataSetReader;
pub use pubsub::reader_group::ReaderGroup;
pub use pubsub::state::PubSubState;

/// Crate version string.
pub const VERSION: &str = "1.0.10";
