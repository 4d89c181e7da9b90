// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Configuration structs for Connections, ReaderGroups and DataSetReaders.
//!
//! These are plain values supplied by the caller at runtime; none of it
//! is persisted (spec §6, "Persisted state: None").

use std::collections::HashMap;

/// A typed PublisherId value, matching the OPC UA variant encoding
/// (spec §3, §4.4 "type-aware compare").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PublisherId {
    Byte(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    String(String),
}

impl PublisherId {
    /// True for the fixed-size numeric variants required by
    /// `FIXED_SIZE` real-time mode (spec §4.3 "Freezing" step 3).
    pub fn is_pointer_free(&self) -> bool {
        !matches!(self, PublisherId::String(_))
    }

    /// Wire-size in bytes for the UADP encoding, or `None` for the
    /// variable-length `String` variant.
    pub fn fixed_wire_size(&self) -> Option<usize> {
        match self {
            PublisherId::Byte(_) => Some(1),
            PublisherId::UInt16(_) => Some(2),
            PublisherId::UInt32(_) => Some(4),
            PublisherId::UInt64(_) => Some(8),
            PublisherId::String(_) => None,
        }
    }
}

/// Real-time level, trading flexibility for a zero-copy decode path
/// (spec §4.3 "Freezing (real-time preparation)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealTimeLevel {
    None,
    FixedSize,
}

/// Wire encoding for a ReaderGroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageEncoding {
    Uadp,
    Json,
}

/// Message-layer security mode (spec §3, `ReaderGroup.config`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSecurityMode {
    None,
    Sign,
    SignAndEncrypt,
}

/// DataSet field types eligible for target-variable binding.
///
/// `FIXED_SIZE` RT mode restricts this further (spec §4.3 step 4): only
/// numeric/boolean types, or bounded-length strings/byte-strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Boolean,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    /// `max_len == None` means unbounded (disallowed in `FIXED_SIZE`).
    String { max_len: Option<usize> },
    /// `max_len == None` means unbounded (disallowed in `FIXED_SIZE`).
    ByteString { max_len: Option<usize> },
}

impl FieldType {
    /// Fixed encoded size in bytes, or `None` if variable-length.
    pub fn fixed_wire_size(&self) -> Option<usize> {
        match self {
            FieldType::Boolean => Some(1),
            FieldType::Int32 | FieldType::UInt32 | FieldType::Float => Some(4),
            FieldType::Int64 | FieldType::UInt64 | FieldType::Double => Some(8),
            FieldType::String { max_len: Some(n) } | FieldType::ByteString { max_len: Some(n) } => {
                Some(*n)
            }
            FieldType::String { max_len: None } | FieldType::ByteString { max_len: None } => None,
        }
    }

    /// Numeric or boolean (allowed unconditionally in `FIXED_SIZE` mode).
    pub fn is_numeric_or_bool(&self) -> bool {
        matches!(
            self,
            FieldType::Boolean
                | FieldType::Int32
                | FieldType::UInt32
                | FieldType::Int64
                | FieldType::UInt64
                | FieldType::Float
                | FieldType::Double
        )
    }

    /// A bounded-length string/byte-string (allowed in `FIXED_SIZE` mode).
    pub fn is_bounded_string_like(&self) -> bool {
        matches!(
            self,
            FieldType::String { max_len: Some(_) } | FieldType::ByteString { max_len: Some(_) }
        )
    }
}

/// One field of a DataSetReader's expected DataSet metadata, bound to a
/// target variable backend.
#[derive(Debug, Clone)]
pub struct DataSetFieldConfig {
    pub name: String,
    pub field_type: FieldType,
    /// Index (0-based) into the target-variable bindings this field
    /// writes through. `None` means no backend resolved yet.
    pub target_variable: Option<usize>,
}

/// A value sink a decoded field is written into. Modeled as a trait so
/// the information-model surface (out of scope) can be substituted by
/// callers; a simple `Vec<u8>`-backed cell is provided for tests.
pub trait TargetVariable: Send + Sync {
    /// Write a numeric/boolean scalar. Returns `false` if the backend
    /// rejects the write (size/type mismatch).
    fn write_scalar(&self, bytes: &[u8]) -> bool;
}

/// The simplest possible [`TargetVariable`]: an in-memory byte cell.
#[derive(Debug, Default)]
pub struct MemoryVariable {
    cell: parking_lot::Mutex<Vec<u8>>,
}

impl MemoryVariable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.cell.lock().clone()
    }
}

impl TargetVariable for MemoryVariable {
    fn write_scalar(&self, bytes: &[u8]) -> bool {
        *self.cell.lock() = bytes.to_vec();
        true
    }
}

/// Configuration for a [`crate::pubsub::reader::DataSetReader`]
/// (spec §3, `DataSetReader.config`).
#[derive(Clone)]
pub struct DataSetReaderConfig {
    pub name: String,
    pub publisher_id: PublisherId,
    pub writer_group_id: u16,
    pub data_set_writer_id: u16,
    pub fields: Vec<DataSetFieldConfig>,
    pub target_variables: Vec<std::sync::Arc<dyn TargetVariable>>,
    /// Require the NetworkMessage's encoding to match the group's
    /// configured encoding (spec §4.4 "The group may also require an
    /// `encoding` match").
    pub require_encoding_match: bool,
}

impl std::fmt::Debug for DataSetReaderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSetReaderConfig")
            .field("name", &self.name)
            .field("publisher_id", &self.publisher_id)
            .field("writer_group_id", &self.writer_group_id)
            .field("data_set_writer_id", &self.data_set_writer_id)
            .field("fields", &self.fields)
            .field("target_variables", &self.target_variables.len())
            .field("require_encoding_match", &self.require_encoding_match)
            .finish()
    }
}

impl DataSetReaderConfig {
    /// A minimal config naming the three match fields and no data set
    /// fields, for tests that only exercise lifecycle/matching.
    pub fn new(name: impl Into<String>, publisher_id: PublisherId, writer_group_id: u16, data_set_writer_id: u16) -> Self {
        Self {
            name: name.into(),
            publisher_id,
            writer_group_id,
            data_set_writer_id,
            fields: Vec::new(),
            target_variables: Vec::new(),
            require_encoding_match: false,
        }
    }
}

/// Configuration for a [`crate::pubsub::reader_group::ReaderGroup`]
/// (spec §3, `ReaderGroup.config`).
#[derive(Debug, Clone)]
pub struct ReaderGroupConfig {
    pub name: String,
    /// Subscribing interval in milliseconds. Default 5 (spec §3).
    pub subscribing_interval_ms: u32,
    /// Socket timeout in milliseconds. Default 1000; forced to 0 when
    /// `blocking_socket` is set (spec §3).
    pub socket_timeout_ms: u32,
    /// Rejected at creation unless `custom_scheduler` is also set
    /// (spec §4.3 "Creation": blocking sockets would stall the shared
    /// event loop unless the caller runs them off-loop).
    pub blocking_socket: bool,
    /// True when the caller supplies an off-loop scheduler for this
    /// group's socket operations, the one condition under which
    /// `blocking_socket` is accepted.
    pub custom_scheduler: bool,
    pub real_time_level: RealTimeLevel,
    pub encoding: MessageEncoding,
    pub security_mode: MessageSecurityMode,
    pub security_group_id: Option<String>,
    /// Broker transport settings, e.g. MQTT `queueName` (spec §6).
    pub broker_queue_name: Option<String>,
}

impl Default for ReaderGroupConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            subscribing_interval_ms: 5,
            socket_timeout_ms: 1000,
            blocking_socket: false,
            custom_scheduler: false,
            real_time_level: RealTimeLevel::None,
            encoding: MessageEncoding::Uadp,
            security_mode: MessageSecurityMode::None,
            security_group_id: None,
            broker_queue_name: None,
        }
    }
}

impl ReaderGroupConfig {
    /// Apply the documented defaults atop caller-specified overrides:
    /// forces `socket_timeout_ms` to 0 when `blocking_socket` is set
    /// (spec §3).
    pub fn normalized(mut self) -> Self {
        if self.blocking_socket {
            self.socket_timeout_ms = 0;
        }
        self
    }
}

/// Transport profile URI for a Connection (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProfile {
    UdpUadp,
    EthernetUadp,
    MqttUadp,
    MqttJson,
}

impl TransportProfile {
    pub fn requires_topic_binding(self) -> bool {
        matches!(self, TransportProfile::MqttUadp | TransportProfile::MqttJson)
    }
}

/// Configuration for a [`crate::pubsub::connection::PubSubConnection`]
/// (spec §3, `Connection.config`).
#[derive(Debug, Clone)]
pub struct PubSubConnectionConfig {
    pub name: String,
    pub publisher_id: PublisherId,
    pub transport_profile: TransportProfile,
    pub address: String,
    pub properties: HashMap<String, String>,
}

impl PubSubConnectionConfig {
    pub fn new(name: impl Into<String>, publisher_id: PublisherId, transport_profile: TransportProfile, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            publisher_id,
            transport_profile,
            address: address.into(),
            properties: HashMap::new(),
        }
    }
}
