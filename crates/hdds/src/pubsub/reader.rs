// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DataSetReader: matches inbound NetworkMessages on
//! (PublisherId, WriterGroupId, DataSetWriterId) and writes decoded
//! DataSet fields into target variables (spec §4.4).

use crate::pubsub::codec::NetworkMessageHeader;
use crate::pubsub::config::DataSetReaderConfig;
use crate::pubsub::error::{CauseStatus, PubSubError, PubSubResult};
use crate::pubsub::ids::PubSubId;
use crate::pubsub::state::{PubSubState, StateChangeCallback};
use parking_lot::RwLock;

/// An offset/length pair into a DataSetMessage payload buffer, used by
/// the RT fast path (spec §3, `DataSetReader.OffsetBuffer`).
pub type FieldOffset = (usize, usize);

/// A subscription to one (Publisher, WriterGroup, DataSetWriter) tuple
/// with a mapping to target variables (spec GLOSSARY).
pub struct DataSetReader {
    id: PubSubId,
    parent_group: PubSubId,
    config: DataSetReaderConfig,
    state: RwLock<PubSubState>,
    last_cause: RwLock<CauseStatus>,
    frozen: std::sync::atomic::AtomicBool,
    offset_buffer: RwLock<Option<Vec<FieldOffset>>>,
}

impl DataSetReader {
    pub fn new(id: PubSubId, parent_group: PubSubId, config: DataSetReaderConfig) -> Self {
        Self {
            id,
            parent_group,
            config,
            state: RwLock::new(PubSubState::Disabled),
            last_cause: RwLock::new(CauseStatus::Good),
            frozen: std::sync::atomic::AtomicBool::new(false),
            offset_buffer: RwLock::new(None),
        }
    }

    pub fn id(&self) -> PubSubId {
        self.id
    }

    pub fn parent_group(&self) -> PubSubId {
        self.parent_group
    }

    pub fn config(&self) -> &DataSetReaderConfig {
        &self.config
    }

    pub fn state(&self) -> PubSubState {
        *self.state.read()
    }

    /// Set state directly, e.g. for cascades driven by the parent group
    /// (spec §3 invariant 3). Notifies `callback`, if supplied, with
    /// this entity's id (spec §6 "Management API", §7 "User visibility").
    pub fn set_state(&self, state: PubSubState, cause: CauseStatus, callback: Option<&StateChangeCallback>) {
        *self.state.write() = state;
        *self.last_cause.write() = cause;
        if let Some(callback) = callback {
            callback(self.id, state, cause);
        }
    }

    pub fn last_cause(&self) -> CauseStatus {
        *self.last_cause.write()
    }

    /// Identifier check (spec §4.4 "Identifier check"): type-aware
    /// PublisherId compare plus WriterGroupId/DataSetWriterId equality,
    /// and an optional encoding match. Mismatch is silent (not an error).
    pub fn matches(&self, header: &NetworkMessageHeader) -> bool {
        if self.config.require_encoding_match {
            // Only UADP is modeled by this crate's codec; a JSON match
            // request against a UADP frame is therefore always false.
            if header.json_encoding {
                return false;
            }
        }
        header.publisher_id == self.config.publisher_id
            && header.writer_group_id == self.config.writer_group_id
            && header.data_set_writer_id == self.config.data_set_writer_id
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Mark frozen and clear the offset buffer (spec §4.3 "Freezing"
    /// step 5: "Clear the reader's offset buffer; it is (re)built
    /// lazily from the first received frame").
    pub fn freeze(&self) {
        self.frozen.store(true, std::sync::atomic::Ordering::Release);
        *self.offset_buffer.write() = None;
    }

    pub fn unfreeze(&self) {
        self.frozen.store(false, std::sync::atomic::Ordering::Release);
        *self.offset_buffer.write() = None;
    }

    /// Decode `payload` into the reader's target variables. Uses the
    /// precomputed offset table when frozen and already built
    /// (fast path); otherwise walks fields in order, building (and, if
    /// frozen, caching) the offset table as it goes (slow path).
    ///
    /// Returns `Ok(true)` if this is the frame that should promote the
    /// reader (and its group) to `OPERATIONAL` — i.e. dispatch
    /// succeeded. A fatal decode error drives the reader itself to
    /// `ERROR` (spec §4.4 "State machine") and is returned as `Err`.
    pub fn dispatch(&self, payload: &[u8], callback: Option<&StateChangeCallback>) -> PubSubResult<bool> {
        if self.is_frozen() {
            if let Some(offsets) = self.offset_buffer.read().as_ref() {
                return self.dispatch_fast_path(payload, offsets, callback);
            }
        }
        let (offsets, slices) = self.decode_slow_path(payload).map_err(|err| {
            self.set_state(PubSubState::Error, CauseStatus::BadConnectionFailed, callback);
            err
        })?;
        for (slot, bytes) in self.config.fields.iter().zip(slices.iter()) {
            if let Some(idx) = slot.target_variable {
                if let Some(var) = self.config.target_variables.get(idx) {
                    if !var.write_scalar(bytes) {
                        let err = PubSubError::InternalError(format!(
                            "target variable {idx} rejected write for field '{}'",
                            slot.name
                        ));
                        self.set_state(PubSubState::Error, CauseStatus::BadConnectionFailed, callback);
                        return Err(err);
                    }
                }
            }
        }
        if self.is_frozen() {
            *self.offset_buffer.write() = Some(offsets);
        }
        Ok(true)
    }

    fn dispatch_fast_path(
        &self,
        payload: &[u8],
        offsets: &[FieldOffset],
        callback: Option<&StateChangeCallback>,
    ) -> PubSubResult<bool> {
        for ((offset, len), slot) in offsets.iter().zip(self.config.fields.iter()) {
            if payload.len() < offset + len {
                let err = PubSubError::InternalError("payload shorter than offset table".into());
                self.set_state(PubSubState::Error, CauseStatus::BadConnectionFailed, callback);
                return Err(err);
            }
            if let Some(idx) = slot.target_variable {
                if let Some(var) = self.config.target_variables.get(idx) {
                    var.write_scalar(&payload[*offset..*offset + *len]);
                }
            }
        }
        Ok(true)
    }

    fn decode_slow_path(&self, payload: &[u8]) -> PubSubResult<(Vec<FieldOffset>, Vec<Vec<u8>>)> {
        let mut offsets = Vec::with_capacity(self.config.fields.len());
        let mut slices = Vec::with_capacity(self.config.fields.len());
        let mut pos = 0usize;
        for field in &self.config.fields {
            match field.field_type.fixed_wire_size() {
                Some(len) => {
                    if payload.len() < pos + len {
                        return Err(PubSubError::InternalError(format!(
                            "truncated payload decoding field '{}'",
                            field.name
                        )));
                    }
                    offsets.push((pos, len));
                    slices.push(payload[pos..pos + len].to_vec());
                    pos += len;
                }
                None => {
                    if payload.len() < pos + 2 {
                        return Err(PubSubError::InternalError(format!(
                            "truncated length prefix for field '{}'",
                            field.name
                        )));
                    }
                    let len = u16::from_be_bytes(payload[pos..pos + 2].try_into().unwrap()) as usize;
                    pos += 2;
                    if payload.len() < pos + len {
                        return Err(PubSubError::InternalError(format!(
                            "truncated variable-length field '{}'",
                            field.name
                        )));
                    }
                    offsets.push((pos, len));
                    slices.push(payload[pos..pos + len].to_vec());
                    pos += len;
                }
            }
        }
        Ok((offsets, slices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::config::{DataSetFieldConfig, FieldType, MemoryVariable, PublisherId};
    use std::sync::Arc;

    fn header(publisher: PublisherId, wgid: u16, dswid: u16) -> NetworkMessageHeader {
        NetworkMessageHeader {
            json_encoding: false,
            publisher_id: publisher,
            writer_group_id: wgid,
            data_set_writer_id: dswid,
            security_nonce: None,
        }
    }

    fn reader_with_one_int32_field() -> (DataSetReader, Arc<MemoryVariable>) {
        let var = Arc::new(MemoryVariable::new());
        let mut cfg = DataSetReaderConfig::new("r1", PublisherId::UInt16(7), 1, 42);
        cfg.fields.push(DataSetFieldConfig {
            name: "value".into(),
            field_type: FieldType::Int32,
            target_variable: Some(0),
        });
        cfg.target_variables.push(var.clone() as Arc<dyn crate::pubsub::config::TargetVariable>);
        (DataSetReader::new(PubSubId::from_raw(1), PubSubId::from_raw(0), cfg), var)
    }

    #[test]
    fn matches_requires_all_three_identifiers() {
        let (reader, _) = reader_with_one_int32_field();
        assert!(reader.matches(&header(PublisherId::UInt16(7), 1, 42)));
        assert!(!reader.matches(&header(PublisherId::UInt16(7), 2, 42)));
        assert!(!reader.matches(&header(PublisherId::UInt16(8), 1, 42)));
        assert!(!reader.matches(&header(PublisherId::UInt16(7), 1, 43)));
    }

    #[test]
    fn dispatch_writes_target_variable_slow_path() {
        let (reader, var) = reader_with_one_int32_field();
        let payload = 99i32.to_be_bytes();
        let promoted = reader.dispatch(&payload, None).unwrap();
        assert!(promoted);
        assert_eq!(var.snapshot(), 99i32.to_be_bytes());
    }

    #[test]
    fn dispatch_fast_path_uses_cached_offsets_after_freeze() {
        let (reader, var) = reader_with_one_int32_field();
        reader.freeze();
        let payload = 5i32.to_be_bytes();
        reader.dispatch(&payload, None).unwrap();
        assert_eq!(var.snapshot(), 5i32.to_be_bytes());
        assert!(reader.offset_buffer.read().is_some());

        let payload2 = 6i32.to_be_bytes();
        reader.dispatch(&payload2, None).unwrap();
        assert_eq!(var.snapshot(), 6i32.to_be_bytes());
    }

    #[test]
    fn unfreeze_clears_offset_buffer() {
        let (reader, _) = reader_with_one_int32_field();
        reader.freeze();
        reader.dispatch(&5i32.to_be_bytes(), None).unwrap();
        assert!(reader.offset_buffer.read().is_some());
        reader.unfreeze();
        assert!(reader.offset_buffer.read().is_none());
        assert!(!reader.is_frozen());
    }

    #[test]
    fn truncated_payload_drives_reader_to_error() {
        let (reader, _) = reader_with_one_int32_field();
        let result = reader.dispatch(&[0u8; 2], None);
        assert!(matches!(result, Err(PubSubError::InternalError(_))));
    }
}
