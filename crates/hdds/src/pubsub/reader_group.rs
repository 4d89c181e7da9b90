// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ReaderGroup: groups DataSetReaders sharing a subscription cadence
//! and, optionally, a security context (spec §4.3).

use crate::pubsub::codec::NetworkMessageHeader;
use crate::pubsub::config::{MessageEncoding, MessageSecurityMode, ReaderGroupConfig};
use crate::pubsub::error::{CauseStatus, PubSubError, PubSubResult};
use crate::pubsub::ids::PubSubId;
use crate::pubsub::reader::DataSetReader;
use crate::pubsub::security::{CryptoProvider, KeySet, KeyStorage, SecurityContext};
use crate::pubsub::state::{PubSubState, StateChangeCallback};
use crate::pubsub::transport::{CallbackId, EventLoop};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A set of DataSetReaders sharing cadence and (optionally) security
/// (spec GLOSSARY).
pub struct ReaderGroup {
    id: PubSubId,
    parent_connection: PubSubId,
    config: ReaderGroupConfig,
    state: RwLock<PubSubState>,
    last_cause: RwLock<CauseStatus>,
    /// Newest-inserted-first, per spec §9's open-question resolution
    /// ("first-match deterministically in iteration order (insertion
    /// order, newest first)").
    readers: RwLock<Vec<Arc<DataSetReader>>>,
    configuration_frozen: AtomicBool,
    security_context: RwLock<Option<Arc<SecurityContext>>>,
    crypto_provider: RwLock<Option<Arc<dyn CryptoProvider>>>,
    key_storage: RwLock<Option<Arc<KeyStorage>>>,
    subscribe_callback: RwLock<Option<CallbackId>>,
}

impl ReaderGroup {
    pub fn new(id: PubSubId, parent_connection: PubSubId, config: ReaderGroupConfig) -> Self {
        Self {
            id,
            parent_connection,
            config: config.normalized(),
            state: RwLock::new(PubSubState::Disabled),
            last_cause: RwLock::new(CauseStatus::Good),
            readers: RwLock::new(Vec::new()),
            configuration_frozen: AtomicBool::new(false),
            security_context: RwLock::new(None),
            crypto_provider: RwLock::new(None),
            key_storage: RwLock::new(None),
            subscribe_callback: RwLock::new(None),
        }
    }

    pub fn id(&self) -> PubSubId {
        self.id
    }

    pub fn parent_connection(&self) -> PubSubId {
        self.parent_connection
    }

    pub fn config(&self) -> &ReaderGroupConfig {
        &self.config
    }

    pub fn state(&self) -> PubSubState {
        *self.state.read()
    }

    pub fn last_cause(&self) -> CauseStatus {
        *self.last_cause.read()
    }

    pub fn is_frozen(&self) -> bool {
        self.configuration_frozen.load(Ordering::Acquire)
    }

    pub fn security_mode(&self) -> MessageSecurityMode {
        self.config.security_mode
    }

    pub fn security_context(&self) -> Option<Arc<SecurityContext>> {
        self.security_context.read().clone()
    }

    pub fn crypto_provider(&self) -> Option<Arc<dyn CryptoProvider>> {
        self.crypto_provider.read().clone()
    }

    pub fn set_crypto_provider(&self, provider: Arc<dyn CryptoProvider>) {
        *self.crypto_provider.write() = Some(provider);
    }

    pub fn attach_key_storage(&self, storage: Arc<KeyStorage>) {
        storage.attach();
        *self.key_storage.write() = Some(storage);
    }

    /// Detach (refcount--) and drop this group's reference.
    pub fn detach_key_storage(&self) {
        if let Some(storage) = self.key_storage.write().take() {
            storage.detach();
        }
    }

    /// Full removal teardown (spec §4.3 "Remove"): stop the subscribe
    /// callback, drop all child readers, tear down the security context
    /// and crypto provider, and detach this group's KeyStorage
    /// reference. The caller (`PubSubConnection::remove_reader_group`)
    /// rejects the call while the group is frozen and unlinks it from
    /// the parent's sequence; this only tears down the group's own
    /// state.
    pub fn teardown(&self, event_loop: &dyn EventLoop) {
        if let Some(registered) = self.subscribe_callback.write().take() {
            event_loop.cancel_cyclic_callback(registered);
        }
        self.readers.write().clear();
        *self.security_context.write() = None;
        *self.crypto_provider.write() = None;
        self.detach_key_storage();
    }

    // ---- reader membership (spec §4.3 "Creation": "inserts at the
    // head of the parent's readers sequence") ----

    pub fn add_reader(&self, reader: Arc<DataSetReader>) {
        self.readers.write().insert(0, reader);
    }

    pub fn remove_reader(&self, id: PubSubId) -> Option<Arc<DataSetReader>> {
        let mut readers = self.readers.write();
        let idx = readers.iter().position(|r| r.id() == id)?;
        Some(readers.remove(idx))
    }

    pub fn readers(&self) -> Vec<Arc<DataSetReader>> {
        self.readers.read().clone()
    }

    pub fn reader_count(&self) -> usize {
        self.readers.read().len()
    }

    /// First reader matching the header's identifiers, in the
    /// deterministic iteration order (spec §4.5 step 2, §9).
    pub fn find_matching_reader(&self, header: &NetworkMessageHeader) -> Option<Arc<DataSetReader>> {
        self.readers.read().iter().find(|r| r.matches(header)).cloned()
    }

    // ---- state machine (spec §4.3 "State machine") ----

    /// Drive this group to `target`, cascading to children per the
    /// transition rules. `DISABLED`/`PAUSED`/`ERROR` cascade the same
    /// cause to every child reader; `OPERATIONAL` promotes every child;
    /// `PREOPERATIONAL` leaves children where they are.
    pub fn set_state(
        &self,
        target: PubSubState,
        cause: CauseStatus,
        event_loop: &dyn EventLoop,
        callback: Option<&StateChangeCallback>,
    ) -> PubSubResult<()> {
        match target {
            PubSubState::Paused => {
                if *self.state.read() != PubSubState::Disabled {
                    return Err(PubSubError::NotSupported(
                        "PAUSED is only reachable from DISABLED".into(),
                    ));
                }
            }
            PubSubState::Operational => {
                if *self.state.read() != PubSubState::PreOperational {
                    return Err(PubSubError::NotSupported(
                        "OPERATIONAL is only reachable from PREOPERATIONAL".into(),
                    ));
                }
            }
            _ => {}
        }

        match target {
            PubSubState::Disabled | PubSubState::Paused | PubSubState::Error => {
                if let Some(registered) = self.subscribe_callback.write().take() {
                    event_loop.cancel_cyclic_callback(registered);
                }
                // Spec §4.2 "Cascading": children always cascade with
                // cause RESOURCE_UNAVAILABLE, independent of whatever
                // cause is stamped on this group's own transition.
                for reader in self.readers.read().iter() {
                    reader.set_state(target, CauseStatus::BadResourceUnavailable, callback);
                }
                debug_assert!(
                    self.readers.read().iter().all(|r| r.state().dominated_by(target)),
                    "reader outranks group {} after cascading to {target:?}",
                    self.id,
                );
            }
            PubSubState::PreOperational => {
                let mut registered = self.subscribe_callback.write();
                if registered.is_none() {
                    *registered = Some(event_loop.register_cyclic_callback(self.config.subscribing_interval_ms));
                }
            }
            PubSubState::Operational => {
                for reader in self.readers.read().iter() {
                    reader.set_state(PubSubState::Operational, CauseStatus::Good, callback);
                }
                debug_assert!(
                    self.readers.read().iter().all(|r| r.state().dominated_by(target)),
                    "reader outranks group {} after promoting to {target:?}",
                    self.id,
                );
            }
        }

        *self.state.write() = target;
        *self.last_cause.write() = cause;
        if let Some(callback) = callback {
            callback(self.id, target, cause);
        }
        Ok(())
    }

    // ---- freezing (spec §4.3 "Freezing (real-time preparation)") ----

    /// Validate and apply freeze-time constraints. Does not touch the
    /// parent Connection's freeze counter — that is the caller's
    /// (`PubSubConnection`'s) responsibility so invariant 2 stays in
    /// one place.
    pub fn freeze(&self) -> PubSubResult<()> {
        if self.config.real_time_level == crate::pubsub::config::RealTimeLevel::FixedSize {
            let readers = self.readers.read();
            if readers.len() != 1 {
                return Err(PubSubError::NotSupported(
                    "FIXED_SIZE requires exactly one DataSetReader".into(),
                ));
            }
            if self.config.encoding != MessageEncoding::Uadp {
                return Err(PubSubError::NotSupported(
                    "FIXED_SIZE requires UADP encoding".into(),
                ));
            }
            let reader = &readers[0];
            if !reader.config().publisher_id.is_pointer_free() {
                return Err(PubSubError::NotSupported(
                    "FIXED_SIZE requires a fixed-size PublisherId type".into(),
                ));
            }
            for field in &reader.config().fields {
                let ok = field.field_type.is_numeric_or_bool()
                    || field.field_type.is_bounded_string_like();
                if !ok {
                    return Err(PubSubError::NotSupported(format!(
                        "field '{}' is not numeric/boolean and has no bounded string length",
                        field.name
                    )));
                }
                if field.target_variable.is_none() {
                    return Err(PubSubError::NotSupported(format!(
                        "field '{}' has no target variable backend",
                        field.name
                    )));
                }
            }
            reader.freeze();
        } else {
            for reader in self.readers.read().iter() {
                reader.freeze();
            }
        }
        self.configuration_frozen.store(true, Ordering::Release);
        Ok(())
    }

    pub fn unfreeze(&self) {
        for reader in self.readers.read().iter() {
            reader.unfreeze();
        }
        self.configuration_frozen.store(false, Ordering::Release);
    }

    // ---- encryption key installation (spec §4.3 "Encryption key
    // installation") ----

    /// Install (or roll over) the signing/encrypting keys for this
    /// group's security context.
    pub fn set_encryption_keys(
        &self,
        token_id: u32,
        signing_key: Vec<u8>,
        encrypting_key: Vec<u8>,
        nonce: u32,
    ) -> PubSubResult<()> {
        if self.config.encoding == MessageEncoding::Json {
            return Err(PubSubError::InternalError(
                "message security is defined only for UADP".into(),
            ));
        }
        if self.config.security_mode == MessageSecurityMode::None {
            return Err(PubSubError::InternalError(
                "no security policy configured for this group".into(),
            ));
        }
        let keys = KeySet {
            token_id,
            signing_key,
            encrypting_key,
        };
        let mut ctx = self.security_context.write();
        match ctx.as_ref() {
            Some(existing) => {
                existing.install(keys);
            }
            None => {
                *ctx = Some(Arc::new(SecurityContext::new(keys, nonce)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::config::{
        DataSetFieldConfig, DataSetReaderConfig, FieldType, PublisherId, RealTimeLevel,
    };
    use crate::pubsub::transport::InlineEventLoop;

    fn group_with_config(config: ReaderGroupConfig) -> ReaderGroup {
        ReaderGroup::new(PubSubId::from_raw(1), PubSubId::from_raw(0), config)
    }

    #[test]
    fn new_readers_insert_at_head() {
        let group = group_with_config(ReaderGroupConfig::default());
        let r1 = Arc::new(DataSetReader::new(
            PubSubId::from_raw(1),
            group.id(),
            DataSetReaderConfig::new("r1", PublisherId::Byte(1), 1, 1),
        ));
        let r2 = Arc::new(DataSetReader::new(
            PubSubId::from_raw(2),
            group.id(),
            DataSetReaderConfig::new("r2", PublisherId::Byte(2), 2, 2),
        ));
        group.add_reader(r1.clone());
        group.add_reader(r2.clone());
        let readers = group.readers();
        assert_eq!(readers[0].id(), r2.id());
        assert_eq!(readers[1].id(), r1.id());
    }

    #[test]
    fn paused_only_reachable_from_disabled() {
        let group = group_with_config(ReaderGroupConfig::default());
        let loop_ = InlineEventLoop::new();
        group
            .set_state(PubSubState::PreOperational, CauseStatus::Good, &loop_, None)
            .unwrap();
        let result = group.set_state(PubSubState::Paused, CauseStatus::Good, &loop_, None);
        assert!(matches!(result, Err(PubSubError::NotSupported(_))));
    }

    #[test]
    fn operational_only_reachable_from_preoperational() {
        let group = group_with_config(ReaderGroupConfig::default());
        let loop_ = InlineEventLoop::new();
        let result = group.set_state(PubSubState::Operational, CauseStatus::Good, &loop_, None);
        assert!(matches!(result, Err(PubSubError::NotSupported(_))));
    }

    #[test]
    fn disabling_cascades_to_children() {
        let group = group_with_config(ReaderGroupConfig::default());
        let loop_ = InlineEventLoop::new();
        let reader = Arc::new(DataSetReader::new(
            PubSubId::from_raw(1),
            group.id(),
            DataSetReaderConfig::new("r1", PublisherId::Byte(1), 1, 1),
        ));
        reader.set_state(PubSubState::Operational, CauseStatus::Good, None);
        group.add_reader(reader.clone());

        group
            .set_state(PubSubState::Disabled, CauseStatus::Shutdown, &loop_, None)
            .unwrap();
        assert_eq!(reader.state(), PubSubState::Disabled);
        // Children always cascade with RESOURCE_UNAVAILABLE, independent of
        // whatever cause the group's own transition carries.
        assert_eq!(reader.last_cause(), CauseStatus::BadResourceUnavailable);
        assert_eq!(group.last_cause(), CauseStatus::Shutdown);
    }

    fn fixed_size_config() -> ReaderGroupConfig {
        ReaderGroupConfig {
            real_time_level: RealTimeLevel::FixedSize,
            ..ReaderGroupConfig::default()
        }
    }

    #[test]
    fn freeze_fixed_size_rejects_multiple_readers() {
        let group = group_with_config(fixed_size_config());
        for i in 0..2u64 {
            group.add_reader(Arc::new(DataSetReader::new(
                PubSubId::from_raw(i + 1),
                group.id(),
                DataSetReaderConfig::new(format!("r{i}"), PublisherId::UInt16(i as u16), 1, 1),
            )));
        }
        let result = group.freeze();
        assert!(matches!(result, Err(PubSubError::NotSupported(_))));
    }

    #[test]
    fn freeze_fixed_size_rejects_string_publisher_id() {
        let group = group_with_config(fixed_size_config());
        group.add_reader(Arc::new(DataSetReader::new(
            PubSubId::from_raw(1),
            group.id(),
            DataSetReaderConfig::new("r1", PublisherId::String("p".into()), 1, 1),
        )));
        let result = group.freeze();
        assert!(matches!(result, Err(PubSubError::NotSupported(_))));
    }

    #[test]
    fn freeze_fixed_size_rejects_unbounded_string_field() {
        let group = group_with_config(fixed_size_config());
        let mut cfg = DataSetReaderConfig::new("r1", PublisherId::UInt16(7), 1, 1);
        cfg.fields.push(DataSetFieldConfig {
            name: "label".into(),
            field_type: FieldType::String { max_len: None },
            target_variable: Some(0),
        });
        cfg.target_variables
            .push(Arc::new(crate::pubsub::config::MemoryVariable::new()));
        group.add_reader(Arc::new(DataSetReader::new(PubSubId::from_raw(1), group.id(), cfg)));
        let result = group.freeze();
        assert!(matches!(result, Err(PubSubError::NotSupported(_))));
    }

    #[test]
    fn freeze_fixed_size_accepts_numeric_fields() {
        let group = group_with_config(fixed_size_config());
        let mut cfg = DataSetReaderConfig::new("r1", PublisherId::UInt16(7), 1, 1);
        cfg.fields.push(DataSetFieldConfig {
            name: "value".into(),
            field_type: FieldType::Int32,
            target_variable: Some(0),
        });
        cfg.target_variables
            .push(Arc::new(crate::pubsub::config::MemoryVariable::new()));
        group.add_reader(Arc::new(DataSetReader::new(PubSubId::from_raw(1), group.id(), cfg)));
        assert!(group.freeze().is_ok());
        assert!(group.is_frozen());
    }

    #[test]
    fn install_keys_rejects_json_encoding() {
        let group = group_with_config(ReaderGroupConfig {
            encoding: MessageEncoding::Json,
            security_mode: MessageSecurityMode::Sign,
            ..ReaderGroupConfig::default()
        });
        let result = group.set_encryption_keys(1, vec![1; 32], vec![2; 32], 1);
        assert!(matches!(result, Err(PubSubError::InternalError(_))));
    }

    #[test]
    fn teardown_stops_callback_clears_readers_and_detaches_keys() {
        let group = group_with_config(ReaderGroupConfig::default());
        let loop_ = InlineEventLoop::new();
        group
            .set_state(PubSubState::PreOperational, CauseStatus::Good, &loop_, None)
            .unwrap();
        group.add_reader(Arc::new(DataSetReader::new(
            PubSubId::from_raw(1),
            group.id(),
            DataSetReaderConfig::new("r1", PublisherId::Byte(1), 1, 1),
        )));
        let storage = KeyStorage::new();
        group.attach_key_storage(storage.clone());
        assert_eq!(storage.refcount(), 1);

        group.teardown(&loop_);

        assert_eq!(group.reader_count(), 0);
        assert_eq!(storage.refcount(), 0);
        assert!(group.security_context().is_none());

        // Subscribe callback was cancelled: a subsequent DISABLED
        // cascade has nothing left to cancel, it just no-ops.
        group
            .set_state(PubSubState::Disabled, CauseStatus::Shutdown, &loop_, None)
            .unwrap();
    }

    #[test]
    fn install_keys_preserves_context_identity_across_rollover() {
        let group = group_with_config(ReaderGroupConfig {
            security_mode: MessageSecurityMode::SignAndEncrypt,
            ..ReaderGroupConfig::default()
        });
        group.set_encryption_keys(1, vec![1; 32], vec![2; 32], 1).unwrap();
        let first = group.security_context().unwrap();
        group.set_encryption_keys(2, vec![3; 32], vec![4; 32], 1).unwrap();
        let second = group.security_context().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.nonce_sequence(), 1);
    }
}
