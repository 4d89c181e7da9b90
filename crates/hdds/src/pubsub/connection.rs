// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PubSubConnection: the root of one Connection's ReaderGroup/DataSetReader
//! subtree, owning the transport channel and cascading state to its
//! children (spec §4.2).

use crate::pubsub::config::PubSubConnectionConfig;
use crate::pubsub::error::{CauseStatus, PubSubError, PubSubResult};
use crate::pubsub::ids::PubSubId;
use crate::pubsub::reader_group::ReaderGroup;
use crate::pubsub::state::{PubSubState, StateChangeCallback};
use crate::pubsub::transport::{ChannelId, EventLoop};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The top-level PubSub entity for one transport binding (spec GLOSSARY,
/// §3 `Connection`).
pub struct PubSubConnection {
    id: PubSubId,
    config: PubSubConnectionConfig,
    state: RwLock<PubSubState>,
    last_cause: RwLock<CauseStatus>,
    reader_groups: RwLock<Vec<Arc<ReaderGroup>>>,
    /// Count of child ReaderGroups currently frozen. While nonzero, new
    /// ReaderGroups cannot be created on this connection (spec §3
    /// invariant 2, §4.2 "Creation").
    freeze_counter: AtomicUsize,
    recv_channel: Mutex<Option<ChannelId>>,
    /// Raw NetworkMessage buffers handed to this connection by the
    /// transport since the last subscribe tick, awaiting pipeline
    /// dispatch (spec §4.3 "Subscribe callback").
    inbound: Mutex<VecDeque<Vec<u8>>>,
}

impl PubSubConnection {
    pub fn new(id: PubSubId, config: PubSubConnectionConfig) -> Self {
        Self {
            id,
            config,
            state: RwLock::new(PubSubState::Disabled),
            last_cause: RwLock::new(CauseStatus::Good),
            reader_groups: RwLock::new(Vec::new()),
            freeze_counter: AtomicUsize::new(0),
            recv_channel: Mutex::new(None),
            inbound: Mutex::new(VecDeque::new()),
        }
    }

    pub fn id(&self) -> PubSubId {
        self.id
    }

    pub fn config(&self) -> &PubSubConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> PubSubState {
        *self.state.read()
    }

    pub fn last_cause(&self) -> CauseStatus {
        *self.last_cause.read()
    }

    pub fn freeze_counter(&self) -> usize {
        self.freeze_counter.load(Ordering::Acquire)
    }

    // ---- ReaderGroup membership (spec §4.2 "Creation") ----

    /// Add a child ReaderGroup. Rejected while any sibling is frozen
    /// (spec §3 invariant 2).
    pub fn add_reader_group(&self, group: Arc<ReaderGroup>) -> PubSubResult<()> {
        if self.freeze_counter() > 0 {
            return Err(PubSubError::ConfigurationError(
                "cannot add a ReaderGroup while another is frozen".into(),
            ));
        }
        if group.config().blocking_socket && !group.config().custom_scheduler {
            return Err(PubSubError::NotSupported(
                "blocking sockets require a custom scheduler".into(),
            ));
        }
        self.reader_groups.write().insert(0, group);
        Ok(())
    }

    /// Remove a child ReaderGroup by id. Rejected while the group is
    /// frozen (spec §4.3 "Removal"). Runs the group's own teardown
    /// (stop subscribe callback, drop readers, tear down security,
    /// detach KeyStorage) before handing the unlinked group back to the
    /// caller.
    pub fn remove_reader_group(&self, id: PubSubId, event_loop: &dyn EventLoop) -> PubSubResult<Arc<ReaderGroup>> {
        let group = {
            let mut groups = self.reader_groups.write();
            let idx = groups.iter().position(|g| g.id() == id).ok_or(PubSubError::NotFound)?;
            if groups[idx].is_frozen() {
                return Err(PubSubError::ConfigurationError(
                    "cannot remove a frozen ReaderGroup".into(),
                ));
            }
            groups.remove(idx)
        };
        group.teardown(event_loop);
        Ok(group)
    }

    pub fn reader_groups(&self) -> Vec<Arc<ReaderGroup>> {
        self.reader_groups.read().clone()
    }

    pub fn find_reader_group(&self, id: PubSubId) -> Option<Arc<ReaderGroup>> {
        self.reader_groups.read().iter().find(|g| g.id() == id).cloned()
    }

    // ---- freezing (spec §3 invariant 2, §4.3 "Freezing") ----

    pub fn freeze_reader_group(&self, id: PubSubId) -> PubSubResult<()> {
        let group = self.find_reader_group(id).ok_or(PubSubError::NotFound)?;
        group.freeze()?;
        self.freeze_counter.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    pub fn unfreeze_reader_group(&self, id: PubSubId) -> PubSubResult<()> {
        let group = self.find_reader_group(id).ok_or(PubSubError::NotFound)?;
        if !group.is_frozen() {
            return Ok(());
        }
        group.unfreeze();
        self.freeze_counter.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }

    // ---- connect / state machine (spec §4.2 "Connect", "State machine") ----

    /// Open the connection's receive channel. Idempotent: a second call
    /// while already connected is a no-op success.
    pub fn connect(&self, event_loop: &dyn EventLoop) -> PubSubResult<()> {
        if self.recv_channel.lock().is_some() {
            return Ok(());
        }
        let channel = event_loop.open_recv_channel(self.id, &self.config.address);
        *self.recv_channel.lock() = Some(channel);
        debug!(target: "pubsub", "connection {} opened recv channel {:?}", self.id, channel);
        Ok(())
    }

    /// Buffer a raw NetworkMessage received by the transport, for the
    /// next subscribe tick to drain (spec §4.3 "Subscribe callback").
    pub fn push_inbound(&self, datagram: Vec<u8>) {
        self.inbound.lock().push_back(datagram);
    }

    /// Take every buffered datagram, in arrival order, leaving the
    /// buffer empty.
    pub fn drain_inbound(&self) -> Vec<Vec<u8>> {
        self.inbound.lock().drain(..).collect()
    }

    /// Drive this connection (and, for DISABLED/PAUSED/ERROR, every
    /// descendant) to `target`. `PREOPERATIONAL`/`OPERATIONAL` do not
    /// auto-promote children — each ReaderGroup promotes independently
    /// on first successful dispatch (spec §4.2 "State machine"). Notifies
    /// `callback`, children before parent (spec §8 scenario 4).
    pub fn set_state(
        &self,
        target: PubSubState,
        cause: CauseStatus,
        event_loop: &dyn EventLoop,
        callback: Option<&StateChangeCallback>,
    ) {
        if matches!(target, PubSubState::Disabled | PubSubState::Paused | PubSubState::Error) {
            // Spec §4.2 "Cascading": children are always driven with
            // cause RESOURCE_UNAVAILABLE, independent of whatever cause
            // is stamped on this connection's own transition (spec §8
            // scenario 4: the connection itself reports its own cause,
            // e.g. GOOD on a clean disable, while every descendant
            // reports BAD_RESOURCEUNAVAILABLE).
            for group in self.reader_groups.read().iter() {
                match group.set_state(target, CauseStatus::BadResourceUnavailable, event_loop, callback) {
                    Ok(()) => {
                        // Spec §3 invariant 3: a ReaderGroup's state
                        // never outranks its Connection's.
                        debug_assert!(
                            group.state().dominated_by(target),
                            "group {} outranks connection {} after cascading to {target:?}",
                            group.id(),
                            self.id,
                        );
                    }
                    Err(err) => {
                        warn!(target: "pubsub", "group {} failed to cascade to {target:?}: {err}", group.id());
                    }
                }
            }
        }
        *self.state.write() = target;
        *self.last_cause.write() = cause;
        if let Some(callback) = callback {
            callback(self.id, target, cause);
        }
    }

    /// Record a transport connect failure: ERROR with a connect-failure
    /// cause, cascaded to every child (spec §4.2 "Connect" edge case).
    pub fn mark_connect_failed(&self, event_loop: &dyn EventLoop, callback: Option<&StateChangeCallback>) {
        self.set_state(PubSubState::Error, CauseStatus::BadConnectionFailed, event_loop, callback);
    }

    // ---- delete protocol (spec §4.2 "Delete protocol") ----

    /// Stop every child, close the receive channel, and queue the
    /// connection's own memory for delayed free once the event loop
    /// confirms no channel references remain. The connection is
    /// considered unlinked from the Manager the instant this returns;
    /// `on_freed` runs later, possibly on another thread.
    pub fn delete(
        self: Arc<Self>,
        event_loop: &dyn EventLoop,
        on_freed: Box<dyn FnOnce() + Send>,
        callback: Option<&StateChangeCallback>,
    ) {
        self.set_state(PubSubState::Disabled, CauseStatus::Shutdown, event_loop, callback);
        // Spec §4.2 "Delete protocol" step (i): cascade-stop AND remove
        // all child groups, bypassing the frozen-rejects-removal rule
        // that guards a standalone `remove_reader_group` call — the
        // whole connection is going away, so there is no longer a
        // parent for a frozen group to be gated against.
        for group in self.reader_groups.write().drain(..) {
            group.teardown(event_loop);
        }
        if let Some(channel) = self.recv_channel.lock().take() {
            event_loop.close_channel(channel);
        }
        event_loop.queue_delayed_free(on_freed);
    }
}
