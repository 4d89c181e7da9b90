// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Narrow interface onto the transport event loop.
//!
//! The event loop itself (UDP/Ethernet/MQTT sockets, timers, delayed
//! callbacks) is an external collaborator out of scope for this crate
//! (spec §1). This module defines only the surface the control plane
//! needs to drive it, plus one in-process test double
//! ([`InlineEventLoop`]) used by this module's own tests — it is a
//! fixture, not a production reactor.

use crate::pubsub::ids::PubSubId;
use std::sync::Mutex;

/// A callback id registered with an [`EventLoop`], used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u64);

/// A receive (or send) channel handle opened against the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

/// The minimal contract the control plane needs from the transport
/// event loop (spec §5 "Scheduling model", §4.2 "Delete protocol").
pub trait EventLoop: Send + Sync {
    /// Open a receive channel for a connection at the given address.
    /// Returns an opaque channel handle.
    fn open_recv_channel(&self, connection: PubSubId, address: &str) -> ChannelId;

    /// Close a previously opened channel. Idempotent.
    fn close_channel(&self, channel: ChannelId);

    /// Register a periodic callback firing every `interval_ms`
    /// milliseconds. At most one may be registered per
    /// (connection, reader_group) pair — double-registration is a
    /// programming error the caller must avoid (spec §4.3 "Subscribe
    /// callback").
    fn register_cyclic_callback(&self, interval_ms: u32) -> CallbackId;

    /// Cancel a cyclic callback. After this returns, a callback
    /// already in progress completes under the service mutex before
    /// the destroy path proceeds (spec §5 "Cancellation and timeouts").
    fn cancel_cyclic_callback(&self, id: CallbackId);

    /// Queue a delayed free: `run` is invoked on the event-loop thread
    /// once all referencing channels have closed (spec §4.2 "Delete
    /// protocol", §5 "Delayed deletion").
    fn queue_delayed_free(&self, run: Box<dyn FnOnce() + Send>);
}

/// A trivial synchronous [`EventLoop`] that runs everything inline,
/// for use in tests that don't need real timers or sockets.
#[derive(Default)]
pub struct InlineEventLoop {
    next_channel: Mutex<u64>,
    next_callback: Mutex<u64>,
    open_channels: Mutex<Vec<ChannelId>>,
}

impl InlineEventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channels currently considered open (not yet closed).
    pub fn open_channel_count(&self) -> usize {
        self.open_channels.lock().expect("lock poisoned").len()
    }
}

impl EventLoop for InlineEventLoop {
    fn open_recv_channel(&self, _connection: PubSubId, _address: &str) -> ChannelId {
        let mut next = self.next_channel.lock().expect("lock poisoned");
        *next += 1;
        let id = ChannelId(*next);
        self.open_channels.lock().expect("lock poisoned").push(id);
        id
    }

    fn close_channel(&self, channel: ChannelId) {
        self.open_channels
            .lock()
            .expect("lock poisoned")
            .retain(|c| *c != channel);
    }

    fn register_cyclic_callback(&self, _interval_ms: u32) -> CallbackId {
        let mut next = self.next_callback.lock().expect("lock poisoned");
        *next += 1;
        CallbackId(*next)
    }

    fn cancel_cyclic_callback(&self, _id: CallbackId) {}

    fn queue_delayed_free(&self, run: Box<dyn FnOnce() + Send>) {
        // No channels to wait for in the inline fixture: run immediately,
        // matching "once queued, no new reference can be acquired" (the
        // entity is already unlinked from the Manager by the caller).
        run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_event_loop_tracks_open_channels() {
        let loop_ = InlineEventLoop::new();
        let c1 = loop_.open_recv_channel(PubSubId::from_raw(1), "239.0.0.1:4840");
        let c2 = loop_.open_recv_channel(PubSubId::from_raw(1), "239.0.0.1:4841");
        assert_eq!(loop_.open_channel_count(), 2);
        loop_.close_channel(c1);
        assert_eq!(loop_.open_channel_count(), 1);
        loop_.close_channel(c2);
        assert_eq!(loop_.open_channel_count(), 0);
    }

    #[test]
    fn delayed_free_runs() {
        let loop_ = InlineEventLoop::new();
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran2 = ran.clone();
        loop_.queue_delayed_free(Box::new(move || {
            ran2.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
