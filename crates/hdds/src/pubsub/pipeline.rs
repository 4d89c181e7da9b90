// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The subscribe-side receive pipeline: decode, demultiplex, open, decode
//! payload, dispatch (spec §4.5).
//!
//! Grounded on `engine::router::route_data_packet`, this crate's existing
//! hot-path packet router: decode header, resolve destination, drop
//! (without raising an error) on no match, then dispatch.

use crate::pubsub::codec::{self, NetworkMessageHeader};
use crate::pubsub::connection::PubSubConnection;
use crate::pubsub::error::{CauseStatus, PubSubResult};
use crate::pubsub::manager::PubSubManager;
use crate::pubsub::reader_group::ReaderGroup;
use crate::pubsub::security::{self, CryptoProvider};
use crate::pubsub::state::{PubSubState, StateChangeCallback};
use crate::pubsub::transport::EventLoop;
use log::{debug, warn};

/// Process every NetworkMessage frame packed into `buffer` against
/// `connection`'s ReaderGroups, dispatching matches to their
/// DataSetReaders. Never returns `Err` for a frame that simply matches
/// nothing — only malformed buffers or fatal decode/security failures
/// are reported, and those are also reflected onto the offending
/// reader's/connection's state (spec §4.5 "Edge cases").
pub fn process(
    buffer: &[u8],
    connection: &PubSubConnection,
    event_loop: &dyn EventLoop,
    callback: Option<&StateChangeCallback>,
) -> PubSubResult<()> {
    let mut pos = 0usize;
    while pos < buffer.len() {
        let frame = match codec::decode_frame(buffer, pos) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(target: "pubsub", "connection {} dropping malformed frame at offset {pos}: {err}", connection.id());
                return Err(err);
            }
        };
        pos = frame.consumed;
        dispatch_frame(&frame.header, &frame.sealed_payload, &frame.footer_tag, connection, event_loop, callback);
    }
    Ok(())
}

fn dispatch_frame(
    header: &NetworkMessageHeader,
    sealed_payload: &[u8],
    footer_tag: &[u8],
    connection: &PubSubConnection,
    event_loop: &dyn EventLoop,
    callback: Option<&StateChangeCallback>,
) {
    // Step 2: iterate the connection's reader-groups, and within each
    // its readers; the first reader whose identifier check matches
    // selects that reader-group (spec §4.5 step 2, §9 "first match
    // wins... in iteration order"). Identifier matching happens before
    // decrypt — a group's security context is only tried once it has
    // already been selected this way.
    let groups = connection.reader_groups();
    let selected = groups.iter().find_map(|group| group.find_matching_reader(header).map(|reader| (group.clone(), reader)));

    let (group, reader) = match selected {
        Some(pair) => pair,
        None => {
            // No-match is not an error (spec §4.5 step 3): in multicast
            // topologies a host receives frames not addressed to it.
            debug!(target: "pubsub", "no reader matches writer_group={} writer={}", header.writer_group_id, header.data_set_writer_id);
            return;
        }
    };

    let provider: Option<&dyn CryptoProvider> = group.crypto_provider().as_deref();
    let nonce = header.security_nonce.unwrap_or(0);
    let plaintext = match security::open_frame(
        group.security_mode(),
        group.security_context().as_deref(),
        provider,
        nonce,
        sealed_payload,
        footer_tag,
    ) {
        Ok(plaintext) => plaintext,
        Err(err) => {
            // Spec §7 "Propagation": a security failure also drops the
            // frame but does not escalate to the caller of `process`.
            warn!(target: "pubsub", "group {} failed to open frame for reader {}: {err}", group.id(), reader.id());
            return;
        }
    };

    match reader.dispatch(&plaintext, callback) {
        Ok(true) => {
            if reader.state() == PubSubState::PreOperational {
                reader.set_state(PubSubState::Operational, CauseStatus::Good, callback);
            }
            if group.state() == PubSubState::PreOperational {
                if let Err(err) = group.set_state(PubSubState::Operational, CauseStatus::Good, event_loop, callback) {
                    warn!(target: "pubsub", "group {} failed to promote to OPERATIONAL: {err}", group.id());
                }
            }
        }
        Ok(false) => {}
        Err(err) => {
            warn!(target: "pubsub", "reader {} dispatch failed: {err}", reader.id());
        }
    }
}

/// The subscribe callback fired by the event loop's cyclic timer for a
/// ReaderGroup in pull-mode subscribing (spec §4.3 "Subscribe
/// callback"): locate the parent Connection, transition to `ERROR` with
/// `BAD_CONNECTIONCLOSED` if it is gone, otherwise drain every datagram
/// buffered on the connection since the last tick and run each through
/// [`process`] (spec §4.5).
pub fn subscribe_tick(
    manager: &PubSubManager,
    group: &ReaderGroup,
    event_loop: &dyn EventLoop,
    callback: Option<&StateChangeCallback>,
) {
    let connection = match manager.find_connection(group.parent_connection()) {
        Some(connection) => connection,
        None => {
            warn!(target: "pubsub", "group {} ticked with no parent connection {}", group.id(), group.parent_connection());
            if let Err(err) = group.set_state(PubSubState::Error, CauseStatus::BadConnectionClosed, event_loop, callback) {
                warn!(target: "pubsub", "group {} failed to enter ERROR on connection loss: {err}", group.id());
            }
            return;
        }
    };

    if group.state().is_disabled_like() {
        // The event loop cancels the cyclic callback as soon as the
        // group leaves PREOPERATIONAL/OPERATIONAL, but a tick already
        // in flight when that happens can still land here.
        debug!(target: "pubsub", "group {} ticked while {:?}, dropping buffered datagrams", group.id(), group.state());
        connection.drain_inbound();
        return;
    }

    for datagram in connection.drain_inbound() {
        if let Err(err) = process(&datagram, &connection, event_loop, callback) {
            warn!(target: "pubsub", "connection {} subscribe tick failed to process a datagram: {err}", connection.id());
        }
    }
}
