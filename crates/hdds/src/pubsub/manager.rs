// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PubSubManager: the process-wide registry of live Connections.

use crate::pubsub::config::{PubSubConnectionConfig, ReaderGroupConfig};
use crate::pubsub::connection::PubSubConnection;
use crate::pubsub::error::{PubSubError, PubSubResult};
use crate::pubsub::ids::{IdMinter, PubSubId};
use crate::pubsub::reader_group::ReaderGroup;
use crate::pubsub::state::StateChangeCallback;
use crate::pubsub::transport::EventLoop;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Owns every live [`PubSubConnection`] and mints the identifiers handed
/// out to Connections, ReaderGroups and DataSetReaders alike (spec §3
/// invariant 5, §4.1 "Manager").
#[derive(Default)]
pub struct PubSubManager {
    minter: IdMinter,
    connections: RwLock<Vec<Arc<PubSubConnection>>>,
    /// MQTT topic-to-ReaderGroup mapping (spec §6 "Transport surface":
    /// "MQTT requires topic binding: on ReaderGroup creation over an
    /// MQTT connection, read the `queueName` from broker-transport-settings
    /// and register a topic-to-group mapping with the manager").
    topic_bindings: RwLock<HashMap<String, PubSubId>>,
}

impl PubSubManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh, currently-unused entity id.
    pub fn mint_id(&self) -> PubSubId {
        self.minter.mint()
    }

    /// Create and register a new Connection, in `DISABLED` state.
    pub fn add_connection(&self, config: PubSubConnectionConfig) -> Arc<PubSubConnection> {
        let id = self.mint_id();
        let connection = Arc::new(PubSubConnection::new(id, config));
        self.connections.write().push(connection.clone());
        connection
    }

    pub fn find_connection(&self, id: PubSubId) -> Option<Arc<PubSubConnection>> {
        self.connections.read().iter().find(|c| c.id() == id).cloned()
    }

    pub fn connections(&self) -> Vec<Arc<PubSubConnection>> {
        self.connections.read().clone()
    }

    /// Look up the ReaderGroup bound to an MQTT topic, if any.
    pub fn find_group_by_topic(&self, topic: &str) -> Option<PubSubId> {
        self.topic_bindings.read().get(topic).copied()
    }

    /// Create a ReaderGroup under `connection_id`, applying the full
    /// spec §4.3 "Creation" sequence beyond the bare
    /// [`PubSubConnection::add_reader_group`] insert: for an MQTT
    /// connection, read `queueName` from the group's broker transport
    /// settings and register the topic-to-group mapping (spec §6); then
    /// request the parent to (re)connect so any group-specific receive
    /// channel opens (spec §4.3 "requests the parent to (re)connect so
    /// any group-specific receive channel is opened").
    pub fn create_reader_group(
        &self,
        connection_id: PubSubId,
        config: ReaderGroupConfig,
        event_loop: &dyn EventLoop,
    ) -> PubSubResult<Arc<ReaderGroup>> {
        let connection = self.find_connection(connection_id).ok_or(PubSubError::NotFound)?;
        let needs_topic = connection.config().transport_profile.requires_topic_binding();
        if needs_topic && config.broker_queue_name.is_none() {
            return Err(PubSubError::InvalidArgument(
                "MQTT transport requires a broker queueName".into(),
            ));
        }
        let id = self.mint_id();
        let topic = config.broker_queue_name.clone();
        let group = Arc::new(ReaderGroup::new(id, connection_id, config));
        connection.add_reader_group(group.clone())?;
        if needs_topic {
            // `needs_topic` already guaranteed `topic` is `Some` above.
            self.topic_bindings.write().insert(topic.expect("checked above"), group.id());
        }
        connection.connect(event_loop)?;
        Ok(group)
    }

    /// Look up a Connection's config by id, for read-only callers that
    /// don't need the whole entity (spec §4.1 "get_connection_config").
    pub fn get_connection_config(&self, id: PubSubId) -> PubSubResult<PubSubConnectionConfig> {
        self.find_connection(id)
            .map(|c| c.config().clone())
            .ok_or(PubSubError::NotFound)
    }

    /// Unlink a Connection from the registry and run its delete
    /// protocol. Removing an unknown id fails with `NotFound` (spec
    /// §4.1 "Removal is idempotent; removing a non-existent id fails
    /// with NotFound") — idempotence means a *second* `remove` of an id
    /// already gone the same way behaves identically to removing any
    /// other unknown id, not that it silently succeeds.
    pub fn remove_connection(
        &self,
        id: PubSubId,
        event_loop: &dyn EventLoop,
        on_freed: Box<dyn FnOnce() + Send>,
        callback: Option<&StateChangeCallback>,
    ) -> PubSubResult<()> {
        let removed = {
            let mut connections = self.connections.write();
            let idx = connections.iter().position(|c| c.id() == id);
            idx.map(|idx| connections.remove(idx))
        };
        match removed {
            Some(connection) => {
                // Drop any topic bindings owned by this connection's
                // groups before they're torn down, so no stale mapping
                // can resolve to an entity no longer reachable from the
                // Manager (spec §8 P3).
                let group_ids: Vec<PubSubId> = connection.reader_groups().iter().map(|g| g.id()).collect();
                self.topic_bindings.write().retain(|_, bound_id| !group_ids.contains(bound_id));
                connection.delete(event_loop, on_freed, callback);
                Ok(())
            }
            None => Err(PubSubError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::config::{PublisherId, TransportProfile};
    use crate::pubsub::transport::InlineEventLoop;

    fn config(name: &str) -> PubSubConnectionConfig {
        PubSubConnectionConfig::new(name, PublisherId::UInt16(1), TransportProfile::UdpUadp, "239.0.0.1:4840")
    }

    #[test]
    fn minted_ids_are_unique_across_entity_kinds() {
        let manager = PubSubManager::new();
        let a = manager.mint_id();
        let b = manager.mint_id();
        assert_ne!(a, b);
    }

    #[test]
    fn add_and_find_connection_round_trips() {
        let manager = PubSubManager::new();
        let conn = manager.add_connection(config("c1"));
        let found = manager.find_connection(conn.id()).unwrap();
        assert_eq!(found.id(), conn.id());
    }

    #[test]
    fn get_connection_config_unknown_id_is_not_found() {
        let manager = PubSubManager::new();
        let result = manager.get_connection_config(PubSubId::from_raw(999));
        assert!(matches!(result, Err(PubSubError::NotFound)));
    }

    #[test]
    fn remove_connection_unlinks_it() {
        let manager = PubSubManager::new();
        let conn = manager.add_connection(config("c1"));
        let loop_ = InlineEventLoop::new();
        manager.remove_connection(conn.id(), &loop_, Box::new(|| {}), None).unwrap();
        assert!(manager.find_connection(conn.id()).is_none());
    }

    #[test]
    fn remove_connection_unknown_id_is_not_found() {
        let manager = PubSubManager::new();
        let loop_ = InlineEventLoop::new();
        let result = manager.remove_connection(PubSubId::from_raw(999), &loop_, Box::new(|| {}), None);
        assert!(matches!(result, Err(PubSubError::NotFound)));
    }

    #[test]
    fn removing_twice_fails_the_second_time() {
        let manager = PubSubManager::new();
        let conn = manager.add_connection(config("c1"));
        let loop_ = InlineEventLoop::new();
        manager.remove_connection(conn.id(), &loop_, Box::new(|| {}), None).unwrap();
        let result = manager.remove_connection(conn.id(), &loop_, Box::new(|| {}), None);
        assert!(matches!(result, Err(PubSubError::NotFound)));
    }

    #[test]
    fn disabling_notifies_children_before_parent() {
        use crate::pubsub::config::ReaderGroupConfig;
        use crate::pubsub::error::CauseStatus;
        use crate::pubsub::reader_group::ReaderGroup;
        use crate::pubsub::state::PubSubState;
        use parking_lot::Mutex;

        let manager = PubSubManager::new();
        let loop_ = InlineEventLoop::new();
        let conn = manager.add_connection(config("c1"));
        let group = Arc::new(ReaderGroup::new(manager.mint_id(), conn.id(), ReaderGroupConfig::default()));
        conn.add_reader_group(group.clone()).unwrap();

        let seen: Arc<Mutex<Vec<PubSubId>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let group_id = group.id();
        let conn_id = conn.id();
        let callback: StateChangeCallback = Arc::new(move |id, state, cause| {
            assert_eq!(state, PubSubState::Disabled);
            // Every descendant reports RESOURCE_UNAVAILABLE regardless of
            // the cause the connection itself transitions with; the
            // connection reports its own cause unchanged (spec §8 scenario 4).
            if id == group_id {
                assert_eq!(cause, CauseStatus::BadResourceUnavailable);
            } else if id == conn_id {
                assert_eq!(cause, CauseStatus::Good);
            }
            seen2.lock().push(id);
        });

        conn.set_state(PubSubState::Disabled, CauseStatus::Good, &loop_, Some(&callback));

        let order = seen.lock().clone();
        assert_eq!(order, vec![group.id(), conn.id()]);
    }

    #[test]
    fn create_reader_group_on_mqtt_connection_registers_topic() {
        let manager = PubSubManager::new();
        let loop_ = InlineEventLoop::new();
        let conn = manager.add_connection(PubSubConnectionConfig::new(
            "c1",
            PublisherId::UInt16(1),
            TransportProfile::MqttUadp,
            "tcp://broker:1883",
        ));

        let group_cfg = ReaderGroupConfig {
            broker_queue_name: Some("sensors/temp".into()),
            ..ReaderGroupConfig::default()
        };
        let group = manager.create_reader_group(conn.id(), group_cfg, &loop_).unwrap();

        assert_eq!(manager.find_group_by_topic("sensors/temp"), Some(group.id()));
        assert_eq!(loop_.open_channel_count(), 1);
    }

    #[test]
    fn create_reader_group_on_mqtt_connection_requires_queue_name() {
        let manager = PubSubManager::new();
        let loop_ = InlineEventLoop::new();
        let conn = manager.add_connection(PubSubConnectionConfig::new(
            "c1",
            PublisherId::UInt16(1),
            TransportProfile::MqttUadp,
            "tcp://broker:1883",
        ));

        let result = manager.create_reader_group(conn.id(), ReaderGroupConfig::default(), &loop_);
        assert!(matches!(result, Err(PubSubError::InvalidArgument(_))));
    }

    #[test]
    fn create_reader_group_on_udp_connection_does_not_register_topic() {
        let manager = PubSubManager::new();
        let loop_ = InlineEventLoop::new();
        let conn = manager.add_connection(config("c1"));
        let group = manager.create_reader_group(conn.id(), ReaderGroupConfig::default(), &loop_).unwrap();
        assert!(manager.find_group_by_topic(&group.id().to_string()).is_none());
    }

    #[test]
    fn removing_connection_drops_its_topic_bindings() {
        let manager = PubSubManager::new();
        let loop_ = InlineEventLoop::new();
        let conn = manager.add_connection(PubSubConnectionConfig::new(
            "c1",
            PublisherId::UInt16(1),
            TransportProfile::MqttUadp,
            "tcp://broker:1883",
        ));
        let group_cfg = ReaderGroupConfig {
            broker_queue_name: Some("sensors/temp".into()),
            ..ReaderGroupConfig::default()
        };
        manager.create_reader_group(conn.id(), group_cfg, &loop_).unwrap();
        assert!(manager.find_group_by_topic("sensors/temp").is_some());

        manager.remove_connection(conn.id(), &loop_, Box::new(|| {}), None).unwrap();
        assert!(manager.find_group_by_topic("sensors/temp").is_none());
    }
}
