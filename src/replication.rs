//! Server-side replication of quest events.
//!
//! The hub listens to a registry's event surface and forwards every event as
//! a MessagePack frame to the owning player's channel. Global events go to
//! every registered player.

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::QuestResult;
use crate::quest::{PlayerId, QuestEvent, QuestRegistry};
use crate::signal::Connection;

/// Encode an event as a replication frame
pub fn encode_event(event: &QuestEvent) -> QuestResult<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(event)?)
}

/// Decode a replication frame
pub fn decode_event(bytes: &[u8]) -> QuestResult<QuestEvent> {
    Ok(rmp_serde::from_slice(bytes)?)
}

type Senders = DashMap<PlayerId, mpsc::Sender<Vec<u8>>>;

/// Per-player unicast of registry events
pub struct ReplicationHub {
    senders: Arc<Senders>,
    connection: Mutex<Option<Connection>>,
    /// Capacity of channels created by `open_channel`
    buffer: usize,
}

impl ReplicationHub {
    /// Start forwarding `registry`'s events
    pub fn attach(registry: &QuestRegistry, buffer: usize) -> Self {
        let senders: Arc<Senders> = Arc::new(DashMap::new());
        let sink = Arc::clone(&senders);
        let connection = registry.events().connect(move |event| forward(&sink, event));

        Self {
            senders,
            connection: Mutex::new(Some(connection)),
            buffer: buffer.max(1),
        }
    }

    /// Register a player's frame sender
    pub fn register_player(&self, player_id: &PlayerId, sender: mpsc::Sender<Vec<u8>>) {
        self.senders.insert(player_id.clone(), sender);
        debug!("Registered replication sender for player {}", player_id);
    }

    /// Create and register a channel for `player_id`, returning its receiver
    pub fn open_channel(&self, player_id: &PlayerId) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.register_player(player_id, tx);
        rx
    }

    pub fn unregister_player(&self, player_id: &PlayerId) {
        if self.senders.remove(player_id).is_some() {
            debug!("Unregistered replication sender for player {}", player_id);
        }
    }

    pub fn player_count(&self) -> usize {
        self.senders.len()
    }

    /// Stop forwarding events
    pub fn detach(&self) {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(connection) = connection {
            connection.disconnect();
        }
    }
}

impl Drop for ReplicationHub {
    fn drop(&mut self) {
        self.detach();
    }
}

fn forward(senders: &Senders, event: &QuestEvent) {
    let bytes = match encode_event(event) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to encode {} event: {}", event.name(), e);
            return;
        }
    };

    match event.player_id() {
        Some(player_id) => {
            if let Some(sender) = senders.get(player_id) {
                if let Err(e) = sender.try_send(bytes) {
                    warn!("Failed to send {} to {}: {}", event.name(), player_id, e);
                }
            } else {
                debug!("No replication sender registered for player {}", player_id);
            }
        }
        None => {
            for entry in senders.iter() {
                if let Err(e) = entry.value().try_send(bytes.clone()) {
                    warn!("Failed to send {} to {}: {}", event.name(), entry.key(), e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::{ObjectiveDefinition, PlayerQuestData, QuestDefinition};

    async fn registry() -> QuestRegistry {
        let registry = QuestRegistry::new();
        registry
            .init(
                vec![QuestDefinition::new("Q1", "First").with_objective(ObjectiveDefinition::new("Obj1", "Obj", ""), 2)],
                vec![],
            )
            .await
            .unwrap();
        registry
    }

    fn drain(rx: &mut mpsc::Receiver<Vec<u8>>) -> Vec<QuestEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            events.push(decode_event(&frame).unwrap());
        }
        events
    }

    #[tokio::test]
    async fn test_events_reach_only_their_owner() {
        let registry = registry().await;
        let hub = ReplicationHub::attach(&registry, 64);
        let alice = PlayerId::from("alice");
        let bob = PlayerId::from("bob");
        let mut alice_rx = hub.open_channel(&alice);
        let mut bob_rx = hub.open_channel(&bob);

        registry.load_player(&alice, PlayerQuestData::new()).await;
        registry.give_quest(&alice, "Q1").await;

        let events = drain(&mut alice_rx);
        assert!(events.iter().all(|e| e.player_id() == Some(&alice)));
        assert!(events.iter().any(|e| matches!(e, QuestEvent::PlayerFinishedLoading { .. })));
        assert!(events.contains(&QuestEvent::QuestStarted {
            player_id: alice.clone(),
            quest_id: "Q1".into(),
        }));
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_global_events_go_to_everyone() {
        let registry = registry().await;
        let hub = ReplicationHub::attach(&registry, 64);
        let mut rx_a = hub.open_channel(&PlayerId::from("a"));
        let mut rx_b = hub.open_channel(&PlayerId::from("b"));

        registry.quest_became_unavailable("Q1").await;

        let expected = QuestEvent::QuestBecameUnavailable { quest_id: "Q1".into() };
        assert_eq!(drain(&mut rx_a), vec![expected.clone()]);
        assert_eq!(drain(&mut rx_b), vec![expected]);
    }

    #[tokio::test]
    async fn test_detach_and_unregister() {
        let registry = registry().await;
        let hub = ReplicationHub::attach(&registry, 64);
        let player = PlayerId::from("p1");
        let mut rx = hub.open_channel(&player);

        hub.unregister_player(&player);
        assert_eq!(hub.player_count(), 0);
        registry.load_player(&player, PlayerQuestData::new()).await;
        assert!(drain(&mut rx).is_empty());

        let mut rx = hub.open_channel(&player);
        hub.detach();
        assert_eq!(registry.events().listener_count(), 0);
        registry.give_quest(&player, "Q1").await;
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_frame_keeps_field_names() {
        let event = QuestEvent::ObjectiveChanged {
            player_id: PlayerId::from("p1"),
            quest_id: "Q1".into(),
            objective_id: "Obj1".into(),
            value: 3,
        };
        let frame = encode_event(&event).unwrap();
        let as_json: serde_json::Value = rmp_serde::from_slice(&frame).unwrap();
        assert_eq!(as_json["type"], "objectiveChanged");
        assert_eq!(as_json["objectiveId"], "Obj1");
        assert_eq!(decode_event(&frame).unwrap(), event);
    }
}
