//! Presentation-layer mirror of one player's quest state.
//!
//! A [`QuestClient`] consumes the frames a [`ReplicationHub`] sends for its
//! player, keeps a copy of the snapshot buckets and the available set, and
//! re-publishes each event on its own signal for UI code.
//!
//! [`ReplicationHub`]: crate::replication::ReplicationHub

use std::sync::{Mutex, PoisonError};

use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::QuestResult;
use crate::quest::{PlayerId, PlayerQuestData, QuestEvent, QuestStatus};
use crate::replication::decode_event;
use crate::signal::Signal;

#[derive(Debug, Default)]
struct Mirror {
    data: PlayerQuestData,
    available: Vec<String>,
}

/// Client-side view of a player's quests
pub struct QuestClient {
    player_id: PlayerId,
    mirror: Mutex<Mirror>,
    loaded: watch::Sender<bool>,
    events: Signal<QuestEvent>,
}

impl QuestClient {
    pub fn new(player_id: PlayerId) -> Self {
        let (loaded, _) = watch::channel(false);
        Self {
            player_id,
            mirror: Mutex::new(Mirror::default()),
            loaded,
            events: Signal::new(),
        }
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    /// Events as they arrive from the server
    pub fn events(&self) -> &Signal<QuestEvent> {
        &self.events
    }

    pub fn is_loaded(&self) -> bool {
        *self.loaded.borrow()
    }

    /// Decode and apply one frame
    pub fn apply_frame(&self, frame: &[u8]) -> QuestResult<()> {
        let event = decode_event(frame)?;
        self.apply(event);
        Ok(())
    }

    /// Fold an event into the mirror and re-publish it. Events for other
    /// players are ignored.
    pub fn apply(&self, event: QuestEvent) {
        if event.player_id().is_some_and(|id| *id != self.player_id) {
            debug!("Ignoring {} for another player", event.name());
            return;
        }

        let mut loaded = false;
        {
            let mut mirror = self.mirror.lock().unwrap_or_else(PoisonError::into_inner);
            match &event {
                QuestEvent::PlayerFinishedLoading { data, .. } | QuestEvent::PlayerDataChanged { data, .. } => {
                    mirror.data = data.clone();
                    loaded = true;
                }
                QuestEvent::InProgressChanged { quests, .. } => mirror.data.in_progress = quests.clone(),
                QuestEvent::CompletedChanged { quests, .. } => mirror.data.completed = quests.clone(),
                QuestEvent::DeliveredChanged { quests, .. } => mirror.data.delivered = quests.clone(),
                QuestEvent::AvailableChanged { quests, .. } => mirror.available = quests.clone(),
                _ => {}
            }
        }

        if loaded {
            self.loaded.send_replace(true);
        }
        self.events.fire(&event);
    }

    /// Apply frames from `frames` until the stream ends
    pub async fn run<S>(&self, mut frames: S)
    where
        S: Stream<Item = Vec<u8>> + Unpin,
    {
        while let Some(frame) = frames.next().await {
            if let Err(e) = self.apply_frame(&frame) {
                warn!("Dropping bad quest frame for {}: {}", self.player_id, e);
            }
        }
        debug!("Quest replication stream for {} closed", self.player_id);
    }

    /// Wait until the server has sent the player's data, then return it
    pub async fn get_player_data(&self) -> PlayerQuestData {
        let mut loaded = self.loaded.subscribe();
        // The sender lives as long as `self`, so this only returns once loaded
        let _ = loaded.wait_for(|loaded| *loaded).await;
        self.player_data()
    }

    /// Current mirror, without waiting for the initial load
    pub fn player_data(&self) -> PlayerQuestData {
        self.mirror
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .data
            .clone()
    }

    pub fn available_quests(&self) -> Vec<String> {
        self.mirror
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .available
            .clone()
    }

    pub fn quest_status(&self, quest_id: &str) -> QuestStatus {
        self.mirror
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .data
            .status_of(quest_id)
    }

    pub fn objective_value(&self, quest_id: &str, objective_id: &str) -> Option<i32> {
        let mirror = self.mirror.lock().unwrap_or_else(PoisonError::into_inner);
        let progress = [&mirror.data.in_progress, &mirror.data.completed, &mirror.data.delivered]
            .into_iter()
            .find_map(|bucket| bucket.get(quest_id))?;
        progress.objectives.get(objective_id).copied()
    }
}
