//! Quest Event Types
//!
//! Events raised by single quest instances and the per-player / global event
//! surface the registry publishes for replication and UI layers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::state::{PlayerId, PlayerQuestData, QuestProgress, QuestStatus};

/// Transitions reported by one live quest instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestInstanceEvent {
    ObjectiveChanged { objective_id: String, value: i32 },
    Completed,
    Delivered,
    /// Instance is being cancelled from `status`
    Cancelled { status: QuestStatus },
}

/// Events published by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QuestEvent {
    /// The player's offered-but-not-started set changed
    #[serde(rename_all = "camelCase")]
    AvailableChanged { player_id: PlayerId, quests: Vec<String> },

    #[serde(rename_all = "camelCase")]
    InProgressChanged {
        player_id: PlayerId,
        quests: HashMap<String, QuestProgress>,
    },

    #[serde(rename_all = "camelCase")]
    CompletedChanged {
        player_id: PlayerId,
        quests: HashMap<String, QuestProgress>,
    },

    #[serde(rename_all = "camelCase")]
    DeliveredChanged {
        player_id: PlayerId,
        quests: HashMap<String, QuestProgress>,
    },

    #[serde(rename_all = "camelCase")]
    QuestAvailable { player_id: PlayerId, quest_id: String },

    #[serde(rename_all = "camelCase")]
    QuestUnavailable { player_id: PlayerId, quest_id: String },

    #[serde(rename_all = "camelCase")]
    QuestStarted { player_id: PlayerId, quest_id: String },

    #[serde(rename_all = "camelCase")]
    QuestCompleted { player_id: PlayerId, quest_id: String },

    #[serde(rename_all = "camelCase")]
    QuestDelivered { player_id: PlayerId, quest_id: String },

    #[serde(rename_all = "camelCase")]
    QuestCancelled { player_id: PlayerId, quest_id: String },

    #[serde(rename_all = "camelCase")]
    ObjectiveChanged {
        player_id: PlayerId,
        quest_id: String,
        objective_id: String,
        value: i32,
    },

    /// Snapshot was replaced from outside
    #[serde(rename_all = "camelCase")]
    PlayerDataChanged { player_id: PlayerId, data: PlayerQuestData },

    /// Snapshot was loaded on join
    #[serde(rename_all = "camelCase")]
    PlayerFinishedLoading { player_id: PlayerId, data: PlayerQuestData },

    /// A time-windowed quest opened (not player specific)
    #[serde(rename_all = "camelCase")]
    QuestBecameAvailable { quest_id: String },

    /// A time-windowed quest closed (not player specific)
    #[serde(rename_all = "camelCase")]
    QuestBecameUnavailable { quest_id: String },
}

impl QuestEvent {
    /// Get the player this event belongs to, `None` for global events
    pub fn player_id(&self) -> Option<&PlayerId> {
        match self {
            QuestEvent::AvailableChanged { player_id, .. }
            | QuestEvent::InProgressChanged { player_id, .. }
            | QuestEvent::CompletedChanged { player_id, .. }
            | QuestEvent::DeliveredChanged { player_id, .. }
            | QuestEvent::QuestAvailable { player_id, .. }
            | QuestEvent::QuestUnavailable { player_id, .. }
            | QuestEvent::QuestStarted { player_id, .. }
            | QuestEvent::QuestCompleted { player_id, .. }
            | QuestEvent::QuestDelivered { player_id, .. }
            | QuestEvent::QuestCancelled { player_id, .. }
            | QuestEvent::ObjectiveChanged { player_id, .. }
            | QuestEvent::PlayerDataChanged { player_id, .. }
            | QuestEvent::PlayerFinishedLoading { player_id, .. } => Some(player_id),
            QuestEvent::QuestBecameAvailable { .. } | QuestEvent::QuestBecameUnavailable { .. } => None,
        }
    }

    /// Get event name as string (for logging and replication)
    pub fn name(&self) -> &'static str {
        match self {
            QuestEvent::AvailableChanged { .. } => "availableChanged",
            QuestEvent::InProgressChanged { .. } => "inProgressChanged",
            QuestEvent::CompletedChanged { .. } => "completedChanged",
            QuestEvent::DeliveredChanged { .. } => "deliveredChanged",
            QuestEvent::QuestAvailable { .. } => "questAvailable",
            QuestEvent::QuestUnavailable { .. } => "questUnavailable",
            QuestEvent::QuestStarted { .. } => "questStarted",
            QuestEvent::QuestCompleted { .. } => "questCompleted",
            QuestEvent::QuestDelivered { .. } => "questDelivered",
            QuestEvent::QuestCancelled { .. } => "questCancelled",
            QuestEvent::ObjectiveChanged { .. } => "objectiveChanged",
            QuestEvent::PlayerDataChanged { .. } => "playerDataChanged",
            QuestEvent::PlayerFinishedLoading { .. } => "playerFinishedLoading",
            QuestEvent::QuestBecameAvailable { .. } => "questBecameAvailable",
            QuestEvent::QuestBecameUnavailable { .. } => "questBecameUnavailable",
        }
    }

    /// Quest this event is about, if it concerns a single quest
    pub fn quest_id(&self) -> Option<&str> {
        match self {
            QuestEvent::QuestAvailable { quest_id, .. }
            | QuestEvent::QuestUnavailable { quest_id, .. }
            | QuestEvent::QuestStarted { quest_id, .. }
            | QuestEvent::QuestCompleted { quest_id, .. }
            | QuestEvent::QuestDelivered { quest_id, .. }
            | QuestEvent::QuestCancelled { quest_id, .. }
            | QuestEvent::ObjectiveChanged { quest_id, .. }
            | QuestEvent::QuestBecameAvailable { quest_id }
            | QuestEvent::QuestBecameUnavailable { quest_id } => Some(quest_id),
            _ => None,
        }
    }
}
