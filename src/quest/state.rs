//! Quest State Snapshots
//!
//! The serializable record of a player's quest progress. This is the unit
//! handed to the host's persistence layer and mirrored to clients; live quest
//! instances are rebuilt from it.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QuestResult;

/// Opaque player identity supplied by the host
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PlayerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Status of a quest for a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    /// No live instance exists
    NotStarted,
    InProgress,
    /// All objectives done, waiting to be delivered
    Completed,
    Delivered,
}

impl QuestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestStatus::NotStarted => "not_started",
            QuestStatus::InProgress => "in_progress",
            QuestStatus::Completed => "completed",
            QuestStatus::Delivered => "delivered",
        }
    }

    /// Snapshot bucket holding quests in this status
    pub fn bucket(&self) -> Option<Bucket> {
        match self {
            QuestStatus::NotStarted => None,
            QuestStatus::InProgress => Some(Bucket::InProgress),
            QuestStatus::Completed => Some(Bucket::Completed),
            QuestStatus::Delivered => Some(Bucket::Delivered),
        }
    }
}

impl fmt::Display for QuestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three snapshot buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    InProgress,
    Completed,
    Delivered,
}

impl Bucket {
    /// Order in which buckets are restored on load
    pub const LOAD_ORDER: [Bucket; 3] = [Bucket::InProgress, Bucket::Completed, Bucket::Delivered];

    pub fn status(&self) -> QuestStatus {
        match self {
            Bucket::InProgress => QuestStatus::InProgress,
            Bucket::Completed => QuestStatus::Completed,
            Bucket::Delivered => QuestStatus::Delivered,
        }
    }
}

/// Stored progress for one quest. Its status is implied by the bucket it
/// sits in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestProgress {
    /// Current value per objective id
    #[serde(default)]
    pub objectives: HashMap<String, i32>,
    #[serde(default)]
    pub completed_count: u32,
    pub first_completed_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
}

/// All quest state for a single player, split by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerQuestData {
    #[serde(default)]
    pub in_progress: HashMap<String, QuestProgress>,
    #[serde(default)]
    pub completed: HashMap<String, QuestProgress>,
    #[serde(default)]
    pub delivered: HashMap<String, QuestProgress>,
}

impl PlayerQuestData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket(&self, bucket: Bucket) -> &HashMap<String, QuestProgress> {
        match bucket {
            Bucket::InProgress => &self.in_progress,
            Bucket::Completed => &self.completed,
            Bucket::Delivered => &self.delivered,
        }
    }

    pub fn bucket_mut(&mut self, bucket: Bucket) -> &mut HashMap<String, QuestProgress> {
        match bucket {
            Bucket::InProgress => &mut self.in_progress,
            Bucket::Completed => &mut self.completed,
            Bucket::Delivered => &mut self.delivered,
        }
    }

    /// Put `quest_id` into `bucket`, removing it from the other two
    pub fn insert(&mut self, bucket: Bucket, quest_id: &str, progress: QuestProgress) {
        self.remove(quest_id);
        self.bucket_mut(bucket).insert(quest_id.to_string(), progress);
    }

    /// Remove `quest_id` from whichever bucket holds it
    pub fn remove(&mut self, quest_id: &str) -> Option<(Bucket, QuestProgress)> {
        Bucket::LOAD_ORDER.into_iter().find_map(|bucket| {
            self.bucket_mut(bucket)
                .remove(quest_id)
                .map(|progress| (bucket, progress))
        })
    }

    pub fn status_of(&self, quest_id: &str) -> QuestStatus {
        Bucket::LOAD_ORDER
            .into_iter()
            .find(|bucket| self.bucket(*bucket).contains_key(quest_id))
            .map(|bucket| bucket.status())
            .unwrap_or(QuestStatus::NotStarted)
    }

    pub fn is_delivered(&self, quest_id: &str) -> bool {
        self.delivered.contains_key(quest_id)
    }

    pub fn len(&self) -> usize {
        self.in_progress.len() + self.completed.len() + self.delivered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize for the host's persistence layer
    pub fn to_json(&self) -> QuestResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> QuestResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
