//! Per-player live quest state held by the registry

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use super::definition::QuestDefinition;
use super::instance::Quest;
use super::state::{Bucket, PlayerQuestData, QuestProgress, QuestStatus};

/// Live instances plus the offer bookkeeping for one loaded player
#[derive(Debug, Default)]
pub struct PlayerQuests {
    /// quest id -> live instance (any status)
    pub quests: HashMap<String, Quest>,
    /// Offered and waiting for a manual grant
    pub available: BTreeSet<String>,
    /// Known to the player but not offerable right now
    pub unavailable: BTreeSet<String>,
}

impl PlayerQuests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_of(&self, quest_id: &str) -> QuestStatus {
        self.quests
            .get(quest_id)
            .map(Quest::status)
            .unwrap_or(QuestStatus::NotStarted)
    }

    pub fn is_delivered(&self, quest_id: &str) -> bool {
        self.status_of(quest_id) == QuestStatus::Delivered
    }

    /// No blocking instance (none, or a delivered run whose repeat cadence
    /// has elapsed) and every required quest delivered
    pub fn can_give(&self, definition: &QuestDefinition, now: DateTime<Utc>) -> bool {
        if let Some(existing) = self.quests.get(&definition.id) {
            if !existing.can_repeat(now) {
                return false;
            }
        }

        definition
            .required_quests
            .iter()
            .all(|required| self.is_delivered(required))
    }

    /// Current contents of one snapshot bucket
    pub fn bucket(&self, bucket: Bucket) -> HashMap<String, QuestProgress> {
        let status = bucket.status();
        self.quests
            .values()
            .filter(|q| q.status() == status)
            .map(|q| (q.id().to_string(), q.progress()))
            .collect()
    }

    /// Full snapshot of the live instances
    pub fn snapshot(&self) -> PlayerQuestData {
        let mut data = PlayerQuestData::new();
        for quest in self.quests.values() {
            if let Some(bucket) = quest.status().bucket() {
                data.bucket_mut(bucket).insert(quest.id().to_string(), quest.progress());
            }
        }
        data
    }

    /// Tear down every instance, returning `(quest id, status)` of each
    pub fn destroy_all(&mut self) -> Vec<(String, QuestStatus)> {
        self.available.clear();
        self.unavailable.clear();
        self.quests
            .drain()
            .map(|(id, mut quest)| {
                let status = quest.status();
                quest.destroy();
                (id, status)
            })
            .collect()
    }
}
