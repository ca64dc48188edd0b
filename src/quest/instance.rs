//! Quest Instances
//!
//! One live quest for one player. An instance owns its objectives, walks the
//! `InProgress -> Completed -> Delivered` state machine and announces every
//! transition on its own [`Signal`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::definition::{DeliverType, QuestDefinition};
use super::events::QuestInstanceEvent;
use super::objective::{Objective, ObjectiveUpdate};
use super::state::{QuestProgress, QuestStatus};
use crate::signal::Signal;

/// A live quest instance
#[derive(Debug)]
pub struct Quest {
    definition: Arc<QuestDefinition>,
    status: QuestStatus,
    objectives: Vec<Objective>,
    completed_count: u32,
    first_completed_at: Option<DateTime<Utc>>,
    last_completed_at: Option<DateTime<Utc>>,
    events: Signal<QuestInstanceEvent>,
}

impl Quest {
    /// Fresh InProgress instance with every objective at zero
    pub fn new(definition: Arc<QuestDefinition>) -> Self {
        let objectives = definition
            .objectives
            .iter()
            .map(|o| Objective::new(Arc::clone(&o.definition), o.target))
            .collect();

        Self {
            definition,
            status: QuestStatus::InProgress,
            objectives,
            completed_count: 0,
            first_completed_at: None,
            last_completed_at: None,
            events: Signal::new(),
        }
    }

    /// Rebuild an instance from a stored progress record. `status` comes from
    /// the snapshot bucket and is taken as-is; objective ids the definition no
    /// longer declares are dropped, missing ones start at zero.
    pub fn restore(definition: Arc<QuestDefinition>, status: QuestStatus, progress: &QuestProgress) -> Self {
        let objectives = definition
            .objectives
            .iter()
            .map(|o| {
                let current = progress.objectives.get(o.id()).copied().unwrap_or(0);
                Objective::with_value(Arc::clone(&o.definition), o.target, current)
            })
            .collect();

        let status = match status {
            QuestStatus::NotStarted => QuestStatus::InProgress,
            other => other,
        };

        Self {
            definition,
            status,
            objectives,
            completed_count: progress.completed_count,
            first_completed_at: progress.first_completed_at,
            last_completed_at: progress.last_completed_at,
            events: Signal::new(),
        }
    }

    /// Fresh instance for a repeat run, keeping the completion history of
    /// `previous`
    pub fn repeat_of(previous: &Quest) -> Self {
        let mut quest = Self::new(Arc::clone(&previous.definition));
        quest.completed_count = previous.completed_count;
        quest.first_completed_at = previous.first_completed_at;
        quest.last_completed_at = previous.last_completed_at;
        quest
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn definition(&self) -> &Arc<QuestDefinition> {
        &self.definition
    }

    pub fn status(&self) -> QuestStatus {
        self.status
    }

    /// Listeners for this instance's transitions
    pub fn events(&self) -> &Signal<QuestInstanceEvent> {
        &self.events
    }

    pub fn objective(&self, objective_id: &str) -> Option<&Objective> {
        self.objectives.iter().find(|o| o.id() == objective_id)
    }

    /// Objectives in definition order
    pub fn objectives(&self) -> &[Objective] {
        &self.objectives
    }

    pub fn all_objectives_completed(&self) -> bool {
        self.objectives.iter().all(Objective::is_completed)
    }

    pub fn completed_count(&self) -> u32 {
        self.completed_count
    }

    pub fn first_completed_at(&self) -> Option<DateTime<Utc>> {
        self.first_completed_at
    }

    pub fn last_completed_at(&self) -> Option<DateTime<Utc>> {
        self.last_completed_at
    }

    pub fn add_objective(&mut self, objective_id: &str, amount: i32) -> bool {
        self.update_objective(objective_id, |o| o.add(amount))
    }

    pub fn remove_objective(&mut self, objective_id: &str, amount: i32) -> bool {
        self.update_objective(objective_id, |o| o.remove(amount))
    }

    pub fn set_objective(&mut self, objective_id: &str, value: i32) -> bool {
        self.update_objective(objective_id, |o| o.set(value))
    }

    /// Apply `op` to one objective while InProgress. Returns whether the
    /// stored value changed.
    fn update_objective<F>(&mut self, objective_id: &str, op: F) -> bool
    where
        F: FnOnce(&mut Objective) -> ObjectiveUpdate,
    {
        if self.status != QuestStatus::InProgress {
            return false;
        }

        let Some(objective) = self.objectives.iter_mut().find(|o| o.id() == objective_id) else {
            return false;
        };

        let value = match op(objective) {
            ObjectiveUpdate::Unchanged => return false,
            ObjectiveUpdate::Changed(value) | ObjectiveUpdate::Completed(value) => value,
        };

        self.events.fire(&QuestInstanceEvent::ObjectiveChanged {
            objective_id: objective_id.to_string(),
            value,
        });

        if self.all_objectives_completed() {
            self.mark_completed();
        }

        true
    }

    /// Complete the quest if it is InProgress with every objective done
    pub fn complete(&mut self) -> bool {
        if self.status != QuestStatus::InProgress || !self.all_objectives_completed() {
            return false;
        }
        self.mark_completed();
        true
    }

    fn mark_completed(&mut self) {
        let now = Utc::now();
        self.status = QuestStatus::Completed;
        self.completed_count += 1;
        self.first_completed_at.get_or_insert(now);
        self.last_completed_at = Some(now);
        self.events.fire(&QuestInstanceEvent::Completed);

        if self.definition.deliver_type == DeliverType::Automatic {
            self.deliver();
        }
    }

    pub fn deliver(&mut self) -> bool {
        if self.status != QuestStatus::Completed {
            return false;
        }
        self.status = QuestStatus::Delivered;
        self.events.fire(&QuestInstanceEvent::Delivered);
        true
    }

    /// Announce cancellation. Delivered quests cannot be cancelled. The
    /// caller is expected to drop the instance afterwards.
    pub fn cancel(&mut self) -> bool {
        if self.status == QuestStatus::Delivered {
            return false;
        }
        self.events.fire(&QuestInstanceEvent::Cancelled { status: self.status });
        true
    }

    /// Release every listener attached to this instance
    pub fn destroy(&mut self) {
        self.events.disconnect_all();
    }

    /// Snapshot of this instance's progress
    pub fn progress(&self) -> QuestProgress {
        QuestProgress {
            objectives: self
                .objectives
                .iter()
                .map(|o| (o.id().to_string(), o.current()))
                .collect(),
            completed_count: self.completed_count,
            first_completed_at: self.first_completed_at,
            last_completed_at: self.last_completed_at,
        }
    }

    pub fn time_since_completed(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_completed_at.map(|at| now - at)
    }

    /// When a delivered run may be taken again, `None` if never. A cadence
    /// that lands past the representable date range never re-arms.
    pub fn repeat_ready_at(&self) -> Option<DateTime<Utc>> {
        let cooldown = self.definition.repeatable.cooldown_secs()?;
        let last = self.last_completed_at?;
        last.checked_add_signed(Duration::try_seconds(cooldown)?)
    }

    /// Whether this Delivered instance may be replaced by a new run at `now`
    pub fn can_repeat(&self, now: DateTime<Utc>) -> bool {
        self.status == QuestStatus::Delivered
            && self.repeat_ready_at().is_some_and(|ready| now >= ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::definition::{ObjectiveDefinition, RepeatableType};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn q1(deliver: DeliverType) -> Arc<QuestDefinition> {
        Arc::new(
            QuestDefinition::new("Q1", "First")
                .with_deliver(deliver)
                .with_objective(ObjectiveDefinition::new("Obj1", "Obj", ""), 5),
        )
    }

    fn two_objectives() -> Arc<QuestDefinition> {
        Arc::new(
            QuestDefinition::new("Q2", "Second")
                .with_objective(ObjectiveDefinition::new("a", "A", ""), 2)
                .with_objective(ObjectiveDefinition::new("b", "B", ""), 1),
        )
    }

    fn record(quest: &Quest) -> Arc<Mutex<Vec<QuestInstanceEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        quest.events().connect(move |e| sink.lock().unwrap().push(e.clone()));
        seen
    }

    #[test]
    fn test_manual_quest_walkthrough() {
        let mut quest = Quest::new(q1(DeliverType::Manual));
        let seen = record(&quest);
        assert_eq!(quest.status(), QuestStatus::InProgress);

        assert!(quest.add_objective("Obj1", 3));
        assert_eq!(quest.objective("Obj1").unwrap().current(), 3);
        assert_eq!(quest.status(), QuestStatus::InProgress);

        assert!(quest.add_objective("Obj1", 2));
        assert_eq!(quest.status(), QuestStatus::Completed);
        assert_eq!(quest.completed_count(), 1);
        assert!(quest.last_completed_at().is_some());

        assert!(quest.deliver());
        assert_eq!(quest.status(), QuestStatus::Delivered);
        assert!(!quest.deliver());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                QuestInstanceEvent::ObjectiveChanged { objective_id: "Obj1".into(), value: 3 },
                QuestInstanceEvent::ObjectiveChanged { objective_id: "Obj1".into(), value: 5 },
                QuestInstanceEvent::Completed,
                QuestInstanceEvent::Delivered,
            ]
        );
    }

    #[test]
    fn test_automatic_delivery() {
        let mut quest = Quest::new(q1(DeliverType::Automatic));
        quest.set_objective("Obj1", 5);
        assert_eq!(quest.status(), QuestStatus::Delivered);
    }

    #[test]
    fn test_partial_completion_does_not_flip_status() {
        let mut quest = Quest::new(two_objectives());
        quest.add_objective("a", 2);
        assert!(quest.objective("a").unwrap().is_completed());
        assert_eq!(quest.status(), QuestStatus::InProgress);
        assert!(!quest.complete());

        quest.add_objective("b", 1);
        assert_eq!(quest.status(), QuestStatus::Completed);
    }

    #[test]
    fn test_updates_ignored_outside_in_progress() {
        let mut quest = Quest::new(q1(DeliverType::Manual));
        assert!(!quest.add_objective("missing", 1));

        quest.set_objective("Obj1", 5);
        let seen = record(&quest);
        assert!(!quest.remove_objective("Obj1", 1));
        assert!(!quest.complete());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_restore_takes_bucket_status() {
        let progress = QuestProgress {
            objectives: HashMap::from([("a".to_string(), 9), ("gone".to_string(), 1)]),
            completed_count: 2,
            ..Default::default()
        };
        let quest = Quest::restore(two_objectives(), QuestStatus::InProgress, &progress);

        assert_eq!(quest.status(), QuestStatus::InProgress);
        assert_eq!(quest.objective("a").unwrap().current(), 2);
        assert_eq!(quest.objective("b").unwrap().current(), 0);
        assert!(quest.objective("gone").is_none());
        assert_eq!(quest.completed_count(), 2);

        // Objectives already done but status stays InProgress until completed explicitly
        let mut done = Quest::restore(
            q1(DeliverType::Manual),
            QuestStatus::InProgress,
            &QuestProgress {
                objectives: HashMap::from([("Obj1".to_string(), 5)]),
                ..Default::default()
            },
        );
        assert_eq!(done.status(), QuestStatus::InProgress);
        assert!(done.complete());
        assert!(!done.complete());
    }

    #[test]
    fn test_cancel_and_destroy() {
        let mut quest = Quest::new(q1(DeliverType::Manual));
        let seen = record(&quest);

        assert!(quest.cancel());
        assert_eq!(
            seen.lock().unwrap().last(),
            Some(&QuestInstanceEvent::Cancelled { status: QuestStatus::InProgress })
        );

        quest.destroy();
        assert_eq!(quest.events().listener_count(), 0);

        let mut delivered = Quest::new(q1(DeliverType::Automatic));
        delivered.add_objective("Obj1", 5);
        assert!(!delivered.cancel());
    }

    #[test]
    fn test_repeat_cadence() {
        let def = Arc::new(
            QuestDefinition::new("daily", "Daily")
                .with_repeatable(RepeatableType::Daily)
                .with_deliver(DeliverType::Automatic)
                .with_objective(ObjectiveDefinition::new("o", "O", ""), 1),
        );
        let mut quest = Quest::new(def);
        quest.add_objective("o", 1);
        assert_eq!(quest.status(), QuestStatus::Delivered);

        let finished = quest.last_completed_at().unwrap();
        assert!(!quest.can_repeat(finished + Duration::hours(23)));
        assert!(quest.can_repeat(finished + Duration::hours(24)));

        let again = Quest::repeat_of(&quest);
        assert_eq!(again.status(), QuestStatus::InProgress);
        assert_eq!(again.completed_count(), 1);
        assert_eq!(again.objective("o").unwrap().current(), 0);

        let once = Quest::new(q1(DeliverType::Automatic));
        assert!(once.repeat_ready_at().is_none());
    }

    #[test]
    fn test_huge_custom_interval_never_rearms() {
        for interval_secs in [i64::MAX / 2, i64::MAX] {
            let def = Arc::new(
                QuestDefinition::new("epoch", "Epoch")
                    .with_repeatable(RepeatableType::Custom { interval_secs })
                    .with_deliver(DeliverType::Automatic)
                    .with_objective(ObjectiveDefinition::new("o", "O", ""), 1),
            );
            let mut quest = Quest::new(def);
            assert!(quest.add_objective("o", 1));
            assert_eq!(quest.status(), QuestStatus::Delivered);

            assert!(quest.repeat_ready_at().is_none());
            assert!(!quest.can_repeat(DateTime::<Utc>::MAX_UTC));
        }
    }
}
