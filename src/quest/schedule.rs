//! Availability Scheduling
//!
//! Time-windowed quests open and close at fixed epoch seconds. The schedule
//! is a min-heap of pending flips computed from the definitions and the
//! current time, so a restarted process recomputes it instead of resuming
//! old timers.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::definition::QuestDefinition;

/// Direction of an availability flip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlipKind {
    Available,
    Unavailable,
}

/// A pending availability change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledFlip {
    pub fire_at: i64,
    pub quest_id: String,
    pub kind: FlipKind,
}

impl Ord for ScheduledFlip {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: earliest fire_at pops first, closings before openings
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| flip_rank(other.kind).cmp(&flip_rank(self.kind)))
            .then_with(|| other.quest_id.cmp(&self.quest_id))
    }
}

impl PartialOrd for ScheduledFlip {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn flip_rank(kind: FlipKind) -> u8 {
    match kind {
        FlipKind::Unavailable => 0,
        FlipKind::Available => 1,
    }
}

/// Pending availability flips, earliest first
#[derive(Debug, Default)]
pub struct AvailabilitySchedule {
    heap: BinaryHeap<ScheduledFlip>,
}

impl AvailabilitySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Work out which quests are open at `now` and queue the flips still to
    /// come. Returns the schedule and the ids that are available right away.
    pub fn plan<'a, I>(quests: I, now: i64) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = &'a QuestDefinition>,
    {
        let mut schedule = Self::new();
        let mut open_now = Vec::new();

        for quest in quests {
            if !quest.has_time_window() {
                open_now.push(quest.id.clone());
                continue;
            }

            let (start, end) = (quest.availability_start, quest.availability_end);
            if start > end || now > end {
                continue;
            }

            if quest.is_within_window(now) {
                open_now.push(quest.id.clone());
            } else {
                schedule.push(start, &quest.id, FlipKind::Available);
            }
            // `end` itself is still inside the window
            schedule.push(end.saturating_add(1), &quest.id, FlipKind::Unavailable);
        }

        (schedule, open_now)
    }

    pub fn push(&mut self, fire_at: i64, quest_id: &str, kind: FlipKind) {
        self.heap.push(ScheduledFlip {
            fire_at,
            quest_id: quest_id.to_string(),
            kind,
        });
    }

    /// Remove and return every flip due at or before `now`, earliest first
    pub fn pop_due(&mut self, now: i64) -> Vec<ScheduledFlip> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|flip| flip.fire_at <= now) {
            if let Some(flip) = self.heap.pop() {
                due.push(flip);
            }
        }
        due
    }

    /// Next time (epoch seconds) the given quest flips to `kind`
    pub fn next_flip(&self, quest_id: &str, kind: FlipKind) -> Option<i64> {
        self.heap
            .iter()
            .filter(|flip| flip.quest_id == quest_id && flip.kind == kind)
            .map(|flip| flip.fire_at)
            .min()
    }

    pub fn peek(&self) -> Option<&ScheduledFlip> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::definition::ObjectiveDefinition;

    fn windowed(id: &str, start: i64, end: i64) -> QuestDefinition {
        QuestDefinition::new(id, id)
            .with_window(start, end)
            .with_objective(ObjectiveDefinition::new("o", "o", ""), 1)
    }

    #[test]
    fn test_plan_sorts_quests_by_window() {
        let quests = vec![
            windowed("always", 0, 0),
            windowed("same", 500, 500),
            windowed("running", 50, 150),
            windowed("upcoming", 200, 300),
            windowed("over", 10, 20),
            windowed("backwards", 300, 200),
        ];
        let (schedule, mut open) = AvailabilitySchedule::plan(&quests, 100);
        open.sort();

        assert_eq!(open, vec!["always", "running", "same"]);
        assert_eq!(schedule.len(), 3);
        assert_eq!(schedule.next_flip("running", FlipKind::Unavailable), Some(151));
        assert_eq!(schedule.next_flip("upcoming", FlipKind::Available), Some(200));
        assert_eq!(schedule.next_flip("upcoming", FlipKind::Unavailable), Some(301));
        assert_eq!(schedule.next_flip("over", FlipKind::Available), None);
    }

    #[test]
    fn test_window_end_is_inclusive() {
        let quests = vec![windowed("event", 200, 300), windowed("forever", 0, i64::MAX)];
        let (mut schedule, open) = AvailabilitySchedule::plan(&quests, 250);
        assert_eq!(open, vec!["event", "forever"]);

        assert!(schedule.pop_due(300).is_empty());
        let due = schedule.pop_due(301);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].quest_id, "event");
        assert_eq!(due[0].kind, FlipKind::Unavailable);
        assert_eq!(schedule.next_flip("forever", FlipKind::Unavailable), Some(i64::MAX));
    }

    #[test]
    fn test_pop_due_in_time_order() {
        let mut schedule = AvailabilitySchedule::new();
        schedule.push(30, "c", FlipKind::Available);
        schedule.push(10, "a", FlipKind::Available);
        schedule.push(20, "b", FlipKind::Unavailable);
        schedule.push(20, "b2", FlipKind::Available);

        let due: Vec<_> = schedule
            .pop_due(20)
            .into_iter()
            .map(|f| (f.fire_at, f.quest_id))
            .collect();
        assert_eq!(
            due,
            vec![(10, "a".to_string()), (20, "b".to_string()), (20, "b2".to_string())]
        );
        assert_eq!(schedule.peek().map(|f| f.fire_at), Some(30));
        assert!(schedule.pop_due(29).is_empty());
    }
}
