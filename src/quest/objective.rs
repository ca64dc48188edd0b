//! Objective Progress
//!
//! Runtime counter for one objective of one quest instance.

use std::sync::Arc;

use super::definition::ObjectiveDefinition;

/// Outcome of a progress call on an [`Objective`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveUpdate {
    /// Stored value is the same as before (including calls on a completed objective)
    Unchanged,
    /// Stored value moved but the target is not reached
    Changed(i32),
    /// Stored value moved and reached the target with this call
    Completed(i32),
}

impl ObjectiveUpdate {
    pub fn changed(&self) -> bool {
        !matches!(self, ObjectiveUpdate::Unchanged)
    }
}

/// Progress on a single objective, clamped to `[0, target]`
#[derive(Debug, Clone)]
pub struct Objective {
    definition: Arc<ObjectiveDefinition>,
    current: i32,
    target: i32,
}

impl Objective {
    pub fn new(definition: Arc<ObjectiveDefinition>, target: i32) -> Self {
        Self {
            definition,
            current: 0,
            target: target.max(0),
        }
    }

    /// Rebuild an objective from a stored value. Out-of-range values are clamped.
    pub fn with_value(definition: Arc<ObjectiveDefinition>, target: i32, current: i32) -> Self {
        let mut objective = Self::new(definition, target);
        objective.current = current.clamp(0, objective.target);
        objective
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn definition(&self) -> &ObjectiveDefinition {
        &self.definition
    }

    pub fn current(&self) -> i32 {
        self.current
    }

    pub fn target(&self) -> i32 {
        self.target
    }

    pub fn is_completed(&self) -> bool {
        self.current >= self.target
    }

    pub fn add(&mut self, amount: i32) -> ObjectiveUpdate {
        self.set(self.current.saturating_add(amount))
    }

    pub fn remove(&mut self, amount: i32) -> ObjectiveUpdate {
        self.set(self.current.saturating_sub(amount))
    }

    /// Store `value` clamped to `[0, target]`. Once completed the objective
    /// is locked and every call reports [`ObjectiveUpdate::Unchanged`].
    pub fn set(&mut self, value: i32) -> ObjectiveUpdate {
        if self.is_completed() {
            return ObjectiveUpdate::Unchanged;
        }

        let value = value.clamp(0, self.target);
        if value == self.current {
            return ObjectiveUpdate::Unchanged;
        }

        self.current = value;
        if self.is_completed() {
            ObjectiveUpdate::Completed(value)
        } else {
            ObjectiveUpdate::Changed(value)
        }
    }

    pub fn describe(&self) -> String {
        self.definition.describe(self.current, self.target)
    }

    pub fn progress_percent(&self) -> f32 {
        if self.target == 0 {
            return 1.0;
        }
        self.current as f32 / self.target as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn slimes(target: i32) -> Objective {
        Objective::new(
            Arc::new(ObjectiveDefinition::new("kill_slimes", "Slimes", "{current}/{target}")),
            target,
        )
    }

    #[test]
    fn test_objective_progress() {
        let mut obj = slimes(5);
        assert!(!obj.is_completed());
        assert_eq!(obj.current(), 0);

        assert_eq!(obj.add(3), ObjectiveUpdate::Changed(3));
        assert!(!obj.is_completed());

        assert_eq!(obj.add(2), ObjectiveUpdate::Completed(5));
        assert!(obj.is_completed());

        // Locked after completion
        assert_eq!(obj.add(1), ObjectiveUpdate::Unchanged);
        assert_eq!(obj.remove(4), ObjectiveUpdate::Unchanged);
        assert_eq!(obj.set(0), ObjectiveUpdate::Unchanged);
        assert_eq!(obj.current(), 5);
    }

    #[test]
    fn test_overshoot_and_negative_clamp() {
        let mut obj = slimes(5);
        assert_eq!(obj.remove(10), ObjectiveUpdate::Unchanged);
        assert_eq!(obj.current(), 0);

        assert_eq!(obj.add(-3), ObjectiveUpdate::Unchanged);
        assert_eq!(obj.add(i32::MAX), ObjectiveUpdate::Completed(5));
    }

    #[test]
    fn test_set_crossing_target_completes_once() {
        let mut obj = slimes(3);
        assert_eq!(obj.set(2), ObjectiveUpdate::Changed(2));
        assert_eq!(obj.set(99), ObjectiveUpdate::Completed(3));
        assert_eq!(obj.set(99), ObjectiveUpdate::Unchanged);
    }

    #[test]
    fn test_with_value_clamps() {
        let def = Arc::new(ObjectiveDefinition::new("o", "O", ""));
        assert_eq!(Objective::with_value(def.clone(), 4, 9).current(), 4);
        assert_eq!(Objective::with_value(def, 4, -2).current(), 0);
    }

    #[test]
    fn test_describe() {
        let mut obj = slimes(5);
        obj.add(2);
        assert_eq!(obj.describe(), "2/5");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(i32),
        Remove(i32),
        Set(i32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<i32>().prop_map(Op::Add),
            any::<i32>().prop_map(Op::Remove),
            any::<i32>().prop_map(Op::Set),
        ]
    }

    proptest! {
        #[test]
        fn prop_value_stays_within_bounds(target in 1..1000i32, ops in prop::collection::vec(op(), 0..40)) {
            let mut obj = slimes(target);
            let mut completions = 0;
            for op in ops {
                let update = match op {
                    Op::Add(n) => obj.add(n),
                    Op::Remove(n) => obj.remove(n),
                    Op::Set(n) => obj.set(n),
                };
                if matches!(update, ObjectiveUpdate::Completed(_)) {
                    completions += 1;
                }
                prop_assert!(obj.current() >= 0 && obj.current() <= target);
            }
            prop_assert!(completions <= 1);
            prop_assert_eq!(completions == 1, obj.is_completed());
        }
    }
}
