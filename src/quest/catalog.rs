//! Static quest catalog
//!
//! Built once by `QuestRegistry::init` and never mutated afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use super::definition::{ObjectiveDefinition, QuestDefinition};
use super::lifecycle::LifeCycle;
use crate::error::{QuestError, QuestResult};

#[derive(Debug, Default)]
pub struct Catalog {
    quests: HashMap<String, Arc<QuestDefinition>>,
    lifecycles: HashMap<String, Arc<LifeCycle>>,
    objectives: HashMap<String, Arc<ObjectiveDefinition>>,
    /// objective id -> ids of quests declaring it
    objective_index: HashMap<String, HashSet<String>>,
    /// quest id -> ids of quests that require it
    dependents: HashMap<String, HashSet<String>>,
}

impl Catalog {
    /// Validate and index the definitions. Duplicate ids and malformed
    /// quests are authoring errors and abort the build.
    pub fn build(quests: Vec<QuestDefinition>, lifecycles: Vec<LifeCycle>) -> QuestResult<Self> {
        let mut catalog = Catalog::default();

        for lifecycle in lifecycles {
            if catalog.lifecycles.contains_key(lifecycle.name()) {
                return Err(QuestError::DuplicateLifeCycle(lifecycle.name().to_string()));
            }
            catalog
                .lifecycles
                .insert(lifecycle.name().to_string(), Arc::new(lifecycle));
        }

        for mut quest in quests {
            if catalog.quests.contains_key(&quest.id) {
                return Err(QuestError::DuplicateQuestId(quest.id));
            }
            quest.validate()?;

            for objective in &mut quest.objectives {
                catalog
                    .objective_index
                    .entry(objective.id().to_string())
                    .or_default()
                    .insert(quest.id.clone());

                match catalog.objectives.get(objective.id()) {
                    Some(existing) => {
                        if **existing != *objective.definition {
                            warn!(
                                "Quest '{}' redefines objective '{}'; keeping the first definition",
                                quest.id,
                                objective.id()
                            );
                        }
                        objective.definition = Arc::clone(existing);
                    }
                    None => {
                        catalog
                            .objectives
                            .insert(objective.id().to_string(), Arc::clone(&objective.definition));
                    }
                }
            }

            for required in &quest.required_quests {
                catalog
                    .dependents
                    .entry(required.clone())
                    .or_default()
                    .insert(quest.id.clone());
            }

            catalog.quests.insert(quest.id.clone(), Arc::new(quest));
        }

        catalog.check_references();
        info!(
            "Registered {} quests, {} lifecycles, {} objectives",
            catalog.quests.len(),
            catalog.lifecycles.len(),
            catalog.objectives.len()
        );
        Ok(catalog)
    }

    /// Warn about dangling references; they are tolerated at runtime
    fn check_references(&self) {
        for quest in self.quests.values() {
            for required in &quest.required_quests {
                if !self.quests.contains_key(required) {
                    warn!(
                        "Quest '{}' requires non-existent quest '{}' and can never be given",
                        quest.id, required
                    );
                }
            }
            for name in &quest.lifecycles {
                if !self.lifecycles.contains_key(name) {
                    warn!("Quest '{}' references non-existent lifecycle '{}'", quest.id, name);
                }
            }
            if quest.availability_start > quest.availability_end {
                warn!(
                    "Quest '{}' window starts after it ends ({} > {}); it will never be available",
                    quest.id, quest.availability_start, quest.availability_end
                );
            }
        }
    }

    pub fn quest(&self, quest_id: &str) -> Option<&Arc<QuestDefinition>> {
        self.quests.get(quest_id)
    }

    pub fn quests(&self) -> impl Iterator<Item = &Arc<QuestDefinition>> {
        self.quests.values()
    }

    pub fn objective(&self, objective_id: &str) -> Option<&Arc<ObjectiveDefinition>> {
        self.objectives.get(objective_id)
    }

    /// Quests that declare `objective_id`
    pub fn quests_with_objective(&self, objective_id: &str) -> impl Iterator<Item = &String> {
        self.objective_index.get(objective_id).into_iter().flatten()
    }

    /// Quests that list `quest_id` as a requirement
    pub fn dependents_of(&self, quest_id: &str) -> impl Iterator<Item = &String> {
        self.dependents.get(quest_id).into_iter().flatten()
    }

    /// Lifecycles a quest subscribes to, skipping unknown names
    pub fn lifecycles_for(&self, quest_id: &str) -> Vec<Arc<LifeCycle>> {
        self.quests
            .get(quest_id)
            .map(|quest| {
                quest
                    .lifecycles
                    .iter()
                    .filter_map(|name| self.lifecycles.get(name).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.quests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quest(id: &str, objective: &str) -> QuestDefinition {
        QuestDefinition::new(id, id).with_objective(ObjectiveDefinition::new(objective, objective, ""), 3)
    }

    #[test]
    fn test_reverse_index() {
        let catalog = Catalog::build(
            vec![quest("a", "slime"), quest("b", "slime"), quest("c", "wolf")],
            vec![],
        )
        .unwrap();

        let mut slime: Vec<_> = catalog.quests_with_objective("slime").cloned().collect();
        slime.sort();
        assert_eq!(slime, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(catalog.quests_with_objective("bat").count(), 0);
    }

    #[test]
    fn test_first_objective_definition_wins() {
        let catalog = Catalog::build(
            vec![
                QuestDefinition::new("a", "A").with_objective(ObjectiveDefinition::new("slime", "Slimes", "first"), 3),
                QuestDefinition::new("b", "B").with_objective(ObjectiveDefinition::new("slime", "Goo", "second"), 7),
            ],
            vec![],
        )
        .unwrap();

        let shared = catalog.objective("slime").unwrap();
        assert_eq!(shared.description, "first");
        let b = catalog.quest("b").unwrap().get_objective("slime").unwrap();
        assert!(Arc::ptr_eq(&b.definition, shared));
        assert_eq!(b.target, 7);
    }

    #[test]
    fn test_duplicates_are_fatal() {
        let err = Catalog::build(vec![quest("a", "x"), quest("a", "y")], vec![]).unwrap_err();
        assert!(matches!(err, QuestError::DuplicateQuestId(id) if id == "a"));

        let err = Catalog::build(vec![], vec![LifeCycle::new("l"), LifeCycle::new("l")]).unwrap_err();
        assert!(matches!(err, QuestError::DuplicateLifeCycle(name) if name == "l"));
    }

    #[test]
    fn test_invalid_quest_is_fatal() {
        let err = Catalog::build(vec![QuestDefinition::new("empty", "Empty")], vec![]).unwrap_err();
        assert!(matches!(err, QuestError::NoObjectives(_)));
    }

    #[test]
    fn test_lifecycles_and_dependents() {
        let catalog = Catalog::build(
            vec![
                quest("intro", "talk").with_lifecycle("announce").with_lifecycle("missing"),
                quest("next", "slime").with_required("intro"),
            ],
            vec![LifeCycle::new("announce")],
        )
        .unwrap();

        let names: Vec<_> = catalog
            .lifecycles_for("intro")
            .iter()
            .map(|l| l.name().to_string())
            .collect();
        assert_eq!(names, vec!["announce".to_string()]);
        assert_eq!(catalog.dependents_of("intro").collect::<Vec<_>>(), vec!["next"]);
    }
}
