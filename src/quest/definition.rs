//! Quest Definition Structures
//!
//! Static quest and objective definitions. The `Raw*` forms are what the
//! TOML definition files deserialize into; `from_raw` resolves them into the
//! immutable definitions the registry holds.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{QuestError, QuestResult};

/// Raw quest data as it appears in TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub accept: AcceptType,
    #[serde(default)]
    pub deliver: DeliverType,
    /// One of `non_repeatable`, `daily`, `weekly`, `infinite`, `custom`
    #[serde(default = "default_repeatable")]
    pub repeatable: String,
    /// Cadence for `custom` repeatable quests
    pub repeat_interval_secs: Option<i64>,
    /// Availability window start (epoch seconds)
    #[serde(default)]
    pub start: i64,
    /// Availability window end (epoch seconds)
    #[serde(default)]
    pub end: i64,
    /// Quests that must be delivered first
    #[serde(default)]
    pub requires: Vec<String>,
    /// Lifecycle hook sets to run for this quest
    #[serde(default)]
    pub lifecycles: Vec<String>,
    #[serde(default)]
    pub objectives: Vec<RawObjective>,
}

/// Raw objective as it appears in TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawObjective {
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_target")]
    pub target: i32,
}

fn default_repeatable() -> String {
    "non_repeatable".to_string()
}

fn default_target() -> i32 {
    1
}

// ============================================================================
// Resolved Definitions
// ============================================================================

/// How a quest gets started once it is offered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptType {
    /// Granted as soon as the player qualifies
    Automatic,
    /// Offered; gameplay code decides when to grant
    #[default]
    Manual,
}

/// How a completed quest gets turned in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverType {
    /// Delivered in the same step that completes it
    Automatic,
    #[default]
    Manual,
}

/// Re-completion cadence of a quest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RepeatableType {
    #[default]
    NonRepeatable,
    Daily,
    Weekly,
    /// Can be taken again right after delivery
    Infinite,
    Custom { interval_secs: i64 },
}

impl RepeatableType {
    pub const DAY_SECS: i64 = 24 * 60 * 60;
    pub const WEEK_SECS: i64 = 7 * Self::DAY_SECS;

    pub fn from_raw(quest_id: &str, kind: &str, interval: Option<i64>) -> QuestResult<Self> {
        match kind.to_lowercase().as_str() {
            "non_repeatable" | "none" => Ok(RepeatableType::NonRepeatable),
            "daily" => Ok(RepeatableType::Daily),
            "weekly" => Ok(RepeatableType::Weekly),
            "infinite" => Ok(RepeatableType::Infinite),
            "custom" => Ok(RepeatableType::Custom {
                interval_secs: interval.unwrap_or(0),
            }),
            other => Err(QuestError::InvalidField {
                id: quest_id.to_string(),
                field: "repeatable",
                value: other.to_string(),
            }),
        }
    }

    /// Seconds between a delivery and the next grant, `None` if the quest
    /// never repeats.
    pub fn cooldown_secs(&self) -> Option<i64> {
        match self {
            RepeatableType::NonRepeatable => None,
            RepeatableType::Daily => Some(Self::DAY_SECS),
            RepeatableType::Weekly => Some(Self::WEEK_SECS),
            RepeatableType::Infinite => Some(0),
            RepeatableType::Custom { interval_secs } => Some(*interval_secs),
        }
    }
}

/// A countable sub-goal shared by every quest that declares its id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectiveDefinition {
    pub id: String,
    pub name: String,
    /// Display template; `{current}` and `{target}` are filled in
    pub description: String,
}

impl ObjectiveDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
        }
    }

    pub fn from_raw(raw: &RawObjective) -> Self {
        Self {
            id: raw.id.clone(),
            name: raw.name.clone().unwrap_or_else(|| raw.id.clone()),
            description: raw.description.clone(),
        }
    }

    /// Render the description template for a progress value
    pub fn describe(&self, current: i32, target: i32) -> String {
        self.description
            .replace("{current}", &current.to_string())
            .replace("{target}", &target.to_string())
    }
}

/// An objective as used by one quest: the shared definition plus its target
#[derive(Debug, Clone)]
pub struct QuestObjective {
    pub definition: Arc<ObjectiveDefinition>,
    pub target: i32,
}

impl QuestObjective {
    pub fn id(&self) -> &str {
        &self.definition.id
    }
}

/// A fully resolved quest definition
#[derive(Debug, Clone)]
pub struct QuestDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub accept_type: AcceptType,
    pub deliver_type: DeliverType,
    pub repeatable: RepeatableType,
    pub availability_start: i64,
    pub availability_end: i64,
    pub required_quests: BTreeSet<String>,
    pub lifecycles: BTreeSet<String>,
    /// Objectives in display order
    pub objectives: Vec<QuestObjective>,
}

impl QuestDefinition {
    /// Start a definition with defaults: manual accept and deliver, not
    /// repeatable, always available, no objectives.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            accept_type: AcceptType::default(),
            deliver_type: DeliverType::default(),
            repeatable: RepeatableType::default(),
            availability_start: 0,
            availability_end: 0,
            required_quests: BTreeSet::new(),
            lifecycles: BTreeSet::new(),
            objectives: Vec::new(),
        }
    }

    /// Create a QuestDefinition from raw TOML data
    pub fn from_raw(raw: &RawQuest) -> QuestResult<Self> {
        let repeatable = RepeatableType::from_raw(&raw.id, &raw.repeatable, raw.repeat_interval_secs)?;

        let objectives = raw
            .objectives
            .iter()
            .map(|o| QuestObjective {
                definition: Arc::new(ObjectiveDefinition::from_raw(o)),
                target: o.target,
            })
            .collect();

        Ok(Self {
            id: raw.id.clone(),
            name: raw.name.clone(),
            description: raw.description.clone(),
            accept_type: raw.accept,
            deliver_type: raw.deliver,
            repeatable,
            availability_start: raw.start,
            availability_end: raw.end,
            required_quests: raw.requires.iter().cloned().collect(),
            lifecycles: raw.lifecycles.iter().cloned().collect(),
            objectives,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_accept(mut self, accept_type: AcceptType) -> Self {
        self.accept_type = accept_type;
        self
    }

    pub fn with_deliver(mut self, deliver_type: DeliverType) -> Self {
        self.deliver_type = deliver_type;
        self
    }

    pub fn with_repeatable(mut self, repeatable: RepeatableType) -> Self {
        self.repeatable = repeatable;
        self
    }

    pub fn with_window(mut self, start: i64, end: i64) -> Self {
        self.availability_start = start;
        self.availability_end = end;
        self
    }

    pub fn with_required(mut self, quest_id: impl Into<String>) -> Self {
        self.required_quests.insert(quest_id.into());
        self
    }

    pub fn with_lifecycle(mut self, name: impl Into<String>) -> Self {
        self.lifecycles.insert(name.into());
        self
    }

    pub fn with_objective(mut self, definition: ObjectiveDefinition, target: i32) -> Self {
        self.objectives.push(QuestObjective {
            definition: Arc::new(definition),
            target,
        });
        self
    }

    /// Check the authoring rules a definition must satisfy to be registered
    pub fn validate(&self) -> QuestResult<()> {
        if self.objectives.is_empty() {
            return Err(QuestError::NoObjectives(self.id.clone()));
        }

        let mut seen = BTreeSet::new();
        for objective in &self.objectives {
            if !seen.insert(objective.id()) {
                return Err(QuestError::DuplicateObjective {
                    quest_id: self.id.clone(),
                    objective_id: objective.id().to_string(),
                });
            }
            if objective.target < 1 {
                return Err(QuestError::InvalidTarget {
                    quest_id: self.id.clone(),
                    objective_id: objective.id().to_string(),
                    target: objective.target,
                });
            }
        }

        if let RepeatableType::Custom { interval_secs } = self.repeatable {
            if interval_secs < 1 {
                return Err(QuestError::InvalidRepeatInterval {
                    quest_id: self.id.clone(),
                    interval_secs,
                });
            }
        }

        Ok(())
    }

    /// Get objective by ID
    pub fn get_objective(&self, id: &str) -> Option<&QuestObjective> {
        self.objectives.iter().find(|o| o.id() == id)
    }

    /// Whether the quest opens and closes on a schedule
    pub fn has_time_window(&self) -> bool {
        self.availability_start != self.availability_end
    }

    /// Whether the window admits `now` (epoch seconds). Quests without a
    /// window are always inside it.
    pub fn is_within_window(&self, now: i64) -> bool {
        !self.has_time_window()
            || (self.availability_start <= now && now <= self.availability_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> RawQuest {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn test_from_raw_defaults() {
        let raw = parse(
            r#"
id = "first_hunt"
name = "First Hunt"

[[objectives]]
id = "kill_slime"
description = "Slimes {current}/{target}"
target = 5
"#,
        );
        let quest = QuestDefinition::from_raw(&raw).unwrap();

        assert_eq!(quest.accept_type, AcceptType::Manual);
        assert_eq!(quest.deliver_type, DeliverType::Manual);
        assert_eq!(quest.repeatable, RepeatableType::NonRepeatable);
        assert!(!quest.has_time_window());
        assert_eq!(quest.objectives.len(), 1);
        assert_eq!(quest.objectives[0].definition.name, "kill_slime");
        assert!(quest.validate().is_ok());
    }

    #[test]
    fn test_repeatable_parsing() {
        assert_eq!(RepeatableType::from_raw("q", "daily", None).unwrap(), RepeatableType::Daily);
        assert_eq!(
            RepeatableType::from_raw("q", "custom", Some(90)).unwrap(),
            RepeatableType::Custom { interval_secs: 90 }
        );
        assert!(RepeatableType::from_raw("q", "hourly", None).is_err());
    }

    #[test]
    fn test_accept_and_deliver_parsing() {
        let raw = parse(
            r#"
id = "auto"
name = "Auto"
accept = "automatic"
deliver = "automatic"
"#,
        );
        let quest = QuestDefinition::from_raw(&raw).unwrap();
        assert_eq!(quest.accept_type, AcceptType::Automatic);
        assert_eq!(quest.deliver_type, DeliverType::Automatic);
    }

    #[test]
    fn test_validate_rejects_bad_definitions() {
        let empty = QuestDefinition::new("empty", "Empty");
        assert!(matches!(empty.validate(), Err(QuestError::NoObjectives(_))));

        let obj = ObjectiveDefinition::new("o", "O", "");
        let dup = QuestDefinition::new("dup", "Dup")
            .with_objective(obj.clone(), 1)
            .with_objective(obj.clone(), 2);
        assert!(matches!(dup.validate(), Err(QuestError::DuplicateObjective { .. })));

        let zero = QuestDefinition::new("zero", "Zero").with_objective(obj.clone(), 0);
        assert!(matches!(zero.validate(), Err(QuestError::InvalidTarget { .. })));

        let custom = QuestDefinition::new("custom", "Custom")
            .with_objective(obj, 1)
            .with_repeatable(RepeatableType::Custom { interval_secs: 0 });
        assert!(matches!(custom.validate(), Err(QuestError::InvalidRepeatInterval { .. })));
    }

    #[test]
    fn test_time_window() {
        let always = QuestDefinition::new("a", "A").with_window(0, 0);
        assert!(always.is_within_window(1_700_000_000));

        let event = QuestDefinition::new("e", "E").with_window(100, 200);
        assert!(event.has_time_window());
        assert!(!event.is_within_window(99));
        assert!(event.is_within_window(100));
        assert!(event.is_within_window(200));
        assert!(!event.is_within_window(201));
    }

    #[test]
    fn test_describe_template() {
        let obj = ObjectiveDefinition::new("slime", "Slimes", "Defeat slimes ({current}/{target})");
        assert_eq!(obj.describe(3, 5), "Defeat slimes (3/5)");
    }
}
