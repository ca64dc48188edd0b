//! Quest System Module
//!
//! Static quest definitions (TOML), lifecycle hooks (Rust closures or Lua),
//! per-player progression and time-windowed availability.

pub mod catalog;
pub mod definition;
pub mod events;
pub mod instance;
pub mod lifecycle;
pub mod loader;
pub mod objective;
pub mod player;
pub mod registry;
pub mod schedule;
pub mod state;

pub use catalog::Catalog;
pub use definition::{AcceptType, DeliverType, ObjectiveDefinition, QuestDefinition, QuestObjective, RepeatableType};
pub use events::{QuestEvent, QuestInstanceEvent};
pub use instance::Quest;
pub use lifecycle::{HookStage, LifeCycle, LifeCycleContext};
pub use loader::{load_directory, load_lifecycles, load_quests, Definitions};
pub use objective::Objective;
pub use registry::{QuestRegistry, DEFAULT_UNLOAD_GRACE};
pub use state::{Bucket, PlayerId, PlayerQuestData, QuestProgress, QuestStatus};
