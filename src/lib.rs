//! Server-authoritative quest progression tracker.
//!
//! [`QuestRegistry`] owns the static quest catalog and every loaded player's
//! live quests. Gameplay code feeds it grants and objective progress; its
//! event surface drives the [`ReplicationHub`], which mirrors each player's
//! state to a [`QuestClient`].

pub mod client;
pub mod config;
pub mod error;
pub mod quest;
pub mod replication;
pub mod signal;

pub use client::QuestClient;
pub use config::QuestConfig;
pub use error::{QuestError, QuestResult};
pub use quest::{
    AcceptType, DeliverType, HookStage, LifeCycle, LifeCycleContext, ObjectiveDefinition, PlayerId,
    PlayerQuestData, QuestDefinition, QuestEvent, QuestProgress, QuestRegistry, QuestStatus, RepeatableType,
};
pub use replication::ReplicationHub;
pub use signal::{Connection, Signal};
