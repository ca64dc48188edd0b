//! Error types for the quest tracker.
//!
//! Runtime quest operations report failure with plain `bool` results; the
//! errors here are reserved for authoring mistakes caught at startup and for
//! I/O or codec failures at the crate's edges.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for quest tracker operations.
pub type QuestResult<T> = Result<T, QuestError>;

/// Errors raised while loading definitions, registering them, or moving
/// data across the replication boundary.
#[derive(Debug, Error)]
pub enum QuestError {
    /// Two quest definitions share an id.
    #[error("duplicate quest id '{0}'")]
    DuplicateQuestId(String),

    /// Two lifecycle hook sets share a name.
    #[error("duplicate lifecycle name '{0}'")]
    DuplicateLifeCycle(String),

    /// A quest declares the same objective twice.
    #[error("quest '{quest_id}' declares objective '{objective_id}' more than once")]
    DuplicateObjective {
        quest_id: String,
        objective_id: String,
    },

    /// A quest has nothing to track.
    #[error("quest '{0}' has no objectives")]
    NoObjectives(String),

    /// Objective targets must be at least 1.
    #[error("quest '{quest_id}' objective '{objective_id}' has invalid target {target}")]
    InvalidTarget {
        quest_id: String,
        objective_id: String,
        target: i32,
    },

    /// Custom repeat cadence must be positive.
    #[error("quest '{quest_id}' has invalid repeat interval {interval_secs}s")]
    InvalidRepeatInterval { quest_id: String, interval_secs: i64 },

    /// A definition field holds an unrecognised value.
    #[error("invalid value '{value}' for field '{field}' in '{id}'")]
    InvalidField {
        id: String,
        field: &'static str,
        value: String,
    },

    /// A definition directory mixes quest and lifecycle files.
    #[error("definition directory {dir:?} mixes kinds: expected {expected}, found {found} in {path:?}")]
    MixedDefinitionKinds {
        dir: PathBuf,
        path: PathBuf,
        expected: &'static str,
        found: &'static str,
    },

    /// A typed load found the other kind of definition.
    #[error("definition directory {dir:?} holds {found} definitions, expected {expected}")]
    WrongDefinitionKind {
        dir: PathBuf,
        expected: &'static str,
        found: &'static str,
    },

    /// Reading a definition or config file failed.
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A definition or config file is not valid TOML for its schema.
    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The configuration file is not valid TOML for `QuestConfig`.
    #[error("invalid configuration {path:?}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A lifecycle script failed to load.
    #[error("lifecycle script '{name}' failed: {source}")]
    Script {
        name: String,
        #[source]
        source: mlua::Error,
    },

    /// A replication frame could not be encoded.
    #[error("failed to encode replication frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// A replication frame could not be decoded.
    #[error("failed to decode replication frame: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// A snapshot could not be converted to or from JSON.
    #[error("snapshot serialization failed: {0}")]
    Snapshot(#[from] serde_json::Error),
}
