//! Definition Directory Loader
//!
//! Walks a directory tree of TOML files. Every file declares what it holds
//! with a `kind` tag (`quest` or `lifecycle`); one directory must hold a
//! single kind.
//!
//! ```toml
//! kind = "quest"
//! id = "slime_hunt"
//! name = "Slime Hunt"
//!
//! [[objectives]]
//! id = "slime"
//! target = 5
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::definition::{QuestDefinition, RawQuest};
use super::lifecycle::LifeCycle;
use crate::error::{QuestError, QuestResult};

/// Raw lifecycle file: a name and the Lua script implementing its hooks
#[derive(Debug, Clone, Deserialize)]
pub struct RawLifeCycle {
    pub name: String,
    /// Script path, relative to the definition file
    pub script: PathBuf,
}

/// One definition file, discriminated by its `kind` tag
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawDefinition {
    Quest(RawQuest),
    #[serde(rename = "lifecycle")]
    LifeCycle(RawLifeCycle),
}

impl RawDefinition {
    fn kind(&self) -> &'static str {
        match self {
            RawDefinition::Quest(_) => "quest",
            RawDefinition::LifeCycle(_) => "lifecycle",
        }
    }
}

/// Homogeneous result of loading one directory
#[derive(Debug)]
pub enum Definitions {
    Empty,
    Quests(Vec<QuestDefinition>),
    LifeCycles(Vec<LifeCycle>),
}

impl Definitions {
    pub fn kind(&self) -> &'static str {
        match self {
            Definitions::Empty => "no",
            Definitions::Quests(_) => "quest",
            Definitions::LifeCycles(_) => "lifecycle",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Definitions::Empty => 0,
            Definitions::Quests(quests) => quests.len(),
            Definitions::LifeCycles(lifecycles) => lifecycles.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Load every definition under `dir`. Mixing kinds is an error.
pub fn load_directory(dir: &Path) -> QuestResult<Definitions> {
    info!("Loading definitions from {:?}", dir);

    let mut paths = Vec::new();
    collect_toml_files(dir, &mut paths)?;
    paths.sort();

    let mut definitions = Definitions::Empty;
    for path in paths {
        let raw = read_definition(&path)?;
        let found = raw.kind();

        definitions = match (definitions, raw) {
            (Definitions::Empty, RawDefinition::Quest(raw)) => {
                Definitions::Quests(vec![QuestDefinition::from_raw(&raw)?])
            }
            (Definitions::Empty, RawDefinition::LifeCycle(raw)) => {
                Definitions::LifeCycles(vec![load_lifecycle(&path, &raw)?])
            }
            (Definitions::Quests(mut quests), RawDefinition::Quest(raw)) => {
                quests.push(QuestDefinition::from_raw(&raw)?);
                Definitions::Quests(quests)
            }
            (Definitions::LifeCycles(mut lifecycles), RawDefinition::LifeCycle(raw)) => {
                lifecycles.push(load_lifecycle(&path, &raw)?);
                Definitions::LifeCycles(lifecycles)
            }
            (existing, _) => {
                return Err(QuestError::MixedDefinitionKinds {
                    dir: dir.to_path_buf(),
                    path,
                    expected: existing.kind(),
                    found,
                });
            }
        };
    }

    info!("Loaded {} {} definitions from {:?}", definitions.len(), definitions.kind(), dir);
    Ok(definitions)
}

/// Load a directory that must contain quests. A missing directory yields
/// no quests.
pub fn load_quests(dir: &Path) -> QuestResult<Vec<QuestDefinition>> {
    if !dir.exists() {
        warn!("Quest directory does not exist: {:?}", dir);
        return Ok(Vec::new());
    }
    match load_directory(dir)? {
        Definitions::Empty => Ok(Vec::new()),
        Definitions::Quests(quests) => Ok(quests),
        other => Err(QuestError::WrongDefinitionKind {
            dir: dir.to_path_buf(),
            expected: "quest",
            found: other.kind(),
        }),
    }
}

/// Load a directory that must contain lifecycles. A missing directory
/// yields no lifecycles.
pub fn load_lifecycles(dir: &Path) -> QuestResult<Vec<LifeCycle>> {
    if !dir.exists() {
        warn!("Lifecycle directory does not exist: {:?}", dir);
        return Ok(Vec::new());
    }
    match load_directory(dir)? {
        Definitions::Empty => Ok(Vec::new()),
        Definitions::LifeCycles(lifecycles) => Ok(lifecycles),
        other => Err(QuestError::WrongDefinitionKind {
            dir: dir.to_path_buf(),
            expected: "lifecycle",
            found: other.kind(),
        }),
    }
}

/// Recursively collect `.toml` files (non-async to avoid boxing)
fn collect_toml_files(dir: &Path, paths: &mut Vec<PathBuf>) -> QuestResult<()> {
    let entries = std::fs::read_dir(dir).map_err(|source| QuestError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| QuestError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();

        if path.is_dir() {
            collect_toml_files(&path, paths)?;
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }

    Ok(())
}

fn read_definition(path: &Path) -> QuestResult<RawDefinition> {
    let content = std::fs::read_to_string(path).map_err(|source| QuestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: RawDefinition = toml::from_str(&content).map_err(|source| QuestError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Read {} definition {:?}", raw.kind(), path);
    Ok(raw)
}

fn load_lifecycle(path: &Path, raw: &RawLifeCycle) -> QuestResult<LifeCycle> {
    let script_path = path
        .parent()
        .map(|parent| parent.join(&raw.script))
        .unwrap_or_else(|| raw.script.clone());
    let source = std::fs::read_to_string(&script_path).map_err(|source| QuestError::Io {
        path: script_path.clone(),
        source,
    })?;

    let lifecycle = LifeCycle::from_lua(&raw.name, &source, &script_path.display().to_string())?;
    info!("Loaded lifecycle: {} ({:?})", raw.name, script_path);
    Ok(lifecycle)
}
