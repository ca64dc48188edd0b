//! Quest LifeCycle Hooks
//!
//! A lifecycle is a named bundle of optional callbacks. Quests list the
//! lifecycles they want by name and the registry runs the matching hooks at
//! each transition of every instance of those quests.
//!
//! Hooks are either Rust closures or functions from a sandboxed Lua script.

use std::fmt;
use std::sync::Arc;

use mlua::{Function, Lua, Value};
use tracing::{debug, warn};

use super::state::{PlayerId, QuestStatus};
use crate::error::{QuestError, QuestResult};

/// Transition a hook reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    /// Instance created, either granted or restored from a snapshot
    Init,
    /// Quest granted to the player
    Start,
    Complete,
    Deliver,
    ObjectiveChange,
    /// Instance torn down (cancel, unload, reload)
    Destroy,
}

impl HookStage {
    pub const ALL: [HookStage; 6] = [
        HookStage::Init,
        HookStage::Start,
        HookStage::Complete,
        HookStage::Deliver,
        HookStage::ObjectiveChange,
        HookStage::Destroy,
    ];

    /// Global function name a Lua lifecycle script defines for this stage
    pub fn lua_name(&self) -> &'static str {
        match self {
            HookStage::Init => "on_init",
            HookStage::Start => "on_start",
            HookStage::Complete => "on_complete",
            HookStage::Deliver => "on_deliver",
            HookStage::ObjectiveChange => "on_objective_change",
            HookStage::Destroy => "on_destroy",
        }
    }
}

/// What a hook is told about the transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifeCycleContext {
    pub player_id: PlayerId,
    pub quest_id: String,
    pub status: QuestStatus,
    /// Set for objective changes
    pub objective_id: Option<String>,
    pub value: Option<i32>,
}

impl LifeCycleContext {
    pub fn new(player_id: &PlayerId, quest_id: &str, status: QuestStatus) -> Self {
        Self {
            player_id: player_id.clone(),
            quest_id: quest_id.to_string(),
            status,
            objective_id: None,
            value: None,
        }
    }

    pub fn with_objective(mut self, objective_id: &str, value: i32) -> Self {
        self.objective_id = Some(objective_id.to_string());
        self.value = Some(value);
        self
    }
}

pub type Hook = Arc<dyn Fn(&LifeCycleContext) + Send + Sync>;

/// A named set of lifecycle callbacks
#[derive(Clone)]
pub struct LifeCycle {
    name: String,
    on_init: Option<Hook>,
    on_start: Option<Hook>,
    on_complete: Option<Hook>,
    on_deliver: Option<Hook>,
    on_objective_change: Option<Hook>,
    on_destroy: Option<Hook>,
}

impl LifeCycle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_init: None,
            on_start: None,
            on_complete: None,
            on_deliver: None,
            on_objective_change: None,
            on_destroy: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach `hook` to `stage`, replacing any previous one
    pub fn with_hook<F>(mut self, stage: HookStage, hook: F) -> Self
    where
        F: Fn(&LifeCycleContext) + Send + Sync + 'static,
    {
        *self.slot_mut(stage) = Some(Arc::new(hook));
        self
    }

    pub fn on_init<F>(self, hook: F) -> Self
    where
        F: Fn(&LifeCycleContext) + Send + Sync + 'static,
    {
        self.with_hook(HookStage::Init, hook)
    }

    pub fn on_start<F>(self, hook: F) -> Self
    where
        F: Fn(&LifeCycleContext) + Send + Sync + 'static,
    {
        self.with_hook(HookStage::Start, hook)
    }

    pub fn on_complete<F>(self, hook: F) -> Self
    where
        F: Fn(&LifeCycleContext) + Send + Sync + 'static,
    {
        self.with_hook(HookStage::Complete, hook)
    }

    pub fn on_deliver<F>(self, hook: F) -> Self
    where
        F: Fn(&LifeCycleContext) + Send + Sync + 'static,
    {
        self.with_hook(HookStage::Deliver, hook)
    }

    pub fn on_objective_change<F>(self, hook: F) -> Self
    where
        F: Fn(&LifeCycleContext) + Send + Sync + 'static,
    {
        self.with_hook(HookStage::ObjectiveChange, hook)
    }

    pub fn on_destroy<F>(self, hook: F) -> Self
    where
        F: Fn(&LifeCycleContext) + Send + Sync + 'static,
    {
        self.with_hook(HookStage::Destroy, hook)
    }

    fn slot(&self, stage: HookStage) -> &Option<Hook> {
        match stage {
            HookStage::Init => &self.on_init,
            HookStage::Start => &self.on_start,
            HookStage::Complete => &self.on_complete,
            HookStage::Deliver => &self.on_deliver,
            HookStage::ObjectiveChange => &self.on_objective_change,
            HookStage::Destroy => &self.on_destroy,
        }
    }

    fn slot_mut(&mut self, stage: HookStage) -> &mut Option<Hook> {
        match stage {
            HookStage::Init => &mut self.on_init,
            HookStage::Start => &mut self.on_start,
            HookStage::Complete => &mut self.on_complete,
            HookStage::Deliver => &mut self.on_deliver,
            HookStage::ObjectiveChange => &mut self.on_objective_change,
            HookStage::Destroy => &mut self.on_destroy,
        }
    }

    pub fn has_hook(&self, stage: HookStage) -> bool {
        self.slot(stage).is_some()
    }

    /// Run the hook for `stage`; missing hooks are skipped
    pub fn invoke(&self, stage: HookStage, ctx: &LifeCycleContext) {
        if let Some(hook) = self.slot(stage) {
            hook(ctx);
        }
    }

    /// Build a lifecycle whose hooks call the global `on_*` functions that
    /// `source` defines. Stages without a function are left empty.
    pub fn from_lua(name: impl Into<String>, source: &str, chunk_name: &str) -> QuestResult<Self> {
        let name = name.into();
        let lua = sandboxed_lua(source, chunk_name).map_err(|source| QuestError::Script {
            name: name.clone(),
            source,
        })?;

        debug!("Loaded Lua lifecycle '{}' from {}", name, chunk_name);
        Ok(Self::bind_lua(name, lua))
    }

    /// Hook every `on_*` global already defined in `lua`
    fn bind_lua(name: String, lua: Arc<Lua>) -> Self {
        let mut lifecycle = LifeCycle::new(name.clone());
        for stage in HookStage::ALL {
            if lua.globals().get::<Function>(stage.lua_name()).is_err() {
                continue;
            }
            let lua = Arc::clone(&lua);
            let lifecycle_name = name.clone();
            *lifecycle.slot_mut(stage) = Some(Arc::new(move |ctx: &LifeCycleContext| {
                if let Err(e) = call_lua_hook(&lua, stage, ctx) {
                    warn!(
                        "Lifecycle '{}' {} failed for quest {} (player {}): {}",
                        lifecycle_name,
                        stage.lua_name(),
                        ctx.quest_id,
                        ctx.player_id,
                        e
                    );
                }
            }));
        }
        lifecycle
    }
}

impl fmt::Debug for LifeCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooks: Vec<&str> = HookStage::ALL
            .iter()
            .filter(|stage| self.has_hook(**stage))
            .map(|stage| stage.lua_name())
            .collect();
        f.debug_struct("LifeCycle")
            .field("name", &self.name)
            .field("hooks", &hooks)
            .finish()
    }
}

/// Create a Lua state without file, OS or module access and run `source` in it
fn sandboxed_lua(source: &str, chunk_name: &str) -> mlua::Result<Arc<Lua>> {
    let lua = Lua::new();
    {
        let globals = lua.globals();
        globals.set("os", Value::Nil)?;
        globals.set("io", Value::Nil)?;
        globals.set("loadfile", Value::Nil)?;
        globals.set("dofile", Value::Nil)?;
        globals.set("require", Value::Nil)?;
    }
    lua.load(source).set_name(chunk_name).exec()?;
    Ok(Arc::new(lua))
}

fn call_lua_hook(lua: &Lua, stage: HookStage, ctx: &LifeCycleContext) -> mlua::Result<()> {
    let hook: Function = lua.globals().get(stage.lua_name())?;

    let ctx_table = lua.create_table()?;
    ctx_table.set("player_id", ctx.player_id.as_str())?;
    ctx_table.set("quest_id", ctx.quest_id.as_str())?;
    ctx_table.set("status", ctx.status.as_str())?;
    ctx_table.set("objective_id", ctx.objective_id.as_deref())?;
    ctx_table.set("value", ctx.value)?;

    hook.call::<()>(ctx_table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn ctx() -> LifeCycleContext {
        LifeCycleContext::new(&PlayerId::from("p1"), "q1", QuestStatus::InProgress)
    }

    #[test]
    fn test_missing_hooks_are_skipped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let lifecycle = LifeCycle::new("log").on_start(move |c| sink.lock().unwrap().push(c.quest_id.clone()));

        lifecycle.invoke(HookStage::Init, &ctx());
        lifecycle.invoke(HookStage::Start, &ctx());

        assert_eq!(*seen.lock().unwrap(), vec!["q1".to_string()]);
        assert!(lifecycle.has_hook(HookStage::Start));
        assert!(!lifecycle.has_hook(HookStage::Destroy));
    }

    fn lua_lifecycle(name: &str, script: &str) -> (LifeCycle, Arc<Lua>) {
        let lua = sandboxed_lua(script, name).unwrap();
        (LifeCycle::bind_lua(name.to_string(), Arc::clone(&lua)), lua)
    }

    #[test]
    fn test_lua_lifecycle_defines_only_present_hooks() {
        let script = r#"
            calls = {}
            function on_objective_change(ctx)
                table.insert(calls, ctx.quest_id .. ":" .. ctx.objective_id .. "=" .. ctx.value)
            end
        "#;
        let (lifecycle, lua) = lua_lifecycle("counter", script);
        assert!(lifecycle.has_hook(HookStage::ObjectiveChange));
        assert!(!lifecycle.has_hook(HookStage::Init));

        lifecycle.invoke(HookStage::Init, &ctx());
        lifecycle.invoke(HookStage::ObjectiveChange, &ctx().with_objective("slime", 3));
        lifecycle.invoke(HookStage::ObjectiveChange, &ctx().with_objective("slime", 4));

        let calls: Vec<String> = lua.globals().get("calls").unwrap();
        assert_eq!(calls, vec!["q1:slime=3".to_string(), "q1:slime=4".to_string()]);
    }

    #[test]
    fn test_lua_sandbox() {
        let script = r#"
            function on_init(ctx)
                escaped = {
                    os = os ~= nil,
                    io = io ~= nil,
                    require = require ~= nil,
                    dofile = dofile ~= nil,
                    loadfile = loadfile ~= nil,
                }
            end
        "#;
        let (lifecycle, lua) = lua_lifecycle("sandbox", script);
        for global in ["os", "io", "require", "dofile", "loadfile"] {
            assert!(lua.globals().get::<Value>(global).unwrap().is_nil(), "{global} is reachable");
        }

        lifecycle.invoke(HookStage::Init, &ctx());
        let escaped: mlua::Table = lua.globals().get("escaped").unwrap();
        for global in ["os", "io", "require", "dofile", "loadfile"] {
            assert!(!escaped.get::<bool>(global).unwrap(), "{global} is reachable from a hook");
        }
    }

    #[test]
    fn test_lua_runtime_error_is_swallowed() {
        let (lifecycle, lua) = lua_lifecycle("broken", "runs = 0\nfunction on_start(ctx) runs = runs + 1; error('boom') end");
        lifecycle.invoke(HookStage::Start, &ctx());
        lifecycle.invoke(HookStage::Start, &ctx());
        assert_eq!(lua.globals().get::<i64>("runs").unwrap(), 2);
    }

    #[test]
    fn test_lua_syntax_error_is_reported() {
        let err = LifeCycle::from_lua("bad", "function on_start(", "bad.lua").unwrap_err();
        assert!(matches!(err, QuestError::Script { .. }));
    }
}
