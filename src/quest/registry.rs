//! Quest Registry
//!
//! The authoritative progression engine. Owns the static catalog, the global
//! availability set, the availability schedule and every loaded player's live
//! quest instances.
//!
//! Every mutation runs under the state write lock and collects the hooks and
//! events it caused into an outbox. The outbox is flushed after the lock is
//! released, so listeners and hooks may call back into the registry.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use super::catalog::Catalog;
use super::definition::{AcceptType, QuestDefinition};
use super::events::{QuestEvent, QuestInstanceEvent};
use super::instance::Quest;
use super::lifecycle::{HookStage, LifeCycle, LifeCycleContext};
use super::player::PlayerQuests;
use super::schedule::{AvailabilitySchedule, FlipKind};
use super::state::{Bucket, PlayerId, PlayerQuestData, QuestStatus};
use crate::error::QuestResult;
use crate::signal::Signal;

/// Delay between a player leaving and their state being purged
pub const DEFAULT_UNLOAD_GRACE: StdDuration = StdDuration::from_secs(5);

/// Mutable registry state, guarded by a single lock
#[derive(Debug, Default)]
struct RegistryState {
    players: HashMap<PlayerId, PlayerQuests>,
    /// Quests whose availability window is open
    available: HashSet<String>,
    schedule: AvailabilitySchedule,
}

/// Shared grant rule: the quest's window is open and the player may take it
fn grantable(
    available: &HashSet<String>,
    player: &PlayerQuests,
    definition: &QuestDefinition,
    now: DateTime<Utc>,
) -> bool {
    available.contains(&definition.id) && player.can_give(definition, now)
}

/// An instance event tagged with its owner
#[derive(Debug)]
struct Relayed {
    player_id: PlayerId,
    quest_id: String,
    event: QuestInstanceEvent,
}

#[derive(Debug)]
struct PendingPurge {
    token: u64,
    handle: AbortHandle,
}

/// Player-facing collections whose contents are re-broadcast when changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Collection {
    Available,
    Bucket(Bucket),
}

enum Dispatch {
    Event(QuestEvent),
    Hook(HookStage, LifeCycleContext),
}

/// Work collected under the lock and dispatched after it is released
#[derive(Default)]
struct Outbox {
    dispatches: Vec<Dispatch>,
    touched: Vec<(PlayerId, Collection)>,
}

impl Outbox {
    fn event(&mut self, event: QuestEvent) {
        self.dispatches.push(Dispatch::Event(event));
    }

    fn hook(&mut self, stage: HookStage, ctx: LifeCycleContext) {
        self.dispatches.push(Dispatch::Hook(stage, ctx));
    }

    fn touch(&mut self, player_id: &PlayerId, collection: Collection) {
        if !self
            .touched
            .iter()
            .any(|(id, c)| id == player_id && *c == collection)
        {
            self.touched.push((player_id.clone(), collection));
        }
    }
}

/// Registry for quest definitions and per-player progression
pub struct QuestRegistry {
    catalog: OnceLock<Catalog>,
    state: RwLock<RegistryState>,
    /// Filled by instance listeners, drained after each mutation
    relay: Arc<Mutex<Vec<Relayed>>>,
    events: Signal<QuestEvent>,
    pending_purges: DashMap<PlayerId, PendingPurge>,
    purge_tokens: AtomicU64,
    unload_grace: StdDuration,
}

impl Default for QuestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl QuestRegistry {
    pub fn new() -> Self {
        Self::with_unload_grace(DEFAULT_UNLOAD_GRACE)
    }

    pub fn with_unload_grace(unload_grace: StdDuration) -> Self {
        Self {
            catalog: OnceLock::new(),
            state: RwLock::new(RegistryState::default()),
            relay: Arc::new(Mutex::new(Vec::new())),
            events: Signal::new(),
            pending_purges: DashMap::new(),
            purge_tokens: AtomicU64::new(1),
            unload_grace,
        }
    }

    /// Event surface for replication and UI layers
    pub fn events(&self) -> &Signal<QuestEvent> {
        &self.events
    }

    pub fn catalog(&self) -> Option<&Catalog> {
        self.catalog.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.catalog.get().is_some()
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Register the static definitions. Only the first call has any effect.
    pub async fn init(&self, quests: Vec<QuestDefinition>, lifecycles: Vec<LifeCycle>) -> QuestResult<()> {
        self.init_at(quests, lifecycles, Utc::now()).await
    }

    /// [`init`](Self::init) with an explicit clock, used to plan the
    /// availability schedule
    pub async fn init_at(
        &self,
        quests: Vec<QuestDefinition>,
        lifecycles: Vec<LifeCycle>,
        now: DateTime<Utc>,
    ) -> QuestResult<()> {
        if self.catalog.get().is_some() {
            warn!("Quest registry already initialized, ignoring init");
            return Ok(());
        }

        let catalog = Catalog::build(quests, lifecycles)?;
        let (schedule, open_now) =
            AvailabilitySchedule::plan(catalog.quests().map(|q| &**q), now.timestamp());

        if self.catalog.set(catalog).is_err() {
            warn!("Quest registry already initialized, ignoring init");
            return Ok(());
        }
        let Some(catalog) = self.catalog.get() else {
            return Ok(());
        };

        info!(
            "Quest registry ready: {} open now, {} scheduled flips",
            open_now.len(),
            schedule.len()
        );

        let mut outbox = Outbox::default();
        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            state.schedule = schedule;
            for quest_id in &open_now {
                self.open_quest(state, catalog, quest_id, now, &mut outbox);
            }
            self.settle(state, catalog, &mut outbox);
        }
        self.flush(catalog, outbox);
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn definition(&self, quest_id: &str) -> Option<Arc<QuestDefinition>> {
        self.catalog.get()?.quest(quest_id).cloned()
    }

    /// Whether the quest's availability window is currently open
    pub async fn is_quest_available(&self, quest_id: &str) -> bool {
        self.state.read().await.available.contains(quest_id)
    }

    /// Window open, no blocking live instance and every required quest
    /// delivered. `give_quest` succeeds exactly when this holds.
    pub async fn can_give_quest(&self, player_id: &PlayerId, quest_id: &str) -> bool {
        let Some(definition) = self.definition(quest_id) else {
            return false;
        };
        let state = self.state.read().await;
        state
            .players
            .get(player_id)
            .is_some_and(|player| grantable(&state.available, player, &definition, Utc::now()))
    }

    pub async fn quest_status(&self, player_id: &PlayerId, quest_id: &str) -> QuestStatus {
        self.with_player(player_id, |player| player.status_of(quest_id))
            .await
            .unwrap_or(QuestStatus::NotStarted)
    }

    pub async fn objective_value(&self, player_id: &PlayerId, quest_id: &str, objective_id: &str) -> Option<i32> {
        self.with_player(player_id, |player| {
            player
                .quests
                .get(quest_id)?
                .objective(objective_id)
                .map(|o| o.current())
        })
        .await
        .flatten()
    }

    /// Objective description with its progress substituted in
    pub async fn objective_description(
        &self,
        player_id: &PlayerId,
        quest_id: &str,
        objective_id: &str,
    ) -> Option<String> {
        self.with_player(player_id, |player| {
            player
                .quests
                .get(quest_id)?
                .objective(objective_id)
                .map(|o| o.describe())
        })
        .await
        .flatten()
    }

    /// Quests offered to the player and waiting for a manual grant
    pub async fn available_quests(&self, player_id: &PlayerId) -> Vec<String> {
        self.with_player(player_id, |player| player.available.iter().cloned().collect())
            .await
            .unwrap_or_default()
    }

    pub async fn unavailable_quests(&self, player_id: &PlayerId) -> Vec<String> {
        self.with_player(player_id, |player| player.unavailable.iter().cloned().collect())
            .await
            .unwrap_or_default()
    }

    /// Time until the quest's window opens. Zero if already open, `None` if
    /// it will not open again.
    pub async fn time_for_available(&self, quest_id: &str, now: DateTime<Utc>) -> Option<Duration> {
        let state = self.state.read().await;
        if state.available.contains(quest_id) {
            return Some(Duration::zero());
        }
        state
            .schedule
            .next_flip(quest_id, FlipKind::Available)
            .map(|at| {
                let secs = at.saturating_sub(now.timestamp()).max(0);
                Duration::try_seconds(secs).unwrap_or(Duration::MAX)
            })
    }

    pub async fn time_since_completed(
        &self,
        player_id: &PlayerId,
        quest_id: &str,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        self.with_player(player_id, |player| player.quests.get(quest_id)?.time_since_completed(now))
            .await
            .flatten()
    }

    /// Time until a delivered repeatable may be taken again. `None` if the
    /// quest is not delivered or never repeats.
    pub async fn time_until_repeatable(
        &self,
        player_id: &PlayerId,
        quest_id: &str,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        self.with_player(player_id, |player| {
            let quest = player.quests.get(quest_id)?;
            if quest.status() != QuestStatus::Delivered {
                return None;
            }
            let ready = quest.repeat_ready_at()?;
            Some((ready - now).max(Duration::zero()))
        })
        .await
        .flatten()
    }

    pub async fn completed_count(&self, player_id: &PlayerId, quest_id: &str) -> u32 {
        self.with_player(player_id, |player| {
            player.quests.get(quest_id).map(Quest::completed_count).unwrap_or(0)
        })
        .await
        .unwrap_or(0)
    }

    pub async fn is_player_loaded(&self, player_id: &PlayerId) -> bool {
        self.state.read().await.players.contains_key(player_id)
    }

    /// Snapshot of the player's live quests, `None` if not loaded
    pub async fn get_player_data(&self, player_id: &PlayerId) -> Option<PlayerQuestData> {
        self.with_player(player_id, PlayerQuests::snapshot).await
    }

    async fn with_player<R, F>(&self, player_id: &PlayerId, f: F) -> Option<R>
    where
        F: FnOnce(&PlayerQuests) -> R,
    {
        let state = self.state.read().await;
        state.players.get(player_id).map(f)
    }

    // =========================================================================
    // Quest operations
    // =========================================================================

    /// Grant a quest. Fails for unknown or closed quests, unloaded players,
    /// live instances and missing prerequisites.
    pub async fn give_quest(&self, player_id: &PlayerId, quest_id: &str) -> bool {
        let Some(catalog) = self.catalog.get() else {
            return false;
        };
        let Some(definition) = catalog.quest(quest_id) else {
            debug!("give_quest: unknown quest '{}'", quest_id);
            return false;
        };

        let mut outbox = Outbox::default();
        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let Some(player) = state.players.get_mut(player_id) else {
                debug!("give_quest: player {} not loaded", player_id);
                return false;
            };
            if !grantable(&state.available, player, definition, Utc::now()) {
                debug!("give_quest: '{}' cannot be given to {}", quest_id, player_id);
                return false;
            }
            self.grant(player, player_id, definition, &mut outbox);
            self.settle(state, catalog, &mut outbox);
        }
        self.flush(catalog, outbox);
        true
    }

    /// Add progress to every in-progress quest of the player that tracks
    /// `objective_id`. Returns whether anything changed.
    pub async fn add_objective(&self, player_id: &PlayerId, objective_id: &str, amount: i32) -> bool {
        self.update_objective(player_id, objective_id, |quest| quest.add_objective(objective_id, amount))
            .await
    }

    pub async fn remove_objective(&self, player_id: &PlayerId, objective_id: &str, amount: i32) -> bool {
        self.update_objective(player_id, objective_id, |quest| {
            quest.remove_objective(objective_id, amount)
        })
        .await
    }

    pub async fn set_objective(&self, player_id: &PlayerId, objective_id: &str, value: i32) -> bool {
        self.update_objective(player_id, objective_id, |quest| quest.set_objective(objective_id, value))
            .await
    }

    async fn update_objective<F>(&self, player_id: &PlayerId, objective_id: &str, op: F) -> bool
    where
        F: Fn(&mut Quest) -> bool,
    {
        let Some(catalog) = self.catalog.get() else {
            return false;
        };

        let mut outbox = Outbox::default();
        let changed = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let Some(player) = state.players.get_mut(player_id) else {
                debug!("Objective '{}' update for unloaded player {}", objective_id, player_id);
                return false;
            };

            let mut changed = false;
            for quest_id in catalog.quests_with_objective(objective_id) {
                if let Some(quest) = player.quests.get_mut(quest_id) {
                    if quest.status() == QuestStatus::InProgress {
                        changed |= op(quest);
                    }
                }
            }

            if changed {
                self.settle(state, catalog, &mut outbox);
            }
            changed
        };
        self.flush(catalog, outbox);
        changed
    }

    /// Cancel a live, undelivered quest and drop its instance. Manually
    /// accepted quests are offered again.
    pub async fn cancel_quest(&self, player_id: &PlayerId, quest_id: &str) -> bool {
        let Some(catalog) = self.catalog.get() else {
            return false;
        };

        let mut outbox = Outbox::default();
        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let Some(player) = state.players.get_mut(player_id) else {
                return false;
            };
            let Some(quest) = player.quests.get_mut(quest_id) else {
                return false;
            };
            if !quest.cancel() {
                return false;
            }
            if let Some(mut quest) = player.quests.remove(quest_id) {
                quest.destroy();
            }
            info!("Player {} cancelled quest '{}'", player_id, quest_id);

            self.settle(state, catalog, &mut outbox);
            let manual = catalog
                .quest(quest_id)
                .is_some_and(|q| q.accept_type == AcceptType::Manual);
            if manual {
                self.offer(state, catalog, player_id, quest_id, Utc::now(), &mut outbox);
                self.settle(state, catalog, &mut outbox);
            }
        }
        self.flush(catalog, outbox);
        true
    }

    /// Complete an in-progress quest whose objectives are all done
    pub async fn complete_quest(&self, player_id: &PlayerId, quest_id: &str) -> bool {
        self.transition(player_id, quest_id, Quest::complete).await
    }

    pub async fn deliver_quest(&self, player_id: &PlayerId, quest_id: &str) -> bool {
        self.transition(player_id, quest_id, Quest::deliver).await
    }

    async fn transition<F>(&self, player_id: &PlayerId, quest_id: &str, op: F) -> bool
    where
        F: FnOnce(&mut Quest) -> bool,
    {
        let Some(catalog) = self.catalog.get() else {
            return false;
        };

        let mut outbox = Outbox::default();
        let done = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let Some(quest) = state
                .players
                .get_mut(player_id)
                .and_then(|player| player.quests.get_mut(quest_id))
            else {
                return false;
            };
            let done = op(quest);
            if done {
                self.settle(state, catalog, &mut outbox);
            }
            done
        };
        self.flush(catalog, outbox);
        done
    }

    // =========================================================================
    // Availability
    // =========================================================================

    /// Open a quest globally and offer it to every loaded player. No-op if it
    /// is already open.
    pub async fn quest_became_available(&self, quest_id: &str) {
        let Some(catalog) = self.catalog.get() else {
            return;
        };
        let mut outbox = Outbox::default();
        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            self.open_quest(state, catalog, quest_id, Utc::now(), &mut outbox);
            self.settle(state, catalog, &mut outbox);
        }
        self.flush(catalog, outbox);
    }

    /// Close a quest globally, cancelling every undelivered instance of it
    pub async fn quest_became_unavailable(&self, quest_id: &str) {
        let Some(catalog) = self.catalog.get() else {
            return;
        };
        let mut outbox = Outbox::default();
        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            self.close_quest(state, quest_id, &mut outbox);
            self.settle(state, catalog, &mut outbox);
        }
        self.flush(catalog, outbox);
    }

    /// Apply every availability flip due at `now` and re-offer delivered
    /// repeatables whose cadence has elapsed
    pub async fn process_schedule(&self, now: DateTime<Utc>) {
        let Some(catalog) = self.catalog.get() else {
            return;
        };
        let mut outbox = Outbox::default();
        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;

            for flip in state.schedule.pop_due(now.timestamp()) {
                debug!("Availability flip {:?} for '{}' at {}", flip.kind, flip.quest_id, flip.fire_at);
                match flip.kind {
                    FlipKind::Available => self.open_quest(state, catalog, &flip.quest_id, now, &mut outbox),
                    FlipKind::Unavailable => self.close_quest(state, &flip.quest_id, &mut outbox),
                }
            }

            let rearmed: Vec<(PlayerId, String)> = state
                .players
                .iter()
                .flat_map(|(player_id, player)| {
                    player
                        .quests
                        .values()
                        .filter(move |q| q.can_repeat(now) && !player.available.contains(q.id()))
                        .map(move |q| (player_id.clone(), q.id().to_string()))
                })
                .collect();
            for (player_id, quest_id) in rearmed {
                self.offer(state, catalog, &player_id, &quest_id, now, &mut outbox);
            }

            self.settle(state, catalog, &mut outbox);
        }
        self.flush(catalog, outbox);
    }

    /// Drive [`process_schedule`](Self::process_schedule) on a fixed period
    pub fn spawn_scheduler(self: Arc<Self>, period: StdDuration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                self.process_schedule(Utc::now()).await;
            }
        })
    }

    // =========================================================================
    // Player lifecycle
    // =========================================================================

    /// Build the player's live quests from a stored snapshot (player join)
    pub async fn load_player(&self, player_id: &PlayerId, data: PlayerQuestData) {
        self.reload_player(player_id, data, false).await;
    }

    /// Replace the player's live quests with an externally supplied snapshot
    pub async fn set_player_data(&self, player_id: &PlayerId, data: PlayerQuestData) {
        self.reload_player(player_id, data, true).await;
    }

    async fn reload_player(&self, player_id: &PlayerId, data: PlayerQuestData, replaced: bool) {
        let Some(catalog) = self.catalog.get() else {
            warn!("Player {} loaded before the quest registry was initialized", player_id);
            return;
        };

        let mut outbox = Outbox::default();
        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;

            if let Some((_, pending)) = self.pending_purges.remove(player_id) {
                pending.handle.abort();
                debug!("Player {} rejoined, pending purge cancelled", player_id);
            }
            if let Some(mut previous) = state.players.remove(player_id) {
                destroy_player(&mut previous, player_id, &mut outbox);
            }

            let mut player = PlayerQuests::new();
            for bucket in Bucket::LOAD_ORDER {
                let status = bucket.status();
                for (quest_id, progress) in data.bucket(bucket) {
                    let Some(definition) = catalog.quest(quest_id) else {
                        warn!("Player {} has progress for unknown quest '{}', skipping", player_id, quest_id);
                        continue;
                    };
                    if player.quests.contains_key(quest_id) {
                        warn!("Player {} has quest '{}' in more than one bucket", player_id, quest_id);
                        continue;
                    }
                    let quest = Quest::restore(Arc::clone(definition), status, progress);
                    self.wire(player_id, &quest);
                    outbox.hook(HookStage::Init, LifeCycleContext::new(player_id, quest_id, status));
                    player.quests.insert(quest_id.clone(), quest);
                }
            }
            state.players.insert(player_id.clone(), player);

            let mut open: Vec<String> = state.available.iter().cloned().collect();
            open.sort();
            let now = Utc::now();
            for quest_id in &open {
                self.offer(state, catalog, player_id, quest_id, now, &mut outbox);
            }
            self.settle(state, catalog, &mut outbox);

            let data = state
                .players
                .get(player_id)
                .map(PlayerQuests::snapshot)
                .unwrap_or_default();
            info!("Loaded {} quests for player {}", data.len(), player_id);
            outbox.event(if replaced {
                QuestEvent::PlayerDataChanged {
                    player_id: player_id.clone(),
                    data,
                }
            } else {
                QuestEvent::PlayerFinishedLoading {
                    player_id: player_id.clone(),
                    data,
                }
            });
        }
        self.flush(catalog, outbox);
    }

    /// Schedule the player's state to be purged after the grace window. A
    /// load for the same player before then cancels the purge.
    pub async fn unload_player(self: &Arc<Self>, player_id: &PlayerId) {
        // Held while the purge is registered so the task cannot run first
        let state = self.state.write().await;
        if !state.players.contains_key(player_id) {
            return;
        }

        let token = self.purge_tokens.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(self);
        let target = player_id.clone();
        let grace = self.unload_grace;
        let task = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            registry.purge_if_pending(&target, token).await;
        });

        let pending = PendingPurge {
            token,
            handle: task.abort_handle(),
        };
        if let Some(previous) = self.pending_purges.insert(player_id.clone(), pending) {
            previous.handle.abort();
        }
        drop(state);
        debug!("Player {} left, purge in {:?}", player_id, grace);
    }

    async fn purge_if_pending(&self, player_id: &PlayerId, token: u64) {
        let Some(catalog) = self.catalog.get() else {
            return;
        };
        let mut outbox = Outbox::default();
        {
            let mut guard = self.state.write().await;
            if self
                .pending_purges
                .remove_if(player_id, |_, pending| pending.token == token)
                .is_none()
            {
                return;
            }
            if let Some(mut player) = guard.players.remove(player_id) {
                destroy_player(&mut player, player_id, &mut outbox);
                info!("Purged quest state for player {}", player_id);
            }
        }
        self.flush(catalog, outbox);
    }

    /// Drop the player's state immediately. Returns whether they were loaded.
    pub async fn purge_player(&self, player_id: &PlayerId) -> bool {
        let Some(catalog) = self.catalog.get() else {
            return false;
        };
        let mut outbox = Outbox::default();
        let purged = {
            let mut guard = self.state.write().await;
            if let Some((_, pending)) = self.pending_purges.remove(player_id) {
                pending.handle.abort();
            }
            match guard.players.remove(player_id) {
                Some(mut player) => {
                    destroy_player(&mut player, player_id, &mut outbox);
                    info!("Purged quest state for player {}", player_id);
                    true
                }
                None => false,
            }
        };
        self.flush(catalog, outbox);
        purged
    }

    // =========================================================================
    // Internals (called with the state lock held)
    // =========================================================================

    /// Forward the instance's events into the relay
    fn wire(&self, player_id: &PlayerId, quest: &Quest) {
        let relay = Arc::clone(&self.relay);
        let player_id = player_id.clone();
        let quest_id = quest.id().to_string();
        // The connection stays attached until the instance is destroyed
        let _connection = quest.events().connect(move |event| {
            relay
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Relayed {
                    player_id: player_id.clone(),
                    quest_id: quest_id.clone(),
                    event: event.clone(),
                });
        });
    }

    fn grant(
        &self,
        player: &mut PlayerQuests,
        player_id: &PlayerId,
        definition: &Arc<QuestDefinition>,
        outbox: &mut Outbox,
    ) {
        let quest_id = definition.id.as_str();
        let quest = match player.quests.remove(quest_id) {
            Some(mut previous) => {
                let next = Quest::repeat_of(&previous);
                previous.destroy();
                outbox.touch(player_id, Collection::Bucket(Bucket::Delivered));
                next
            }
            None => Quest::new(Arc::clone(definition)),
        };
        self.wire(player_id, &quest);
        player.quests.insert(quest_id.to_string(), quest);

        if player.available.remove(quest_id) {
            outbox.touch(player_id, Collection::Available);
        }
        player.unavailable.remove(quest_id);

        let ctx = LifeCycleContext::new(player_id, quest_id, QuestStatus::InProgress);
        outbox.hook(HookStage::Init, ctx.clone());
        outbox.hook(HookStage::Start, ctx);
        outbox.event(QuestEvent::QuestStarted {
            player_id: player_id.clone(),
            quest_id: quest_id.to_string(),
        });
        outbox.touch(player_id, Collection::Bucket(Bucket::InProgress));
        info!("Player {} started quest '{}'", player_id, quest_id);
    }

    /// Offer a globally open quest to one player: grant it, list it as
    /// available, or mark it unavailable when it cannot be given
    fn offer(
        &self,
        state: &mut RegistryState,
        catalog: &Catalog,
        player_id: &PlayerId,
        quest_id: &str,
        now: DateTime<Utc>,
        outbox: &mut Outbox,
    ) {
        if !state.available.contains(quest_id) {
            return;
        }
        let Some(definition) = catalog.quest(quest_id) else {
            return;
        };
        let Some(player) = state.players.get_mut(player_id) else {
            return;
        };

        if player.can_give(definition, now) {
            if definition.accept_type == AcceptType::Automatic {
                self.grant(player, player_id, definition, outbox);
            } else if player.available.insert(quest_id.to_string()) {
                player.unavailable.remove(quest_id);
                outbox.event(QuestEvent::QuestAvailable {
                    player_id: player_id.clone(),
                    quest_id: quest_id.to_string(),
                });
                outbox.touch(player_id, Collection::Available);
            }
        } else if !player.quests.contains_key(quest_id) && player.unavailable.insert(quest_id.to_string()) {
            outbox.event(QuestEvent::QuestUnavailable {
                player_id: player_id.clone(),
                quest_id: quest_id.to_string(),
            });
        }
    }

    fn open_quest(
        &self,
        state: &mut RegistryState,
        catalog: &Catalog,
        quest_id: &str,
        now: DateTime<Utc>,
        outbox: &mut Outbox,
    ) {
        if catalog.quest(quest_id).is_none() {
            warn!("Cannot open unknown quest '{}'", quest_id);
            return;
        }
        if !state.available.insert(quest_id.to_string()) {
            return;
        }
        info!("Quest '{}' is now available", quest_id);
        outbox.event(QuestEvent::QuestBecameAvailable {
            quest_id: quest_id.to_string(),
        });

        let mut players: Vec<PlayerId> = state.players.keys().cloned().collect();
        players.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        for player_id in &players {
            self.offer(state, catalog, player_id, quest_id, now, outbox);
        }
    }

    fn close_quest(&self, state: &mut RegistryState, quest_id: &str, outbox: &mut Outbox) {
        if !state.available.contains(quest_id) {
            return;
        }

        for (player_id, player) in state.players.iter_mut() {
            let cancelled = player.quests.get_mut(quest_id).is_some_and(Quest::cancel);
            if cancelled {
                if let Some(mut quest) = player.quests.remove(quest_id) {
                    quest.destroy();
                }
            }
            if player.available.remove(quest_id) {
                outbox.touch(player_id, Collection::Available);
            }
            if !player.quests.contains_key(quest_id) && player.unavailable.insert(quest_id.to_string()) {
                outbox.event(QuestEvent::QuestUnavailable {
                    player_id: player_id.clone(),
                    quest_id: quest_id.to_string(),
                });
            }
        }

        state.available.remove(quest_id);
        info!("Quest '{}' is no longer available", quest_id);
        outbox.event(QuestEvent::QuestBecameUnavailable {
            quest_id: quest_id.to_string(),
        });
    }

    /// Translate relayed instance events into hooks and registry events, then
    /// queue one snapshot event per changed collection
    fn settle(&self, state: &mut RegistryState, catalog: &Catalog, outbox: &mut Outbox) {
        loop {
            let relayed = std::mem::take(&mut *self.relay.lock().unwrap_or_else(PoisonError::into_inner));
            if relayed.is_empty() {
                break;
            }

            for Relayed {
                player_id,
                quest_id,
                event,
            } in relayed
            {
                match event {
                    QuestInstanceEvent::ObjectiveChanged { objective_id, value } => {
                        outbox.hook(
                            HookStage::ObjectiveChange,
                            LifeCycleContext::new(&player_id, &quest_id, QuestStatus::InProgress)
                                .with_objective(&objective_id, value),
                        );
                        outbox.event(QuestEvent::ObjectiveChanged {
                            player_id: player_id.clone(),
                            quest_id,
                            objective_id,
                            value,
                        });
                        outbox.touch(&player_id, Collection::Bucket(Bucket::InProgress));
                    }
                    QuestInstanceEvent::Completed => {
                        info!("Player {} completed quest '{}'", player_id, quest_id);
                        outbox.hook(
                            HookStage::Complete,
                            LifeCycleContext::new(&player_id, &quest_id, QuestStatus::Completed),
                        );
                        outbox.event(QuestEvent::QuestCompleted {
                            player_id: player_id.clone(),
                            quest_id,
                        });
                        outbox.touch(&player_id, Collection::Bucket(Bucket::InProgress));
                        outbox.touch(&player_id, Collection::Bucket(Bucket::Completed));
                    }
                    QuestInstanceEvent::Delivered => {
                        info!("Player {} delivered quest '{}'", player_id, quest_id);
                        outbox.hook(
                            HookStage::Deliver,
                            LifeCycleContext::new(&player_id, &quest_id, QuestStatus::Delivered),
                        );
                        outbox.event(QuestEvent::QuestDelivered {
                            player_id: player_id.clone(),
                            quest_id: quest_id.clone(),
                        });
                        outbox.touch(&player_id, Collection::Bucket(Bucket::Completed));
                        outbox.touch(&player_id, Collection::Bucket(Bucket::Delivered));

                        // Unlock dependents, and the quest itself if it repeats straight away
                        let now = Utc::now();
                        let mut follow_ups: Vec<String> = catalog.dependents_of(&quest_id).cloned().collect();
                        follow_ups.sort();
                        follow_ups.push(quest_id);
                        for follow_up in &follow_ups {
                            self.offer(state, catalog, &player_id, follow_up, now, outbox);
                        }
                    }
                    QuestInstanceEvent::Cancelled { status } => {
                        outbox.hook(HookStage::Destroy, LifeCycleContext::new(&player_id, &quest_id, status));
                        outbox.event(QuestEvent::QuestCancelled {
                            player_id: player_id.clone(),
                            quest_id,
                        });
                        if let Some(bucket) = status.bucket() {
                            outbox.touch(&player_id, Collection::Bucket(bucket));
                        }
                    }
                }
            }
        }

        for (player_id, collection) in std::mem::take(&mut outbox.touched) {
            let Some(player) = state.players.get(&player_id) else {
                continue;
            };
            let event = match collection {
                Collection::Available => QuestEvent::AvailableChanged {
                    quests: player.available.iter().cloned().collect(),
                    player_id,
                },
                Collection::Bucket(Bucket::InProgress) => QuestEvent::InProgressChanged {
                    quests: player.bucket(Bucket::InProgress),
                    player_id,
                },
                Collection::Bucket(Bucket::Completed) => QuestEvent::CompletedChanged {
                    quests: player.bucket(Bucket::Completed),
                    player_id,
                },
                Collection::Bucket(Bucket::Delivered) => QuestEvent::DeliveredChanged {
                    quests: player.bucket(Bucket::Delivered),
                    player_id,
                },
            };
            outbox.event(event);
        }
    }

    /// Fire queued events and lifecycle hooks. Must run without the lock.
    fn flush(&self, catalog: &Catalog, outbox: Outbox) {
        for dispatch in outbox.dispatches {
            match dispatch {
                Dispatch::Event(event) => {
                    debug!("Quest event: {}", event.name());
                    self.events.fire(&event);
                }
                Dispatch::Hook(stage, ctx) => {
                    for lifecycle in catalog.lifecycles_for(&ctx.quest_id) {
                        lifecycle.invoke(stage, &ctx);
                    }
                }
            }
        }
    }
}

/// Tear down every instance of a player, queueing their destroy hooks
fn destroy_player(player: &mut PlayerQuests, player_id: &PlayerId, outbox: &mut Outbox) {
    for (quest_id, status) in player.destroy_all() {
        outbox.hook(HookStage::Destroy, LifeCycleContext::new(player_id, &quest_id, status));
    }
}
