//! The synchronization core: registry, race resolver, presence, and the
//! per-client view reducer, bundled behind a constructor-injected holder.

pub mod events;
pub mod presence;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod view;

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::services::snapshot_service;
use crate::store::rows::{Row, SessionId};
use crate::store::{ChangeEvent, ChangeKind, RowStore, StreamSelector, Table};

pub use self::events::{CoreEvent, EventHub};
pub use self::presence::{ClientRole, PresenceKey, PresencePing, PresenceTracker, presence_channel};
pub use self::registry::{
    ChangeCallback, ChannelGuard, ChannelRegistry, ConnectionHealth, ReconnectListener, SelectorFn,
};
pub use self::resolver::{BuzzRaceResolver, FirstBuzz, RecordOutcome};
pub use self::retry::RetryPolicy;
pub use self::view::SessionView;

/// Shared handle to the core; cloning bumps the inner [`Arc`].
pub type SharedCore = Arc<SyncCore>;

/// Central state holder wiring the store, registry, resolver, presence map,
/// and the local session view together.
///
/// Everything is constructor-injected so multiple cores (one per client
/// role, or per test) can run in the same process without shared globals.
pub struct SyncCore {
    config: SyncConfig,
    store: Arc<dyn RowStore>,
    registry: ChannelRegistry,
    resolver: RwLock<BuzzRaceResolver>,
    presence: PresenceTracker,
    view: RwLock<Option<SessionView>>,
    events: EventHub,
    transition_gate: Mutex<()>,
}

impl SyncCore {
    /// Build a core over the given store and configuration.
    pub fn new(store: Arc<dyn RowStore>, config: SyncConfig) -> SharedCore {
        let registry = ChannelRegistry::new(
            store.clone(),
            config.retry,
            config.stabilization_delay,
        );
        Arc::new(Self {
            presence: PresenceTracker::new(config.presence_ttl),
            registry,
            config,
            store,
            resolver: RwLock::new(BuzzRaceResolver::new()),
            view: RwLock::new(None),
            events: EventHub::new(16),
            transition_gate: Mutex::new(()),
        })
    }

    /// Handle to the backend store.
    pub fn store(&self) -> Arc<dyn RowStore> {
        self.store.clone()
    }

    /// Runtime configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Channel registry owning this core's subscriptions.
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// In-memory presence map.
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Hub the presentation layer subscribes to.
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Gate serializing local question transitions.
    pub fn transition_gate(&self) -> &Mutex<()> {
        &self.transition_gate
    }

    /// Run a closure against the race resolver.
    pub async fn with_resolver<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut BuzzRaceResolver) -> T,
    {
        let mut resolver = self.resolver.write().await;
        f(&mut resolver)
    }

    /// Run a closure against the local view, if a session is attached.
    pub async fn read_view<F, T>(&self, f: F) -> T
    where
        F: FnOnce(Option<&SessionView>) -> T,
    {
        let guard = self.view.read().await;
        f(guard.as_ref())
    }

    /// Session currently attached, if any.
    pub async fn attached_session(&self) -> Option<SessionId> {
        self.read_view(|view| view.map(|view| view.session_id)).await
    }

    /// Attach this core to a session: subscribe the standard channel set,
    /// start the apply loop and liveness sweep, and perform the initial
    /// snapshot resync.
    ///
    /// The returned handle tears all of it down on drop. A core attaches to
    /// one session at a time.
    pub async fn attach(self: &Arc<Self>, session_id: SessionId) -> Result<SessionHandle, SyncError> {
        {
            let mut view = self.view.write().await;
            *view = Some(SessionView::new(session_id));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<ChangeEvent>();
        let mut guards = Vec::new();

        let tables = [
            (Table::GameStates, "game_state"),
            (Table::Teams, "teams"),
            (Table::BuzzerAttempts, "buzzer_attempts"),
            (Table::Answers, "answers"),
            (Table::FinalRounds, "final_rounds"),
        ];
        for (table, label) in tables {
            let tx = tx.clone();
            let callback: ChangeCallback = Arc::new(move |event| {
                let _ = tx.send(event);
            });
            let selector: SelectorFn =
                Arc::new(move || StreamSelector::session_table(table, session_id));
            guards.push(
                self.registry
                    .subscribe(format!("{label}:{session_id}"), selector, callback),
            );
        }

        let presence_tx = tx.clone();
        let presence_callback: ChangeCallback = Arc::new(move |event| {
            let _ = presence_tx.send(event);
        });
        let presence_selector: SelectorFn = Arc::new(move || StreamSelector::Broadcast {
            channel: presence_channel(session_id),
        });
        guards.push(self.registry.subscribe(
            presence_channel(session_id),
            presence_selector,
            presence_callback,
        ));

        // Single apply loop: change events are merged one at a time, which
        // is the cooperative scheduling model the rest of the core assumes.
        let core = Arc::clone(self);
        let apply_task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                core.apply_change(event).await;
            }
        });

        let weak = Arc::downgrade(self);
        self.registry.on_reconnect(Arc::new(move || {
            let Some(core) = weak.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                if let Err(err) = core.resync().await {
                    warn!(error = %err, "resync after reconnect failed");
                }
            });
        }));

        let liveness_task = self.spawn_liveness();

        self.resync().await?;

        Ok(SessionHandle {
            guards,
            apply_task,
            liveness_task,
        })
    }

    /// Fetch a fresh snapshot and apply it to the local view.
    ///
    /// The recovery path after a cold start, a reload, or a mass reconnect;
    /// steady-state updates never go through here. Stale snapshots (older
    /// than the view's game-state version) are discarded.
    pub async fn resync(&self) -> Result<(), SyncError> {
        let session_id = self.attached_session().await.ok_or_else(|| {
            SyncError::InvalidState("cannot resync without an attached session".into())
        })?;

        let snapshot = snapshot_service::fetch_snapshot(&self.store(), session_id).await?;

        let mut view_guard = self.view.write().await;
        let Some(view) = view_guard.as_mut() else {
            return Ok(());
        };
        if !view.apply_snapshot(&snapshot) {
            debug!(session_id = %session_id, "stale snapshot discarded");
            return Ok(());
        }

        // Rebuild the race latch so the winner announced before a disconnect
        // stays latched and is never re-emitted.
        if let Some(instance) = snapshot.game_state.question_instance_id {
            let excluded: HashSet<_> = snapshot
                .game_state
                .excluded_team_ids
                .iter()
                .copied()
                .collect();
            let mut resolver = self.resolver.write().await;
            if let Some(first) = resolver.rehydrate(instance, &snapshot.buzzers, &excluded) {
                view.set_first(first.team_id);
            }
        }
        let version = snapshot.game_state.version;
        drop(view_guard);

        self.events.broadcast(CoreEvent::SnapshotApplied {
            session_id,
            version,
        });
        Ok(())
    }

    /// Publish a presence heartbeat for this client and mark it locally.
    pub async fn announce_presence(&self, role: ClientRole, id: uuid::Uuid) -> Result<(), SyncError> {
        let session_id = self.attached_session().await.ok_or_else(|| {
            SyncError::InvalidState("cannot announce presence without a session".into())
        })?;

        let ping = PresencePing { role, id };
        let payload = serde_json::to_value(&ping)
            .map_err(|err| SyncError::InvalidInput(format!("presence ping: {err}")))?;
        self.store
            .publish(&presence_channel(session_id), payload)
            .await?;
        self.presence.mark_seen(PresenceKey { role, id });
        Ok(())
    }

    /// Route the OS "app foregrounded" signal into a full reconnect.
    pub async fn notify_foregrounded(&self) {
        self.registry.notify_foregrounded().await;
    }

    /// Merge one change event into the local view and race bookkeeping.
    pub async fn apply_change(&self, event: ChangeEvent) {
        match &event {
            ChangeEvent::Broadcast { channel, payload } => {
                if channel.starts_with("presence:") {
                    match serde_json::from_value::<PresencePing>(payload.clone()) {
                        Ok(ping) => self.presence.mark_seen(PresenceKey {
                            role: ping.role,
                            id: ping.id,
                        }),
                        Err(err) => {
                            warn!(channel = %channel, error = %err, "malformed presence ping")
                        }
                    }
                } else {
                    debug!(channel = %channel, "ignoring broadcast on unknown channel");
                }
                return;
            }
            ChangeEvent::Row { row, .. } => {
                // Rows are validated where they cross into the core.
                if let Err(err) = row.validate_boundary() {
                    warn!(error = %err, "dropping invalid row from change feed");
                    return;
                }
            }
        }

        let mut view_guard = self.view.write().await;
        let Some(view) = view_guard.as_mut() else {
            return;
        };
        view.apply_change(&event);

        // Remote attempts reach this client only through the feed; run them
        // through the resolver so every role announces the same winner.
        if let ChangeEvent::Row {
            kind: ChangeKind::Insert,
            row: Row::Attempt(attempt),
            ..
        } = &event
        {
            let instance = attempt.question_instance_id;
            if view.current_instance() != Some(instance) {
                return;
            }
            let excluded = view.excluded_team_ids();
            let mut resolver = self.resolver.write().await;
            resolver.ensure(instance);
            let outcome =
                resolver.record(instance, attempt.team_id, attempt.seq, attempt.server_ts);
            let newly_locked = if outcome == RecordOutcome::Recorded {
                resolver.evaluate(instance, &excluded)
            } else {
                None
            };
            // The race may have been locked by the local write path before
            // this echo arrived; the view marks the winner either way.
            if let Some(winner) = resolver.winner(instance) {
                view.set_first(winner.team_id);
            }
            if let Some(first) = newly_locked {
                self.events.broadcast(CoreEvent::FirstBuzz(first));
            }
        }
    }

    fn spawn_liveness(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let interval = self.config.liveness_interval;
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                let Some(core) = weak.upgrade() else {
                    break;
                };
                if core.registry.has_dead_channel() {
                    warn!("liveness sweep found a dead channel; reconnecting all");
                    core.registry.reconnect_all().await;
                }
            }
        })
    }
}

/// Scoped handle for an attached session.
///
/// Dropping it unregisters every channel and stops the apply loop and
/// liveness sweep, so a detaching client cannot leak background work.
pub struct SessionHandle {
    guards: Vec<ChannelGuard>,
    apply_task: JoinHandle<()>,
    liveness_task: JoinHandle<()>,
}

impl SessionHandle {
    /// Number of channels this attachment registered.
    pub fn channel_count(&self) -> usize {
        self.guards.iter().filter(|guard| guard.is_active()).count()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.apply_task.abort();
        self.liveness_task.abort();
    }
}
