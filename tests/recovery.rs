//! Recovery paths: reconnect/resync completeness, subscription retry and
//! liveness, presence TTL, and failure-injection degradation.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use uuid::Uuid;

use showsync::config::SyncConfig;
use showsync::error::SyncError;
use showsync::services::{buzz_service, question_service, session_service, snapshot_service};
use showsync::store::memory::MemoryStore;
use showsync::store::rows::SessionId;
use showsync::store::{ChangeEvent, RowFilter, RowStore, StreamSelector, Table};
use showsync::sync::{
    ChangeCallback, ChannelRegistry, ClientRole, ConnectionHealth, PresenceKey, RecordOutcome,
    RetryPolicy, SelectorFn, SyncCore,
};

use common::{FlakyStore, fixture, settle};

fn quick_config() -> SyncConfig {
    SyncConfig {
        stabilization_delay: Duration::from_millis(100),
        liveness_interval: Duration::from_secs(5),
        ..SyncConfig::default()
    }
}

fn noop_selector(session_id: SessionId) -> SelectorFn {
    Arc::new(move || StreamSelector::session_table(Table::Teams, session_id))
}

fn noop_callback() -> ChangeCallback {
    Arc::new(|_event: ChangeEvent| {})
}

#[tokio::test(start_paused = true)]
async fn reattached_client_reconstructs_live_state() {
    let fx = fixture(2, 2).await;
    let control = SyncCore::new(fx.store.clone(), quick_config());
    let screen = SyncCore::new(fx.store.clone(), quick_config());

    let _control_handle = control.attach(fx.session_id).await.unwrap();
    let screen_handle = screen.attach(fx.session_id).await.unwrap();
    assert_eq!(screen_handle.channel_count(), 6);

    question_service::activate_question(&control, fx.session_id, fx.round_id, fx.question_ids[0])
        .await
        .unwrap();
    settle().await;

    // The screen goes away; the game moves on without it.
    drop(screen_handle);
    let instance_b = question_service::activate_question(
        &control,
        fx.session_id,
        fx.round_id,
        fx.question_ids[1],
    )
    .await
    .unwrap();
    let receipt = buzz_service::record_attempt(&control, fx.session_id, fx.team_ids[0], instance_b)
        .await
        .unwrap();
    assert!(receipt.first.is_some());
    settle().await;

    // On re-attach the snapshot alone must reconstruct what live clients saw.
    let _screen_handle = screen.attach(fx.session_id).await.unwrap();
    settle().await;

    let (control_view, screen_view) = (
        control.read_view(|view| view.cloned()).await.unwrap(),
        screen.read_view(|view| view.cloned()).await.unwrap(),
    );
    assert_eq!(screen_view.current_instance(), Some(instance_b));
    assert_eq!(screen_view.game_state, control_view.game_state);
    assert_eq!(screen_view.buzzes, control_view.buzzes);
    assert!(screen_view.buzzes.iter().any(|b| b.is_first));

    // The rebuilt latch keeps rejecting late buzzes after the reconnect.
    let receipt = buzz_service::record_attempt(&screen, fx.session_id, fx.team_ids[1], instance_b)
        .await
        .unwrap();
    assert_eq!(receipt.outcome, RecordOutcome::Late);
}

#[tokio::test(start_paused = true)]
async fn foreground_regain_triggers_reconnect_and_resync() {
    let fx = fixture(1, 1).await;
    let core = SyncCore::new(fx.store.clone(), quick_config());
    let _handle = core.attach(fx.session_id).await.unwrap();
    let mut events = core.events().subscribe();
    while events.try_recv().is_ok() {}

    core.notify_foregrounded().await;
    settle().await;

    let mut resynced = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, showsync::sync::CoreEvent::SnapshotApplied { .. }) {
            resynced = true;
        }
    }
    assert!(resynced, "foreground regain must force a snapshot resync");
    assert!(!core.registry().has_dead_channel());
}

#[tokio::test]
async fn duplicate_channel_registration_is_idempotent() {
    let store: Arc<dyn RowStore> = Arc::new(MemoryStore::new());
    let registry = ChannelRegistry::new(store, RetryPolicy::default(), Duration::from_millis(10));
    let session_id = Uuid::new_v4();

    let first = registry.subscribe("teams", noop_selector(session_id), noop_callback());
    let second = registry.subscribe("teams", noop_selector(session_id), noop_callback());

    assert!(first.is_active());
    assert!(!second.is_active());
    assert_eq!(registry.channel_count(), 1);

    // Dropping the duplicate guard must not tear down the real channel.
    drop(second);
    assert_eq!(registry.channel_count(), 1);
    drop(first);
    assert_eq!(registry.channel_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn subscription_establishment_backs_off_then_gives_up() {
    let flaky = FlakyStore::new();
    flaky.fail_subscribe.store(true, Ordering::SeqCst);
    let store: Arc<dyn RowStore> = flaky.clone();

    let policy = RetryPolicy {
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        max_attempts: 3,
    };
    let registry = ChannelRegistry::new(store, policy, Duration::from_millis(10));
    let mut health = registry.health_watcher();

    let _guard = registry.subscribe("teams", noop_selector(Uuid::new_v4()), noop_callback());
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(flaky.subscribe_attempts.load(Ordering::SeqCst), 3);
    assert_eq!(*health.borrow_and_update(), ConnectionHealth::Disconnected);
    assert!(registry.has_dead_channel());
}

#[tokio::test(start_paused = true)]
async fn liveness_sweep_revives_dead_feeds() {
    let fx = fixture(1, 1).await;
    fx.flaky.empty_feeds.store(true, Ordering::SeqCst);

    let core = SyncCore::new(fx.store.clone(), quick_config());
    let _handle = core.attach(fx.session_id).await.unwrap();
    settle().await;
    assert!(core.registry().has_dead_channel());

    // The backend recovers; the next sweep re-establishes every channel.
    fx.flaky.empty_feeds.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(6)).await;
    settle().await;
    assert!(!core.registry().has_dead_channel());

    // Revived feeds actually pump: a new team reaches the local view.
    let team = session_service::create_team(&fx.store, fx.session_id, "Latecomers", "#123456")
        .await
        .unwrap();
    settle().await;
    let seen = core
        .read_view(|view| view.is_some_and(|v| v.teams.contains_key(&team.id)))
        .await;
    assert!(seen);
}

#[tokio::test(start_paused = true)]
async fn presence_expires_during_a_disconnect_gap() {
    let fx = fixture(1, 1).await;
    let core = SyncCore::new(fx.store.clone(), quick_config());
    let _handle = core.attach(fx.session_id).await.unwrap();

    let team = fx.team_ids[0];
    let key = PresenceKey {
        role: ClientRole::Team,
        id: team,
    };

    core.announce_presence(ClientRole::Team, team).await.unwrap();
    assert!(core.presence().is_online(&key));

    // 20s of silence exceeds the 12s TTL.
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!core.presence().is_online(&key));

    // Back online after the next heartbeat, and the snapshot fetched on
    // reconnect reflects current state.
    core.announce_presence(ClientRole::Team, team).await.unwrap();
    assert!(core.presence().is_online(&key));

    let snapshot = snapshot_service::fetch_snapshot(&fx.store, fx.session_id)
        .await
        .unwrap();
    let stored = fx
        .store
        .fetch_game_state(fx.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.game_state, stored);
}

#[tokio::test]
async fn purge_failure_blocks_the_question_transition() {
    let fx = fixture(1, 2).await;
    let core = SyncCore::new(fx.store.clone(), SyncConfig::default());

    let instance_a =
        question_service::activate_question(&core, fx.session_id, fx.round_id, fx.question_ids[0])
            .await
            .unwrap();
    buzz_service::record_attempt(&core, fx.session_id, fx.team_ids[0], instance_a)
        .await
        .unwrap();

    fx.flaky.fail_deletes.store(true, Ordering::SeqCst);
    let err =
        question_service::activate_question(&core, fx.session_id, fx.round_id, fx.question_ids[1])
            .await
            .unwrap_err();
    assert!(matches!(err, SyncError::Unavailable(_)));

    // The state row must not have moved and the old rows must still exist.
    let state = fx
        .store
        .fetch_game_state(fx.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.question_instance_id, Some(instance_a));
    assert_eq!(state.current_question_id, Some(fx.question_ids[0]));

    fx.flaky.fail_deletes.store(false, Ordering::SeqCst);
    let rows = fx
        .store
        .fetch_rows(
            Table::BuzzerAttempts,
            Some(RowFilter::instance(instance_a)),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    // The retried transition succeeds and purges.
    question_service::activate_question(&core, fx.session_id, fx.round_id, fx.question_ids[1])
        .await
        .unwrap();
    let rows = fx
        .store
        .fetch_rows(
            Table::BuzzerAttempts,
            Some(RowFilter::instance(instance_a)),
        )
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn snapshot_degrades_dependent_slots_but_requires_game_state() {
    let fx = fixture(2, 1).await;
    let core = SyncCore::new(fx.store.clone(), SyncConfig::default());

    let instance =
        question_service::activate_question(&core, fx.session_id, fx.round_id, fx.question_ids[0])
            .await
            .unwrap();
    buzz_service::record_attempt(&core, fx.session_id, fx.team_ids[0], instance)
        .await
        .unwrap();

    // Dependent fetches fail: the snapshot degrades to empty slots.
    fx.flaky.fail_fetch_rows.store(true, Ordering::SeqCst);
    let snapshot = snapshot_service::fetch_snapshot(&fx.store, fx.session_id)
        .await
        .unwrap();
    assert_eq!(snapshot.game_state.question_instance_id, Some(instance));
    assert!(snapshot.teams.is_empty());
    assert!(snapshot.buzzers.is_empty());
    assert!(snapshot.current_question.is_none());
    fx.flaky.fail_fetch_rows.store(false, Ordering::SeqCst);

    // The game state itself failing fails the whole snapshot.
    fx.flaky.fail_game_state.store(true, Ordering::SeqCst);
    let err = snapshot_service::fetch_snapshot(&fx.store, fx.session_id)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Unavailable(_)));
}
