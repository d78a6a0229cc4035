//! End-to-end flows over the in-memory backend: buzz races, purging on
//! question transitions, answer grading, and snapshot behavior.

mod common;

use std::time::SystemTime;

use uuid::Uuid;

use showsync::config::SyncConfig;
use showsync::error::SyncError;
use showsync::services::{
    answer_service::{self, AnswerOutcome},
    buzz_service, question_service, session_service, snapshot_service, transfer,
};
use showsync::store::rows::{AnswerValue, BuzzerAttemptRow, GameStateRow, Row};
use showsync::store::{CasGuard, CasOutcome, RowFilter, Table};
use showsync::sync::{CoreEvent, RecordOutcome, SyncCore};

use common::{fixture, settle};

fn remote_attempt(
    session_id: Uuid,
    question_id: Uuid,
    instance: Uuid,
    team_id: Uuid,
) -> BuzzerAttemptRow {
    BuzzerAttemptRow {
        id: Uuid::new_v4(),
        session_id,
        team_id,
        question_id,
        question_instance_id: instance,
        seq: 0,
        server_ts: SystemTime::UNIX_EPOCH,
    }
}

#[tokio::test]
async fn first_buzz_wins_and_later_buzz_is_late() {
    let fx = fixture(2, 1).await;
    let core = SyncCore::new(fx.store.clone(), SyncConfig::default());
    let mut events = core.events().subscribe();

    let instance =
        question_service::activate_question(&core, fx.session_id, fx.round_id, fx.question_ids[0])
            .await
            .unwrap();

    let first = buzz_service::record_attempt(&core, fx.session_id, fx.team_ids[0], instance)
        .await
        .unwrap();
    assert_eq!(first.outcome, RecordOutcome::Recorded);
    assert_eq!(
        first.first.as_ref().map(|f| f.team_id),
        Some(fx.team_ids[0])
    );

    let second = buzz_service::record_attempt(&core, fx.session_id, fx.team_ids[1], instance)
        .await
        .unwrap();
    assert_eq!(second.outcome, RecordOutcome::Late);
    assert!(second.first.is_none());

    // The winner is disarmed into the game state for every client to see.
    let state = fx
        .store
        .fetch_game_state(fx.session_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!state.buzzer_armed);

    // Exactly one announcement went out.
    let mut announcements = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, CoreEvent::FirstBuzz(_)) {
            announcements += 1;
        }
    }
    assert_eq!(announcements, 1);
}

#[tokio::test]
async fn team_excluded_after_submission_cannot_win() {
    let fx = fixture(2, 1).await;
    let core = SyncCore::new(fx.store.clone(), SyncConfig::default());
    let _handle = core.attach(fx.session_id).await.unwrap();

    let instance =
        question_service::activate_question(&core, fx.session_id, fx.round_id, fx.question_ids[0])
            .await
            .unwrap();

    // The exclusion lands first, then a remote client that did not know
    // about it writes its attempt directly.
    question_service::exclude_team(&core, fx.session_id, fx.team_ids[0], true)
        .await
        .unwrap();
    fx.store
        .insert_row(Row::Attempt(remote_attempt(
            fx.session_id,
            fx.question_ids[0],
            instance,
            fx.team_ids[0],
        )))
        .await
        .unwrap();
    settle().await;

    // The excluded team's earlier attempt must not have locked the race.
    let locked = core
        .with_resolver(|resolver| resolver.is_locked(instance))
        .await;
    assert!(!locked);

    let receipt = buzz_service::record_attempt(&core, fx.session_id, fx.team_ids[1], instance)
        .await
        .unwrap();
    assert_eq!(
        receipt.first.as_ref().map(|f| f.team_id),
        Some(fx.team_ids[1])
    );
}

#[tokio::test]
async fn excluded_team_is_rejected_at_submission() {
    let fx = fixture(2, 1).await;
    let core = SyncCore::new(fx.store.clone(), SyncConfig::default());

    let instance =
        question_service::activate_question(&core, fx.session_id, fx.round_id, fx.question_ids[0])
            .await
            .unwrap();
    question_service::exclude_team(&core, fx.session_id, fx.team_ids[0], true)
        .await
        .unwrap();

    let receipt = buzz_service::record_attempt(&core, fx.session_id, fx.team_ids[0], instance)
        .await
        .unwrap();
    assert_eq!(receipt.outcome, RecordOutcome::Excluded);

    // No junk row was written for the rejected attempt.
    let rows = fx
        .store
        .fetch_rows(Table::BuzzerAttempts, Some(RowFilter::instance(instance)))
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn advancing_purges_previous_instance_and_ignores_stragglers() {
    let fx = fixture(3, 2).await;
    let core = SyncCore::new(fx.store.clone(), SyncConfig::default());

    let instance_a =
        question_service::activate_question(&core, fx.session_id, fx.round_id, fx.question_ids[0])
            .await
            .unwrap();

    // Three buzzes and two answers land for the first instance.
    buzz_service::record_attempt(&core, fx.session_id, fx.team_ids[0], instance_a)
        .await
        .unwrap();
    for &team in &fx.team_ids[1..] {
        fx.store
            .insert_row(Row::Attempt(remote_attempt(
                fx.session_id,
                fx.question_ids[0],
                instance_a,
                team,
            )))
            .await
            .unwrap();
    }
    for &team in &fx.team_ids[..2] {
        answer_service::submit_answer(
            &core,
            fx.session_id,
            team,
            instance_a,
            AnswerValue::Text("guess".into()),
        )
        .await
        .unwrap();
    }

    let instance_b =
        question_service::activate_question(&core, fx.session_id, fx.round_id, fx.question_ids[1])
            .await
            .unwrap();

    // All five transient rows scoped to the old instance are gone.
    let old_buzzes = fx
        .store
        .fetch_rows(Table::BuzzerAttempts, Some(RowFilter::instance(instance_a)))
        .await
        .unwrap();
    let old_answers = fx
        .store
        .fetch_rows(Table::Answers, Some(RowFilter::instance(instance_a)))
        .await
        .unwrap();
    assert!(old_buzzes.is_empty());
    assert!(old_answers.is_empty());

    // A straggler buzz for the superseded instance is rejected by the write
    // path and never shows in a snapshot scoped to the new instance.
    let receipt = buzz_service::record_attempt(&core, fx.session_id, fx.team_ids[2], instance_a)
        .await
        .unwrap();
    assert_eq!(receipt.outcome, RecordOutcome::Superseded);

    fx.store
        .insert_row(Row::Attempt(remote_attempt(
            fx.session_id,
            fx.question_ids[0],
            instance_a,
            fx.team_ids[2],
        )))
        .await
        .unwrap();
    let snapshot = snapshot_service::fetch_snapshot(&fx.store, fx.session_id)
        .await
        .unwrap();
    assert_eq!(snapshot.game_state.question_instance_id, Some(instance_b));
    assert!(snapshot.buzzers.is_empty());
}

#[tokio::test]
async fn stale_writer_loses_the_state_race() {
    let fx = fixture(1, 1).await;
    let core = SyncCore::new(fx.store.clone(), SyncConfig::default());

    let instance =
        question_service::activate_question(&core, fx.session_id, fx.round_id, fx.question_ids[0])
            .await
            .unwrap();

    // A second operator acting on a pre-activation read must become a no-op.
    let mut stale = GameStateRow::initial(fx.session_id);
    stale.question_instance_id = Some(Uuid::new_v4());
    let outcome = fx
        .store
        .put_game_state(stale, CasGuard::IfInstanceIs(None))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CasOutcome::Conflict {
            actual: Some(instance)
        }
    );

    let state = fx
        .store
        .fetch_game_state(fx.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.question_instance_id, Some(instance));
}

#[tokio::test]
async fn unlock_discards_attempts_and_reopens_the_race() {
    let fx = fixture(2, 1).await;
    let core = SyncCore::new(fx.store.clone(), SyncConfig::default());

    let instance =
        question_service::activate_question(&core, fx.session_id, fx.round_id, fx.question_ids[0])
            .await
            .unwrap();
    buzz_service::record_attempt(&core, fx.session_id, fx.team_ids[0], instance)
        .await
        .unwrap();

    question_service::unlock_buzzer(&core, fx.session_id).await.unwrap();

    let rows = fx
        .store
        .fetch_rows(Table::BuzzerAttempts, Some(RowFilter::instance(instance)))
        .await
        .unwrap();
    assert!(rows.is_empty());

    let receipt = buzz_service::record_attempt(&core, fx.session_id, fx.team_ids[1], instance)
        .await
        .unwrap();
    assert_eq!(
        receipt.first.as_ref().map(|f| f.team_id),
        Some(fx.team_ids[1])
    );
}

#[tokio::test]
async fn answers_are_upserted_until_graded() {
    let fx = fixture(2, 1).await;
    let core = SyncCore::new(fx.store.clone(), SyncConfig::default());
    let team = fx.team_ids[0];

    let instance =
        question_service::activate_question(&core, fx.session_id, fx.round_id, fx.question_ids[0])
            .await
            .unwrap();

    let outcome =
        answer_service::submit_answer(&core, fx.session_id, team, instance, AnswerValue::Choice(2))
            .await
            .unwrap();
    assert_eq!(outcome, AnswerOutcome::Accepted);

    let outcome = answer_service::submit_answer(
        &core,
        fx.session_id,
        team,
        instance,
        AnswerValue::Text("final answer".into()),
    )
    .await
    .unwrap();
    assert_eq!(outcome, AnswerOutcome::Replaced);

    // Still exactly one answer row for (team, instance).
    let rows = fx
        .store
        .fetch_rows(Table::Answers, Some(RowFilter::instance(instance)))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    let result = answer_service::grade_answer(&core, fx.session_id, team, instance, true)
        .await
        .unwrap();
    assert_eq!(result.awarded, 10);

    let outcome = answer_service::submit_answer(
        &core,
        fx.session_id,
        team,
        instance,
        AnswerValue::Text("too late".into()),
    )
    .await
    .unwrap();
    assert_eq!(outcome, AnswerOutcome::AlreadyGraded);

    let err = answer_service::grade_answer(&core, fx.session_id, team, instance, false)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Conflict(_)));
}

#[tokio::test]
async fn grading_applies_points_and_penalties_to_scores() {
    let fx = fixture(2, 1).await;
    let core = SyncCore::new(fx.store.clone(), SyncConfig::default());

    let instance =
        question_service::activate_question(&core, fx.session_id, fx.round_id, fx.question_ids[0])
            .await
            .unwrap();

    for &team in &fx.team_ids {
        answer_service::submit_answer(
            &core,
            fx.session_id,
            team,
            instance,
            AnswerValue::Text("guess".into()),
        )
        .await
        .unwrap();
    }

    answer_service::grade_answer(&core, fx.session_id, fx.team_ids[0], instance, true)
        .await
        .unwrap();
    answer_service::grade_answer(&core, fx.session_id, fx.team_ids[1], instance, false)
        .await
        .unwrap();

    let snapshot = snapshot_service::fetch_snapshot(&fx.store, fx.session_id)
        .await
        .unwrap();
    let score_of = |team: Uuid| {
        snapshot
            .teams
            .iter()
            .find(|row| row.id == team)
            .map(|row| row.score)
            .unwrap()
    };
    assert_eq!(score_of(fx.team_ids[0]), 10);
    assert_eq!(score_of(fx.team_ids[1]), -5);

    assert_eq!(
        snapshot.game_state.last_result.map(|r| r.awarded),
        Some(-5)
    );
}

#[tokio::test]
async fn snapshots_are_idempotent_without_writes() {
    let fx = fixture(2, 1).await;
    let core = SyncCore::new(fx.store.clone(), SyncConfig::default());

    let instance =
        question_service::activate_question(&core, fx.session_id, fx.round_id, fx.question_ids[0])
            .await
            .unwrap();
    buzz_service::record_attempt(&core, fx.session_id, fx.team_ids[0], instance)
        .await
        .unwrap();
    answer_service::submit_answer(
        &core,
        fx.session_id,
        fx.team_ids[0],
        instance,
        AnswerValue::Text("guess".into()),
    )
    .await
    .unwrap();

    let first = snapshot_service::fetch_snapshot(&fx.store, fx.session_id)
        .await
        .unwrap();
    let second = snapshot_service::fetch_snapshot(&fx.store, fx.session_id)
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn snapshot_gates_unset_entities_instead_of_erroring() {
    let fx = fixture(1, 1).await;

    // Nothing activated yet: no round, question, or transients to fetch.
    let snapshot = snapshot_service::fetch_snapshot(&fx.store, fx.session_id)
        .await
        .unwrap();
    assert!(snapshot.current_round.is_none());
    assert!(snapshot.current_question.is_none());
    assert!(snapshot.buzzers.is_empty());
    assert!(snapshot.answers.is_empty());
    assert!(snapshot.final_round.is_none());
}

#[tokio::test]
async fn session_export_round_trips_through_json() {
    let fx = fixture(2, 2).await;

    let export = transfer::export_session(&fx.store, fx.session_id)
        .await
        .unwrap();
    let json = serde_json::to_string(&export).unwrap();
    let parsed: transfer::SessionExport = serde_json::from_str(&json).unwrap();
    assert_eq!(export, parsed);

    // Import into a fresh store and export again: identical apart from the
    // server-assigned game-state version.
    let target: std::sync::Arc<dyn showsync::store::RowStore> =
        std::sync::Arc::new(showsync::store::memory::MemoryStore::new());
    let imported_id = transfer::import_session(&target, parsed).await.unwrap();
    assert_eq!(imported_id, fx.session_id);

    let reexport = transfer::export_session(&target, fx.session_id)
        .await
        .unwrap();
    assert_eq!(export.session, reexport.session);
    assert_eq!(export.teams, reexport.teams);
    assert_eq!(export.rounds, reexport.rounds);
    assert_eq!(export.questions, reexport.questions);

    let normalize = |state: Option<GameStateRow>| {
        state.map(|mut row| {
            row.version = 0;
            row
        })
    };
    assert_eq!(normalize(export.game_state), normalize(reexport.game_state));
}

#[tokio::test]
async fn teardown_deletes_everything_the_session_owns() {
    let fx = fixture(2, 2).await;
    let core = SyncCore::new(fx.store.clone(), SyncConfig::default());

    let instance =
        question_service::activate_question(&core, fx.session_id, fx.round_id, fx.question_ids[0])
            .await
            .unwrap();
    buzz_service::record_attempt(&core, fx.session_id, fx.team_ids[0], instance)
        .await
        .unwrap();

    session_service::teardown_session(&fx.store, fx.session_id)
        .await
        .unwrap();

    for table in [
        Table::Teams,
        Table::Rounds,
        Table::BuzzerAttempts,
        Table::Answers,
        Table::Sessions,
        Table::GameStates,
    ] {
        let rows = fx
            .store
            .fetch_rows(table, Some(RowFilter::session(fx.session_id)))
            .await
            .unwrap();
        assert!(rows.is_empty(), "{table:?} not cleaned up");
    }
    assert!(
        fx.store
            .fetch_game_state(fx.session_id)
            .await
            .unwrap()
            .is_none()
    );
}
