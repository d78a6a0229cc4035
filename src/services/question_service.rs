use uuid::Uuid;

use crate::error::SyncError;
use crate::services::purge_service;
use crate::store::rows::{
    InstanceId, QuestionId, QuestionRow, RoundId, RoundKind, RoundRow, Row, SessionId, TeamId,
    TimerState,
};
use crate::store::{CasGuard, CasOutcome, RowFilter, Table};
use crate::sync::{CoreEvent, SharedCore};

/// Activate a question under a freshly minted instance.
///
/// The transition runs in the order the whole system's correctness depends
/// on: the previous instance's transient rows are purged to completion
/// first, and only then does the game-state row move. The state write is
/// guarded on the previous instance id, so when two operators race the
/// second writer's stale update is rejected instead of silently clobbering.
pub async fn activate_question(
    core: &SharedCore,
    session_id: SessionId,
    round_id: RoundId,
    question_id: QuestionId,
) -> Result<InstanceId, SyncError> {
    let _gate = core.transition_gate().lock().await;
    let store = core.store();

    let state = store
        .fetch_game_state(session_id)
        .await?
        .ok_or_else(|| SyncError::NotFound(format!("no game state for session `{session_id}`")))?;

    let round = fetch_round(core, round_id).await?;
    let question = fetch_question(core, question_id).await?;
    if question.round_id != round_id {
        return Err(SyncError::InvalidInput(format!(
            "question `{question_id}` does not belong to round `{round_id}`"
        )));
    }

    let previous = state.question_instance_id;
    if let Some(old_instance) = previous {
        // Awaited to completion before the state row moves; a purge failure
        // aborts the transition.
        purge_service::purge_volatile(&store, session_id, old_instance).await?;
    }

    let instance = Uuid::new_v4();
    let mut next = state;
    next.current_round_id = Some(round_id);
    next.current_question_id = Some(question_id);
    next.question_instance_id = Some(instance);
    next.buzzer_armed = matches!(question.kind, RoundKind::BlindTest);
    next.timer = TimerState {
        remaining_secs: round.timer_secs,
        running: false,
    };
    next.excluded_team_ids.clear();
    next.last_result = None;

    match store
        .put_game_state(next, CasGuard::IfInstanceIs(previous))
        .await?
    {
        CasOutcome::Applied { .. } => {}
        CasOutcome::Conflict { actual } => {
            return Err(SyncError::Conflict(format!(
                "question transition raced: state already moved to {actual:?}"
            )));
        }
    }

    core.with_resolver(|resolver| resolver.begin(instance)).await;
    core.events().broadcast(CoreEvent::QuestionActivated {
        session_id,
        question_id,
        question_instance_id: instance,
    });
    Ok(instance)
}

/// Operator "unlock buzzer": discard the recorded attempts for the current
/// instance and reopen the race.
pub async fn unlock_buzzer(core: &SharedCore, session_id: SessionId) -> Result<(), SyncError> {
    let store = core.store();
    let state = store
        .fetch_game_state(session_id)
        .await?
        .ok_or_else(|| SyncError::NotFound(format!("no game state for session `{session_id}`")))?;
    let Some(instance) = state.question_instance_id else {
        return Err(SyncError::InvalidState("no question in play".into()));
    };

    store
        .delete_rows(Table::BuzzerAttempts, RowFilter::instance(instance))
        .await?;

    let mut next = state;
    next.buzzer_armed = true;
    next.last_result = None;
    match store
        .put_game_state(next, CasGuard::IfInstanceIs(Some(instance)))
        .await?
    {
        CasOutcome::Applied { .. } => {}
        CasOutcome::Conflict { actual } => {
            return Err(SyncError::Conflict(format!(
                "state moved to {actual:?} while unlocking"
            )));
        }
    }

    core.with_resolver(|resolver| resolver.reset(instance)).await;
    core.events().broadcast(CoreEvent::BuzzerUnlocked {
        session_id,
        question_instance_id: instance,
    });
    Ok(())
}

/// Arm or disarm the buzzer for the current question.
pub async fn set_buzzer_armed(
    core: &SharedCore,
    session_id: SessionId,
    armed: bool,
) -> Result<(), SyncError> {
    update_current_state(core, session_id, |state| state.buzzer_armed = armed).await
}

/// Update the countdown shown on every client.
pub async fn set_timer(
    core: &SharedCore,
    session_id: SessionId,
    remaining_secs: u32,
    running: bool,
) -> Result<(), SyncError> {
    update_current_state(core, session_id, |state| {
        state.timer = TimerState {
            remaining_secs,
            running,
        }
    })
    .await
}

/// Add or remove a team from the current question's exclusion list.
pub async fn exclude_team(
    core: &SharedCore,
    session_id: SessionId,
    team_id: TeamId,
    excluded: bool,
) -> Result<(), SyncError> {
    update_current_state(core, session_id, |state| {
        if excluded {
            if !state.excluded_team_ids.contains(&team_id) {
                state.excluded_team_ids.push(team_id);
            }
        } else {
            state.excluded_team_ids.retain(|id| *id != team_id);
        }
    })
    .await
}

/// Read-modify-write of the game state, guarded on the current instance so
/// a concurrent question transition wins over this update.
async fn update_current_state(
    core: &SharedCore,
    session_id: SessionId,
    mutate: impl FnOnce(&mut crate::store::rows::GameStateRow),
) -> Result<(), SyncError> {
    let store = core.store();
    let state = store
        .fetch_game_state(session_id)
        .await?
        .ok_or_else(|| SyncError::NotFound(format!("no game state for session `{session_id}`")))?;

    let instance = state.question_instance_id;
    let mut next = state;
    mutate(&mut next);

    match store
        .put_game_state(next, CasGuard::IfInstanceIs(instance))
        .await?
    {
        CasOutcome::Applied { .. } => Ok(()),
        CasOutcome::Conflict { actual } => Err(SyncError::Conflict(format!(
            "game state moved to {actual:?} during update"
        ))),
    }
}

async fn fetch_round(core: &SharedCore, round_id: RoundId) -> Result<RoundRow, SyncError> {
    core.store()
        .fetch_rows(Table::Rounds, Some(RowFilter::id(round_id)))
        .await?
        .into_iter()
        .next()
        .and_then(Row::into_round)
        .ok_or_else(|| SyncError::NotFound(format!("round `{round_id}` not found")))
}

async fn fetch_question(
    core: &SharedCore,
    question_id: QuestionId,
) -> Result<QuestionRow, SyncError> {
    core.store()
        .fetch_rows(Table::Questions, Some(RowFilter::id(question_id)))
        .await?
        .into_iter()
        .next()
        .and_then(Row::into_question)
        .ok_or_else(|| SyncError::NotFound(format!("question `{question_id}` not found")))
}
