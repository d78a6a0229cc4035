use tracing::debug;
use uuid::Uuid;

use crate::error::SyncError;
use crate::store::rows::{
    AnswerResult, AnswerRow, AnswerValue, InstanceId, Row, SessionId, TeamId,
};
use crate::store::{CasGuard, CasOutcome, RowFilter, Table};
use crate::sync::{CoreEvent, SharedCore};

/// What happened to a submitted answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// First answer from this team for this instance.
    Accepted,
    /// Replaced the team's earlier, still-ungraded answer.
    Replaced,
    /// The earlier answer was already graded; the submission is rejected.
    AlreadyGraded,
    /// The instance is no longer current.
    Superseded,
}

/// Submit an answer for `(team_id, instance)`.
///
/// At most one answer exists per (team, instance): resubmission upserts
/// while ungraded and is rejected once graded, so duplicates can never
/// accumulate.
pub async fn submit_answer(
    core: &SharedCore,
    session_id: SessionId,
    team_id: TeamId,
    instance: InstanceId,
    value: AnswerValue,
) -> Result<AnswerOutcome, SyncError> {
    let store = core.store();
    let state = store
        .fetch_game_state(session_id)
        .await?
        .ok_or_else(|| SyncError::NotFound(format!("no game state for session `{session_id}`")))?;
    if state.question_instance_id != Some(instance) {
        return Ok(AnswerOutcome::Superseded);
    }

    let existing = find_answer(core, instance, team_id).await?;
    match existing {
        Some(previous) if previous.correct.is_some() => Ok(AnswerOutcome::AlreadyGraded),
        Some(previous) => {
            let replacement = AnswerRow {
                value,
                correct: None,
                awarded: 0,
                ..previous
            };
            store.upsert_row(Row::Answer(replacement)).await?;
            Ok(AnswerOutcome::Replaced)
        }
        None => {
            let row = AnswerRow {
                id: Uuid::new_v4(),
                session_id,
                team_id,
                question_instance_id: instance,
                value,
                correct: None,
                awarded: 0,
            };
            store.insert_row(Row::Answer(row)).await?;
            Ok(AnswerOutcome::Accepted)
        }
    }
}

/// Grade a team's answer for the current instance and apply the score.
///
/// Awards the question's point value on a correct answer and its penalty
/// (negated) otherwise, updates the team score, and publishes the result on
/// the game-state singleton so every client renders the verdict.
pub async fn grade_answer(
    core: &SharedCore,
    session_id: SessionId,
    team_id: TeamId,
    instance: InstanceId,
    correct: bool,
) -> Result<AnswerResult, SyncError> {
    let store = core.store();
    let state = store
        .fetch_game_state(session_id)
        .await?
        .ok_or_else(|| SyncError::NotFound(format!("no game state for session `{session_id}`")))?;
    if state.question_instance_id != Some(instance) {
        return Err(SyncError::InvalidState(
            "question is no longer in play".into(),
        ));
    }
    let Some(question_id) = state.current_question_id else {
        return Err(SyncError::InvalidState("no question in play".into()));
    };

    let answer = find_answer(core, instance, team_id)
        .await?
        .ok_or_else(|| SyncError::NotFound(format!("no answer from team `{team_id}`")))?;
    if answer.correct.is_some() {
        return Err(SyncError::Conflict(format!(
            "answer from team `{team_id}` is already graded"
        )));
    }

    let question = store
        .fetch_rows(Table::Questions, Some(RowFilter::id(question_id)))
        .await?
        .into_iter()
        .next()
        .and_then(Row::into_question)
        .ok_or_else(|| SyncError::NotFound(format!("question `{question_id}` not found")))?;

    let awarded = if correct {
        question.points
    } else {
        -question.penalty
    };

    let graded = AnswerRow {
        correct: Some(correct),
        awarded,
        ..answer
    };
    store.upsert_row(Row::Answer(graded)).await?;

    let mut team = store
        .fetch_rows(Table::Teams, Some(RowFilter::id(team_id)))
        .await?
        .into_iter()
        .next()
        .and_then(Row::into_team)
        .ok_or_else(|| SyncError::NotFound(format!("team `{team_id}` not found")))?;
    team.score += awarded;
    let score = team.score;
    store.upsert_row(Row::Team(team)).await?;

    let result = AnswerResult {
        team_id,
        correct,
        awarded,
    };
    let mut next = state;
    next.last_result = Some(result);
    if let CasOutcome::Conflict { actual } = store
        .put_game_state(next, CasGuard::IfInstanceIs(Some(instance)))
        .await?
    {
        // The score is already applied; only the banner write lost the race.
        debug!(?actual, "state moved before publishing the grade");
    }

    core.events().broadcast(CoreEvent::AnswerGraded {
        session_id,
        team_id,
        correct,
        awarded,
    });
    core.events().broadcast(CoreEvent::ScoreAdjusted {
        session_id,
        team_id,
        score,
    });
    Ok(result)
}

async fn find_answer(
    core: &SharedCore,
    instance: InstanceId,
    team_id: TeamId,
) -> Result<Option<AnswerRow>, SyncError> {
    let rows = core
        .store()
        .fetch_rows(Table::Answers, Some(RowFilter::instance(instance)))
        .await?;
    Ok(rows
        .into_iter()
        .filter_map(Row::into_answer)
        .find(|answer| answer.team_id == team_id))
}
