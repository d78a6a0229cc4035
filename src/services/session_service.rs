use std::sync::Arc;
use std::time::SystemTime;

use rand::Rng;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::error::SyncError;
use crate::store::rows::{
    Branding, GameStateRow, QuestionRow, RoundKind, RoundRow, Row, SessionId, SessionRow,
    SessionStatus, TeamId, TeamRow,
};
use crate::store::{CasGuard, RowFilter, RowStore, Table};
use crate::sync::{CoreEvent, SharedCore};

const ACCESS_CODE_LENGTH: usize = 6;
const ACCESS_CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Create a draft session together with its game-state singleton.
pub async fn create_session(
    store: &Arc<dyn RowStore>,
    name: &str,
) -> Result<SessionRow, SyncError> {
    let session = SessionRow {
        id: Uuid::new_v4(),
        name: name.trim().to_string(),
        status: SessionStatus::Draft,
        access_code: generate_access_code(),
        round_ids: Vec::new(),
        branding: Branding::default(),
        created_at: SystemTime::now(),
    };
    session.validate()?;

    store.insert_row(Row::Session(session.clone())).await?;
    store
        .put_game_state(GameStateRow::initial(session.id), CasGuard::Unchecked)
        .await?;

    info!(session_id = %session.id, code = %session.access_code, "session created");
    Ok(session)
}

/// Random join code; the charset avoids easily confused characters.
pub fn generate_access_code() -> String {
    let mut rng = rand::rng();
    (0..ACCESS_CODE_LENGTH)
        .map(|_| {
            let index = rng.random_range(0..ACCESS_CODE_CHARSET.len());
            ACCESS_CODE_CHARSET[index] as char
        })
        .collect()
}

/// Move a session to `Active`, enforcing at most one active session.
pub async fn activate_session(
    store: &Arc<dyn RowStore>,
    session_id: SessionId,
) -> Result<(), SyncError> {
    let sessions = store.fetch_rows(Table::Sessions, None).await?;
    let mut target = None;
    for row in sessions.into_iter().filter_map(Row::into_session) {
        if row.id == session_id {
            target = Some(row);
        } else if row.status == SessionStatus::Active {
            return Err(SyncError::InvalidState(format!(
                "session `{}` is already active",
                row.id
            )));
        }
    }
    let mut session =
        target.ok_or_else(|| SyncError::NotFound(format!("session `{session_id}` not found")))?;
    session.status = SessionStatus::Active;
    store.upsert_row(Row::Session(session)).await?;
    Ok(())
}

/// Move a session to `Ended`.
pub async fn end_session(
    store: &Arc<dyn RowStore>,
    session_id: SessionId,
) -> Result<(), SyncError> {
    let mut session = fetch_session(store, session_id).await?;
    session.status = SessionStatus::Ended;
    store.upsert_row(Row::Session(session)).await?;
    Ok(())
}

/// Register a team in a session.
pub async fn create_team(
    store: &Arc<dyn RowStore>,
    session_id: SessionId,
    name: &str,
    color: &str,
) -> Result<TeamRow, SyncError> {
    let team = TeamRow {
        id: Uuid::new_v4(),
        session_id,
        name: name.trim().to_string(),
        color: color.to_string(),
        score: 0,
        active: true,
        excluded: false,
        last_seen_at: Some(SystemTime::now()),
    };
    team.validate()?;
    store.insert_row(Row::Team(team.clone())).await?;
    Ok(team)
}

/// Append a round to a session.
pub async fn create_round(
    store: &Arc<dyn RowStore>,
    session_id: SessionId,
    title: &str,
    kind: RoundKind,
    timer_secs: u32,
    jingle_url: Option<String>,
) -> Result<RoundRow, SyncError> {
    let round = RoundRow {
        id: Uuid::new_v4(),
        session_id,
        title: title.trim().to_string(),
        kind,
        timer_secs,
        jingle_url,
        question_ids: Vec::new(),
    };
    round.validate()?;
    store.insert_row(Row::Round(round.clone())).await?;

    let mut session = fetch_session(store, session_id).await?;
    session.round_ids.push(round.id);
    store.upsert_row(Row::Session(session)).await?;
    Ok(round)
}

/// Append a question to its round.
pub async fn add_question(
    store: &Arc<dyn RowStore>,
    question: QuestionRow,
) -> Result<QuestionRow, SyncError> {
    question.validate()?;

    let mut round = store
        .fetch_rows(Table::Rounds, Some(RowFilter::id(question.round_id)))
        .await?
        .into_iter()
        .next()
        .and_then(Row::into_round)
        .ok_or_else(|| SyncError::NotFound(format!("round `{}` not found", question.round_id)))?;

    store.insert_row(Row::Question(question.clone())).await?;
    round.question_ids.push(question.id);
    store.upsert_row(Row::Round(round)).await?;
    Ok(question)
}

/// Apply a score delta to a team, returning the new score.
pub async fn apply_score_delta(
    core: &SharedCore,
    session_id: SessionId,
    team_id: TeamId,
    delta: i32,
) -> Result<i32, SyncError> {
    let store = core.store();
    let mut team = store
        .fetch_rows(Table::Teams, Some(RowFilter::id(team_id)))
        .await?
        .into_iter()
        .next()
        .and_then(Row::into_team)
        .ok_or_else(|| SyncError::NotFound(format!("team `{team_id}` not found")))?;

    team.score += delta;
    let score = team.score;
    store.upsert_row(Row::Team(team)).await?;

    core.events().broadcast(CoreEvent::ScoreAdjusted {
        session_id,
        team_id,
        score,
    });
    Ok(score)
}

/// Demo-mode teardown: delete everything the session owns, then the session
/// itself.
pub async fn teardown_session(
    store: &Arc<dyn RowStore>,
    session_id: SessionId,
) -> Result<(), SyncError> {
    let rounds = store
        .fetch_rows(Table::Rounds, Some(RowFilter::session(session_id)))
        .await?;
    for round in rounds.into_iter().filter_map(Row::into_round) {
        store
            .delete_rows(Table::Questions, RowFilter::round(round.id))
            .await?;
    }

    for table in [
        Table::BuzzerAttempts,
        Table::Answers,
        Table::Teams,
        Table::Rounds,
        Table::FinalRounds,
        Table::GameStates,
        Table::Sessions,
    ] {
        store
            .delete_rows(table, RowFilter::session(session_id))
            .await?;
    }

    info!(session_id = %session_id, "session torn down");
    Ok(())
}

async fn fetch_session(
    store: &Arc<dyn RowStore>,
    session_id: SessionId,
) -> Result<SessionRow, SyncError> {
    store
        .fetch_rows(Table::Sessions, Some(RowFilter::id(session_id)))
        .await?
        .into_iter()
        .next()
        .and_then(Row::into_session)
        .ok_or_else(|| SyncError::NotFound(format!("session `{session_id}` not found")))
}
