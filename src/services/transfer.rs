use std::sync::Arc;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::SyncError;
use crate::store::rows::{
    GameStateRow, QuestionRow, RoundRow, Row, SessionId, SessionRow, TeamRow,
};
use crate::store::{CasGuard, RowFilter, RowStore, Table};

/// JSON aggregate round-tripping a full session verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionExport {
    /// The session row.
    pub session: SessionRow,
    /// All teams.
    pub teams: Vec<TeamRow>,
    /// All rounds.
    pub rounds: Vec<RoundRow>,
    /// All questions of those rounds.
    pub questions: Vec<QuestionRow>,
    /// The game-state singleton, if one exists.
    pub game_state: Option<GameStateRow>,
}

/// Export a session and everything it owns.
pub async fn export_session(
    store: &Arc<dyn RowStore>,
    session_id: SessionId,
) -> Result<SessionExport, SyncError> {
    let session = store
        .fetch_rows(Table::Sessions, Some(RowFilter::id(session_id)))
        .await?
        .into_iter()
        .next()
        .and_then(Row::into_session)
        .ok_or_else(|| SyncError::NotFound(format!("session `{session_id}` not found")))?;

    let teams = store
        .fetch_rows(Table::Teams, Some(RowFilter::session(session_id)))
        .await?
        .into_iter()
        .filter_map(Row::into_team)
        .collect();
    let rounds: Vec<RoundRow> = store
        .fetch_rows(Table::Rounds, Some(RowFilter::session(session_id)))
        .await?
        .into_iter()
        .filter_map(Row::into_round)
        .collect();

    let mut questions = Vec::new();
    for round in &rounds {
        questions.extend(
            store
                .fetch_rows(Table::Questions, Some(RowFilter::round(round.id)))
                .await?
                .into_iter()
                .filter_map(Row::into_question),
        );
    }

    let game_state = store.fetch_game_state(session_id).await?;

    Ok(SessionExport {
        session,
        teams,
        rounds,
        questions,
        game_state,
    })
}

/// Import a previously exported session, validating every row at the
/// boundary before any write happens.
pub async fn import_session(
    store: &Arc<dyn RowStore>,
    export: SessionExport,
) -> Result<SessionId, SyncError> {
    export.session.validate()?;
    for team in &export.teams {
        team.validate()?;
    }
    for round in &export.rounds {
        round.validate()?;
    }
    for question in &export.questions {
        question.validate()?;
    }

    let session_id = export.session.id;
    store.upsert_row(Row::Session(export.session)).await?;
    for team in export.teams {
        store.upsert_row(Row::Team(team)).await?;
    }
    for round in export.rounds {
        store.upsert_row(Row::Round(round)).await?;
    }
    for question in export.questions {
        store.upsert_row(Row::Question(question)).await?;
    }
    if let Some(game_state) = export.game_state {
        store
            .put_game_state(game_state, CasGuard::Unchecked)
            .await?;
    }

    Ok(session_id)
}
