use std::sync::Arc;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::SyncError;
use crate::store::rows::{
    AnswerRow, BuzzerAttemptRow, FinalRoundRow, GameStateRow, QuestionRow, RoundRow, Row,
    SessionId, TeamRow,
};
use crate::store::{RowFilter, RowStore, Table};

/// A consistent point-in-time aggregate of everything needed to render a
/// session from zero prior client-side state.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Snapshot {
    /// The game-state singleton; names everything else.
    pub game_state: GameStateRow,
    /// All teams of the session.
    pub teams: Vec<TeamRow>,
    /// Round named by the game state, if any.
    pub current_round: Option<RoundRow>,
    /// Question named by the game state, if any.
    pub current_question: Option<QuestionRow>,
    /// Buzzes scoped to the current instance.
    pub buzzers: Vec<BuzzerAttemptRow>,
    /// Answers scoped to the current instance.
    pub answers: Vec<AnswerRow>,
    /// Final-round state, if one is active.
    pub final_round: Option<FinalRoundRow>,
}

/// Fetch a snapshot for `session_id`.
///
/// The game-state row is fetched first — without it there is nothing to
/// scope the rest to, so its failure fails the whole call. The dependent
/// fetches then run concurrently, each gated on whether the game state
/// actually names the entity, and each degrading to an empty slot on
/// failure: a resync with partial data beats no resync.
///
/// With no intervening writes, repeated calls return equivalent data.
pub async fn fetch_snapshot(
    store: &Arc<dyn RowStore>,
    session_id: SessionId,
) -> Result<Snapshot, SyncError> {
    let game_state = store
        .fetch_game_state(session_id)
        .await?
        .ok_or_else(|| SyncError::NotFound(format!("no game state for session `{session_id}`")))?;

    let instance = game_state.question_instance_id;
    let (teams, round, question, buzzers, answers, finals) = tokio::join!(
        rows_or_empty(
            store,
            Table::Teams,
            Some(RowFilter::session(session_id)),
            "teams"
        ),
        single_or_none(store, Table::Rounds, game_state.current_round_id, "round"),
        single_or_none(
            store,
            Table::Questions,
            game_state.current_question_id,
            "question"
        ),
        rows_or_empty(
            store,
            Table::BuzzerAttempts,
            instance.map(RowFilter::instance),
            "buzzers"
        ),
        rows_or_empty(
            store,
            Table::Answers,
            instance.map(RowFilter::instance),
            "answers"
        ),
        rows_or_empty(
            store,
            Table::FinalRounds,
            Some(RowFilter::session(session_id)),
            "final_round"
        ),
    );

    Ok(Snapshot {
        game_state,
        teams: teams.into_iter().filter_map(Row::into_team).collect(),
        current_round: round.and_then(Row::into_round),
        current_question: question.and_then(Row::into_question),
        buzzers: buzzers.into_iter().filter_map(Row::into_attempt).collect(),
        answers: answers.into_iter().filter_map(Row::into_answer).collect(),
        final_round: finals
            .into_iter()
            .filter_map(Row::into_final_round)
            .find(|row| row.active),
    })
}

/// Fetch a dependent slot, degrading to empty when ungated or failing.
async fn rows_or_empty(
    store: &Arc<dyn RowStore>,
    table: Table,
    filter: Option<RowFilter>,
    slot: &str,
) -> Vec<Row> {
    let Some(filter) = filter else {
        return Vec::new();
    };
    match store.fetch_rows(table, Some(filter)).await {
        Ok(rows) => rows,
        Err(err) => {
            warn!(slot, error = %err, "snapshot slot fetch failed; degrading to empty");
            Vec::new()
        }
    }
}

/// Fetch a single row by id, degrading to `None` when ungated or failing.
async fn single_or_none(
    store: &Arc<dyn RowStore>,
    table: Table,
    id: Option<Uuid>,
    slot: &str,
) -> Option<Row> {
    let id = id?;
    match store.fetch_rows(table, Some(RowFilter::id(id))).await {
        Ok(rows) => rows.into_iter().next(),
        Err(err) => {
            warn!(slot, error = %err, "snapshot slot fetch failed; degrading to none");
            None
        }
    }
}
