use std::sync::Arc;

use tracing::debug;

use crate::error::SyncError;
use crate::store::rows::{InstanceId, SessionId};
use crate::store::{CasGuard, CasOutcome, RowFilter, RowStore, Table};

/// Counts of transient rows removed by a purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeReport {
    /// Buzzer attempts removed.
    pub buzzer_attempts: u64,
    /// Answers removed.
    pub answers: u64,
}

/// Delete every buzzer attempt and answer scoped to exactly this
/// (session, question-instance) pair.
///
/// Deletion is scoped by instance id, never by question id: replays of the
/// same question must not purge a sibling instance's rows. Callers that are
/// about to advance the game state MUST await this to completion first and
/// treat a failure as fatal to the transition — otherwise a late write for
/// the old instance can land after the purge and survive into the next
/// question's view.
pub async fn purge_volatile(
    store: &Arc<dyn RowStore>,
    session_id: SessionId,
    instance: InstanceId,
) -> Result<PurgeReport, SyncError> {
    let buzzer_attempts = store
        .delete_rows(Table::BuzzerAttempts, RowFilter::instance(instance))
        .await?;
    let answers = store
        .delete_rows(Table::Answers, RowFilter::instance(instance))
        .await?;

    debug!(
        session_id = %session_id,
        instance = %instance,
        buzzer_attempts,
        answers,
        "purged transient rows"
    );
    Ok(PurgeReport {
        buzzer_attempts,
        answers,
    })
}

/// Clear the transient fields of the game-state singleton: the exclusion
/// list, the last answer result, and the buzzer/timer flags.
pub async fn reset_game_state(
    store: &Arc<dyn RowStore>,
    session_id: SessionId,
) -> Result<u64, SyncError> {
    let mut state = store
        .fetch_game_state(session_id)
        .await?
        .ok_or_else(|| SyncError::NotFound(format!("no game state for session `{session_id}`")))?;

    state.excluded_team_ids.clear();
    state.last_result = None;
    state.buzzer_armed = false;
    state.timer.running = false;

    match store.put_game_state(state, CasGuard::Unchecked).await? {
        CasOutcome::Applied { version } => Ok(version),
        CasOutcome::Conflict { actual } => Err(SyncError::Conflict(format!(
            "game state moved while resetting (now at {actual:?})"
        ))),
    }
}
