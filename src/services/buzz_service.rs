use std::collections::HashSet;
use std::time::SystemTime;

use tracing::debug;
use uuid::Uuid;

use crate::error::SyncError;
use crate::store::rows::{BuzzerAttemptRow, InstanceId, Row, SessionId, TeamId};
use crate::store::{CasGuard, CasOutcome};
use crate::sync::{CoreEvent, FirstBuzz, RecordOutcome, SharedCore};

/// Result handed back to the buzzing client.
///
/// Every rejection here is a normal, expected outcome — "too late" is part
/// of the game, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuzzReceipt {
    /// What happened to the attempt.
    pub outcome: RecordOutcome,
    /// Set when this call's evaluation locked the race.
    pub first: Option<FirstBuzz>,
}

impl BuzzReceipt {
    fn rejected(outcome: RecordOutcome) -> Self {
        Self {
            outcome,
            first: None,
        }
    }
}

/// Record a buzz attempt for `team_id` against `instance`.
///
/// The authoritative game state is read before and after the insert:
/// before, to reject attempts that are already pointless (superseded
/// instance, excluded team, disarmed buzzer); after, because the exclusion
/// list may have changed while the insert was in flight and must be
/// re-applied at evaluation time.
pub async fn record_attempt(
    core: &SharedCore,
    session_id: SessionId,
    team_id: TeamId,
    instance: InstanceId,
) -> Result<BuzzReceipt, SyncError> {
    let store = core.store();

    let state = store
        .fetch_game_state(session_id)
        .await?
        .ok_or_else(|| SyncError::NotFound(format!("no game state for session `{session_id}`")))?;

    if state.question_instance_id != Some(instance) {
        return Ok(BuzzReceipt::rejected(RecordOutcome::Superseded));
    }
    if state.excluded_team_ids.contains(&team_id) {
        return Ok(BuzzReceipt::rejected(RecordOutcome::Excluded));
    }
    if !state.buzzer_armed {
        return Ok(BuzzReceipt::rejected(RecordOutcome::Late));
    }
    let Some(question_id) = state.current_question_id else {
        return Err(SyncError::InvalidState(
            "buzzer armed with no question in play".into(),
        ));
    };

    // Cheap local pre-check so known-late and duplicate attempts do not
    // produce junk rows.
    let rejection = core
        .with_resolver(|resolver| {
            resolver.ensure(instance);
            resolver.precheck(instance, team_id)
        })
        .await;
    if let Some(outcome) = rejection {
        return Ok(BuzzReceipt::rejected(outcome));
    }

    let draft = BuzzerAttemptRow {
        id: Uuid::new_v4(),
        session_id,
        team_id,
        question_id,
        question_instance_id: instance,
        seq: 0,
        server_ts: SystemTime::UNIX_EPOCH,
    };
    let Some(inserted) = store.insert_row(Row::Attempt(draft)).await?.into_attempt() else {
        return Err(SyncError::InvalidState(
            "store returned a mismatched row for an attempt insert".into(),
        ));
    };

    // Anything may have moved underneath the insert; re-read before judging.
    let fresh = store
        .fetch_game_state(session_id)
        .await?
        .ok_or_else(|| SyncError::NotFound(format!("no game state for session `{session_id}`")))?;
    if fresh.question_instance_id != Some(instance) {
        // The row will be purged with the rest of its instance.
        return Ok(BuzzReceipt::rejected(RecordOutcome::Superseded));
    }
    let excluded: HashSet<TeamId> = fresh.excluded_team_ids.iter().copied().collect();
    if excluded.contains(&team_id) {
        return Ok(BuzzReceipt::rejected(RecordOutcome::Excluded));
    }

    let (outcome, first) = core
        .with_resolver(|resolver| {
            let outcome = resolver.record(instance, team_id, inserted.seq, inserted.server_ts);
            let first = if outcome == RecordOutcome::Recorded {
                resolver.evaluate(instance, &excluded)
            } else {
                None
            };
            (outcome, first)
        })
        .await;

    if let Some(ref winner) = first {
        core.events().broadcast(CoreEvent::FirstBuzz(winner.clone()));

        // Disarm so steady-state clients stop accepting buzzes. Losing this
        // write to a concurrent question transition is fine; the new
        // instance re-arms on its own terms.
        let mut next = fresh;
        next.buzzer_armed = false;
        if let CasOutcome::Conflict { actual } = store
            .put_game_state(next, CasGuard::IfInstanceIs(Some(instance)))
            .await?
        {
            debug!(?actual, "state moved before disarm; skipping");
        }
    }

    Ok(BuzzReceipt { outcome, first })
}
