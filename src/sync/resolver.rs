use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

use serde::Serialize;

use crate::store::rows::{BuzzerAttemptRow, InstanceId, TeamId};

/// The winning buzz announced for a question instance.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FirstBuzz {
    /// Instance the race was run for.
    pub question_instance_id: InstanceId,
    /// Winning team.
    pub team_id: TeamId,
    /// Server-assigned insertion order of the winning attempt.
    pub seq: u64,
    /// Server-assigned insertion timestamp of the winning attempt.
    pub server_ts: SystemTime,
}

/// Outcome of recording one buzz attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Attempt stored and eligible for evaluation.
    Recorded,
    /// Race already locked; the attempt is reported back as "too late".
    Late,
    /// The team already has an attempt for this instance.
    Duplicate,
    /// The team was on the exclusion list when it submitted.
    Excluded,
    /// The attempt targets an instance that is no longer current.
    Superseded,
}

/// One team's recorded bid, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AttemptRecord {
    team_id: TeamId,
    seq: u64,
    server_ts: SystemTime,
}

/// Latched race phase: `Open -> Locked`, never back.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RacePhase {
    Open,
    Locked(FirstBuzz),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Race {
    phase: RacePhase,
    attempts: Vec<AttemptRecord>,
}

impl Race {
    fn open() -> Self {
        Self {
            phase: RacePhase::Open,
            attempts: Vec::new(),
        }
    }
}

/// Decides which buzz wins a question instance.
///
/// The resolver keys strictly by the *current* instance: attempts for a
/// superseded instance are ignored, and a fresh instance always starts
/// [`RacePhase::Open`]. Exclusion is re-applied at evaluation time because
/// the excluded-team list can change between submission and evaluation.
#[derive(Debug, Default)]
pub struct BuzzRaceResolver {
    current: Option<InstanceId>,
    races: HashMap<InstanceId, Race>,
}

impl BuzzRaceResolver {
    /// Create a resolver with no race in play.
    pub fn new() -> Self {
        Self::default()
    }

    /// Instance currently being raced, if any.
    pub fn current(&self) -> Option<InstanceId> {
        self.current
    }

    /// Start a fresh race for `instance`, discarding any superseded race.
    pub fn begin(&mut self, instance: InstanceId) {
        if self.current == Some(instance) {
            return;
        }
        self.current = Some(instance);
        self.races.retain(|id, _| *id == instance);
        self.races.entry(instance).or_insert_with(Race::open);
    }

    /// Track `instance` if the authoritative state names it and the resolver
    /// has not seen it yet.
    pub fn ensure(&mut self, instance: InstanceId) {
        self.begin(instance);
    }

    /// Rejection the attempt would receive right now, without recording it.
    ///
    /// Used by the write path to avoid inserting rows for attempts that are
    /// already known to be late or duplicated.
    pub fn precheck(&self, instance: InstanceId, team_id: TeamId) -> Option<RecordOutcome> {
        if self.current != Some(instance) {
            return Some(RecordOutcome::Superseded);
        }
        let race = self.races.get(&instance)?;
        if matches!(race.phase, RacePhase::Locked(_)) {
            return Some(RecordOutcome::Late);
        }
        if race.attempts.iter().any(|a| a.team_id == team_id) {
            return Some(RecordOutcome::Duplicate);
        }
        None
    }

    /// Record an attempt with its server-assigned ordering fields.
    ///
    /// Re-recording the same `(team, seq)` pair is idempotent so that a
    /// locally recorded attempt and its change-feed echo do not double up.
    pub fn record(
        &mut self,
        instance: InstanceId,
        team_id: TeamId,
        seq: u64,
        server_ts: SystemTime,
    ) -> RecordOutcome {
        if self.current != Some(instance) {
            return RecordOutcome::Superseded;
        }
        let Some(race) = self.races.get_mut(&instance) else {
            return RecordOutcome::Superseded;
        };

        if let Some(existing) = race.attempts.iter().find(|a| a.team_id == team_id) {
            if existing.seq == seq {
                return RecordOutcome::Recorded;
            }
            return RecordOutcome::Duplicate;
        }

        if matches!(race.phase, RacePhase::Locked(_)) {
            return RecordOutcome::Late;
        }

        race.attempts.push(AttemptRecord {
            team_id,
            seq,
            server_ts,
        });
        RecordOutcome::Recorded
    }

    /// Evaluate the race, locking it on the first non-empty eligible set.
    ///
    /// Returns the winner exactly once: the call that performs the
    /// `Open -> Locked` transition gets `Some`, every later call gets `None`.
    /// Once locked the winner is latched; an earlier-timestamped attempt
    /// arriving afterwards cannot unseat it.
    pub fn evaluate(
        &mut self,
        instance: InstanceId,
        excluded: &HashSet<TeamId>,
    ) -> Option<FirstBuzz> {
        if self.current != Some(instance) {
            return None;
        }
        let race = self.races.get_mut(&instance)?;
        if matches!(race.phase, RacePhase::Locked(_)) {
            return None;
        }

        let winner = pick_winner(&race.attempts, excluded)?;
        let first = FirstBuzz {
            question_instance_id: instance,
            team_id: winner.team_id,
            seq: winner.seq,
            server_ts: winner.server_ts,
        };
        race.phase = RacePhase::Locked(first.clone());
        Some(first)
    }

    /// Winner of a locked race, if any.
    pub fn winner(&self, instance: InstanceId) -> Option<FirstBuzz> {
        match self.races.get(&instance)?.phase {
            RacePhase::Locked(ref first) => Some(first.clone()),
            RacePhase::Open => None,
        }
    }

    /// Whether the race for `instance` is locked.
    pub fn is_locked(&self, instance: InstanceId) -> bool {
        self.winner(instance).is_some()
    }

    /// Operator action: discard all attempts and reopen the race.
    pub fn reset(&mut self, instance: InstanceId) {
        if let Some(race) = self.races.get_mut(&instance) {
            *race = Race::open();
        }
    }

    /// Rebuild the race from snapshot rows after a reconnect.
    ///
    /// Locks silently when the snapshot already contains an eligible attempt
    /// set — the winner was announced before the disconnect and must not be
    /// re-emitted. Returns the rebuilt winner so the caller can mark it in
    /// its local view.
    pub fn rehydrate(
        &mut self,
        instance: InstanceId,
        attempts: &[BuzzerAttemptRow],
        excluded: &HashSet<TeamId>,
    ) -> Option<FirstBuzz> {
        self.current = Some(instance);
        self.races.retain(|id, _| *id == instance);

        let mut records: Vec<AttemptRecord> = attempts
            .iter()
            .filter(|row| row.question_instance_id == instance)
            .map(|row| AttemptRecord {
                team_id: row.team_id,
                seq: row.seq,
                server_ts: row.server_ts,
            })
            .collect();
        records.sort_by_key(|record| record.seq);

        let winner = pick_winner(&records, excluded).map(|record| FirstBuzz {
            question_instance_id: instance,
            team_id: record.team_id,
            seq: record.seq,
            server_ts: record.server_ts,
        });

        let phase = match winner.clone() {
            Some(first) => RacePhase::Locked(first),
            None => RacePhase::Open,
        };
        self.races.insert(
            instance,
            Race {
                phase,
                attempts: records,
            },
        );
        winner
    }
}

/// Smallest server timestamp among non-excluded attempts; ties keep the
/// attempt observed first (arrival order, never re-sorted).
fn pick_winner<'a>(
    attempts: &'a [AttemptRecord],
    excluded: &HashSet<TeamId>,
) -> Option<&'a AttemptRecord> {
    let mut best: Option<&AttemptRecord> = None;
    for attempt in attempts {
        if excluded.contains(&attempt.team_id) {
            continue;
        }
        match best {
            Some(current) if attempt.server_ts >= current.server_ts => {}
            _ => best = Some(attempt),
        }
    }
    best
}
