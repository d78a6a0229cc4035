use std::collections::HashSet;

use indexmap::IndexMap;

use crate::model::{Answer, BuzzerAttempt, FinalRound, Question, Round, Team};
use crate::services::snapshot_service::Snapshot;
use crate::store::rows::{GameStateRow, InstanceId, Row, SessionId, TeamId};
use crate::store::{ChangeEvent, ChangeKind};

/// A client's consistent in-memory view of one session.
///
/// Steady-state updates arrive as partial [`ChangeEvent`]s merged by
/// [`apply_change`](Self::apply_change); recovery replaces the whole view via
/// [`apply_snapshot`](Self::apply_snapshot). The game-state version is the
/// freshness marker: anything older than what the view already holds is
/// discarded, so a fetch started against a superseded instance can never
/// overwrite newer state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    /// Session this view renders.
    pub session_id: SessionId,
    /// Latest game-state singleton observed.
    pub game_state: Option<GameStateRow>,
    /// Teams in insertion order.
    pub teams: IndexMap<TeamId, Team>,
    /// Round named by the game state, once its row has been seen.
    pub current_round: Option<Round>,
    /// Question named by the game state, once its row has been seen.
    pub current_question: Option<Question>,
    /// Buzzes scoped to the current instance, in server order.
    pub buzzes: Vec<BuzzerAttempt>,
    /// Answers scoped to the current instance, one per team.
    pub answers: IndexMap<TeamId, Answer>,
    /// Final-round state while active.
    pub final_round: Option<FinalRound>,
}

impl SessionView {
    /// Empty view for a session, populated by the first snapshot.
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            game_state: None,
            teams: IndexMap::new(),
            current_round: None,
            current_question: None,
            buzzes: Vec::new(),
            answers: IndexMap::new(),
            final_round: None,
        }
    }

    /// Instance the view currently scopes its transients to.
    pub fn current_instance(&self) -> Option<InstanceId> {
        self.game_state
            .as_ref()
            .and_then(|state| state.question_instance_id)
    }

    /// Game-state version the view has caught up to.
    pub fn version(&self) -> u64 {
        self.game_state
            .as_ref()
            .map(|state| state.version)
            .unwrap_or(0)
    }

    /// Teams excluded from the current question.
    pub fn excluded_team_ids(&self) -> HashSet<TeamId> {
        self.game_state
            .as_ref()
            .map(|state| state.excluded_team_ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Merge one partial update into the view.
    pub fn apply_change(&mut self, event: &ChangeEvent) {
        let ChangeEvent::Row { kind, row, .. } = event else {
            return;
        };
        if row.session_id().is_some_and(|id| id != self.session_id) {
            return;
        }

        match row {
            Row::GameState(state) => self.apply_game_state(state),
            Row::Team(team) => match kind {
                ChangeKind::Delete => {
                    self.teams.shift_remove(&team.id);
                }
                _ => {
                    self.teams.insert(team.id, Team::from(team.clone()));
                }
            },
            Row::Attempt(attempt) => {
                if Some(attempt.question_instance_id) != self.current_instance() {
                    return;
                }
                match kind {
                    ChangeKind::Delete => {
                        self.buzzes.retain(|b| b.seq != attempt.seq);
                    }
                    _ => {
                        if !self.buzzes.iter().any(|b| b.seq == attempt.seq) {
                            self.buzzes.push(BuzzerAttempt::from(attempt.clone()));
                            self.buzzes.sort_by_key(|b| b.seq);
                        }
                    }
                }
            }
            Row::Answer(answer) => {
                if Some(answer.question_instance_id) != self.current_instance() {
                    return;
                }
                match kind {
                    ChangeKind::Delete => {
                        self.answers.shift_remove(&answer.team_id);
                    }
                    _ => {
                        self.answers
                            .insert(answer.team_id, Answer::from(answer.clone()));
                    }
                }
            }
            Row::Round(round) => {
                let named = self
                    .game_state
                    .as_ref()
                    .and_then(|state| state.current_round_id);
                if named == Some(round.id) && *kind != ChangeKind::Delete {
                    self.current_round = Some(Round::from(round.clone()));
                }
            }
            Row::Question(question) => {
                let named = self
                    .game_state
                    .as_ref()
                    .and_then(|state| state.current_question_id);
                if named == Some(question.id) && *kind != ChangeKind::Delete {
                    self.current_question = Some(Question::from(question.clone()));
                }
            }
            Row::FinalRound(final_round) => {
                if final_round.active && *kind != ChangeKind::Delete {
                    self.final_round = Some(FinalRound::from(final_round.clone()));
                } else {
                    self.final_round = None;
                }
            }
            Row::Session(_) => {}
        }
    }

    /// Replace the view with a snapshot, unless the snapshot is stale.
    ///
    /// Returns whether the snapshot was applied.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> bool {
        if snapshot.game_state.session_id != self.session_id {
            return false;
        }
        if snapshot.game_state.version < self.version() {
            return false;
        }

        self.game_state = Some(snapshot.game_state.clone());
        self.teams = snapshot
            .teams
            .iter()
            .map(|row| (row.id, Team::from(row.clone())))
            .collect();
        self.current_round = snapshot.current_round.clone().map(Round::from);
        self.current_question = snapshot.current_question.clone().map(Question::from);
        self.buzzes = snapshot
            .buzzers
            .iter()
            .map(|row| BuzzerAttempt::from(row.clone()))
            .collect();
        self.buzzes.sort_by_key(|b| b.seq);
        self.answers = snapshot
            .answers
            .iter()
            .map(|row| (row.team_id, Answer::from(row.clone())))
            .collect();
        self.final_round = snapshot.final_round.clone().map(FinalRound::from);
        true
    }

    /// Mark the winning buzz after a race locks.
    pub fn set_first(&mut self, team_id: TeamId) {
        for buzz in &mut self.buzzes {
            buzz.is_first = buzz.team_id == team_id;
        }
    }

    fn apply_game_state(&mut self, incoming: &GameStateRow) {
        if incoming.version <= self.version() {
            return;
        }

        let instance_moved = self.current_instance() != incoming.question_instance_id;
        let round_moved = self
            .game_state
            .as_ref()
            .and_then(|state| state.current_round_id)
            != incoming.current_round_id;
        let question_moved = self
            .game_state
            .as_ref()
            .and_then(|state| state.current_question_id)
            != incoming.current_question_id;

        self.game_state = Some(incoming.clone());

        // Stale transients must never bleed into the next question.
        if instance_moved {
            self.buzzes.clear();
            self.answers.clear();
        }
        if round_moved {
            self.current_round = None;
        }
        if question_moved {
            self.current_question = None;
        }
    }
}
