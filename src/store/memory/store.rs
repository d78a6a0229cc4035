use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::BoxFuture;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;
use uuid::Uuid;

use crate::store::error::{StoreError, StoreResult};
use crate::store::rows::{
    AnswerRow, BuzzerAttemptRow, FinalRoundRow, GameStateRow, QuestionRow, RoundRow, Row,
    SessionId, SessionRow, TeamRow,
};
use crate::store::{
    CasGuard, CasOutcome, ChangeEvent, ChangeFeed, ChangeKind, RowFilter, RowStore, StreamSelector,
    Table,
};

const CHANGE_BUS_CAPACITY: usize = 256;

/// Process-local row store backed by concurrent maps and a broadcast bus.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    sessions: DashMap<Uuid, SessionRow>,
    teams: DashMap<Uuid, TeamRow>,
    rounds: DashMap<Uuid, RoundRow>,
    questions: DashMap<Uuid, QuestionRow>,
    game_states: DashMap<Uuid, GameStateRow>,
    attempts: DashMap<Uuid, BuzzerAttemptRow>,
    answers: DashMap<Uuid, AnswerRow>,
    final_rounds: DashMap<Uuid, FinalRoundRow>,
    seq: AtomicU64,
    bus: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (bus, _receiver) = broadcast::channel(CHANGE_BUS_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                teams: DashMap::new(),
                rounds: DashMap::new(),
                questions: DashMap::new(),
                game_states: DashMap::new(),
                attempts: DashMap::new(),
                answers: DashMap::new(),
                final_rounds: DashMap::new(),
                seq: AtomicU64::new(0),
                bus,
            }),
        }
    }
}

impl Inner {
    fn emit(&self, kind: ChangeKind, row: Row) {
        let table = table_of(&row);
        // Nobody listening is fine; feeds come and go with clients.
        let _ = self.bus.send(ChangeEvent::Row { table, kind, row });
    }

    fn insert(&self, row: Row) -> StoreResult<Row> {
        let row = match row {
            Row::Attempt(mut attempt) => {
                attempt.seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
                attempt.server_ts = SystemTime::now();
                insert_unique(
                    &self.attempts,
                    Table::BuzzerAttempts,
                    attempt.id,
                    attempt.clone(),
                )?;
                Row::Attempt(attempt)
            }
            Row::Session(session) => {
                insert_unique(&self.sessions, Table::Sessions, session.id, session.clone())?;
                Row::Session(session)
            }
            Row::Team(team) => {
                insert_unique(&self.teams, Table::Teams, team.id, team.clone())?;
                Row::Team(team)
            }
            Row::Round(round) => {
                insert_unique(&self.rounds, Table::Rounds, round.id, round.clone())?;
                Row::Round(round)
            }
            Row::Question(question) => {
                insert_unique(
                    &self.questions,
                    Table::Questions,
                    question.id,
                    question.clone(),
                )?;
                Row::Question(question)
            }
            Row::GameState(state) => {
                insert_unique(
                    &self.game_states,
                    Table::GameStates,
                    state.session_id,
                    state.clone(),
                )?;
                Row::GameState(state)
            }
            Row::Answer(answer) => {
                insert_unique(&self.answers, Table::Answers, answer.id, answer.clone())?;
                Row::Answer(answer)
            }
            Row::FinalRound(final_round) => {
                insert_unique(
                    &self.final_rounds,
                    Table::FinalRounds,
                    final_round.id,
                    final_round.clone(),
                )?;
                Row::FinalRound(final_round)
            }
        };

        self.emit(ChangeKind::Insert, row.clone());
        Ok(row)
    }

    fn upsert(&self, row: Row) -> StoreResult<()> {
        let existed = match &row {
            Row::Session(session) => self
                .sessions
                .insert(session.id, session.clone())
                .is_some(),
            Row::Team(team) => self.teams.insert(team.id, team.clone()).is_some(),
            Row::Round(round) => self.rounds.insert(round.id, round.clone()).is_some(),
            Row::Question(question) => self
                .questions
                .insert(question.id, question.clone())
                .is_some(),
            Row::GameState(state) => self
                .game_states
                .insert(state.session_id, state.clone())
                .is_some(),
            Row::Attempt(attempt) => self.attempts.insert(attempt.id, attempt.clone()).is_some(),
            Row::Answer(answer) => self.answers.insert(answer.id, answer.clone()).is_some(),
            Row::FinalRound(final_round) => self
                .final_rounds
                .insert(final_round.id, final_round.clone())
                .is_some(),
        };

        let kind = if existed {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };
        self.emit(kind, row);
        Ok(())
    }

    fn collect(&self, table: Table) -> Vec<Row> {
        match table {
            Table::Sessions => self
                .sessions
                .iter()
                .map(|entry| Row::Session(entry.value().clone()))
                .collect(),
            Table::Teams => self
                .teams
                .iter()
                .map(|entry| Row::Team(entry.value().clone()))
                .collect(),
            Table::Rounds => self
                .rounds
                .iter()
                .map(|entry| Row::Round(entry.value().clone()))
                .collect(),
            Table::Questions => self
                .questions
                .iter()
                .map(|entry| Row::Question(entry.value().clone()))
                .collect(),
            Table::GameStates => self
                .game_states
                .iter()
                .map(|entry| Row::GameState(entry.value().clone()))
                .collect(),
            Table::BuzzerAttempts => self
                .attempts
                .iter()
                .map(|entry| Row::Attempt(entry.value().clone()))
                .collect(),
            Table::Answers => self
                .answers
                .iter()
                .map(|entry| Row::Answer(entry.value().clone()))
                .collect(),
            Table::FinalRounds => self
                .final_rounds
                .iter()
                .map(|entry| Row::FinalRound(entry.value().clone()))
                .collect(),
        }
    }

    fn fetch(&self, table: Table, filter: Option<RowFilter>) -> Vec<Row> {
        let mut rows = self.collect(table);
        if let Some(filter) = filter {
            rows.retain(|row| filter.matches(row));
        }

        // Deterministic order: attempts by server-assigned sequence, every
        // other table by primary key.
        if table == Table::BuzzerAttempts {
            rows.sort_by_key(|row| match row {
                Row::Attempt(attempt) => attempt.seq,
                _ => u64::MAX,
            });
        } else {
            rows.sort_by_key(Row::id);
        }
        rows
    }

    fn delete(&self, table: Table, filter: RowFilter) -> u64 {
        let doomed: Vec<Row> = self
            .collect(table)
            .into_iter()
            .filter(|row| filter.matches(row))
            .collect();

        let mut removed = 0u64;
        for row in doomed {
            let id = row.id();
            let gone = match table {
                Table::Sessions => self.sessions.remove(&id).is_some(),
                Table::Teams => self.teams.remove(&id).is_some(),
                Table::Rounds => self.rounds.remove(&id).is_some(),
                Table::Questions => self.questions.remove(&id).is_some(),
                Table::GameStates => self.game_states.remove(&id).is_some(),
                Table::BuzzerAttempts => self.attempts.remove(&id).is_some(),
                Table::Answers => self.answers.remove(&id).is_some(),
                Table::FinalRounds => self.final_rounds.remove(&id).is_some(),
            };
            if gone {
                removed += 1;
                self.emit(ChangeKind::Delete, row);
            }
        }
        removed
    }

    fn put_game_state(&self, state: GameStateRow, guard: CasGuard) -> StoreResult<CasOutcome> {
        match self.game_states.entry(state.session_id) {
            Entry::Occupied(mut occupied) => {
                if let CasGuard::IfInstanceIs(expected) = guard {
                    let actual = occupied.get().question_instance_id;
                    if actual != expected {
                        return Ok(CasOutcome::Conflict { actual });
                    }
                }
                let version = occupied.get().version + 1;
                let mut next = state;
                next.version = version;
                occupied.insert(next.clone());
                self.emit(ChangeKind::Update, Row::GameState(next));
                Ok(CasOutcome::Applied { version })
            }
            Entry::Vacant(vacant) => {
                if let CasGuard::IfInstanceIs(expected) = guard
                    && expected.is_some()
                {
                    return Ok(CasOutcome::Conflict { actual: None });
                }
                let mut next = state;
                next.version = 1;
                vacant.insert(next.clone());
                self.emit(ChangeKind::Insert, Row::GameState(next));
                Ok(CasOutcome::Applied { version: 1 })
            }
        }
    }
}

impl RowStore for MemoryStore {
    fn insert_row(&self, row: Row) -> BoxFuture<'static, StoreResult<Row>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.insert(row) })
    }

    fn upsert_row(&self, row: Row) -> BoxFuture<'static, StoreResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.upsert(row) })
    }

    fn fetch_rows(
        &self,
        table: Table,
        filter: Option<RowFilter>,
    ) -> BoxFuture<'static, StoreResult<Vec<Row>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.fetch(table, filter)) })
    }

    fn delete_rows(
        &self,
        table: Table,
        filter: RowFilter,
    ) -> BoxFuture<'static, StoreResult<u64>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.delete(table, filter)) })
    }

    fn fetch_game_state(
        &self,
        session_id: SessionId,
    ) -> BoxFuture<'static, StoreResult<Option<GameStateRow>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .game_states
                .get(&session_id)
                .map(|entry| entry.value().clone()))
        })
    }

    fn put_game_state(
        &self,
        state: GameStateRow,
        guard: CasGuard,
    ) -> BoxFuture<'static, StoreResult<CasOutcome>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.put_game_state(state, guard) })
    }

    fn publish(
        &self,
        channel: &str,
        payload: serde_json::Value,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let inner = self.inner.clone();
        let channel = channel.to_string();
        Box::pin(async move {
            let _ = inner.bus.send(ChangeEvent::Broadcast { channel, payload });
            Ok(())
        })
    }

    fn subscribe(&self, selector: StreamSelector) -> BoxFuture<'static, StoreResult<ChangeFeed>> {
        let mut receiver = self.inner.bus.subscribe();
        Box::pin(async move {
            let stream = async_stream::stream! {
                loop {
                    match receiver.recv().await {
                        Ok(event) => {
                            if selector.matches(&event) {
                                yield event;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            // Missed events are recovered by the snapshot
                            // path, not replayed here.
                            warn!(skipped, "change feed lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            };
            Ok(Box::pin(stream) as ChangeFeed)
        })
    }
}

fn table_of(row: &Row) -> Table {
    match row {
        Row::Session(_) => Table::Sessions,
        Row::Team(_) => Table::Teams,
        Row::Round(_) => Table::Rounds,
        Row::Question(_) => Table::Questions,
        Row::GameState(_) => Table::GameStates,
        Row::Attempt(_) => Table::BuzzerAttempts,
        Row::Answer(_) => Table::Answers,
        Row::FinalRound(_) => Table::FinalRounds,
    }
}

fn insert_unique<T>(
    map: &DashMap<Uuid, T>,
    table: Table,
    id: Uuid,
    value: T,
) -> StoreResult<()> {
    match map.entry(id) {
        Entry::Occupied(_) => Err(StoreError::Duplicate { table, id }),
        Entry::Vacant(vacant) => {
            vacant.insert(value);
            Ok(())
        }
    }
}
