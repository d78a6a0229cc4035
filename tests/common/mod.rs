#![allow(dead_code)]

//! Shared fixtures for the integration suites: a seeded session and a
//! fault-injecting store wrapper used to exercise degradation paths.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use uuid::Uuid;

use showsync::services::session_service;
use showsync::store::error::{StoreError, StoreResult};
use showsync::store::memory::MemoryStore;
use showsync::store::rows::{
    GameStateRow, QuestionId, QuestionRow, RoundId, RoundKind, Row, SessionId, TeamId,
};
use showsync::store::{
    CasGuard, CasOutcome, ChangeFeed, RowFilter, RowStore, StreamSelector, Table,
};

/// Store wrapper that can be told to fail specific operations.
pub struct FlakyStore {
    inner: MemoryStore,
    /// Fail every `subscribe` call.
    pub fail_subscribe: AtomicBool,
    /// Serve subscriptions whose feeds end immediately.
    pub empty_feeds: AtomicBool,
    /// Fail every `delete_rows` call.
    pub fail_deletes: AtomicBool,
    /// Fail every `fetch_rows` call.
    pub fail_fetch_rows: AtomicBool,
    /// Fail every `fetch_game_state` call.
    pub fail_game_state: AtomicBool,
    /// Number of `subscribe` calls observed.
    pub subscribe_attempts: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            fail_subscribe: AtomicBool::new(false),
            empty_feeds: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            fail_fetch_rows: AtomicBool::new(false),
            fail_game_state: AtomicBool::new(false),
            subscribe_attempts: AtomicU32::new(0),
        })
    }
}

fn injected() -> StoreError {
    StoreError::unavailable("injected failure".into(), std::io::Error::other("injected"))
}

impl RowStore for FlakyStore {
    fn insert_row(&self, row: Row) -> BoxFuture<'static, StoreResult<Row>> {
        self.inner.insert_row(row)
    }

    fn upsert_row(&self, row: Row) -> BoxFuture<'static, StoreResult<()>> {
        self.inner.upsert_row(row)
    }

    fn fetch_rows(
        &self,
        table: Table,
        filter: Option<RowFilter>,
    ) -> BoxFuture<'static, StoreResult<Vec<Row>>> {
        if self.fail_fetch_rows.load(Ordering::SeqCst) {
            return Box::pin(async { Err(injected()) });
        }
        self.inner.fetch_rows(table, filter)
    }

    fn delete_rows(
        &self,
        table: Table,
        filter: RowFilter,
    ) -> BoxFuture<'static, StoreResult<u64>> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Box::pin(async { Err(injected()) });
        }
        self.inner.delete_rows(table, filter)
    }

    fn fetch_game_state(
        &self,
        session_id: SessionId,
    ) -> BoxFuture<'static, StoreResult<Option<GameStateRow>>> {
        if self.fail_game_state.load(Ordering::SeqCst) {
            return Box::pin(async { Err(injected()) });
        }
        self.inner.fetch_game_state(session_id)
    }

    fn put_game_state(
        &self,
        state: GameStateRow,
        guard: CasGuard,
    ) -> BoxFuture<'static, StoreResult<CasOutcome>> {
        self.inner.put_game_state(state, guard)
    }

    fn publish(
        &self,
        channel: &str,
        payload: serde_json::Value,
    ) -> BoxFuture<'static, StoreResult<()>> {
        self.inner.publish(channel, payload)
    }

    fn subscribe(&self, selector: StreamSelector) -> BoxFuture<'static, StoreResult<ChangeFeed>> {
        self.subscribe_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Box::pin(async { Err(injected()) });
        }
        if self.empty_feeds.load(Ordering::SeqCst) {
            return Box::pin(async {
                Ok(Box::pin(futures::stream::empty()) as ChangeFeed)
            });
        }
        self.inner.subscribe(selector)
    }
}

/// A seeded session: one blind-test round, its questions, and some teams.
pub struct Fixture {
    pub flaky: Arc<FlakyStore>,
    pub store: Arc<dyn RowStore>,
    pub session_id: SessionId,
    pub round_id: RoundId,
    pub question_ids: Vec<QuestionId>,
    pub team_ids: Vec<TeamId>,
}

pub async fn fixture(teams: usize, questions: usize) -> Fixture {
    let flaky = FlakyStore::new();
    let store: Arc<dyn RowStore> = flaky.clone();

    let session = session_service::create_session(&store, "integration")
        .await
        .expect("create session");
    session_service::activate_session(&store, session.id)
        .await
        .expect("activate session");
    let round = session_service::create_round(
        &store,
        session.id,
        "Blind test",
        RoundKind::BlindTest,
        30,
        None,
    )
    .await
    .expect("create round");

    let mut question_ids = Vec::with_capacity(questions);
    for index in 0..questions {
        let question = QuestionRow {
            id: Uuid::new_v4(),
            round_id: round.id,
            kind: RoundKind::BlindTest,
            prompt: format!("Track {}", index + 1),
            answer: format!("Answer {}", index + 1),
            points: 10,
            penalty: 5,
            audio_url: None,
            cues: None,
        };
        question_ids.push(
            session_service::add_question(&store, question)
                .await
                .expect("add question")
                .id,
        );
    }

    let mut team_ids = Vec::with_capacity(teams);
    for index in 0..teams {
        let team = session_service::create_team(
            &store,
            session.id,
            &format!("Team {}", index + 1),
            "#00d0ff",
        )
        .await
        .expect("create team");
        team_ids.push(team.id);
    }

    Fixture {
        flaky,
        store,
        session_id: session.id,
        round_id: round.id,
        question_ids,
        team_ids,
    }
}

/// Let spawned feed and apply-loop tasks drain their queues.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}
