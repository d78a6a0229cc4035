//! Abstraction over the backend row store and its change streams.
//!
//! The core depends on nothing beyond this contract: insert/update/delete,
//! equality-filtered selects, a compare-and-swap write on the game-state
//! singleton, and a push feed of row changes.

pub mod error;
#[cfg(feature = "memory-store")]
pub mod memory;
pub mod rows;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::error::StoreResult;
use crate::store::rows::{GameStateRow, InstanceId, Row, SessionId};

/// Tables exposed by the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Quiz sessions.
    Sessions,
    /// Teams.
    Teams,
    /// Rounds.
    Rounds,
    /// Questions.
    Questions,
    /// Per-session game-state singletons.
    GameStates,
    /// Buzzer attempts.
    BuzzerAttempts,
    /// Answers.
    Answers,
    /// Final round state.
    FinalRounds,
}

/// Column an equality filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterColumn {
    /// Primary key.
    Id,
    /// `session_id` scope column.
    SessionId,
    /// `question_instance_id` scope column.
    QuestionInstanceId,
    /// `round_id` scope column.
    RoundId,
}

/// Simple equality predicate, the only row filter the backend supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowFilter {
    /// Column compared.
    pub column: FilterColumn,
    /// Value the column must equal.
    pub value: Uuid,
}

impl RowFilter {
    /// Filter on the primary key.
    pub fn id(value: Uuid) -> Self {
        Self {
            column: FilterColumn::Id,
            value,
        }
    }

    /// Filter on the session scope column.
    pub fn session(value: SessionId) -> Self {
        Self {
            column: FilterColumn::SessionId,
            value,
        }
    }

    /// Filter on the question-instance scope column.
    pub fn instance(value: InstanceId) -> Self {
        Self {
            column: FilterColumn::QuestionInstanceId,
            value,
        }
    }

    /// Filter on the round scope column.
    pub fn round(value: Uuid) -> Self {
        Self {
            column: FilterColumn::RoundId,
            value,
        }
    }

    /// Whether `row` satisfies this predicate.
    pub fn matches(&self, row: &Row) -> bool {
        match self.column {
            FilterColumn::Id => row.id() == self.value,
            FilterColumn::SessionId => row.session_id() == Some(self.value),
            FilterColumn::QuestionInstanceId => row.instance_id() == Some(self.value),
            FilterColumn::RoundId => row.round_id() == Some(self.value),
        }
    }
}

/// Kind of change carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Row created.
    Insert,
    /// Row replaced.
    Update,
    /// Row removed.
    Delete,
}

/// A single change pushed by the backend.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// A row-level change on a table.
    Row {
        /// Table the change happened on.
        table: Table,
        /// Kind of change.
        kind: ChangeKind,
        /// Row payload; for deletes, the row as it was before removal.
        row: Row,
    },
    /// An opaque broadcast message published on a named channel.
    Broadcast {
        /// Channel name.
        channel: String,
        /// Arbitrary payload.
        payload: serde_json::Value,
    },
}

/// Selects which change events a subscription receives.
#[derive(Debug, Clone)]
pub enum StreamSelector {
    /// Row changes on one table, optionally filtered and restricted to an
    /// event set (`None` means all kinds).
    Changes {
        /// Table to watch.
        table: Table,
        /// Optional equality filter.
        filter: Option<RowFilter>,
        /// Restrict to these change kinds; `None` accepts all.
        kinds: Option<Vec<ChangeKind>>,
    },
    /// All messages published on an opaque broadcast channel.
    Broadcast {
        /// Channel name.
        channel: String,
    },
}

impl StreamSelector {
    /// Watch every change on `table` scoped to one session.
    pub fn session_table(table: Table, session_id: SessionId) -> Self {
        StreamSelector::Changes {
            table,
            filter: Some(RowFilter::session(session_id)),
            kinds: None,
        }
    }

    /// Whether `event` passes this selector.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match (self, event) {
            (
                StreamSelector::Changes {
                    table,
                    filter,
                    kinds,
                },
                ChangeEvent::Row {
                    table: event_table,
                    kind,
                    row,
                },
            ) => {
                table == event_table
                    && filter.as_ref().is_none_or(|f| f.matches(row))
                    && kinds.as_ref().is_none_or(|set| set.contains(kind))
            }
            (StreamSelector::Broadcast { channel }, ChangeEvent::Broadcast { channel: name, .. }) => {
                channel == name
            }
            _ => false,
        }
    }
}

/// Guard applied to a game-state write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasGuard {
    /// Write unconditionally (the version counter is still bumped).
    Unchecked,
    /// Apply only if the stored row currently points at this question
    /// instance; makes racing "advance question" writers deterministic.
    IfInstanceIs(Option<InstanceId>),
}

/// Outcome of a guarded game-state write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write was applied; carries the server-assigned version.
    Applied {
        /// New version of the row.
        version: u64,
    },
    /// The guard did not match; the write was rejected.
    Conflict {
        /// Instance the stored row actually points at.
        actual: Option<InstanceId>,
    },
}

/// Push feed of change events for one subscription.
pub type ChangeFeed = BoxStream<'static, ChangeEvent>;

/// Abstraction over the backend row store consumed by the core.
///
/// Implementations must preserve per-row write order within one feed; no
/// ordering is guaranteed across feeds, and a disconnected subscriber may
/// miss events entirely — recovery is the snapshot path's job.
pub trait RowStore: Send + Sync {
    /// Insert a new row, returning it enriched with server-assigned fields
    /// (`seq` and `server_ts` for buzzer attempts).
    fn insert_row(&self, row: Row) -> BoxFuture<'static, StoreResult<Row>>;
    /// Replace-or-create a row by primary key.
    fn upsert_row(&self, row: Row) -> BoxFuture<'static, StoreResult<()>>;
    /// Fetch all rows of a table matching the optional equality filter.
    fn fetch_rows(
        &self,
        table: Table,
        filter: Option<RowFilter>,
    ) -> BoxFuture<'static, StoreResult<Vec<Row>>>;
    /// Delete all rows of a table matching the filter, returning the count.
    fn delete_rows(&self, table: Table, filter: RowFilter)
    -> BoxFuture<'static, StoreResult<u64>>;
    /// Fetch the game-state singleton for a session.
    fn fetch_game_state(
        &self,
        session_id: SessionId,
    ) -> BoxFuture<'static, StoreResult<Option<GameStateRow>>>;
    /// Guarded write of the game-state singleton. The stored version counter
    /// is server-assigned; the one on `state` is ignored.
    fn put_game_state(
        &self,
        state: GameStateRow,
        guard: CasGuard,
    ) -> BoxFuture<'static, StoreResult<CasOutcome>>;
    /// Publish an opaque payload on a named broadcast channel.
    fn publish(
        &self,
        channel: &str,
        payload: serde_json::Value,
    ) -> BoxFuture<'static, StoreResult<()>>;
    /// Open a change feed for the given selector.
    fn subscribe(&self, selector: StreamSelector) -> BoxFuture<'static, StoreResult<ChangeFeed>>;
}
