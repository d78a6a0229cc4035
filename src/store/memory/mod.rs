//! In-memory reference backend.
//!
//! Implements the full [`RowStore`](crate::store::RowStore) contract over
//! process-local tables and a broadcast change bus. Tests and the loadsim
//! harness run against it; it also pins down the reference semantics
//! (server-assigned insertion order, per-feed write order, CAS on the
//! game-state singleton) any durable backend must match.

mod store;

pub use store::MemoryStore;
