use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::store::rows::SessionId;

/// Role of a connected client process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Operator control board.
    Control,
    /// A team's device.
    Team,
    /// The TV display.
    Screen,
}

/// Identity of one connection in the presence map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PresenceKey {
    /// Role of the connection.
    pub role: ClientRole,
    /// Role-specific identity (team id, or a per-connection id).
    pub id: Uuid,
}

/// Heartbeat payload published on a session's presence channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresencePing {
    /// Role of the sender.
    pub role: ClientRole,
    /// Role-specific identity of the sender.
    pub id: Uuid,
}

/// Broadcast channel name carrying presence pings for a session.
pub fn presence_channel(session_id: SessionId) -> String {
    format!("presence:{session_id}")
}

/// Heartbeat-derived online/offline status with a fixed TTL.
///
/// Ephemeral by design: the map lives only in this process and is never
/// written to durable storage in the hot path.
pub struct PresenceTracker {
    ttl: Duration,
    seen: DashMap<PresenceKey, Instant>,
}

impl PresenceTracker {
    /// Create a tracker with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: DashMap::new(),
        }
    }

    /// Record a heartbeat for `key`.
    pub fn mark_seen(&self, key: PresenceKey) {
        self.seen.insert(key, Instant::now());
    }

    /// Whether `key` heartbeated within the TTL.
    pub fn is_online(&self, key: &PresenceKey) -> bool {
        self.seen
            .get(key)
            .is_some_and(|at| at.elapsed() < self.ttl)
    }

    /// All currently online connections.
    pub fn online(&self) -> Vec<PresenceKey> {
        self.seen
            .iter()
            .filter(|entry| entry.value().elapsed() < self.ttl)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Drop expired entries, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let before = self.seen.len();
        let ttl = self.ttl;
        self.seen.retain(|_, at| at.elapsed() < ttl);
        before - self.seen.len()
    }
}
