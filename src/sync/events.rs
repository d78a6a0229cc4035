use serde::Serialize;
use tokio::sync::broadcast;

use crate::store::rows::{InstanceId, QuestionId, SessionId, TeamId};
use crate::sync::resolver::FirstBuzz;

/// Events the core emits towards the presentation layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "event", content = "data")]
pub enum CoreEvent {
    /// A race was locked and a winner announced.
    FirstBuzz(FirstBuzz),
    /// A question was activated under a fresh instance.
    QuestionActivated {
        /// Session scope.
        session_id: SessionId,
        /// Activated question.
        question_id: QuestionId,
        /// Freshly minted instance.
        question_instance_id: InstanceId,
    },
    /// The operator reopened the race for the current instance.
    BuzzerUnlocked {
        /// Session scope.
        session_id: SessionId,
        /// Reopened instance.
        question_instance_id: InstanceId,
    },
    /// An answer was graded.
    AnswerGraded {
        /// Session scope.
        session_id: SessionId,
        /// Graded team.
        team_id: TeamId,
        /// Grading verdict.
        correct: bool,
        /// Score delta applied.
        awarded: i32,
    },
    /// A team's score changed.
    ScoreAdjusted {
        /// Session scope.
        session_id: SessionId,
        /// Team whose score changed.
        team_id: TeamId,
        /// New score.
        score: i32,
    },
    /// A snapshot was applied to the local view.
    SnapshotApplied {
        /// Session scope.
        session_id: SessionId,
        /// Game-state version the snapshot carried.
        version: u64,
    },
}

/// Simple broadcast hub fanning core events out to subscribers.
pub struct EventHub {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: CoreEvent) {
        let _ = self.sender.send(event);
    }
}
