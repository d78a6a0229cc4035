//! Persisted row types exchanged with the backend row store.
//!
//! Every row that crosses the boundary between the backend and the core is a
//! tagged variant of [`Row`] and carries `validator` annotations so malformed
//! payloads are caught where they enter, not deep inside the reducer.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_with::{TimestampMilliSeconds, serde_as};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

/// Identifier of a [`SessionRow`].
pub type SessionId = Uuid;
/// Identifier of a [`TeamRow`].
pub type TeamId = Uuid;
/// Identifier of a [`RoundRow`].
pub type RoundId = Uuid;
/// Identifier of a [`QuestionRow`].
pub type QuestionId = Uuid;
/// Identifier minted each time a question is activated in play.
///
/// Buzzer attempts and answers are scoped to an instance, never to the
/// question itself, so replaying a question can never collide with stale
/// rows from its first playthrough.
pub type InstanceId = Uuid;
/// Identifier of an [`AnswerRow`].
pub type AnswerId = Uuid;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Being configured by an operator, not joinable.
    Draft,
    /// Live; at most one session is active at a time.
    Active,
    /// Finished; kept around for export.
    Ended,
}

/// Branding attached to a session (shown by the TV screen).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct Branding {
    /// Optional accent color as a `#rrggbb` string.
    #[validate(length(min = 4, max = 16))]
    pub accent_color: Option<String>,
    /// Optional logo URL rendered on the screen role.
    #[validate(length(min = 1, max = 512))]
    pub logo_url: Option<String>,
}

/// A quiz session: the unit every other entity scopes to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct SessionRow {
    /// Primary key of the session.
    pub id: SessionId,
    /// Display name shown on the TV screen.
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Short code teams use to join.
    #[validate(length(min = 4, max = 8))]
    pub access_code: String,
    /// Ordered list of rounds selected for this session.
    pub round_ids: Vec<RoundId>,
    /// Session branding.
    #[validate(nested)]
    pub branding: Branding,
    /// Creation timestamp for auditing.
    pub created_at: SystemTime,
}

/// A participating team.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct TeamRow {
    /// Primary key of the team.
    pub id: TeamId,
    /// Session this team belongs to.
    pub session_id: SessionId,
    /// Display name chosen by the team.
    #[validate(length(min = 1, max = 32))]
    pub name: String,
    /// Display color as a `#rrggbb` string.
    #[validate(length(min = 4, max = 16))]
    pub color: String,
    /// Current score, the monotonic net of all applied deltas.
    pub score: i32,
    /// Whether the team takes part in the current game.
    pub active: bool,
    /// Durable exclusion flag (distinct from the per-question exclusion list
    /// on [`GameStateRow`]).
    pub excluded: bool,
    /// Last connection heartbeat persisted outside the hot path.
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub last_seen_at: Option<SystemTime>,
}

/// Kind of a round, which also fixes the kind of its questions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundKind {
    /// Audio extract, buzz to answer.
    BlindTest,
    /// Multiple choice.
    Qcm,
    /// Free text answer, graded by the operator.
    FreeText,
}

/// An ordered collection of questions played back to back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct RoundRow {
    /// Primary key of the round.
    pub id: RoundId,
    /// Session this round belongs to.
    pub session_id: SessionId,
    /// Title shown between questions.
    #[validate(length(min = 1, max = 64))]
    pub title: String,
    /// Round kind.
    pub kind: RoundKind,
    /// Timer duration applied to each question.
    #[validate(range(min = 1, max = 600))]
    pub timer_secs: u32,
    /// Optional jingle played when the round starts.
    #[validate(length(min = 1, max = 512))]
    pub jingle_url: Option<String>,
    /// Ordered question list.
    pub question_ids: Vec<QuestionId>,
}

/// Cue points into a blind-test audio file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct AudioCues {
    /// Timestamp where the search extract starts.
    pub search_ms: u64,
    /// Timestamp where the solution extract starts.
    pub solution_ms: u64,
}

/// A single question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct QuestionRow {
    /// Primary key of the question.
    pub id: QuestionId,
    /// Round this question belongs to.
    pub round_id: RoundId,
    /// Question kind, normally inherited from the round.
    pub kind: RoundKind,
    /// Prompt read by the host.
    #[validate(length(min = 1, max = 512))]
    pub prompt: String,
    /// Expected answer.
    #[validate(length(min = 1, max = 256))]
    pub answer: String,
    /// Points awarded on a correct answer.
    #[validate(range(min = 0, max = 1000))]
    pub points: i32,
    /// Points removed on a wrong buzz.
    #[validate(range(min = 0, max = 1000))]
    pub penalty: i32,
    /// Optional audio extract.
    #[validate(length(min = 1, max = 512))]
    pub audio_url: Option<String>,
    /// Optional cue points into the audio extract.
    pub cues: Option<AudioCues>,
}

/// Countdown state stored on the game-state singleton.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerState {
    /// Remaining seconds.
    pub remaining_secs: u32,
    /// Whether the countdown is running.
    pub running: bool,
}

/// Outcome of the last graded answer, displayed until the next question.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerResult {
    /// Team whose answer was graded.
    pub team_id: TeamId,
    /// Whether the answer was accepted.
    pub correct: bool,
    /// Score delta applied to the team.
    pub awarded: i32,
}

/// The per-session singleton every client subscribes to.
///
/// All cross-client synchronization flows through writes to this one row;
/// `version` is bumped by the store on every write and doubles as the
/// freshness marker snapshot application checks against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct GameStateRow {
    /// Session this state belongs to (also the row key).
    pub session_id: SessionId,
    /// Server-assigned write counter.
    pub version: u64,
    /// Round currently in play, if any.
    pub current_round_id: Option<RoundId>,
    /// Question currently in play, if any.
    pub current_question_id: Option<QuestionId>,
    /// Instance minted when the current question was activated.
    pub question_instance_id: Option<InstanceId>,
    /// Whether buzzing is currently allowed.
    pub buzzer_armed: bool,
    /// Countdown state.
    pub timer: TimerState,
    /// Teams excluded from the current question.
    pub excluded_team_ids: Vec<TeamId>,
    /// Outcome of the last graded answer.
    pub last_result: Option<AnswerResult>,
}

impl GameStateRow {
    /// Fresh state for a session with nothing in play.
    pub fn initial(session_id: SessionId) -> Self {
        Self {
            session_id,
            version: 0,
            current_round_id: None,
            current_question_id: None,
            question_instance_id: None,
            buzzer_armed: false,
            timer: TimerState::default(),
            excluded_team_ids: Vec::new(),
            last_result: None,
        }
    }
}

/// A team's timestamped bid to answer first.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct BuzzerAttemptRow {
    /// Primary key of the attempt.
    pub id: Uuid,
    /// Session scope.
    pub session_id: SessionId,
    /// Buzzing team.
    pub team_id: TeamId,
    /// Question in play when the buzz was recorded.
    pub question_id: QuestionId,
    /// Instance the buzz is scoped to.
    pub question_instance_id: InstanceId,
    /// Server-assigned monotonic insertion order.
    pub seq: u64,
    /// Server-assigned insertion timestamp.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub server_ts: SystemTime,
}

/// Submitted answer value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum AnswerValue {
    /// Index of the selected QCM choice.
    Choice(u8),
    /// Free-text answer.
    Text(String),
}

/// An answer submitted by a team for one question instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct AnswerRow {
    /// Primary key of the answer.
    pub id: AnswerId,
    /// Session scope.
    pub session_id: SessionId,
    /// Answering team. At most one answer per (team, instance).
    pub team_id: TeamId,
    /// Instance the answer is scoped to.
    pub question_instance_id: InstanceId,
    /// Submitted value.
    pub value: AnswerValue,
    /// Grading outcome; `None` while ungraded.
    pub correct: Option<bool>,
    /// Points awarded by grading.
    pub awarded: i32,
}

/// State of the final round, fetched only while active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct FinalRoundRow {
    /// Primary key.
    pub id: Uuid,
    /// Session scope.
    pub session_id: SessionId,
    /// Whether the final round is in play.
    pub active: bool,
    /// Themes offered to the finalists.
    pub themes: Vec<String>,
    /// Index of the theme currently played.
    pub current_theme: Option<usize>,
    /// Remaining seconds on the final countdown.
    pub remaining_secs: u32,
}

/// Tagged union of every row the backend can hand to the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "table", content = "row")]
pub enum Row {
    /// A [`SessionRow`].
    Session(SessionRow),
    /// A [`TeamRow`].
    Team(TeamRow),
    /// A [`RoundRow`].
    Round(RoundRow),
    /// A [`QuestionRow`].
    Question(QuestionRow),
    /// A [`GameStateRow`].
    GameState(GameStateRow),
    /// A [`BuzzerAttemptRow`].
    Attempt(BuzzerAttemptRow),
    /// An [`AnswerRow`].
    Answer(AnswerRow),
    /// A [`FinalRoundRow`].
    FinalRound(FinalRoundRow),
}

impl Row {
    /// Primary key of the wrapped row.
    pub fn id(&self) -> Uuid {
        match self {
            Row::Session(row) => row.id,
            Row::Team(row) => row.id,
            Row::Round(row) => row.id,
            Row::Question(row) => row.id,
            Row::GameState(row) => row.session_id,
            Row::Attempt(row) => row.id,
            Row::Answer(row) => row.id,
            Row::FinalRound(row) => row.id,
        }
    }

    /// Session the row is scoped to, when it carries one.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Row::Session(row) => Some(row.id),
            Row::Team(row) => Some(row.session_id),
            Row::Round(row) => Some(row.session_id),
            Row::Question(_) => None,
            Row::GameState(row) => Some(row.session_id),
            Row::Attempt(row) => Some(row.session_id),
            Row::Answer(row) => Some(row.session_id),
            Row::FinalRound(row) => Some(row.session_id),
        }
    }

    /// Question instance the row is scoped to, when it carries one.
    pub fn instance_id(&self) -> Option<InstanceId> {
        match self {
            Row::Attempt(row) => Some(row.question_instance_id),
            Row::Answer(row) => Some(row.question_instance_id),
            _ => None,
        }
    }

    /// Round the row is scoped to, when it carries one.
    pub fn round_id(&self) -> Option<RoundId> {
        match self {
            Row::Round(row) => Some(row.id),
            Row::Question(row) => Some(row.round_id),
            _ => None,
        }
    }

    /// Validate the wrapped row at the backend boundary.
    pub fn validate_boundary(&self) -> Result<(), ValidationErrors> {
        match self {
            Row::Session(row) => row.validate(),
            Row::Team(row) => row.validate(),
            Row::Round(row) => row.validate(),
            Row::Question(row) => row.validate(),
            Row::GameState(row) => row.validate(),
            Row::Attempt(row) => row.validate(),
            Row::Answer(row) => row.validate(),
            Row::FinalRound(row) => row.validate(),
        }
    }

    /// Extract a team row.
    pub fn into_team(self) -> Option<TeamRow> {
        match self {
            Row::Team(row) => Some(row),
            _ => None,
        }
    }

    /// Extract a round row.
    pub fn into_round(self) -> Option<RoundRow> {
        match self {
            Row::Round(row) => Some(row),
            _ => None,
        }
    }

    /// Extract a question row.
    pub fn into_question(self) -> Option<QuestionRow> {
        match self {
            Row::Question(row) => Some(row),
            _ => None,
        }
    }

    /// Extract a buzzer attempt row.
    pub fn into_attempt(self) -> Option<BuzzerAttemptRow> {
        match self {
            Row::Attempt(row) => Some(row),
            _ => None,
        }
    }

    /// Extract an answer row.
    pub fn into_answer(self) -> Option<AnswerRow> {
        match self {
            Row::Answer(row) => Some(row),
            _ => None,
        }
    }

    /// Extract a final round row.
    pub fn into_final_round(self) -> Option<FinalRoundRow> {
        match self {
            Row::FinalRound(row) => Some(row),
            _ => None,
        }
    }

    /// Extract a session row.
    pub fn into_session(self) -> Option<SessionRow> {
        match self {
            Row::Session(row) => Some(row),
            _ => None,
        }
    }
}
