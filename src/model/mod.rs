//! Runtime representations of the entities a client renders.
//!
//! These are the shapes the presentation layer consumes; they are built from
//! persisted rows and carry derived fields (such as the first-buzz flag)
//! that are never stored.

use std::time::SystemTime;

use serde::Serialize;

use crate::store::rows::{
    AnswerRow, AnswerValue, AudioCues, BuzzerAttemptRow, FinalRoundRow, QuestionId, QuestionRow,
    RoundId, RoundKind, RoundRow, TeamId, TeamRow,
};

/// A team as rendered by the UIs.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Team {
    /// Stable identifier.
    pub id: TeamId,
    /// Display name.
    pub name: String,
    /// Display color.
    pub color: String,
    /// Current score.
    pub score: i32,
    /// Whether the team takes part in the current game.
    pub active: bool,
    /// Durable exclusion flag.
    pub excluded: bool,
}

impl From<TeamRow> for Team {
    fn from(row: TeamRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            color: row.color,
            score: row.score,
            active: row.active,
            excluded: row.excluded,
        }
    }
}

/// The round currently in play.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Round {
    /// Stable identifier.
    pub id: RoundId,
    /// Title shown between questions.
    pub title: String,
    /// Round kind.
    pub kind: RoundKind,
    /// Timer duration applied to each question.
    pub timer_secs: u32,
    /// Optional jingle reference.
    pub jingle_url: Option<String>,
    /// Ordered question list.
    pub question_ids: Vec<QuestionId>,
}

impl From<RoundRow> for Round {
    fn from(row: RoundRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            kind: row.kind,
            timer_secs: row.timer_secs,
            jingle_url: row.jingle_url,
            question_ids: row.question_ids,
        }
    }
}

/// The question currently in play.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Question {
    /// Stable identifier.
    pub id: QuestionId,
    /// Question kind.
    pub kind: RoundKind,
    /// Prompt read by the host.
    pub prompt: String,
    /// Expected answer.
    pub answer: String,
    /// Points awarded on a correct answer.
    pub points: i32,
    /// Points removed on a wrong buzz.
    pub penalty: i32,
    /// Optional audio extract.
    pub audio_url: Option<String>,
    /// Optional cue points.
    pub cues: Option<AudioCues>,
}

impl From<QuestionRow> for Question {
    fn from(row: QuestionRow) -> Self {
        Self {
            id: row.id,
            kind: row.kind,
            prompt: row.prompt,
            answer: row.answer,
            points: row.points,
            penalty: row.penalty,
            audio_url: row.audio_url,
            cues: row.cues,
        }
    }
}

/// A buzz as rendered by the UIs, with the derived first-buzz flag.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BuzzerAttempt {
    /// Buzzing team.
    pub team_id: TeamId,
    /// Server-assigned insertion order.
    pub seq: u64,
    /// Server-assigned insertion timestamp.
    pub server_ts: SystemTime,
    /// Whether this buzz won its race. Derived, never persisted.
    pub is_first: bool,
}

impl From<BuzzerAttemptRow> for BuzzerAttempt {
    fn from(row: BuzzerAttemptRow) -> Self {
        Self {
            team_id: row.team_id,
            seq: row.seq,
            server_ts: row.server_ts,
            is_first: false,
        }
    }
}

/// An answer as rendered by the UIs.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Answer {
    /// Answering team.
    pub team_id: TeamId,
    /// Submitted value.
    pub value: AnswerValue,
    /// Grading outcome; `None` while ungraded.
    pub correct: Option<bool>,
    /// Points awarded by grading.
    pub awarded: i32,
}

impl From<AnswerRow> for Answer {
    fn from(row: AnswerRow) -> Self {
        Self {
            team_id: row.team_id,
            value: row.value,
            correct: row.correct,
            awarded: row.awarded,
        }
    }
}

/// Final-round state as rendered by the UIs.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FinalRound {
    /// Whether the final round is in play.
    pub active: bool,
    /// Themes offered to the finalists.
    pub themes: Vec<String>,
    /// Index of the theme currently played.
    pub current_theme: Option<usize>,
    /// Remaining seconds on the final countdown.
    pub remaining_secs: u32,
}

impl From<FinalRoundRow> for FinalRound {
    fn from(row: FinalRoundRow) -> Self {
        Self {
            active: row.active,
            themes: row.themes,
            current_theme: row.current_theme,
            remaining_secs: row.remaining_secs,
        }
    }
}
