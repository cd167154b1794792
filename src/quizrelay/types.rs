use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QuizRelayError, Result};

/// Topic identity: one quiz instance
pub type QuizId = Uuid;
pub type UserId = Uuid;
pub type QuestionId = Uuid;
pub type SubscriberId = Uuid;

/// Parses a path or header identifier, reporting which kind of ID was bad.
pub fn parse_id(what: &str, raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| QuizRelayError::invalid_id(what, raw))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizStatus {
    Waiting,
    Active,
    Completed,
}

/// Full quiz content, answer keys included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: QuizId,
    pub title: String,
    pub status: QuizStatus,
    pub questions: Vec<Question>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Quiz {
    pub fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    /// Strips every correct answer. Only for responses leaving the process.
    pub fn redacted(mut self) -> Self {
        for question in &mut self.questions {
            question.correct_answer.clear();
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    #[serde(rename = "quiz_session_id")]
    pub quiz_id: QuizId,
    pub question_text: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub points: u32,
    pub order: u32,
}

impl Question {
    pub fn is_correct(&self, answer: &str) -> bool {
        self.correct_answer == answer
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub question_id: QuestionId,
    pub answer: String,
    pub is_correct: bool,
    pub answered_at: DateTime<Utc>,
}

/// One aggregated row of the ledger: a participant and their derived score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantScore {
    pub user_id: UserId,
    pub username: String,
    pub score: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: UserId,
    pub username: String,
    pub score: u64,
    pub rank: usize,
}

/// Full ranked leaderboard, always rebuilt wholesale
pub type LeaderboardSnapshot = Vec<LeaderboardEntry>;
