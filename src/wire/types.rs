use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, QuizRelayError, Result};
use crate::quizrelay::types::{LeaderboardSnapshot, QuizId, QuizStatus, UserId};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateQuizRequest {
    pub title: String,
    pub questions: Vec<QuestionRequest>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuestionRequest {
    pub question_text: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    /// Zero means "use the default of 10"
    #[serde(default)]
    pub points: u32,
}

impl CreateQuizRequest {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(invalid("title is required"));
        }
        if self.questions.is_empty() {
            return Err(invalid("at least one question is required"));
        }
        for (i, question) in self.questions.iter().enumerate() {
            if question.question_text.trim().is_empty() {
                return Err(invalid(format!("question {} has no text", i + 1)));
            }
            if question.options.len() < 2 {
                return Err(invalid(format!("question {} needs at least two options", i + 1)));
            }
            if question.correct_answer.is_empty() {
                return Err(invalid(format!("question {} has no correct answer", i + 1)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JoinQuizRequest {
    pub username: String,
}

impl JoinQuizRequest {
    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(invalid("username is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubmitAnswerRequest {
    pub question_id: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SubmitAnswerResponse {
    pub correct: bool,
    pub new_score: u64,
    pub points: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateQuizResponse {
    pub quiz_id: QuizId,
    pub title: String,
    pub status: QuizStatus,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JoinQuizResponse {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LeaderboardResponse {
    pub leaderboard: LeaderboardSnapshot,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: Option<u16>,
}

fn invalid(message: impl Into<String>) -> QuizRelayError {
    QuizRelayError::new(ErrorCode::InvalidRequest, message)
}
