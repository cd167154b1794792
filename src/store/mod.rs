//! Contracts for the two external stores the relay talks to.
//!
//! The [`CacheStore`] is a fast key/value store with TTLs and a sorted-set
//! primitive; the [`LedgerStore`] is the authoritative record of quizzes,
//! users and answers. Neither is transactional with the other.

pub mod memory;
pub mod redis_cache;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::quizrelay::types::{AnswerRecord, ParticipantScore, Quiz, QuizId, User, UserId};

pub use self::memory::{InMemoryCache, InMemoryLedger};
pub use self::redis_cache::RedisCache;

/// Key/value cache with TTLs and sorted sets.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Drops whatever is stored under `key` and stores `members` as a sorted
    /// set expiring after `ttl`.
    async fn replace_sorted(&self, key: &str, members: &[(String, f64)], ttl: Duration) -> Result<()>;

    /// All members of the sorted set under `key`, highest score first.
    /// A missing key reads as an empty set.
    async fn read_sorted_desc(&self, key: &str) -> Result<Vec<(String, f64)>>;
}

/// Source of truth for quizzes, users and the answer ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn create_quiz(&self, quiz: &Quiz) -> Result<()>;

    /// Quiz with all of its questions, ordered by question order.
    async fn get_quiz(&self, id: QuizId) -> Result<Option<Quiz>>;

    /// Fails with `StorageConflict` if the username is taken.
    async fn create_user(&self, user: &User) -> Result<()>;

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn save_answer(&self, record: &AnswerRecord) -> Result<()>;

    /// Sum of points of the user's correct answers within one quiz.
    async fn sum_user_score(&self, user: UserId, quiz: QuizId) -> Result<u64>;

    /// One row per user with at least one answer in the quiz, sorted by
    /// score descending.
    async fn list_participant_scores(&self, quiz: QuizId) -> Result<Vec<ParticipantScore>>;
}
