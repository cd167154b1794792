//! Read-through/write-through caching of quiz content and leaderboards.
//!
//! Cache failures never fail a read: they are logged and the read falls back
//! to the ledger. Only ledger failures reach the caller.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, info, warn};

use crate::error::{ErrorCode, QuizRelayError, Result};
use crate::quizrelay::config::CacheConfig;
use crate::quizrelay::leaderboard::LeaderboardAssembler;
use crate::quizrelay::types::{LeaderboardEntry, LeaderboardSnapshot, Quiz, QuizId, UserId};
use crate::store::{CacheStore, LedgerStore};

/// Key prefix for full quiz content: quiz:{quiz_id}
pub const QUIZ_KEY_PREFIX: &str = "quiz:";

/// Key prefix for leaderboard sorted sets: leaderboard:{quiz_id}
pub const LEADERBOARD_KEY_PREFIX: &str = "leaderboard:";

pub fn quiz_key(quiz_id: QuizId) -> String {
    format!("{}{}", QUIZ_KEY_PREFIX, quiz_id)
}

pub fn leaderboard_key(quiz_id: QuizId) -> String {
    format!("{}{}", LEADERBOARD_KEY_PREFIX, quiz_id)
}

/// Sorted-set member for one participant: `{user_id}:{username}`.
pub fn encode_member(user_id: UserId, username: &str) -> String {
    format!("{}:{}", user_id, username)
}

/// Splits at the first `:`; the username itself may contain colons.
pub fn decode_member(member: &str) -> Option<(UserId, String)> {
    let (id, username) = member.split_once(':')?;
    let user_id = UserId::parse_str(id).ok()?;
    Some((user_id, username.to_string()))
}

pub struct CacheLayer {
    cache: Arc<dyn CacheStore>,
    ledger: Arc<dyn LedgerStore>,
    assembler: LeaderboardAssembler,
    quiz_ttl: Duration,
    leaderboard_ttl: Duration,
    /// Per-quiz watermark, bumped on every ledger write and invalidation.
    /// A recompute only keeps its write-back if the watermark it read under
    /// is still current afterwards.
    watermarks: DashMap<QuizId, u64>,
}

impl CacheLayer {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        ledger: Arc<dyn LedgerStore>,
        assembler: LeaderboardAssembler,
        config: &CacheConfig,
    ) -> Self {
        Self {
            cache,
            ledger,
            assembler,
            quiz_ttl: config.quiz_ttl(),
            leaderboard_ttl: config.leaderboard_ttl(),
            watermarks: DashMap::new(),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    /// Full quiz content, answer keys included.
    pub async fn get_quiz(&self, quiz_id: QuizId) -> Result<Quiz> {
        if let Some(quiz) = self.cached_quiz(quiz_id).await {
            debug!("Quiz {} served from cache", quiz_id);
            return Ok(quiz);
        }

        let quiz = self
            .ledger
            .get_quiz(quiz_id)
            .await?
            .ok_or_else(|| QuizRelayError::new(ErrorCode::QuizNotFound, format!("quiz {} not found", quiz_id)))?;
        self.put_quiz(&quiz).await;
        Ok(quiz)
    }

    async fn cached_quiz(&self, quiz_id: QuizId) -> Option<Quiz> {
        let key = quiz_key(quiz_id);
        let raw = match self.cache.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("⚠️ Quiz cache read failed for {}: {}", key, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(quiz) => Some(quiz),
            Err(e) => {
                warn!("⚠️ Discarding undecodable cached quiz {}: {}", key, e);
                None
            }
        }
    }

    /// Writes the quiz through to the cache verbatim. Failures are logged.
    pub async fn put_quiz(&self, quiz: &Quiz) {
        let key = quiz_key(quiz.id);
        let raw = match serde_json::to_string(quiz) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("⚠️ Failed to serialize quiz {}: {}", quiz.id, e);
                return;
            }
        };
        if let Err(e) = self.cache.set(&key, &raw, self.quiz_ttl).await {
            warn!("⚠️ Failed to cache quiz {}: {}", key, e);
        }
    }

    /// Cached snapshot if the cache holds at least one entry, otherwise a
    /// fresh one assembled from the ledger and written back.
    pub async fn get_leaderboard(&self, quiz_id: QuizId) -> Result<LeaderboardSnapshot> {
        if let Some(snapshot) = self.cached_leaderboard(quiz_id).await {
            debug!("Leaderboard {} served from cache ({} entries)", quiz_id, snapshot.len());
            return Ok(snapshot);
        }

        let watermark = self.watermark(quiz_id);
        let rows = self.ledger.list_participant_scores(quiz_id).await?;
        let snapshot = self.assembler.assemble(rows);
        if self.watermark(quiz_id) != watermark {
            debug!("Leaderboard {} changed during recompute, not caching", quiz_id);
            return Ok(snapshot);
        }

        self.store_leaderboard(quiz_id, &snapshot).await;
        // A write that landed between the check and the store must not leave
        // this snapshot behind
        if self.watermark(quiz_id) != watermark {
            debug!("Leaderboard {} changed while caching, dropping snapshot", quiz_id);
            if let Err(e) = self.cache.delete(&leaderboard_key(quiz_id)).await {
                warn!("⚠️ Failed to drop stale leaderboard {}: {}", quiz_id, e);
            }
        }
        debug!("Leaderboard {} recomputed ({} entries)", quiz_id, snapshot.len());
        Ok(snapshot)
    }

    fn watermark(&self, quiz_id: QuizId) -> u64 {
        self.watermarks.get(&quiz_id).map(|w| *w).unwrap_or(0)
    }

    /// Marks every snapshot computed so far for `quiz_id` as outdated. Call it
    /// right after the ledger changes, before anything reads it again.
    pub fn mark_leaderboard_stale(&self, quiz_id: QuizId) {
        *self.watermarks.entry(quiz_id).or_insert(0) += 1;
    }

    async fn cached_leaderboard(&self, quiz_id: QuizId) -> Option<LeaderboardSnapshot> {
        let key = leaderboard_key(quiz_id);
        let members = match self.cache.read_sorted_desc(&key).await {
            Ok(members) => members,
            Err(e) => {
                warn!("⚠️ Leaderboard cache read failed for {}: {}", key, e);
                return None;
            }
        };

        let entries: Vec<LeaderboardEntry> = members
            .into_iter()
            .filter_map(|(member, score)| match decode_member(&member) {
                Some((user_id, username)) => Some(LeaderboardEntry {
                    user_id,
                    username,
                    score: score.max(0.0) as u64,
                    rank: 0,
                }),
                None => {
                    warn!("⚠️ Skipping malformed leaderboard member {:?} in {}", member, key);
                    None
                }
            })
            .collect();

        if entries.is_empty() {
            return None;
        }
        Some(self.assembler.rank(entries))
    }

    async fn store_leaderboard(&self, quiz_id: QuizId, snapshot: &LeaderboardSnapshot) {
        let key = leaderboard_key(quiz_id);
        let members: Vec<(String, f64)> = snapshot
            .iter()
            .map(|entry| (encode_member(entry.user_id, &entry.username), entry.score as f64))
            .collect();
        if let Err(e) = self.cache.replace_sorted(&key, &members, self.leaderboard_ttl).await {
            warn!("⚠️ Failed to cache leaderboard {}: {}", key, e);
        }
    }

    pub async fn invalidate_leaderboard(&self, quiz_id: QuizId) -> Result<()> {
        self.mark_leaderboard_stale(quiz_id);
        self.cache.delete(&leaderboard_key(quiz_id)).await?;
        info!("🗑️ Invalidated leaderboard cache for {}", quiz_id);
        Ok(())
    }

    pub async fn invalidate_quiz(&self, quiz_id: QuizId) -> Result<()> {
        self.cache.delete(&quiz_key(quiz_id)).await?;
        info!("🗑️ Invalidated quiz cache for {}", quiz_id);
        Ok(())
    }

    pub async fn is_leaderboard_cached(&self, quiz_id: QuizId) -> Result<bool> {
        self.cache.exists(&leaderboard_key(quiz_id)).await
    }
}
