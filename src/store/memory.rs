use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use tokio::time::Instant;

use crate::error::{ErrorCode, QuizRelayError, Result};
use crate::quizrelay::types::{AnswerRecord, ParticipantScore, QuestionId, Quiz, QuizId, User, UserId};
use crate::store::{CacheStore, LedgerStore};

#[derive(Debug, Clone)]
enum CachedValue {
    Text(String),
    /// Kept highest score first; equal scores keep insertion order
    Sorted(Vec<(String, f64)>),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedValue,
    expires_at: Instant,
}

/// Process-local cache store with lazy TTL expiry.
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the live entry for `key`, dropping it if expired.
    fn live(&self, key: &str) -> Option<CachedValue> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
            debug!("Expired cache key: {}", key);
        }
        None
    }
}

fn wrong_type(key: &str) -> QuizRelayError {
    QuizRelayError::new(ErrorCode::CacheCorrupt, format!("key {} holds the wrong kind of value", key))
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.live(key) {
            Some(CachedValue::Text(value)) => Ok(Some(value)),
            Some(CachedValue::Sorted(_)) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: CachedValue::Text(value.to_string()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live(key).is_some())
    }

    async fn replace_sorted(&self, key: &str, members: &[(String, f64)], ttl: Duration) -> Result<()> {
        if members.is_empty() {
            // An empty sorted set does not exist as a key
            self.entries.remove(key);
            return Ok(());
        }
        let mut sorted = members.to_vec();
        sorted.sort_by(|a, b| b.1.total_cmp(&a.1));
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: CachedValue::Sorted(sorted),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn read_sorted_desc(&self, key: &str) -> Result<Vec<(String, f64)>> {
        match self.live(key) {
            Some(CachedValue::Sorted(members)) => Ok(members),
            Some(CachedValue::Text(_)) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }
}

/// Process-local answer ledger.
#[derive(Default)]
pub struct InMemoryLedger {
    quizzes: DashMap<QuizId, Quiz>,
    /// question -> (owning quiz, points)
    questions: DashMap<QuestionId, (QuizId, u32)>,
    users: DashMap<UserId, User>,
    usernames: DashMap<String, UserId>,
    /// Per quiz, in the order answers were saved
    answers: DashMap<QuizId, Vec<AnswerRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn points_for(&self, record: &AnswerRecord) -> u64 {
        if !record.is_correct {
            return 0;
        }
        self.questions
            .get(&record.question_id)
            .map(|q| q.1 as u64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn create_quiz(&self, quiz: &Quiz) -> Result<()> {
        match self.quizzes.entry(quiz.id) {
            Entry::Occupied(_) => Err(QuizRelayError::new(ErrorCode::StorageConflict, format!("quiz {} already exists", quiz.id))),
            Entry::Vacant(slot) => {
                for question in &quiz.questions {
                    self.questions.insert(question.id, (quiz.id, question.points));
                }
                slot.insert(quiz.clone());
                Ok(())
            }
        }
    }

    async fn get_quiz(&self, id: QuizId) -> Result<Option<Quiz>> {
        Ok(self.quizzes.get(&id).map(|quiz| {
            let mut quiz = quiz.value().clone();
            quiz.questions.sort_by_key(|q| q.order);
            quiz
        }))
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        match self.usernames.entry(user.username.clone()) {
            Entry::Occupied(_) => Err(QuizRelayError::new(ErrorCode::StorageConflict, format!("username {} is taken", user.username))),
            Entry::Vacant(slot) => {
                self.users.insert(user.id, user.clone());
                slot.insert(user.id);
                Ok(())
            }
        }
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let id = match self.usernames.get(username) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.users.get(&id).map(|user| user.value().clone()))
    }

    async fn save_answer(&self, record: &AnswerRecord) -> Result<()> {
        let quiz_id = match self.questions.get(&record.question_id) {
            Some(question) => question.0,
            None => {
                return Err(QuizRelayError::new(
                    ErrorCode::StorageConflict,
                    format!("answer references unknown question {}", record.question_id),
                ))
            }
        };
        if !self.users.contains_key(&record.user_id) {
            return Err(QuizRelayError::new(
                ErrorCode::UserNotFound,
                format!("answer references unknown user {}", record.user_id),
            ));
        }
        self.answers.entry(quiz_id).or_default().push(record.clone());
        Ok(())
    }

    async fn sum_user_score(&self, user: UserId, quiz: QuizId) -> Result<u64> {
        let answers = match self.answers.get(&quiz) {
            Some(answers) => answers,
            None => return Ok(0),
        };
        Ok(answers
            .iter()
            .filter(|record| record.user_id == user)
            .map(|record| self.points_for(record))
            .sum())
    }

    async fn list_participant_scores(&self, quiz: QuizId) -> Result<Vec<ParticipantScore>> {
        let answers = match self.answers.get(&quiz) {
            Some(answers) => answers.value().clone(),
            None => return Ok(Vec::new()),
        };

        // First-answer order is the tie order among equal scores
        let mut order: Vec<UserId> = Vec::new();
        let mut totals: HashMap<UserId, u64> = HashMap::new();
        for record in &answers {
            let total = totals.entry(record.user_id).or_insert_with(|| {
                order.push(record.user_id);
                0
            });
            *total += self.points_for(record);
        }

        let mut rows: Vec<ParticipantScore> = order
            .into_iter()
            .map(|user_id| ParticipantScore {
                user_id,
                username: self.users.get(&user_id).map(|u| u.username.clone()).unwrap_or_default(),
                score: totals.get(&user_id).copied().unwrap_or(0),
            })
            .collect();
        rows.sort_by(|a, b| b.score.cmp(&a.score));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quizrelay::types::{Question, QuizStatus};
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test(start_paused = true)]
    async fn cache_entries_expire_after_ttl() {
        let cache = InMemoryCache::new();
        cache.set("quiz:1", "{}", Duration::from_secs(60)).await.unwrap();
        assert!(cache.exists("quiz:1").await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("quiz:1").await.unwrap(), None);
        assert!(!cache.exists("quiz:1").await.unwrap());
    }

    #[tokio::test]
    async fn sorted_set_reads_highest_first_and_replaces_wholesale() {
        let cache = InMemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache
            .replace_sorted("lb", &[("a".into(), 5.0), ("b".into(), 20.0), ("c".into(), 5.0)], ttl)
            .await
            .unwrap();
        let members: Vec<String> = cache.read_sorted_desc("lb").await.unwrap().into_iter().map(|m| m.0).collect();
        assert_eq!(members, vec!["b", "a", "c"]);

        cache.replace_sorted("lb", &[("d".into(), 1.0)], ttl).await.unwrap();
        assert_eq!(cache.read_sorted_desc("lb").await.unwrap(), vec![("d".to_string(), 1.0)]);

        cache.replace_sorted("lb", &[], ttl).await.unwrap();
        assert!(!cache.exists("lb").await.unwrap());
    }

    #[tokio::test]
    async fn reading_text_key_as_sorted_set_is_an_error() {
        let cache = InMemoryCache::new();
        cache.set("k", "v", Duration::from_secs(5)).await.unwrap();
        let err = cache.read_sorted_desc("k").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::CacheCorrupt));
    }

    fn quiz_with_points(points: &[u32]) -> Quiz {
        let id = Uuid::new_v4();
        Quiz {
            id,
            title: "t".into(),
            status: QuizStatus::Waiting,
            questions: points
                .iter()
                .enumerate()
                .map(|(i, p)| Question {
                    id: Uuid::new_v4(),
                    quiz_id: id,
                    question_text: format!("q{}", i + 1),
                    options: vec!["a".into(), "b".into()],
                    correct_answer: "a".into(),
                    points: *p,
                    order: i as u32 + 1,
                })
                .collect(),
            created_at: Utc::now(),
            expires_at: Utc::now(),
        }
    }

    async fn user(ledger: &InMemoryLedger, name: &str) -> User {
        let user = User { id: Uuid::new_v4(), username: name.into(), created_at: Utc::now() };
        ledger.create_user(&user).await.unwrap();
        user
    }

    fn answer(user: &User, question: &Question, correct: bool) -> AnswerRecord {
        AnswerRecord {
            id: Uuid::new_v4(),
            user_id: user.id,
            question_id: question.id,
            answer: if correct { "a".into() } else { "b".into() },
            is_correct: correct,
            answered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn participant_scores_only_count_correct_answers_in_the_quiz() {
        let ledger = InMemoryLedger::new();
        let quiz = quiz_with_points(&[10, 5]);
        let other = quiz_with_points(&[100]);
        ledger.create_quiz(&quiz).await.unwrap();
        ledger.create_quiz(&other).await.unwrap();
        let alice = user(&ledger, "alice").await;
        let bob = user(&ledger, "bob").await;
        let _carol = user(&ledger, "carol").await;

        ledger.save_answer(&answer(&bob, &quiz.questions[1], true)).await.unwrap();
        ledger.save_answer(&answer(&alice, &quiz.questions[0], true)).await.unwrap();
        ledger.save_answer(&answer(&alice, &quiz.questions[1], false)).await.unwrap();
        ledger.save_answer(&answer(&alice, &other.questions[0], true)).await.unwrap();

        assert_eq!(ledger.sum_user_score(alice.id, quiz.id).await.unwrap(), 10);
        let rows = ledger.list_participant_scores(quiz.id).await.unwrap();
        let summary: Vec<(&str, u64)> = rows.iter().map(|r| (r.username.as_str(), r.score)).collect();
        assert_eq!(summary, vec![("alice", 10), ("bob", 5)]);
    }

    #[tokio::test]
    async fn usernames_are_unique() {
        let ledger = InMemoryLedger::new();
        user(&ledger, "alice").await;
        let clash = User { id: Uuid::new_v4(), username: "alice".into(), created_at: Utc::now() };
        let err = ledger.create_user(&clash).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::StorageConflict));
        assert!(ledger.get_user_by_username("alice").await.unwrap().is_some());
        assert!(ledger.get_user_by_username("mallory").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn answers_to_unknown_questions_are_rejected() {
        let ledger = InMemoryLedger::new();
        let alice = user(&ledger, "alice").await;
        let stray = &quiz_with_points(&[10]).questions[0];
        assert!(ledger.save_answer(&answer(&alice, stray, true)).await.is_err());
    }
}
