use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::error::{ErrorCode, QuizRelayError, Result};
use crate::quizrelay::cache::CacheLayer;
use crate::quizrelay::registry::HubRegistry;
use crate::quizrelay::types::{
    parse_id, AnswerRecord, LeaderboardSnapshot, Question, Quiz, QuizId, QuizStatus, User,
};
use crate::wire::types::{CreateQuizRequest, JoinQuizRequest, SubmitAnswerRequest, SubmitAnswerResponse};

const DEFAULT_POINTS: u32 = 10;
const QUIZ_LIFETIME_HOURS: i64 = 24;

/// Owns quiz creation, joining and answer submission, and keeps the cached
/// leaderboard and the live viewers in step with the ledger.
pub struct QuizService {
    cache: Arc<CacheLayer>,
    hubs: Arc<HubRegistry>,
    tasks: TaskTracker,
    /// One lock per quiz so pushes leave in the order their reads happened
    refresh_turns: DashMap<QuizId, Arc<Mutex<()>>>,
    /// Set once `shutdown` has run. Held across `quiesce` so its reopen can
    /// never undo a shutdown.
    stopped: Mutex<bool>,
}

impl QuizService {
    pub fn new(cache: Arc<CacheLayer>, hubs: Arc<HubRegistry>) -> Self {
        Self {
            cache,
            hubs,
            tasks: TaskTracker::new(),
            refresh_turns: DashMap::new(),
            stopped: Mutex::new(false),
        }
    }

    pub fn hubs(&self) -> &Arc<HubRegistry> {
        &self.hubs
    }

    pub async fn create_quiz(&self, request: CreateQuizRequest) -> Result<Quiz> {
        request.validate()?;

        let quiz_id = Uuid::new_v4();
        let created_at = Utc::now();
        let questions = request
            .questions
            .into_iter()
            .enumerate()
            .map(|(i, q)| Question {
                id: Uuid::new_v4(),
                quiz_id,
                question_text: q.question_text,
                options: q.options,
                correct_answer: q.correct_answer,
                points: if q.points == 0 { DEFAULT_POINTS } else { q.points },
                order: i as u32 + 1,
            })
            .collect();

        let quiz = Quiz {
            id: quiz_id,
            title: request.title,
            status: QuizStatus::Waiting,
            questions,
            created_at,
            expires_at: created_at + ChronoDuration::hours(QUIZ_LIFETIME_HOURS),
        };

        self.cache.ledger().create_quiz(&quiz).await?;
        self.cache.put_quiz(&quiz).await;
        info!("✅ Created quiz {} ({:?}) with {} questions", quiz.id, quiz.title, quiz.questions.len());
        Ok(quiz)
    }

    /// Returns the user registered under the username, creating it first if
    /// nobody holds that name yet.
    pub async fn join_quiz(&self, quiz_id: QuizId, request: JoinQuizRequest) -> Result<User> {
        request.validate()?;
        let ledger = self.cache.ledger();

        if ledger.get_quiz(quiz_id).await?.is_none() {
            return Err(QuizRelayError::new(ErrorCode::QuizNotFound, format!("quiz {} not found", quiz_id)));
        }

        if let Some(user) = ledger.get_user_by_username(&request.username).await? {
            debug!("User {:?} rejoined quiz {}", user.username, quiz_id);
            return Ok(user);
        }

        let user = User {
            id: Uuid::new_v4(),
            username: request.username,
            created_at: Utc::now(),
        };
        match ledger.create_user(&user).await {
            Ok(()) => {
                info!("👤 User {:?} joined quiz {}", user.username, quiz_id);
                Ok(user)
            }
            // Lost a race for the name: whoever won is the user
            Err(e) if e.code() == Some(ErrorCode::StorageConflict) => ledger
                .get_user_by_username(&user.username)
                .await?
                .ok_or(e),
            Err(e) => Err(e),
        }
    }

    /// Scores one answer. The ledger write is synchronous; invalidating the
    /// cached leaderboard and pushing a fresh one to viewers happen in the
    /// background and never fail the submission.
    pub async fn submit_answer(
        &self,
        user_id: &str,
        quiz_id: &str,
        request: SubmitAnswerRequest,
    ) -> Result<SubmitAnswerResponse> {
        let user_id = parse_id("user", user_id)?;
        let quiz_id = parse_id("quiz", quiz_id)?;
        let question_id = parse_id("question", &request.question_id)?;

        let quiz = self.cache.get_quiz(quiz_id).await?;
        let question = quiz.question(question_id).ok_or_else(|| {
            QuizRelayError::new(
                ErrorCode::QuestionNotFound,
                format!("question {} not found in quiz {}", question_id, quiz_id),
            )
        })?;

        let correct = question.is_correct(&request.answer);
        let points = if correct { question.points } else { 0 };

        let record = AnswerRecord {
            id: Uuid::new_v4(),
            user_id,
            question_id,
            answer: request.answer,
            is_correct: correct,
            answered_at: Utc::now(),
        };
        self.cache.ledger().save_answer(&record).await?;
        self.cache.mark_leaderboard_stale(quiz_id);
        debug!("🗑️ Invalidating cache due to new answer for quiz {}", quiz_id);

        let cache = self.cache.clone();
        self.tasks.spawn(async move {
            if let Err(e) = cache.invalidate_leaderboard(quiz_id).await {
                warn!("⚠️ Failed to invalidate leaderboard cache for {}: {}", quiz_id, e);
            }
        });

        let new_score = self.cache.ledger().sum_user_score(user_id, quiz_id).await?;

        let cache = self.cache.clone();
        let hubs = self.hubs.clone();
        let turn = self
            .refresh_turns
            .entry(quiz_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        self.tasks.spawn(async move {
            let _turn = turn.lock().await;
            refresh_viewers(&cache, &hubs, quiz_id).await;
        });

        Ok(SubmitAnswerResponse {
            correct,
            new_score,
            points,
        })
    }

    /// Full quiz content. Callers outside the process must redact it.
    pub async fn get_quiz(&self, quiz_id: QuizId) -> Result<Quiz> {
        self.cache.get_quiz(quiz_id).await
    }

    pub async fn get_leaderboard(&self, quiz_id: QuizId) -> Result<LeaderboardSnapshot> {
        self.cache.get_leaderboard(quiz_id).await
    }

    /// Loads the quiz and its leaderboard into the cache ahead of traffic.
    pub async fn warmup(&self, quiz_id: QuizId) -> Result<()> {
        let started = Instant::now();
        self.cache.get_quiz(quiz_id).await?;
        let leaderboard = self.cache.get_leaderboard(quiz_id).await?;
        info!(
            "🔥 Cache warmed for quiz {} ({} leaderboard entries) in {:?}",
            quiz_id,
            leaderboard.len(),
            started.elapsed()
        );
        Ok(())
    }

    pub async fn invalidate_quiz(&self, quiz_id: QuizId) -> Result<()> {
        self.cache.invalidate_quiz(quiz_id).await
    }

    pub async fn invalidate_leaderboard(&self, quiz_id: QuizId) -> Result<()> {
        self.cache.invalidate_leaderboard(quiz_id).await
    }

    /// Waits for every background task spawned so far. After `shutdown`
    /// this only waits; the tracker stays closed.
    pub async fn quiesce(&self) {
        let stopped = self.stopped.lock().await;
        self.tasks.close();
        self.tasks.wait().await;
        if !*stopped {
            self.tasks.reopen();
        }
    }

    /// Drains background tasks and stops all hubs.
    pub async fn shutdown(&self) {
        let mut stopped = self.stopped.lock().await;
        *stopped = true;
        info!("Draining {} background tasks", self.tasks.len());
        self.tasks.close();
        self.tasks.wait().await;
        self.hubs.shutdown();
    }
}

/// Recompute-and-broadcast for one quiz. Does nothing while nobody watches.
async fn refresh_viewers(cache: &CacheLayer, hubs: &HubRegistry, quiz_id: QuizId) {
    if !hubs.has_subscribers(quiz_id) {
        debug!("No viewers on quiz {}, skipping leaderboard push", quiz_id);
        return;
    }

    let leaderboard = match cache.get_leaderboard(quiz_id).await {
        Ok(leaderboard) => leaderboard,
        Err(e) => {
            error!("❌ Failed to load leaderboard for quiz {}: {}", quiz_id, e);
            return;
        }
    };

    match hubs.broadcast_leaderboard(quiz_id, leaderboard).await {
        Ok(report) => debug!(
            "📡 Leaderboard for quiz {} pushed to {} viewers ({} evicted)",
            quiz_id, report.delivered, report.evicted
        ),
        Err(e) => error!("❌ Failed to broadcast leaderboard for quiz {}: {}", quiz_id, e),
    }
}
