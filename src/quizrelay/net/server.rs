use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info, warn};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::error::{ErrorCategory, ErrorCode, QuizRelayError, Result};
use crate::quizrelay::config::SessionConfig;
use crate::quizrelay::net::session::ViewerSession;
use crate::quizrelay::service::QuizService;
use crate::quizrelay::types::{parse_id, Quiz};
use crate::wire::types::{
    CreateQuizRequest, CreateQuizResponse, ErrorResponse, JoinQuizRequest, JoinQuizResponse, LeaderboardResponse,
    SubmitAnswerRequest, SubmitAnswerResponse,
};

const USER_ID_HEADER: &str = "x-user-id";

/// Shared state handed to every handler
pub struct AppState {
    pub service: Arc<QuizService>,
    pub session: SessionConfig,
}

impl IntoResponse for QuizRelayError {
    fn into_response(self) -> Response {
        let status = match self.category() {
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("❌ Request failed: {}", self);
        }

        let body = ErrorResponse {
            error: self.message(),
            code: self.code().map(|code| code.as_u16()),
        };
        (status, Json(body)).into_response()
    }
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| QuizRelayError::new(ErrorCode::InvalidRequest, rejection.body_text()))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/quiz", post(create_quiz))
        .route("/api/quiz/:quiz_id", get(get_quiz))
        .route("/api/quiz/:quiz_id/join", post(join_quiz))
        .route("/api/quiz/:quiz_id/answer", post(submit_answer))
        .route("/api/quiz/:quiz_id/leaderboard", get(get_leaderboard))
        .route("/ws/quiz/:quiz_id/leaderboard", get(leaderboard_socket))
        .route("/health", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Binds `addr` and serves until `shutdown` fires
pub async fn run_server(addr: &str, state: Arc<AppState>, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state, shutdown).await
}

pub async fn serve(listener: TcpListener, state: Arc<AppState>, shutdown: CancellationToken) -> Result<()> {
    info!("Quiz relay listening on {}", listener.local_addr()?);
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("Quiz relay stopped accepting connections");
    Ok(())
}

async fn create_quiz(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<CreateQuizRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateQuizResponse>)> {
    let quiz = state.service.create_quiz(body(payload)?).await?;
    let response = CreateQuizResponse {
        quiz_id: quiz.id,
        title: quiz.title,
        status: quiz.status,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

async fn get_quiz(State(state): State<Arc<AppState>>, Path(quiz_id): Path<String>) -> Result<Json<Quiz>> {
    let quiz_id = parse_id("quiz", &quiz_id)?;
    let quiz = state.service.get_quiz(quiz_id).await?;
    Ok(Json(quiz.redacted()))
}

async fn join_quiz(
    State(state): State<Arc<AppState>>,
    Path(quiz_id): Path<String>,
    payload: std::result::Result<Json<JoinQuizRequest>, JsonRejection>,
) -> Result<Json<JoinQuizResponse>> {
    let quiz_id = parse_id("quiz", &quiz_id)?;
    let user = state.service.join_quiz(quiz_id, body(payload)?).await?;
    Ok(Json(JoinQuizResponse {
        user_id: user.id,
        username: user.username,
    }))
}

async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Path(quiz_id): Path<String>,
    headers: HeaderMap,
    payload: std::result::Result<Json<SubmitAnswerRequest>, JsonRejection>,
) -> Result<Json<SubmitAnswerResponse>> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| QuizRelayError::new(ErrorCode::MissingUserId, ErrorCode::MissingUserId.description()))?
        .to_string();
    let response = state.service.submit_answer(&user_id, &quiz_id, body(payload)?).await?;
    Ok(Json(response))
}

async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Path(quiz_id): Path<String>,
) -> Result<Json<LeaderboardResponse>> {
    let quiz_id = parse_id("quiz", &quiz_id)?;
    let leaderboard = state.service.get_leaderboard(quiz_id).await?;
    Ok(Json(LeaderboardResponse { leaderboard }))
}

/// The quiz id is checked before the upgrade so a bad id gets a plain 400.
async fn leaderboard_socket(
    ws: Option<WebSocketUpgrade>,
    State(state): State<Arc<AppState>>,
    Path(quiz_id): Path<String>,
) -> Result<Response> {
    let quiz_id = parse_id("quiz", &quiz_id)?;
    let ws = ws.ok_or_else(|| QuizRelayError::new(ErrorCode::InvalidRequest, "expected a websocket upgrade"))?;
    let registry = state.service.hubs().clone();
    let config = state.session.clone();
    Ok(ws
        .on_failed_upgrade(move |e| warn!("WebSocket upgrade for quiz {} failed: {}", quiz_id, e))
        .on_upgrade(move |socket| ViewerSession::run(socket, registry, quiz_id, config)))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "hubs": state.service.hubs().hub_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::quizrelay::cache::CacheLayer;
    use crate::quizrelay::config::{CacheConfig, HubConfig};
    use crate::quizrelay::leaderboard::LeaderboardAssembler;
    use crate::quizrelay::registry::HubRegistry;
    use crate::store::{InMemoryCache, InMemoryLedger};

    fn router() -> Router {
        let cache = CacheLayer::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryLedger::new()),
            LeaderboardAssembler::default(),
            &CacheConfig::default(),
        );
        let service = QuizService::new(Arc::new(cache), Arc::new(HubRegistry::new(HubConfig::default())));
        build_router(Arc::new(AppState {
            service: Arc::new(service),
            session: SessionConfig::default(),
        }))
    }

    async fn call(router: &Router, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            request = request.header("X-User-ID", user);
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    async fn create(router: &Router) -> Value {
        let (status, created) = call(
            router,
            "POST",
            "/api/quiz",
            None,
            Some(json!({
                "title": "Rivers",
                "questions": [
                    {"question_text": "Longest river?", "options": ["Nile", "Amazon"], "correct_answer": "Nile"}
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "waiting");
        created
    }

    #[tokio::test]
    async fn quiz_response_hides_answer_keys() {
        let router = router();
        let created = create(&router).await;
        let quiz_id = created["quiz_id"].as_str().unwrap();

        let (status, quiz) = call(&router, "GET", &format!("/api/quiz/{}", quiz_id), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(quiz["questions"][0]["points"], 10);
        assert_eq!(quiz["questions"][0]["correct_answer"], "");
        assert_eq!(quiz["questions"][0]["options"], json!(["Nile", "Amazon"]));
    }

    #[tokio::test]
    async fn join_answer_and_read_leaderboard() {
        let router = router();
        let created = create(&router).await;
        let quiz_id = created["quiz_id"].as_str().unwrap();

        let (_, quiz) = call(&router, "GET", &format!("/api/quiz/{}", quiz_id), None, None).await;
        let question_id = quiz["questions"][0]["id"].as_str().unwrap().to_string();

        let (status, joined) = call(
            &router,
            "POST",
            &format!("/api/quiz/{}/join", quiz_id),
            None,
            Some(json!({"username": "alice"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let user_id = joined["user_id"].as_str().unwrap().to_string();

        let (status, scored) = call(
            &router,
            "POST",
            &format!("/api/quiz/{}/answer", quiz_id),
            Some(&user_id),
            Some(json!({"question_id": question_id, "answer": "Nile"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(scored, json!({"correct": true, "new_score": 10, "points": 10}));

        let (status, board) = call(&router, "GET", &format!("/api/quiz/{}/leaderboard", quiz_id), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(board["leaderboard"][0]["username"], "alice");
        assert_eq!(board["leaderboard"][0]["rank"], 1);
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let router = router();
        let created = create(&router).await;
        let quiz_id = created["quiz_id"].as_str().unwrap();

        let (status, body) = call(&router, "GET", "/api/quiz/not-a-uuid", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("quiz"));

        let (status, _) = call(&router, "GET", &format!("/api/quiz/{}", Uuid::new_v4()), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let answer = json!({"question_id": Uuid::new_v4().to_string(), "answer": "Nile"});
        let (status, body) = call(&router, "POST", &format!("/api/quiz/{}/answer", quiz_id), None, Some(answer.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "User ID required");

        let user = Uuid::new_v4().to_string();
        let (status, _) = call(&router, "POST", &format!("/api/quiz/{}/answer", quiz_id), Some(&user), Some(answer)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&router, "POST", "/api/quiz", None, Some(json!({"title": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], ErrorCode::InvalidRequest.as_u16());
    }

    #[tokio::test]
    async fn websocket_route_rejects_malformed_quiz_id() {
        let router = router();
        let (status, body) = call(&router, "GET", "/ws/quiz/not-a-uuid/leaderboard", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], ErrorCode::InvalidId.as_u16());
    }

    #[tokio::test]
    async fn health_reports_hub_count() {
        let (status, body) = call(&router(), "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "hubs": 0}));
    }
}
