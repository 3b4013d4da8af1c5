//! REST endpoints over the orchestrator commands.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::error::{AgentError, Error, Result, StoreError};
use crate::orchestrator::{OnboardingRequest, Orchestrator};

/// Shared state for career routes.
#[derive(Clone)]
pub struct OrchestratorRouteState {
    pub orchestrator: Arc<Orchestrator>,
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Store(StoreError::NotFound { .. })
        | Error::Agent(AgentError::Store(StoreError::NotFound { .. }))
        | Error::Agent(AgentError::ActionNotFound { .. }) => StatusCode::NOT_FOUND,
        Error::Agent(AgentError::MissingPrerequisite(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Pipeline(_)
        | Error::Agent(AgentError::InvalidInput(_))
        | Error::Agent(AgentError::ActionNotReady { .. }) => StatusCode::BAD_REQUEST,
        Error::Reroute(_)
        | Error::Agent(AgentError::Reroute(_))
        | Error::Store(StoreError::Conflict { .. })
        | Error::Agent(AgentError::Store(StoreError::Conflict { .. })) => StatusCode::CONFLICT,
        Error::Llm(_) | Error::Agent(AgentError::Llm(_)) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(json!(body))).into_response(),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                warn!(error = %e, status = status.as_u16(), "Request failed");
            }
            (status, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

// ── Request bodies ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateUserRequest {
    user_id: String,
}

#[derive(Deserialize)]
struct AnswersRequest {
    answers: Vec<String>,
}

#[derive(Deserialize)]
struct CompleteRequest {
    hours: f64,
}

#[derive(Deserialize)]
struct ManualCompleteRequest {
    score: u8,
    #[serde(default)]
    hours: f64,
}

#[derive(Deserialize)]
struct BlockerRequest {
    description: String,
    #[serde(default)]
    action_id: Option<String>,
}

#[derive(Deserialize)]
struct RerouteRequest {
    #[serde(default)]
    reason: String,
}

#[derive(Deserialize)]
struct SelectRequest {
    option: String,
}

// ── Handlers ────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "service": "career-nav"}))
}

async fn list_users(State(state): State<OrchestratorRouteState>) -> Response {
    respond(state.orchestrator.list_users().await)
}

async fn create_user(
    State(state): State<OrchestratorRouteState>,
    Json(body): Json<CreateUserRequest>,
) -> Response {
    respond(state.orchestrator.create_user(&body.user_id).await)
}

async fn get_user(State(state): State<OrchestratorRouteState>, Path(user_id): Path<String>) -> Response {
    respond(state.orchestrator.get_context(&user_id).await)
}

async fn delete_user(State(state): State<OrchestratorRouteState>, Path(user_id): Path<String>) -> Response {
    match state.orchestrator.delete_user(&user_id).await {
        Ok(true) => (StatusCode::OK, Json(json!({"status": "deleted"}))).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("No context stored for user {user_id}")})),
        )
            .into_response(),
        Err(e) => respond::<()>(Err(e)),
    }
}

async fn export_user(State(state): State<OrchestratorRouteState>, Path(user_id): Path<String>) -> Response {
    let result = state
        .orchestrator
        .export_context(&user_id)
        .await
        .map(|path| json!({"path": path.display().to_string()}));
    respond(result)
}

async fn onboard(
    State(state): State<OrchestratorRouteState>,
    Json(body): Json<OnboardingRequest>,
) -> Response {
    respond(state.orchestrator.run_onboarding(body).await)
}

async fn diagnostics(
    State(state): State<OrchestratorRouteState>,
    Path(user_id): Path<String>,
    Json(body): Json<AnswersRequest>,
) -> Response {
    respond(state.orchestrator.answer_diagnostics(&user_id, body.answers).await)
}

async fn roadmap(State(state): State<OrchestratorRouteState>, Path(user_id): Path<String>) -> Response {
    respond(state.orchestrator.roadmap_status(&user_id).await)
}

async fn next_action(State(state): State<OrchestratorRouteState>, Path(user_id): Path<String>) -> Response {
    respond(state.orchestrator.next_action(&user_id).await)
}

async fn complete_action(
    State(state): State<OrchestratorRouteState>,
    Path((user_id, action_id)): Path<(String, String)>,
    Json(body): Json<CompleteRequest>,
) -> Response {
    respond(
        state
            .orchestrator
            .complete_action(&user_id, &action_id, body.hours)
            .await,
    )
}

async fn mark_complete(
    State(state): State<OrchestratorRouteState>,
    Path((user_id, action_id)): Path<(String, String)>,
    Json(body): Json<ManualCompleteRequest>,
) -> Response {
    respond(
        state
            .orchestrator
            .mark_action_completed(&user_id, &action_id, body.score, body.hours)
            .await,
    )
}

async fn submit_answers(
    State(state): State<OrchestratorRouteState>,
    Path((user_id, action_id)): Path<(String, String)>,
    Json(body): Json<AnswersRequest>,
) -> Response {
    respond(
        state
            .orchestrator
            .submit_validation_answers(&user_id, &action_id, body.answers)
            .await,
    )
}

async fn feedback(State(state): State<OrchestratorRouteState>, Path(user_id): Path<String>) -> Response {
    respond(state.orchestrator.request_feedback(&user_id).await)
}

async fn blocker(
    State(state): State<OrchestratorRouteState>,
    Path(user_id): Path<String>,
    Json(body): Json<BlockerRequest>,
) -> Response {
    let result = state
        .orchestrator
        .record_blocker(&user_id, &body.description, body.action_id.as_deref())
        .await
        .map(|count| json!({"blockers": count}));
    respond(result)
}

async fn request_reroute(
    State(state): State<OrchestratorRouteState>,
    Path(user_id): Path<String>,
    body: Option<Json<RerouteRequest>>,
) -> Response {
    let reason = body.map(|Json(b)| b.reason).unwrap_or_default();
    respond(state.orchestrator.request_reroute(&user_id, &reason).await)
}

async fn select_option(
    State(state): State<OrchestratorRouteState>,
    Path(user_id): Path<String>,
    Json(body): Json<SelectRequest>,
) -> Response {
    respond(state.orchestrator.select_reroute_option(&user_id, &body.option).await)
}

async fn abandon(State(state): State<OrchestratorRouteState>, Path(user_id): Path<String>) -> Response {
    let result = state
        .orchestrator
        .abandon_reroute(&user_id)
        .await
        .map(|()| json!({"status": "abandoned"}));
    respond(result)
}

async fn complete_reroute(State(state): State<OrchestratorRouteState>, Path(user_id): Path<String>) -> Response {
    respond(state.orchestrator.complete_rerouted_roadmap(&user_id).await)
}

async fn revert(State(state): State<OrchestratorRouteState>, Path(user_id): Path<String>) -> Response {
    respond(state.orchestrator.revert_to_original(&user_id).await)
}

/// Build the career REST routes.
pub fn career_routes(state: OrchestratorRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/{user_id}", get(get_user).delete(delete_user))
        .route("/api/users/{user_id}/export", post(export_user))
        .route("/api/onboarding", post(onboard))
        .route("/api/users/{user_id}/diagnostics", post(diagnostics))
        .route("/api/users/{user_id}/roadmap", get(roadmap))
        .route("/api/users/{user_id}/next-action", get(next_action))
        .route(
            "/api/users/{user_id}/actions/{action_id}/complete",
            post(complete_action),
        )
        .route(
            "/api/users/{user_id}/actions/{action_id}/mark-complete",
            post(mark_complete),
        )
        .route(
            "/api/users/{user_id}/actions/{action_id}/answers",
            post(submit_answers),
        )
        .route("/api/users/{user_id}/feedback", post(feedback))
        .route("/api/users/{user_id}/blockers", post(blocker))
        .route("/api/users/{user_id}/reroute", post(request_reroute))
        .route("/api/users/{user_id}/reroute/select", post(select_option))
        .route("/api/users/{user_id}/reroute/abandon", post(abandon))
        .route("/api/users/{user_id}/reroute/complete", post(complete_reroute))
        .route("/api/users/{user_id}/revert", post(revert))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}
