//! HTTP surface: one question endpoint and a health probe.
//!
//! Error bodies carry a stable `kind` plus a human-readable detail. Upstream
//! failures are reported by category only; raw provider responses and
//! credentials never reach a client.

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::db::Store;
use crate::error::PipelineError;
use crate::history::{valid_session_id, SessionStore};
use crate::pipeline::PipelineController;

pub struct AppState {
    pub pipeline: PipelineController,
    pub sessions: SessionStore,
    pub store: Store,
    /// Whether an oracle API key was configured at startup.
    pub oracle_configured: bool,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    /// The natural-language question.
    pub message: String,
    #[serde(default = "default_session")]
    pub session_id: String,
}

fn default_session() -> String {
    "default".to_string()
}

#[derive(Debug, Serialize)]
struct AskResponse {
    narrative: String,
    degraded: bool,
    sql: String,
    row_count: usize,
    session_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    kind: &'static str,
    detail: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/ask", post(ask))
        .route("/api/sessions/:id/clear", post(clear_session))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listen: &str, state: Arc<AppState>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Cannot bind {}", listen))?;
    info!(addr = listen, "listening");
    axum::serve(listener, router(state))
        .await
        .context("Server error")?;
    Ok(())
}

async fn ask(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return error_response(&PipelineError::MalformedRequest(rejection.to_string()))
        }
    };
    if !valid_session_id(&request.session_id) {
        return error_response(&PipelineError::MalformedRequest(
            "session_id must be 1-64 characters of [A-Za-z0-9_-]".into(),
        ));
    }

    let session = match state.sessions.session(&request.session_id).await {
        Ok(session) => session,
        Err(e) => return error_response(&PipelineError::ExecutionError(e.to_string())),
    };
    // One turn at a time per session; concurrent questions on the same
    // session queue here.
    let mut session = session.lock().await;

    match state.pipeline.process(&mut session, &request.message).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(AskResponse {
                narrative: outcome.narrative,
                degraded: outcome.degraded,
                sql: outcome.sql,
                row_count: outcome.row_count,
                session_id: request.session_id,
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

async fn clear_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    if !valid_session_id(&session_id) {
        return error_response(&PipelineError::MalformedRequest(
            "session_id must be 1-64 characters of [A-Za-z0-9_-]".into(),
        ));
    }
    match state.sessions.clear(&session_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "session_id": session_id,
                "cleared": true,
            })),
        )
            .into_response(),
        Err(e) => error_response(&PipelineError::ExecutionError(e.to_string())),
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    let store = state.store.clone();
    let database_ok = tokio::task::spawn_blocking(move || store.connect().is_ok())
        .await
        .unwrap_or(false);
    let healthy = database_ok && state.oracle_configured;
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(serde_json::json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "database": database_ok,
            "oracle_configured": state.oracle_configured,
        })),
    )
        .into_response()
}

fn error_response(err: &PipelineError) -> Response {
    (
        status_for(err),
        Json(ErrorBody {
            error: ErrorDetail {
                kind: err.kind(),
                detail: err.to_string(),
            },
        }),
    )
        .into_response()
}

/// Client errors for bad input, unprocessable for turns the pipeline gave up
/// on, gateway errors for upstream and store failures.
fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
        PipelineError::IntentUnresolved(_) | PipelineError::UnsafeOrInvalidQuery(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PipelineError::UpstreamUnavailable(_) | PipelineError::ExecutionError(_) => {
            StatusCode::BAD_GATEWAY
        }
        PipelineError::Cancelled => StatusCode::REQUEST_TIMEOUT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&PipelineError::MalformedRequest("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&PipelineError::IntentUnresolved("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&PipelineError::UnsafeOrInvalidQuery("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&PipelineError::UpstreamUnavailable("x".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&PipelineError::ExecutionError("x".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(status_for(&PipelineError::Cancelled), StatusCode::REQUEST_TIMEOUT);
    }

    #[test]
    fn test_ask_request_defaults_session() {
        let request: AskRequest =
            serde_json::from_str(r#"{"message": "total sales?"}"#).unwrap();
        assert_eq!(request.message, "total sales?");
        assert_eq!(request.session_id, "default");
    }

    #[test]
    fn test_ask_request_requires_message_field() {
        let result = serde_json::from_str::<AskRequest>(r#"{"question": "total sales?"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_error_body_shape() {
        let body = ErrorBody {
            error: ErrorDetail {
                kind: "IntentUnresolved",
                detail: "could not work it out".into(),
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"]["kind"], "IntentUnresolved");
        assert!(json["error"]["detail"].as_str().unwrap().contains("work it out"));
    }
}
