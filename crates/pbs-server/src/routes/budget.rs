//! Budget consumption route.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use pbs_client::http::{CLAIMED_IDENTITY_HEADER, CONSUME_PATH};
use pbs_core::{ConsumePrivacyBudgetRequest, Error};
use tracing::{error, warn};

use crate::state::{AppState, Authorization};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route(CONSUME_PATH, post(consume_budget))
}

fn error_body(
    status: StatusCode,
    code: &str,
    message: impl Into<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    (
        status,
        Json(serde_json::json!({ "code": code, "message": message.into() })),
    )
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// POST /v1/privacybudget/consume: charge the request's units against this
/// coordinator's ledger.
async fn consume_budget(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<ConsumePrivacyBudgetRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return error_body(
                StatusCode::BAD_REQUEST,
                "INVALID_ARGUMENT",
                rejection.body_text(),
            );
        }
    };

    let origin = request.attribution_report_to().to_string();
    match state.authorize(bearer_token(&headers), &origin) {
        Authorization::Allowed => {}
        Authorization::Unauthenticated => {
            return error_body(
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                "missing or unknown bearer token",
            );
        }
        Authorization::Forbidden => {
            warn!(origin = %origin, "token not allowed to charge origin");
            return error_body(
                StatusCode::FORBIDDEN,
                "PERMISSION_DENIED",
                format!("caller may not consume budget for {}", origin),
            );
        }
    }

    let claimed = headers
        .get(CLAIMED_IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok());
    if claimed.is_some_and(|c| c != origin) {
        warn!(origin = %origin, claimed = ?claimed, "claimed identity does not match attributionReportTo");
        return error_body(
            StatusCode::FORBIDDEN,
            "PERMISSION_DENIED",
            "claimed identity does not match attributionReportTo",
        );
    }

    // Ledger writes block on SQLite; keep them off the async workers.
    let service_state = state.clone();
    let result = tokio::task::spawn_blocking(move || service_state.service.handle(&request)).await;

    match result {
        Ok(Ok(response)) => (StatusCode::OK, Json(serde_json::json!(response))),
        Ok(Err(Error::InvalidArgument(message))) => {
            error_body(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", message)
        }
        Ok(Err(e)) => {
            error!(origin = %origin, error = %e, "consume failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", e.to_string())
        }
        Err(e) => {
            error!(origin = %origin, error = %e, "consume task failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", e.to_string())
        }
    }
}
