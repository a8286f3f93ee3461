//! HTTP surface of the batch checker.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde_json::json;
use tracing::debug;
use tracing::error;
use uuid::Uuid;

use crate::AppState;
use gdbox_core::checker::CheckOutcome;

/// `POST /checker/submit`: header `Problem: <int>`, body = UTF-8 C++ source.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    debug!("POST request for code checking received");

    let Some(problem) = headers.get("Problem") else {
        return (StatusCode::NOT_FOUND, "Problem id is missing").into_response();
    };
    let Some(problem_id) = problem
        .to_str()
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
    else {
        return (
            StatusCode::NOT_FOUND,
            "Couldn't convert problem id to integer!",
        )
            .into_response();
    };
    if problem_id >= state.checker.pack_count() {
        return (StatusCode::NOT_FOUND, "Invalid problem id").into_response();
    }

    let auth = Uuid::new_v4().to_string();
    let filename = format!("{problem_id}_{auth}.cpp");
    let code = String::from_utf8_lossy(&body).to_string();
    if let Err(err) = tokio::fs::write(state.config.received_dir.join(&filename), code).await {
        error!("could not store submission: {err}");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Could not store submission")
            .into_response();
    }

    let results = state.results.clone();
    let token = auth.clone();
    state
        .checker
        .push_check(
            filename,
            problem_id,
            auth.clone(),
            Box::new(move |outcome| results.store(&token, outcome)),
        )
        .await;

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "Accepted, wait for results",
            "authorization": auth,
        })),
    )
        .into_response()
}

/// `GET /checker/status/{auth}`: the outcome, consumed on the first
/// non-unauthorized read.
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(auth): Path<String>,
) -> Json<CheckOutcome> {
    Json(state.results.take(&auth))
}
