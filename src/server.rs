//! HTTP surface: chat proxy, sheet tools and the operational endpoints.

use crate::chat::{ChatRequest, ChatResponse, SimpleChatRequest};
use crate::error::{ManglerError, Result};
use crate::health::{self, HealthChecker};
use crate::metrics::{METRICS, RequestMetrics};
use crate::shutdown::ShutdownCoordinator;
use crate::state::AppState;
use crate::tools::{
    self, FormulaIssuesParams, FormulaIssuesResponse, PaintEntry, PaintResponse, ResetParams,
    ResetResponse, RestoreParams, RestoreResponse, SnapshotParams, SnapshotResponse,
    VisualizeParams, VisualizeResponse,
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;

/// Build the full router. Every request is counted as in flight against
/// `shutdown` so draining can wait for it.
pub fn build_router(state: Arc<AppState>, shutdown: Arc<ShutdownCoordinator>) -> Router {
    let checker = Arc::new(HealthChecker::new(state.clone(), shutdown.token()));

    let api = Router::new()
        .route("/chat", post(chat))
        .route("/chat/simple", post(chat_simple))
        .route("/tools/color", post(color))
        .route("/tools/visulize-formulas", post(visualize))
        .route("/tools/visualize-formulas", post(visualize))
        .route("/tools/restore", post(restore))
        .route("/tools/snapshot", post(snapshot))
        .route("/tools/reset", post(reset))
        .route("/tools/formula-issues", post(formula_issues))
        .with_state(state);

    let ops = Router::new()
        .route("/health", get(health::liveness_handler))
        .route("/ready", get(health::readiness_handler))
        .with_state(checker)
        .route("/metrics", get(metrics_handler));

    api.merge(ops)
        .layer(middleware::from_fn_with_state(shutdown, track_in_flight))
}

async fn track_in_flight(
    State(shutdown): State<Arc<ShutdownCoordinator>>,
    request: Request,
    next: Next,
) -> Response {
    let _guard = shutdown.track();
    next.run(request).await
}

/// Run one route under request metrics; failures are counted by code and
/// category.
async fn instrumented<T, F>(route: &'static str, work: F) -> Result<Json<T>>
where
    F: Future<Output = Result<T>>,
{
    let metrics = RequestMetrics::new(route);
    match work.await {
        Ok(value) => {
            metrics.success();
            Ok(Json(value))
        }
        Err(error) => {
            metrics.error(error.code());
            Err(error)
        }
    }
}

/// Bodies are parsed here rather than by the `Json` extractor so malformed
/// payloads come back in the same error shape as every other failure.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| ManglerError::invalid_input(format!("invalid request body: {e}")))
}

/// An absent or blank body means default parameters.
fn parse_optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        Ok(T::default())
    } else {
        parse_body(body)
    }
}

async fn chat(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<ChatResponse>> {
    instrumented("chat", async move {
        let request: ChatRequest = parse_body(&body)?;
        state.chat().chat(request).await
    })
    .await
}

async fn chat_simple(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ChatResponse>> {
    instrumented("chat_simple", async move {
        let request: SimpleChatRequest = parse_body(&body)?;
        state
            .chat()
            .simple_chat(&request.session_id, &request.content, request.sheet_context)
            .await
    })
    .await
}

async fn color(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<PaintResponse>> {
    instrumented("color", async move {
        let entries: Vec<PaintEntry> = parse_body(&body)?;
        tools::paint_cells(state, entries).await
    })
    .await
}

async fn visualize(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<VisualizeResponse>> {
    instrumented("visualize_formulas", async move {
        let params: VisualizeParams = parse_optional_body(&body)?;
        tools::visualize_formulas(state, params).await
    })
    .await
}

async fn restore(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<RestoreResponse>> {
    instrumented("restore", async move {
        let params: RestoreParams = parse_body(&body)?;
        tools::restore_snapshot(state, params).await
    })
    .await
}

async fn snapshot(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SnapshotResponse>> {
    instrumented("snapshot", async move {
        let params: SnapshotParams = parse_body(&body)?;
        tools::snapshot_ranges(state, params).await
    })
    .await
}

async fn reset(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<ResetResponse>> {
    instrumented("reset", async move {
        let params: ResetParams = parse_optional_body(&body)?;
        tools::reset_sheet(state, params).await
    })
    .await
}

async fn formula_issues(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<FormulaIssuesResponse>> {
    instrumented("formula_issues", async move {
        let params: FormulaIssuesParams = parse_optional_body(&body)?;
        tools::scan_formula_issues(state, params).await
    })
    .await
}

async fn metrics_handler() -> Response {
    match METRICS.encode() {
        Ok(text) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
