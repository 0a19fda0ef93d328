use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{error, info};

use shogi_analyzer_core::Error;

use crate::AppState;

pub fn router(state: Arc<AppState>, static_dir: &Path) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/analyze", post(analyze))
        .route("/api/analyze-kifu", post(analyze_kifu))
        .fallback_service(ServeDir::new(static_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Analysis failure rendered as `{ "success": false, "error": ... }`
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            e if e.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "success": false, "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.analyzer.health();
    Json(json!({
        "status": "ok",
        "engine": health.state,
        "hasEvaluationData": health.has_evaluation_data,
        "queue": health.queue_depth,
    }))
}

#[derive(Deserialize)]
pub struct AnalyzeRequest {
    pub sfen: Option<String>,
    pub depth: Option<u32>,
}

pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Response, ApiError> {
    let Some(sfen) = req.sfen.filter(|s| !s.trim().is_empty()) else {
        return Ok(bad_request("SFEN required"));
    };

    info!(
        "analyze request: {}...",
        sfen.chars().take(50).collect::<String>()
    );

    let result = state
        .analyzer
        .analyze(&sfen, req.depth)
        .await
        .inspect_err(|e| error!("analysis failed: {}", e))?;

    Ok(Json(json!({
        "success": true,
        "score": result.score,
        "bestmove": result.best_move,
        "depth": result.depth,
    }))
    .into_response())
}

#[derive(Deserialize)]
pub struct AnalyzeKifuRequest {
    /// Position tokens, one per ply
    pub moves: Option<Vec<String>>,
    pub depth: Option<u32>,
}

pub async fn analyze_kifu(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeKifuRequest>,
) -> Response {
    let Some(moves) = req.moves else {
        return bad_request("Moves array required");
    };

    let results = state.analyzer.analyze_batch(&moves, req.depth).await;
    Json(json!({ "success": true, "results": results })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use shogi_analyzer_core::{Analyzer, AnalyzerConfig};
    use tower::ServiceExt;

    fn app() -> Router {
        let analyzer = Analyzer::unavailable("Engine not found", &AnalyzerConfig::default());
        router(Arc::new(AppState { analyzer }), Path::new("public"))
    }

    async fn call(method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_in_degraded_mode() {
        let (status, body) = call("GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["engine"], "notStarted");
        assert_eq!(body["hasEvaluationData"], false);
        assert_eq!(body["queue"], 0);
    }

    #[tokio::test]
    async fn test_analyze_requires_sfen() {
        let (status, body) = call("POST", "/api/analyze", Some(json!({ "depth": 10 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "SFEN required");

        let (status, _) = call("POST", "/api/analyze", Some(json!({ "sfen": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_analyze_without_engine_is_unavailable() {
        let (status, body) =
            call("POST", "/api/analyze", Some(json!({ "sfen": "startpos" }))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Engine degraded: Engine not found");
    }

    #[tokio::test]
    async fn test_analyze_kifu_requires_moves() {
        let (status, body) = call("POST", "/api/analyze-kifu", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Moves array required");
    }

    #[tokio::test]
    async fn test_analyze_kifu_reports_per_move_failures() {
        let (status, body) = call(
            "POST",
            "/api/analyze-kifu",
            Some(json!({ "moves": ["startpos", "startpos"], "depth": 8 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["moveNum"], 1);
        assert_eq!(results[1]["moveNum"], 2);
        assert!(results[1]["error"].is_string());
    }
}
