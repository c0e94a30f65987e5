//! JSON HTTP API over the query pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/stats` | Collection name, chunk count and build info |
//! | `POST` | `/ask` | `{"query": "..."}` → `PipelineResult` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "kb_not_initialized", "message": "..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `kb_not_initialized` (503),
//! `upstream_error` (502), `internal` (500). A body that is not valid
//! `{"query": "..."}` JSON is a `bad_request`. Embedding, generation and
//! index failures are all `upstream_error`. A refused answer is not an
//! error: it is a 200 with `"outcome": "refused"`.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::PipelineResult;
use crate::pipeline::RagPipeline;
use crate::store::{CollectionInfo, VectorIndex};

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<RagPipeline>,
    collection: String,
}

impl AppState {
    pub fn new(pipeline: Arc<RagPipeline>, collection: impl Into<String>) -> Self {
        Self {
            pipeline,
            collection: collection.into(),
        }
    }
}

/// Serve the API on `[server].bind` until the process is stopped.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(RagPipeline::from_config(config).await?);
    let app = router(AppState::new(pipeline, config.db.collection.clone()));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "server listening");
    println!("kbrag listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/ask", post(handle_ask))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: format!("{:#}", err),
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let status = if err.is_upstream() {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        tracing::warn!(code = err.code(), error = %err, "query failed");
        AppError {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /stats ============

#[derive(Serialize)]
struct StatsResponse {
    collection: String,
    chunks: usize,
    info: Option<CollectionInfo>,
}

async fn handle_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let index = state.pipeline.index();
    let chunks = index.count().await.map_err(internal)?;
    let info = index.info().await.map_err(internal)?;

    Ok(Json(StatsResponse {
        collection: state.collection.clone(),
        chunks,
        info,
    }))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    query: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<PipelineResult>, AppError> {
    let Json(req) = body.map_err(|rejection| bad_request(rejection.body_text()))?;
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let result = state.pipeline.run(&req.query).await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingProvider;
    use crate::generation::{ChatMessage, GenerationProvider};
    use crate::models::Outcome;
    use crate::store::memory::InMemoryIndex;
    use crate::store::IndexEntry;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    struct UnitEmbedder;

    #[async_trait]
    impl EmbeddingProvider for UnitEmbedder {
        fn model_name(&self) -> &str {
            "unit"
        }

        fn dims(&self) -> Option<usize> {
            Some(2)
        }

        async fn embed_texts(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl GenerationProvider for FailingGenerator {
        fn model_name(&self) -> &str {
            "failing"
        }

        async fn generate(&self, _: &[ChatMessage], _: f32) -> anyhow::Result<String> {
            anyhow::bail!("API error 503")
        }
    }

    async fn state(rows: Vec<IndexEntry>) -> AppState {
        let config = Config::default();
        let index = Arc::new(InMemoryIndex::default());
        index.insert(&rows).await.unwrap();
        let pipeline = RagPipeline::new(
            &config,
            Arc::new(UnitEmbedder),
            Arc::new(FailingGenerator),
            index,
        );
        AppState::new(Arc::new(pipeline), "kb")
    }

    fn row(distance_axis: f32) -> IndexEntry {
        IndexEntry {
            id: "policy.md-0".to_string(),
            text: "# Policy\nDetails.".to_string(),
            source: Some("policy.md".to_string()),
            embedding: vec![1.0, distance_axis],
        }
    }

    fn ask(query: &str) -> Result<Json<AskRequest>, JsonRejection> {
        Ok(Json(AskRequest {
            query: query.to_string(),
        }))
    }

    async fn post_ask(state: AppState, body: &'static str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/ask")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_ask_empty_kb_is_503() {
        let err = handle_ask(State(state(vec![]).await), ask("hello"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code, "kb_not_initialized");
    }

    #[tokio::test]
    async fn test_ask_blank_query_is_400() {
        let err = handle_ask(State(state(vec![row(0.0)]).await), ask("   "))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ask_generation_failure_is_502() {
        let err = handle_ask(State(state(vec![row(0.1)]).await), ask("policy?"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.code, "upstream_error");
        assert!(err.message.contains("API error 503"));
    }

    #[tokio::test]
    async fn test_ask_index_failure_is_502() {
        let config = Config::default();
        let index = Arc::new(InMemoryIndex::default());
        index
            .insert(&[IndexEntry {
                embedding: vec![1.0, 0.0, 0.0],
                ..row(0.0)
            }])
            .await
            .unwrap();
        let pipeline = RagPipeline::new(
            &config,
            Arc::new(UnitEmbedder),
            Arc::new(FailingGenerator),
            index,
        );
        let state = AppState::new(Arc::new(pipeline), "kb");

        let err = handle_ask(State(state), ask("policy?")).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.code, "upstream_error");
    }

    #[tokio::test]
    async fn test_ask_wrong_body_shape_is_json_400() {
        let (status, body) = post_ask(state(vec![row(0.0)]).await, r#"{"q":1}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("query"));
    }

    #[tokio::test]
    async fn test_ask_malformed_json_is_json_400() {
        let (status, body) = post_ask(state(vec![row(0.0)]).await, "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_ask_weak_retrieval_is_refused_not_error() {
        let Json(result) = handle_ask(State(state(vec![row(5.0)]).await), ask("policy?"))
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Refused);
        assert!(result.sources.is_empty());
    }

    #[tokio::test]
    async fn test_stats_reports_count() {
        let Json(stats) = handle_stats(State(state(vec![row(0.0)]).await))
            .await
            .unwrap();
        assert_eq!(stats.collection, "kb");
        assert_eq!(stats.chunks, 1);
        assert!(stats.info.is_none());
    }
}
