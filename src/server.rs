//! HTTP server for headless screening analysis.
//!
//! This module provides an HTTP server that:
//! - Accepts recorded sessions via POST /v1/analyze and replays them
//! - Stores the resulting records and calibration baselines
//! - Aggregates domain scores into a risk status via POST /v1/status
//!
//! # Architecture
//!
//! ```text
//! Capture client ──→ POST /v1/analyze ──→ Replayer ──→ SessionScorer ──→ RecordStore
//!                                                            ↓
//!                                                     [Risk Aggregation]
//! ```

use crate::config::Config;
use crate::core::report::{history_average, RecordBuilder, TestRecord};
use crate::core::result::Domain;
use crate::core::risk::{assess_scores, narrate, Narrative, NarrativeRequest, RiskAssessment};
use crate::replay::{RecordedSession, ReplayOutcome, Replayer};
use crate::services::{LocalCoherence, LocalNarrative};
use crate::store::{persist_results, JsonFileStore, RecordStore};
use crate::transparency::{create_shared_log, SharedTransparencyLog};
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Engine configuration used for every analysis
    pub engine: Config,
    /// Directory holding stored records and the baseline
    pub state_dir: PathBuf,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(port: u16, engine: Config, state_dir: PathBuf) -> Self {
        Self {
            port,
            engine,
            state_dir,
        }
    }
}

/// Shared server state
pub struct ServerState {
    engine: Config,
    store: RwLock<JsonFileStore>,
    builder: RecordBuilder,
    log: SharedTransparencyLog,
}

impl ServerState {
    /// Create new server state
    pub fn new(config: &ServerConfig) -> Self {
        let builder = RecordBuilder::new();
        tracing::info!("Record producer instance {}", builder.instance_id());
        Self {
            engine: config.engine.clone(),
            store: RwLock::new(JsonFileStore::new(&config.state_dir)),
            builder,
            log: create_shared_log(),
        }
    }
}

/// Domain scores to aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequest {
    pub scores: BTreeMap<Domain, u8>,
}

/// Response from the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub assessment: RiskAssessment,
    pub narrative: Narrative,
}

/// Response from the analyze endpoint
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeResponse {
    pub outcome: ReplayOutcome,
    /// Records written to the store
    pub stored: usize,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: String) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error,
            code: code.to_string(),
        }),
    )
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /v1/analyze
///
/// Replays a recorded session, stores the results and returns them with
/// the session's risk assessment.
async fn analyze(
    State(state): State<Arc<ServerState>>,
    Json(session): Json<RecordedSession>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    if session.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "EMPTY_SESSION",
            "Session contains no events".to_string(),
        ));
    }

    let worker = state.clone();
    let snapshot = session.snapshot.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        Replayer::new(&worker.engine, &LocalCoherence, &worker.log).run(&session)
    })
    .await
    .map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ANALYSIS_ERROR",
            format!("Analysis task failed: {e}"),
        )
    })?;

    let stored = {
        let mut store = state.store.write().await;
        persist_results(
            &mut *store,
            &state.builder,
            &outcome.results,
            snapshot.as_deref(),
        )
        .map_err(|e| {
            tracing::error!("Failed to store results: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", e.to_string())
        })?
    };
    for _ in 0..stored {
        state.log.record_emitted();
    }

    Ok(Json(AnalyzeResponse { outcome, stored }))
}

/// POST /v1/status
async fn status(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let assessment = assess_scores(&request.scores, &state.engine.risk);

    let (baseline, records) = {
        let store = state.store.read().await;
        let baseline = store
            .baseline()
            .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", e.to_string()))?;
        let records = store
            .records()
            .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", e.to_string()))?;
        (baseline, records)
    };
    let history = history_average(
        &records,
        chrono::Utc::now(),
        chrono::Duration::days(state.engine.risk.history_days),
    );
    let narrative_request =
        NarrativeRequest::new(&assessment, baseline.map(|b| b.into_profile()), history);
    let narrative = narrate(&narrative_request, &assessment, &LocalNarrative);

    Ok(Json(StatusResponse {
        assessment,
        narrative,
    }))
}

/// GET /v1/history
async fn history(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<Vec<TestRecord>>, ApiError> {
    let store = state.store.read().await;
    store
        .records()
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", e.to_string()))
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ServerState::new(&config));

    let app = Router::new()
        .route("/health", get(health))
        .route("/v1/analyze", post(analyze))
        .route("/v1/status", post(status))
        .route("/v1/history", get(history))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Screening server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
