//! HTTP server: health, metrics exposition and the dashboard API

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use dtalks_core::{FileKind, FilePayload};
use serde_json::json;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::app::AppState;

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub struct Server {
    addr: SocketAddr,
    state: AppState,
}

impl Server {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self { addr, state }
    }

    /// Serve until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let app = router(self.state);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .context("Failed to bind HTTP server")?;
        info!("HTTP server listening on {}", self.addr);

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("HTTP server error")?;

        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/chat-per-day", get(chat_per_day))
        .route("/success-rate", get(success_rate))
        .route("/satisfy", get(satisfy))
        .route("/response-time", get(response_time))
        .route("/template-count", get(template_count))
        .route("/week-response", get(week_response))
        .route("/model-train", get(model_train))
        .route("/file", post(ingest_file));

    Router::new()
        .route("/health-check", get(health_check))
        .route("/metrics", get(metrics))
        .nest("/api/chatbot", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
        state.metrics.render(),
    )
        .into_response()
}

async fn chat_per_day(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.analytics.daily_conversations().await)
}

async fn success_rate(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.analytics.success_rate().await)
}

async fn satisfy(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.analytics.satisfaction().await)
}

async fn response_time(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.analytics.response_time().await)
}

async fn template_count(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.analytics.template_usage().await)
}

async fn week_response(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.analytics.week_response().await)
}

async fn model_train(State(state): State<AppState>) -> Response {
    match state.classifier.retrain(&state.train_file).await {
        Ok(report) => Json(json!({
            "status": "ok",
            "examples": report.examples,
            "labels": report.labels,
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "Model retraining failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn ingest_file(State(state): State<AppState>, Json(payload): Json<FilePayload>) -> Response {
    let Some(kind) = FileKind::detect(&payload.file_url) else {
        warn!(url = %payload.file_url, "Unsupported file type");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "error", "message": "unsupported file type" })),
        )
            .into_response();
    };

    let Some(sink) = &state.ingestion else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "error", "message": "ingestion is not configured" })),
        )
            .into_response();
    };

    match sink.ingest(&payload, kind).await {
        Ok(()) => {
            info!(file = %payload.original_file_name, kind = ?kind, "File forwarded for ingestion");
            Json(json!({ "status": "ok", "kind": kind })).into_response()
        }
        Err(e) => {
            error!(file = %payload.original_file_name, error = %e, "File ingestion failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "status": "error", "message": e.to_string() })),
            )
                .into_response()
        }
    }
}
