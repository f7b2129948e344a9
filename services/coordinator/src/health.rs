use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use federation_core::SessionStatus;
use opentelemetry_sdk::metrics::MeterProvider as SdkMeterProvider;
use prometheus::{Encoder, TextEncoder};
use tokio::sync::watch;

/// Routes the otel global meter into a dedicated prometheus registry that
/// `/metrics` scrapes. Must run before the orchestrator builds its instruments.
pub fn init_metrics() -> Result<prometheus::Registry> {
    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter().with_registry(registry.clone()).build()?;
    let provider = SdkMeterProvider::builder().with_reader(exporter).build();
    opentelemetry::global::set_meter_provider(provider);
    Ok(registry)
}

#[derive(Clone)]
pub struct HealthState {
    status: watch::Receiver<SessionStatus>,
    ready: Arc<AtomicBool>,
    registry: prometheus::Registry,
}

impl HealthState {
    pub fn new(status: watch::Receiver<SessionStatus>, ready: Arc<AtomicBool>, registry: prometheus::Registry) -> Self {
        Self { status, ready, registry }
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/live", get(|| async { Json(serde_json::json!({"live": true})) }))
        .route("/ready", get(ready))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn start_health_server(port: u16, state: HealthState) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(?addr, "Health server listening");
    let app = router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error=?e, "Health server failed");
        }
    });
    Ok(())
}

async fn ready(State(s): State<HealthState>) -> Response {
    let ready = s.ready.load(Ordering::SeqCst);
    let code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(serde_json::json!({"ready": ready}))).into_response()
}

async fn status(State(s): State<HealthState>) -> Json<SessionStatus> {
    let snapshot = s.status.borrow().clone();
    Json(snapshot)
}

async fn metrics(State(s): State<HealthState>) -> Response {
    let families = s.registry.gather();
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&families, &mut buf) {
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("encode error: {e}")).into_response();
    }
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], buf).into_response()
}
