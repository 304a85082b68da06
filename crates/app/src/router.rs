use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use hook_relay_core::FanoutDispatcher;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};

use crate::durable::DurableRelay;
use crate::websocket::WsSubscriber;
use crate::{durable, telemetry, webhook, websocket};

pub type Dispatcher = FanoutDispatcher<WsSubscriber>;

const DESCRIPTION: &str =
    "webhook-to-websocket forwarder. try /webhook/<webhook_id> and /websocket/<webhook_id>";

/// Transport a deployment relays webhooks over.
#[derive(Clone)]
pub enum Relay {
    Direct(Dispatcher),
    Durable(Arc<DurableRelay>),
}

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    relay: Relay,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, relay: Relay) -> Self {
        Self { metrics, relay }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }
}

/// Builds the router for the configured relay.
///
/// The durable relay owns every path and method, so `/healthz` and
/// `/metrics` are only served next to the direct relay.
pub fn app_router(state: AppState) -> Router {
    match state.relay.clone() {
        Relay::Direct(dispatcher) => Router::new()
            .route("/", get(index))
            .route("/healthz", get(healthz))
            .route("/metrics", get(metrics))
            .with_state(state)
            .merge(
                Router::new()
                    .route("/webhook/:webhook_id", any(webhook::handle))
                    .route("/websocket/:webhook_id", get(websocket::handle))
                    .with_state(dispatcher),
            ),
        Relay::Durable(relay) => Router::new().fallback(durable::handle).with_state(relay),
    }
}

async fn index() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "description": DESCRIPTION,
    }))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
