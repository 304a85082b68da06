use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, Method, Uri},
    Json,
};
use hook_relay_core::{DeliveryResult, WebhookEvent};
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::ingress::InboundRequest;
use crate::router::Dispatcher;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResponse {
    status: &'static str,
    ws_payload: WebhookEvent,
    ws_count: usize,
}

/// Relays one inbound webhook to the websocket subscribers of `webhook_id`.
///
/// Always answers 200; a webhook nobody listens to reports `wsCount: 0`.
pub async fn handle(
    State(dispatcher): State<Dispatcher>,
    Path(webhook_id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Json<RelayResponse> {
    let start = Instant::now();
    counter!("webhook_ingress_total", "variant" => "direct").increment(1);

    let event = InboundRequest::new(&method, &uri, &headers).normalize(&webhook_id, &body);
    let result = match dispatcher.dispatch(&webhook_id, &event).await {
        Ok(result) => result,
        Err(err) => {
            error!(stage = "fanout", %webhook_id, error = %err, "failed to dispatch webhook event");
            DeliveryResult::default()
        }
    };
    record_fanout(&webhook_id, &result);

    histogram!("webhook_ack_latency_seconds", "variant" => "direct")
        .record(start.elapsed().as_secs_f64());

    Json(RelayResponse {
        status: "ok",
        ws_payload: event,
        ws_count: result.delivered,
    })
}

fn record_fanout(webhook_id: &str, result: &DeliveryResult) {
    counter!("fanout_delivered_total").increment(result.delivered as u64);
    counter!("fanout_pruned_total").increment(result.pruned as u64);

    if result.is_empty() {
        debug!(stage = "fanout", webhook_id, "no subscribers registered");
    } else {
        info!(
            stage = "fanout",
            webhook_id,
            delivered = result.delivered,
            pruned = result.pruned,
            "webhook relayed to subscribers"
        );
    }
}
