use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use hook_relay_core::{Normalizer, WebhookEvent, WebhookPath};
use hook_relay_pubsub::{OutboundMessage, TopicPublisher};
use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ingress::InboundRequest;

const DESCRIPTION: &str =
    "webhook-to-pubsub forwarder. try /<webhook_id> or /<webhook_id>/<delay_seconds>";

/// Settings and collaborator for the Pub/Sub relay variant.
pub struct DurableRelay {
    publisher: Arc<dyn TopicPublisher>,
    publish_timeout: Duration,
    max_delay_secs: f64,
}

impl DurableRelay {
    pub fn new(
        publisher: Arc<dyn TopicPublisher>,
        publish_timeout: Duration,
        max_delay_secs: f64,
    ) -> Self {
        Self {
            publisher,
            publish_timeout,
            max_delay_secs,
        }
    }
}

/// Message body published to the topic.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableEnvelope {
    #[serde(flatten)]
    event: WebhookEvent,
    /// Epoch seconds at which the request arrived.
    received_time: f64,
    sleep_duration: f64,
    topic: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableResponse {
    status: &'static str,
    pubsub_payload: DurableEnvelope,
    correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pubsub_msg_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    challenge: Option<Value>,
}

/// Publishes any request shaped `/{webhook_id}[/{delay_seconds}]` to the topic.
///
/// Publish failures, confirmation timeouts and unparseable bodies only drop
/// fields from the response; the answer is always 200.
pub async fn handle(
    State(relay): State<Arc<DurableRelay>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let received_time = Utc::now().timestamp_micros() as f64 / 1_000_000.0;

    let Some(path) = WebhookPath::parse(uri.path()) else {
        return Json(json!({ "status": "ok", "description": DESCRIPTION })).into_response();
    };
    counter!("webhook_ingress_total", "variant" => "durable").increment(1);

    let event = InboundRequest::new(&method, &uri, &headers).normalize(&path.webhook_id, &body);

    let sleep_duration = path.delay_seconds.min(relay.max_delay_secs);
    if sleep_duration > 0.0 {
        debug!(stage = "ingress", webhook_id = %path.webhook_id, sleep_duration, "delaying publish");
        time::sleep(Duration::from_secs_f64(sleep_duration)).await;
    }

    let envelope = DurableEnvelope {
        event,
        received_time,
        sleep_duration,
        topic: relay.publisher.topic().to_string(),
    };
    let correlation_id = Uuid::new_v4().to_string();
    let pubsub_msg_id = publish(&relay, &path.webhook_id, &correlation_id, &envelope).await;
    let challenge = find_challenge(&path.webhook_id, &body);

    histogram!("webhook_ack_latency_seconds", "variant" => "durable")
        .record(start.elapsed().as_secs_f64());

    Json(DurableResponse {
        status: "ok",
        pubsub_payload: envelope,
        correlation_id,
        pubsub_msg_id,
        challenge,
    })
    .into_response()
}

/// Publishes the envelope and waits a bounded time for the message id.
///
/// The publish keeps running after a timeout; its outcome is only logged.
async fn publish(
    relay: &DurableRelay,
    webhook_id: &str,
    correlation_id: &str,
    envelope: &DurableEnvelope,
) -> Option<String> {
    let data = match serde_json::to_vec(envelope) {
        Ok(data) => data,
        Err(err) => {
            error!(stage = "pubsub", webhook_id, error = %err, "failed to serialize envelope");
            counter!("pubsub_publish_total", "result" => "serialize_error").increment(1);
            return None;
        }
    };
    let message = OutboundMessage::new(data)
        .with_attribute("webhookId", webhook_id)
        .with_attribute("correlationId", correlation_id);

    let task = tokio::spawn(publish_and_log(
        relay.publisher.clone(),
        message,
        webhook_id.to_string(),
        correlation_id.to_string(),
    ));

    match time::timeout(relay.publish_timeout, task).await {
        Ok(Ok(message_id)) => message_id,
        Ok(Err(err)) => {
            error!(stage = "pubsub", webhook_id, error = %err, "publish task failed");
            None
        }
        Err(_) => {
            warn!(
                stage = "pubsub",
                webhook_id,
                correlation_id,
                timeout_ms = relay.publish_timeout.as_millis() as u64,
                "publish confirmation timed out"
            );
            counter!("pubsub_publish_total", "result" => "timeout").increment(1);
            None
        }
    }
}

async fn publish_and_log(
    publisher: Arc<dyn TopicPublisher>,
    message: OutboundMessage,
    webhook_id: String,
    correlation_id: String,
) -> Option<String> {
    match publisher.publish(message).await {
        Ok(message_id) => {
            counter!("pubsub_publish_total", "result" => "ok").increment(1);
            info!(stage = "pubsub", %webhook_id, %correlation_id, %message_id, "webhook published");
            Some(message_id)
        }
        Err(err) => {
            counter!("pubsub_publish_total", "result" => "error").increment(1);
            warn!(stage = "pubsub", %webhook_id, %correlation_id, error = %err, "publish failed");
            None
        }
    }
}

fn find_challenge(webhook_id: &str, body: &[u8]) -> Option<Value> {
    match Normalizer::challenge(body) {
        Ok(Some(challenge)) => {
            info!(stage = "ingress", webhook_id, "answering verification challenge");
            Some(challenge)
        }
        Ok(None) => None,
        Err(err) => {
            debug!(stage = "ingress", webhook_id, error = %err, "body is not a challenge");
            None
        }
    }
}
