use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Immutable description of one inbound webhook call.
///
/// Built once per request by [`crate::normalizer::Normalizer`] and shared by
/// every delivery attempt; it is never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub webhook_id: String,
    pub method: String,
    pub path: String,
    /// Single assignment per header name as received, in first-seen order.
    pub headers: IndexMap<String, String>,
    /// Header names folded to lowercase; the last duplicate wins but keeps the
    /// position of the first.
    pub lowercase_headers: IndexMap<String, String>,
    /// Every header pair in arrival order, duplicates included.
    pub raw_headers: Vec<(String, String)>,
    pub body: String,
    pub body_is_hex: bool,
}

impl WebhookEvent {
    /// Decodes the body back into the bytes that were received.
    pub fn body_bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
        if self.body_is_hex {
            hex::decode(&self.body)
        } else {
            Ok(self.body.as_bytes().to_vec())
        }
    }
}

/// Outcome of fanning one event out to the subscribers of a webhook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    /// Subscribers that accepted the event and remain registered.
    pub delivered: usize,
    /// Subscribers removed during this pass because they were closed or failed.
    pub pruned: usize,
}

impl DeliveryResult {
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.pruned == 0
    }
}

/// Webhook identifier plus the optional delay segment of a durable relay path.
///
/// The path shape is `/{webhook_id}[/{delay_seconds}]`; further segments are
/// ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookPath {
    pub webhook_id: String,
    pub delay_seconds: f64,
}

impl WebhookPath {
    /// Splits a request path into its webhook identifier and delay.
    ///
    /// Returns `None` when the path carries no identifier segment.
    pub fn parse(path: &str) -> Option<Self> {
        let mut segments = path.trim_start_matches('/').splitn(3, '/');
        let webhook_id = segments.next().filter(|segment| !segment.is_empty())?;
        let delay_seconds = parse_delay(segments.next());
        Some(Self {
            webhook_id: webhook_id.to_string(),
            delay_seconds,
        })
    }
}

/// Parses a delay segment as seconds, defaulting to zero for anything that is
/// not a finite, non-negative number.
pub fn parse_delay(segment: Option<&str>) -> f64 {
    segment
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0)
        .unwrap_or(0.0)
}
