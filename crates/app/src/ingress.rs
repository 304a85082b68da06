use axum::http::{HeaderMap, Method, Uri};
use hook_relay_core::{Normalizer, RawRequest, WebhookEvent};

/// Request parts the normalizer needs, captured from axum extractors.
pub struct InboundRequest {
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
}

impl InboundRequest {
    pub fn new(method: &Method, uri: &Uri, headers: &HeaderMap) -> Self {
        let path = uri
            .path_and_query()
            .map(|value| value.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string());
        Self {
            method: method.clone(),
            path,
            headers: header_pairs(headers),
        }
    }

    pub fn normalize(&self, webhook_id: &str, body: &[u8]) -> WebhookEvent {
        Normalizer::normalize(
            webhook_id,
            RawRequest {
                method: self.method.as_str(),
                path: &self.path,
                headers: &self.headers,
                body,
            },
        )
    }
}

/// Flattens a header map into name/value pairs.
///
/// The HTTP stack hands names over lowercased and groups repeated names at the
/// position of their first occurrence, so pairs follow first-seen name order
/// with each name's values in arrival order. Values that are not valid UTF-8
/// are decoded lossily.
fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}
