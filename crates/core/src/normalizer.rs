use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

use crate::types::WebhookEvent;

const VERIFY_ACTION: &str = "url.verify";

/// Transport-neutral view of an inbound HTTP request.
#[derive(Debug, Clone, Copy)]
pub struct RawRequest<'a> {
    pub method: &'a str,
    /// Path including the query string, if any.
    pub path: &'a str,
    pub headers: &'a [(String, String)],
    pub body: &'a [u8],
}

/// Errors raised while inspecting a body for a verification challenge.
#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Converts raw requests into [`WebhookEvent`] values.
pub struct Normalizer;

impl Normalizer {
    /// Builds the canonical event for `webhook_id` from a raw request.
    ///
    /// Bodies that are not valid UTF-8 are carried as lowercase hex with
    /// `body_is_hex` set.
    pub fn normalize(webhook_id: &str, request: RawRequest<'_>) -> WebhookEvent {
        let (body, body_is_hex) = decode_body(request.body);

        let mut headers = IndexMap::new();
        let mut lowercase_headers = IndexMap::new();
        let mut raw_headers = Vec::with_capacity(request.headers.len());
        for (name, value) in request.headers {
            headers.insert(name.clone(), value.clone());
            lowercase_headers.insert(name.to_ascii_lowercase(), value.clone());
            raw_headers.push((name.clone(), value.clone()));
        }

        WebhookEvent {
            webhook_id: webhook_id.to_string(),
            method: request.method.to_string(),
            path: request.path.to_string(),
            headers,
            lowercase_headers,
            raw_headers,
            body,
            body_is_hex,
        }
    }

    /// Looks for a `{"action":"url.verify","challenge":...}` body.
    ///
    /// Returns `Ok(None)` for well-formed JSON that is not a verification
    /// request, and an error when the body does not parse at all.
    pub fn challenge(body: &[u8]) -> Result<Option<Value>, ChallengeError> {
        let value: Value = serde_json::from_slice(body)?;
        let Value::Object(mut fields) = value else {
            return Ok(None);
        };
        if fields.get("action").and_then(Value::as_str) != Some(VERIFY_ACTION) {
            return Ok(None);
        }
        Ok(fields.remove("challenge"))
    }
}

fn decode_body(body: &[u8]) -> (String, bool) {
    match std::str::from_utf8(body) {
        Ok(text) => (text.to_string(), false),
        Err(_) => (hex::encode(body), true),
    }
}
