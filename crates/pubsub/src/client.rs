use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Message handed to a durable topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub data: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
}

impl OutboundMessage {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Destination that accepts messages and confirms them with a message id.
#[async_trait]
pub trait TopicPublisher: Send + Sync {
    /// Fully qualified name of the destination topic.
    fn topic(&self) -> &str;

    /// Publishes `message` and resolves to the id assigned by the topic.
    async fn publish(&self, message: OutboundMessage) -> Result<String, PublishError>;
}

/// Errors produced while publishing to Pub/Sub.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("publish response did not include a message id")]
    MissingMessageId,
}

/// Client for the Google Cloud Pub/Sub REST publish API.
#[derive(Clone)]
pub struct PubSubClient {
    http: Client,
    base_url: Url,
    topic: String,
    access_token: Option<String>,
}

impl PubSubClient {
    /// Creates a client publishing to `projects/{project_id}/topics/{topic_id}`.
    pub fn new(
        project_id: &str,
        topic_id: &str,
        base_url: Url,
        access_token: Option<String>,
        http: Client,
    ) -> Self {
        Self {
            http,
            base_url,
            topic: format!("projects/{project_id}/topics/{topic_id}"),
            access_token,
        }
    }

    fn publish_url(&self) -> Result<Url, PublishError> {
        Ok(self.base_url.join(&format!("v1/{}:publish", self.topic))?)
    }
}

#[async_trait]
impl TopicPublisher for PubSubClient {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&self, message: OutboundMessage) -> Result<String, PublishError> {
        let body = PublishRequest {
            messages: vec![PubsubMessage {
                data: STANDARD.encode(&message.data),
                attributes: message.attributes,
            }],
        };

        let mut request = self.http.post(self.publish_url()?).json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        parse_publish_response(response).await
    }
}

#[derive(Debug, Serialize)]
struct PublishRequest {
    messages: Vec<PubsubMessage>,
}

#[derive(Debug, Serialize)]
struct PubsubMessage {
    data: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    attributes: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

async fn parse_publish_response(response: Response) -> Result<String, PublishError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(PublishError::Status { status, body });
    }

    let parsed: PublishResponse = response.json().await?;
    parsed
        .message_ids
        .into_iter()
        .next()
        .ok_or(PublishError::MissingMessageId)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer, token: Option<&str>) -> PubSubClient {
        PubSubClient::new(
            "my-project",
            "webhooks",
            Url::parse(&server.url("/")).expect("url"),
            token.map(str::to_string),
            Client::builder().build().expect("client"),
        )
    }

    #[tokio::test]
    async fn publish_encodes_data_and_attributes() {
        let server = MockServer::start_async().await;
        let client = client(&server, Some("token"));

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/projects/my-project/topics/webhooks:publish")
                    .header("Authorization", "Bearer token")
                    .json_body(json!({
                        "messages": [{
                            "data": "eyJvayI6dHJ1ZX0=",
                            "attributes": {"webhookId": "hook-1"}
                        }]
                    }));
                then.status(200).json_body(json!({ "messageIds": ["4242"] }));
            })
            .await;

        let message = OutboundMessage::new(br#"{"ok":true}"#.to_vec())
            .with_attribute("webhookId", "hook-1");
        let id = client.publish(message).await.expect("publish");

        assert_eq!(id, "4242");
        assert_eq!(client.topic(), "projects/my-project/topics/webhooks");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_returns_body() {
        let server = MockServer::start_async().await;
        let client = client(&server, None);

        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/projects/my-project/topics/webhooks:publish");
                then.status(403).body("permission denied");
            })
            .await;

        let err = client
            .publish(OutboundMessage::new(b"x".to_vec()))
            .await
            .expect_err("should error");
        match err {
            PublishError::Status { status, body } => {
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(body, "permission denied");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_message_ids_is_an_error() {
        let server = MockServer::start_async().await;
        let client = client(&server, None);

        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/projects/my-project/topics/webhooks:publish");
                then.status(200).json_body(json!({}));
            })
            .await;

        let err = client
            .publish(OutboundMessage::new(b"x".to_vec()))
            .await
            .expect_err("should error");
        assert!(matches!(err, PublishError::MissingMessageId));
    }
}
