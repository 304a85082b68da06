pub mod client;

pub use client::{OutboundMessage, PubSubClient, PublishError, TopicPublisher};
