//! Webhook relay domain: event normalization, the subscription registry and
//! the fanout dispatcher that ties them together.

pub mod dispatcher;
pub mod normalizer;
pub mod registry;
pub mod types;

pub use dispatcher::{DispatchError, FanoutDispatcher};
pub use normalizer::{ChallengeError, Normalizer, RawRequest};
pub use registry::{SendError, Subscriber, SubscriberId, SubscriptionRegistry};
pub use types::{parse_delay, DeliveryResult, WebhookEvent, WebhookPath};
