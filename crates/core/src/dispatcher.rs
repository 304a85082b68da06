use std::sync::Arc;

use thiserror::Error;

use crate::registry::{Subscriber, SubscriptionRegistry};
use crate::types::{DeliveryResult, WebhookEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to serialize webhook event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Delivers webhook events to the subscribers held in a [`SubscriptionRegistry`].
pub struct FanoutDispatcher<S: ?Sized> {
    registry: Arc<SubscriptionRegistry<S>>,
}

impl<S: ?Sized> Clone for FanoutDispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<S: Subscriber + ?Sized> FanoutDispatcher<S> {
    pub fn new(registry: Arc<SubscriptionRegistry<S>>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry<S>> {
        &self.registry
    }

    /// Serializes `event` once and hands the same payload to every live
    /// subscriber of `webhook_id`, pruning the ones that are gone.
    pub async fn dispatch(
        &self,
        webhook_id: &str,
        event: &WebhookEvent,
    ) -> Result<DeliveryResult, DispatchError> {
        let payload: Arc<str> = Arc::from(serde_json::to_string(event)?);
        let result = self
            .registry
            .snapshot_and_prune(webhook_id, |subscriber| subscriber.send(&payload))
            .await;
        Ok(result)
    }
}
