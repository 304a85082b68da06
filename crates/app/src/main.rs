mod durable;
mod ingress;
mod router;
mod telemetry;
mod webhook;
mod websocket;

use std::{net::SocketAddr, sync::Arc};

use hook_relay_core::SubscriptionRegistry;
use hook_relay_pubsub::PubSubClient;
use hook_relay_util::{load_env_file, AppConfig, ConfigError, RelayMode};
use tracing::info;
use url::Url;

use crate::durable::DurableRelay;
use crate::router::{Dispatcher, Relay};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let relay = build_relay(&config)?;
    let state = router::AppState::new(metrics, relay);

    let addr: SocketAddr = config.bind_addr;
    info!(
        stage = "app",
        %addr,
        env = %config.environment.as_str(),
        relay = %config.relay_mode.as_str(),
        "starting HTTP server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}

fn build_relay(config: &AppConfig) -> Result<Relay, Box<dyn std::error::Error>> {
    match config.relay_mode {
        RelayMode::Direct => Ok(Relay::Direct(Dispatcher::new(Arc::new(
            SubscriptionRegistry::new(),
        )))),
        RelayMode::Durable => {
            let pubsub = config
                .pubsub
                .as_ref()
                .ok_or(ConfigError::MissingVariable("GCP_PROJECT"))?;
            let client = PubSubClient::new(
                &pubsub.project_id,
                &pubsub.topic_id,
                Url::parse(&pubsub.endpoint)?,
                pubsub.access_token.clone(),
                reqwest::Client::builder().build()?,
            );
            info!(stage = "pubsub", topic = %pubsub.topic_path(), "publishing to topic");
            let relay = DurableRelay::new(
                Arc::new(client),
                config.publish_timeout,
                config.max_delay_secs,
            );
            Ok(Relay::Durable(Arc::new(relay)))
        }
    }
}
