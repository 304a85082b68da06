use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use hook_relay_core::{SendError, Subscriber, SubscriberId};
use metrics::gauge;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::router::Dispatcher;

/// Subscriber half of one websocket connection.
///
/// Payloads are queued for the connection's writer task; once that task ends
/// the queue closes and the subscriber reports itself closed.
pub struct WsSubscriber {
    id: SubscriberId,
    outbound: mpsc::UnboundedSender<Arc<str>>,
}

impl WsSubscriber {
    pub fn new(outbound: mpsc::UnboundedSender<Arc<str>>) -> Self {
        Self {
            id: SubscriberId::new(),
            outbound,
        }
    }
}

impl Subscriber for WsSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    fn send(&self, payload: &Arc<str>) -> Result<(), SendError> {
        self.outbound
            .send(payload.clone())
            .map_err(|_| SendError(self.id))
    }
}

pub async fn handle(
    State(dispatcher): State<Dispatcher>,
    Path(webhook_id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| serve_subscriber(socket, dispatcher, webhook_id))
}

/// Keeps one subscriber registered for as long as its socket stays open.
async fn serve_subscriber(socket: WebSocket, dispatcher: Dispatcher, webhook_id: String) {
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut queue) = mpsc::unbounded_channel::<Arc<str>>();
    let subscriber = Arc::new(WsSubscriber::new(outbound));
    let subscriber_id = subscriber.id();

    let registry = dispatcher.registry().clone();
    registry.register(&webhook_id, subscriber).await;
    gauge!("websocket_subscribers").increment(1.0);
    info!(stage = "websocket", %webhook_id, %subscriber_id, "subscriber registered");

    let mut writer = tokio::spawn(async move {
        while let Some(payload) = queue.recv().await {
            if sink.send(Message::Text(payload.to_string())).await.is_err() {
                break;
            }
        }
    });

    let mut reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => {
            debug!(stage = "websocket", %subscriber_id, "writer finished");
            reader.abort();
        }
        _ = &mut reader => {
            debug!(stage = "websocket", %subscriber_id, "peer closed connection");
            writer.abort();
        }
    }

    let removed = registry.deregister(&webhook_id, subscriber_id).await;
    gauge!("websocket_subscribers").decrement(1.0);
    info!(
        stage = "websocket",
        %webhook_id,
        %subscriber_id,
        already_pruned = !removed,
        "subscriber deregistered"
    );
}
