//! Redis pub/sub load channel.
//!
//! Publishing uses a multiplexed connection; each subscription owns a
//! dedicated pub/sub connection drained by a forwarding task.

use super::channel::{LoadChannel, SUBSCRIPTION_BUFFER};
use crate::errors::OrchestratorError;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Redis implementation of [`LoadChannel`].
pub struct RedisLoadChannel {
    client: Client,
    publisher: MultiplexedConnection,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl RedisLoadChannel {
    /// Connect the publisher connection.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::Broadcast` if Redis is unreachable.
    pub async fn connect(redis_url: &str) -> Result<Self, OrchestratorError> {
        let client = Client::open(redis_url).map_err(|e| {
            error!(target: "mo.balancer", error = %e, "Failed to open Redis client");
            OrchestratorError::Broadcast(format!("Failed to open Redis client: {e}"))
        })?;

        let publisher = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "mo.balancer", error = %e, "Failed to connect load publisher");
                OrchestratorError::Broadcast(format!("Failed to connect publisher: {e}"))
            })?;

        Ok(Self {
            client,
            publisher,
            connected: Arc::new(AtomicBool::new(true)),
            cancel: CancellationToken::new(),
        })
    }

    fn mark(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if was != connected {
            if connected {
                info!(target: "mo.balancer", "Broadcast channel reconnected");
            } else {
                warn!(target: "mo.balancer", "Broadcast channel disconnected");
            }
        }
    }
}

#[async_trait::async_trait]
impl LoadChannel for RedisLoadChannel {
    fn is_configured(&self) -> bool {
        true
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<(), OrchestratorError> {
        if self.cancel.is_cancelled() {
            return Err(OrchestratorError::Broadcast(
                "channel disconnected".to_string(),
            ));
        }

        let mut conn = self.publisher.clone();
        match conn.publish::<_, _, ()>(topic, payload).await {
            Ok(()) => {
                self.mark(true);
                Ok(())
            }
            Err(e) => {
                self.mark(false);
                Err(OrchestratorError::Broadcast(format!("publish failed: {e}")))
            }
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<String>, OrchestratorError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
            self.mark(false);
            OrchestratorError::Broadcast(format!("Failed to open subscriber: {e}"))
        })?;
        pubsub.subscribe(topic).await.map_err(|e| {
            self.mark(false);
            OrchestratorError::Broadcast(format!("Failed to subscribe to {topic}: {e}"))
        })?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = self.cancel.clone();
        let connected = Arc::clone(&self.connected);
        let topic = topic.to_string();

        tokio::spawn(async move {
            let mut messages = Box::pin(pubsub.into_on_message());
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    msg = messages.next() => {
                        let Some(msg) = msg else {
                            connected.store(false, Ordering::SeqCst);
                            warn!(target: "mo.balancer", topic = %topic, "Load subscription ended");
                            break;
                        };
                        match msg.get_payload::<String>() {
                            Ok(payload) => {
                                if tx.send(payload).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(target: "mo.balancer", error = %e, "Dropping non-text load payload");
                            }
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn disconnect(&self) {
        self.cancel.cancel();
        self.connected.store(false, Ordering::SeqCst);
        info!(target: "mo.balancer", "Broadcast channel closed");
    }
}
