//! Broadcast channel seam and the process-local implementation.

use crate::errors::OrchestratorError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Capacity of subscriber queues handed to the load balancer.
pub const SUBSCRIPTION_BUFFER: usize = 64;

/// Publish/subscribe channel used to exchange load samples.
#[async_trait::async_trait]
pub trait LoadChannel: Send + Sync {
    /// False when the deployment has no shared channel (single instance).
    fn is_configured(&self) -> bool;

    /// Last known connectivity state.
    fn is_connected(&self) -> bool;

    async fn publish(&self, topic: &str, payload: String) -> Result<(), OrchestratorError>;

    /// Subscribe to a topic. Payloads arrive on the returned receiver until
    /// the channel disconnects.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<String>, OrchestratorError>;

    /// Drop publisher and subscriber connections.
    async fn disconnect(&self);
}

/// In-process channel.
///
/// Handles created with [`LocalLoadChannel::peer`] share one bus, which lets
/// tests run several orchestrators against each other. Reports itself as
/// unconfigured since nothing leaves the process.
#[derive(Debug)]
pub struct LocalLoadChannel {
    bus: broadcast::Sender<(String, String)>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Default for LocalLoadChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalLoadChannel {
    #[must_use]
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(SUBSCRIPTION_BUFFER);
        Self {
            bus,
            connected: Arc::new(AtomicBool::new(true)),
            cancel: CancellationToken::new(),
        }
    }

    /// Another handle on the same bus with its own connection state.
    #[must_use]
    pub fn peer(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            connected: Arc::new(AtomicBool::new(true)),
            cancel: CancellationToken::new(),
        }
    }

    /// Simulate losing the connection: publishes fail and subscriptions end.
    pub fn sever(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

#[async_trait::async_trait]
impl LoadChannel for LocalLoadChannel {
    fn is_configured(&self) -> bool {
        false
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<(), OrchestratorError> {
        if !self.is_connected() {
            return Err(OrchestratorError::Broadcast(
                "local channel disconnected".to_string(),
            ));
        }
        // No subscribers is not an error.
        let _ = self.bus.send((topic.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<String>, OrchestratorError> {
        if !self.is_connected() {
            return Err(OrchestratorError::Broadcast(
                "local channel disconnected".to_string(),
            ));
        }

        let mut bus_rx = self.bus.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let topic = topic.to_string();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    received = bus_rx.recv() => match received {
                        Ok((msg_topic, payload)) if msg_topic == topic => {
                            if tx.send(payload).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(target: "mo.balancer", skipped, "Local subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(rx)
    }

    async fn disconnect(&self) {
        self.sever();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_peers_share_messages_per_topic() {
        let a = LocalLoadChannel::new();
        let b = a.peer();

        let mut rx = b.subscribe("load").await.unwrap();
        a.publish("other", "ignored".to_string()).await.unwrap();
        a.publish("load", "hello".to_string()).await.unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_sever_ends_subscription_and_fails_publish() {
        let channel = LocalLoadChannel::new();
        let mut rx = channel.subscribe("load").await.unwrap();

        channel.sever();

        assert!(!channel.is_connected());
        assert!(rx.recv().await.is_none());
        assert!(channel.publish("load", "x".to_string()).await.is_err());
    }

    #[test]
    fn test_local_channel_is_unconfigured() {
        assert!(!LocalLoadChannel::new().is_configured());
    }
}
