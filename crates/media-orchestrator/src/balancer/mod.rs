//! Cross-instance load sharing.
//!
//! Every instance publishes its total router load on a shared topic and keeps
//! the most recent sample per peer. [`LoadBalancer::least_loaded_server`]
//! is advisory: routers are always placed on a local worker, the selected
//! server id only drives hosting-server bookkeeping.
//!
//! Losing the channel degrades to single-instance behavior: the instance picks
//! itself until the channel reports connected again. The publish loop keeps
//! trying on every tick; the sample map is never cleared. Samples older than
//! [`STALE_AFTER_INTERVALS`] broadcast intervals are ignored when choosing.

pub mod channel;
pub mod redis;

pub use channel::{LoadChannel, LocalLoadChannel};
pub use self::redis::RedisLoadChannel;

use crate::actors::metrics::LoadMetrics;
use crate::observability::metrics as prom;
use common::types::ServerId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Broadcast intervals after which a peer's last sample no longer counts.
pub const STALE_AFTER_INTERVALS: u32 = 3;

/// Load sample exchanged between instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSample {
    pub server_id: ServerId,
    pub load: u64,
}

impl LoadSample {
    /// Parse a payload, returning `None` (and logging) when malformed.
    #[must_use]
    pub fn parse(payload: &str) -> Option<Self> {
        match serde_json::from_str(payload) {
            Ok(sample) => Some(sample),
            Err(e) => {
                warn!(
                    target: "mo.balancer",
                    error = %e,
                    payload_len = payload.len(),
                    "Dropping malformed load sample"
                );
                None
            }
        }
    }
}

#[derive(Debug, Clone)]
struct ObservedSample {
    sample: LoadSample,
    seen_at: Instant,
}

/// Most recent load sample per server, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct ClusterLoadView {
    samples: Arc<RwLock<Vec<ObservedSample>>>,
    stale_after: Option<Duration>,
}

impl ClusterLoadView {
    /// A view whose samples never go stale.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A view that ignores samples not refreshed within `stale_after`.
    #[must_use]
    pub fn with_stale_after(stale_after: Duration) -> Self {
        Self {
            samples: Arc::default(),
            stale_after: Some(stale_after),
        }
    }

    /// Record a sample; replaces the previous sample of the same server.
    pub async fn record(&self, sample: LoadSample) {
        let now = Instant::now();
        let mut samples = self.samples.write().await;
        match samples
            .iter_mut()
            .find(|s| s.sample.server_id == sample.server_id)
        {
            Some(existing) => {
                existing.sample.load = sample.load;
                existing.seen_at = now;
            }
            None => samples.push(ObservedSample {
                sample,
                seen_at: now,
            }),
        }
    }

    fn is_fresh(&self, observed: &ObservedSample) -> bool {
        self.stale_after
            .map_or(true, |limit| observed.seen_at.elapsed() <= limit)
    }

    /// Server with the lowest fresh sampled load (first encountered on ties),
    /// or `own_id` when no fresh sample exists.
    pub async fn least_loaded(&self, own_id: &ServerId) -> ServerId {
        let samples = self.samples.read().await;
        let mut best: Option<&LoadSample> = None;
        for observed in samples.iter().filter(|s| self.is_fresh(s)) {
            if best.map_or(true, |b| observed.sample.load < b.load) {
                best = Some(&observed.sample);
            }
        }
        best.map_or_else(|| own_id.clone(), |s| s.server_id.clone())
    }

    /// Every recorded sample, stale ones included.
    pub async fn samples(&self) -> Vec<LoadSample> {
        self.samples
            .read()
            .await
            .iter()
            .map(|s| s.sample.clone())
            .collect()
    }
}

/// Publishes this instance's load and tracks peers' load.
pub struct LoadBalancer {
    server_id: ServerId,
    topic: String,
    interval: Duration,
    channel: Arc<dyn LoadChannel>,
    view: ClusterLoadView,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl LoadBalancer {
    #[must_use]
    pub fn new(
        server_id: ServerId,
        topic: String,
        interval: Duration,
        channel: Arc<dyn LoadChannel>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            server_id,
            topic,
            interval,
            channel,
            view: ClusterLoadView::with_stale_after(
                interval.saturating_mul(STALE_AFTER_INTERVALS),
            ),
            cancel,
            tasks: Vec::new(),
        }
    }

    #[must_use]
    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    #[must_use]
    pub fn view(&self) -> &ClusterLoadView {
        &self.view
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.channel.is_configured()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Start the subscriber and the periodic publisher.
    ///
    /// A failed subscription is logged; the instance then only sees its own
    /// samples (or none), which makes it pick itself.
    pub async fn start(&mut self, load: Arc<LoadMetrics>) {
        match self.channel.subscribe(&self.topic).await {
            Ok(rx) => {
                let view = self.view.clone();
                let cancel = self.cancel.clone();
                self.tasks
                    .push(tokio::spawn(run_subscriber(rx, view, cancel)));
                info!(target: "mo.balancer", topic = %self.topic, "Subscribed to load updates");
            }
            Err(e) => {
                warn!(
                    target: "mo.balancer",
                    error = %e,
                    "Load subscription failed, continuing as single instance"
                );
            }
        }

        self.tasks.push(tokio::spawn(run_publisher(
            Arc::clone(&self.channel),
            self.topic.clone(),
            self.server_id.clone(),
            self.interval,
            load,
            self.cancel.clone(),
        )));
    }

    /// Advisory least-loaded server id. Without a connected channel the
    /// instance always picks itself.
    pub async fn least_loaded_server(&self) -> ServerId {
        if !self.channel.is_connected() {
            return self.server_id.clone();
        }
        self.view.least_loaded(&self.server_id).await
    }

    /// Stop background tasks and disconnect the channel.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.channel.disconnect().await;
        info!(target: "mo.balancer", "Load balancer stopped");
    }
}

async fn run_subscriber(
    mut rx: mpsc::Receiver<String>,
    view: ClusterLoadView,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            payload = rx.recv() => {
                let Some(payload) = payload else {
                    warn!(target: "mo.balancer", "Load subscription closed");
                    break;
                };
                if let Some(sample) = LoadSample::parse(&payload) {
                    debug!(
                        target: "mo.balancer",
                        server_id = %sample.server_id,
                        load = sample.load,
                        "Received load sample"
                    );
                    view.record(sample).await;
                }
            }
        }
    }
}

async fn run_publisher(
    channel: Arc<dyn LoadChannel>,
    topic: String,
    server_id: ServerId,
    period: Duration,
    load: Arc<LoadMetrics>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                publish_load(channel.as_ref(), &topic, &server_id, load.total_routers()).await;
            }
        }
    }
}

/// Publish one sample. Failures are logged and counted, never returned.
pub async fn publish_load(channel: &dyn LoadChannel, topic: &str, server_id: &ServerId, load: u64) {
    let sample = LoadSample {
        server_id: server_id.clone(),
        load,
    };
    let payload = match serde_json::to_string(&sample) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(target: "mo.balancer", error = %e, "Failed to encode load sample");
            return;
        }
    };

    match channel.publish(topic, payload).await {
        Ok(()) => prom::record_load_broadcast("success"),
        Err(e) => {
            prom::record_load_broadcast("error");
            debug!(target: "mo.balancer", error = %e, "Load broadcast failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample(id: &str, load: u64) -> LoadSample {
        LoadSample {
            server_id: ServerId::from(id),
            load,
        }
    }

    #[test]
    fn test_parse_accepts_camel_case_payload() {
        let parsed = LoadSample::parse(r#"{"serverId":"mo-a","load":4}"#).unwrap();
        assert_eq!(parsed, sample("mo-a", 4));
    }

    #[test]
    fn test_parse_rejects_malformed_payloads() {
        assert!(LoadSample::parse("not json").is_none());
        assert!(LoadSample::parse(r#"{"serverId":"mo-a"}"#).is_none());
        assert!(LoadSample::parse(r#"{"serverId":"mo-a","load":-1}"#).is_none());
        assert!(LoadSample::parse(r#"{"server_id":"mo-a","load":1}"#).is_none());
    }

    #[tokio::test]
    async fn test_empty_view_selects_self() {
        let view = ClusterLoadView::new();
        assert_eq!(
            view.least_loaded(&ServerId::from("me")).await,
            ServerId::from("me")
        );
    }

    #[tokio::test]
    async fn test_least_loaded_first_encountered_on_tie() {
        let view = ClusterLoadView::new();
        view.record(sample("a", 3)).await;
        view.record(sample("b", 1)).await;
        view.record(sample("c", 1)).await;

        assert_eq!(view.least_loaded(&ServerId::from("me")).await, ServerId::from("b"));
    }

    #[tokio::test]
    async fn test_most_recent_sample_wins() {
        let view = ClusterLoadView::new();
        view.record(sample("a", 1)).await;
        view.record(sample("b", 2)).await;
        view.record(sample("a", 9)).await;

        assert_eq!(view.samples().await, vec![sample("a", 9), sample("b", 2)]);
        assert_eq!(view.least_loaded(&ServerId::from("me")).await, ServerId::from("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_balancers_exchange_load() {
        let bus = LocalLoadChannel::new();
        let busy_load = LoadMetrics::new();
        busy_load.set_total_routers(5);
        let idle_load = LoadMetrics::new();

        let mut busy = LoadBalancer::new(
            ServerId::from("busy"),
            "load".to_string(),
            Duration::from_secs(5),
            Arc::new(bus.peer()),
            CancellationToken::new(),
        );
        let mut idle = LoadBalancer::new(
            ServerId::from("idle"),
            "load".to_string(),
            Duration::from_secs(5),
            Arc::new(bus.peer()),
            CancellationToken::new(),
        );

        busy.start(busy_load).await;
        idle.start(idle_load).await;

        for _ in 0..20 {
            tokio::time::advance(Duration::from_millis(500)).await;
            tokio::task::yield_now().await;
        }

        assert_eq!(busy.least_loaded_server().await, ServerId::from("idle"));
        assert_eq!(idle.view().samples().await.len(), 2);

        busy.shutdown().await;
        idle.shutdown().await;
        assert!(!busy.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_keeps_samples_and_survives_publish_errors() {
        let bus = LocalLoadChannel::new();
        let channel = Arc::new(bus.peer());
        let mut balancer = LoadBalancer::new(
            ServerId::from("me"),
            "load".to_string(),
            Duration::from_secs(1),
            Arc::clone(&channel) as Arc<dyn LoadChannel>,
            CancellationToken::new(),
        );
        balancer.view().record(sample("peer", 0)).await;
        balancer.start(LoadMetrics::new()).await;

        channel.sever();
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }

        assert!(!balancer.is_connected());
        assert_eq!(balancer.least_loaded_server().await, ServerId::from("me"));
        assert_eq!(balancer.view().samples().await, vec![sample("peer", 0)]);
        balancer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_samples_are_ignored() {
        let view = ClusterLoadView::with_stale_after(Duration::from_secs(15));
        view.record(sample("crashed", 0)).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        view.record(sample("alive", 4)).await;

        assert_eq!(
            view.least_loaded(&ServerId::from("me")).await,
            ServerId::from("crashed")
        );

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(
            view.least_loaded(&ServerId::from("me")).await,
            ServerId::from("alive")
        );

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(
            view.least_loaded(&ServerId::from("me")).await,
            ServerId::from("me")
        );
        assert_eq!(view.samples().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshed_sample_stays_fresh() {
        let view = ClusterLoadView::with_stale_after(Duration::from_secs(15));
        view.record(sample("peer", 2)).await;
        tokio::time::advance(Duration::from_secs(12)).await;
        view.record(sample("peer", 1)).await;
        tokio::time::advance(Duration::from_secs(12)).await;

        assert_eq!(
            view.least_loaded(&ServerId::from("me")).await,
            ServerId::from("peer")
        );
    }
}
