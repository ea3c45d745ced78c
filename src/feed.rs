//! Live feed: pushes a fresh snapshot to every subscriber once per interval.
//!
//! A [`Subscriber`] owns the task that drives its timer. Dropping the
//! subscriber aborts that task, which cancels the pending tick together with
//! any build still in flight for it, so nothing is ever pushed to a channel
//! that has gone away.
//!
//! In [`FeedMode::Shared`] a single ticker builds one snapshot per interval
//! and every subscriber forwards it from a broadcast channel instead of
//! building its own.

use crate::config::{FeedConfig, FeedMode};
use crate::metrics::Metrics;
use crate::snapshot::{Snapshot, SnapshotBuilder};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Frames buffered per subscriber in shared mode before it starts lagging.
const SHARED_FEED_CAPACITY: usize = 4;

/// The subscriber's channel is gone.
#[derive(Debug)]
pub struct SinkClosed;

/// Transport a subscriber's frames are written to.
#[async_trait]
pub trait FeedSink: Send + 'static {
    async fn push(&mut self, frame: String) -> Result<(), SinkClosed>;
}

#[derive(Serialize)]
struct EventFrame<'a> {
    event: &'a str,
    data: &'a Snapshot,
}

pub fn encode_event(event: &str, snapshot: &Snapshot) -> Result<String, serde_json::Error> {
    serde_json::to_string(&EventFrame {
        event,
        data: snapshot,
    })
}

#[derive(Clone)]
pub struct Feed {
    builder: SnapshotBuilder,
    metrics: Arc<Metrics>,
    interval: Duration,
    event_name: Arc<str>,
    shared: Option<broadcast::Sender<Arc<str>>>,
    next_id: Arc<AtomicU64>,
}

impl Feed {
    pub fn new(builder: SnapshotBuilder, metrics: Arc<Metrics>, cfg: &FeedConfig) -> Self {
        let shared = match cfg.mode {
            FeedMode::PerSubscriber => None,
            FeedMode::Shared => Some(broadcast::channel(SHARED_FEED_CAPACITY).0),
        };
        Self {
            builder,
            metrics,
            interval: cfg.interval(),
            event_name: Arc::from(cfg.event_name.as_str()),
            shared,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Starts the shared ticker. Does nothing in per-subscriber mode.
    pub fn spawn_shared_ticker(&self, shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        let tx = self.shared.clone()?;
        let feed = self.clone();
        Some(tokio::spawn(async move {
            feed.run_shared_ticker(tx, shutdown).await;
        }))
    }

    /// Registers a subscriber and arms its timer.
    pub fn subscribe<S: FeedSink>(&self, sink: S) -> Subscriber {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timer = match &self.shared {
            Some(tx) => {
                let rx = tx.subscribe();
                let metrics = self.metrics.clone();
                tokio::spawn(forward_shared(id, rx, metrics, sink))
            }
            None => {
                let feed = self.clone();
                tokio::spawn(async move { feed.run_own_timer(id, sink).await })
            }
        };

        self.metrics.subscriber_connected();
        Subscriber {
            id,
            timer,
            metrics: self.metrics.clone(),
        }
    }

    async fn run_own_timer<S: FeedSink>(&self, id: u64, mut sink: S) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let Some(frame) = self.build_frame().await else {
                continue;
            };
            if sink.push(frame).await.is_err() {
                debug!(subscriber = id, "feed channel closed");
                break;
            }
            self.metrics.inc_feed_push();
        }
    }

    async fn run_shared_ticker(
        &self,
        tx: broadcast::Sender<Arc<str>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shared feed ticker stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if tx.receiver_count() == 0 {
                        continue;
                    }
                    if let Some(frame) = self.build_frame().await {
                        let _ = tx.send(Arc::from(frame));
                    }
                }
            }
        }
    }

    /// One tick's worth of work. `None` means the tick is skipped.
    async fn build_frame(&self) -> Option<String> {
        let started = Instant::now();
        let snapshot = match self.builder.build().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.metrics.observe_build("feed", started.elapsed(), false);
                warn!(error = %err, "snapshot build failed, skipping feed tick");
                return None;
            }
        };
        self.metrics.observe_build("feed", started.elapsed(), true);

        match encode_event(&self.event_name, &snapshot) {
            Ok(frame) => Some(frame),
            Err(err) => {
                warn!(error = %err, "failed to encode feed frame");
                None
            }
        }
    }
}

async fn forward_shared<S: FeedSink>(
    id: u64,
    mut rx: broadcast::Receiver<Arc<str>>,
    metrics: Arc<Metrics>,
    mut sink: S,
) {
    loop {
        match rx.recv().await {
            Ok(frame) => {
                if sink.push(frame.to_string()).await.is_err() {
                    debug!(subscriber = id, "feed channel closed");
                    break;
                }
                metrics.inc_feed_push();
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!(subscriber = id, skipped, "subscriber lagged behind shared feed");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// A connected live-feed subscriber.
///
/// Lives exactly as long as the connection. Dropping it (or calling
/// [`Subscriber::disconnect`]) cancels its timer; there is no way back, a new
/// connection gets a new subscriber.
pub struct Subscriber {
    id: u64,
    timer: JoinHandle<()>,
    metrics: Arc<Metrics>,
}

impl Subscriber {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Resolves once the timer stops by itself: the channel closed or the
    /// task panicked.
    pub async fn finished(&mut self) {
        if let Err(err) = (&mut self.timer).await {
            if err.is_panic() {
                warn!(subscriber = self.id, error = %err, "feed timer task panicked");
            }
        }
    }

    pub fn disconnect(self) {
        drop(self);
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.timer.abort();
        self.metrics.subscriber_disconnected();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::fake::FakeProvider;
    use tokio::sync::mpsc;

    #[async_trait]
    impl FeedSink for mpsc::UnboundedSender<String> {
        async fn push(&mut self, frame: String) -> Result<(), SinkClosed> {
            self.send(frame).map_err(|_| SinkClosed)
        }
    }

    const PERIOD: Duration = Duration::from_secs(5);

    fn feed_with(provider: Arc<FakeProvider>, mode: FeedMode) -> (Feed, Arc<Metrics>) {
        let metrics = Metrics::new().expect("metrics init");
        let cfg = FeedConfig {
            interval_secs: PERIOD.as_secs(),
            event_name: "datosSistema".to_string(),
            mode,
        };
        let feed = Feed::new(SnapshotBuilder::new(provider), metrics.clone(), &cfg);
        (feed, metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn frame_carries_event_name_and_snapshot() {
        let (feed, _metrics) = feed_with(Arc::new(FakeProvider::healthy()), FeedMode::PerSubscriber);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = feed.subscribe(tx);

        let started = Instant::now();
        let frame = rx.recv().await.expect("first frame");
        assert!(started.elapsed() >= PERIOD);

        let value: serde_json::Value = serde_json::from_str(&frame).expect("json frame");
        assert_eq!(value["event"], "datosSistema");
        assert!(value["data"]["timestamp"].is_string());
        assert_eq!(value["data"]["particiones"]["sda5"]["esSwap"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_are_independent() {
        let provider = Arc::new(FakeProvider::healthy());
        let (feed, metrics) = feed_with(provider.clone(), FeedMode::PerSubscriber);

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        let first = feed.subscribe(tx1);
        let _second = feed.subscribe(tx2);
        let _third = feed.subscribe(tx3);
        assert_eq!(metrics.feed_subscribers.get(), 3.0);

        let started = Instant::now();
        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            assert!(rx.recv().await.is_some());
        }
        assert_eq!(started.elapsed(), PERIOD);
        assert_eq!(provider.batches(), 3);

        first.disconnect();
        assert_eq!(metrics.feed_subscribers.get(), 2.0);
        assert!(rx1.recv().await.is_none());

        for rx in [&mut rx2, &mut rx3] {
            assert!(rx.recv().await.is_some());
        }
        assert_eq!(started.elapsed(), PERIOD * 2);
        assert_eq!(provider.batches(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_build_skips_tick_but_keeps_timer() {
        let provider = Arc::new(FakeProvider::healthy());
        provider.set_failing(true);
        let (feed, metrics) = feed_with(provider.clone(), FeedMode::PerSubscriber);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = feed.subscribe(tx);

        let missed = time::timeout(PERIOD + Duration::from_secs(1), rx.recv()).await;
        assert!(missed.is_err(), "no frame may be pushed for a failed tick");
        assert_eq!(provider.batches(), 1);
        assert_eq!(
            metrics
                .snapshot_build_errors_total
                .with_label_values(&["feed"])
                .get(),
            1.0
        );

        provider.set_failing(false);
        assert!(rx.recv().await.is_some());
        assert_eq!(provider.batches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_ends_the_session() {
        let (feed, metrics) = feed_with(Arc::new(FakeProvider::healthy()), FeedMode::PerSubscriber);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = feed.subscribe(tx);
        drop(rx);

        sub.finished().await;
        assert_eq!(metrics.feed_pushes_total.get(), 0.0);
        drop(sub);
        assert_eq!(metrics.feed_subscribers.get(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_before_first_tick_never_builds() {
        let provider = Arc::new(FakeProvider::healthy());
        let (feed, _metrics) = feed_with(provider.clone(), FeedMode::PerSubscriber);
        let (tx, mut rx) = mpsc::unbounded_channel();
        feed.subscribe(tx).disconnect();

        assert!(rx.recv().await.is_none());
        time::sleep(PERIOD * 3).await;
        assert_eq!(provider.batches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_build_discards_its_result() {
        let mut provider = FakeProvider::healthy();
        provider.delay = Some(Duration::from_secs(2));
        let provider = Arc::new(provider);
        let (feed, metrics) = feed_with(provider.clone(), FeedMode::PerSubscriber);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = feed.subscribe(tx);

        time::sleep(PERIOD + Duration::from_secs(1)).await;
        assert_eq!(provider.batches(), 1, "build must be in flight");
        assert!(rx.try_recv().is_err());

        sub.disconnect();
        time::sleep(PERIOD * 2).await;

        assert!(rx.recv().await.is_none());
        assert_eq!(provider.batches(), 1);
        assert_eq!(metrics.feed_pushes_total.get(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_sink_ends_the_session() {
        struct PanickingSink;

        #[async_trait]
        impl FeedSink for PanickingSink {
            async fn push(&mut self, _frame: String) -> Result<(), SinkClosed> {
                panic!("sink exploded");
            }
        }

        let (feed, _metrics) = feed_with(Arc::new(FakeProvider::healthy()), FeedMode::PerSubscriber);
        let mut sub = feed.subscribe(PanickingSink);
        time::timeout(PERIOD * 2, sub.finished())
            .await
            .expect("session ends after the panic");
    }

    #[tokio::test(start_paused = true)]
    async fn shared_mode_builds_once_per_interval() {
        let provider = Arc::new(FakeProvider::healthy());
        let (feed, metrics) = feed_with(provider.clone(), FeedMode::Shared);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ticker = feed.spawn_shared_ticker(shutdown_rx).expect("shared ticker");

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        let first = feed.subscribe(tx1);
        let _second = feed.subscribe(tx2);
        let _third = feed.subscribe(tx3);

        let a = rx1.recv().await.expect("frame");
        let b = rx2.recv().await.expect("frame");
        let c = rx3.recv().await.expect("frame");
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(provider.batches(), 1);

        first.disconnect();
        assert!(rx1.recv().await.is_none());
        assert!(rx2.recv().await.is_some());
        assert!(rx3.recv().await.is_some());
        assert_eq!(provider.batches(), 2);
        assert_eq!(metrics.feed_pushes_total.get(), 5.0);

        let _ = shutdown_tx.send(true);
        ticker.await.expect("ticker stops");
    }

    #[tokio::test]
    async fn per_subscriber_mode_has_no_shared_ticker() {
        let (feed, _metrics) = feed_with(Arc::new(FakeProvider::healthy()), FeedMode::PerSubscriber);
        let (_tx, rx) = watch::channel(false);
        assert!(feed.spawn_shared_ticker(rx).is_none());
    }
}
