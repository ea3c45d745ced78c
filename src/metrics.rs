use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at: Instant,
    pub snapshot_builds_total: CounterVec,
    pub snapshot_build_errors_total: CounterVec,
    pub snapshot_build_seconds: Gauge,
    pub feed_pushes_total: Counter,
    pub feed_subscribers: Gauge,
    pub scrape_count_total: Counter,
    pub uptime_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let snapshot_builds_total = CounterVec::new(
            opts!(
                "sysfeed_snapshot_builds_total",
                "Snapshots built successfully, by consumer"
            ),
            &["source"],
        )?;
        let snapshot_build_errors_total = CounterVec::new(
            opts!(
                "sysfeed_snapshot_build_errors_total",
                "Snapshot builds aborted by a provider failure, by consumer"
            ),
            &["source"],
        )?;
        let snapshot_build_seconds = Gauge::with_opts(opts!(
            "sysfeed_snapshot_build_seconds",
            "Duration of the most recent snapshot build in seconds"
        ))?;
        let feed_pushes_total = Counter::with_opts(opts!(
            "sysfeed_feed_pushes_total",
            "Snapshots pushed to live-feed subscribers"
        ))?;
        let feed_subscribers = Gauge::with_opts(opts!(
            "sysfeed_feed_subscribers",
            "Currently connected live-feed subscribers"
        ))?;
        let scrape_count_total = Counter::with_opts(opts!(
            "sysfeed_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let uptime_seconds = Gauge::with_opts(opts!(
            "sysfeed_uptime_seconds",
            "Seconds since the service started"
        ))?;

        register(&registry, &snapshot_builds_total)?;
        register(&registry, &snapshot_build_errors_total)?;
        register(&registry, &snapshot_build_seconds)?;
        register(&registry, &feed_pushes_total)?;
        register(&registry, &feed_subscribers)?;
        register(&registry, &scrape_count_total)?;
        register(&registry, &uptime_seconds)?;

        Ok(Arc::new(Self {
            registry,
            started_at: Instant::now(),
            snapshot_builds_total,
            snapshot_build_errors_total,
            snapshot_build_seconds,
            feed_pushes_total,
            feed_subscribers,
            scrape_count_total,
            uptime_seconds,
        }))
    }

    /// Records the outcome of one build for `source` (`api` or `feed`).
    pub fn observe_build(&self, source: &str, elapsed: Duration, ok: bool) {
        self.snapshot_build_seconds.set(elapsed.as_secs_f64());
        let counter = if ok {
            &self.snapshot_builds_total
        } else {
            &self.snapshot_build_errors_total
        };
        counter.with_label_values(&[source]).inc();
    }

    pub fn inc_feed_push(&self) {
        self.feed_pushes_total.inc();
    }

    pub fn subscriber_connected(&self) {
        self.feed_subscribers.inc();
    }

    pub fn subscriber_disconnected(&self) {
        self.feed_subscribers.dec();
    }

    pub fn inc_scrape_count(&self) {
        self.scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.uptime_seconds
            .set(self.started_at.elapsed().as_secs_f64());

        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
