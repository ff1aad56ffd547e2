use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use meter_client::Reading;
use rand::Rng;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::{
    sync::{mpsc, Notify},
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{CrawlConfig, TargetConfig},
    error::{CrawlError, CrawlErrorKind},
    fetcher::Fetcher,
    parser::{Parser, Tier},
    pipeline::Envelope,
    proxy::ProxyPool,
};

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Source of randomized delays, so request cadence is not fixed.
pub trait JitterSource: Send + Sync {
    /// A delay in `[0, max]`.
    fn delay(&self, max: Duration) -> Duration;
}

pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn delay(&self, max: Duration) -> Duration {
        let max_ms = max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Attempts per tick, including the first one.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
    pub jitter_max: Duration,
    pub warmup_max: Duration,
}

impl From<&CrawlConfig> for RetrySettings {
    fn from(cfg: &CrawlConfig) -> Self {
        Self {
            max_retries: cfg.max_retries.max(1),
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
            poll_interval: Duration::from_secs(cfg.poll_interval_secs),
            jitter_max: Duration::from_secs(cfg.jitter_max_secs),
            warmup_max: Duration::from_secs(cfg.warmup_max_secs),
        }
    }
}

/// The page and meter a crawler is bound to.
#[derive(Debug, Clone)]
pub struct CrawlTarget {
    pub url: String,
    pub meter_id: String,
    pub meter_name: String,
}

impl From<&TargetConfig> for CrawlTarget {
    fn from(cfg: &TargetConfig) -> Self {
        Self {
            url: cfg.url.clone(),
            meter_id: cfg.meter_id.clone(),
            meter_name: cfg.meter_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success { remaining_kwh: f64, tier: Tier },
    Error { kind: CrawlErrorKind, message: String },
    /// Terminal entry written once a tick has used up its attempts.
    Failed { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlAttempt {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub attempt_index: u32,
    pub target: String,
    pub proxy: Option<String>,
    pub outcome: AttemptOutcome,
}

/// Fixed-size ring of recent attempts; the oldest entry is evicted first.
#[derive(Debug)]
pub struct AttemptLog {
    capacity: usize,
    entries: VecDeque<CrawlAttempt>,
}

impl AttemptLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, attempt: CrawlAttempt) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(attempt);
    }

    pub fn to_vec(&self) -> Vec<CrawlAttempt> {
        self.entries.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickState {
    Idle,
    Attempting(u32),
    Failed(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Success {
        reading: Reading,
        attempt: u32,
        tier: Tier,
        via: Option<String>,
    },
    Failed {
        attempts: u32,
        last_error: String,
    },
}

struct AttemptSuccess {
    reading: Reading,
    tier: Tier,
    via: Option<String>,
}

/// A failed attempt and the proxy it went through, when one was used.
struct AttemptFailure {
    error: CrawlError,
    via: Option<String>,
}

impl From<CrawlError> for AttemptFailure {
    fn from(error: CrawlError) -> Self {
        Self { error, via: None }
    }
}

/// Drives fetch and parse for one target, with bounded retries per tick and a
/// jittered recurring schedule.
///
/// Owns the proxy pool handle and the attempt log for the process lifetime.
pub struct Crawler {
    target: CrawlTarget,
    settings: RetrySettings,
    fetcher: Arc<dyn Fetcher>,
    pool: Option<ProxyPool>,
    parser: Parser,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    attempts: Mutex<AttemptLog>,
    tick_lock: tokio::sync::Mutex<()>,
    trigger: Notify,
}

impl Crawler {
    pub fn new(
        target: CrawlTarget,
        settings: RetrySettings,
        fetcher: Arc<dyn Fetcher>,
        pool: Option<ProxyPool>,
        parser: Parser,
        attempt_log_capacity: usize,
    ) -> Self {
        Self {
            target,
            settings,
            fetcher,
            pool,
            parser,
            clock: Arc::new(SystemClock),
            jitter: Arc::new(RandomJitter),
            attempts: Mutex::new(AttemptLog::new(attempt_log_capacity)),
            tick_lock: tokio::sync::Mutex::new(()),
            trigger: Notify::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Recent attempts, oldest first.
    pub fn recent_attempts(&self) -> Vec<CrawlAttempt> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner).to_vec()
    }

    /// Ask the scheduler loop to run a tick now. Serialized with scheduled ticks.
    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }

    fn record(&self, attempt_index: u32, proxy: Option<String>, outcome: AttemptOutcome) {
        let entry = CrawlAttempt {
            timestamp: self.clock.now(),
            attempt_index,
            target: self.target.url.clone(),
            proxy,
            outcome,
        };
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    async fn attempt_once(&self) -> Result<AttemptSuccess, AttemptFailure> {
        let url = &self.target.url;
        let (body, via) = match &self.pool {
            Some(pool) => {
                let (body, proxy) = pool.request_with_proxy(url).await?;
                (body, Some(proxy.url()))
            }
            None => (self.fetcher.fetch(url, None).await?, None),
        };

        let extraction = match self.parser.parse(&body) {
            Ok(e) => e,
            Err(e) => {
                let digest = blake3::hash(body.as_bytes()).to_hex();
                tracing::warn!(
                    target_url = %url,
                    proxy = via.as_deref().unwrap_or("direct"),
                    body_len = body.len(),
                    body_digest = &digest.as_str()[..16],
                    "no plausible reading in response"
                );
                return Err(AttemptFailure { error: e, via });
            }
        };

        let reading = Reading::new(
            self.target.meter_id.clone(),
            self.target.meter_name.clone(),
            extraction.value,
            self.clock.now(),
        );
        Ok(AttemptSuccess {
            reading,
            tier: extraction.tier,
            via,
        })
    }

    /// Run one tick: up to `max_retries` attempts with a fixed backoff between them.
    ///
    /// Never returns an error; exhaustion ends the tick with `TickOutcome::Failed`
    /// and the next tick starts with a fresh budget.
    pub async fn run_tick(&self) -> TickOutcome {
        let _serial = self.tick_lock.lock().await;
        let max = self.settings.max_retries.max(1);
        let url = self.target.url.as_str();
        let mut last_error = String::new();
        let mut state = TickState::Idle;

        loop {
            state = match state {
                TickState::Idle => TickState::Attempting(1),
                TickState::Attempting(n) => match self.attempt_once().await {
                    Ok(success) => {
                        tracing::info!(
                            attempt = n,
                            target_url = %url,
                            proxy = success.via.as_deref().unwrap_or("direct"),
                            remaining_kwh = success.reading.remaining_kwh,
                            tier = %success.tier,
                            "crawl attempt succeeded"
                        );
                        metrics::counter!("crawl_attempts_total", "outcome" => "success").increment(1);
                        metrics::counter!("crawl_ticks_total", "outcome" => "success").increment(1);
                        self.record(
                            n,
                            success.via.clone(),
                            AttemptOutcome::Success {
                                remaining_kwh: success.reading.remaining_kwh,
                                tier: success.tier,
                            },
                        );
                        return TickOutcome::Success {
                            reading: success.reading,
                            attempt: n,
                            tier: success.tier,
                            via: success.via,
                        };
                    }
                    Err(AttemptFailure { error: e, via }) => {
                        let kind = e.kind();
                        tracing::warn!(
                            attempt = n,
                            max_attempts = max,
                            target_url = %url,
                            proxy = via.as_deref().unwrap_or("direct"),
                            kind = kind.as_str(),
                            error = %e,
                            "crawl attempt failed"
                        );
                        metrics::counter!("crawl_attempts_total", "outcome" => kind.as_str()).increment(1);
                        last_error = e.to_string();
                        self.record(
                            n,
                            via,
                            AttemptOutcome::Error {
                                kind,
                                message: last_error.clone(),
                            },
                        );

                        if n >= max {
                            TickState::Failed(n)
                        } else {
                            tokio::time::sleep(self.settings.retry_delay).await;
                            TickState::Attempting(n + 1)
                        }
                    }
                },
                TickState::Failed(n) => {
                    tracing::error!(attempts = n, target_url = %url, last_error = %last_error, "crawl tick failed");
                    metrics::counter!("crawl_ticks_total", "outcome" => "failed").increment(1);
                    self.record(n, None, AttemptOutcome::Failed { attempts: n });
                    return TickOutcome::Failed {
                        attempts: n,
                        last_error,
                    };
                }
            };
        }
    }

    /// Run a tick unless shutdown wins first, forwarding a successful reading.
    /// Returns false once the loop should stop.
    async fn tick_and_emit(&self, tx: &mpsc::Sender<Envelope<Reading>>, shutdown: &CancellationToken) -> bool {
        let outcome = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(target_url = %self.target.url, "shutdown during tick, discarding in-flight attempt");
                return false;
            }
            outcome = self.run_tick() => outcome,
        };

        if let TickOutcome::Success { reading, attempt, via, .. } = outcome {
            if tx.send(Envelope::new(reading, attempt, via)).await.is_err() {
                tracing::warn!("reading channel closed, stopping crawler");
                return false;
            }
        }
        true
    }

    /// Long-lived schedule: one tick after a short randomized warm-up, then one
    /// per `poll_interval` plus jitter, plus any manual triggers. Runs until
    /// `shutdown` is cancelled or the receiver goes away.
    pub async fn run(self: Arc<Self>, tx: mpsc::Sender<Envelope<Reading>>, shutdown: CancellationToken) {
        let warmup = self.jitter.delay(self.settings.warmup_max);
        tracing::info!(
            target_url = %self.target.url,
            warmup_ms = warmup.as_millis() as u64,
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            "crawler scheduled"
        );

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(warmup) => {}
        }
        if !self.tick_and_emit(&tx, &shutdown).await {
            return;
        }

        let period = self.settings.poll_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let jitter = self.jitter.delay(self.settings.jitter_max);
                    tracing::debug!(jitter_ms = jitter.as_millis() as u64, "scheduled tick");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(jitter) => {}
                    }
                }
                _ = self.trigger.notified() => {
                    tracing::info!("manual crawl tick requested");
                }
            }

            if !self.tick_and_emit(&tx, &shutdown).await {
                break;
            }
        }

        tracing::info!(target_url = %self.target.url, "crawler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        parser::PlausibleRange,
        proxy::{PoolSettings, Proxy, ProxyProtocol},
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use time::macros::datetime;

    const PAGE: &str = "<table><tr><td>剩余电量</td><td>56.78 度</td></tr></table>";

    /// Fails the first `failures` calls, then serves `PAGE`.
    struct FlakyFetcher {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyFetcher {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for FlakyFetcher {
        async fn fetch(&self, url: &str, _proxy: Option<&Proxy>) -> Result<String, CrawlError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(CrawlError::Connect {
                    target: url.to_string(),
                    message: "connection refused".to_string(),
                })
            } else {
                Ok(PAGE.to_string())
            }
        }
    }

    struct StaticBody(&'static str);

    #[async_trait]
    impl Fetcher for StaticBody {
        async fn fetch(&self, _url: &str, _proxy: Option<&Proxy>) -> Result<String, CrawlError> {
            Ok(self.0.to_string())
        }
    }

    struct Hang;

    #[async_trait]
    impl Fetcher for Hang {
        async fn fetch(&self, _url: &str, _proxy: Option<&Proxy>) -> Result<String, CrawlError> {
            futures::future::pending().await
        }
    }

    struct FixedClock(OffsetDateTime);

    impl Clock for FixedClock {
        fn now(&self) -> OffsetDateTime {
            self.0
        }
    }

    struct FixedJitter(Duration);

    impl JitterSource for FixedJitter {
        fn delay(&self, _max: Duration) -> Duration {
            self.0
        }
    }

    struct NoJitter;

    impl JitterSource for NoJitter {
        fn delay(&self, _max: Duration) -> Duration {
            Duration::ZERO
        }
    }

    fn settings(max_retries: u32) -> RetrySettings {
        RetrySettings {
            max_retries,
            retry_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(600),
            jitter_max: Duration::from_secs(300),
            warmup_max: Duration::from_secs(30),
        }
    }

    fn crawler(fetcher: Arc<dyn Fetcher>, pool: Option<ProxyPool>, max_retries: u32) -> Crawler {
        let target = CrawlTarget {
            url: "http://meter.example/balance".to_string(),
            meter_id: "m-1".to_string(),
            meter_name: "Dorm 3-201".to_string(),
        };
        Crawler::new(
            target,
            settings(max_retries),
            fetcher,
            pool,
            Parser::new(PlausibleRange::new(0.0, 1000.0)),
            50,
        )
        .with_clock(Arc::new(FixedClock(datetime!(2024-06-01 12:00:00 UTC))))
        .with_jitter(Arc::new(NoJitter))
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_fetcher_exhausts_exactly_max_attempts() {
        let fetcher = FlakyFetcher::new(u32::MAX);
        let c = crawler(fetcher.clone(), None, 3);

        let outcome = c.run_tick().await;

        assert!(matches!(outcome, TickOutcome::Failed { attempts: 3, .. }));
        assert_eq!(fetcher.calls(), 3);

        let log = c.recent_attempts();
        assert_eq!(log.len(), 4);
        let indices: Vec<u32> = log[..3].iter().map(|a| a.attempt_index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(log[..3]
            .iter()
            .all(|a| matches!(a.outcome, AttemptOutcome::Error { kind: CrawlErrorKind::Connect, .. })));
        assert_eq!(log[3].outcome, AttemptOutcome::Failed { attempts: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_retries_with_fixed_backoff() {
        let fetcher = FlakyFetcher::new(2);
        let c = crawler(fetcher.clone(), None, 3);
        let started = Instant::now();

        let outcome = c.run_tick().await;

        let TickOutcome::Success { reading, attempt, tier, via } = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(attempt, 3);
        assert_eq!(tier, Tier::ExactPattern);
        assert!(via.is_none());
        assert_eq!(reading.remaining_kwh, 56.78);
        assert_eq!(reading.meter_id, "m-1");
        assert_eq!(reading.collected_at, datetime!(2024-06-01 12:00:00 UTC));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(10) && waited < Duration::from_secs(11), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_page_counts_as_failed_attempt() {
        let c = crawler(Arc::new(StaticBody("<p>maintenance</p>")), None, 2);

        let outcome = c.run_tick().await;

        assert!(matches!(outcome, TickOutcome::Failed { attempts: 2, .. }));
        let log = c.recent_attempts();
        assert!(matches!(
            log[0].outcome,
            AttemptOutcome::Error { kind: CrawlErrorKind::NoMatch, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn next_tick_gets_fresh_attempt_budget() {
        let fetcher = FlakyFetcher::new(3);
        let c = crawler(fetcher.clone(), None, 3);

        assert!(matches!(c.run_tick().await, TickOutcome::Failed { .. }));
        assert!(matches!(c.run_tick().await, TickOutcome::Success { attempt: 1, .. }));
        assert_eq!(fetcher.calls(), 4);
    }

    #[test]
    fn attempt_log_evicts_oldest_first() {
        let mut log = AttemptLog::new(2);
        for i in 1..=3 {
            log.push(CrawlAttempt {
                timestamp: datetime!(2024-06-01 12:00:00 UTC),
                attempt_index: i,
                target: "t".to_string(),
                proxy: None,
                outcome: AttemptOutcome::Failed { attempts: i },
            });
        }
        let kept: Vec<u32> = log.to_vec().iter().map(|a| a.attempt_index).collect();
        assert_eq!(kept, vec![2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_goes_through_proxy_pool_when_configured() {
        let fetcher: Arc<dyn Fetcher> = Arc::new(StaticBody(PAGE));
        let pool = ProxyPool::new(
            fetcher.clone(),
            PoolSettings {
                max_retries_per_proxy: 3,
                hard_cap: 10,
                health_check_url: None,
            },
        );
        pool.initialize(vec![Proxy::new("10.0.0.9", 3128, ProxyProtocol::Http)], &[])
            .await;
        let c = crawler(fetcher, Some(pool), 3);

        let outcome = c.run_tick().await;

        assert!(matches!(
            outcome,
            TickOutcome::Success { via: Some(ref v), .. } if v == "http://10.0.0.9:3128"
        ));
        assert_eq!(c.recent_attempts()[0].proxy.as_deref(), Some("http://10.0.0.9:3128"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempt_through_proxy_keeps_proxy_in_feed() {
        let fetcher: Arc<dyn Fetcher> = Arc::new(StaticBody("<p>maintenance</p>"));
        let pool = ProxyPool::new(
            fetcher.clone(),
            PoolSettings {
                max_retries_per_proxy: 3,
                hard_cap: 10,
                health_check_url: None,
            },
        );
        pool.initialize(vec![Proxy::new("10.0.0.9", 3128, ProxyProtocol::Http)], &[])
            .await;
        let c = crawler(fetcher, Some(pool), 1);

        assert!(matches!(c.run_tick().await, TickOutcome::Failed { attempts: 1, .. }));

        let log = c.recent_attempts();
        assert!(matches!(
            log[0].outcome,
            AttemptOutcome::Error { kind: CrawlErrorKind::NoMatch, .. }
        ));
        assert_eq!(log[0].proxy.as_deref(), Some("http://10.0.0.9:3128"));
    }

    #[tokio::test(start_paused = true)]
    async fn warmup_and_interval_jitter_delay_ticks() {
        let c = Arc::new(
            crawler(FlakyFetcher::new(0), None, 3).with_jitter(Arc::new(FixedJitter(Duration::from_secs(7)))),
        );
        let (tx, mut rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let started = Instant::now();
        let handle = tokio::spawn(c.clone().run(tx, shutdown.clone()));

        rx.recv().await.unwrap();
        let first = started.elapsed();
        assert!(first >= Duration::from_secs(7) && first < Duration::from_secs(8), "first at {first:?}");

        rx.recv().await.unwrap();
        let second = started.elapsed();
        assert!(
            second >= Duration::from_secs(614) && second < Duration::from_secs(615),
            "second at {second:?}"
        );

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_runs_immediately_then_every_interval() {
        let c = Arc::new(crawler(FlakyFetcher::new(0), None, 3));
        let (tx, mut rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let started = Instant::now();
        let handle = tokio::spawn(c.clone().run(tx, shutdown.clone()));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.attempt, 1);
        assert!(started.elapsed() < Duration::from_secs(1));

        rx.recv().await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(600) && waited < Duration::from_secs(601), "waited {waited:?}");

        shutdown.cancel();
        handle.await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_trigger_runs_tick_before_interval() {
        let c = Arc::new(crawler(FlakyFetcher::new(0), None, 3));
        let (tx, mut rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let started = Instant::now();
        let handle = tokio::spawn(c.clone().run(tx, shutdown.clone()));

        rx.recv().await.unwrap();
        c.trigger_now();
        rx.recv().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(600));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_in_flight_fetch_without_emitting() {
        let c = Arc::new(crawler(Arc::new(Hang), None, 3));
        let (tx, mut rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(c.clone().run(tx, shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(60)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(rx.recv().await.is_none());
        assert!(c.recent_attempts().is_empty());
    }

    #[test]
    fn attempt_serializes_with_status_tag() {
        let a = CrawlAttempt {
            timestamp: datetime!(2024-06-01 12:00:00 UTC),
            attempt_index: 2,
            target: "http://meter.example/balance".to_string(),
            proxy: None,
            outcome: AttemptOutcome::Error {
                kind: CrawlErrorKind::Timeout,
                message: "timed out".to_string(),
            },
        };
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["timestamp"], "2024-06-01T12:00:00Z");
        assert_eq!(json["outcome"]["status"], "error");
        assert_eq!(json["outcome"]["kind"], "timeout");
    }
}
