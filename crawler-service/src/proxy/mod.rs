pub mod sources;

use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{error::CrawlError, fetcher::Fetcher};

pub use sources::{CsvFileProxySource, HttpListProxySource, ProxySource, StaticProxySource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks5 => "socks5",
        }
    }
}

impl FromStr for ProxyProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            "socks5" | "socks5h" | "socks" => Ok(Self::Socks5),
            other => Err(format!("unsupported proxy protocol '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
}

impl Proxy {
    pub fn new(host: impl Into<String>, port: u16, protocol: ProxyProtocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
        }
    }

    /// Identity used for de-duplication: `host:port`, regardless of scheme.
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// One connection agent exists per distinct proxy and scheme.
    pub fn agent_key(&self) -> String {
        self.url()
    }

    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol.scheme(), self.host, self.port)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Accepts `scheme://host:port` or bare `host:port` (http).
impl FromStr for Proxy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (protocol, rest) = match s.split_once("://") {
            Some((scheme, rest)) => (scheme.parse()?, rest),
            None => (ProxyProtocol::Http, s),
        };
        let rest = rest.trim_end_matches('/');
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| format!("proxy '{s}' is missing a port"))?;
        if host.is_empty() {
            return Err(format!("proxy '{s}' is missing a host"));
        }
        let port: u16 = port
            .parse()
            .map_err(|e| format!("invalid port in proxy '{s}': {e}"))?;

        Ok(Self::new(host, port, protocol))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProxyHealth {
    pub proxy: Proxy,
    pub failure_count: u32,
    pub checked: bool,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_retries_per_proxy: u32,
    pub hard_cap: usize,
    pub health_check_url: Option<String>,
}

#[derive(Debug, Default)]
struct PoolState {
    entries: Vec<ProxyHealth>,
    cursor: usize,
}

struct PoolInner {
    state: Mutex<PoolState>,
    fetcher: Arc<dyn Fetcher>,
    settings: PoolSettings,
    sweeping: AtomicBool,
}

/// Egress proxies with per-proxy health and round-robin selection.
///
/// Cheap to clone; clones share state. Health is in-memory only.
#[derive(Clone)]
pub struct ProxyPool {
    inner: Arc<PoolInner>,
}

impl ProxyPool {
    pub fn new(fetcher: Arc<dyn Fetcher>, settings: PoolSettings) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState::default()),
                fetcher,
                settings,
                sweeping: AtomicBool::new(false),
            }),
        }
    }

    /// Merge static and dynamic sources, de-duplicating by `host:port`
    /// (first occurrence wins), then start a background health sweep.
    ///
    /// A dynamic source that fails to load is logged and skipped.
    pub async fn initialize(&self, static_proxies: Vec<Proxy>, dynamic: &[Arc<dyn ProxySource>]) -> usize {
        let mut merged = static_proxies;
        for source in dynamic {
            match source.load().await {
                Ok(list) => {
                    tracing::info!(source = %source.name(), count = list.len(), "loaded proxies");
                    merged.extend(list);
                }
                Err(e) => {
                    tracing::warn!(source = %source.name(), error = %e, "proxy source failed, skipping");
                }
            }
        }

        let mut seen = std::collections::HashSet::new();
        merged.retain(|p| seen.insert(p.key()));

        let count = merged.len();
        {
            let mut state = self.inner.state.lock().await;
            state.entries = merged
                .iter()
                .cloned()
                .map(|proxy| ProxyHealth {
                    proxy,
                    failure_count: 0,
                    checked: false,
                })
                .collect();
            state.cursor = 0;
        }
        self.inner.fetcher.retain_agents(&merged);

        tracing::info!(proxies = count, "proxy pool initialized");
        self.spawn_health_sweep();
        count
    }

    async fn len(&self) -> usize {
        self.inner.state.lock().await.entries.len()
    }

    pub async fn snapshot(&self) -> Vec<ProxyHealth> {
        self.inner.state.lock().await.entries.clone()
    }

    /// Next proxy in round-robin order whose failure count is below the limit.
    ///
    /// When every proxy is exhausted, all counters are cleared, a health sweep
    /// is re-triggered and a candidate is still returned. Only an empty pool errors.
    pub async fn select_next(&self) -> Result<Proxy, CrawlError> {
        let max = self.inner.settings.max_retries_per_proxy;
        let mut state = self.inner.state.lock().await;
        let n = state.entries.len();
        if n == 0 {
            return Err(CrawlError::PoolExhausted {
                attempts: 0,
                last_error: Some("no proxies configured".to_string()),
            });
        }

        for offset in 0..n {
            let idx = (state.cursor + offset) % n;
            if state.entries[idx].failure_count < max {
                state.cursor = (idx + 1) % n;
                return Ok(state.entries[idx].proxy.clone());
            }
        }

        for entry in state.entries.iter_mut() {
            entry.failure_count = 0;
        }
        let idx = state.cursor % n;
        state.cursor = (idx + 1) % n;
        let proxy = state.entries[idx].proxy.clone();
        drop(state);

        tracing::warn!(proxies = n, "all proxies exhausted, resetting failure counters");
        metrics::counter!("proxy_pool_resets_total").increment(1);
        self.spawn_health_sweep();

        Ok(proxy)
    }

    pub async fn record_outcome(&self, proxy: &Proxy, success: bool) {
        let max = self.inner.settings.max_retries_per_proxy;
        let mut state = self.inner.state.lock().await;
        if let Some(entry) = state.entries.iter_mut().find(|e| e.proxy.key() == proxy.key()) {
            if success {
                entry.failure_count = 0;
            } else {
                entry.failure_count = (entry.failure_count + 1).min(max);
            }
        }
    }

    /// Fetch `url` through the pool, rotating proxies on failure.
    ///
    /// Runs at most `min(2 * proxies, hard_cap)` select/fetch/record cycles.
    pub async fn request_with_proxy(&self, url: &str) -> Result<(String, Proxy), CrawlError> {
        let budget = (2 * self.len().await).min(self.inner.settings.hard_cap);
        let mut last_error = None;

        for cycle in 1..=budget {
            let proxy = self.select_next().await?;
            match self.inner.fetcher.fetch(url, Some(&proxy)).await {
                Ok(text) => {
                    self.record_outcome(&proxy, true).await;
                    metrics::counter!("proxy_requests_total", "outcome" => "success").increment(1);
                    return Ok((text, proxy));
                }
                Err(e) => {
                    tracing::warn!(cycle, budget, proxy = %proxy, error = %e, "proxied request failed");
                    metrics::counter!("proxy_requests_total", "outcome" => "failure").increment(1);
                    self.record_outcome(&proxy, false).await;
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(CrawlError::PoolExhausted {
            attempts: budget,
            last_error,
        })
    }

    /// Start a health sweep in the background unless one is already running.
    /// Never blocks the caller.
    pub fn spawn_health_sweep(&self) {
        let Some(url) = self.inner.settings.health_check_url.clone() else {
            return;
        };
        if self.inner.sweeping.swap(true, Ordering::AcqRel) {
            return;
        }

        let pool = self.clone();
        tokio::spawn(async move {
            pool.run_health_sweep(&url).await;
            pool.inner.sweeping.store(false, Ordering::Release);
        });
    }

    async fn run_health_sweep(&self, url: &str) {
        let proxies: Vec<Proxy> = self.snapshot().await.into_iter().map(|h| h.proxy).collect();
        let checks = proxies.iter().map(|proxy| async move {
            let ok = self.inner.fetcher.fetch(url, Some(proxy)).await.is_ok();
            (proxy, ok)
        });
        let results = futures::future::join_all(checks).await;

        let healthy = results.iter().filter(|(_, ok)| *ok).count();
        let max = self.inner.settings.max_retries_per_proxy;
        {
            let mut state = self.inner.state.lock().await;
            for (proxy, ok) in &results {
                if let Some(entry) = state.entries.iter_mut().find(|e| e.proxy.key() == proxy.key()) {
                    entry.checked = true;
                    entry.failure_count = if *ok { 0 } else { (entry.failure_count + 1).min(max) };
                }
            }
        }

        tracing::info!(checked = results.len(), healthy, "proxy health sweep finished");
    }

    /// Re-run the health sweep on a fixed interval until cancelled.
    pub fn spawn_revalidation(&self, every: Duration, shutdown: CancellationToken) {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; initialize() already swept.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => pool.spawn_health_sweep(),
                }
            }
        });
    }
}
