use serde::Deserialize;
use std::{collections::BTreeMap, fs, path::PathBuf};

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_blocked_markers() -> Vec<String> {
    [
        "<title>Just a moment...</title>",
        "Attention Required! | Cloudflare",
        "<title>Access Denied</title>",
        "Request blocked by security policy",
        "您的访问已被安全拦截",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub url: String,
    pub meter_id: String,
    pub meter_name: String,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_blocked_markers")]
    pub blocked_markers: Vec<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    5_000
}
fn default_poll_interval_secs() -> u64 {
    600
}
fn default_jitter_max_secs() -> u64 {
    300
}
fn default_warmup_max_secs() -> u64 {
    30
}
fn default_attempt_log_capacity() -> usize {
    100
}
fn default_channel_capacity() -> usize {
    16
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_jitter_max_secs")]
    pub jitter_max_secs: u64,
    #[serde(default = "default_warmup_max_secs")]
    pub warmup_max_secs: u64,
    #[serde(default = "default_attempt_log_capacity")]
    pub attempt_log_capacity: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            jitter_max_secs: default_jitter_max_secs(),
            warmup_max_secs: default_warmup_max_secs(),
            attempt_log_capacity: default_attempt_log_capacity(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Bounds for accepting a parsed value. Both ends are exclusive.
#[derive(Debug, Clone, Deserialize)]
pub struct ParserConfig {
    #[serde(default)]
    pub plausible_min: f64,
    pub plausible_max: f64,
}

fn default_max_retries_per_proxy() -> u32 {
    3
}
fn default_hard_cap() -> usize {
    10
}
fn default_health_check_interval_secs() -> u64 {
    900
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub static_proxies: Vec<String>,
    #[serde(default)]
    pub csv_files: Vec<PathBuf>,
    #[serde(default)]
    pub list_urls: Vec<String>,
    #[serde(default = "default_max_retries_per_proxy")]
    pub max_retries_per_proxy: u32,
    #[serde(default = "default_hard_cap")]
    pub hard_cap: usize,
    pub health_check_url: Option<String>,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            static_proxies: Vec::new(),
            csv_files: Vec::new(),
            list_urls: Vec::new(),
            max_retries_per_proxy: default_max_retries_per_proxy(),
            hard_cap: default_hard_cap(),
            health_check_url: None,
            health_check_interval_secs: default_health_check_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Questdb,
    Memory,
}

fn default_max_connections() -> u32 {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub kind: StoreKind,
    #[serde(default)]
    pub uri: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub target: TargetConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    pub parser: ParserConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    pub store: StoreConfig,
    pub admin: Option<AdminConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("CRAWLER_CONFIG").unwrap_or_else(|_| "crawler-config.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.target.url.trim().is_empty() {
            anyhow::bail!("target.url must not be empty");
        }
        if self.target.meter_id.trim().is_empty() {
            anyhow::bail!("target.meter_id must not be empty");
        }
        if self.target.meter_name.trim().is_empty() {
            anyhow::bail!("target.meter_name must not be empty");
        }
        if self.crawl.max_retries == 0 {
            anyhow::bail!("crawl.max_retries must be at least 1");
        }
        if self.crawl.poll_interval_secs == 0 {
            anyhow::bail!("crawl.poll_interval_secs must be positive");
        }

        let (min, max) = (self.parser.plausible_min, self.parser.plausible_max);
        if !min.is_finite() || !max.is_finite() || min < 0.0 || min >= max {
            anyhow::bail!("parser plausible range ({min}, {max}) is invalid");
        }

        if self.store.kind == StoreKind::Questdb && self.store.uri.trim().is_empty() {
            anyhow::bail!("store.uri is required for the questdb store");
        }
        if self.proxy.max_retries_per_proxy == 0 {
            anyhow::bail!("proxy.max_retries_per_proxy must be at least 1");
        }
        if self.proxy.hard_cap == 0 {
            anyhow::bail!("proxy.hard_cap must be at least 1");
        }

        Ok(())
    }
}
