use meter_client::StoreError;
use serde::Serialize;

/// Failures that can end a single acquisition attempt.
#[derive(thiserror::Error, Debug)]
pub enum CrawlError {
    #[error("connect to {target} failed: {message}")]
    Connect { target: String, message: String },
    #[error("request to {target} timed out after {after_ms} ms")]
    Timeout { target: String, after_ms: u64 },
    #[error("failed to decode response from {target}: {message}")]
    Decode { target: String, message: String },
    #[error("response from {target} blocked by anti-automation page (marker: {marker})")]
    Blocked { target: String, marker: String },
    #[error("no plausible reading found in response")]
    NoMatch,
    #[error("proxy pool exhausted after {attempts} request(s){}", cause_suffix(.last_error))]
    PoolExhausted { attempts: usize, last_error: Option<String> },
    #[error("failed to persist reading: {0}")]
    Persistence(#[from] StoreError),
}

fn cause_suffix(last_error: &Option<String>) -> String {
    last_error.as_deref().map(|e| format!(": {e}")).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlErrorKind {
    Connect,
    Timeout,
    Decode,
    Blocked,
    NoMatch,
    PoolExhausted,
    Persistence,
}

impl CrawlErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Decode => "decode",
            Self::Blocked => "blocked",
            Self::NoMatch => "no_match",
            Self::PoolExhausted => "pool_exhausted",
            Self::Persistence => "persistence",
        }
    }
}

impl CrawlError {
    pub fn kind(&self) -> CrawlErrorKind {
        match self {
            Self::Connect { .. } => CrawlErrorKind::Connect,
            Self::Timeout { .. } => CrawlErrorKind::Timeout,
            Self::Decode { .. } => CrawlErrorKind::Decode,
            Self::Blocked { .. } => CrawlErrorKind::Blocked,
            Self::NoMatch => CrawlErrorKind::NoMatch,
            Self::PoolExhausted { .. } => CrawlErrorKind::PoolExhausted,
            Self::Persistence(_) => CrawlErrorKind::Persistence,
        }
    }
}
