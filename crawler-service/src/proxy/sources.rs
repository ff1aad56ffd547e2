use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use csv::StringRecord;

use super::{Proxy, ProxyProtocol};
use crate::{error::CrawlError, fetcher::Fetcher};

/// Somewhere proxies can be loaded from at pool initialization.
#[async_trait]
pub trait ProxySource: Send + Sync {
    fn name(&self) -> String;

    async fn load(&self) -> Result<Vec<Proxy>, CrawlError>;
}

/// Proxies listed directly in configuration.
pub struct StaticProxySource {
    name: String,
    proxies: Vec<Proxy>,
}

impl StaticProxySource {
    pub fn new(name: impl Into<String>, proxies: Vec<Proxy>) -> Self {
        Self {
            name: name.into(),
            proxies,
        }
    }

    /// Parse configuration strings, logging and dropping malformed entries.
    pub fn from_strings(name: impl Into<String>, raw: &[String]) -> Self {
        let proxies = raw
            .iter()
            .filter_map(|s| match s.parse::<Proxy>() {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!(entry = %s, error = %e, "ignoring malformed proxy entry");
                    None
                }
            })
            .collect();
        Self::new(name, proxies)
    }

    pub fn into_proxies(self) -> Vec<Proxy> {
        self.proxies
    }
}

#[async_trait]
impl ProxySource for StaticProxySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn load(&self) -> Result<Vec<Proxy>, CrawlError> {
        Ok(self.proxies.clone())
    }
}

/// CSV proxy list.
///
/// Expected header columns (by name):
/// - host
/// - port
/// - protocol (optional, defaults to http)
pub struct CsvFileProxySource {
    path: PathBuf,
}

impl CsvFileProxySource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn record_to_proxy(record: &StringRecord, headers: &StringRecord) -> Result<Proxy, String> {
    let get = |name: &str| -> Option<&str> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .and_then(|idx| record.get(idx))
            .map(str::trim)
    };

    let host = get("host")
        .filter(|h| !h.is_empty())
        .ok_or_else(|| "missing column 'host'".to_string())?;
    let port_str = get("port").ok_or_else(|| "missing column 'port'".to_string())?;
    let port: u16 = port_str
        .parse()
        .map_err(|e| format!("invalid port '{port_str}': {e}"))?;
    let protocol: ProxyProtocol = get("protocol").unwrap_or("").parse()?;

    Ok(Proxy::new(host, port, protocol))
}

fn read_csv(path: &PathBuf) -> Result<Vec<Proxy>, String> {
    let mut rdr = csv::Reader::from_path(path).map_err(|e| format!("failed to open CSV file: {e}"))?;
    let headers = rdr
        .headers()
        .map_err(|e| format!("failed to read CSV headers: {e}"))?
        .clone();

    let mut proxies = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let record = result.map_err(|e| format!("failed to read CSV record: {e}"))?;
        match record_to_proxy(&record, &headers) {
            Ok(p) => proxies.push(p),
            Err(e) => tracing::warn!(path = %path.display(), line = line + 2, error = %e, "skipping proxy row"),
        }
    }
    Ok(proxies)
}

#[async_trait]
impl ProxySource for CsvFileProxySource {
    fn name(&self) -> String {
        format!("csv:{}", self.path.display())
    }

    async fn load(&self) -> Result<Vec<Proxy>, CrawlError> {
        let path = self.path.clone();
        let target = self.name();
        tokio::task::spawn_blocking(move || read_csv(&path))
            .await
            .map_err(|e| CrawlError::Decode {
                target: target.clone(),
                message: format!("csv reader task failed: {e}"),
            })?
            .map_err(|message| CrawlError::Decode { target, message })
    }
}

/// Plain-text proxy list served over HTTP, one proxy per line.
/// Blank lines and `#` comments are ignored.
pub struct HttpListProxySource {
    url: String,
    fetcher: Arc<dyn Fetcher>,
}

impl HttpListProxySource {
    pub fn new(url: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            url: url.into(),
            fetcher,
        }
    }
}

pub fn parse_proxy_list(body: &str) -> Vec<Proxy> {
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.parse().ok())
        .collect()
}

#[async_trait]
impl ProxySource for HttpListProxySource {
    fn name(&self) -> String {
        format!("http:{}", self.url)
    }

    async fn load(&self) -> Result<Vec<Proxy>, CrawlError> {
        let body = self.fetcher.fetch(&self.url, None).await?;
        Ok(parse_proxy_list(&body))
    }
}
