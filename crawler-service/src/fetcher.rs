use std::{
    collections::{HashMap, VecDeque},
    io::Read,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING},
    Client, StatusCode,
};

use crate::{config::TargetConfig, error::CrawlError, proxy::Proxy};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Retrieves raw page text, optionally through an egress proxy.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, proxy: Option<&Proxy>) -> Result<String, CrawlError>;

    /// Drop cached connection agents for proxies that are no longer in use.
    fn retain_agents(&self, _live: &[Proxy]) {}
}

/// Browser-like default headers. `Accept-Encoding` is advertised explicitly and
/// the body is decoded by hand, so reqwest's own decompression stays off.
pub fn browser_headers(user_agent: Option<&str>, extra: &[(String, String)]) -> Result<HeaderMap, CrawlError> {
    let mut headers = HeaderMap::new();
    let defaults = [
        ("user-agent", user_agent.unwrap_or(DEFAULT_USER_AGENT)),
        (
            "accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
        ("accept-language", "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7"),
        ("accept-encoding", "gzip, deflate, br"),
        ("cache-control", "no-cache"),
        ("pragma", "no-cache"),
        ("upgrade-insecure-requests", "1"),
        ("sec-fetch-dest", "document"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-site", "none"),
        ("connection", "keep-alive"),
    ];

    for (name, value) in defaults
        .iter()
        .map(|(n, v)| (*n, *v))
        .chain(extra.iter().map(|(n, v)| (n.as_str(), v.as_str())))
    {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| CrawlError::Connect {
            target: "headers".to_string(),
            message: format!("invalid header name '{name}': {e}"),
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| CrawlError::Connect {
            target: "headers".to_string(),
            message: format!("invalid value for header '{name}': {e}"),
        })?;
        headers.insert(name, value);
    }

    Ok(headers)
}

/// Decode a body according to its `Content-Encoding` header.
///
/// Encodings are listed in the order they were applied, so they are undone in reverse.
pub fn decode_body(encoding: Option<&str>, body: Vec<u8>) -> Result<Vec<u8>, String> {
    let Some(encoding) = encoding else {
        return Ok(body);
    };

    let mut data = body;
    for coding in encoding.rsplit(',').map(|c| c.trim().to_ascii_lowercase()) {
        data = match coding.as_str() {
            "" | "identity" => data,
            "gzip" | "x-gzip" => {
                let mut out = Vec::new();
                flate2::read::GzDecoder::new(&data[..])
                    .read_to_end(&mut out)
                    .map_err(|e| format!("gzip: {e}"))?;
                out
            }
            "deflate" => {
                // Servers disagree on whether deflate means zlib-wrapped or raw.
                let mut out = Vec::new();
                match flate2::read::ZlibDecoder::new(&data[..]).read_to_end(&mut out) {
                    Ok(_) => out,
                    Err(_) => {
                        let mut raw = Vec::new();
                        flate2::read::DeflateDecoder::new(&data[..])
                            .read_to_end(&mut raw)
                            .map_err(|e| format!("deflate: {e}"))?;
                        raw
                    }
                }
            }
            "br" => {
                let mut out = Vec::new();
                brotli::Decompressor::new(&data[..], 4096)
                    .read_to_end(&mut out)
                    .map_err(|e| format!("brotli: {e}"))?;
                out
            }
            other => return Err(format!("unsupported content-encoding '{other}'")),
        };
    }

    Ok(data)
}

/// Returns the first anti-automation marker found in `body`, compared case-insensitively.
pub fn find_blocked_marker<'a>(body: &str, markers: &'a [String]) -> Option<&'a str> {
    let haystack = body.to_lowercase();
    markers
        .iter()
        .find(|m| !m.is_empty() && haystack.contains(&m.to_lowercase()))
        .map(String::as_str)
}

/// Reusable clients keyed by proxy, evicting the oldest entry once full.
#[derive(Debug)]
struct AgentCache {
    capacity: usize,
    order: VecDeque<String>,
    clients: HashMap<String, Client>,
}

impl AgentCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            clients: HashMap::new(),
        }
    }

    fn get(&self, key: &str) -> Option<Client> {
        self.clients.get(key).cloned()
    }

    fn insert(&mut self, key: String, client: Client) {
        if self.clients.contains_key(&key) {
            return;
        }
        while self.clients.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.clients.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.clients.insert(key, client);
    }

    fn retain(&mut self, live: &[String]) {
        self.clients.retain(|k, _| live.contains(k));
        self.order.retain(|k| live.contains(k));
    }

    fn len(&self) -> usize {
        self.clients.len()
    }
}

/// `Fetcher` over reqwest with a hard per-request timeout.
///
/// The timeout is set on the client, so an expired request drops its
/// connection instead of leaving it running in the background.
pub struct HttpFetcher {
    headers: HeaderMap,
    timeout: Duration,
    blocked_markers: Vec<String>,
    direct: Client,
    agents: Mutex<AgentCache>,
}

impl HttpFetcher {
    pub fn new(
        headers: HeaderMap,
        timeout: Duration,
        blocked_markers: Vec<String>,
        agent_capacity: usize,
    ) -> Result<Self, CrawlError> {
        let direct = build_client(&headers, timeout, None)?;
        Ok(Self {
            headers,
            timeout,
            blocked_markers,
            direct,
            agents: Mutex::new(AgentCache::new(agent_capacity)),
        })
    }

    pub fn from_config(target: &TargetConfig, agent_capacity: usize) -> Result<Self, CrawlError> {
        let extra: Vec<(String, String)> = target
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let headers = browser_headers(target.user_agent.as_deref(), &extra)?;
        Self::new(
            headers,
            Duration::from_millis(target.request_timeout_ms),
            target.blocked_markers.clone(),
            agent_capacity,
        )
    }

    pub fn cached_agents(&self) -> usize {
        self.agents.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn client_for(&self, proxy: Option<&Proxy>) -> Result<Client, CrawlError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        let key = proxy.agent_key();
        let mut cache = self.agents.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = cache.get(&key) {
            return Ok(client);
        }

        let client = build_client(&self.headers, self.timeout, Some(proxy))?;
        cache.insert(key, client.clone());
        Ok(client)
    }

    fn classify(&self, err: reqwest::Error, target: &str) -> CrawlError {
        if err.is_timeout() {
            CrawlError::Timeout {
                target: target.to_string(),
                after_ms: self.timeout.as_millis() as u64,
            }
        } else if err.is_decode() || err.is_body() {
            CrawlError::Decode {
                target: target.to_string(),
                message: err.to_string(),
            }
        } else {
            CrawlError::Connect {
                target: target.to_string(),
                message: err.to_string(),
            }
        }
    }
}

fn build_client(headers: &HeaderMap, timeout: Duration, proxy: Option<&Proxy>) -> Result<Client, CrawlError> {
    let target = proxy.map(Proxy::url).unwrap_or_else(|| "direct".to_string());
    let mut builder = Client::builder()
        .default_headers(headers.clone())
        .timeout(timeout)
        .connect_timeout(timeout)
        .pool_max_idle_per_host(2);

    builder = match proxy {
        Some(p) => {
            let rp = reqwest::Proxy::all(p.url()).map_err(|e| CrawlError::Connect {
                target: target.clone(),
                message: format!("invalid proxy: {e}"),
            })?;
            builder.proxy(rp)
        }
        None => builder.no_proxy(),
    };

    builder.build().map_err(|e| CrawlError::Connect {
        target,
        message: format!("failed to build HTTP client: {e}"),
    })
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, proxy: Option<&Proxy>) -> Result<String, CrawlError> {
        let target = match proxy {
            Some(p) => format!("{url} via {}", p.url()),
            None => url.to_string(),
        };
        let client = self.client_for(proxy)?;
        let started = Instant::now();

        let response = client.get(url).send().await.map_err(|e| self.classify(e, &target))?;
        let status = response.status();
        let encoding = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let raw = response.bytes().await.map_err(|e| self.classify(e, &target))?;
        metrics::histogram!("fetch_latency_seconds").record(started.elapsed().as_secs_f64());

        let decoded = decode_body(encoding.as_deref(), raw.to_vec()).map_err(|message| CrawlError::Decode {
            target: target.clone(),
            message,
        })?;
        let text = match String::from_utf8(decoded) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(target_url = %target, "response is not valid UTF-8, decoding lossily");
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };

        if let Some(marker) = find_blocked_marker(&text, &self.blocked_markers) {
            return Err(CrawlError::Blocked {
                target,
                marker: marker.to_string(),
            });
        }

        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CrawlError::Blocked {
                target,
                marker: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            return Err(CrawlError::Connect {
                target,
                message: format!("HTTP {status}"),
            });
        }

        Ok(text)
    }

    fn retain_agents(&self, live: &[Proxy]) {
        let keys: Vec<String> = live.iter().map(Proxy::agent_key).collect();
        self.agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(&keys);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyProtocol;
    use std::io::Write;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    const PAGE: &str = "<html><body><td>剩余电量</td><td>56.78 度</td></body></html>";

    fn fetcher(timeout: Duration) -> HttpFetcher {
        let headers = browser_headers(None, &[]).unwrap();
        let markers = vec!["<title>Just a moment...</title>".to_string()];
        HttpFetcher::new(headers, timeout, markers, 4).unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn raw_deflate(data: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn brotli_compress(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut w = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
            w.write_all(data).unwrap();
        }
        out
    }

    #[test]
    fn decode_body_handles_each_supported_encoding() {
        let body = PAGE.as_bytes();
        assert_eq!(decode_body(None, body.to_vec()).unwrap(), body);
        assert_eq!(decode_body(Some("identity"), body.to_vec()).unwrap(), body);
        assert_eq!(decode_body(Some("gzip"), gzip(body)).unwrap(), body);
        assert_eq!(decode_body(Some("deflate"), zlib(body)).unwrap(), body);
        assert_eq!(decode_body(Some("deflate"), raw_deflate(body)).unwrap(), body);
        assert_eq!(decode_body(Some("br"), brotli_compress(body)).unwrap(), body);
    }

    #[test]
    fn decode_body_unwinds_stacked_encodings_in_reverse() {
        let body = PAGE.as_bytes();
        let stacked = brotli_compress(&gzip(body));
        assert_eq!(decode_body(Some("gzip, br"), stacked).unwrap(), body);
    }

    #[test]
    fn decode_body_rejects_garbage_and_unknown_codings() {
        assert!(decode_body(Some("gzip"), b"not gzip".to_vec()).is_err());
        assert!(decode_body(Some("compress"), b"x".to_vec()).is_err());
    }

    #[test]
    fn blocked_marker_match_is_case_insensitive() {
        let markers = vec!["Attention Required!".to_string()];
        assert_eq!(
            find_blocked_marker("<h1>ATTENTION REQUIRED! | site</h1>", &markers),
            Some("Attention Required!")
        );
        assert_eq!(find_blocked_marker(PAGE, &markers), None);
    }

    #[test]
    fn browser_headers_accept_overrides() {
        let extra = vec![("referer".to_string(), "http://meter.example/".to_string())];
        let headers = browser_headers(Some("test-agent"), &extra).unwrap();
        assert_eq!(headers["user-agent"], "test-agent");
        assert_eq!(headers["referer"], "http://meter.example/");
        assert_eq!(headers["accept-encoding"], "gzip, deflate, br");
    }

    #[tokio::test]
    async fn fetch_decompresses_gzip_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/balance"))
            .and(header("accept-encoding", "gzip, deflate, br"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-encoding", "gzip")
                    .set_body_bytes(gzip(PAGE.as_bytes())),
            )
            .mount(&server)
            .await;

        let text = fetcher(Duration::from_secs(5))
            .fetch(&format!("{}/balance", server.uri()), None)
            .await
            .unwrap();
        assert_eq!(text, PAGE);
    }

    #[tokio::test]
    async fn fetch_decompresses_brotli_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/balance"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-encoding", "br")
                    .set_body_bytes(brotli_compress(PAGE.as_bytes())),
            )
            .mount(&server)
            .await;

        let text = fetcher(Duration::from_secs(5))
            .fetch(&format!("{}/balance", server.uri()), None)
            .await
            .unwrap();
        assert_eq!(text, PAGE);
    }

    #[tokio::test]
    async fn fetch_classifies_challenge_page_as_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><title>Just a moment...</title><body>checking</body></html>"),
            )
            .mount(&server)
            .await;

        let err = fetcher(Duration::from_secs(5))
            .fetch(&server.uri(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Blocked { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn fetch_times_out_on_slow_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let err = fetcher(Duration::from_millis(200))
            .fetch(&server.uri(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Timeout { after_ms: 200, .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn fetch_reports_server_errors_as_connect_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = fetcher(Duration::from_secs(5))
            .fetch(&server.uri(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Connect { .. }), "got {err:?}");
    }

    #[test]
    fn agent_cache_is_bounded_and_reuses_entries() {
        let f = fetcher(Duration::from_secs(1));
        let proxies: Vec<Proxy> = (0..6)
            .map(|i| Proxy::new(format!("10.0.0.{i}"), 8080, ProxyProtocol::Http))
            .collect();

        for p in &proxies {
            f.client_for(Some(p)).unwrap();
        }
        f.client_for(Some(&proxies[5])).unwrap();
        assert_eq!(f.cached_agents(), 4);

        f.retain_agents(&proxies[4..5]);
        assert_eq!(f.cached_agents(), 1);
    }
}
