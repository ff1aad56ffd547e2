use anyhow::Result;
use crawler_service::{
    admin_server,
    config::{AppConfig, ProxyConfig, StoreConfig, StoreKind},
    crawler::{CrawlTarget, Crawler, RetrySettings},
    fetcher::{Fetcher, HttpFetcher},
    observability,
    parser::{Parser, PlausibleRange},
    pipeline::Pipeline,
    proxy::{CsvFileProxySource, HttpListProxySource, PoolSettings, ProxyPool, ProxySource, StaticProxySource},
    sinks::StoreSink,
    sources::CrawlerSource,
    transform::ReadingValidation,
};
use meter_client::{db::QuestDbReadingStore, MemoryReadingStore, Reading, ReadingStore};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// Upper bound on cached per-proxy HTTP clients.
const AGENT_CACHE_CAPACITY: usize = 256;

async fn build_store(cfg: &StoreConfig) -> Result<Arc<dyn ReadingStore>> {
    match cfg.kind {
        StoreKind::Questdb => {
            let pool = PgPoolOptions::new()
                .max_connections(cfg.max_connections)
                .connect(&cfg.uri)
                .await?;
            Ok(Arc::new(QuestDbReadingStore::new(pool)))
        }
        StoreKind::Memory => {
            tracing::warn!("using in-memory reading store; readings are lost on exit");
            Ok(Arc::new(MemoryReadingStore::new()))
        }
    }
}

async fn build_proxy_pool(
    cfg: &ProxyConfig,
    fetcher: Arc<dyn Fetcher>,
    shutdown: &CancellationToken,
) -> Option<ProxyPool> {
    if !cfg.enabled {
        return None;
    }

    let pool = ProxyPool::new(
        fetcher.clone(),
        PoolSettings {
            max_retries_per_proxy: cfg.max_retries_per_proxy,
            hard_cap: cfg.hard_cap,
            health_check_url: cfg.health_check_url.clone(),
        },
    );

    let static_proxies = StaticProxySource::from_strings("config", &cfg.static_proxies).into_proxies();
    let mut dynamic: Vec<Arc<dyn ProxySource>> = Vec::new();
    for path in &cfg.csv_files {
        dynamic.push(Arc::new(CsvFileProxySource::new(path.clone())));
    }
    for url in &cfg.list_urls {
        dynamic.push(Arc::new(HttpListProxySource::new(url.clone(), fetcher.clone())));
    }

    if pool.initialize(static_proxies, &dynamic).await == 0 {
        tracing::warn!("proxy rotation enabled but no proxies loaded, every attempt will fail");
    }

    pool.spawn_revalidation(Duration::from_secs(cfg.health_check_interval_secs), shutdown.clone());
    Some(pool)
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;
    let shutdown = CancellationToken::new();

    let store = build_store(&cfg.store).await?;

    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::from_config(&cfg.target, AGENT_CACHE_CAPACITY)?);
    let pool = build_proxy_pool(&cfg.proxy, fetcher.clone(), &shutdown).await;

    let range = PlausibleRange::from(&cfg.parser);
    let crawler = Arc::new(Crawler::new(
        CrawlTarget::from(&cfg.target),
        RetrySettings::from(&cfg.crawl),
        fetcher,
        pool,
        Parser::new(range),
        cfg.crawl.attempt_log_capacity,
    ));

    // Start admin server if configured
    if let Some(admin_cfg) = &cfg.admin {
        admin_server::init(&admin_cfg.bind_addr, crawler.clone())?;
    }

    let (source, scheduler) = CrawlerSource::spawn(crawler, cfg.crawl.channel_capacity, shutdown.clone());
    let pipeline: Pipeline<_, Reading, _> = Pipeline {
        source,
        transforms: vec![Arc::new(ReadingValidation::new(range))],
        sink: StoreSink::new(store),
    };

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        tracing::info!("shutdown requested");
        signal_token.cancel();
    });

    // The source stream ends once the scheduler stops, so this drains every
    // reading produced before shutdown.
    pipeline.run().await?;
    scheduler.await?;

    Ok(())
}
