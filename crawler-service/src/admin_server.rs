use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::crawler::{CrawlAttempt, Crawler};

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder and serve the admin routes in the background:
///
/// - `GET /metrics`
/// - `POST /crawl/run` queues one tick now
/// - `GET /crawl/attempts` recent attempts, oldest first
pub fn init(bind_addr: &str, crawler: Arc<Crawler>) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid admin bind address '{bind_addr}': {e}"))?;

    install_recorder()?;

    let app = router(crawler);
    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                tracing::info!(%addr, "admin server listening");
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    tracing::error!(error = %e, "admin server error");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, %addr, "failed to bind admin listener");
            }
        }
    });

    Ok(())
}

/// Install the process-wide Prometheus recorder once; later calls return the same handle.
pub fn install_recorder() -> anyhow::Result<&'static PrometheusHandle> {
    PROM_HANDLE.get_or_try_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("failed to install Prometheus metrics recorder: {e}"))
    })
}

pub fn router(crawler: Arc<Crawler>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/crawl/run", post(run_tick_handler))
        .route("/crawl/attempts", get(attempts_handler))
        .with_state(crawler)
}

async fn metrics_handler() -> Result<String, StatusCode> {
    PROM_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

async fn run_tick_handler(State(crawler): State<Arc<Crawler>>) -> StatusCode {
    metrics::counter!("crawl_manual_triggers_total").increment(1);
    crawler.trigger_now();
    StatusCode::ACCEPTED
}

async fn attempts_handler(State(crawler): State<Arc<Crawler>>) -> Json<Vec<CrawlAttempt>> {
    Json(crawler.recent_attempts())
}
