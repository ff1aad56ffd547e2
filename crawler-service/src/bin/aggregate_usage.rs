use anyhow::{bail, Context, Result};
use crawler_service::{
    config::{AppConfig, StoreKind},
    observability,
};
use meter_client::{db::QuestDbReadingStore, UsageAggregator};
use sqlx::postgres::PgPoolOptions;
use std::{env, sync::Arc};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

fn parse_ts(raw: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).with_context(|| format!("invalid RFC 3339 timestamp '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        bail!("usage: aggregate_usage <meter_id> <start_rfc3339> <end_rfc3339> [--stream]");
    }
    let meter_id = &args[1];
    let start = parse_ts(&args[2])?;
    let end = parse_ts(&args[3])?;
    let streaming = args[4..].iter().any(|a| a == "--stream");

    if start > end {
        bail!("start {} is after end {}", args[2], args[3]);
    }

    // Same config file as the crawler (CRAWLER_CONFIG); only [store] is used.
    let cfg = AppConfig::load()?;
    if cfg.store.kind != StoreKind::Questdb {
        bail!("aggregate_usage reads persisted readings and needs store.kind = \"questdb\"");
    }

    let pool = PgPoolOptions::new()
        .max_connections(cfg.store.max_connections)
        .connect(&cfg.store.uri)
        .await?;
    let aggregator = UsageAggregator::new(Arc::new(QuestDbReadingStore::new(pool)));

    let result = if streaming {
        aggregator.aggregate_streaming(meter_id, start, end).await?
    } else {
        aggregator.aggregate(meter_id, start, end).await?
    };

    tracing::info!(
        meter_id = %meter_id,
        streaming,
        samples = result.sample_count,
        valid = result.valid_sample_count,
        "usage window aggregated"
    );
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(latest) = aggregator.latest(meter_id).await? {
        println!("{}", serde_json::to_string_pretty(&latest)?);
    }

    Ok(())
}
