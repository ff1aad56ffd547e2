use std::sync::Arc;

use futures::StreamExt;
use meter_client::{Reading, ReadingStore};

use crate::{
    error::CrawlError,
    pipeline::{Envelope, PipelineError, Sink},
};

/// Appends each reading to the store as a single-row write.
///
/// A failed write is logged and the reading dropped; it is not retried, and the
/// sink keeps consuming so later ticks are unaffected.
pub struct StoreSink {
    store: Arc<dyn ReadingStore>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self { store }
    }

    async fn append(&self, env: Envelope<Reading>) {
        let reading = env.payload;
        let meter_id = reading.meter_id.clone();
        let remaining_kwh = reading.remaining_kwh;

        match self.store.append_reading(reading).await {
            Ok(()) => {
                metrics::counter!("store_appended_total").increment(1);
                tracing::info!(meter_id = %meter_id, remaining_kwh, attempt = env.attempt, "reading stored");
            }
            Err(e) => {
                let err = CrawlError::Persistence(e);
                metrics::counter!("store_append_failed_total").increment(1);
                tracing::error!(
                    meter_id = %meter_id,
                    remaining_kwh,
                    attempt = env.attempt,
                    proxy = env.via.as_deref().unwrap_or("direct"),
                    error = %err,
                    "reading lost"
                );
            }
        }
    }
}

#[async_trait::async_trait]
impl Sink<Reading> for StoreSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<Reading>, PipelineError>> + Send + Unpin + 'static,
    {
        while let Some(item) = input.next().await {
            match item {
                Ok(env) => self.append(env).await,
                Err(e) => {
                    tracing::error!(error = %e, "error in upstream pipeline for StoreSink");
                }
            }
        }

        Ok(())
    }
}
