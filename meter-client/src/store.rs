use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::domain::{Reading, ReadingError};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("invalid reading: {0}")]
    Invalid(#[from] ReadingError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Append-only, time-ordered persistence for meter readings.
///
/// Implementations own reading identity and ordering. Range queries are
/// inclusive on both ends and always ascending by `collected_at`.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn readings_in_range(
        &self,
        meter_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<Reading>, StoreError>;

    async fn latest_reading(&self, meter_id: &str) -> Result<Option<Reading>, StoreError>;

    /// Validates and appends a single reading. Malformed readings are rejected.
    async fn append_reading(&self, reading: Reading) -> Result<(), StoreError>;

    /// Same rows as `readings_in_range`, delivered as an ordered cursor.
    fn stream_in_range<'a>(
        &'a self,
        meter_id: &'a str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> BoxStream<'a, Result<Reading, StoreError>>;
}

/// In-process store, kept sorted by `collected_at`.
#[derive(Debug, Default)]
pub struct MemoryReadingStore {
    readings: RwLock<Vec<Reading>>,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.readings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.readings.read().await.is_empty()
    }

    async fn snapshot(&self, meter_id: &str, start: OffsetDateTime, end: OffsetDateTime) -> Vec<Reading> {
        self.readings
            .read()
            .await
            .iter()
            .filter(|r| r.meter_id == meter_id && r.collected_at >= start && r.collected_at <= end)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn readings_in_range(
        &self,
        meter_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<Reading>, StoreError> {
        Ok(self.snapshot(meter_id, start, end).await)
    }

    async fn latest_reading(&self, meter_id: &str) -> Result<Option<Reading>, StoreError> {
        Ok(self
            .readings
            .read()
            .await
            .iter()
            .rev()
            .find(|r| r.meter_id == meter_id)
            .cloned())
    }

    async fn append_reading(&self, reading: Reading) -> Result<(), StoreError> {
        reading.validate()?;

        let mut guard = self.readings.write().await;
        // Insert after any readings sharing the same timestamp to keep arrival order stable.
        let idx = guard.partition_point(|r| r.collected_at <= reading.collected_at);
        guard.insert(idx, reading);
        Ok(())
    }

    fn stream_in_range<'a>(
        &'a self,
        meter_id: &'a str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> BoxStream<'a, Result<Reading, StoreError>> {
        stream::once(self.snapshot(meter_id, start, end))
            .flat_map(|rows| stream::iter(rows.into_iter().map(Ok)))
            .boxed()
    }
}
