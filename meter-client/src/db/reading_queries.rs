use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::{
    domain::Reading,
    store::{ReadingStore, StoreError},
};

const RANGE_SQL: &str = r#"
    SELECT
        meter_id,
        meter_name,
        remaining_kwh,
        collected_at
    FROM meter_readings
    WHERE meter_id = $1
      AND collected_at >= $2
      AND collected_at <= $3
    ORDER BY collected_at
"#;

const LATEST_SQL: &str = r#"
    SELECT
        meter_id,
        meter_name,
        remaining_kwh,
        collected_at
    FROM meter_readings
    WHERE meter_id = $1
    ORDER BY collected_at DESC
    LIMIT 1
"#;

/// `ReadingStore` backed by QuestDB's Postgres wire protocol.
///
/// Expects the table to exist already:
///
/// ```sql
/// CREATE TABLE meter_readings (
///     meter_id SYMBOL,
///     meter_name SYMBOL,
///     remaining_kwh DOUBLE,
///     collected_at TIMESTAMP
/// ) TIMESTAMP(collected_at) PARTITION BY MONTH;
/// ```
#[derive(Clone)]
pub struct QuestDbReadingStore {
    pool: PgPool,
}

impl QuestDbReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadingStore for QuestDbReadingStore {
    async fn readings_in_range(
        &self,
        meter_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<Reading>, StoreError> {
        let rows = sqlx::query_as::<_, Reading>(RANGE_SQL)
            .bind(meter_id)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn latest_reading(&self, meter_id: &str) -> Result<Option<Reading>, StoreError> {
        let row = sqlx::query_as::<_, Reading>(LATEST_SQL)
            .bind(meter_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn append_reading(&self, reading: Reading) -> Result<(), StoreError> {
        reading.validate()?;

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO meter_readings (meter_id, meter_name, remaining_kwh, collected_at) ",
        );
        builder.push_values(std::iter::once(&reading), |mut b, r| {
            b.push_bind(&r.meter_id)
                .push_bind(&r.meter_name)
                .push_bind(r.remaining_kwh)
                .push_bind(r.collected_at);
        });

        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    fn stream_in_range<'a>(
        &'a self,
        meter_id: &'a str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> BoxStream<'a, Result<Reading, StoreError>> {
        sqlx::query_as::<_, Reading>(RANGE_SQL)
            .bind(meter_id)
            .bind(start)
            .bind(end)
            .fetch(&self.pool)
            .map_err(StoreError::from)
            .boxed()
    }
}
