use std::sync::Arc;

use futures::{Stream, StreamExt};
use time::OffsetDateTime;

use crate::{
    domain::{Reading, UsageWindowResult},
    store::{ReadingStore, StoreError},
};

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Single-pass fold over readings ordered ascending by `collected_at`.
///
/// For each consecutive pair, `prev - curr` is consumption when non-negative.
/// A negative delta is a recharge: it adds nothing and is not a valid sample.
#[derive(Debug, Clone, Default)]
pub struct UsageAccumulator {
    prev: Option<f64>,
    total: f64,
    sample_count: usize,
    valid_sample_count: usize,
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, reading: &Reading) {
        self.sample_count += 1;

        let curr = reading.remaining_kwh;
        if let Some(prev) = self.prev {
            let delta = prev - curr;
            if delta >= 0.0 {
                self.total += delta;
                self.valid_sample_count += 1;
            }
        }
        self.prev = Some(curr);
    }

    pub fn finish(self) -> UsageWindowResult {
        if self.sample_count < 2 {
            return UsageWindowResult {
                sample_count: self.sample_count,
                ..UsageWindowResult::default()
            };
        }

        let total_usage = round2(self.total);
        let average_usage = if self.valid_sample_count == 0 {
            0.0
        } else {
            round2(total_usage / self.valid_sample_count as f64)
        };

        UsageWindowResult {
            total_usage,
            average_usage,
            sample_count: self.sample_count,
            valid_sample_count: self.valid_sample_count,
        }
    }
}

/// In-memory reduction over a fully materialized, ascending sequence.
pub fn aggregate_readings(readings: &[Reading]) -> UsageWindowResult {
    let mut acc = UsageAccumulator::new();
    for r in readings {
        acc.push(r);
    }
    acc.finish()
}

/// Streaming reduction over an ascending cursor. Agrees bit-for-bit with
/// `aggregate_readings` over the same rows.
pub async fn aggregate_stream<S>(mut rows: S) -> Result<UsageWindowResult, StoreError>
where
    S: Stream<Item = Result<Reading, StoreError>> + Unpin,
{
    let mut acc = UsageAccumulator::new();
    while let Some(row) = rows.next().await {
        acc.push(&row?);
    }
    Ok(acc.finish())
}

/// Usage statistics over windows of stored readings.
#[derive(Clone)]
pub struct UsageAggregator {
    store: Arc<dyn ReadingStore>,
}

impl UsageAggregator {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self { store }
    }

    pub async fn aggregate(
        &self,
        meter_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<UsageWindowResult, StoreError> {
        let readings = self.store.readings_in_range(meter_id, start, end).await?;
        Ok(aggregate_readings(&readings))
    }

    pub async fn aggregate_streaming(
        &self,
        meter_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<UsageWindowResult, StoreError> {
        aggregate_stream(self.store.stream_in_range(meter_id, start, end)).await
    }

    pub async fn latest(&self, meter_id: &str) -> Result<Option<Reading>, StoreError> {
        self.store.latest_reading(meter_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryReadingStore;
    use time::{macros::datetime, Duration};

    const T0: OffsetDateTime = datetime!(2024-05-01 00:00:00 UTC);

    fn series(values: &[f64]) -> Vec<Reading> {
        values
            .iter()
            .enumerate()
            .map(|(i, kwh)| Reading::new("m-1", "Dorm 3-201", *kwh, T0 + Duration::minutes(15 * i as i64)))
            .collect()
    }

    async fn store_with(values: &[f64]) -> Arc<MemoryReadingStore> {
        let store = Arc::new(MemoryReadingStore::new());
        for r in series(values) {
            store.append_reading(r).await.unwrap();
        }
        store
    }

    #[test]
    fn recharge_pair_is_excluded_from_usage() {
        let res = aggregate_readings(&series(&[100.0, 80.0, 120.0, 100.0]));

        assert_eq!(res.total_usage, 40.0);
        assert_eq!(res.valid_sample_count, 2);
        assert_eq!(res.average_usage, 20.0);
        assert_eq!(res.sample_count, 4);
    }

    #[test]
    fn non_increasing_pair_contributes_exact_delta() {
        let res = aggregate_readings(&series(&[55.25, 50.0]));
        assert_eq!(res.total_usage, 5.25);
        assert_eq!(res.valid_sample_count, 1);

        let flat = aggregate_readings(&series(&[12.0, 12.0]));
        assert_eq!(flat.total_usage, 0.0);
        assert_eq!(flat.valid_sample_count, 1);
    }

    #[test]
    fn only_recharges_yield_zero_without_negative_contribution() {
        let res = aggregate_readings(&series(&[10.0, 20.0, 35.5]));
        assert_eq!(res.total_usage, 0.0);
        assert_eq!(res.average_usage, 0.0);
        assert_eq!(res.valid_sample_count, 0);
        assert_eq!(res.sample_count, 3);
    }

    #[test]
    fn fewer_than_two_readings_is_all_zero_with_actual_count() {
        let empty = aggregate_readings(&[]);
        assert_eq!(empty, UsageWindowResult::default());

        let single = aggregate_readings(&series(&[42.0]));
        assert_eq!(single.total_usage, 0.0);
        assert_eq!(single.average_usage, 0.0);
        assert_eq!(single.valid_sample_count, 0);
        assert_eq!(single.sample_count, 1);
    }

    #[test]
    fn total_is_rounded_to_two_decimals() {
        let res = aggregate_readings(&series(&[10.0, 9.9, 9.7, 9.4]));
        assert_eq!(res.total_usage, 0.6);
        assert_eq!(res.average_usage, 0.2);
    }

    #[tokio::test]
    async fn aggregate_over_store_window() {
        let store = store_with(&[100.0, 80.0, 120.0, 100.0]).await;
        let agg = UsageAggregator::new(store);

        let res = agg
            .aggregate("m-1", T0, T0 + Duration::minutes(45))
            .await
            .unwrap();
        assert_eq!(res.total_usage, 40.0);
        assert_eq!(res.valid_sample_count, 2);
        assert_eq!(res.average_usage, 20.0);

        // Narrower window only sees the recharge pair.
        let res = agg
            .aggregate("m-1", T0 + Duration::minutes(15), T0 + Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(res.total_usage, 0.0);
        assert_eq!(res.sample_count, 2);
        assert_eq!(res.valid_sample_count, 0);
    }

    #[tokio::test]
    async fn streaming_and_materialized_agree_bit_for_bit() {
        let store = store_with(&[97.31, 96.02, 95.77, 130.0, 129.13, 128.9, 128.9, 127.07]).await;
        let agg = UsageAggregator::new(store);
        let end = T0 + Duration::days(1);

        let a = agg.aggregate("m-1", T0, end).await.unwrap();
        let b = agg.aggregate_streaming("m-1", T0, end).await.unwrap();

        assert_eq!(a.total_usage.to_bits(), b.total_usage.to_bits());
        assert_eq!(a.average_usage.to_bits(), b.average_usage.to_bits());
        assert_eq!(a.sample_count, b.sample_count);
        assert_eq!(a.valid_sample_count, b.valid_sample_count);
    }

    #[tokio::test]
    async fn repeated_aggregation_over_unchanged_window_is_identical() {
        let store = store_with(&[60.0, 58.5, 57.25, 70.0, 69.0]).await;
        let agg = UsageAggregator::new(store);
        let end = T0 + Duration::hours(2);

        let first = agg.aggregate("m-1", T0, end).await.unwrap();
        let second = agg.aggregate("m-1", T0, end).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn latest_returns_most_recent_reading() {
        let store = store_with(&[60.0, 58.5]).await;
        let agg = UsageAggregator::new(store);

        let latest = agg.latest("m-1").await.unwrap().unwrap();
        assert_eq!(latest.remaining_kwh, 58.5);
    }
}
