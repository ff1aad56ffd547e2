//! Domain types, persistence and usage aggregation for prepaid meter readings.

pub mod aggregate;
pub mod db;
pub mod domain;
pub mod store;

pub use aggregate::{aggregate_readings, aggregate_stream, UsageAccumulator, UsageAggregator};
pub use domain::{Reading, ReadingError, UsageWindowResult};
pub use store::{MemoryReadingStore, ReadingStore, StoreError};
