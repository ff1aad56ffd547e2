use time::{macros::datetime, OffsetDateTime};

/// One timestamped balance sample taken from a prepaid meter page.
///
/// Readings are immutable once built. Successive values are not monotonic:
/// a value higher than its predecessor is a recharge, not an error.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reading {
    pub meter_id: String,
    pub meter_name: String,
    pub remaining_kwh: f64,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub collected_at: OffsetDateTime,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ReadingError {
    #[error("meter_id must not be empty")]
    EmptyMeterId,
    #[error("meter_name must not be empty")]
    EmptyMeterName,
    #[error("remaining_kwh must be a finite non-negative number, got {0}")]
    InvalidBalance(f64),
    #[error("collected_at {0} is outside the accepted window")]
    TimestampOutOfRange(OffsetDateTime),
}

impl Reading {
    pub fn new(
        meter_id: impl Into<String>,
        meter_name: impl Into<String>,
        remaining_kwh: f64,
        collected_at: OffsetDateTime,
    ) -> Self {
        Self {
            meter_id: meter_id.into(),
            meter_name: meter_name.into(),
            remaining_kwh,
            collected_at,
        }
    }

    /// Boundary rules every stored reading must satisfy.
    ///
    /// - meter_id and meter_name are non-empty.
    /// - remaining_kwh is finite and non-negative.
    /// - collected_at falls inside [2000-01-01, 2100-01-01].
    pub fn validate(&self) -> Result<(), ReadingError> {
        if self.meter_id.trim().is_empty() {
            return Err(ReadingError::EmptyMeterId);
        }
        if self.meter_name.trim().is_empty() {
            return Err(ReadingError::EmptyMeterName);
        }

        if !self.remaining_kwh.is_finite() || self.remaining_kwh < 0.0 {
            return Err(ReadingError::InvalidBalance(self.remaining_kwh));
        }

        let min_ts = datetime!(2000-01-01 00:00:00 UTC);
        let max_ts = datetime!(2100-01-01 00:00:00 UTC);
        if self.collected_at < min_ts || self.collected_at > max_ts {
            return Err(ReadingError::TimestampOutOfRange(self.collected_at));
        }

        Ok(())
    }
}
