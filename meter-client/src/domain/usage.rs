/// Consumption statistics over one window of readings.
///
/// `sample_count` is the number of readings in the window; `valid_sample_count`
/// the number of consecutive pairs that counted as consumption (recharges excluded).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UsageWindowResult {
    pub total_usage: f64,
    pub average_usage: f64,
    pub sample_count: usize,
    pub valid_sample_count: usize,
}
