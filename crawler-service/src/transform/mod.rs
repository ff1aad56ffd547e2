use crate::{
    parser::PlausibleRange,
    pipeline::{Envelope, PipelineError, Transform},
};
use meter_client::Reading;

/// Pure validation of a freshly acquired `Reading`.
///
/// Rules:
/// - the store boundary rules (`Reading::validate`) hold.
/// - remaining_kwh lies inside the configured plausible range.
pub fn validate_reading(env: Envelope<Reading>, range: PlausibleRange) -> Result<Envelope<Reading>, PipelineError> {
    let r = &env.payload;

    r.validate()
        .map_err(|e| PipelineError::Transform(e.to_string()))?;

    if !range.contains(r.remaining_kwh) {
        return Err(PipelineError::Transform(format!(
            "remaining_kwh {} outside plausible range ({}, {})",
            r.remaining_kwh, range.min, range.max
        )));
    }

    Ok(env)
}

#[derive(Clone)]
pub struct ReadingValidation {
    range: PlausibleRange,
}

impl ReadingValidation {
    pub fn new(range: PlausibleRange) -> Self {
        Self { range }
    }
}

#[async_trait::async_trait]
impl Transform<Reading> for ReadingValidation {
    async fn apply(&self, input: Envelope<Reading>) -> Result<Envelope<Reading>, PipelineError> {
        match validate_reading(input, self.range) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("validation_reading_rejected_total").increment(1);
                Err(e)
            }
        }
    }
}
