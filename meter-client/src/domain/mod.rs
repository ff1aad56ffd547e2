pub mod reading;
pub mod usage;

pub use reading::{Reading, ReadingError};
pub use usage::UsageWindowResult;
