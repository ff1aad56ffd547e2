pub mod admin_server;
pub mod config;
pub mod crawler;
pub mod error;
pub mod fetcher;
pub mod observability;
pub mod parser;
pub mod pipeline;
pub mod proxy;
pub mod sinks;
pub mod sources;
pub mod transform;

pub use crawler::{CrawlAttempt, Crawler, TickOutcome};
pub use error::CrawlError;
pub use pipeline::{Envelope, Pipeline};
