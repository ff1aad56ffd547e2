pub mod crawler;

pub use crawler::CrawlerSource;
