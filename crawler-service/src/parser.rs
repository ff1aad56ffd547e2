//! Heuristic extraction of a balance reading from arbitrary page text.
//!
//! Strategies run in priority order and the first hit wins:
//!
//! 1. [`ExactPattern`]: label, number and unit together. Highest confidence.
//! 2. [`KeywordProximity`]: a text node mentioning a balance keyword, and the
//!    first plausible number in or just after it.
//! 3. [`LargestDecimal`]: the largest plausible decimal anywhere in the text.
//!    Least reliable; kept because intermediaries sometimes strip the markup.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use serde::Serialize;

use crate::{config::ParserConfig, error::CrawlError};

static EXACT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:剩余电量|剩余电费|当前余额|剩余|余额|remaining(?:\s+(?:balance|energy|units))?|balance)\s*[:：]?\s*(\d+(?:\.\d+)?)\s*(?:kwh|度)",
    )
    .expect("exact pattern is valid")
});

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("number pattern is valid"));

static DECIMAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.\d+").expect("decimal pattern is valid"));

const KEYWORDS: &[&str] = &["剩余", "余额", "电量", "remaining", "balance", "kwh", "度"];

/// Text nodes following a keyword node that still count as "near" it.
const PROXIMITY_WINDOW: usize = 3;

/// Values accepted as a reading lie strictly between `min` and `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlausibleRange {
    pub min: f64,
    pub max: f64,
}

impl PlausibleRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, v: f64) -> bool {
        v.is_finite() && v > self.min && v < self.max
    }
}

impl From<&ParserConfig> for PlausibleRange {
    fn from(cfg: &ParserConfig) -> Self {
        Self::new(cfg.plausible_min, cfg.plausible_max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    ExactPattern,
    KeywordProximity,
    LargestDecimal,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ExactPattern => "exact_pattern",
            Self::KeywordProximity => "keyword_proximity",
            Self::LargestDecimal => "largest_decimal",
        })
    }
}

/// A response body, pre-split into visible text nodes.
pub struct Page {
    /// Trimmed, non-empty text nodes in document order, excluding script and style.
    pub nodes: Vec<String>,
    /// All nodes joined by single spaces.
    pub text: String,
}

impl Page {
    pub fn parse(raw: &str) -> Self {
        let document = Html::parse_document(raw);
        let nodes: Vec<String> = document
            .root_element()
            .descendants()
            .filter_map(|node| {
                let text = node.value().as_text()?;
                let hidden = node
                    .parent()
                    .and_then(|p| p.value().as_element().map(|e| matches!(e.name(), "script" | "style")))
                    .unwrap_or(false);
                let trimmed = text.trim();
                (!hidden && !trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .collect();
        let text = nodes.join(" ");

        Self { nodes, text }
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.parse::<f64>().ok()
}

pub trait ExtractionStrategy: Send + Sync {
    fn tier(&self) -> Tier;

    fn extract(&self, page: &Page, range: PlausibleRange) -> Option<f64>;
}

pub struct ExactPattern;

impl ExtractionStrategy for ExactPattern {
    fn tier(&self) -> Tier {
        Tier::ExactPattern
    }

    fn extract(&self, page: &Page, range: PlausibleRange) -> Option<f64> {
        EXACT_RE
            .captures_iter(&page.text)
            .filter_map(|c| parse_number(c.get(1)?.as_str()))
            .find(|v| range.contains(*v))
    }
}

pub struct KeywordProximity;

impl KeywordProximity {
    /// Byte offset just past the first keyword in `node`, if any.
    fn keyword_end(node: &str) -> Option<usize> {
        let lower = node.to_lowercase();
        KEYWORDS
            .iter()
            .filter_map(|k| lower.find(k).map(|i| i + k.len()))
            .min()
            // Lowercasing may shift offsets for non-ASCII; fall back to the start.
            .map(|end| if node.is_char_boundary(end) && lower.len() == node.len() { end } else { 0 })
    }

    fn first_plausible(s: &str, range: PlausibleRange) -> Option<f64> {
        NUMBER_RE
            .find_iter(s)
            .filter_map(|m| parse_number(m.as_str()))
            .find(|v| range.contains(*v))
    }
}

impl ExtractionStrategy for KeywordProximity {
    fn tier(&self) -> Tier {
        Tier::KeywordProximity
    }

    fn extract(&self, page: &Page, range: PlausibleRange) -> Option<f64> {
        for (i, node) in page.nodes.iter().enumerate() {
            let Some(end) = Self::keyword_end(node) else {
                continue;
            };
            if let Some(v) = Self::first_plausible(&node[end..], range) {
                return Some(v);
            }
            let following = page.nodes.iter().skip(i + 1).take(PROXIMITY_WINDOW);
            for next in following {
                if let Some(v) = Self::first_plausible(next, range) {
                    return Some(v);
                }
            }
        }
        None
    }
}

pub struct LargestDecimal;

impl ExtractionStrategy for LargestDecimal {
    fn tier(&self) -> Tier {
        Tier::LargestDecimal
    }

    fn extract(&self, page: &Page, range: PlausibleRange) -> Option<f64> {
        DECIMAL_RE
            .find_iter(&page.text)
            .filter_map(|m| parse_number(m.as_str()))
            .filter(|v| range.contains(*v))
            .max_by(f64::total_cmp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extraction {
    pub value: f64,
    pub tier: Tier,
}

pub struct Parser {
    range: PlausibleRange,
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl Parser {
    pub fn new(range: PlausibleRange) -> Self {
        let strategies: Vec<Box<dyn ExtractionStrategy>> =
            vec![Box::new(ExactPattern), Box::new(KeywordProximity), Box::new(LargestDecimal)];
        Self::with_strategies(range, strategies)
    }

    pub fn with_strategies(range: PlausibleRange, strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { range, strategies }
    }

    pub fn parse(&self, raw: &str) -> Result<Extraction, CrawlError> {
        let page = Page::parse(raw);
        for strategy in &self.strategies {
            if let Some(value) = strategy.extract(&page, self.range) {
                let tier = strategy.tier();
                tracing::debug!(%tier, value, "parser tier matched");
                metrics::counter!("parser_tier_hits_total", "tier" => tier.to_string()).increment(1);
                return Ok(Extraction { value, tier });
            }
        }
        Err(CrawlError::NoMatch)
    }
}
