use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;

/// Date-keyed price series. Keys are `%Y-%m-%d` for daily bars and
/// `%Y-%m-%d %H:%M` for intraday bars, so key order is chronological.
pub type PriceHistory = BTreeMap<String, PriceData>;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PriceData {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// Current quote snapshot, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub percent_change: f64,
    pub currency: String,
    pub exchange: String,
    pub long_name: String,
}

impl Quote {
    pub fn price_fmt(&self) -> String {
        format!("{:.2}", self.price)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Minute1,
    Day1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Minute1 => "1m",
            Interval::Day1 => "1d",
        }
    }

    /// Format used for history keys at this granularity.
    pub fn key_format(&self) -> &'static str {
        match self {
            Interval::Minute1 => "%Y-%m-%d %H:%M",
            Interval::Day1 => "%Y-%m-%d",
        }
    }
}

#[async_trait]
pub trait MarketData: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<Quote>;

    async fn history(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
    ) -> Result<PriceHistory>;
}
