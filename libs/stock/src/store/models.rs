use chrono::NaiveDate;

use crate::market::PriceData;

/// One daily OHLCV row, keyed by `(symbol, date)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl PricePoint {
    pub fn new(symbol: impl Into<String>, date: NaiveDate, data: PriceData) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            open: data.open,
            high: data.high,
            low: data.low,
            close: data.close,
            volume: data.volume,
        }
    }

    pub fn data(&self) -> PriceData {
        PriceData {
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Above,
    Below,
}

impl Direction {
    pub fn from_above(above: bool) -> Self {
        if above { Direction::Above } else { Direction::Below }
    }

    pub fn is_above(&self) -> bool {
        matches!(self, Direction::Above)
    }

    /// True when `price` satisfies the target in this direction.
    pub fn is_crossed(&self, price: f64, target: f64) -> bool {
        match self {
            Direction::Above => price >= target,
            Direction::Below => price <= target,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Above => "above",
            Direction::Below => "below",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchlistEntry {
    pub user_id: String,
    pub symbol: String,
    pub price_target: f64,
    pub direction: Direction,
    pub triggered: bool,
}

impl WatchlistEntry {
    pub fn new(
        user_id: impl Into<String>,
        symbol: &str,
        price_target: f64,
        direction: Direction,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            symbol: normalize(symbol),
            price_target,
            direction,
            triggered: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioEntry {
    pub user_id: String,
    pub symbol: String,
    pub shares: f64,
}

impl PortfolioEntry {
    pub fn new(user_id: impl Into<String>, symbol: &str, shares: f64) -> Self {
        Self {
            user_id: user_id.into(),
            symbol: normalize(symbol),
            shares,
        }
    }
}

pub fn normalize(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}
