use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc, Weekday};

use crate::Error;
use crate::market::{Interval, PriceHistory};

/// Lookback windows offered for charts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    Day1,
    Week1,
    Month1,
    Month3,
    Year1,
    Year5,
}

/// Order the portfolio `-`/`+` buttons step through.
pub const PORTFOLIO_CYCLE: [Period; 5] = [
    Period::Year5,
    Period::Year1,
    Period::Month3,
    Period::Month1,
    Period::Week1,
];

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day1 => "1d",
            Period::Week1 => "1wk",
            Period::Month1 => "1mo",
            Period::Month3 => "3mo",
            Period::Year1 => "1y",
            Period::Year5 => "5y",
        }
    }

    pub fn friendly_name(&self) -> &'static str {
        match self {
            Period::Day1 => "1 Day",
            Period::Week1 => "1 Week",
            Period::Month1 => "1 Month",
            Period::Month3 => "3 Month",
            Period::Year1 => "1 Year",
            Period::Year5 => "5 Year",
        }
    }

    pub fn interval(&self) -> Interval {
        match self {
            Period::Day1 => Interval::Minute1,
            _ => Interval::Day1,
        }
    }

    /// Only the intraday view bypasses the store.
    pub fn is_live(&self) -> bool {
        matches!(self, Period::Day1)
    }

    /// Window ending at `now`. Both ends are moved off weekends onto the
    /// preceding Friday.
    pub fn range(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let months = |n: u32| {
            now.checked_sub_months(Months::new(n))
                .unwrap_or(now)
                - Duration::days(1)
        };

        let start = match self {
            Period::Day1 => now - Duration::days(1),
            Period::Week1 => now - Duration::days(7),
            Period::Month1 => months(1),
            Period::Month3 => months(3),
            Period::Year1 => now.checked_sub_months(Months::new(12)).unwrap_or(now),
            Period::Year5 => now.checked_sub_months(Months::new(60)).unwrap_or(now),
        };

        (skip_weekend(start), skip_weekend(now))
    }

    pub fn prev_in_cycle(&self) -> Option<Period> {
        let idx = PORTFOLIO_CYCLE.iter().position(|p| p == self)?;
        idx.checked_sub(1).map(|i| PORTFOLIO_CYCLE[i])
    }

    pub fn next_in_cycle(&self) -> Option<Period> {
        let idx = PORTFOLIO_CYCLE.iter().position(|p| p == self)?;
        PORTFOLIO_CYCLE.get(idx + 1).copied()
    }

    /// Percent change between the closes at the start and end of this
    /// period, each taken as the latest point on or before that day.
    pub fn change(&self, history: &PriceHistory, now: DateTime<Utc>) -> Option<f64> {
        if history.len() < 2 {
            return None;
        }

        let (start, end) = self.range(now);
        let start_close = close_on_or_before(history, start.date_naive())?;
        let end_close = close_on_or_before(history, end.date_naive())?;

        if start_close == 0.0 {
            return None;
        }

        Some((end_close - start_close) / start_close * 100.0)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1d" => Ok(Period::Day1),
            "1wk" => Ok(Period::Week1),
            "1mo" => Ok(Period::Month1),
            "3mo" => Ok(Period::Month3),
            "1y" => Ok(Period::Year1),
            "5y" => Ok(Period::Year5),
            other => Err(Error::UnsupportedPeriod(other.to_string())),
        }
    }
}

/// Formats a change as `"1.23%"`, or `"N/A"` when unavailable.
pub fn format_change(change: Option<f64>) -> String {
    match change {
        Some(c) => format!("{c:.2}%"),
        None => "N/A".to_string(),
    }
}

fn skip_weekend(t: DateTime<Utc>) -> DateTime<Utc> {
    match t.weekday() {
        Weekday::Sat => t - Duration::days(1),
        Weekday::Sun => t - Duration::days(2),
        _ => t,
    }
}

/// Most recent weekday strictly before `today`.
pub fn previous_weekday(today: NaiveDate) -> NaiveDate {
    let mut day = today - Duration::days(1);
    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        day -= Duration::days(1);
    }
    day
}

pub fn is_weekend(day: NaiveDate) -> bool {
    matches!(day.weekday(), Weekday::Sat | Weekday::Sun)
}

fn close_on_or_before(history: &PriceHistory, day: NaiveDate) -> Option<f64> {
    // Intraday keys ("YYYY-MM-DD HH:MM") sort after the bare date, so bound
    // on the following day instead.
    let bound = (day + Duration::days(1)).format("%Y-%m-%d").to_string();
    history
        .range(..bound)
        .next_back()
        .map(|(_, data)| data.close)
}
