//! Tracked-symbol registry maintenance: one-time backfill when a symbol is
//! first seen, the daily close refresh, and the startup catch-up.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Months, NaiveDate, NaiveTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::market::{Interval, MarketData, PriceData, PriceHistory};
use crate::period::previous_weekday;
use crate::store::{PricePoint, Store, normalize};
use crate::Result;

/// Years of daily history loaded when a symbol is first tracked.
pub const BACKFILL_YEARS: u32 = 5;

/// Fixed delay between consecutive provider calls in batch jobs.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    delay: Duration,
}

impl Pacer {
    pub fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn none() -> Self {
        Self::fixed(Duration::ZERO)
    }

    pub async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    AlreadyTracked,
    Backfilled(usize),
    /// Registered, but the history fetch failed; nothing was stored.
    BackfillFailed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    pub processed: usize,
    pub stored: usize,
    pub skipped: usize,
    pub failures: usize,
}

pub struct Tracker {
    store: Arc<Store>,
    market: Arc<dyn MarketData>,
    pacer: Pacer,
}

impl Tracker {
    pub fn new(store: Arc<Store>, market: Arc<dyn MarketData>, pacer: Pacer) -> Self {
        Self {
            store,
            market,
            pacer,
        }
    }

    /// Registers `symbol` and loads its history the first time it is seen.
    /// Only store failures are returned as errors.
    #[instrument(name = "ensure_tracked", skip(self))]
    pub async fn ensure_tracked(&self, symbol: &str) -> Result<TrackOutcome> {
        let symbol = normalize(symbol);

        if !self.store.add_tracked_symbol(&symbol)? {
            return Ok(TrackOutcome::AlreadyTracked);
        }
        info!("symbol registered, backfilling");

        let end = Utc::now();
        let start = end
            .checked_sub_months(Months::new(12 * BACKFILL_YEARS))
            .unwrap_or(end);

        match self.backfill(&symbol, start, end).await {
            Ok(stored) => {
                info!(stored, "backfill complete");
                Ok(TrackOutcome::Backfilled(stored))
            }
            Err(crate::Error::Database(e)) => Err(e.into()),
            Err(e) => {
                error!(error = ?e, "backfill failed, symbol stays registered");
                Ok(TrackOutcome::BackfillFailed)
            }
        }
    }

    /// Stores the close for `today` (UTC) of every tracked symbol.
    #[instrument(name = "refresh_tracked", skip(self))]
    pub async fn refresh_tracked(&self, today: NaiveDate) -> Result<RefreshReport> {
        let symbols = self.store.get_tracked_symbols()?;
        info!(total_symbols = symbols.len(), "loaded tracked symbols");

        let start = day_start(today);
        let end = day_start(today.succ_opt().unwrap_or(today));
        let day_key = today.format("%Y-%m-%d").to_string();

        let mut report = RefreshReport::default();

        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                self.pacer.pause().await;
            }
            report.processed += 1;

            let hist = match self.market.history(symbol, start, end, Interval::Day1).await {
                Ok(h) => h,
                Err(e) => {
                    report.failures += 1;
                    warn!(symbol = %symbol, error = ?e, "fetch history failed");
                    continue;
                }
            };

            let Some((date, data)) = resolve_day(&hist, &day_key) else {
                report.skipped += 1;
                debug!(symbol = %symbol, "no history rows returned");
                continue;
            };

            let point = PricePoint::new(symbol.as_str(), date, data);
            match self.store.upsert_price_point(&point) {
                Ok(()) => {
                    report.stored += 1;
                    debug!(symbol = %symbol, date = %date, close = data.close, "stored close");
                }
                Err(e) => {
                    report.failures += 1;
                    error!(symbol = %symbol, date = %date, error = ?e, "failed to store price");
                }
            }
        }

        info!(
            processed = report.processed,
            stored = report.stored,
            skipped = report.skipped,
            failures = report.failures,
            "daily refresh complete"
        );
        Ok(report)
    }

    /// Fills gaps left while the process was down. Symbols with no rows get
    /// the full backfill window; symbols whose newest row predates the
    /// previous weekday are fetched from the day after that row.
    #[instrument(name = "catch_up", skip(self))]
    pub async fn catch_up(&self, today: NaiveDate) -> Result<RefreshReport> {
        let symbols = self.store.get_tracked_symbols()?;
        let expected = previous_weekday(today);
        let end = day_start(today.succ_opt().unwrap_or(today));

        let mut report = RefreshReport::default();
        let mut first = true;

        for symbol in &symbols {
            let start = match self.store.latest_price_date(symbol)? {
                Some(latest) if latest >= expected => continue,
                Some(latest) => day_start(latest.succ_opt().unwrap_or(latest)),
                None => end
                    .checked_sub_months(Months::new(12 * BACKFILL_YEARS))
                    .unwrap_or(end),
            };

            if !first {
                self.pacer.pause().await;
            }
            first = false;
            report.processed += 1;

            match self.backfill(symbol, start, end).await {
                Ok(0) => report.skipped += 1,
                Ok(n) => report.stored += n,
                Err(e) => {
                    report.failures += 1;
                    warn!(symbol = %symbol, error = ?e, "catch-up failed");
                }
            }
        }

        info!(
            total_symbols = symbols.len(),
            stale = report.processed,
            stored = report.stored,
            failures = report.failures,
            "catch-up complete"
        );
        Ok(report)
    }

    async fn backfill(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<usize> {
        let hist = self
            .market
            .history(symbol, start, end, Interval::Day1)
            .await?;

        let points = history_to_points(symbol, &hist);
        if points.is_empty() {
            return Ok(0);
        }
        self.store.upsert_price_points(&points)
    }
}

/// Picks the bar for `day_key`, or the latest bar in the response when that
/// exact day is missing.
pub fn resolve_day(hist: &PriceHistory, day_key: &str) -> Option<(NaiveDate, PriceData)> {
    let (key, data) = match hist.get_key_value(day_key) {
        Some(kv) => kv,
        None => hist.last_key_value()?,
    };
    let date = NaiveDate::parse_from_str(key.get(..10)?, "%Y-%m-%d").ok()?;
    Some((date, *data))
}

/// Converts daily history into store rows, skipping unparsable keys.
pub fn history_to_points(symbol: &str, hist: &PriceHistory) -> Vec<PricePoint> {
    hist.iter()
        .filter_map(|(key, data)| {
            let date = NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()?;
            Some(PricePoint::new(symbol, date, *data))
        })
        .collect()
}

fn day_start(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}
