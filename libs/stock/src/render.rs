//! Chart render pipeline: history loading, single-symbol cards and the
//! bounded-concurrency portfolio fan-out.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, warn};
use tracing_futures::Instrument;

use crate::chart::{ChartImage, ChartSeries, render_line_chart};
use crate::market::{MarketData, PriceHistory, Quote};
use crate::period::Period;
use crate::store::{PortfolioEntry, Store, normalize};
use crate::{Error, Result};

/// Renders in flight per portfolio request.
pub const RENDER_CONCURRENCY: usize = 4;

/// Runs `task` for every item with at most `limit` running at once and
/// returns the `Some` results in input order. `None` slots are dropped.
pub async fn fan_out<I, T, F, Fut>(items: Vec<I>, limit: usize, task: F) -> Vec<T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(usize, I) -> Fut,
    Fut: Future<Output = Option<T>> + Send + 'static,
{
    let total = items.len();
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Option<T>)>();

    for (index, item) in items.into_iter().enumerate() {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let fut = task(index, item);
        let tx = tx.clone();

        tokio::spawn(async move {
            let out = fut.await;
            drop(permit);
            let _ = tx.send((index, out));
        });
    }
    drop(tx);

    let mut slots: Vec<(usize, Option<T>)> = Vec::with_capacity(total);
    while let Some(slot) = rx.recv().await {
        slots.push(slot);
    }
    if slots.len() < total {
        warn!(expected = total, received = slots.len(), "render tasks lost");
    }

    slots.sort_by_key(|(index, _)| *index);
    slots.into_iter().filter_map(|(_, out)| out).collect()
}

/// Quote plus chart for a single symbol.
#[derive(Debug, Clone)]
pub struct StockCard {
    pub quote: Quote,
    pub period: Period,
    pub chart: ChartImage,
}

/// One rendered portfolio holding.
#[derive(Debug, Clone)]
pub struct HoldingCard {
    pub holding: PortfolioEntry,
    pub quote: Quote,
    pub period: Period,
    pub weekly_change: Option<f64>,
    pub yearly_change: Option<f64>,
    pub chart: ChartImage,
}

/// Turns a filtered series into an image. Runs on a blocking thread.
type DrawFn = fn(&str, &str, Period, &ChartSeries) -> Result<ChartImage>;

pub struct ChartRenderer {
    store: Arc<Store>,
    market: Arc<dyn MarketData>,
    render_timeout: Duration,
    draw: DrawFn,
}

impl ChartRenderer {
    pub fn new(store: Arc<Store>, market: Arc<dyn MarketData>, render_timeout: Duration) -> Self {
        Self {
            store,
            market,
            render_timeout,
            draw: render_line_chart,
        }
    }

    /// Intraday data is always fetched live. Other periods come from the
    /// store, falling back to the provider when no rows are stored.
    pub async fn load_history(
        &self,
        symbol: &str,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<PriceHistory> {
        let (start, end) = period.range(now);

        if !period.is_live() {
            let rows = self
                .store
                .get_price_points(symbol, start.date_naive(), end.date_naive())?;
            if !rows.is_empty() {
                debug!(symbol, period = %period, rows = rows.len(), "history from store");
                return Ok(rows
                    .into_iter()
                    .map(|p| (p.date.format("%Y-%m-%d").to_string(), p.data()))
                    .collect());
            }
        }

        self.market
            .history(symbol, start, end, period.interval())
            .await
    }

    pub async fn stock_card(&self, symbol: &str, period: Period) -> Result<StockCard> {
        let symbol = normalize(symbol);
        let quote = self.market.quote(&symbol).await?;
        let history = self.load_history(&symbol, period, Utc::now()).await?;
        let chart = self.render(&quote, period, &history).await?;

        Ok(StockCard {
            quote,
            period,
            chart,
        })
    }

    pub async fn holding_card(&self, holding: PortfolioEntry, period: Period) -> Result<HoldingCard> {
        let now = Utc::now();
        let quote = self.market.quote(&holding.symbol).await?;

        let yearly = self.load_history(&holding.symbol, Period::Year1, now).await?;
        let history = if period == Period::Year1 {
            yearly.clone()
        } else {
            self.load_history(&holding.symbol, period, now).await?
        };

        let chart = self.render(&quote, period, &history).await?;

        Ok(HoldingCard {
            weekly_change: Period::Week1.change(&yearly, now),
            yearly_change: Period::Year1.change(&yearly, now),
            holding,
            quote,
            period,
            chart,
        })
    }

    /// Cards for every holding, in portfolio order. Holdings that fail to
    /// load or render, or exceed the render timeout, are left out.
    pub async fn portfolio_cards(
        self: &Arc<Self>,
        holdings: Vec<PortfolioEntry>,
        period: Period,
        limit: usize,
    ) -> Vec<HoldingCard> {
        fan_out(holdings, limit, |index, holding| {
            let renderer = Arc::clone(self);
            let span = tracing::info_span!("render_holding", index, symbol = %holding.symbol);

            async move {
                let symbol = holding.symbol.clone();
                let rendered = tokio::time::timeout(
                    renderer.render_timeout,
                    renderer.holding_card(holding, period),
                )
                .await
                .unwrap_or_else(|_| Err(Error::Timeout(format!("rendering {symbol}"))));

                match rendered {
                    Ok(card) => Some(card),
                    Err(e) => {
                        warn!(symbol = %symbol, error = ?e, "holding render failed");
                        None
                    }
                }
            }
            .instrument(span)
        })
        .await
    }

    async fn render(
        &self,
        quote: &Quote,
        period: Period,
        history: &PriceHistory,
    ) -> Result<ChartImage> {
        let series = ChartSeries::from_history(history, period);
        if series.is_empty() {
            return Err(Error::NoData(format!(
                "no {} history for {}",
                period, quote.symbol
            )));
        }

        let symbol = quote.symbol.clone();
        let currency = quote.currency.clone();
        debug!(symbol = %symbol, points = series.closes.len(), "generating chart (spawn_blocking)");
        let draw = self.draw;
        tokio::task::spawn_blocking(move || draw(&symbol, &currency, period, &series)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use parking_lot::Mutex;

    use crate::market::{Interval, PriceData};
    use crate::store::PricePoint;

    #[derive(Default)]
    struct FakeMarket {
        failing: HashSet<&'static str>,
        hanging: HashSet<&'static str>,
        history_calls: Mutex<Vec<(String, Interval)>>,
    }

    #[async_trait]
    impl MarketData for FakeMarket {
        async fn quote(&self, symbol: &str) -> Result<Quote> {
            Ok(Quote {
                symbol: symbol.to_string(),
                price: 10.0,
                percent_change: 1.0,
                currency: "USD".into(),
                exchange: "TEST".into(),
                long_name: symbol.to_string(),
            })
        }

        async fn history(
            &self,
            symbol: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            interval: Interval,
        ) -> Result<PriceHistory> {
            self.history_calls.lock().push((symbol.to_string(), interval));

            if self.hanging.contains(symbol) {
                std::future::pending::<()>().await;
            }
            if self.failing.contains(symbol) {
                return Err(Error::MarketData(format!("{symbol} unavailable")));
            }

            let key = match interval {
                Interval::Minute1 => "2024-01-02 09:30",
                Interval::Day1 => "2024-01-02",
            };
            Ok(PriceHistory::from([(key.to_string(), bar(42.0))]))
        }
    }

    fn bar(close: f64) -> PriceData {
        PriceData {
            close,
            ..Default::default()
        }
    }

    fn stub_draw(symbol: &str, _: &str, period: Period, _: &ChartSeries) -> Result<ChartImage> {
        Ok(ChartImage {
            file_name: crate::chart::chart_file_name(symbol, period),
            png: vec![0x89, b'P', b'N', b'G'],
        })
    }

    fn setup(
        market: FakeMarket,
        timeout: Duration,
    ) -> (Arc<Store>, Arc<FakeMarket>, Arc<ChartRenderer>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let market = Arc::new(market);
        let renderer = ChartRenderer {
            draw: stub_draw,
            ..ChartRenderer::new(store.clone(), market.clone(), timeout)
        };
        (store, market, Arc::new(renderer))
    }

    fn holdings(symbols: &[&str]) -> Vec<PortfolioEntry> {
        symbols
            .iter()
            .map(|s| PortfolioEntry::new("u1", s, 1.0))
            .collect()
    }

    #[tokio::test]
    async fn stored_rows_are_used_without_provider_call() {
        let (store, market, renderer) = setup(FakeMarket::default(), Duration::from_secs(5));
        let now = Utc::now();
        let day = (now - ChronoDuration::days(30)).date_naive();
        store
            .upsert_price_point(&PricePoint::new("ABC", day, bar(7.0)))
            .unwrap();

        let history = renderer.load_history("ABC", Period::Year1, now).await.unwrap();

        assert_eq!(history.len(), 1);
        assert_eq!(history[&day.format("%Y-%m-%d").to_string()].close, 7.0);
        assert!(market.history_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn empty_store_falls_back_to_provider() {
        let (_store, market, renderer) = setup(FakeMarket::default(), Duration::from_secs(5));

        let history = renderer
            .load_history("ABC", Period::Year1, Utc::now())
            .await
            .unwrap();

        assert_eq!(history["2024-01-02"].close, 42.0);
        assert_eq!(
            *market.history_calls.lock(),
            vec![("ABC".to_string(), Interval::Day1)]
        );
    }

    #[tokio::test]
    async fn intraday_is_always_live() {
        let (store, market, renderer) = setup(FakeMarket::default(), Duration::from_secs(5));
        let now = Utc::now();
        for back in 0..4 {
            let day = (now - ChronoDuration::days(back)).date_naive();
            store
                .upsert_price_point(&PricePoint::new("ABC", day, bar(7.0)))
                .unwrap();
        }

        let history = renderer.load_history("ABC", Period::Day1, now).await.unwrap();

        assert_eq!(history.keys().collect::<Vec<_>>(), vec!["2024-01-02 09:30"]);
        assert_eq!(
            *market.history_calls.lock(),
            vec![("ABC".to_string(), Interval::Minute1)]
        );
    }

    #[tokio::test]
    async fn holding_with_failed_fetch_is_left_out() {
        let market = FakeMarket {
            failing: HashSet::from(["B"]),
            ..Default::default()
        };
        let (_store, _market, renderer) = setup(market, Duration::from_secs(5));

        let cards = renderer
            .portfolio_cards(holdings(&["A", "B", "C"]), Period::Year1, RENDER_CONCURRENCY)
            .await;

        let symbols: Vec<&str> = cards.iter().map(|c| c.holding.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["A", "C"]);
        assert_eq!(cards[0].chart.file_name, "a_1y_chart.png");
    }

    #[tokio::test]
    async fn timed_out_holding_is_left_out() {
        let market = FakeMarket {
            hanging: HashSet::from(["SLOW"]),
            ..Default::default()
        };
        let (_store, _market, renderer) = setup(market, Duration::from_millis(100));

        let cards = renderer
            .portfolio_cards(holdings(&["SLOW", "FAST"]), Period::Month1, RENDER_CONCURRENCY)
            .await;

        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].holding.symbol, "FAST");
        assert_eq!(cards[0].period, Period::Month1);
    }

    #[tokio::test]
    async fn failed_slot_is_dropped_and_order_kept() {
        let items = vec!["A", "B", "C"];

        let out = fan_out(items, RENDER_CONCURRENCY, |_, symbol| async move {
            if symbol == "B" { None } else { Some(symbol.to_string()) }
        })
        .await;

        assert_eq!(out, vec!["A".to_string(), "C".to_string()]);
    }

    #[tokio::test]
    async fn output_order_ignores_completion_order() {
        let items: Vec<u64> = (0..8).collect();

        let out = fan_out(items, 4, |_, n| async move {
            // Earlier items finish last.
            tokio::time::sleep(Duration::from_millis(40 - n * 5)).await;
            Some(n)
        })
        .await;

        assert_eq!(out, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn never_exceeds_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let out = fan_out((0..12).collect::<Vec<usize>>(), 4, |index, _| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Some(index)
            }
        })
        .await;

        assert_eq!(out.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn empty_input_returns_empty() {
        let out: Vec<u8> = fan_out(Vec::<u8>::new(), 4, |_, n| async move { Some(n) }).await;
        assert!(out.is_empty());
    }
}
