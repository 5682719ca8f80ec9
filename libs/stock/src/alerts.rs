use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use crate::market::{MarketData, Quote};
use crate::store::{Store, WatchlistEntry};
use crate::Result;

/// Delivers a direct message to a user. Delivery is best effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, message: &str) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AlertReport {
    pub symbols: usize,
    pub entries: usize,
    pub triggered: usize,
    pub delivery_failures: usize,
    pub quote_failures: usize,
    pub mark_failures: usize,
}

pub struct AlertChecker {
    store: Arc<Store>,
    market: Arc<dyn MarketData>,
    notifier: Arc<dyn Notifier>,
}

impl AlertChecker {
    pub fn new(
        store: Arc<Store>,
        market: Arc<dyn MarketData>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            market,
            notifier,
        }
    }

    /// One pass over every pending watchlist entry. Quotes are fetched once
    /// per symbol. An entry whose target is crossed is notified and marked
    /// triggered even if the message could not be delivered.
    #[instrument(name = "evaluate_alerts", skip(self))]
    pub async fn evaluate(&self) -> Result<AlertReport> {
        let pending = self.store.get_pending_watchlists()?;

        let mut report = AlertReport {
            entries: pending.len(),
            ..Default::default()
        };

        let mut grouped: BTreeMap<String, Vec<WatchlistEntry>> = BTreeMap::new();
        for entry in pending {
            grouped.entry(entry.symbol.clone()).or_default().push(entry);
        }
        report.symbols = grouped.len();

        for (symbol, entries) in grouped {
            let quote = match self.market.quote(&symbol).await {
                Ok(q) => q,
                Err(e) => {
                    report.quote_failures += 1;
                    debug!(symbol = %symbol, error = ?e, "quote fetch failed");
                    continue;
                }
            };

            for entry in entries {
                if !entry.direction.is_crossed(quote.price, entry.price_target) {
                    continue;
                }

                // Marked before sending: an entry is delivered at most once.
                if let Err(e) = self.store.mark_watchlist_triggered(&entry.user_id, &entry.symbol) {
                    report.mark_failures += 1;
                    error!(
                        user_id = %entry.user_id,
                        symbol = %symbol,
                        error = ?e,
                        "failed to mark alert triggered"
                    );
                    continue;
                }
                report.triggered += 1;
                info!(
                    user_id = %entry.user_id,
                    symbol = %symbol,
                    price = quote.price,
                    target = entry.price_target,
                    "alert triggered"
                );

                let message = alert_message(&entry, &quote);
                if let Err(e) = self.notifier.notify(&entry.user_id, &message).await {
                    report.delivery_failures += 1;
                    warn!(
                        user_id = %entry.user_id,
                        symbol = %symbol,
                        error = ?e,
                        "alert delivery failed"
                    );
                }
            }
        }

        Ok(report)
    }
}

pub fn alert_message(entry: &WatchlistEntry, quote: &Quote) -> String {
    format!(
        "This is a price alert for {}\nThe current price is {} which is {} your target of {:.2}",
        entry.symbol,
        quote.price_fmt(),
        entry.direction.as_str(),
        entry.price_target
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::market::{Interval, PriceHistory};
    use crate::store::Direction;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;

    struct FixedPrice(f64);

    #[async_trait]
    impl MarketData for FixedPrice {
        async fn quote(&self, symbol: &str) -> Result<Quote> {
            Ok(Quote {
                symbol: symbol.to_string(),
                price: self.0,
                percent_change: 0.0,
                currency: "USD".into(),
                exchange: "TEST".into(),
                long_name: symbol.to_string(),
            })
        }

        async fn history(
            &self,
            symbol: &str,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
            _: Interval,
        ) -> Result<PriceHistory> {
            Err(Error::NoData(symbol.to_string()))
        }
    }

    #[derive(Default)]
    struct Outbox(Mutex<Vec<String>>);

    #[async_trait]
    impl Notifier for Outbox {
        async fn notify(&self, user_id: &str, _message: &str) -> Result<()> {
            self.0.lock().push(user_id.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn unmarkable_entry_is_not_notified() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .upsert_watchlist_entry(&WatchlistEntry::new("u1", "ABC", 100.0, Direction::Above))
            .unwrap();
        store
            .execute_batch(
                "CREATE TRIGGER watchlists_frozen BEFORE UPDATE ON watchlists
                 BEGIN SELECT RAISE(ABORT, 'frozen'); END;",
            )
            .unwrap();

        let outbox = Arc::new(Outbox::default());
        let checker = AlertChecker::new(store.clone(), Arc::new(FixedPrice(101.0)), outbox.clone());

        let report = checker.evaluate().await.unwrap();
        assert_eq!(report.mark_failures, 1);
        assert_eq!(report.triggered, 0);
        assert!(outbox.0.lock().is_empty());
        assert_eq!(store.get_pending_watchlists().unwrap().len(), 1);
    }

    #[test]
    fn message_names_direction_and_target() {
        let entry = WatchlistEntry::new("u1", "abc", 100.0, Direction::Below);
        let quote = Quote {
            symbol: "ABC".into(),
            price: 99.5,
            percent_change: -1.0,
            currency: "USD".into(),
            exchange: "NasdaqGS".into(),
            long_name: "ABC Corp".into(),
        };

        assert_eq!(
            alert_message(&entry, &quote),
            "This is a price alert for ABC\nThe current price is 99.50 which is below your target of 100.00"
        );
    }

    #[test]
    fn crossing_is_inclusive() {
        assert!(Direction::Above.is_crossed(100.0, 100.0));
        assert!(Direction::Below.is_crossed(100.0, 100.0));
        assert!(!Direction::Above.is_crossed(99.99, 100.0));
        assert!(!Direction::Below.is_crossed(100.01, 100.0));
    }
}
