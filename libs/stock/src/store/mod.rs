//! Embedded SQLite store for prices, portfolios, watchlists and the
//! tracked-symbol registry.
//!
//! One `Store` is opened at startup and shared behind an `Arc`. Writes run
//! inside a transaction that commits explicitly and rolls back when dropped.

mod migrations;
pub mod models;

use std::path::Path;

use chrono::NaiveDate;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::Result;
pub use models::{Direction, PortfolioEntry, PricePoint, WatchlistEntry, normalize};

const UPSERT_PRICE_SQL: &str = "
    INSERT INTO stock_prices (symbol, date, open, high, low, close, volume)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT (symbol, date) DO UPDATE SET
        open = excluded.open,
        high = excluded.high,
        low = excluded.low,
        close = excluded.close,
        volume = excluded.volume";

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    // ========== Tracked symbols ==========

    /// Returns true if the symbol was newly registered.
    pub fn add_tracked_symbol(&self, symbol: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let added = conn.execute(
            "INSERT OR IGNORE INTO tracked_stocks (symbol) VALUES (?1)",
            [normalize(symbol)],
        )?;
        Ok(added == 1)
    }

    pub fn is_tracked(&self, symbol: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM tracked_stocks WHERE symbol = ?1)",
            [normalize(symbol)],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn get_tracked_symbols(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT symbol FROM tracked_stocks ORDER BY symbol")?;
        let symbols = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(symbols)
    }

    // ========== Prices ==========

    pub fn upsert_price_point(&self, point: &PricePoint) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            UPSERT_PRICE_SQL,
            params![
                point.symbol,
                point.date,
                point.open,
                point.high,
                point.low,
                point.close,
                point.volume
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Upsert a batch in one transaction. Any failure rolls back the whole batch.
    pub fn upsert_price_points(&self, points: &[PricePoint]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare(UPSERT_PRICE_SQL)?;
            for point in points {
                stmt.execute(params![
                    point.symbol,
                    point.date,
                    point.open,
                    point.high,
                    point.low,
                    point.close,
                    point.volume
                ])?;
            }
        }

        tx.commit()?;
        debug!(count = points.len(), "upserted price points");
        Ok(points.len())
    }

    /// Rows for `symbol` with `start <= date <= end`, oldest first.
    pub fn get_price_points(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT symbol, date, open, high, low, close, volume
             FROM stock_prices
             WHERE symbol = ?1 AND date >= ?2 AND date <= ?3
             ORDER BY date ASC",
        )?;

        let rows = stmt
            .query_map(params![normalize(symbol), start, end], price_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn latest_price_date(&self, symbol: &str) -> Result<Option<NaiveDate>> {
        let conn = self.conn.lock();
        let date = conn.query_row(
            "SELECT MAX(date) FROM stock_prices WHERE symbol = ?1",
            [normalize(symbol)],
            |row| row.get::<_, Option<NaiveDate>>(0),
        )?;
        Ok(date)
    }

    // ========== Portfolios ==========

    pub fn upsert_portfolio_entry(&self, entry: &PortfolioEntry) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO portfolios (user_id, symbol, shares)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id, symbol) DO UPDATE SET shares = excluded.shares",
            params![entry.user_id, normalize(&entry.symbol), entry.shares],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Holdings in the order they were first added.
    pub fn get_portfolio(&self, user_id: &str) -> Result<Vec<PortfolioEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT user_id, symbol, shares FROM portfolios WHERE user_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([user_id], portfolio_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_portfolio_entry(
        &self,
        user_id: &str,
        symbol: &str,
    ) -> Result<Option<PortfolioEntry>> {
        let conn = self.conn.lock();
        let entry = conn
            .query_row(
                "SELECT user_id, symbol, shares FROM portfolios WHERE user_id = ?1 AND symbol = ?2",
                params![user_id, normalize(symbol)],
                portfolio_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// Returns true if a row was removed.
    pub fn remove_portfolio_entry(&self, user_id: &str, symbol: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM portfolios WHERE user_id = ?1 AND symbol = ?2",
            params![user_id, normalize(symbol)],
        )?;
        Ok(removed > 0)
    }

    // ========== Watchlists ==========

    /// Insert or overwrite target and direction. `triggered` is left as is.
    pub fn upsert_watchlist_entry(&self, entry: &WatchlistEntry) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO watchlists (user_id, symbol, price_target, direction)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, symbol) DO UPDATE SET
                 price_target = excluded.price_target,
                 direction = excluded.direction",
            params![
                entry.user_id,
                normalize(&entry.symbol),
                entry.price_target,
                entry.direction.is_above()
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_user_watchlist(&self, user_id: &str) -> Result<Vec<WatchlistEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT user_id, symbol, price_target, direction, triggered
             FROM watchlists WHERE user_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([user_id], watchlist_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every entry that has not fired yet, across all users.
    pub fn get_pending_watchlists(&self) -> Result<Vec<WatchlistEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT user_id, symbol, price_target, direction, triggered
             FROM watchlists WHERE triggered = 0 ORDER BY symbol, rowid",
        )?;
        let rows = stmt
            .query_map([], watchlist_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn mark_watchlist_triggered(&self, user_id: &str, symbol: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE watchlists SET triggered = 1 WHERE user_id = ?1 AND symbol = ?2",
            params![user_id, normalize(symbol)],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Returns true if a row was removed.
    pub fn remove_watchlist_entry(&self, user_id: &str, symbol: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM watchlists WHERE user_id = ?1 AND symbol = ?2",
            params![user_id, normalize(symbol)],
        )?;
        Ok(removed > 0)
    }
}

fn price_from_row(row: &Row<'_>) -> rusqlite::Result<PricePoint> {
    Ok(PricePoint {
        symbol: row.get(0)?,
        date: row.get(1)?,
        open: row.get(2)?,
        high: row.get(3)?,
        low: row.get(4)?,
        close: row.get(5)?,
        volume: row.get(6)?,
    })
}

fn portfolio_from_row(row: &Row<'_>) -> rusqlite::Result<PortfolioEntry> {
    Ok(PortfolioEntry {
        user_id: row.get(0)?,
        symbol: row.get(1)?,
        shares: row.get(2)?,
    })
}

fn watchlist_from_row(row: &Row<'_>) -> rusqlite::Result<WatchlistEntry> {
    Ok(WatchlistEntry {
        user_id: row.get(0)?,
        symbol: row.get(1)?,
        price_target: row.get(2)?,
        direction: Direction::from_above(row.get(3)?),
        triggered: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::PriceData;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn point(symbol: &str, date: &str, close: f64) -> PricePoint {
        PricePoint::new(
            symbol,
            day(date),
            PriceData {
                open: close,
                high: close,
                low: close,
                close,
                volume: 10,
            },
        )
    }

    #[test]
    fn price_upsert_overwrites_same_day() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_price_point(&point("ABC", "2024-01-15", 10.0)).unwrap();
        store.upsert_price_point(&point("ABC", "2024-01-15", 12.5)).unwrap();

        let rows = store
            .get_price_points("ABC", day("2024-01-01"), day("2024-01-31"))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].close, 12.5);
    }

    #[test]
    fn price_range_is_inclusive_and_sorted() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_price_points(&[
                point("ABC", "2024-02-01", 3.0),
                point("ABC", "2024-01-01", 1.0),
                point("ABC", "2024-01-31", 2.0),
                point("XYZ", "2024-01-10", 9.0),
            ])
            .unwrap();

        let rows = store
            .get_price_points("abc", day("2024-01-01"), day("2024-01-31"))
            .unwrap();
        let closes: Vec<f64> = rows.iter().map(|p| p.close).collect();
        assert_eq!(closes, vec![1.0, 2.0]);
        assert_eq!(store.latest_price_date("ABC").unwrap(), Some(day("2024-02-01")));
        assert_eq!(store.latest_price_date("NONE").unwrap(), None);
    }

    #[test]
    fn tracked_symbols_are_unique() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.add_tracked_symbol(" abc ").unwrap());
        assert!(!store.add_tracked_symbol("ABC").unwrap());
        assert!(store.is_tracked("abc").unwrap());
        assert_eq!(store.get_tracked_symbols().unwrap(), vec!["ABC".to_string()]);
    }

    #[test]
    fn portfolio_upsert_keeps_one_row_per_symbol() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_portfolio_entry(&PortfolioEntry::new("u1", "msft", 1.0))
            .unwrap();
        store
            .upsert_portfolio_entry(&PortfolioEntry::new("u1", "AAPL", 2.0))
            .unwrap();
        store
            .upsert_portfolio_entry(&PortfolioEntry::new("u1", "MSFT", 5.0))
            .unwrap();

        let holdings = store.get_portfolio("u1").unwrap();
        let symbols: Vec<&str> = holdings.iter().map(|h| h.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["MSFT", "AAPL"]);
        assert_eq!(holdings[0].shares, 5.0);

        assert!(store.remove_portfolio_entry("u1", "msft").unwrap());
        assert!(!store.remove_portfolio_entry("u1", "msft").unwrap());
        assert!(store.get_portfolio_entry("u1", "MSFT").unwrap().is_none());
    }

    #[test]
    fn triggered_entries_leave_pending_set() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_watchlist_entry(&WatchlistEntry::new("u1", "ABC", 100.0, Direction::Above))
            .unwrap();
        store
            .upsert_watchlist_entry(&WatchlistEntry::new("u2", "ABC", 90.0, Direction::Below))
            .unwrap();

        store.mark_watchlist_triggered("u1", "abc").unwrap();

        let pending = store.get_pending_watchlists().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].user_id, "u2");
        assert_eq!(pending[0].direction, Direction::Below);

        let mine = store.get_user_watchlist("u1").unwrap();
        assert!(mine[0].triggered);
    }

    #[test]
    fn watchlist_update_overwrites_target_not_trigger() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_watchlist_entry(&WatchlistEntry::new("u1", "ABC", 100.0, Direction::Above))
            .unwrap();
        store.mark_watchlist_triggered("u1", "ABC").unwrap();
        store
            .upsert_watchlist_entry(&WatchlistEntry::new("u1", "ABC", 80.0, Direction::Below))
            .unwrap();

        let entries = store.get_user_watchlist("u1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].price_target, 80.0);
        assert_eq!(entries[0].direction, Direction::Below);
        assert!(entries[0].triggered);
    }

    #[test]
    fn open_on_disk_persists_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stockbot.db");

        {
            let store = Store::open(&path).unwrap();
            store.add_tracked_symbol("ABC").unwrap();
        }

        let store = Store::open(&path).unwrap();
        assert!(store.is_tracked("ABC").unwrap());
    }
}
