use rusqlite::Connection;
use tracing::info;

use crate::Result;

/// Apply every migration that is not yet recorded in `migrations`.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    run_migration(conn, "001_tracked_stocks", CREATE_TRACKED_STOCKS_TABLE)?;
    run_migration(conn, "002_stock_prices", CREATE_STOCK_PRICES_TABLE)?;
    run_migration(conn, "003_portfolios", CREATE_PORTFOLIOS_TABLE)?;
    run_migration(conn, "004_watchlists", CREATE_WATCHLISTS_TABLE)?;

    Ok(())
}

fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM migrations WHERE name = ?1)",
        [name],
        |row| row.get(0),
    )?;

    if !exists {
        info!(migration = name, "applying migration");
        conn.execute_batch(sql)?;
        conn.execute("INSERT INTO migrations (name) VALUES (?1)", [name])?;
    }

    Ok(())
}

const CREATE_TRACKED_STOCKS_TABLE: &str = r#"
CREATE TABLE tracked_stocks (
    symbol TEXT PRIMARY KEY
);
"#;

const CREATE_STOCK_PRICES_TABLE: &str = r#"
CREATE TABLE stock_prices (
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (symbol, date)
);
"#;

const CREATE_PORTFOLIOS_TABLE: &str = r#"
CREATE TABLE portfolios (
    user_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    shares REAL NOT NULL,
    PRIMARY KEY (user_id, symbol)
);
"#;

const CREATE_WATCHLISTS_TABLE: &str = r#"
CREATE TABLE watchlists (
    user_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    price_target REAL NOT NULL,
    direction INTEGER NOT NULL,
    triggered INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (user_id, symbol)
);
CREATE INDEX IF NOT EXISTS idx_watchlists_triggered ON watchlists(triggered);
"#;
