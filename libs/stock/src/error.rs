use thiserror::Error;

/// Errors surfaced by the stock library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Market data error: {0}")]
    MarketData(String),

    #[error("Chart error: {0}")]
    Chart(String),

    #[error("No data: {0}")]
    NoData(String),

    #[error("Unsupported period: {0}")]
    UnsupportedPeriod(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Task error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;
