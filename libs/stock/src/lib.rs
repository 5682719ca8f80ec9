mod error;
mod market;
mod price_client;

pub mod alerts;
pub mod chart;
pub mod period;
pub mod render;
pub mod store;
pub mod tracking;

pub use alerts::{AlertChecker, AlertReport, Notifier};
pub use error::{Error, Result};
pub use market::{Interval, MarketData, PriceData, PriceHistory, Quote};
pub use period::Period;
pub use price_client::{DEFAULT_BASE_API, PriceClient};
pub use render::{ChartRenderer, HoldingCard, StockCard};
pub use store::Store;
pub use tracking::{Pacer, TrackOutcome, Tracker};
