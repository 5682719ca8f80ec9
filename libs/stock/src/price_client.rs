use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, USER_AGENT},
};
use serde::Deserialize;
use tracing::debug;

use crate::market::{Interval, MarketData, PriceData, PriceHistory, Quote};
use crate::{Error, Result};

pub const DEFAULT_BASE_API: &str = "https://query1.finance.yahoo.com";

#[derive(Clone)]
pub struct PriceClient {
    client: Client,
    base_api: String,
}

impl PriceClient {
    pub fn new(base_api: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_api: base_api.into(),
        })
    }

    fn chart_url(&self, symbol: &str) -> String {
        format!(
            "{}/v8/finance/chart/{}",
            self.base_api.trim_end_matches('/'),
            symbol
        )
    }

    async fn fetch_chart(&self, symbol: &str, query: &[(&str, String)]) -> Result<ChartResult> {
        let res: ChartResponse = self
            .client
            .get(self.chart_url(symbol))
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        res.into_result(symbol)
    }
}

#[async_trait]
impl MarketData for PriceClient {
    async fn quote(&self, symbol: &str) -> Result<Quote> {
        let result = self
            .fetch_chart(
                symbol,
                &[
                    ("range", "1d".to_string()),
                    ("interval", Interval::Day1.as_str().to_string()),
                ],
            )
            .await?;

        result.meta.to_quote()
    }

    async fn history(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
    ) -> Result<PriceHistory> {
        let result = self
            .fetch_chart(
                symbol,
                &[
                    ("period1", start.timestamp().to_string()),
                    ("period2", end.timestamp().to_string()),
                    ("interval", interval.as_str().to_string()),
                ],
            )
            .await?;

        let history = result.to_history(interval);
        debug!(symbol, points = history.len(), interval = interval.as_str(), "fetched history");
        Ok(history)
    }
}

//
// Match Yahoo Finance chart JSON
// GET /v8/finance/chart/{symbol}
//
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,

    #[serde(default)]
    timestamp: Vec<i64>,

    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    symbol: String,
    currency: Option<String>,
    exchange_name: Option<String>,
    full_exchange_name: Option<String>,
    long_name: Option<String>,
    short_name: Option<String>,
    regular_market_price: Option<f64>,
    chart_previous_close: Option<f64>,
    previous_close: Option<f64>,

    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Deserialize, Default)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl ChartResponse {
    fn into_result(self, symbol: &str) -> Result<ChartResult> {
        if let Some(err) = self.chart.error {
            return Err(Error::MarketData(format!(
                "{}: {} ({})",
                symbol, err.description, err.code
            )));
        }

        self.chart
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| Error::NoData(format!("no chart result for {symbol}")))
    }
}

impl ChartMeta {
    fn to_quote(&self) -> Result<Quote> {
        let price = self
            .regular_market_price
            .ok_or_else(|| Error::NoData(format!("no market price for {}", self.symbol)))?;

        let percent_change = match self.previous_close.or(self.chart_previous_close) {
            Some(prev) if prev != 0.0 => (price - prev) / prev * 100.0,
            _ => 0.0,
        };

        Ok(Quote {
            symbol: self.symbol.clone(),
            price,
            percent_change,
            currency: self.currency.clone().unwrap_or_default(),
            exchange: self
                .full_exchange_name
                .clone()
                .or_else(|| self.exchange_name.clone())
                .unwrap_or_default(),
            long_name: self
                .long_name
                .clone()
                .or_else(|| self.short_name.clone())
                .unwrap_or_else(|| self.symbol.clone()),
        })
    }
}

impl ChartResult {
    /// Keys are rendered in the exchange's local time so a daily bar lands on
    /// its trading date.
    fn to_history(&self, interval: Interval) -> PriceHistory {
        let mut history = PriceHistory::new();
        let Some(series) = self.indicators.quote.first() else {
            return history;
        };

        let at = |v: &Vec<Option<f64>>, i: usize| v.get(i).copied().flatten();

        for (i, &ts) in self.timestamp.iter().enumerate() {
            let Some(close) = at(&series.close, i) else {
                continue;
            };
            let Some(local) = DateTime::from_timestamp(ts + self.meta.gmtoffset, 0) else {
                continue;
            };

            history.insert(
                local.format(interval.key_format()).to_string(),
                PriceData {
                    open: at(&series.open, i).unwrap_or(close),
                    high: at(&series.high, i).unwrap_or(close),
                    low: at(&series.low, i).unwrap_or(close),
                    close,
                    volume: at(&series.volume, i).unwrap_or_default() as i64,
                },
            );
        }

        history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHART_JSON: &str = r#"{
        "chart": {
            "result": [{
                "meta": {
                    "symbol": "ABC",
                    "currency": "USD",
                    "exchangeName": "NMS",
                    "fullExchangeName": "NasdaqGS",
                    "longName": "ABC Corp",
                    "regularMarketPrice": 110.0,
                    "chartPreviousClose": 100.0,
                    "gmtoffset": -18000
                },
                "timestamp": [1704205800, 1704292200, 1704378600],
                "indicators": {
                    "quote": [{
                        "open": [99.0, null, 101.0],
                        "high": [102.0, null, 103.0],
                        "low": [98.0, null, 100.0],
                        "close": [101.0, null, 102.5],
                        "volume": [1000, null, 1200]
                    }]
                }
            }],
            "error": null
        }
    }"#;

    fn parse(json: &str) -> Result<ChartResult> {
        let res: ChartResponse = serde_json::from_str(json).unwrap();
        res.into_result("ABC")
    }

    #[test]
    fn daily_history_skips_null_closes() {
        let history = parse(CHART_JSON).unwrap().to_history(Interval::Day1);

        let keys: Vec<&str> = history.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["2024-01-02", "2024-01-04"]);
        assert_eq!(history["2024-01-04"].close, 102.5);
        assert_eq!(history["2024-01-04"].volume, 1200);
    }

    #[test]
    fn intraday_keys_carry_time() {
        let history = parse(CHART_JSON).unwrap().to_history(Interval::Minute1);
        assert!(history.contains_key("2024-01-02 09:30"));
    }

    #[test]
    fn quote_change_uses_previous_close() {
        let quote = parse(CHART_JSON).unwrap().meta.to_quote().unwrap();

        assert_eq!(quote.price, 110.0);
        assert!((quote.percent_change - 10.0).abs() < 1e-9);
        assert_eq!(quote.exchange, "NasdaqGS");
        assert_eq!(quote.long_name, "ABC Corp");
    }

    #[test]
    fn provider_error_is_reported() {
        let json = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;

        match parse(json) {
            Err(Error::MarketData(msg)) => assert!(msg.contains("delisted")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
