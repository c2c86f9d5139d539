//! REST client for option chains and one-minute history.
//!
//! Both endpoints wrap their payload in `{"status": "success", "data": ...}`.
//! History candles arrive newest first as positional arrays
//! `[timestamp, open, high, low, close, volume, open_interest]`.

use crate::{
    candle::{Bar, InstrumentKey, OptionChainEntry},
    collaborator::{HistorySource, OptionChainSource},
    error::ApiError,
};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ChainStrike {
    strike_price: Decimal,
    call_options: ChainLeg,
    put_options: ChainLeg,
}

#[derive(Debug, Deserialize)]
struct ChainLeg {
    instrument_key: InstrumentKey,
}

impl From<ChainStrike> for OptionChainEntry {
    fn from(strike: ChainStrike) -> Self {
        Self {
            strike_price: strike.strike_price,
            call_instrument_key: strike.call_options.instrument_key,
            put_instrument_key: strike.put_options.instrument_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryData {
    candles: Vec<HistoryCandle>,
}

#[derive(Debug, Deserialize)]
struct HistoryCandle(
    DateTime<FixedOffset>, // 0: Open time
    f64,                   // 1: Open
    f64,                   // 2: High
    f64,                   // 3: Low
    f64,                   // 4: Close
    f64,                   // 5: Volume
    f64,                   // 6: Open interest
);

impl HistoryCandle {
    fn into_bar(self, instrument_key: &InstrumentKey) -> Bar {
        Bar {
            instrument_key: instrument_key.clone(),
            timestamp: self.0.with_timezone(&Utc),
            open: self.1,
            high: self.2,
            low: self.3,
            close: self.4,
            volume: self.5,
        }
    }
}

/// Market data REST API client implementing [`OptionChainSource`] and [`HistorySource`].
#[derive(Debug, Clone)]
pub struct HttpMarketApi {
    client: reqwest::Client,
    base_url: Url,
    access_token: Option<String>,
    timeout: Duration,
}

impl HttpMarketApi {
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            access_token: None,
            timeout,
        }
    }

    /// Send `token` as a bearer token with every request.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Url(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let mut request = self
            .client
            .get(url.clone())
            .query(query)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.timeout);

        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(ApiError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let envelope: Envelope<T> = response.json().await?;
        unwrap_envelope(envelope)
    }
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, ApiError> {
    match envelope {
        Envelope {
            status,
            data: Some(data),
        } if status == "success" => Ok(data),
        Envelope { status, .. } => Err(ApiError::Upstream(status)),
    }
}

fn parse_chain(strikes: Vec<ChainStrike>) -> Vec<OptionChainEntry> {
    strikes.into_iter().map(OptionChainEntry::from).collect()
}

fn parse_history(data: HistoryData, instrument_key: &InstrumentKey) -> Vec<Bar> {
    let mut bars: Vec<Bar> = data
        .candles
        .into_iter()
        .map(|candle| candle.into_bar(instrument_key))
        .collect();

    bars.sort_by_key(|bar| bar.timestamp);
    bars
}

#[async_trait]
impl OptionChainSource for HttpMarketApi {
    async fn fetch_option_chain(
        &self,
        index_key: &InstrumentKey,
        expiry: NaiveDate,
    ) -> Result<Vec<OptionChainEntry>, ApiError> {
        let url = self.endpoint(&["option", "chain"])?;
        let query = [
            ("instrument_key", index_key.to_string()),
            ("expiry_date", expiry.format("%Y-%m-%d").to_string()),
        ];

        let strikes: Vec<ChainStrike> = self.get(url, &query).await?;
        debug!(index = %index_key, %expiry, strikes = strikes.len(), "fetched option chain");

        Ok(parse_chain(strikes))
    }
}

#[async_trait]
impl HistorySource for HttpMarketApi {
    async fn fetch_history(&self, instrument_key: &InstrumentKey) -> Result<Vec<Bar>, ApiError> {
        let url = self.endpoint(&[
            "historical-candle",
            "intraday",
            instrument_key.as_str(),
            "1minute",
        ])?;

        let data: HistoryData = self.get(url, &[]).await?;
        let bars = parse_history(data, instrument_key);
        debug!(instrument = %instrument_key, bars = bars.len(), "fetched intraday history");

        Ok(bars)
    }
}
