//! Core market data types shared by the aggregation paths.
//!
//! Prices are `f64` (as received from the feed), strikes are [`Decimal`] so that
//! strike lookups can demand an exact match.

use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Upstream instrument identifier (eg/ "NSE_INDEX|Nifty 50", "NSE_FO|45450").
pub type InstrumentKey = SmolStr;

/// One-minute OHLCV candle.
///
/// `timestamp` is the start of the minute the candle covers.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Open a fresh candle from a single price. Volume starts at zero.
    pub fn from_price(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }
}

/// Single real-time price update for one instrument.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Tick {
    pub instrument_key: InstrumentKey,
    pub last_price: f64,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    pub fn new(
        instrument_key: impl Into<InstrumentKey>,
        last_price: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            instrument_key: instrument_key.into(),
            last_price,
            timestamp,
        }
    }
}

/// Pre-aggregated OHLCV record delivered by the history channel.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Bar {
    pub instrument_key: InstrumentKey,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl From<&Bar> for Candle {
    fn from(bar: &Bar) -> Self {
        Self {
            timestamp: bar.timestamp,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }
}

impl From<Bar> for Candle {
    fn from(bar: Bar) -> Self {
        Self::from(&bar)
    }
}

/// Put-call ratio observation.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct PcrSample {
    pub timestamp: DateTime<Utc>,
    pub pcr: f64,
}

impl PcrSample {
    pub fn new(timestamp: DateTime<Utc>, pcr: f64) -> Self {
        Self { timestamp, pcr }
    }

    /// Derive a sample from aggregate put and call open interest.
    ///
    /// Returns `None` when the ratio is undefined (no call OI) or the inputs are not
    /// finite non-negative numbers. The ratio is rounded to 2dp, which is all the
    /// sentiment signal needs.
    pub fn from_open_interest(timestamp: DateTime<Utc>, put_oi: f64, call_oi: f64) -> Option<Self> {
        if !put_oi.is_finite() || !call_oi.is_finite() || put_oi < 0.0 || call_oi <= 0.0 {
            return None;
        }

        let pcr = (put_oi / call_oi * 100.0).round() / 100.0;
        Some(Self { timestamp, pcr })
    }
}

/// One strike of an option chain for a given expiry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OptionChainEntry {
    pub strike_price: Decimal,
    pub call_instrument_key: InstrumentKey,
    pub put_instrument_key: InstrumentKey,
}

/// Truncate a timestamp to the start of its minute.
pub fn floor_to_minute(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_floor_to_minute() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 3, 9, 15, 42).unwrap()
            + chrono::Duration::milliseconds(731);

        assert_eq!(
            floor_to_minute(ts),
            Utc.with_ymd_and_hms(2024, 6, 3, 9, 15, 0).unwrap()
        );

        let aligned = Utc.with_ymd_and_hms(2024, 6, 3, 9, 16, 0).unwrap();
        assert_eq!(floor_to_minute(aligned), aligned);
    }

    #[test]
    fn test_candle_from_bar_copies_verbatim() {
        let bar = Bar {
            instrument_key: "NSE_FO|45450".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 3, 9, 15, 0).unwrap(),
            open: 101.0,
            high: 104.5,
            low: 99.25,
            close: 103.0,
            volume: 1_250.0,
        };

        let candle = Candle::from(&bar);
        assert_eq!(candle.timestamp, bar.timestamp);
        assert_eq!(candle.open, 101.0);
        assert_eq!(candle.high, 104.5);
        assert_eq!(candle.low, 99.25);
        assert_eq!(candle.close, 103.0);
        assert_eq!(candle.volume, 1_250.0);
    }

    #[test]
    fn test_pcr_from_open_interest() {
        struct TestCase {
            put_oi: f64,
            call_oi: f64,
            expected: Option<f64>,
        }

        let ts = Utc.with_ymd_and_hms(2024, 6, 3, 9, 15, 0).unwrap();

        let tests = vec![
            // TC0: regular ratio rounded to 2dp
            TestCase {
                put_oi: 1_234_000.0,
                call_oi: 1_000_000.0,
                expected: Some(1.23),
            },
            // TC1: zero put OI is a valid zero ratio
            TestCase {
                put_oi: 0.0,
                call_oi: 500.0,
                expected: Some(0.0),
            },
            // TC2: zero call OI is undefined
            TestCase {
                put_oi: 500.0,
                call_oi: 0.0,
                expected: None,
            },
            // TC3: non-finite input rejected
            TestCase {
                put_oi: f64::NAN,
                call_oi: 500.0,
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = PcrSample::from_open_interest(ts, test.put_oi, test.call_oi)
                .map(|sample| sample.pcr);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
