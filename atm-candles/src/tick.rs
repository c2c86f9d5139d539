//! Fold raw ticks into one-minute candles.
//!
//! Tick-built candles carry no volume: the tick channel has no trade size, so
//! `volume` stays at zero. Bar-built candles (see [`crate::snapshot`]) do carry volume.

use crate::{
    candle::{Candle, Tick, floor_to_minute},
    series::CandleSeries,
};

/// What folding a tick did to the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Tick opened a new minute bucket.
    Opened,
    /// Tick updated the newest candle.
    Merged,
    /// Tick belonged to a bucket older than the newest candle and was dropped.
    Late,
}

/// Fold `tick` into `series`, returning the updated series.
///
/// The previous series is consumed; callers replace their reference with the result.
pub fn apply(mut series: CandleSeries, tick: &Tick) -> (CandleSeries, TickOutcome) {
    let outcome = fold(&mut series, tick);
    (series, outcome)
}

/// In-place variant of [`apply`] for the exclusive owner of a series.
pub fn fold(series: &mut CandleSeries, tick: &Tick) -> TickOutcome {
    let bucket_start = floor_to_minute(tick.timestamp);
    let price = tick.last_price;

    let Some(last) = series.last().copied() else {
        series.push(Candle::from_price(bucket_start, price));
        return TickOutcome::Opened;
    };

    let last_bucket = floor_to_minute(last.timestamp);

    if bucket_start > last_bucket {
        series.push(Candle::from_price(bucket_start, price));
        TickOutcome::Opened
    } else if bucket_start == last_bucket {
        series.replace_last(Candle {
            close: price,
            high: last.high.max(price),
            low: last.low.min(price),
            ..last
        });
        TickOutcome::Merged
    } else {
        TickOutcome::Late
    }
}
