//! Reconcile history snapshots and incremental bars into a candle series.
//!
//! The history channel is authoritative for the timestamps it reports: a bar with the
//! same timestamp as the newest candle replaces it outright.

use crate::{
    candle::{Bar, Candle},
    series::{CANDLE_CAPACITY, CandleSeries},
};

/// What applying an incremental bar did to the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarOutcome {
    Appended,
    Replaced,
    /// Bar predates the newest candle and was dropped.
    Stale,
}

/// Build a fresh series from a history snapshot, preserving the given order.
///
/// The snapshot is trusted as-is; the capacity only applies to later appends.
pub fn bootstrap(bars: &[Bar]) -> CandleSeries {
    CandleSeries::from_unbounded(CANDLE_CAPACITY, bars.iter().map(Candle::from))
}

/// Apply one incremental bar, returning the updated series.
pub fn apply_bar(mut series: CandleSeries, bar: &Bar) -> (CandleSeries, BarOutcome) {
    let outcome = merge(&mut series, bar);
    (series, outcome)
}

/// In-place variant of [`apply_bar`] for the exclusive owner of a series.
pub fn merge(series: &mut CandleSeries, bar: &Bar) -> BarOutcome {
    let candle = Candle::from(bar);

    match series.last().map(|last| last.timestamp) {
        Some(last) if last == candle.timestamp => {
            series.replace_last(candle);
            BarOutcome::Replaced
        }
        Some(last) if last > candle.timestamp => BarOutcome::Stale,
        _ => {
            series.push(candle);
            BarOutcome::Appended
        }
    }
}
