//! Deduplicated, bounded put-call ratio history.

use crate::{candle::PcrSample, series::PcrSeries};

/// What appending a sample did to the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcrOutcome {
    Appended,
    /// Same timestamp as the newest sample; first write wins.
    Duplicate,
    /// Older than the newest sample.
    OutOfOrder,
}

/// Append `sample`, returning the updated series.
pub fn append(mut series: PcrSeries, sample: PcrSample) -> (PcrSeries, PcrOutcome) {
    let outcome = record(&mut series, sample);
    (series, outcome)
}

/// In-place variant of [`append`] for the exclusive owner of a series.
pub fn record(series: &mut PcrSeries, sample: PcrSample) -> PcrOutcome {
    match series.last().map(|last| last.timestamp) {
        Some(last) if last == sample.timestamp => PcrOutcome::Duplicate,
        Some(last) if last > sample.timestamp => PcrOutcome::OutOfOrder,
        _ => {
            series.push(sample);
            PcrOutcome::Appended
        }
    }
}
