//! Capacity-bounded, append-only time series.

use crate::candle::{Candle, PcrSample};
use std::collections::VecDeque;

/// Maximum number of one-minute candles kept per instrument.
pub const CANDLE_CAPACITY: usize = 500;

/// Maximum number of PCR samples kept.
pub const PCR_CAPACITY: usize = 1000;

/// Per-instrument one-minute candle history.
pub type CandleSeries = BoundedSeries<Candle>;

/// Put-call ratio history.
pub type PcrSeries = BoundedSeries<PcrSample>;

/// Ring buffer that evicts its oldest entries once `capacity` is exceeded.
///
/// Eviction only happens on [`push`](Self::push), so a series seeded through
/// [`from_unbounded`](Self::from_unbounded) may temporarily hold more than `capacity`
/// entries until the next append trims it.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedSeries<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> BoundedSeries<T> {
    /// Create an empty series with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// Seed a series verbatim, without enforcing the capacity.
    pub fn from_unbounded(capacity: usize, items: impl IntoIterator<Item = T>) -> Self {
        Self {
            capacity,
            items: items.into_iter().collect(),
        }
    }

    /// Append a new entry, dropping the oldest entries to respect the capacity.
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    /// Overwrite the newest entry. Returns `false` if the series is empty.
    pub fn replace_last(&mut self, item: T) -> bool {
        match self.items.back_mut() {
            Some(last) => {
                *last = item;
                true
            }
            None => false,
        }
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn first(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }
}

impl<T: Clone> BoundedSeries<T> {
    /// Owned copy of the entries in chronological order.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl CandleSeries {
    /// Empty candle series with the default capacity.
    pub fn candles() -> Self {
        Self::new(CANDLE_CAPACITY)
    }

    /// Close of the newest candle, if any.
    pub fn latest_close(&self) -> Option<f64> {
        self.last().map(|candle| candle.close)
    }
}

impl PcrSeries {
    /// Empty PCR series with the default capacity.
    pub fn pcr() -> Self {
        Self::new(PCR_CAPACITY)
    }
}
