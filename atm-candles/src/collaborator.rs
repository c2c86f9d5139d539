//! Seams to the systems the engine depends on but does not own.

use crate::{
    candle::{Bar, InstrumentKey, OptionChainEntry},
    error::{ApiError, FeedError},
};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Fetches the option chain of an index for one expiry.
#[async_trait]
pub trait OptionChainSource: Send + Sync {
    async fn fetch_option_chain(
        &self,
        index_key: &InstrumentKey,
        expiry: NaiveDate,
    ) -> Result<Vec<OptionChainEntry>, ApiError>;
}

/// Fetches one-minute history for an instrument, oldest bar first.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch_history(&self, instrument_key: &InstrumentKey) -> Result<Vec<Bar>, ApiError>;
}

/// Receives subscription-set replacements.
///
/// Fire and forget: implementations must not block, and the engine treats a failed
/// send as non-fatal.
pub trait SubscriptionSink: Send + Sync {
    fn replace_subscriptions(&self, keys: Vec<InstrumentKey>) -> Result<(), FeedError>;
}
