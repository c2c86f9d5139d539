/// ATM Candles - one-minute candle and put-call-ratio tracking
///
/// Maintains live one-minute candle series for an index and the call/put option pair at
/// its at-the-money strike, plus a rolling put-call-ratio history. The ATM pair follows
/// the index: whenever the latest index close rounds to a new strike the option chain is
/// consulted and the live subscription set is replaced.
///
/// The crate is split into:
/// - Pure series transforms: tick aggregation, snapshot reconciliation and PCR history
/// - ATM selection and subscription tracking
/// - A single-writer [`Engine`] state machine and the async [`Runtime`] that drives it
/// - Collaborators: REST option chain/history client and the WebSocket live feed
pub mod candle;
pub mod collaborator;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod http;
pub mod pcr;
pub mod runtime;
pub mod series;
pub mod snapshot;
pub mod subscription;
pub mod tick;

// Re-export commonly used types for convenience
pub use candle::{Bar, Candle, InstrumentKey, OptionChainEntry, PcrSample, Tick};
pub use series::{BoundedSeries, CANDLE_CAPACITY, CandleSeries, PCR_CAPACITY, PcrSeries};
pub use subscription::{InstrumentRole, InstrumentSelection};

pub use engine::{Engine, EngineCommand, EngineEvent, EngineSnapshot, HistoryUpdate, SessionId};
pub use runtime::{Collaborators, EngineHandle, Runtime};

pub use config::Config;
pub use error::{ApiError, ConfigError, FeedError};
pub use feed::{ConnectionStatus, FeedSubscriptions, spawn_feed};
pub use http::HttpMarketApi;
