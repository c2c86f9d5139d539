//! Single-writer engine routing market events to the candle, PCR and subscription logic.
//!
//! Every event is tagged with the [`SessionId`] it was produced for. A reset starts a new
//! session and replaces all state wholesale, so anything still in flight for an older
//! session (late ticks, slow chain lookups, history fetches) is discarded on arrival.
//!
//! [`Engine::process`] never performs I/O. It returns [`EngineCommand`]s for the caller
//! to execute against the feed and market API collaborators.

use crate::{
    candle::{Bar, Candle, InstrumentKey, OptionChainEntry, PcrSample, Tick},
    pcr::{self, PcrOutcome},
    series::{CandleSeries, PcrSeries},
    snapshot::{self, BarOutcome},
    subscription::{self, InstrumentRole, InstrumentSelection},
    tick::{self, TickOutcome},
};
use chrono::NaiveDate;
use fnv::FnvHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Identity of one tracking session (one index + expiry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Payload of the history channel.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryUpdate {
    /// Full replacement of the series.
    Bootstrap(Vec<Bar>),
    /// One bar for the newest (or next) minute.
    Incremental(Bar),
}

/// Input to the [`Engine`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Start tracking a new index/expiry, discarding all state.
    Reset {
        index_key: InstrumentKey,
        step: Decimal,
        expiry: NaiveDate,
    },
    Tick {
        session: SessionId,
        tick: Tick,
    },
    History {
        session: SessionId,
        instrument_key: InstrumentKey,
        update: HistoryUpdate,
    },
    Pcr {
        session: SessionId,
        index_key: InstrumentKey,
        sample: PcrSample,
    },
    /// Completed option chain lookup requested for `strike`.
    OptionChain {
        session: SessionId,
        strike: Decimal,
        entries: Vec<OptionChainEntry>,
    },
}

/// Output of the [`Engine`] for external collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    /// Replace the upstream subscription set with `keys`.
    ReplaceSubscriptions { keys: Vec<InstrumentKey> },
    FetchOptionChain {
        session: SessionId,
        index_key: InstrumentKey,
        expiry: NaiveDate,
        strike: Decimal,
    },
    FetchHistory {
        session: SessionId,
        instrument_key: InstrumentKey,
    },
}

/// Which live channel feeds an instrument's series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LivePath {
    Ticks,
    Bars,
}

#[derive(Debug)]
struct InstrumentFeed {
    series: CandleSeries,
    live: Option<LivePath>,
}

impl InstrumentFeed {
    fn new() -> Self {
        Self {
            series: CandleSeries::candles(),
            live: None,
        }
    }

    /// First live path wins until the next bootstrap.
    fn claim(&mut self, path: LivePath) -> bool {
        match self.live {
            Some(current) => current == path,
            None => {
                self.live = Some(path);
                true
            }
        }
    }
}

#[derive(Debug)]
struct Session {
    id: SessionId,
    step: Decimal,
    expiry: NaiveDate,
    selection: InstrumentSelection,
    feeds: FnvHashMap<InstrumentKey, InstrumentFeed>,
    pcr: PcrSeries,
}

impl Session {
    fn new(id: SessionId, index_key: InstrumentKey, step: Decimal, expiry: NaiveDate) -> Self {
        let mut feeds = FnvHashMap::default();
        feeds.insert(index_key.clone(), InstrumentFeed::new());

        Self {
            id,
            step,
            expiry,
            selection: InstrumentSelection::new(index_key),
            feeds,
            pcr: PcrSeries::pcr(),
        }
    }

    /// Feed for a key in the current selection, creating it if needed.
    fn feed_mut(&mut self, key: &InstrumentKey) -> Option<(InstrumentRole, &mut InstrumentFeed)> {
        let role = self.selection.role_of(key)?;
        let feed = self.feeds.entry(key.clone()).or_insert_with(InstrumentFeed::new);
        Some((role, feed))
    }

    fn index_close(&self) -> Option<f64> {
        self.feeds
            .get(&self.selection.index_key)
            .and_then(|feed| feed.series.latest_close())
    }

    /// Recompute ATM if the index close moved away from `before`.
    fn on_index_updated(&mut self, before: Option<f64>) -> Vec<EngineCommand> {
        let Some(close) = self.index_close() else {
            return vec![];
        };
        if before == Some(close) {
            return vec![];
        }

        match subscription::on_index_candle_updated(&mut self.selection, close, self.step) {
            Some(change) => {
                info!(
                    session = %self.id,
                    index = %self.selection.index_key,
                    close,
                    previous = ?change.previous,
                    strike = %change.strike,
                    "ATM strike changed, requesting option chain"
                );
                vec![EngineCommand::FetchOptionChain {
                    session: self.id,
                    index_key: self.selection.index_key.clone(),
                    expiry: self.expiry,
                    strike: change.strike,
                }]
            }
            None => vec![],
        }
    }
}

/// Owned view of the engine state for presentation subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub session: SessionId,
    pub selection: InstrumentSelection,
    pub index: Vec<Candle>,
    pub call: Vec<Candle>,
    pub put: Vec<Candle>,
    pub pcr: Vec<PcrSample>,
}

/// See module docs.
#[derive(Debug, Default)]
pub struct Engine {
    sessions_started: u64,
    revision: u64,
    session: Option<Session>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current session, if a [`EngineEvent::Reset`] has been processed.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|session| session.id)
    }

    /// Counter bumped whenever tracked state changes.
    ///
    /// Events that are dropped leave it untouched, so an unchanged revision means the
    /// previous [`Engine::snapshot`] is still current.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn selection(&self) -> Option<&InstrumentSelection> {
        self.session.as_ref().map(|session| &session.selection)
    }

    /// Candle series of a currently tracked instrument.
    pub fn series(&self, key: &str) -> Option<&CandleSeries> {
        self.session
            .as_ref()
            .and_then(|session| session.feeds.get(key))
            .map(|feed| &feed.series)
    }

    pub fn pcr_series(&self) -> Option<&PcrSeries> {
        self.session.as_ref().map(|session| &session.pcr)
    }

    pub fn process(&mut self, event: EngineEvent) -> Vec<EngineCommand> {
        match event {
            EngineEvent::Reset {
                index_key,
                step,
                expiry,
            } => self.reset(index_key, step, expiry),
            EngineEvent::Tick { session, tick } => self.on_tick(session, tick),
            EngineEvent::History {
                session,
                instrument_key,
                update,
            } => self.on_history(session, instrument_key, update),
            EngineEvent::Pcr {
                session,
                index_key,
                sample,
            } => self.on_pcr(session, index_key, sample),
            EngineEvent::OptionChain {
                session,
                strike,
                entries,
            } => self.on_option_chain(session, strike, entries),
        }
    }

    pub fn snapshot(&self) -> Option<EngineSnapshot> {
        let session = self.session.as_ref()?;
        let candles = |key: Option<&InstrumentKey>| {
            key.and_then(|key| session.feeds.get(key))
                .map(|feed| feed.series.to_vec())
                .unwrap_or_default()
        };

        Some(EngineSnapshot {
            session: session.id,
            selection: session.selection.clone(),
            index: candles(Some(&session.selection.index_key)),
            call: candles(session.selection.call_key.as_ref()),
            put: candles(session.selection.put_key.as_ref()),
            pcr: session.pcr.to_vec(),
        })
    }

    fn reset(
        &mut self,
        index_key: InstrumentKey,
        step: Decimal,
        expiry: NaiveDate,
    ) -> Vec<EngineCommand> {
        self.sessions_started += 1;
        let id = SessionId(self.sessions_started);

        info!(%id, index = %index_key, %step, %expiry, "starting tracking session");

        let session = Session::new(id, index_key.clone(), step, expiry);
        let keys = session.selection.subscription_keys();
        self.session = Some(session);
        self.revision += 1;

        vec![
            EngineCommand::ReplaceSubscriptions { keys },
            EngineCommand::FetchHistory {
                session: id,
                instrument_key: index_key,
            },
        ]
    }

    /// Current session if `tag` matches it.
    fn current(&mut self, tag: SessionId, what: &'static str) -> Option<&mut Session> {
        match self.session.as_mut() {
            Some(session) if session.id == tag => Some(session),
            current => {
                debug!(
                    event = what,
                    %tag,
                    current = ?current.map(|session| session.id),
                    "discarding event for inactive session"
                );
                None
            }
        }
    }

    fn on_tick(&mut self, tag: SessionId, tick: Tick) -> Vec<EngineCommand> {
        if !tick.last_price.is_finite() || tick.last_price <= 0.0 {
            debug!(instrument = %tick.instrument_key, price = tick.last_price, "dropping invalid tick");
            return vec![];
        }

        let Some(session) = self.current(tag, "tick") else {
            return vec![];
        };
        let before = session.index_close();

        let Some((role, feed)) = session.feed_mut(&tick.instrument_key) else {
            debug!(instrument = %tick.instrument_key, "dropping tick for untracked instrument");
            return vec![];
        };

        if !feed.claim(LivePath::Ticks) {
            warn!(instrument = %tick.instrument_key, "dropping tick for bar-fed instrument");
            return vec![];
        }

        if tick::fold(&mut feed.series, &tick) == TickOutcome::Late {
            debug!(
                instrument = %tick.instrument_key,
                timestamp = %tick.timestamp,
                "dropping tick older than the current candle"
            );
            return vec![];
        }

        let commands = match role {
            InstrumentRole::Index => session.on_index_updated(before),
            InstrumentRole::Call | InstrumentRole::Put => vec![],
        };
        self.revision += 1;
        commands
    }

    fn on_history(
        &mut self,
        tag: SessionId,
        instrument_key: InstrumentKey,
        update: HistoryUpdate,
    ) -> Vec<EngineCommand> {
        let Some(session) = self.current(tag, "history") else {
            return vec![];
        };
        let before = session.index_close();

        let Some((role, feed)) = session.feed_mut(&instrument_key) else {
            debug!(instrument = %instrument_key, "dropping history for untracked instrument");
            return vec![];
        };

        match update {
            HistoryUpdate::Bootstrap(bars) => {
                debug!(instrument = %instrument_key, bars = bars.len(), "bootstrapping candle series");
                feed.series = snapshot::bootstrap(&bars);
                feed.live = None;
            }
            HistoryUpdate::Incremental(bar) => {
                if !feed.claim(LivePath::Bars) {
                    warn!(instrument = %instrument_key, "dropping bar for tick-fed instrument");
                    return vec![];
                }
                if snapshot::merge(&mut feed.series, &bar) == BarOutcome::Stale {
                    debug!(
                        instrument = %instrument_key,
                        timestamp = %bar.timestamp,
                        "dropping bar older than the current candle"
                    );
                    return vec![];
                }
            }
        }

        let commands = match role {
            InstrumentRole::Index => session.on_index_updated(before),
            InstrumentRole::Call | InstrumentRole::Put => vec![],
        };
        self.revision += 1;
        commands
    }

    fn on_pcr(
        &mut self,
        tag: SessionId,
        index_key: InstrumentKey,
        sample: PcrSample,
    ) -> Vec<EngineCommand> {
        if !sample.pcr.is_finite() || sample.pcr < 0.0 {
            debug!(pcr = sample.pcr, "dropping invalid PCR sample");
            return vec![];
        }

        let Some(session) = self.current(tag, "pcr") else {
            return vec![];
        };

        if session.selection.index_key != index_key {
            debug!(index = %index_key, "dropping PCR sample for untracked index");
            return vec![];
        }

        match pcr::record(&mut session.pcr, sample) {
            PcrOutcome::Appended => self.revision += 1,
            PcrOutcome::Duplicate => {
                debug!(timestamp = %sample.timestamp, "dropping duplicate PCR sample")
            }
            PcrOutcome::OutOfOrder => {
                debug!(timestamp = %sample.timestamp, "dropping out-of-order PCR sample")
            }
        }

        vec![]
    }

    fn on_option_chain(
        &mut self,
        tag: SessionId,
        strike: Decimal,
        entries: Vec<OptionChainEntry>,
    ) -> Vec<EngineCommand> {
        let Some(session) = self.current(tag, "option_chain") else {
            return vec![];
        };

        if session.selection.atm_strike != Some(strike) {
            debug!(
                %strike,
                current = ?session.selection.atm_strike,
                "discarding option chain for superseded strike"
            );
            return vec![];
        }

        let Some(pair) = subscription::resolve_atm(&entries, strike) else {
            warn!(
                %strike,
                entries = entries.len(),
                "ATM strike missing from option chain, keeping current options"
            );
            return vec![];
        };

        let previous_keys = session.selection.subscription_keys();
        let adoption = subscription::adopt(&mut session.selection, pair);

        // A repeated lookup for the same strike resolves to the keys already tracked
        if adoption.keys == previous_keys {
            debug!(%strike, "option chain confirms current ATM options");
            return vec![];
        }

        for key in &adoption.removed {
            session.feeds.remove(key);
        }

        info!(
            id = %session.id,
            %strike,
            keys = ?adoption.keys,
            "replacing subscriptions for new ATM options"
        );

        let mut commands = vec![EngineCommand::ReplaceSubscriptions {
            keys: adoption.keys,
        }];

        for key in adoption.added {
            session.feeds.insert(key.clone(), InstrumentFeed::new());
            commands.push(EngineCommand::FetchHistory {
                session: session.id,
                instrument_key: key,
            });
        }

        self.revision += 1;
        commands
    }
}
