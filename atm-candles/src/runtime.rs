//! Async driver owning the [`Engine`].
//!
//! One task drains a single event queue and applies events in arrival order. Commands
//! emitted by the engine are executed here: subscription replacements go straight to the
//! [`SubscriptionSink`], chain and history fetches are spawned and post their results back
//! into the same queue tagged with the session that requested them.

use crate::{
    collaborator::{HistorySource, OptionChainSource, SubscriptionSink},
    engine::{Engine, EngineCommand, EngineEvent, EngineSnapshot, HistoryUpdate, SessionId},
    error::FeedError,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Cloneable handle for posting events and observing engine state.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    events: mpsc::Sender<EngineEvent>,
    session: watch::Receiver<Option<SessionId>>,
    snapshots: watch::Receiver<Option<EngineSnapshot>>,
}

impl EngineHandle {
    /// Queue an event, waiting for capacity.
    pub async fn send(&self, event: EngineEvent) -> Result<(), FeedError> {
        self.events
            .send(event)
            .await
            .map_err(|_| FeedError::EngineClosed)
    }

    /// Session that newly produced events should be tagged with.
    pub fn current_session(&self) -> Option<SessionId> {
        *self.session.borrow()
    }

    /// Receiver of the latest engine snapshot, updated after every event that changed state.
    pub fn snapshots(&self) -> watch::Receiver<Option<EngineSnapshot>> {
        self.snapshots.clone()
    }
}

/// External collaborators the runtime executes commands against.
pub struct Collaborators {
    pub chains: Arc<dyn OptionChainSource>,
    pub history: Arc<dyn HistorySource>,
    pub subscriptions: Arc<dyn SubscriptionSink>,
}

/// See module docs.
pub struct Runtime {
    engine: Engine,
    events_rx: mpsc::Receiver<EngineEvent>,
    events_tx: mpsc::WeakSender<EngineEvent>,
    session_tx: watch::Sender<Option<SessionId>>,
    snapshot_tx: watch::Sender<Option<EngineSnapshot>>,
    collaborators: Collaborators,
}

impl Runtime {
    /// Create a runtime with an event queue holding at most `queue_size` events.
    ///
    /// The runtime only keeps a weak reference to its own queue: [`Runtime::run`] returns
    /// once every [`EngineHandle`] and in-flight fetch has been dropped.
    pub fn new(queue_size: usize, collaborators: Collaborators) -> (Self, EngineHandle) {
        let (events_tx, events_rx) = mpsc::channel(queue_size);
        let (session_tx, session_rx) = watch::channel(None);
        let (snapshot_tx, snapshot_rx) = watch::channel(None);

        let runtime = Self {
            engine: Engine::new(),
            events_rx,
            events_tx: events_tx.downgrade(),
            session_tx,
            snapshot_tx,
            collaborators,
        };

        let handle = EngineHandle {
            events: events_tx,
            session: session_rx,
            snapshots: snapshot_rx,
        };

        (runtime, handle)
    }

    pub async fn run(mut self) {
        info!("engine runtime started");

        let mut published = self.engine.revision();
        while let Some(event) = self.events_rx.recv().await {
            let commands = self.engine.process(event);
            for command in commands {
                self.execute(command);
            }

            self.session_tx.send_if_modified(|session| {
                let current = self.engine.session_id();
                let modified = *session != current;
                *session = current;
                modified
            });

            if self.engine.revision() != published {
                published = self.engine.revision();
                self.snapshot_tx.send_replace(self.engine.snapshot());
            }
        }

        info!("engine event queue closed, runtime stopping");
    }

    fn execute(&self, command: EngineCommand) {
        match command {
            EngineCommand::ReplaceSubscriptions { keys } => {
                if let Err(error) = self.collaborators.subscriptions.replace_subscriptions(keys) {
                    error!(%error, "failed to send subscription replacement");
                }
            }
            EngineCommand::FetchOptionChain {
                session,
                index_key,
                expiry,
                strike,
            } => {
                let Some(events) = self.events_tx.upgrade() else {
                    return;
                };
                let chains = Arc::clone(&self.collaborators.chains);

                tokio::spawn(async move {
                    match chains.fetch_option_chain(&index_key, expiry).await {
                        Ok(entries) => {
                            let event = EngineEvent::OptionChain {
                                session,
                                strike,
                                entries,
                            };
                            if events.send(event).await.is_err() {
                                debug!("engine stopped before option chain was delivered");
                            }
                        }
                        Err(error) => {
                            warn!(index = %index_key, %expiry, %strike, %error, "option chain fetch failed");
                        }
                    }
                });
            }
            EngineCommand::FetchHistory {
                session,
                instrument_key,
            } => {
                let Some(events) = self.events_tx.upgrade() else {
                    return;
                };
                let history = Arc::clone(&self.collaborators.history);

                tokio::spawn(async move {
                    match history.fetch_history(&instrument_key).await {
                        Ok(bars) => {
                            let event = EngineEvent::History {
                                session,
                                instrument_key,
                                update: HistoryUpdate::Bootstrap(bars),
                            };
                            if events.send(event).await.is_err() {
                                debug!("engine stopped before history was delivered");
                            }
                        }
                        Err(error) => {
                            warn!(instrument = %instrument_key, %error, "history fetch failed");
                        }
                    }
                });
            }
        }
    }
}
