//! Reconnecting WebSocket feed delivering ticks, bars and PCR samples.
//!
//! Incoming messages are JSON objects tagged by `type`:
//! - `tick`: `{"instrument_key", "ltp", "ts"}`
//! - `bars`: `{"instrument_key", "bars": [{"ts", "open", "high", "low", "close", "volume"}]}`
//! - `bar`: `{"instrument_key", "ts", "open", "high", "low", "close", "volume"}`
//! - `pcr`: `{"index_key", "ts", "pcr"}` or `{"index_key", "ts", "put_oi", "call_oi"}`
//!
//! `ts` is epoch milliseconds. Messages that fail to decode are dropped here and never
//! reach the engine.
//!
//! Subscriptions are sent as `{"type": "subscribe", "mode": "replace", "keys": [..]}`.
//! Only the latest subscription set is retained while disconnected; it is replayed after
//! every (re)connect.

use crate::{
    candle::{Bar, InstrumentKey, PcrSample, Tick},
    collaborator::SubscriptionSink,
    config::FeedConfig,
    engine::{EngineEvent, HistoryUpdate, SessionId},
    error::FeedError,
    runtime::EngineHandle,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Connection status updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// [`SubscriptionSink`] backed by the feed's latest-value subscription channel.
#[derive(Debug)]
pub struct FeedSubscriptions {
    tx: watch::Sender<Vec<InstrumentKey>>,
}

impl FeedSubscriptions {
    /// Create the sink and the receiver to pass to [`spawn_feed`].
    pub fn channel() -> (Self, watch::Receiver<Vec<InstrumentKey>>) {
        let (tx, rx) = watch::channel(Vec::new());
        (Self { tx }, rx)
    }
}

impl SubscriptionSink for FeedSubscriptions {
    fn replace_subscriptions(&self, keys: Vec<InstrumentKey>) -> Result<(), FeedError> {
        self.tx
            .send(keys)
            .map_err(|_| FeedError::SubscriptionsClosed)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum FeedMessage {
    Tick {
        instrument_key: InstrumentKey,
        ltp: f64,
        ts: i64,
    },
    Bars {
        instrument_key: InstrumentKey,
        bars: Vec<FeedBar>,
    },
    Bar {
        instrument_key: InstrumentKey,
        #[serde(flatten)]
        bar: FeedBar,
    },
    Pcr {
        index_key: InstrumentKey,
        ts: i64,
        #[serde(default)]
        pcr: Option<f64>,
        #[serde(default)]
        put_oi: Option<f64>,
        #[serde(default)]
        call_oi: Option<f64>,
    },
    Welcome {
        #[serde(default)]
        message: Option<String>,
    },
    Status {
        #[serde(default)]
        connected: Option<bool>,
    },
}

#[derive(Debug, Deserialize)]
struct FeedBar {
    ts: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

impl FeedBar {
    fn into_bar(self, instrument_key: &InstrumentKey) -> Option<Bar> {
        Some(Bar {
            instrument_key: instrument_key.clone(),
            timestamp: DateTime::<Utc>::from_timestamp_millis(self.ts)?,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        })
    }
}

#[derive(Debug, Serialize)]
struct SubscribeRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    mode: &'static str,
    keys: &'a [InstrumentKey],
}

fn subscribe_message(keys: &[InstrumentKey]) -> Result<Message, serde_json::Error> {
    let request = SubscribeRequest {
        kind: "subscribe",
        mode: "replace",
        keys,
    };
    Ok(Message::Text(serde_json::to_string(&request)?.into()))
}

/// Decode one text frame into an engine event tagged with `session`.
///
/// Returns `None` for control messages and anything malformed.
fn decode(text: &str, session: SessionId) -> Option<EngineEvent> {
    let message = match serde_json::from_str::<FeedMessage>(text) {
        Ok(message) => message,
        Err(error) => {
            debug!(%error, raw = text.get(..100).unwrap_or(text), "dropping malformed feed message");
            return None;
        }
    };

    match message {
        FeedMessage::Tick {
            instrument_key,
            ltp,
            ts,
        } => Some(EngineEvent::Tick {
            session,
            tick: Tick {
                instrument_key,
                last_price: ltp,
                timestamp: DateTime::<Utc>::from_timestamp_millis(ts)?,
            },
        }),
        FeedMessage::Bars {
            instrument_key,
            bars,
        } => {
            let bars = bars
                .into_iter()
                .map(|bar| bar.into_bar(&instrument_key))
                .collect::<Option<Vec<_>>>()?;
            Some(EngineEvent::History {
                session,
                instrument_key,
                update: HistoryUpdate::Bootstrap(bars),
            })
        }
        FeedMessage::Bar {
            instrument_key,
            bar,
        } => {
            let bar = bar.into_bar(&instrument_key)?;
            Some(EngineEvent::History {
                session,
                instrument_key,
                update: HistoryUpdate::Incremental(bar),
            })
        }
        FeedMessage::Pcr {
            index_key,
            ts,
            pcr,
            put_oi,
            call_oi,
        } => {
            let timestamp = DateTime::<Utc>::from_timestamp_millis(ts)?;
            let sample = match (pcr, put_oi, call_oi) {
                (Some(pcr), _, _) => PcrSample::new(timestamp, pcr),
                (None, Some(put_oi), Some(call_oi)) => {
                    PcrSample::from_open_interest(timestamp, put_oi, call_oi)?
                }
                _ => return None,
            };
            Some(EngineEvent::Pcr {
                session,
                index_key,
                sample,
            })
        }
        FeedMessage::Welcome { .. } => {
            debug!("received welcome from feed");
            None
        }
        FeedMessage::Status { connected } => {
            debug!(?connected, "received status from feed");
            None
        }
    }
}

/// Spawn the feed connection loop with auto-reconnect.
///
/// Decoded events are tagged with the handle's current session and queued on the engine.
/// The loop stops once the engine queue is closed.
pub fn spawn_feed(
    config: FeedConfig,
    engine: EngineHandle,
    subscriptions: watch::Receiver<Vec<InstrumentKey>>,
    status_tx: watch::Sender<ConnectionStatus>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_feed_loop(config, engine, subscriptions, status_tx))
}

async fn run_feed_loop(
    config: FeedConfig,
    engine: EngineHandle,
    subscriptions: watch::Receiver<Vec<InstrumentKey>>,
    status_tx: watch::Sender<ConnectionStatus>,
) {
    info!(url = %config.url, "starting feed client");

    loop {
        let _ = status_tx.send(ConnectionStatus::Reconnecting);

        match connect_async(config.url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!(url = %config.url, "connected to feed");
                let _ = status_tx.send(ConnectionStatus::Connected);

                let (write, mut read) = ws_stream.split();

                // Writer task: subscription replay/updates and keep-alive pings
                let (writer_shutdown_tx, writer_shutdown_rx) = mpsc::channel::<()>(1);
                let writer = tokio::spawn(run_writer(
                    write,
                    subscriptions.clone(),
                    config.ping_interval,
                    writer_shutdown_rx,
                ));

                let mut engine_closed = false;
                while let Some(message) = read.next().await {
                    match message {
                        Ok(Message::Text(text)) => {
                            let Some(session) = engine.current_session() else {
                                debug!("no active session, dropping feed message");
                                continue;
                            };
                            let Some(event) = decode(&text, session) else {
                                continue;
                            };
                            if engine.send(event).await.is_err() {
                                warn!("engine queue closed, stopping feed client");
                                engine_closed = true;
                                break;
                            }
                        }
                        Ok(Message::Close(_)) => {
                            info!("feed server closed connection");
                            break;
                        }
                        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                            // Heartbeat messages - tungstenite handles these automatically
                        }
                        Err(error) => {
                            error!(%error, "feed WebSocket error");
                            break;
                        }
                        _ => {}
                    }
                }

                let _ = writer_shutdown_tx.send(()).await;
                if let Err(error) = writer.await {
                    error!(%error, "feed writer task failed");
                }
                let _ = status_tx.send(ConnectionStatus::Disconnected);

                if engine_closed {
                    return;
                }
                warn!("feed connection closed, will reconnect...");
            }
            Err(error) => {
                error!(url = %config.url, %error, "failed to connect to feed");
                let _ = status_tx.send(ConnectionStatus::Disconnected);
            }
        }

        debug!(delay = ?config.reconnect_delay, "waiting before reconnecting to feed");
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

async fn run_writer<W>(
    mut write: W,
    mut subscriptions: watch::Receiver<Vec<InstrumentKey>>,
    ping_interval: std::time::Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
) where
    W: futures::Sink<Message> + Unpin,
    W::Error: std::fmt::Display,
{
    // Replay the latest subscription set on every connect
    let keys = subscriptions.borrow_and_update().clone();
    if !send_subscription(&mut write, &keys).await {
        return;
    }

    let mut interval = tokio::time::interval(ping_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                    debug!("failed to send ping, connection likely dead");
                    break;
                }
            }
            changed = subscriptions.changed() => {
                if changed.is_err() {
                    debug!("subscription sender dropped, writer stopping");
                    break;
                }
                let keys = subscriptions.borrow_and_update().clone();
                if !send_subscription(&mut write, &keys).await {
                    break;
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("feed writer shutting down");
                break;
            }
        }
    }
}

/// Returns `false` if the connection is unusable.
async fn send_subscription<W>(write: &mut W, keys: &[InstrumentKey]) -> bool
where
    W: futures::Sink<Message> + Unpin,
    W::Error: std::fmt::Display,
{
    if keys.is_empty() {
        return true;
    }

    let message = match subscribe_message(keys) {
        Ok(message) => message,
        Err(error) => {
            error!(%error, "failed to encode subscription request");
            return true;
        }
    };

    match write.send(message).await {
        Ok(()) => {
            info!(?keys, "sent subscription replacement");
            true
        }
        Err(error) => {
            warn!(%error, "failed to send subscription replacement");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SESSION: SessionId = SessionId(7);

    #[test]
    fn test_decode_tick() {
        let event = decode(
            r#"{"type":"tick","instrument_key":"NSE_INDEX|Nifty 50","ltp":24998.15,"ts":1717386305000}"#,
            SESSION,
        );

        assert_eq!(
            event,
            Some(EngineEvent::Tick {
                session: SESSION,
                tick: Tick::new(
                    "NSE_INDEX|Nifty 50",
                    24998.15,
                    Utc.with_ymd_and_hms(2024, 6, 3, 3, 45, 5).unwrap()
                ),
            })
        );
    }

    #[test]
    fn test_decode_bars() {
        let bootstrap = decode(
            r#"{
                "type": "bars",
                "instrument_key": "NSE_FO|45450",
                "bars": [
                    {"ts": 1717386300000, "open": 101.0, "high": 104.5, "low": 99.0, "close": 103.0, "volume": 1250},
                    {"ts": 1717386360000, "open": 103.0, "high": 103.5, "low": 102.0, "close": 102.5}
                ]
            }"#,
            SESSION,
        );

        match bootstrap {
            Some(EngineEvent::History {
                session,
                instrument_key,
                update: HistoryUpdate::Bootstrap(bars),
            }) => {
                assert_eq!(session, SESSION);
                assert_eq!(instrument_key, "NSE_FO|45450");
                assert_eq!(bars.len(), 2);
                assert_eq!(bars[0].volume, 1250.0);
                assert_eq!(bars[1].volume, 0.0);
                assert_eq!(
                    bars[1].timestamp,
                    Utc.with_ymd_and_hms(2024, 6, 3, 3, 46, 0).unwrap()
                );
            }
            other => panic!("unexpected decode result: {other:?}"),
        }

        let incremental = decode(
            r#"{"type":"bar","instrument_key":"NSE_FO|45450","ts":1717386360000,"open":103.0,"high":103.5,"low":102.0,"close":102.5,"volume":40}"#,
            SESSION,
        );
        assert!(matches!(
            incremental,
            Some(EngineEvent::History {
                update: HistoryUpdate::Incremental(_),
                ..
            })
        ));
    }

    #[test]
    fn test_decode_pcr() {
        struct TestCase {
            input: &'static str,
            expected: Option<f64>,
        }

        let tests = vec![
            // TC0: explicit ratio
            TestCase {
                input: r#"{"type":"pcr","index_key":"NSE_INDEX|Nifty 50","ts":1717386300000,"pcr":1.07}"#,
                expected: Some(1.07),
            },
            // TC1: ratio derived from open interest
            TestCase {
                input: r#"{"type":"pcr","index_key":"NSE_INDEX|Nifty 50","ts":1717386300000,"put_oi":900,"call_oi":1000}"#,
                expected: Some(0.9),
            },
            // TC2: undefined ratio
            TestCase {
                input: r#"{"type":"pcr","index_key":"NSE_INDEX|Nifty 50","ts":1717386300000,"put_oi":900,"call_oi":0}"#,
                expected: None,
            },
            // TC3: neither ratio nor open interest
            TestCase {
                input: r#"{"type":"pcr","index_key":"NSE_INDEX|Nifty 50","ts":1717386300000}"#,
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = match decode(test.input, SESSION) {
                Some(EngineEvent::Pcr { sample, .. }) => Some(sample.pcr),
                _ => None,
            };
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_decode_drops_malformed_and_control_messages() {
        let inputs = [
            // Missing price
            r#"{"type":"tick","instrument_key":"NSE_INDEX|Nifty 50","ts":1717386305000}"#,
            // Missing timestamp
            r#"{"type":"tick","instrument_key":"NSE_INDEX|Nifty 50","ltp":24998.15}"#,
            // Unknown type
            r#"{"type":"depth","instrument_key":"NSE_INDEX|Nifty 50"}"#,
            // Not JSON
            "hello",
            // Control messages
            r#"{"type":"welcome","message":"hi"}"#,
            r#"{"type":"status","connected":true}"#,
        ];

        for (index, input) in inputs.into_iter().enumerate() {
            assert_eq!(decode(input, SESSION), None, "TC{} failed", index);
        }
    }

    #[test]
    fn test_subscribe_message() {
        let keys: Vec<InstrumentKey> = vec!["NSE_INDEX|Nifty 50".into(), "NSE_FO|45450".into()];

        let Message::Text(text) = subscribe_message(&keys).unwrap() else {
            panic!("expected text frame");
        };

        let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "subscribe",
                "mode": "replace",
                "keys": ["NSE_INDEX|Nifty 50", "NSE_FO|45450"]
            })
        );
    }

    #[test]
    fn test_feed_subscriptions_keep_latest_set() {
        let (sink, rx) = FeedSubscriptions::channel();

        sink.replace_subscriptions(vec!["A".into()]).unwrap();
        sink.replace_subscriptions(vec!["A".into(), "B".into()]).unwrap();
        assert_eq!(*rx.borrow(), vec!["A", "B"]);

        drop(rx);
        assert_eq!(
            sink.replace_subscriptions(vec!["C".into()]),
            Err(FeedError::SubscriptionsClosed)
        );
    }
}
