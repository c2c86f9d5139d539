use atm_candles::{
    Collaborators, Config, ConnectionStatus, EngineEvent, EngineSnapshot, FeedSubscriptions,
    HttpMarketApi, Runtime, spawn_feed,
};
use rustls::crypto::ring::default_provider;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let _ = default_provider().install_default();

    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "invalid configuration");
            std::process::exit(1);
        }
    };

    info!(
        index = %config.tracking.index_key,
        expiry = %config.tracking.expiry,
        step = %config.tracking.strike_step,
        feed = %config.feed.url,
        api = %config.api.base_url,
        "starting ATM tracker"
    );

    let mut api = HttpMarketApi::new(config.api.base_url.clone(), config.api.timeout);
    if let Some(token) = &config.api.access_token {
        api = api.with_access_token(token.clone());
    }
    let api = Arc::new(api);

    let (subscriptions, subscriptions_rx) = FeedSubscriptions::channel();
    let (runtime, engine) = Runtime::new(
        config.queue_size,
        Collaborators {
            chains: api.clone(),
            history: api,
            subscriptions: Arc::new(subscriptions),
        },
    );
    let runtime = tokio::spawn(runtime.run());

    let reset = EngineEvent::Reset {
        index_key: config.tracking.index_key.clone(),
        step: config.tracking.strike_step,
        expiry: config.tracking.expiry,
    };
    if let Err(error) = engine.send(reset).await {
        error!(%error, "failed to start tracking session");
        std::process::exit(1);
    }

    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
    let feed = spawn_feed(config.feed.clone(), engine.clone(), subscriptions_rx, status_tx);

    let snapshots = engine.snapshots();
    drop(engine);

    tokio::select! {
        _ = log_snapshots(snapshots) => {
            warn!("engine runtime stopped");
        }
        _ = log_status(status_rx) => {
            warn!("feed client stopped");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                error!(%error, "failed to listen for shutdown signal");
            }
            info!("shutdown requested");
        }
    }

    feed.abort();
    runtime.abort();
    info!("ATM tracker stopped");
}

/// Log a one-line summary each time the tracked candles change.
async fn log_snapshots(mut snapshots: watch::Receiver<Option<EngineSnapshot>>) {
    let mut last_logged = None;

    while snapshots.changed().await.is_ok() {
        let summary = snapshots.borrow_and_update().as_ref().map(Summary::from);
        let Some(summary) = summary else {
            continue;
        };
        if last_logged.as_ref() == Some(&summary) {
            continue;
        }

        info!(
            session = %summary.session,
            atm = ?summary.atm,
            index_close = ?summary.index_close,
            call_close = ?summary.call_close,
            put_close = ?summary.put_close,
            pcr = ?summary.pcr,
            index_candles = summary.index_candles,
            "tracker update"
        );
        last_logged = Some(summary);
    }
}

async fn log_status(mut status: watch::Receiver<ConnectionStatus>) {
    while status.changed().await.is_ok() {
        let current = *status.borrow_and_update();
        info!(status = ?current, "feed connection status");
    }
}

#[derive(Debug, PartialEq)]
struct Summary {
    session: atm_candles::SessionId,
    atm: Option<rust_decimal::Decimal>,
    index_close: Option<f64>,
    call_close: Option<f64>,
    put_close: Option<f64>,
    pcr: Option<f64>,
    index_candles: usize,
}

impl From<&EngineSnapshot> for Summary {
    fn from(snapshot: &EngineSnapshot) -> Self {
        Self {
            session: snapshot.session,
            atm: snapshot.selection.atm_strike,
            index_close: snapshot.index.last().map(|candle| candle.close),
            call_close: snapshot.call.last().map(|candle| candle.close),
            put_close: snapshot.put.last().map(|candle| candle.close),
            pcr: snapshot.pcr.last().map(|sample| sample.pcr),
            index_candles: snapshot.index.len(),
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
