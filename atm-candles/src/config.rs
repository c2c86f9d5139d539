//! Environment driven configuration.
//!
//! | Variable                   | Default                                  |
//! |----------------------------|------------------------------------------|
//! | `ATM_FEED_WS_URL`          | `ws://127.0.0.1:9002/feed`               |
//! | `ATM_API_BASE_URL`         | `http://127.0.0.1:9003/v2/`              |
//! | `ATM_API_TOKEN`            | unset                                    |
//! | `ATM_INDEX_KEY`            | `NSE_INDEX\|Nifty 50`                    |
//! | `ATM_EXPIRY`               | next Thursday (UTC)                      |
//! | `ATM_STRIKE_STEP`          | derived from the index key               |
//! | `ATM_QUEUE_SIZE`           | `1000`                                   |
//! | `ATM_HTTP_TIMEOUT_SECS`    | `10`                                     |
//! | `ATM_PING_INTERVAL_SECS`   | `30`                                     |
//! | `ATM_RECONNECT_DELAY_SECS` | `2`                                      |
//!
//! Queue size, strike step, request timeout and ping interval must be positive.

use crate::{candle::InstrumentKey, error::ConfigError};
use chrono::{Datelike, Days, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;
use std::{str::FromStr, time::Duration};
use url::Url;

/// Strike step used when the index key matches no known family.
pub const DEFAULT_STRIKE_STEP: Decimal = Decimal::from_parts(50, 0, 0, false, 0);

/// Strike step of an index family, matched on the index key.
pub fn strike_step_for(index_key: &str) -> Decimal {
    let key = index_key.to_uppercase();

    if key.contains("BANK") || key.contains("SENSEX") {
        Decimal::ONE_HUNDRED
    } else if key.contains("MIDCAP") {
        Decimal::from(25)
    } else {
        DEFAULT_STRIKE_STEP
    }
}

/// Next weekly expiry (Thursday) on or after `today`.
pub fn next_weekly_expiry(today: NaiveDate) -> NaiveDate {
    let days_ahead = (Weekday::Thu.num_days_from_monday() + 7
        - today.weekday().num_days_from_monday())
        % 7;
    today
        .checked_add_days(Days::new(u64::from(days_ahead)))
        .unwrap_or(today)
}

/// Live feed connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    /// WebSocket server URL
    pub url: Url,
    /// Ping interval to keep connection alive
    pub ping_interval: Duration,
    /// Reconnection delay after disconnect
    pub reconnect_delay: Duration,
}

impl FeedConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Market data REST API settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub base_url: Url,
    pub access_token: Option<String>,
    pub timeout: Duration,
}

/// Index/expiry the session tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    pub index_key: InstrumentKey,
    pub expiry: NaiveDate,
    pub strike_step: Decimal,
}

/// Full application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub feed: FeedConfig,
    pub api: ApiConfig,
    pub tracking: TrackingConfig,
    /// Maximum number of queued engine events
    pub queue_size: usize,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let feed_url = env.url("ATM_FEED_WS_URL", "ws://127.0.0.1:9002/feed", &["ws", "wss"])?;
        let api_url = env.url(
            "ATM_API_BASE_URL",
            "http://127.0.0.1:9003/v2/",
            &["http", "https"],
        )?;

        let index_key = env
            .get("ATM_INDEX_KEY")
            .unwrap_or_else(|| "NSE_INDEX|Nifty 50".to_string());

        let expiry = match env.get("ATM_EXPIRY") {
            Some(value) => NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|error| {
                ConfigError::InvalidVar {
                    var: "ATM_EXPIRY",
                    value,
                    reason: error.to_string(),
                }
            })?,
            None => next_weekly_expiry(Utc::now().date_naive()),
        };

        let strike_step = match env.parsed::<Decimal>("ATM_STRIKE_STEP")? {
            Some(step) if step > Decimal::ZERO => step,
            Some(step) => {
                return Err(ConfigError::InvalidVar {
                    var: "ATM_STRIKE_STEP",
                    value: step.to_string(),
                    reason: "must be positive".to_string(),
                });
            }
            None => strike_step_for(&index_key),
        };

        let queue_size = match env.parsed::<usize>("ATM_QUEUE_SIZE")? {
            Some(0) => {
                return Err(ConfigError::InvalidVar {
                    var: "ATM_QUEUE_SIZE",
                    value: "0".to_string(),
                    reason: "must be positive".to_string(),
                });
            }
            Some(size) => size,
            None => 1000,
        };
        let timeout = env.positive_secs("ATM_HTTP_TIMEOUT_SECS", 10)?;
        let ping_interval = env.positive_secs("ATM_PING_INTERVAL_SECS", 30)?;
        let reconnect_delay = env.secs("ATM_RECONNECT_DELAY_SECS", 2)?;

        Ok(Self {
            feed: FeedConfig::new(feed_url)
                .with_ping_interval(ping_interval)
                .with_reconnect_delay(reconnect_delay),
            api: ApiConfig {
                base_url: api_url,
                access_token: env.get("ATM_API_TOKEN"),
                timeout,
            },
            tracking: TrackingConfig {
                index_key: index_key.into(),
                expiry,
                strike_step,
            },
            queue_size,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parsed<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(var)
            .map(|value| {
                value.parse::<T>().map_err(|error| ConfigError::InvalidVar {
                    var,
                    reason: error.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn secs(&self, var: &'static str, default: u64) -> Result<Duration, ConfigError> {
        Ok(Duration::from_secs(self.parsed::<u64>(var)?.unwrap_or(default)))
    }

    fn positive_secs(&self, var: &'static str, default: u64) -> Result<Duration, ConfigError> {
        match self.secs(var, default)? {
            duration if duration.is_zero() => Err(ConfigError::InvalidVar {
                var,
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            }),
            duration => Ok(duration),
        }
    }

    fn url(
        &self,
        var: &'static str,
        default: &str,
        schemes: &'static [&'static str],
    ) -> Result<Url, ConfigError> {
        let value = self.get(var).unwrap_or_else(|| default.to_string());
        let url = Url::parse(&value).map_err(|error| ConfigError::InvalidVar {
            var,
            reason: error.to_string(),
            value: value.clone(),
        })?;

        if !schemes.contains(&url.scheme()) {
            return Err(ConfigError::UnsupportedScheme {
                var,
                value,
                expected: if schemes.contains(&"ws") { "ws/wss" } else { "http/https" },
            });
        }

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("ATM_EXPIRY", "2024-06-06")])).unwrap();

        assert_eq!(config.feed.url.as_str(), "ws://127.0.0.1:9002/feed");
        assert_eq!(config.feed.ping_interval, Duration::from_secs(30));
        assert_eq!(config.feed.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.api.base_url.as_str(), "http://127.0.0.1:9003/v2/");
        assert_eq!(config.api.access_token, None);
        assert_eq!(config.api.timeout, Duration::from_secs(10));
        assert_eq!(config.tracking.index_key, "NSE_INDEX|Nifty 50");
        assert_eq!(
            config.tracking.expiry,
            NaiveDate::from_ymd_opt(2024, 6, 6).unwrap()
        );
        assert_eq!(config.tracking.strike_step, dec!(50));
        assert_eq!(config.queue_size, 1000);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("ATM_FEED_WS_URL", "wss://feed.example.com/v3"),
            ("ATM_INDEX_KEY", "NSE_INDEX|Nifty Bank"),
            ("ATM_EXPIRY", "2024-06-26"),
            ("ATM_QUEUE_SIZE", "250"),
            ("ATM_PING_INTERVAL_SECS", "15"),
            ("ATM_API_TOKEN", " secret "),
        ]))
        .unwrap();

        assert_eq!(config.feed.url.as_str(), "wss://feed.example.com/v3");
        assert_eq!(config.feed.ping_interval, Duration::from_secs(15));
        assert_eq!(config.tracking.strike_step, dec!(100));
        assert_eq!(config.queue_size, 250);
        assert_eq!(config.api.access_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_invalid_values() {
        struct TestCase {
            vars: Vec<(&'static str, &'static str)>,
            expected_var: &'static str,
        }

        let tests = vec![
            // TC0: unparseable step
            TestCase {
                vars: vec![("ATM_STRIKE_STEP", "fifty")],
                expected_var: "ATM_STRIKE_STEP",
            },
            // TC1: non-positive step
            TestCase {
                vars: vec![("ATM_STRIKE_STEP", "0")],
                expected_var: "ATM_STRIKE_STEP",
            },
            // TC2: bad expiry date
            TestCase {
                vars: vec![("ATM_EXPIRY", "06/06/2024")],
                expected_var: "ATM_EXPIRY",
            },
            // TC3: http scheme for the feed
            TestCase {
                vars: vec![("ATM_FEED_WS_URL", "http://127.0.0.1:9002")],
                expected_var: "ATM_FEED_WS_URL",
            },
            // TC4: bad queue size
            TestCase {
                vars: vec![("ATM_QUEUE_SIZE", "-1")],
                expected_var: "ATM_QUEUE_SIZE",
            },
            // TC5: empty queue
            TestCase {
                vars: vec![("ATM_QUEUE_SIZE", "0")],
                expected_var: "ATM_QUEUE_SIZE",
            },
            // TC6: zero ping interval
            TestCase {
                vars: vec![("ATM_PING_INTERVAL_SECS", "0")],
                expected_var: "ATM_PING_INTERVAL_SECS",
            },
            // TC7: zero request timeout
            TestCase {
                vars: vec![("ATM_HTTP_TIMEOUT_SECS", "0")],
                expected_var: "ATM_HTTP_TIMEOUT_SECS",
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let error = Config::from_lookup(lookup(&test.vars)).unwrap_err();
            let var = match error {
                ConfigError::InvalidVar { var, .. } => var,
                ConfigError::UnsupportedScheme { var, .. } => var,
            };
            assert_eq!(var, test.expected_var, "TC{} failed", index);
        }
    }

    #[test]
    fn test_strike_step_for() {
        assert_eq!(strike_step_for("NSE_INDEX|Nifty 50"), dec!(50));
        assert_eq!(strike_step_for("NSE_INDEX|Nifty Bank"), dec!(100));
        assert_eq!(strike_step_for("BSE_INDEX|SENSEX"), dec!(100));
        assert_eq!(strike_step_for("NSE_INDEX|NIFTY MID SELECT"), dec!(50));
        assert_eq!(strike_step_for("NSE_INDEX|Nifty Midcap 100"), dec!(25));
    }

    #[test]
    fn test_next_weekly_expiry() {
        // 2024-06-03 is a Monday
        let monday = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let thursday = NaiveDate::from_ymd_opt(2024, 6, 6).unwrap();
        let friday = NaiveDate::from_ymd_opt(2024, 6, 7).unwrap();

        assert_eq!(next_weekly_expiry(monday), thursday);
        assert_eq!(next_weekly_expiry(thursday), thursday);
        assert_eq!(
            next_weekly_expiry(friday),
            NaiveDate::from_ymd_opt(2024, 6, 13).unwrap()
        );
    }
}
