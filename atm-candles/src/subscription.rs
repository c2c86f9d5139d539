//! At-the-money strike tracking and option instrument selection.
//!
//! The controller only decides *what* should be subscribed. Fetching the option chain
//! and sending subscription commands belong to the caller.

use crate::candle::{InstrumentKey, OptionChainEntry};
use rust_decimal::{Decimal, RoundingStrategy, prelude::FromPrimitive};
use serde::{Deserialize, Serialize};

/// Role an instrument plays in the current selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum InstrumentRole {
    Index,
    Call,
    Put,
}

/// The live working set of instruments.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InstrumentSelection {
    pub index_key: InstrumentKey,
    pub call_key: Option<InstrumentKey>,
    pub put_key: Option<InstrumentKey>,
    pub atm_strike: Option<Decimal>,
}

impl InstrumentSelection {
    /// Fresh selection tracking only the index.
    pub fn new(index_key: impl Into<InstrumentKey>) -> Self {
        Self {
            index_key: index_key.into(),
            call_key: None,
            put_key: None,
            atm_strike: None,
        }
    }

    pub fn role_of(&self, key: &str) -> Option<InstrumentRole> {
        if self.index_key == key {
            Some(InstrumentRole::Index)
        } else if self.call_key.as_deref() == Some(key) {
            Some(InstrumentRole::Call)
        } else if self.put_key.as_deref() == Some(key) {
            Some(InstrumentRole::Put)
        } else {
            None
        }
    }

    /// Keys to subscribe, index first.
    pub fn subscription_keys(&self) -> Vec<InstrumentKey> {
        std::iter::once(self.index_key.clone())
            .chain(self.call_key.clone())
            .chain(self.put_key.clone())
            .collect()
    }
}

/// ATM strike moved; an option chain lookup is needed for `strike`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtmChange {
    pub previous: Option<Decimal>,
    pub strike: Decimal,
}

/// Call/put pair listed at a strike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtmPair {
    pub call_key: InstrumentKey,
    pub put_key: InstrumentKey,
}

/// Result of adopting a resolved [`AtmPair`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adoption {
    /// Full subscription set to replace the upstream one with.
    pub keys: Vec<InstrumentKey>,
    /// Newly tracked option keys whose history must be fetched.
    pub added: Vec<InstrumentKey>,
    /// Previously tracked option keys whose series must be discarded.
    pub removed: Vec<InstrumentKey>,
}

/// Round `close` to the nearest multiple of `step`, ties away from zero.
///
/// Returns `None` for non-finite prices or a non-positive step.
pub fn atm_strike(close: f64, step: Decimal) -> Option<Decimal> {
    if step <= Decimal::ZERO {
        return None;
    }

    let close = Decimal::from_f64(close)?;
    let multiples = close
        .checked_div(step)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);

    multiples.checked_mul(step)
}

/// Recompute the ATM strike after the index series' latest close changed.
///
/// Updates `selection.atm_strike` in place and reports the change, if any. The
/// call/put keys are left untouched until a chain lookup resolves them.
pub fn on_index_candle_updated(
    selection: &mut InstrumentSelection,
    latest_index_close: f64,
    step: Decimal,
) -> Option<AtmChange> {
    let strike = atm_strike(latest_index_close, step)?;
    if selection.atm_strike == Some(strike) {
        return None;
    }

    let previous = selection.atm_strike.replace(strike);
    Some(AtmChange { previous, strike })
}

/// Find the chain entry listed exactly at `atm`.
pub fn resolve_atm(entries: &[OptionChainEntry], atm: Decimal) -> Option<AtmPair> {
    entries
        .iter()
        .find(|entry| entry.strike_price == atm)
        .map(|entry| AtmPair {
            call_key: entry.call_instrument_key.clone(),
            put_key: entry.put_instrument_key.clone(),
        })
}

/// Make `pair` the tracked call/put keys.
pub fn adopt(selection: &mut InstrumentSelection, pair: AtmPair) -> Adoption {
    let AtmPair { call_key, put_key } = pair;

    let previous = [selection.call_key.take(), selection.put_key.take()];
    let next = [call_key, put_key];

    let removed = previous
        .iter()
        .flatten()
        .filter(|key| !next.contains(*key))
        .cloned()
        .collect();

    let added = next
        .iter()
        .filter(|key| !previous.iter().flatten().any(|old| old == *key))
        .cloned()
        .collect();

    let [call_key, put_key] = next;
    selection.call_key = Some(call_key);
    selection.put_key = Some(put_key);

    Adoption {
        keys: selection.subscription_keys(),
        added,
        removed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn chain() -> Vec<OptionChainEntry> {
        [dec!(24950), dec!(25000), dec!(25050)]
            .into_iter()
            .map(|strike| OptionChainEntry {
                strike_price: strike,
                call_instrument_key: format!("C{strike}").into(),
                put_instrument_key: format!("P{strike}").into(),
            })
            .collect()
    }

    #[test]
    fn test_atm_strike() {
        struct TestCase {
            close: f64,
            step: Decimal,
            expected: Option<Decimal>,
        }

        let tests = vec![
            // TC0: rounds up to nearest step
            TestCase {
                close: 24_998.0,
                step: dec!(50),
                expected: Some(dec!(25000)),
            },
            // TC1: rounds down to nearest step
            TestCase {
                close: 58_049.0,
                step: dec!(100),
                expected: Some(dec!(58000)),
            },
            // TC2: exact midpoint rounds up
            TestCase {
                close: 24_975.0,
                step: dec!(50),
                expected: Some(dec!(25000)),
            },
            // TC3: just below the midpoint rounds down
            TestCase {
                close: 24_974.95,
                step: dec!(50),
                expected: Some(dec!(24950)),
            },
            // TC4: zero step is rejected
            TestCase {
                close: 24_998.0,
                step: dec!(0),
                expected: None,
            },
            // TC5: non-finite price is rejected
            TestCase {
                close: f64::NAN,
                step: dec!(50),
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = atm_strike(test.close, test.step);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_index_closes_trigger_single_atm_change() {
        let mut selection = InstrumentSelection::new("NSE_INDEX|Nifty 50");

        // Establish the initial ATM: 24970 / 50 = 499.4 -> 24950
        let initial = on_index_candle_updated(&mut selection, 24_970.0, dec!(50));
        assert_eq!(
            initial,
            Some(AtmChange {
                previous: None,
                strike: dec!(24950)
            })
        );

        // 24996 -> 25000 (change), 25010 -> 25000 (no change)
        let changes: Vec<AtmChange> = [24_996.0, 25_010.0]
            .into_iter()
            .filter_map(|close| on_index_candle_updated(&mut selection, close, dec!(50)))
            .collect();

        assert_eq!(
            changes,
            vec![AtmChange {
                previous: Some(dec!(24950)),
                strike: dec!(25000)
            }]
        );
        assert_eq!(selection.atm_strike, Some(dec!(25000)));
    }

    #[test]
    fn test_resolve_atm_requires_exact_strike() {
        assert_eq!(
            resolve_atm(&chain(), dec!(25000)),
            Some(AtmPair {
                call_key: "C25000".into(),
                put_key: "P25000".into(),
            })
        );
        assert_eq!(resolve_atm(&chain(), dec!(25100)), None);
        assert_eq!(resolve_atm(&[], dec!(25000)), None);
    }

    #[test]
    fn test_adopt_reports_added_and_removed_keys() {
        let mut selection = InstrumentSelection::new("IDX");

        let first = adopt(
            &mut selection,
            AtmPair {
                call_key: "C100".into(),
                put_key: "P100".into(),
            },
        );
        assert_eq!(first.keys, vec!["IDX", "C100", "P100"]);
        assert_eq!(first.added, vec!["C100", "P100"]);
        assert!(first.removed.is_empty());

        let second = adopt(
            &mut selection,
            AtmPair {
                call_key: "C150".into(),
                put_key: "P100".into(),
            },
        );
        assert_eq!(second.keys, vec!["IDX", "C150", "P100"]);
        assert_eq!(second.added, vec!["C150"]);
        assert_eq!(second.removed, vec!["C100"]);
        assert_eq!(selection.role_of("C150"), Some(InstrumentRole::Call));
        assert_eq!(selection.role_of("C100"), None);
    }
}
