//! Quote, snapshot and cycle types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map;
use std::collections::HashMap;
use std::time::Duration;

use crate::{SourceId, Symbol};

/// Latest price for one symbol from one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub symbol: Symbol,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: Option<u64>,
    pub source: SourceId,
}

impl PriceQuote {
    pub fn new(symbol: Symbol, price: f64, source: SourceId) -> Self {
        Self {
            symbol,
            price,
            timestamp: Utc::now(),
            bid: None,
            ask: None,
            volume: None,
            source,
        }
    }

    pub fn with_bid_ask(mut self, bid: Option<f64>, ask: Option<f64>) -> Self {
        self.bid = bid;
        self.ask = ask;
        self
    }

    /// Quotes must carry a finite, strictly positive price
    pub fn is_valid(&self) -> bool {
        is_valid_price(self.price)
    }
}

pub fn is_valid_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

/// Prices from one source at one cycle, keyed by symbol
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceSnapshot {
    prices: HashMap<Symbol, f64>,
}

impl PriceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from quotes, discarding any with a non-positive price
    pub fn from_quotes<I>(quotes: I) -> Self
    where
        I: IntoIterator<Item = PriceQuote>,
    {
        quotes
            .into_iter()
            .filter(PriceQuote::is_valid)
            .map(|q| (q.symbol, q.price))
            .collect()
    }

    pub fn insert(&mut self, symbol: Symbol, price: f64) -> Option<f64> {
        self.prices.insert(symbol, price)
    }

    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).copied()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.prices.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, Symbol, f64> {
        self.prices.iter()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.prices.keys()
    }

    /// Drop invalid prices, keeping only what the detector would accept
    pub fn retain_valid(&mut self) {
        self.prices.retain(|_, p| is_valid_price(*p));
    }

    /// Keep only the requested symbols
    pub fn restrict_to(&self, symbols: &[Symbol]) -> Self {
        symbols
            .iter()
            .filter_map(|s| self.prices.get(s).map(|p| (s.clone(), *p)))
            .collect()
    }
}

impl FromIterator<(Symbol, f64)> for PriceSnapshot {
    fn from_iter<I: IntoIterator<Item = (Symbol, f64)>>(iter: I) -> Self {
        Self {
            prices: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a PriceSnapshot {
    type Item = (&'a Symbol, &'a f64);
    type IntoIter = hash_map::Iter<'a, Symbol, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.prices.iter()
    }
}

/// Where a cycle's snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotOrigin {
    /// Fetched this cycle
    Live,
    /// Last good snapshot reused after a failed fetch
    Cached,
    /// Synthesized random walk
    Simulated,
}

/// A snapshot labeled with the source that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedSnapshot {
    pub source: SourceId,
    pub origin: SnapshotOrigin,
    pub prices: PriceSnapshot,
    pub captured_at: DateTime<Utc>,
}

impl NamedSnapshot {
    pub fn live(source: SourceId, prices: PriceSnapshot) -> Self {
        Self::with_origin(source, SnapshotOrigin::Live, prices)
    }

    pub fn with_origin(source: SourceId, origin: SnapshotOrigin, prices: PriceSnapshot) -> Self {
        Self {
            source,
            origin,
            prices,
            captured_at: Utc::now(),
        }
    }

    pub fn is_stale(&self) -> bool {
        self.origin == SnapshotOrigin::Cached
    }

    pub fn is_simulated(&self) -> bool {
        self.origin == SnapshotOrigin::Simulated
    }
}

/// Output of one polling cycle
#[derive(Debug, Clone)]
pub struct CycleResult {
    /// Monotonically increasing, starting at 1
    pub sequence: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub snapshots: Vec<NamedSnapshot>,
    pub active_sources: Vec<SourceId>,
    pub failed_sources: Vec<SourceId>,
    pub simulation_mode: bool,
}

impl CycleResult {
    /// The two snapshots the detector compares this cycle
    pub fn comparison_pair(&self) -> Option<(&NamedSnapshot, &NamedSnapshot)> {
        match self.snapshots.as_slice() {
            [first, second, ..] => Some((first, second)),
            _ => None,
        }
    }

    pub fn snapshot(&self, source: &SourceId) -> Option<&NamedSnapshot> {
        self.snapshots.iter().find(|s| &s.source == source)
    }

    pub fn live_count(&self) -> usize {
        self.snapshots
            .iter()
            .filter(|s| s.origin == SnapshotOrigin::Live)
            .count()
    }

    pub fn uses_simulated_data(&self) -> bool {
        self.snapshots.iter().any(NamedSnapshot::is_simulated)
    }
}
