//! Arbitrage detection strategies

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

use arb_core::{
    is_valid_price, ArbitrageOpportunity, NamedSnapshot, PriceSnapshot, SourceId, Symbol,
};

/// Borrowed view of one source's prices
#[derive(Debug, Clone, Copy)]
pub struct SnapshotRef<'a> {
    pub source: &'a SourceId,
    pub prices: &'a PriceSnapshot,
}

impl<'a> SnapshotRef<'a> {
    pub fn new(source: &'a SourceId, prices: &'a PriceSnapshot) -> Self {
        Self { source, prices }
    }
}

impl<'a> From<&'a NamedSnapshot> for SnapshotRef<'a> {
    fn from(snapshot: &'a NamedSnapshot) -> Self {
        Self::new(&snapshot.source, &snapshot.prices)
    }
}

/// Why a detection call produced nothing
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("Invalid threshold {0} (expected 0 < t <= 1)")]
    InvalidThreshold(f64),

    #[error("Snapshot from {0} is empty")]
    EmptySnapshot(SourceId),

    #[error("Invalid price {price} for {symbol} from {source_id}")]
    InvalidPrice {
        source_id: SourceId,
        symbol: Symbol,
        price: f64,
    },
}

/// Outcome of comparing two snapshots
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    /// Spreads above the threshold, possibly none. Order is unspecified.
    Opportunities(Vec<ArbitrageOpportunity>),
    NoCommonSymbols,
    Rejected(RejectReason),
}

impl Detection {
    pub fn opportunities(&self) -> &[ArbitrageOpportunity] {
        match self {
            Detection::Opportunities(opportunities) => opportunities,
            _ => &[],
        }
    }

    pub fn into_opportunities(self) -> Vec<ArbitrageOpportunity> {
        match self {
            Detection::Opportunities(opportunities) => opportunities,
            _ => Vec::new(),
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Detection::Rejected(_))
    }
}

/// Strategy trait for comparing two sources
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn detect(&self, first: SnapshotRef<'_>, second: SnapshotRef<'_>) -> Detection;
}

/// Cross-source spread: buy where cheaper, sell where dearer
pub struct CrossSourceStrategy {
    threshold: f64,
}

impl CrossSourceStrategy {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Strategy for CrossSourceStrategy {
    fn name(&self) -> &'static str {
        "cross_source"
    }

    fn detect(&self, first: SnapshotRef<'_>, second: SnapshotRef<'_>) -> Detection {
        detect_arbitrage(first, second, self.threshold)
    }
}

fn validate(snapshot: SnapshotRef<'_>) -> Result<(), RejectReason> {
    if snapshot.prices.is_empty() {
        return Err(RejectReason::EmptySnapshot(snapshot.source.clone()));
    }

    match snapshot.prices.iter().find(|(_, price)| !is_valid_price(**price)) {
        Some((symbol, price)) => Err(RejectReason::InvalidPrice {
            source_id: snapshot.source.clone(),
            symbol: symbol.clone(),
            price: *price,
        }),
        None => Ok(()),
    }
}

/// Compare two snapshots and report every symbol whose relative spread
/// exceeds `threshold`.
///
/// Invalid input never panics or errors: the whole call is rejected and a
/// warning is logged.
pub fn detect_arbitrage(
    first: SnapshotRef<'_>,
    second: SnapshotRef<'_>,
    threshold: f64,
) -> Detection {
    if !(threshold.is_finite() && threshold > 0.0 && threshold <= 1.0) {
        warn!("Invalid threshold: {}", threshold);
        return Detection::Rejected(RejectReason::InvalidThreshold(threshold));
    }

    if let Err(reason) = validate(first).and_then(|_| validate(second)) {
        warn!("Rejecting snapshot pair: {}", reason);
        return Detection::Rejected(reason);
    }

    let common: Vec<(&Symbol, f64, f64)> = first
        .prices
        .iter()
        .filter_map(|(symbol, &p1)| second.prices.get(symbol.as_str()).map(|p2| (symbol, p1, p2)))
        .collect();

    if common.is_empty() {
        debug!("No common symbols between {} and {}", first.source, second.source);
        return Detection::NoCommonSymbols;
    }

    let opportunities: Vec<ArbitrageOpportunity> = common
        .par_iter()
        .filter_map(|&(symbol, p1, p2)| {
            let diff = (p1 - p2).abs();
            let avg = (p1 + p2) / 2.0;
            if avg == 0.0 {
                return None;
            }

            (diff / avg > threshold).then(|| {
                ArbitrageOpportunity::from_prices(
                    symbol.clone(),
                    (first.source, p1),
                    (second.source, p2),
                )
            })
        })
        .collect();

    debug!(
        "Compared {} common symbols, {} above {:.2}%",
        common.len(),
        opportunities.len(),
        threshold * 100.0
    );

    Detection::Opportunities(opportunities)
}
