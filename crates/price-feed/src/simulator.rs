//! Random-walk price simulator
//!
//! Slot 0 drives a reference walk per symbol. Every other slot reads the
//! reference, offsets it by a bounded variance and takes its own step, which
//! gives a family of correlated but independent series to compare.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::Normal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use arb_core::{
    round2, PriceQuote, PriceSnapshot, SimulationConfig, SourceId, SourceKind, SourceResult,
    Symbol,
};

use crate::feeds::SourceClient;

/// Seeded generator of simulated price series
#[derive(Debug)]
pub struct PriceSimulator {
    config: SimulationConfig,
    rng: StdRng,
    step: Option<Normal>,
    reference: HashMap<Symbol, f64>,
}

impl PriceSimulator {
    pub fn new(config: SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let step = if config.volatility > 0.0 {
            match Normal::new(0.0, config.volatility) {
                Ok(normal) => Some(normal),
                Err(e) => {
                    warn!("Invalid simulation volatility {}: {}", config.volatility, e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            config,
            rng,
            step,
            reference: HashMap::new(),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Current reference price, if the symbol has been seen
    pub fn reference_price(&self, symbol: &str) -> Option<f64> {
        self.reference.get(symbol).copied()
    }

    /// Next set of prices for one slot
    pub fn next_snapshot(&mut self, slot: usize, symbols: &[Symbol]) -> PriceSnapshot {
        symbols
            .iter()
            .map(|symbol| {
                let price = self.next_price(slot, symbol);
                (symbol.clone(), price)
            })
            .collect()
    }

    fn next_price(&mut self, slot: usize, symbol: &Symbol) -> f64 {
        let reference = self.reference_or_init(symbol);

        if slot == 0 {
            let next = self.step_from(reference);
            self.reference.insert(symbol.clone(), next);
            return next;
        }

        let variance = self.config.variance_factor.abs();
        let offset = if variance > 0.0 {
            self.rng.gen_range(-variance..=variance)
        } else {
            0.0
        };
        self.step_from(reference * (1.0 + offset))
    }

    fn reference_or_init(&mut self, symbol: &Symbol) -> f64 {
        if let Some(&price) = self.reference.get(symbol) {
            return price;
        }

        let (lo, hi) = (self.config.initial_price_min, self.config.initial_price_max);
        let initial = if hi > lo { self.rng.gen_range(lo..=hi) } else { lo };
        let initial = round2(initial.max(self.config.min_price));

        self.reference.insert(symbol.clone(), initial);
        initial
    }

    fn step_from(&mut self, price: f64) -> f64 {
        let max_change = self.config.max_price_change.abs();
        let change = match &self.step {
            Some(normal) => (price * normal.sample(&mut self.rng)).clamp(-max_change, max_change),
            None => 0.0,
        };

        round2((price + change).max(self.config.min_price))
    }
}

/// Configured source backed by the shared simulator
pub struct SimulatedSource {
    id: SourceId,
    slot: usize,
    simulator: Arc<Mutex<PriceSimulator>>,
}

impl SimulatedSource {
    pub fn new(id: SourceId, slot: usize, simulator: Arc<Mutex<PriceSimulator>>) -> Self {
        Self { id, slot, simulator }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

#[async_trait]
impl SourceClient for SimulatedSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Simulated
    }

    async fn fetch_one(&self, symbol: &Symbol) -> SourceResult<Option<PriceQuote>> {
        let snapshot = self
            .simulator
            .lock()
            .next_snapshot(self.slot, std::slice::from_ref(symbol));

        Ok(snapshot
            .get(symbol.as_str())
            .map(|price| PriceQuote::new(symbol.clone(), price, self.id.clone())))
    }

    async fn fetch_many(&self, symbols: &[Symbol]) -> SourceResult<PriceSnapshot> {
        Ok(self.simulator.lock().next_snapshot(self.slot, symbols))
    }
}
