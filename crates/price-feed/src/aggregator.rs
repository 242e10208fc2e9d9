//! Price aggregator - drives polling cycles across all sources

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use arb_core::{
    BotConfig, CycleResult, NamedSnapshot, PollingConfig, PriceSnapshot, SnapshotOrigin,
    SourceError, SourceId, Symbol,
};

use crate::cache::PriceCache;
use crate::feeds::{probe, SourceClient};
use crate::health::{HealthTransition, SourceHealth};
use crate::simulator::PriceSimulator;
use crate::state::StatusBoard;
use crate::throttle::{CycleSample, ThrottleAdvisor};

/// Comparison needs at least this many snapshots per cycle
const MIN_SNAPSHOTS: usize = 2;

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("No symbols to poll")]
    NoSymbols,
}

/// Collaborators handed to the aggregator at construction
#[derive(Clone)]
pub struct FeedContext {
    /// Generator for fallback series
    pub simulator: Arc<Mutex<PriceSimulator>>,
    pub advisor: Arc<Mutex<ThrottleAdvisor>>,
}

impl FeedContext {
    pub fn new(simulator: PriceSimulator, advisor: ThrottleAdvisor) -> Self {
        Self {
            simulator: Arc::new(Mutex::new(simulator)),
            advisor: Arc::new(Mutex::new(advisor)),
        }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(
            PriceSimulator::new(config.simulation.clone()),
            ThrottleAdvisor::new(config.throttle.clone(), config.polling.interval()),
        )
    }
}

/// One source and its health; polled by at most one future at a time
struct SourceLane {
    client: Arc<dyn SourceClient>,
    health: SourceHealth,
}

struct LaneOutcome {
    snapshot: Option<NamedSnapshot>,
    failed: bool,
}

impl SourceLane {
    async fn poll(
        &mut self,
        symbols: &[Symbol],
        fetch_timeout: Option<Duration>,
        cache: &PriceCache,
        board: &StatusBoard,
    ) -> LaneOutcome {
        let id = self.client.id().clone();

        let fetched = match fetch_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.client.fetch_many(symbols)).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout(limit.as_millis() as u64)),
            },
            None => self.client.fetch_many(symbols).await,
        };

        let result = fetched.and_then(|mut prices| {
            prices.retain_valid();
            let prices = prices.restrict_to(symbols);
            if prices.is_empty() {
                Err(SourceError::EmptyResult)
            } else {
                Ok(prices)
            }
        });

        match result {
            Ok(prices) => {
                cache.store(&id, prices.clone());
                match self.health.record_success() {
                    HealthTransition::Recovered => info!("Source {} recovered", id),
                    HealthTransition::Reenabled => info!("Source {} re-enabled after cool-down", id),
                    _ => {}
                }
                board.update(&id, &self.health, false);

                let origin = if self.client.kind().is_simulated() {
                    SnapshotOrigin::Simulated
                } else {
                    SnapshotOrigin::Live
                };
                LaneOutcome {
                    snapshot: Some(NamedSnapshot::with_origin(id, origin, prices)),
                    failed: false,
                }
            }
            Err(e) => {
                let transition = self.health.record_failure(e.to_string());
                match transition {
                    HealthTransition::Disabled => error!(
                        "Source {} disabled after {} consecutive failures: {}",
                        id,
                        self.health.consecutive_failures(),
                        e
                    ),
                    HealthTransition::Unchanged => warn!("Re-enable probe for {} failed: {}", id, e),
                    _ => warn!(
                        "Source {} failed ({} consecutive): {}",
                        id,
                        self.health.consecutive_failures(),
                        e
                    ),
                }

                // The cache covers the failing cycles up to and including the disabling one
                let cached = if transition == HealthTransition::Disabled || !self.health.is_disabled() {
                    cache
                        .get(&id)
                        .map(|entry| entry.prices.restrict_to(symbols))
                        .filter(|prices| !prices.is_empty())
                        .map(|prices| NamedSnapshot::with_origin(id.clone(), SnapshotOrigin::Cached, prices))
                } else {
                    None
                };

                if cached.is_some() {
                    debug!("Using cached prices for {}", id);
                }
                board.update(&id, &self.health, cached.is_some());

                LaneOutcome {
                    snapshot: cached,
                    failed: true,
                }
            }
        }
    }
}

/// Polls all sources once per cycle and assembles the snapshots
pub struct PriceAggregator {
    config: PollingConfig,
    lanes: Vec<SourceLane>,
    cache: Arc<PriceCache>,
    board: Arc<StatusBoard>,
    context: FeedContext,
    sequence: u64,
    /// Lanes fetched in the latest cycle
    last_attempts: usize,
    /// Set when fewer than two real sources are configured
    simulation_baseline: bool,
}

impl PriceAggregator {
    pub fn new(
        sources: Vec<Arc<dyn SourceClient>>,
        config: PollingConfig,
        context: FeedContext,
    ) -> Self {
        let board = Arc::new(StatusBoard::new());
        let reenable_after = config.reenable_after();

        let lanes: Vec<SourceLane> = sources
            .into_iter()
            .map(|client| {
                board.register(client.id(), client.kind());
                SourceLane {
                    client,
                    health: SourceHealth::new(config.max_consecutive_failures, reenable_after),
                }
            })
            .collect();

        let real_sources = lanes
            .iter()
            .filter(|lane| !lane.client.kind().is_simulated())
            .count();
        let simulation_baseline = real_sources < MIN_SNAPSHOTS;
        if simulation_baseline {
            warn!(
                "Only {} real source(s) configured, running in simulation mode",
                real_sources
            );
        }
        board.set_simulation_mode(simulation_baseline);

        Self {
            config,
            lanes,
            cache: Arc::new(PriceCache::new()),
            board,
            context,
            sequence: 0,
            last_attempts: 0,
            simulation_baseline,
        }
    }

    /// Shared status board
    pub fn status_board(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.board)
    }

    /// Shared last-good-snapshot cache
    pub fn cache(&self) -> Arc<PriceCache> {
        Arc::clone(&self.cache)
    }

    pub fn context(&self) -> &FeedContext {
        &self.context
    }

    pub fn source_count(&self) -> usize {
        self.lanes.len()
    }

    /// Log which sources answer for `symbol`; never changes health
    pub async fn probe_sources(&self, symbol: &Symbol) -> usize {
        let results = join_all(
            self.lanes
                .iter()
                .map(|lane| probe(lane.client.as_ref(), symbol)),
        )
        .await;

        let working = results.into_iter().filter(|ok| *ok).count();
        info!("{}/{} sources responded to probe", working, self.lanes.len());
        working
    }

    /// Run one polling cycle
    pub async fn poll_cycle(&mut self, symbols: &[Symbol]) -> Result<CycleResult, AggregatorError> {
        if symbols.is_empty() {
            return Err(AggregatorError::NoSymbols);
        }

        self.sequence += 1;
        let started_at = Utc::now();
        let start = Instant::now();
        let fetch_timeout = self.config.fetch_timeout();

        // Skipped lanes serve nothing this cycle, cached or otherwise
        for lane in self.lanes.iter().filter(|lane| !lane.health.is_pollable()) {
            self.board.update(lane.client.id(), &lane.health, false);
        }

        let polled: Vec<(SourceId, LaneOutcome)> = {
            let cache = self.cache.as_ref();
            let board = self.board.as_ref();

            join_all(
                self.lanes
                    .iter_mut()
                    .filter(|lane| lane.health.is_pollable())
                    .map(|lane| async move {
                        let id = lane.client.id().clone();
                        let outcome = lane.poll(symbols, fetch_timeout, cache, board).await;
                        (id, outcome)
                    }),
            )
            .await
        };

        self.last_attempts = polled.len();

        let failed_sources: Vec<SourceId> = polled
            .iter()
            .filter(|(_, outcome)| outcome.failed)
            .map(|(id, _)| id.clone())
            .collect();

        let mut live = Vec::new();
        let mut cached = Vec::new();
        let mut simulated = Vec::new();
        for snapshot in polled.into_iter().filter_map(|(_, outcome)| outcome.snapshot) {
            match snapshot.origin {
                SnapshotOrigin::Live => live.push(snapshot),
                SnapshotOrigin::Cached => cached.push(snapshot),
                SnapshotOrigin::Simulated => simulated.push(snapshot),
            }
        }

        let usable = live.len() + cached.len() + simulated.len();
        let missing = MIN_SNAPSHOTS.saturating_sub(usable);
        if missing > 0 {
            warn!(
                "Only {} usable snapshot(s) in cycle {}, filling {} with simulated data",
                usable, self.sequence, missing
            );
            let mut simulator = self.context.simulator.lock();
            for slot in 0..missing {
                let prices: PriceSnapshot = simulator.next_snapshot(slot, symbols);
                simulated.push(NamedSnapshot::with_origin(
                    SourceId::simulated(slot),
                    SnapshotOrigin::Simulated,
                    prices,
                ));
            }
        }

        let simulation_mode = self.simulation_baseline || missing > 0;
        self.board.set_simulation_mode(simulation_mode);
        self.board.record_cycle();

        let active_sources: Vec<SourceId> = self
            .lanes
            .iter()
            .filter(|lane| !lane.health.is_disabled())
            .map(|lane| lane.client.id().clone())
            .collect();

        let mut snapshots = live;
        snapshots.append(&mut cached);
        snapshots.append(&mut simulated);

        let cycle = CycleResult {
            sequence: self.sequence,
            started_at,
            elapsed: start.elapsed(),
            snapshots,
            active_sources,
            failed_sources,
            simulation_mode,
        };

        debug!(
            "Cycle {} complete: {} live, {} snapshots, {} failed in {:?}",
            cycle.sequence,
            cycle.live_count(),
            cycle.snapshots.len(),
            cycle.failed_sources.len(),
            cycle.elapsed
        );

        Ok(cycle)
    }

    /// Poll continuously, sending one result per cycle, until shutdown fires
    /// or the receiver is dropped
    pub async fn run(
        &mut self,
        symbols: Vec<Symbol>,
        tx: mpsc::Sender<CycleResult>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        info!(
            "Starting price aggregator with {} sources, {} symbols",
            self.lanes.len(),
            symbols.len()
        );

        if self.config.probe_on_start {
            if let Some(first) = symbols.first() {
                self.probe_sources(first).await;
            }
        }

        loop {
            let start = Instant::now();

            let pause = match self.poll_cycle(&symbols).await {
                Ok(cycle) => {
                    let processing = start.elapsed();
                    let (throttle, interval) = self.advise(&cycle, processing);

                    tokio::select! {
                        sent = tx.send(cycle) => {
                            if sent.is_err() {
                                info!("Cycle receiver dropped, stopping aggregator");
                                break;
                            }
                        }
                        _ = &mut shutdown => {
                            info!("Aggregator shutdown requested");
                            break;
                        }
                    }

                    let mut pause = interval.saturating_sub(processing).max(self.config.min_sleep());
                    if throttle {
                        warn!("System under load, throttling for {:?}", self.config.throttle_pause());
                        pause += self.config.throttle_pause();
                    }
                    pause
                }
                Err(e) => {
                    error!("Polling cycle failed: {}", e);
                    self.config.error_pause()
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = &mut shutdown => {
                    info!("Aggregator shutdown requested");
                    break;
                }
            }
        }

        info!("Price aggregator stopped after {} cycles", self.sequence);
    }

    /// Feed the advisor and read back its advice
    fn advise(&self, cycle: &CycleResult, processing: Duration) -> (bool, Duration) {
        let sample = CycleSample {
            processing_time: processing,
            fetch_attempts: self.last_attempts as u32,
            fetch_errors: cycle.failed_sources.len() as u32,
            opportunities: 0,
        };

        let mut advisor = self.context.advisor.lock();
        advisor.record_cycle(sample);

        let interval = if self.config.adaptive_interval {
            advisor.recommended_interval()
        } else {
            self.config.interval()
        };
        (advisor.should_throttle(), interval)
    }
}
