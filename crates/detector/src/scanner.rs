//! Main arbitrage scanner

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use arb_core::{ArbitrageOpportunity, BotConfig, CycleResult, PortfolioMetrics};

use crate::journal::OpportunityJournal;
use crate::metrics::calculate_portfolio_metrics;
use crate::strategies::{CrossSourceStrategy, Strategy};

/// Scanner configuration
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub threshold: f64,
    pub max_in_memory: usize,
    pub persist: bool,
    pub opportunity_log: PathBuf,
    pub max_in_file: usize,
    /// Log a summary every this many cycles
    pub summary_every: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self::from_config(&BotConfig::default())
    }
}

impl ScannerConfig {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            threshold: config.detection.threshold,
            max_in_memory: config.persistence.max_in_memory,
            persist: config.persistence.enabled,
            opportunity_log: config.persistence.opportunity_log.clone(),
            max_in_file: config.persistence.max_in_file,
            summary_every: 10,
        }
    }
}

/// Bounded in-memory record of detected opportunities
#[derive(Debug, Clone)]
pub struct OpportunityBook {
    recent: VecDeque<ArbitrageOpportunity>,
    capacity: usize,
    total_detected: u64,
    total_profit: f64,
    cycles_processed: u64,
    simulated_cycles: u64,
}

impl OpportunityBook {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            recent: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            total_detected: 0,
            total_profit: 0.0,
            cycles_processed: 0,
            simulated_cycles: 0,
        }
    }

    pub fn record_cycle(&mut self, opportunities: &[ArbitrageOpportunity], simulated: bool) {
        self.cycles_processed += 1;
        if simulated {
            self.simulated_cycles += 1;
        }

        for opportunity in opportunities {
            if self.recent.len() == self.capacity {
                self.recent.pop_front();
            }
            self.recent.push_back(opportunity.clone());
            self.total_detected += 1;
            self.total_profit += opportunity.estimated_profit;
        }
    }

    /// Metrics over the retained opportunities
    pub fn metrics(&self) -> PortfolioMetrics {
        let retained: Vec<ArbitrageOpportunity> = self.recent.iter().cloned().collect();
        calculate_portfolio_metrics(&retained)
    }

    /// Up to `n` most recent opportunities, oldest first
    pub fn recent(&self, n: usize) -> Vec<ArbitrageOpportunity> {
        let skip = self.recent.len().saturating_sub(n);
        self.recent.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    /// Lifetime total, including entries no longer retained
    pub fn total_detected(&self) -> u64 {
        self.total_detected
    }

    pub fn total_profit(&self) -> f64 {
        self.total_profit
    }

    pub fn cycles_processed(&self) -> u64 {
        self.cycles_processed
    }

    pub fn simulated_cycles(&self) -> u64 {
        self.simulated_cycles
    }
}

/// Called after each processed cycle with the opportunities it produced
pub type CycleObserver = Box<dyn Fn(&CycleResult, &[ArbitrageOpportunity]) + Send + Sync>;

/// Consumes cycle results and records what the strategy finds
pub struct ArbitrageScanner {
    config: ScannerConfig,
    strategy: Box<dyn Strategy>,
    book: Arc<RwLock<OpportunityBook>>,
    journal: Option<OpportunityJournal>,
    observer: Option<CycleObserver>,
}

impl ArbitrageScanner {
    pub fn new(config: ScannerConfig) -> Self {
        let journal = config
            .persist
            .then(|| OpportunityJournal::new(config.opportunity_log.clone(), config.max_in_file));

        Self {
            strategy: Box::new(CrossSourceStrategy::new(config.threshold)),
            book: Arc::new(RwLock::new(OpportunityBook::new(config.max_in_memory))),
            journal,
            observer: None,
            config,
        }
    }

    pub fn with_observer(mut self, observer: CycleObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Shared opportunity book
    pub fn book(&self) -> Arc<RwLock<OpportunityBook>> {
        Arc::clone(&self.book)
    }

    pub fn journal(&self) -> Option<&OpportunityJournal> {
        self.journal.as_ref()
    }

    /// Consume cycles until the channel closes or shutdown fires
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<CycleResult>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        info!(
            "Starting arbitrage scanner ({} strategy, threshold {:.2}%)",
            self.strategy.name(),
            self.config.threshold * 100.0
        );

        loop {
            tokio::select! {
                maybe_cycle = rx.recv() => match maybe_cycle {
                    Some(cycle) => {
                        self.process_cycle(&cycle).await;
                    }
                    None => {
                        info!("Cycle channel closed");
                        break;
                    }
                },
                _ = &mut shutdown => {
                    info!("Scanner shutdown requested");
                    break;
                }
            }
        }

        self.log_summary("Final");
    }

    /// Detect, record and persist opportunities for one cycle
    pub async fn process_cycle(&self, cycle: &CycleResult) -> Vec<ArbitrageOpportunity> {
        let start = Instant::now();

        let Some((first, second)) = cycle.comparison_pair() else {
            warn!("Cycle {} has fewer than two snapshots, skipping", cycle.sequence);
            return Vec::new();
        };

        let opportunities = self
            .strategy
            .detect(first.into(), second.into())
            .into_opportunities();

        for opp in opportunities.iter().filter(|o| o.is_significant()) {
            info!(
                "Significant opportunity: {} buy {} @ ${:.2}, sell {} @ ${:.2}, margin {:.2}%",
                opp.symbol,
                opp.buy_source,
                opp.buy_price,
                opp.sell_source,
                opp.sell_price,
                opp.profit_margin_pct
            );
        }

        let cycles_processed = {
            let mut book = self.book.write();
            book.record_cycle(&opportunities, cycle.uses_simulated_data());
            book.cycles_processed()
        };

        if !opportunities.is_empty() {
            self.persist(&opportunities).await;
        }

        if let Some(observer) = &self.observer {
            observer(cycle, &opportunities);
        }

        debug!(
            "Cycle {} ({} vs {}): {} opportunities in {:?}",
            cycle.sequence,
            first.source,
            second.source,
            opportunities.len(),
            start.elapsed()
        );

        if self.config.summary_every > 0 && cycles_processed % self.config.summary_every == 0 {
            self.log_summary("Periodic");
        }

        opportunities
    }

    /// Write to the journal on a blocking thread; failures are logged only
    async fn persist(&self, opportunities: &[ArbitrageOpportunity]) {
        let Some(journal) = self.journal.clone() else {
            return;
        };

        let batch = opportunities.to_vec();
        match tokio::task::spawn_blocking(move || journal.append(&batch)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to save opportunities: {}", e),
            Err(e) => error!("Opportunity persistence task failed: {}", e),
        }
    }

    fn log_summary(&self, label: &str) {
        let book = self.book.read();
        let metrics = book.metrics();

        info!(
            "{} summary: {} cycles ({} simulated), {} opportunities, total profit ${:.2}, avg margin {:.2}%, most active {}",
            label,
            book.cycles_processed(),
            book.simulated_cycles(),
            book.total_detected(),
            book.total_profit(),
            metrics.average_profit_margin,
            metrics
                .most_active_symbol
                .as_ref()
                .map(|s| s.as_str())
                .unwrap_or("-")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_core::{NamedSnapshot, PriceSnapshot, SnapshotOrigin, SourceId, Symbol};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn snapshot(name: &str, origin: SnapshotOrigin, entries: &[(&str, f64)]) -> NamedSnapshot {
        let prices: PriceSnapshot = entries
            .iter()
            .map(|(s, p)| (Symbol::new(*s).unwrap(), *p))
            .collect();
        NamedSnapshot::with_origin(SourceId::new(name).unwrap(), origin, prices)
    }

    fn cycle(sequence: u64, snapshots: Vec<NamedSnapshot>) -> CycleResult {
        CycleResult {
            sequence,
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            snapshots,
            active_sources: vec![],
            failed_sources: vec![],
            simulation_mode: false,
        }
    }

    fn scenario(sequence: u64) -> CycleResult {
        cycle(
            sequence,
            vec![
                snapshot("broker_a", SnapshotOrigin::Live, &[("AAPL", 100.0), ("TSLA", 200.0)]),
                snapshot("broker_b", SnapshotOrigin::Live, &[("AAPL", 101.0), ("TSLA", 199.0)]),
            ],
        )
    }

    fn in_memory(max_in_memory: usize) -> ScannerConfig {
        ScannerConfig {
            max_in_memory,
            persist: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_process_cycle_records_opportunities() {
        let scanner = ArbitrageScanner::new(in_memory(100));

        let found = scanner.process_cycle(&scenario(1)).await;
        assert_eq!(found.len(), 2);

        let book = scanner.book();
        let book = book.read();
        assert_eq!(book.len(), 2);
        assert_eq!(book.total_detected(), 2);
        assert_eq!(book.total_profit(), 2.0);
        assert_eq!(book.cycles_processed(), 1);
        assert_eq!(book.metrics().total_opportunities, 2);
    }

    #[tokio::test]
    async fn test_book_is_bounded() {
        let scanner = ArbitrageScanner::new(in_memory(3));

        for sequence in 1..=3 {
            scanner.process_cycle(&scenario(sequence)).await;
        }

        let book = scanner.book();
        let book = book.read();
        assert_eq!(book.len(), 3);
        assert_eq!(book.total_detected(), 6);
        assert_eq!(book.recent(2).len(), 2);
        assert_eq!(book.recent(10).len(), 3);
    }

    #[tokio::test]
    async fn test_single_snapshot_cycle_skipped() {
        let scanner = ArbitrageScanner::new(in_memory(10));
        let lonely = cycle(1, vec![snapshot("a", SnapshotOrigin::Live, &[("AAPL", 1.0)])]);

        assert!(scanner.process_cycle(&lonely).await.is_empty());
        assert_eq!(scanner.book().read().cycles_processed(), 0);
    }

    #[tokio::test]
    async fn test_simulated_cycles_counted() {
        let scanner = ArbitrageScanner::new(in_memory(10));
        let simulated = cycle(
            1,
            vec![
                snapshot("yahoo", SnapshotOrigin::Live, &[("AAPL", 100.0)]),
                snapshot("simulated-1", SnapshotOrigin::Simulated, &[("AAPL", 100.0)]),
            ],
        );

        scanner.process_cycle(&simulated).await;
        assert_eq!(scanner.book().read().simulated_cycles(), 1);
    }

    #[tokio::test]
    async fn test_persists_to_journal() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScannerConfig {
            persist: true,
            opportunity_log: dir.path().join("logs/opportunities.json"),
            ..Default::default()
        };
        let scanner = ArbitrageScanner::new(config);

        scanner.process_cycle(&scenario(1)).await;
        scanner.process_cycle(&scenario(2)).await;

        let stored = scanner.journal().unwrap().load().unwrap();
        assert_eq!(stored.len(), 4);
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_stop_detection() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the log file should be makes every write fail
        let blocked = dir.path().join("opportunities.json");
        std::fs::create_dir_all(blocked.join("inner")).unwrap();

        let config = ScannerConfig {
            persist: true,
            opportunity_log: blocked,
            ..Default::default()
        };
        let scanner = ArbitrageScanner::new(config);

        let found = scanner.process_cycle(&scenario(1)).await;
        assert_eq!(found.len(), 2);
        assert_eq!(scanner.book().read().total_detected(), 2);
    }

    #[tokio::test]
    async fn test_observer_sees_each_cycle() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let scanner = ArbitrageScanner::new(in_memory(10)).with_observer(Box::new(
            move |_cycle: &CycleResult, opportunities: &[ArbitrageOpportunity]| {
                counter.fetch_add(opportunities.len(), Ordering::SeqCst);
            },
        ));

        scanner.process_cycle(&scenario(1)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_until_channel_closes() {
        let scanner = ArbitrageScanner::new(in_memory(10));
        let (tx, rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();

        tx.send(scenario(1)).await.unwrap();
        tx.send(scenario(2)).await.unwrap();
        drop(tx);

        scanner.run(rx, shutdown_rx).await;
        assert_eq!(scanner.book().read().cycles_processed(), 2);
    }
}
