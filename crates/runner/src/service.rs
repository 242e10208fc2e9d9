//! Monitor service: wires the aggregator to the scanner

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use arb_core::{ArbitrageOpportunity, BotConfig, CycleResult, PortfolioMetrics};
use arb_detector::{ArbitrageScanner, OpportunityBook, ScannerConfig};
use arb_price_feed::{
    build_sources, Assessment, FeedContext, PerformanceSnapshot, PriceAggregator, SourceClient,
    StatusBoard, StatusReport,
};

/// Combined view for status consumers
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub uptime_secs: u64,
    pub feed: StatusReport,
    pub metrics: PortfolioMetrics,
    pub total_detected: u64,
    pub total_profit: f64,
    pub cycles_processed: u64,
    pub assessment: Assessment,
    pub performance: Option<PerformanceSnapshot>,
}

/// Background tasks and their shutdown handles
struct Running {
    aggregator: JoinHandle<()>,
    scanner: JoinHandle<()>,
    aggregator_shutdown: oneshot::Sender<()>,
    scanner_shutdown: oneshot::Sender<()>,
}

pub struct MonitorService {
    config: BotConfig,
    board: Arc<StatusBoard>,
    context: FeedContext,
    book: Arc<RwLock<OpportunityBook>>,
    /// Present until `start`
    pending: Option<(PriceAggregator, ArbitrageScanner)>,
    running: Option<Running>,
    start_time: Instant,
}

impl MonitorService {
    /// Validate the settings and build every configured source
    pub fn new(config: BotConfig) -> anyhow::Result<Self> {
        let validation = config.validate();
        for warning in &validation.warnings {
            warn!("Config warning: {}", warning);
        }
        if !validation.is_valid() {
            anyhow::bail!("Invalid configuration: {}", validation.errors.join("; "));
        }

        let sources = build_sources(&config.sources, &config.simulation);
        Ok(Self::with_sources(config, sources))
    }

    pub fn with_sources(config: BotConfig, sources: Vec<Arc<dyn SourceClient>>) -> Self {
        let context = FeedContext::from_config(&config);
        let aggregator = PriceAggregator::new(sources, config.polling.clone(), context.clone());
        let board = aggregator.status_board();

        let advisor = Arc::clone(&context.advisor);
        let scanner = ArbitrageScanner::new(ScannerConfig::from_config(&config)).with_observer(
            Box::new(move |_cycle: &CycleResult, opportunities: &[ArbitrageOpportunity]| {
                advisor.lock().record_opportunities(opportunities.len() as u32);
            }),
        );
        let book = scanner.book();

        Self {
            config,
            board,
            context,
            book,
            pending: Some((aggregator, scanner)),
            running: None,
            start_time: Instant::now(),
        }
    }

    /// Spawn the polling and scanning tasks
    pub fn start(&mut self) -> anyhow::Result<()> {
        let Some((mut aggregator, scanner)) = self.pending.take() else {
            anyhow::bail!("Monitor already started");
        };

        let symbols = self.config.polling.unique_symbols();
        let (tx, rx) = mpsc::channel(self.config.polling.channel_capacity.max(1));
        let (aggregator_shutdown, aggregator_rx) = oneshot::channel();
        let (scanner_shutdown, scanner_rx) = oneshot::channel();

        let aggregator = tokio::spawn(async move {
            aggregator.run(symbols, tx, aggregator_rx).await;
        });
        let scanner = tokio::spawn(async move {
            scanner.run(rx, scanner_rx).await;
        });

        self.running = Some(Running {
            aggregator,
            scanner,
            aggregator_shutdown,
            scanner_shutdown,
        });
        self.start_time = Instant::now();

        info!("Monitor started: {}", self.config.summary());
        Ok(())
    }

    /// Stop polling, let the scanner drain what was already sent, then wait
    /// for both tasks
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.aggregator_shutdown.send(());
        if let Err(e) = running.aggregator.await {
            error!("Aggregator task failed: {}", e);
        }

        // The aggregator dropped its sender, so the scanner ends once drained
        if let Err(e) = running.scanner.await {
            error!("Scanner task failed: {}", e);
        }
        drop(running.scanner_shutdown);

        info!("All services stopped");
    }

    /// Stop both tasks without draining
    pub async fn abort(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.scanner_shutdown.send(());
        let _ = running.aggregator_shutdown.send(());
        let _ = running.scanner.await;
        let _ = running.aggregator.await;
        info!("All services aborted");
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn book(&self) -> Arc<RwLock<OpportunityBook>> {
        Arc::clone(&self.book)
    }

    pub fn status_board(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.board)
    }

    pub fn status(&self) -> MonitorStatus {
        let (metrics, total_detected, total_profit, cycles_processed) = {
            let book = self.book.read();
            (
                book.metrics(),
                book.total_detected(),
                book.total_profit(),
                book.cycles_processed(),
            )
        };

        let (assessment, performance) = {
            let advisor = self.context.advisor.lock();
            (advisor.assessment(), advisor.snapshot().cloned())
        };

        MonitorStatus {
            running: self.is_running(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            feed: self.board.report(),
            metrics,
            total_detected,
            total_profit,
            cycles_processed,
            assessment,
            performance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_core::{SourceConfig, SourceId, SourceKind};
    use std::time::Duration;

    fn simulated_config(dir: &std::path::Path) -> BotConfig {
        let mut config = BotConfig::default();
        config.sources = vec![
            SourceConfig::new(SourceId::new("sim-a").unwrap(), SourceKind::Simulated),
            SourceConfig::new(SourceId::new("sim-b").unwrap(), SourceKind::Simulated),
        ];
        config.polling.interval_ms = 20;
        config.polling.min_sleep_ms = 5;
        config.simulation.seed = Some(7);
        config.persistence.opportunity_log = dir.join("opportunities.json");
        config
    }

    #[test]
    fn test_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = simulated_config(dir.path());
        config.detection.threshold = 0.0;

        assert!(MonitorService::new(config).is_err());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = MonitorService::new(simulated_config(dir.path())).unwrap();
        assert!(!service.is_running());

        service.start().unwrap();
        assert!(service.is_running());
        assert!(service.start().is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        service.stop().await;

        let status = service.status();
        assert!(!status.running);
        assert!(status.cycles_processed > 0);
        assert_eq!(status.feed.sources.len(), 2);
        assert!(status.feed.cycles_completed >= status.cycles_processed);
        assert!(status.feed.simulation_mode);
    }

    #[tokio::test]
    async fn test_status_serializes() {
        let dir = tempfile::tempdir().unwrap();
        let service = MonitorService::new(simulated_config(dir.path())).unwrap();

        let json = serde_json::to_value(service.status()).unwrap();
        assert_eq!(json["running"], false);
        assert_eq!(json["assessment"], "INITIALIZING");
        assert_eq!(json["metrics"]["total_opportunities"], 0);
    }

    #[tokio::test]
    async fn test_abort_before_start_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = MonitorService::new(simulated_config(dir.path())).unwrap();

        service.abort().await;
        service.stop().await;
        assert!(!service.is_running());
    }
}
