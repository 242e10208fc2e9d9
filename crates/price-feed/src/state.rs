//! Shared status board
//!
//! Written by the aggregator after every cycle, read concurrently by status
//! consumers. Uses DashMap so readers never block the polling loop.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arb_core::{SourceId, SourceKind};

use crate::health::{HealthStatus, SourceHealth};

/// Status of one source as of the last cycle
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source: SourceId,
    pub kind: SourceKind,
    pub state: HealthStatus,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Served from cache in the last cycle
    pub stale: bool,
}

/// Point-in-time view of the feed
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub simulation_mode: bool,
    pub active_sources: Vec<SourceId>,
    pub disabled_sources: Vec<SourceId>,
    pub stale_sources: Vec<SourceId>,
    pub sources: Vec<SourceStatus>,
    pub cycles_completed: u64,
    pub last_update: Option<DateTime<Utc>>,
}

/// Concurrent status store
#[derive(Debug)]
pub struct StatusBoard {
    sources: DashMap<SourceId, SourceStatus>,

    /// Configuration order, for stable reports
    order: RwLock<Vec<SourceId>>,

    simulation_mode: AtomicBool,
    cycles_completed: AtomicU64,
    last_update: RwLock<Option<DateTime<Utc>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            sources: DashMap::new(),
            order: RwLock::new(Vec::new()),
            simulation_mode: AtomicBool::new(false),
            cycles_completed: AtomicU64::new(0),
            last_update: RwLock::new(None),
        }
    }

    /// Add a source in healthy state
    pub fn register(&self, source: &SourceId, kind: SourceKind) {
        let status = SourceStatus {
            source: source.clone(),
            kind,
            state: HealthStatus::Healthy,
            consecutive_failures: 0,
            total_failures: 0,
            last_success: None,
            last_error: None,
            stale: false,
        };

        if self.sources.insert(source.clone(), status).is_none() {
            self.order.write().push(source.clone());
        }
    }

    /// Copy a source's health into the board
    pub fn update(&self, source: &SourceId, health: &SourceHealth, stale: bool) {
        if let Some(mut entry) = self.sources.get_mut(source) {
            let status = entry.value_mut();
            status.state = health.state().status();
            status.consecutive_failures = health.consecutive_failures();
            status.total_failures = health.total_failures();
            status.last_success = health.last_success();
            status.last_error = health.last_error().map(str::to_string);
            status.stale = stale;
        }
    }

    pub fn set_simulation_mode(&self, enabled: bool) {
        self.simulation_mode.store(enabled, Ordering::Relaxed);
    }

    pub fn simulation_mode(&self) -> bool {
        self.simulation_mode.load(Ordering::Relaxed)
    }

    pub fn record_cycle(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        *self.last_update.write() = Some(Utc::now());
    }

    pub fn get(&self, source: &SourceId) -> Option<SourceStatus> {
        self.sources.get(source).map(|r| r.value().clone())
    }

    pub fn report(&self) -> StatusReport {
        let sources: Vec<SourceStatus> = self
            .order
            .read()
            .iter()
            .filter_map(|id| self.get(id))
            .collect();

        let select = |pred: fn(&SourceStatus) -> bool| -> Vec<SourceId> {
            sources
                .iter()
                .filter(|s| pred(s))
                .map(|s| s.source.clone())
                .collect()
        };

        StatusReport {
            simulation_mode: self.simulation_mode(),
            active_sources: select(|s| s.state != HealthStatus::Disabled),
            disabled_sources: select(|s| s.state == HealthStatus::Disabled),
            stale_sources: select(|s| s.stale),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            last_update: *self.last_update.read(),
            sources,
        }
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
