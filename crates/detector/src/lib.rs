//! Cross-source price divergence detection
//!
//! Features:
//! - Pairwise spread detection with rayon
//! - Portfolio metrics over detected opportunities
//! - Bounded in-memory book and on-disk journal

pub mod journal;
pub mod metrics;
pub mod scanner;
pub mod strategies;

pub use journal::OpportunityJournal;
pub use metrics::calculate_portfolio_metrics;
pub use scanner::{ArbitrageScanner, CycleObserver, OpportunityBook, ScannerConfig};
pub use strategies::{
    detect_arbitrage, CrossSourceStrategy, Detection, RejectReason, SnapshotRef, Strategy,
};
