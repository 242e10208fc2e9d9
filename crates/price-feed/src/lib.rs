//! Multi-source price feed
//!
//! Features:
//! - REST clients for several market data vendors behind one trait
//! - Per-source sliding-window rate limiting
//! - Health tracking with automatic disabling of failing sources
//! - Cached and simulated fallback so every cycle has two snapshots
//! - Load-aware throttle advice

pub mod aggregator;
pub mod cache;
pub mod feeds;
pub mod health;
pub mod rate_limiter;
pub mod simulator;
pub mod state;
pub mod throttle;

pub use aggregator::{AggregatorError, FeedContext, PriceAggregator};
pub use cache::PriceCache;
pub use feeds::{build_source, build_sources, probe, HttpSource, SourceClient};
pub use health::{HealthState, HealthStatus, HealthTransition, SourceHealth};
pub use rate_limiter::RateLimiter;
pub use simulator::{PriceSimulator, SimulatedSource};
pub use state::{SourceStatus, StatusBoard, StatusReport};
pub use throttle::{Assessment, PerformanceSnapshot, ThrottleAdvisor};
