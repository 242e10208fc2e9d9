//! Runner for the price divergence monitor
//!
//! Loads settings and drives the price feed and detector as background tasks

pub mod service;
pub mod settings;

pub use service::{MonitorService, MonitorStatus};
pub use settings::{load_settings, read_settings, resolve_sources};
