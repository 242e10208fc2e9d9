//! Core types and utilities for the cross-source spread monitor
//!
//! This crate provides shared types used across all components:
//! - Symbol and source identifiers
//! - Quotes, snapshots and cycle results
//! - Arbitrage opportunity types
//! - Configuration and validation

pub mod types;
pub mod quotes;
pub mod opportunities;
pub mod config;
pub mod errors;

pub use types::*;
pub use quotes::*;
pub use opportunities::*;
pub use config::*;
pub use errors::*;
