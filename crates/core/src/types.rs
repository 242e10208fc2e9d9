//! Core type definitions

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use crate::{CoreError, CoreResult};

/// Instrument identifier (case-sensitive, never empty)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn new(value: impl Into<String>) -> CoreResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(CoreError::EmptySymbol);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Symbol {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        Self::new(value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl FromStr for Symbol {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        Self::new(s)
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const SIMULATED_PREFIX: &str = "simulated-";

/// Name of a price source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceId(String);

impl SourceId {
    pub fn new(value: impl Into<String>) -> CoreResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(CoreError::EmptySourceName);
        }
        Ok(Self(value))
    }

    /// Identifier for the simulated series filling comparison slot `slot`
    pub fn simulated(slot: usize) -> Self {
        Self(format!("{}{}", SIMULATED_PREFIX, slot + 1))
    }

    pub fn is_simulated(&self) -> bool {
        self.0.starts_with(SIMULATED_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SourceId {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        Self::new(value)
    }
}

impl From<SourceId> for String {
    fn from(id: SourceId) -> Self {
        id.0
    }
}

impl FromStr for SourceId {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        Self::new(s)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Supported price source vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Alpaca,
    Polygon,
    Finnhub,
    YahooFinance,
    Simulated,
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::Alpaca => "alpaca",
            SourceKind::Polygon => "polygon",
            SourceKind::Finnhub => "finnhub",
            SourceKind::YahooFinance => "yahoo_finance",
            SourceKind::Simulated => "simulated",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            SourceKind::Alpaca => "https://data.alpaca.markets",
            SourceKind::Polygon => "https://api.polygon.io",
            SourceKind::Finnhub => "https://finnhub.io/api/v1",
            SourceKind::YahooFinance => "https://query1.finance.yahoo.com",
            SourceKind::Simulated => "",
        }
    }

    /// Requests per minute allowed on the vendor's default tier
    pub fn default_rate_limit(&self) -> u32 {
        match self {
            SourceKind::Alpaca => 200,
            SourceKind::Polygon => 5,     // Free tier
            SourceKind::Finnhub => 60,
            SourceKind::YahooFinance => 2000,  // Unofficial limit
            SourceKind::Simulated => 6000,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, SourceKind::Alpaca | SourceKind::Polygon | SourceKind::Finnhub)
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, SourceKind::Simulated)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Round to 4 decimal places (the precision of every reported spread figure)
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Round to cents
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
