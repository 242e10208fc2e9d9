//! Arbitrage opportunity types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{round4, SourceId, Symbol};

/// Detected price divergence between two sources for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,

    // Prices as reported by the first and second snapshot
    pub price_a: f64,
    pub price_b: f64,

    // Spread
    pub difference_abs: f64,
    /// Percentage of the mid price (0.995 means 0.995%)
    pub difference_pct: f64,
    pub estimated_profit: f64,

    // Sides
    pub buy_source: SourceId,
    pub sell_source: SourceId,
    pub buy_price: f64,
    pub sell_price: f64,
    /// (sell - buy) / buy * 100
    pub profit_margin_pct: f64,
}

impl ArbitrageOpportunity {
    /// Build an opportunity from the two observed prices.
    ///
    /// The side with the lower price is the buy side. Callers guarantee the
    /// prices differ and are positive.
    pub fn from_prices(
        symbol: Symbol,
        (source_a, price_a): (&SourceId, f64),
        (source_b, price_b): (&SourceId, f64),
    ) -> Self {
        let diff = (price_a - price_b).abs();
        let avg = (price_a + price_b) / 2.0;

        let (buy_source, sell_source, buy_price, sell_price) = if price_a < price_b {
            (source_a, source_b, price_a, price_b)
        } else {
            (source_b, source_a, price_b, price_a)
        };

        Self {
            timestamp: Utc::now(),
            symbol,
            price_a: round4(price_a),
            price_b: round4(price_b),
            difference_abs: round4(diff),
            difference_pct: round4(diff / avg * 100.0),
            estimated_profit: round4(diff),
            buy_source: buy_source.clone(),
            sell_source: sell_source.clone(),
            buy_price: round4(buy_price),
            sell_price: round4(sell_price),
            profit_margin_pct: round4((sell_price - buy_price) / buy_price * 100.0),
        }
    }

    /// Significant opportunities are highlighted in logs
    pub fn is_significant(&self) -> bool {
        self.profit_margin_pct > 1.0
    }
}

/// Aggregate statistics over a set of opportunities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    pub total_opportunities: usize,
    pub total_estimated_profit: f64,
    pub average_profit_margin: f64,
    pub max_profit_opportunity: Option<ArbitrageOpportunity>,
    pub most_active_symbol: Option<Symbol>,
    pub most_active_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buy_side_is_cheaper_source() {
        let a = SourceId::new("alpaca").unwrap();
        let b = SourceId::new("finnhub").unwrap();
        let opp = ArbitrageOpportunity::from_prices(
            Symbol::new("AAPL").unwrap(),
            (&a, 100.0),
            (&b, 101.0),
        );

        assert_eq!(opp.buy_source, a);
        assert_eq!(opp.sell_source, b);
        assert_eq!(opp.buy_price, 100.0);
        assert_eq!(opp.sell_price, 101.0);
        assert_eq!(opp.difference_abs, 1.0);
        assert_eq!(opp.difference_pct, 0.995);
        assert_eq!(opp.profit_margin_pct, 1.0);
        assert!(!opp.is_significant());
    }

    #[test]
    fn test_json_round_trip() {
        let a = SourceId::new("a").unwrap();
        let b = SourceId::new("b").unwrap();
        let opp = ArbitrageOpportunity::from_prices(
            Symbol::new("TSLA").unwrap(),
            (&a, 200.0),
            (&b, 199.0),
        );

        let json = serde_json::to_string(&opp).unwrap();
        let back: ArbitrageOpportunity = serde_json::from_str(&json).unwrap();
        assert_eq!(opp, back);
    }
}
