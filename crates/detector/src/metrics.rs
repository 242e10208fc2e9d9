//! Portfolio metrics over detected opportunities

use std::collections::HashMap;

use arb_core::{round4, ArbitrageOpportunity, PortfolioMetrics, Symbol};

/// Aggregate statistics. Empty input yields the zeroed default.
pub fn calculate_portfolio_metrics(opportunities: &[ArbitrageOpportunity]) -> PortfolioMetrics {
    if opportunities.is_empty() {
        return PortfolioMetrics::default();
    }

    let total_estimated_profit: f64 = opportunities.iter().map(|o| o.estimated_profit).sum();

    let margins: Vec<f64> = opportunities
        .iter()
        .map(|o| o.profit_margin_pct)
        .filter(|m| *m != 0.0)
        .collect();
    let average_profit_margin = if margins.is_empty() {
        0.0
    } else {
        margins.iter().sum::<f64>() / margins.len() as f64
    };

    // Strictly greater keeps the first of equal maxima
    let max_profit_opportunity = opportunities
        .iter()
        .fold(None::<&ArbitrageOpportunity>, |best, o| match best {
            Some(b) if o.estimated_profit <= b.estimated_profit => Some(b),
            _ => Some(o),
        })
        .cloned();

    let mut counts: HashMap<&Symbol, usize> = HashMap::new();
    let mut first_seen: Vec<&Symbol> = Vec::new();
    for o in opportunities {
        let count = counts.entry(&o.symbol).or_insert(0);
        if *count == 0 {
            first_seen.push(&o.symbol);
        }
        *count += 1;
    }

    let (most_active_symbol, most_active_count) = first_seen
        .iter()
        .fold((None::<&Symbol>, 0), |(best, best_count), symbol| {
            let count = counts[symbol];
            if count > best_count {
                (Some(*symbol), count)
            } else {
                (best, best_count)
            }
        });

    PortfolioMetrics {
        total_opportunities: opportunities.len(),
        total_estimated_profit: round4(total_estimated_profit),
        average_profit_margin: round4(average_profit_margin),
        max_profit_opportunity,
        most_active_symbol: most_active_symbol.cloned(),
        most_active_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_core::SourceId;

    fn opportunity(symbol: &str, low: f64, high: f64) -> ArbitrageOpportunity {
        ArbitrageOpportunity::from_prices(
            Symbol::new(symbol).unwrap(),
            (&SourceId::new("a").unwrap(), low),
            (&SourceId::new("b").unwrap(), high),
        )
    }

    #[test]
    fn test_empty_input() {
        let metrics = calculate_portfolio_metrics(&[]);
        assert_eq!(metrics, PortfolioMetrics::default());
        assert!(metrics.max_profit_opportunity.is_none());
        assert!(metrics.most_active_symbol.is_none());
    }

    #[test]
    fn test_totals_and_average() {
        let opportunities = vec![
            opportunity("AAPL", 100.0, 101.0),
            opportunity("TSLA", 199.0, 200.0),
            opportunity("AAPL", 100.0, 102.0),
        ];

        let metrics = calculate_portfolio_metrics(&opportunities);
        assert_eq!(metrics.total_opportunities, 3);
        assert_eq!(metrics.total_estimated_profit, 4.0);
        // (1.0 + 0.5025 + 2.0) / 3
        assert_eq!(metrics.average_profit_margin, 1.1675);
        assert_eq!(metrics.most_active_symbol.unwrap().as_str(), "AAPL");
        assert_eq!(metrics.most_active_count, 2);
        assert_eq!(metrics.max_profit_opportunity.unwrap().estimated_profit, 2.0);
    }

    #[test]
    fn test_ties_resolve_to_first_seen() {
        let opportunities = vec![
            opportunity("MSFT", 400.0, 402.0),
            opportunity("GOOGL", 140.0, 142.0),
            opportunity("GOOGL", 141.0, 141.5),
            opportunity("MSFT", 401.0, 401.5),
        ];

        let metrics = calculate_portfolio_metrics(&opportunities);
        assert_eq!(metrics.most_active_symbol.unwrap().as_str(), "MSFT");
        assert_eq!(metrics.most_active_count, 2);

        let best = metrics.max_profit_opportunity.unwrap();
        assert_eq!(best.symbol.as_str(), "MSFT");
        assert_eq!(best.buy_price, 400.0);
    }

    #[test]
    fn test_zero_margins_excluded_from_average() {
        let mut flat = opportunity("AAPL", 100.0, 101.0);
        flat.profit_margin_pct = 0.0;
        let opportunities = vec![flat, opportunity("TSLA", 100.0, 103.0)];

        let metrics = calculate_portfolio_metrics(&opportunities);
        assert_eq!(metrics.average_profit_margin, 3.0);
    }
}
