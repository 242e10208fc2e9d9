//! Price source clients
//!
//! Every vendor is reduced to the same capability: fetch the latest price for
//! one symbol or a symbol set. The aggregator never special-cases a vendor.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use arb_core::{
    PriceQuote, PriceSnapshot, SimulationConfig, SourceConfig, SourceError, SourceId,
    SourceKind, SourceResult, Symbol,
};

use crate::rate_limiter::RateLimiter;
use crate::simulator::{PriceSimulator, SimulatedSource};

/// Capability shared by all price sources
#[async_trait]
pub trait SourceClient: Send + Sync {
    fn id(&self) -> &SourceId;
    fn kind(&self) -> SourceKind;

    /// Latest quote for one symbol; `Ok(None)` when the source has no valid price
    async fn fetch_one(&self, symbol: &Symbol) -> SourceResult<Option<PriceQuote>>;

    /// Latest prices for a symbol set; symbols without a valid price are absent
    async fn fetch_many(&self, symbols: &[Symbol]) -> SourceResult<PriceSnapshot>;
}

/// HTTP vendors understood by [`HttpSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Vendor {
    Alpaca,
    Polygon,
    Finnhub,
    Yahoo,
}

impl Vendor {
    fn from_kind(kind: SourceKind) -> Option<Self> {
        match kind {
            SourceKind::Alpaca => Some(Vendor::Alpaca),
            SourceKind::Polygon => Some(Vendor::Polygon),
            SourceKind::Finnhub => Some(Vendor::Finnhub),
            SourceKind::YahooFinance => Some(Vendor::Yahoo),
            SourceKind::Simulated => None,
        }
    }

    fn kind(&self) -> SourceKind {
        match self {
            Vendor::Alpaca => SourceKind::Alpaca,
            Vendor::Polygon => SourceKind::Polygon,
            Vendor::Finnhub => SourceKind::Finnhub,
            Vendor::Yahoo => SourceKind::YahooFinance,
        }
    }

    fn supports_batch(&self) -> bool {
        matches!(self, Vendor::Alpaca | Vendor::Yahoo)
    }
}

// Vendor payloads. Only the fields needed for a price are decoded.

#[derive(Debug, Deserialize)]
struct AlpacaQuote {
    #[serde(alias = "bid", default)]
    bp: f64,
    #[serde(alias = "ask", default)]
    ap: f64,
}

#[derive(Debug, Deserialize)]
struct AlpacaLatest {
    quote: AlpacaQuote,
}

#[derive(Debug, Deserialize)]
struct AlpacaLatestBatch {
    #[serde(default)]
    quotes: HashMap<String, AlpacaQuote>,
}

#[derive(Debug, Deserialize)]
struct PolygonTrade {
    #[serde(default)]
    p: f64,
}

#[derive(Debug, Deserialize)]
struct PolygonLastTrade {
    results: Option<PolygonTrade>,
}

#[derive(Debug, Deserialize)]
struct FinnhubQuote {
    /// Current price
    #[serde(default)]
    c: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooMeta {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    regular_market_price: f64,
}

#[derive(Debug, Deserialize)]
struct YahooChartResult {
    meta: YahooMeta,
}

#[derive(Debug, Deserialize)]
struct YahooChartBody {
    result: Option<Vec<YahooChartResult>>,
}

#[derive(Debug, Deserialize)]
struct YahooChart {
    chart: YahooChartBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooQuoteResponse {
    quote_response: YahooQuoteBody,
}

#[derive(Debug, Deserialize)]
struct YahooQuoteBody {
    #[serde(default)]
    result: Vec<YahooMeta>,
}

/// Mid price when both sides are quoted, otherwise whichever side exists
fn mid_price(bid: f64, ask: f64) -> f64 {
    if bid > 0.0 && ask > 0.0 {
        (bid + ask) / 2.0
    } else if bid > 0.0 {
        bid
    } else {
        ask
    }
}

/// REST price source for one of the supported vendors
pub struct HttpSource {
    id: SourceId,
    vendor: Vendor,
    base_url: String,
    api_key: Option<String>,
    secret_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
    limiter: RateLimiter,
}

impl HttpSource {
    pub fn new(config: &SourceConfig) -> SourceResult<Self> {
        let vendor = Vendor::from_kind(config.kind).ok_or(SourceError::Unsupported(config.kind))?;
        if !config.has_credentials() {
            return Err(SourceError::MissingCredentials(config.kind));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SourceError::Http(e.to_string()))?;

        Ok(Self {
            id: config.name.clone(),
            vendor,
            base_url: config.base_url().trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            timeout: config.timeout(),
            client,
            limiter: RateLimiter::per_minute(config.rate_limit()),
        })
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn api_key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }

    /// Rate-limited GET returning decoded JSON
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> SourceResult<T> {
        self.limiter.acquire().await;

        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url).query(query);

        if self.vendor == Vendor::Alpaca {
            request = request
                .header("APCA-API-KEY-ID", self.api_key())
                .header("APCA-API-SECRET-KEY", self.secret_key.as_deref().unwrap_or_default());
        }

        let response = request.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                source_name: self.id.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }

    fn map_error(&self, e: reqwest::Error) -> SourceError {
        if e.is_timeout() {
            SourceError::Timeout(self.timeout.as_millis() as u64)
        } else {
            SourceError::Http(e.to_string())
        }
    }

    fn quote(&self, symbol: &Symbol, price: f64) -> PriceQuote {
        PriceQuote::new(symbol.clone(), price, self.id.clone())
    }

    /// One request per symbol; partial success is allowed
    async fn fetch_each(&self, symbols: &[Symbol]) -> SourceResult<PriceSnapshot> {
        let mut snapshot = PriceSnapshot::new();
        let mut last_error = None;

        for symbol in symbols {
            match self.fetch_one(symbol).await {
                Ok(Some(quote)) => {
                    snapshot.insert(quote.symbol, quote.price);
                }
                Ok(None) => debug!("{} returned no price for {}", self.id, symbol),
                Err(e) => {
                    warn!("Error getting {} price for {}: {}", self.id, symbol, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if snapshot.is_empty() => Err(e),
            _ => Ok(snapshot),
        }
    }

    async fn fetch_batch(&self, symbols: &[Symbol]) -> SourceResult<PriceSnapshot> {
        let joined = symbols
            .iter()
            .map(Symbol::as_str)
            .collect::<Vec<_>>()
            .join(",");

        let priced: Vec<(String, f64)> = match self.vendor {
            Vendor::Alpaca => {
                let body: AlpacaLatestBatch = self
                    .get_json("/v2/stocks/quotes/latest", &[("symbols", joined.as_str())])
                    .await?;
                body.quotes
                    .into_iter()
                    .map(|(symbol, q)| (symbol, mid_price(q.bp, q.ap)))
                    .collect()
            }
            Vendor::Yahoo => {
                let body: YahooQuoteResponse = self
                    .get_json("/v7/finance/quote", &[("symbols", joined.as_str())])
                    .await?;
                body.quote_response
                    .result
                    .into_iter()
                    .map(|meta| (meta.symbol, meta.regular_market_price))
                    .collect()
            }
            Vendor::Polygon | Vendor::Finnhub => return self.fetch_each(symbols).await,
        };

        let snapshot: PriceSnapshot = priced
            .into_iter()
            .filter_map(|(symbol, price)| {
                let symbol = symbols.iter().find(|s| s.as_str() == symbol)?;
                Some(self.quote(symbol, price))
            })
            .filter(PriceQuote::is_valid)
            .map(|q| (q.symbol, q.price))
            .collect();

        Ok(snapshot)
    }
}

#[async_trait]
impl SourceClient for HttpSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        self.vendor.kind()
    }

    async fn fetch_one(&self, symbol: &Symbol) -> SourceResult<Option<PriceQuote>> {
        let quote = match self.vendor {
            Vendor::Alpaca => {
                let path = format!("/v2/stocks/{}/quotes/latest", symbol);
                let body: AlpacaLatest = self.get_json(&path, &[]).await?;
                let (bid, ask) = (body.quote.bp, body.quote.ap);
                self.quote(symbol, mid_price(bid, ask))
                    .with_bid_ask(Some(bid), Some(ask))
            }
            Vendor::Polygon => {
                let path = format!("/v2/last/trade/{}", symbol);
                let body: PolygonLastTrade = self.get_json(&path, &[("apiKey", self.api_key())]).await?;
                let price = body.results.map(|t| t.p).unwrap_or_default();
                self.quote(symbol, price)
            }
            Vendor::Finnhub => {
                let body: FinnhubQuote = self
                    .get_json("/quote", &[("symbol", symbol.as_str()), ("token", self.api_key())])
                    .await?;
                self.quote(symbol, body.c)
            }
            Vendor::Yahoo => {
                let path = format!("/v8/finance/chart/{}", symbol);
                let body: YahooChart = self.get_json(&path, &[]).await?;
                let price = body
                    .chart
                    .result
                    .and_then(|results| results.into_iter().next())
                    .map(|r| r.meta.regular_market_price)
                    .unwrap_or_default();
                self.quote(symbol, price)
            }
        };

        Ok(Some(quote).filter(PriceQuote::is_valid))
    }

    async fn fetch_many(&self, symbols: &[Symbol]) -> SourceResult<PriceSnapshot> {
        if symbols.is_empty() {
            return Ok(PriceSnapshot::new());
        }

        if !self.vendor.supports_batch() {
            return self.fetch_each(symbols).await;
        }

        match self.fetch_batch(symbols).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) if self.vendor == Vendor::Yahoo => {
                warn!("Yahoo batch request failed ({}), falling back to single requests", e);
                self.fetch_each(symbols).await
            }
            Err(e) => Err(e),
        }
    }
}

/// Create the client for one configured source
pub fn build_source(
    config: &SourceConfig,
    simulator: &Arc<Mutex<PriceSimulator>>,
    slot: usize,
) -> SourceResult<Arc<dyn SourceClient>> {
    match config.kind {
        SourceKind::Simulated => Ok(Arc::new(SimulatedSource::new(
            config.name.clone(),
            slot,
            Arc::clone(simulator),
        ))),
        _ => Ok(Arc::new(HttpSource::new(config)?)),
    }
}

/// Create clients for every enabled source, skipping ones that cannot be built
pub fn build_sources(
    configs: &[SourceConfig],
    simulation: &SimulationConfig,
) -> Vec<Arc<dyn SourceClient>> {
    let simulator = Arc::new(Mutex::new(PriceSimulator::new(simulation.clone())));
    let mut sources = Vec::new();
    let mut simulated_slots = 0;

    for config in configs.iter().filter(|c| c.enabled) {
        let slot = simulated_slots;
        match build_source(config, &simulator, slot) {
            Ok(source) => {
                if config.kind.is_simulated() {
                    simulated_slots += 1;
                }
                info!("Created {} source {}", config.kind, config.name);
                sources.push(source);
            }
            Err(e) => warn!("Failed to create source {}: {}", config.name, e),
        }
    }

    sources
}

/// Check that a source answers with a valid price
pub async fn probe(source: &dyn SourceClient, symbol: &Symbol) -> bool {
    match source.fetch_one(symbol).await {
        Ok(Some(quote)) => {
            info!("Source {} is working ({}=${:.2})", source.id(), symbol, quote.price);
            true
        }
        Ok(None) => {
            warn!("Source {} returned invalid data for {}", source.id(), symbol);
            false
        }
        Err(e) => {
            warn!("Source {} connection failed: {}", source.id(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, kind: SourceKind) -> SourceConfig {
        SourceConfig::new(SourceId::new(name).unwrap(), kind)
    }

    #[test]
    fn test_mid_price() {
        assert_eq!(mid_price(100.0, 102.0), 101.0);
        assert_eq!(mid_price(100.0, 0.0), 100.0);
        assert_eq!(mid_price(0.0, 102.0), 102.0);
        assert_eq!(mid_price(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_payload_decoding() {
        let alpaca: AlpacaLatestBatch = serde_json::from_str(
            r#"{"quotes": {"AAPL": {"bp": 189.5, "ap": 190.5, "t": "2024-01-01T00:00:00Z"}}}"#,
        )
        .unwrap();
        let q = &alpaca.quotes["AAPL"];
        assert_eq!(mid_price(q.bp, q.ap), 190.0);

        let legacy: AlpacaLatest =
            serde_json::from_str(r#"{"quote": {"bid": 10.0, "ask": 12.0}}"#).unwrap();
        assert_eq!(legacy.quote.bp, 10.0);

        let polygon: PolygonLastTrade =
            serde_json::from_str(r#"{"status": "OK", "results": {"p": 250.1}}"#).unwrap();
        assert_eq!(polygon.results.unwrap().p, 250.1);

        let finnhub: FinnhubQuote = serde_json::from_str(r#"{"c": 0, "h": 0}"#).unwrap();
        assert_eq!(finnhub.c, 0.0);

        let yahoo: YahooChart = serde_json::from_str(
            r#"{"chart": {"result": [{"meta": {"symbol": "MSFT", "regularMarketPrice": 410.2}}], "error": null}}"#,
        )
        .unwrap();
        assert_eq!(yahoo.chart.result.unwrap()[0].meta.regular_market_price, 410.2);

        let empty: YahooChart =
            serde_json::from_str(r#"{"chart": {"result": null, "error": {"code": "Not Found"}}}"#)
                .unwrap();
        assert!(empty.chart.result.is_none());
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let err = HttpSource::new(&config("polygon", SourceKind::Polygon)).err().unwrap();
        assert!(matches!(err, SourceError::MissingCredentials(SourceKind::Polygon)));

        let mut with_key = config("polygon", SourceKind::Polygon);
        with_key.api_key = Some("key".into());
        assert!(HttpSource::new(&with_key).is_ok());
    }

    #[test]
    fn test_build_sources_skips_unbuildable() {
        let mut disabled = config("yahoo-off", SourceKind::YahooFinance);
        disabled.enabled = false;

        let configs = vec![
            config("sim-a", SourceKind::Simulated),
            config("finnhub", SourceKind::Finnhub),
            config("yahoo", SourceKind::YahooFinance),
            disabled,
        ];

        let sources = build_sources(&configs, &SimulationConfig::default());
        let names: Vec<&str> = sources.iter().map(|s| s.id().as_str()).collect();
        assert_eq!(names, vec!["sim-a", "yahoo"]);
        assert_eq!(sources[0].kind(), SourceKind::Simulated);
        assert_eq!(sources[1].kind(), SourceKind::YahooFinance);
    }

    #[tokio::test]
    async fn test_probe_simulated_source() {
        let configs = vec![config("sim-a", SourceKind::Simulated)];
        let sources = build_sources(&configs, &SimulationConfig::default());
        let symbol = Symbol::new("AAPL").unwrap();

        assert!(probe(sources[0].as_ref(), &symbol).await);
    }
}
