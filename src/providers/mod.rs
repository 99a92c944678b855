// =============================================================================
// Providers Module — capability-typed market-data adapters
// =============================================================================
//
// Each venue adapter advertises the capabilities it supports; the registry
// groups adapters per capability into fallback chains. Every response is
// wrapped with a Provenance record stamped at fetch time.
//
// Wire formats are numeric-as-string almost everywhere; adapters parse at the
// boundary and never leak raw JSON upward.

pub mod binance;
pub mod cache;
pub mod coinbase;
pub mod coingecko;
pub mod fixture;
pub mod kraken;
pub mod okx;
pub mod rate_limit;
pub mod registry;
pub mod symbols;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{Provenance, Venue};

pub use registry::{ProbeReport, ProviderRegistry};

// =============================================================================
// Capabilities
// =============================================================================

/// A typed read operation a provider may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    FundingHistory,
    SpotTrades,
    OrderBook,
    Klines,
    Supply,
    WhaleEvents,
    Cvd,
    Probe,
}

impl Capability {
    /// All capabilities, for probe enumeration.
    pub const ALL: [Capability; 8] = [
        Capability::FundingHistory,
        Capability::SpotTrades,
        Capability::OrderBook,
        Capability::Klines,
        Capability::Supply,
        Capability::WhaleEvents,
        Capability::Cvd,
        Capability::Probe,
    ];
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::FundingHistory => "funding_history",
            Self::SpotTrades => "spot_trades",
            Self::OrderBook => "order_book",
            Self::Klines => "klines",
            Self::Supply => "supply",
            Self::WhaleEvents => "whale_events",
            Self::Cvd => "cvd",
            Self::Probe => "probe",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Wire records
// =============================================================================

/// One funding-rate observation from a derivatives venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingSample {
    /// Funding rate as a decimal (0.0001 = 0.01%).
    pub rate: f64,
    /// Funding timestamp (ms since epoch).
    pub timestamp: i64,
    /// Mark price at the funding event, when the venue reports it.
    pub mark_price: f64,
}

/// Taker side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// A single executed spot trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub price: f64,
    pub size: f64,
    pub side: TradeSide,
    /// Execution time (ms since epoch).
    pub timestamp: i64,
    pub trade_id: String,
}

/// One price level of an order book side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// L2 order-book snapshot. Bids are sorted best-first (descending price),
/// asks best-first (ascending price).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    /// Snapshot time (ms since epoch).
    pub timestamp: i64,
}

impl OrderBookSnapshot {
    /// Mid price, or `None` for a one-sided book.
    pub fn mid(&self) -> Option<f64> {
        let bid = self.bids.first()?.price;
        let ask = self.asks.first()?.price;
        Some((bid + ask) / 2.0)
    }

    /// Bid/ask spread in basis points, or `None` for a one-sided book.
    pub fn spread_bps(&self) -> Option<f64> {
        let bid = self.bids.first()?.price;
        let ask = self.asks.first()?.price;
        let mid = (bid + ask) / 2.0;
        (mid > 0.0).then(|| (ask - bid) / mid * 10_000.0)
    }

    /// Total USD depth of both sides within ±`pct` percent of mid.
    pub fn depth_usd_within_pct(&self, pct: f64) -> f64 {
        let Some(mid) = self.mid() else { return 0.0 };
        let lo = mid * (1.0 - pct / 100.0);
        let hi = mid * (1.0 + pct / 100.0);

        let bid_depth: f64 = self
            .bids
            .iter()
            .filter(|l| l.price >= lo)
            .map(|l| l.price * l.size)
            .sum();
        let ask_depth: f64 = self
            .asks
            .iter()
            .filter(|l| l.price <= hi)
            .map(|l| l.price * l.size)
            .sum();
        bid_depth + ask_depth
    }
}

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Kline {
    /// Bar open time (ms since epoch).
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Circulating / total / max supply for an asset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SupplyInfo {
    pub circulating: f64,
    pub total: Option<f64>,
    pub max: Option<f64>,
}

/// A single large-trade event surfaced by whale detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleEvent {
    pub price: f64,
    pub size: f64,
    pub usd_value: f64,
    pub side: TradeSide,
    pub timestamp: i64,
    pub trade_id: String,
}

/// One point of a CVD (cumulative volume delta) series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CvdPoint {
    /// Bar open time (ms since epoch).
    pub timestamp: i64,
    pub price: f64,
    /// Running signed-volume sum up to and including this bar.
    pub cvd: f64,
    pub volume: f64,
}

/// Liveness probe outcome for a single provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub success: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A provider response: payload plus its provenance record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse<T> {
    pub data: T,
    pub provenance: Provenance,
}

// =============================================================================
// Errors
// =============================================================================

/// Error kinds distinguishable by the registry and the engine.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// The (capability, provider) pair is not supported.
    CapabilityNotSupported { venue: Venue, capability: Capability },
    /// The per-provider token bucket had no token available.
    RateLimited { venue: Venue },
    /// Network / connection failure. Retryable.
    Transport { venue: Venue, message: String },
    /// The venue answered with a non-success HTTP status.
    Api { venue: Venue, status: u16, message: String },
    /// The response body could not be parsed.
    Decode { venue: Venue, message: String },
    /// The caller's deadline elapsed before the fetch completed.
    DeadlineExceeded { venue: Venue },
    /// The provider's circuit breaker is open.
    CircuitOpen { venue: Venue },
    /// Every provider in the fallback chain failed.
    Exhausted { capability: Capability, attempts: Vec<String> },
}

impl ProviderError {
    /// Venue the error is attributed to, when there is one.
    pub fn venue(&self) -> Option<Venue> {
        match self {
            Self::CapabilityNotSupported { venue, .. }
            | Self::RateLimited { venue }
            | Self::Transport { venue, .. }
            | Self::Api { venue, .. }
            | Self::Decode { venue, .. }
            | Self::DeadlineExceeded { venue }
            | Self::CircuitOpen { venue } => Some(*venue),
            Self::Exhausted { .. } => None,
        }
    }

    /// Whether a retry against the same provider can help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Api { status: 500..=599, .. })
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CapabilityNotSupported { venue, capability } => {
                write!(f, "{venue} does not support {capability}")
            }
            Self::RateLimited { venue } => write!(f, "{venue}: rate limit exhausted"),
            Self::Transport { venue, message } => write!(f, "{venue}: transport error: {message}"),
            Self::Api { venue, status, message } => {
                write!(f, "{venue}: API returned {status}: {message}")
            }
            Self::Decode { venue, message } => write!(f, "{venue}: decode error: {message}"),
            Self::DeadlineExceeded { venue } => write!(f, "{venue}: deadline exceeded"),
            Self::CircuitOpen { venue } => write!(f, "{venue}: circuit breaker open"),
            Self::Exhausted { capability, attempts } => {
                write!(f, "all providers failed for {capability}: {}", attempts.join("; "))
            }
        }
    }
}

impl std::error::Error for ProviderError {}

// =============================================================================
// Provider dispatch
// =============================================================================

/// A concrete venue adapter behind a single dispatch type.
///
/// The registry stores these per capability; unsupported combinations return
/// [`ProviderError::CapabilityNotSupported`] instead of panicking or
/// returning a null.
#[derive(Clone)]
pub enum AnyProvider {
    Binance(binance::BinanceProvider),
    Okx(okx::OkxProvider),
    Coinbase(coinbase::CoinbaseProvider),
    Kraken(kraken::KrakenProvider),
    Coingecko(coingecko::CoingeckoProvider),
    Fixture(fixture::FixtureProvider),
}

impl AnyProvider {
    /// The venue this adapter fronts.
    pub fn venue(&self) -> Venue {
        match self {
            Self::Binance(_) => Venue::Binance,
            Self::Okx(_) => Venue::Okx,
            Self::Coinbase(_) => Venue::Coinbase,
            Self::Kraken(_) => Venue::Kraken,
            Self::Coingecko(_) => Venue::Coingecko,
            Self::Fixture(p) => p.venue(),
        }
    }

    /// The capability set this adapter advertises.
    pub fn capabilities(&self) -> &'static [Capability] {
        use Capability::*;
        match self {
            Self::Binance(_) => &[
                FundingHistory,
                SpotTrades,
                OrderBook,
                Klines,
                WhaleEvents,
                Cvd,
                Probe,
            ],
            Self::Okx(_) => &[FundingHistory, SpotTrades, OrderBook, Klines, WhaleEvents, Probe],
            Self::Coinbase(_) => &[SpotTrades, OrderBook, Klines, WhaleEvents, Probe],
            Self::Kraken(_) => &[SpotTrades, OrderBook, Klines, WhaleEvents, Probe],
            Self::Coingecko(_) => &[Supply, Probe],
            Self::Fixture(_) => &Capability::ALL,
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    fn unsupported<T>(&self, capability: Capability) -> Result<T, ProviderError> {
        Err(ProviderError::CapabilityNotSupported {
            venue: self.venue(),
            capability,
        })
    }

    // -------------------------------------------------------------------------
    // Capability dispatch
    // -------------------------------------------------------------------------

    /// Funding-rate history, most recent last.
    pub async fn funding_history(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<FundingSample>>, ProviderError> {
        match self {
            Self::Binance(p) => p.funding_history(symbol, limit).await,
            Self::Okx(p) => p.funding_history(symbol, limit).await,
            Self::Fixture(p) => p.funding_history(symbol, limit),
            _ => self.unsupported(Capability::FundingHistory),
        }
    }

    /// Recent spot trades, most recent last.
    pub async fn spot_trades(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<Trade>>, ProviderError> {
        match self {
            Self::Binance(p) => p.spot_trades(symbol, limit).await,
            Self::Okx(p) => p.spot_trades(symbol, limit).await,
            Self::Coinbase(p) => p.spot_trades(symbol, limit).await,
            Self::Kraken(p) => p.spot_trades(symbol, limit).await,
            Self::Fixture(p) => p.spot_trades(symbol, limit),
            _ => self.unsupported(Capability::SpotTrades),
        }
    }

    /// L2 order-book snapshot from the venue's native book endpoint.
    pub async fn order_book(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<ProviderResponse<OrderBookSnapshot>, ProviderError> {
        match self {
            Self::Binance(p) => p.order_book(symbol, depth).await,
            Self::Okx(p) => p.order_book(symbol, depth).await,
            Self::Coinbase(p) => p.order_book(symbol, depth).await,
            Self::Kraken(p) => p.order_book(symbol, depth).await,
            Self::Fixture(p) => p.order_book(symbol, depth),
            _ => self.unsupported(Capability::OrderBook),
        }
    }

    /// OHLCV bars, oldest first.
    pub async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<Kline>>, ProviderError> {
        match self {
            Self::Binance(p) => p.klines(symbol, interval, limit).await,
            Self::Okx(p) => p.klines(symbol, interval, limit).await,
            Self::Coinbase(p) => p.klines(symbol, interval, limit).await,
            Self::Kraken(p) => p.klines(symbol, interval, limit).await,
            Self::Fixture(p) => p.klines(symbol, interval, limit),
            _ => self.unsupported(Capability::Klines),
        }
    }

    /// Circulating / total / max supply.
    pub async fn supply(&self, symbol: &str) -> Result<ProviderResponse<SupplyInfo>, ProviderError> {
        match self {
            Self::Coingecko(p) => p.supply(symbol).await,
            Self::Fixture(p) => p.supply(symbol),
            _ => self.unsupported(Capability::Supply),
        }
    }

    /// Large-trade events at or above `min_usd_value`, derived from the
    /// venue's recent-trades feed.
    pub async fn whale_events(
        &self,
        symbol: &str,
        min_usd_value: f64,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<WhaleEvent>>, ProviderError> {
        if let Self::Fixture(p) = self {
            return p.whale_events(symbol, min_usd_value, limit);
        }
        if !self.supports(Capability::WhaleEvents) {
            return self.unsupported(Capability::WhaleEvents);
        }

        // Whale detection reuses the trades feed with a USD filter; the
        // provenance keeps the trades endpoint so the derivation is visible.
        let resp = self.spot_trades(symbol, 1000).await?;
        let events = whales_from_trades(&resp.data, min_usd_value, limit);
        Ok(ProviderResponse {
            data: events,
            provenance: resp.provenance,
        })
    }

    /// CVD series, oldest first.
    pub async fn cvd_series(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<CvdPoint>>, ProviderError> {
        match self {
            Self::Binance(p) => p.cvd_series(symbol, interval, limit).await,
            Self::Fixture(p) => p.cvd_series(symbol, interval, limit),
            _ => self.unsupported(Capability::Cvd),
        }
    }

    /// Cheap liveness check against the venue's time/ping endpoint.
    pub async fn probe(&self) -> ProbeOutcome {
        match self {
            Self::Binance(p) => p.probe().await,
            Self::Okx(p) => p.probe().await,
            Self::Coinbase(p) => p.probe().await,
            Self::Kraken(p) => p.probe().await,
            Self::Coingecko(p) => p.probe().await,
            Self::Fixture(p) => p.probe(),
        }
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Filter trades down to whale events of at least `min_usd_value`,
/// most recent first, capped at `limit`.
pub(crate) fn whales_from_trades(
    trades: &[Trade],
    min_usd_value: f64,
    limit: usize,
) -> Vec<WhaleEvent> {
    let mut events: Vec<WhaleEvent> = trades
        .iter()
        .filter_map(|t| {
            let usd = t.price * t.size;
            (usd >= min_usd_value).then(|| WhaleEvent {
                price: t.price,
                size: t.size,
                usd_value: usd,
                side: t.side,
                timestamp: t.timestamp,
                trade_id: t.trade_id.clone(),
            })
        })
        .collect();
    events.sort_by_key(|e| std::cmp::Reverse(e.timestamp));
    events.truncate(limit);
    events
}

/// Stamp a provenance record for a completed fetch.
pub(crate) fn stamp_provenance(
    venue: Venue,
    endpoint: &str,
    window: String,
    started: std::time::Instant,
) -> Provenance {
    Provenance {
        venue,
        endpoint: endpoint.to_string(),
        window,
        latency_ms: started.elapsed().as_millis() as u64,
        timestamp: Utc::now().timestamp_millis(),
    }
}

/// Parse a JSON value that may be a number or a numeric string.
///
/// Venue wire formats are numeric-as-string almost everywhere; a few fields
/// (timestamps, update ids) come back as raw numbers.
pub(crate) fn json_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Issue a GET and decode the body as JSON, classifying failures into
/// [`ProviderError`] kinds.
pub(crate) async fn get_json(
    client: &reqwest::Client,
    venue: Venue,
    url: &str,
) -> Result<serde_json::Value, ProviderError> {
    let resp = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ProviderError::DeadlineExceeded { venue }
        } else {
            ProviderError::Transport {
                venue,
                message: e.to_string(),
            }
        }
    })?;

    let status = resp.status();
    let body: serde_json::Value = resp.json().await.map_err(|e| ProviderError::Decode {
        venue,
        message: e.to_string(),
    })?;

    if !status.is_success() {
        return Err(ProviderError::Api {
            venue,
            status: status.as_u16(),
            message: body.to_string(),
        });
    }
    Ok(body)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whale_filter_respects_threshold_and_limit() {
        let trades: Vec<Trade> = (0..10)
            .map(|i| Trade {
                price: 100.0,
                size: i as f64 * 100.0,
                side: TradeSide::Buy,
                timestamp: i,
                trade_id: i.to_string(),
            })
            .collect();

        // usd = 100 * size; threshold 50_000 keeps sizes >= 500 (i >= 5).
        let events = whales_from_trades(&trades, 50_000.0, 3);
        assert_eq!(events.len(), 3);
        // Most recent first.
        assert_eq!(events[0].trade_id, "9");
        assert!(events.iter().all(|e| e.usd_value >= 50_000.0));
    }

    #[test]
    fn json_f64_accepts_strings_and_numbers() {
        assert_eq!(json_f64(&serde_json::json!("1.5")), Some(1.5));
        assert_eq!(json_f64(&serde_json::json!(2)), Some(2.0));
        assert_eq!(json_f64(&serde_json::json!(null)), None);
        assert_eq!(json_f64(&serde_json::json!("not-a-number")), None);
    }

    #[test]
    fn book_math() {
        let book = OrderBookSnapshot {
            symbol: "BTCUSDT".into(),
            bids: vec![
                BookLevel { price: 99.0, size: 10.0 },
                BookLevel { price: 90.0, size: 100.0 },
            ],
            asks: vec![
                BookLevel { price: 101.0, size: 10.0 },
                BookLevel { price: 110.0, size: 100.0 },
            ],
            timestamp: 0,
        };

        assert_eq!(book.mid(), Some(100.0));
        let spread = book.spread_bps().unwrap();
        assert!((spread - 200.0).abs() < 1e-9);

        // Only the touch levels sit within ±2% of mid 100.
        let depth = book.depth_usd_within_pct(2.0);
        assert!((depth - (99.0 * 10.0 + 101.0 * 10.0)).abs() < 1e-9);
    }

    #[test]
    fn capability_not_supported_is_well_typed() {
        let p = AnyProvider::Coingecko(coingecko::CoingeckoProvider::new(reqwest::Client::new()));
        assert!(!p.supports(Capability::OrderBook));
        let err = futures_block(p.order_book("BTCUSDT", 10)).unwrap_err();
        match err {
            ProviderError::CapabilityNotSupported { venue, capability } => {
                assert_eq!(venue, Venue::Coingecko);
                assert_eq!(capability, Capability::OrderBook);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Minimal block_on for tests that never actually await I/O.
    fn futures_block<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }
}
