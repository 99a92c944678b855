// =============================================================================
// Fixture Provider — deterministic in-process provider for tests
// =============================================================================
//
// Advertises every capability and serves synthetic-but-plausible series that
// are a pure function of (symbol, limit), so engine runs over fixtures are
// fully deterministic. Individual capabilities can be overridden with canned
// data, and the provider can be told to fail its next N calls to exercise
// retry, fallback, and circuit-breaker paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::providers::{
    whales_from_trades, BookLevel, CvdPoint, FundingSample, Kline, OrderBookSnapshot,
    ProbeOutcome, ProviderError, ProviderResponse, SupplyInfo, Trade, TradeSide, WhaleEvent,
};
use crate::types::{Provenance, Venue};

#[derive(Default)]
struct Overrides {
    funding: HashMap<String, Vec<FundingSample>>,
    trades: HashMap<String, Vec<Trade>>,
    books: HashMap<String, OrderBookSnapshot>,
    klines: HashMap<String, Vec<Kline>>,
    supply: HashMap<String, SupplyInfo>,
    cvd: HashMap<String, Vec<CvdPoint>>,
}

struct Inner {
    venue: Venue,
    overrides: RwLock<Overrides>,
    /// Remaining calls that should fail with a transport error.
    fail_remaining: AtomicU32,
    /// Total data calls served (cache tests assert on this).
    calls: AtomicU64,
}

/// Deterministic provider double.
#[derive(Clone)]
pub struct FixtureProvider {
    inner: Arc<Inner>,
}

impl FixtureProvider {
    /// A fixture masquerading as `venue`.
    pub fn new(venue: Venue) -> Self {
        Self {
            inner: Arc::new(Inner {
                venue,
                overrides: RwLock::new(Overrides::default()),
                fail_remaining: AtomicU32::new(0),
                calls: AtomicU64::new(0),
            }),
        }
    }

    pub fn venue(&self) -> Venue {
        self.inner.venue
    }

    /// Make the next `n` data calls fail with a transport error.
    pub fn fail_times(&self, n: u32) {
        self.inner.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Number of data calls that reached this provider (cache misses).
    pub fn call_count(&self) -> u64 {
        self.inner.calls.load(Ordering::SeqCst)
    }

    // ── Overrides ───────────────────────────────────────────────────────

    pub fn set_funding(&self, symbol: &str, samples: Vec<FundingSample>) {
        self.inner.overrides.write().funding.insert(symbol.to_string(), samples);
    }

    pub fn set_trades(&self, symbol: &str, trades: Vec<Trade>) {
        self.inner.overrides.write().trades.insert(symbol.to_string(), trades);
    }

    pub fn set_book(&self, symbol: &str, book: OrderBookSnapshot) {
        self.inner.overrides.write().books.insert(symbol.to_string(), book);
    }

    pub fn set_klines(&self, symbol: &str, bars: Vec<Kline>) {
        self.inner.overrides.write().klines.insert(symbol.to_string(), bars);
    }

    pub fn set_supply(&self, symbol: &str, supply: SupplyInfo) {
        self.inner.overrides.write().supply.insert(symbol.to_string(), supply);
    }

    pub fn set_cvd(&self, symbol: &str, series: Vec<CvdPoint>) {
        self.inner.overrides.write().cvd.insert(symbol.to_string(), series);
    }

    // ── Plumbing ────────────────────────────────────────────────────────

    fn tick(&self) -> Result<(), ProviderError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.inner.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.inner.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Transport {
                venue: self.inner.venue,
                message: "fixture: injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn provenance(&self, endpoint: &str, window: String) -> Provenance {
        Provenance {
            venue: self.inner.venue,
            endpoint: endpoint.to_string(),
            window,
            latency_ms: 1,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    // ── Capabilities ────────────────────────────────────────────────────

    pub fn funding_history(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<FundingSample>>, ProviderError> {
        self.tick()?;
        let data = self
            .inner
            .overrides
            .read()
            .funding
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| synth_funding(limit));
        Ok(ProviderResponse {
            data,
            provenance: self.provenance("/fixture/funding", format!("limit={limit}")),
        })
    }

    pub fn spot_trades(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<Trade>>, ProviderError> {
        self.tick()?;
        let data = self
            .inner
            .overrides
            .read()
            .trades
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| synth_trades(limit));
        Ok(ProviderResponse {
            data,
            provenance: self.provenance("/fixture/trades", format!("limit={limit}")),
        })
    }

    pub fn order_book(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<ProviderResponse<OrderBookSnapshot>, ProviderError> {
        self.tick()?;
        let data = self
            .inner
            .overrides
            .read()
            .books
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| synth_book(symbol, depth));
        Ok(ProviderResponse {
            data,
            provenance: self.provenance("/fixture/book", format!("depth={depth}")),
        })
    }

    pub fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<Kline>>, ProviderError> {
        self.tick()?;
        let key = format!("{symbol}:{interval}");
        let overrides = self.inner.overrides.read();
        let data = overrides
            .klines
            .get(&key)
            .or_else(|| overrides.klines.get(symbol))
            .cloned()
            .unwrap_or_else(|| synth_klines(limit));
        Ok(ProviderResponse {
            data,
            provenance: self.provenance(
                "/fixture/klines",
                format!("interval={interval}&limit={limit}"),
            ),
        })
    }

    pub fn supply(&self, symbol: &str) -> Result<ProviderResponse<SupplyInfo>, ProviderError> {
        self.tick()?;
        let data = self
            .inner
            .overrides
            .read()
            .supply
            .get(symbol)
            .copied()
            .unwrap_or(SupplyInfo {
                circulating: 19_600_000.0,
                total: Some(21_000_000.0),
                max: Some(21_000_000.0),
            });
        Ok(ProviderResponse {
            data,
            provenance: self.provenance("/fixture/supply", String::new()),
        })
    }

    pub fn whale_events(
        &self,
        symbol: &str,
        min_usd_value: f64,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<WhaleEvent>>, ProviderError> {
        let resp = self.spot_trades(symbol, 1000)?;
        Ok(ProviderResponse {
            data: whales_from_trades(&resp.data, min_usd_value, limit),
            provenance: resp.provenance,
        })
    }

    pub fn cvd_series(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<CvdPoint>>, ProviderError> {
        self.tick()?;
        let data = self
            .inner
            .overrides
            .read()
            .cvd
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| synth_cvd(limit));
        Ok(ProviderResponse {
            data,
            provenance: self.provenance(
                "/fixture/cvd",
                format!("interval={interval}&limit={limit}"),
            ),
        })
    }

    pub fn probe(&self) -> ProbeOutcome {
        let failing = self.inner.fail_remaining.load(Ordering::SeqCst) > 0;
        ProbeOutcome {
            success: !failing,
            latency_ms: 1,
            error: failing.then(|| "fixture: injected failure".to_string()),
        }
    }
}

// =============================================================================
// Synthetic series
// =============================================================================

fn synth_funding(limit: usize) -> Vec<FundingSample> {
    let now = Utc::now().timestamp_millis();
    let n = limit.max(1);
    (0..n)
        .map(|i| {
            let age = (n - 1 - i) as i64;
            FundingSample {
                // Mild oscillation around +0.01% per interval.
                rate: 0.0001 + 0.00005 * (((i % 5) as f64) - 2.0),
                timestamp: now - age * 8 * 3_600_000,
                mark_price: 43_000.0 + i as f64 * 10.0,
            }
        })
        .collect()
}

fn synth_trades(limit: usize) -> Vec<Trade> {
    let now = Utc::now().timestamp_millis();
    let n = limit.max(1);
    (0..n)
        .map(|i| {
            let age = (n - 1 - i) as i64;
            Trade {
                price: 100.0 + (i % 10) as f64 * 0.01,
                size: 1.0 + (i % 7) as f64,
                side: if i % 3 == 0 { TradeSide::Sell } else { TradeSide::Buy },
                timestamp: now - age * 1000,
                trade_id: i.to_string(),
            }
        })
        .collect()
}

fn synth_book(symbol: &str, depth: usize) -> OrderBookSnapshot {
    let mid = 100.0;
    let levels = depth.clamp(1, 50);
    // 10 bps wide at the touch, deep enough to clear default depth gates.
    let bids = (0..levels)
        .map(|i| BookLevel {
            price: mid - 0.05 - i as f64 * 0.05,
            size: 20.0,
        })
        .collect();
    let asks = (0..levels)
        .map(|i| BookLevel {
            price: mid + 0.05 + i as f64 * 0.05,
            size: 20.0,
        })
        .collect();

    OrderBookSnapshot {
        symbol: symbol.to_string(),
        bids,
        asks,
        timestamp: Utc::now().timestamp_millis(),
    }
}

fn synth_klines(limit: usize) -> Vec<Kline> {
    let now = Utc::now().timestamp_millis();
    let n = limit.max(2);
    (0..n)
        .map(|i| {
            let age = (n - 1 - i) as i64;
            let base = 100.0 + i as f64 * 0.1 + 2.0 * ((i as f64) * 0.3).sin();
            Kline {
                open_time: now - age * 3_600_000,
                open: base,
                high: base + 1.0,
                low: base - 1.0,
                close: base + 0.2,
                volume: 1_000.0 + (i % 11) as f64 * 50.0,
            }
        })
        .collect()
}

fn synth_cvd(limit: usize) -> Vec<CvdPoint> {
    let now = Utc::now().timestamp_millis();
    let n = limit.max(2);
    let mut cvd = 0.0;
    (0..n)
        .map(|i| {
            let age = (n - 1 - i) as i64;
            let price = 100.0 + i as f64 * 0.05;
            // CVD loosely tracks price with a deterministic wobble.
            cvd += 10.0 * 0.05 + 3.0 * ((i as f64) * 0.7).sin();
            CvdPoint {
                timestamp: now - age * 86_400_000,
                price,
                cvd,
                volume: 1_000.0,
            }
        })
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_series_are_deterministic() {
        let a = FixtureProvider::new(Venue::Kraken);
        let b = FixtureProvider::new(Venue::Kraken);

        let fa = a.funding_history("BTCUSDT", 10).unwrap().data;
        let fb = b.funding_history("BTCUSDT", 10).unwrap().data;
        let rates_a: Vec<f64> = fa.iter().map(|s| s.rate).collect();
        let rates_b: Vec<f64> = fb.iter().map(|s| s.rate).collect();
        assert_eq!(rates_a, rates_b);
    }

    #[test]
    fn injected_failures_then_recovery() {
        let p = FixtureProvider::new(Venue::Binance);
        p.fail_times(2);

        assert!(p.spot_trades("BTCUSDT", 10).is_err());
        assert!(p.spot_trades("BTCUSDT", 10).is_err());
        assert!(p.spot_trades("BTCUSDT", 10).is_ok());
        assert_eq!(p.call_count(), 3);
    }

    #[test]
    fn overrides_replace_synthetic_data() {
        let p = FixtureProvider::new(Venue::Kraken);
        p.set_supply(
            "BTCUSDT",
            SupplyInfo {
                circulating: 1.0,
                total: None,
                max: None,
            },
        );
        let supply = p.supply("BTCUSDT").unwrap().data;
        assert_eq!(supply.circulating, 1.0);
    }

    #[test]
    fn synthetic_book_clears_default_gates() {
        let p = FixtureProvider::new(Venue::Kraken);
        let book = p.order_book("BTCUSDT", 20).unwrap().data;
        assert!(book.spread_bps().unwrap() < 50.0);
        assert!(book.depth_usd_within_pct(2.0) > 100_000.0);
    }
}
