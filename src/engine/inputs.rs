// =============================================================================
// Candidate Inputs — live factor and market-snapshot construction
// =============================================================================
//
// Builds the per-symbol inputs the engine consumes. API callers may supply
// fully-populated inputs; the live scan loop derives them from provider
// data:
//
//   - momentum: multi-timeframe (1h/4h/24h/7d) return blend mapped to 0-100
//   - technical: 4h RSI plus a 20-bar breakout bonus
//   - volume: 24h volume expansion vs the prior 24h
//   - quality: book tightness and depth
//   - social: no feed wired in; enters neutral at zero contribution
//
// VADR is proxied as (today's range / trailing average range) scaled by the
// square root of the volume ratio. The VIX-equivalent is the annualized
// short-horizon realized vol scaled into index points. Both derivations are
// tunable heuristics, not venue-published values.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, warn};

use crate::gates::SqueezeInputs;
use crate::indicators::latest_rsi;
use crate::providers::{Kline, ProviderRegistry};
use crate::regime::MarketIndicators;
use crate::types::RawFactors;

// =============================================================================
// Types
// =============================================================================

/// Everything the engine wants to know about a symbol besides its factors.
/// `None` means "fetch it from the registry if possible".
#[derive(Debug, Clone, Default)]
pub struct MarketObservations {
    pub price: f64,
    pub price_change_24h_pct: f64,
    pub volume_ratio_24h: Option<f64>,
    pub vadr: Option<f64>,
    pub spread_bps: Option<f64>,
    pub depth_usd: Option<f64>,
    pub rsi_4h: Option<f64>,
    pub accel_renewed: bool,
    pub bars_since_signal: u32,
    pub seconds_since_trigger: u64,
    pub trigger_price: Option<f64>,
    pub funding_z: Option<f64>,
    pub oi_residual_usd: Option<f64>,
    pub has_etf: bool,
    pub etf_tint: Option<f64>,
    pub whale_composite: Option<f64>,
    pub squeeze: SqueezeInputs,
    /// Observed USD prices for monitored stablecoins.
    pub stable_prices: HashMap<String, f64>,
    /// Age of each upstream feed in seconds ("worst feed wins").
    pub feed_ages_secs: BTreeMap<String, u64>,
}

/// One symbol's input to an engine call.
#[derive(Debug, Clone)]
pub struct CandidateInput {
    pub symbol: String,
    pub raw_factors: RawFactors,
    pub market: MarketObservations,
}

impl CandidateInput {
    /// An input with the given factors and empty market observations; the
    /// engine fills what it can from the registry.
    pub fn with_factors(symbol: &str, raw_factors: RawFactors) -> Self {
        Self {
            symbol: symbol.to_string(),
            raw_factors,
            market: MarketObservations::default(),
        }
    }
}

// =============================================================================
// Live construction
// =============================================================================

/// Build a live candidate input for `symbol` from provider data.
pub async fn build_candidate_input(
    registry: &ProviderRegistry,
    symbol: &str,
    deadline: Instant,
) -> Result<CandidateInput> {
    let now_ms = Utc::now().timestamp_millis();

    let hourly = registry
        .klines(symbol, "1h", 48, Some(deadline))
        .await
        .map_err(anyhow::Error::new)
        .with_context(|| format!("{symbol}: 1h klines"))?;
    let four_hour = registry
        .klines(symbol, "4h", 60, Some(deadline))
        .await
        .map_err(anyhow::Error::new)
        .with_context(|| format!("{symbol}: 4h klines"))?;
    let daily = registry
        .klines(symbol, "1d", 30, Some(deadline))
        .await
        .map_err(anyhow::Error::new)
        .with_context(|| format!("{symbol}: 1d klines"))?;

    let bars_1h = &hourly.data;
    let bars_4h = &four_hour.data;
    let bars_1d = &daily.data;
    if bars_1h.len() < 25 || bars_4h.len() < 20 || bars_1d.len() < 8 {
        anyhow::bail!("{symbol}: insufficient kline history");
    }

    let price = bars_1h.last().map(|k| k.close).unwrap_or(0.0);

    // ── Multi-timeframe momentum ────────────────────────────────────────
    let r_1h = pct_change(bars_1h, 1);
    let r_4h = pct_change(bars_1h, 4);
    let r_24h = pct_change(bars_1h, 24);
    let r_7d = pct_change(bars_1d, 7);
    let momentum_core =
        (50.0 + 2.5 * r_1h + 2.0 * r_4h + 1.2 * r_24h + 0.5 * r_7d).clamp(0.0, 100.0);

    // ── Technical: 4h RSI plus breakout bonus ───────────────────────────
    let closes_4h: Vec<f64> = bars_4h.iter().map(|k| k.close).collect();
    let rsi_4h = latest_rsi(&closes_4h, 14);
    let lookback_high = bars_4h[..bars_4h.len() - 1]
        .iter()
        .rev()
        .take(20)
        .map(|k| k.high)
        .fold(f64::MIN, f64::max);
    let breakout_bonus = if price > lookback_high { 10.0 } else { 0.0 };
    let technical =
        (50.0 + (rsi_4h.unwrap_or(50.0) - 50.0) * 0.8 + breakout_bonus).clamp(0.0, 100.0);

    // ── Volume expansion ────────────────────────────────────────────────
    let recent_vol: f64 = bars_1h.iter().rev().take(24).map(|k| k.volume).sum();
    let prior_vol: f64 = bars_1h.iter().rev().skip(24).take(24).map(|k| k.volume).sum();
    let volume_ratio = if prior_vol > 0.0 {
        recent_vol / prior_vol
    } else {
        1.0
    };
    let volume = (volume_ratio * 50.0).clamp(0.0, 100.0);

    // ── Quality from the book ───────────────────────────────────────────
    let book = registry.order_book(symbol, 50, Some(deadline)).await.ok();
    let (spread_bps, depth_usd) = match &book {
        Some(resp) => (resp.data.spread_bps(), Some(resp.data.depth_usd_within_pct(2.0))),
        None => (None, None),
    };
    let quality = match (spread_bps, depth_usd) {
        (Some(spread), Some(depth)) => {
            let tightness = (100.0 - spread).clamp(0.0, 100.0) * 0.5;
            let depth_part = (depth / 200_000.0).min(1.0) * 50.0;
            tightness + depth_part
        }
        _ => 50.0,
    };

    // ── VADR proxy ──────────────────────────────────────────────────────
    let vadr = vadr_proxy(bars_1d, volume_ratio);

    // ── 4h re-acceleration ──────────────────────────────────────────────
    let accel_renewed = if closes_4h.len() >= 3 {
        let n = closes_4h.len();
        (closes_4h[n - 1] - closes_4h[n - 2]) > (closes_4h[n - 2] - closes_4h[n - 3])
    } else {
        false
    };

    // ── Feed ages ───────────────────────────────────────────────────────
    let mut feed_ages_secs = BTreeMap::new();
    let bar_age = |bars: &[Kline], interval_secs: i64| -> u64 {
        bars.last()
            .map(|k| ((now_ms - k.open_time) / 1000 - interval_secs).max(0) as u64)
            .unwrap_or(0)
    };
    feed_ages_secs.insert("klines_1h".to_string(), bar_age(bars_1h, 3_600));
    feed_ages_secs.insert("klines_4h".to_string(), bar_age(bars_4h, 14_400));

    let raw_factors = RawFactors {
        symbol: symbol.to_string(),
        momentum_core,
        technical,
        volume,
        quality,
        catalyst: None,
        // No social feed wired in: neutral zero contribution.
        social: 0.0,
        timestamp: now_ms,
    };

    debug!(
        symbol,
        momentum = format!("{momentum_core:.1}"),
        technical = format!("{technical:.1}"),
        volume = format!("{volume:.1}"),
        quality = format!("{quality:.1}"),
        "live factors built"
    );

    Ok(CandidateInput {
        symbol: symbol.to_string(),
        raw_factors,
        market: MarketObservations {
            price,
            price_change_24h_pct: r_24h,
            volume_ratio_24h: Some(volume_ratio),
            vadr,
            spread_bps,
            depth_usd,
            rsi_4h,
            accel_renewed,
            feed_ages_secs,
            ..Default::default()
        },
    })
}

/// Gather market-wide regime indicators from provider data.
pub async fn gather_market_indicators(
    registry: &ProviderRegistry,
    symbols: &[String],
    deadline: Instant,
) -> Result<MarketIndicators> {
    let btc_hourly = registry
        .klines("BTCUSDT", "1h", 48, Some(deadline))
        .await
        .map_err(anyhow::Error::new)
        .context("BTC 1h klines")?;
    let btc_daily = registry
        .klines("BTCUSDT", "1d", 9, Some(deadline))
        .await
        .map_err(anyhow::Error::new)
        .context("BTC 1d klines")?;

    let btc_change_24h_pct = pct_change(&btc_hourly.data, 24);

    // Breadth and dispersion from the scan universe's 24h changes.
    let mut changes: Vec<f64> = Vec::with_capacity(symbols.len());
    for symbol in symbols.iter().take(20) {
        match registry.klines(symbol, "1h", 25, Some(deadline)).await {
            Ok(resp) => changes.push(pct_change(&resp.data, 24)),
            Err(e) => warn!(symbol, error = %e, "breadth constituent unavailable"),
        }
    }
    let breadth_advancing_pct = if changes.is_empty() {
        50.0
    } else {
        changes.iter().filter(|c| **c > 0.0).count() as f64 / changes.len() as f64 * 100.0
    };
    let cross_section_dispersion = stdev(&changes) / 100.0;

    // Realized vol, 7d annualized, from daily log returns.
    let daily_closes: Vec<f64> = btc_daily.data.iter().map(|k| k.close).collect();
    let log_returns: Vec<f64> = daily_closes
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect();
    let realized_vol_7d = stdev(&log_returns) * (365.0_f64).sqrt();

    // VIX-equivalent: short-horizon annualized vol scaled to index points.
    let hourly_closes: Vec<f64> = btc_hourly.data.iter().map(|k| k.close).collect();
    let hourly_returns: Vec<f64> = hourly_closes
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect();
    let vix_proxy = stdev(&hourly_returns) * (24.0_f64 * 365.0).sqrt() * 100.0 / 2.5;

    // Funding extreme across the universe, from the BTC chain.
    let max_abs_funding_pct = match registry
        .funding_history("BTCUSDT", 3, Some(deadline))
        .await
    {
        Ok(resp) => resp
            .data
            .iter()
            .map(|s| (s.rate * 100.0).abs())
            .fold(0.0, f64::max),
        Err(e) => {
            warn!(error = %e, "funding history unavailable for indicators");
            0.0
        }
    };

    // Stablecoin flight proxy: 24h volume vs the prior 24h.
    let volumes: Vec<f64> = btc_hourly.data.iter().map(|k| k.volume).collect();
    let recent: f64 = volumes.iter().rev().take(24).sum();
    let prior: f64 = volumes.iter().rev().skip(24).take(24).sum();
    let stablecoin_volume_ratio = if prior > 0.0 { recent / prior } else { 1.0 };

    Ok(MarketIndicators {
        btc_change_24h_pct,
        breadth_advancing_pct,
        cross_section_dispersion,
        realized_vol_7d,
        vix_proxy,
        max_abs_funding_pct,
        stablecoin_volume_ratio,
        timestamp: Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Numerics
// =============================================================================

/// Percent change of the last close vs the close `bars_back` bars earlier.
fn pct_change(bars: &[Kline], bars_back: usize) -> f64 {
    if bars.len() <= bars_back {
        return 0.0;
    }
    let latest = bars[bars.len() - 1].close;
    let earlier = bars[bars.len() - 1 - bars_back].close;
    if earlier <= 0.0 {
        return 0.0;
    }
    (latest - earlier) / earlier * 100.0
}

/// VADR proxy: today's range vs the trailing 20-day average range, scaled by
/// the square root of the volume ratio.
fn vadr_proxy(daily: &[Kline], volume_ratio: f64) -> Option<f64> {
    if daily.len() < 8 {
        return None;
    }
    let today = daily.last()?;
    let today_range = today.high - today.low;

    let trailing = &daily[..daily.len() - 1];
    let window = trailing.iter().rev().take(20).collect::<Vec<_>>();
    let avg_range =
        window.iter().map(|k| k.high - k.low).sum::<f64>() / window.len() as f64;
    if avg_range <= 0.0 {
        return None;
    }

    Some((today_range / avg_range) * volume_ratio.max(0.0).sqrt())
}

/// Population standard deviation.
fn stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderRegistryConfig;
    use crate::providers::fixture::FixtureProvider;
    use crate::providers::AnyProvider;
    use crate::types::Venue;
    use std::time::Duration;

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new(
            ProviderRegistryConfig {
                preference: vec![Venue::Kraken],
                ..Default::default()
            },
            vec![AnyProvider::Fixture(FixtureProvider::new(Venue::Kraken))],
        )
    }

    fn bar(close: f64, volume: f64) -> Kline {
        Kline {
            open_time: 0,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume,
        }
    }

    #[test]
    fn pct_change_basics() {
        let bars: Vec<Kline> = (1..=30).map(|i| bar(i as f64, 1.0)).collect();
        // 30 vs 6 (24 bars back).
        assert!((pct_change(&bars, 24) - 400.0).abs() < 1e-9);
        assert_eq!(pct_change(&bars, 40), 0.0);
    }

    #[test]
    fn vadr_proxy_scales_with_range_and_volume() {
        let mut daily: Vec<Kline> = (0..21).map(|_| bar(100.0, 1.0)).collect();
        // Today spans 4x the usual range.
        daily.push(Kline {
            open_time: 0,
            open: 100.0,
            high: 104.0,
            low: 96.0,
            close: 103.0,
            volume: 1.0,
        });

        let flat = vadr_proxy(&daily, 1.0).unwrap();
        assert!((flat - 4.0).abs() < 1e-9);

        let expanded = vadr_proxy(&daily, 4.0).unwrap();
        assert!((expanded - 8.0).abs() < 1e-9);
    }

    #[test]
    fn stdev_basics() {
        assert_eq!(stdev(&[]), 0.0);
        assert_eq!(stdev(&[5.0]), 0.0);
        assert!((stdev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn live_input_builds_from_fixture_data() {
        let registry = registry();
        let deadline = Instant::now() + Duration::from_secs(5);

        let input = build_candidate_input(&registry, "BTCUSDT", deadline)
            .await
            .unwrap();

        assert_eq!(input.symbol, "BTCUSDT");
        let f = &input.raw_factors;
        for value in [f.momentum_core, f.technical, f.volume, f.quality] {
            assert!((0.0..=100.0).contains(&value), "factor {value} out of range");
        }
        assert_eq!(f.social, 0.0);
        assert!(input.market.price > 0.0);
        assert!(input.market.spread_bps.is_some());
        assert!(input.market.feed_ages_secs.contains_key("klines_1h"));
    }

    #[tokio::test]
    async fn indicators_build_from_fixture_data() {
        let registry = registry();
        let deadline = Instant::now() + Duration::from_secs(5);

        let indicators = gather_market_indicators(
            &registry,
            &["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            deadline,
        )
        .await
        .unwrap();

        assert!((0.0..=100.0).contains(&indicators.breadth_advancing_pct));
        assert!(indicators.realized_vol_7d >= 0.0);
        assert!(indicators.vix_proxy >= 0.0);
        assert!(indicators.stablecoin_volume_ratio > 0.0);
    }
}
