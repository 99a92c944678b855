// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing
// =============================================================================
//
// The proximity guard measures entry distance in ATR multiples; the late-fill
// guard in trending regimes requires the entry to still sit within ATR
// proximity of the trigger.
//
//   TR  = max(H - L, |H - prevClose|, |L - prevClose|)
//   ATR = Wilder-smoothed TR (seeded with the SMA of the first `period` TRs)

use crate::providers::Kline;

/// Most recent ATR from a slice of OHLCV bars (oldest first).
///
/// Returns `None` when `period` is zero, there are fewer than `period + 1`
/// bars, or any intermediate value is non-finite.
pub fn calculate_atr(bars: &[Kline], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let mut true_ranges = Vec::with_capacity(bars.len() - 1);
    for pair in bars.windows(2) {
        let prev_close = pair[0].close;
        let bar = &pair[1];

        let hl = bar.high - bar.low;
        let hc = (bar.high - prev_close).abs();
        let lc = (bar.low - prev_close).abs();
        true_ranges.push(hl.max(hc).max(lc));
    }

    let seed: f64 = true_ranges[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return None;
    }

    let period_f = period as f64;
    let mut atr = seed;
    for &tr in &true_ranges[period..] {
        atr = (atr * (period_f - 1.0) + tr) / period_f;
        if !atr.is_finite() {
            return None;
        }
    }

    Some(atr)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn bar(high: f64, low: f64, close: f64) -> Kline {
        Kline {
            open_time: 0,
            open: (high + low) / 2.0,
            high,
            low,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn insufficient_data_is_none() {
        assert!(calculate_atr(&[], 14).is_none());
        assert!(calculate_atr(&[bar(10.0, 9.0, 9.5)], 14).is_none());
        assert!(calculate_atr(&[bar(10.0, 9.0, 9.5); 20], 0).is_none());
    }

    #[test]
    fn constant_range_converges_to_range() {
        // Every bar spans exactly 1.0 with no gaps: ATR must be 1.0.
        let bars: Vec<Kline> = (0..30).map(|_| bar(10.0, 9.0, 9.5)).collect();
        let atr = calculate_atr(&bars, 14).unwrap();
        assert!((atr - 1.0).abs() < 1e-10);
    }

    #[test]
    fn gap_extends_true_range() {
        // A bar gapping far above the previous close has TR > its own range.
        let mut bars: Vec<Kline> = (0..15).map(|_| bar(10.0, 9.0, 9.5)).collect();
        bars.push(bar(20.0, 19.5, 19.8));
        let atr = calculate_atr(&bars, 14).unwrap();
        assert!(atr > 1.0);
    }
}
