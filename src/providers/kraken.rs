// =============================================================================
// Kraken Provider — public v0 REST
// =============================================================================
//
// Kraken wraps every payload in {error: [], result: {...}} and keys the
// result by its own legacy pair spelling ("XXBTZUSD" for XBTUSD), so the
// parser takes the first non-"last" entry instead of guessing the key.
// A non-empty error array is an API error even under HTTP 200.

use std::time::Instant;

use crate::providers::{
    get_json, json_f64, stamp_provenance, symbols, BookLevel, Kline, OrderBookSnapshot,
    ProbeOutcome, ProviderError, ProviderResponse, Trade, TradeSide,
};
use crate::types::Venue;

const VENUE: Venue = Venue::Kraken;

/// Kraken public REST adapter.
#[derive(Clone)]
pub struct KrakenProvider {
    client: reqwest::Client,
    base: String,
}

impl KrakenProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base: "https://api.kraken.com".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(client: reqwest::Client, base: &str) -> Self {
        Self {
            client,
            base: base.to_string(),
        }
    }

    /// GET /0/public/Trades.
    pub async fn spot_trades(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<Trade>>, ProviderError> {
        let pair = symbols::to_venue_symbol(VENUE, symbol);
        let endpoint = "/0/public/Trades";
        let url = format!("{}{}?pair={}", self.base, endpoint, pair);

        let started = Instant::now();
        let result = unwrap_result(get_json(&self.client, VENUE, &url).await?)?;
        let mut trades = parse_trades(&result)?;
        let excess = trades.len().saturating_sub(limit);
        trades.drain(..excess);

        Ok(ProviderResponse {
            data: trades,
            provenance: stamp_provenance(VENUE, endpoint, format!("limit={limit}"), started),
        })
    }

    /// GET /0/public/Depth.
    pub async fn order_book(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<ProviderResponse<OrderBookSnapshot>, ProviderError> {
        let pair = symbols::to_venue_symbol(VENUE, symbol);
        let endpoint = "/0/public/Depth";
        let url = format!("{}{}?pair={}&count={}", self.base, endpoint, pair, depth);

        let started = Instant::now();
        let result = unwrap_result(get_json(&self.client, VENUE, &url).await?)?;
        let book = parse_book(symbol, &result)?;

        Ok(ProviderResponse {
            data: book,
            provenance: stamp_provenance(VENUE, endpoint, format!("depth={depth}"), started),
        })
    }

    /// GET /0/public/OHLC.
    pub async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<Kline>>, ProviderError> {
        let pair = symbols::to_venue_symbol(VENUE, symbol);
        let minutes = symbols::to_venue_interval(VENUE, interval).ok_or(ProviderError::Decode {
            venue: VENUE,
            message: format!("unsupported interval {interval}"),
        })?;
        let endpoint = "/0/public/OHLC";
        let url = format!(
            "{}{}?pair={}&interval={}",
            self.base, endpoint, pair, minutes
        );

        let started = Instant::now();
        let result = unwrap_result(get_json(&self.client, VENUE, &url).await?)?;
        let mut bars = parse_klines(&result)?;
        let excess = bars.len().saturating_sub(limit);
        bars.drain(..excess);

        Ok(ProviderResponse {
            data: bars,
            provenance: stamp_provenance(
                VENUE,
                endpoint,
                format!("interval={interval}&limit={limit}"),
                started,
            ),
        })
    }

    /// GET /0/public/Time — liveness.
    pub async fn probe(&self) -> ProbeOutcome {
        let url = format!("{}/0/public/Time", self.base);
        let started = Instant::now();
        match get_json(&self.client, VENUE, &url).await {
            Ok(_) => ProbeOutcome {
                success: true,
                latency_ms: started.elapsed().as_millis() as u64,
                error: None,
            },
            Err(e) => ProbeOutcome {
                success: false,
                latency_ms: started.elapsed().as_millis() as u64,
                error: Some(e.to_string()),
            },
        }
    }
}

// =============================================================================
// Wire parsing
// =============================================================================

fn decode_err(message: impl Into<String>) -> ProviderError {
    ProviderError::Decode {
        venue: VENUE,
        message: message.into(),
    }
}

/// Unwrap Kraken's {error, result} envelope.
fn unwrap_result(body: serde_json::Value) -> Result<serde_json::Value, ProviderError> {
    if let Some(errors) = body["error"].as_array() {
        if !errors.is_empty() {
            let joined = errors
                .iter()
                .filter_map(|e| e.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ProviderError::Api {
                venue: VENUE,
                status: 200,
                message: joined,
            });
        }
    }
    Ok(body["result"].clone())
}

/// The result object keyed by Kraken's own pair spelling; take the first
/// entry that is not the pagination cursor.
fn pair_payload(result: &serde_json::Value) -> Result<&serde_json::Value, ProviderError> {
    result
        .as_object()
        .and_then(|map| {
            map.iter()
                .find(|(key, _)| key.as_str() != "last")
                .map(|(_, value)| value)
        })
        .ok_or_else(|| decode_err("result has no pair payload"))
}

fn parse_trades(result: &serde_json::Value) -> Result<Vec<Trade>, ProviderError> {
    let rows = pair_payload(result)?
        .as_array()
        .ok_or_else(|| decode_err("trades payload is not an array"))?;

    Ok(rows
        .iter()
        .enumerate()
        .filter_map(|(i, row)| {
            // Row: [price, volume, time, side ("b"/"s"), order type, misc].
            let side = match row.get(3)?.as_str()? {
                "b" => TradeSide::Buy,
                "s" => TradeSide::Sell,
                _ => return None,
            };
            let time_secs = json_f64(row.get(2)?)?;
            Some(Trade {
                price: json_f64(row.get(0)?)?,
                size: json_f64(row.get(1)?)?,
                side,
                timestamp: (time_secs * 1000.0) as i64,
                trade_id: i.to_string(),
            })
        })
        .collect())
}

fn parse_book(symbol: &str, result: &serde_json::Value) -> Result<OrderBookSnapshot, ProviderError> {
    let payload = pair_payload(result)?;

    let parse_side = |side: &serde_json::Value| -> Vec<BookLevel> {
        side.as_array()
            .map(|levels| {
                levels
                    .iter()
                    .filter_map(|level| {
                        Some(BookLevel {
                            price: json_f64(level.get(0)?)?,
                            size: json_f64(level.get(1)?)?,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    let bids = parse_side(&payload["bids"]);
    let asks = parse_side(&payload["asks"]);
    if bids.is_empty() && asks.is_empty() {
        return Err(decode_err("depth payload had no levels"));
    }

    Ok(OrderBookSnapshot {
        symbol: symbols::canonicalize(symbol),
        bids,
        asks,
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}

fn parse_klines(result: &serde_json::Value) -> Result<Vec<Kline>, ProviderError> {
    let rows = pair_payload(result)?
        .as_array()
        .ok_or_else(|| decode_err("OHLC payload is not an array"))?;

    // Row: [time, open, high, low, close, vwap, volume, count].
    Ok(rows
        .iter()
        .filter_map(|row| {
            Some(Kline {
                open_time: (json_f64(row.get(0)?)? as i64) * 1000,
                open: json_f64(row.get(1)?)?,
                high: json_f64(row.get(2)?)?,
                low: json_f64(row.get(3)?)?,
                close: json_f64(row.get(4)?)?,
                volume: json_f64(row.get(6)?)?,
            })
        })
        .collect())
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nonempty_error_array_is_api_error() {
        let body = json!({"error": ["EQuery:Unknown asset pair"], "result": {}});
        match unwrap_result(body).unwrap_err() {
            ProviderError::Api { message, .. } => assert!(message.contains("Unknown asset pair")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn trades_under_legacy_pair_key() {
        let result = json!({
            "XXBTZUSD": [
                ["43000.1", "0.5", 1700000000.1234, "b", "l", ""],
                ["43000.2", "0.7", 1700000001.5678, "s", "m", ""]
            ],
            "last": "1700000001567800000"
        });
        let trades = parse_trades(&result).unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].side, TradeSide::Buy);
        assert_eq!(trades[1].side, TradeSide::Sell);
        assert_eq!(trades[0].timestamp, 1700000000123);
    }

    #[test]
    fn ohlc_rows_use_volume_index_six() {
        let result = json!({
            "XXBTZUSD": [
                [1700000000, "100", "110", "95", "105", "102.5", "1234.5", 42]
            ],
            "last": 1700000000
        });
        let bars = parse_klines(&result).unwrap();
        assert_eq!(bars[0].volume, 1234.5);
        assert_eq!(bars[0].open_time, 1700000000000);
    }

    #[test]
    fn depth_payload_parses_both_sides() {
        let result = json!({
            "XXBTZUSD": {
                "bids": [["42999.9", "1.5", 1700000000]],
                "asks": [["43000.1", "0.9", 1700000000]]
            }
        });
        let book = parse_book("XBTUSD", &result).unwrap();
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.asks[0].price, 43000.1);
    }
}
