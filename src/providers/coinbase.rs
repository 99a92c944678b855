// =============================================================================
// Coinbase Provider — Exchange public REST
// =============================================================================
//
// Coinbase quirks handled at this boundary: the trade `side` field names the
// MAKER side (so "buy" means the taker sold), candles arrive newest-first as
// raw numbers [time, low, high, open, close, volume] with time in seconds,
// and trade timestamps are RFC 3339 strings.

use std::time::Instant;

use chrono::DateTime;

use crate::providers::{
    get_json, json_f64, stamp_provenance, symbols, BookLevel, Kline, OrderBookSnapshot,
    ProbeOutcome, ProviderError, ProviderResponse, Trade, TradeSide,
};
use crate::types::Venue;

const VENUE: Venue = Venue::Coinbase;

/// Coinbase Exchange public REST adapter.
#[derive(Clone)]
pub struct CoinbaseProvider {
    client: reqwest::Client,
    base: String,
}

impl CoinbaseProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base: "https://api.exchange.coinbase.com".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(client: reqwest::Client, base: &str) -> Self {
        Self {
            client,
            base: base.to_string(),
        }
    }

    /// GET /products/{id}/trades.
    pub async fn spot_trades(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<Trade>>, ProviderError> {
        let product = symbols::to_venue_symbol(VENUE, symbol);
        let endpoint = format!("/products/{product}/trades");
        let url = format!("{}{}?limit={}", self.base, endpoint, limit);

        let started = Instant::now();
        let body = get_json(&self.client, VENUE, &url).await?;
        let mut trades = parse_trades(&body)?;
        // Coinbase returns newest first.
        trades.reverse();

        Ok(ProviderResponse {
            data: trades,
            provenance: stamp_provenance(VENUE, &endpoint, format!("limit={limit}"), started),
        })
    }

    /// GET /products/{id}/book?level=2.
    pub async fn order_book(
        &self,
        symbol: &str,
        _depth: usize,
    ) -> Result<ProviderResponse<OrderBookSnapshot>, ProviderError> {
        let product = symbols::to_venue_symbol(VENUE, symbol);
        let endpoint = format!("/products/{product}/book");
        let url = format!("{}{}?level=2", self.base, endpoint);

        let started = Instant::now();
        let body = get_json(&self.client, VENUE, &url).await?;
        let book = parse_book(symbol, &body)?;

        Ok(ProviderResponse {
            data: book,
            provenance: stamp_provenance(VENUE, &endpoint, "level=2".to_string(), started),
        })
    }

    /// GET /products/{id}/candles.
    pub async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<Kline>>, ProviderError> {
        let product = symbols::to_venue_symbol(VENUE, symbol);
        let granularity =
            symbols::to_venue_interval(VENUE, interval).ok_or(ProviderError::Decode {
                venue: VENUE,
                message: format!("unsupported interval {interval}"),
            })?;
        let endpoint = format!("/products/{product}/candles");
        let url = format!("{}{}?granularity={}", self.base, endpoint, granularity);

        let started = Instant::now();
        let body = get_json(&self.client, VENUE, &url).await?;
        let mut bars = parse_klines(&body)?;
        // Newest first on the wire.
        bars.reverse();
        bars.truncate(limit.max(1));

        Ok(ProviderResponse {
            data: bars,
            provenance: stamp_provenance(
                VENUE,
                &endpoint,
                format!("interval={interval}&limit={limit}"),
                started,
            ),
        })
    }

    /// GET /time — liveness.
    pub async fn probe(&self) -> ProbeOutcome {
        let url = format!("{}/time", self.base);
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

fn parse_trades(body: &serde_json::Value) -> Result<Vec<Trade>, ProviderError> {
    let arr = body
        .as_array()
        .ok_or_else(|| decode_err("trades response is not an array"))?;

    Ok(arr
        .iter()
        .filter_map(|entry| {
            // `side` is the maker side; flip it to get the taker direction.
            let side = match entry["side"].as_str()? {
                "buy" => TradeSide::Sell,
                "sell" => TradeSide::Buy,
                _ => return None,
            };
            let timestamp = DateTime::parse_from_rfc3339(entry["time"].as_str()?)
                .ok()?
                .timestamp_millis();
            Some(Trade {
                price: json_f64(&entry["price"])?,
                size: json_f64(&entry["size"])?,
                side,
                timestamp,
                trade_id: entry["trade_id"].as_i64()?.to_string(),
            })
        })
        .collect())
}

fn parse_book(symbol: &str, body: &serde_json::Value) -> Result<OrderBookSnapshot, ProviderError> {
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

    let bids = parse_side(&body["bids"]);
    let asks = parse_side(&body["asks"]);
    if bids.is_empty() && asks.is_empty() {
        return Err(decode_err("book response had no levels"));
    }

    Ok(OrderBookSnapshot {
        symbol: symbols::canonicalize(symbol),
        bids,
        asks,
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}

fn parse_klines(body: &serde_json::Value) -> Result<Vec<Kline>, ProviderError> {
    let arr = body
        .as_array()
        .ok_or_else(|| decode_err("candles response is not an array"))?;

    // Wire order: [time, low, high, open, close, volume], time in seconds.
    Ok(arr
        .iter()
        .filter_map(|bar| {
            Some(Kline {
                open_time: (json_f64(bar.get(0)?)? as i64) * 1000,
                low: json_f64(bar.get(1)?)?,
                high: json_f64(bar.get(2)?)?,
                open: json_f64(bar.get(3)?)?,
                close: json_f64(bar.get(4)?)?,
                volume: json_f64(bar.get(5)?)?,
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
    fn trades_flip_maker_side() {
        let body = json!([
            {"time": "2024-01-15T10:00:00.000000Z", "trade_id": 11, "price": "43000.1", "size": "0.2", "side": "buy"},
            {"time": "2024-01-15T10:00:01.000000Z", "trade_id": 12, "price": "43000.2", "size": "0.3", "side": "sell"}
        ]);
        let trades = parse_trades(&body).unwrap();
        // Maker buy => taker sold.
        assert_eq!(trades[0].side, TradeSide::Sell);
        assert_eq!(trades[1].side, TradeSide::Buy);
        assert!(trades[0].timestamp > 1_700_000_000_000);
    }

    #[test]
    fn candles_reorder_fields_and_scale_time() {
        let body = json!([[1700000000, 95.0, 110.0, 100.0, 105.0, 1000.0]]);
        let bars = parse_klines(&body).unwrap();
        assert_eq!(bars[0].open_time, 1700000000000);
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[0].high, 110.0);
        assert_eq!(bars[0].low, 95.0);
        assert_eq!(bars[0].close, 105.0);
    }

    #[test]
    fn book_parses_level2_rows() {
        let body = json!({
            "bids": [["42999.9", "1.5", 3]],
            "asks": [["43000.1", "0.9", 2]],
            "sequence": 123
        });
        let book = parse_book("BTC-USD", &body).unwrap();
        assert_eq!(book.symbol, "BTCUSD");
        assert_eq!(book.bids[0].size, 1.5);
    }
}
