// =============================================================================
// OKX Provider — public v5 REST
// =============================================================================
//
// Every OKX response is wrapped in {code, msg, data}; code != "0" is an API
// error even under HTTP 200. Candles arrive newest-first and are reversed at
// the boundary so the pipeline always sees oldest-first.

use std::time::Instant;

use tracing::debug;

use crate::providers::{
    get_json, json_f64, stamp_provenance, symbols, BookLevel, FundingSample, Kline,
    OrderBookSnapshot, ProbeOutcome, ProviderError, ProviderResponse, Trade, TradeSide,
};
use crate::types::Venue;

const VENUE: Venue = Venue::Okx;

/// OKX public REST adapter.
#[derive(Clone)]
pub struct OkxProvider {
    client: reqwest::Client,
    base: String,
}

impl OkxProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base: "https://www.okx.com".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(client: reqwest::Client, base: &str) -> Self {
        Self {
            client,
            base: base.to_string(),
        }
    }

    /// GET /api/v5/public/funding-rate-history (perpetual swap instrument).
    pub async fn funding_history(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<FundingSample>>, ProviderError> {
        let inst = symbols::to_okx_swap(symbol);
        let endpoint = "/api/v5/public/funding-rate-history";
        let url = format!("{}{}?instId={}&limit={}", self.base, endpoint, inst, limit);

        let started = Instant::now();
        let data = unwrap_data(get_json(&self.client, VENUE, &url).await?)?;
        let samples = parse_funding(&data)?;

        debug!(symbol, samples = samples.len(), "okx funding history fetched");
        Ok(ProviderResponse {
            data: samples,
            provenance: stamp_provenance(VENUE, endpoint, format!("limit={limit}"), started),
        })
    }

    /// GET /api/v5/market/trades.
    pub async fn spot_trades(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<Trade>>, ProviderError> {
        let inst = symbols::to_venue_symbol(VENUE, symbol);
        let endpoint = "/api/v5/market/trades";
        let url = format!("{}{}?instId={}&limit={}", self.base, endpoint, inst, limit);

        let started = Instant::now();
        let data = unwrap_data(get_json(&self.client, VENUE, &url).await?)?;
        let mut trades = parse_trades(&data)?;
        // OKX returns newest first.
        trades.reverse();

        Ok(ProviderResponse {
            data: trades,
            provenance: stamp_provenance(VENUE, endpoint, format!("limit={limit}"), started),
        })
    }

    /// GET /api/v5/market/books.
    pub async fn order_book(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<ProviderResponse<OrderBookSnapshot>, ProviderError> {
        let inst = symbols::to_venue_symbol(VENUE, symbol);
        let endpoint = "/api/v5/market/books";
        let url = format!("{}{}?instId={}&sz={}", self.base, endpoint, inst, depth);

        let started = Instant::now();
        let data = unwrap_data(get_json(&self.client, VENUE, &url).await?)?;
        let book = parse_book(symbol, &data)?;

        Ok(ProviderResponse {
            data: book,
            provenance: stamp_provenance(VENUE, endpoint, format!("depth={depth}"), started),
        })
    }

    /// GET /api/v5/market/candles.
    pub async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<Kline>>, ProviderError> {
        let inst = symbols::to_venue_symbol(VENUE, symbol);
        let bar = symbols::to_venue_interval(VENUE, interval).ok_or(ProviderError::Decode {
            venue: VENUE,
            message: format!("unsupported interval {interval}"),
        })?;
        let endpoint = "/api/v5/market/candles";
        let url = format!(
            "{}{}?instId={}&bar={}&limit={}",
            self.base, endpoint, inst, bar, limit
        );

        let started = Instant::now();
        let data = unwrap_data(get_json(&self.client, VENUE, &url).await?)?;
        let mut bars = parse_klines(&data)?;
        // OKX returns newest first.
        bars.reverse();

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

    /// GET /api/v5/public/time — liveness.
    pub async fn probe(&self) -> ProbeOutcome {
        let url = format!("{}/api/v5/public/time", self.base);
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

/// Unwrap the OKX {code, msg, data} envelope.
fn unwrap_data(body: serde_json::Value) -> Result<serde_json::Value, ProviderError> {
    let code = body["code"].as_str().unwrap_or("");
    if code != "0" {
        return Err(ProviderError::Api {
            venue: VENUE,
            status: 200,
            message: format!(
                "okx code {code}: {}",
                body["msg"].as_str().unwrap_or("unknown")
            ),
        });
    }
    Ok(body["data"].clone())
}

fn parse_funding(data: &serde_json::Value) -> Result<Vec<FundingSample>, ProviderError> {
    let arr = data
        .as_array()
        .ok_or_else(|| decode_err("funding data is not an array"))?;

    let mut samples: Vec<FundingSample> = arr
        .iter()
        .filter_map(|entry| {
            Some(FundingSample {
                rate: json_f64(&entry["fundingRate"])?,
                timestamp: json_f64(&entry["fundingTime"])? as i64,
                mark_price: 0.0,
            })
        })
        .collect();
    samples.sort_by_key(|s| s.timestamp);
    Ok(samples)
}

fn parse_trades(data: &serde_json::Value) -> Result<Vec<Trade>, ProviderError> {
    let arr = data
        .as_array()
        .ok_or_else(|| decode_err("trades data is not an array"))?;

    Ok(arr
        .iter()
        .filter_map(|entry| {
            let side = match entry["side"].as_str()? {
                "buy" => TradeSide::Buy,
                "sell" => TradeSide::Sell,
                _ => return None,
            };
            Some(Trade {
                price: json_f64(&entry["px"])?,
                size: json_f64(&entry["sz"])?,
                side,
                timestamp: json_f64(&entry["ts"])? as i64,
                trade_id: entry["tradeId"].as_str()?.to_string(),
            })
        })
        .collect())
}

fn parse_book(symbol: &str, data: &serde_json::Value) -> Result<OrderBookSnapshot, ProviderError> {
    let snapshot = data
        .as_array()
        .and_then(|a| a.first())
        .ok_or_else(|| decode_err("books data is empty"))?;

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

    let bids = parse_side(&snapshot["bids"]);
    let asks = parse_side(&snapshot["asks"]);
    if bids.is_empty() && asks.is_empty() {
        return Err(decode_err("books snapshot had no levels"));
    }

    Ok(OrderBookSnapshot {
        symbol: symbols::canonicalize(symbol),
        bids,
        asks,
        timestamp: json_f64(&snapshot["ts"]).map(|t| t as i64).unwrap_or_else(|| {
            chrono::Utc::now().timestamp_millis()
        }),
    })
}

fn parse_klines(data: &serde_json::Value) -> Result<Vec<Kline>, ProviderError> {
    let arr = data
        .as_array()
        .ok_or_else(|| decode_err("candles data is not an array"))?;

    Ok(arr
        .iter()
        .filter_map(|bar| {
            Some(Kline {
                open_time: json_f64(bar.get(0)?)? as i64,
                open: json_f64(bar.get(1)?)?,
                high: json_f64(bar.get(2)?)?,
                low: json_f64(bar.get(3)?)?,
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
    fn envelope_code_nonzero_is_api_error() {
        let body = json!({"code": "51001", "msg": "Instrument ID does not exist", "data": []});
        match unwrap_data(body).unwrap_err() {
            ProviderError::Api { message, .. } => assert!(message.contains("51001")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn funding_sorted_oldest_first() {
        let data = json!([
            {"fundingRate": "0.0002", "fundingTime": "1700028800000"},
            {"fundingRate": "0.0001", "fundingTime": "1700000000000"}
        ]);
        let samples = parse_funding(&data).unwrap();
        assert_eq!(samples[0].timestamp, 1700000000000);
        assert!((samples[1].rate - 0.0002).abs() < 1e-12);
    }

    #[test]
    fn trades_parse_side_strings() {
        let data = json!([
            {"instId": "BTC-USDT", "tradeId": "7", "px": "43000.1", "sz": "0.5", "side": "sell", "ts": "1700000000000"}
        ]);
        let trades = parse_trades(&data).unwrap();
        assert_eq!(trades[0].side, TradeSide::Sell);
        assert_eq!(trades[0].trade_id, "7");
    }

    #[test]
    fn book_takes_first_snapshot() {
        let data = json!([{
            "asks": [["43001.0", "1.0", "0", "1"]],
            "bids": [["43000.0", "2.0", "0", "3"]],
            "ts": "1700000000000"
        }]);
        let book = parse_book("BTC-USDT", &data).unwrap();
        assert_eq!(book.symbol, "BTCUSDT");
        assert_eq!(book.timestamp, 1700000000000);
    }

    #[test]
    fn klines_parse_string_rows() {
        let data = json!([
            ["1700000000000", "100", "110", "95", "105", "1000", "105000"]
        ]);
        let bars = parse_klines(&data).unwrap();
        assert_eq!(bars[0].close, 105.0);
    }
}
