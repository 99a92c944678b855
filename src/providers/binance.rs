// =============================================================================
// Binance Provider — spot REST + futures funding
// =============================================================================
//
// Public endpoints only. Spot data comes from api.binance.com, funding
// history from fapi.binance.com. All price/size fields arrive as numeric
// strings; klines additionally carry taker-buy volume, which is what lets
// this adapter derive a CVD series without a trade-by-trade stream.

use std::time::Instant;

use tracing::debug;

use crate::providers::{
    get_json, json_f64, stamp_provenance, symbols, CvdPoint, FundingSample, Kline, BookLevel,
    OrderBookSnapshot, ProbeOutcome, ProviderError, ProviderResponse, Trade, TradeSide,
};
use crate::types::Venue;

const VENUE: Venue = Venue::Binance;

/// Binance public REST adapter.
#[derive(Clone)]
pub struct BinanceProvider {
    client: reqwest::Client,
    spot_base: String,
    futures_base: String,
}

impl BinanceProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            spot_base: "https://api.binance.com".to_string(),
            futures_base: "https://fapi.binance.com".to_string(),
        }
    }

    /// Point both hosts at a test server.
    #[cfg(test)]
    pub fn with_base_urls(client: reqwest::Client, spot: &str, futures: &str) -> Self {
        Self {
            client,
            spot_base: spot.to_string(),
            futures_base: futures.to_string(),
        }
    }

    // -------------------------------------------------------------------------
    // Capabilities
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/fundingRate — funding history, oldest first.
    pub async fn funding_history(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<FundingSample>>, ProviderError> {
        let venue_symbol = symbols::to_venue_symbol(VENUE, symbol);
        let endpoint = "/fapi/v1/fundingRate";
        let url = format!(
            "{}{}?symbol={}&limit={}",
            self.futures_base, endpoint, venue_symbol, limit
        );

        let started = Instant::now();
        let body = get_json(&self.client, VENUE, &url).await?;
        let data = parse_funding(&body)?;

        debug!(symbol, samples = data.len(), "binance funding history fetched");
        Ok(ProviderResponse {
            data,
            provenance: stamp_provenance(VENUE, endpoint, format!("limit={limit}"), started),
        })
    }

    /// GET /api/v3/trades — recent trades, oldest first.
    pub async fn spot_trades(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<Trade>>, ProviderError> {
        let venue_symbol = symbols::to_venue_symbol(VENUE, symbol);
        let endpoint = "/api/v3/trades";
        let url = format!(
            "{}{}?symbol={}&limit={}",
            self.spot_base, endpoint, venue_symbol, limit
        );

        let started = Instant::now();
        let body = get_json(&self.client, VENUE, &url).await?;
        let data = parse_trades(&body)?;

        Ok(ProviderResponse {
            data,
            provenance: stamp_provenance(VENUE, endpoint, format!("limit={limit}"), started),
        })
    }

    /// GET /api/v3/depth — L2 snapshot.
    pub async fn order_book(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<ProviderResponse<OrderBookSnapshot>, ProviderError> {
        let venue_symbol = symbols::to_venue_symbol(VENUE, symbol);
        let endpoint = "/api/v3/depth";
        let url = format!(
            "{}{}?symbol={}&limit={}",
            self.spot_base, endpoint, venue_symbol, depth
        );

        let started = Instant::now();
        let body = get_json(&self.client, VENUE, &url).await?;
        let data = parse_book(symbol, &body)?;

        Ok(ProviderResponse {
            data,
            provenance: stamp_provenance(VENUE, endpoint, format!("depth={depth}"), started),
        })
    }

    /// GET /api/v3/klines — OHLCV bars, oldest first.
    pub async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<Kline>>, ProviderError> {
        let venue_symbol = symbols::to_venue_symbol(VENUE, symbol);
        let venue_interval =
            symbols::to_venue_interval(VENUE, interval).ok_or(ProviderError::Decode {
                venue: VENUE,
                message: format!("unsupported interval {interval}"),
            })?;
        let endpoint = "/api/v3/klines";
        let url = format!(
            "{}{}?symbol={}&interval={}&limit={}",
            self.spot_base, endpoint, venue_symbol, venue_interval, limit
        );

        let started = Instant::now();
        let body = get_json(&self.client, VENUE, &url).await?;
        let data = parse_klines(&body)?;

        Ok(ProviderResponse {
            data,
            provenance: stamp_provenance(
                VENUE,
                endpoint,
                format!("interval={interval}&limit={limit}"),
                started,
            ),
        })
    }

    /// CVD series derived from kline taker-buy volume, oldest first.
    pub async fn cvd_series(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<ProviderResponse<Vec<CvdPoint>>, ProviderError> {
        let venue_symbol = symbols::to_venue_symbol(VENUE, symbol);
        let venue_interval =
            symbols::to_venue_interval(VENUE, interval).ok_or(ProviderError::Decode {
                venue: VENUE,
                message: format!("unsupported interval {interval}"),
            })?;
        let endpoint = "/api/v3/klines";
        let url = format!(
            "{}{}?symbol={}&interval={}&limit={}",
            self.spot_base, endpoint, venue_symbol, venue_interval, limit
        );

        let started = Instant::now();
        let body = get_json(&self.client, VENUE, &url).await?;
        let data = parse_cvd(&body)?;

        Ok(ProviderResponse {
            data,
            provenance: stamp_provenance(
                VENUE,
                endpoint,
                format!("interval={interval}&limit={limit}"),
                started,
            ),
        })
    }

    /// GET /api/v3/ping — liveness.
    pub async fn probe(&self) -> ProbeOutcome {
        let url = format!("{}/api/v3/ping", self.spot_base);
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

fn parse_funding(body: &serde_json::Value) -> Result<Vec<FundingSample>, ProviderError> {
    let arr = body
        .as_array()
        .ok_or_else(|| decode_err("funding response is not an array"))?;

    Ok(arr
        .iter()
        .filter_map(|entry| {
            Some(FundingSample {
                rate: json_f64(&entry["fundingRate"])?,
                timestamp: entry["fundingTime"].as_i64()?,
                mark_price: json_f64(&entry["markPrice"]).unwrap_or(0.0),
            })
        })
        .collect())
}

fn parse_trades(body: &serde_json::Value) -> Result<Vec<Trade>, ProviderError> {
    let arr = body
        .as_array()
        .ok_or_else(|| decode_err("trades response is not an array"))?;

    Ok(arr
        .iter()
        .filter_map(|entry| {
            // isBuyerMaker == true means the taker sold.
            let side = if entry["isBuyerMaker"].as_bool()? {
                TradeSide::Sell
            } else {
                TradeSide::Buy
            };
            Some(Trade {
                price: json_f64(&entry["price"])?,
                size: json_f64(&entry["qty"])?,
                side,
                timestamp: entry["time"].as_i64()?,
                trade_id: entry["id"].as_i64()?.to_string(),
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
        return Err(decode_err("depth response had no levels"));
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
        .ok_or_else(|| decode_err("klines response is not an array"))?;

    Ok(arr
        .iter()
        .filter_map(|bar| {
            Some(Kline {
                open_time: bar.get(0)?.as_i64()?,
                open: json_f64(bar.get(1)?)?,
                high: json_f64(bar.get(2)?)?,
                low: json_f64(bar.get(3)?)?,
                close: json_f64(bar.get(4)?)?,
                volume: json_f64(bar.get(5)?)?,
            })
        })
        .collect())
}

/// Derive CVD from kline fields: taker-buy base volume is index 9, total
/// base volume index 5. delta = buy - sell = 2·takerBuy − total.
fn parse_cvd(body: &serde_json::Value) -> Result<Vec<CvdPoint>, ProviderError> {
    let arr = body
        .as_array()
        .ok_or_else(|| decode_err("klines response is not an array"))?;

    let mut cvd = 0.0;
    let mut out = Vec::with_capacity(arr.len());
    for bar in arr {
        let (Some(ts), Some(close), Some(volume), Some(taker_buy)) = (
            bar.get(0).and_then(|v| v.as_i64()),
            bar.get(4).and_then(json_f64),
            bar.get(5).and_then(json_f64),
            bar.get(9).and_then(json_f64),
        ) else {
            continue;
        };

        let delta = 2.0 * taker_buy - volume;
        cvd += delta;
        out.push(CvdPoint {
            timestamp: ts,
            price: close,
            cvd,
            volume,
        });
    }
    Ok(out)
}
