// =============================================================================
// CoinGecko Provider — supply / reserves data
// =============================================================================
//
// CoinGecko is a data aggregator, not an exchange: it contributes only the
// Supply capability (plus Probe) and is rejected by the registry for
// order-book requests regardless of configuration.

use std::time::Instant;

use crate::providers::{
    get_json, stamp_provenance, symbols, ProbeOutcome, ProviderError, ProviderResponse,
    SupplyInfo,
};
use crate::types::Venue;

const VENUE: Venue = Venue::Coingecko;

/// CoinGecko v3 REST adapter.
#[derive(Clone)]
pub struct CoingeckoProvider {
    client: reqwest::Client,
    base: String,
}

impl CoingeckoProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base: "https://api.coingecko.com".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(client: reqwest::Client, base: &str) -> Self {
        Self {
            client,
            base: base.to_string(),
        }
    }

    /// GET /api/v3/coins/{id} — circulating / total / max supply.
    pub async fn supply(
        &self,
        symbol: &str,
    ) -> Result<ProviderResponse<SupplyInfo>, ProviderError> {
        let coin_id = symbols::to_venue_symbol(VENUE, symbol);
        let endpoint = format!("/api/v3/coins/{coin_id}");
        let url = format!(
            "{}{}?localization=false&tickers=false&market_data=true&community_data=false&developer_data=false",
            self.base, endpoint
        );

        let started = Instant::now();
        let body = get_json(&self.client, VENUE, &url).await?;
        let data = parse_supply(&body)?;

        Ok(ProviderResponse {
            data,
            provenance: stamp_provenance(VENUE, &endpoint, "market_data".to_string(), started),
        })
    }

    /// GET /api/v3/ping — liveness.
    pub async fn probe(&self) -> ProbeOutcome {
        let url = format!("{}/api/v3/ping", self.base);
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

fn parse_supply(body: &serde_json::Value) -> Result<SupplyInfo, ProviderError> {
    let market = &body["market_data"];
    let circulating = market["circulating_supply"]
        .as_f64()
        .ok_or_else(|| ProviderError::Decode {
            venue: VENUE,
            message: "missing circulating_supply".to_string(),
        })?;

    Ok(SupplyInfo {
        circulating,
        total: market["total_supply"].as_f64(),
        max: market["max_supply"].as_f64(),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn supply_parses_nullable_fields() {
        let body = json!({
            "id": "bitcoin",
            "market_data": {
                "circulating_supply": 19600000.0,
                "total_supply": 21000000.0,
                "max_supply": null
            }
        });
        let supply = parse_supply(&body).unwrap();
        assert_eq!(supply.circulating, 19600000.0);
        assert_eq!(supply.total, Some(21000000.0));
        assert_eq!(supply.max, None);
    }

    #[test]
    fn missing_circulating_is_decode_error() {
        let body = json!({"id": "bitcoin", "market_data": {}});
        assert!(parse_supply(&body).is_err());
    }
}
