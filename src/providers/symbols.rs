// =============================================================================
// Symbol & Interval Canonicalization
// =============================================================================
//
// The pipeline speaks one canonical symbol form: concatenated uppercase
// base+quote, e.g. "BTCUSDT". Each adapter converts at its boundary to the
// venue's native encoding (XBT/USD pairs on Kraken, hyphenated instruments on
// OKX and Coinbase, coin ids on CoinGecko). Intervals follow the same rule:
// canonical "1m".."1d" mapped per venue.

use crate::types::Venue;

/// Quote assets recognized when splitting a canonical symbol. Longest first
/// so "USDT" wins over "USD".
const KNOWN_QUOTES: [&str; 7] = ["USDT", "USDC", "USD", "EUR", "DAI", "BTC", "ETH"];

/// A canonical symbol split into base and quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolParts {
    pub base: String,
    pub quote: String,
}

/// Normalize any common symbol spelling ("btc-usdt", "BTC/USDT", "BTCUSDT")
/// into the canonical concatenated form.
pub fn canonicalize(symbol: &str) -> String {
    symbol
        .trim()
        .to_ascii_uppercase()
        .replace(['-', '/', '_'], "")
}

/// Split a canonical symbol into base and quote using the known quote list.
///
/// Returns `None` for strings that do not end in a recognized quote asset.
pub fn split(symbol: &str) -> Option<SymbolParts> {
    let canonical = canonicalize(symbol);
    for quote in KNOWN_QUOTES {
        if let Some(base) = canonical.strip_suffix(quote) {
            if !base.is_empty() {
                return Some(SymbolParts {
                    base: base.to_string(),
                    quote: quote.to_string(),
                });
            }
        }
    }
    None
}

/// The base asset of a pair, when recognizable.
pub fn base_asset(symbol: &str) -> Option<String> {
    split(symbol).map(|p| p.base)
}

/// The quote asset of a pair, when recognizable.
pub fn quote_asset(symbol: &str) -> Option<String> {
    split(symbol).map(|p| p.quote)
}

/// Encode a canonical symbol for a venue's spot endpoints.
///
/// Unknown pairs fall back to the canonical form; the venue will reject them
/// with an API error the adapter surfaces normally.
pub fn to_venue_symbol(venue: Venue, symbol: &str) -> String {
    let canonical = canonicalize(symbol);
    let Some(parts) = split(&canonical) else {
        return canonical;
    };

    match venue {
        Venue::Binance => canonical,
        Venue::Okx | Venue::Coinbase => format!("{}-{}", parts.base, parts.quote),
        Venue::Kraken => format!("{}{}", kraken_asset(&parts.base), parts.quote),
        Venue::Coingecko => coingecko_id(&parts.base),
    }
}

/// Encode a canonical symbol for OKX perpetual-swap endpoints.
pub fn to_okx_swap(symbol: &str) -> String {
    let canonical = canonicalize(symbol);
    match split(&canonical) {
        Some(parts) => format!("{}-{}-SWAP", parts.base, parts.quote),
        None => canonical,
    }
}

/// Kraken's legacy asset aliases.
fn kraken_asset(base: &str) -> String {
    match base {
        "BTC" => "XBT".to_string(),
        "DOGE" => "XDG".to_string(),
        other => other.to_string(),
    }
}

/// CoinGecko coin ids for the common bases; lowercased base otherwise.
fn coingecko_id(base: &str) -> String {
    match base {
        "BTC" => "bitcoin",
        "ETH" => "ethereum",
        "SOL" => "solana",
        "XRP" => "ripple",
        "ADA" => "cardano",
        "DOGE" => "dogecoin",
        "BNB" => "binancecoin",
        "DOT" => "polkadot",
        "LINK" => "chainlink",
        "AVAX" => "avalanche-2",
        "USDT" => "tether",
        "USDC" => "usd-coin",
        "DAI" => "dai",
        other => return other.to_ascii_lowercase(),
    }
    .to_string()
}

// =============================================================================
// Intervals
// =============================================================================

/// Canonical interval in seconds, or `None` for an unrecognized interval.
pub fn interval_secs(interval: &str) -> Option<u64> {
    match interval {
        "1m" => Some(60),
        "5m" => Some(300),
        "15m" => Some(900),
        "1h" => Some(3_600),
        "4h" => Some(14_400),
        "1d" => Some(86_400),
        _ => None,
    }
}

/// Encode a canonical interval for a venue's kline endpoint.
pub fn to_venue_interval(venue: Venue, interval: &str) -> Option<String> {
    let secs = interval_secs(interval)?;
    let encoded = match venue {
        // Binance takes the canonical strings directly.
        Venue::Binance => interval.to_string(),
        // Kraken wants minutes.
        Venue::Kraken => (secs / 60).to_string(),
        // Coinbase wants seconds granularity.
        Venue::Coinbase => secs.to_string(),
        // OKX uppercases hour/day units.
        Venue::Okx => match interval {
            "1h" => "1H".to_string(),
            "4h" => "4H".to_string(),
            "1d" => "1D".to_string(),
            other => other.to_string(),
        },
        Venue::Coingecko => return None,
    };
    Some(encoded)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_spellings() {
        assert_eq!(canonicalize("btc-usdt"), "BTCUSDT");
        assert_eq!(canonicalize("BTC/USDT"), "BTCUSDT");
        assert_eq!(canonicalize(" ethusd "), "ETHUSD");
    }

    #[test]
    fn split_prefers_longest_quote() {
        // Must split as BTC+USDT, not BTCU+SDT or BTCUSD+T.
        let parts = split("BTCUSDT").unwrap();
        assert_eq!(parts.base, "BTC");
        assert_eq!(parts.quote, "USDT");

        let parts = split("ETHUSD").unwrap();
        assert_eq!(parts.base, "ETH");
        assert_eq!(parts.quote, "USD");
    }

    #[test]
    fn split_rejects_unknown_quote() {
        assert!(split("BTCJPY").is_none());
        assert!(split("USDT").is_none());
    }

    #[test]
    fn venue_symbol_encodings() {
        assert_eq!(to_venue_symbol(Venue::Binance, "BTCUSDT"), "BTCUSDT");
        assert_eq!(to_venue_symbol(Venue::Okx, "BTCUSDT"), "BTC-USDT");
        assert_eq!(to_venue_symbol(Venue::Coinbase, "BTCUSD"), "BTC-USD");
        assert_eq!(to_venue_symbol(Venue::Kraken, "BTCUSD"), "XBTUSD");
        assert_eq!(to_venue_symbol(Venue::Kraken, "DOGEUSD"), "XDGUSD");
        assert_eq!(to_venue_symbol(Venue::Coingecko, "BTCUSDT"), "bitcoin");
        assert_eq!(to_okx_swap("BTCUSDT"), "BTC-USDT-SWAP");
    }

    #[test]
    fn venue_interval_encodings() {
        assert_eq!(to_venue_interval(Venue::Binance, "4h").unwrap(), "4h");
        assert_eq!(to_venue_interval(Venue::Kraken, "4h").unwrap(), "240");
        assert_eq!(to_venue_interval(Venue::Coinbase, "1h").unwrap(), "3600");
        assert_eq!(to_venue_interval(Venue::Okx, "4h").unwrap(), "4H");
        assert!(to_venue_interval(Venue::Binance, "7m").is_none());
        assert!(to_venue_interval(Venue::Coingecko, "1h").is_none());
    }
}
