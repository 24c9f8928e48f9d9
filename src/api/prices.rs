use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::RwLock;

use super::chains::Chain;

const BASE_PRICE_TTL: Duration = Duration::from_secs(60);
const PRICE_TIMEOUT: Duration = Duration::from_secs(5);

const COINGECKO_URL: &str = "https://api.coingecko.com/api/v3/simple/price";
const DEXSCREENER_URL: &str = "https://api.dexscreener.com/latest/dex/tokens";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum PriceError {
    Upstream(reqwest::Error),
    /// Upstream answered with a zero/negative/missing price. Callers must
    /// treat the trade as unprocessable, never record a zero-value trade.
    Unavailable,
}

impl fmt::Display for PriceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceError::Upstream(e) => write!(f, "price upstream failed: {e}"),
            PriceError::Unavailable => write!(f, "no usable price from upstream"),
        }
    }
}

impl From<reqwest::Error> for PriceError {
    fn from(e: reqwest::Error) -> Self {
        PriceError::Upstream(e)
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
}

/// USD pricing for chain base assets (short TTL) and token display metadata
/// (cached until invalidated — metadata rarely changes).
#[derive(Clone)]
pub struct PriceResolver {
    http: reqwest::Client,
    base_prices: Arc<RwLock<HashMap<Chain, (f64, Instant)>>>,
    metadata: Arc<RwLock<HashMap<String, TokenMetadata>>>,
    ttl: Duration,
    price_host: String,
    meta_host: String,
}

#[derive(Deserialize)]
struct UsdPrice {
    usd: f64,
}

impl PriceResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_hosts(http, COINGECKO_URL, DEXSCREENER_URL)
    }

    /// Custom upstream hosts (for testing).
    pub fn with_hosts(http: reqwest::Client, price_host: &str, meta_host: &str) -> Self {
        Self {
            http,
            base_prices: Arc::new(RwLock::new(HashMap::new())),
            metadata: Arc::new(RwLock::new(HashMap::new())),
            ttl: BASE_PRICE_TTL,
            price_host: price_host.to_string(),
            meta_host: meta_host.to_string(),
        }
    }

    /// Current USD price of the chain's base asset, cached for the TTL to
    /// bound upstream call volume.
    pub async fn base_asset_price_usd(&self, chain: Chain) -> Result<f64, PriceError> {
        {
            let cache = self.base_prices.read().await;
            if let Some((price, at)) = cache.get(&chain) {
                if at.elapsed() < self.ttl {
                    return Ok(*price);
                }
            }
        }

        let id = chain.coingecko_id();
        let url = format!("{}?ids={id}&vs_currencies=usd", self.price_host);
        let resp = self
            .http
            .get(&url)
            .timeout(PRICE_TIMEOUT)
            .send()
            .await?;
        let body: HashMap<String, UsdPrice> = resp.json().await?;

        let price = body.get(id).map(|p| p.usd).unwrap_or(0.0);
        if price <= 0.0 {
            return Err(PriceError::Unavailable);
        }

        self.base_prices
            .write()
            .await
            .insert(chain, (price, Instant::now()));
        Ok(price)
    }

    /// Display name/symbol for a token, best-effort. A miss is not an error —
    /// callers enrich when possible and move on when not.
    pub async fn token_metadata(&self, mint: &str) -> Option<TokenMetadata> {
        {
            let cache = self.metadata.read().await;
            if let Some(meta) = cache.get(mint) {
                return Some(meta.clone());
            }
        }

        let url = format!("{}/{mint}", self.meta_host);
        let resp = self
            .http
            .get(&url)
            .timeout(PRICE_TIMEOUT)
            .send()
            .await
            .ok()?;
        let body: serde_json::Value = resp.json().await.ok()?;

        let pairs = body.get("pairs")?.as_array()?;
        let base = pairs
            .iter()
            .filter_map(|p| p.get("baseToken"))
            .find(|t| {
                t.get("address")
                    .and_then(|a| a.as_str())
                    .is_some_and(|a| a.eq_ignore_ascii_case(mint))
            })
            .or_else(|| pairs.first()?.get("baseToken"))?;

        let meta = TokenMetadata {
            name: base.get("name")?.as_str()?.to_string(),
            symbol: base.get("symbol")?.as_str()?.to_string(),
        };
        tracing::debug!("metadata: cached {} ({}) for {mint}", meta.name, meta.symbol);
        self.metadata
            .write()
            .await
            .insert(mint.to_string(), meta.clone());
        Some(meta)
    }

    /// Drops a cached metadata entry so the next lookup refetches it.
    pub async fn invalidate_metadata(&self, mint: &str) {
        self.metadata.write().await.remove(mint);
    }

    #[cfg(test)]
    pub(crate) async fn prewarm(&self, chain: Chain, price: f64) {
        self.base_prices
            .write()
            .await
            .insert(chain, (price, Instant::now()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prewarmed_price_served_from_cache() {
        let resolver = PriceResolver::new(reqwest::Client::new());
        resolver.prewarm(Chain::Solana, 150.0).await;
        let price = resolver.base_asset_price_usd(Chain::Solana).await.unwrap();
        assert!((price - 150.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn metadata_invalidation_clears_the_entry() {
        let resolver = PriceResolver::new(reqwest::Client::new());
        resolver.metadata.write().await.insert(
            "Mint".into(),
            TokenMetadata {
                name: "Agent Token".into(),
                symbol: "AGT".into(),
            },
        );
        assert!(resolver.token_metadata("Mint").await.is_some());
        resolver.invalidate_metadata("Mint").await;
        assert!(resolver.metadata.read().await.get("Mint").is_none());
    }
}
