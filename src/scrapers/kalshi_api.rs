//! Kalshi API integration — read-only market data acquisition.
//!
//! ABSOLUTE RULE: this client must NEVER expose order placement,
//! cancellation, or any other write operation. Every request path is
//! checked against a read-only allowlist before it leaves the process.
//!
//! Authentication uses RSA-PSS signed headers per Kalshi docs:
//! - KALSHI-ACCESS-KEY: API key ID
//! - KALSHI-ACCESS-TIMESTAMP: request time in ms since epoch
//! - KALSHI-ACCESS-SIGNATURE: base64(RSA-PSS(timestamp + method + path))

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pss, RsaPrivateKey};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::RateLimitConfig;
use crate::transport::{request_with_retry, RateLimiter};

pub const PROD_BASE_URL: &str = "https://api.elections.kalshi.com/trade-api/v2";
pub const DEMO_BASE_URL: &str = "https://demo-api.kalshi.co/trade-api/v2";

/// Safety: these path prefixes are the ONLY ones we ever call.
const ALLOWED_PATH_PREFIXES: [&str; 3] = [
    "/trade-api/v2/events",
    "/trade-api/v2/markets",
    "/trade-api/v2/series",
];

/// Panics if a request path is not read-only allowlisted.
///
/// An order, portfolio, or position path reaching this point is a
/// programmer error, and it must fail loudly rather than be handled.
pub fn assert_path_allowed(path: &str) {
    let path_no_query = path.split('?').next().unwrap_or(path);
    if !ALLOWED_PATH_PREFIXES
        .iter()
        .any(|pfx| path_no_query.starts_with(pfx))
    {
        panic!("Kalshi path not allowlisted (read-only client): {path_no_query}");
    }
}

// ── Response types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SeriesInfo {
    #[serde(default)]
    pub ticker: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketInfo {
    #[serde(default)]
    pub ticker: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub yes_sub_title: String,
    #[serde(default)]
    pub close_time: Option<String>,
    #[serde(default)]
    pub yes_bid: Option<i64>,
    #[serde(default)]
    pub yes_ask: Option<i64>,
    #[serde(default)]
    pub no_bid: Option<i64>,
    #[serde(default)]
    pub volume: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventInfo {
    #[serde(default)]
    pub event_ticker: String,
    #[serde(default)]
    pub series_ticker: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub strike_date: Option<String>,
    #[serde(default)]
    pub markets: Vec<MarketInfo>,
}

#[derive(Debug, Deserialize)]
struct SeriesListResponse {
    #[serde(default)]
    series: Vec<SeriesInfo>,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<EventInfo>,
    #[serde(default)]
    cursor: String,
}

#[derive(Debug, Deserialize)]
struct EventResponse {
    event: EventInfo,
}

#[derive(Debug, Deserialize)]
struct MarketsResponse {
    #[serde(default)]
    markets: Vec<MarketInfo>,
    #[serde(default)]
    cursor: String,
}

/// Price levels as `[price_cents, quantity]`, ascending (best bid = last).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderbookLevels {
    #[serde(default)]
    pub yes: Option<Vec<[i64; 2]>>,
    #[serde(default)]
    pub no: Option<Vec<[i64; 2]>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderbookResponse {
    #[serde(default)]
    pub orderbook: OrderbookLevels,
}

// ── Client ───────────────────────────────────────────────────────────

/// Authenticated, read-only Kalshi API client.
pub struct KalshiClient {
    api_key_id: String,
    private_key: RsaPrivateKey,
    /// Scheme + host, without the /trade-api/v2 suffix.
    origin: String,
    client: Client,
    limiter: RateLimiter,
    retry: RateLimitConfig,
}

impl KalshiClient {
    pub fn new(
        api_key_id: &str,
        private_key_path: &Path,
        base_url: &str,
        retry: RateLimitConfig,
    ) -> Result<Self> {
        let pem = std::fs::read_to_string(private_key_path).with_context(|| {
            format!("failed to read private key {}", private_key_path.display())
        })?;
        let private_key = load_private_key(&pem)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("wxbot/1.0 (read-only market scanner)")
            .build()
            .context("failed to create HTTP client")?;

        let base = base_url.trim_end_matches('/');
        let origin = base
            .strip_suffix("/trade-api/v2")
            .unwrap_or(base)
            .to_string();

        info!("KalshiClient initialized (base_url={base})");
        Ok(Self {
            api_key_id: api_key_id.to_string(),
            private_key,
            origin,
            client,
            limiter: RateLimiter::new(retry.kalshi_requests_per_second),
            retry,
        })
    }

    /// Create RSA-PSS signature over `timestamp + method + path` (query
    /// string stripped per Kalshi docs). SHA-256 digest, MGF1(SHA-256),
    /// salt length = digest length.
    fn sign(&self, timestamp_ms: &str, method: &str, path: &str) -> Result<String> {
        let path_no_query = path.split('?').next().unwrap_or(path);
        let message = format!("{timestamp_ms}{method}{path_no_query}");
        let digest = Sha256::digest(message.as_bytes());
        let signature = self
            .private_key
            .sign_with_rng(&mut rand::thread_rng(), Pss::new::<Sha256>(), &digest)
            .context("RSA-PSS signing failed")?;
        Ok(BASE64.encode(signature))
    }

    fn auth_headers(&self, method: &str, path: &str) -> Result<HeaderMap> {
        let ts = chrono::Utc::now().timestamp_millis().to_string();
        let sig = self.sign(&ts, method, path)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("kalshi-access-key"),
            HeaderValue::from_str(&self.api_key_id).context("bad api key header value")?,
        );
        headers.insert(
            HeaderName::from_static("kalshi-access-timestamp"),
            HeaderValue::from_str(&ts).context("bad timestamp header value")?,
        );
        headers.insert(
            HeaderName::from_static("kalshi-access-signature"),
            HeaderValue::from_str(&sig).context("bad signature header value")?,
        );
        Ok(headers)
    }

    /// Execute an authenticated GET. Only GET exists on this client.
    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(String, String)]) -> Result<T> {
        assert_path_allowed(path);

        let headers = self.auth_headers("GET", path)?;
        let url = format!("{}{}", self.origin, path);
        debug!("GET {path}");
        let resp = request_with_retry(
            &self.client,
            Method::GET,
            &url,
            Some(headers),
            Some(params),
            Some(&self.limiter),
            &self.retry,
        )
        .await
        .with_context(|| format!("Kalshi request failed: {path}"))?;
        resp.json::<T>()
            .await
            .with_context(|| format!("failed to parse Kalshi response from {path}"))
    }

    // ── Public read-only methods ─────────────────────────────────────

    pub async fn get_series_list(
        &self,
        category: Option<&str>,
        tags: Option<&str>,
    ) -> Result<Vec<SeriesInfo>> {
        let mut params = Vec::new();
        if let Some(c) = category {
            params.push(("category".to_string(), c.to_string()));
        }
        if let Some(t) = tags {
            params.push(("tags".to_string(), t.to_string()));
        }
        let data: SeriesListResponse = self.get("/trade-api/v2/series", &params).await?;
        Ok(data.series)
    }

    /// Fetch one page of events. Returns `(events, next_cursor)`.
    pub async fn get_events(
        &self,
        series_ticker: Option<&str>,
        status: &str,
        with_nested_markets: bool,
        limit: u32,
        cursor: &str,
    ) -> Result<(Vec<EventInfo>, String)> {
        let mut params = vec![
            ("status".to_string(), status.to_string()),
            (
                "with_nested_markets".to_string(),
                with_nested_markets.to_string(),
            ),
            ("limit".to_string(), limit.to_string()),
        ];
        if let Some(s) = series_ticker {
            params.push(("series_ticker".to_string(), s.to_string()));
        }
        if !cursor.is_empty() {
            params.push(("cursor".to_string(), cursor.to_string()));
        }
        let data: EventsResponse = self.get("/trade-api/v2/events", &params).await?;
        Ok((data.events, data.cursor))
    }

    /// Crawl all event pages until the cursor runs out.
    pub async fn get_all_events(
        &self,
        series_ticker: Option<&str>,
        status: &str,
        with_nested_markets: bool,
    ) -> Result<Vec<EventInfo>> {
        let mut all_events = Vec::new();
        let mut cursor = String::new();
        loop {
            let (events, next) = self
                .get_events(series_ticker, status, with_nested_markets, 200, &cursor)
                .await?;
            let empty_page = events.is_empty();
            all_events.extend(events);
            if next.is_empty() || empty_page {
                break;
            }
            cursor = next;
        }
        Ok(all_events)
    }

    pub async fn get_event(
        &self,
        event_ticker: &str,
        with_nested_markets: bool,
    ) -> Result<EventInfo> {
        let params = vec![(
            "with_nested_markets".to_string(),
            with_nested_markets.to_string(),
        )];
        let data: EventResponse = self
            .get(&format!("/trade-api/v2/events/{event_ticker}"), &params)
            .await?;
        Ok(data.event)
    }

    /// Fetch one page of markets with optional filters.
    pub async fn get_markets(
        &self,
        event_ticker: Option<&str>,
        series_ticker: Option<&str>,
        status: Option<&str>,
        limit: u32,
        cursor: &str,
    ) -> Result<(Vec<MarketInfo>, String)> {
        let mut params = vec![("limit".to_string(), limit.to_string())];
        if let Some(e) = event_ticker {
            params.push(("event_ticker".to_string(), e.to_string()));
        }
        if let Some(s) = series_ticker {
            params.push(("series_ticker".to_string(), s.to_string()));
        }
        if let Some(st) = status {
            params.push(("status".to_string(), st.to_string()));
        }
        if !cursor.is_empty() {
            params.push(("cursor".to_string(), cursor.to_string()));
        }
        let data: MarketsResponse = self.get("/trade-api/v2/markets", &params).await?;
        Ok((data.markets, data.cursor))
    }

    /// Fetch the orderbook for a market. `yes`/`no` are arrays of
    /// `[price_cents, quantity]` sorted ascending (best bid last).
    pub async fn get_orderbook(&self, ticker: &str, depth: u32) -> Result<OrderbookResponse> {
        let params = vec![("depth".to_string(), depth.to_string())];
        self.get(&format!("/trade-api/v2/markets/{ticker}/orderbook"), &params)
            .await
    }
}

fn load_private_key(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .context("failed to parse RSA private key (PKCS#8 or PKCS#1 PEM expected)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_paths_pass() {
        assert_path_allowed("/trade-api/v2/series");
        assert_path_allowed("/trade-api/v2/events?status=open");
        assert_path_allowed("/trade-api/v2/markets/KXHIGHNY-TEST/orderbook?depth=10");
    }

    #[test]
    #[should_panic(expected = "not allowlisted")]
    fn test_order_path_panics() {
        assert_path_allowed("/trade-api/v2/portfolio/orders");
    }

    #[test]
    #[should_panic(expected = "not allowlisted")]
    fn test_positions_path_panics() {
        assert_path_allowed("/trade-api/v2/portfolio/positions?limit=10");
    }

    #[test]
    fn test_orderbook_response_parses_nulls() {
        let raw = r#"{"orderbook":{"yes":[[8,50]],"no":null}}"#;
        let parsed: OrderbookResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.orderbook.yes.unwrap(), vec![[8, 50]]);
        assert!(parsed.orderbook.no.is_none());
    }

    #[test]
    fn test_events_response_tolerates_missing_fields() {
        let raw = r#"{"events":[{"event_ticker":"KXHIGHNY-26FEB24","markets":[{"ticker":"T1"}]}]}"#;
        let parsed: EventsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.events[0].markets[0].ticker, "T1");
        assert!(parsed.cursor.is_empty());
    }
}
