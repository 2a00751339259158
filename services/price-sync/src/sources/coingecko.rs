use crate::types::*;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Largest id batch the provider accepts on `/simple/price`
pub const MAX_IDS_PER_REQUEST: usize = 20;

/// Public API base used when none is configured
pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// Header carrying the API key
const API_KEY_HEADER: &str = "x-cg-api-key";

/// Internal health tracking for API-free health checks
struct HealthTracker {
    /// Timestamp of last successful request (millis since epoch)
    last_success_ms: AtomicU64,
    /// Timestamp of last failed request (millis since epoch)
    last_failure_ms: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    last_latency_ms: AtomicU64,
}

impl HealthTracker {
    fn new() -> Self {
        Self {
            last_success_ms: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            last_latency_ms: AtomicU64::new(0),
        }
    }

    fn record_success(&self, latency_ms: u64) {
        let now_ms = Utc::now().timestamp_millis() as u64;
        self.last_success_ms.store(now_ms, Ordering::Relaxed);
        self.last_latency_ms.store(latency_ms, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        let now_ms = Utc::now().timestamp_millis() as u64;
        self.last_failure_ms.store(now_ms, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    fn is_healthy(&self) -> bool {
        let last_success = self.last_success_ms.load(Ordering::Relaxed);
        let last_failure = self.last_failure_ms.load(Ordering::Relaxed);

        // Healthy if: had at least one success AND (no failures OR last success > last failure)
        last_success > 0 && (last_failure == 0 || last_success > last_failure)
    }

    fn success_rate(&self) -> f64 {
        let successes = self.success_count.load(Ordering::Relaxed);
        let failures = self.failure_count.load(Ordering::Relaxed);
        let total = successes + failures;
        if total == 0 {
            return 1.0; // No requests yet, assume healthy
        }
        successes as f64 / total as f64
    }
}

/// CoinGecko API client
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: tokio::sync::Semaphore,
    last_request: tokio::sync::Mutex<Instant>,
    health_tracker: HealthTracker,
}

impl CoinGeckoClient {
    /// Free tier: ~10-30 calls/minute
    /// Keyed tiers: higher limits
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(5))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| PriceSyncError::ApiError(format!("Failed to create HTTP client: {}", e)))?;

        // Free tier: allow 1 concurrent request to stay under rate limit
        let permits = if api_key.is_some() { 5 } else { 1 };

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            rate_limiter: tokio::sync::Semaphore::new(permits),
            last_request: tokio::sync::Mutex::new(Instant::now() - Duration::from_secs(10)),
            health_tracker: HealthTracker::new(),
        })
    }

    /// Build request with optional API key
    fn build_request(&self, endpoint: &str, query: &[(&str, &str)]) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut req = self.client.get(&url).query(query);

        if let Some(key) = &self.api_key {
            req = req.header(API_KEY_HEADER, key);
        }

        req
    }

    /// Per-request timeout
    const REQUEST_TIMEOUT_SECS: u64 = 10;

    /// Rate-limited request wrapper with per-request timeout and retry on 429
    async fn rate_limited_request<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let request_start = Instant::now();

        // Initial attempt plus one retry on rate limit
        for attempt in 0..2 {
            let _permit = self.rate_limiter.acquire().await.map_err(|e| {
                self.health_tracker.record_failure();
                PriceSyncError::ApiError(e.to_string())
            })?;

            // Minimum delay between requests
            {
                let mut last = self.last_request.lock().await;
                let elapsed = last.elapsed();
                if elapsed < Duration::from_millis(100) {
                    tokio::time::sleep(Duration::from_millis(100) - elapsed).await;
                }
                *last = Instant::now();
            }

            let request_future = self.build_request(endpoint, query).send();
            let response = match tokio::time::timeout(
                Duration::from_secs(Self::REQUEST_TIMEOUT_SECS),
                request_future,
            )
            .await
            {
                Ok(Ok(resp)) => resp,
                Ok(Err(e)) => {
                    self.health_tracker.record_failure();
                    return Err(PriceSyncError::ApiError(e.to_string()));
                }
                Err(_) => {
                    self.health_tracker.record_failure();
                    return Err(PriceSyncError::ApiError(format!(
                        "CoinGecko request to {} timed out after {}s",
                        endpoint,
                        Self::REQUEST_TIMEOUT_SECS
                    )));
                }
            };

            let status = response.status();

            if status == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());

                if attempt == 0 {
                    let wait_secs = retry_after.unwrap_or(60).min(120); // Cap at 2 minutes
                    warn!(
                        "CoinGecko rate limited, waiting {} seconds before retry",
                        wait_secs
                    );
                    tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                    continue;
                }

                self.health_tracker.record_failure();
                return Err(PriceSyncError::RateLimit {
                    source_name: "coingecko".to_string(),
                    retry_after,
                });
            }

            if !status.is_success() {
                self.health_tracker.record_failure();
                let text = response.text().await.unwrap_or_default();
                return Err(PriceSyncError::ApiError(format!(
                    "CoinGecko API error ({}): {}",
                    status, text
                )));
            }

            let parsed = response.json::<T>().await.map_err(|e| {
                self.health_tracker.record_failure();
                PriceSyncError::InvalidResponse(e.to_string())
            })?;

            let latency_ms = request_start.elapsed().as_millis() as u64;
            self.health_tracker.record_success(latency_ms);

            return Ok(parsed);
        }

        Err(PriceSyncError::ApiError(
            "Unexpected retry loop exit".to_string(),
        ))
    }

    /// Current prices for a batch of coin ids
    pub async fn try_fetch_prices(&self, ids: &[String], currency: &str) -> Result<PriceMap> {
        if ids.is_empty() {
            return Ok(PriceMap::new());
        }
        if ids.len() > MAX_IDS_PER_REQUEST {
            warn!(
                "Requesting {} ids in one call, provider accepts at most {}",
                ids.len(),
                MAX_IDS_PER_REQUEST
            );
        }

        let joined = ids.join(",");
        let vs_currency = currency.to_lowercase();

        self.rate_limited_request(
            "/simple/price",
            &[("ids", joined.as_str()), ("vs_currencies", vs_currency.as_str())],
        )
        .await
    }

    /// Full coin catalog
    pub async fn try_fetch_catalog(&self) -> Result<Vec<CatalogEntry>> {
        self.rate_limited_request("/coins/list", &[]).await
    }

    /// Get health status using internal metrics (no API call)
    pub fn health(&self) -> SourceHealth {
        let last_success_ms = self.health_tracker.last_success_ms.load(Ordering::Relaxed);
        let last_success = if last_success_ms > 0 {
            DateTime::from_timestamp_millis(last_success_ms as i64)
        } else {
            None
        };

        let is_healthy = self.health_tracker.is_healthy();

        SourceHealth {
            source: "coingecko".to_string(),
            is_healthy,
            last_success,
            last_error: if is_healthy {
                None
            } else {
                Some("Recent failures detected".to_string())
            },
            success_rate: self.health_tracker.success_rate(),
            avg_latency_ms: self.health_tracker.last_latency_ms.load(Ordering::Relaxed),
        }
    }
}

#[async_trait::async_trait]
impl PriceSource for CoinGeckoClient {
    async fn fetch_prices(&self, ids: &[String], currency: &str) -> PriceMap {
        match self.try_fetch_prices(ids, currency).await {
            Ok(prices) => prices,
            Err(e) => {
                error!("Failed to fetch prices for {} ids: {}", ids.len(), e);
                PriceMap::new()
            }
        }
    }

    async fn fetch_catalog(&self) -> Vec<CatalogEntry> {
        match self.try_fetch_catalog().await {
            Ok(catalog) => catalog,
            Err(e) => {
                error!("Failed to fetch coin catalog: {}", e);
                Vec::new()
            }
        }
    }

    fn name(&self) -> &str {
        "coingecko"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = CoinGeckoClient::new("https://example.test/api/v3/", None).unwrap();
        assert_eq!(client.base_url, "https://example.test/api/v3");
    }

    #[test]
    fn test_health_before_any_request() {
        let client = CoinGeckoClient::new(DEFAULT_BASE_URL, None).unwrap();
        let health = client.health();

        assert!(!health.is_healthy);
        assert!(health.last_success.is_none());
        assert_eq!(health.success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_empty_batch_skips_request() {
        // Unroutable base: any real request would fail
        let client = CoinGeckoClient::new("http://127.0.0.1:9", None).unwrap();
        let prices = client.try_fetch_prices(&[], "usd").await.unwrap();
        assert!(prices.is_empty());
    }
}
