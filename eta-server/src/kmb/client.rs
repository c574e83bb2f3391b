//! KMB HTTP client.
//!
//! Single point of access to the etabus transit API via the forwarding
//! proxy. Concurrent requests for the same endpoint share one underlying
//! fetch, and successful responses are memoized in-process with a TTL
//! matched to how fast each resource actually changes. Live arrival
//! estimates are never cached; a stale ETA is worse than none.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use moka::Expiry;
use moka::future::Cache as MokaCache;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::error::KmbError;
use super::types::{ArrivalEstimate, Direction, Route, RouteStopLink, Stop, StopRouteLink};

/// Default forwarding proxy endpoint.
const DEFAULT_PROXY_URL: &str = "http://127.0.0.1:3000/proxy";

/// Route topology and the full stop list change on a week scale.
const CACHE_7_DAYS: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Per-route stop sequences follow schedule revisions.
const CACHE_1_DAY: Duration = Duration::from_secs(24 * 60 * 60);
/// Per-stop serving routes, the most volatile link table.
const CACHE_1_HOUR: Duration = Duration::from_secs(60 * 60);

/// Weight cap for the in-memory cache, in approximate payload bytes.
const MAX_CACHE_BYTES: u64 = 64 * 1024 * 1024;

/// Configuration for the KMB client.
#[derive(Debug, Clone)]
pub struct KmbConfig {
    /// URL of the forwarding proxy.
    pub proxy_url: String,
    /// Client-level request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for KmbConfig {
    fn default() -> Self {
        Self {
            proxy_url: DEFAULT_PROXY_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

impl KmbConfig {
    /// Create a config pointing at the given proxy URL.
    pub fn new(proxy_url: impl Into<String>) -> Self {
        Self {
            proxy_url: proxy_url.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// A memoized response with its own time-to-live.
#[derive(Clone)]
struct CachedResponse {
    data: Arc<Vec<Value>>,
    ttl: Duration,
    approx_bytes: usize,
}

/// Expiry policy: each entry carries its own TTL.
struct PerEntryTtl;

impl Expiry<String, CachedResponse> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedResponse,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory cache observability snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientCacheStats {
    pub entries: u64,
    pub approx_bytes: u64,
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Vec<Value>>, KmbError>>>;

/// KMB data client.
///
/// Construct one per process scope that should share a cache; tests build
/// isolated instances against local stub proxies.
pub struct KmbClient {
    http: reqwest::Client,
    proxy_url: String,
    cache: MokaCache<String, CachedResponse>,
    in_flight: Arc<Mutex<HashMap<String, SharedFetch>>>,
}

impl KmbClient {
    /// Create a new client with the given configuration.
    pub fn new(config: KmbConfig) -> Result<Self, KmbError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let cache = MokaCache::builder()
            .max_capacity(MAX_CACHE_BYTES)
            .weigher(|_key, value: &CachedResponse| {
                value.approx_bytes.clamp(1, u32::MAX as usize) as u32
            })
            .expire_after(PerEntryTtl)
            .build();

        Ok(Self {
            http,
            proxy_url: config.proxy_url,
            cache,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Fetch `endpoint` through the proxy, with caching and coalescing.
    ///
    /// A fresh entry under `cache_key` short-circuits the network entirely.
    /// Otherwise, if an identical endpoint is already in flight the caller
    /// awaits that shared fetch instead of issuing a second one; the
    /// in-flight slot is released exactly once when the fetch settles, so a
    /// failure never blocks a later retry.
    pub async fn request(
        &self,
        endpoint: &str,
        cache_key: Option<&str>,
        cache_ttl: Duration,
    ) -> Result<Arc<Vec<Value>>, KmbError> {
        let cacheable = cache_key.filter(|_| !cache_ttl.is_zero());

        if let Some(key) = cacheable {
            if let Some(hit) = self.cache.get(key).await {
                debug!(key, "cache hit");
                return Ok(hit.data);
            }
        }

        let fetch = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(endpoint) {
                Some(existing) => {
                    debug!(endpoint, "joining in-flight request");
                    existing.clone()
                }
                None => {
                    let fetch = self.begin_fetch(endpoint.to_string());
                    in_flight.insert(endpoint.to_string(), fetch.clone());
                    fetch
                }
            }
        };

        let data = fetch.await?;

        if let Some(key) = cacheable {
            let approx_bytes = serde_json::to_vec(&*data).map(|v| v.len()).unwrap_or(0);
            self.cache
                .insert(
                    key.to_string(),
                    CachedResponse {
                        data: data.clone(),
                        ttl: cache_ttl,
                        approx_bytes,
                    },
                )
                .await;
        }

        Ok(data)
    }

    fn begin_fetch(&self, endpoint: String) -> SharedFetch {
        let http = self.http.clone();
        let proxy_url = self.proxy_url.clone();
        let in_flight = Arc::clone(&self.in_flight);

        async move {
            let result = fetch_payload(&http, &proxy_url, &endpoint)
                .await
                .map(Arc::new);
            // Release the coalescing slot whether the fetch succeeded or not.
            in_flight.lock().await.remove(&endpoint);
            result
        }
        .boxed()
        .shared()
    }

    /// All routes. 7-day cache.
    pub async fn all_routes(&self) -> Result<Vec<Route>, KmbError> {
        let items = self.request("/route", Some("all_routes"), CACHE_7_DAYS).await?;
        parse_items(&items)
    }

    /// All stops. 7-day cache.
    pub async fn all_stops(&self) -> Result<Vec<Stop>, KmbError> {
        let items = self.request("/stop", Some("all_stops"), CACHE_7_DAYS).await?;
        parse_items(&items)
    }

    /// Ordered stop sequence for a route variant. 1-day cache.
    pub async fn route_stops(
        &self,
        route: &str,
        direction: Direction,
        service_type: &str,
    ) -> Result<Vec<RouteStopLink>, KmbError> {
        let endpoint = format!(
            "/route-stop/{route}/{}/{service_type}",
            direction.bound_code()
        );
        let cache_key = format!("route_stops_{route}_{direction}_{service_type}");
        let items = self.request(&endpoint, Some(&cache_key), CACHE_1_DAY).await?;
        parse_items(&items)
    }

    /// Routes serving a stop. 1-hour cache.
    pub async fn stop_routes(&self, stop_id: &str) -> Result<Vec<StopRouteLink>, KmbError> {
        let endpoint = format!("/stop-route/{stop_id}");
        let cache_key = format!("stop_routes_{stop_id}");
        let items = self.request(&endpoint, Some(&cache_key), CACHE_1_HOUR).await?;
        parse_items(&items)
    }

    /// Live arrival estimates for (stop, route, service type). Never cached.
    pub async fn eta(
        &self,
        stop_id: &str,
        route: &str,
        service_type: &str,
    ) -> Result<Vec<ArrivalEstimate>, KmbError> {
        let endpoint = format!("/eta/{stop_id}/{route}/{service_type}");
        let items = self.request(&endpoint, None, Duration::ZERO).await?;
        parse_items(&items)
    }

    /// Detail record for a single stop. 7-day cache.
    ///
    /// Returns `None` when the upstream payload is empty for the id.
    pub async fn stop_detail(&self, stop_id: &str) -> Result<Option<Stop>, KmbError> {
        let endpoint = format!("/stop/{stop_id}");
        let cache_key = format!("stop_{stop_id}");
        let items = self.request(&endpoint, Some(&cache_key), CACHE_7_DAYS).await?;
        let mut stops: Vec<Stop> = parse_items(&items)?;
        Ok(if stops.is_empty() {
            None
        } else {
            Some(stops.swap_remove(0))
        })
    }

    /// Detail records for several stops, fetched concurrently.
    ///
    /// A failed lookup contributes nothing to the result; the batch never
    /// aborts on an individual failure.
    pub async fn stop_details(&self, stop_ids: &[String]) -> Vec<Stop> {
        let results = join_all(stop_ids.iter().map(|id| self.stop_detail(id))).await;

        results
            .into_iter()
            .zip(stop_ids)
            .filter_map(|(result, id)| match result {
                Ok(stop) => stop,
                Err(e) => {
                    warn!(stop_id = %id, error = %e, "stop detail lookup failed");
                    None
                }
            })
            .collect()
    }

    /// Drop every in-memory cached response. The durable store is untouched.
    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
        debug!("client cache cleared");
    }

    /// Entry count and approximate byte size of the in-memory cache.
    pub async fn cache_stats(&self) -> ClientCacheStats {
        self.cache.run_pending_tasks().await;
        ClientCacheStats {
            entries: self.cache.entry_count(),
            approx_bytes: self.cache.weighted_size(),
        }
    }
}

/// Issue the proxied GET and unwrap the `{data: [...]}` envelope.
///
/// A well-formed JSON body whose `data` field is not a list degrades to an
/// empty result: partial data beats a crashed view. The warning makes
/// genuine upstream contract violations visible.
async fn fetch_payload(
    http: &reqwest::Client,
    proxy_url: &str,
    endpoint: &str,
) -> Result<Vec<Value>, KmbError> {
    debug!(endpoint, "requesting via proxy");

    let response = http
        .get(proxy_url)
        .query(&[("endpoint", endpoint)])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(KmbError::Api {
            status: status.as_u16(),
            message: body,
        });
    }

    let body = response.text().await?;
    let envelope: Value = serde_json::from_str(&body).map_err(|e| KmbError::Json {
        message: e.to_string(),
        body: Some(body.chars().take(500).collect()),
    })?;

    match envelope.get("data") {
        Some(Value::Array(items)) => Ok(items.clone()),
        _ => {
            warn!(endpoint, "unexpected payload shape, treating as empty");
            Ok(Vec::new())
        }
    }
}

fn parse_items<T: DeserializeOwned>(items: &[Value]) -> Result<Vec<T>, KmbError> {
    items
        .iter()
        .map(|item| {
            serde_json::from_value(item.clone()).map_err(|e| KmbError::Json {
                message: e.to_string(),
                body: Some(item.to_string().chars().take(500).collect()),
            })
        })
        .collect()
}
