//! Expiring key-value cache over durable storage.
//!
//! Every entry is serialized as `{data, timestamp, expiry}` under the
//! `kmb_app_` prefix. Expired and corrupt entries are evicted lazily on
//! read; a write that hits the storage quota triggers one cleanup sweep
//! and a single retry, then gives up without failing the caller. Losing a
//! cache write must never take the app down.

mod persist;

pub use persist::{FileStore, MemoryStore, PersistentStore, StoreWriteError};

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::kmb::types::{Direction, Route, RouteStopLink, Stop, StopRouteLink};

/// Namespace prefix for every entry owned by this store.
const KEY_PREFIX: &str = "kmb_app_";

/// Route topology changes on a week scale.
const ROUTES_TTL_HOURS: i64 = 168;
/// Full stop list, same volatility as routes.
const STOPS_TTL_HOURS: i64 = 168;
/// Per-route stop sequences track schedule revisions.
const ROUTE_STOPS_TTL_HOURS: i64 = 24;
/// Per-stop serving routes, the most volatile link table.
const STOP_ROUTES_TTL_HOURS: i64 = 1;

/// On-storage shape of a cache entry.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry<T> {
    data: T,
    timestamp: DateTime<Utc>,
    expiry: DateTime<Utc>,
}

/// Per-entry observability record.
#[derive(Debug, Clone)]
pub struct EntryStats {
    pub key: String,
    pub size_kb: u64,
    pub expired: bool,
    /// Minutes since the entry was written. `None` for corrupt entries.
    pub age_mins: Option<i64>,
}

/// Snapshot of the store contents.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub total_items: usize,
    pub valid_items: usize,
    pub expired_items: usize,
    pub total_size_kb: u64,
    pub items: Vec<EntryStats>,
}

/// TTL cache over a [`PersistentStore`].
///
/// The store is the sole reader and writer of its key namespace.
pub struct TtlStore {
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
}

impl TtlStore {
    pub fn new(store: Arc<dyn PersistentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// On quota exhaustion this sweeps expired entries and retries exactly
    /// once; a second failure is logged and the write is dropped.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match self.try_set(key, value, ttl) {
            Ok(()) => debug!(key, ttl_hours = ttl.num_hours(), "cached"),
            Err(StoreWriteError::QuotaExceeded) => {
                warn!(key, "storage quota exhausted, sweeping expired entries");
                self.cleanup();
                if let Err(e) = self.try_set(key, value, ttl) {
                    error!(key, error = %e, "cache write dropped after retry");
                }
            }
            Err(e) => error!(key, error = %e, "cache write dropped"),
        }
    }

    fn try_set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StoreWriteError> {
        let now = self.clock.now();
        let entry = StoredEntry {
            data: value,
            timestamp: now,
            expiry: now + ttl,
        };
        let json =
            serde_json::to_string(&entry).map_err(|e| StoreWriteError::Other(e.to_string()))?;
        self.store.set_item(&self.full_key(key), &json)
    }

    /// Read `key` if present and unexpired.
    ///
    /// Expired and undeserializable entries are removed and reported as
    /// absent; reading an unexpired entry never mutates it.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full_key = self.full_key(key);
        let raw = self.store.get_item(&full_key)?;

        let entry: StoredEntry<T> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "removing corrupt cache entry");
                self.store.remove_item(&full_key);
                return None;
            }
        };

        if self.clock.now() >= entry.expiry {
            debug!(key, "cache entry expired");
            self.store.remove_item(&full_key);
            return None;
        }

        Some(entry.data)
    }

    pub fn remove(&self, key: &str) {
        self.store.remove_item(&self.full_key(key));
    }

    /// Whether `key` holds an unexpired entry. Evicts on the way, like `get`.
    pub fn has(&self, key: &str) -> bool {
        self.get::<serde_json::Value>(key).is_some()
    }

    /// All logical keys in the namespace, prefix stripped.
    pub fn keys(&self) -> Vec<String> {
        self.store
            .keys()
            .into_iter()
            .filter_map(|k| k.strip_prefix(KEY_PREFIX).map(String::from))
            .collect()
    }

    /// Sweep the namespace, evicting expired and corrupt entries.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup(&self) -> usize {
        let removed = self
            .keys()
            .into_iter()
            .filter(|key| self.get::<serde_json::Value>(key).is_none())
            .count();
        debug!(removed, "cache cleanup complete");
        removed
    }

    /// Remove every entry in the namespace. Returns the number removed.
    pub fn clear(&self) -> usize {
        let keys = self.keys();
        let count = keys.len();
        for key in keys {
            self.remove(&key);
        }
        count
    }

    /// Observability snapshot: counts, sizes, and per-entry age.
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let mut stats = CacheStats::default();

        for key in self.keys() {
            let Some(raw) = self.store.get_item(&self.full_key(&key)) else {
                continue;
            };
            let size_kb = (raw.len() as u64).div_ceil(1024);
            stats.total_items += 1;
            stats.total_size_kb += size_kb;

            match serde_json::from_str::<StoredEntry<serde_json::Value>>(&raw) {
                Ok(entry) => {
                    let expired = now >= entry.expiry;
                    if expired {
                        stats.expired_items += 1;
                    } else {
                        stats.valid_items += 1;
                    }
                    stats.items.push(EntryStats {
                        key,
                        size_kb,
                        expired,
                        age_mins: Some((now - entry.timestamp).num_minutes()),
                    });
                }
                Err(_) => {
                    stats.expired_items += 1;
                    stats.items.push(EntryStats {
                        key,
                        size_kb,
                        expired: true,
                        age_mins: None,
                    });
                }
            }
        }

        stats
    }
}

/// Domain convenience wrappers with fixed per-resource TTLs.
impl TtlStore {
    pub fn cache_routes(&self, routes: &[Route]) {
        self.set("routes", &routes, Duration::hours(ROUTES_TTL_HOURS));
    }

    pub fn cached_routes(&self) -> Option<Vec<Route>> {
        self.get("routes")
    }

    pub fn cache_stops(&self, stops: &[Stop]) {
        self.set("all_stops", &stops, Duration::hours(STOPS_TTL_HOURS));
    }

    pub fn cached_stops(&self) -> Option<Vec<Stop>> {
        self.get("all_stops")
    }

    pub fn cache_route_stops(&self, route: &str, direction: Direction, stops: &[RouteStopLink]) {
        self.set(
            &format!("route_stops_{route}_{direction}"),
            &stops,
            Duration::hours(ROUTE_STOPS_TTL_HOURS),
        );
    }

    pub fn cached_route_stops(&self, route: &str, direction: Direction) -> Option<Vec<RouteStopLink>> {
        self.get(&format!("route_stops_{route}_{direction}"))
    }

    pub fn cache_stop_routes(&self, stop_id: &str, routes: &[StopRouteLink]) {
        self.set(
            &format!("stop_routes_{stop_id}"),
            &routes,
            Duration::hours(STOP_ROUTES_TTL_HOURS),
        );
    }

    pub fn cached_stop_routes(&self, stop_id: &str) -> Option<Vec<StopRouteLink>> {
        self.get(&format!("stop_routes_{stop_id}"))
    }
}
