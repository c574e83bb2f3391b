//! Application orchestration: startup data load and the nearby-stops search.
//!
//! This is the layer a UI talks to. It composes the durable TTL store, the
//! network client, and the position source, and degrades per item: a stop
//! whose route list cannot be fetched still appears with what we have,
//! rather than sinking the whole search.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};

use crate::eta::{Arrival, display_arrivals};
use crate::geo::position::{PositionError, PositionOptions, PositionSource};
use crate::geo::{Coordinates, LocatedStop, format_distance, stops_within_radius};
use crate::kmb::types::{Direction, Stop};
use crate::kmb::{ClientCacheStats, KmbClient, KmbError};
use crate::store::{CacheStats, TtlStore};

/// Search radius when the caller does not specify one.
pub const DEFAULT_RADIUS_M: f64 = 500.0;
/// How many nearby stops a search returns.
pub const MAX_NEARBY_STOPS: usize = 5;
/// How many routes are expanded with arrivals per stop.
pub const MAX_ROUTES_PER_STOP: usize = 3;

/// Outcome of the startup data load.
///
/// Initialization always completes; failures are recorded here and the app
/// runs with whatever data it has.
#[derive(Debug, Default)]
pub struct InitSummary {
    pub routes: usize,
    pub stops: usize,
    pub routes_from_cache: bool,
    pub stops_from_cache: bool,
    pub errors: Vec<String>,
}

/// A route serving a nearby stop, with its next arrivals.
#[derive(Debug, Clone)]
pub struct NearbyRoute {
    pub route: String,
    pub direction: Direction,
    pub service_type: String,
    pub arrivals: Vec<Arrival>,
}

/// One stop in a nearby search result.
#[derive(Debug, Clone)]
pub struct NearbyStop {
    pub stop: Stop,
    pub distance_m: f64,
    pub distance_label: String,
    pub routes: Vec<NearbyRoute>,
}

/// Result of a nearby search.
#[derive(Debug, Clone)]
pub struct NearbySearch {
    pub origin: Coordinates,
    pub radius_m: f64,
    pub stops: Vec<NearbyStop>,
}

/// Why a nearby search produced nothing at all.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NearbyError {
    #[error(transparent)]
    Position(#[from] PositionError),

    #[error(transparent)]
    Api(#[from] KmbError),
}

/// The app's composed data layer.
pub struct AppData {
    client: KmbClient,
    store: TtlStore,
    positions: Arc<dyn PositionSource>,
}

impl AppData {
    pub fn new(client: KmbClient, store: TtlStore, positions: Arc<dyn PositionSource>) -> Self {
        Self {
            client,
            store,
            positions,
        }
    }

    /// Load the route and stop tables, durable cache first, network second.
    ///
    /// The two loads run concurrently. Either may fail without aborting the
    /// other; a failed load with no cached fallback leaves that table empty
    /// for this session.
    pub async fn initialize(&self) -> InitSummary {
        let mut summary = InitSummary::default();

        let routes = async {
            if let Some(routes) = self.store.cached_routes() {
                return (routes.len(), true, None);
            }
            match self.client.all_routes().await {
                Ok(routes) => {
                    self.store.cache_routes(&routes);
                    (routes.len(), false, None)
                }
                Err(e) => (0, false, Some(format!("routes: {e}"))),
            }
        };

        let stops = async {
            if let Some(stops) = self.store.cached_stops() {
                return (stops.len(), true, None);
            }
            match self.client.all_stops().await {
                Ok(stops) => {
                    self.store.cache_stops(&stops);
                    (stops.len(), false, None)
                }
                Err(e) => (0, false, Some(format!("stops: {e}"))),
            }
        };

        let ((routes, routes_cached, routes_err), (stops, stops_cached, stops_err)) =
            tokio::join!(routes, stops);

        summary.routes = routes;
        summary.routes_from_cache = routes_cached;
        summary.stops = stops;
        summary.stops_from_cache = stops_cached;
        summary.errors.extend(routes_err);
        summary.errors.extend(stops_err);

        for error in &summary.errors {
            warn!(%error, "startup load incomplete");
        }
        info!(
            routes = summary.routes,
            stops = summary.stops,
            from_cache = summary.routes_from_cache && summary.stops_from_cache,
            "startup data load complete"
        );
        summary
    }

    /// Find stops near the device, with serving routes and next arrivals.
    ///
    /// Fails only when no position or no stop list can be obtained; every
    /// later lookup degrades per item.
    pub async fn find_nearby(&self, radius_m: f64) -> Result<NearbySearch, NearbyError> {
        let fix = self
            .positions
            .current_position(PositionOptions::default())
            .await?;
        let origin = fix.coordinates;

        let stops = match self.store.cached_stops() {
            Some(stops) => stops,
            None => {
                let stops = self.client.all_stops().await?;
                self.store.cache_stops(&stops);
                stops
            }
        };

        let located = stops_within_radius(&stops, origin, radius_m);
        let nearby = join_all(
            located
                .into_iter()
                .take(MAX_NEARBY_STOPS)
                .map(|stop| self.annotate_stop(stop)),
        )
        .await;

        Ok(NearbySearch {
            origin,
            radius_m,
            stops: nearby,
        })
    }

    async fn annotate_stop(&self, located: LocatedStop) -> NearbyStop {
        let stop_id = located.stop.stop.clone();

        let links = match self.store.cached_stop_routes(&stop_id) {
            Some(links) => links,
            None => match self.client.stop_routes(&stop_id).await {
                Ok(links) => {
                    self.store.cache_stop_routes(&stop_id, &links);
                    links
                }
                Err(e) => {
                    warn!(stop_id = %stop_id, error = %e, "route lookup failed for nearby stop");
                    Vec::new()
                }
            },
        };

        let routes = join_all(links.into_iter().take(MAX_ROUTES_PER_STOP).filter_map(
            |link| {
                let direction = link.direction()?;
                Some(self.annotate_route(
                    stop_id.clone(),
                    link.route,
                    direction,
                    link.service_type,
                ))
            },
        ))
        .await;

        NearbyStop {
            distance_label: format_distance(located.distance_m),
            distance_m: located.distance_m,
            stop: located.stop,
            routes,
        }
    }

    async fn annotate_route(
        &self,
        stop_id: String,
        route: String,
        direction: Direction,
        service_type: String,
    ) -> NearbyRoute {
        let arrivals = match self.client.eta(&stop_id, &route, &service_type).await {
            Ok(estimates) => display_arrivals(&estimates, Utc::now()),
            Err(e) => {
                warn!(stop_id = %stop_id, route = %route, error = %e, "arrival lookup failed");
                Vec::new()
            }
        };
        NearbyRoute {
            route,
            direction,
            service_type,
            arrivals,
        }
    }

    /// Sweep expired entries from the durable store.
    pub fn cleanup(&self) -> usize {
        self.store.cleanup()
    }

    /// Drop all cached data, durable and in-memory.
    pub fn clear_all(&self) -> usize {
        self.client.clear_cache();
        self.store.clear()
    }

    /// Durable-store observability snapshot.
    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// In-memory client cache counters.
    pub async fn client_cache_stats(&self) -> ClientCacheStats {
        self.client.cache_stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use axum::Router;
    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Json, Response};
    use axum::routing::get;
    use serde_json::{Value, json};
    use tokio::sync::Mutex as AsyncMutex;

    use crate::clock::ManualClock;
    use crate::geo::position::mock::MockPositions;
    use crate::kmb::KmbConfig;
    use crate::store::MemoryStore;

    const ORIGIN: Coordinates = Coordinates {
        latitude: 22.3027,
        longitude: 114.1772,
    };

    #[derive(Clone, Default)]
    struct Stub {
        hits: Arc<AsyncMutex<Vec<String>>>,
        replies: Arc<AsyncMutex<HashMap<String, (u16, Value)>>>,
    }

    impl Stub {
        async fn script(&self, endpoint: &str, status: u16, body: Value) {
            self.replies
                .lock()
                .await
                .insert(endpoint.to_string(), (status, body));
        }

        async fn hit_count(&self) -> usize {
            self.hits.lock().await.len()
        }
    }

    async fn stub_handler(
        State(stub): State<Stub>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        let endpoint = params.get("endpoint").cloned().unwrap_or_default();
        stub.hits.lock().await.push(endpoint.clone());

        match stub.replies.lock().await.get(&endpoint) {
            Some((status, body)) => (
                StatusCode::from_u16(*status).unwrap(),
                Json(body.clone()),
            )
                .into_response(),
            None => (StatusCode::NOT_FOUND, Json(json!({"error": "no stub"}))).into_response(),
        }
    }

    async fn spawn_stub(stub: Stub) -> String {
        let app = Router::new()
            .route("/proxy", get(stub_handler))
            .with_state(stub);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/proxy")
    }

    fn app_for(proxy_url: String, positions: Arc<dyn PositionSource>) -> AppData {
        let client = KmbClient::new(KmbConfig::new(proxy_url)).unwrap();
        let store = TtlStore::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(Utc::now())),
        );
        AppData::new(client, store, positions)
    }

    fn route_json(route: &str) -> Value {
        json!({
            "route": route,
            "bound": "O",
            "service_type": "1",
            "orig_en": "CHEUNG ON",
            "dest_en": "TSIM SHA TSUI EAST"
        })
    }

    fn stop_json(id: &str, lat: f64, long: f64) -> Value {
        json!({
            "stop": id,
            "name_en": format!("Stop {id}"),
            "lat": format!("{lat:.6}"),
            "long": format!("{long:.6}")
        })
    }

    #[tokio::test]
    async fn cold_start_fetches_and_populates_the_durable_cache() {
        let stub = Stub::default();
        stub.script("/route", 200, json!({"data": [route_json("41A")]}))
            .await;
        stub.script(
            "/stop",
            200,
            json!({"data": [stop_json("HKST1", 22.3027, 114.1772)]}),
        )
        .await;

        let positions = Arc::new(MockPositions::fixed(ORIGIN));
        let app = app_for(spawn_stub(stub.clone()).await, positions);

        let summary = app.initialize().await;
        assert_eq!(summary.routes, 1);
        assert_eq!(summary.stops, 1);
        assert!(!summary.routes_from_cache);
        assert!(summary.errors.is_empty());

        // A second initialize is served entirely from the durable store.
        let hits_before = stub.hit_count().await;
        let again = app.initialize().await;
        assert!(again.routes_from_cache);
        assert!(again.stops_from_cache);
        assert_eq!(stub.hit_count().await, hits_before);
    }

    #[tokio::test]
    async fn partial_startup_failure_still_completes() {
        let stub = Stub::default();
        stub.script("/route", 200, json!({"data": [route_json("41A")]}))
            .await;
        stub.script("/stop", 500, json!({"error": "down"})).await;

        let positions = Arc::new(MockPositions::fixed(ORIGIN));
        let app = app_for(spawn_stub(stub).await, positions);

        let summary = app.initialize().await;
        assert_eq!(summary.routes, 1);
        assert_eq!(summary.stops, 0);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("stops:"));
    }

    #[tokio::test]
    async fn nearby_search_annotates_stops_with_routes_and_arrivals() {
        let stub = Stub::default();
        // One stop right at the origin, one far away.
        stub.script(
            "/stop",
            200,
            json!({"data": [
                stop_json("NEAR", 22.3027, 114.1772),
                stop_json("FAR", 22.4027, 114.1772),
            ]}),
        )
        .await;
        stub.script(
            "/stop-route/NEAR",
            200,
            json!({"data": [
                {"route": "41A", "bound": "O", "service_type": "1"},
                {"route": "6", "bound": "I", "service_type": "1"},
            ]}),
        )
        .await;
        let eta = (Utc::now() + chrono::Duration::minutes(4)).to_rfc3339();
        stub.script(
            "/eta/NEAR/41A/1",
            200,
            json!({"data": [{"route": "41A", "service_type": 1, "eta": eta}]}),
        )
        .await;
        // "/eta/NEAR/6/1" is unscripted: that route degrades to no arrivals.

        let positions = Arc::new(MockPositions::fixed(ORIGIN));
        let app = app_for(spawn_stub(stub).await, positions);

        let search = app.find_nearby(DEFAULT_RADIUS_M).await.unwrap();
        assert_eq!(search.stops.len(), 1);

        let nearby = &search.stops[0];
        assert_eq!(nearby.stop.stop, "NEAR");
        assert!(nearby.distance_m < 1.0);
        assert_eq!(nearby.distance_label, "0m");
        assert_eq!(nearby.routes.len(), 2);

        let with_eta = nearby.routes.iter().find(|r| r.route == "41A").unwrap();
        assert_eq!(with_eta.direction, Direction::Outbound);
        assert_eq!(with_eta.arrivals.len(), 1);
        assert_eq!(with_eta.arrivals[0].countdown.as_deref(), Some("4 mins"));

        let degraded = nearby.routes.iter().find(|r| r.route == "6").unwrap();
        assert!(degraded.arrivals.is_empty());
    }

    #[tokio::test]
    async fn nearby_search_fails_cleanly_without_a_position() {
        let stub = Stub::default();
        let positions = Arc::new(MockPositions::failing(PositionError::PermissionDenied));
        let app = app_for(spawn_stub(stub.clone()).await, positions);

        let err = app.find_nearby(DEFAULT_RADIUS_M).await.unwrap_err();
        assert!(matches!(
            err,
            NearbyError::Position(PositionError::PermissionDenied)
        ));
        // Nothing was fetched.
        assert_eq!(stub.hit_count().await, 0);
    }

    #[tokio::test]
    async fn nearby_search_fails_when_no_stop_list_is_available() {
        let stub = Stub::default(); // every endpoint 404s
        let positions = Arc::new(MockPositions::fixed(ORIGIN));
        let app = app_for(spawn_stub(stub).await, positions);

        let err = app.find_nearby(DEFAULT_RADIUS_M).await.unwrap_err();
        assert!(matches!(err, NearbyError::Api(KmbError::Api { .. })));
    }

    #[tokio::test]
    async fn clear_all_empties_the_durable_store() {
        let stub = Stub::default();
        stub.script("/route", 200, json!({"data": [route_json("41A")]}))
            .await;
        stub.script("/stop", 200, json!({"data": []})).await;

        let positions = Arc::new(MockPositions::fixed(ORIGIN));
        let app = app_for(spawn_stub(stub).await, positions);

        app.initialize().await;
        assert!(app.stats().total_items >= 2);

        let removed = app.clear_all();
        assert!(removed >= 2);
        assert_eq!(app.stats().total_items, 0);
    }
}
