//! Proxy route handlers.
//!
//! A browser client cannot call the KMB API directly because the upstream
//! sends no CORS headers. This thin proxy forwards `GET /proxy?endpoint=...`
//! to the upstream, relays successful payloads with a short shared cache
//! lifetime, and collapses every upstream problem into a 500 so clients
//! have exactly one failure shape to handle.

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

use super::state::AppState;

/// Shared-cache lifetime stamped on successful responses.
const CACHE_CONTROL_VALUE: &str = "public, max-age=300";

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/proxy", get(forward).options(preflight))
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// CORS preflight. The `CorsLayer` attaches the actual headers.
async fn preflight() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct ProxyParams {
    endpoint: Option<String>,
}

async fn forward(State(state): State<AppState>, Query(params): Query<ProxyParams>) -> Response {
    let Some(endpoint) = params.endpoint.filter(|e| !e.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Missing endpoint parameter"})),
        )
            .into_response();
    };

    let url = format!("{}{}", state.upstream_base, endpoint);
    debug!(%url, "forwarding to upstream");

    let response = match state.http.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(%url, error = %e, "upstream unreachable");
            return upstream_failure("Failed to fetch data", &e.to_string());
        }
    };

    let status = response.status();
    if !status.is_success() {
        warn!(%url, status = %status, "upstream returned an error");
        return upstream_failure(
            "Failed to fetch data",
            &format!("upstream status {status}"),
        );
    }

    match response.bytes().await {
        Ok(body) => (
            StatusCode::OK,
            [
                (
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                ),
                (
                    header::CACHE_CONTROL,
                    HeaderValue::from_static(CACHE_CONTROL_VALUE),
                ),
            ],
            body,
        )
            .into_response(),
        Err(e) => upstream_failure("Failed to read upstream response", &e.to_string()),
    }
}

fn upstream_failure(error: &str, details: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": error, "details": details})),
    )
        .into_response()
}
