use reqwest::Client;

/// Production upstream for the KMB open data API.
pub const DEFAULT_UPSTREAM: &str = "https://data.etabus.gov.hk/v1/transport/kmb";

/// Shared state for the proxy routes.
#[derive(Clone)]
pub struct AppState {
    pub http: Client,
    pub upstream_base: String,
}

impl AppState {
    pub fn new(upstream_base: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            upstream_base: upstream_base.into(),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(DEFAULT_UPSTREAM)
    }
}
