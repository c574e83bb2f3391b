use std::net::SocketAddr;

use eta_server::web::{AppState, DEFAULT_UPSTREAM, create_router};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let upstream =
        std::env::var("KMB_UPSTREAM_URL").unwrap_or_else(|_| DEFAULT_UPSTREAM.to_string());

    let state = AppState::new(&upstream);
    let app = create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    println!("KMB ETA proxy listening on http://{addr}");
    println!();
    println!("Endpoints:");
    println!("  GET /health                - Health check");
    println!("  GET /proxy?endpoint=/route - Forward a KMB API request");
    println!();
    println!("Upstream: {upstream}");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
