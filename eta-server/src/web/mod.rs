//! Forwarding proxy HTTP layer.

mod routes;
mod state;

pub use routes::create_router;
pub use state::{AppState, DEFAULT_UPSTREAM};
