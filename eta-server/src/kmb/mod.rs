//! Client for the KMB/LWB open data API.
//!
//! All traffic goes through the forwarding proxy in [`crate::web`]; the
//! client layers response caching and request coalescing on top.

mod client;
mod error;
pub mod types;

pub use client::{ClientCacheStats, KmbClient, KmbConfig};
pub use error::KmbError;
