//! Data-access core for a KMB bus arrival board.
//!
//! Gives a rider-facing app fast, bounded access to the etabus transit API:
//! a coalescing HTTP client with per-resource caching, a TTL key-value
//! store over durable storage, geolocation-based nearby-stop search, and
//! the forwarding proxy the client talks to.

pub mod app;
pub mod clock;
pub mod eta;
pub mod favorites;
pub mod geo;
pub mod kmb;
pub mod store;
pub mod web;
