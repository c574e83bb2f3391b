//! DTOs for the etabus KMB API.
//!
//! The upstream serializes almost everything as strings, including
//! coordinates and sequence numbers; the ETA feed is the exception and
//! mixes numbers in. These types stay close to the wire shape and leave
//! interpretation (coordinate parsing, validity filtering) to the layers
//! above.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Direction of travel along a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    /// Single-letter bound code used by the upstream API.
    pub fn bound_code(self) -> char {
        match self {
            Direction::Outbound => 'O',
            Direction::Inbound => 'I',
        }
    }

    pub fn from_bound_code(code: &str) -> Option<Self> {
        match code {
            "O" => Some(Direction::Outbound),
            "I" => Some(Direction::Inbound),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => write!(f, "outbound"),
            Direction::Inbound => write!(f, "inbound"),
        }
    }
}

/// A bus route variant as returned by `/route`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub route: String,
    pub bound: String,
    pub service_type: String,
    pub orig_en: String,
    #[serde(default)]
    pub orig_tc: Option<String>,
    pub dest_en: String,
    #[serde(default)]
    pub dest_tc: Option<String>,
}

impl Route {
    pub fn direction(&self) -> Option<Direction> {
        Direction::from_bound_code(&self.bound)
    }
}

/// A bus stop as returned by `/stop` and `/stop/{id}`.
///
/// Coordinates arrive as strings and may not parse; geo code must exclude
/// such stops rather than fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub stop: String,
    pub name_en: String,
    #[serde(default)]
    pub name_tc: Option<String>,
    pub lat: String,
    pub long: String,
}

/// One position in a route's ordered stop sequence (`/route-stop/...`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStopLink {
    pub route: String,
    pub bound: String,
    pub service_type: String,
    pub seq: String,
    pub stop: String,
}

/// One route serving a stop (`/stop-route/{id}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRouteLink {
    pub route: String,
    pub bound: String,
    pub service_type: String,
    #[serde(default)]
    pub seq: String,
}

impl StopRouteLink {
    pub fn direction(&self) -> Option<Direction> {
        Direction::from_bound_code(&self.bound)
    }
}

/// A live arrival estimate (`/eta/{stop}/{route}/{serviceType}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalEstimate {
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub dir: Option<String>,
    /// The ETA feed serializes this as a number where every other endpoint
    /// uses a string.
    #[serde(default, deserialize_with = "string_or_number")]
    pub service_type: Option<String>,
    #[serde(default)]
    pub eta: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rmk_en: Option<String>,
    #[serde(default)]
    pub rmk_tc: Option<String>,
}

impl ArrivalEstimate {
    /// An estimate is worth showing if it predicts a time or carries a remark.
    pub fn is_valid(&self) -> bool {
        self.eta.is_some()
            || self.rmk_en.as_deref().is_some_and(|s| !s.is_empty())
            || self.rmk_tc.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Accept either a JSON string or a number, normalized to a string.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
