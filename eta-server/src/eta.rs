//! Arrival estimate presentation.

use chrono::{DateTime, Utc};

use crate::kmb::types::ArrivalEstimate;

/// How many estimates a stop panel shows.
pub const MAX_DISPLAYED: usize = 3;

/// Estimates worth displaying, in feed order, capped at [`MAX_DISPLAYED`].
///
/// The feed pads short services with placeholder rows carrying neither a
/// time nor a remark; those are dropped.
pub fn upcoming(estimates: &[ArrivalEstimate]) -> Vec<ArrivalEstimate> {
    estimates
        .iter()
        .filter(|e| e.is_valid())
        .take(MAX_DISPLAYED)
        .cloned()
        .collect()
}

/// A displayable estimate with its countdown text.
#[derive(Debug, Clone, PartialEq)]
pub struct Arrival {
    pub estimate: ArrivalEstimate,
    /// `None` for remark-only rows with no predicted time.
    pub countdown: Option<String>,
}

/// Displayable arrivals: [`upcoming`] estimates, each timed row labelled
/// relative to `now`.
pub fn display_arrivals(estimates: &[ArrivalEstimate], now: DateTime<Utc>) -> Vec<Arrival> {
    upcoming(estimates)
        .into_iter()
        .map(|estimate| Arrival {
            countdown: estimate.eta.map(|eta| countdown_label(eta, now)),
            estimate,
        })
        .collect()
}

/// Countdown text for an estimate relative to `now`.
///
/// Anything under a minute away (including buses already due) reads as
/// "Arriving"; beyond that, whole minutes rounded to the nearest.
pub fn countdown_label(eta: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (eta - now).num_seconds();
    let minutes = ((seconds as f64) / 60.0).round() as i64;
    match minutes {
        m if m < 1 => "Arriving".to_string(),
        1 => "1 min".to_string(),
        m => format!("{m} mins"),
    }
}
