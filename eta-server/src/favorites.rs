//! Saved favourite stops.
//!
//! Favourites live directly in the persistent store under their own key,
//! outside the TTL store's `kmb_app_` namespace; they never expire and
//! cache maintenance sweeps cannot touch them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::kmb::types::Direction;
use crate::store::PersistentStore;

/// Storage key for the favourites list. Deliberately not under the TTL
/// store's `kmb_app_` prefix: entries there are expiring cache records and
/// get evicted by its sweeps.
const FAVORITES_KEY: &str = "kmb_favorites";

/// Hard cap on saved favourites.
pub const MAX_FAVORITES: usize = 5;

/// A saved (route, stop, direction) the user wants quick arrivals for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub route: String,
    pub direction: Direction,
    pub stop_id: String,
    pub service_type: String,
    pub stop_name: String,
    #[serde(default)]
    pub stop_name_tc: Option<String>,
    #[serde(default)]
    pub dest_name: Option<String>,
    #[serde(default)]
    pub seq: Option<String>,
}

impl Favorite {
    fn matches(&self, other: &Favorite) -> bool {
        self.route == other.route
            && self.stop_id == other.stop_id
            && self.direction == other.direction
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FavoriteError {
    #[error("favourites list is full ({MAX_FAVORITES} max)")]
    ListFull,

    #[error("this stop is already a favourite for this route")]
    Duplicate,
}

/// The persisted favourites list.
pub struct Favorites {
    store: Arc<dyn PersistentStore>,
    items: Vec<Favorite>,
}

impl Favorites {
    /// Load favourites from the store. A missing or corrupt record starts
    /// the list empty rather than failing.
    pub fn load(store: Arc<dyn PersistentStore>) -> Self {
        let items = match store.get_item(FAVORITES_KEY) {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(items) => items,
                Err(e) => {
                    warn!(error = %e, "discarding corrupt favourites record");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        Self { store, items }
    }

    pub fn list(&self) -> &[Favorite] {
        &self.items
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= MAX_FAVORITES
    }

    /// Add a favourite, enforcing the cap and uniqueness on
    /// (route, stop, direction).
    pub fn add(&mut self, favorite: Favorite) -> Result<(), FavoriteError> {
        if self.items.len() >= MAX_FAVORITES {
            return Err(FavoriteError::ListFull);
        }
        if self.items.iter().any(|f| f.matches(&favorite)) {
            return Err(FavoriteError::Duplicate);
        }
        self.items.push(favorite);
        self.persist();
        Ok(())
    }

    /// Remove the favourite matching (route, stop, direction), if present.
    /// Returns whether anything was removed.
    pub fn remove(&mut self, route: &str, stop_id: &str, direction: Direction) -> bool {
        let before = self.items.len();
        self.items
            .retain(|f| !(f.route == route && f.stop_id == stop_id && f.direction == direction));
        let removed = self.items.len() != before;
        if removed {
            self.persist();
        }
        removed
    }

    fn persist(&self) {
        let raw = match serde_json::to_string(&self.items) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "could not serialize favourites");
                return;
            }
        };
        if let Err(e) = self.store.set_item(FAVORITES_KEY, &raw) {
            warn!(error = %e, "could not persist favourites");
        }
    }
}
