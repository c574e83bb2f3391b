//! Position acquisition capability.
//!
//! The app never talks to a positioning device directly; it goes through
//! [`PositionSource`] so tests (and headless deployments) can substitute a
//! scripted source. [`PositionWatcher`] multiplexes any number of
//! subscribers onto at most one underlying device watch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tracing::debug;

use super::Coordinates;

/// Why a position could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionError {
    #[error("position access denied")]
    PermissionDenied,

    #[error("position unavailable: {0}")]
    Unavailable(String),

    #[error("timed out waiting for a position")]
    Timeout,

    #[error("no position source on this host")]
    Unsupported,
}

/// Acquisition tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    /// Give up if no fix arrives within this long.
    pub timeout: Duration,
    /// A cached fix no older than this is acceptable.
    pub maximum_age: Duration,
    /// Ask for the best accuracy the source offers.
    pub high_accuracy: bool,
}

impl Default for PositionOptions {
    /// One-shot lookup defaults: 10 s timeout, 5 min acceptable staleness.
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            maximum_age: Duration::from_secs(5 * 60),
            high_accuracy: true,
        }
    }
}

impl PositionOptions {
    /// Continuous-watch defaults: a longer timeout, fresher fixes.
    pub fn watch_defaults() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            maximum_age: Duration::from_secs(60),
            high_accuracy: true,
        }
    }
}

/// A position fix with its capture metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub coordinates: Coordinates,
    /// Reported accuracy radius in metres, when the source gives one.
    pub accuracy_m: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PositionFix {
    /// A fix captured now, with no accuracy estimate.
    pub fn new(coordinates: Coordinates) -> Self {
        Self {
            coordinates,
            accuracy_m: None,
            timestamp: Utc::now(),
        }
    }
}

/// Callback invoked with each fix (or failure) from a watch.
pub type PositionCallback = Arc<dyn Fn(Result<PositionFix, PositionError>) + Send + Sync>;

/// Handle to a running device watch; dropping or stopping it ends the watch.
pub trait WatchHandle: Send {
    fn stop(self: Box<Self>);
}

/// Source of device positions.
pub trait PositionSource: Send + Sync {
    /// One-shot position lookup.
    fn current_position(
        &self,
        options: PositionOptions,
    ) -> BoxFuture<'_, Result<PositionFix, PositionError>>;

    /// Start a continuous watch, delivering fixes to `callback`.
    fn watch(&self, options: PositionOptions, callback: PositionCallback) -> Box<dyn WatchHandle>;
}

/// Subscriber id handed out by [`PositionWatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct WatcherInner {
    next_id: u64,
    subscribers: HashMap<u64, PositionCallback>,
    active: Option<Box<dyn WatchHandle>>,
}

/// Fan-out over a single underlying device watch.
///
/// The device watch starts when the first subscriber arrives and stops when
/// the last one leaves, so an idle app holds no position resources.
pub struct PositionWatcher {
    source: Arc<dyn PositionSource>,
    options: PositionOptions,
    inner: Arc<Mutex<WatcherInner>>,
}

impl PositionWatcher {
    pub fn new(source: Arc<dyn PositionSource>) -> Self {
        Self::with_options(source, PositionOptions::watch_defaults())
    }

    pub fn with_options(source: Arc<dyn PositionSource>, options: PositionOptions) -> Self {
        Self {
            source,
            options,
            inner: Arc::new(Mutex::new(WatcherInner {
                next_id: 0,
                subscribers: HashMap::new(),
                active: None,
            })),
        }
    }

    /// Register `callback` to receive every fix from the shared watch.
    pub fn subscribe(&self, callback: PositionCallback) -> SubscriptionId {
        let mut inner = self.inner.lock().expect("watcher lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, callback);

        if inner.active.is_none() {
            debug!("starting shared position watch");
            let fan_out = Arc::clone(&self.inner);
            let handle = self.source.watch(
                self.options,
                Arc::new(move |update| {
                    let subscribers: Vec<PositionCallback> = {
                        let inner = fan_out.lock().expect("watcher lock poisoned");
                        inner.subscribers.values().cloned().collect()
                    };
                    for subscriber in subscribers {
                        subscriber(update.clone());
                    }
                }),
            );
            inner.active = Some(handle);
        }

        SubscriptionId(id)
    }

    /// Remove a subscriber. Unsubscribing twice is a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let handle = {
            let mut inner = self.inner.lock().expect("watcher lock poisoned");
            inner.subscribers.remove(&id.0);
            if inner.subscribers.is_empty() {
                inner.active.take()
            } else {
                None
            }
        };
        if let Some(handle) = handle {
            debug!("stopping shared position watch");
            handle.stop();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .expect("watcher lock poisoned")
            .subscribers
            .len()
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockPositions;
    use super::*;
    use std::sync::atomic::Ordering;

    const HERE: Coordinates = Coordinates {
        latitude: 22.3027,
        longitude: 114.1772,
    };

    #[tokio::test]
    async fn one_shot_lookup_returns_the_fix() {
        let source = MockPositions::fixed(HERE);
        let fix = source
            .current_position(PositionOptions::default())
            .await
            .unwrap();
        assert_eq!(fix.coordinates, HERE);
        assert_eq!(fix.accuracy_m, Some(8.0));
        assert!(fix.timestamp <= Utc::now());
    }

    #[tokio::test]
    async fn one_shot_lookup_reports_denial() {
        let source = MockPositions::failing(PositionError::PermissionDenied);
        let err = source
            .current_position(PositionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, PositionError::PermissionDenied);
    }

    #[test]
    fn watch_starts_once_and_stops_with_last_subscriber() {
        let source = Arc::new(MockPositions::fixed(HERE));
        let watcher = PositionWatcher::new(Arc::clone(&source) as Arc<dyn PositionSource>);

        let first = watcher.subscribe(Arc::new(|_| {}));
        let second = watcher.subscribe(Arc::new(|_| {}));
        assert_eq!(source.starts.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.subscriber_count(), 2);

        watcher.unsubscribe(first);
        assert_eq!(source.stops.load(Ordering::SeqCst), 0);

        watcher.unsubscribe(second);
        assert_eq!(source.stops.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.subscriber_count(), 0);

        // A new subscriber restarts the device watch.
        watcher.subscribe(Arc::new(|_| {}));
        assert_eq!(source.starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn every_subscriber_sees_each_fix() {
        let source = Arc::new(MockPositions::fixed(HERE));
        let watcher = PositionWatcher::new(Arc::clone(&source) as Arc<dyn PositionSource>);

        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));
        for seen in [&seen_a, &seen_b] {
            let seen = Arc::clone(seen);
            watcher.subscribe(Arc::new(move |update| {
                seen.lock().unwrap().push(update);
            }));
        }

        let fix = PositionFix::new(HERE);
        source.emit(Ok(fix));
        source.emit(Err(PositionError::Timeout));

        for seen in [seen_a, seen_b] {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[0], Ok(fix));
            assert_eq!(seen[1], Err(PositionError::Timeout));
        }
    }

    #[test]
    fn unsubscribing_twice_is_harmless() {
        let source = Arc::new(MockPositions::fixed(HERE));
        let watcher = PositionWatcher::new(Arc::clone(&source) as Arc<dyn PositionSource>);

        let id = watcher.subscribe(Arc::new(|_| {}));
        watcher.unsubscribe(id);
        watcher.unsubscribe(id);
        assert_eq!(source.stops.load(Ordering::SeqCst), 1);
    }
}
