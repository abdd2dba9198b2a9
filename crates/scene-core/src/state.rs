//! State container with synchronous change notification
//!
//! A [`StateContainer`] owns an immutable [`StateSnapshot`]. Each call to
//! [`StateContainer::set_state`] merges a [`StatePatch`] into a fresh snapshot,
//! bumps the version and notifies subscribers in registration order.
//!
//! Values are stored as `Arc<serde_json::Value>` so an untouched key keeps the
//! same allocation across versions. Reference equality on a key is therefore a
//! valid (and cheap) "did this change" test.

use crate::types::SubscriberId;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Shared, immutable state value
pub type StateValue = Arc<Value>;

/// Immutable key/value snapshot of a node's state
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    version: u64,
    entries: im::OrdMap<String, StateValue>,
}

impl StateSnapshot {
    /// Create empty snapshot at version 0
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a version-0 snapshot from key/value pairs
    pub fn from_entries<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self {
            version: 0,
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), Arc::new(v)))
                .collect(),
        }
    }

    /// Version counter, incremented once per `set_state`
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Get value for key
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.entries.get(key)
    }

    /// Get value for key as a string slice
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    /// Check if key is present
    #[inline]
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterate keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StateValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of keys
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if snapshot has no keys
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the snapshot as a JSON object
    #[must_use]
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), Value::clone(v)))
            .collect();
        Value::Object(map)
    }

    fn apply(&self, patch: StatePatch) -> Self {
        let mut entries = self.entries.clone();
        for (key, op) in patch.ops {
            match op {
                PatchOp::Set(value) => {
                    entries.insert(key, value);
                }
                PatchOp::Remove => {
                    entries.remove(&key);
                }
            }
        }
        Self {
            version: self.version + 1,
            entries,
        }
    }
}

#[derive(Debug, Clone)]
enum PatchOp {
    Set(StateValue),
    Remove,
}

/// Partial state update, applied in insertion order
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    ops: Vec<(String, PatchOp)>,
}

impl StatePatch {
    /// Create empty patch
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set key to a freshly allocated value
    #[must_use]
    pub fn set(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_shared(key, Arc::new(value.into()))
    }

    /// Set key to an existing shared value, preserving its identity
    #[must_use]
    pub fn set_shared(mut self, key: impl Into<String>, value: StateValue) -> Self {
        self.ops.push((key.into(), PatchOp::Set(value)));
        self
    }

    /// Remove key
    #[must_use]
    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.ops.push((key.into(), PatchOp::Remove));
        self
    }

    /// Keys touched by this patch
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().map(|(k, _)| k.as_str())
    }

    /// Check if patch touches no keys
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// A single state transition delivered to subscribers
#[derive(Debug, Clone)]
pub struct StateChange {
    /// Snapshot before the update
    pub previous: Arc<StateSnapshot>,
    /// Snapshot after the update
    pub current: Arc<StateSnapshot>,
}

impl StateChange {
    /// Check whether `key` changed by reference
    #[must_use]
    pub fn changed(&self, key: &str) -> bool {
        match (self.previous.get(key), self.current.get(key)) {
            (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
            (None, None) => false,
            _ => true,
        }
    }
}

type StateCallback = Arc<dyn Fn(&StateChange) + Send + Sync>;

struct SubscriberEntry {
    id: SubscriberId,
    live: Arc<AtomicBool>,
    callback: StateCallback,
}

#[derive(Default)]
struct SubscriberRegistry {
    entries: Mutex<Vec<SubscriberEntry>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    fn remove(&self, id: SubscriberId) {
        self.entries.lock().retain(|e| e.id != id);
    }
}

/// Node state holder with subscriber notification
pub struct StateContainer {
    state: RwLock<Arc<StateSnapshot>>,
    subscribers: Arc<SubscriberRegistry>,
}

impl StateContainer {
    /// Create container holding `initial`
    #[must_use]
    pub fn new(initial: StateSnapshot) -> Self {
        Self {
            state: RwLock::new(Arc::new(initial)),
            subscribers: Arc::new(SubscriberRegistry::default()),
        }
    }

    /// Current snapshot
    #[inline]
    #[must_use]
    pub fn state(&self) -> Arc<StateSnapshot> {
        Arc::clone(&self.state.read())
    }

    /// Merge `patch` into a new snapshot and notify subscribers
    ///
    /// Subscribers are notified synchronously, in registration order, with the
    /// subscriber list captured before the first callback runs. A callback that
    /// subscribes during notification is not called for this change; one that
    /// is unsubscribed during notification is skipped if not yet reached.
    pub fn set_state(&self, patch: StatePatch) -> Arc<StateSnapshot> {
        let change = {
            let mut guard = self.state.write();
            let previous = Arc::clone(&guard);
            let current = Arc::new(previous.apply(patch));
            *guard = Arc::clone(&current);
            StateChange { previous, current }
        };

        let targets: Vec<(Arc<AtomicBool>, StateCallback)> = self
            .subscribers
            .entries
            .lock()
            .iter()
            .map(|e| (Arc::clone(&e.live), Arc::clone(&e.callback)))
            .collect();

        for (live, callback) in targets {
            if live.load(Ordering::Acquire) {
                callback(&change);
            }
        }

        change.current
    }

    /// Register a change callback
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        let id = SubscriberId(self.subscribers.next_id.fetch_add(1, Ordering::Relaxed));
        let live = Arc::new(AtomicBool::new(true));
        self.subscribers.entries.lock().push(SubscriberEntry {
            id,
            live: Arc::clone(&live),
            callback: Arc::new(callback),
        });
        Subscription {
            id,
            live,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    /// Number of registered subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.entries.lock().len()
    }
}

impl Default for StateContainer {
    fn default() -> Self {
        Self::new(StateSnapshot::new())
    }
}

impl fmt::Debug for StateContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateContainer")
            .field("state", &self.state())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle returned by [`StateContainer::subscribe`]
///
/// Dropping the handle does not unsubscribe; ownership of a subscription is
/// explicit and ends with [`Subscription::unsubscribe`].
#[must_use = "dropping a Subscription leaves the callback registered"]
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    live: Arc<AtomicBool>,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    /// Remove the callback. Idempotent.
    pub fn unsubscribe(&self) {
        if self.live.swap(false, Ordering::AcqRel) {
            if let Some(registry) = self.registry.upgrade() {
                registry.remove(self.id);
            }
        }
    }

    /// Check if callback is still registered
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Subscriber ID
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("len", &self.entries.lock().len())
            .finish()
    }
}
