//! Explicit dependency tracking
//!
//! A subscriber declares which ancestor nodes and which of their state keys
//! it depends on. There is no automatic inference and no whole-graph dirty
//! propagation: a change reaches a subscriber only through a declared
//! `(publisher, keys)` pair, and only when [`should_react`] says one of the
//! watched keys actually changed.

use crate::node::SceneNode;
use crate::state::{StateChange, StateSnapshot, Subscription};
use crate::types::NodeId;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};

type EqualityFn = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// How two values of a watched key are compared
#[derive(Clone, Default)]
pub enum Equality {
    /// Same allocation (cheap; correct for values replaced on every write)
    #[default]
    Reference,
    /// Structural JSON equality
    Deep,
    /// Caller-supplied comparison
    Custom(EqualityFn),
}

impl Equality {
    /// Custom equality from a closure
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    fn same(&self, a: &Arc<Value>, b: &Arc<Value>) -> bool {
        match self {
            Self::Reference => Arc::ptr_eq(a, b),
            Self::Deep => a == b,
            Self::Custom(f) => f(a, b),
        }
    }
}

impl fmt::Debug for Equality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference => write!(f, "Reference"),
            Self::Deep => write!(f, "Deep"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// True iff any watched key differs between the two snapshots
///
/// A key present in only one snapshot counts as changed. Pure and
/// idempotent.
pub fn should_react<'a, I>(old: &StateSnapshot, new: &StateSnapshot, watched: I, equality: &Equality) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    watched
        .into_iter()
        .any(|key| match (old.get(key), new.get(key)) {
            (Some(a), Some(b)) => !equality.same(a, b),
            (None, None) => false,
            _ => true,
        })
}

/// One declared `(publisher, keys)` dependency
#[derive(Debug, Clone)]
pub struct Dependency {
    publisher: Weak<SceneNode>,
    publisher_id: NodeId,
    keys: Vec<String>,
    equality: Equality,
}

impl Dependency {
    /// Publisher node ID
    #[inline]
    #[must_use]
    pub fn publisher_id(&self) -> NodeId {
        self.publisher_id
    }

    /// Watched keys
    #[inline]
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Check whether a change of the publisher concerns this dependency
    #[must_use]
    pub fn reacts(&self, old: &StateSnapshot, new: &StateSnapshot) -> bool {
        should_react(old, new, self.keys.iter().map(String::as_str), &self.equality)
    }
}

/// The declared dependencies of one subscriber node
#[derive(Debug, Clone)]
pub struct DependencyTracker {
    subscriber: NodeId,
    dependencies: Vec<Dependency>,
}

impl DependencyTracker {
    /// Create tracker for `subscriber` with no dependencies
    #[must_use]
    pub fn new(subscriber: NodeId) -> Self {
        Self {
            subscriber,
            dependencies: Vec::new(),
        }
    }

    /// Depend on `keys` of `publisher` with reference equality
    #[must_use]
    pub fn watch<K, I>(self, publisher: &Arc<SceneNode>, keys: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = K>,
    {
        self.watch_with(publisher, keys, Equality::Reference)
    }

    /// Depend on `keys` of `publisher` with a given equality
    #[must_use]
    pub fn watch_with<K, I>(mut self, publisher: &Arc<SceneNode>, keys: I, equality: Equality) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = K>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();

        // Merge keys into an existing entry for the same publisher
        if let Some(existing) = self
            .dependencies
            .iter_mut()
            .find(|d| d.publisher_id == publisher.id())
        {
            for key in keys {
                if !existing.keys.contains(&key) {
                    existing.keys.push(key);
                }
            }
            existing.equality = equality;
            return self;
        }

        self.dependencies.push(Dependency {
            publisher: Arc::downgrade(publisher),
            publisher_id: publisher.id(),
            keys,
            equality,
        });
        self
    }

    /// Subscriber node ID
    #[inline]
    #[must_use]
    pub fn subscriber(&self) -> NodeId {
        self.subscriber
    }

    /// Declared dependencies
    #[inline]
    #[must_use]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Check for a dependency on `publisher`
    #[must_use]
    pub fn depends_on(&self, publisher: NodeId) -> bool {
        self.dependencies.iter().any(|d| d.publisher_id == publisher)
    }

    /// Whether a change of `publisher` from `old` to `new` concerns us
    #[must_use]
    pub fn reacts_to(&self, publisher: NodeId, old: &StateSnapshot, new: &StateSnapshot) -> bool {
        self.dependencies
            .iter()
            .filter(|d| d.publisher_id == publisher)
            .any(|d| d.reacts(old, new))
    }

    /// Subscribe to every declared publisher
    ///
    /// `on_change` is invoked with the publisher ID and the change, once per
    /// publisher change that touches a watched key. Publishers that are no
    /// longer alive are skipped.
    pub fn connect<F>(&self, on_change: F) -> DependencyBinding
    where
        F: Fn(NodeId, &StateChange) + Send + Sync + 'static,
    {
        let on_change = Arc::new(on_change);
        let mut subscriptions = Vec::with_capacity(self.dependencies.len());

        for dep in &self.dependencies {
            let Some(publisher) = dep.publisher.upgrade() else {
                tracing::warn!(
                    subscriber = %self.subscriber,
                    publisher = %dep.publisher_id,
                    "dependency publisher dropped; skipping"
                );
                continue;
            };
            let dep = dep.clone();
            let callback = Arc::clone(&on_change);
            let subscriber = self.subscriber;
            subscriptions.push(publisher.subscribe(move |change| {
                if dep.reacts(&change.previous, &change.current) {
                    tracing::trace!(%subscriber, publisher = %dep.publisher_id, "dependency changed");
                    callback(dep.publisher_id, change);
                }
            }));
        }

        DependencyBinding { subscriptions }
    }

    /// Descendants of `root` whose registered tracker reacts to this change
    ///
    /// Nodes advertise their tracker as an `Arc<DependencyTracker>` extension.
    #[must_use]
    pub fn affected(
        root: &SceneNode,
        publisher: NodeId,
        old: &StateSnapshot,
        new: &StateSnapshot,
    ) -> Vec<Arc<SceneNode>> {
        root.find_descendants(|node| {
            node.extension::<DependencyTracker>()
                .is_some_and(|t| t.reacts_to(publisher, old, new))
        })
    }
}

/// Live subscriptions created by [`DependencyTracker::connect`]
#[must_use = "dropping a DependencyBinding leaves its subscriptions registered"]
#[derive(Debug)]
pub struct DependencyBinding {
    subscriptions: Vec<Subscription>,
}

impl DependencyBinding {
    /// Unsubscribe from every publisher. Idempotent.
    pub fn release(&self) {
        for sub in &self.subscriptions {
            sub.unsubscribe();
        }
    }

    /// Number of publisher subscriptions held
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Check if no subscriptions are held
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
