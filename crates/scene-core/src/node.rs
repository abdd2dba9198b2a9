//! Scene node: state container + activation lifecycle + tree links
//!
//! A [`SceneNode`] is composed from a [`StateContainer`] and an
//! [`ActivationLifecycle`] rather than inheriting behavior. Children are owned
//! by their parent (`Arc`); the parent link is a `Weak` lookup reference set
//! once at attach and cleared at detach.
//!
//! Behavior that lives outside this crate (variable sets, query schedulers,
//! time-range scopes) is hung on a node as a typed extension.

use crate::error::SceneError;
use crate::lifecycle::{ActivationLifecycle, ActivationState, HandlerResult};
use crate::state::{StateChange, StateContainer, StatePatch, StateSnapshot, Subscription};
use crate::types::NodeId;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// A node of the reactive scene graph
pub struct SceneNode {
    id: NodeId,
    kind: String,
    this: Weak<SceneNode>,
    state: StateContainer,
    lifecycle: ActivationLifecycle<SceneNode>,
    parent: RwLock<Option<Weak<SceneNode>>>,
    children: RwLock<Vec<Arc<SceneNode>>>,
    extensions: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl SceneNode {
    /// Create a detached node with empty state
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Arc<Self> {
        Self::with_state(kind, StateSnapshot::new())
    }

    /// Create a detached node with initial state
    #[must_use]
    pub fn with_state(kind: impl Into<String>, initial: StateSnapshot) -> Arc<Self> {
        let kind = kind.into();
        Arc::new_cyclic(|this| Self {
            id: NodeId::new(),
            kind,
            this: this.clone(),
            state: StateContainer::new(initial),
            lifecycle: ActivationLifecycle::new(),
            parent: RwLock::new(None),
            children: RwLock::new(Vec::new()),
            extensions: RwLock::new(HashMap::new()),
        })
    }

    /// Node ID
    #[inline]
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Node kind label (e.g. `dashboard`, `panel`)
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Strong handle to this node
    ///
    /// # Errors
    /// `SceneError::NodeDropped` if the last owner is gone
    pub fn handle(&self) -> Result<Arc<SceneNode>, SceneError> {
        self.this.upgrade().ok_or(SceneError::NodeDropped(self.id))
    }

    // ---- state -------------------------------------------------------

    /// Current state snapshot
    #[inline]
    #[must_use]
    pub fn state(&self) -> Arc<StateSnapshot> {
        self.state.state()
    }

    /// Merge `patch` into this node's state and notify subscribers
    pub fn set_state(&self, patch: StatePatch) -> Arc<StateSnapshot> {
        tracing::trace!(node = %self.id, keys = ?patch.keys().collect::<Vec<_>>(), "set_state");
        self.state.set_state(patch)
    }

    /// Subscribe to this node's state changes
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.state.subscribe(callback)
    }

    /// Number of state subscribers
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.subscriber_count()
    }

    // ---- lifecycle ---------------------------------------------------

    /// Register an activation handler
    pub fn add_activation_handler<F>(&self, handler: F)
    where
        F: Fn(&SceneNode) -> HandlerResult + Send + Sync + 'static,
    {
        self.lifecycle.add_activation_handler(handler);
    }

    /// Activation state
    #[inline]
    #[must_use]
    pub fn activation_state(&self) -> ActivationState {
        self.lifecycle.state()
    }

    /// Check if active
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lifecycle.is_active()
    }

    /// Activate this node only
    ///
    /// # Errors
    /// - `SceneError::AlreadyActive` if already active
    /// - `SceneError::ActivationFailed` if a handler failed
    pub fn activate(&self) -> Result<(), SceneError> {
        self.lifecycle.activate(self.id, self)
    }

    /// Deactivate this node only. No-op when inactive.
    pub fn deactivate(&self) {
        self.lifecycle.deactivate(self.id);
    }

    /// Activate this node, then its descendants top-down
    ///
    /// Already-active descendants are left as they are. On failure the nodes
    /// activated by this call are deactivated again, bottom-up.
    ///
    /// # Errors
    /// First activation error encountered
    pub fn activate_subtree(&self) -> Result<(), SceneError> {
        let root = self.handle()?;
        let mut order = vec![Arc::clone(&root)];
        order.extend(root.find_descendants(|_| true));

        let mut activated: Vec<Arc<SceneNode>> = Vec::with_capacity(order.len());
        for node in order {
            if node.is_active() {
                continue;
            }
            if let Err(e) = node.activate() {
                for done in activated.iter().rev() {
                    done.deactivate();
                }
                return Err(e);
            }
            activated.push(node);
        }
        Ok(())
    }

    /// Deactivate descendants bottom-up, then this node
    pub fn deactivate_subtree(&self) {
        let children: Vec<Arc<SceneNode>> = self.children.read().clone();
        for child in children.iter().rev() {
            child.deactivate_subtree();
        }
        self.deactivate();
    }

    // ---- tree --------------------------------------------------------

    /// Parent node, if attached
    #[must_use]
    pub fn parent(&self) -> Option<Arc<SceneNode>> {
        self.parent.read().as_ref().and_then(Weak::upgrade)
    }

    /// Snapshot of the child sequence
    #[must_use]
    pub fn children(&self) -> Vec<Arc<SceneNode>> {
        self.children.read().clone()
    }

    /// Check if attached to a parent
    #[inline]
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.parent.read().is_some()
    }

    /// Attach under `parent`, appending to its children
    ///
    /// # Errors
    /// - `SceneError::AlreadyAttached` if this node has a parent
    /// - `SceneError::WouldCreateCycle` if `parent` is this node or one of
    ///   its descendants
    pub fn attach(&self, parent: &Arc<SceneNode>) -> Result<(), SceneError> {
        let me = self.handle()?;

        let cycles = parent.id == self.id
            || parent.find_ancestor(|n| n.id == self.id).is_some();
        if cycles {
            return Err(SceneError::WouldCreateCycle {
                node: self.id,
                parent: parent.id,
            });
        }

        {
            let mut link = self.parent.write();
            if let Some(existing) = link.as_ref() {
                let parent_id = existing.upgrade().map_or(self.id, |p| p.id);
                return Err(SceneError::AlreadyAttached {
                    node: self.id,
                    parent: parent_id,
                });
            }
            *link = Some(Arc::downgrade(parent));
        }

        parent.children.write().push(me);
        tracing::debug!(node = %self.id, parent = %parent.id, "attached");
        Ok(())
    }

    /// Detach from the parent
    ///
    /// An active node (and its active descendants) is deactivated first; only
    /// then is it removed from the former parent's children. Detaching a
    /// detached node is a no-op.
    pub fn detach(&self) {
        if !self.is_attached() {
            return;
        }

        self.deactivate_subtree();

        let former = self.parent.write().take();
        if let Some(parent) = former.and_then(|w| w.upgrade()) {
            parent.children.write().retain(|c| c.id != self.id);
            tracing::debug!(node = %self.id, parent = %parent.id, "detached");
        }
    }

    /// Nearest ancestor (excluding self) matching `predicate`
    pub fn find_ancestor<P>(&self, predicate: P) -> Option<Arc<SceneNode>>
    where
        P: Fn(&SceneNode) -> bool,
    {
        let mut current = self.parent();
        while let Some(node) = current {
            if predicate(&node) {
                return Some(node);
            }
            current = node.parent();
        }
        None
    }

    /// This node if it matches, otherwise the nearest matching ancestor
    pub fn find_in_scope<P>(&self, predicate: P) -> Option<Arc<SceneNode>>
    where
        P: Fn(&SceneNode) -> bool,
    {
        if predicate(self) {
            return self.this.upgrade();
        }
        self.find_ancestor(predicate)
    }

    /// Descendants (excluding self) matching `predicate`, depth-first
    ///
    /// Parents come before their children and siblings keep child order. The
    /// child list of each level is snapshotted before recursing.
    pub fn find_descendants<P>(&self, predicate: P) -> Vec<Arc<SceneNode>>
    where
        P: Fn(&SceneNode) -> bool,
    {
        let mut out = Vec::new();
        self.collect_descendants(&predicate, &mut out);
        out
    }

    fn collect_descendants<P>(&self, predicate: &P, out: &mut Vec<Arc<SceneNode>>)
    where
        P: Fn(&SceneNode) -> bool,
    {
        let level: Vec<Arc<SceneNode>> = self.children.read().clone();
        for child in level {
            if predicate(&child) {
                out.push(Arc::clone(&child));
            }
            child.collect_descendants(predicate, out);
        }
    }

    /// Path of nodes from the root down to this node
    #[must_use]
    pub fn ancestry(&self) -> Vec<Arc<SceneNode>> {
        let mut chain: Vec<Arc<SceneNode>> = Vec::new();
        if let Some(me) = self.this.upgrade() {
            chain.push(me);
        }
        let mut current = self.parent();
        while let Some(node) = current {
            current = node.parent();
            chain.push(node);
        }
        chain.reverse();
        chain
    }

    // ---- extensions --------------------------------------------------

    /// Attach a typed extension, replacing any previous one of the same type
    pub fn insert_extension<T>(&self, extension: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        self.extensions.write().insert(TypeId::of::<T>(), extension);
    }

    /// Get a typed extension
    #[must_use]
    pub fn extension<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let ext = self.extensions.read().get(&TypeId::of::<T>()).cloned()?;
        ext.downcast::<T>().ok()
    }

    /// Remove a typed extension, returning it
    pub fn remove_extension<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let ext = self.extensions.write().remove(&TypeId::of::<T>())?;
        ext.downcast::<T>().ok()
    }

    /// Check for a typed extension
    #[must_use]
    pub fn has_extension<T>(&self) -> bool
    where
        T: Any + Send + Sync,
    {
        self.extensions.read().contains_key(&TypeId::of::<T>())
    }
}

impl fmt::Debug for SceneNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.activation_state())
            .field("children", &self.children.read().len())
            .finish_non_exhaustive()
    }
}
