//! Activation lifecycle
//!
//! Gives a node a deterministic point to acquire subscriptions (activation)
//! and release them (deactivation). Handlers run in registration order;
//! their cleanups run in reverse order, exactly once.

use crate::error::{HandlerError, SceneError};
use crate::types::NodeId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Release callback returned by an activation handler
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// Outcome of one activation handler
pub type HandlerResult = Result<Option<Cleanup>, HandlerError>;

type Handler<N> = Arc<dyn Fn(&N) -> HandlerResult + Send + Sync>;

/// Public activation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ActivationState {
    /// No subscriptions held
    #[default]
    Inactive,
    /// Handlers have run and cleanups are held
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Inactive,
    Activating,
    Active,
    Deactivating,
}

struct LifecycleInner {
    phase: Phase,
    cleanups: Vec<Cleanup>,
}

/// Mount/unmount semantics for a target of type `N`
pub struct ActivationLifecycle<N: ?Sized> {
    handlers: Mutex<Vec<Handler<N>>>,
    inner: Mutex<LifecycleInner>,
}

impl<N: ?Sized> ActivationLifecycle<N> {
    /// Create lifecycle in the inactive state
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            inner: Mutex::new(LifecycleInner {
                phase: Phase::Inactive,
                cleanups: Vec::new(),
            }),
        }
    }

    /// Register a handler for the next activation
    ///
    /// Handlers added while active take effect on the following activation.
    pub fn add_activation_handler<F>(&self, handler: F)
    where
        F: Fn(&N) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.lock().push(Arc::new(handler));
    }

    /// Number of registered handlers
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ActivationState {
        match self.inner.lock().phase {
            Phase::Active | Phase::Deactivating => ActivationState::Active,
            Phase::Inactive | Phase::Activating => ActivationState::Inactive,
        }
    }

    /// Check if active
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == ActivationState::Active
    }

    /// Run all handlers against `target`
    ///
    /// # Errors
    /// - `SceneError::AlreadyActive` if active or mid-transition
    /// - `SceneError::ActivationFailed` if any handler failed; cleanups of the
    ///   handlers that succeeded have already run and the state is inactive
    pub fn activate(&self, id: NodeId, target: &N) -> Result<(), SceneError> {
        {
            let mut inner = self.inner.lock();
            if inner.phase != Phase::Inactive {
                return Err(SceneError::AlreadyActive(id));
            }
            inner.phase = Phase::Activating;
        }

        let handlers: Vec<Handler<N>> = self.handlers.lock().clone();
        let mut cleanups = Vec::with_capacity(handlers.len());
        let mut failures = Vec::new();

        for (index, handler) in handlers.iter().enumerate() {
            match handler(target) {
                Ok(Some(cleanup)) => cleanups.push(cleanup),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(node = %id, handler = index, error = %e, "activation handler failed");
                    failures.push(format!("handler {index}: {e}"));
                }
            }
        }

        if !failures.is_empty() {
            for cleanup in cleanups.into_iter().rev() {
                cleanup();
            }
            self.inner.lock().phase = Phase::Inactive;
            return Err(SceneError::ActivationFailed { node: id, failures });
        }

        let mut inner = self.inner.lock();
        inner.cleanups = cleanups;
        inner.phase = Phase::Active;
        tracing::debug!(node = %id, handlers = handlers.len(), "activated");
        Ok(())
    }

    /// Run collected cleanups in reverse order
    ///
    /// Returns `false` (and does nothing) if not active.
    pub fn deactivate(&self, id: NodeId) -> bool {
        let cleanups = {
            let mut inner = self.inner.lock();
            if inner.phase != Phase::Active {
                return false;
            }
            inner.phase = Phase::Deactivating;
            std::mem::take(&mut inner.cleanups)
        };

        let count = cleanups.len();
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }

        self.inner.lock().phase = Phase::Inactive;
        tracing::debug!(node = %id, cleanups = count, "deactivated");
        true
    }
}

impl<N: ?Sized> Default for ActivationLifecycle<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: ?Sized> fmt::Debug for ActivationLifecycle<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationLifecycle")
            .field("state", &self.state())
            .field("handlers", &self.handler_count())
            .finish()
    }
}
