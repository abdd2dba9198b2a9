//! Scene Core - reactive node graph primitives
//!
//! The building blocks every dashboard scene is made of:
//! - [`StateContainer`]: immutable snapshots with synchronous change notification
//! - [`ActivationLifecycle`]: mount/unmount with ordered cleanup
//! - [`SceneNode`]: the two combined into a parent/child tree
//! - [`DependencyTracker`]: explicit "react when these keys of that node change"
//! - [`TimeRangeScope`]: time ranges as node state, found by ancestor lookup
//!
//! # Example
//!
//! ```rust
//! use scene_core::{SceneNode, StatePatch};
//!
//! let dashboard = SceneNode::new("dashboard");
//! let panel = SceneNode::new("panel");
//! panel.attach(&dashboard).unwrap();
//!
//! let sub = dashboard.subscribe(|change| {
//!     println!("version {}", change.current.version());
//! });
//! dashboard.set_state(StatePatch::new().set("title", "Overview"));
//! sub.unsubscribe();
//! ```
//!
//! All notification is synchronous and run-to-completion. The graph is meant
//! to be driven from a single thread (or a current-thread runtime); the locks
//! inside only make the types `Send + Sync` for use across `.await` points.

// Core modules
pub mod dependency;
pub mod error;
pub mod lifecycle;
pub mod node;
pub mod state;
pub mod time_range;
pub mod types;

// Re-exports
pub use dependency::{should_react, Dependency, DependencyBinding, DependencyTracker, Equality};
pub use error::{HandlerError, SceneError};
pub use lifecycle::{ActivationLifecycle, ActivationState, Cleanup, HandlerResult};
pub use node::SceneNode;
pub use state::{StateChange, StateContainer, StatePatch, StateSnapshot, StateValue, Subscription};
pub use time_range::{parse_time_expression, RawTimeRange, TimeRange, TimeRangeError, TimeRangeScope};
pub use types::{NodeId, SubscriberId};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with scene nodes
    pub use crate::{
        ActivationState, Cleanup, DependencyTracker, NodeId, RawTimeRange, SceneError, SceneNode,
        StateChange, StatePatch, StateSnapshot, TimeRangeScope,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
