//! Server-side scene graph that remote clients mirror

pub mod enabled;
pub mod graph;
pub mod node;

pub use enabled::{EnabledCallback, EnabledStateTracker};
pub use graph::SceneGraph;
pub use node::{Basis, RenderableKind, RigidBodyState, SceneNode, Transform};
