//! Scene graph node types
//!
//! Node ids, transforms, renderable kinds, rigid-body state and the node itself.

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::types::{LayerId, NodeId};

/// Which coordinate frame a transform is expressed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Basis {
    /// Relative to the parent node
    Local,
    /// World space
    Global,
}

impl Basis {
    pub fn is_global(self) -> bool {
        matches!(self, Basis::Global)
    }
}

/// Position, rotation and scale in some basis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Identity transform (no translation, rotation, or scaling).
    pub fn identity() -> Self {
        Self::default()
    }

    /// Create a translation-only transform.
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Create a transform from position and rotation with unit scale.
    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            scale: Vec3::ONE,
        }
    }

    /// Convert to a 4x4 matrix.
    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Decompose a 4x4 affine matrix.
    pub fn from_mat4(m: &Mat4) -> Self {
        let (scale, rotation, position) = m.to_scale_rotation_translation();
        Self {
            position,
            rotation: rotation.normalize(),
            scale,
        }
    }

    /// `self` followed by `child`: the world transform of a child whose parent is `self`.
    pub fn compose(&self, child: &Transform) -> Transform {
        Transform::from_mat4(&(self.to_mat4() * child.to_mat4()))
    }

    /// Express world transform `world` relative to `self`.
    pub fn relative(&self, world: &Transform) -> Transform {
        Transform::from_mat4(&(self.to_mat4().inverse() * world.to_mat4()))
    }
}

/// What a node renders, resolved once when a hierarchy is built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderableKind {
    #[default]
    None,
    Mesh,
    SkinnedMesh,
    Light,
}

impl RenderableKind {
    pub fn is_renderable(self) -> bool {
        !matches!(self, RenderableKind::None)
    }
}

/// Physics body driving a node.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RigidBodyState {
    /// Linear velocity (units/second)
    pub velocity: Vec3,
    /// Angular velocity as axis * radians/second
    pub angular_velocity: Vec3,
    /// Kinematic bodies are moved by code; their reported velocity is not trusted.
    pub kinematic: bool,
}

/// A single node in the scene graph.
#[derive(Clone, Debug)]
pub struct SceneNode {
    pub id: NodeId,
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub local_transform: Transform,
    pub enabled: bool,
    pub kind: RenderableKind,
    pub layer: LayerId,
    pub tag: Option<String>,
    /// Root of its own streamable hierarchy
    pub hierarchy_root: bool,
    /// A hierarchy root that is folded into its parent's hierarchy instead
    pub stream_with_parent: bool,
    /// Streaming priority; higher is sent first, negative is optional
    pub priority: i32,
    /// Suppress repeated at-rest movement updates for this node
    pub smooth_velocity: bool,
    /// Half-size used for hierarchy bounds
    pub half_extent: Vec3,
    pub body: Option<RigidBodyState>,
}

impl SceneNode {
    /// Create a new scene node.
    pub fn new(id: NodeId, name: impl Into<String>, kind: RenderableKind) -> Self {
        Self {
            id,
            name: name.into(),
            parent: None,
            children: Vec::new(),
            local_transform: Transform::identity(),
            enabled: true,
            kind,
            layer: LayerId::DEFAULT,
            tag: None,
            hierarchy_root: false,
            stream_with_parent: false,
            priority: 0,
            smooth_velocity: true,
            half_extent: Vec3::splat(0.5),
            body: None,
        }
    }

    /// True if this node renders something or roots a hierarchy that does.
    pub fn is_renderable(&self) -> bool {
        self.kind.is_renderable()
    }

    /// Body velocities are trusted only for dynamic bodies.
    pub fn dynamic_body(&self) -> Option<&RigidBodyState> {
        self.body.as_ref().filter(|b| !b.kinematic)
    }
}
