//! Collaborators the streaming core calls but does not implement.
//!
//! The physics overlap query, the stable-id resolver and the per-client
//! transport are all synchronous. Implementations may fail or answer
//! "not found"; the core tolerates both.

use std::collections::{HashMap, HashSet};

use glam::Vec3;

use crate::core::types::{HierarchyId, LayerId, NodeId, ResourceId};
use crate::math::Aabb;
use crate::scene::SceneNode;

use super::movement::MovementUpdate;
use super::quality::QualityTier;

/// Spatial overlap query over candidate hierarchies.
///
/// `overlap` must be a pure function of its inputs and the last synced
/// state. The sync hooks let the engine push hierarchy bounds into a
/// built-in index; a physics-backed query can ignore them.
pub trait SpatialQuery: Send + Sync {
    /// Hierarchies whose admission proxy touches the sphere.
    fn overlap(&self, position: Vec3, radius: f32, layer_mask: u32) -> HashSet<HierarchyId>;

    /// Insert or update a candidate's proxy.
    fn sync_candidate(&mut self, _id: HierarchyId, _bounds: Aabb, _layer: LayerId, _enabled: bool) {}

    /// Drop a candidate.
    fn remove_candidate(&mut self, _id: HierarchyId) {}

    /// Called once per tick after syncing, before any `overlap`.
    fn prepare(&mut self) {}
}

/// Resolves (creating if needed) the stable id a node is known by remotely.
pub trait IdResolver: Send {
    /// `None` on failure.
    fn resolve_or_create(&mut self, node: &SceneNode) -> Option<ResourceId>;
}

/// Logical operations of one client's transport.
pub trait ClientTransport: Send {
    fn notify_entered(&mut self, id: ResourceId);

    fn notify_left(&mut self, id: ResourceId);

    fn notify_removed(&mut self, id: ResourceId);

    fn send_movement_batch(&mut self, updates: &[MovementUpdate]);

    fn send_enabled_states(&mut self, _states: &[(ResourceId, bool)]) {}

    /// Immediate mirror update after an ownership-relevant reparent.
    fn notify_reparented(&mut self, _child: ResourceId, _parent: Option<ResourceId>) {}

    /// True if the client currently renders `node`'s parent.
    fn is_rendering_parent(&self, node: NodeId) -> bool;

    /// True if the client holds a copy of the resource.
    fn has_resource(&self, id: ResourceId) -> bool;

    /// Achieved video bandwidth this tick, `None` while video streaming is off.
    fn video_bandwidth_kbps(&self) -> Option<f32> {
        None
    }

    /// Regenerate capture targets and reconfigure the encoder for `tier`.
    fn apply_quality_tier(&mut self, _tier: &QualityTier) {}
}

/// Resolver handing out sequential ids, never failing.
#[derive(Debug)]
pub struct SequentialIdResolver {
    next: u64,
    assigned: HashMap<NodeId, ResourceId>,
}

impl SequentialIdResolver {
    pub fn new() -> Self {
        Self {
            next: 1,
            assigned: HashMap::new(),
        }
    }
}

impl Default for SequentialIdResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl IdResolver for SequentialIdResolver {
    fn resolve_or_create(&mut self, node: &SceneNode) -> Option<ResourceId> {
        if let Some(id) = self.assigned.get(&node.id) {
            return Some(*id);
        }
        let id = ResourceId(self.next);
        self.next += 1;
        self.assigned.insert(node.id, id);
        Some(id)
    }
}
