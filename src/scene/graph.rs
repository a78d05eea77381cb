//! Scene graph: CPU-side hierarchy of nodes
//!
//! Nodes are parented by id. A node without a parent hangs off the world root.
//! World transforms are composed on demand by walking the parent chain.

use std::collections::HashMap;

use glam::{Quat, Vec3};

use crate::core::{Error, Result};
use crate::core::types::NodeId;

use super::node::{RenderableKind, SceneNode, Transform};

/// CPU-side scene graph mirrored (in part) to remote clients.
pub struct SceneGraph {
    nodes: HashMap<NodeId, SceneNode>,
    next_id: u64,
}

impl SceneGraph {
    /// Create an empty scene graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            next_id: 1,
        }
    }

    /// Allocate a fresh node ID. Id 0 is never handed out.
    fn alloc_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Add a node under `parent` (or at world root). Returns the new node's ID.
    pub fn add_node(
        &mut self,
        parent: Option<NodeId>,
        name: impl Into<String>,
        kind: RenderableKind,
    ) -> Result<NodeId> {
        if let Some(p) = parent {
            if !self.nodes.contains_key(&p) {
                return Err(Error::UnknownNode(p));
            }
        }

        let id = self.alloc_id();
        let mut node = SceneNode::new(id, name, kind);
        node.parent = parent;
        self.nodes.insert(id, node);

        if let Some(parent_node) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent_node.children.push(id);
        }

        Ok(id)
    }

    /// Remove a node and its entire subtree. Returns every removed id, root first.
    pub fn remove(&mut self, id: NodeId) -> Vec<NodeId> {
        if !self.nodes.contains_key(&id) {
            return Vec::new();
        }

        // Collect subtree IDs (BFS)
        let mut to_remove = vec![id];
        let mut i = 0;
        while i < to_remove.len() {
            let current = to_remove[i];
            if let Some(node) = self.nodes.get(&current) {
                to_remove.extend_from_slice(&node.children);
            }
            i += 1;
        }

        self.unlink_from_parent(id);

        for nid in &to_remove {
            self.nodes.remove(nid);
        }

        to_remove
    }

    fn unlink_from_parent(&mut self, id: NodeId) {
        let parent = self.nodes.get(&id).and_then(|n| n.parent);
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != id);
        }
    }

    /// Detach a node to world root, keeping its world pose.
    pub fn detach(&mut self, id: NodeId) -> Result<()> {
        let world = self.world_transform(id).ok_or(Error::UnknownNode(id))?;
        self.unlink_from_parent(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = None;
            node.local_transform = world;
        }
        Ok(())
    }

    /// Attach a node under `parent` (or world root) without touching its local transform.
    pub fn attach(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<()> {
        if !self.nodes.contains_key(&id) {
            return Err(Error::UnknownNode(id));
        }
        if let Some(p) = parent {
            if !self.nodes.contains_key(&p) {
                return Err(Error::UnknownNode(p));
            }
            if p == id || self.is_descendant_of(p, id) {
                return Err(Error::ReparentCycle { child: id, parent: p });
            }
        }

        self.unlink_from_parent(id);
        if let Some(parent_node) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent_node.children.push(id);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = parent;
        }
        Ok(())
    }

    /// Set the local transform of a node.
    pub fn set_local_transform(&mut self, id: NodeId, transform: Transform) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or(Error::UnknownNode(id))?;
        node.local_transform = transform;
        Ok(())
    }

    /// Set local position and rotation, keeping scale.
    pub fn set_local_pose(&mut self, id: NodeId, position: Vec3, rotation: Quat) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or(Error::UnknownNode(id))?;
        node.local_transform.position = position;
        node.local_transform.rotation = rotation;
        Ok(())
    }

    /// Local transform of a node.
    pub fn local_transform(&self, id: NodeId) -> Option<Transform> {
        self.nodes.get(&id).map(|n| n.local_transform)
    }

    /// World transform of a node, composed up the parent chain.
    pub fn world_transform(&self, id: NodeId) -> Option<Transform> {
        let node = self.nodes.get(&id)?;
        let mut world = node.local_transform.to_mat4();
        let mut parent = node.parent;
        while let Some(pid) = parent {
            let Some(p) = self.nodes.get(&pid) else { break };
            world = p.local_transform.to_mat4() * world;
            parent = p.parent;
        }
        Some(Transform::from_mat4(&world))
    }

    /// Set the enabled flag. Returns true if the flag actually changed.
    pub(crate) fn set_enabled(&mut self, id: NodeId, enabled: bool) -> Result<bool> {
        let node = self.nodes.get_mut(&id).ok_or(Error::UnknownNode(id))?;
        let changed = node.enabled != enabled;
        node.enabled = enabled;
        Ok(changed)
    }

    /// Enabled itself and every ancestor enabled.
    pub fn is_active(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(cid) = current {
            match self.nodes.get(&cid) {
                Some(n) if n.enabled => current = n.parent,
                _ => return false,
            }
        }
        true
    }

    /// Get an immutable reference to a node.
    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    /// Get a mutable reference to a node.
    ///
    /// Structural fields (`parent`, `children`, `enabled`) must be changed
    /// through the graph and engine methods, not through this reference.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    /// Iterate over the children of a node.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
            .iter()
            .copied()
    }

    /// True if `id` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut current = self.parent(id);
        while let Some(pid) = current {
            if pid == ancestor {
                return true;
            }
            current = self.parent(pid);
        }
        false
    }

    /// Total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}
