//! Admission policy: which hierarchies a client may receive at all.

use std::collections::HashSet;

use crate::core::types::ALL_LAYERS;
use crate::scene::{SceneGraph, SceneNode};

use super::hierarchy::StreamableHierarchy;

/// Decides whether a hierarchy is admissible and which nodes root one.
pub trait AdmissionPolicy: Send + Sync {
    fn admits(&self, hierarchy: &StreamableHierarchy, graph: &SceneGraph) -> bool;

    /// True if `node` should root its own hierarchy when activated.
    fn is_streaming_root(&self, node: &SceneNode) -> bool {
        node.hierarchy_root
    }
}

/// Admits every active hierarchy.
#[derive(Clone, Copy, Debug, Default)]
pub struct AdmitAll;

impl AdmissionPolicy for AdmitAll {
    fn admits(&self, hierarchy: &StreamableHierarchy, graph: &SceneGraph) -> bool {
        graph.is_active(hierarchy.root())
    }
}

/// Admits active hierarchies on allowed layers, optionally only tagged ones.
#[derive(Clone, Debug)]
pub struct LayerTagPolicy {
    pub layer_mask: u32,
    /// Empty means any tag (or none)
    pub tags: HashSet<String>,
}

impl Default for LayerTagPolicy {
    fn default() -> Self {
        Self {
            layer_mask: ALL_LAYERS,
            tags: HashSet::new(),
        }
    }
}

impl LayerTagPolicy {
    pub fn with_tags<I, S>(layer_mask: u32, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            layer_mask,
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }
}

impl AdmissionPolicy for LayerTagPolicy {
    fn admits(&self, hierarchy: &StreamableHierarchy, graph: &SceneGraph) -> bool {
        let Some(root) = graph.get(hierarchy.root()) else { return false };
        if !graph.is_active(root.id) || !root.layer.in_mask(self.layer_mask) {
            return false;
        }
        self.tags.is_empty() || root.tag.as_ref().is_some_and(|t| self.tags.contains(t))
    }

    /// Explicit roots, plus any node carrying a listed tag on an allowed layer.
    fn is_streaming_root(&self, node: &SceneNode) -> bool {
        if node.hierarchy_root {
            return true;
        }
        !self.tags.is_empty()
            && node.layer.in_mask(self.layer_mask)
            && node.tag.as_ref().is_some_and(|t| self.tags.contains(t))
    }
}
