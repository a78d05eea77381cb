//! Streamable hierarchies: rooted subtrees streamed as one unit.
//!
//! Membership is built by a depth-first walk from the root that keeps every
//! renderable node plus the ancestors linking it to the root. The walk stops
//! at nested hierarchy roots unless they are marked to stream with their
//! parent. The registry keeps hierarchies a partition of the streamable nodes.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::core::{Error, Result, TickStamp};
use crate::core::types::{ClientId, HierarchyId, LayerId, NodeId, ResourceId};
use crate::math::Aabb;
use crate::scene::{Basis, EnabledStateTracker, RenderableKind, SceneGraph};

use super::external::ClientTransport;
use super::movement::{MovementCache, MovementUpdate, PoseSample};

/// A member node and the render kind resolved when the hierarchy was built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HierarchyMember {
    pub node: NodeId,
    pub kind: RenderableKind,
}

/// One streaming unit.
#[derive(Clone, Debug)]
pub struct StreamableHierarchy {
    root: NodeId,
    priority: i32,
    layer: LayerId,
    /// Root first, then depth-first; parents always precede their children.
    members: Vec<HierarchyMember>,
    member_set: HashSet<NodeId>,
    send_movement: bool,
    send_enabled_state: bool,
    owner: ClientId,
    bounds: Option<Aabb>,
}

impl StreamableHierarchy {
    /// Build the hierarchy rooted at `root`.
    pub fn build(root: NodeId, graph: &SceneGraph) -> Result<Self> {
        Self::build_excluding(root, graph, &|_| false)
    }

    /// Build, skipping nodes for which `claimed` returns true.
    pub(crate) fn build_excluding(
        root: NodeId,
        graph: &SceneGraph,
        claimed: &dyn Fn(NodeId) -> bool,
    ) -> Result<Self> {
        let root_node = graph.get(root).ok_or(Error::UnknownNode(root))?;
        let mut hierarchy = Self {
            root,
            priority: root_node.priority,
            layer: root_node.layer,
            members: Vec::new(),
            member_set: HashSet::new(),
            send_movement: true,
            send_enabled_state: true,
            owner: ClientId::NONE,
            bounds: None,
        };
        hierarchy.collect_members(graph, claimed);
        Ok(hierarchy)
    }

    fn collect_members(&mut self, graph: &SceneGraph, claimed: &dyn Fn(NodeId) -> bool) {
        self.members.clear();
        self.member_set.clear();
        self.bounds = None;

        let Some(root_node) = graph.get(self.root) else { return };
        self.layer = root_node.layer;
        self.push_member(self.root, root_node.kind);

        let mut path = Vec::new();
        self.walk(graph, self.root, &mut path, claimed);

        self.priority = self
            .members
            .iter()
            .filter_map(|m| graph.get(m.node))
            .map(|n| n.priority)
            .max()
            .unwrap_or(0);
    }

    fn walk(
        &mut self,
        graph: &SceneGraph,
        node: NodeId,
        path: &mut Vec<NodeId>,
        claimed: &dyn Fn(NodeId) -> bool,
    ) {
        for child in graph.children(node) {
            let Some(child_node) = graph.get(child) else { continue };
            if child_node.hierarchy_root && !child_node.stream_with_parent {
                continue;
            }
            if claimed(child) {
                log::debug!("{} already belongs to another hierarchy; not adding to {}", child, self.root);
                continue;
            }

            path.push(child);
            if child_node.kind.is_renderable() {
                for &on_path in path.iter() {
                    if !self.member_set.contains(&on_path) {
                        let kind = graph.get(on_path).map(|n| n.kind).unwrap_or_default();
                        self.push_member(on_path, kind);
                    }
                }
            }
            self.walk(graph, child, path, claimed);
            path.pop();
        }
    }

    fn push_member(&mut self, node: NodeId, kind: RenderableKind) {
        if self.member_set.insert(node) {
            self.members.push(HierarchyMember { node, kind });
        }
    }

    /// Rebuild membership, priority and bounds from the current graph.
    pub(crate) fn refresh(&mut self, graph: &SceneGraph, claimed: &dyn Fn(NodeId) -> bool) {
        self.collect_members(graph, claimed);
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Highest member priority. Negative means optional.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn is_optional(&self) -> bool {
        self.priority < 0
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    pub fn members(&self) -> &[HierarchyMember] {
        &self.members
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.member_set.contains(&node)
    }

    /// Member nodes that are lights.
    pub fn lights(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.members
            .iter()
            .filter(|m| m.kind == RenderableKind::Light)
            .map(|m| m.node)
    }

    pub fn owner(&self) -> ClientId {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: ClientId) {
        self.owner = owner;
    }

    pub fn sends_movement(&self) -> bool {
        self.send_movement
    }

    pub fn set_send_movement(&mut self, enabled: bool) {
        self.send_movement = enabled;
    }

    pub fn sends_enabled_state(&self) -> bool {
        self.send_enabled_state
    }

    pub fn set_send_enabled_state(&mut self, enabled: bool) {
        self.send_enabled_state = enabled;
    }

    /// World-space bounds of all members, computed on first use.
    pub fn bounds(&mut self, graph: &SceneGraph) -> Aabb {
        if let Some(bounds) = self.bounds {
            return bounds;
        }
        let bounds = self.compute_bounds(graph);
        self.bounds = Some(bounds);
        bounds
    }

    pub fn cached_bounds(&self) -> Option<Aabb> {
        self.bounds
    }

    pub fn invalidate_bounds(&mut self) {
        self.bounds = None;
    }

    fn compute_bounds(&self, graph: &SceneGraph) -> Aabb {
        let mut bounds: Option<Aabb> = None;
        for member in &self.members {
            let (Some(node), Some(world)) = (graph.get(member.node), graph.world_transform(member.node)) else {
                continue;
            };
            let node_box = Aabb::from_center_half_extent(world.position, node.half_extent * world.scale.abs());
            bounds = Some(match bounds {
                Some(b) => b.merged(&node_box),
                None => node_box,
            });
        }
        bounds.unwrap_or_default()
    }

    /// Movement updates of every member `client` knows, in member order.
    ///
    /// Empty when movement sending is off or when `client` owns the hierarchy.
    /// Members whose parent the client renders are sent in their local basis;
    /// everything else falls back to world space.
    pub fn movement_updates(
        &self,
        client: ClientId,
        stamp: TickStamp,
        graph: &SceneGraph,
        resources: &HashMap<NodeId, ResourceId>,
        transport: &dyn ClientTransport,
        cache: &mut MovementCache,
    ) -> Vec<MovementUpdate> {
        if !self.send_movement || (client.is_some() && self.owner == client) {
            return Vec::new();
        }

        let mut updates = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let Some(&id) = resources.get(&member.node) else { continue };
            let Some(node) = graph.get(member.node) else { continue };

            let basis = match node.parent {
                Some(_) if transport.is_rendering_parent(member.node) => Basis::Local,
                _ => Basis::Global,
            };
            let transform = match basis {
                Basis::Local => node.local_transform,
                Basis::Global => match graph.world_transform(member.node) {
                    Some(t) => t,
                    None => continue,
                },
            };

            let sample = PoseSample {
                node: member.node,
                id,
                stamp,
                basis,
                transform,
                body: node.dynamic_body().copied(),
                smoothing: node.smooth_velocity,
            };
            if let Some(update) = cache.sample(&sample) {
                updates.push(update);
            }
        }
        updates
    }

    /// Members whose enabled state changed strictly after `since`.
    pub fn enabled_state_updates_since(&self, since: f64, tracker: &EnabledStateTracker) -> Vec<(NodeId, bool)> {
        self.members
            .iter()
            .filter_map(|m| tracker.changed_since(m.node, since).map(|enabled| (m.node, enabled)))
            .collect()
    }
}

/// All hierarchies, keyed by root, plus which sessions stream each one.
#[derive(Debug, Default)]
pub struct HierarchyRegistry {
    hierarchies: HashMap<HierarchyId, StreamableHierarchy>,
    /// node -> hierarchy it belongs to
    claims: HashMap<NodeId, HierarchyId>,
    subscribers: HashMap<HierarchyId, BTreeSet<ClientId>>,
}

impl HierarchyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the hierarchy rooted at `root`. Creating an existing one refreshes it.
    pub fn create(&mut self, root: NodeId, graph: &SceneGraph) -> Result<&StreamableHierarchy> {
        if let Some(&other) = self.claims.get(&root) {
            if other != root {
                return Err(Error::AlreadyClaimed { node: root, hierarchy: other });
            }
        }
        if self.hierarchies.contains_key(&root) {
            self.refresh(root, graph)?;
        } else {
            let claims = &self.claims;
            let hierarchy = StreamableHierarchy::build_excluding(root, graph, &|n| {
                claims.get(&n).is_some_and(|h| *h != root)
            })?;
            self.claim(&hierarchy);
            log::debug!(
                "Created hierarchy {} with {} members, priority {}",
                root,
                hierarchy.members.len(),
                hierarchy.priority
            );
            self.hierarchies.insert(root, hierarchy);
        }
        self.hierarchies.get(&root).ok_or(Error::UnknownHierarchy(root))
    }

    fn claim(&mut self, hierarchy: &StreamableHierarchy) {
        for member in &hierarchy.members {
            self.claims.insert(member.node, hierarchy.root);
        }
    }

    fn release_claims(&mut self, root: HierarchyId) {
        self.claims.retain(|_, h| *h != root);
    }

    /// Rebuild a hierarchy's membership, priority and bounds.
    pub fn refresh(&mut self, root: HierarchyId, graph: &SceneGraph) -> Result<()> {
        if !self.hierarchies.contains_key(&root) {
            return Err(Error::UnknownHierarchy(root));
        }
        self.release_claims(root);

        let claims = &self.claims;
        let hierarchy = self.hierarchies.get_mut(&root).ok_or(Error::UnknownHierarchy(root))?;
        hierarchy.refresh(graph, &|n| claims.get(&n).is_some_and(|h| *h != root));

        let snapshot: Vec<NodeId> = hierarchy.members.iter().map(|m| m.node).collect();
        for node in snapshot {
            self.claims.insert(node, root);
        }
        Ok(())
    }

    /// Remove a hierarchy, returning it with the sessions that streamed it.
    pub fn remove(&mut self, root: HierarchyId) -> Option<(StreamableHierarchy, BTreeSet<ClientId>)> {
        let hierarchy = self.hierarchies.remove(&root)?;
        self.release_claims(root);
        let subscribers = self.subscribers.remove(&root).unwrap_or_default();
        Some((hierarchy, subscribers))
    }

    pub fn get(&self, root: HierarchyId) -> Option<&StreamableHierarchy> {
        self.hierarchies.get(&root)
    }

    pub(crate) fn get_mut(&mut self, root: HierarchyId) -> Option<&mut StreamableHierarchy> {
        self.hierarchies.get_mut(&root)
    }

    pub fn contains(&self, root: HierarchyId) -> bool {
        self.hierarchies.contains_key(&root)
    }

    /// Hierarchy a node belongs to.
    pub fn hierarchy_of(&self, node: NodeId) -> Option<HierarchyId> {
        self.claims.get(&node).copied()
    }

    /// Owner of the hierarchy containing `node`, `ClientId::NONE` if none.
    pub fn owner_of_node(&self, node: NodeId) -> ClientId {
        self.hierarchy_of(node)
            .and_then(|h| self.hierarchies.get(&h))
            .map(|h| h.owner)
            .unwrap_or(ClientId::NONE)
    }

    pub(crate) fn set_owner(&mut self, root: HierarchyId, owner: ClientId) -> Result<()> {
        let hierarchy = self.hierarchies.get_mut(&root).ok_or(Error::UnknownHierarchy(root))?;
        hierarchy.set_owner(owner);
        Ok(())
    }

    /// Roots of hierarchies owned by `client`.
    pub fn owned_by(&self, client: ClientId) -> Vec<HierarchyId> {
        let mut roots: Vec<_> = self
            .hierarchies
            .values()
            .filter(|h| client.is_some() && h.owner == client)
            .map(|h| h.root)
            .collect();
        roots.sort_unstable();
        roots
    }

    pub(crate) fn subscribe(&mut self, root: HierarchyId, client: ClientId) {
        self.subscribers.entry(root).or_default().insert(client);
    }

    pub(crate) fn unsubscribe(&mut self, root: HierarchyId, client: ClientId) {
        if let Some(set) = self.subscribers.get_mut(&root) {
            set.remove(&client);
            if set.is_empty() {
                self.subscribers.remove(&root);
            }
        }
    }

    /// Sessions currently streaming `root`, in client id order.
    pub fn subscribers(&self, root: HierarchyId) -> Vec<ClientId> {
        self.subscribers
            .get(&root)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamableHierarchy> {
        self.hierarchies.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut StreamableHierarchy> {
        self.hierarchies.values_mut()
    }

    /// Root ids in ascending order.
    pub fn roots(&self) -> Vec<HierarchyId> {
        let mut roots: Vec<_> = self.hierarchies.keys().copied().collect();
        roots.sort_unstable();
        roots
    }

    pub fn len(&self) -> usize {
        self.hierarchies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hierarchies.is_empty()
    }
}
