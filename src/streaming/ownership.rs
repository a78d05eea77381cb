//! Ownership transfer through reparenting.
//!
//! A hierarchy parented under a node owned by a client (a hand controller,
//! an avatar) becomes owned by that client. Only the old and new owners are
//! told synchronously; every other session picks the new pose up from its
//! next movement batch.

use std::collections::BTreeMap;

use glam::{Quat, Vec3};

use crate::core::{Error, Result};
use crate::core::types::{ClientId, HierarchyId, NodeId};
use crate::scene::SceneGraph;

use super::hierarchy::HierarchyRegistry;
use super::session::ClientSession;

/// What a reparent changed and who was told.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReparentOutcome {
    pub old_owner: ClientId,
    pub new_owner: ClientId,
    /// Sessions whose reparent hook ran, in notification order
    pub notified: Vec<ClientId>,
}

/// Mutable state the protocol touches.
pub struct OwnershipContext<'a> {
    pub graph: &'a mut SceneGraph,
    pub registry: &'a mut HierarchyRegistry,
    pub sessions: &'a mut BTreeMap<ClientId, ClientSession>,
}

/// Move `child` under `new_parent` (world root if `None`) at the given local pose.
///
/// Fails without touching anything if the child is owned by, or held under a
/// node of, one client and `new_parent` belongs to a different client.
pub fn reparent(
    ctx: &mut OwnershipContext<'_>,
    child: HierarchyId,
    new_parent: Option<NodeId>,
    position: Vec3,
    rotation: Quat,
) -> Result<ReparentOutcome> {
    if !ctx.registry.contains(child) {
        return Err(Error::UnknownHierarchy(child));
    }
    if let Some(parent) = new_parent {
        if !ctx.graph.contains(parent) {
            return Err(Error::UnknownNode(parent));
        }
        if parent == child || ctx.graph.is_descendant_of(parent, child) {
            return Err(Error::ReparentCycle { child, parent });
        }
    }

    let old_parent = ctx.graph.parent(child);
    let old_owner = old_parent
        .map(|p| ctx.registry.owner_of_node(p))
        .unwrap_or(ClientId::NONE);
    let new_owner = new_parent
        .map(|p| ctx.registry.owner_of_node(p))
        .unwrap_or(ClientId::NONE);

    let holder = ctx
        .registry
        .get(child)
        .map(|h| h.owner())
        .filter(|owner| owner.is_some())
        .unwrap_or(old_owner);

    if holder.is_some() && new_owner.is_some() && holder != new_owner {
        log::warn!("Rejecting reparent of {}: held by {}, requested by {}", child, holder, new_owner);
        return Err(Error::OwnershipConflict {
            child,
            holder,
            requester: new_owner,
        });
    }

    ctx.graph.detach(child)?;
    ctx.graph.attach(child, new_parent)?;
    ctx.graph.set_local_pose(child, position, rotation)?;

    if new_owner.is_some() {
        ctx.registry.set_owner(child, new_owner)?;
    }
    if let Some(hierarchy) = ctx.registry.get_mut(child) {
        hierarchy.invalidate_bounds();
    }

    let mut notified = Vec::new();
    for owner in [old_owner, new_owner] {
        if owner.is_none() || notified.contains(&owner) {
            continue;
        }
        if let Some(session) = ctx.sessions.get_mut(&owner) {
            session.on_reparented(child, new_parent, ctx.registry);
            notified.push(owner);
        }
    }

    log::debug!(
        "Reparented {} under {:?} (owner {} -> {})",
        child,
        new_parent,
        old_owner,
        ctx.registry.get(child).map(|h| h.owner()).unwrap_or(ClientId::NONE)
    );
    Ok(ReparentOutcome { old_owner, new_owner, notified })
}

/// Make `client` the owner of `root`, e.g. when a client's avatar is linked.
///
/// Refused if another client already owns it.
pub fn assign_owner(registry: &mut HierarchyRegistry, root: HierarchyId, client: ClientId) -> Result<()> {
    if client.is_none() {
        return Err(Error::InvalidClient);
    }
    let current = registry.get(root).ok_or(Error::UnknownHierarchy(root))?.owner();
    if current.is_some() && current != client {
        log::warn!("Rejecting ownership of {} by {}: held by {}", root, client, current);
        return Err(Error::OwnershipConflict {
            child: root,
            holder: current,
            requester: client,
        });
    }
    registry.set_owner(root, client)
}

/// Clear the owner of `root`. Returns the previous owner.
pub fn release_ownership(registry: &mut HierarchyRegistry, root: HierarchyId) -> Result<ClientId> {
    let previous = registry.get(root).ok_or(Error::UnknownHierarchy(root))?.owner();
    registry.set_owner(root, ClientId::NONE)?;
    Ok(previous)
}

/// Release everything `client` owns. Returns the released roots.
pub fn release_all(registry: &mut HierarchyRegistry, client: ClientId) -> Vec<HierarchyId> {
    let owned = registry.owned_by(client);
    for &root in &owned {
        if let Err(e) = registry.set_owner(root, ClientId::NONE) {
            log::warn!("Failed to release {}: {}", root, e);
        }
    }
    owned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::RenderableKind;
    use crate::streaming::config::StreamingConfig;
    use crate::streaming::external::ClientTransport;
    use crate::streaming::movement::MovementUpdate;
    use crate::core::types::ResourceId;

    struct Silent;

    impl ClientTransport for Silent {
        fn notify_entered(&mut self, _id: ResourceId) {}
        fn notify_left(&mut self, _id: ResourceId) {}
        fn notify_removed(&mut self, _id: ResourceId) {}
        fn send_movement_batch(&mut self, _updates: &[MovementUpdate]) {}
        fn is_rendering_parent(&self, _node: NodeId) -> bool {
            false
        }
        fn has_resource(&self, _id: ResourceId) -> bool {
            false
        }
    }

    struct World {
        graph: SceneGraph,
        registry: HierarchyRegistry,
        sessions: BTreeMap<ClientId, ClientSession>,
        cup: NodeId,
        hand_a: NodeId,
        hand_b: NodeId,
    }

    fn world() -> World {
        let mut graph = SceneGraph::new();
        let avatar_a = graph.add_node(None, "avatar_a", RenderableKind::SkinnedMesh).unwrap();
        let hand_a = graph.add_node(Some(avatar_a), "hand_a", RenderableKind::Mesh).unwrap();
        let avatar_b = graph.add_node(None, "avatar_b", RenderableKind::SkinnedMesh).unwrap();
        let hand_b = graph.add_node(Some(avatar_b), "hand_b", RenderableKind::Mesh).unwrap();
        let cup = graph.add_node(None, "cup", RenderableKind::Mesh).unwrap();
        for n in [avatar_a, avatar_b, cup] {
            graph.get_mut(n).unwrap().hierarchy_root = true;
        }

        let mut registry = HierarchyRegistry::new();
        for n in [avatar_a, avatar_b, cup] {
            registry.create(n, &graph).unwrap();
        }
        assign_owner(&mut registry, avatar_a, ClientId(1)).unwrap();
        assign_owner(&mut registry, avatar_b, ClientId(2)).unwrap();

        let config = StreamingConfig::default();
        let mut sessions = BTreeMap::new();
        for c in [1, 2] {
            sessions.insert(ClientId(c), ClientSession::new(ClientId(c), Box::new(Silent), &config));
        }
        World { graph, registry, sessions, cup, hand_a, hand_b }
    }

    fn ctx(w: &mut World) -> OwnershipContext<'_> {
        OwnershipContext {
            graph: &mut w.graph,
            registry: &mut w.registry,
            sessions: &mut w.sessions,
        }
    }

    #[test]
    fn test_grab_transfers_ownership() {
        let mut w = world();
        let (cup, hand_a) = (w.cup, w.hand_a);
        let outcome = reparent(&mut ctx(&mut w), cup, Some(hand_a), Vec3::ZERO, Quat::IDENTITY).unwrap();

        assert_eq!(outcome.old_owner, ClientId::NONE);
        assert_eq!(outcome.new_owner, ClientId(1));
        assert_eq!(w.registry.get(cup).unwrap().owner(), ClientId(1));
        assert_eq!(w.graph.parent(cup), Some(hand_a));
    }

    #[test]
    fn test_pose_is_relative_to_new_parent() {
        let mut w = world();
        let (cup, hand_a) = (w.cup, w.hand_a);
        w.graph
            .set_local_transform(hand_a, crate::scene::Transform::from_position(Vec3::new(0.0, 2.0, 0.0)))
            .unwrap();
        reparent(&mut ctx(&mut w), cup, Some(hand_a), Vec3::new(0.5, 0.0, 0.0), Quat::IDENTITY).unwrap();

        let world_pos = w.graph.world_transform(cup).unwrap().position;
        assert!((world_pos - Vec3::new(0.5, 2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_release_to_world_keeps_owner() {
        let mut w = world();
        let (cup, hand_a) = (w.cup, w.hand_a);
        reparent(&mut ctx(&mut w), cup, Some(hand_a), Vec3::ZERO, Quat::IDENTITY).unwrap();
        let outcome = reparent(&mut ctx(&mut w), cup, None, Vec3::ONE, Quat::IDENTITY).unwrap();

        assert_eq!(outcome.old_owner, ClientId(1));
        assert_eq!(outcome.new_owner, ClientId::NONE);
        assert_eq!(w.registry.get(cup).unwrap().owner(), ClientId(1));
        assert_eq!(w.graph.parent(cup), None);

        assert_eq!(release_ownership(&mut w.registry, cup).unwrap(), ClientId(1));
        assert_eq!(w.registry.get(cup).unwrap().owner(), ClientId::NONE);
    }

    #[test]
    fn test_concurrent_grab_rejected() {
        let mut w = world();
        let (cup, hand_a, hand_b) = (w.cup, w.hand_a, w.hand_b);
        reparent(&mut ctx(&mut w), cup, Some(hand_a), Vec3::ZERO, Quat::IDENTITY).unwrap();

        let err = reparent(&mut ctx(&mut w), cup, Some(hand_b), Vec3::ZERO, Quat::IDENTITY).unwrap_err();
        assert!(matches!(
            err,
            Error::OwnershipConflict { holder: ClientId(1), requester: ClientId(2), .. }
        ));
        assert_eq!(w.graph.parent(cup), Some(hand_a));
        assert_eq!(w.registry.get(cup).unwrap().owner(), ClientId(1));
    }

    #[test]
    fn test_grab_of_assigned_child_rejected() {
        let mut w = world();
        let (cup, hand_b) = (w.cup, w.hand_b);
        assign_owner(&mut w.registry, cup, ClientId(1)).unwrap();

        let err = reparent(&mut ctx(&mut w), cup, Some(hand_b), Vec3::ZERO, Quat::IDENTITY).unwrap_err();
        assert!(matches!(
            err,
            Error::OwnershipConflict { holder: ClientId(1), requester: ClientId(2), .. }
        ));
        assert_eq!(w.graph.parent(cup), None);
        assert_eq!(w.registry.get(cup).unwrap().owner(), ClientId(1));
    }

    #[test]
    fn test_dropped_child_needs_release_before_handoff() {
        let mut w = world();
        let (cup, hand_a, hand_b) = (w.cup, w.hand_a, w.hand_b);
        reparent(&mut ctx(&mut w), cup, Some(hand_a), Vec3::ZERO, Quat::IDENTITY).unwrap();
        reparent(&mut ctx(&mut w), cup, None, Vec3::ZERO, Quat::IDENTITY).unwrap();

        assert!(reparent(&mut ctx(&mut w), cup, Some(hand_b), Vec3::ZERO, Quat::IDENTITY).is_err());
        release_ownership(&mut w.registry, cup).unwrap();
        let outcome = reparent(&mut ctx(&mut w), cup, Some(hand_b), Vec3::ZERO, Quat::IDENTITY).unwrap();
        assert_eq!(outcome.new_owner, ClientId(2));
        assert_eq!(w.registry.get(cup).unwrap().owner(), ClientId(2));
    }

    #[test]
    fn test_owner_may_regrab_own_child() {
        let mut w = world();
        let (cup, hand_a) = (w.cup, w.hand_a);
        assign_owner(&mut w.registry, cup, ClientId(1)).unwrap();
        assert!(reparent(&mut ctx(&mut w), cup, Some(hand_a), Vec3::ZERO, Quat::IDENTITY).is_ok());
        assert_eq!(w.registry.get(cup).unwrap().owner(), ClientId(1));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut w = world();
        let (cup, hand_a) = (w.cup, w.hand_a);
        let avatar_a = w.graph.parent(hand_a).unwrap();
        reparent(&mut ctx(&mut w), cup, Some(hand_a), Vec3::ZERO, Quat::IDENTITY).unwrap();

        let err = reparent(&mut ctx(&mut w), avatar_a, Some(cup), Vec3::ZERO, Quat::IDENTITY).unwrap_err();
        assert!(matches!(err, Error::ReparentCycle { .. }));
    }

    #[test]
    fn test_assign_owner_conflict() {
        let mut w = world();
        let cup = w.cup;
        assign_owner(&mut w.registry, cup, ClientId(2)).unwrap();
        assert!(assign_owner(&mut w.registry, cup, ClientId(2)).is_ok());
        assert!(matches!(
            assign_owner(&mut w.registry, cup, ClientId(1)),
            Err(Error::OwnershipConflict { .. })
        ));
        assert!(matches!(assign_owner(&mut w.registry, cup, ClientId::NONE), Err(Error::InvalidClient)));
    }

    #[test]
    fn test_release_all() {
        let mut w = world();
        let (cup, hand_b) = (w.cup, w.hand_b);
        reparent(&mut ctx(&mut w), cup, Some(hand_b), Vec3::ZERO, Quat::IDENTITY).unwrap();

        let released = release_all(&mut w.registry, ClientId(2));
        assert_eq!(released.len(), 2);
        assert!(w.registry.owned_by(ClientId(2)).is_empty());
    }
}
