//! Per-client streamed-set state machine.
//!
//! A hierarchy is either streamed to the client or not. While streamed it
//! carries a [`StreamReason`] mask; it leaves the set only when the last
//! reason is cleared. Members whose id cannot be resolved go into a failed
//! set that is never retried for the lifetime of the session.

use std::collections::{HashMap, HashSet};

use glam::Vec3;

use crate::core::{Cadence, TickStamp};
use crate::core::types::{ClientId, HierarchyId, NodeId, ResourceId};
use crate::scene::{EnabledStateTracker, RenderableKind, SceneGraph};

use super::config::StreamingConfig;
use super::external::{ClientTransport, IdResolver};
use super::hierarchy::HierarchyRegistry;
use super::movement::MovementCache;
use super::policy::AdmissionPolicy;
use super::priority::{AdmissionQueue, HierarchyPriority};
use super::quality::{QualityController, QualityTier};
use super::reason::StreamReason;
use super::spatial::SpatialDelta;

/// Result of [`ClientSession::start_streaming`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// Newly streamed. `failed` members were excluded and will not be retried.
    Started { resolved: usize, failed: usize },
    /// Already streamed; the reason was merged, nothing was sent.
    AlreadyStreamed,
    /// The root failed to resolve now or earlier.
    PermanentlyFailed,
    UnknownHierarchy,
    /// An empty reason mask cannot keep anything streamed.
    EmptyReason,
}

/// Result of [`ClientSession::stop_streaming`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Removed,
    /// Other reasons remain set.
    Retained(StreamReason),
    NotStreamed,
}

/// What a session did with one spatial delta.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeltaReport {
    pub started: usize,
    pub stopped: usize,
    /// Admissible candidates left for a later tick by the start budget
    pub deferred: usize,
}

/// Which cadenced phases are due this tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionDue {
    pub movement: bool,
    pub revalidate: bool,
}

/// Shared state a session reads and registers itself against.
pub struct SessionContext<'a> {
    pub graph: &'a SceneGraph,
    pub registry: &'a mut HierarchyRegistry,
    pub resolver: &'a mut dyn IdResolver,
}

#[derive(Clone, Debug)]
struct StreamedHierarchy {
    reasons: StreamReason,
    /// Root first, in hierarchy order
    members: Vec<(NodeId, ResourceId)>,
}

/// Server-side state for one connected client.
pub struct ClientSession {
    client: ClientId,
    reference_position: Vec3,
    streamed: HashMap<HierarchyId, StreamedHierarchy>,
    /// Every node the client currently mirrors
    resources: HashMap<NodeId, ResourceId>,
    /// Admission proxies currently inside the hysteresis band
    nearby: HashSet<HierarchyId>,
    failed: HashSet<NodeId>,
    lights: HashMap<NodeId, ResourceId>,
    movement_cache: MovementCache,
    movement_cadence: Cadence,
    revalidate_cadence: Cadence,
    last_enabled_flush: f64,
    quality: QualityController,
    transport: Box<dyn ClientTransport>,
}

impl ClientSession {
    pub fn new(client: ClientId, transport: Box<dyn ClientTransport>, config: &StreamingConfig) -> Self {
        Self {
            client,
            reference_position: Vec3::ZERO,
            streamed: HashMap::new(),
            resources: HashMap::new(),
            nearby: HashSet::new(),
            failed: HashSet::new(),
            lights: HashMap::new(),
            movement_cache: MovementCache::new(),
            movement_cadence: Cadence::new(config.movement_send_interval),
            revalidate_cadence: Cadence::new(config.revalidate_interval),
            last_enabled_flush: f64::NEG_INFINITY,
            quality: QualityController::new(config.quality.clone()),
            transport,
        }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn reference_position(&self) -> Vec3 {
        self.reference_position
    }

    pub fn set_reference_position(&mut self, position: Vec3) {
        self.reference_position = position;
    }

    pub fn is_streaming(&self, root: HierarchyId) -> bool {
        self.streamed.contains_key(&root)
    }

    pub fn reasons(&self, root: HierarchyId) -> StreamReason {
        self.streamed.get(&root).map(|s| s.reasons).unwrap_or_default()
    }

    /// Streamed hierarchy roots in ascending order.
    pub fn streamed_hierarchies(&self) -> Vec<HierarchyId> {
        let mut roots: Vec<_> = self.streamed.keys().copied().collect();
        roots.sort_unstable();
        roots
    }

    pub fn streamed_count(&self) -> usize {
        self.streamed.len()
    }

    pub fn nearby(&self) -> &HashSet<HierarchyId> {
        &self.nearby
    }

    pub fn resource_of(&self, node: NodeId) -> Option<ResourceId> {
        self.resources.get(&node).copied()
    }

    pub fn is_failed(&self, node: NodeId) -> bool {
        self.failed.contains(&node)
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn lights(&self) -> &HashMap<NodeId, ResourceId> {
        &self.lights
    }

    pub fn movement_cache(&self) -> &MovementCache {
        &self.movement_cache
    }

    pub fn quality(&self) -> &QualityController {
        &self.quality
    }

    pub fn quality_mut(&mut self) -> &mut QualityController {
        &mut self.quality
    }

    pub fn transport(&self) -> &dyn ClientTransport {
        self.transport.as_ref()
    }

    /// Start streaming `root` for `reason`.
    ///
    /// A second call for a streamed hierarchy only merges the reason.
    pub fn start_streaming(
        &mut self,
        root: HierarchyId,
        reason: StreamReason,
        ctx: &mut SessionContext<'_>,
    ) -> StartOutcome {
        if reason.is_empty() {
            log::warn!("{}: start of {} with no reason ignored", self.client, root);
            return StartOutcome::EmptyReason;
        }
        if self.failed.contains(&root) {
            return StartOutcome::PermanentlyFailed;
        }
        if let Some(entry) = self.streamed.get_mut(&root) {
            log::debug!("{}: {} already streamed ({:?})", self.client, root, entry.reasons);
            entry.reasons |= reason;
            return StartOutcome::AlreadyStreamed;
        }
        let Some(hierarchy) = ctx.registry.get(root) else {
            log::warn!("{}: cannot stream unknown hierarchy {}", self.client, root);
            return StartOutcome::UnknownHierarchy;
        };

        let mut members = Vec::with_capacity(hierarchy.members().len());
        let mut failed = 0;
        for member in hierarchy.members() {
            if self.failed.contains(&member.node) {
                continue;
            }
            let resolved = ctx
                .graph
                .get(member.node)
                .and_then(|node| ctx.resolver.resolve_or_create(node))
                .filter(|id| id.is_valid());
            match resolved {
                Some(id) => members.push((member.node, id)),
                None => {
                    log::warn!("{}: failed to resolve id for {}; it will not be streamed", self.client, member.node);
                    self.failed.insert(member.node);
                    if member.node == root {
                        return StartOutcome::PermanentlyFailed;
                    }
                    failed += 1;
                }
            }
        }

        let lights: Vec<NodeId> = hierarchy.lights().collect();
        for &(node, id) in &members {
            self.resources.insert(node, id);
            if lights.contains(&node) {
                self.lights.insert(node, id);
            }
            self.transport.notify_entered(id);
        }
        ctx.registry.subscribe(root, self.client);

        let resolved = members.len();
        log::debug!("{}: streaming {} ({} nodes, {:?})", self.client, root, resolved, reason);
        self.streamed.insert(root, StreamedHierarchy { reasons: reason, members });
        StartOutcome::Started { resolved, failed }
    }

    /// Clear `reason` for `root`; remove it once no reason is left.
    ///
    /// Works from the session's own record of what it sent, so a hierarchy
    /// that has already vanished from the registry is still cleaned up.
    pub fn stop_streaming(
        &mut self,
        root: HierarchyId,
        reason: StreamReason,
        registry: &mut HierarchyRegistry,
    ) -> StopOutcome {
        if reason.intersects(StreamReason::NEARBY) {
            self.nearby.remove(&root);
        }

        let Some(entry) = self.streamed.get_mut(&root) else {
            if !registry.contains(root) {
                log::error!("{}: stop of {} which has no streaming metadata", self.client, root);
            }
            return StopOutcome::NotStreamed;
        };

        entry.reasons = entry.reasons.without(reason);
        if !entry.reasons.is_empty() {
            return StopOutcome::Retained(entry.reasons);
        }

        if let Some(entry) = self.streamed.remove(&root) {
            for (node, id) in entry.members {
                self.drop_resource(node, id);
            }
        }
        if registry.contains(root) {
            registry.unsubscribe(root, self.client);
        } else {
            log::error!("{}: {} removed without registry metadata", self.client, root);
        }
        log::debug!("{}: stopped streaming {}", self.client, root);
        StopOutcome::Removed
    }

    fn drop_resource(&mut self, node: NodeId, id: ResourceId) {
        self.resources.remove(&node);
        self.lights.remove(&node);
        self.movement_cache.reset_node(node);
        self.transport.notify_left(id);
        if self.transport.has_resource(id) {
            self.transport.notify_removed(id);
        }
    }

    /// Stop everything with every reason. Safe to call at any point of a tick.
    pub fn stop_all(&mut self, registry: &mut HierarchyRegistry) -> usize {
        let roots = self.streamed_hierarchies();
        let mut removed = 0;
        for root in roots {
            if self.stop_streaming(root, StreamReason::ALL, registry) == StopOutcome::Removed {
                removed += 1;
            }
        }
        self.nearby.clear();
        removed
    }

    /// Bring a streamed hierarchy's members in line with its refreshed membership.
    pub fn sync_members(&mut self, root: HierarchyId, ctx: &mut SessionContext<'_>) {
        let Some(entry) = self.streamed.get(&root) else { return };
        let Some(hierarchy) = ctx.registry.get(root) else { return };

        let dropped: Vec<(NodeId, ResourceId)> = entry
            .members
            .iter()
            .filter(|(node, _)| !hierarchy.contains(*node))
            .copied()
            .collect();
        let mut added = Vec::new();
        for member in hierarchy.members() {
            if self.resources.contains_key(&member.node) || self.failed.contains(&member.node) {
                continue;
            }
            let resolved = ctx
                .graph
                .get(member.node)
                .and_then(|node| ctx.resolver.resolve_or_create(node))
                .filter(|id| id.is_valid());
            match resolved {
                Some(id) => added.push((member.node, id, member.kind)),
                None => {
                    log::warn!("{}: failed to resolve id for {}; it will not be streamed", self.client, member.node);
                    self.failed.insert(member.node);
                }
            }
        }

        for &(node, id) in &dropped {
            self.drop_resource(node, id);
        }
        for &(node, id, kind) in &added {
            self.resources.insert(node, id);
            if kind == RenderableKind::Light {
                self.lights.insert(node, id);
            }
            self.transport.notify_entered(id);
        }
        if let Some(entry) = self.streamed.get_mut(&root) {
            entry.members.retain(|(node, _)| !dropped.iter().any(|(d, _)| d == node));
            entry.members.extend(added.iter().map(|&(node, id, _)| (node, id)));
        }
    }

    /// Forget a destroyed node the client mirrors.
    pub fn forget_node(&mut self, node: NodeId) {
        let Some(id) = self.resources.get(&node).copied() else {
            self.movement_cache.reset_node(node);
            return;
        };
        for entry in self.streamed.values_mut() {
            entry.members.retain(|(n, _)| *n != node);
        }
        self.drop_resource(node, id);
    }

    /// Apply one spatial delta: stop what left R1, start what entered R0.
    ///
    /// Candidates are started highest priority first, optional ones last, at
    /// most `budget` per call. Candidates the policy rejects or the budget
    /// defers stay outside the nearby set so the next delta offers them again.
    pub fn apply_spatial_delta(
        &mut self,
        delta: &SpatialDelta,
        ctx: &mut SessionContext<'_>,
        policy: &dyn AdmissionPolicy,
        budget: usize,
    ) -> DeltaReport {
        let mut report = DeltaReport::default();

        for &root in &delta.lost {
            if self.stop_streaming(root, StreamReason::NEARBY, ctx.registry) == StopOutcome::Removed {
                report.stopped += 1;
            }
        }

        let mut queue = AdmissionQueue::new();
        for &root in &delta.gained {
            let Some(hierarchy) = ctx.registry.get(root) else { continue };
            let distance = hierarchy
                .cached_bounds()
                .map(|b| b.distance_to_point(self.reference_position))
                .unwrap_or(f32::MAX);
            queue.push(HierarchyPriority::new(root, hierarchy.priority(), distance));
        }

        while let Some(candidate) = queue.pop() {
            let admitted = ctx
                .registry
                .get(candidate.root)
                .is_some_and(|h| policy.admits(h, ctx.graph));
            if !admitted {
                continue;
            }
            if report.started >= budget {
                report.deferred += 1;
                continue;
            }
            match self.start_streaming(candidate.root, StreamReason::NEARBY, ctx) {
                StartOutcome::Started { .. } => {
                    report.started += 1;
                    self.nearby.insert(candidate.root);
                }
                StartOutcome::AlreadyStreamed | StartOutcome::PermanentlyFailed => {
                    self.nearby.insert(candidate.root);
                }
                StartOutcome::UnknownHierarchy | StartOutcome::EmptyReason => {}
            }
        }
        report
    }

    /// Advance the session's cadences by `delta_secs`.
    pub fn advance(&mut self, delta_secs: f32) -> SessionDue {
        SessionDue {
            movement: self.movement_cadence.tick(delta_secs),
            revalidate: self.revalidate_cadence.tick(delta_secs),
        }
    }

    /// Send one movement batch covering every streamed hierarchy.
    ///
    /// All updates carry `stamp.time`. Returns the number of updates sent.
    pub fn flush_movement(&mut self, stamp: TickStamp, graph: &SceneGraph, registry: &HierarchyRegistry) -> usize {
        let mut batch = Vec::new();
        for root in self.streamed_hierarchies() {
            let Some(hierarchy) = registry.get(root) else { continue };
            batch.extend(hierarchy.movement_updates(
                self.client,
                stamp,
                graph,
                &self.resources,
                self.transport.as_ref(),
                &mut self.movement_cache,
            ));
        }
        if !batch.is_empty() {
            self.transport.send_movement_batch(&batch);
        }
        batch.len()
    }

    /// Send enabled-state changes made after the previous flush.
    ///
    /// `watermark` becomes the lower bound of the next flush.
    pub fn flush_enabled_states(
        &mut self,
        registry: &HierarchyRegistry,
        tracker: &EnabledStateTracker,
        watermark: f64,
    ) -> usize {
        let mut states = Vec::new();
        for root in self.streamed_hierarchies() {
            let Some(hierarchy) = registry.get(root) else { continue };
            if !hierarchy.sends_enabled_state() {
                continue;
            }
            for (node, enabled) in hierarchy.enabled_state_updates_since(self.last_enabled_flush, tracker) {
                if let Some(&id) = self.resources.get(&node) {
                    states.push((id, enabled));
                }
            }
        }
        self.last_enabled_flush = watermark;
        if !states.is_empty() {
            self.transport.send_enabled_states(&states);
        }
        states.len()
    }

    /// Evict every streamed hierarchy the policy no longer admits.
    pub fn revalidate(
        &mut self,
        graph: &SceneGraph,
        registry: &mut HierarchyRegistry,
        policy: &dyn AdmissionPolicy,
    ) -> usize {
        let mut evicted = 0;
        for root in self.streamed_hierarchies() {
            let admissible = registry.get(root).is_some_and(|h| policy.admits(h, graph));
            if !admissible {
                log::debug!("{}: {} no longer admissible", self.client, root);
                if self.stop_streaming(root, StreamReason::ALL, registry) == StopOutcome::Removed {
                    evicted += 1;
                }
            }
        }
        evicted
    }

    /// Feed this tick's video bandwidth to the quality controller.
    ///
    /// Pushes the current tier to the transport whenever the controller has a
    /// reconfiguration pending, whether from a bandwidth decision or a manual
    /// `quality_mut().apply(..)`. Returns the tier pushed.
    pub fn sample_quality(&mut self, delta_secs: f32) -> Option<QualityTier> {
        let bandwidth = self.transport.video_bandwidth_kbps()?;
        self.quality.sample(bandwidth, delta_secs);
        if !self.quality.take_reconfigure() {
            return None;
        }
        let tier = self.quality.current_tier().clone();
        self.transport.apply_quality_tier(&tier);
        Some(tier)
    }

    /// Reparent hook: push the new parent link to the client right away.
    ///
    /// Returns false if the client does not mirror `child`.
    pub fn on_reparented(&mut self, child: HierarchyId, new_parent: Option<NodeId>, registry: &HierarchyRegistry) -> bool {
        let Some(child_id) = self.resources.get(&child).copied() else {
            return false;
        };
        let parent_id = new_parent.and_then(|p| self.resources.get(&p).copied());
        if let Some(hierarchy) = registry.get(child) {
            self.movement_cache.reset_nodes(hierarchy.members().iter().map(|m| m.node));
        }
        self.transport.notify_reparented(child_id, parent_id);
        true
    }

    pub fn reset_velocity_tracking(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
        self.movement_cache.reset_nodes(nodes);
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("client", &self.client)
            .field("reference_position", &self.reference_position)
            .field("streamed", &self.streamed.len())
            .field("nearby", &self.nearby.len())
            .field("failed", &self.failed.len())
            .finish()
    }
}
