//! The streaming engine: owns the scene graph, the hierarchy registry and
//! every client session, and drives them from one synchronous tick.
//!
//! A tick runs in phases:
//! 1. push hierarchy bounds into the spatial query
//! 2. compute every session's spatial delta (in parallel, read-only)
//! 3. apply the deltas one session at a time
//! 4. on each session's cadence, flush movement and enabled state, and
//!    re-validate what it streams
//! 5. feed bandwidth samples to each session's quality controller

use std::collections::{BTreeMap, HashSet};

use glam::{Quat, Vec3};
use rayon::prelude::*;

use crate::core::{Error, Result, TickClock, TickStamp};
use crate::core::types::{ClientId, HierarchyId, NodeId};
use crate::scene::{EnabledCallback, EnabledStateTracker, SceneGraph};

use super::config::StreamingConfig;
use super::external::{ClientTransport, IdResolver, SequentialIdResolver, SpatialQuery};
use super::hierarchy::{HierarchyRegistry, StreamableHierarchy};
use super::ownership::{self, OwnershipContext, ReparentOutcome};
use super::policy::{AdmissionPolicy, AdmitAll};
use super::reason::StreamReason;
use super::session::{ClientSession, SessionContext, StartOutcome, StopOutcome};
use super::spatial::{SpatialDelta, SpatialStreamingIndex, query_for_strategy};

/// Summary of one tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickReport {
    pub stamp: TickStamp,
    pub started: usize,
    pub stopped: usize,
    pub deferred: usize,
    pub movement_updates: usize,
    pub enabled_updates: usize,
    pub evicted: usize,
    /// (client, tier name) for every quality tier applied this tick
    pub tier_changes: Vec<(ClientId, String)>,
}

/// Owns all replication state. Single writer per tick.
pub struct StreamingEngine {
    config: StreamingConfig,
    index: SpatialStreamingIndex,
    spatial: Box<dyn SpatialQuery>,
    resolver: Box<dyn IdResolver>,
    policy: Box<dyn AdmissionPolicy>,
    graph: SceneGraph,
    tracker: EnabledStateTracker,
    registry: HierarchyRegistry,
    sessions: BTreeMap<ClientId, ClientSession>,
    clock: TickClock,
    /// Lower bound for the next enabled-state flush
    enabled_watermark: f64,
}

impl StreamingEngine {
    /// Create an engine with the built-in spatial query, sequential ids and
    /// a policy that admits every active hierarchy.
    pub fn new(config: StreamingConfig) -> Result<Self> {
        config.validate()?;
        let index = SpatialStreamingIndex::from_config(&config)?;
        let spatial = query_for_strategy(config.spatial_strategy);
        log::info!(
            "Streaming engine: R0={} R1={} strategy={:?}",
            index.inner_radius(),
            index.outer_radius(),
            config.spatial_strategy
        );
        Ok(Self {
            config,
            index,
            spatial,
            resolver: Box::new(SequentialIdResolver::new()),
            policy: Box::new(AdmitAll),
            graph: SceneGraph::new(),
            tracker: EnabledStateTracker::new(),
            registry: HierarchyRegistry::new(),
            sessions: BTreeMap::new(),
            clock: TickClock::new(),
            enabled_watermark: f64::NEG_INFINITY,
        })
    }

    pub fn with_policy(mut self, policy: Box<dyn AdmissionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_resolver(mut self, resolver: Box<dyn IdResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replace the built-in spatial query, e.g. with a physics overlap query.
    pub fn with_spatial_query(mut self, spatial: Box<dyn SpatialQuery>) -> Self {
        self.spatial = spatial;
        self
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn index(&self) -> &SpatialStreamingIndex {
        &self.index
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    /// Structural edits that change hierarchy membership need a
    /// [`refresh_hierarchy`](Self::refresh_hierarchy) afterwards.
    pub fn graph_mut(&mut self) -> &mut SceneGraph {
        &mut self.graph
    }

    pub fn tracker(&self) -> &EnabledStateTracker {
        &self.tracker
    }

    pub fn register_enabled_callback(&mut self, callback: EnabledCallback) {
        self.tracker.register_callback(callback);
    }

    pub fn registry(&self) -> &HierarchyRegistry {
        &self.registry
    }

    pub fn hierarchy(&self, root: HierarchyId) -> Option<&StreamableHierarchy> {
        self.registry.get(root)
    }

    pub fn now(&self) -> TickStamp {
        self.clock.now()
    }

    // --- Sessions ---

    /// Create the session for a newly linked client.
    pub fn connect(&mut self, client: ClientId, transport: Box<dyn ClientTransport>) -> Result<()> {
        if client.is_none() {
            return Err(Error::InvalidClient);
        }
        if self.sessions.contains_key(&client) {
            return Err(Error::DuplicateClient(client));
        }
        self.sessions.insert(client, ClientSession::new(client, transport, &self.config));
        log::info!("Client {} connected ({} sessions)", client, self.sessions.len());
        Ok(())
    }

    /// Tear down a session: stop everything it streams and release what it owns.
    pub fn disconnect(&mut self, client: ClientId) -> Result<()> {
        let mut session = self.sessions.remove(&client).ok_or(Error::UnknownClient(client))?;
        let stopped = session.stop_all(&mut self.registry);
        let released = ownership::release_all(&mut self.registry, client);
        log::info!(
            "Client {} disconnected: {} hierarchies stopped, {} released",
            client,
            stopped,
            released.len()
        );
        Ok(())
    }

    pub fn session(&self, client: ClientId) -> Option<&ClientSession> {
        self.sessions.get(&client)
    }

    pub fn session_mut(&mut self, client: ClientId) -> Option<&mut ClientSession> {
        self.sessions.get_mut(&client)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &ClientSession> {
        self.sessions.values()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn set_reference_position(&mut self, client: ClientId, position: Vec3) -> Result<()> {
        let session = self.sessions.get_mut(&client).ok_or(Error::UnknownClient(client))?;
        session.set_reference_position(position);
        Ok(())
    }

    // --- Hierarchies ---

    /// Register the hierarchy rooted at `root`, or refresh it if it exists.
    pub fn create_hierarchy(&mut self, root: NodeId) -> Result<()> {
        if self.registry.contains(root) {
            return self.refresh_hierarchy(root);
        }
        self.registry.create(root, &self.graph)?;
        Ok(())
    }

    /// Rebuild membership, priority and bounds, then bring every session
    /// streaming it up to date.
    pub fn refresh_hierarchy(&mut self, root: HierarchyId) -> Result<()> {
        self.registry.refresh(root, &self.graph)?;
        for client in self.registry.subscribers(root) {
            let Some(session) = self.sessions.get_mut(&client) else { continue };
            let mut ctx = SessionContext {
                graph: &self.graph,
                registry: &mut self.registry,
                resolver: self.resolver.as_mut(),
            };
            session.sync_members(root, &mut ctx);
        }
        Ok(())
    }

    /// Remove a hierarchy and force it out of every session.
    pub fn destroy_hierarchy(&mut self, root: HierarchyId) -> Result<()> {
        if !self.registry.contains(root) {
            return Err(Error::UnknownHierarchy(root));
        }
        for session in self.sessions.values_mut() {
            session.stop_streaming(root, StreamReason::ALL, &mut self.registry);
        }
        self.registry.remove(root);
        self.spatial.remove_candidate(root);
        log::debug!("Destroyed hierarchy {}", root);
        Ok(())
    }

    pub fn set_movement_sending(&mut self, root: HierarchyId, enabled: bool) -> Result<()> {
        let hierarchy = self.registry.get_mut(root).ok_or(Error::UnknownHierarchy(root))?;
        hierarchy.set_send_movement(enabled);
        Ok(())
    }

    pub fn set_enabled_state_sending(&mut self, root: HierarchyId, enabled: bool) -> Result<()> {
        let hierarchy = self.registry.get_mut(root).ok_or(Error::UnknownHierarchy(root))?;
        hierarchy.set_send_enabled_state(enabled);
        Ok(())
    }

    // --- Reasons ---

    /// Stream `root` to `client` for a non-spatial reason (tagged, forced).
    pub fn stream_with_reason(
        &mut self,
        client: ClientId,
        root: HierarchyId,
        reason: StreamReason,
    ) -> Result<StartOutcome> {
        let session = self.sessions.get_mut(&client).ok_or(Error::UnknownClient(client))?;
        let mut ctx = SessionContext {
            graph: &self.graph,
            registry: &mut self.registry,
            resolver: self.resolver.as_mut(),
        };
        Ok(session.start_streaming(root, reason, &mut ctx))
    }

    pub fn stop_with_reason(
        &mut self,
        client: ClientId,
        root: HierarchyId,
        reason: StreamReason,
    ) -> Result<StopOutcome> {
        let session = self.sessions.get_mut(&client).ok_or(Error::UnknownClient(client))?;
        Ok(session.stop_streaming(root, reason, &mut self.registry))
    }

    // --- Ownership ---

    /// Move hierarchy `child` under `new_parent` at a pose relative to it.
    pub fn reparent(
        &mut self,
        child: HierarchyId,
        new_parent: Option<NodeId>,
        position: Vec3,
        rotation: Quat,
    ) -> Result<ReparentOutcome> {
        let mut ctx = OwnershipContext {
            graph: &mut self.graph,
            registry: &mut self.registry,
            sessions: &mut self.sessions,
        };
        ownership::reparent(&mut ctx, child, new_parent, position, rotation)
    }

    /// Give a connected client authority over `root`.
    pub fn assign_owner(&mut self, root: HierarchyId, client: ClientId) -> Result<()> {
        if !self.sessions.contains_key(&client) {
            return Err(Error::UnknownClient(client));
        }
        ownership::assign_owner(&mut self.registry, root, client)
    }

    /// Returns the previous owner.
    pub fn release_ownership(&mut self, root: HierarchyId) -> Result<ClientId> {
        ownership::release_ownership(&mut self.registry, root)
    }

    // --- Velocity tracking ---

    /// Make the next velocity of `node` zero in every session.
    pub fn reset_velocity_tracking(&mut self, node: NodeId) {
        for session in self.sessions.values_mut() {
            session.reset_velocity_tracking([node]);
        }
    }

    pub fn reset_hierarchy_velocity_tracking(&mut self, root: HierarchyId) -> Result<()> {
        let hierarchy = self.registry.get(root).ok_or(Error::UnknownHierarchy(root))?;
        let nodes: Vec<NodeId> = hierarchy.members().iter().map(|m| m.node).collect();
        for session in self.sessions.values_mut() {
            session.reset_velocity_tracking(nodes.iter().copied());
        }
        Ok(())
    }

    // --- Node lifecycle ---

    /// Enable or disable a node, recording the edge and running lifecycle hooks.
    pub fn set_node_enabled(&mut self, node: NodeId, enabled: bool) -> Result<()> {
        if !self.graph.set_enabled(node, enabled)? {
            return Ok(());
        }
        self.tracker.record(node, enabled, self.clock.now().time);
        if enabled {
            self.on_node_activated(node)?;
        } else {
            self.on_node_deactivated(node)?;
        }
        Ok(())
    }

    /// Create a hierarchy if `node` is an eligible root. Returns true if one was created.
    pub fn on_node_activated(&mut self, node: NodeId) -> Result<bool> {
        let scene_node = self.graph.get(node).ok_or(Error::UnknownNode(node))?;
        if !self.policy.is_streaming_root(scene_node)
            || !self.graph.is_active(node)
            || self.registry.hierarchy_of(node).is_some()
        {
            return Ok(false);
        }
        // Policy-selected roots must stay out of enclosing hierarchies on refresh
        if let Some(scene_node) = self.graph.get_mut(node) {
            scene_node.hierarchy_root = true;
        }
        self.registry.create(node, &self.graph)?;
        Ok(true)
    }

    /// Destroy the hierarchy `node` roots, if any. Returns true if one was destroyed.
    pub fn on_node_deactivated(&mut self, node: NodeId) -> Result<bool> {
        if !self.registry.contains(node) {
            return Ok(false);
        }
        self.destroy_hierarchy(node)?;
        Ok(true)
    }

    /// Remove `node` and its subtree from the graph.
    ///
    /// Hierarchies rooted in the subtree are destroyed; hierarchies that lose
    /// members are refreshed. Returns every removed node.
    pub fn on_node_destroyed(&mut self, node: NodeId) -> Result<Vec<NodeId>> {
        if !self.graph.contains(node) {
            return Err(Error::UnknownNode(node));
        }
        let removed = self.graph.remove(node);

        let mut affected = HashSet::new();
        for &id in &removed {
            if self.registry.contains(id) {
                self.destroy_hierarchy(id)?;
            } else if let Some(root) = self.registry.hierarchy_of(id) {
                affected.insert(root);
            }
            self.tracker.forget(id);
            for session in self.sessions.values_mut() {
                session.forget_node(id);
            }
        }

        let mut affected: Vec<_> = affected.into_iter().filter(|r| self.registry.contains(*r)).collect();
        affected.sort_unstable();
        for root in affected {
            self.refresh_hierarchy(root)?;
        }
        Ok(removed)
    }

    // --- Tick ---

    /// Run one tick of `delta_secs`. Failures are scoped to one session or
    /// hierarchy and never abort the tick.
    pub fn tick(&mut self, delta_secs: f32) -> TickReport {
        let before = self.clock.now().time;
        let stamp = self.clock.advance(delta_secs);
        let delta_secs = self.clock.delta_secs();
        let watermark = if stamp.time > before { before } else { self.enabled_watermark };
        self.enabled_watermark = watermark;

        let mut report = TickReport {
            stamp,
            ..Default::default()
        };

        self.sync_spatial();

        for (client, delta) in self.compute_deltas() {
            if delta.is_empty() {
                continue;
            }
            let Some(session) = self.sessions.get_mut(&client) else { continue };
            let mut ctx = SessionContext {
                graph: &self.graph,
                registry: &mut self.registry,
                resolver: self.resolver.as_mut(),
            };
            let applied = session.apply_spatial_delta(&delta, &mut ctx, self.policy.as_ref(), self.config.max_starts_per_tick);
            report.started += applied.started;
            report.stopped += applied.stopped;
            report.deferred += applied.deferred;
        }

        for session in self.sessions.values_mut() {
            let due = session.advance(delta_secs);
            if due.movement {
                report.movement_updates += session.flush_movement(stamp, &self.graph, &self.registry);
                report.enabled_updates += session.flush_enabled_states(&self.registry, &self.tracker, watermark);
            }
            if due.revalidate {
                report.evicted += session.revalidate(&self.graph, &mut self.registry, self.policy.as_ref());
            }
            if let Some(tier) = session.sample_quality(delta_secs) {
                report.tier_changes.push((session.client(), tier.name));
            }
        }

        if report.started + report.stopped + report.evicted > 0 {
            log::debug!(
                "Tick {}: +{} -{} evicted {} deferred {}",
                stamp.tick,
                report.started,
                report.stopped,
                report.evicted,
                report.deferred
            );
        }
        report
    }

    /// Push fresh bounds of every hierarchy into the spatial query.
    fn sync_spatial(&mut self) {
        for hierarchy in self.registry.iter_mut() {
            hierarchy.invalidate_bounds();
            let bounds = hierarchy.bounds(&self.graph);
            let enabled = self.graph.is_active(hierarchy.root());
            self.spatial.sync_candidate(hierarchy.root(), bounds, hierarchy.layer(), enabled);
        }
        self.spatial.prepare();
    }

    /// Spatial deltas for every session. Pure, so sessions run in parallel.
    fn compute_deltas(&self) -> Vec<(ClientId, SpatialDelta)> {
        let inputs: Vec<(ClientId, Vec3, &HashSet<HierarchyId>)> = self
            .sessions
            .values()
            .map(|s| (s.client(), s.reference_position(), s.nearby()))
            .collect();

        let index = &self.index;
        let spatial = self.spatial.as_ref();
        inputs
            .into_par_iter()
            .map(|(client, position, nearby)| (client, index.compute_delta(spatial, position, nearby)))
            .collect()
    }
}

impl std::fmt::Debug for StreamingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingEngine")
            .field("config", &self.config)
            .field("hierarchies", &self.registry.len())
            .field("sessions", &self.sessions.len())
            .field("now", &self.clock.now())
            .finish()
    }
}
