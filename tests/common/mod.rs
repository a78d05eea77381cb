//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use glam::Vec3;
use scenestream::core::types::{ClientId, NodeId, ResourceId};
use scenestream::scene::{RenderableKind, SceneNode, Transform};
use scenestream::streaming::{
    ClientTransport, IdResolver, MovementUpdate, QualityTier, SequentialIdResolver,
    StreamingConfig, StreamingEngine,
};

/// Everything a transport was asked to do.
#[derive(Debug, Default)]
pub struct TransportLog {
    pub entered: Vec<ResourceId>,
    pub left: Vec<ResourceId>,
    pub removed: Vec<ResourceId>,
    pub batches: Vec<Vec<MovementUpdate>>,
    pub enabled: Vec<(ResourceId, bool)>,
    pub reparented: Vec<(ResourceId, Option<ResourceId>)>,
    pub tiers: Vec<String>,
    /// Nodes whose parent the client renders
    pub rendering_parent_of: HashSet<NodeId>,
    /// Reported video bandwidth; `None` while video is off
    pub bandwidth_kbps: Option<f32>,
    /// Resources the client claims to hold; `None` means all of them
    pub holds: Option<HashSet<ResourceId>>,
}

impl TransportLog {
    pub fn clear(&mut self) {
        self.entered.clear();
        self.left.clear();
        self.removed.clear();
        self.batches.clear();
        self.enabled.clear();
        self.reparented.clear();
        self.tiers.clear();
    }
}

/// Transport recording into a log shared with the test.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    pub log: Arc<Mutex<TransportLog>>,
}

impl RecordingTransport {
    pub fn new() -> (Self, Arc<Mutex<TransportLog>>) {
        let transport = Self::default();
        let log = transport.log.clone();
        (transport, log)
    }
}

impl ClientTransport for RecordingTransport {
    fn notify_entered(&mut self, id: ResourceId) {
        self.log.lock().unwrap().entered.push(id);
    }

    fn notify_left(&mut self, id: ResourceId) {
        self.log.lock().unwrap().left.push(id);
    }

    fn notify_removed(&mut self, id: ResourceId) {
        self.log.lock().unwrap().removed.push(id);
    }

    fn send_movement_batch(&mut self, updates: &[MovementUpdate]) {
        self.log.lock().unwrap().batches.push(updates.to_vec());
    }

    fn send_enabled_states(&mut self, states: &[(ResourceId, bool)]) {
        self.log.lock().unwrap().enabled.extend_from_slice(states);
    }

    fn notify_reparented(&mut self, child: ResourceId, parent: Option<ResourceId>) {
        self.log.lock().unwrap().reparented.push((child, parent));
    }

    fn is_rendering_parent(&self, node: NodeId) -> bool {
        self.log.lock().unwrap().rendering_parent_of.contains(&node)
    }

    fn has_resource(&self, id: ResourceId) -> bool {
        match &self.log.lock().unwrap().holds {
            Some(held) => held.contains(&id),
            None => true,
        }
    }

    fn video_bandwidth_kbps(&self) -> Option<f32> {
        self.log.lock().unwrap().bandwidth_kbps
    }

    fn apply_quality_tier(&mut self, tier: &QualityTier) {
        self.log.lock().unwrap().tiers.push(tier.name.clone());
    }
}

/// Resolver that fails for nodes with the given names.
pub struct FailingResolver {
    inner: SequentialIdResolver,
    failing: HashSet<String>,
}

impl FailingResolver {
    pub fn new(failing: &[&str]) -> Self {
        Self {
            inner: SequentialIdResolver::new(),
            failing: failing.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl IdResolver for FailingResolver {
    fn resolve_or_create(&mut self, node: &SceneNode) -> Option<ResourceId> {
        if self.failing.contains(&node.name) {
            None
        } else {
            self.inner.resolve_or_create(node)
        }
    }
}

pub const CLIENT_A: ClientId = ClientId(1);
pub const CLIENT_B: ClientId = ClientId(2);

/// Engine with R0=15, R1=20 and every cadence firing each 0.1s tick.
pub fn engine() -> StreamingEngine {
    scenestream::core::logging::init_with_filter("warn");
    StreamingEngine::new(config()).unwrap()
}

pub fn config() -> StreamingConfig {
    StreamingConfig {
        movement_send_interval: 0.1,
        revalidate_interval: 0.1,
        ..Default::default()
    }
}

pub fn connect(engine: &mut StreamingEngine, client: ClientId) -> Arc<Mutex<TransportLog>> {
    let (transport, log) = RecordingTransport::new();
    engine.connect(client, Box::new(transport)).unwrap();
    log
}

/// Add a point-sized streamable root at `position` and register it.
pub fn spawn_root(engine: &mut StreamingEngine, name: &str, position: Vec3) -> NodeId {
    let graph = engine.graph_mut();
    let root = graph.add_node(None, name, RenderableKind::Mesh).unwrap();
    let node = graph.get_mut(root).unwrap();
    node.hierarchy_root = true;
    node.half_extent = Vec3::ZERO;
    graph.set_local_transform(root, Transform::from_position(position)).unwrap();
    engine.create_hierarchy(root).unwrap();
    root
}

pub fn move_node(engine: &mut StreamingEngine, node: NodeId, position: Vec3) {
    let graph = engine.graph_mut();
    let mut transform = graph.local_transform(node).unwrap();
    transform.position = position;
    graph.set_local_transform(node, transform).unwrap();
}
