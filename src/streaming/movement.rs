//! Movement updates and per-client velocity estimation.
//!
//! Velocity comes from the driving rigid body when it is dynamic, otherwise
//! from a finite difference against the previous sample of the same node in
//! the same basis. The cache is owned by one client session because the
//! basis choice differs per client.

use std::collections::HashMap;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::TickStamp;
use crate::core::types::{NodeId, ResourceId};
use crate::scene::{Basis, RigidBodyState, Transform};

const POSE_EPSILON: f32 = 1e-6;

/// Rotation rate as a unit axis and an angle in radians per second.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisAngle {
    pub axis: Vec3,
    pub angle: f32,
}

impl AxisAngle {
    pub const ZERO: AxisAngle = AxisAngle {
        axis: Vec3::X,
        angle: 0.0,
    };

    /// From an axis scaled by its rate (physics-engine convention).
    pub fn from_scaled_axis(v: Vec3) -> Self {
        let angle = v.length();
        if angle <= POSE_EPSILON {
            return Self::ZERO;
        }
        Self { axis: v / angle, angle }
    }

    pub fn to_scaled_axis(self) -> Vec3 {
        self.axis * self.angle
    }

    pub fn is_zero(self) -> bool {
        self.angle.abs() <= POSE_EPSILON
    }
}

impl Default for AxisAngle {
    fn default() -> Self {
        Self::ZERO
    }
}

/// One node's pose and velocities as sent to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovementUpdate {
    /// Shared by every update produced in the same tick
    pub timestamp: f64,
    pub id: ResourceId,
    pub is_global: bool,
    pub position: Vec3,
    pub rotation: Quat,
    /// Present only when scale changed (or on the first sample)
    pub scale: Option<Vec3>,
    pub velocity: Vec3,
    pub angular_velocity: AxisAngle,
}

/// Everything needed to sample one node in one tick.
#[derive(Clone, Copy, Debug)]
pub struct PoseSample {
    pub node: NodeId,
    pub id: ResourceId,
    pub stamp: TickStamp,
    pub basis: Basis,
    pub transform: Transform,
    /// Dynamic body driving the node, if any
    pub body: Option<RigidBodyState>,
    /// Skip re-sending an unchanged pose that is already known to be at rest
    pub smoothing: bool,
}

#[derive(Clone, Debug)]
struct CachedMovement {
    tick: u64,
    time: f64,
    basis: Basis,
    transform: Transform,
    velocity: Vec3,
    angular_velocity: AxisAngle,
    /// What was produced for `tick`; `None` when nothing was sent.
    emitted: Option<MovementUpdate>,
}

impl CachedMovement {
    fn same_pose(&self, t: &Transform) -> bool {
        self.transform.position.abs_diff_eq(t.position, POSE_EPSILON)
            && self.transform.rotation.abs_diff_eq(t.rotation, POSE_EPSILON)
    }

    fn at_rest(&self) -> bool {
        self.velocity.length_squared() <= POSE_EPSILON * POSE_EPSILON && self.angular_velocity.is_zero()
    }
}

/// Finite-difference angular velocity between two rotations over `dt`.
///
/// The angle is scaled by `-1/dt`: clients integrate with the opposite
/// handedness, so the reported rate is negated. The delta quaternion is not
/// sign-normalized: a negative `w` yields an angle above pi.
pub fn angular_velocity_between(prev: Quat, current: Quat, dt: f32) -> AxisAngle {
    let delta = (current * prev.inverse()).normalize();
    let (axis, angle) = delta.to_axis_angle();
    if angle.abs() <= POSE_EPSILON {
        return AxisAngle::ZERO;
    }
    AxisAngle {
        axis,
        angle: angle * (-1.0 / dt),
    }
}

/// Previous-movement samples of one client, keyed by node.
#[derive(Debug, Default)]
pub struct MovementCache {
    entries: HashMap<NodeId, CachedMovement>,
}

impl MovementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the update for `sample`, or `None` if it is suppressed.
    ///
    /// Calling twice in one tick returns the first result unchanged.
    pub fn sample(&mut self, sample: &PoseSample) -> Option<MovementUpdate> {
        let prev = self.entries.get(&sample.node);
        if let Some(prev) = prev {
            if prev.tick == sample.stamp.tick {
                return prev.emitted.clone();
            }
        }

        let body = sample.body.filter(|b| !b.kinematic);
        let (velocity, angular_velocity) = match prev {
            Some(prev) => {
                let dt = (sample.stamp.time - prev.time) as f32;
                if !(dt > 0.0) {
                    // Time did not advance: keep the previous sample, send nothing
                    log::trace!("Suppressing movement of {} with dt={}", sample.node, dt);
                    return None;
                }
                if let Some(body) = body {
                    (body.velocity, AxisAngle::from_scaled_axis(body.angular_velocity))
                } else if prev.basis != sample.basis {
                    (Vec3::ZERO, AxisAngle::ZERO)
                } else {
                    (
                        (sample.transform.position - prev.transform.position) / dt,
                        angular_velocity_between(prev.transform.rotation, sample.transform.rotation, dt),
                    )
                }
            }
            None => match body {
                Some(body) => (body.velocity, AxisAngle::from_scaled_axis(body.angular_velocity)),
                None => (Vec3::ZERO, AxisAngle::ZERO),
            },
        };

        let scale_changed = match prev {
            Some(prev) => {
                prev.basis != sample.basis
                    || !prev.transform.scale.abs_diff_eq(sample.transform.scale, POSE_EPSILON)
            }
            None => true,
        };

        let redundant = sample.smoothing
            && prev.is_some_and(|p| {
                p.basis == sample.basis && p.at_rest() && p.same_pose(&sample.transform)
            })
            && velocity.length_squared() <= POSE_EPSILON * POSE_EPSILON
            && angular_velocity.is_zero();

        let emitted = (!redundant).then(|| MovementUpdate {
            timestamp: sample.stamp.time,
            id: sample.id,
            is_global: sample.basis.is_global(),
            position: sample.transform.position,
            rotation: sample.transform.rotation,
            scale: scale_changed.then_some(sample.transform.scale),
            velocity,
            angular_velocity,
        });

        self.entries.insert(sample.node, CachedMovement {
            tick: sample.stamp.tick,
            time: sample.stamp.time,
            basis: sample.basis,
            transform: sample.transform,
            velocity,
            angular_velocity,
            emitted: emitted.clone(),
        });
        emitted
    }

    /// Forget a node so its next velocity is zero.
    pub fn reset_node(&mut self, node: NodeId) {
        self.entries.remove(&node);
    }

    pub fn reset_nodes(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
        for node in nodes {
            self.entries.remove(&node);
        }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.entries.contains_key(&node)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(tick: u64, time: f64) -> TickStamp {
        TickStamp { tick, time }
    }

    fn pose(tick: u64, time: f64, position: Vec3, basis: Basis) -> PoseSample {
        PoseSample {
            node: NodeId(1),
            id: ResourceId(100),
            stamp: stamp(tick, time),
            basis,
            transform: Transform::from_position(position),
            body: None,
            smoothing: false,
        }
    }

    #[test]
    fn test_first_sample_has_zero_velocity_and_scale() {
        let mut cache = MovementCache::new();
        let update = cache.sample(&pose(1, 0.0, Vec3::ONE, Basis::Global)).unwrap();
        assert_eq!(update.velocity, Vec3::ZERO);
        assert!(update.angular_velocity.is_zero());
        assert_eq!(update.scale, Some(Vec3::ONE));
        assert!(update.is_global);
        assert_eq!(update.id, ResourceId(100));
    }

    #[test]
    fn test_finite_difference_velocity() {
        let mut cache = MovementCache::new();
        cache.sample(&pose(1, 1.0, Vec3::ZERO, Basis::Global));
        let update = cache.sample(&pose(2, 1.5, Vec3::new(1.0, 0.0, -2.0), Basis::Global)).unwrap();

        assert!((update.velocity - Vec3::new(2.0, 0.0, -4.0)).length() < 1e-4);
        assert_eq!(update.scale, None);
        assert_eq!(update.timestamp, 1.5);
    }

    #[test]
    fn test_zero_dt_is_suppressed_and_keeps_previous() {
        let mut cache = MovementCache::new();
        cache.sample(&pose(1, 1.0, Vec3::ZERO, Basis::Global));
        assert!(cache.sample(&pose(2, 1.0, Vec3::X, Basis::Global)).is_none());

        // Next real sample differences against the t=1.0 sample
        let update = cache.sample(&pose(3, 2.0, Vec3::new(3.0, 0.0, 0.0), Basis::Global)).unwrap();
        assert!((update.velocity.x - 3.0).abs() < 1e-4);
        assert!(update.velocity.is_finite());
    }

    #[test]
    fn test_basis_change_zeroes_velocity() {
        let mut cache = MovementCache::new();
        cache.sample(&pose(1, 0.0, Vec3::new(50.0, 0.0, 0.0), Basis::Global));
        let update = cache.sample(&pose(2, 0.1, Vec3::new(0.1, 0.0, 0.0), Basis::Local)).unwrap();

        assert_eq!(update.velocity, Vec3::ZERO);
        assert!(update.angular_velocity.is_zero());
        assert!(!update.is_global);
        // Scale is resent with the new basis
        assert!(update.scale.is_some());
    }

    #[test]
    fn test_same_tick_returns_cached_update() {
        let mut cache = MovementCache::new();
        cache.sample(&pose(1, 0.0, Vec3::ZERO, Basis::Global));
        let first = cache.sample(&pose(2, 1.0, Vec3::X, Basis::Global)).unwrap();
        // Same tick, different pose: the cached update wins
        let again = cache.sample(&pose(2, 1.0, Vec3::new(9.0, 9.0, 9.0), Basis::Global)).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_angular_velocity_sign_convention() {
        // +0.1 rad about +Y over 0.5 s reports axis +Y with angle -0.2 rad/s
        let prev = Quat::IDENTITY;
        let current = Quat::from_rotation_y(0.1);
        let av = angular_velocity_between(prev, current, 0.5);

        assert!((av.axis - Vec3::Y).length() < 1e-4);
        assert!((av.angle + 0.2).abs() < 1e-4);
    }

    #[test]
    fn test_angular_velocity_keeps_quaternion_sign() {
        let prev = Quat::from_rotation_z(0.05);
        // Same orientation as from_rotation_z(0.15) but with the opposite sign
        let current = -Quat::from_rotation_z(0.15);
        let av = angular_velocity_between(prev, current, 1.0);
        assert!((av.axis + Vec3::Z).length() < 1e-4);
        assert!((av.angle + (std::f32::consts::TAU - 0.1)).abs() < 1e-3);
    }

    #[test]
    fn test_dynamic_body_velocity_used_directly() {
        let mut cache = MovementCache::new();
        let mut sample = pose(1, 0.0, Vec3::ZERO, Basis::Global);
        sample.body = Some(RigidBodyState {
            velocity: Vec3::new(0.0, -9.8, 0.0),
            angular_velocity: Vec3::new(0.0, 0.0, 2.0),
            kinematic: false,
        });
        let update = cache.sample(&sample).unwrap();
        assert_eq!(update.velocity, Vec3::new(0.0, -9.8, 0.0));
        assert!((update.angular_velocity.axis - Vec3::Z).length() < 1e-6);
        assert!((update.angular_velocity.angle - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_kinematic_body_falls_back_to_difference() {
        let mut cache = MovementCache::new();
        let mut first = pose(1, 0.0, Vec3::ZERO, Basis::Global);
        first.body = Some(RigidBodyState { velocity: Vec3::splat(100.0), kinematic: true, ..Default::default() });
        cache.sample(&first);
        let mut second = pose(2, 1.0, Vec3::X, Basis::Global);
        second.body = first.body;

        let update = cache.sample(&second).unwrap();
        assert!((update.velocity - Vec3::X).length() < 1e-5);
    }

    #[test]
    fn test_smoothing_skips_redundant_rest_updates() {
        let mut cache = MovementCache::new();
        let mut sample = pose(1, 0.0, Vec3::ONE, Basis::Global);
        sample.smoothing = true;
        assert!(cache.sample(&sample).is_some());

        sample.stamp = stamp(2, 0.1);
        assert!(cache.sample(&sample).is_none());

        sample.stamp = stamp(3, 0.2);
        sample.transform.position = Vec3::new(2.0, 1.0, 1.0);
        assert!(cache.sample(&sample).is_some());

        // Stopped: the first rest update still goes out so the client stops extrapolating
        sample.stamp = stamp(4, 0.3);
        let stop = cache.sample(&sample).unwrap();
        assert_eq!(stop.velocity, Vec3::ZERO);
        sample.stamp = stamp(5, 0.4);
        assert!(cache.sample(&sample).is_none());
    }

    #[test]
    fn test_without_smoothing_every_tick_is_sent() {
        let mut cache = MovementCache::new();
        for tick in 1..5 {
            assert!(cache.sample(&pose(tick, tick as f64 * 0.1, Vec3::ONE, Basis::Global)).is_some());
        }
    }

    #[test]
    fn test_reset_node_zeroes_next_velocity() {
        let mut cache = MovementCache::new();
        cache.sample(&pose(1, 0.0, Vec3::ZERO, Basis::Global));
        cache.reset_node(NodeId(1));
        assert!(!cache.contains(NodeId(1)));

        let update = cache.sample(&pose(2, 0.1, Vec3::new(10.0, 0.0, 0.0), Basis::Global)).unwrap();
        assert_eq!(update.velocity, Vec3::ZERO);
    }
}
