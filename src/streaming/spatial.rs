//! Spatial admission and eviction with a two-radius hysteresis band.
//!
//! Candidates inside R0 are gained, streamed candidates outside R1 are lost,
//! and anything between the radii keeps its current state. An object sitting
//! near a boundary therefore cannot oscillate between added and removed.

use std::collections::{HashMap, HashSet};

use glam::Vec3;

use crate::core::{Error, Result};
use crate::core::types::{HierarchyId, LayerId};
use crate::math::Aabb;

use super::config::{SpatialStrategy, StreamingConfig};
use super::external::SpatialQuery;

/// Result of one admission pass. `gained` and `lost` are disjoint and sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpatialDelta {
    pub gained: Vec<HierarchyId>,
    pub lost: Vec<HierarchyId>,
}

impl SpatialDelta {
    pub fn is_empty(&self) -> bool {
        self.gained.is_empty() && self.lost.is_empty()
    }
}

/// Per-client admission decision over a shared candidate query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpatialStreamingIndex {
    inner_radius: f32,
    outer_radius: f32,
    layer_mask: u32,
}

impl SpatialStreamingIndex {
    /// `inner_radius` is R0; R1 = R0 + `buffer`.
    pub fn new(inner_radius: f32, buffer: f32, layer_mask: u32) -> Result<Self> {
        if !(inner_radius >= 0.0) || !(buffer >= 0.0) {
            return Err(Error::Config(format!(
                "invalid admission radii: R0={}, buffer={}",
                inner_radius, buffer
            )));
        }
        Ok(Self {
            inner_radius,
            outer_radius: inner_radius + buffer,
            layer_mask,
        })
    }

    pub fn from_config(config: &StreamingConfig) -> Result<Self> {
        Self::new(config.stream_radius, config.hysteresis_buffer, config.layer_mask)
    }

    pub fn inner_radius(&self) -> f32 {
        self.inner_radius
    }

    pub fn outer_radius(&self) -> f32 {
        self.outer_radius
    }

    /// Compare the candidates around `position` with the `current` set.
    pub fn compute_delta(
        &self,
        query: &dyn SpatialQuery,
        position: Vec3,
        current: &HashSet<HierarchyId>,
    ) -> SpatialDelta {
        let inner = query.overlap(position, self.inner_radius, self.layer_mask);
        let outer = query.overlap(position, self.outer_radius, self.layer_mask);

        let mut gained: Vec<HierarchyId> = inner
            .iter()
            .filter(|id| !current.contains(*id))
            .copied()
            .collect();
        // Anything inside R0 is never lost, even if a query is not monotone in radius
        let mut lost: Vec<HierarchyId> = current
            .iter()
            .filter(|id| !outer.contains(*id) && !inner.contains(*id))
            .copied()
            .collect();

        gained.sort_unstable();
        lost.sort_unstable();
        SpatialDelta { gained, lost }
    }
}

/// Build the configured built-in query.
pub fn query_for_strategy(strategy: SpatialStrategy) -> Box<dyn SpatialQuery> {
    match strategy {
        SpatialStrategy::BruteForce => Box::new(BruteForceQuery::new()),
        SpatialStrategy::SortedAxis => Box::new(SortedAxisQuery::new()),
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Candidate {
    bounds: Aabb,
    layer: LayerId,
    enabled: bool,
}

impl Candidate {
    fn admits(&self, position: Vec3, radius: f32, layer_mask: u32) -> bool {
        self.enabled
            && self.layer.in_mask(layer_mask)
            && self.bounds.intersects_sphere(position, radius)
    }
}

/// Flat candidate list filtered by distance.
#[derive(Debug, Default)]
pub struct BruteForceQuery {
    candidates: HashMap<HierarchyId, Candidate>,
}

impl BruteForceQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl SpatialQuery for BruteForceQuery {
    fn overlap(&self, position: Vec3, radius: f32, layer_mask: u32) -> HashSet<HierarchyId> {
        self.candidates
            .iter()
            .filter(|(_, c)| c.admits(position, radius, layer_mask))
            .map(|(id, _)| *id)
            .collect()
    }

    fn sync_candidate(&mut self, id: HierarchyId, bounds: Aabb, layer: LayerId, enabled: bool) {
        self.candidates.insert(id, Candidate { bounds, layer, enabled });
    }

    fn remove_candidate(&mut self, id: HierarchyId) {
        self.candidates.remove(&id);
    }
}

/// One axis of extents, sorted by minimum coordinate.
#[derive(Debug, Default)]
struct AxisList {
    /// (min, max, id) sorted by min
    entries: Vec<(f32, f32, HierarchyId)>,
}

impl AxisList {
    /// Ids whose extent overlaps `[lo, hi]`.
    fn overlapping(&self, lo: f32, hi: f32) -> HashSet<HierarchyId> {
        let end = self.entries.partition_point(|(min, _, _)| *min <= hi);
        self.entries[..end]
            .iter()
            .filter(|(_, max, _)| *max >= lo)
            .map(|(_, _, id)| *id)
            .collect()
    }
}

/// Accelerated query using per-axis sorted extent lists.
///
/// Candidates are synced into a staging map; `prepare` rebuilds the sorted
/// lists when anything changed.
#[derive(Debug, Default)]
pub struct SortedAxisQuery {
    candidates: HashMap<HierarchyId, Candidate>,
    axes: [AxisList; 3],
    dirty: bool,
}

impl SortedAxisQuery {
    pub fn new() -> Self {
        Self::default()
    }

    fn rebuild(&mut self) {
        for (axis, list) in self.axes.iter_mut().enumerate() {
            list.entries.clear();
            list.entries.extend(
                self.candidates
                    .iter()
                    .filter(|(_, c)| c.enabled)
                    .map(|(id, c)| (c.bounds.min[axis], c.bounds.max[axis], *id)),
            );
            list.entries.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.2.cmp(&b.2)));
        }
        self.dirty = false;
    }
}

impl SpatialQuery for SortedAxisQuery {
    fn overlap(&self, position: Vec3, radius: f32, layer_mask: u32) -> HashSet<HierarchyId> {
        if self.dirty {
            log::warn!("SortedAxisQuery queried before prepare(); results may be stale");
        }

        let mut per_axis: Vec<HashSet<HierarchyId>> = (0..3)
            .map(|axis| self.axes[axis].overlapping(position[axis] - radius, position[axis] + radius))
            .collect();
        per_axis.sort_by_key(|s| s.len());
        let (smallest, rest) = per_axis.split_at(1);

        smallest[0]
            .iter()
            .filter(|id| rest.iter().all(|s| s.contains(*id)))
            .filter(|id| {
                self.candidates
                    .get(*id)
                    .is_some_and(|c| c.admits(position, radius, layer_mask))
            })
            .copied()
            .collect()
    }

    fn sync_candidate(&mut self, id: HierarchyId, bounds: Aabb, layer: LayerId, enabled: bool) {
        let candidate = Candidate { bounds, layer, enabled };
        if self.candidates.insert(id, candidate) != Some(candidate) {
            self.dirty = true;
        }
    }

    fn remove_candidate(&mut self, id: HierarchyId) {
        if self.candidates.remove(&id).is_some() {
            self.dirty = true;
        }
    }

    fn prepare(&mut self) {
        if self.dirty {
            self.rebuild();
        }
    }
}
