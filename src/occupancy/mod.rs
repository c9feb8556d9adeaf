//! Probabilistic occupancy mapping on top of the generic sparse octree:
//! log-odds fusion, the occupancy predicate, ray/pointcloud insertion, and
//! the tree-configuration surface.

mod raycasting;
mod serialization;

use std::collections::HashSet;
use std::io::{Read, Write};

use crate::error::OcTreeError;
use crate::octree::{CowDisabled, Octree, Payload, Sharing};
use crate::spatial::math::{coord_to_key, V3c, VoxelKey, DEFAULT_TREE_DEPTH};
use crate::spatial::raytracing::Ray;

/// `ln(p / (1 - p))`.
pub fn logodds(p: f32) -> f32 {
    (p / (1.0 - p)).ln()
}

/// A single 32-bit log-odds value: an occupancy tree's node payload.
/// Defaults to `0.0`, i.e. probability `0.5`, "unknown".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LogOdds(f32);

impl LogOdds {
    pub fn new(log_odds: f32) -> Self {
        Self(log_odds)
    }

    pub fn value(&self) -> f32 {
        self.0
    }

    pub fn probability(&self) -> f32 {
        1.0 - 1.0 / (1.0 + self.0.exp())
    }
}

impl Payload for LogOdds {
    /// Conservative occupancy: an inner node's value is the maximum
    /// log-odds among its existing children, so pruning/serialization see
    /// the subtree as "at least as occupied as its most occupied child".
    fn aggregate(children: &[&Self]) -> Self {
        children
            .iter()
            .fold(LogOdds(f32::NEG_INFINITY), |acc, c| LogOdds(acc.0.max(c.0)))
    }

    fn split_on_expand(&self) -> Self {
        *self
    }

    fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.0.to_ne_bytes())
    }

    fn read_from<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf)?;
        Ok(LogOdds(f32::from_ne_bytes(buf)))
    }
}

/// Fusion thresholds for a `LogOdds` tree, with the defaults used
/// throughout the occupancy-mapping literature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OccupancyParams {
    pub prob_hit: f32,
    pub prob_miss: f32,
    pub clamping_min: f32,
    pub clamping_max: f32,
    pub occupancy_threshold: f32,
}

impl Default for OccupancyParams {
    fn default() -> Self {
        Self {
            prob_hit: 0.7,
            prob_miss: 0.4,
            clamping_min: logodds(0.1192),
            clamping_max: logodds(0.971),
            occupancy_threshold: 0.0,
        }
    }
}

fn validate_params(params: &OccupancyParams) -> Result<(), OcTreeError> {
    let in_unit_interval = |p: f32| p > 0.0 && p < 1.0;
    if !in_unit_interval(params.prob_hit) {
        return Err(OcTreeError::InvalidConfig(format!(
            "prob_hit must be in (0, 1), got {}",
            params.prob_hit
        )));
    }
    if !in_unit_interval(params.prob_miss) {
        return Err(OcTreeError::InvalidConfig(format!(
            "prob_miss must be in (0, 1), got {}",
            params.prob_miss
        )));
    }
    if params.clamping_min >= params.clamping_max {
        return Err(OcTreeError::InvalidConfig(format!(
            "clamping_min ({}) must be less than clamping_max ({})",
            params.clamping_min, params.clamping_max
        )));
    }
    Ok(())
}

/// Construction parameters for an [`OccupancyMap`]: the tree's metric
/// resolution and depth, plus its fusion thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeConfig {
    pub resolution: f32,
    pub depth: u8,
    pub params: OccupancyParams,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            resolution: 0.1,
            depth: DEFAULT_TREE_DEPTH,
            params: OccupancyParams::default(),
        }
    }
}

/// A probabilistic 3D occupancy map. Generic over the sharing policy `S`;
/// `CowDisabled` (the default) gives conventional value semantics,
/// `CowEnabled` gives O(1) cloning with lazy, node-granular divergence.
#[derive(Clone)]
pub struct OccupancyMap<S: Sharing<LogOdds> = CowDisabled> {
    tree: Octree<LogOdds, S>,
    params: OccupancyParams,
}

impl<S: Sharing<LogOdds>> OccupancyMap<S> {
    pub fn new(config: TreeConfig) -> Result<Self, OcTreeError> {
        validate_params(&config.params)?;
        let tree = Octree::new(config.resolution, config.depth)?;
        Ok(Self {
            tree,
            params: config.params,
        })
    }

    pub fn with_resolution(resolution: f32, depth: u8) -> Result<Self, OcTreeError> {
        Self::new(TreeConfig {
            resolution,
            depth,
            params: OccupancyParams::default(),
        })
    }

    pub fn resolution(&self) -> f32 {
        self.tree.resolution()
    }

    pub fn set_resolution(&mut self, resolution: f32) -> Result<(), OcTreeError> {
        self.tree.set_resolution(resolution)
    }

    pub fn depth(&self) -> u8 {
        self.tree.depth()
    }

    pub fn params(&self) -> OccupancyParams {
        self.params
    }

    pub fn set_prob_hit(&mut self, prob_hit: f32) -> Result<(), OcTreeError> {
        let mut params = self.params;
        params.prob_hit = prob_hit;
        validate_params(&params)?;
        self.params = params;
        Ok(())
    }

    pub fn set_prob_miss(&mut self, prob_miss: f32) -> Result<(), OcTreeError> {
        let mut params = self.params;
        params.prob_miss = prob_miss;
        validate_params(&params)?;
        self.params = params;
        Ok(())
    }

    pub fn set_clamping_thresholds(
        &mut self,
        clamping_min: f32,
        clamping_max: f32,
    ) -> Result<(), OcTreeError> {
        let mut params = self.params;
        params.clamping_min = clamping_min;
        params.clamping_max = clamping_max;
        validate_params(&params)?;
        self.params = params;
        Ok(())
    }

    pub fn set_occupancy_threshold(&mut self, threshold: f32) {
        self.params.occupancy_threshold = threshold;
    }

    fn hit_delta(&self) -> f32 {
        logodds(self.params.prob_hit)
    }

    fn miss_delta(&self) -> f32 {
        logodds(self.params.prob_miss)
    }

    /// Looks up the leaf covering `coord`. `None` if `coord` is out of range
    /// or no node has been created along that path yet.
    pub fn search(&self, coord: V3c<f32>) -> Option<LogOdds> {
        let key = coord_to_key(coord, self.resolution(), self.depth())?;
        self.tree.search(key).copied()
    }

    pub(crate) fn raw_search(&self, key: VoxelKey) -> Option<&LogOdds> {
        self.tree.search(key)
    }

    /// `node.log_odds >= occupancy_threshold`. `None` when the voxel is
    /// unknown or `coord` is out of range.
    pub fn is_occupied(&self, coord: V3c<f32>) -> Option<bool> {
        self.search(coord)
            .map(|v| v.value() >= self.params.occupancy_threshold)
    }

    /// Applies a single hit or miss fusion update to the voxel containing
    /// `coord`, clamped to `[clamping_min, clamping_max]`. Returns the
    /// resulting value, or `None` if `coord` is out of range.
    pub fn update_node(&mut self, coord: V3c<f32>, hit: bool) -> Option<LogOdds> {
        let key = coord_to_key(coord, self.resolution(), self.depth())?;
        let delta = if hit {
            self.hit_delta()
        } else {
            self.miss_delta()
        };
        let (min, max) = (self.params.clamping_min, self.params.clamping_max);
        Some(
            self.tree
                .update_node_at_key(key, move |v| LogOdds::new((v.value() + delta).clamp(min, max))),
        )
    }

    /// Raycasts from `origin` to `endpoint`, applying a miss update to
    /// every voxel traversed along the way and a hit update at `endpoint`.
    /// Returns `false` without modifying the tree if either point is out of
    /// range.
    pub fn insert_ray(&mut self, origin: V3c<f32>, endpoint: V3c<f32>) -> bool {
        let Some((traversed, end_key)) =
            raycasting::voxels_along_ray(origin, endpoint, self.resolution(), self.depth())
        else {
            return false;
        };
        let miss_delta = self.miss_delta();
        let (min, max) = (self.params.clamping_min, self.params.clamping_max);
        for key in traversed {
            self.tree
                .update_node_at_key(key, move |v| LogOdds::new((v.value() + miss_delta).clamp(min, max)));
        }
        let hit_delta = self.hit_delta();
        self.tree
            .update_node_at_key(end_key, move |v| LogOdds::new((v.value() + hit_delta).clamp(min, max)));
        true
    }

    /// Inserts rays from a common `origin` to every point in `points`.
    /// Traversed (miss) and endpoint (hit) keys are deduplicated first, so
    /// a voxel crossed by several rays or hit by several points is only
    /// updated once; a hit always wins over a miss at the same key.
    pub fn insert_pointcloud(&mut self, origin: V3c<f32>, points: &[V3c<f32>]) {
        let mut hit_keys = HashSet::new();
        let mut miss_keys = HashSet::new();
        for &point in points {
            let Some((traversed, end_key)) =
                raycasting::voxels_along_ray(origin, point, self.resolution(), self.depth())
            else {
                continue;
            };
            miss_keys.extend(traversed);
            hit_keys.insert(end_key);
        }
        miss_keys.retain(|k| !hit_keys.contains(k));

        let miss_delta = self.miss_delta();
        let hit_delta = self.hit_delta();
        let (min, max) = (self.params.clamping_min, self.params.clamping_max);
        for key in miss_keys {
            self.tree
                .update_node_at_key(key, move |v| LogOdds::new((v.value() + miss_delta).clamp(min, max)));
        }
        for key in hit_keys {
            self.tree
                .update_node_at_key(key, move |v| LogOdds::new((v.value() + hit_delta).clamp(min, max)));
        }
    }

    /// 3D DDA raycast along `ray` (expected, but not required, to carry a
    /// unit direction — see [`Ray::is_valid`]). Returns `(true, hit_coord)`
    /// on an occupied voxel, `(false, last_coord)` on a miss, range
    /// exhaustion, leaving world bounds, or (unless `ignore_unknown`) an
    /// unmapped voxel.
    pub fn raycast(&self, ray: Ray, max_range: f32, ignore_unknown: bool) -> (bool, V3c<f32>) {
        raycasting::cast_ray(self, ray.origin, ray.direction, max_range, ignore_unknown)
    }

    pub fn prune_tree(&mut self) -> usize {
        self.tree.prune_tree()
    }

    pub fn expand_tree(&mut self) {
        self.tree.expand_tree()
    }

    pub fn num_nodes(&self) -> usize {
        self.tree.num_nodes()
    }

    pub fn num_leaves(&self) -> usize {
        self.tree.num_leaves()
    }

    pub fn num_unique_nodes(&self) -> usize {
        self.tree.num_unique_nodes()
    }

    pub fn num_unique_leaves(&self) -> usize {
        self.tree.num_unique_leaves()
    }

    pub fn iter(&self) -> crate::octree::TreeIter<'_, LogOdds> {
        self.tree.iter()
    }

    pub fn leaves(&self) -> crate::octree::LeafIter<'_, LogOdds> {
        self.tree.leaves()
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), OcTreeError> {
        serialization::write(self, w)
    }

    pub fn read<R: Read>(r: &mut R, depth: u8) -> Result<Self, OcTreeError> {
        serialization::read(r, depth)
    }

    #[cfg(feature = "bytecode")]
    pub fn write_binary<W: Write>(&self, w: &mut W) -> Result<(), OcTreeError> {
        serialization::write_binary(self, w)
    }

    #[cfg(feature = "bytecode")]
    pub fn read_binary<R: Read>(r: &mut R, depth: u8) -> Result<Self, OcTreeError> {
        serialization::read_binary(r, depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::octree::CowEnabled;

    #[test]
    fn test_logodds_probability_round_trip() {
        let l = LogOdds::new(logodds(0.7));
        assert!((l.probability() - 0.7).abs() < 0.0001);
    }

    #[test]
    fn test_update_node_hit_then_search() {
        let mut map = OccupancyMap::<CowDisabled>::with_resolution(0.1, 8).unwrap();
        let coord = V3c::new(0.05, 0.05, 0.05);
        map.update_node(coord, true);
        let v = map.search(coord).unwrap();
        assert!((v.value() - logodds(0.7)).abs() < 0.0001);
        assert_eq!(map.is_occupied(coord), Some(true));
    }

    #[test]
    fn test_repeated_misses_clamp() {
        let mut map = OccupancyMap::<CowDisabled>::with_resolution(0.1, 8).unwrap();
        let coord = V3c::new(0.05, 0.05, 0.05);
        map.update_node(coord, true);
        for _ in 0..20 {
            map.update_node(coord, false);
        }
        let v = map.search(coord).unwrap();
        assert!((v.value() - map.params().clamping_min).abs() < 1e-6);
        assert_eq!(map.is_occupied(coord), Some(false));
    }

    #[test]
    fn test_out_of_range_reports_none_and_false() {
        let mut map = OccupancyMap::<CowDisabled>::with_resolution(0.1, 4).unwrap();
        let far = V3c::unit(1000.0);
        assert!(map.search(far).is_none());
        assert!(map.update_node(far, true).is_none());
        assert!(!map.insert_ray(V3c::new(0., 0., 0.), far));
    }

    #[test]
    fn test_insert_ray_marks_miss_and_hit() {
        let mut map = OccupancyMap::<CowDisabled>::with_resolution(0.05, 10).unwrap();
        let origin = V3c::new(0., 0., 0.);
        let endpoint = V3c::new(0.5, 0., 0.);
        assert!(map.insert_ray(origin, endpoint));
        assert_eq!(map.is_occupied(endpoint), Some(true));
        let midpoint = V3c::new(0.2, 0., 0.);
        assert_eq!(map.is_occupied(midpoint), Some(false));
    }

    #[test]
    fn test_insert_pointcloud_hit_wins_over_miss() {
        let mut map = OccupancyMap::<CowDisabled>::with_resolution(0.1, 8).unwrap();
        let origin = V3c::new(0., 0., 0.);
        // two points whose ray to the second passes through the first.
        let near = V3c::new(0.15, 0., 0.);
        let far = V3c::new(0.35, 0., 0.);
        map.insert_pointcloud(origin, &[near, far]);
        assert_eq!(map.is_occupied(near), Some(true));
        assert_eq!(map.is_occupied(far), Some(true));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(OccupancyMap::<CowDisabled>::new(TreeConfig {
            resolution: 0.1,
            depth: 16,
            params: OccupancyParams {
                prob_hit: 1.5,
                ..Default::default()
            },
        })
        .is_err());
    }

    #[test]
    fn test_cow_enabled_snapshot_independence() {
        let mut map = OccupancyMap::<CowEnabled>::with_resolution(0.1, 8).unwrap();
        let coord = V3c::new(0.05, 0.05, 0.05);
        map.update_node(coord, true);
        let snapshot = map.clone();
        for _ in 0..5 {
            map.update_node(coord, false);
        }
        assert_eq!(snapshot.search(coord).unwrap(), LogOdds::new(logodds(0.7)));
        assert_ne!(map.search(coord).unwrap(), snapshot.search(coord).unwrap());
    }
}
