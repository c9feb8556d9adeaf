//! Three-dimensional DDA (digital differential analyzer): steps a ray
//! voxel-by-voxel at leaf-resolution granularity, visiting every cell the
//! ray's line passes through exactly once.

use super::OccupancyMap;
use crate::octree::Sharing;
use crate::occupancy::LogOdds;
use crate::spatial::math::{coord_to_key, key_to_coord, tree_max_val, V3c, VoxelKey};

/// Per-axis step/`t_max`/`t_delta` setup for one axis of the DDA. Axes
/// where `dir_c == 0` never cross a voxel boundary, so they get `step = 0`
/// and `t_max = t_delta = +inf` and are never chosen by the traversal loop.
fn axis_setup(origin_c: f32, dir_c: f32, start_component: i32, resolution: f32, max_val: f32) -> (i32, f32, f32) {
    if dir_c == 0.0 {
        return (0, f32::INFINITY, f32::INFINITY);
    }
    let step = if dir_c > 0.0 { 1 } else { -1 };
    let voxel_min = (start_component as f32 - max_val) * resolution;
    let boundary = if step > 0 {
        voxel_min + resolution
    } else {
        voxel_min
    };
    (step, (boundary - origin_c) / dir_c, resolution / dir_c.abs())
}

/// Picks the axis with the smallest `t_max`; ties break toward the smaller
/// axis index (x, then y, then z), making traversal order deterministic.
fn smallest_axis(t_max: &[f32; 3]) -> usize {
    if t_max[0] <= t_max[1] && t_max[0] <= t_max[2] {
        0
    } else if t_max[1] <= t_max[2] {
        1
    } else {
        2
    }
}

/// Walks the DDA grid from `origin` to `endpoint`, collecting every voxel
/// key strictly between them (exclusive of both, in traversal order) along
/// with the endpoint's own key. `None` if either point is out of range.
pub(super) fn voxels_along_ray(
    origin: V3c<f32>,
    endpoint: V3c<f32>,
    resolution: f32,
    depth: u8,
) -> Option<(Vec<VoxelKey>, VoxelKey)> {
    let start_key = coord_to_key(origin, resolution, depth)?;
    let end_key = coord_to_key(endpoint, resolution, depth)?;
    if start_key == end_key {
        return Some((Vec::new(), end_key));
    }

    let max_val = tree_max_val(depth) as f32;
    let grid_max = (max_val * 2.0) as i32;
    let direction = endpoint - origin;
    let dir = [direction.x, direction.y, direction.z];
    let origin_c = [origin.x, origin.y, origin.z];

    let mut comp = [start_key.x as i32, start_key.y as i32, start_key.z as i32];
    let mut step = [0i32; 3];
    let mut t_max = [f32::INFINITY; 3];
    let mut t_delta = [f32::INFINITY; 3];
    for axis in 0..3 {
        let (s, tm, td) = axis_setup(origin_c[axis], dir[axis], comp[axis], resolution, max_val);
        step[axis] = s;
        t_max[axis] = tm;
        t_delta[axis] = td;
    }

    let mut visited = Vec::new();
    loop {
        let axis = smallest_axis(&t_max);
        let next = comp[axis] + step[axis];
        if next < 0 || next >= grid_max {
            break;
        }
        comp[axis] = next;
        t_max[axis] += t_delta[axis];

        let key = VoxelKey::new(comp[0] as u16, comp[1] as u16, comp[2] as u16);
        if key == end_key {
            break;
        }
        visited.push(key);
    }
    Some((visited, end_key))
}

/// Casts a ray from `origin` along `direction`, stopping at the first
/// occupied voxel, out-of-range coordinate, `max_range` (when nonzero)
/// exhaustion, or (unless `ignore_unknown`) unmapped voxel.
pub(super) fn cast_ray<S: Sharing<LogOdds>>(
    map: &OccupancyMap<S>,
    origin: V3c<f32>,
    direction: V3c<f32>,
    max_range: f32,
    ignore_unknown: bool,
) -> (bool, V3c<f32>) {
    let resolution = map.resolution();
    let depth = map.depth();
    let max_val = tree_max_val(depth) as f32;
    let grid_max = (max_val * 2.0) as i32;

    let Some(start_key) = coord_to_key(origin, resolution, depth) else {
        return (false, origin);
    };

    let dir = [direction.x, direction.y, direction.z];
    let origin_c = [origin.x, origin.y, origin.z];
    let mut comp = [start_key.x as i32, start_key.y as i32, start_key.z as i32];
    let mut step = [0i32; 3];
    let mut t_max = [f32::INFINITY; 3];
    let mut t_delta = [f32::INFINITY; 3];
    for axis in 0..3 {
        let (s, tm, td) = axis_setup(origin_c[axis], dir[axis], comp[axis], resolution, max_val);
        step[axis] = s;
        t_max[axis] = tm;
        t_delta[axis] = td;
    }

    loop {
        let axis = smallest_axis(&t_max);
        let next = comp[axis] + step[axis];
        if next < 0 || next >= grid_max {
            let key = VoxelKey::new(comp[0] as u16, comp[1] as u16, comp[2] as u16);
            return (false, key_to_coord(key, resolution, depth));
        }
        comp[axis] = next;
        t_max[axis] += t_delta[axis];

        let key = VoxelKey::new(comp[0] as u16, comp[1] as u16, comp[2] as u16);
        let coord = key_to_coord(key, resolution, depth);

        if max_range > 0.0 && (coord - origin).length() > max_range {
            return (false, coord);
        }

        match map.raw_search(key) {
            Some(value) if value.value() >= map.params().occupancy_threshold => {
                return (true, coord);
            }
            Some(_) => continue,
            None => {
                if ignore_unknown {
                    continue;
                }
                return (false, coord);
            }
        }
    }
}
