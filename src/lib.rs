//! Sparse, copy-on-write octree for probabilistic 3D occupancy mapping.
//!
//! Measurements (origin/endpoint rays) are fused into leaf log-odds values
//! in O(log N) per visited cell. Trees support O(1) cloning via an optional
//! copy-on-write sharing layer, raycasting, pruning/expansion of uniform
//! subtrees, and a compact binary serialization format.

pub mod error;
pub mod occupancy;
pub mod octree;
pub mod spatial;

pub use error::OcTreeError;
pub use occupancy::{logodds, LogOdds, OccupancyMap, OccupancyParams, TreeConfig};
pub use octree::{CowDisabled, CowEnabled, Octree, Payload, Sharing};
pub use spatial::math::{VoxelKey, V3c};
pub use spatial::raytracing::Ray;
