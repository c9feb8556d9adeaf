//! The generic sparse octree: node storage, copy-on-write sharing, search,
//! mutation, pruning/expansion, iteration and counting. Generic over a
//! [`Payload`] type so a single tree base serves every node value kind.

mod iter;
mod node;
mod payload;
mod sharing;

pub use iter::{LeafIter, TreeIter};
pub use node::Node;
pub use payload::Payload;
pub use sharing::{CowDisabled, CowEnabled, Sharing};

use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::OcTreeError;
use crate::spatial::math::{child_index, child_key, tree_max_val, VoxelKey, DEFAULT_TREE_DEPTH};

/// A sparse octree over a cubic world volume, generic over its node payload
/// `T` and, via `S`, over whether cloning the tree shares structure (`CowEnabled`)
/// or deep-copies it (`CowDisabled`, the default).
pub struct Octree<T: Payload, S: Sharing<T> = CowDisabled> {
    root: Option<Rc<Node<T>>>,
    resolution: f32,
    depth: u8,
    _sharing: PhantomData<S>,
}

impl<T: Payload, S: Sharing<T>> Octree<T, S> {
    /// Builds an empty tree. `resolution` must be positive and `depth` must
    /// be in `1..=DEFAULT_TREE_DEPTH`; both are validated eagerly rather
    /// than left to panic later during key arithmetic. The upper bound
    /// comes from `VoxelKey`'s components being `u16`: `tree_max_val`
    /// silently truncates for any depth beyond that width.
    pub fn new(resolution: f32, depth: u8) -> Result<Self, OcTreeError> {
        if !(resolution > 0.0) {
            return Err(OcTreeError::InvalidConfig(format!(
                "resolution must be positive, got {resolution}"
            )));
        }
        if depth == 0 {
            return Err(OcTreeError::InvalidConfig(
                "depth must be at least 1".to_string(),
            ));
        }
        if depth > DEFAULT_TREE_DEPTH {
            return Err(OcTreeError::InvalidConfig(format!(
                "depth must be at most {DEFAULT_TREE_DEPTH} (VoxelKey components are u16), got {depth}"
            )));
        }
        tracing::debug!(resolution, depth, "creating octree");
        Ok(Self {
            root: None,
            resolution,
            depth,
            _sharing: PhantomData,
        })
    }

    pub fn resolution(&self) -> f32 {
        self.resolution
    }

    pub fn set_resolution(&mut self, resolution: f32) -> Result<(), OcTreeError> {
        if !(resolution > 0.0) {
            return Err(OcTreeError::InvalidConfig(format!(
                "resolution must be positive, got {resolution}"
            )));
        }
        self.resolution = resolution;
        Ok(())
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Canonical key of the root: the center of the whole virtual grid.
    fn root_key(&self) -> VoxelKey {
        let m = tree_max_val(self.depth) as u16;
        VoxelKey::new(m, m, m)
    }

    /// Read-only descent, selecting a child by [`child_index`] at each step.
    /// Returns the value of the first leaf encountered along the path
    /// (which may be shallower than the tree's full depth if the region was
    /// pruned), or `None` if a required child is missing.
    pub fn search(&self, key: VoxelKey) -> Option<&T> {
        let mut node = self.root.as_deref()?;
        let mut d = 0;
        while d < self.depth {
            if !node.has_children() {
                return Some(node.value());
            }
            let idx = child_index(key, self.depth, d);
            node = node.get_const_child(idx)?.as_ref();
            d += 1;
        }
        Some(node.value())
    }

    /// Descends root-to-leaf along `key`, re-establishing uniqueness on
    /// every slot it passes through (creating missing children as it goes),
    /// applies `update` to the leaf value, then refreshes every ancestor's
    /// value to `Payload::aggregate` of its existing children on the way
    /// back up. Returns the resulting leaf value.
    pub fn update_node_at_key(&mut self, key: VoxelKey, update: impl Fn(&T) -> T) -> T {
        if self.root.is_none() {
            self.root = Some(Rc::new(Node::new_leaf(T::default())));
        }
        let depth = self.depth;
        let root = self.root.as_mut().unwrap();
        update_recursive(root, key, depth, 0, &update)
    }

    /// Post-order traversal collapsing every subtree whose children are all
    /// leaves with an equal value. Runs until no more nodes collapse.
    /// Returns the number of nodes collapsed.
    pub fn prune_tree(&mut self) -> usize {
        let Some(root) = self.root.as_mut() else {
            return 0;
        };
        let mut total = 0;
        loop {
            let collapsed = prune_recursive(root);
            total += collapsed;
            if collapsed == 0 {
                break;
            }
        }
        tracing::debug!(collapsed = total, "pruned tree");
        total
    }

    /// Pre-order traversal that expands every leaf shallower than the
    /// tree's full depth.
    pub fn expand_tree(&mut self) {
        if self.root.is_none() {
            self.root = Some(Rc::new(Node::new_leaf(T::default())));
        }
        let depth = self.depth;
        let root = self.root.as_mut().unwrap();
        expand_recursive(root, depth, 0);
    }

    pub fn num_nodes(&self) -> usize {
        self.root.as_ref().map(count_nodes).unwrap_or(0)
    }

    pub fn num_leaves(&self) -> usize {
        self.root.as_ref().map(count_leaves).unwrap_or(0)
    }

    /// A node is unique iff `Rc::strong_count` on it is 1.
    pub fn num_unique_nodes(&self) -> usize {
        self.root.as_ref().map(count_unique_nodes).unwrap_or(0)
    }

    pub fn num_unique_leaves(&self) -> usize {
        self.root.as_ref().map(count_unique_leaves).unwrap_or(0)
    }

    /// Pre-order traversal over every node (internal and leaf), read-only.
    pub fn iter(&self) -> TreeIter<'_, T> {
        TreeIter::new(self.root.as_deref(), self.root_key(), self.depth)
    }

    /// Pre-order traversal over leaves only, read-only.
    pub fn leaves(&self) -> LeafIter<'_, T> {
        LeafIter::new(self.root.as_deref(), self.root_key(), self.depth)
    }

    /// Read-only access to the root node, for consumers (serialization)
    /// that need to walk the raw node shape rather than go through
    /// `search`/`iter`.
    pub(crate) fn root_node(&self) -> Option<&Node<T>> {
        self.root.as_deref()
    }

    /// Rebuilds a tree from an already-constructed root, as produced by a
    /// deserializer. `resolution`/`depth` are assumed already validated by
    /// the caller (they come from a previously-written, trusted header, or
    /// from another valid tree).
    pub(crate) fn from_parts(resolution: f32, depth: u8, root: Option<Node<T>>) -> Self {
        Self {
            root: root.map(Rc::new),
            resolution,
            depth,
            _sharing: PhantomData,
        }
    }

    /// Visits every leaf, mutably, in pre-order. Each node on the path to a
    /// visited leaf is made unique via `Rc::make_mut` before the closure
    /// runs, so mutating the yielded value never disturbs a co-owning tree.
    ///
    /// This is a visitor rather than a `std::iter::Iterator` because a
    /// lending iterator that hands out successive `&mut T` borrows into a
    /// tree cannot be expressed as a standard iterator without unsafe code;
    /// the visitor form gives the same capability using the same recursive
    /// style as the rest of the tree base.
    pub fn for_each_leaf_mut<F: FnMut(VoxelKey, &mut T)>(&mut self, mut f: F) {
        if let Some(root) = self.root.as_mut() {
            let depth = self.depth;
            let root_key = self.root_key();
            visit_leaf_mut(root, root_key, 0, depth, &mut f);
        }
    }
}

impl<T: Payload, S: Sharing<T>> Clone for Octree<T, S> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.as_ref().map(S::clone_node),
            resolution: self.resolution,
            depth: self.depth,
            _sharing: PhantomData,
        }
    }
}

fn update_recursive<T: Payload>(
    slot: &mut Rc<Node<T>>,
    key: VoxelKey,
    depth: u8,
    depth_from_root: u8,
    update: &impl Fn(&T) -> T,
) -> T {
    let node = Rc::make_mut(slot);
    if depth_from_root == depth {
        node.value = update(&node.value);
        return node.value.clone();
    }
    let idx = child_index(key, depth, depth_from_root);
    if !node.child_exists(idx) {
        node.create_child(idx);
    }
    let leaf_value = {
        let child_slot = node.get_child_mut(idx).unwrap();
        update_recursive(child_slot, key, depth, depth_from_root + 1, update)
    };
    let existing: Vec<&T> = (0..8)
        .filter_map(|i| node.get_const_child(i))
        .map(|c| c.value())
        .collect();
    node.value = T::aggregate(&existing);
    leaf_value
}

/// Read-only: true iff pruning `node` would collapse it, or would collapse
/// something reachable beneath it. Checked before `Rc::make_mut` so
/// `prune_recursive` never unshares a subtree that won't actually change.
fn needs_prune<T: Payload>(node: &Rc<Node<T>>) -> bool {
    node.collapsible() || node.get_children_for_counting().any(needs_prune)
}

fn prune_recursive<T: Payload>(slot: &mut Rc<Node<T>>) -> usize {
    if !needs_prune(slot) {
        return 0;
    }
    let node = Rc::make_mut(slot);
    let mut collapsed = 0;
    if let Some(children) = node.children.as_mut() {
        for child in children.iter_mut().flatten() {
            collapsed += prune_recursive(child);
        }
    }
    if node.prune() {
        collapsed += 1;
    }
    collapsed
}

/// Read-only: true iff expanding `node` (already `depth_from_root` below
/// root) would create or touch a node shallower than `depth`. Checked before
/// `Rc::make_mut` for the same reason as [`needs_prune`].
fn needs_expand<T: Payload>(node: &Rc<Node<T>>, depth: u8, depth_from_root: u8) -> bool {
    if depth_from_root >= depth {
        return false;
    }
    if !node.has_children() {
        return true;
    }
    node.get_children_for_counting()
        .any(|c| needs_expand(c, depth, depth_from_root + 1))
}

fn expand_recursive<T: Payload>(slot: &mut Rc<Node<T>>, depth: u8, depth_from_root: u8) {
    if !needs_expand(slot, depth, depth_from_root) {
        return;
    }
    let node = Rc::make_mut(slot);
    if !node.has_children() {
        node.expand();
    }
    if let Some(children) = node.children.as_mut() {
        for child in children.iter_mut().flatten() {
            expand_recursive(child, depth, depth_from_root + 1);
        }
    }
}

fn visit_leaf_mut<T: Payload, F: FnMut(VoxelKey, &mut T)>(
    slot: &mut Rc<Node<T>>,
    key: VoxelKey,
    depth_from_root: u8,
    depth: u8,
    f: &mut F,
) {
    let node = Rc::make_mut(slot);
    match node.children.as_mut() {
        None => f(key, &mut node.value),
        Some(children) => {
            for (i, child) in children.iter_mut().enumerate() {
                if let Some(child) = child.as_mut() {
                    let child_key = child_key(key, i, depth, depth_from_root);
                    visit_leaf_mut(child, child_key, depth_from_root + 1, depth, f);
                }
            }
        }
    }
}

fn count_nodes<T: Payload>(node: &Rc<Node<T>>) -> usize {
    1 + node
        .get_children_for_counting()
        .map(count_nodes)
        .sum::<usize>()
}

fn count_leaves<T: Payload>(node: &Rc<Node<T>>) -> usize {
    if node.has_children() {
        node.get_children_for_counting().map(count_leaves).sum()
    } else {
        1
    }
}

/// A node reachable only through a still-shared ancestor can itself have
/// `strong_count == 1` (nothing duplicated its own pointer yet), but it
/// isn't safe to mutate in place: reaching it at all required going through
/// a parent two trees still point at. So uniqueness below a shared node
/// doesn't count until that node diverges too — recursion stops the moment
/// `strong_count` says "shared", rather than checking each node in isolation.
fn count_unique_nodes<T: Payload>(node: &Rc<Node<T>>) -> usize {
    if Rc::strong_count(node) != 1 {
        return 0;
    }
    1 + node
        .get_children_for_counting()
        .map(count_unique_nodes)
        .sum::<usize>()
}

fn count_unique_leaves<T: Payload>(node: &Rc<Node<T>>) -> usize {
    if Rc::strong_count(node) != 1 {
        return 0;
    }
    if node.has_children() {
        node.get_children_for_counting()
            .map(count_unique_leaves)
            .sum()
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::LogOdds;

    fn key(v: u16) -> VoxelKey {
        VoxelKey::new(v, v, v)
    }

    #[test]
    fn test_new_rejects_bad_config() {
        assert!(Octree::<LogOdds, CowDisabled>::new(0.0, 16).is_err());
        assert!(Octree::<LogOdds, CowDisabled>::new(-1.0, 16).is_err());
        assert!(Octree::<LogOdds, CowDisabled>::new(0.1, 0).is_err());
        assert!(Octree::<LogOdds, CowDisabled>::new(0.1, 17).is_err());
        assert!(Octree::<LogOdds, CowDisabled>::new(0.1, 16).is_ok());
    }

    #[test]
    fn test_search_empty_tree() {
        let tree = Octree::<LogOdds, CowDisabled>::new(0.1, 8).unwrap();
        assert!(tree.search(key(1)).is_none());
    }

    #[test]
    fn test_update_then_search() {
        let mut tree = Octree::<LogOdds, CowDisabled>::new(0.1, 8).unwrap();
        let k = key(3);
        tree.update_node_at_key(k, |_| LogOdds::new(1.0));
        assert_eq!(*tree.search(k).unwrap(), LogOdds::new(1.0));
    }

    #[test]
    fn test_num_nodes_and_leaves_track_depth() {
        let mut tree = Octree::<LogOdds, CowDisabled>::new(0.1, 4).unwrap();
        tree.update_node_at_key(key(1), |_| LogOdds::new(1.0));
        assert_eq!(tree.num_leaves(), 1);
        assert_eq!(tree.num_nodes(), 1 + tree.depth() as usize);
    }

    #[test]
    fn test_clone_disabled_is_independent() {
        let mut t1 = Octree::<LogOdds, CowDisabled>::new(0.1, 4).unwrap();
        t1.update_node_at_key(key(1), |_| LogOdds::new(1.0));
        let t2 = t1.clone();
        t1.update_node_at_key(key(1), |_| LogOdds::new(-1.0));
        assert_eq!(*t2.search(key(1)).unwrap(), LogOdds::new(1.0));
        assert_eq!(*t1.search(key(1)).unwrap(), LogOdds::new(-1.0));
    }

    #[test]
    fn test_clone_enabled_shares_then_unshares() {
        let mut t1 = Octree::<LogOdds, CowEnabled>::new(0.1, 4).unwrap();
        t1.update_node_at_key(key(1), |_| LogOdds::new(1.0));
        let t2 = t1.clone();
        assert_eq!(t1.num_unique_nodes(), 0);
        assert_eq!(t2.num_unique_nodes(), 0);

        t1.update_node_at_key(key(1), |_| LogOdds::new(-1.0));
        assert_eq!(t1.num_unique_nodes(), t1.depth() as usize + 1);
        assert_eq!(*t2.search(key(1)).unwrap(), LogOdds::new(1.0));
        assert_eq!(*t1.search(key(1)).unwrap(), LogOdds::new(-1.0));
    }

    #[test]
    fn test_prune_tree_on_cow_enabled_only_unshares_changed_path() {
        let mut t1 = Octree::<LogOdds, CowEnabled>::new(0.1, 2).unwrap();
        for x in 0..2u16 {
            for y in 0..2u16 {
                for z in 0..2u16 {
                    t1.update_node_at_key(VoxelKey::new(x, y, z), |_| LogOdds::new(1.0));
                }
            }
        }
        t1.update_node_at_key(VoxelKey::new(3, 3, 3), |_| LogOdds::new(5.0));

        let t2 = t1.clone();
        assert_eq!(t1.num_unique_nodes(), 0);
        assert_eq!(t2.num_unique_nodes(), 0);

        let collapsed = t1.prune_tree();
        assert!(collapsed > 0);
        // the untouched octant around (3,3,3) never needed pruning, so it
        // stays shared with t2 instead of being unshared wholesale: both
        // trees end up with *some* nodes unique (the diverged path) and
        // some still shared (the untouched octant), never all-or-nothing.
        assert!(t1.num_unique_nodes() > 0);
        assert!(t1.num_unique_nodes() < t1.num_nodes());
        assert!(t2.num_unique_nodes() > 0);
        assert!(t2.num_unique_nodes() < t2.num_nodes());
        assert_eq!(*t2.search(VoxelKey::new(0, 0, 0)).unwrap(), LogOdds::new(1.0));
        assert_eq!(*t1.search(VoxelKey::new(3, 3, 3)).unwrap(), LogOdds::new(5.0));
    }

    #[test]
    fn test_expand_tree_on_cow_enabled_only_unshares_the_expanded_leaf() {
        let mut t1 = Octree::<LogOdds, CowEnabled>::new(0.1, 2).unwrap();
        for x in 0..2u16 {
            for y in 0..2u16 {
                for z in 0..2u16 {
                    t1.update_node_at_key(VoxelKey::new(x, y, z), |_| LogOdds::new(1.0));
                }
            }
        }
        t1.update_node_at_key(VoxelKey::new(3, 3, 3), |_| LogOdds::new(5.0));
        t1.prune_tree();

        let t2 = t1.clone();
        assert_eq!(t1.num_unique_nodes(), 0);
        assert_eq!(t2.num_unique_nodes(), 0);

        t1.expand_tree();
        // the (3,3,3) octant was already a single full-depth leaf and never
        // needed expanding, so it (and t2's view of it) stays shared.
        assert!(t1.num_unique_nodes() > 0);
        assert!(t1.num_unique_nodes() < t1.num_nodes());
        assert_eq!(*t2.search(VoxelKey::new(0, 0, 0)).unwrap(), LogOdds::new(1.0));
        assert_eq!(*t2.search(VoxelKey::new(3, 3, 3)).unwrap(), LogOdds::new(5.0));
        assert_eq!(*t1.search(VoxelKey::new(3, 3, 3)).unwrap(), LogOdds::new(5.0));
    }

    #[test]
    fn test_prune_collapses_uniform_subtree() {
        let mut tree = Octree::<LogOdds, CowDisabled>::new(0.1, 2).unwrap();
        for x in 0..4u16 {
            for y in 0..4u16 {
                for z in 0..4u16 {
                    tree.update_node_at_key(VoxelKey::new(x, y, z), |_| LogOdds::new(1.0));
                }
            }
        }
        let before = tree.num_nodes();
        let collapsed = tree.prune_tree();
        assert!(collapsed > 0);
        assert!(tree.num_nodes() < before);
        assert_eq!(*tree.search(VoxelKey::new(0, 0, 0)).unwrap(), LogOdds::new(1.0));
    }

    #[test]
    fn test_for_each_leaf_mut_visits_every_leaf() {
        let mut tree = Octree::<LogOdds, CowDisabled>::new(0.1, 2).unwrap();
        tree.update_node_at_key(key(0), |_| LogOdds::new(1.0));
        tree.update_node_at_key(key(3), |_| LogOdds::new(2.0));
        let mut seen = 0;
        tree.for_each_leaf_mut(|_, v| {
            *v = LogOdds::new(v.value() + 0.5);
            seen += 1;
        });
        assert_eq!(seen, tree.num_leaves());
    }
}
