use super::node::Node;
use super::payload::Payload;
use crate::spatial::math::{child_key, VoxelKey};

/// Pre-order, read-only traversal yielding every node (internal and leaf)
/// together with its canonical key and depth from root. A plain `Iterator`,
/// so `take_while`/`find`/early `break` all work without extra plumbing.
pub struct TreeIter<'a, T: Payload> {
    stack: Vec<(&'a Node<T>, VoxelKey, u8)>,
    depth: u8,
}

impl<'a, T: Payload> TreeIter<'a, T> {
    pub(crate) fn new(root: Option<&'a Node<T>>, root_key: VoxelKey, depth: u8) -> Self {
        Self {
            stack: root.into_iter().map(|n| (n, root_key, 0)).collect(),
            depth,
        }
    }
}

impl<'a, T: Payload> Iterator for TreeIter<'a, T> {
    type Item = (VoxelKey, u8, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let (node, key, d) = self.stack.pop()?;
        if let Some(children) = node.children.as_ref() {
            for i in (0..8).rev() {
                if let Some(child) = children[i].as_ref() {
                    let child_key = child_key(key, i, self.depth, d);
                    self.stack.push((child.as_ref(), child_key, d + 1));
                }
            }
        }
        Some((key, d, node.value()))
    }
}

/// Like [`TreeIter`] but yields only leaves.
pub struct LeafIter<'a, T: Payload> {
    stack: Vec<(&'a Node<T>, VoxelKey, u8)>,
    depth: u8,
}

impl<'a, T: Payload> LeafIter<'a, T> {
    pub(crate) fn new(root: Option<&'a Node<T>>, root_key: VoxelKey, depth: u8) -> Self {
        Self {
            stack: root.into_iter().map(|n| (n, root_key, 0)).collect(),
            depth,
        }
    }
}

impl<'a, T: Payload> Iterator for LeafIter<'a, T> {
    type Item = (VoxelKey, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((node, key, d)) = self.stack.pop() {
            match node.children.as_ref() {
                None => return Some((key, node.value())),
                Some(children) => {
                    for i in (0..8).rev() {
                        if let Some(child) = children[i].as_ref() {
                            let child_key = child_key(key, i, self.depth, d);
                            self.stack.push((child.as_ref(), child_key, d + 1));
                        }
                    }
                }
            }
        }
        None
    }
}
