use std::rc::Rc;

use super::node::Node;
use super::payload::Payload;

/// Selects, at compile time, how `Octree::clone` duplicates a root.
///
/// This is a zero-sized marker type parameter rather than a runtime flag:
/// the compiler specializes `clone_node` away to nothing interesting at the
/// `CowDisabled` end. Re-establishing uniqueness on mutation (an
/// unconditional `Rc::make_mut` in the tree base) needs no variant of its
/// own at all, because a `CowDisabled` tree never creates a shared
/// reference to begin with.
pub trait Sharing<T: Payload>: Default {
    fn clone_node(node: &Rc<Node<T>>) -> Rc<Node<T>>;
}

/// No sharing: every `clone()` performs a full recursive value copy, so two
/// trees built this way never share an allocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct CowDisabled;

impl<T: Payload> Sharing<T> for CowDisabled {
    fn clone_node(node: &Rc<Node<T>>) -> Rc<Node<T>> {
        Rc::new(node.deep_clone())
    }
}

/// Copy-on-write sharing: `clone()` is an O(1) `Rc::clone` of the root;
/// subsequent mutation on either tree re-establishes uniqueness lazily via
/// `Rc::make_mut` along the path it descends.
#[derive(Debug, Default, Clone, Copy)]
pub struct CowEnabled;

impl<T: Payload> Sharing<T> for CowEnabled {
    fn clone_node(node: &Rc<Node<T>>) -> Rc<Node<T>> {
        Rc::clone(node)
    }
}
