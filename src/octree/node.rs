use std::rc::Rc;

use super::payload::Payload;

pub(crate) type ChildSlot<T> = Option<Rc<Node<T>>>;

/// A single octree node: a value, and either no children (a leaf) or a full
/// 8-slot child array (slots may still be individually empty).
///
/// `Node` derives `Clone` so that a child array of `Option<Rc<Node<T>>>`
/// clones one level deep for free: the `value` is cloned, and each child
/// pointer is cloned as a cheap refcount bump, not a recursive structural
/// copy. That one-level clone is exactly what `Rc::make_mut` needs to
/// re-establish uniqueness on a shared node without disturbing its children.
#[derive(Clone)]
pub struct Node<T: Payload> {
    pub(crate) value: T,
    pub(crate) children: Option<Box<[ChildSlot<T>; 8]>>,
}

impl<T: Payload> Node<T> {
    pub fn new_leaf(value: T) -> Self {
        Self {
            value,
            children: None,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub(crate) fn set_value(&mut self, value: T) {
        self.value = value;
    }

    /// Installs an already-built child directly into slot `i`, overwriting
    /// whatever was there. Used by deserialization, which constructs whole
    /// subtrees bottom-up rather than descending through `create_child`.
    pub(crate) fn set_child(&mut self, i: usize, child: Node<T>) {
        let children = self
            .children
            .get_or_insert_with(|| Box::new(Default::default()));
        children[i] = Some(Rc::new(child));
    }

    /// True iff the child array is allocated *and* at least one slot is
    /// occupied. An array allocated but left all-`None` (e.g. after deleting
    /// every child) does not count — a node is a leaf whenever it has no
    /// actual children, regardless of whether the backing array exists.
    pub fn has_children(&self) -> bool {
        self.children
            .as_ref()
            .is_some_and(|c| c.iter().any(Option::is_some))
    }

    pub fn child_exists(&self, i: usize) -> bool {
        self.children
            .as_ref()
            .map(|c| c[i].is_some())
            .unwrap_or(false)
    }

    /// Read-only; never touches refcounts.
    pub fn get_const_child(&self, i: usize) -> Option<&Rc<Node<T>>> {
        self.children.as_ref().and_then(|c| c[i].as_ref())
    }

    /// Requires the caller already made `self` unique (by calling
    /// `Rc::make_mut` on the slot that owns it). Allocates the child array
    /// if absent and installs a fresh default leaf in slot `i`, which must
    /// have been empty.
    pub fn create_child(&mut self, i: usize) -> &mut Rc<Node<T>> {
        let children = self
            .children
            .get_or_insert_with(|| Box::new(Default::default()));
        debug_assert!(children[i].is_none(), "create_child on occupied slot");
        children[i] = Some(Rc::new(Node::new_leaf(T::default())));
        children[i].as_mut().unwrap()
    }

    /// Mutable access to an existing child slot. Does *not* itself call
    /// `Rc::make_mut`; callers descending through this slot are expected to
    /// do so themselves before mutating through it.
    pub fn get_child_mut(&mut self, i: usize) -> Option<&mut Rc<Node<T>>> {
        self.children.as_mut().and_then(|c| c[i].as_mut())
    }

    /// Clears slot `i`. Drops the child array entirely once no slot is
    /// occupied, so `has_children()` reports `false` again.
    pub fn delete_child(&mut self, i: usize) {
        if let Some(children) = self.children.as_mut() {
            children[i] = None;
            if children.iter().all(Option::is_none) {
                self.children = None;
            }
        }
    }

    /// True iff all 8 children exist, are themselves leaves, and carry an
    /// equal value.
    pub fn collapsible(&self) -> bool {
        let Some(children) = self.children.as_ref() else {
            return false;
        };
        let mut iter = children.iter();
        let Some(first) = iter.next().and_then(|c| c.as_ref()) else {
            return false;
        };
        if first.has_children() {
            return false;
        }
        for slot in iter {
            let Some(child) = slot.as_ref() else {
                return false;
            };
            if child.has_children() || child.value != first.value {
                return false;
            }
        }
        true
    }

    /// If collapsible, copies the common child value into `self.value`,
    /// drops all 8 children, and returns true. Otherwise a no-op.
    pub fn prune(&mut self) -> bool {
        if !self.collapsible() {
            return false;
        }
        let common = self.children.as_ref().unwrap()[0]
            .as_ref()
            .unwrap()
            .value
            .clone();
        self.value = common;
        self.children = None;
        true
    }

    /// Requires `self` is a leaf. Creates 8 children, each seeded from
    /// `self.value` via `Payload::split_on_expand`.
    pub fn expand(&mut self) {
        debug_assert!(!self.has_children(), "expand on an already-internal node");
        let mut children: [ChildSlot<T>; 8] = Default::default();
        for slot in children.iter_mut() {
            *slot = Some(Rc::new(Node::new_leaf(self.value.split_on_expand())));
        }
        self.children = Some(Box::new(children));
    }

    /// Existing (non-empty) child slots, in index order. Used by the tree
    /// base's counting and traversal helpers, which need `Rc` references
    /// (not just `&Node`) to inspect `Rc::strong_count`.
    pub(crate) fn get_children_for_counting(&self) -> impl Iterator<Item = &Rc<Node<T>>> {
        self.children
            .as_ref()
            .into_iter()
            .flat_map(|c| c.iter())
            .filter_map(|slot| slot.as_ref())
    }

    /// Full recursive value copy, used by `CowDisabled::clone_node`.
    pub(crate) fn deep_clone(&self) -> Node<T> {
        Node {
            value: self.value.clone(),
            children: self.children.as_ref().map(|c| {
                let mut new_children: [ChildSlot<T>; 8] = Default::default();
                for (dst, src) in new_children.iter_mut().zip(c.iter()) {
                    *dst = src.as_ref().map(|child| Rc::new(child.deep_clone()));
                }
                Box::new(new_children)
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::LogOdds;

    #[test]
    fn test_leaf_has_no_children() {
        let n = Node::<LogOdds>::new_leaf(LogOdds::default());
        assert!(!n.has_children());
        assert!(!n.child_exists(0));
    }

    #[test]
    fn test_create_and_delete_child() {
        let mut n = Node::<LogOdds>::new_leaf(LogOdds::default());
        n.create_child(3);
        assert!(n.child_exists(3));
        assert!(!n.child_exists(0));
        assert!(n.has_children());
        n.delete_child(3);
        assert!(!n.child_exists(3));
        assert!(!n.has_children());
    }

    #[test]
    fn test_collapsible_and_prune() {
        let mut n = Node::<LogOdds>::new_leaf(LogOdds::new(0.5));
        n.expand();
        assert!(n.collapsible());
        assert!(n.prune());
        assert!(!n.has_children());
        assert_eq!(*n.value(), LogOdds::new(0.5));
    }

    #[test]
    fn test_not_collapsible_when_children_differ() {
        let mut n = Node::<LogOdds>::new_leaf(LogOdds::new(0.0));
        n.expand();
        {
            let child = n.get_child_mut(0).unwrap();
            std::rc::Rc::make_mut(child).value = LogOdds::new(1.0);
        }
        assert!(!n.collapsible());
        assert!(!n.prune());
    }
}
