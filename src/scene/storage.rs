//! Per-node data storage
//!
//! `NodeStore<T>` is a sparse array mapping node indices to data. Rig
//! scenes are small (hundreds of nodes), so simple Option-based sparse
//! storage beats anything cleverer and keeps iteration order stable:
//! slot order is creation order, which the part index allocator and the
//! provenance diff both rely on.

use super::node::NodeId;

/// Sparse storage for one kind of per-node data.
///
/// Uses Option<T> so there can be holes where nodes don't carry this
/// data. The index is the node's index (not generation); callers validate
/// liveness against the allocator where it matters.
#[derive(Debug, Default)]
pub struct NodeStore<T> {
    data: Vec<Option<T>>,
}

impl<T> NodeStore<T> {
    /// Create empty storage.
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    fn ensure_capacity(&mut self, index: usize) {
        if index >= self.data.len() {
            self.data.resize_with(index + 1, || None);
        }
    }

    /// Insert data for a node, replacing any existing value.
    pub fn insert(&mut self, node: NodeId, value: T) {
        let idx = node.index() as usize;
        self.ensure_capacity(idx);
        self.data[idx] = Some(value);
    }

    /// Remove a node's data, returning it if present.
    pub fn remove(&mut self, node: NodeId) -> Option<T> {
        let idx = node.index() as usize;
        if idx < self.data.len() {
            self.data[idx].take()
        } else {
            None
        }
    }

    /// Get a reference to a node's data.
    pub fn get(&self, node: NodeId) -> Option<&T> {
        let idx = node.index() as usize;
        self.data.get(idx).and_then(|opt| opt.as_ref())
    }

    /// Get a mutable reference to a node's data.
    pub fn get_mut(&mut self, node: NodeId) -> Option<&mut T> {
        let idx = node.index() as usize;
        self.data.get_mut(idx).and_then(|opt| opt.as_mut())
    }

    /// Check if a node has this data.
    pub fn contains(&self, node: NodeId) -> bool {
        let idx = node.index() as usize;
        idx < self.data.len() && self.data[idx].is_some()
    }

    /// Iterate over all (index, value) pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.data
            .iter()
            .enumerate()
            .filter_map(|(idx, opt)| opt.as_ref().map(|v| (idx as u32, v)))
    }

    /// Iterate mutably over all (index, value) pairs.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.data
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, opt)| opt.as_mut().map(|v| (idx as u32, v)))
    }

    /// Clear the data in a slot. Called when a node is deleted.
    pub fn clear_slot(&mut self, index: u32) {
        let idx = index as usize;
        if idx < self.data.len() {
            self.data[idx] = None;
        }
    }

    /// Number of nodes that have this data.
    pub fn count(&self) -> usize {
        self.data.iter().filter(|opt| opt.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut store: NodeStore<i32> = NodeStore::new();
        let node = NodeId::new(5, 0);

        store.insert(node, 42);
        assert_eq!(store.get(node), Some(&42));
        assert!(store.contains(node));
    }

    #[test]
    fn test_remove() {
        let mut store: NodeStore<i32> = NodeStore::new();
        let node = NodeId::new(3, 0);

        store.insert(node, 100);
        assert_eq!(store.remove(node), Some(100));
        assert!(!store.contains(node));
    }

    #[test]
    fn test_sparse_slots() {
        let mut store: NodeStore<i32> = NodeStore::new();

        let node = NodeId::new(100, 0);
        store.insert(node, 999);

        assert_eq!(store.get(node), Some(&999));
        assert!(!store.contains(NodeId::new(50, 0)));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_iteration_is_slot_ordered() {
        let mut store: NodeStore<&str> = NodeStore::new();

        store.insert(NodeId::new(5, 0), "five");
        store.insert(NodeId::new(0, 0), "zero");
        store.insert(NodeId::new(2, 0), "two");

        let items: Vec<_> = store.iter().collect();
        assert_eq!(items, vec![(0, &"zero"), (2, &"two"), (5, &"five")]);
    }
}
