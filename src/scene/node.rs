//! Node handles with generational indices
//!
//! Scene nodes are addressed by lightweight ids. The generational index
//! pattern prevents dangling references: each slot has a generation counter
//! that increments when the slot is reused, so a handle to a deleted joint
//! can never alias a node that later reuses its slot. Rig metadata that
//! must survive deletion (part membership, container bindings) is keyed by
//! name instead and re-resolved on use.

use serde::{Deserialize, Serialize};

/// A unique identifier for a scene node.
///
/// Consists of an index (which slot in the node arrays) and a generation
/// (which version of that slot). Two ids with the same index but different
/// generations refer to different nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Should only be called by NodeAllocator (and scene deserialization).
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Get the index of this node (for storage access).
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Get the generation of this node.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// A null/invalid node reference.
    pub const NULL: NodeId = NodeId { index: u32::MAX, generation: 0 };

    /// Check if this is the null node.
    pub fn is_null(&self) -> bool {
        self.index == u32::MAX
    }
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId::NULL
    }
}

/// Allocates and tracks node lifetimes.
///
/// Manages a pool of node slots, reusing freed slots with incremented
/// generations to prevent dangling references.
#[derive(Debug, Default)]
pub struct NodeAllocator {
    /// Generation counter for each slot
    generations: Vec<u32>,
    /// Free slots available for reuse (LIFO for cache friendliness)
    free_indices: Vec<u32>,
    /// Next fresh index if no free slots available
    next_fresh: u32,
    /// Number of currently alive nodes
    alive_count: u32,
}

impl NodeAllocator {
    /// Create a new allocator with no nodes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new node id.
    pub fn allocate(&mut self) -> NodeId {
        self.alive_count += 1;

        if let Some(index) = self.free_indices.pop() {
            // Reuse a freed slot - generation was already incremented on free
            NodeId::new(index, self.generations[index as usize])
        } else {
            let index = self.next_fresh;
            self.next_fresh += 1;
            self.generations.push(0);
            NodeId::new(index, 0)
        }
    }

    /// Free a node, making its slot available for reuse.
    /// Returns true if the node was alive and is now freed.
    pub fn free(&mut self, node: NodeId) -> bool {
        if !self.is_alive(node) {
            return false;
        }

        // Increment generation to invalidate existing references
        self.generations[node.index as usize] += 1;
        self.free_indices.push(node.index);
        self.alive_count -= 1;
        true
    }

    /// Check if a node is currently alive.
    pub fn is_alive(&self, node: NodeId) -> bool {
        if node.is_null() {
            return false;
        }
        let idx = node.index as usize;
        idx < self.generations.len() && self.generations[idx] == node.generation
    }

    /// Get the number of currently alive nodes.
    pub fn alive_count(&self) -> u32 {
        self.alive_count
    }

    /// Get the total capacity (highest index ever allocated + 1).
    pub fn capacity(&self) -> u32 {
        self.next_fresh
    }

    /// Current generation of a slot (what an alive node there would carry).
    pub(crate) fn generation_at(&self, index: u32) -> u32 {
        self.generations.get(index as usize).copied().unwrap_or(0)
    }

    /// Restore a slot at a specific index/generation (scene file load).
    /// Panics if the slot is already alive.
    pub(crate) fn restore(&mut self, index: u32, generation: u32) -> NodeId {
        let idx = index as usize;
        if idx >= self.generations.len() {
            self.generations.resize(idx + 1, 0);
            // Everything between the old end and the new slot is free
            for i in self.next_fresh..index {
                self.free_indices.push(i);
            }
            self.next_fresh = index + 1;
        } else {
            assert!(
                self.free_indices.contains(&index),
                "restore into live slot {}",
                index
            );
            self.free_indices.retain(|&i| i != index);
        }
        self.generations[idx] = generation;
        self.alive_count += 1;
        NodeId::new(index, generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_free() {
        let mut alloc = NodeAllocator::new();

        let a = alloc.allocate();
        let b = alloc.allocate();
        assert_eq!(alloc.alive_count(), 2);
        assert!(alloc.is_alive(a));
        assert!(alloc.is_alive(b));

        alloc.free(a);
        assert_eq!(alloc.alive_count(), 1);
        assert!(!alloc.is_alive(a));
        assert!(alloc.is_alive(b));
    }

    #[test]
    fn test_generation_prevents_reuse_collision() {
        let mut alloc = NodeAllocator::new();

        let a = alloc.allocate();
        let old_gen = a.generation();
        alloc.free(a);

        // Allocate again - should reuse slot 0 but with new generation
        let b = alloc.allocate();
        assert_eq!(b.index(), a.index());
        assert_ne!(b.generation(), old_gen);

        assert!(!alloc.is_alive(a));
        assert!(alloc.is_alive(b));
    }

    #[test]
    fn test_null_node() {
        let alloc = NodeAllocator::new();
        assert!(!alloc.is_alive(NodeId::NULL));
        assert!(NodeId::NULL.is_null());
    }

    #[test]
    fn test_restore_after_gap() {
        let mut alloc = NodeAllocator::new();
        let a = alloc.restore(3, 2);
        assert!(alloc.is_alive(a));
        assert_eq!(alloc.capacity(), 4);
        // The skipped slots are allocatable
        let b = alloc.allocate();
        assert!(b.index() < 3);
    }
}
