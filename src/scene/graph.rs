//! Scene graph
//!
//! The Scene is the central container for everything the rig tools touch:
//! - node allocation and lifetime tracking
//! - hierarchy (parents/children) and local/world transforms
//! - per-node string metadata (the persisted attribute layer)
//! - dynamic attributes, attribute connections, and the dataflow utility
//!   nodes (compare, mirror) evaluated by eager push propagation
//! - parent constraints with weighted target lists
//!
//! Data is stored in typed fields rather than a HashMap<TypeId, ...>; the
//! set of node facets is known at compile time. All mutation is direct and
//! synchronous on `&mut Scene` - callers serialize, nothing here locks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::attr::{AttrDef, AttrValue, Channel, ChannelLocks, Transform};
use super::node::{NodeAllocator, NodeId};
use super::storage::NodeStore;
use crate::math::{
    euler_from_mat4, mat4_identity, mat4_mul, mat4_position, mat4_rigid_inverse, Mat4, Vec3,
};
use crate::spaces::SpaceBinding;
use crate::trigger::TriggerAnnotation;

/// Propagation depth cap. A legitimate rig dataflow chain is a handful of
/// hops (selector -> compare -> weight -> constraint); anything deeper is a
/// wiring cycle.
const MAX_PROPAGATION_DEPTH: u32 = 64;

/// What a node is. Utility kinds carry their evaluation config inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Plain transform (groups, space nodes, world container root)
    Transform,
    /// Skeleton joint
    Joint,
    /// Animator-facing control
    Control,
    /// Non-rendering helper (aim targets, up-vector hints)
    Locator,
    /// Rig container grouping one rig-part build
    Container,
    /// Named selection set (quick-select membership lives in metadata)
    SelectionSet,
    /// Dataflow compare: output = 1.0 when input == ordinal, else 0.0
    Compare,
    /// Dataflow mirror: copies in_* channels to out_* negating flipped axes
    MirrorTransform {
        flip_translation: [bool; 3],
        flip_rotation: [bool; 3],
    },
    /// Parent constraint anchor; weight attrs w0..wN live here
    Constraint,
}

/// One attribute-to-attribute dataflow link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub src: NodeId,
    pub src_attr: String,
    pub dst: NodeId,
    pub dst_attr: String,
}

/// A weighted target on a parent constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintTarget {
    pub target: NodeId,
    /// Driven-space offset captured when the target was added, so the
    /// driven node holds its pose at the moment of constraining.
    pub offset: Mat4,
}

/// Parent constraint record, keyed by its anchor node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentConstraint {
    pub driven: NodeId,
    pub targets: Vec<ConstraintTarget>,
}

/// The scene containing all nodes and their data.
pub struct Scene {
    allocator: NodeAllocator,

    names: NodeStore<String>,
    kinds: NodeStore<NodeKind>,
    locals: NodeStore<Transform>,
    parents: NodeStore<NodeId>,
    children: NodeStore<Vec<NodeId>>,
    locks: NodeStore<ChannelLocks>,
    /// Node-local string metadata - the persisted attribute layer
    metadata: NodeStore<BTreeMap<String, String>>,
    /// Dynamic typed attributes, ordered by creation
    attrs: NodeStore<Vec<AttrDef>>,

    /// Parent constraints keyed by their anchor node
    pub(crate) constraints: NodeStore<ParentConstraint>,
    /// Channels excluded from constraint writes, pinned to a literal.
    /// Keyed by the *driven* node.
    pub(crate) pinned: NodeStore<Vec<(Channel, f32)>>,

    /// Space-switch bindings keyed by the owning control
    pub(crate) spaces: NodeStore<SpaceBinding>,
    /// Trigger annotations keyed by the carrying node
    pub(crate) triggers: NodeStore<TriggerAnnotation>,

    connections: Vec<Connection>,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            allocator: NodeAllocator::new(),
            names: NodeStore::new(),
            kinds: NodeStore::new(),
            locals: NodeStore::new(),
            parents: NodeStore::new(),
            children: NodeStore::new(),
            locks: NodeStore::new(),
            metadata: NodeStore::new(),
            attrs: NodeStore::new(),
            constraints: NodeStore::new(),
            pinned: NodeStore::new(),
            spaces: NodeStore::new(),
            triggers: NodeStore::new(),
            connections: Vec::new(),
        }
    }

    // =========================================================================
    // Node lifecycle
    // =========================================================================

    /// Create a node. The requested name is made unique by numeric suffixing.
    pub fn spawn(&mut self, kind: NodeKind, name: &str) -> NodeId {
        let node = self.allocator.allocate();
        let unique = self.unique_name(name);
        self.names.insert(node, unique);
        self.locals.insert(node, Transform::IDENTITY);
        self.locks.insert(node, ChannelLocks::default());
        self.metadata.insert(node, BTreeMap::new());
        self.attrs.insert(node, Vec::new());
        self.kinds.insert(node, kind.clone());
        self.init_utility_attrs(node, &kind);
        node
    }

    /// Utility kinds come with their plumbing attrs pre-created so wiring
    /// can assume they exist.
    fn init_utility_attrs(&mut self, node: NodeId, kind: &NodeKind) {
        match kind {
            NodeKind::Compare => {
                self.add_attr(node, AttrDef::new("input", AttrValue::Float(0.0)).hidden());
                self.add_attr(node, AttrDef::new("ordinal", AttrValue::Int(0)).hidden());
                self.add_attr(node, AttrDef::new("output", AttrValue::Float(1.0)).hidden());
            }
            NodeKind::MirrorTransform { .. } => {
                for channel in Channel::ALL {
                    let in_name = format!("in_{}", channel.attr_name());
                    let out_name = format!("out_{}", channel.attr_name());
                    self.add_attr(node, AttrDef::new(&in_name, AttrValue::Float(0.0)).hidden());
                    self.add_attr(node, AttrDef::new(&out_name, AttrValue::Float(0.0)).hidden());
                }
            }
            _ => {}
        }
    }

    /// Restore a node with an exact id during scene load.
    pub(crate) fn spawn_restored(&mut self, index: u32, generation: u32, kind: NodeKind, name: String) -> NodeId {
        let node = self.allocator.restore(index, generation);
        self.names.insert(node, name);
        self.locals.insert(node, Transform::IDENTITY);
        self.locks.insert(node, ChannelLocks::default());
        self.metadata.insert(node, BTreeMap::new());
        self.attrs.insert(node, Vec::new());
        self.kinds.insert(node, kind);
        node
    }

    /// Delete a node and all its descendants. Connections, constraints and
    /// annotations touching the deleted nodes are dropped with them.
    pub fn delete(&mut self, node: NodeId) {
        if !self.allocator.free(node) {
            return; // Already dead
        }

        // Detach from parent's children list
        if let Some(parent) = self.parents.remove(node) {
            if let Some(siblings) = self.children.get_mut(parent) {
                siblings.retain(|&e| e != node);
            }
        }

        // Recursively delete children
        if let Some(child_list) = self.children.remove(node) {
            for child in child_list {
                self.delete(child);
            }
        }

        let idx = node.index();
        self.names.clear_slot(idx);
        self.kinds.clear_slot(idx);
        self.locals.clear_slot(idx);
        self.locks.clear_slot(idx);
        self.metadata.clear_slot(idx);
        self.attrs.clear_slot(idx);
        self.constraints.clear_slot(idx);
        self.pinned.clear_slot(idx);
        self.spaces.clear_slot(idx);
        self.triggers.clear_slot(idx);

        self.connections
            .retain(|c| c.src != node && c.dst != node);
        // Constraints elsewhere may have pointed at this node as a target;
        // drop those entries so evaluation never sees a dead id.
        for (_, pc) in self.constraints.iter_mut() {
            pc.targets.retain(|t| t.target != node);
        }
    }

    pub fn is_alive(&self, node: NodeId) -> bool {
        self.allocator.is_alive(node)
    }

    pub fn node_count(&self) -> u32 {
        self.allocator.alive_count()
    }

    /// All alive node ids in slot (creation) order.
    pub fn all_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.allocator.alive_count() as usize);
        for (idx, _) in self.names.iter() {
            let gen = self.generation_of(idx);
            out.push(NodeId::new(idx, gen));
        }
        out
    }

    /// Rebuild the full id for a storage slot index.
    pub(crate) fn id_at(&self, index: u32) -> NodeId {
        NodeId::new(index, self.generation_of(index))
    }

    fn generation_of(&self, index: u32) -> u32 {
        // Names exist only for alive nodes, so the allocator's current
        // generation for the slot is the node's generation.
        self.allocator.generation_at(index)
    }

    /// Snapshot of the alive node set, for before/after provenance diffs.
    pub fn node_set(&self) -> std::collections::HashSet<NodeId> {
        self.all_nodes().into_iter().collect()
    }

    pub fn kind(&self, node: NodeId) -> Option<&NodeKind> {
        self.kinds.get(node)
    }

    // =========================================================================
    // Names
    // =========================================================================

    pub fn name(&self, node: NodeId) -> &str {
        self.names.get(node).map(|s| s.as_str()).unwrap_or("")
    }

    /// Find an alive node by exact name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        for (idx, n) in self.names.iter() {
            if n == name {
                return Some(NodeId::new(idx, self.generation_of(idx)));
            }
        }
        None
    }

    /// Rename a node; the new name is made unique if taken.
    pub fn rename(&mut self, node: NodeId, name: &str) {
        if !self.is_alive(node) {
            return;
        }
        if self.name(node) == name {
            return;
        }
        let unique = self.unique_name(name);
        self.names.insert(node, unique);
    }

    fn unique_name(&self, base: &str) -> String {
        if self.find(base).is_none() {
            return base.to_string();
        }
        for i in 1.. {
            let candidate = format!("{}_{}", base, i);
            if self.find(&candidate).is_none() {
                return candidate;
            }
        }
        unreachable!()
    }

    // =========================================================================
    // Hierarchy
    // =========================================================================

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.parents.get(node).copied()
    }

    pub fn children_of(&self, node: NodeId) -> &[NodeId] {
        self.children.get(node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Set a node's parent, keeping its *local* transform unchanged.
    /// `None` makes it a root node.
    pub fn set_parent(&mut self, child: NodeId, parent: Option<NodeId>) {
        // Remove from old parent's children list
        if let Some(old_parent) = self.parents.get(child).copied() {
            if Some(old_parent) == parent {
                return; // Already there
            }
            if let Some(siblings) = self.children.get_mut(old_parent) {
                siblings.retain(|&e| e != child);
            }
        }
        self.parents.remove(child);

        if let Some(parent) = parent {
            assert!(
                !self.is_descendant_of(parent, child),
                "reparenting '{}' under its own descendant",
                self.name(child)
            );
            self.parents.insert(child, parent);
            if let Some(children) = self.children.get_mut(parent) {
                children.push(child);
            } else {
                self.children.insert(parent, vec![child]);
            }
        }
    }

    /// Set a node's parent, adjusting its local transform so its *world*
    /// transform is unchanged.
    pub fn set_parent_keep_world(&mut self, child: NodeId, parent: Option<NodeId>) {
        let world = self.world_matrix(child);
        self.set_parent(child, parent);
        self.set_world_matrix(child, &world);
    }

    pub fn is_descendant_of(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = self.parent(node);
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.parent(p);
        }
        false
    }

    /// Ancestors from direct parent up to the root.
    pub fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(node);
        while let Some(p) = current {
            out.push(p);
            current = self.parent(p);
        }
        out
    }

    /// All descendants, depth-first.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children_of(node).to_vec();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend_from_slice(self.children_of(n));
        }
        out
    }

    /// Hierarchy depth (root = 0).
    pub fn depth(&self, node: NodeId) -> usize {
        self.ancestors(node).len()
    }

    // =========================================================================
    // Transforms
    // =========================================================================

    pub fn local(&self, node: NodeId) -> Transform {
        self.locals.get(node).copied().unwrap_or_default()
    }

    pub fn set_local(&mut self, node: NodeId, transform: Transform) {
        if self.is_alive(node) {
            self.locals.insert(node, transform);
            for channel in Channel::ALL {
                self.propagate(node, channel.attr_name(), 0);
            }
        }
    }

    /// Full world matrix, computed by walking the ancestry.
    pub fn world_matrix(&self, node: NodeId) -> Mat4 {
        let mut chain = vec![node];
        chain.extend(self.ancestors(node));
        let mut m = mat4_identity();
        for n in chain.into_iter().rev() {
            m = mat4_mul(&m, &self.local(n).to_matrix());
        }
        m
    }

    pub fn world_position(&self, node: NodeId) -> Vec3 {
        mat4_position(&self.world_matrix(node))
    }

    /// World translation and euler rotation (degrees).
    pub fn world_transform(&self, node: NodeId) -> (Vec3, Vec3) {
        let m = self.world_matrix(node);
        (mat4_position(&m), euler_from_mat4(&m))
    }

    /// Set a node's local transform so that its world matrix matches `m`
    /// (rigid part only; scale is left at 1).
    pub fn set_world_matrix(&mut self, node: NodeId, m: &Mat4) {
        let local = self.local_matrix_for_world(node, m);
        self.set_local(
            node,
            Transform {
                translation: mat4_position(&local),
                rotation: euler_from_mat4(&local),
                scale: 1.0,
            },
        );
    }

    fn local_matrix_for_world(&self, node: NodeId, world: &Mat4) -> Mat4 {
        match self.parent(node) {
            Some(parent) => mat4_mul(&mat4_rigid_inverse(&self.world_matrix(parent)), world),
            None => *world,
        }
    }

    // =========================================================================
    // Channels and locks
    // =========================================================================

    pub fn channel(&self, node: NodeId, channel: Channel) -> f32 {
        channel.get(&self.local(node))
    }

    /// User-level channel write. Locked channels are skipped (the manual
    /// edit path respects locks; dataflow writes go through `write_raw`).
    pub fn set_channel(&mut self, node: NodeId, channel: Channel, value: f32) {
        if self.is_locked(node, channel) {
            log::debug!(
                "skipping write to locked channel {}.{}",
                self.name(node),
                channel.attr_name()
            );
            return;
        }
        self.write_channel_raw(node, channel, value, 0);
    }

    fn write_channel_raw(&mut self, node: NodeId, channel: Channel, value: f32, depth: u32) {
        if let Some(t) = self.locals.get_mut(node) {
            channel.set(t, value);
        }
        self.propagate(node, channel.attr_name(), depth);
    }

    pub fn is_locked(&self, node: NodeId, channel: Channel) -> bool {
        self.locks
            .get(node)
            .map(|l| l.is_locked(channel))
            .unwrap_or(false)
    }

    pub fn set_locked(&mut self, node: NodeId, channel: Channel, locked: bool) {
        if let Some(l) = self.locks.get_mut(node) {
            l.set_locked(channel, locked);
        }
    }

    pub fn channel_locks(&self, node: NodeId) -> ChannelLocks {
        self.locks.get(node).copied().unwrap_or_default()
    }

    pub fn restore_channel_locks(&mut self, node: NodeId, locks: ChannelLocks) {
        if self.is_alive(node) {
            self.locks.insert(node, locks);
        }
    }

    // =========================================================================
    // Metadata (node-local string storage, the persisted layer)
    // =========================================================================

    pub fn meta(&self, node: NodeId, key: &str) -> Option<&str> {
        self.metadata
            .get(node)
            .and_then(|m| m.get(key))
            .map(|s| s.as_str())
    }

    pub fn set_meta(&mut self, node: NodeId, key: &str, value: String) {
        if let Some(m) = self.metadata.get_mut(node) {
            m.insert(key.to_string(), value);
        }
    }

    pub fn clear_meta(&mut self, node: NodeId, key: &str) {
        if let Some(m) = self.metadata.get_mut(node) {
            m.remove(key);
        }
    }

    pub fn metadata_of(&self, node: NodeId) -> Option<&BTreeMap<String, String>> {
        self.metadata.get(node)
    }

    pub(crate) fn metadata_mut(&mut self, node: NodeId) -> Option<&mut BTreeMap<String, String>> {
        self.metadata.get_mut(node)
    }

    // =========================================================================
    // Dynamic attributes
    // =========================================================================

    /// Add (or replace) a dynamic attribute.
    pub fn add_attr(&mut self, node: NodeId, def: AttrDef) {
        if let Some(list) = self.attrs.get_mut(node) {
            if let Some(existing) = list.iter_mut().find(|a| a.name == def.name) {
                *existing = def;
            } else {
                list.push(def);
            }
        }
    }

    pub fn has_attr(&self, node: NodeId, name: &str) -> bool {
        self.attr(node, name).is_some()
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&AttrValue> {
        self.attrs
            .get(node)
            .and_then(|list| list.iter().find(|a| a.name == name))
            .map(|a| &a.value)
    }

    pub fn attr_def_mut(&mut self, node: NodeId, name: &str) -> Option<&mut AttrDef> {
        self.attrs
            .get_mut(node)
            .and_then(|list| list.iter_mut().find(|a| a.name == name))
    }

    /// Remove a dynamic attribute along with any connections through it.
    pub fn remove_attr(&mut self, node: NodeId, name: &str) {
        if let Some(list) = self.attrs.get_mut(node) {
            list.retain(|a| a.name != name);
        }
        self.connections.retain(|c| {
            !(c.src == node && c.src_attr == name) && !(c.dst == node && c.dst_attr == name)
        });
    }

    /// Rename a dynamic attribute, rewriting connections that address it.
    pub fn rename_attr(&mut self, node: NodeId, old: &str, new: &str) {
        if let Some(def) = self.attr_def_mut(node, old) {
            def.name = new.to_string();
        }
        for c in &mut self.connections {
            if c.src == node && c.src_attr == old {
                c.src_attr = new.to_string();
            }
            if c.dst == node && c.dst_attr == old {
                c.dst_attr = new.to_string();
            }
        }
    }

    /// All dynamic attributes on a node, in creation order.
    pub fn attr_defs(&self, node: NodeId) -> &[AttrDef] {
        self.attrs.get(node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Numeric read across channels and dynamic attributes.
    pub fn attr_f32(&self, node: NodeId, name: &str) -> Option<f32> {
        if let Some(channel) = Channel::from_attr_name(name) {
            return Some(self.channel(node, channel));
        }
        self.attr(node, name).and_then(|v| v.as_f32())
    }

    /// Numeric write across channels and dynamic attributes. Reacts utility
    /// nodes and pushes the value through outgoing connections.
    pub fn set_attr_f32(&mut self, node: NodeId, name: &str, value: f32) {
        self.write_attr_raw(node, name, value, 0);
    }

    fn write_attr_raw(&mut self, node: NodeId, name: &str, value: f32, depth: u32) {
        if depth > MAX_PROPAGATION_DEPTH {
            log::warn!(
                "dataflow propagation depth exceeded at {}.{} - wiring cycle?",
                self.name(node),
                name
            );
            return;
        }
        if let Some(channel) = Channel::from_attr_name(name) {
            self.write_channel_raw(node, channel, value, depth);
            return;
        }
        let mut found = false;
        if let Some(def) = self.attr_def_mut(node, name) {
            def.value.set_f32(value);
            found = true;
        }
        if !found {
            return;
        }
        self.react(node, name, depth);
        self.propagate(node, name, depth);
    }

    /// Utility-node evaluation, run after one of the node's attrs changed.
    fn react(&mut self, node: NodeId, attr: &str, depth: u32) {
        match self.kinds.get(node).cloned() {
            Some(NodeKind::Compare) => {
                if attr == "input" || attr == "ordinal" {
                    let input = self.attr_f32(node, "input").unwrap_or(0.0);
                    let ordinal = self.attr_f32(node, "ordinal").unwrap_or(0.0);
                    let output = if (input - ordinal).abs() < 0.5 { 1.0 } else { 0.0 };
                    self.write_attr_raw(node, "output", output, depth + 1);
                }
            }
            Some(NodeKind::MirrorTransform { flip_translation, flip_rotation }) => {
                if let Some(channel_name) = attr.strip_prefix("in_") {
                    if let Some(channel) = Channel::from_attr_name(channel_name) {
                        let value = self.attr_f32(node, attr).unwrap_or(0.0);
                        let axis = match channel {
                            Channel::Tx | Channel::Rx => 0,
                            Channel::Ty | Channel::Ry => 1,
                            Channel::Tz | Channel::Rz => 2,
                        };
                        let flip = if channel.is_translation() {
                            flip_translation[axis]
                        } else {
                            flip_rotation[axis]
                        };
                        let out = if flip { -value } else { value };
                        let out_attr = format!("out_{}", channel_name);
                        self.write_attr_raw(node, &out_attr, out, depth + 1);
                    }
                }
            }
            Some(NodeKind::Constraint) => {
                if attr.starts_with('w') {
                    self.evaluate_constraint(node, depth + 1);
                }
            }
            _ => {}
        }
    }

    /// Push a source attr's current value through all outgoing connections.
    fn propagate(&mut self, node: NodeId, attr: &str, depth: u32) {
        if depth > MAX_PROPAGATION_DEPTH {
            log::warn!(
                "dataflow propagation depth exceeded at {}.{} - wiring cycle?",
                self.name(node),
                attr
            );
            return;
        }
        let Some(value) = self.attr_f32(node, attr) else {
            return;
        };
        let targets: Vec<(NodeId, String)> = self
            .connections
            .iter()
            .filter(|c| c.src == node && c.src_attr == attr)
            .map(|c| (c.dst, c.dst_attr.clone()))
            .collect();
        for (dst, dst_attr) in targets {
            self.write_attr_raw(dst, &dst_attr, value, depth + 1);
        }
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Connect src.src_attr -> dst.dst_attr, replacing any existing input
    /// on the destination, and push the current value through.
    pub fn connect(&mut self, src: NodeId, src_attr: &str, dst: NodeId, dst_attr: &str) {
        self.disconnect_input(dst, dst_attr);
        self.connections.push(Connection {
            src,
            src_attr: src_attr.to_string(),
            dst,
            dst_attr: dst_attr.to_string(),
        });
        if let Some(value) = self.attr_f32(src, src_attr) {
            self.write_attr_raw(dst, dst_attr, value, 0);
        }
    }

    /// Remove the incoming connection on dst.dst_attr, if any.
    /// Returns true when a connection was removed.
    pub fn disconnect_input(&mut self, dst: NodeId, dst_attr: &str) -> bool {
        let before = self.connections.len();
        self.connections
            .retain(|c| !(c.dst == dst && c.dst_attr == dst_attr));
        self.connections.len() != before
    }

    pub fn input_connection(&self, dst: NodeId, dst_attr: &str) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.dst == dst && c.dst_attr == dst_attr)
    }

    pub fn outgoing_connections(&self, src: NodeId) -> Vec<&Connection> {
        self.connections.iter().filter(|c| c.src == src).collect()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub(crate) fn restore_connection(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    // =========================================================================
    // Parent constraints
    // =========================================================================

    /// Create a parent-constraint anchor for `driven`, parented under it.
    /// One constraint per driven node; an existing one is returned as-is.
    pub fn add_parent_constraint(&mut self, driven: NodeId) -> NodeId {
        if let Some(existing) = self.constraint_of(driven) {
            return existing;
        }
        let name = format!("{}_parentConstraint", self.name(driven));
        let cnode = self.spawn(NodeKind::Constraint, &name);
        self.set_parent(cnode, Some(driven));
        self.constraints
            .insert(cnode, ParentConstraint { driven, targets: Vec::new() });
        cnode
    }

    /// The constraint anchor driving `driven`, if one exists.
    pub fn constraint_of(&self, driven: NodeId) -> Option<NodeId> {
        for (idx, pc) in self.constraints.iter() {
            if pc.driven == driven {
                return Some(NodeId::new(idx, self.generation_of(idx)));
            }
        }
        None
    }

    pub fn constraint(&self, cnode: NodeId) -> Option<&ParentConstraint> {
        self.constraints.get(cnode)
    }

    /// Append a weighted target. The weight attribute `w{i}` is created on
    /// the anchor; the offset keeps the driven node's current pose.
    pub fn add_constraint_target(&mut self, cnode: NodeId, target: NodeId) -> usize {
        let driven = match self.constraints.get(cnode) {
            Some(pc) => pc.driven,
            None => panic!("'{}' is not a constraint anchor", self.name(cnode)),
        };
        let offset = mat4_mul(
            &mat4_rigid_inverse(&self.world_matrix(target)),
            &self.world_matrix(driven),
        );
        let pc = self.constraints.get_mut(cnode).unwrap();
        pc.targets.push(ConstraintTarget { target, offset });
        let idx = pc.targets.len() - 1;
        self.add_attr(
            cnode,
            AttrDef::new(&format!("w{}", idx), AttrValue::Float(0.0)).hidden(),
        );
        idx
    }

    /// Remove target `idx`, shifting later weight attrs (and connections
    /// addressing them) down by one.
    pub fn remove_constraint_target(&mut self, cnode: NodeId, idx: usize) {
        let count = match self.constraints.get_mut(cnode) {
            Some(pc) => {
                pc.targets.remove(idx);
                pc.targets.len()
            }
            None => return,
        };
        self.remove_attr(cnode, &format!("w{}", idx));
        for j in idx + 1..=count {
            self.rename_attr(cnode, &format!("w{}", j), &format!("w{}", j - 1));
        }
        self.evaluate_constraint(cnode, 0);
    }

    pub fn constraint_target_index(&self, cnode: NodeId, target: NodeId) -> Option<usize> {
        self.constraints
            .get(cnode)?
            .targets
            .iter()
            .position(|t| t.target == target)
    }

    /// Recompute the driven node's local transform from the weighted target
    /// list. With one-hot weights this snaps the driven node to the active
    /// target (plus its captured offset). Pinned channels keep their
    /// literal value.
    fn evaluate_constraint(&mut self, cnode: NodeId, depth: u32) {
        let Some(pc) = self.constraints.get(cnode) else {
            return;
        };
        let driven = pc.driven;
        let entries: Vec<(f32, NodeId, Mat4)> = pc
            .targets
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let w = self.attr_f32(cnode, &format!("w{}", i)).unwrap_or(0.0);
                (w, t.target, t.offset)
            })
            .filter(|(w, target, _)| *w > 1e-6 && self.is_alive(*target))
            .collect();

        let total: f32 = entries.iter().map(|(w, _, _)| w).sum();
        if total <= 1e-6 {
            return; // No active target, hold current pose
        }

        let mut blended = [[0.0f32; 4]; 4];
        for (w, target, offset) in &entries {
            let m = mat4_mul(&self.world_matrix(*target), offset);
            let k = w / total;
            for i in 0..4 {
                for j in 0..4 {
                    blended[i][j] += m[i][j] * k;
                }
            }
        }

        let local = self.local_matrix_for_world(driven, &blended);
        let mut t = Transform {
            translation: mat4_position(&local),
            rotation: euler_from_mat4(&local),
            scale: 1.0,
        };
        if let Some(pins) = self.pinned.get(driven) {
            for (channel, value) in pins {
                channel.set(&mut t, *value);
            }
        }
        if self.is_alive(driven) {
            self.locals.insert(driven, t);
            for channel in Channel::ALL {
                self.propagate(driven, channel.attr_name(), depth + 1);
            }
        }
    }

    /// Re-evaluate every constraint in the scene. Call after moving
    /// constraint targets directly (weight changes re-evaluate on their own).
    pub fn refresh_constraints(&mut self) {
        let anchors: Vec<NodeId> = self
            .constraints
            .iter()
            .map(|(idx, _)| NodeId::new(idx, self.generation_of(idx)))
            .collect();
        for cnode in anchors {
            self.evaluate_constraint(cnode, 0);
        }
    }

    // =========================================================================
    // Pinned channels (constraint axis exclusion)
    // =========================================================================

    /// Exclude a channel from constraint writes, holding it at `value`.
    pub fn pin_channel(&mut self, node: NodeId, channel: Channel, value: f32) {
        if !self.pinned.contains(node) {
            self.pinned.insert(node, Vec::new());
        }
        let pins = self.pinned.get_mut(node).unwrap();
        if let Some(existing) = pins.iter_mut().find(|(c, _)| *c == channel) {
            existing.1 = value;
        } else {
            pins.push((channel, value));
        }
        if let Some(t) = self.locals.get_mut(node) {
            channel.set(t, value);
        }
    }

    pub fn unpin_all(&mut self, node: NodeId) {
        self.pinned.remove(node);
    }

    pub fn pinned_channels(&self, node: NodeId) -> &[(Channel, f32)] {
        self.pinned.get(node).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_and_delete() {
        let mut scene = Scene::new();

        let a = scene.spawn(NodeKind::Joint, "hip");
        let b = scene.spawn(NodeKind::Joint, "knee");
        assert_eq!(scene.node_count(), 2);

        scene.delete(a);
        assert_eq!(scene.node_count(), 1);
        assert!(!scene.is_alive(a));
        assert!(scene.is_alive(b));
    }

    #[test]
    fn test_unique_names() {
        let mut scene = Scene::new();
        let a = scene.spawn(NodeKind::Joint, "arm");
        let b = scene.spawn(NodeKind::Joint, "arm");
        assert_eq!(scene.name(a), "arm");
        assert_eq!(scene.name(b), "arm_1");
        assert_eq!(scene.find("arm_1"), Some(b));
    }

    #[test]
    fn test_hierarchy_delete_recurses() {
        let mut scene = Scene::new();

        let parent = scene.spawn(NodeKind::Transform, "grp");
        let c1 = scene.spawn(NodeKind::Joint, "a");
        let c2 = scene.spawn(NodeKind::Joint, "b");
        scene.set_parent(c1, Some(parent));
        scene.set_parent(c2, Some(parent));

        scene.delete(parent);
        assert_eq!(scene.node_count(), 0);
    }

    #[test]
    fn test_world_transform_composition() {
        let mut scene = Scene::new();
        let parent = scene.spawn(NodeKind::Joint, "shoulder");
        let child = scene.spawn(NodeKind::Joint, "elbow");
        scene.set_parent(child, Some(parent));

        scene.set_local(parent, Transform::from_translation(Vec3::new(100.0, 0.0, 0.0)));
        scene.set_local(child, Transform::from_translation(Vec3::new(10.0, 0.0, 0.0)));

        let pos = scene.world_position(child);
        assert!((pos.x - 110.0).abs() < 1e-4);
    }

    #[test]
    fn test_set_parent_keep_world() {
        let mut scene = Scene::new();
        let a = scene.spawn(NodeKind::Transform, "a");
        let b = scene.spawn(NodeKind::Transform, "b");
        scene.set_local(a, Transform::from_translation(Vec3::new(5.0, 0.0, 0.0)));
        scene.set_local(b, Transform::from_translation(Vec3::new(0.0, 3.0, 0.0)));

        scene.set_parent_keep_world(b, Some(a));
        let pos = scene.world_position(b);
        assert!(pos.max_abs_diff(Vec3::new(0.0, 3.0, 0.0)) < 1e-4);
        assert!(scene.local(b).translation.max_abs_diff(Vec3::new(-5.0, 3.0, 0.0)) < 1e-4);
    }

    #[test]
    fn test_channel_connection_propagates() {
        let mut scene = Scene::new();
        let a = scene.spawn(NodeKind::Joint, "driver");
        let b = scene.spawn(NodeKind::Joint, "driven");

        scene.connect(a, "ry", b, "ry");
        scene.set_channel(a, Channel::Ry, 30.0);

        assert!((scene.channel(b, Channel::Ry) - 30.0).abs() < 1e-5);
    }

    #[test]
    fn test_connect_replaces_existing_input() {
        let mut scene = Scene::new();
        let a = scene.spawn(NodeKind::Transform, "a");
        let b = scene.spawn(NodeKind::Transform, "b");
        let dst = scene.spawn(NodeKind::Transform, "dst");
        scene.set_channel(a, Channel::Tx, 1.0);
        scene.set_channel(b, Channel::Tx, 2.0);

        scene.connect(a, "tx", dst, "tx");
        scene.connect(b, "tx", dst, "tx");

        // One input per attribute; the second connect displaced the first
        assert_eq!(scene.input_connection(dst, "tx").unwrap().src, b);
        assert!(scene.outgoing_connections(a).is_empty());
        assert_eq!(scene.outgoing_connections(b).len(), 1);
        assert!((scene.channel(dst, Channel::Tx) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_locked_channel_blocks_manual_set_not_dataflow() {
        let mut scene = Scene::new();
        let a = scene.spawn(NodeKind::Joint, "driver");
        let b = scene.spawn(NodeKind::Joint, "driven");
        scene.set_locked(b, Channel::Tx, true);

        scene.set_channel(b, Channel::Tx, 9.0);
        assert_eq!(scene.channel(b, Channel::Tx), 0.0);

        scene.connect(a, "tx", b, "tx");
        scene.set_channel(a, Channel::Tx, 4.0);
        assert!((scene.channel(b, Channel::Tx) - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_compare_node_one_hot() {
        let mut scene = Scene::new();
        let ctl = scene.spawn(NodeKind::Control, "ctl");
        scene.add_attr(
            ctl,
            AttrDef::new(
                "space",
                AttrValue::Enum { index: 0, labels: vec!["a".into(), "b".into()] },
            ),
        );
        let cmp0 = scene.spawn(NodeKind::Compare, "cmp0");
        let cmp1 = scene.spawn(NodeKind::Compare, "cmp1");
        scene.set_attr_f32(cmp1, "ordinal", 1.0);
        scene.connect(ctl, "space", cmp0, "input");
        scene.connect(ctl, "space", cmp1, "input");

        assert_eq!(scene.attr_f32(cmp0, "output"), Some(1.0));
        assert_eq!(scene.attr_f32(cmp1, "output"), Some(0.0));

        scene.set_attr_f32(ctl, "space", 1.0);
        assert_eq!(scene.attr_f32(cmp0, "output"), Some(0.0));
        assert_eq!(scene.attr_f32(cmp1, "output"), Some(1.0));
    }

    #[test]
    fn test_mirror_node_negates_flipped_axes() {
        let mut scene = Scene::new();
        let m = scene.spawn(
            NodeKind::MirrorTransform {
                flip_translation: [true, false, false],
                flip_rotation: [false, true, true],
            },
            "mirror",
        );
        scene.set_attr_f32(m, "in_tx", 2.0);
        scene.set_attr_f32(m, "in_ty", 3.0);
        scene.set_attr_f32(m, "in_ry", 15.0);

        assert_eq!(scene.attr_f32(m, "out_tx"), Some(-2.0));
        assert_eq!(scene.attr_f32(m, "out_ty"), Some(3.0));
        assert_eq!(scene.attr_f32(m, "out_ry"), Some(-15.0));
    }

    #[test]
    fn test_parent_constraint_one_hot_switch() {
        let mut scene = Scene::new();
        let t0 = scene.spawn(NodeKind::Transform, "target0");
        let t1 = scene.spawn(NodeKind::Transform, "target1");
        let driven = scene.spawn(NodeKind::Transform, "space");
        scene.set_local(t0, Transform::from_translation(Vec3::new(10.0, 0.0, 0.0)));
        scene.set_local(t1, Transform::from_translation(Vec3::new(0.0, 20.0, 0.0)));

        let cnode = scene.add_parent_constraint(driven);
        scene.add_constraint_target(cnode, t0);
        scene.add_constraint_target(cnode, t1);

        // Driven was at origin when targets were added, so each offset
        // cancels the target's own position while that target is active.
        scene.set_attr_f32(cnode, "w0", 1.0);
        assert!(scene.world_position(driven).max_abs_diff(Vec3::ZERO) < 1e-4);

        // Move target0: driven follows it rigidly
        scene.set_local(t0, Transform::from_translation(Vec3::new(15.0, 0.0, 0.0)));
        scene.refresh_constraints();
        assert!(scene.world_position(driven).max_abs_diff(Vec3::new(5.0, 0.0, 0.0)) < 1e-4);

        // Switch to target1
        scene.set_attr_f32(cnode, "w0", 0.0);
        scene.set_attr_f32(cnode, "w1", 1.0);
        assert!(scene.world_position(driven).max_abs_diff(Vec3::ZERO) < 1e-4);
        scene.set_local(t1, Transform::from_translation(Vec3::new(0.0, 24.0, 0.0)));
        scene.refresh_constraints();
        assert!(scene.world_position(driven).max_abs_diff(Vec3::new(0.0, 4.0, 0.0)) < 1e-4);
    }

    #[test]
    fn test_pinned_channel_excluded_from_constraint() {
        let mut scene = Scene::new();
        let target = scene.spawn(NodeKind::Transform, "target");
        let driven = scene.spawn(NodeKind::Transform, "space");
        let cnode = scene.add_parent_constraint(driven);
        scene.add_constraint_target(cnode, target);
        scene.pin_channel(driven, Channel::Ty, 7.0);

        scene.set_attr_f32(cnode, "w0", 1.0);
        scene.set_local(target, Transform::from_translation(Vec3::new(3.0, 99.0, 0.0)));
        scene.refresh_constraints();

        let t = scene.local(driven);
        assert!((t.translation.x - 3.0).abs() < 1e-4);
        assert!((t.translation.y - 7.0).abs() < 1e-4);
    }

    #[test]
    fn test_delete_drops_constraint_targets() {
        let mut scene = Scene::new();
        let target = scene.spawn(NodeKind::Transform, "target");
        let driven = scene.spawn(NodeKind::Transform, "space");
        let cnode = scene.add_parent_constraint(driven);
        scene.add_constraint_target(cnode, target);

        scene.delete(target);
        assert!(scene.constraint(cnode).unwrap().targets.is_empty());
    }
}
