//! Scene save/load
//!
//! Whole scenes round-trip through RON. Files carry a version integer;
//! loaders accept any version up to the current one and never rewrite old
//! files in place (the schema is backward-readable, not auto-migrated).
//! Loaded files are validated before any node is created.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::attr::{AttrDef, Channel, ChannelLocks, Transform};
use super::graph::{Connection, NodeKind, ParentConstraint, Scene};
use super::node::NodeId;
use crate::error::RigError;
use crate::spaces::SpaceBinding;
use crate::trigger::TriggerAnnotation;

/// Current scene file schema version.
pub const FILE_VERSION: u32 = 2;

/// Validation limits to prevent resource exhaustion from malicious files
pub mod limits {
    /// Maximum number of nodes in a scene file
    pub const MAX_NODES: usize = 100_000;
    /// Maximum string length for node names
    pub const MAX_NAME_LEN: usize = 256;
    /// Maximum coordinate value (prevents overflow issues)
    pub const MAX_COORD: f32 = 1_000_000.0;
}

/// One node as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedNode {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub local: Transform,
    #[serde(default)]
    pub locks: ChannelLocks,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub attrs: Vec<AttrDef>,
}

/// A complete persisted scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneFile {
    pub version: u32,
    pub nodes: Vec<SavedNode>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub constraints: Vec<(NodeId, ParentConstraint)>,
    #[serde(default)]
    pub pinned: Vec<(NodeId, Vec<(Channel, f32)>)>,
    #[serde(default)]
    pub spaces: Vec<(NodeId, SpaceBinding)>,
    #[serde(default)]
    pub triggers: Vec<(NodeId, TriggerAnnotation)>,
}

fn is_valid_float(f: f32) -> bool {
    f.is_finite() && f.abs() <= limits::MAX_COORD
}

fn validate_transform(t: &Transform, context: &str) -> Result<(), RigError> {
    let values = [
        t.translation.x,
        t.translation.y,
        t.translation.z,
        t.rotation.x,
        t.rotation.y,
        t.rotation.z,
        t.scale,
    ];
    if values.iter().any(|v| !is_valid_float(*v)) {
        return Err(RigError::Validation(format!(
            "{}: non-finite or out-of-range transform",
            context
        )));
    }
    Ok(())
}

/// Validate a scene file before loading anything from it.
pub fn validate_scene_file(file: &SceneFile) -> Result<(), RigError> {
    if file.version > FILE_VERSION {
        return Err(RigError::Validation(format!(
            "scene file version {} is newer than supported version {}",
            file.version, FILE_VERSION
        )));
    }
    if file.nodes.len() > limits::MAX_NODES {
        return Err(RigError::Validation(format!(
            "too many nodes ({} > {})",
            file.nodes.len(),
            limits::MAX_NODES
        )));
    }

    let mut seen_names = std::collections::HashSet::new();
    let mut seen_ids = std::collections::HashSet::new();
    for node in &file.nodes {
        if node.name.is_empty() || node.name.len() > limits::MAX_NAME_LEN {
            return Err(RigError::Validation(format!(
                "invalid node name length for '{}'",
                node.name
            )));
        }
        if !seen_names.insert(node.name.as_str()) {
            return Err(RigError::Validation(format!(
                "duplicate node name '{}'",
                node.name
            )));
        }
        if !seen_ids.insert(node.id) {
            return Err(RigError::Validation(format!(
                "duplicate node id for '{}'",
                node.name
            )));
        }
        validate_transform(&node.local, &node.name)?;
    }
    for node in &file.nodes {
        if let Some(parent) = node.parent {
            if !seen_ids.contains(&parent) {
                return Err(RigError::Validation(format!(
                    "'{}' references a parent not in the file",
                    node.name
                )));
            }
        }
    }
    Ok(())
}

/// Capture the scene into its persisted form.
pub fn snapshot(scene: &Scene) -> SceneFile {
    let mut nodes = Vec::new();
    for id in scene.all_nodes() {
        nodes.push(SavedNode {
            id,
            name: scene.name(id).to_string(),
            kind: scene.kind(id).cloned().unwrap_or(NodeKind::Transform),
            parent: scene.parent(id),
            local: scene.local(id),
            locks: scene.channel_locks(id),
            metadata: scene.metadata_of(id).cloned().unwrap_or_default(),
            attrs: scene.attr_defs(id).to_vec(),
        });
    }
    SceneFile {
        version: FILE_VERSION,
        nodes,
        connections: scene.connections().to_vec(),
        constraints: scene
            .constraints
            .iter()
            .map(|(idx, pc)| (scene.id_at(idx), pc.clone()))
            .collect(),
        pinned: scene
            .pinned
            .iter()
            .map(|(idx, pins)| (scene.id_at(idx), pins.clone()))
            .collect(),
        spaces: scene
            .spaces
            .iter()
            .map(|(idx, b)| (scene.id_at(idx), b.clone()))
            .collect(),
        triggers: scene
            .triggers
            .iter()
            .map(|(idx, t)| (scene.id_at(idx), t.clone()))
            .collect(),
    }
}

/// Rebuild a scene from its persisted form. Node ids are preserved, so the
/// file's connections, constraints and annotations come back verbatim.
pub fn restore(file: &SceneFile) -> Result<Scene, RigError> {
    validate_scene_file(file)?;

    let mut scene = Scene::new();
    for node in &file.nodes {
        let id = scene.spawn_restored(
            node.id.index(),
            node.id.generation(),
            node.kind.clone(),
            node.name.clone(),
        );
        scene.set_local(id, node.local);
        scene.restore_channel_locks(id, node.locks);
        if let Some(meta) = scene.metadata_mut(id) {
            *meta = node.metadata.clone();
        }
        for attr in &node.attrs {
            scene.add_attr(id, attr.clone());
        }
    }
    for node in &file.nodes {
        if let Some(parent) = node.parent {
            scene.set_parent(node.id, Some(parent));
        }
    }
    for (cnode, pc) in &file.constraints {
        scene.constraints.insert(*cnode, pc.clone());
    }
    for (node, pins) in &file.pinned {
        scene.pinned.insert(*node, pins.clone());
    }
    for (ctrl, binding) in &file.spaces {
        scene.spaces.insert(*ctrl, binding.clone());
    }
    for (node, annotation) in &file.triggers {
        scene.triggers.insert(*node, annotation.clone());
    }
    // Connections go in last so restoring them never perturbs saved values
    for connection in &file.connections {
        scene.restore_connection(connection.clone());
    }
    Ok(scene)
}

/// Save a scene to a RON file.
pub fn save_to_file(scene: &Scene, path: &Path) -> Result<(), RigError> {
    let config = ron::ser::PrettyConfig::new()
        .depth_limit(6)
        .indentor("  ".to_string());
    let contents = ron::ser::to_string_pretty(&snapshot(scene), config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

/// Load a scene from a RON file.
pub fn load_from_file(path: &Path) -> Result<Scene, RigError> {
    let contents = std::fs::read_to_string(path)?;
    let file: SceneFile = ron::from_str(&contents)?;
    restore(&file)
}
