//! Rig containers
//!
//! Building a rig for a finalized part wraps everything the build created
//! into a container node under the scene's single rig world group. What
//! the container owns is established by provenance: the alive-node set is
//! diffed across the build call, so the builder never has to guess which
//! nodes belong to it. Rigs built recursively (an arm rigging its
//! fingers) produce sub-containers that are re-parented under the outer
//! container, never re-wrapped.
//!
//! Containers bind controls by declared name into slots, so tools can ask
//! "the wrist control of this arm" without string conventions.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::RigError;
use crate::part::Part;
use crate::registry::{merge_args, BuildArgs, PartRegistry, RigBuildCtx};
use crate::scene::{Channel, NodeId, NodeKind, Scene};

/// Metadata key carrying `ContainerMeta` on a container node.
pub const META_CONTAINER: &str = "rig.container";
/// Metadata key carrying `ControlMeta` on a bound control.
pub const META_CONTROL: &str = "rig.control";
/// Marker key on the singleton rig world group.
pub const META_WORLD: &str = "rig.world";
/// Metadata key holding the quick-select membership list.
pub const META_SET: &str = "rig.selection";

/// Name of the singleton quick-select set for all bound controls.
pub const ALL_CONTROLS_SET: &str = "all_controls_set";

/// Current container metadata schema version.
pub const CONTAINER_VERSION: u32 = 1;

/// Persisted container record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMeta {
    pub type_name: String,
    pub version: u32,
    pub index: u32,
    /// Merged rig build arguments
    pub args: BuildArgs,
    /// Base member name of the part this rig was built for
    pub part_base: String,
    /// Bound control names per declared slot; None is a hole
    pub control_slots: Vec<Option<String>>,
    /// Names of every node this build created (sub-container contents
    /// excluded; they keep their own record)
    pub members: Vec<String>,
}

/// Persisted record on a bound control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMeta {
    pub slot: usize,
}

/// The container record on a node, if it is a rig container.
pub fn container_meta(scene: &Scene, node: NodeId) -> Option<ContainerMeta> {
    scene
        .meta(node, META_CONTAINER)
        .and_then(|raw| ron::from_str(raw).ok())
}

/// All rig containers in the scene.
pub fn containers(scene: &Scene) -> Vec<(NodeId, ContainerMeta)> {
    scene
        .all_nodes()
        .into_iter()
        .filter_map(|n| container_meta(scene, n).map(|m| (n, m)))
        .collect()
}

/// The singleton world group all containers live under. Created on first
/// use, found by marker metadata afterwards.
pub fn world_container(scene: &mut Scene) -> NodeId {
    for node in scene.all_nodes() {
        if scene.meta(node, META_WORLD).is_some() {
            return node;
        }
    }
    let world = scene.spawn(NodeKind::Transform, "rig_world");
    scene.set_meta(world, META_WORLD, String::new());
    world
}

fn quick_select_set(scene: &mut Scene) -> NodeId {
    if let Some(node) = scene.find(ALL_CONTROLS_SET) {
        return node;
    }
    let set = scene.spawn(NodeKind::SelectionSet, ALL_CONTROLS_SET);
    scene.set_meta(set, META_SET, ron::to_string(&Vec::<String>::new()).unwrap_or_default());
    set
}

/// Names in the all-controls quick-select set.
pub fn quick_select_members(scene: &Scene) -> Vec<String> {
    scene
        .find(ALL_CONTROLS_SET)
        .and_then(|set| scene.meta(set, META_SET))
        .and_then(|raw| ron::from_str(raw).ok())
        .unwrap_or_default()
}

fn add_to_quick_select(scene: &mut Scene, control: NodeId) -> Result<(), RigError> {
    let set = quick_select_set(scene);
    let mut members = quick_select_members(scene);
    let name = scene.name(control).to_string();
    if !members.contains(&name) {
        members.push(name);
    }
    scene.set_meta(set, META_SET, ron::to_string(&members)?);
    Ok(())
}

/// Smallest free container index for a type; duplicates panic, same as
/// part indices.
fn allocate_container_index(scene: &Scene, type_name: &str) -> u32 {
    let mut seen = HashSet::new();
    for (node, meta) in containers(scene) {
        if meta.type_name != type_name {
            continue;
        }
        assert!(
            seen.insert(meta.index),
            "duplicate index {} for rig container type '{}' (on '{}'): scene metadata is corrupt",
            meta.index,
            type_name,
            scene.name(node)
        );
    }
    (0..).find(|i| !seen.contains(i)).unwrap()
}

/// Build the rig for `part` and wrap the result in a container.
///
/// The part must match its finalize digest; a stale or never-finalized
/// part is a catchable error, never silently re-finalized. Returns the
/// container node.
pub fn build_rig(
    registry: &PartRegistry,
    scene: &mut Scene,
    part: &Part,
    overrides: &BuildArgs,
) -> Result<NodeId, RigError> {
    let part_type = registry
        .resolve(&part.type_name)
        .ok_or_else(|| RigError::UnknownType(part.type_name.clone()))?;
    if !part.matches_digest(scene) {
        return Err(RigError::StalePart(part.prefix()));
    }
    let args = merge_args(&part.type_name, &part_type.default_args(), overrides)?;
    let index = allocate_container_index(scene, &part.type_name);
    let world = world_container(scene);

    let before = scene.node_set();
    let out = part_type.build_rig(&mut RigBuildCtx {
        scene: &mut *scene,
        registry,
        part,
        args: &args,
    })?;
    let mut created: Vec<NodeId> = scene
        .node_set()
        .difference(&before)
        .copied()
        .collect();
    created.sort_by_key(|n| n.index());

    // Sub-containers (from recursive builds) claim their own contents
    let sub_containers: Vec<NodeId> = created
        .iter()
        .copied()
        .filter(|&n| container_meta(scene, n).is_some())
        .collect();
    let mut claimed: HashSet<NodeId> = sub_containers.iter().copied().collect();
    for &sub in &sub_containers {
        claimed.extend(scene.descendants(sub));
    }

    let container = scene.spawn(NodeKind::Container, &format!("{}_rig", part.prefix()));
    scene.set_parent(container, Some(world));
    for &sub in &sub_containers {
        scene.set_parent_keep_world(sub, Some(container));
    }
    for &node in &created {
        if !claimed.contains(&node) && scene.parent(node).is_none() {
            scene.set_parent_keep_world(node, Some(container));
        }
    }

    let declared = part_type.control_names();
    assert_eq!(
        out.controls.len(),
        declared.len(),
        "rig build for '{}' bound {} control slots, type declares {}",
        part.type_name,
        out.controls.len(),
        declared.len()
    );
    let mut control_slots = Vec::with_capacity(out.controls.len());
    for (slot, bound) in out.controls.iter().enumerate() {
        match bound {
            Some(control) => {
                control_slots.push(Some(scene.name(*control).to_string()));
                scene.set_meta(*control, META_CONTROL, ron::to_string(&ControlMeta { slot })?);
                add_to_quick_select(scene, *control)?;
            }
            None => control_slots.push(None),
        }
    }

    let members: Vec<String> = created
        .iter()
        .filter(|n| !claimed.contains(n))
        .map(|&n| scene.name(n).to_string())
        .collect();
    let meta = ContainerMeta {
        type_name: part.type_name.clone(),
        version: CONTAINER_VERSION,
        index,
        args,
        part_base: scene.name(part.base()).to_string(),
        control_slots,
        members,
    };
    scene.set_meta(container, META_CONTAINER, ron::to_string(&meta)?);
    log::debug!(
        "built rig container '{}' ({} members, {} sub-containers)",
        scene.name(container),
        created.len(),
        sub_containers.len()
    );
    Ok(container)
}

/// The container owning `node`: the nearest ancestor (or the node itself)
/// that is a rig container. A node outside every container is a domain
/// error.
pub fn container_for_node(scene: &Scene, node: NodeId) -> Result<NodeId, RigError> {
    let mut current = Some(node);
    while let Some(n) = current {
        if container_meta(scene, n).is_some() {
            return Ok(n);
        }
        current = scene.parent(n);
    }
    Err(RigError::NoContainer(scene.name(node).to_string()))
}

/// The declared name of a bound control ("wrist", "hips"...), or None for
/// anything that is not a bound control. A probe, not an error path.
pub fn control_name(registry: &PartRegistry, scene: &Scene, node: NodeId) -> Option<String> {
    let raw = scene.meta(node, META_CONTROL)?;
    let control: ControlMeta = ron::from_str(raw).ok()?;
    let container = container_for_node(scene, node).ok()?;
    let meta = container_meta(scene, container)?;
    let part_type = registry.resolve(&meta.type_name)?;
    part_type
        .control_names()
        .get(control.slot)
        .map(|s| s.to_string())
}

/// The rig control steering `joint`: the control in the same member
/// ordinal, falling back to the nearest earlier bound slot when the
/// ordinal has no control of its own (holes, short control lists).
/// Returns None when the joint's part has no rig built.
pub fn rig_control_for_joint(
    registry: &PartRegistry,
    scene: &Scene,
    joint: NodeId,
) -> Option<NodeId> {
    let part = Part::init_from_item(registry, scene, joint).ok()?;
    let base_name = scene.name(part.base()).to_string();
    let (_, meta) = containers(scene)
        .into_iter()
        .find(|(_, m)| m.part_base == base_name)?;

    let ordinal = part.members.iter().position(|&m| m == joint)?;
    if meta.control_slots.is_empty() {
        return None;
    }
    let mut slot = ordinal.min(meta.control_slots.len() - 1);
    loop {
        if let Some(Some(name)) = meta.control_slots.get(slot) {
            return scene.find(name);
        }
        if slot == 0 {
            return None;
        }
        slot -= 1;
    }
}

/// Per-joint FK: an offset group at the joint's parent frame, a control
/// matching the joint's local pose, rotation channels connected through.
/// Groups chain under the previous control so the controls follow each
/// other the way the joints do. Returns the controls in joint order.
pub(crate) fn fk_chain(scene: &mut Scene, joints: &[NodeId]) -> Vec<NodeId> {
    let mut controls = Vec::new();
    let mut prev: Option<NodeId> = None;
    for &joint in joints {
        let joint_name = scene.name(joint).to_string();
        let parent_world = match scene.parent(joint) {
            Some(p) => scene.world_matrix(p),
            None => crate::math::mat4_identity(),
        };
        let grp = scene.spawn(NodeKind::Transform, &format!("{}_ctl_grp", joint_name));
        scene.set_parent(grp, prev);
        scene.set_world_matrix(grp, &parent_world);

        let ctl = scene.spawn(NodeKind::Control, &format!("{}_ctl", joint_name));
        scene.set_parent(ctl, Some(grp));
        let pose = scene.local(joint);
        scene.set_local(ctl, pose);

        // The control starts at the joint's own pose, so connecting pushes
        // the value the joint already has
        for channel in Channel::ROTATE {
            scene.connect(ctl, channel.attr_name(), joint, channel.attr_name());
        }
        controls.push(ctl);
        prev = Some(ctl);
    }
    controls
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ArgValue;

    fn setup() -> (PartRegistry, Scene) {
        (PartRegistry::with_builtin_types(), Scene::new())
    }

    fn finalized(registry: &PartRegistry, scene: &mut Scene, type_name: &str) -> Part {
        let part = Part::create(registry, scene, type_name, &BuildArgs::new()).unwrap();
        part.finalize(scene).unwrap();
        part
    }

    #[test]
    fn test_stale_part_is_refused_not_refinalized() {
        let (registry, mut scene) = setup();
        let part = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();

        // Never finalized
        assert!(matches!(
            build_rig(&registry, &mut scene, &part, &BuildArgs::new()),
            Err(RigError::StalePart(_))
        ));

        // Finalized, then modified
        part.finalize(&mut scene).unwrap();
        scene.set_channel(part.members[1], Channel::Ty, 2.0);
        assert!(matches!(
            build_rig(&registry, &mut scene, &part, &BuildArgs::new()),
            Err(RigError::StalePart(_))
        ));
        // The failed build did not quietly re-finalize
        assert!(!part.matches_digest(&scene));
    }

    #[test]
    fn test_container_wraps_build_under_world() {
        let (registry, mut scene) = setup();
        let arm = finalized(&registry, &mut scene, "arm");
        let leg = finalized(&registry, &mut scene, "leg");

        let arm_rig = build_rig(&registry, &mut scene, &arm, &BuildArgs::new()).unwrap();
        let leg_rig = build_rig(&registry, &mut scene, &leg, &BuildArgs::new()).unwrap();

        assert_eq!(scene.name(arm_rig), "arm0_l_rig");
        let world = scene.find("rig_world").unwrap();
        assert_eq!(scene.parent(arm_rig), Some(world));
        assert_eq!(scene.parent(leg_rig), Some(world));
        // Second build reused the singleton world group
        assert_eq!(
            scene.all_nodes().iter().filter(|&&n| scene.meta(n, META_WORLD).is_some()).count(),
            1
        );
    }

    #[test]
    fn test_controls_drive_joints() {
        let (registry, mut scene) = setup();
        let arm = finalized(&registry, &mut scene, "arm");
        build_rig(&registry, &mut scene, &arm, &BuildArgs::new()).unwrap();

        let elbow = arm.members[1];
        let elbow_world_before = scene.world_position(arm.members[2]);
        let ctl = rig_control_for_joint(&registry, &scene, elbow).unwrap();
        let before = scene.channel(elbow, Channel::Ry);
        scene.set_channel(ctl, Channel::Ry, before + 40.0);
        assert!((scene.channel(elbow, Channel::Ry) - before - 40.0).abs() < 1e-4);
        // The wrist actually moved
        assert!(scene.world_position(arm.members[2]).max_abs_diff(elbow_world_before) > 1e-3);
    }

    #[test]
    fn test_control_slots_and_names() {
        let (registry, mut scene) = setup();
        let arm = finalized(&registry, &mut scene, "arm");
        let container = build_rig(&registry, &mut scene, &arm, &BuildArgs::new()).unwrap();

        let wrist_ctl = rig_control_for_joint(&registry, &scene, arm.members[2]).unwrap();
        assert_eq!(control_name(&registry, &scene, wrist_ctl), Some("wrist".to_string()));
        assert_eq!(container_for_node(&scene, wrist_ctl).unwrap(), container);

        // A joint is inside no container; the probe errors, the control
        // name probe just says None
        assert!(matches!(
            container_for_node(&scene, arm.members[0]),
            Err(RigError::NoContainer(_))
        ));
        assert_eq!(control_name(&registry, &scene, arm.members[0]), None);
    }

    #[test]
    fn test_ordinal_fallback_for_unbound_joints() {
        let (registry, mut scene) = setup();
        let leg = finalized(&registry, &mut scene, "leg");
        build_rig(&registry, &mut scene, &leg, &BuildArgs::new()).unwrap();

        // Ball (ordinal 3) has no slot of its own; it falls back to ankle
        let ball_ctl = rig_control_for_joint(&registry, &scene, leg.members[3]).unwrap();
        let ankle_ctl = rig_control_for_joint(&registry, &scene, leg.members[2]).unwrap();
        assert_eq!(ball_ctl, ankle_ctl);
        assert_eq!(control_name(&registry, &scene, ankle_ctl), Some("ankle".to_string()));
    }

    #[test]
    fn test_recursive_build_nests_sub_containers() {
        let (registry, mut scene) = setup();
        let arm = finalized(&registry, &mut scene, "arm");
        let mut args = BuildArgs::new();
        args.insert("joints".to_string(), ArgValue::Int(3));
        let finger = Part::create(&registry, &mut scene, "finger", &args).unwrap();
        scene.set_parent_keep_world(finger.base(), Some(arm.members[2]));
        finger.finalize(&mut scene).unwrap();
        // Reparenting changed the arm's wrist children, not its members
        assert!(arm.matches_digest(&scene));

        let arm_rig = build_rig(&registry, &mut scene, &arm, &BuildArgs::new()).unwrap();

        let finger_rig = scene.find("finger0_l_rig").unwrap();
        assert_eq!(scene.parent(finger_rig), Some(arm_rig));
        // The finger's nodes belong to its own container record
        let arm_meta = container_meta(&scene, arm_rig).unwrap();
        let finger_meta = container_meta(&scene, finger_rig).unwrap();
        for name in &finger_meta.members {
            assert!(!arm_meta.members.contains(name));
        }
        // Finger base slot is bound, the other segments are holes-free
        // members without slots
        assert_eq!(finger_meta.control_slots.len(), 1);
        assert!(finger_meta.control_slots[0].is_some());
    }

    #[test]
    fn test_quick_select_collects_bound_controls() {
        let (registry, mut scene) = setup();
        let arm = finalized(&registry, &mut scene, "arm");
        let leg = finalized(&registry, &mut scene, "leg");
        build_rig(&registry, &mut scene, &arm, &BuildArgs::new()).unwrap();
        build_rig(&registry, &mut scene, &leg, &BuildArgs::new()).unwrap();

        let members = quick_select_members(&scene);
        assert!(members.contains(&"arm0_l_wrist_ctl".to_string()));
        assert!(members.contains(&"leg0_l_ankle_ctl".to_string()));
        assert_eq!(members.len(), 6);
    }
}
