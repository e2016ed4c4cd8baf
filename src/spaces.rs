//! Space switching
//!
//! A control gets a "space" enum selector plus a parent-constrained space
//! node inserted above it. Each target drives one constraint weight
//! through a compare node keyed to its ordinal, so exactly one weight is
//! hot for any selector value and switching is a single enum change.
//!
//! The wiring per control:
//!
//! ```text
//! ctl.space --> cmp_i.input     (one compare per target, ordinal = i)
//! cmp_i.output --> cnode.w{i}   (constraint weight)
//! ```
//!
//! Skipped axes are pinned on the space node to their pre-switch literal
//! value, so the constraint writes every channel except those.

use serde::{Deserialize, Serialize};

use crate::error::RigError;
use crate::scene::{AttrDef, AttrValue, Channel, NodeId, NodeKind, Scene};
use crate::trigger;

/// Selector attribute added to the control.
pub const SPACE_ATTR: &str = "space";

/// One registered space target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceTarget {
    pub target: NodeId,
    pub label: String,
    /// Compare node keyed to this target's ordinal
    pub compare: NodeId,
}

/// Space-switch state for one control, keyed by the control in the scene.
/// Stored by id so the binding survives renames of everything involved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceBinding {
    /// Inserted transform the constraint actually drives
    pub space: NodeId,
    /// Constraint anchor under the space node
    pub constraint: NodeId,
    /// Where the control hung before the space node was inserted
    pub original_parent: Option<NodeId>,
    pub targets: Vec<SpaceTarget>,
}

fn selector_labels(targets: &[SpaceTarget]) -> Vec<String> {
    targets.iter().map(|t| t.label.clone()).collect()
}

fn switch_menu_command(ordinal: usize) -> String {
    format!("#.{} = {}", SPACE_ATTR, ordinal)
}

/// Insert the space node above `ctl` and set up the empty multiplexer.
fn install_binding(scene: &mut Scene, ctl: NodeId) {
    let original_parent = scene.parent(ctl);
    let space_name = format!("{}_space", scene.name(ctl));
    let space = scene.spawn(NodeKind::Transform, &space_name);

    // The space node sits at the parent's frame with identity local, so
    // reparenting the control under it leaves the control's own channel
    // values (and anything they drive) untouched
    scene.set_parent(space, original_parent);
    scene.set_parent(ctl, Some(space));

    let constraint = scene.add_parent_constraint(space);

    scene.add_attr(
        ctl,
        AttrDef::new(
            SPACE_ATTR,
            AttrValue::Enum { index: 0, labels: Vec::new() },
        )
        .keyable()
        .hidden(),
    );

    scene.spaces.insert(
        ctl,
        SpaceBinding { space, constraint, original_parent, targets: Vec::new() },
    );
}

/// Register `target` as a space for `ctl`, returning the compare node that
/// gates its weight. Adding a target that is already registered is a no-op
/// returning the existing compare, so callers never need to check first.
///
/// `skip_translation` / `skip_rotation` channels are excluded from the
/// constraint and held at their current value.
pub fn add(
    scene: &mut Scene,
    ctl: NodeId,
    target: NodeId,
    label: &str,
    skip_translation: &[Channel],
    skip_rotation: &[Channel],
) -> NodeId {
    if let Some(binding) = scene.spaces.get(ctl) {
        if let Some(existing) = binding.targets.iter().find(|t| t.target == target) {
            return existing.compare;
        }
    }
    if !scene.spaces.contains(ctl) {
        install_binding(scene, ctl);
    }

    let binding = scene.spaces.get(ctl).unwrap().clone();

    // Capture skipped-axis literals before any wiring can move the node
    for &channel in skip_translation.iter().chain(skip_rotation) {
        let value = scene.channel(binding.space, channel);
        scene.pin_channel(binding.space, channel, value);
    }

    let ordinal = scene.add_constraint_target(binding.constraint, target);
    let compare_name = format!("{}_space{}_cmp", scene.name(ctl), ordinal);
    let compare = scene.spawn(NodeKind::Compare, &compare_name);
    scene.set_attr_f32(compare, "ordinal", ordinal as f32);
    scene.connect(ctl, SPACE_ATTR, compare, "input");
    scene.connect(compare, "output", binding.constraint, &format!("w{}", ordinal));

    let binding = scene.spaces.get_mut(ctl).unwrap();
    binding.targets.push(SpaceTarget {
        target,
        label: label.to_string(),
        compare,
    });
    let labels = selector_labels(&binding.targets);
    if let Some(def) = scene.attr_def_mut(ctl, SPACE_ATTR) {
        if let AttrValue::Enum { labels: l, .. } = &mut def.value {
            *l = labels;
        }
    }

    // Right-click switch entry; ordinal-addressed so it survives renames
    // of the target (resolve reads the label text, not the node)
    trigger::add_menu_item(
        scene,
        ctl,
        &format!("switch to {}", label),
        &switch_menu_command(ordinal),
    );

    // Re-push the selector so the new weight picks up its one-hot value
    let selector = scene.attr_f32(ctl, SPACE_ATTR).unwrap_or(0.0);
    scene.set_attr_f32(ctl, SPACE_ATTR, selector);

    compare
}

/// Register several targets at once. Labels pair positionally.
pub fn build(scene: &mut Scene, ctl: NodeId, targets: &[(NodeId, &str)]) -> Vec<NodeId> {
    targets
        .iter()
        .map(|(target, label)| add(scene, ctl, *target, label, &[], &[]))
        .collect()
}

/// Registered spaces for a control, in ordinal order.
pub fn spaces(scene: &Scene, ctl: NodeId) -> Vec<(NodeId, String)> {
    scene
        .spaces
        .get(ctl)
        .map(|b| b.targets.iter().map(|t| (t.target, t.label.clone())).collect())
        .unwrap_or_default()
}

/// The inserted space node for a control, if it has a space switch.
pub fn space_node(scene: &Scene, ctl: NodeId) -> Option<NodeId> {
    scene.spaces.get(ctl).map(|b| b.space)
}

/// Switch the control's active space by label.
pub fn switch_to(scene: &mut Scene, ctl: NodeId, label: &str) -> Result<(), RigError> {
    let ordinal = scene
        .spaces
        .get(ctl)
        .and_then(|b| b.targets.iter().position(|t| t.label == label))
        .ok_or_else(|| RigError::NoSuchSpaceTarget {
            control: scene.name(ctl).to_string(),
            target: label.to_string(),
        })?;
    scene.set_attr_f32(ctl, SPACE_ATTR, ordinal as f32);
    Ok(())
}

/// Unregister `target` from the control's space switch.
///
/// Removing a middle target renumbers everything behind it: compare
/// ordinals, weight attributes, enum labels, and the ordinal-addressed
/// menu commands. Removing the last remaining target tears the whole
/// switch down and hands the control back to its original parent.
pub fn remove_space(scene: &mut Scene, ctl: NodeId, target: NodeId) -> Result<(), RigError> {
    let not_found = |scene: &Scene| RigError::NoSuchSpaceTarget {
        control: scene.name(ctl).to_string(),
        target: scene.name(target).to_string(),
    };
    let binding = match scene.spaces.get(ctl) {
        Some(b) => b.clone(),
        None => return Err(not_found(scene)),
    };
    let idx = binding
        .targets
        .iter()
        .position(|t| t.target == target)
        .ok_or_else(|| not_found(scene))?;

    if binding.targets.len() == 1 {
        teardown(scene, ctl, &binding);
        return Ok(());
    }

    scene.delete(binding.targets[idx].compare);
    scene.remove_constraint_target(binding.constraint, idx);

    let binding = scene.spaces.get_mut(ctl).unwrap();
    binding.targets.remove(idx);
    // Later ordinals shift down by one
    let renumber: Vec<NodeId> = binding.targets[idx..].iter().map(|t| t.compare).collect();
    let labels = selector_labels(&binding.targets);
    for (offset, compare) in renumber.into_iter().enumerate() {
        scene.set_attr_f32(compare, "ordinal", (idx + offset) as f32);
    }
    if let Some(def) = scene.attr_def_mut(ctl, SPACE_ATTR) {
        if let AttrValue::Enum { index, labels: l } = &mut def.value {
            *l = labels;
            *index = (*index).clamp(0, (l.len() as i64 - 1).max(0));
        }
    }

    // Menu entries: drop the removed ordinal, renumber the ones behind it
    let removed = switch_menu_command(idx);
    trigger::retain_items(scene, ctl, |item| item.command != removed);
    trigger::map_item_commands(scene, ctl, |command| {
        let prefix = format!("#.{} = ", SPACE_ATTR);
        match command.strip_prefix(&prefix).and_then(|n| n.parse::<usize>().ok()) {
            Some(n) if n > idx => switch_menu_command(n - 1),
            _ => command.to_string(),
        }
    });

    // Re-push the (possibly clamped) selector through the new wiring
    let selector = scene.attr_f32(ctl, SPACE_ATTR).unwrap_or(0.0);
    scene.set_attr_f32(ctl, SPACE_ATTR, selector);
    Ok(())
}

/// Remove the last target's machinery and restore the original hierarchy.
fn teardown(scene: &mut Scene, ctl: NodeId, binding: &SpaceBinding) {
    for space_target in &binding.targets {
        scene.delete(space_target.compare);
    }
    scene.set_parent_keep_world(ctl, binding.original_parent);
    scene.unpin_all(binding.space);
    scene.remove_attr(ctl, SPACE_ATTR);
    scene.delete(binding.space); // Anchor is a child, goes with it
    scene.spaces.remove(ctl);

    let prefix = format!("#.{} = ", SPACE_ATTR);
    trigger::retain_items(scene, ctl, |item| !item.command.starts_with(&prefix));
}
