//! Part rebuild
//!
//! Rebuilding tears a part down and recreates it with its stored build
//! args (optionally overridden), then puts the world back the way it was:
//! member world transforms are restored by joint-name pairing, children
//! hung off members are reattached, and any mirror drives touching the
//! part are re-established. Joints that only exist on one side of the
//! rebuild (say, a finger grown from three segments to five) keep their
//! freshly built pose.

use std::collections::HashMap;

use super::{iter_all_parts, mirror, Part};
use crate::error::RigError;
use crate::math::Mat4;
use crate::registry::{merge_args, BuildArgs, PartRegistry};
use crate::scene::{NodeId, Scene};

/// Member name with the part prefix stripped, used to pair old and new
/// members across a rebuild.
fn member_suffix(name: &str, prefix: &str) -> String {
    name.strip_prefix(prefix)
        .map(|s| s.trim_start_matches('_').to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Rebuild `part` in place, applying `overrides` on top of its stored
/// build args. Returns the replacement part, which keeps the old index.
pub fn rebuild(
    registry: &PartRegistry,
    scene: &mut Scene,
    part: &Part,
    overrides: &BuildArgs,
) -> Result<Part, RigError> {
    let part_type = registry
        .resolve(&part.type_name)
        .ok_or_else(|| RigError::UnknownType(part.type_name.clone()))?;
    let old_meta = part.meta(scene)?;
    let stored = merge_args(&part.type_name, &part_type.default_args(), &old_meta.args)?;
    let replay = merge_args(&part.type_name, &stored, overrides)?;

    // Drives touching this part get broken now and re-established against
    // the replacement at the end
    let base_name = scene.name(part.base()).to_string();
    let incoming = mirror::driver_of(scene, part).map(|m| m.driver_base);
    let outgoing: Vec<String> = iter_all_parts(registry, scene)
        .into_iter()
        .filter(|other| {
            mirror::driver_of(scene, other).map(|m| m.driver_base) == Some(base_name.clone())
        })
        .map(|other| scene.name(other.base()).to_string())
        .collect();
    mirror::break_driver(scene, part)?;
    for name in &outgoing {
        if let Some(node) = scene.find(name) {
            let driven = Part::init_from_item(registry, scene, node)?;
            mirror::break_driver(scene, &driven)?;
        }
    }

    // Snapshot the old members and detach everything hanging off them
    let prefix = part.prefix();
    let mut poses: HashMap<String, Mat4> = HashMap::new();
    let mut orphans: Vec<(NodeId, String)> = Vec::new();
    for &member in &part.members {
        let suffix = member_suffix(scene.name(member), &prefix);
        poses.insert(suffix.clone(), scene.world_matrix(member));
        for child in scene.children_of(member).to_vec() {
            if part.members.contains(&child) {
                continue;
            }
            orphans.push((child, suffix.clone()));
            scene.set_parent_keep_world(child, None);
        }
    }
    let old_parent = scene.parent(part.base());

    for &member in &part.members {
        scene.delete(member);
    }

    let rebuilt = Part::create_with_index(
        registry,
        scene,
        &part.type_name,
        &replay,
        Some(part.index),
    )?;

    if let Some(parent) = old_parent {
        scene.set_parent(rebuilt.base(), Some(parent));
    }

    // Old pose wins over the fresh build wherever names pair up
    let new_prefix = rebuilt.prefix();
    for &member in &rebuilt.members {
        let suffix = member_suffix(scene.name(member), &new_prefix);
        if let Some(world) = poses.get(&suffix) {
            scene.set_world_matrix(member, world);
        }
    }

    for (child, suffix) in orphans {
        if !scene.is_alive(child) {
            continue;
        }
        let target = rebuilt
            .members
            .iter()
            .copied()
            .find(|&m| member_suffix(scene.name(m), &new_prefix) == suffix)
            .unwrap_or(rebuilt.base());
        scene.set_parent_keep_world(child, Some(target));
    }

    // Re-establish drives, unless the rebuild changed the chain length
    if let Some(driver_name) = incoming {
        redrive(registry, scene, &driver_name, &rebuilt)?;
    }
    for name in &outgoing {
        if let Some(node) = scene.find(name) {
            let driven = Part::init_from_item(registry, scene, node)?;
            redrive_pair(scene, &rebuilt, &driven);
        }
    }

    Ok(rebuilt)
}

fn redrive(
    registry: &PartRegistry,
    scene: &mut Scene,
    driver_name: &str,
    driven: &Part,
) -> Result<(), RigError> {
    let Some(node) = scene.find(driver_name) else {
        log::warn!("driver '{}' vanished during rebuild", driver_name);
        return Ok(());
    };
    let driver = Part::init_from_item(registry, scene, node)?;
    redrive_pair(scene, &driver, driven);
    Ok(())
}

fn redrive_pair(scene: &mut Scene, driver: &Part, driven: &Part) {
    if driver.members.len() != driven.members.len() {
        log::warn!(
            "not re-driving '{}' from '{}': chain lengths diverged",
            driven.prefix(),
            driver.prefix()
        );
        return;
    }
    // Same types by construction; length checked above
    let _ = mirror::drive_other_part(scene, driver, driven);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ArgValue;
    use crate::scene::{Channel, NodeKind, Transform};
    use crate::math::Vec3;

    fn setup() -> (PartRegistry, Scene) {
        (PartRegistry::with_builtin_types(), Scene::new())
    }

    #[test]
    fn test_rebuild_preserves_pose_and_index() {
        let (registry, mut scene) = setup();
        let part = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        scene.set_channel(part.base(), Channel::Tx, 3.0);
        scene.set_channel(part.members[1], Channel::Ry, 25.0);
        let worlds: Vec<Vec3> = part.members.iter().map(|&m| scene.world_position(m)).collect();

        let rebuilt = rebuild(&registry, &mut scene, &part, &BuildArgs::new()).unwrap();

        assert_eq!(rebuilt.index, part.index);
        assert_eq!(rebuilt.members.len(), part.members.len());
        assert_eq!(scene.name(rebuilt.base()), "arm0_l_shoulder");
        for (&member, world) in rebuilt.members.iter().zip(&worlds) {
            assert!(scene.world_position(member).max_abs_diff(*world) < 1e-3);
        }
    }

    #[test]
    fn test_rebuild_applies_new_args() {
        let (registry, mut scene) = setup();
        let mut args = BuildArgs::new();
        args.insert("joints".to_string(), ArgValue::Int(3));
        let part = Part::create(&registry, &mut scene, "finger", &args).unwrap();
        assert_eq!(part.members.len(), 3);

        let mut grow = BuildArgs::new();
        grow.insert("joints".to_string(), ArgValue::Int(5));
        let rebuilt = rebuild(&registry, &mut scene, &part, &grow).unwrap();

        assert_eq!(rebuilt.members.len(), 5);
        // The stored record now replays the grown count
        let meta = rebuilt.meta(&scene).unwrap();
        assert_eq!(meta.args.get("joints"), Some(&ArgValue::Int(5)));
    }

    #[test]
    fn test_rebuild_reattaches_children() {
        let (registry, mut scene) = setup();
        let part = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        let wrist = part.members[2];
        let prop = scene.spawn(NodeKind::Locator, "prop");
        scene.set_parent(prop, Some(wrist));
        scene.set_local(prop, Transform::from_translation(Vec3::new(1.0, 0.0, 0.0)));
        let prop_world = scene.world_position(prop);

        let rebuilt = rebuild(&registry, &mut scene, &part, &BuildArgs::new()).unwrap();

        assert!(scene.is_alive(prop));
        assert_eq!(scene.parent(prop), Some(rebuilt.members[2]));
        assert!(scene.world_position(prop).max_abs_diff(prop_world) < 1e-3);
    }

    #[test]
    fn test_rebuild_restores_drive() {
        let (registry, mut scene) = setup();
        let left = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        let right = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        mirror::drive_other_part(&mut scene, &left, &right).unwrap();

        let rebuilt = rebuild(&registry, &mut scene, &right, &BuildArgs::new()).unwrap();

        scene.set_channel(left.members[1], Channel::Ry, 30.0);
        assert!((scene.channel(rebuilt.members[1], Channel::Ry) + 30.0).abs() < 1e-4);
    }

    #[test]
    fn test_rebuild_unknown_arg_errors() {
        let (registry, mut scene) = setup();
        let part = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        let mut bad = BuildArgs::new();
        bad.insert("segments".to_string(), ArgValue::Int(4));
        assert!(matches!(
            rebuild(&registry, &mut scene, &part, &bad),
            Err(RigError::UnknownArg { .. })
        ));
    }
}
