//! Mirror driving
//!
//! One part can drive another of the same type member-for-member. Same
//! parity (left driving left) is plain channel connections; opposite
//! parity routes every channel through a mirror node that negates the
//! side axis. Driven channels are locked against manual edits for the
//! duration; `break_driver` undoes the whole arrangement and restores the
//! lock state captured before driving.

use serde::{Deserialize, Serialize};

use super::Part;
use crate::error::RigError;
use crate::scene::{Channel, ChannelLocks, NodeKind, Scene};

/// Metadata key on the driven part's base member.
pub const META_DRIVER: &str = "rig.driver";

/// Persisted record of an active drive, written to the driven base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverMeta {
    /// Driver part's base member name
    pub driver_base: String,
    /// Mirror utility nodes created for the drive (empty for same parity)
    pub mirror_nodes: Vec<String>,
    /// Driven members' lock state before driving, in member order
    pub prior_locks: Vec<ChannelLocks>,
}

/// The active drive on a part, if any.
pub fn driver_of(scene: &Scene, part: &Part) -> Option<DriverMeta> {
    scene
        .meta(part.base(), META_DRIVER)
        .and_then(|raw| ron::from_str(raw).ok())
}

/// Connect `driver`'s channels to `driven`'s, member for member.
///
/// Mismatched types or chain lengths are authoring bugs, not scene data,
/// and panic. An existing drive on `driven` is broken first.
pub fn drive_other_part(
    scene: &mut Scene,
    driver: &Part,
    driven: &Part,
) -> Result<(), RigError> {
    assert_eq!(
        driver.type_name, driven.type_name,
        "mirror driving across part types ('{}' -> '{}')",
        driver.type_name, driven.type_name
    );
    assert_eq!(
        driver.members.len(),
        driven.members.len(),
        "mismatched mirrored-chain lengths for '{}' -> '{}'",
        driver.prefix(),
        driven.prefix()
    );

    break_driver(scene, driven)?;

    let prior_locks: Vec<ChannelLocks> = driven
        .members
        .iter()
        .map(|&m| scene.channel_locks(m))
        .collect();

    let cross_side = driver.side() != driven.side();
    // With a common parent the two chains live in one frame, so the side
    // axis translation flips; mirrored parent chains already account for it.
    let shared_parent = scene.parent(driver.base()) == scene.parent(driven.base());

    let mut mirror_nodes = Vec::new();
    for (i, (&src, &dst)) in driver.members.iter().zip(&driven.members).enumerate() {
        if !cross_side {
            for channel in Channel::ALL {
                scene.connect(src, channel.attr_name(), dst, channel.attr_name());
            }
        } else {
            // Only the base translates in the common frame; child members
            // translate along their own chain and copy straight over
            let kind = NodeKind::MirrorTransform {
                flip_translation: [shared_parent && i == 0, false, false],
                flip_rotation: [false, true, true],
            };
            let name = format!("{}_mirror", scene.name(dst));
            let mirror = scene.spawn(kind, &name);
            for channel in Channel::ALL {
                let attr = channel.attr_name();
                scene.connect(src, attr, mirror, &format!("in_{}", attr));
                scene.connect(mirror, &format!("out_{}", attr), dst, attr);
            }
            mirror_nodes.push(scene.name(mirror).to_string());
        }
    }

    for &member in &driven.members {
        for channel in Channel::ALL {
            scene.set_locked(member, channel, true);
        }
    }

    let meta = DriverMeta {
        driver_base: scene.name(driver.base()).to_string(),
        mirror_nodes,
        prior_locks,
    };
    scene.set_meta(driven.base(), META_DRIVER, ron::to_string(&meta)?);
    Ok(())
}

/// Undo an active drive on `part`: disconnect its channels, delete any
/// mirror nodes, and restore the pre-drive lock state. Returns whether a
/// drive was actually broken; a part with no driver is a no-op.
pub fn break_driver(scene: &mut Scene, part: &Part) -> Result<bool, RigError> {
    let Some(meta) = driver_of(scene, part) else {
        return Ok(false);
    };

    for &member in &part.members {
        for channel in Channel::ALL {
            scene.disconnect_input(member, channel.attr_name());
        }
    }
    for name in &meta.mirror_nodes {
        if let Some(node) = scene.find(name) {
            scene.delete(node);
        }
    }
    for (&member, &locks) in part.members.iter().zip(&meta.prior_locks) {
        scene.restore_channel_locks(member, locks);
    }
    scene.clear_meta(part.base(), META_DRIVER);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{BuildArgs, PartRegistry};

    fn arm_pair() -> (Scene, Part, Part) {
        let registry = PartRegistry::with_builtin_types();
        let mut scene = Scene::new();
        let left = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        let right = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        (scene, left, right)
    }

    #[test]
    fn test_cross_side_drive_mirrors_channels() {
        let (mut scene, left, right) = arm_pair();
        drive_other_part(&mut scene, &left, &right).unwrap();

        scene.set_channel(left.members[1], Channel::Ry, 30.0);
        assert!((scene.channel(right.members[1], Channel::Ry) + 30.0).abs() < 1e-4);

        // Both bases are roots (shared parent): side axis translation flips
        scene.set_channel(left.members[0], Channel::Tx, 4.0);
        assert!((scene.channel(right.members[0], Channel::Tx) + 4.0).abs() < 1e-4);
        // Vertical translation copies straight over
        scene.set_channel(left.members[0], Channel::Ty, 2.0);
        assert!((scene.channel(right.members[0], Channel::Ty) - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_driven_channels_locked_against_manual_edits() {
        let (mut scene, left, right) = arm_pair();
        drive_other_part(&mut scene, &left, &right).unwrap();

        scene.set_channel(left.members[1], Channel::Rz, 10.0);
        let driven = scene.channel(right.members[1], Channel::Rz);
        scene.set_channel(right.members[1], Channel::Rz, 77.0);
        assert_eq!(scene.channel(right.members[1], Channel::Rz), driven);
    }

    #[test]
    fn test_break_driver_restores_everything() {
        let (mut scene, left, right) = arm_pair();
        scene.set_locked(right.members[0], Channel::Tz, true);
        drive_other_part(&mut scene, &left, &right).unwrap();

        scene.set_channel(left.members[1], Channel::Ry, 30.0);
        let held = scene.channel(right.members[1], Channel::Ry);

        assert!(break_driver(&mut scene, &right).unwrap());
        // Second break is a no-op
        assert!(!break_driver(&mut scene, &right).unwrap());

        // Driver motion no longer reaches the old driven part
        scene.set_channel(left.members[1], Channel::Ry, 60.0);
        assert_eq!(scene.channel(right.members[1], Channel::Ry), held);

        // Pre-drive lock state came back: Tz stays locked, Ry does not
        assert!(scene.is_locked(right.members[0], Channel::Tz));
        assert!(!scene.is_locked(right.members[1], Channel::Ry));

        // Mirror utility nodes are gone
        assert!(scene.find(&format!("{}_mirror", scene.name(right.members[0]))).is_none());
    }

    #[test]
    fn test_same_parity_drive_copies_directly() {
        let registry = PartRegistry::with_builtin_types();
        let mut scene = Scene::new();
        let a = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        let _b = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        let c = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        assert_eq!(a.side(), c.side());

        drive_other_part(&mut scene, &a, &c).unwrap();
        scene.set_channel(a.members[2], Channel::Rx, 15.0);
        assert!((scene.channel(c.members[2], Channel::Rx) - 15.0).abs() < 1e-4);
        // No mirror nodes for same parity
        assert!(driver_of(&scene, &c).unwrap().mirror_nodes.is_empty());
    }

    #[test]
    #[should_panic(expected = "mismatched mirrored-chain lengths")]
    fn test_chain_length_mismatch_panics() {
        let (mut scene, left, right) = arm_pair();
        let mut short = right.clone();
        short.members.pop();
        let _ = drive_other_part(&mut scene, &left, &short);
    }
}
