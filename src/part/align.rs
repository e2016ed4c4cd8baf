//! Chain alignment
//!
//! Aligning reorients each joint so its X axis aims down the chain, then
//! freezes the result into the joint's local orientation. The guard makes
//! that safe to run on a posed hierarchy: children are detached to world
//! and channel locks lifted for the duration, and both are restored on
//! drop no matter how the alignment itself exits.

use crate::math::{mat4_aim_x, mat4_mul, mat4_translation, Vec3};
use crate::registry::BuildArgs;
use crate::scene::{ChannelLocks, NodeId, Scene};

/// Scoped setup/teardown around an alignment run.
///
/// On construction: records and clears the members' channel locks, and
/// detaches every child of every member to world (keeping world pose), so
/// reorienting one joint cannot drag the rest of the chain or any props
/// hung off it. On drop: reattaches the children keeping world pose and
/// restores the locks.
pub struct AlignGuard<'a> {
    scene: &'a mut Scene,
    detached: Vec<(NodeId, NodeId)>,
    saved_locks: Vec<(NodeId, ChannelLocks)>,
}

impl<'a> AlignGuard<'a> {
    pub fn new(scene: &'a mut Scene, members: &[NodeId]) -> Self {
        let mut detached = Vec::new();
        let mut saved_locks = Vec::new();
        for &member in members {
            saved_locks.push((member, scene.channel_locks(member)));
            scene.restore_channel_locks(member, ChannelLocks::default());
            for child in scene.children_of(member).to_vec() {
                detached.push((child, member));
                scene.set_parent_keep_world(child, None);
            }
        }
        Self { scene, detached, saved_locks }
    }

    /// The scene, for the alignment algorithm to mutate.
    pub fn scene(&mut self) -> &mut Scene {
        self.scene
    }
}

impl Drop for AlignGuard<'_> {
    fn drop(&mut self) {
        for &(child, parent) in self.detached.iter().rev() {
            if self.scene.is_alive(child) && self.scene.is_alive(parent) {
                self.scene.set_parent_keep_world(child, Some(parent));
            }
        }
        for &(member, locks) in &self.saved_locks {
            self.scene.restore_channel_locks(member, locks);
        }
    }
}

/// Default alignment: aim each joint's X axis at the next member in the
/// chain. The tip copies the previous joint's orientation so it ends up
/// with zero local rotation after reattachment; a single-joint part just
/// zeroes its rotation.
///
/// Args honored: `up_vector` (Vec3 secondary hint, default +Z) and
/// `align_invert` (Bool, aim down the chain instead of up it).
///
/// Must run inside an `AlignGuard`: members are assumed detached, so each
/// one's world pose is its local pose.
pub fn aim_chain_align(scene: &mut Scene, members: &[NodeId], args: &BuildArgs) {
    let up = args
        .get("up_vector")
        .and_then(|v| v.as_vec3())
        .unwrap_or(Vec3::Z);
    let invert = args
        .get("align_invert")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    for i in 0..members.len() {
        let pos = scene.world_position(members[i]);
        if i + 1 < members.len() {
            let mut aim = scene.world_position(members[i + 1]) - pos;
            if invert {
                aim = aim.scale(-1.0);
            }
            let rot = mat4_aim_x(aim, up);
            let world = mat4_mul(&mat4_translation(pos), &rot);
            scene.set_world_matrix(members[i], &world);
        } else if i > 0 {
            // Tip: inherit the previous joint's frame
            let prev = scene.world_matrix(members[i - 1]);
            let mut world = prev;
            world[0][3] = pos.x;
            world[1][3] = pos.y;
            world[2][3] = pos.z;
            scene.set_world_matrix(members[i], &world);
        } else {
            let mut t = scene.local(members[i]);
            t.rotation = Vec3::ZERO;
            scene.set_local(members[i], t);
        }
    }
}
