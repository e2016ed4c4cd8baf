//! Builtin part types
//!
//! The shipped skeleton vocabulary: root, spine, arm, leg, finger. Each
//! type builds its joints at sensible default offsets (build args stretch
//! or resize them) and declares which of its rig controls the container
//! binds by name.

use crate::error::RigError;
use crate::math::Vec3;
use crate::registry::{ArgValue, BuildArgs, PartType, RigBuildCtx, RigBuildOutput};
use crate::scene::{NodeId, NodeKind, Scene, Transform};

/// Every part type shipped with the crate.
pub fn builtin_types() -> Vec<Box<dyn PartType>> {
    vec![
        Box::new(RootPart),
        Box::new(SpinePart),
        Box::new(ArmPart),
        Box::new(LegPart),
        Box::new(FingerPart),
    ]
}

/// Spawn a joint chain, each joint parented to the previous one.
fn build_chain(scene: &mut Scene, prefix: &str, joints: &[(String, Vec3)]) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut prev: Option<NodeId> = None;
    for (joint, offset) in joints {
        let node = scene.spawn(NodeKind::Joint, &format!("{}_{}", prefix, joint));
        scene.set_parent(node, prev);
        scene.set_local(node, Transform::from_translation(*offset));
        out.push(node);
        prev = Some(node);
    }
    out
}

fn float_arg(args: &BuildArgs, key: &str, fallback: f32) -> f32 {
    args.get(key).and_then(|v| v.as_float()).unwrap_or(fallback)
}

fn int_arg(args: &BuildArgs, key: &str, fallback: i64) -> i64 {
    args.get(key).and_then(|v| v.as_int()).unwrap_or(fallback)
}

// =============================================================================
// Root
// =============================================================================

/// Single ground joint everything else hangs under.
pub struct RootPart;

impl PartType for RootPart {
    fn name(&self) -> &str {
        "root"
    }

    fn sided(&self) -> bool {
        false
    }

    fn joint_names(&self) -> &[&str] {
        &["root"]
    }

    fn default_args(&self) -> BuildArgs {
        BuildArgs::new()
    }

    fn build_joints(&self, scene: &mut Scene, prefix: &str, _args: &BuildArgs) -> Vec<NodeId> {
        build_chain(scene, prefix, &[("root".to_string(), Vec3::ZERO)])
    }

    fn control_names(&self) -> &[&str] {
        &["root"]
    }

    fn build_rig(&self, ctx: &mut RigBuildCtx) -> Result<RigBuildOutput, RigError> {
        let controls = crate::rig::fk_chain(ctx.scene, &ctx.part.members);
        Ok(RigBuildOutput { controls: controls.into_iter().map(Some).collect() })
    }
}

// =============================================================================
// Spine
// =============================================================================

/// Hips-to-chest column with a configurable number of middle joints.
pub struct SpinePart;

impl PartType for SpinePart {
    fn name(&self) -> &str {
        "spine"
    }

    fn sided(&self) -> bool {
        false
    }

    fn joint_names(&self) -> &[&str] {
        &["hips", "chest"]
    }

    fn default_args(&self) -> BuildArgs {
        let mut args = BuildArgs::new();
        args.insert("joints".to_string(), ArgValue::Int(3));
        args.insert("height".to_string(), ArgValue::Float(4.5));
        args
    }

    fn build_joints(&self, scene: &mut Scene, prefix: &str, args: &BuildArgs) -> Vec<NodeId> {
        let middles = int_arg(args, "joints", 3).max(0) as usize;
        let height = float_arg(args, "height", 4.5);
        let step = height / (middles + 1) as f32;

        let mut joints = vec![("hips".to_string(), Vec3::new(0.0, 10.0, 0.0))];
        for i in 0..middles {
            joints.push((format!("spine{:02}", i + 1), Vec3::new(0.0, step, 0.0)));
        }
        joints.push(("chest".to_string(), Vec3::new(0.0, step, 0.0)));
        build_chain(scene, prefix, &joints)
    }

    fn control_names(&self) -> &[&str] {
        &["hips", "chest"]
    }

    fn build_rig(&self, ctx: &mut RigBuildCtx) -> Result<RigBuildOutput, RigError> {
        let hips = ctx.part.members[0];
        let chest = *ctx.part.members.last().unwrap();
        let controls = crate::rig::fk_chain(ctx.scene, &[hips, chest]);
        Ok(RigBuildOutput { controls: controls.into_iter().map(Some).collect() })
    }
}

// =============================================================================
// Arm
// =============================================================================

/// Shoulder, elbow, wrist. The rig build also rigs any finger parts the
/// user has hung under the wrist.
pub struct ArmPart;

impl PartType for ArmPart {
    fn name(&self) -> &str {
        "arm"
    }

    fn joint_names(&self) -> &[&str] {
        &["shoulder", "elbow", "wrist"]
    }

    fn default_args(&self) -> BuildArgs {
        let mut args = BuildArgs::new();
        args.insert("length".to_string(), ArgValue::Float(6.0));
        args.insert("up_vector".to_string(), ArgValue::Vec3(Vec3::Z));
        args.insert("align_invert".to_string(), ArgValue::Bool(false));
        args
    }

    fn build_joints(&self, scene: &mut Scene, prefix: &str, args: &BuildArgs) -> Vec<NodeId> {
        let half = float_arg(args, "length", 6.0) * 0.5;
        build_chain(
            scene,
            prefix,
            &[
                ("shoulder".to_string(), Vec3::new(2.0, 14.0, 0.0)),
                ("elbow".to_string(), Vec3::new(half, 0.0, -0.3)),
                ("wrist".to_string(), Vec3::new(half, 0.0, 0.3)),
            ],
        )
    }

    fn control_names(&self) -> &[&str] {
        &["shoulder", "elbow", "wrist"]
    }

    fn build_rig(&self, ctx: &mut RigBuildCtx) -> Result<RigBuildOutput, RigError> {
        let controls = crate::rig::fk_chain(ctx.scene, &ctx.part.members);

        let wrist = ctx.part.members[2];
        for finger in parts_under(ctx, wrist, "finger")? {
            crate::rig::build_rig(ctx.registry, ctx.scene, &finger, &BuildArgs::new())?;
        }

        Ok(RigBuildOutput { controls: controls.into_iter().map(Some).collect() })
    }
}

/// Parts of one type whose base is a descendant of `under`.
fn parts_under(
    ctx: &mut RigBuildCtx,
    under: NodeId,
    type_name: &str,
) -> Result<Vec<super::Part>, RigError> {
    let mut out = Vec::new();
    for node in ctx.scene.descendants(under) {
        if ctx.scene.meta(node, super::META_PART).is_none() {
            continue;
        }
        let part = super::Part::init_from_item(ctx.registry, ctx.scene, node)?;
        if part.type_name == type_name {
            out.push(part);
        }
    }
    Ok(out)
}

// =============================================================================
// Leg
// =============================================================================

/// Hip, knee, ankle, ball. The ball joint stays unrigged; it exists for
/// foot-roll setups layered on later.
pub struct LegPart;

impl PartType for LegPart {
    fn name(&self) -> &str {
        "leg"
    }

    fn joint_names(&self) -> &[&str] {
        &["hip", "knee", "ankle", "ball"]
    }

    fn default_args(&self) -> BuildArgs {
        let mut args = BuildArgs::new();
        args.insert("length".to_string(), ArgValue::Float(9.0));
        args.insert("up_vector".to_string(), ArgValue::Vec3(Vec3::Z));
        args.insert("align_invert".to_string(), ArgValue::Bool(false));
        args
    }

    fn build_joints(&self, scene: &mut Scene, prefix: &str, args: &BuildArgs) -> Vec<NodeId> {
        let half = float_arg(args, "length", 9.0) * 0.5;
        build_chain(
            scene,
            prefix,
            &[
                ("hip".to_string(), Vec3::new(1.0, 10.0, 0.0)),
                ("knee".to_string(), Vec3::new(0.0, -half, 0.4)),
                ("ankle".to_string(), Vec3::new(0.0, -half, -0.4)),
                ("ball".to_string(), Vec3::new(0.0, -1.0, 1.3)),
            ],
        )
    }

    fn control_names(&self) -> &[&str] {
        &["hip", "knee", "ankle"]
    }

    fn build_rig(&self, ctx: &mut RigBuildCtx) -> Result<RigBuildOutput, RigError> {
        let controls = crate::rig::fk_chain(ctx.scene, &ctx.part.members[..3]);
        Ok(RigBuildOutput { controls: controls.into_iter().map(Some).collect() })
    }
}

// =============================================================================
// Finger
// =============================================================================

/// Uniform segment chain; segment count is a build arg, so members are
/// numbered rather than named.
pub struct FingerPart;

impl PartType for FingerPart {
    fn name(&self) -> &str {
        "finger"
    }

    fn joint_names(&self) -> &[&str] {
        &[]
    }

    fn default_args(&self) -> BuildArgs {
        let mut args = BuildArgs::new();
        args.insert("joints".to_string(), ArgValue::Int(3));
        args.insert("spacing".to_string(), ArgValue::Float(0.4));
        args
    }

    fn build_joints(&self, scene: &mut Scene, prefix: &str, args: &BuildArgs) -> Vec<NodeId> {
        let count = int_arg(args, "joints", 3).max(1) as usize;
        let spacing = float_arg(args, "spacing", 0.4);

        let mut joints = vec![(format!("{:02}", 1), Vec3::new(0.5, 0.0, 0.0))];
        for i in 1..count {
            joints.push((format!("{:02}", i + 1), Vec3::new(spacing, 0.0, 0.0)));
        }
        build_chain(scene, prefix, &joints)
    }

    fn control_names(&self) -> &[&str] {
        &["base"]
    }

    fn build_rig(&self, ctx: &mut RigBuildCtx) -> Result<RigBuildOutput, RigError> {
        let controls = crate::rig::fk_chain(ctx.scene, &ctx.part.members);
        // Only the base segment gets a bound slot; the rest are plain
        // container members
        Ok(RigBuildOutput { controls: vec![controls.first().copied()] })
    }
}
