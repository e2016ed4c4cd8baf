//! Skeleton parts
//!
//! A part is a typed joint chain (arm, leg, spine...) identified by its
//! type name plus a unique per-type index. Everything a part knows about
//! itself is persisted as node metadata on its base joint, so a `Part`
//! handle can be reconstructed from any member node in a loaded scene
//! without any registry of live objects.
//!
//! Metadata keys:
//! - `rig.part`       RON `PartMeta` on the base member
//! - `rig.part_base`  base member's name, on every other member
//! - `rig.digest`     RON finalize digest, per member (see `digest`)

pub mod align;
pub mod digest;
pub mod mirror;
pub mod rebuild;
pub mod types;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::RigError;
use crate::registry::{merge_args, BuildArgs, PartRegistry};
use crate::scene::{NodeId, Scene};
use crate::session::{AutokeySuspend, PreserveCurrentTime, SessionState, UndoChunk, ViewportPause};

/// Metadata key carrying `PartMeta` on the base member.
pub const META_PART: &str = "rig.part";
/// Metadata key on non-base members, holding the base member's name.
pub const META_BASE: &str = "rig.part_base";

/// Current part metadata schema version. Readers accept anything up to
/// this; the schema has only ever grown.
pub const PART_VERSION: u32 = 2;

/// Persisted part record, written to the base member at create time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartMeta {
    pub type_name: String,
    pub version: u32,
    pub index: u32,
    /// Merged build arguments, replayed on rebuild
    pub args: BuildArgs,
}

/// Which side of the character a part sits on. Derived from index parity
/// for sided types; centered types are always `Center`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
    Center,
}

impl Side {
    pub fn tag(self) -> &'static str {
        match self {
            Side::Left => "l",
            Side::Right => "r",
            Side::Center => "m",
        }
    }

}

fn side_for(sided: bool, index: u32) -> Side {
    if !sided {
        Side::Center
    } else if index % 2 == 0 {
        Side::Left
    } else {
        Side::Right
    }
}

/// Node-name prefix for a part instance, e.g. `arm0_l` or `spine0_m`.
pub fn part_prefix(type_name: &str, index: u32, side: Side) -> String {
    format!("{}{}_{}", type_name, index, side.tag())
}

/// Handle to one part instance. Cheap to rebuild from the scene; holds no
/// state the scene does not.
#[derive(Debug, Clone)]
pub struct Part {
    pub type_name: String,
    pub index: u32,
    sided: bool,
    /// Member joints in chain order, base first
    pub members: Vec<NodeId>,
}

impl Part {
    pub fn base(&self) -> NodeId {
        self.members[0]
    }

    pub fn side(&self) -> Side {
        side_for(self.sided, self.index)
    }

    pub fn prefix(&self) -> String {
        part_prefix(&self.type_name, self.index, self.side())
    }

    /// Create a new part instance: allocate an index, build the joints,
    /// stamp the metadata, and run the type's alignment once.
    pub fn create(
        registry: &PartRegistry,
        scene: &mut Scene,
        type_name: &str,
        overrides: &BuildArgs,
    ) -> Result<Part, RigError> {
        Self::create_with_index(registry, scene, type_name, overrides, None)
    }

    /// `create` with a caller-chosen index. Rebuild uses this to give the
    /// replacement part the identity of the one it deleted.
    pub(crate) fn create_with_index(
        registry: &PartRegistry,
        scene: &mut Scene,
        type_name: &str,
        overrides: &BuildArgs,
        forced_index: Option<u32>,
    ) -> Result<Part, RigError> {
        let part_type = registry
            .resolve(type_name)
            .ok_or_else(|| RigError::UnknownType(type_name.to_string()))?;
        let args = merge_args(type_name, &part_type.default_args(), overrides)?;

        let index = match forced_index {
            Some(index) => {
                let in_use = indices_of_type(scene, type_name);
                assert!(
                    !in_use.contains(&index),
                    "duplicate index {} for part type '{}': scene metadata is corrupt",
                    index,
                    type_name
                );
                index
            }
            None => allocate_index(scene, type_name),
        };
        let side = side_for(part_type.sided(), index);
        let prefix = part_prefix(type_name, index, side);

        let members = part_type.build_joints(scene, &prefix, &args);
        assert!(
            !members.is_empty(),
            "part type '{}' built no joints",
            type_name
        );

        let meta = PartMeta {
            type_name: type_name.to_string(),
            version: PART_VERSION,
            index,
            args: args.clone(),
        };
        scene.set_meta(members[0], META_PART, ron::to_string(&meta)?);
        let base_name = scene.name(members[0]).to_string();
        for &member in &members[1..] {
            scene.set_meta(member, META_BASE, base_name.clone());
        }

        {
            let mut guard = align::AlignGuard::new(scene, &members);
            part_type.align(guard.scene(), &members, &args);
        }

        Ok(Part {
            type_name: type_name.to_string(),
            index,
            sided: part_type.sided(),
            members,
        })
    }

    /// Reconstruct the part owning `node`, which may be any member or any
    /// descendant of one. Walks the node and its ancestors for part
    /// metadata; a node with no part anywhere above it is a domain error.
    pub fn init_from_item(
        registry: &PartRegistry,
        scene: &Scene,
        node: NodeId,
    ) -> Result<Part, RigError> {
        let base = find_base(scene, node)
            .ok_or_else(|| RigError::NoPartMetadata(scene.name(node).to_string()))?;
        let raw = scene
            .meta(base, META_PART)
            .ok_or_else(|| RigError::NoPartMetadata(scene.name(node).to_string()))?;
        let meta: PartMeta = ron::from_str(raw)?;
        if meta.version > PART_VERSION {
            return Err(RigError::Validation(format!(
                "part metadata on '{}' has version {} (supported: {})",
                scene.name(base),
                meta.version,
                PART_VERSION
            )));
        }
        let part_type = registry
            .resolve(&meta.type_name)
            .ok_or_else(|| RigError::UnknownType(meta.type_name.clone()))?;

        // Members resolve through the same walk as `node` did, so a stale
        // base link (renamed base) still lands on the right part
        let mut rest: Vec<NodeId> = scene
            .all_nodes()
            .into_iter()
            .filter(|&n| {
                scene.meta(n, META_BASE).is_some() && find_base(scene, n) == Some(base)
            })
            .collect();
        // Chain order is ancestry order
        rest.sort_by_key(|&n| scene.depth(n));

        let mut members = vec![base];
        members.extend(rest);
        Ok(Part {
            type_name: meta.type_name,
            index: meta.index,
            sided: part_type.sided(),
            members,
        })
    }

    /// The persisted metadata record on this part's base member.
    pub fn meta(&self, scene: &Scene) -> Result<PartMeta, RigError> {
        let raw = scene
            .meta(self.base(), META_PART)
            .ok_or_else(|| RigError::NoPartMetadata(scene.name(self.base()).to_string()))?;
        Ok(ron::from_str(raw)?)
    }

    /// Record the current pose as this part's finalized state.
    pub fn finalize(&self, scene: &mut Scene) -> Result<(), RigError> {
        digest::finalize(scene, self)
    }

    /// Whether the part still matches its finalize digest. Never finalized
    /// counts as not matching.
    pub fn matches_digest(&self, scene: &Scene) -> bool {
        digest::compare_against_hash(scene, self)
    }
}

/// Walk from `node` up its ancestry looking for part metadata: either a
/// base member directly, or a non-base member pointing at its base.
fn find_base(scene: &Scene, node: NodeId) -> Option<NodeId> {
    let mut current = Some(node);
    while let Some(n) = current {
        if scene.meta(n, META_PART).is_some() {
            return Some(n);
        }
        if let Some(base_name) = scene.meta(n, META_BASE) {
            if let Some(base) = scene.find(base_name) {
                return Some(base);
            }
            // Dangling base link (the base was renamed); keep walking,
            // the base itself still carries the part record
        }
        current = scene.parent(n);
    }
    None
}

/// Indices in use for a part type, in scene scan order.
fn indices_of_type(scene: &Scene, type_name: &str) -> Vec<u32> {
    let mut out = Vec::new();
    for node in scene.all_nodes() {
        if let Some(raw) = scene.meta(node, META_PART) {
            if let Ok(meta) = ron::from_str::<PartMeta>(raw) {
                if meta.type_name == type_name {
                    out.push(meta.index);
                }
            }
        }
    }
    out
}

/// Allocate the smallest free index for a type. Two parts claiming the
/// same index means the scene metadata is corrupt; continuing would give
/// two nodes the same name prefix, so panic rather than guess.
fn allocate_index(scene: &Scene, type_name: &str) -> u32 {
    let indices = indices_of_type(scene, type_name);
    let mut seen = HashSet::new();
    for index in &indices {
        assert!(
            seen.insert(*index),
            "duplicate index {} for part type '{}': scene metadata is corrupt",
            index,
            type_name
        );
    }
    (0..).find(|i| !seen.contains(i)).unwrap()
}

/// Every part in the scene, discovered by metadata scan. Unreadable parts
/// (unregistered type, corrupt record) are logged and skipped so one bad
/// part never hides the rest.
pub fn iter_all_parts(registry: &PartRegistry, scene: &Scene) -> Vec<Part> {
    let mut out = Vec::new();
    for node in scene.all_nodes() {
        if scene.meta(node, META_PART).is_none() {
            continue;
        }
        match Part::init_from_item(registry, scene, node) {
            Ok(part) => out.push(part),
            Err(e) => log::warn!("skipping part on '{}': {}", scene.name(node), e),
        }
    }
    out
}

/// Parts of one type, for index bookkeeping and mirror pairing.
pub fn parts_of_type(registry: &PartRegistry, scene: &Scene, type_name: &str) -> Vec<Part> {
    iter_all_parts(registry, scene)
        .into_iter()
        .filter(|p| p.type_name == type_name)
        .collect()
}

/// Finalize every part in the scene as one undo step. The progress
/// callback gets (done, total) and can return false to stop early;
/// per-part failures are logged and skipped. Returns the finalize count.
pub fn finalize_all(
    scene: &mut Scene,
    registry: &PartRegistry,
    session: &SessionState,
    mut progress: Option<&mut dyn FnMut(usize, usize) -> bool>,
) -> usize {
    let parts = iter_all_parts(registry, scene);
    let _pause = ViewportPause::new(session);
    let _chunk = UndoChunk::open(session, "finalize all parts");
    let total = parts.len();
    let mut done = 0;
    for (i, part) in parts.iter().enumerate() {
        if let Some(report) = progress.as_mut() {
            if !report(i, total) {
                log::info!("finalize interrupted at {}/{}", i, total);
                break;
            }
        }
        match part.finalize(scene) {
            Ok(()) => done += 1,
            Err(e) => log::warn!("finalize failed for '{}': {}", part.prefix(), e),
        }
    }
    done
}

/// Rebuild every part with its stored args, same batch contract as
/// `finalize_all`.
pub fn rebuild_all(
    scene: &mut Scene,
    registry: &PartRegistry,
    session: &SessionState,
    mut progress: Option<&mut dyn FnMut(usize, usize) -> bool>,
) -> usize {
    let parts = iter_all_parts(registry, scene);
    let _pause = ViewportPause::new(session);
    let _autokey = AutokeySuspend::new(session);
    let _time = PreserveCurrentTime::new(session);
    let _chunk = UndoChunk::open(session, "rebuild all parts");
    let total = parts.len();
    let mut done = 0;
    for (i, part) in parts.iter().enumerate() {
        if let Some(report) = progress.as_mut() {
            if !report(i, total) {
                log::info!("rebuild interrupted at {}/{}", i, total);
                break;
            }
        }
        match rebuild::rebuild(registry, scene, part, &BuildArgs::new()) {
            Ok(_) => done += 1,
            Err(e) => log::warn!("rebuild failed for '{}': {}", part.prefix(), e),
        }
    }
    done
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ArgValue;

    fn setup() -> (PartRegistry, Scene) {
        (PartRegistry::with_builtin_types(), Scene::new())
    }

    #[test]
    fn test_create_names_and_parity() {
        let (registry, mut scene) = setup();
        let left = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        let right = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        let spine = Part::create(&registry, &mut scene, "spine", &BuildArgs::new()).unwrap();

        assert_eq!(left.side(), Side::Left);
        assert_eq!(right.side(), Side::Right);
        assert_eq!(spine.side(), Side::Center);
        assert_eq!(scene.name(left.base()), "arm0_l_shoulder");
        assert_eq!(scene.name(right.base()), "arm1_r_shoulder");
    }

    #[test]
    fn test_indices_fill_smallest_gap() {
        let (registry, mut scene) = setup();
        let a = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        let b = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        let c = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        assert_eq!((a.index, b.index, c.index), (0, 1, 2));

        // Deleting the middle part frees its index for the next create
        scene.delete(b.base());
        let d = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        assert_eq!(d.index, 1);

        let indices: HashSet<u32> = parts_of_type(&registry, &scene, "arm")
            .iter()
            .map(|p| p.index)
            .collect();
        assert_eq!(indices, HashSet::from([0, 1, 2]));
    }

    #[test]
    #[should_panic(expected = "duplicate index")]
    fn test_duplicate_index_panics() {
        let (registry, mut scene) = setup();
        let a = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        let b = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();

        // Corrupt the second part's record to claim index 0 as well
        let mut meta = b.meta(&scene).unwrap();
        meta.index = a.index;
        scene.set_meta(b.base(), META_PART, ron::to_string(&meta).unwrap());

        let _ = Part::create(&registry, &mut scene, "arm", &BuildArgs::new());
    }

    #[test]
    fn test_rediscovery_from_any_member() {
        let (registry, mut scene) = setup();
        let part = Part::create(&registry, &mut scene, "leg", &BuildArgs::new()).unwrap();

        for &member in &part.members {
            let found = Part::init_from_item(&registry, &scene, member).unwrap();
            assert_eq!(found.type_name, "leg");
            assert_eq!(found.index, part.index);
            assert_eq!(found.members, part.members);
        }

        // A child hung under a member resolves to the same part
        let prop = scene.spawn(crate::scene::NodeKind::Locator, "prop");
        scene.set_parent(prop, Some(part.members[2]));
        let found = Part::init_from_item(&registry, &scene, prop).unwrap();
        assert_eq!(found.members, part.members);
    }

    #[test]
    fn test_rediscovery_survives_rename() {
        let (registry, mut scene) = setup();
        let part = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        // Renaming the tip leaves its base pointer intact
        scene.rename(part.members[2], "wristy");
        let found = Part::init_from_item(&registry, &scene, part.members[2]).unwrap();
        assert_eq!(found.members, part.members);
    }

    #[test]
    fn test_rediscovery_survives_base_rename() {
        let (registry, mut scene) = setup();
        let part = Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        // Renaming the base dangles every other member's base pointer;
        // the ancestor walk still reaches the part record
        scene.rename(part.base(), "clavicle");
        let found = Part::init_from_item(&registry, &scene, part.members[1]).unwrap();
        assert_eq!(found.members, part.members);
    }

    #[test]
    fn test_no_metadata_is_domain_error() {
        let (registry, mut scene) = setup();
        let stray = scene.spawn(crate::scene::NodeKind::Transform, "stray");
        assert!(matches!(
            Part::init_from_item(&registry, &scene, stray),
            Err(RigError::NoPartMetadata(_))
        ));
    }

    #[test]
    fn test_unknown_type_and_arg_errors() {
        let (registry, mut scene) = setup();
        assert!(matches!(
            Part::create(&registry, &mut scene, "tentacle", &BuildArgs::new()),
            Err(RigError::UnknownType(_))
        ));

        let mut bad = BuildArgs::new();
        bad.insert("lenght".to_string(), ArgValue::Float(2.0));
        assert!(matches!(
            Part::create(&registry, &mut scene, "arm", &bad),
            Err(RigError::UnknownArg { .. })
        ));
    }

    #[test]
    fn test_finalize_all_counts_and_skips() {
        let (registry, mut scene) = setup();
        let session = SessionState::new();
        Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        Part::create(&registry, &mut scene, "leg", &BuildArgs::new()).unwrap();

        let done = finalize_all(&mut scene, &registry, &session, None);
        assert_eq!(done, 2);
        assert_eq!(session.undo_log(), vec!["finalize all parts".to_string()]);
    }

    #[test]
    fn test_progress_callback_can_interrupt() {
        let (registry, mut scene) = setup();
        let session = SessionState::new();
        Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();
        Part::create(&registry, &mut scene, "arm", &BuildArgs::new()).unwrap();

        let mut calls = 0;
        let done = finalize_all(
            &mut scene,
            &registry,
            &session,
            Some(&mut |i, _total| {
                calls += 1;
                i == 0 // Stop before the second part
            }),
        );
        assert_eq!(calls, 2);
        assert_eq!(done, 1);
    }
}
