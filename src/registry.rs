//! Part type registry
//!
//! An owned registry service mapping persisted type names back to their
//! implementations, so parts read out of an old scene can be reconstructed
//! without a structural reference. Built once at startup and passed to
//! consumers; nothing here is global.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RigError;
use crate::math::Vec3;
use crate::part::Part;
use crate::scene::{NodeId, Scene};

/// One build-argument value. Serialized (as RON) into part metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f32),
    Vec3(Vec3),
    Str(String),
}

impl ArgValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            ArgValue::Float(f) => Some(*f),
            ArgValue::Int(i) => Some(*i as f32),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            ArgValue::Vec3(v) => Some(*v),
            _ => None,
        }
    }
}

/// Keyword build arguments, merged against a type's declared defaults.
pub type BuildArgs = BTreeMap<String, ArgValue>;

/// Merge caller args over a type's defaults. Unknown keys are rejected so
/// a typo in a build call fails loudly instead of silently doing nothing.
pub fn merge_args(
    type_name: &str,
    defaults: &BuildArgs,
    overrides: &BuildArgs,
) -> Result<BuildArgs, RigError> {
    let mut merged = defaults.clone();
    for (key, value) in overrides {
        if !merged.contains_key(key) {
            return Err(RigError::UnknownArg {
                part_type: type_name.to_string(),
                arg: key.clone(),
            });
        }
        merged.insert(key.clone(), value.clone());
    }
    Ok(merged)
}

/// What a rig build call hands back to the container builder: one entry
/// per declared control name, in declaration order. `None` leaves a hole
/// in the container's binding list.
pub struct RigBuildOutput {
    pub controls: Vec<Option<NodeId>>,
}

/// Everything a rig build function gets to work with.
pub struct RigBuildCtx<'a> {
    pub scene: &'a mut Scene,
    pub registry: &'a PartRegistry,
    pub part: &'a Part,
    pub args: &'a BuildArgs,
}

/// A concrete skeleton part type.
///
/// Implementations are stateless: everything per-instance lives in the
/// scene (joints, metadata) or in the build args.
pub trait PartType {
    /// Persisted type name. Must be stable across releases: old scenes
    /// reference it by string.
    fn name(&self) -> &str;

    /// Whether index parity gives this type a left/right side. Centered
    /// types (spine, root) report false and are always parity-neutral.
    fn sided(&self) -> bool {
        true
    }

    /// Joint names in chain order; member node names are `{part}_{joint}`.
    fn joint_names(&self) -> &[&str];

    /// Declared build-argument defaults. Unknown caller args are rejected
    /// against this set.
    fn default_args(&self) -> BuildArgs;

    /// Create this part's joints under `prefix` naming, returning members
    /// in chain order (base first). Joints are parented in sequence.
    fn build_joints(&self, scene: &mut Scene, prefix: &str, args: &BuildArgs) -> Vec<NodeId>;

    /// Orient the chain. The container runs this exactly once at create
    /// time, inside the alignment guard.
    fn align(&self, scene: &mut Scene, members: &[NodeId], args: &BuildArgs) {
        crate::part::align::aim_chain_align(scene, members, args);
    }

    /// Control names this type's rig build declares, in binding-slot order.
    fn control_names(&self) -> &[&str] {
        &[]
    }

    /// Build animator controls for a finalized part. Types without a rig
    /// build report `NoSuchPrimitive`.
    fn build_rig(&self, ctx: &mut RigBuildCtx) -> Result<RigBuildOutput, RigError> {
        let _ = ctx;
        Err(RigError::NoSuchPrimitive(self.name().to_string()))
    }
}

/// Registry of all concrete part types, keyed by persisted name.
#[derive(Default)]
pub struct PartRegistry {
    types: Vec<Box<dyn PartType>>,
}

impl PartRegistry {
    /// An empty registry. Most callers want `with_builtin_types`.
    pub fn new() -> Self {
        Self { types: Vec::new() }
    }

    /// A registry with every shipped part type registered.
    pub fn with_builtin_types() -> Self {
        let mut registry = Self::new();
        for part_type in crate::part::types::builtin_types() {
            registry.register(part_type);
        }
        registry
    }

    /// Register a part type. Two types with the same persisted name is a
    /// programming error, not scene data - panic immediately.
    pub fn register(&mut self, part_type: Box<dyn PartType>) {
        assert!(
            self.resolve(part_type.name()).is_none(),
            "part type '{}' registered twice",
            part_type.name()
        );
        self.types.push(part_type);
    }

    /// Look up a type by persisted name. A miss returns None rather than
    /// erroring: legacy scenes may reference types that no longer exist,
    /// and callers decide whether that is fatal.
    pub fn resolve(&self, name: &str) -> Option<&dyn PartType> {
        self.types
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// All registered type names, in registration order.
    pub fn type_names(&self) -> Vec<&str> {
        self.types.iter().map(|t| t.name()).collect()
    }
}
