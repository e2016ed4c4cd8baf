//! Finalize digests
//!
//! Finalizing a part records, per member, a change-detection digest of its
//! local translation, local rotation, and parent identity. The digest's
//! hash is a fast-path inequality check over fixed-precision values; it is
//! never the sole authority. On a hash miss the stored raw values decide,
//! tolerating numeric drift up to 1e-6 and namespace-only differences in
//! the parent name (referenced scenes prefix names with `ns:`).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::Part;
use crate::error::RigError;
use crate::math::Vec3;
use crate::scene::{NodeId, Scene};

/// Metadata key carrying the per-member digest record.
pub const META_DIGEST: &str = "rig.digest";

/// Quantization factor for the hash fast path.
const HASH_QUANTUM: f64 = 1e7;
/// Raw-value drift tolerated when the hash misses.
const TOLERANCE: f32 = 1e-6;

/// Per-member finalize record. Raw values ride along with the hash so a
/// miss can be adjudicated exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestRecord {
    pub hash: u64,
    pub translation: Vec3,
    pub rotation: Vec3,
    /// Direct parent's name at finalize time ("" for roots)
    pub parent: String,
    /// Excluded from verification (intentionally animatable member)
    #[serde(default)]
    pub skip_verify: bool,
}

fn quantize(v: f32) -> i64 {
    (v as f64 * HASH_QUANTUM).round() as i64
}

fn member_hash(translation: Vec3, rotation: Vec3, parent: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    for v in [
        translation.x,
        translation.y,
        translation.z,
        rotation.x,
        rotation.y,
        rotation.z,
    ] {
        quantize(v).hash(&mut hasher);
    }
    parent.hash(&mut hasher);
    hasher.finish()
}

fn parent_name(scene: &Scene, node: NodeId) -> String {
    scene
        .parent(node)
        .map(|p| scene.name(p).to_string())
        .unwrap_or_default()
}

/// Name without any `ns:` reference prefix.
fn strip_namespace(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// The stored digest record for a member, if it has been finalized.
pub fn record(scene: &Scene, member: NodeId) -> Option<DigestRecord> {
    scene
        .meta(member, META_DIGEST)
        .and_then(|raw| ron::from_str(raw).ok())
}

/// Record the part's current pose as its finalized state. Re-finalizing
/// overwrites the records but keeps any skip-verify flags.
pub fn finalize(scene: &mut Scene, part: &Part) -> Result<(), RigError> {
    for &member in &part.members {
        let t = scene.local(member);
        let parent = parent_name(scene, member);
        let skip_verify = record(scene, member).map(|r| r.skip_verify).unwrap_or(false);
        let rec = DigestRecord {
            hash: member_hash(t.translation, t.rotation, &parent),
            translation: t.translation,
            rotation: t.rotation,
            parent,
            skip_verify,
        };
        scene.set_meta(member, META_DIGEST, ron::to_string(&rec)?);
    }
    Ok(())
}

/// Exclude (or re-include) a member from digest verification. The member
/// must already be finalized: the flag lives inside its record.
pub fn set_skip_verify(scene: &mut Scene, member: NodeId, skip: bool) -> Result<(), RigError> {
    let mut rec = record(scene, member).ok_or_else(|| {
        RigError::Validation(format!(
            "'{}' has no finalize digest to flag",
            scene.name(member)
        ))
    })?;
    rec.skip_verify = skip;
    scene.set_meta(member, META_DIGEST, ron::to_string(&rec)?);
    Ok(())
}

/// Whether every member still matches its finalize record. A member with
/// no record (never finalized) fails; flagged members are skipped.
pub fn compare_against_hash(scene: &Scene, part: &Part) -> bool {
    for &member in &part.members {
        let Some(rec) = record(scene, member) else {
            return false;
        };
        if rec.skip_verify {
            continue;
        }
        let t = scene.local(member);
        let parent = parent_name(scene, member);
        if member_hash(t.translation, t.rotation, &parent) == rec.hash {
            continue;
        }
        // Hash missed: adjudicate on the raw values
        if strip_namespace(&parent) != strip_namespace(&rec.parent) {
            return false;
        }
        if t.translation.max_abs_diff(rec.translation) > TOLERANCE {
            return false;
        }
        if t.rotation.max_abs_diff(rec.rotation) > TOLERANCE {
            return false;
        }
    }
    true
}
