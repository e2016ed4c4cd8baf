//! Node attributes and transform channels
//!
//! Two kinds of per-node state live here:
//! - the local `Transform` every node carries (translation, euler rotation
//!   in degrees, uniform scale), addressed per-channel for connections and
//!   locking
//! - dynamic typed attributes added at runtime (space-switch selectors,
//!   compare inputs/outputs, constraint weights)

use serde::{Deserialize, Serialize};

use crate::math::{mat4_from_position_rotation, Mat4, Vec3};

/// Local transform relative to parent (or world if no parent).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Position relative to parent
    pub translation: Vec3,
    /// Rotation in euler angles (degrees), Z * Y * X order
    pub rotation: Vec3,
    /// Uniform scale factor
    pub scale: f32,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        translation: Vec3::ZERO,
        rotation: Vec3::ZERO,
        scale: 1.0,
    };

    pub fn from_translation(translation: Vec3) -> Self {
        Self { translation, ..Self::IDENTITY }
    }

    /// Convert to a 4x4 transformation matrix.
    pub fn to_matrix(&self) -> Mat4 {
        let base = mat4_from_position_rotation(self.translation, self.rotation);
        if (self.scale - 1.0).abs() < 1e-4 {
            base
        } else {
            let mut result = base;
            for row in result.iter_mut().take(3) {
                for v in row.iter_mut().take(3) {
                    *v *= self.scale;
                }
            }
            result
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// One keyable transform channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Tx,
    Ty,
    Tz,
    Rx,
    Ry,
    Rz,
}

impl Channel {
    pub const TRANSLATE: [Channel; 3] = [Channel::Tx, Channel::Ty, Channel::Tz];
    pub const ROTATE: [Channel; 3] = [Channel::Rx, Channel::Ry, Channel::Rz];
    pub const ALL: [Channel; 6] = [
        Channel::Tx,
        Channel::Ty,
        Channel::Tz,
        Channel::Rx,
        Channel::Ry,
        Channel::Rz,
    ];

    /// Attribute name this channel is addressed by in connections.
    pub fn attr_name(self) -> &'static str {
        match self {
            Channel::Tx => "tx",
            Channel::Ty => "ty",
            Channel::Tz => "tz",
            Channel::Rx => "rx",
            Channel::Ry => "ry",
            Channel::Rz => "rz",
        }
    }

    /// Reverse of `attr_name`.
    pub fn from_attr_name(name: &str) -> Option<Channel> {
        Channel::ALL.into_iter().find(|c| c.attr_name() == name)
    }

    pub fn is_translation(self) -> bool {
        matches!(self, Channel::Tx | Channel::Ty | Channel::Tz)
    }

    /// Read this channel out of a transform.
    pub fn get(self, t: &Transform) -> f32 {
        match self {
            Channel::Tx => t.translation.x,
            Channel::Ty => t.translation.y,
            Channel::Tz => t.translation.z,
            Channel::Rx => t.rotation.x,
            Channel::Ry => t.rotation.y,
            Channel::Rz => t.rotation.z,
        }
    }

    /// Write this channel into a transform.
    pub fn set(self, t: &mut Transform, value: f32) {
        match self {
            Channel::Tx => t.translation.x = value,
            Channel::Ty => t.translation.y = value,
            Channel::Tz => t.translation.z = value,
            Channel::Rx => t.rotation.x = value,
            Channel::Ry => t.rotation.y = value,
            Channel::Rz => t.rotation.z = value,
        }
    }
}

/// Per-channel lock flags for translate/rotate.
///
/// Locks gate user-level `set_channel` calls; dataflow connections write
/// through them, matching host-engine behavior where a driven attribute
/// may still be locked against manual edits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLocks {
    flags: u8,
}

impl ChannelLocks {
    fn bit(channel: Channel) -> u8 {
        1 << (channel as u8)
    }

    pub fn is_locked(&self, channel: Channel) -> bool {
        self.flags & Self::bit(channel) != 0
    }

    pub fn set_locked(&mut self, channel: Channel, locked: bool) {
        if locked {
            self.flags |= Self::bit(channel);
        } else {
            self.flags &= !Self::bit(channel);
        }
    }

    pub fn any_locked(&self) -> bool {
        self.flags != 0
    }
}

/// Value of a dynamic attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f32),
    Vec3(Vec3),
    Str(String),
    /// Enum selector: current index plus display labels, one per choice
    Enum { index: i64, labels: Vec<String> },
}

impl AttrValue {
    /// Numeric view of the value, used when propagating through dataflow
    /// connections (enum selectors feed compare nodes as their index).
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            AttrValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            AttrValue::Int(i) => Some(*i as f32),
            AttrValue::Float(f) => Some(*f),
            AttrValue::Enum { index, .. } => Some(*index as f32),
            AttrValue::Vec3(_) | AttrValue::Str(_) => None,
        }
    }

    /// Write a numeric value into this attribute, keeping its type.
    pub fn set_f32(&mut self, value: f32) {
        match self {
            AttrValue::Bool(b) => *b = value != 0.0,
            AttrValue::Int(i) => *i = value.round() as i64,
            AttrValue::Float(f) => *f = value,
            AttrValue::Enum { index, labels } => {
                let max = labels.len().saturating_sub(1) as i64;
                *index = (value.round() as i64).clamp(0, max);
            }
            AttrValue::Vec3(_) | AttrValue::Str(_) => {}
        }
    }
}

/// A dynamic attribute on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrDef {
    pub name: String,
    pub value: AttrValue,
    /// Shown in the channel box / keyable by the animator
    pub keyable: bool,
    /// Hidden from the UI (utility plumbing)
    pub hidden: bool,
    pub locked: bool,
}

impl AttrDef {
    pub fn new(name: &str, value: AttrValue) -> Self {
        Self {
            name: name.to_string(),
            value,
            keyable: false,
            hidden: false,
            locked: false,
        }
    }

    pub fn keyable(mut self) -> Self {
        self.keyable = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_round_trip() {
        let mut t = Transform::IDENTITY;
        Channel::Ry.set(&mut t, 45.0);
        assert_eq!(Channel::Ry.get(&t), 45.0);
        assert_eq!(t.rotation.y, 45.0);
    }

    #[test]
    fn test_channel_attr_names() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_attr_name(channel.attr_name()), Some(channel));
        }
        assert_eq!(Channel::from_attr_name("visibility"), None);
    }

    #[test]
    fn test_locks() {
        let mut locks = ChannelLocks::default();
        assert!(!locks.any_locked());

        locks.set_locked(Channel::Tx, true);
        locks.set_locked(Channel::Rz, true);
        assert!(locks.is_locked(Channel::Tx));
        assert!(locks.is_locked(Channel::Rz));
        assert!(!locks.is_locked(Channel::Ty));

        locks.set_locked(Channel::Tx, false);
        assert!(!locks.is_locked(Channel::Tx));
        assert!(locks.any_locked());
    }

    #[test]
    fn test_enum_clamps_to_labels() {
        let mut v = AttrValue::Enum {
            index: 0,
            labels: vec!["world".into(), "hip".into()],
        };
        v.set_f32(5.0);
        assert_eq!(v.as_f32(), Some(1.0));
        v.set_f32(-2.0);
        assert_eq!(v.as_f32(), Some(0.0));
    }
}
