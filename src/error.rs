//! Error type for rig construction
//!
//! One enum for the whole crate. Invariant violations (duplicate unique
//! index, mismatched mirrored-chain lengths) are *not* represented here:
//! those indicate data corruption or authoring bugs and panic instead.

/// Error type for rig operations
#[derive(Debug)]
pub enum RigError {
    /// Build argument not declared by the part type
    UnknownArg { part_type: String, arg: String },
    /// Part type name not present in the registry (raised by callers that
    /// treat a miss as fatal; `PartRegistry::resolve` itself returns None)
    UnknownType(String),
    /// No part metadata on the node or anywhere in its ancestor chain
    NoPartMetadata(String),
    /// Rig build attempted against a part whose members no longer match
    /// their finalize digest (or that was never finalized)
    StalePart(String),
    /// The part type declares no rig build function
    NoSuchPrimitive(String),
    /// Space-switch target is not registered on the control
    NoSuchSpaceTarget { control: String, target: String },
    /// No rig container owns the node
    NoContainer(String),
    /// Scene file failed validation on load
    Validation(String),
    /// File I/O error
    Io(String),
    /// Serialization/deserialization error
    Serialization(String),
}

impl std::fmt::Display for RigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RigError::UnknownArg { part_type, arg } => {
                write!(f, "unknown build argument '{}' for part type '{}'", arg, part_type)
            }
            RigError::UnknownType(name) => write!(f, "unknown part type '{}'", name),
            RigError::NoPartMetadata(node) => {
                write!(f, "no part metadata found on '{}' or any ancestor", node)
            }
            RigError::StalePart(part) => write!(
                f,
                "part '{}' is not finalized (or has been modified since finalize); \
                 align and finalize it before building a rig",
                part
            ),
            RigError::NoSuchPrimitive(name) => {
                write!(f, "part type '{}' has no rig build function", name)
            }
            RigError::NoSuchSpaceTarget { control, target } => {
                write!(f, "'{}' is not a space target of '{}'", target, control)
            }
            RigError::NoContainer(node) => write!(f, "no rig container owns '{}'", node),
            RigError::Validation(msg) => write!(f, "validation error: {}", msg),
            RigError::Io(msg) => write!(f, "I/O error: {}", msg),
            RigError::Serialization(msg) => write!(f, "serialization error: {}", msg),
        }
    }
}

impl std::error::Error for RigError {}

impl From<std::io::Error> for RigError {
    fn from(e: std::io::Error) -> Self {
        RigError::Io(e.to_string())
    }
}

impl From<ron::Error> for RigError {
    fn from(e: ron::Error) -> Self {
        RigError::Serialization(e.to_string())
    }
}

impl From<ron::error::SpannedError> for RigError {
    fn from(e: ron::error::SpannedError) -> Self {
        RigError::Serialization(e.to_string())
    }
}
