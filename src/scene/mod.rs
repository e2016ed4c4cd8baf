//! In-memory scene graph
//!
//! The capability layer the rig tools build against: nodes, hierarchy,
//! transforms, attributes, dataflow connections, constraints, and
//! node-local string metadata. Everything upstream (parts, containers,
//! space switching, triggers) mutates the scene only through this module.

mod attr;
mod graph;
pub mod io;
mod node;
mod storage;

pub use attr::{AttrDef, AttrValue, Channel, ChannelLocks, Transform};
pub use graph::{Connection, ConstraintTarget, NodeKind, ParentConstraint, Scene};
pub use node::NodeId;
