//! Procedural character-rig construction.
//!
//! The crate splits into a capability layer and the rigging tools built
//! on top of it:
//!
//! - [`scene`]: the in-memory scene graph (nodes, hierarchy, transforms,
//!   attributes, dataflow connections, parent constraints) plus RON
//!   save/load
//! - [`part`]: typed skeleton parts, discovered from node metadata, with
//!   alignment, finalize digests, mirror driving and rebuild
//! - [`registry`]: the part-type registry and build-argument handling
//! - [`rig`]: container-wrapped animator rigs built over finalized parts
//! - [`spaces`]: one-hot space switching on rig controls
//! - [`trigger`]: per-node connection slots and menu-command templates
//! - [`session`]: host-session toggles behind RAII guards
//!
//! Everything persistent lives in the scene itself (node metadata and the
//! scene file), so any handle here can be rebuilt from a loaded scene.

pub mod error;
pub mod math;
pub mod part;
pub mod registry;
pub mod rig;
pub mod scene;
pub mod session;
pub mod spaces;
pub mod trigger;

pub use error::RigError;
pub use part::{Part, Side};
pub use registry::{ArgValue, BuildArgs, PartRegistry, PartType};
pub use scene::{NodeId, Scene};
pub use session::SessionState;
