//! Generic object tree shared by the server and its clients.
//!
//! Nodes live in an arena ([`SceneTree`]) addressed by generational
//! [`NodeKey`]s. Each node carries plain [`NodeState`] (name, spatial data,
//! metadata, group tags, unique id) and an optional [`Behavior`] that can
//! expose the [`Replicable`] and [`Persistable`] capabilities.
//!
//! On top of the tree this crate provides:
//! - [`IdentityRegistry`]: stable `u32` ids for replicated nodes.
//! - [`TypeRegistry`]: name → factory lookup used when decoding.
//! - [`codec`]: node subtree ↔ [`Value`](tessera_value::Value) documents.
//! - [`SaveStore`]: category-based save files with a SHA-256 tamper hash.

pub mod behavior;
pub mod codec;
pub mod error;
pub mod groups;
pub mod identity;
pub mod save;
pub mod spatial;
pub mod tree;
pub mod types;

pub use behavior::{Behavior, Persistable, Replicable};
pub use codec::{EncodeMode, decode, encode, encode_children};
pub use error::{CodecError, IdentityError, SaveError};
pub use identity::{IdentityRegistry, SELF_ONLY_START, UniqueId};
pub use save::{DiskStore, FileStore, MemoryStore, SaveCategory, SaveStore};
pub use spatial::{PositionOverride, Spatial, SpatialKind};
pub use tree::{Node, NodeKey, NodeState, SceneTree};
pub use types::TypeRegistry;
