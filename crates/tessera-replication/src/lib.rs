//! Server-authoritative replication of a [`SceneTree`](tessera_scene::SceneTree).
//!
//! A [`Simulation`] bundles one peer's [`World`] (tree, id registry, type
//! registry, ECS) with its [`Replication`] engine. The server sends a full
//! snapshot to each client on connect, then batched deltas on a fixed
//! interval; clients send their input and may call methods on server objects
//! through [`RpcTable`] registrations.
//!
//! Messages travel through any [`Transport`]; [`MemoryHub`] connects peers
//! inside one process.

mod engine;
mod error;
pub mod input;
pub mod protocol;
pub mod rpc;
mod simulation;
mod timer;
pub mod transport;

pub use engine::{AddOptions, Replication, ReplicationStats, SyncState};
pub use error::{ProtocolError, RpcError};
pub use input::{InputSample, InputState, MouseButton, PressState};
pub use protocol::{DataType, Message, OwnedNode};
pub use rpc::{RpcArg, RpcContext, RpcKind, RpcTable};
pub use simulation::{ECS_ID, ROOT_ID, SCENE_ID, SCENE_NODE_NAME, Simulation, World};
pub use timer::IntervalTimer;
pub use transport::{MemoryHub, MemoryTransport, NetEvent, PeerId, SERVER_PEER, Transport};
