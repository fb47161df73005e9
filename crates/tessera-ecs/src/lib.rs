//! Entity-component-system layered on the shared object tree.
//!
//! An entity is a tree node whose behavior is an [`Entity`]: a set of
//! [`Component`]s keyed by type. The [`Ecs`] tracks which nodes are live
//! entities, runs [`System`]s over incrementally maintained [`Query`] results,
//! and keeps replication dirty flags up to date as entities and components
//! come and go.

mod component;
mod ecs;
mod entity;
mod query;
mod system;
pub mod systems;

pub use component::{Component, ComponentRegistry, Health, Movement, NetworkTransform};
pub use ecs::{ECS_NODE_NAME, ECS_TYPE, ENTITY_TYPE, Ecs, EcsEvent, EcsRoot};
pub use entity::{ComponentChange, Entity};
pub use query::{Query, QuerySet};
pub use system::{Commands, System, SystemContext, SystemId, SystemSide};
