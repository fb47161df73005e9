//! Systems, their per-tick context, and the deferred command buffer.

use std::any::TypeId;

use tessera_scene::{NodeKey, NodeState, SceneTree};

use crate::component::Component;
use crate::entity::Entity;
use crate::query::{Query, QuerySet};

/// Handle returned when a system is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId(pub(crate) usize);

/// Which role runs a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemSide {
    Server,
    Client,
    Both,
}

impl SystemSide {
    pub fn runs_on_server(self) -> bool {
        matches!(self, SystemSide::Server | SystemSide::Both)
    }

    pub fn runs_on_client(self) -> bool {
        matches!(self, SystemSide::Client | SystemSide::Both)
    }
}

/// Per-tick logic over materialized query results.
pub trait System {
    fn name(&self) -> &str;

    /// Named queries, read once at registration.
    fn queries(&self) -> Vec<(String, Query)>;

    /// Runs one tick. Structural changes go through [`SystemContext::commands`]
    /// and are applied after every system has run.
    fn run(&mut self, ctx: &mut SystemContext<'_>, queries: &QuerySet);

    /// Called on registration, after queries are seeded.
    fn start(&mut self) {}

    /// Called on removal, after queries are cleared.
    fn stop(&mut self) {}
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub(crate) enum Command {
    AddComponent(NodeKey, Box<dyn Component>),
    RemoveComponent(NodeKey, TypeId),
    Despawn(NodeKey),
}

/// Deferred structural changes queued by systems.
#[derive(Default)]
pub struct Commands {
    pending: Vec<Command>,
}

impl Commands {
    pub fn add_component<C: Component>(&mut self, entity: NodeKey, component: C) {
        self.pending
            .push(Command::AddComponent(entity, Box::new(component)));
    }

    pub fn remove_component<C: Component>(&mut self, entity: NodeKey) {
        self.pending
            .push(Command::RemoveComponent(entity, TypeId::of::<C>()));
    }

    /// Requests removal of the entity. Despawns are handed to the owner of
    /// the ECS, which also has to tell peers.
    pub fn despawn(&mut self, entity: NodeKey) {
        self.pending.push(Command::Despawn(entity));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn drain(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.pending)
    }
}

// ---------------------------------------------------------------------------
// SystemContext
// ---------------------------------------------------------------------------

/// What a system sees while it runs.
pub struct SystemContext<'a> {
    pub tree: &'a mut SceneTree,
    /// Seconds since the previous tick.
    pub dt: f32,
    /// `true` on the server.
    pub authoritative: bool,
    pub(crate) commands: &'a mut Commands,
}

impl SystemContext<'_> {
    pub fn commands(&mut self) -> &mut Commands {
        self.commands
    }

    pub fn entity(&self, key: NodeKey) -> Option<&Entity> {
        self.tree.behavior_as::<Entity>(key)
    }

    pub fn entity_mut(&mut self, key: NodeKey) -> Option<&mut Entity> {
        self.tree.behavior_as_mut::<Entity>(key)
    }

    pub fn component<C: Component>(&self, key: NodeKey) -> Option<&C> {
        self.entity(key)?.get::<C>()
    }

    pub fn component_mut<C: Component>(&mut self, key: NodeKey) -> Option<&mut C> {
        self.entity_mut(key)?.get_mut::<C>()
    }

    /// Node state and entity of `key`, borrowed together.
    pub fn entity_parts_mut(&mut self, key: NodeKey) -> Option<(&mut NodeState, &mut Entity)> {
        let (state, behavior) = self.tree.parts_mut(key)?;
        let entity = behavior?.as_any_mut().downcast_mut::<Entity>()?;
        Some((state, entity))
    }
}
