//! The [`Ecs`] service: entity membership, system dispatch, and events.

use std::any::{Any, TypeId};
use std::rc::Rc;

use rustc_hash::FxHashSet;
use tessera_scene::{
    Behavior, CodecError, IdentityRegistry, NodeKey, NodeState, Replicable, SaveCategory,
    SaveError, SaveStore, SceneTree, SpatialKind, TypeRegistry, UniqueId, codec,
};
use tessera_value::Value;
use tracing::{debug, info};

use crate::component::{Component, ComponentRegistry};
use crate::entity::{ComponentChange, Entity};
use crate::query::QuerySet;
use crate::system::{Command, Commands, System, SystemContext, SystemId, SystemSide};

/// Behavior name of entity nodes.
pub const ENTITY_TYPE: &str = "Entity";

/// Behavior name of the ECS root node.
pub const ECS_TYPE: &str = "ECS";

/// Name of the ECS root node under the tree root.
pub const ECS_NODE_NAME: &str = "ECS";

/// Document name used by [`Ecs::save_state`].
const SAVE_NAME: &str = "ecs";

/// Something that happened to the entity set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsEvent {
    EntityAdded(NodeKey),
    EntityRemoved(NodeKey),
    ComponentAdded(NodeKey, &'static str),
    ComponentRemoved(NodeKey, &'static str),
}

// ---------------------------------------------------------------------------
// EcsRoot
// ---------------------------------------------------------------------------

/// Behavior of the ECS root node. Replicates entity membership as
/// `{"E": {name: id}}`.
#[derive(Debug, Default)]
pub struct EcsRoot {
    dirty: bool,
    members: Vec<(String, UniqueId)>,
    received: Option<Vec<UniqueId>>,
}

impl EcsRoot {
    fn new() -> Self {
        Self {
            dirty: true,
            ..Self::default()
        }
    }

    /// Membership last sent or set locally.
    pub fn members(&self) -> &[(String, UniqueId)] {
        &self.members
    }

    fn take_received(&mut self) -> Option<Vec<UniqueId>> {
        self.received.take()
    }
}

impl Behavior for EcsRoot {
    fn type_name(&self) -> &str {
        ECS_TYPE
    }

    fn replicable(&self) -> Option<&dyn Replicable> {
        Some(self)
    }

    fn replicable_mut(&mut self) -> Option<&mut dyn Replicable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Replicable for EcsRoot {
    fn dirty(&self) -> bool {
        self.dirty
    }

    fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    fn write_state(&self, _node: &NodeState) -> Value {
        let mut out = Value::object();
        let list = &mut out["E"];
        list.set(Value::object());
        for (name, id) in &self.members {
            list[name.as_str()].set(*id);
        }
        out
    }

    fn apply_delta(&mut self, _node: &mut NodeState, data: &Value) {
        let ids = data["E"].entries().filter_map(|(_, v)| v.as_u32()).collect();
        self.received = Some(ids);
    }
}

// ---------------------------------------------------------------------------
// Ecs
// ---------------------------------------------------------------------------

struct SystemSlot {
    system: Box<dyn System>,
    queries: QuerySet,
    side: SystemSide,
}

/// Entity set, systems, and their queries for one process.
pub struct Ecs {
    node: NodeKey,
    registry: Rc<ComponentRegistry>,
    entities: Vec<NodeKey>,
    systems: Vec<Option<SystemSlot>>,
    server_order: Vec<SystemId>,
    client_order: Vec<SystemId>,
    events: Vec<EcsEvent>,
    commands: Commands,
    despawn_requests: Vec<NodeKey>,
}

impl Ecs {
    /// Creates the ECS root node under the tree root and registers the
    /// `Entity` behavior (on `Node3D`) with `types`.
    pub fn install(
        tree: &mut SceneTree,
        types: &mut TypeRegistry,
        registry: ComponentRegistry,
    ) -> Result<Self, CodecError> {
        let registry = Rc::new(registry);
        let factory_registry = Rc::clone(&registry);
        types.register_behavior(ENTITY_TYPE, "Node3D", move || {
            Box::new(Entity::new(Rc::clone(&factory_registry)))
        })?;
        types.register_behavior(ECS_TYPE, "Node", || Box::new(EcsRoot::new()))?;

        let node = tree.create_with(
            NodeState::new(ECS_NODE_NAME, "Node", SpatialKind::Plain),
            Some(Box::new(EcsRoot::new())),
        );
        let root = tree.root();
        tree.attach(root, node);

        Ok(Self {
            node,
            registry,
            entities: Vec::new(),
            systems: Vec::new(),
            server_order: Vec::new(),
            client_order: Vec::new(),
            events: Vec::new(),
            commands: Commands::default(),
            despawn_requests: Vec::new(),
        })
    }

    /// The ECS root node. Entities are attached below it.
    pub fn node(&self) -> NodeKey {
        self.node
    }

    pub fn registry(&self) -> &Rc<ComponentRegistry> {
        &self.registry
    }

    /// Creates a detached entity node. Attach it and call
    /// [`add_entity`](Self::add_entity) to make it live.
    pub fn new_entity(&self, tree: &mut SceneTree, name: &str) -> NodeKey {
        let state = NodeState::new(name, "Node3D", SpatialKind::Volumetric);
        let key = tree.create_with(state, Some(Box::new(Entity::new(Rc::clone(&self.registry)))));
        if let Some(entity) = tree.behavior_as_mut::<Entity>(key) {
            entity.bind(key);
        }
        key
    }

    pub fn entities(&self) -> &[NodeKey] {
        &self.entities
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.entities.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    // --- Entity membership ---

    /// Starts tracking `key`. Returns `false` if it is already tracked or is
    /// not an entity node.
    pub fn add_entity(&mut self, tree: &mut SceneTree, key: NodeKey) -> bool {
        if self.contains(key) {
            return false;
        }
        let Some(entity) = tree.behavior_as_mut::<Entity>(key) else {
            return false;
        };
        entity.bind(key);
        // Queries are evaluated against the full component set below.
        entity.take_changes();

        self.entities.push(key);
        self.events.push(EcsEvent::EntityAdded(key));
        let entity = tree.behavior_as::<Entity>(key);
        for slot in self.systems.iter_mut().flatten() {
            for query in slot.queries.iter_mut() {
                query.update(key, entity);
            }
        }
        self.refresh_root(tree);
        true
    }

    /// Stops tracking `key` and runs component destruction callbacks.
    /// The node itself is left to the caller.
    pub fn remove_entity(&mut self, tree: &mut SceneTree, key: NodeKey) -> bool {
        let Some(index) = self.entities.iter().position(|&k| k == key) else {
            return false;
        };
        self.entities.remove(index);
        if let Some(entity) = tree.behavior_as_mut::<Entity>(key) {
            entity.destroy_components();
        }
        self.forget(key);
        self.refresh_root(tree);
        true
    }

    fn forget(&mut self, key: NodeKey) {
        self.events.push(EcsEvent::EntityRemoved(key));
        for slot in self.systems.iter_mut().flatten() {
            for query in slot.queries.iter_mut() {
                query.update(key, None);
            }
        }
    }

    /// Rebuilds the replicated membership list and marks it dirty.
    fn refresh_root(&mut self, tree: &mut SceneTree) {
        let members = self
            .entities
            .iter()
            .filter_map(|&k| {
                let state = tree.state(k)?;
                Some((state.name.clone(), state.unique_id?))
            })
            .collect();
        if let Some(root) = tree.behavior_as_mut::<EcsRoot>(self.node) {
            root.members = members;
            root.dirty = true;
        }
    }

    // --- Components ---

    /// Adds `component` to a tracked entity, replacing one of the same type.
    pub fn add_component<C: Component>(
        &mut self,
        tree: &mut SceneTree,
        key: NodeKey,
        component: C,
    ) -> bool {
        self.add_boxed(tree, key, Box::new(component))
    }

    fn add_boxed(&mut self, tree: &mut SceneTree, key: NodeKey, component: Box<dyn Component>) -> bool {
        let Some(entity) = tree.behavior_as_mut::<Entity>(key) else {
            return false;
        };
        entity.add_boxed(component);
        self.flush_entity(tree, key);
        true
    }

    /// Removes component `C`. Returns `false` if the entity had none.
    pub fn remove_component<C: Component>(&mut self, tree: &mut SceneTree, key: NodeKey) -> bool {
        self.remove_type(tree, key, TypeId::of::<C>())
    }

    fn remove_type(&mut self, tree: &mut SceneTree, key: NodeKey, type_id: TypeId) -> bool {
        let removed = tree
            .behavior_as_mut::<Entity>(key)
            .is_some_and(|e| e.remove_type(type_id));
        if removed {
            self.flush_entity(tree, key);
        }
        removed
    }

    /// Component `C` of `key`, or `None` when the entity does not hold one.
    pub fn component<'t, C: Component>(&self, tree: &'t SceneTree, key: NodeKey) -> Option<&'t C> {
        tree.behavior_as::<Entity>(key)?.get::<C>()
    }

    /// Applies one entity's pending component changes to every query.
    fn flush_entity(&mut self, tree: &mut SceneTree, key: NodeKey) {
        let Some(entity) = tree.behavior_as_mut::<Entity>(key) else {
            return;
        };
        let changes = entity.take_changes();
        if changes.is_empty() || !self.contains(key) {
            return;
        }
        let entity = tree.behavior_as::<Entity>(key);
        for change in &changes {
            self.events.push(match *change {
                ComponentChange::Added(_, name) => EcsEvent::ComponentAdded(key, name),
                ComponentChange::Removed(_, name) => EcsEvent::ComponentRemoved(key, name),
            });
        }
        for slot in self.systems.iter_mut().flatten() {
            for query in slot.queries.iter_mut() {
                if changes.iter().any(|c| query.mentions(c.component_type())) {
                    query.update(key, entity);
                }
            }
        }
    }

    /// Picks up component changes made outside the ECS (decoded payloads)
    /// and drops entities whose nodes no longer exist.
    pub fn flush_changes(&mut self, tree: &mut SceneTree) {
        let dead: Vec<NodeKey> = self
            .entities
            .iter()
            .copied()
            .filter(|&k| !tree.contains(k))
            .collect();
        if !dead.is_empty() {
            self.entities.retain(|k| !dead.contains(k));
            for key in dead {
                self.forget(key);
            }
            self.refresh_root(tree);
        }
        for key in self.entities.clone() {
            self.flush_entity(tree, key);
        }
    }

    /// Brings a non-authoritative peer's entity set in line with the tree:
    /// entity nodes under the ECS node plus any ids named by the last
    /// membership payload are tracked, everything else is dropped.
    pub fn reconcile(&mut self, tree: &mut SceneTree, ids: &mut IdentityRegistry) {
        let received = tree
            .behavior_as_mut::<EcsRoot>(self.node)
            .and_then(EcsRoot::take_received);

        let mut wanted: Vec<NodeKey> = tree
            .children(self.node)
            .iter()
            .copied()
            .filter(|&k| tree.behavior_as::<Entity>(k).is_some())
            .collect();
        for id in received.into_iter().flatten() {
            match ids.resolve(tree, id) {
                Some(key) if tree.behavior_as::<Entity>(key).is_some() => {
                    if !wanted.contains(&key) {
                        wanted.push(key);
                    }
                }
                _ => debug!(id, "membership names an unknown entity"),
            }
        }

        let wanted_set: FxHashSet<NodeKey> = wanted.iter().copied().collect();
        let stale: Vec<NodeKey> = self
            .entities
            .iter()
            .copied()
            .filter(|k| !wanted_set.contains(k))
            .collect();
        for key in stale {
            self.remove_entity(tree, key);
        }
        for key in wanted {
            self.add_entity(tree, key);
        }
        self.flush_changes(tree);
    }

    // --- Systems ---

    /// Registers `system`, seeds its queries from the current entities, and
    /// starts it.
    pub fn add_system(
        &mut self,
        tree: &SceneTree,
        mut system: Box<dyn System>,
        side: SystemSide,
    ) -> SystemId {
        let mut queries = QuerySet::new(system.queries());
        for &key in &self.entities {
            let entity = tree.behavior_as::<Entity>(key);
            for query in queries.iter_mut() {
                query.update(key, entity);
            }
        }
        system.start();

        let id = SystemId(self.systems.len());
        info!(system = system.name(), ?side, "system registered");
        self.systems.push(Some(SystemSlot {
            system,
            queries,
            side,
        }));
        if side.runs_on_server() {
            self.server_order.push(id);
        }
        if side.runs_on_client() {
            self.client_order.push(id);
        }
        id
    }

    /// Unregisters a system, clears its queries, and stops it.
    pub fn remove_system(&mut self, id: SystemId) -> Option<Box<dyn System>> {
        let mut slot = self.systems.get_mut(id.0)?.take()?;
        self.server_order.retain(|&s| s != id);
        self.client_order.retain(|&s| s != id);
        for query in slot.queries.iter_mut() {
            query.clear();
        }
        slot.system.stop();
        Some(slot.system)
    }

    /// Query results of a registered system.
    pub fn system_queries(&self, id: SystemId) -> Option<&QuerySet> {
        self.systems.get(id.0)?.as_ref().map(|s| &s.queries)
    }

    pub fn system_side(&self, id: SystemId) -> Option<SystemSide> {
        self.systems.get(id.0)?.as_ref().map(|s| s.side)
    }

    /// Runs the systems for this role in registration order, then applies
    /// queued commands.
    pub fn run_systems(&mut self, tree: &mut SceneTree, dt: f32, authoritative: bool) {
        let order = if authoritative {
            &self.server_order
        } else {
            &self.client_order
        };
        for id in order {
            let Some(slot) = self.systems.get_mut(id.0).and_then(Option::as_mut) else {
                continue;
            };
            let mut ctx = SystemContext {
                tree: &mut *tree,
                dt,
                authoritative,
                commands: &mut self.commands,
            };
            slot.system.run(&mut ctx, &slot.queries);
        }
        self.apply_commands(tree);
        self.flush_changes(tree);
    }

    fn apply_commands(&mut self, tree: &mut SceneTree) {
        for command in self.commands.drain() {
            match command {
                Command::AddComponent(key, component) => {
                    self.add_boxed(tree, key, component);
                }
                Command::RemoveComponent(key, type_id) => {
                    self.remove_type(tree, key, type_id);
                }
                Command::Despawn(key) => {
                    if !self.despawn_requests.contains(&key) {
                        self.despawn_requests.push(key);
                    }
                }
            }
        }
    }

    /// Despawns queued by systems since the last call.
    pub fn take_despawn_requests(&mut self) -> Vec<NodeKey> {
        std::mem::take(&mut self.despawn_requests)
    }

    /// Events since the last call.
    pub fn drain_events(&mut self) -> Vec<EcsEvent> {
        std::mem::take(&mut self.events)
    }

    // --- Persistence ---

    /// Writes every persistent entity to the `ecs` document as
    /// `{"E": [entity, ...]}`.
    pub fn save_state(&self, tree: &SceneTree, saves: &mut SaveStore) -> Result<usize, SaveError> {
        let mut doc = Value::object();
        let mut count = 0;
        for &key in &self.entities {
            let encoded = codec::encode(tree, key, codec::EncodeMode::Save);
            if !encoded.is_absent() {
                doc["E"].append(encoded);
                count += 1;
            }
        }
        saves.save_data(SAVE_NAME, &doc, SaveCategory::Ecs)?;
        Ok(count)
    }

    /// Decodes the saved entities as detached nodes. The caller attaches and
    /// registers them. If any entry fails, none of the entries are kept.
    pub fn load_state(
        &self,
        tree: &mut SceneTree,
        types: &TypeRegistry,
        saves: &SaveStore,
    ) -> Result<Vec<NodeKey>, SaveError> {
        let doc = saves.load_data(SAVE_NAME, SaveCategory::Ecs)?;
        let mut keys = Vec::new();
        for entry in doc["E"].items() {
            let key = match codec::decode(tree, types, entry, codec::EncodeMode::Save) {
                Ok(key) => key,
                Err(err) => {
                    for key in keys {
                        tree.remove(key);
                    }
                    return Err(err.into());
                }
            };
            if let Some(entity) = tree.behavior_as_mut::<Entity>(key) {
                entity.bind(key);
            }
            keys.push(key);
        }
        Ok(keys)
    }
}

#[cfg(test)]
#[path = "ecs_tests.rs"]
mod tests;
