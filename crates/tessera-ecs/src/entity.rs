//! The [`Entity`] behavior: a node's component set.

use std::any::{Any, TypeId};
use std::rc::Rc;

use tessera_scene::{Behavior, NodeKey, NodeState, Persistable, Replicable, Spatial};
use tessera_value::Value;
use tracing::debug;

use crate::component::{Component, ComponentRegistry};
use crate::ecs::ENTITY_TYPE;

/// A component transition recorded by an [`Entity`] until the ECS picks it
/// up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentChange {
    Added(TypeId, &'static str),
    Removed(TypeId, &'static str),
}

impl ComponentChange {
    pub fn component_type(&self) -> TypeId {
        match self {
            ComponentChange::Added(t, _) | ComponentChange::Removed(t, _) => *t,
        }
    }
}

/// Component storage for one entity node.
///
/// Components are keyed by concrete type; adding a second component of a type
/// destroys and replaces the first. Every add or remove marks the entity
/// dirty for replication and is logged as a [`ComponentChange`].
pub struct Entity {
    registry: Rc<ComponentRegistry>,
    components: Vec<(TypeId, Box<dyn Component>)>,
    owner: Option<NodeKey>,
    dirty: bool,
    changes: Vec<ComponentChange>,
}

impl Entity {
    pub fn new(registry: Rc<ComponentRegistry>) -> Self {
        Self {
            registry,
            components: Vec::new(),
            owner: None,
            dirty: true,
            changes: Vec::new(),
        }
    }

    /// Node this entity lives on, once bound.
    pub fn owner(&self) -> Option<NodeKey> {
        self.owner
    }

    /// Binds the entity to its node and initialises components that were
    /// added before the node was known.
    pub fn bind(&mut self, key: NodeKey) {
        if self.owner == Some(key) {
            return;
        }
        self.owner = Some(key);
        for (_, component) in &mut self.components {
            if component.entity().is_none() {
                component.init(key);
            }
        }
    }

    fn position(&self, type_id: TypeId) -> Option<usize> {
        self.components.iter().position(|(t, _)| *t == type_id)
    }

    pub fn has<C: Component>(&self) -> bool {
        self.has_type(TypeId::of::<C>())
    }

    pub fn has_type(&self, type_id: TypeId) -> bool {
        self.position(type_id).is_some()
    }

    /// Returns the component of type `C`, or `None` if the entity has none.
    pub fn get<C: Component>(&self) -> Option<&C> {
        let index = self.position(TypeId::of::<C>())?;
        self.components[index].1.as_any().downcast_ref::<C>()
    }

    pub fn get_mut<C: Component>(&mut self) -> Option<&mut C> {
        let index = self.position(TypeId::of::<C>())?;
        self.components[index].1.as_any_mut().downcast_mut::<C>()
    }

    /// Adds `component`, replacing any existing component of the same type.
    pub fn add<C: Component>(&mut self, component: C) {
        self.add_boxed(Box::new(component));
    }

    pub fn add_boxed(&mut self, mut component: Box<dyn Component>) {
        let type_id = component.component_type();
        self.remove_type(type_id);
        if let Some(owner) = self.owner {
            component.init(owner);
        }
        self.changes
            .push(ComponentChange::Added(type_id, component.name()));
        self.components.push((type_id, component));
        self.dirty = true;
    }

    /// Removes the component of type `C`. Returns `false` if there was none.
    pub fn remove<C: Component>(&mut self) -> bool {
        self.remove_type(TypeId::of::<C>())
    }

    pub fn remove_type(&mut self, type_id: TypeId) -> bool {
        let Some(index) = self.position(type_id) else {
            return false;
        };
        let (_, mut component) = self.components.remove(index);
        component.destroy();
        self.changes
            .push(ComponentChange::Removed(type_id, component.name()));
        self.dirty = true;
        true
    }

    /// Types of the attached components, in insertion order.
    pub fn component_types(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.components.iter().map(|(t, _)| *t)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Drains the change log.
    pub fn take_changes(&mut self) -> Vec<ComponentChange> {
        std::mem::take(&mut self.changes)
    }

    /// Runs destruction callbacks on every component.
    pub fn destroy_components(&mut self) {
        for (_, component) in &mut self.components {
            component.destroy();
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn write_components(&self, out: &mut Value) {
        for (_, component) in &self.components {
            let mut entry = Value::object();
            entry["Name"].set(component.name());
            entry["Value"] = component.serialize_data();
            out["Comps"].append(entry);
        }
    }

    fn write_meta(node: &NodeState, out: &mut Value) {
        for (key, value) in node.meta.iter() {
            let mut entry = Value::object();
            entry["Name"].set(key);
            entry["Value"] = value.clone();
            out["Meta"].append(entry);
        }
    }

    fn write_transform(node: &NodeState, out: &mut Value) {
        if let Spatial::Volumetric {
            position, rotation, ..
        } = &node.spatial
        {
            out["Position"].set(*position);
            out["Rotation"].set(*rotation);
        }
    }

    fn read_payload(&mut self, node: &mut NodeState, data: &Value) {
        if let Some(name) = data["Name"].as_str() {
            node.name = name.to_owned();
        }
        if let Spatial::Volumetric {
            position, rotation, ..
        } = &mut node.spatial
        {
            if let Some(p) = data["Position"].as_vec3() {
                *position = p;
            }
            if let Some(r) = data["Rotation"].as_vec3() {
                *rotation = r;
            }
        }
        for entry in data["Meta"].items() {
            if let Some(key) = entry["Name"].as_str() {
                node.meta.insert(key, entry["Value"].clone());
            }
        }

        // The payload lists every component. Update in place where the type
        // already exists so local state is kept, add the rest, drop the
        // ones no longer listed.
        let mut listed = Vec::new();
        for entry in data["Comps"].items() {
            let Some(name) = entry["Name"].as_str() else {
                continue;
            };
            let Some(mut fresh) = self.registry.create(name) else {
                debug!(component = name, "unknown component in payload");
                continue;
            };
            let type_id = fresh.component_type();
            listed.push(type_id);
            match self.position(type_id) {
                Some(index) => self.components[index].1.deserialize_data(&entry["Value"]),
                None => {
                    fresh.deserialize_data(&entry["Value"]);
                    self.add_boxed(fresh);
                }
            }
        }
        let stale: Vec<TypeId> = self
            .component_types()
            .filter(|t| !listed.contains(t))
            .collect();
        for type_id in stale {
            self.remove_type(type_id);
        }
    }
}

impl Behavior for Entity {
    fn type_name(&self) -> &str {
        ENTITY_TYPE
    }

    fn replicable(&self) -> Option<&dyn Replicable> {
        Some(self)
    }

    fn replicable_mut(&mut self) -> Option<&mut dyn Replicable> {
        Some(self)
    }

    fn persistable(&self) -> Option<&dyn Persistable> {
        Some(self)
    }

    fn persistable_mut(&mut self) -> Option<&mut dyn Persistable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Replicable for Entity {
    fn dirty(&self) -> bool {
        self.dirty
    }

    fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    /// Name, transform (unless a network transform drives it), metadata and
    /// components.
    fn write_state(&self, node: &NodeState) -> Value {
        let mut out = Value::object();
        out["Name"].set(node.name.as_str());
        if !self.has::<crate::NetworkTransform>() {
            Self::write_transform(node, &mut out);
        }
        Self::write_meta(node, &mut out);
        self.write_components(&mut out);
        out
    }

    fn apply_delta(&mut self, node: &mut NodeState, data: &Value) {
        self.read_payload(node, data);
    }
}

impl Persistable for Entity {
    fn serialize_full(&self, node: &NodeState) -> Value {
        let mut out = Value::object();
        out["Name"].set(node.name.as_str());
        Self::write_transform(node, &mut out);
        Self::write_meta(node, &mut out);
        self.write_components(&mut out);
        out
    }

    fn apply_full(&mut self, node: &mut NodeState, data: &Value) {
        self.read_payload(node, data);
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use tessera_scene::SpatialKind;

    use super::*;
    use crate::component::{Health, Movement, NetworkTransform};

    fn entity() -> Entity {
        Entity::new(Rc::new(ComponentRegistry::with_builtins()))
    }

    fn node() -> NodeState {
        NodeState::new("Moose", "Node3D", SpatialKind::Volumetric)
    }

    #[test]
    fn test_add_replaces_same_type() {
        let mut e = entity();
        e.add(Health::new(5.0));
        e.take_changes();
        e.add(Health::new(9.0));

        assert_eq!(e.len(), 1);
        assert_eq!(e.get::<Health>().unwrap().max_health, 9.0);
        let changes = e.take_changes();
        assert!(matches!(changes[0], ComponentChange::Removed(_, "Health")));
        assert!(matches!(changes[1], ComponentChange::Added(_, "Health")));
    }

    #[test]
    fn test_missing_component_is_none() {
        let mut e = entity();
        assert!(e.get::<Movement>().is_none());
        assert!(!e.remove::<Movement>());
        assert!(e.take_changes().is_empty());
    }

    #[test]
    fn test_bind_initialises_pending_components() {
        let mut tree = tessera_scene::SceneTree::new();
        let key = tree.create(node());
        let mut e = entity();
        e.add(Movement::new(1.0, Vec3::X));
        assert_eq!(e.get::<Movement>().unwrap().entity(), None);
        e.bind(key);
        assert_eq!(e.get::<Movement>().unwrap().entity(), Some(key));
        e.add(Health::new(1.0));
        assert_eq!(e.get::<Health>().unwrap().entity(), Some(key));
    }

    #[test]
    fn test_network_transform_hides_node_transform() {
        let mut e = entity();
        let state = node();
        assert!(e.write_state(&state)["Position"].is_vec3());

        e.add(NetworkTransform::default());
        let payload = e.write_state(&state);
        assert!(payload["Position"].is_undefined());
        assert_eq!(payload["Comps"][0]["Name"].as_str(), Some("NetworkTransform"));
        assert!(e.serialize_full(&state)["Position"].is_vec3());
    }

    #[test]
    fn test_payload_syncs_component_set() {
        let mut server = entity();
        let mut state = node();
        state.set_meta("Kind", "deer");
        server.add(Health::new(3.0));
        server.add(Movement::new(2.0, Vec3::Z));
        let payload = server.write_state(&state);

        let mut client = entity();
        client.add(NetworkTransform::default());
        let mut client_state = NodeState::new("Unnamed", "Node3D", SpatialKind::Volumetric);
        client.apply_delta(&mut client_state, &payload);

        assert_eq!(client_state.name, "Moose");
        assert_eq!(client_state.get_meta("Kind").and_then(Value::as_str), Some("deer"));
        assert_eq!(client.get::<Health>().unwrap().health, 3.0);
        assert_eq!(client.get::<Movement>().unwrap().direction, Vec3::Z);
        assert!(!client.has::<NetworkTransform>());

        // A second payload updates in place without add/remove churn.
        client.take_changes();
        server.get_mut::<Health>().unwrap().health = 1.0;
        client.apply_delta(&mut client_state, &server.write_state(&state));
        assert_eq!(client.get::<Health>().unwrap().health, 1.0);
        assert!(client.take_changes().is_empty());
    }
}
