//! Component trait, the name → factory registry, and built-in components.

use std::any::{Any, TypeId};

use glam::Vec3;
use rustc_hash::FxHashMap;
use tessera_scene::NodeKey;
use tessera_value::Value;

/// Data attached to an [`Entity`](crate::Entity). At most one instance per
/// concrete type lives on an entity.
pub trait Component: Any {
    /// Registered name, used on the wire and in save files.
    fn name(&self) -> &'static str;

    /// Called once the component belongs to a live entity.
    fn init(&mut self, _entity: NodeKey) {}

    /// The entity this component was initialised on.
    fn entity(&self) -> Option<NodeKey> {
        None
    }

    /// Called when the component is removed or its entity is destroyed.
    fn destroy(&mut self) {}

    fn serialize_data(&self) -> Value {
        Value::Null
    }

    fn deserialize_data(&mut self, _data: &Value) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn Component {
    /// Concrete type of this component.
    pub fn component_type(&self) -> TypeId {
        self.as_any().type_id()
    }
}

type ComponentFactory = Box<dyn Fn() -> Box<dyn Component>>;

/// Builds components by name when decoding entity payloads.
pub struct ComponentRegistry {
    factories: FxHashMap<&'static str, ComponentFactory>,
    names: FxHashMap<TypeId, &'static str>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            factories: FxHashMap::default(),
            names: FxHashMap::default(),
        }
    }

    /// Registry with [`NetworkTransform`], [`Movement`] and [`Health`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register::<NetworkTransform>();
        registry.register::<Movement>();
        registry.register::<Health>();
        registry
    }

    /// Registers `C` under the name its default instance reports.
    /// Re-registering a name replaces the factory.
    pub fn register<C: Component + Default>(&mut self) {
        let name = C::default().name();
        self.names.insert(TypeId::of::<C>(), name);
        self.factories.insert(
            name,
            Box::new(|| Box::new(C::default()) as Box<dyn Component>),
        );
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn Component>> {
        self.factories.get(name).map(|f| f())
    }

    pub fn name_of(&self, type_id: TypeId) -> Option<&'static str> {
        self.names.get(&type_id).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! any_impls {
    () => {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    };
}

// ---------------------------------------------------------------------------
// NetworkTransform
// ---------------------------------------------------------------------------

/// Authoritative transform target. While present, the entity payload carries
/// the transform here instead of on the node, and clients ease toward it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkTransform {
    pub sync_position: Vec3,
    pub sync_rotation: Vec3,
    entity: Option<NodeKey>,
}

impl NetworkTransform {
    pub fn new(position: Vec3, rotation: Vec3) -> Self {
        Self {
            sync_position: position,
            sync_rotation: rotation,
            entity: None,
        }
    }
}

impl Component for NetworkTransform {
    fn name(&self) -> &'static str {
        "NetworkTransform"
    }

    fn init(&mut self, entity: NodeKey) {
        self.entity = Some(entity);
    }

    fn entity(&self) -> Option<NodeKey> {
        self.entity
    }

    fn serialize_data(&self) -> Value {
        let mut data = Value::object();
        data["SP"].set(self.sync_position);
        data["SR"].set(self.sync_rotation);
        data
    }

    fn deserialize_data(&mut self, data: &Value) {
        self.sync_position = data["SP"].as_vec3().unwrap_or(self.sync_position);
        self.sync_rotation = data["SR"].as_vec3().unwrap_or(self.sync_rotation);
    }

    any_impls!();
}

// ---------------------------------------------------------------------------
// Movement
// ---------------------------------------------------------------------------

/// Constant-velocity motion along `direction`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Movement {
    pub speed: f32,
    pub direction: Vec3,
    entity: Option<NodeKey>,
}

impl Movement {
    pub fn new(speed: f32, direction: Vec3) -> Self {
        Self {
            speed,
            direction,
            entity: None,
        }
    }

    /// Displacement over `dt` seconds.
    pub fn step(&self, dt: f32) -> Vec3 {
        self.direction.normalize_or_zero() * self.speed * dt
    }
}

impl Component for Movement {
    fn name(&self) -> &'static str {
        "Movement"
    }

    fn init(&mut self, entity: NodeKey) {
        self.entity = Some(entity);
    }

    fn entity(&self) -> Option<NodeKey> {
        self.entity
    }

    fn serialize_data(&self) -> Value {
        let mut data = Value::object();
        data["MovementDirection"].set(self.direction);
        data["Speed"].set(self.speed);
        data
    }

    fn deserialize_data(&mut self, data: &Value) {
        self.direction = data["MovementDirection"].as_vec3().unwrap_or(self.direction);
        self.speed = data["Speed"].as_f32().unwrap_or(self.speed);
    }

    any_impls!();
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Health {
    pub health: f32,
    pub max_health: f32,
    entity: Option<NodeKey>,
}

impl Health {
    /// Full health at `max`.
    pub fn new(max: f32) -> Self {
        Self {
            health: max,
            max_health: max,
            entity: None,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.health <= 0.0
    }
}

impl Component for Health {
    fn name(&self) -> &'static str {
        "Health"
    }

    fn init(&mut self, entity: NodeKey) {
        self.entity = Some(entity);
    }

    fn entity(&self) -> Option<NodeKey> {
        self.entity
    }

    fn serialize_data(&self) -> Value {
        let mut data = Value::object();
        data["H"].set(self.health);
        data["MH"].set(self.max_health);
        data
    }

    fn deserialize_data(&mut self, data: &Value) {
        self.health = data["H"].as_f32().unwrap_or(self.health);
        self.max_health = data["MH"].as_f32().unwrap_or(self.max_health);
    }

    any_impls!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_builds_by_name() {
        let registry = ComponentRegistry::with_builtins();
        let built = registry.create("Health").unwrap();
        assert_eq!(built.name(), "Health");
        assert_eq!(built.component_type(), TypeId::of::<Health>());
        assert_eq!(registry.name_of(TypeId::of::<Movement>()), Some("Movement"));
        assert!(registry.create("Missing").is_none());
    }

    #[test]
    fn test_builtin_payloads() {
        let mut health = Health::new(10.0);
        health.health = 4.0;
        let mut copy = Health::default();
        copy.deserialize_data(&health.serialize_data());
        assert_eq!(copy.health, 4.0);
        assert_eq!(copy.max_health, 10.0);

        let nt = NetworkTransform::new(Vec3::new(1.0, 2.0, 3.0), Vec3::ZERO);
        assert_eq!(nt.serialize_data()["SP"].as_vec3(), Some(Vec3::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn test_movement_step_normalizes_direction() {
        let movement = Movement::new(2.0, Vec3::new(3.0, 0.0, 0.0));
        assert_eq!(movement.step(0.5), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(Movement::new(2.0, Vec3::ZERO).step(1.0), Vec3::ZERO);
    }
}
