//! A small replicated and persisted scene object used by the demo.

use std::any::Any;

use tessera_replication::{RpcKind, RpcTable};
use tessera_scene::{
    Behavior, CodecError, NodeKey, NodeState, Persistable, Replicable, SceneTree, SpatialKind,
    TypeRegistry,
};
use tessera_value::Value;

pub const LAMP_TYPE: &str = "Lamp";

/// A light that can be switched and dimmed through RPC.
#[derive(Debug, Default)]
pub struct Lamp {
    pub on: bool,
    pub brightness: i64,
    dirty: bool,
}

impl Lamp {
    pub fn toggle(&mut self) {
        self.on = !self.on;
        self.dirty = true;
    }

    pub fn set_brightness(&mut self, brightness: i64) {
        self.brightness = brightness.clamp(0, 100);
        self.dirty = true;
    }

    fn write(&self) -> Value {
        let mut out = Value::object();
        out["On"].set(self.on);
        out["Brightness"].set(self.brightness);
        out
    }

    fn read(&mut self, data: &Value) {
        if let Some(on) = data["On"].as_bool() {
            self.on = on;
        }
        if let Some(brightness) = data["Brightness"].as_i64() {
            self.brightness = brightness;
        }
    }
}

impl Behavior for Lamp {
    fn type_name(&self) -> &str {
        LAMP_TYPE
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

impl Replicable for Lamp {
    fn dirty(&self) -> bool {
        self.dirty
    }

    fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    fn write_state(&self, _node: &NodeState) -> Value {
        self.write()
    }

    fn apply_delta(&mut self, _node: &mut NodeState, data: &Value) {
        self.read(data);
    }
}

impl Persistable for Lamp {
    fn serialize_full(&self, _node: &NodeState) -> Value {
        self.write()
    }

    fn apply_full(&mut self, _node: &mut NodeState, data: &Value) {
        self.read(data);
    }
}

pub fn register(types: &mut TypeRegistry) -> Result<(), CodecError> {
    types.register_behavior(LAMP_TYPE, "Node2D", || Box::new(Lamp::default()))
}

/// Creates a detached lamp node.
pub fn create(tree: &mut SceneTree, name: &str) -> NodeKey {
    tree.create_with(
        NodeState::new(name, "Node2D", SpatialKind::Planar),
        Some(Box::new(Lamp::default())),
    )
}

/// Server-side handlers: `toggle()` and `dim(level)`.
pub fn register_rpcs(
    table: &mut RpcTable,
    types: &TypeRegistry,
) -> Result<(), tessera_replication::RpcError> {
    table.register(types, LAMP_TYPE, "toggle", &[], |ctx, _| {
        if let Some(lamp) = ctx.world.tree.behavior_as_mut::<Lamp>(ctx.node) {
            lamp.toggle();
        }
    })?;
    table.register(types, LAMP_TYPE, "dim", &[RpcKind::Int], |ctx, args| {
        let level = args.first().and_then(|a| a.as_i64()).unwrap_or(0);
        if let Some(lamp) = ctx.world.tree.behavior_as_mut::<Lamp>(ctx.node) {
            lamp.set_brightness(level);
        }
    })
}
