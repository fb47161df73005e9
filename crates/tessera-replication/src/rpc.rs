//! Remote procedure calls addressed to identified nodes.
//!
//! Methods are registered per node type in an [`RpcTable`] together with the
//! argument kinds they accept. An incoming call is routed by the target's
//! unique id and type name; anything that does not resolve is dropped.

use glam::{Vec2, Vec3};
use rustc_hash::FxHashMap;
use tessera_scene::{NodeKey, TypeRegistry, UniqueId};
use tessera_value::Value;

use crate::error::RpcError;
use crate::simulation::World;
use crate::transport::PeerId;

const TYPE: &str = "Type";
const VALUE: &str = "Value";
const ARRAY_ELEMENTS: &str = "ArrayElements";
const DICT_ELEMENTS: &str = "DictElements";
const KEY: &str = "Key";
const UNIQUE_ID: &str = "UniqueId";

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// A typed RPC argument.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcArg {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Vec2(Vec2),
    Vec3(Vec3),
    /// Another node, by unique id.
    Ref(UniqueId),
    Array(Vec<RpcArg>),
    Map(Vec<(RpcArg, RpcArg)>),
}

/// Argument kind a method accepts at one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcKind {
    Int,
    Float,
    Bool,
    Str,
    Vec2,
    Vec3,
    Ref,
    Array,
    Map,
    /// Any argument.
    Any,
}

impl RpcArg {
    pub fn kind(&self) -> RpcKind {
        match self {
            RpcArg::Int(_) => RpcKind::Int,
            RpcArg::Float(_) => RpcKind::Float,
            RpcArg::Bool(_) => RpcKind::Bool,
            RpcArg::Str(_) => RpcKind::Str,
            RpcArg::Vec2(_) => RpcKind::Vec2,
            RpcArg::Vec3(_) => RpcKind::Vec3,
            RpcArg::Ref(_) => RpcKind::Ref,
            RpcArg::Array(_) => RpcKind::Array,
            RpcArg::Map(_) => RpcKind::Map,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            RpcArg::Int(_) => "Int",
            RpcArg::Float(_) => "Float",
            RpcArg::Bool(_) => "Bool",
            RpcArg::Str(_) => "String",
            RpcArg::Vec2(_) => "Vector2",
            RpcArg::Vec3(_) => "Vector3",
            RpcArg::Ref(_) => "Object",
            RpcArg::Array(_) => "Array",
            RpcArg::Map(_) => "Dictionary",
        }
    }

    /// `{"Type": .., "Value": ..}`, with `ArrayElements`, `DictElements` or
    /// `UniqueId` in place of `Value` for containers and node references.
    pub fn to_value(&self) -> Value {
        let mut out = Value::object();
        out[TYPE].set(self.type_name());
        match self {
            RpcArg::Int(v) => out[VALUE].set(*v),
            RpcArg::Float(v) => out[VALUE].set(*v),
            RpcArg::Bool(v) => out[VALUE].set(*v),
            RpcArg::Str(v) => out[VALUE].set(v.as_str()),
            RpcArg::Vec2(v) => out[VALUE].set(*v),
            RpcArg::Vec3(v) => out[VALUE].set(*v),
            RpcArg::Ref(id) => out[UNIQUE_ID].set(*id),
            RpcArg::Array(items) => {
                out[ARRAY_ELEMENTS].set(Value::array());
                for item in items {
                    out[ARRAY_ELEMENTS].append(item.to_value());
                }
            }
            RpcArg::Map(entries) => {
                out[DICT_ELEMENTS].set(Value::array());
                for (key, value) in entries {
                    let mut entry = Value::object();
                    entry[KEY] = key.to_value();
                    entry[VALUE] = value.to_value();
                    out[DICT_ELEMENTS].append(entry);
                }
            }
        }
        out
    }

    /// Reads one argument. `None` if the type is unknown or the value does
    /// not fit it.
    pub fn from_value(data: &Value) -> Option<Self> {
        let value = &data[VALUE];
        Some(match data[TYPE].as_str()? {
            "Int" => RpcArg::Int(value.as_i64()?),
            "Float" => RpcArg::Float(value.as_f64()?),
            "Bool" => RpcArg::Bool(value.as_bool()?),
            "String" => RpcArg::Str(value.as_str()?.to_owned()),
            "Vector2" => RpcArg::Vec2(value.as_vec2()?),
            "Vector3" => RpcArg::Vec3(value.as_vec3()?),
            "Object" => RpcArg::Ref(data[UNIQUE_ID].as_u32()?),
            "Array" => RpcArg::Array(
                data[ARRAY_ELEMENTS]
                    .items()
                    .iter()
                    .map(RpcArg::from_value)
                    .collect::<Option<_>>()?,
            ),
            "Dictionary" => RpcArg::Map(
                data[DICT_ELEMENTS]
                    .items()
                    .iter()
                    .map(|e| Some((RpcArg::from_value(&e[KEY])?, RpcArg::from_value(&e[VALUE])?)))
                    .collect::<Option<_>>()?,
            ),
            _ => return None,
        })
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RpcArg::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Floats, and ints widened to float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RpcArg::Float(v) => Some(*v),
            RpcArg::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RpcArg::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ref_id(&self) -> Option<UniqueId> {
        match self {
            RpcArg::Ref(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<i64> for RpcArg {
    fn from(v: i64) -> Self {
        RpcArg::Int(v)
    }
}

impl From<f64> for RpcArg {
    fn from(v: f64) -> Self {
        RpcArg::Float(v)
    }
}

impl From<bool> for RpcArg {
    fn from(v: bool) -> Self {
        RpcArg::Bool(v)
    }
}

impl From<&str> for RpcArg {
    fn from(v: &str) -> Self {
        RpcArg::Str(v.to_owned())
    }
}

impl From<Vec2> for RpcArg {
    fn from(v: Vec2) -> Self {
        RpcArg::Vec2(v)
    }
}

impl From<Vec3> for RpcArg {
    fn from(v: Vec3) -> Self {
        RpcArg::Vec3(v)
    }
}

/// Encodes a positional argument list.
pub fn encode_args(args: &[RpcArg]) -> Vec<Value> {
    args.iter().map(RpcArg::to_value).collect()
}

/// Decodes a positional argument list.
pub fn decode_args(params: &[Value]) -> Result<Vec<RpcArg>, RpcError> {
    params
        .iter()
        .enumerate()
        .map(|(index, p)| RpcArg::from_value(p).ok_or(RpcError::BadArgument { index }))
        .collect()
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// What a handler sees: the world, the target node, and who sent the call.
pub struct RpcContext<'a> {
    pub world: &'a mut World,
    /// The node the call is addressed to.
    pub node: NodeKey,
    /// Sending peer, `None` for local calls.
    pub sender: Option<PeerId>,
}

impl RpcContext<'_> {
    pub fn authoritative(&self) -> bool {
        self.world.ids.is_authoritative()
    }

    /// Resolves a [`RpcArg::Ref`] argument to a node.
    pub fn resolve(&mut self, id: UniqueId) -> Option<NodeKey> {
        let world = &mut *self.world;
        world.ids.resolve(&world.tree, id)
    }
}

type Handler = Box<dyn Fn(&mut RpcContext<'_>, &[RpcArg])>;

struct RpcMethod {
    kinds: Vec<RpcKind>,
    handler: Handler,
}

/// Registered methods per node type.
#[derive(Default)]
pub struct RpcTable {
    methods: FxHashMap<String, FxHashMap<String, RpcMethod>>,
}

impl RpcTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `method` on nodes whose type name is `type_name`.
    ///
    /// `kinds` lists the accepted kind of each positional argument; calls
    /// with a different count or kind are dropped before reaching `handler`.
    pub fn register<F>(
        &mut self,
        types: &TypeRegistry,
        type_name: &str,
        method: &str,
        kinds: &[RpcKind],
        handler: F,
    ) -> Result<(), RpcError>
    where
        F: Fn(&mut RpcContext<'_>, &[RpcArg]) + 'static,
    {
        if method.is_empty() {
            return Err(RpcError::EmptyName);
        }
        if !types.is_registered(type_name) {
            return Err(RpcError::UnknownType(type_name.to_owned()));
        }
        let table = self.methods.entry(type_name.to_owned()).or_default();
        if table.contains_key(method) {
            return Err(RpcError::DuplicateMethod {
                type_name: type_name.to_owned(),
                method: method.to_owned(),
            });
        }
        table.insert(
            method.to_owned(),
            RpcMethod {
                kinds: kinds.to_vec(),
                handler: Box::new(handler),
            },
        );
        Ok(())
    }

    pub fn has_method(&self, type_name: &str, method: &str) -> bool {
        self.methods
            .get(type_name)
            .is_some_and(|t| t.contains_key(method))
    }

    /// Invokes `method` on the node tagged `target`.
    pub fn dispatch(
        &self,
        world: &mut World,
        target: UniqueId,
        method: &str,
        params: &[Value],
        sender: Option<PeerId>,
    ) -> Result<(), RpcError> {
        let node = world
            .ids
            .resolve(&world.tree, target)
            .ok_or(RpcError::UnknownTarget(target))?;
        let type_name = world
            .tree
            .get(node)
            .map(|n| n.type_name().to_owned())
            .ok_or(RpcError::UnknownTarget(target))?;
        let entry = self
            .methods
            .get(&type_name)
            .and_then(|t| t.get(method))
            .ok_or_else(|| RpcError::UnknownMethod {
                type_name: type_name.clone(),
                method: method.to_owned(),
            })?;

        let args = decode_args(params)?;
        if args.len() != entry.kinds.len() {
            return Err(RpcError::Arity {
                method: method.to_owned(),
                expected: entry.kinds.len(),
                found: args.len(),
            });
        }
        for (index, (arg, kind)) in args.iter().zip(&entry.kinds).enumerate() {
            if *kind != RpcKind::Any && arg.kind() != *kind {
                return Err(RpcError::ArgumentType {
                    method: method.to_owned(),
                    index,
                });
            }
        }

        let mut ctx = RpcContext {
            world,
            node,
            sender,
        };
        (entry.handler)(&mut ctx, &args);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use tessera_ecs::ComponentRegistry;
    use tessera_scene::{NodeState, SpatialKind};

    use super::*;

    fn world_with_node() -> (World, UniqueId) {
        let mut world = World::new(true, ComponentRegistry::with_builtins()).unwrap();
        let key = world
            .tree
            .create(NodeState::new("door", "Node2D", SpatialKind::Planar));
        let scene = world.scene();
        world.tree.attach(scene, key);
        world.ids.allocate_and_tag(&mut world.tree, key).unwrap();
        let id = world.tree.state(key).unwrap().unique_id.unwrap();
        (world, id)
    }

    #[test]
    fn test_argument_wire_forms() {
        let arg = RpcArg::Map(vec![(RpcArg::from("hp"), RpcArg::Float(2.5))]);
        assert_eq!(
            arg.to_value().serialize(),
            r#"{"Type":"Dictionary","DictElements":[{"Key":{"Type":"String","Value":"hp"},"Value":{"Type":"Float","Value":2.5}}]}"#
        );
        assert_eq!(
            RpcArg::Ref(7).to_value().serialize(),
            r#"{"Type":"Object","UniqueId":7}"#
        );
        let nested = RpcArg::Array(vec![RpcArg::Vec3(Vec3::X), RpcArg::Bool(true)]);
        assert_eq!(RpcArg::from_value(&nested.to_value()), Some(nested));
    }

    #[test]
    fn test_decode_rejects_bad_arguments() {
        let good = RpcArg::Int(1).to_value();
        let bad = Value::parse(r#"{"Type":"Quaternion","Value":1}"#).unwrap();
        assert_eq!(
            decode_args(&[good, bad]),
            Err(RpcError::BadArgument { index: 1 })
        );
    }

    #[test]
    fn test_registration_errors() {
        let (world, _) = world_with_node();
        let mut table = RpcTable::new();
        assert_eq!(
            table.register(&world.types, "Node2D", "", &[], |_, _| {}),
            Err(RpcError::EmptyName)
        );
        assert_eq!(
            table.register(&world.types, "Dragon", "roar", &[], |_, _| {}),
            Err(RpcError::UnknownType("Dragon".into()))
        );
        table
            .register(&world.types, "Node2D", "open", &[], |_, _| {})
            .unwrap();
        assert!(matches!(
            table.register(&world.types, "Node2D", "open", &[], |_, _| {}),
            Err(RpcError::DuplicateMethod { .. })
        ));
        assert!(table.has_method("Node2D", "open"));
    }

    #[test]
    fn test_dispatch_checks_before_invoking() {
        let (mut world, id) = world_with_node();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&calls);
        let mut table = RpcTable::new();
        table
            .register(
                &world.types,
                "Node2D",
                "move_to",
                &[RpcKind::Vec2],
                move |ctx, args| {
                    if let (Some(state), RpcArg::Vec2(pos)) =
                        (ctx.world.tree.state_mut(ctx.node), &args[0])
                    {
                        state.name = format!("door@{}", pos.x);
                    }
                    seen.borrow_mut().push(ctx.sender);
                },
            )
            .unwrap();

        let good = encode_args(&[RpcArg::Vec2(Vec2::new(3.0, 0.0))]);
        let wrong = encode_args(&[RpcArg::Int(3)]);

        assert_eq!(
            table.dispatch(&mut world, id, "close", &good, Some(4)),
            Err(RpcError::UnknownMethod {
                type_name: "Node2D".into(),
                method: "close".into()
            })
        );
        assert_eq!(
            table.dispatch(&mut world, 999, "move_to", &good, None),
            Err(RpcError::UnknownTarget(999))
        );
        assert!(matches!(
            table.dispatch(&mut world, id, "move_to", &wrong, None),
            Err(RpcError::ArgumentType { index: 0, .. })
        ));
        assert!(matches!(
            table.dispatch(&mut world, id, "move_to", &[], None),
            Err(RpcError::Arity { expected: 1, found: 0, .. })
        ));
        assert!(calls.borrow().is_empty());

        table.dispatch(&mut world, id, "move_to", &good, Some(4)).unwrap();
        assert_eq!(*calls.borrow(), vec![Some(4)]);
        let key = world.ids.get(id).unwrap();
        assert_eq!(world.tree.state(key).unwrap().name, "door@3");
    }
}
