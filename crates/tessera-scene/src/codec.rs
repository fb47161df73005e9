//! Node subtree ↔ [`Value`] documents.
//!
//! A node document looks like:
//!
//! ```text
//! {"Name":"Player","Type":"Player","DerivedType":"Node2D",
//!  "ZIsRelative":true,"YSortEnabled":false,"ZIndex":0,
//!  "Position":{"X":1.0,"Y":2.0},"Rotation":0.0,"Scale":{"X":1.0,"Y":1.0},
//!  "Meta":{"UniqueId":4},"Group":["Players"],
//!  "Children":[...],"INetworkData":{...}}
//! ```
//!
//! `Type` is the behavior name when the node has one, else the base type.
//! Network documents carry the `UniqueId` meta and the replicable payload;
//! save documents omit the id and carry the persistable payload instead.

use glam::{Vec2, Vec3};
use tessera_value::Value;

use crate::error::CodecError;
use crate::groups;
use crate::spatial::Spatial;
use crate::tree::{NodeKey, NodeState, SceneTree};
use crate::types::TypeRegistry;

pub const NAME: &str = "Name";
pub const TYPE: &str = "Type";
pub const DERIVED_TYPE: &str = "DerivedType";
pub const Z_IS_RELATIVE: &str = "ZIsRelative";
pub const Y_SORT_ENABLED: &str = "YSortEnabled";
pub const Z_INDEX: &str = "ZIndex";
pub const POSITION: &str = "Position";
pub const ROTATION: &str = "Rotation";
pub const SCALE: &str = "Scale";
pub const SIZE: &str = "Size";
pub const META: &str = "Meta";
pub const GROUP: &str = "Group";
pub const CHILDREN: &str = "Children";
pub const NETWORK_DATA: &str = "INetworkData";
pub const SAVE_DATA: &str = "ISaveData";
pub const UNIQUE_ID: &str = "UniqueId";

/// Which encoding to produce or consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeMode {
    /// Replication: ids and replicable payloads.
    Network,
    /// Save files: persistable payloads, no ids, not-persistent nodes dropped.
    Save,
}

impl EncodeMode {
    fn payload_key(self) -> &'static str {
        match self {
            EncodeMode::Network => NETWORK_DATA,
            EncodeMode::Save => SAVE_DATA,
        }
    }

    fn ignore_children_group(self) -> &'static str {
        match self {
            EncodeMode::Network => groups::IGNORE_CHILDREN_NETWORK,
            EncodeMode::Save => groups::IGNORE_CHILDREN_SAVE,
        }
    }
}

/// Returns `true` if `state` is left out of `mode` encodings entirely.
pub fn is_excluded(state: &NodeState, mode: EncodeMode) -> bool {
    state.in_group(groups::SELF_ONLY)
        || (mode == EncodeMode::Save && state.in_group(groups::NOT_PERSISTENT))
}

fn skips_children(state: &NodeState, mode: EncodeMode) -> bool {
    state.in_group(groups::IGNORE_CHILDREN) || state.in_group(mode.ignore_children_group())
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encodes `key` and its subtree. Excluded or stale nodes encode as
/// [`Value::Null`].
pub fn encode(tree: &SceneTree, key: NodeKey, mode: EncodeMode) -> Value {
    let Some(node) = tree.get(key) else {
        return Value::Null;
    };
    let state = &node.state;
    if is_excluded(state, mode) {
        return Value::Null;
    }

    let mut out = Value::object();
    out[NAME].set(state.name.as_str());
    out[TYPE].set(node.type_name());
    out[DERIVED_TYPE].set(state.base_type.as_str());
    write_spatial(&state.spatial, &mut out);

    let meta = &mut out[META];
    for (k, v) in state.meta.iter() {
        meta[k] = v.clone();
    }
    if mode == EncodeMode::Network {
        if let Some(id) = state.unique_id {
            meta[UNIQUE_ID].set(id);
        }
    }

    for group in state.groups() {
        out[GROUP].append(group.as_str());
    }

    if !skips_children(state, mode) {
        out[CHILDREN] = encode_children(tree, key, mode);
    }

    if let Some(behavior) = node.behavior() {
        let payload = match mode {
            EncodeMode::Network => behavior.replicable().map(|r| r.write_state(state)),
            EncodeMode::Save => behavior.persistable().map(|p| p.serialize_full(state)),
        };
        if let Some(payload) = payload {
            out[mode.payload_key()] = payload;
        }
    }
    out
}

/// Encodes the children of `key` as an array, skipping excluded ones.
pub fn encode_children(tree: &SceneTree, key: NodeKey, mode: EncodeMode) -> Value {
    let mut out = Value::array();
    for &child in tree.children(key) {
        let encoded = encode(tree, child, mode);
        if !encoded.is_absent() {
            out.append(encoded);
        }
    }
    out
}

fn write_spatial(spatial: &Spatial, out: &mut Value) {
    match spatial {
        Spatial::Plain => {}
        Spatial::Planar {
            position,
            rotation,
            scale,
            z_index,
            z_relative,
            y_sort,
        } => {
            out[Z_IS_RELATIVE].set(*z_relative);
            out[Y_SORT_ENABLED].set(*y_sort);
            out[Z_INDEX].set(*z_index);
            out[POSITION].set(*position);
            out[ROTATION].set(*rotation);
            out[SCALE].set(*scale);
        }
        Spatial::Ui {
            position,
            rotation,
            scale,
            size,
        } => {
            out[POSITION].set(*position);
            out[ROTATION].set(*rotation);
            out[SCALE].set(*scale);
            out[SIZE].set(*size);
        }
        Spatial::Volumetric {
            position,
            rotation,
            scale,
        } => {
            out[POSITION].set(*position);
            out[ROTATION].set(*rotation);
            out[SCALE].set(*scale);
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Builds a detached subtree from `data` and returns its root key.
///
/// The node is instantiated from `DerivedType`; when `Type` differs it names
/// a behavior that is attached to the same node before any data is applied.
/// Payloads are fed to the behavior last, after children exist. On error no
/// nodes are left behind.
pub fn decode(
    tree: &mut SceneTree,
    types: &TypeRegistry,
    data: &Value,
    mode: EncodeMode,
) -> Result<NodeKey, CodecError> {
    if !data.is_object() {
        return Err(CodecError::MissingField(TYPE));
    }
    let type_name = data[TYPE].as_str().ok_or(CodecError::MissingField(TYPE))?;
    let base = match data[DERIVED_TYPE].as_str() {
        Some(base) => base,
        None => types.behavior_base(type_name).unwrap_or(type_name),
    };
    let name = data[NAME].as_str().unwrap_or(type_name);

    let state = types.instantiate_base(base, name)?;
    let key = tree.create(state);
    match decode_into(tree, types, key, type_name, base, data, mode) {
        Ok(()) => Ok(key),
        Err(err) => {
            tree.remove(key);
            Err(err)
        }
    }
}

fn decode_into(
    tree: &mut SceneTree,
    types: &TypeRegistry,
    key: NodeKey,
    type_name: &str,
    base: &str,
    data: &Value,
    mode: EncodeMode,
) -> Result<(), CodecError> {
    if type_name != base {
        let expected = types
            .behavior_base(type_name)
            .ok_or_else(|| CodecError::UnknownBehavior(type_name.to_owned()))?;
        if expected != base {
            return Err(CodecError::BaseMismatch {
                behavior: type_name.to_owned(),
                expected: expected.to_owned(),
                found: base.to_owned(),
            });
        }
        let behavior = types.create_behavior(type_name)?;
        tree.set_behavior(key, behavior);
    }

    if let Some(state) = tree.state_mut(key) {
        read_spatial(&mut state.spatial, data);
        for (k, v) in data[META].entries() {
            if k == UNIQUE_ID {
                if mode == EncodeMode::Network {
                    state.unique_id = v.as_u32();
                }
            } else {
                state.meta.insert(k, v.clone());
            }
        }
        for group in data[GROUP].items() {
            if let Some(group) = group.as_str() {
                state.add_group(group);
            }
        }
    }

    for child in data[CHILDREN].items() {
        let child_key = decode(tree, types, child, mode)?;
        tree.attach(key, child_key);
    }

    let payload = &data[mode.payload_key()];
    if !payload.is_absent() {
        if let Some((state, Some(behavior))) = tree.parts_mut(key) {
            match mode {
                EncodeMode::Network => {
                    if let Some(r) = behavior.replicable_mut() {
                        r.apply_delta(state, payload);
                    }
                }
                EncodeMode::Save => {
                    if let Some(p) = behavior.persistable_mut() {
                        p.apply_full(state, payload);
                    }
                }
            }
        }
    }
    Ok(())
}

fn read_vec2(data: &Value, fallback: Vec2) -> Vec2 {
    data.as_vec2().unwrap_or(fallback)
}

fn read_vec3(data: &Value, fallback: Vec3) -> Vec3 {
    data.as_vec3().unwrap_or(fallback)
}

/// Applies whichever transform fields `data` carries to `spatial`.
pub fn read_spatial(spatial: &mut Spatial, data: &Value) {
    match spatial {
        Spatial::Plain => {}
        Spatial::Planar {
            position,
            rotation,
            scale,
            z_index,
            z_relative,
            y_sort,
        } => {
            *z_relative = data[Z_IS_RELATIVE].as_bool().unwrap_or(*z_relative);
            *y_sort = data[Y_SORT_ENABLED].as_bool().unwrap_or(*y_sort);
            *z_index = data[Z_INDEX]
                .as_i64()
                .and_then(|z| i32::try_from(z).ok())
                .unwrap_or(*z_index);
            *position = read_vec2(&data[POSITION], *position);
            *rotation = data[ROTATION].as_f32().unwrap_or(*rotation);
            *scale = read_vec2(&data[SCALE], *scale);
        }
        Spatial::Ui {
            position,
            rotation,
            scale,
            size,
        } => {
            *position = read_vec2(&data[POSITION], *position);
            *rotation = data[ROTATION].as_f32().unwrap_or(*rotation);
            *scale = read_vec2(&data[SCALE], *scale);
            *size = read_vec2(&data[SIZE], *size);
        }
        Spatial::Volumetric {
            position,
            rotation,
            scale,
        } => {
            *position = read_vec3(&data[POSITION], *position);
            *rotation = read_vec3(&data[ROTATION], *rotation);
            *scale = read_vec3(&data[SCALE], *scale);
        }
    }
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
