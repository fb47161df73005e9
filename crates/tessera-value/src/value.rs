//! The [`Value`] type: construction, upsert-on-read indexing, mutation and
//! typed accessors.

use std::ops::{Index, IndexMut};

use glam::{Vec2, Vec3};

use crate::Map;

static UNDEFINED: Value = Value::Undefined;

/// A dynamic, self-describing value.
///
/// `Null` and `Undefined` both serialize as nothing inside containers: an
/// `Undefined` is what a mutable lookup materializes before anything is set.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Explicit absence.
    #[default]
    Null,
    /// A slot that was looked up but never assigned.
    Undefined,
    /// Boolean leaf.
    Bool(bool),
    /// Integer leaf.
    Int(i64),
    /// Decimal leaf. Always serialized with a fractional part.
    Decimal(f64),
    /// String leaf.
    String(String),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// Insertion-ordered object.
    Object(Map),
}

impl Value {
    /// Creates an empty object.
    pub fn object() -> Self {
        Value::Object(Map::new())
    }

    /// Creates an empty array.
    pub fn array() -> Self {
        Value::Array(Vec::new())
    }

    // --- Kind checks ---

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// `true` for `Null` and `Undefined`: values that are skipped on output.
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Bool(_))
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Value::Int(_))
    }

    pub fn is_decimal(&self) -> bool {
        matches!(self, Value::Decimal(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    /// `true` for any present leaf (bool, number or string).
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            Value::Bool(_) | Value::Int(_) | Value::Decimal(_) | Value::String(_)
        )
    }

    /// `true` for an object holding exactly the keys `X` and `Y`.
    pub fn is_vec2(&self) -> bool {
        match self {
            Value::Object(map) => map.len() == 2 && map.contains_key("X") && map.contains_key("Y"),
            _ => false,
        }
    }

    /// `true` for an object holding exactly the keys `X`, `Y` and `Z`.
    pub fn is_vec3(&self) -> bool {
        match self {
            Value::Object(map) => {
                map.len() == 3
                    && map.contains_key("X")
                    && map.contains_key("Y")
                    && map.contains_key("Z")
            }
            _ => false,
        }
    }

    // --- Upsert-on-read access ---

    /// Returns a live handle to `key`, turning `self` into an object and
    /// inserting an `Undefined` child if needed.
    pub fn key(&mut self, key: &str) -> &mut Value {
        if !self.is_object() {
            *self = Value::object();
        }
        match self {
            Value::Object(map) => map.upsert(key),
            _ => unreachable!("value was just converted to an object"),
        }
    }

    /// Returns a live handle to slot `index`, turning `self` into an array and
    /// padding with `Undefined` up to and including `index`.
    pub fn at(&mut self, index: usize) -> &mut Value {
        if !self.is_array() {
            *self = Value::array();
        }
        match self {
            Value::Array(items) => {
                if index >= items.len() {
                    items.resize(index + 1, Value::Undefined);
                }
                &mut items[index]
            }
            _ => unreachable!("value was just converted to an array"),
        }
    }

    // --- Read-only access ---

    /// Looks up `key` without materializing it.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Looks up slot `index` without materializing it.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        match self {
            Value::Array(items) => items.get(index),
            _ => None,
        }
    }

    /// Object entries in insertion order; empty for non-objects.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        let map = match self {
            Value::Object(map) => Some(map),
            _ => None,
        };
        map.into_iter().flat_map(|m| m.iter())
    }

    /// Array items; empty for non-arrays.
    pub fn items(&self) -> &[Value] {
        match self {
            Value::Array(items) => items,
            _ => &[],
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    // --- Mutation ---

    /// Replaces this node with `value`, discarding any previous children.
    pub fn set(&mut self, value: impl Into<Value>) {
        *self = value.into();
    }

    /// Resets this node to `Null`.
    pub fn clear(&mut self) {
        *self = Value::Null;
    }

    /// Appends to this array, converting a non-array first.
    pub fn append(&mut self, value: impl Into<Value>) {
        if !self.is_array() {
            *self = Value::array();
        }
        if let Value::Array(items) = self {
            items.push(value.into());
        }
    }

    /// Inserts before slot `index` (`index == len` appends). Returns `false`
    /// if `self` is not an array or `index` is out of range.
    pub fn insert(&mut self, index: usize, value: impl Into<Value>) -> bool {
        match self {
            Value::Array(items) if index <= items.len() => {
                items.insert(index, value.into());
                true
            }
            _ => false,
        }
    }

    /// Inserts or replaces an object member, converting a non-object first.
    pub fn insert_key(&mut self, key: &str, value: impl Into<Value>) {
        *self.key(key) = value.into();
    }

    /// Removes an object member. An object left empty collapses to `Null`.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let Value::Object(map) = self else {
            return None;
        };
        let removed = map.remove(key);
        if map.is_empty() {
            *self = Value::Null;
        }
        removed
    }

    /// Removes an array slot. An array left empty collapses to `Null`.
    pub fn remove_at(&mut self, index: usize) -> Option<Value> {
        let Value::Array(items) = self else {
            return None;
        };
        let removed = (index < items.len()).then(|| items.remove(index));
        if items.is_empty() {
            *self = Value::Null;
        }
        removed
    }

    /// Shallow union of two objects or concatenation of two arrays.
    ///
    /// For objects, `other_priority` decides whether keys from `other`
    /// overwrite existing keys. Mismatched kinds leave `self` untouched and
    /// return `false`.
    pub fn merge(&mut self, other: Value, other_priority: bool) -> bool {
        match (self, other) {
            (Value::Object(mine), Value::Object(theirs)) => {
                for (key, value) in theirs {
                    if other_priority || !mine.contains_key(&key) {
                        mine.insert(key, value);
                    }
                }
                true
            }
            (Value::Array(mine), Value::Array(theirs)) => {
                mine.extend(theirs);
                true
            }
            _ => false,
        }
    }

    // --- Metrics ---

    /// Number of direct children that are neither `Null` nor `Undefined`.
    /// A present leaf counts as one; `Null` counts as zero.
    pub fn count(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Array(items) => items.iter().filter(|v| !v.is_absent()).count(),
            Value::Object(map) => map.iter().filter(|(_, v)| !v.is_absent()).count(),
            _ => 1,
        }
    }

    /// Total number of nodes in this tree, including `self`. `Null` is zero.
    pub fn size(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Array(items) => 1 + items.iter().map(Value::size).sum::<usize>(),
            Value::Object(map) => 1 + map.iter().map(|(_, v)| v.size()).sum::<usize>(),
            _ => 1,
        }
    }

    // --- Typed accessors ---

    /// String leaf contents.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view. Numeric strings are accepted since ids travel as text
    /// in metadata.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_i64().and_then(|i| u32::try_from(i).ok())
    }

    /// Decimal view. Integers widen.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Decimal(d) => Some(*d),
            Value::Int(i) => Some(*i as f64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        self.as_f64().map(|d| d as f32)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// `{"X":..,"Y":..}` as a [`Vec2`].
    pub fn as_vec2(&self) -> Option<Vec2> {
        if !self.is_vec2() {
            return None;
        }
        Some(Vec2::new(self["X"].as_f32()?, self["Y"].as_f32()?))
    }

    /// `{"X":..,"Y":..,"Z":..}` as a [`Vec3`].
    pub fn as_vec3(&self) -> Option<Vec3> {
        if !self.is_vec3() {
            return None;
        }
        Some(Vec3::new(
            self["X"].as_f32()?,
            self["Y"].as_f32()?,
            self["Z"].as_f32()?,
        ))
    }
}

// ---------------------------------------------------------------------------
// Indexing
// ---------------------------------------------------------------------------

impl Index<&str> for Value {
    type Output = Value;

    /// Read-only lookup: a missing key yields a shared `Undefined`.
    fn index(&self, key: &str) -> &Value {
        self.get(key).unwrap_or(&UNDEFINED)
    }
}

impl IndexMut<&str> for Value {
    fn index_mut(&mut self, key: &str) -> &mut Value {
        self.key(key)
    }
}

impl Index<usize> for Value {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        self.get_index(index).unwrap_or(&UNDEFINED)
    }
}

impl IndexMut<usize> for Value {
    fn index_mut(&mut self, index: usize) -> &mut Value {
        self.at(index)
    }
}

/// Two values are equal when they serialize to the same text.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.serialize() == other.serialize()
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        i64::try_from(v).map_or(Value::Decimal(v as f64), Value::Int)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::from(v as u64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        // Go through the shortest text form so 0.1f32 stays "0.1" on the wire.
        Value::Decimal(v.to_string().parse().unwrap_or(f64::from(v)))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Decimal(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::String(v.clone())
    }
}

impl From<Vec2> for Value {
    fn from(v: Vec2) -> Self {
        let mut out = Value::object();
        out["X"].set(v.x);
        out["Y"].set(v.y);
        out
    }
}

impl From<Vec3> for Value {
    fn from(v: Vec3) -> Self {
        let mut out = Value::object();
        out["X"].set(v.x);
        out["Y"].set(v.y);
        out["Z"].set(v.z);
        out
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<Map> for Value {
    fn from(v: Map) -> Self {
        Value::Object(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
#[path = "value_tests.rs"]
mod tests;
