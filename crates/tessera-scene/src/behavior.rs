//! Capability traits implemented by node behaviors.

use std::any::Any;

use tessera_value::Value;

use crate::tree::NodeState;

/// Type-specific logic attached to a node.
///
/// A behavior refines the node's base type: a `"Player"` behavior on a
/// `"Node2D"` node. It opts into replication and persistence by returning
/// itself from [`replicable`](Self::replicable) or
/// [`persistable`](Self::persistable).
pub trait Behavior: Any {
    /// Registered type name, written as `Type` by the codec.
    fn type_name(&self) -> &str;

    fn replicable(&self) -> Option<&dyn Replicable> {
        None
    }

    fn replicable_mut(&mut self) -> Option<&mut dyn Replicable> {
        None
    }

    fn persistable(&self) -> Option<&dyn Persistable> {
        None
    }

    fn persistable_mut(&mut self) -> Option<&mut dyn Persistable> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Produces and consumes network deltas.
///
/// Implementors keep a dirty flag that is set whenever a replicated field
/// changes. [`serialize_delta`](Self::serialize_delta) gates on it and clears
/// it once the delta has been produced.
pub trait Replicable {
    fn dirty(&self) -> bool;

    fn set_dirty(&mut self, dirty: bool);

    /// Current replicated state, without touching the dirty flag.
    fn write_state(&self, node: &NodeState) -> Value;

    /// Applies state received from the authority.
    fn apply_delta(&mut self, node: &mut NodeState, data: &Value);

    /// Returns the replicated state if it changed since the last send, or
    /// unconditionally when `force` is set. Clears the dirty flag.
    fn serialize_delta(&mut self, node: &NodeState, force: bool) -> Option<Value> {
        if !force && !self.dirty() {
            return None;
        }
        let data = self.write_state(node);
        self.set_dirty(false);
        Some(data)
    }
}

/// Produces and consumes full save-file encodings.
pub trait Persistable {
    fn serialize_full(&self, node: &NodeState) -> Value;

    fn apply_full(&mut self, node: &mut NodeState, data: &Value);
}

#[cfg(test)]
pub(crate) mod testing {
    //! Small behaviors shared by this crate's tests.

    use super::*;

    /// Replicable + persistable counter.
    #[derive(Debug, Default)]
    pub struct Counter {
        pub value: i64,
        pub dirty: bool,
        pub saved_note: String,
    }

    impl Counter {
        pub fn bump(&mut self) {
            self.value += 1;
            self.dirty = true;
        }
    }

    impl Behavior for Counter {
        fn type_name(&self) -> &str {
            "Counter"
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

    impl Replicable for Counter {
        fn dirty(&self) -> bool {
            self.dirty
        }

        fn set_dirty(&mut self, dirty: bool) {
            self.dirty = dirty;
        }

        fn write_state(&self, _node: &NodeState) -> Value {
            let mut out = Value::object();
            out["V"].set(self.value);
            out
        }

        fn apply_delta(&mut self, _node: &mut NodeState, data: &Value) {
            if let Some(v) = data["V"].as_i64() {
                self.value = v;
            }
        }
    }

    impl Persistable for Counter {
        fn serialize_full(&self, _node: &NodeState) -> Value {
            let mut out = Value::object();
            out["V"].set(self.value);
            out["Note"].set(self.saved_note.as_str());
            out
        }

        fn apply_full(&mut self, _node: &mut NodeState, data: &Value) {
            self.value = data["V"].as_i64().unwrap_or_default();
            self.saved_note = data["Note"].as_str().unwrap_or_default().to_owned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Counter;
    use super::*;
    use crate::spatial::SpatialKind;

    #[test]
    fn test_delta_gated_on_dirty_flag() {
        let node = NodeState::new("c", "Node", SpatialKind::Plain);
        let mut counter = Counter::default();

        assert!(counter.serialize_delta(&node, false).is_none());
        counter.bump();
        let delta = counter.serialize_delta(&node, false).unwrap();
        assert_eq!(delta["V"].as_i64(), Some(1));
        assert!(counter.serialize_delta(&node, false).is_none());
        assert!(counter.serialize_delta(&node, true).is_some());
    }

    #[test]
    fn test_write_state_leaves_flag() {
        let node = NodeState::new("c", "Node", SpatialKind::Plain);
        let mut counter = Counter::default();
        counter.bump();
        let _ = counter.write_state(&node);
        assert!(counter.dirty());
    }
}
