//! Arena-backed object tree.
//!
//! Keys are generational: a key to a removed node never aliases a node that
//! later reuses the slot.

use std::any::Any;

use tessera_value::{Map, Value};

use crate::behavior::Behavior;
use crate::identity::UniqueId;
use crate::spatial::{Spatial, SpatialKind};

// ---------------------------------------------------------------------------
// NodeKey
// ---------------------------------------------------------------------------

/// Handle to a node in a [`SceneTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey {
    index: u32,
    generation: u32,
}

// ---------------------------------------------------------------------------
// NodeState
// ---------------------------------------------------------------------------

/// Everything about a node that does not depend on its behavior.
#[derive(Debug, Clone)]
pub struct NodeState {
    /// Node name. Unique among siblings by convention, not enforced.
    pub name: String,
    /// Concrete (base) type name, e.g. `"Node2D"`.
    pub base_type: String,
    pub spatial: Spatial,
    /// Free-form metadata.
    pub meta: Map,
    groups: Vec<String>,
    /// Stable id once tagged by the identity registry.
    pub unique_id: Option<UniqueId>,
}

impl NodeState {
    /// Creates an untagged node of `base_type` with an identity transform.
    pub fn new(name: impl Into<String>, base_type: impl Into<String>, kind: SpatialKind) -> Self {
        Self {
            name: name.into(),
            base_type: base_type.into(),
            spatial: Spatial::identity(kind),
            meta: Map::new(),
            groups: Vec::new(),
            unique_id: None,
        }
    }

    /// Adds a group tag. Adding an existing tag is a no-op.
    pub fn add_group(&mut self, group: &str) {
        if !self.in_group(group) {
            self.groups.push(group.to_owned());
        }
    }

    pub fn remove_group(&mut self, group: &str) {
        self.groups.retain(|g| g != group);
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Group tags in the order they were added.
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn set_meta(&mut self, key: &str, value: impl Into<Value>) {
        self.meta.insert(key, value.into());
    }

    pub fn get_meta(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A node in the tree: state, optional behavior, and links.
pub struct Node {
    pub state: NodeState,
    behavior: Option<Box<dyn Behavior>>,
    parent: Option<NodeKey>,
    children: Vec<NodeKey>,
}

impl Node {
    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }

    pub fn behavior(&self) -> Option<&dyn Behavior> {
        self.behavior.as_deref()
    }

    /// The behavior's type name, or the base type when there is none.
    pub fn type_name(&self) -> &str {
        match &self.behavior {
            Some(b) => b.type_name(),
            None => &self.state.base_type,
        }
    }

    /// Takes the node apart for callers that need the behavior and the
    /// state mutably at once.
    pub fn into_parts(self) -> (NodeState, Option<Box<dyn Behavior>>) {
        (self.state, self.behavior)
    }
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

// ---------------------------------------------------------------------------
// SceneTree
// ---------------------------------------------------------------------------

/// Arena of nodes with a single root.
///
/// Nodes can exist detached (created but not yet attached) so subtrees can be
/// assembled before they become visible to the rest of the simulation.
pub struct SceneTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeKey,
}

impl SceneTree {
    /// Creates a tree holding a plain root node named `"Root"`.
    pub fn new() -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeKey {
                index: 0,
                generation: 0,
            },
        };
        tree.root = tree.create(NodeState::new("Root", "Node", SpatialKind::Plain));
        tree
    }

    pub fn root(&self) -> NodeKey {
        self.root
    }

    /// Number of live nodes, attached or not.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates a detached node.
    pub fn create(&mut self, state: NodeState) -> NodeKey {
        self.create_with(state, None)
    }

    /// Creates a detached node carrying `behavior`.
    pub fn create_with(&mut self, state: NodeState, behavior: Option<Box<dyn Behavior>>) -> NodeKey {
        let node = Node {
            state,
            behavior,
            parent: None,
            children: Vec::new(),
        };
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.node = Some(node);
                NodeKey {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeKey {
                    index,
                    generation: 0,
                }
            }
        }
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: NodeKey) -> Option<&Node> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.node.as_ref()
    }

    pub fn get_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.node.as_mut()
    }

    pub fn state(&self, key: NodeKey) -> Option<&NodeState> {
        self.get(key).map(|n| &n.state)
    }

    pub fn state_mut(&mut self, key: NodeKey) -> Option<&mut NodeState> {
        self.get_mut(key).map(|n| &mut n.state)
    }

    pub fn behavior(&self, key: NodeKey) -> Option<&dyn Behavior> {
        self.get(key)?.behavior()
    }

    pub fn behavior_mut(&mut self, key: NodeKey) -> Option<&mut (dyn Behavior + 'static)> {
        self.get_mut(key)?.behavior.as_deref_mut()
    }

    /// Borrows a node's state and behavior mutably at the same time.
    pub fn parts_mut(
        &mut self,
        key: NodeKey,
    ) -> Option<(&mut NodeState, Option<&mut (dyn Behavior + 'static)>)> {
        let node = self.get_mut(key)?;
        Some((&mut node.state, node.behavior.as_deref_mut()))
    }

    /// Downcasts the behavior of `key` to `T`.
    pub fn behavior_as<T: Behavior>(&self, key: NodeKey) -> Option<&T> {
        let any: &dyn Any = self.behavior(key)?.as_any();
        any.downcast_ref::<T>()
    }

    pub fn behavior_as_mut<T: Behavior>(&mut self, key: NodeKey) -> Option<&mut T> {
        let any: &mut dyn Any = self.behavior_mut(key)?.as_any_mut();
        any.downcast_mut::<T>()
    }

    /// Replaces the behavior on an existing node, keeping its key and state.
    /// Returns the previous behavior.
    pub fn set_behavior(
        &mut self,
        key: NodeKey,
        behavior: Box<dyn Behavior>,
    ) -> Option<Box<dyn Behavior>> {
        let node = self.get_mut(key)?;
        node.behavior.replace(behavior)
    }

    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.get(key)?.parent
    }

    pub fn children(&self, key: NodeKey) -> &[NodeKey] {
        self.get(key).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// First direct child named `name`.
    pub fn find_child(&self, parent: NodeKey, name: &str) -> Option<NodeKey> {
        self.children(parent)
            .iter()
            .copied()
            .find(|&c| self.state(c).is_some_and(|s| s.name == name))
    }

    /// `key` and every node below it, parents before children.
    pub fn descendants(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        if !self.contains(key) {
            return out;
        }
        let mut stack = vec![key];
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Returns `true` if `key` is `ancestor` or lies below it.
    pub fn is_descendant_of(&self, key: NodeKey, ancestor: NodeKey) -> bool {
        let mut current = Some(key);
        while let Some(k) = current {
            if k == ancestor {
                return true;
            }
            current = self.parent(k);
        }
        false
    }

    /// Returns `true` if `key` is reachable from the root.
    pub fn is_attached(&self, key: NodeKey) -> bool {
        self.contains(key) && self.is_descendant_of(key, self.root)
    }

    /// Attaches a detached node under `parent`. Returns `false` if either key
    /// is stale, `child` already has a parent, or the link would form a cycle.
    pub fn attach(&mut self, parent: NodeKey, child: NodeKey) -> bool {
        if !self.contains(parent) || child == self.root {
            return false;
        }
        match self.get(child) {
            Some(node) if node.parent.is_none() => {}
            _ => return false,
        }
        if self.is_descendant_of(parent, child) {
            return false;
        }
        if let Some(node) = self.get_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.get_mut(parent) {
            node.children.push(child);
        }
        true
    }

    /// Unlinks `key` from its parent, leaving the subtree alive.
    pub fn detach(&mut self, key: NodeKey) -> bool {
        let Some(parent) = self.parent(key) else {
            return false;
        };
        if let Some(node) = self.get_mut(parent) {
            node.children.retain(|&c| c != key);
        }
        if let Some(node) = self.get_mut(key) {
            node.parent = None;
        }
        true
    }

    /// Detaches and frees `key` and its whole subtree, returning the removed
    /// nodes parents-first. The root cannot be removed.
    pub fn remove(&mut self, key: NodeKey) -> Vec<(NodeKey, Node)> {
        if key == self.root || !self.contains(key) {
            return Vec::new();
        }
        self.detach(key);
        let keys = self.descendants(key);
        let mut removed = Vec::with_capacity(keys.len());
        for k in keys {
            let slot = &mut self.slots[k.index as usize];
            if let Some(node) = slot.node.take() {
                self.free.push(k.index);
                removed.push((k, node));
            }
        }
        removed
    }

    /// Slash-separated names from the root, for logs.
    pub fn path(&self, key: NodeKey) -> String {
        let mut names = Vec::new();
        let mut current = Some(key);
        while let Some(k) = current {
            match self.state(k) {
                Some(state) => names.push(state.name.as_str()),
                None => break,
            }
            current = self.parent(k);
        }
        names.reverse();
        names.join("/")
    }
}

impl Default for SceneTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> NodeState {
        NodeState::new(name, "Node2D", SpatialKind::Planar)
    }

    #[test]
    fn test_attach_and_descendants_order() {
        let mut tree = SceneTree::new();
        let a = tree.create(named("a"));
        let b = tree.create(named("b"));
        let c = tree.create(named("c"));
        assert!(tree.attach(tree.root(), a));
        assert!(tree.attach(a, b));
        assert!(tree.attach(tree.root(), c));

        let names: Vec<String> = tree
            .descendants(tree.root())
            .into_iter()
            .map(|k| tree.state(k).unwrap().name.clone())
            .collect();
        assert_eq!(names, vec!["Root", "a", "b", "c"]);
        assert_eq!(tree.path(b), "Root/a/b");
        assert_eq!(tree.find_child(a, "b"), Some(b));
    }

    #[test]
    fn test_attach_rejects_cycles_and_reparenting() {
        let mut tree = SceneTree::new();
        let a = tree.create(named("a"));
        let b = tree.create(named("b"));
        assert!(tree.attach(a, b));
        assert!(!tree.attach(b, a), "cycle");
        assert!(!tree.attach(tree.root(), b), "already parented");
        assert!(!tree.attach(a, tree.root()));
        assert!(!tree.is_attached(a));
    }

    #[test]
    fn test_remove_invalidates_keys() {
        let mut tree = SceneTree::new();
        let a = tree.create(named("a"));
        let b = tree.create(named("b"));
        tree.attach(tree.root(), a);
        tree.attach(a, b);

        let removed = tree.remove(a);
        assert_eq!(removed.len(), 2);
        assert!(!tree.contains(a));
        assert!(!tree.contains(b));
        assert!(tree.children(tree.root()).is_empty());

        // Slot reuse does not resurrect the old key.
        let fresh = tree.create(named("fresh"));
        assert!(tree.contains(fresh));
        assert!(!tree.contains(a));
        assert!(tree.remove(tree.root()).is_empty());
    }

    #[test]
    fn test_groups_are_deduplicated() {
        let mut state = named("n");
        state.add_group("x");
        state.add_group("x");
        state.add_group("y");
        assert_eq!(state.groups(), ["x".to_string(), "y".to_string()]);
        state.remove_group("x");
        assert!(!state.in_group("x"));
    }
}
