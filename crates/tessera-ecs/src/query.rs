//! Incrementally maintained present/absent component filters.

use std::any::TypeId;

use tessera_scene::NodeKey;

use crate::component::Component;
use crate::entity::Entity;

/// A component filter plus the entities currently matching it.
///
/// An entity is a member iff it holds every `present` type and no `absent`
/// type. Membership is updated one entity at a time as entities and
/// components change; results never hold duplicates.
#[derive(Debug, Clone, Default)]
pub struct Query {
    present: Vec<TypeId>,
    absent: Vec<TypeId>,
    matches: Vec<NodeKey>,
}

impl Query {
    /// Matches every entity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires component `C`.
    pub fn with<C: Component>(mut self) -> Self {
        self.present.push(TypeId::of::<C>());
        self
    }

    /// Excludes entities holding component `C`.
    pub fn without<C: Component>(mut self) -> Self {
        self.absent.push(TypeId::of::<C>());
        self
    }

    /// Current members, in the order they started matching.
    pub fn entities(&self) -> &[NodeKey] {
        &self.matches
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.matches.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Returns `true` if `entity` satisfies the filter.
    pub fn accepts(&self, entity: &Entity) -> bool {
        self.present.iter().all(|&t| entity.has_type(t))
            && !self.absent.iter().any(|&t| entity.has_type(t))
    }

    /// Returns `true` if changes to `type_id` can affect membership.
    pub fn mentions(&self, type_id: TypeId) -> bool {
        self.present.contains(&type_id) || self.absent.contains(&type_id)
    }

    /// Re-evaluates one entity. `None` means the entity is gone.
    pub fn update(&mut self, key: NodeKey, entity: Option<&Entity>) {
        let wanted = entity.is_some_and(|e| self.accepts(e));
        let index = self.matches.iter().position(|&k| k == key);
        match (wanted, index) {
            (true, None) => self.matches.push(key),
            (false, Some(i)) => {
                self.matches.remove(i);
            }
            _ => {}
        }
    }

    pub fn clear(&mut self) {
        self.matches.clear();
    }
}

/// The named queries a system declared.
#[derive(Debug, Clone, Default)]
pub struct QuerySet {
    queries: Vec<(String, Query)>,
}

impl QuerySet {
    pub fn new(queries: Vec<(String, Query)>) -> Self {
        Self { queries }
    }

    /// Members of the query named `name`; empty if there is no such query.
    pub fn get(&self, name: &str) -> &[NodeKey] {
        self.queries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, q)| q.entities())
            .unwrap_or(&[])
    }

    pub fn query(&self, name: &str) -> Option<&Query> {
        self.queries.iter().find(|(n, _)| n == name).map(|(_, q)| q)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Query> {
        self.queries.iter_mut().map(|(_, q)| q)
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
