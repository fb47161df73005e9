//! Name → factory registry used to instantiate decoded nodes.

use rustc_hash::FxHashMap;

use crate::behavior::Behavior;
use crate::error::CodecError;
use crate::spatial::SpatialKind;
use crate::tree::NodeState;

/// Builds a fresh behavior instance.
pub type BehaviorFactory = Box<dyn Fn() -> Box<dyn Behavior>>;

struct BehaviorEntry {
    base: String,
    factory: BehaviorFactory,
}

/// Registered base types and behaviors.
///
/// Base types decide the spatial kind of a node; behaviors refine a base type
/// and are attached on top of it.
pub struct TypeRegistry {
    bases: FxHashMap<String, SpatialKind>,
    behaviors: FxHashMap<String, BehaviorEntry>,
}

impl TypeRegistry {
    /// Creates a registry with the built-in bases `Node`, `Node2D`, `Control`
    /// and `Node3D`.
    pub fn new() -> Self {
        let mut bases = FxHashMap::default();
        bases.insert("Node".to_owned(), SpatialKind::Plain);
        bases.insert("Node2D".to_owned(), SpatialKind::Planar);
        bases.insert("Control".to_owned(), SpatialKind::Ui);
        bases.insert("Node3D".to_owned(), SpatialKind::Volumetric);
        Self {
            bases,
            behaviors: FxHashMap::default(),
        }
    }

    /// Registers an additional base type.
    pub fn register_base(&mut self, name: &str, kind: SpatialKind) -> Result<(), CodecError> {
        if self.is_registered(name) {
            return Err(CodecError::DuplicateType(name.to_owned()));
        }
        self.bases.insert(name.to_owned(), kind);
        Ok(())
    }

    /// Registers a behavior refining `base`.
    pub fn register_behavior<F>(&mut self, name: &str, base: &str, factory: F) -> Result<(), CodecError>
    where
        F: Fn() -> Box<dyn Behavior> + 'static,
    {
        if self.is_registered(name) {
            return Err(CodecError::DuplicateType(name.to_owned()));
        }
        if !self.bases.contains_key(base) {
            return Err(CodecError::UnknownBaseType(base.to_owned()));
        }
        self.behaviors.insert(
            name.to_owned(),
            BehaviorEntry {
                base: base.to_owned(),
                factory: Box::new(factory),
            },
        );
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.bases.contains_key(name) || self.behaviors.contains_key(name)
    }

    pub fn base_kind(&self, base: &str) -> Option<SpatialKind> {
        self.bases.get(base).copied()
    }

    /// Base type a behavior refines.
    pub fn behavior_base(&self, name: &str) -> Option<&str> {
        self.behaviors.get(name).map(|e| e.base.as_str())
    }

    /// Fresh state for a node of base type `base`.
    pub fn instantiate_base(&self, base: &str, name: &str) -> Result<NodeState, CodecError> {
        let kind = self
            .base_kind(base)
            .ok_or_else(|| CodecError::UnknownBaseType(base.to_owned()))?;
        Ok(NodeState::new(name, base, kind))
    }

    /// Fresh behavior registered as `name`.
    pub fn create_behavior(&self, name: &str) -> Result<Box<dyn Behavior>, CodecError> {
        self.behaviors
            .get(name)
            .map(|e| (e.factory)())
            .ok_or_else(|| CodecError::UnknownBehavior(name.to_owned()))
    }

    /// State and behavior for `type_name`, which may be a base or a behavior.
    pub fn instantiate(
        &self,
        type_name: &str,
        name: &str,
    ) -> Result<(NodeState, Option<Box<dyn Behavior>>), CodecError> {
        match self.behaviors.get(type_name) {
            Some(entry) => {
                let state = self.instantiate_base(&entry.base, name)?;
                Ok((state, Some((entry.factory)())))
            }
            None => Ok((self.instantiate_base(type_name, name)?, None)),
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
