//! Built-in systems for the built-in components.

use glam::Vec3;
use tessera_scene::Spatial;

use crate::component::{Movement, NetworkTransform};
use crate::query::{Query, QuerySet};
use crate::system::{System, SystemContext};

/// Rate at which clients close the gap to a [`NetworkTransform`] target, per
/// second.
pub const INTERPOLATION_RATE: f32 = 5.0;

fn transform_mut(spatial: &mut Spatial) -> Option<(&mut Vec3, &mut Vec3)> {
    match spatial {
        Spatial::Volumetric {
            position, rotation, ..
        } => Some((position, rotation)),
        _ => None,
    }
}

/// Moves every entity with a [`Movement`] by `speed * dt` along its
/// direction. Server side.
#[derive(Debug, Default)]
pub struct MovementSystem;

impl System for MovementSystem {
    fn name(&self) -> &str {
        "MovementSystem"
    }

    fn queries(&self) -> Vec<(String, Query)> {
        vec![("Moving".to_owned(), Query::new().with::<Movement>())]
    }

    fn run(&mut self, ctx: &mut SystemContext<'_>, queries: &QuerySet) {
        let dt = ctx.dt;
        for &key in queries.get("Moving") {
            let Some((state, entity)) = ctx.entity_parts_mut(key) else {
                continue;
            };
            let Some(step) = entity.get::<Movement>().map(|m| m.step(dt)) else {
                continue;
            };
            if step == Vec3::ZERO {
                continue;
            }
            if let Some((position, _)) = transform_mut(&mut state.spatial) {
                *position += step;
                entity.mark_dirty();
            }
        }
    }
}

/// Copies node transforms into [`NetworkTransform`] targets. Server side.
#[derive(Debug, Default)]
pub struct SyncNetworkTransforms;

impl System for SyncNetworkTransforms {
    fn name(&self) -> &str {
        "SyncNetworkTransforms"
    }

    fn queries(&self) -> Vec<(String, Query)> {
        vec![("Synced".to_owned(), Query::new().with::<NetworkTransform>())]
    }

    fn run(&mut self, ctx: &mut SystemContext<'_>, queries: &QuerySet) {
        for &key in queries.get("Synced") {
            let Some((state, entity)) = ctx.entity_parts_mut(key) else {
                continue;
            };
            let Some((position, rotation)) = transform_mut(&mut state.spatial) else {
                continue;
            };
            let (position, rotation) = (*position, *rotation);
            let Some(target) = entity.get_mut::<NetworkTransform>() else {
                continue;
            };
            if target.sync_position != position || target.sync_rotation != rotation {
                target.sync_position = position;
                target.sync_rotation = rotation;
                entity.mark_dirty();
            }
        }
    }
}

/// Eases node transforms toward their [`NetworkTransform`] target. Client
/// side.
#[derive(Debug, Default)]
pub struct InterpolateNetworkTransforms;

impl System for InterpolateNetworkTransforms {
    fn name(&self) -> &str {
        "InterpolateNetworkTransforms"
    }

    fn queries(&self) -> Vec<(String, Query)> {
        vec![("Synced".to_owned(), Query::new().with::<NetworkTransform>())]
    }

    fn run(&mut self, ctx: &mut SystemContext<'_>, queries: &QuerySet) {
        let t = (INTERPOLATION_RATE * ctx.dt).min(1.0);
        for &key in queries.get("Synced") {
            let Some((state, entity)) = ctx.entity_parts_mut(key) else {
                continue;
            };
            let Some(target) = entity.get::<NetworkTransform>() else {
                continue;
            };
            if let Some((position, rotation)) = transform_mut(&mut state.spatial) {
                *position = position.lerp(target.sync_position, t);
                *rotation = rotation.lerp(target.sync_rotation, t);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tessera_scene::{NodeKey, Replicable, SceneTree, TypeRegistry};

    use super::*;
    use crate::component::ComponentRegistry;
    use crate::system::SystemSide;
    use crate::{Ecs, Entity};

    fn world() -> (SceneTree, Ecs) {
        let mut tree = SceneTree::new();
        let mut types = TypeRegistry::new();
        let ecs = Ecs::install(&mut tree, &mut types, ComponentRegistry::with_builtins()).unwrap();
        (tree, ecs)
    }

    fn position(tree: &SceneTree, key: NodeKey) -> Vec3 {
        tree.state(key).unwrap().spatial.position_3d().unwrap()
    }

    #[test]
    fn test_movement_moves_and_dirties() {
        let (mut tree, mut ecs) = world();
        let key = ecs.new_entity(&mut tree, "deer");
        tree.attach(ecs.node(), key);
        ecs.add_entity(&mut tree, key);
        ecs.add_component(&mut tree, key, Movement::new(2.0, Vec3::X));
        ecs.add_system(&tree, Box::new(MovementSystem), SystemSide::Server);

        tree.behavior_as_mut::<Entity>(key).unwrap().take_changes();
        tree.behavior_as_mut::<Entity>(key).unwrap().set_dirty(false);

        ecs.run_systems(&mut tree, 0.5, true);
        assert_eq!(position(&tree, key), Vec3::new(1.0, 0.0, 0.0));
        assert!(tree.behavior_as::<Entity>(key).unwrap().dirty());

        // Client role skips server systems.
        ecs.run_systems(&mut tree, 0.5, false);
        assert_eq!(position(&tree, key), Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_sync_then_interpolate() {
        let (mut server, mut ecs) = world();
        let key = ecs.new_entity(&mut server, "deer");
        server.attach(ecs.node(), key);
        ecs.add_entity(&mut server, key);
        ecs.add_component(&mut server, key, NetworkTransform::default());
        ecs.add_component(&mut server, key, Movement::new(1.0, Vec3::Z));
        ecs.add_system(&server, Box::new(MovementSystem), SystemSide::Server);
        ecs.add_system(&server, Box::new(SyncNetworkTransforms), SystemSide::Server);
        ecs.add_system(&server, Box::new(InterpolateNetworkTransforms), SystemSide::Client);

        ecs.run_systems(&mut server, 1.0, true);
        let target = ecs.component::<NetworkTransform>(&server, key).unwrap();
        assert_eq!(target.sync_position, Vec3::new(0.0, 0.0, 1.0));

        // Pretend to be a client that has not moved yet.
        if let Some((p, _)) = transform_mut(&mut server.state_mut(key).unwrap().spatial) {
            *p = Vec3::ZERO;
        }
        ecs.run_systems(&mut server, 0.1, false);
        assert_eq!(position(&server, key), Vec3::new(0.0, 0.0, 0.5));
        ecs.run_systems(&mut server, 1.0, false);
        assert_eq!(position(&server, key), Vec3::new(0.0, 0.0, 1.0));
    }
}
