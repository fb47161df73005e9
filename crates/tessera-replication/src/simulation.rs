//! Per-process services and the tick that drives them.

use std::time::Duration;

use crossbeam_channel::Receiver;
use rustc_hash::FxHashSet;
use tessera_config::NetworkConfig;
use tessera_ecs::{ComponentRegistry, Ecs};
use tessera_scene::{
    CodecError, EncodeMode, IdentityRegistry, NodeKey, NodeState, SaveCategory, SaveError,
    SaveStore, SceneTree, SpatialKind, TypeRegistry, UniqueId, codec,
};
use tessera_value::Value;
use tracing::{debug, info};

use crate::engine::{AddOptions, Replication};
use crate::transport::{NetEvent, Transport};

/// Name of the container node for non-entity objects.
pub const SCENE_NODE_NAME: &str = "Scene";

/// Ids every peer gives its fixed nodes, so snapshots can name them as
/// owners before anything else is known.
pub const ROOT_ID: UniqueId = 0;
pub const ECS_ID: UniqueId = 1;
pub const SCENE_ID: UniqueId = 2;

/// Document listing the level objects written by [`Simulation::save_level`].
const LEVEL_INDEX: &str = "level_index";
const OBJECTS: &str = "Objects";

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The object tree and the services that index it.
pub struct World {
    pub tree: SceneTree,
    pub ids: IdentityRegistry,
    pub types: TypeRegistry,
    pub ecs: Ecs,
    scene: NodeKey,
}

impl World {
    /// Builds the fixed layout: the root, the ECS node and the scene node,
    /// tagged [`ROOT_ID`], [`ECS_ID`] and [`SCENE_ID`].
    pub fn new(authoritative: bool, components: ComponentRegistry) -> Result<Self, CodecError> {
        let mut tree = SceneTree::new();
        let mut types = TypeRegistry::new();
        let ecs = Ecs::install(&mut tree, &mut types, components)?;
        let scene = tree.create(NodeState::new(SCENE_NODE_NAME, "Node", SpatialKind::Plain));
        let root = tree.root();
        tree.attach(root, scene);

        for (key, id) in [(root, ROOT_ID), (ecs.node(), ECS_ID), (scene, SCENE_ID)] {
            if let Some(state) = tree.state_mut(key) {
                state.unique_id = Some(id);
            }
        }
        let mut ids = IdentityRegistry::new(authoritative);
        ids.register_subtree(&tree, root);

        Ok(Self {
            tree,
            ids,
            types,
            ecs,
            scene,
        })
    }

    /// Container for objects that are not entities.
    pub fn scene(&self) -> NodeKey {
        self.scene
    }

    /// Unique id of `key`, if tagged.
    pub fn id_of(&self, key: NodeKey) -> Option<UniqueId> {
        self.tree.state(key).and_then(|s| s.unique_id)
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// One peer: its world plus the replication engine, advanced together.
pub struct Simulation {
    pub world: World,
    pub replication: Replication,
}

impl Simulation {
    pub fn server(
        config: &NetworkConfig,
        components: ComponentRegistry,
        transport: Box<dyn Transport>,
        inbox: Receiver<NetEvent>,
    ) -> Result<Self, CodecError> {
        let world = World::new(true, components)?;
        let mut replication = Replication::server(config, transport, inbox);
        replication.track(&world.tree, world.tree.root());
        Ok(Self { world, replication })
    }

    pub fn client(
        config: &NetworkConfig,
        components: ComponentRegistry,
        transport: Box<dyn Transport>,
        inbox: Receiver<NetEvent>,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            world: World::new(false, components)?,
            replication: Replication::client(config, transport, inbox),
        })
    }

    pub fn is_server(&self) -> bool {
        self.replication.is_authoritative()
    }

    /// One simulation step: inbound messages, systems, despawns, then
    /// outbound updates.
    pub fn tick(&mut self, dt: Duration) {
        self.replication.poll(&mut self.world);

        let authoritative = self.is_server();
        let world = &mut self.world;
        world
            .ecs
            .run_systems(&mut world.tree, dt.as_secs_f32(), authoritative);

        let despawns = self.world.ecs.take_despawn_requests();
        if authoritative {
            for key in despawns {
                self.replication.remove_server_object(&mut self.world, key);
            }
        } else if !despawns.is_empty() {
            debug!(count = despawns.len(), "despawns are server-side, ignored");
        }

        self.replication.tick(&mut self.world, dt);
    }

    // --- Persistence ---

    /// Writes every persistent scene object and every entity to `saves`.
    /// Returns the number of objects written.
    ///
    /// Objects are filed by name, so two persistent scene objects sharing a
    /// name, or one named like the level index, fail the save before
    /// anything is written.
    pub fn save_level(&self, saves: &mut SaveStore) -> Result<usize, SaveError> {
        let world = &self.world;
        let mut objects = Vec::new();
        let mut seen = FxHashSet::default();
        for &child in world.tree.children(world.scene) {
            let Some(state) = world.tree.state(child) else {
                continue;
            };
            if codec::is_excluded(state, EncodeMode::Save) {
                continue;
            }
            let name = state.name.as_str();
            if name == LEVEL_INDEX || !seen.insert(name) {
                return Err(SaveError::DuplicateName(name.to_owned()));
            }
            objects.push((child, name));
        }

        let mut names = Value::array();
        for (child, name) in objects {
            saves.save_object(&world.tree, child, SaveCategory::Level)?;
            names.append(name);
        }
        let saved = names.items().len();
        let mut index = Value::object();
        index[OBJECTS] = names;
        saves.save_data(LEVEL_INDEX, &index, SaveCategory::Level)?;

        let entities = world.ecs.save_state(&world.tree, saves)?;
        info!(objects = saved, entities, save = saves.save_name(), "level saved");
        Ok(saved + entities)
    }

    /// Loads a level written by [`save_level`](Self::save_level) and adds
    /// every object as a server object. Returns the number added.
    ///
    /// # Panics
    ///
    /// On a client.
    pub fn load_level(&mut self, saves: &SaveStore) -> Result<usize, SaveError> {
        let index = saves.load_data(LEVEL_INDEX, SaveCategory::Level)?;
        let mut added = Vec::new();
        for name in index[OBJECTS].items().iter().filter_map(Value::as_str) {
            let key = saves.load_object(
                &mut self.world.tree,
                &self.world.types,
                name,
                SaveCategory::Level,
            )?;
            added.push((self.world.scene, key));
        }
        let world = &mut self.world;
        for key in world.ecs.load_state(&mut world.tree, &world.types, saves)? {
            added.push((world.ecs.node(), key));
        }

        let count = added.len();
        for (owner, key) in added {
            if let Err(err) =
                self.replication
                    .add_server_object(&mut self.world, owner, key, AddOptions::default())
            {
                debug!(%err, "loaded object could not be added");
                self.world.tree.remove(key);
            }
        }
        info!(objects = count, save = saves.save_name(), "level loaded");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_nodes_share_ids_on_every_peer() {
        for authoritative in [true, false] {
            let world = World::new(authoritative, ComponentRegistry::with_builtins()).unwrap();
            assert_eq!(world.id_of(world.tree.root()), Some(ROOT_ID));
            assert_eq!(world.id_of(world.ecs.node()), Some(ECS_ID));
            assert_eq!(world.id_of(world.scene()), Some(SCENE_ID));
            assert_eq!(world.ids.get(SCENE_ID), Some(world.scene()));
        }
    }

    #[test]
    fn test_first_allocated_id_follows_fixed_nodes() {
        let mut world = World::new(true, ComponentRegistry::with_builtins()).unwrap();
        let key = world
            .tree
            .create(NodeState::new("crate", "Node2D", SpatialKind::Planar));
        world.ids.allocate_and_tag(&mut world.tree, key).unwrap();
        assert_eq!(world.id_of(key), Some(SCENE_ID + 1));
    }
}
