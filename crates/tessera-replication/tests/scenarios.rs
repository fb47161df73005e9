//! Server and client simulations talking over the in-memory transport.

use std::any::Any;
use std::time::Duration;

use crossbeam_channel::Receiver;
use tessera_config::NetworkConfig;
use tessera_ecs::{ComponentRegistry, Entity, Health, Movement};
use tessera_replication::{
    AddOptions, ECS_ID, InputSample, InputState, MemoryHub, MemoryTransport, Message, NetEvent,
    OwnedNode, PeerId, RpcArg, RpcKind, SCENE_ID, SERVER_PEER, Simulation, SyncState, Transport,
    World,
};
use tessera_scene::{
    Behavior, DiskStore, EncodeMode, MemoryStore, NodeKey, NodeState, Replicable, SELF_ONLY_START,
    SaveCategory, SaveError, SaveStore, SpatialKind, UniqueId, codec,
};
use tessera_value::Value;

const DT: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A replicable scene object with one integer field.
#[derive(Default)]
struct Beacon {
    level: i64,
    dirty: bool,
}

impl Behavior for Beacon {
    fn type_name(&self) -> &str {
        "Beacon"
    }

    fn replicable(&self) -> Option<&dyn Replicable> {
        Some(self)
    }

    fn replicable_mut(&mut self) -> Option<&mut dyn Replicable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Replicable for Beacon {
    fn dirty(&self) -> bool {
        self.dirty
    }

    fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    fn write_state(&self, _node: &NodeState) -> Value {
        let mut out = Value::object();
        out["L"].set(self.level);
        out
    }

    fn apply_delta(&mut self, _node: &mut NodeState, data: &Value) {
        if let Some(level) = data["L"].as_i64() {
            self.level = level;
        }
    }
}

fn register_beacon(world: &mut World) {
    world
        .types
        .register_behavior("Beacon", "Node2D", || Box::new(Beacon::default()))
        .unwrap();
}

fn new_beacon(world: &mut World, name: &str) -> NodeKey {
    world.tree.create_with(
        NodeState::new(name, "Node2D", SpatialKind::Planar),
        Some(Box::new(Beacon::default())),
    )
}

fn level(sim: &Simulation, id: UniqueId) -> Option<i64> {
    let key = sim.world.ids.get(id)?;
    sim.world.tree.behavior_as::<Beacon>(key).map(|b| b.level)
}

fn server_sim(hub: &MemoryHub) -> Simulation {
    let (transport, inbox) = hub.server();
    let mut sim = Simulation::server(
        &NetworkConfig::default(),
        ComponentRegistry::with_builtins(),
        Box::new(transport),
        inbox,
    )
    .unwrap();
    register_beacon(&mut sim.world);
    sim
}

fn client_sim(hub: &MemoryHub) -> Simulation {
    connected_client(hub).1
}

fn connected_client(hub: &MemoryHub) -> (PeerId, Simulation) {
    let (peer, transport, inbox) = hub.connect();
    let mut sim = Simulation::client(
        &NetworkConfig::default(),
        ComponentRegistry::with_builtins(),
        Box::new(transport),
        inbox,
    )
    .unwrap();
    register_beacon(&mut sim.world);
    (peer, sim)
}

/// Server and one client, ticked until the client is synced.
fn synced_pair() -> (MemoryHub, Simulation, Simulation) {
    let hub = MemoryHub::new();
    let mut server = server_sim(&hub);
    let mut client = client_sim(&hub);
    step(&mut server, &mut client);
    assert_eq!(client.replication.sync_state(), SyncState::Synced);
    (hub, server, client)
}

fn step(server: &mut Simulation, client: &mut Simulation) {
    server.tick(DT);
    client.tick(DT);
}

fn spawn_beacon(server: &mut Simulation, name: &str) -> (NodeKey, UniqueId) {
    let key = new_beacon(&mut server.world, name);
    let scene = server.world.scene();
    let id = server
        .replication
        .add_server_object(&mut server.world, scene, key, AddOptions::default())
        .unwrap();
    (key, id)
}

/// A client endpoint driven by hand.
fn raw_client(hub: &MemoryHub) -> (PeerId, MemoryTransport, Receiver<NetEvent>) {
    let (peer, transport, inbox) = hub.connect();
    inbox.try_iter().count();
    (peer, transport, inbox)
}

fn received(inbox: &Receiver<NetEvent>) -> Vec<Message> {
    inbox
        .try_iter()
        .filter_map(|event| match event {
            NetEvent::Data(_, bytes) => Message::decode(&bytes).ok(),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Server updates
// ---------------------------------------------------------------------------

#[test]
fn test_server_never_sends_empty_update() {
    let hub = MemoryHub::new();
    let mut server = server_sim(&hub);

    // Alone, the server has nobody to update.
    for _ in 0..5 {
        server.tick(DT);
    }
    assert_eq!(server.replication.stats().updates_sent, 0);

    let (_, _transport, inbox) = raw_client(&hub);
    server.tick(DT);
    let first = received(&inbox);
    assert!(matches!(first[0], Message::FullServerData { .. }));
    // The ECS membership starts dirty and goes out once.
    assert!(matches!(first.get(1), Some(Message::ServerUpdate { .. })));

    for _ in 0..10 {
        server.tick(DT);
    }
    assert!(received(&inbox).is_empty());
    assert_eq!(server.replication.stats().updates_sent, 1);
}

#[test]
fn test_dirty_object_is_sent_once() {
    let (_hub, mut server, mut client) = synced_pair();
    let (key, id) = spawn_beacon(&mut server, "lamp");
    step(&mut server, &mut client);
    assert_eq!(level(&client, id), Some(0));

    if let Some(beacon) = server.world.tree.behavior_as_mut::<Beacon>(key) {
        beacon.level = 7;
        beacon.dirty = true;
    }
    let before = server.replication.stats().updates_sent;
    step(&mut server, &mut client);
    assert_eq!(level(&client, id), Some(7));
    assert_eq!(server.replication.stats().updates_sent, before + 1);

    step(&mut server, &mut client);
    assert_eq!(server.replication.stats().updates_sent, before + 1);
}

#[test]
fn test_forced_update_carries_clean_objects() {
    let hub = MemoryHub::new();
    let mut server = server_sim(&hub);
    let (_, mut transport, inbox) = raw_client(&hub);
    server.tick(DT);
    received(&inbox);

    transport.send_reliable(SERVER_PEER, &Message::RequestForceUpdate.encode());
    server.tick(Duration::ZERO);
    let msgs = received(&inbox);
    assert_eq!(msgs.len(), 1);
    let Message::ServerUpdate { nodes } = &msgs[0] else {
        panic!("expected a server update, got {:?}", msgs[0]);
    };
    assert!(nodes.iter().any(|(id, _)| *id == ECS_ID));
}

// ---------------------------------------------------------------------------
// Client bootstrap
// ---------------------------------------------------------------------------

#[test]
fn test_add_before_snapshot_is_dropped_then_snapshot_syncs() {
    let hub = MemoryHub::new();
    let (mut server_end, _server_inbox) = hub.server();
    let mut client = client_sim(&hub);
    let peer = 1;

    // Build three tagged objects on a stand-in authority.
    let mut authority = World::new(true, ComponentRegistry::with_builtins()).unwrap();
    register_beacon(&mut authority);
    let mut encoded = Vec::new();
    for name in ["a", "b", "c"] {
        let key = new_beacon(&mut authority, name);
        let scene = authority.scene();
        authority.tree.attach(scene, key);
        authority.ids.allocate_and_tag(&mut authority.tree, key).unwrap();
        encoded.push(codec::encode(&authority.tree, key, EncodeMode::Network));
    }

    let add = Message::ServerAdd {
        owner: SCENE_ID,
        node: encoded[0].clone(),
    };
    server_end.send_reliable(peer, &add.encode());
    client.tick(DT);
    assert_eq!(client.replication.sync_state(), SyncState::AwaitingFullSync);
    assert_eq!(client.replication.stats().adds_dropped, 1);
    let known = client.world.ids.len();
    assert_eq!(known, 3);

    let snapshot = Message::FullServerData {
        nodes: encoded
            .into_iter()
            .map(|node| OwnedNode {
                owner: SCENE_ID,
                node,
            })
            .collect(),
        network_nodes: Vec::new(),
    };
    server_end.send_reliable(peer, &snapshot.encode());
    client.tick(DT);
    assert_eq!(client.replication.sync_state(), SyncState::Synced);
    assert_eq!(client.world.ids.len(), known + 3);
    let scene = client.world.scene();
    assert_eq!(client.world.tree.children(scene).len(), 3);
}

#[test]
fn test_malformed_message_is_dropped() {
    let hub = MemoryHub::new();
    let (mut server_end, _server_inbox) = hub.server();
    let mut client = client_sim(&hub);

    server_end.send_reliable(1, b"{\"DataType\":3,\"Nodes\":[");
    client.tick(DT);
    assert_eq!(client.replication.stats().malformed_dropped, 1);
    assert_eq!(client.replication.sync_state(), SyncState::AwaitingFullSync);
}

#[test]
fn test_unknown_id_requests_resync() {
    let hub = MemoryHub::new();
    let (mut server_end, server_inbox) = hub.server();
    let mut client = client_sim(&hub);
    let empty = Message::FullServerData {
        nodes: Vec::new(),
        network_nodes: Vec::new(),
    };
    server_end.send_reliable(1, &empty.encode());
    client.tick(DT);
    server_inbox.try_iter().count();

    let mut delta = Value::object();
    delta["L"].set(3);
    let update = Message::ServerUpdate {
        nodes: vec![(77, delta)],
    };
    server_end.send_unreliable(1, &update.encode());
    client.tick(Duration::ZERO);

    let stats = client.replication.stats();
    assert_eq!(stats.updates_deferred, 1);
    assert_eq!(stats.resyncs_requested, 1);
    assert_eq!(received(&server_inbox), vec![Message::RequestForceUpdate]);
}

// ---------------------------------------------------------------------------
// Adds, removes, self-only objects
// ---------------------------------------------------------------------------

#[test]
fn test_add_and_remove_follow_the_server() {
    let (_hub, mut server, mut client) = synced_pair();
    let (key, id) = spawn_beacon(&mut server, "lamp");
    step(&mut server, &mut client);
    let client_key = client.world.ids.get(id).unwrap();
    assert_eq!(client.world.tree.state(client_key).unwrap().name, "lamp");
    assert_eq!(client.world.tree.parent(client_key), Some(client.world.scene()));

    assert!(server.replication.remove_server_object(&mut server.world, key));
    assert!(!server.world.tree.contains(key));
    step(&mut server, &mut client);
    assert!(client.world.ids.get(id).is_none());
    assert!(!client.world.tree.contains(client_key));
}

#[test]
fn test_late_client_gets_existing_objects() {
    let hub = MemoryHub::new();
    let mut server = server_sim(&hub);
    let (_, id) = spawn_beacon(&mut server, "early");
    server.tick(DT);

    let mut client = client_sim(&hub);
    step(&mut server, &mut client);
    assert_eq!(client.replication.sync_state(), SyncState::Synced);
    assert_eq!(level(&client, id), Some(0));
}

#[test]
fn test_self_objects_stay_local() {
    let (_hub, mut server, mut client) = synced_pair();
    let key = new_beacon(&mut server.world, "cursor");
    let scene = server.world.scene();
    let id = server
        .replication
        .add_self_object(&mut server.world, scene, key)
        .unwrap();
    assert!(id >= SELF_ONLY_START);
    assert!(!server.replication.tracked().contains(&key));

    let client_ids = client.world.ids.len();
    step(&mut server, &mut client);
    assert_eq!(client.world.ids.len(), client_ids);

    server.replication.remove_self_object(&mut server.world, key);
    assert!(server.world.ids.get(id).is_none());
}

#[test]
#[should_panic(expected = "client")]
fn test_client_cannot_add_server_objects() {
    let (_hub, _server, mut client) = synced_pair();
    let key = new_beacon(&mut client.world, "forged");
    let scene = client.world.scene();
    let _ = client
        .replication
        .add_server_object(&mut client.world, scene, key, AddOptions::default());
}

// ---------------------------------------------------------------------------
// RPC and input
// ---------------------------------------------------------------------------

#[test]
fn test_rpc_to_missing_method_changes_nothing() {
    let (_hub, mut server, mut client) = synced_pair();
    let (_, id) = spawn_beacon(&mut server, "lamp");
    let types = &server.world.types;
    server
        .replication
        .rpc_table_mut()
        .register(types, "Beacon", "raise", &[RpcKind::Int], |ctx, args| {
            let by = args[0].as_i64().unwrap_or(0);
            if let Some(beacon) = ctx.world.tree.behavior_as_mut::<Beacon>(ctx.node) {
                beacon.level += by;
                beacon.dirty = true;
            }
        })
        .unwrap();
    step(&mut server, &mut client);
    let client_key = client.world.ids.get(id).unwrap();

    client
        .replication
        .rpc_server(&mut client.world, client_key, "lower", &[RpcArg::Int(1)])
        .unwrap();
    step(&mut server, &mut client);
    assert_eq!(level(&server, id), Some(0));
    assert_eq!(server.replication.stats().rpc_dropped, 1);

    client
        .replication
        .rpc_server(&mut client.world, client_key, "raise", &[RpcArg::Int(4)])
        .unwrap();
    step(&mut server, &mut client);
    assert_eq!(level(&server, id), Some(4));
    step(&mut server, &mut client);
    assert_eq!(level(&client, id), Some(4));
}

#[test]
fn test_rpc_from_untagged_node_is_rejected() {
    let (_hub, _server, mut client) = synced_pair();
    let key = new_beacon(&mut client.world, "loose");
    let result = client
        .replication
        .rpc_server(&mut client.world, key, "raise", &[]);
    assert_eq!(result, Err(tessera_replication::RpcError::NoId));
}

#[test]
fn test_input_edges_reach_the_server() {
    let (_hub, mut server, mut client) = synced_pair();
    let (_, id) = spawn_beacon(&mut server, "player");
    step(&mut server, &mut client);

    client.replication.set_input(id, InputState::new(["jump"]));
    client.replication.update_input(&InputSample {
        held_actions: vec!["jump".into()],
        ..Default::default()
    });
    step(&mut server, &mut client);
    server.tick(DT);
    let remote = server.replication.remote_input(id).unwrap();
    assert!(remote.action_pressed("jump"));

    client.replication.update_input(&InputSample::default());
    client.tick(DT);
    server.tick(DT);
    let remote = server.replication.remote_input(id).unwrap();
    assert!(!remote.action_pressed("jump"));
    assert!(!remote.action_just_released("jump"));
}

#[test]
fn test_departed_client_input_is_forgotten() {
    let hub = MemoryHub::new();
    let mut server = server_sim(&hub);
    let (peer, mut client) = connected_client(&hub);
    step(&mut server, &mut client);
    let (_, id) = spawn_beacon(&mut server, "player");
    step(&mut server, &mut client);

    client.replication.set_input(id, InputState::new(["jump"]));
    client.replication.update_input(&InputSample {
        held_actions: vec!["jump".into()],
        ..Default::default()
    });
    step(&mut server, &mut client);
    server.tick(DT);
    assert!(server.replication.remote_input(id).is_some());

    hub.disconnect(peer);
    server.tick(DT);
    assert!(server.replication.remote_input(id).is_none());
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

fn spawn_entity(server: &mut Simulation, name: &str) -> (NodeKey, UniqueId) {
    let world = &mut server.world;
    let key = world.ecs.new_entity(&mut world.tree, name);
    if let Some(entity) = world.tree.behavior_as_mut::<Entity>(key) {
        entity.add(Health::new(10.0));
    }
    let owner = server.world.ecs.node();
    let id = server
        .replication
        .add_server_object(&mut server.world, owner, key, AddOptions::default())
        .unwrap();
    (key, id)
}

#[test]
fn test_entity_replicates_with_components() {
    let (_hub, mut server, mut client) = synced_pair();
    let (key, id) = spawn_entity(&mut server, "Moose");
    assert_eq!(server.world.ecs.len(), 1);
    step(&mut server, &mut client);

    let client_key = client.world.ids.get(id).unwrap();
    assert!(client.world.ecs.contains(client_key));
    let health = client
        .world
        .ecs
        .component::<Health>(&client.world.tree, client_key)
        .unwrap();
    assert_eq!(health.max_health, 10.0);
    assert!(
        client
            .world
            .ecs
            .component::<Movement>(&client.world.tree, client_key)
            .is_none()
    );

    let world = &mut server.world;
    world
        .ecs
        .add_component(&mut world.tree, key, Movement::new(2.0, glam::Vec3::X));
    step(&mut server, &mut client);
    assert!(
        client
            .world
            .ecs
            .component::<Movement>(&client.world.tree, client_key)
            .is_some()
    );

    server.replication.remove_server_object(&mut server.world, key);
    step(&mut server, &mut client);
    assert!(client.world.ecs.is_empty());
    assert!(server.world.ecs.is_empty());
}

#[test]
fn test_level_save_and_load() {
    let hub = MemoryHub::new();
    let mut server = server_sim(&hub);
    spawn_beacon(&mut server, "lamp");
    spawn_entity(&mut server, "Moose");
    let scratch = new_beacon(&mut server.world, "scratch");
    let scene = server.world.scene();
    let options = AddOptions {
        persistent: false,
        ..Default::default()
    };
    server
        .replication
        .add_server_object(&mut server.world, scene, scratch, options)
        .unwrap();

    let mut saves = SaveStore::new(Box::new(MemoryStore::new()), "Static");
    assert_eq!(server.save_level(&mut saves).unwrap(), 2);

    let other_hub = MemoryHub::new();
    let mut restored = server_sim(&other_hub);
    assert_eq!(restored.load_level(&saves).unwrap(), 2);

    let world = &restored.world;
    let names: Vec<&str> = world
        .tree
        .children(world.scene())
        .iter()
        .filter_map(|&k| world.tree.state(k).map(|s| s.name.as_str()))
        .collect();
    assert_eq!(names, vec!["lamp"]);
    assert_eq!(world.ecs.len(), 1);
    let moose = world.ecs.entities()[0];
    assert!(world.id_of(moose).is_some());
    assert_eq!(
        world.ecs.component::<Health>(&world.tree, moose).map(|h| h.health),
        Some(10.0)
    );
}

#[test]
fn test_level_refuses_objects_sharing_a_name() {
    let hub = MemoryHub::new();
    let mut server = server_sim(&hub);
    let (first, _) = spawn_beacon(&mut server, "lamp");
    server
        .world
        .tree
        .state_mut(first)
        .unwrap()
        .meta
        .insert("tag", Value::from("first"));
    spawn_beacon(&mut server, "lamp");

    let mut saves = SaveStore::new(Box::new(MemoryStore::new()), "Static");
    assert!(matches!(
        server.save_level(&mut saves),
        Err(SaveError::DuplicateName(name)) if name == "lamp"
    ));
    assert!(saves.load_data("lamp", SaveCategory::Level).is_err());

    let other_hub = MemoryHub::new();
    let mut server = server_sim(&other_hub);
    spawn_beacon(&mut server, "level_index");
    assert!(matches!(
        server.save_level(&mut saves),
        Err(SaveError::DuplicateName(_))
    ));
}

#[test]
fn test_level_survives_disk_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let hub = MemoryHub::new();
    let mut server = server_sim(&hub);
    spawn_entity(&mut server, "Moose");

    let mut saves = SaveStore::new(Box::new(DiskStore::new(dir.path())), "Static");
    server.save_level(&mut saves).unwrap();
    assert!(dir.path().join("Static").join("ECS").exists());

    let mut reopened = SaveStore::new(Box::new(DiskStore::new(dir.path())), "Other");
    reopened.load_save("Static").unwrap();
    let mut restored = server_sim(&MemoryHub::new());
    assert_eq!(restored.load_level(&reopened).unwrap(), 1);
    assert_eq!(restored.world.ecs.len(), 1);
}
