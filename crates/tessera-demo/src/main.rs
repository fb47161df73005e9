//! Runs a server and a client in one process over the in-memory transport.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI
//! flags. Run with `cargo run -p tessera-demo -- --ticks 200` for a longer
//! session, or `--role server` to simulate and save without a client.

mod lamp;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use glam::Vec3;
use tessera_config::{CliArgs, Config, Role, default_config_dir};
use tessera_ecs::systems::{InterpolateNetworkTransforms, MovementSystem, SyncNetworkTransforms};
use tessera_ecs::{ComponentRegistry, Entity, Health, Movement, NetworkTransform, SystemSide};
use tessera_replication::{
    AddOptions, InputSample, InputState, MemoryHub, RpcArg, Simulation, SyncState,
};
use tessera_scene::{DiskStore, NodeKey, SaveStore, UniqueId};
use tracing::{error, info, warn};

use crate::lamp::Lamp;

/// Simulation step, matching a 60 Hz frame.
const FIXED_DT: Duration = Duration::from_micros(16_667);

fn main() {
    let args = CliArgs::parse();

    let config_dir = args
        .config
        .clone()
        .or_else(default_config_dir)
        .unwrap_or_else(|| PathBuf::from(".tessera"));

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    tessera_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let result = match args.role {
        Role::Local => run_local(&config, args.ticks),
        Role::Server => run_server(&config, args.ticks),
        Role::Client => {
            error!("the in-memory transport needs a server in this process, use --role local");
            std::process::exit(2);
        }
    };
    if let Err(e) = result {
        error!("demo failed: {e}");
        std::process::exit(1);
    }
}

type DemoResult = Result<(), Box<dyn std::error::Error>>;

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn new_server(config: &Config, hub: &MemoryHub) -> Result<Simulation, Box<dyn std::error::Error>> {
    let (transport, inbox) = hub.server();
    let mut sim = Simulation::server(
        &config.network,
        ComponentRegistry::with_builtins(),
        Box::new(transport),
        inbox,
    )?;
    lamp::register(&mut sim.world.types)?;
    lamp::register_rpcs(sim.replication.rpc_table_mut(), &sim.world.types)?;

    let world = &mut sim.world;
    world
        .ecs
        .add_system(&world.tree, Box::new(MovementSystem), SystemSide::Server);
    world
        .ecs
        .add_system(&world.tree, Box::new(SyncNetworkTransforms), SystemSide::Server);
    Ok(sim)
}

fn new_client(config: &Config, hub: &MemoryHub) -> Result<Simulation, Box<dyn std::error::Error>> {
    let (peer, transport, inbox) = hub.connect();
    info!(peer, "client connecting");
    let mut sim = Simulation::client(
        &config.network,
        ComponentRegistry::with_builtins(),
        Box::new(transport),
        inbox,
    )?;
    lamp::register(&mut sim.world.types)?;
    let world = &mut sim.world;
    world.ecs.add_system(
        &world.tree,
        Box::new(InterpolateNetworkTransforms),
        SystemSide::Client,
    );
    Ok(sim)
}

/// Adds a lamp and a walking entity to the server world.
fn populate(server: &mut Simulation) -> Result<(UniqueId, UniqueId), Box<dyn std::error::Error>> {
    let lamp = lamp::create(&mut server.world.tree, "Lamp");
    let scene = server.world.scene();
    let lamp_id =
        server
            .replication
            .add_server_object(&mut server.world, scene, lamp, AddOptions::default())?;

    let world = &mut server.world;
    let walker = world.ecs.new_entity(&mut world.tree, "Walker");
    if let Some(entity) = world.tree.behavior_as_mut::<Entity>(walker) {
        entity.add(Health::new(100.0));
        entity.add(Movement::new(1.5, Vec3::X));
        entity.add(NetworkTransform::default());
    }
    let owner = world.ecs.node();
    let walker_id =
        server
            .replication
            .add_server_object(&mut server.world, owner, walker, AddOptions::default())?;

    info!(lamp = lamp_id, walker = walker_id, "server objects added");
    Ok((lamp_id, walker_id))
}

fn save_store(config: &Config) -> SaveStore {
    SaveStore::new(
        Box::new(DiskStore::new(&config.persistence.save_dir)),
        config.persistence.default_save.as_str(),
    )
    .with_pretty(config.persistence.pretty)
    .with_verify_hash(config.persistence.verify_hash_on_load)
}

fn save(server: &Simulation, config: &Config) -> DemoResult {
    let mut saves = save_store(config);
    let count = server.save_level(&mut saves)?;
    let dir: &Path = &config.persistence.save_dir;
    info!(objects = count, dir = %dir.display(), save = saves.save_name(), "level written");
    Ok(())
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Server and client in one process: full sync, deltas, RPC, input, removal.
fn run_local(config: &Config, ticks: u32) -> DemoResult {
    let hub = MemoryHub::new();
    let mut server = new_server(config, &hub)?;
    let mut client = new_client(config, &hub)?;
    let (lamp_id, walker_id) = populate(&mut server)?;

    client
        .replication
        .set_input(walker_id, InputState::new(["jump", "use"]));

    let mut lamp_removed = false;
    let mut was_jumping = false;
    for tick in 0..ticks {
        server.tick(FIXED_DT);
        client.tick(FIXED_DT);

        if client.replication.sync_state() != SyncState::Synced {
            continue;
        }
        let client_lamp = client.world.ids.get(lamp_id);

        // A short scripted session driven from the client side.
        match tick {
            10 => call_lamp(&mut client, client_lamp, "toggle", &[]),
            20 => call_lamp(&mut client, client_lamp, "dim", &[RpcArg::Int(35)]),
            _ => {}
        }
        let held = if (30..40).contains(&tick) {
            vec!["jump".to_owned()]
        } else {
            Vec::new()
        };
        client.replication.update_input(&InputSample {
            held_actions: held,
            ..Default::default()
        });
        let jumping = server
            .replication
            .remote_input(walker_id)
            .is_some_and(|input| input.action_pressed("jump"));
        if jumping != was_jumping {
            info!(tick, jumping, "server saw walker input");
            was_jumping = jumping;
        }

        if tick + 1 == ticks / 2 {
            save(&server, config)?;
        }
        if !lamp_removed && tick + 10 == ticks {
            lamp_removed = remove_lamp(&mut server, lamp_id);
        }
    }

    report(&server, &client, lamp_id, walker_id);
    Ok(())
}

/// A server with no clients: objects are simulated and saved, never sent.
fn run_server(config: &Config, ticks: u32) -> DemoResult {
    let hub = MemoryHub::new();
    let mut server = new_server(config, &hub)?;
    populate(&mut server)?;
    for _ in 0..ticks {
        server.tick(FIXED_DT);
    }
    save(&server, config)?;
    info!(stats = ?server.replication.stats(), "server finished");
    Ok(())
}

fn call_lamp(client: &mut Simulation, lamp: Option<NodeKey>, method: &str, args: &[RpcArg]) {
    let Some(lamp) = lamp else {
        warn!(method, "lamp not replicated yet");
        return;
    };
    if let Err(e) = client
        .replication
        .rpc_server(&mut client.world, lamp, method, args)
    {
        warn!(method, "rpc failed: {e}");
    }
}

fn remove_lamp(server: &mut Simulation, lamp_id: UniqueId) -> bool {
    let Some(key) = server.world.ids.get(lamp_id) else {
        return false;
    };
    server.replication.remove_server_object(&mut server.world, key)
}

fn report(server: &Simulation, client: &Simulation, lamp_id: UniqueId, walker_id: UniqueId) {
    let lamp = client
        .world
        .ids
        .get(lamp_id)
        .and_then(|key| client.world.tree.behavior_as::<Lamp>(key));
    match lamp {
        Some(lamp) => info!(on = lamp.on, brightness = lamp.brightness, "client lamp"),
        None => info!("client lamp removed"),
    }

    let walker = client.world.ids.get(walker_id);
    let position = walker
        .and_then(|key| client.world.tree.state(key))
        .and_then(|state| state.spatial.position_3d());
    let health = walker
        .and_then(|key| client.world.ecs.component::<Health>(&client.world.tree, key))
        .map(|h| h.health);
    info!(?position, ?health, entities = client.world.ecs.len(), "client walker");

    info!(stats = ?server.replication.stats(), "server stats");
    info!(stats = ?client.replication.stats(), "client stats");
}
