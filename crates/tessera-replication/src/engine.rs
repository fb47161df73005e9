//! The replication engine.
//!
//! One [`Replication`] runs per process. On the server it owns the set of
//! replicated nodes, sends a full snapshot to each new peer, batches dirty
//! deltas into one `ServerUpdate` per update interval, and announces adds and
//! removes immediately. On a client it waits for the snapshot, then applies
//! adds, removes and updates, asking for a forced update whenever an update
//! names an object it cannot find.
//!
//! Inbound traffic is queued by the transport and only handled inside
//! [`Replication::poll`], which the owner calls from its tick.

use std::time::Duration;

use crossbeam_channel::Receiver;
use rustc_hash::FxHashMap;
use tessera_config::NetworkConfig;
use tessera_scene::{
    EncodeMode, IdentityError, NodeKey, PositionOverride, SceneTree, UniqueId, codec, groups,
};
use tessera_value::Value;
use tracing::{debug, info, warn};

use crate::error::RpcError;
use crate::input::{InputSample, InputState};
use crate::protocol::{Message, OwnedNode};
use crate::rpc::{RpcArg, RpcTable, encode_args};
use crate::simulation::World;
use crate::timer::IntervalTimer;
use crate::transport::{NetEvent, PeerId, SERVER_PEER, Transport};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Client bootstrap state. The server is always [`SyncState::Synced`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    AwaitingFullSync,
    Synced,
}

/// Counters for traffic that was sent, dropped or deferred.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    pub updates_sent: u64,
    pub full_syncs_sent: u64,
    pub resyncs_requested: u64,
    /// `ServerAdd` received before the snapshot or for an unknown owner.
    pub adds_dropped: u64,
    /// `ServerUpdate` dropped because an id did not resolve.
    pub updates_deferred: u64,
    pub malformed_dropped: u64,
    pub rpc_dropped: u64,
}

/// How [`Replication::add_server_object`] prepares a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AddOptions {
    /// Position applied before the node is announced.
    pub position: Option<PositionOverride>,
    /// When `false` the node is tagged not-persistent and left out of saves.
    pub persistent: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            position: None,
            persistent: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Replication
// ---------------------------------------------------------------------------

pub struct Replication {
    transport: Box<dyn Transport>,
    inbox: Receiver<NetEvent>,
    authoritative: bool,
    state: SyncState,
    peers: Vec<PeerId>,
    max_connections: usize,
    min_peers: usize,
    update_timer: IntervalTimer,
    input_timer: IntervalTimer,
    /// Replicable nodes included in server updates.
    tracked: Vec<NodeKey>,
    rpc: RpcTable,
    input: Option<(UniqueId, InputState)>,
    input_pending: bool,
    /// Client inputs by owner id, with the peer that sends them.
    remote_inputs: FxHashMap<UniqueId, (PeerId, InputState)>,
    stats: ReplicationStats,
}

impl Replication {
    /// Server side.
    pub fn server(
        config: &NetworkConfig,
        transport: Box<dyn Transport>,
        inbox: Receiver<NetEvent>,
    ) -> Self {
        Self::new(config, transport, inbox, true)
    }

    /// Client side, starting in [`SyncState::AwaitingFullSync`].
    pub fn client(
        config: &NetworkConfig,
        transport: Box<dyn Transport>,
        inbox: Receiver<NetEvent>,
    ) -> Self {
        Self::new(config, transport, inbox, false)
    }

    fn new(
        config: &NetworkConfig,
        transport: Box<dyn Transport>,
        inbox: Receiver<NetEvent>,
        authoritative: bool,
    ) -> Self {
        Self {
            transport,
            inbox,
            authoritative,
            state: if authoritative {
                SyncState::Synced
            } else {
                SyncState::AwaitingFullSync
            },
            peers: Vec::new(),
            max_connections: config.max_connections,
            min_peers: config.min_peers_for_update,
            update_timer: IntervalTimer::new(config.update_interval()),
            input_timer: IntervalTimer::new(config.input_interval()),
            tracked: Vec::new(),
            rpc: RpcTable::new(),
            input: None,
            input_pending: false,
            remote_inputs: FxHashMap::default(),
            stats: ReplicationStats::default(),
        }
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    pub fn sync_state(&self) -> SyncState {
        self.state
    }

    pub fn stats(&self) -> ReplicationStats {
        self.stats
    }

    /// Connected peers. On a client this is just the server once connected.
    pub fn peers(&self) -> &[PeerId] {
        &self.peers
    }

    /// Processes connected and participating in updates. The server counts
    /// itself.
    pub fn participants(&self) -> usize {
        if self.authoritative {
            self.peers.len() + 1
        } else {
            self.peers.len()
        }
    }

    pub fn rpc_table_mut(&mut self) -> &mut RpcTable {
        &mut self.rpc
    }

    /// Nodes currently included in server updates.
    pub fn tracked(&self) -> &[NodeKey] {
        &self.tracked
    }

    // --- Tick ---

    /// Time-driven work: server updates and remote input settling, or client
    /// input pushes.
    pub fn tick(&mut self, world: &mut World, dt: Duration) {
        if self.authoritative {
            if self.participants() >= self.min_peers && self.update_timer.tick(dt) {
                self.send_update(world, false);
            }
            for (_, input) in self.remote_inputs.values_mut() {
                input.advance();
            }
        } else if self.input_timer.tick(dt) {
            self.push_input();
        }
    }

    /// Serializes every tracked node that changed, or every tracked node when
    /// `force` is set, and sends the result to all peers. Nothing is sent
    /// when no node produced a delta.
    fn send_update(&mut self, world: &mut World, force: bool) {
        let nodes = self.collect_deltas(&mut world.tree, force);
        if nodes.is_empty() {
            return;
        }
        let bytes = Message::ServerUpdate { nodes }.encode();
        for &peer in &self.peers {
            if force {
                self.transport.send_reliable(peer, &bytes);
            } else {
                self.transport.send_unreliable(peer, &bytes);
            }
        }
        self.stats.updates_sent += 1;
    }

    fn collect_deltas(&mut self, tree: &mut SceneTree, force: bool) -> Vec<(UniqueId, Value)> {
        self.tracked.retain(|&k| tree.contains(k));
        let mut nodes = Vec::new();
        for &key in &self.tracked {
            let Some((state, Some(behavior))) = tree.parts_mut(key) else {
                continue;
            };
            let (Some(id), Some(replicable)) = (state.unique_id, behavior.replicable_mut()) else {
                continue;
            };
            if let Some(delta) = replicable.serialize_delta(state, force) {
                nodes.push((id, delta));
            }
        }
        nodes
    }

    /// Starts including the replicable nodes of the subtree at `root` in
    /// updates. Self-only subtrees are skipped.
    pub fn track(&mut self, tree: &SceneTree, root: NodeKey) {
        let mut stack = vec![root];
        while let Some(key) = stack.pop() {
            let Some(node) = tree.get(key) else {
                continue;
            };
            if node.state.in_group(groups::SELF_ONLY) {
                continue;
            }
            let replicable = node.behavior().is_some_and(|b| b.replicable().is_some());
            if replicable && !self.tracked.contains(&key) {
                self.tracked.push(key);
            }
            stack.extend(node.children().iter().rev().copied());
        }
    }

    fn untrack(&mut self, tree: &SceneTree, root: NodeKey) {
        let gone = tree.descendants(root);
        self.tracked.retain(|k| !gone.contains(k));
    }

    // --- Input ---

    /// Sets the local input tracked by this client and the object id it is
    /// reported for.
    pub fn set_input(&mut self, owner: UniqueId, input: InputState) {
        self.input = Some((owner, input));
        self.input_pending = true;
    }

    pub fn input(&self) -> Option<&InputState> {
        self.input.as_ref().map(|(_, input)| input)
    }

    /// Feeds a device sample into the local input. Changes are pushed on the
    /// next input interval.
    pub fn update_input(&mut self, sample: &InputSample) {
        if let Some((_, input)) = &mut self.input
            && input.update(sample)
        {
            self.input_pending = true;
        }
    }

    /// Server view of a client's input.
    pub fn remote_input(&self, owner: UniqueId) -> Option<&InputState> {
        self.remote_inputs.get(&owner).map(|(_, input)| input)
    }

    fn push_input(&mut self) {
        if self.state != SyncState::Synced || !self.input_pending {
            return;
        }
        let Some((owner, input)) = &self.input else {
            return;
        };
        let msg = Message::ClientInputUpdate {
            owner: *owner,
            input: input.to_payload(),
        };
        self.transport.send_reliable(SERVER_PEER, &msg.encode());
        self.input_pending = false;
    }

    // --- Inbound ---

    /// Drains the inbox and handles every queued event.
    pub fn poll(&mut self, world: &mut World) {
        let events: Vec<NetEvent> = self.inbox.try_iter().collect();
        for event in events {
            match event {
                NetEvent::Connected(peer) => self.on_connected(world, peer),
                NetEvent::Disconnected(peer) => self.on_disconnected(peer),
                NetEvent::Data(peer, bytes) => match Message::decode(&bytes) {
                    Ok(msg) => self.handle(world, peer, msg),
                    Err(err) => {
                        warn!(peer, %err, "dropping malformed message");
                        self.stats.malformed_dropped += 1;
                    }
                },
            }
            self.flush_resync(world);
        }
        if !self.authoritative {
            world.ecs.reconcile(&mut world.tree, &mut world.ids);
            self.flush_resync(world);
        }
    }

    fn flush_resync(&mut self, world: &mut World) {
        if !self.authoritative && world.ids.take_resync_request() {
            self.request_force_update();
        }
    }

    /// Asks the server for an unconditional update of every object.
    pub fn request_force_update(&mut self) {
        if self.authoritative {
            return;
        }
        self.transport
            .send_reliable(SERVER_PEER, &Message::RequestForceUpdate.encode());
        self.stats.resyncs_requested += 1;
    }

    fn on_connected(&mut self, world: &mut World, peer: PeerId) {
        if !self.authoritative {
            info!(peer, "connected to server");
            self.peers.push(peer);
            return;
        }
        if self.peers.len() >= self.max_connections {
            warn!(peer, max = self.max_connections, "server full, ignoring peer");
            return;
        }
        info!(peer, "peer connected");
        self.peers.push(peer);
        self.send_full_sync(world, peer);
    }

    fn on_disconnected(&mut self, peer: PeerId) {
        self.peers.retain(|&p| p != peer);
        info!(peer, "peer disconnected");
        if self.authoritative {
            self.remote_inputs.retain(|_, (sender, _)| *sender != peer);
        } else {
            self.state = SyncState::AwaitingFullSync;
        }
    }

    fn handle(&mut self, world: &mut World, peer: PeerId, msg: Message) {
        match (self.authoritative, msg) {
            (true, Message::RequestForceUpdate) => {
                debug!(peer, "forced update requested");
                self.send_update(world, true);
            }
            (true, Message::ClientInputUpdate { owner, input }) => {
                let (sender, state) = self.remote_inputs.entry(owner).or_default();
                *sender = peer;
                state.apply_remote(&input);
            }
            (false, Message::FullServerData {
                nodes,
                network_nodes,
            }) => self.apply_full_sync(world, nodes, network_nodes),
            (false, Message::ServerAdd { owner, node }) => self.apply_add(world, owner, &node),
            (false, Message::ServerRemove { id }) => self.apply_remove(world, id),
            (false, Message::ServerUpdate { nodes }) => self.apply_update(world, nodes),
            (_, Message::RpcCall {
                caller,
                method,
                params,
            }) => self.dispatch_rpc(world, caller, &method, &params, Some(peer)),
            (_, msg) => debug!(peer, data_type = ?msg.data_type(), "ignoring message for the other side"),
        }
    }

    // --- Server: snapshots ---

    fn send_full_sync(&mut self, world: &World, peer: PeerId) {
        let mut nodes = Vec::new();
        let mut network_nodes = Vec::new();
        for container in [world.ecs.node(), world.scene()] {
            let Some(owner) = world.tree.state(container).and_then(|s| s.unique_id) else {
                continue;
            };
            for &child in world.tree.children(container) {
                let node = codec::encode(&world.tree, child, EncodeMode::Network);
                if !node.is_absent() {
                    nodes.push(OwnedNode { owner, node });
                }
            }
            if let Some(node) = world.tree.get(container)
                && let Some(replicable) = node.behavior().and_then(|b| b.replicable())
            {
                network_nodes.push((owner, replicable.write_state(&node.state)));
            }
        }
        debug!(peer, objects = nodes.len(), "sending full snapshot");
        let msg = Message::FullServerData {
            nodes,
            network_nodes,
        };
        self.transport.send_reliable(peer, &msg.encode());
        self.stats.full_syncs_sent += 1;
    }

    // --- Client: applying server messages ---

    fn live(world: &World, id: UniqueId) -> Option<NodeKey> {
        world.ids.get(id).filter(|&k| world.tree.contains(k))
    }

    /// Decodes `node` under the object `owner`. Returns the number of ids
    /// registered, or `None` when nothing was added.
    fn attach_remote(world: &mut World, owner: NodeKey, node: &Value) -> Option<usize> {
        if let Some(id) = node[codec::META][codec::UNIQUE_ID].as_u32()
            && Self::live(world, id).is_some()
        {
            debug!(id, "object already known");
            return None;
        }
        let key = match codec::decode(&mut world.tree, &world.types, node, EncodeMode::Network) {
            Ok(key) => key,
            Err(err) => {
                warn!(%err, "could not decode replicated object");
                return None;
            }
        };
        if !world.tree.attach(owner, key) {
            world.tree.remove(key);
            return None;
        }
        Some(world.ids.register_subtree(&world.tree, key))
    }

    fn apply_full_sync(
        &mut self,
        world: &mut World,
        nodes: Vec<OwnedNode>,
        network_nodes: Vec<(UniqueId, Value)>,
    ) {
        let mut registered = 0;
        for OwnedNode { owner, node } in nodes {
            match Self::live(world, owner) {
                Some(owner_key) => {
                    registered += Self::attach_remote(world, owner_key, &node).unwrap_or(0);
                }
                None => debug!(owner, "snapshot object has an unknown owner"),
            }
        }
        for (id, delta) in network_nodes {
            if let Some(key) = Self::live(world, id) {
                apply_delta(&mut world.tree, key, &delta);
            }
        }
        if self.state == SyncState::AwaitingFullSync {
            info!(objects = registered, "full snapshot applied, client synced");
        }
        self.state = SyncState::Synced;
        world.ecs.reconcile(&mut world.tree, &mut world.ids);
    }

    fn apply_add(&mut self, world: &mut World, owner: UniqueId, node: &Value) {
        if self.state == SyncState::AwaitingFullSync {
            debug!(owner, "add before full snapshot dropped");
            self.stats.adds_dropped += 1;
            return;
        }
        let Some(owner_key) = Self::live(world, owner) else {
            debug!(owner, "add for unknown owner dropped");
            self.stats.adds_dropped += 1;
            return;
        };
        Self::attach_remote(world, owner_key, node);
    }

    fn apply_remove(&mut self, world: &mut World, id: UniqueId) {
        let Some(key) = Self::live(world, id) else {
            debug!(id, "remove for unknown object ignored");
            return;
        };
        remove_subtree(world, key);
    }

    fn apply_update(&mut self, world: &mut World, nodes: Vec<(UniqueId, Value)>) {
        if self.state == SyncState::AwaitingFullSync {
            debug!("update before full snapshot dropped");
            self.stats.updates_deferred += 1;
            return;
        }
        let mut resolved = Vec::with_capacity(nodes.len());
        for (id, delta) in nodes {
            let root = world.tree.root();
            let key = match Self::live(world, id) {
                Some(key) => Some(key),
                None => match world.ids.search(&world.tree, root, id) {
                    Some(key) => Some(key),
                    None => world.ids.resolve(&world.tree, id),
                },
            };
            match key {
                Some(key) => resolved.push((key, delta)),
                None => {
                    debug!(id, "update names an unknown object, deferring");
                    self.stats.updates_deferred += 1;
                    return;
                }
            }
        }
        for (key, delta) in resolved {
            apply_delta(&mut world.tree, key, &delta);
        }
    }

    // --- Server: authoritative tree edits ---

    /// Tags `node` (detached) and its subtree with shared ids, attaches it
    /// under `owner`, and announces it to every peer.
    ///
    /// # Panics
    ///
    /// On a client, when `owner` has no id, or when `node` cannot be
    /// attached.
    pub fn add_server_object(
        &mut self,
        world: &mut World,
        owner: NodeKey,
        node: NodeKey,
        options: AddOptions,
    ) -> Result<UniqueId, IdentityError> {
        if !self.authoritative {
            panic!("add_server_object called on a client");
        }
        let Some(owner_id) = world.tree.state(owner).and_then(|s| s.unique_id) else {
            panic!("add_server_object: owner {} has no id", world.tree.path(owner));
        };
        if let Some(state) = world.tree.state_mut(node) {
            if let Some(position) = options.position {
                state.spatial.apply_position(position);
            }
            if !options.persistent {
                state.add_group(groups::NOT_PERSISTENT);
            }
        }
        world.ids.allocate_and_tag(&mut world.tree, node)?;
        if !world.tree.attach(owner, node) {
            panic!("add_server_object: node cannot be attached under {}", world.tree.path(owner));
        }
        if owner == world.ecs.node() {
            world.ecs.add_entity(&mut world.tree, node);
        }
        self.track(&world.tree, node);

        let encoded = codec::encode(&world.tree, node, EncodeMode::Network);
        if !encoded.is_absent() {
            let msg = Message::ServerAdd {
                owner: owner_id,
                node: encoded,
            };
            self.transport.broadcast(&msg.encode());
        }
        let id = world.tree.state(node).and_then(|s| s.unique_id);
        id.ok_or(IdentityError::MissingNode)
    }

    /// Removes `node` and its subtree and announces the removal. Returns
    /// `false` if the node has no id.
    ///
    /// # Panics
    ///
    /// On a client.
    pub fn remove_server_object(&mut self, world: &mut World, node: NodeKey) -> bool {
        if !self.authoritative {
            panic!("remove_server_object called on a client");
        }
        let Some(id) = world.tree.state(node).and_then(|s| s.unique_id) else {
            debug!("remove of an untagged node ignored");
            return false;
        };
        self.untrack(&world.tree, node);
        remove_subtree(world, node);
        self.transport
            .broadcast(&Message::ServerRemove { id }.encode());
        true
    }

    /// Tags `node` from the self-only range and attaches it under `owner`.
    /// Nothing is sent.
    pub fn add_self_object(
        &mut self,
        world: &mut World,
        owner: NodeKey,
        node: NodeKey,
    ) -> Result<UniqueId, IdentityError> {
        world.ids.allocate_self_only(&mut world.tree, node)?;
        if !world.tree.attach(owner, node) {
            world.ids.evict_subtree(&world.tree, node);
            return Err(IdentityError::MissingNode);
        }
        let id = world.tree.state(node).and_then(|s| s.unique_id);
        id.ok_or(IdentityError::MissingNode)
    }

    /// Removes a self-only subtree. Nothing is sent.
    pub fn remove_self_object(&mut self, world: &mut World, node: NodeKey) {
        remove_subtree(world, node);
    }

    // --- RPC ---

    fn caller_id(world: &World, caller: NodeKey) -> Result<UniqueId, RpcError> {
        world
            .tree
            .state(caller)
            .and_then(|s| s.unique_id)
            .ok_or(RpcError::NoId)
    }

    fn rpc_call(world: &World, caller: NodeKey, method: &str, args: &[RpcArg]) -> Result<Message, RpcError> {
        Ok(Message::RpcCall {
            caller: Self::caller_id(world, caller)?,
            method: method.to_owned(),
            params: encode_args(args),
        })
    }

    /// Runs `method` on the server's copy of `caller`: locally on the
    /// server, over the network from a client.
    pub fn rpc_server(
        &mut self,
        world: &mut World,
        caller: NodeKey,
        method: &str,
        args: &[RpcArg],
    ) -> Result<(), RpcError> {
        if !self.authoritative {
            let msg = Self::rpc_call(world, caller, method, args)?;
            self.transport.send_reliable(SERVER_PEER, &msg.encode());
            return Ok(());
        }
        let id = Self::caller_id(world, caller)?;
        self.dispatch_rpc(world, id, method, &encode_args(args), None);
        Ok(())
    }

    /// Runs `method` on every client's copy of `caller`.
    ///
    /// # Panics
    ///
    /// On a client.
    pub fn rpc_clients(
        &mut self,
        world: &World,
        caller: NodeKey,
        method: &str,
        args: &[RpcArg],
    ) -> Result<(), RpcError> {
        if !self.authoritative {
            panic!("rpc_clients called on a client");
        }
        let msg = Self::rpc_call(world, caller, method, args)?;
        self.transport.broadcast(&msg.encode());
        Ok(())
    }

    /// Runs `method` on one client's copy of `caller`.
    ///
    /// # Panics
    ///
    /// On a client.
    pub fn rpc_client(
        &mut self,
        world: &World,
        peer: PeerId,
        caller: NodeKey,
        method: &str,
        args: &[RpcArg],
    ) -> Result<(), RpcError> {
        if !self.authoritative {
            panic!("rpc_client called on a client");
        }
        let msg = Self::rpc_call(world, caller, method, args)?;
        self.transport.send_reliable(peer, &msg.encode());
        Ok(())
    }

    fn dispatch_rpc(
        &mut self,
        world: &mut World,
        caller: UniqueId,
        method: &str,
        params: &[Value],
        sender: Option<PeerId>,
    ) {
        if let Err(err) = self.rpc.dispatch(world, caller, method, params, sender) {
            debug!(%err, "rpc dropped");
            self.stats.rpc_dropped += 1;
        }
    }
}

fn apply_delta(tree: &mut SceneTree, key: NodeKey, delta: &Value) {
    let Some((state, Some(behavior))) = tree.parts_mut(key) else {
        return;
    };
    if let Some(replicable) = behavior.replicable_mut() {
        replicable.apply_delta(state, delta);
    }
}

/// Evicts, untracks from the ECS, and frees a subtree.
fn remove_subtree(world: &mut World, root: NodeKey) {
    world.ids.evict_subtree(&world.tree, root);
    for key in world.tree.descendants(root) {
        if world.ecs.contains(key) {
            world.ecs.remove_entity(&mut world.tree, key);
        }
    }
    world.tree.remove(root);
}
