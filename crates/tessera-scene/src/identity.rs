//! Stable cross-process ids for replicated nodes.
//!
//! Two disjoint ranges are handed out without coordination:
//! - shared ids ascend from `0` and are allocated by the authority only;
//! - self-only ids ascend from [`SELF_ONLY_START`] and never leave the peer
//!   that allocated them.
//!
//! Ids are never reused within a session.

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::IdentityError;
use crate::groups;
use crate::tree::{NodeKey, SceneTree};

/// Stable node id.
pub type UniqueId = u32;

/// First id of the self-only range.
pub const SELF_ONLY_START: UniqueId = u32::MAX - 10_000_000;

/// Bidirectional id ↔ node map for one process.
pub struct IdentityRegistry {
    authoritative: bool,
    next_id: UniqueId,
    next_self_id: UniqueId,
    objects: FxHashMap<UniqueId, NodeKey>,
    resync_requested: bool,
}

impl IdentityRegistry {
    /// Creates a registry. `authoritative` is `true` on the server.
    pub fn new(authoritative: bool) -> Self {
        Self {
            authoritative,
            next_id: 0,
            next_self_id: SELF_ONLY_START,
            objects: FxHashMap::default(),
            resync_requested: false,
        }
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    /// Next shared id that will be handed out.
    pub fn next_id(&self) -> UniqueId {
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, id: UniqueId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<UniqueId> {
        let mut ids: Vec<UniqueId> = self.objects.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn take_shared(&mut self) -> Result<UniqueId, IdentityError> {
        if self.next_id >= SELF_ONLY_START {
            return Err(IdentityError::SharedExhausted);
        }
        let id = self.next_id;
        self.next_id += 1;
        Ok(id)
    }

    fn take_self_only(&mut self) -> Result<UniqueId, IdentityError> {
        if self.next_self_id == u32::MAX {
            return Err(IdentityError::SelfOnlyExhausted);
        }
        let id = self.next_self_id;
        self.next_self_id += 1;
        Ok(id)
    }

    /// Tags every untagged node in the subtree with a shared id, parents
    /// first, and registers the whole subtree. Returns the number of ids
    /// handed out.
    pub fn allocate_and_tag(
        &mut self,
        tree: &mut SceneTree,
        root: NodeKey,
    ) -> Result<usize, IdentityError> {
        self.tag_subtree(tree, root, false)
    }

    /// Like [`allocate_and_tag`](Self::allocate_and_tag) but from the
    /// self-only range, and marks `root` as [`groups::SELF_ONLY`].
    pub fn allocate_self_only(
        &mut self,
        tree: &mut SceneTree,
        root: NodeKey,
    ) -> Result<usize, IdentityError> {
        let state = tree.state_mut(root).ok_or(IdentityError::MissingNode)?;
        state.add_group(groups::SELF_ONLY);
        self.tag_subtree(tree, root, true)
    }

    fn tag_subtree(
        &mut self,
        tree: &mut SceneTree,
        root: NodeKey,
        self_only: bool,
    ) -> Result<usize, IdentityError> {
        if !tree.contains(root) {
            return Err(IdentityError::MissingNode);
        }
        let mut assigned = 0;
        for key in tree.descendants(root) {
            let Some(state) = tree.state_mut(key) else {
                continue;
            };
            let id = match state.unique_id {
                Some(id) => id,
                None => {
                    let id = if self_only {
                        self.take_self_only()?
                    } else {
                        self.take_shared()?
                    };
                    state.unique_id = Some(id);
                    assigned += 1;
                    id
                }
            };
            self.objects.insert(id, key);
        }
        Ok(assigned)
    }

    /// Looks `id` up. A miss on a non-authoritative peer raises the resync
    /// flag (see [`take_resync_request`](Self::take_resync_request)).
    pub fn resolve(&mut self, tree: &SceneTree, id: UniqueId) -> Option<NodeKey> {
        match self.objects.get(&id) {
            Some(&key) if tree.contains(key) => Some(key),
            Some(_) => {
                self.objects.remove(&id);
                self.miss(id)
            }
            None => self.miss(id),
        }
    }

    fn miss(&mut self, id: UniqueId) -> Option<NodeKey> {
        if !self.authoritative {
            debug!(id, "unknown id, requesting resync");
            self.resync_requested = true;
        }
        None
    }

    /// Looks `id` up without side effects.
    pub fn get(&self, id: UniqueId) -> Option<NodeKey> {
        self.objects.get(&id).copied()
    }

    /// Records `id → key`. Keeps the shared allocator past `id`.
    pub fn register(&mut self, id: UniqueId, key: NodeKey) {
        if id < SELF_ONLY_START && id >= self.next_id {
            self.next_id = id + 1;
        }
        self.objects.insert(id, key);
    }

    /// Registers every tagged node in the subtree. Returns how many were
    /// registered.
    pub fn register_subtree(&mut self, tree: &SceneTree, root: NodeKey) -> usize {
        let mut count = 0;
        for key in tree.descendants(root) {
            if let Some(id) = tree.state(key).and_then(|s| s.unique_id) {
                self.register(id, key);
                count += 1;
            }
        }
        count
    }

    /// Searches the subtree under `from` for a node tagged `id` and registers
    /// it on a hit.
    pub fn search(&mut self, tree: &SceneTree, from: NodeKey, id: UniqueId) -> Option<NodeKey> {
        let key = tree
            .descendants(from)
            .into_iter()
            .find(|&k| tree.state(k).and_then(|s| s.unique_id) == Some(id))?;
        self.register(id, key);
        Some(key)
    }

    /// Forgets `id`.
    pub fn evict(&mut self, id: UniqueId) -> Option<NodeKey> {
        self.objects.remove(&id)
    }

    /// Forgets every tagged node in the subtree. Call before removing it from
    /// the tree.
    pub fn evict_subtree(&mut self, tree: &SceneTree, root: NodeKey) -> Vec<UniqueId> {
        let mut evicted = Vec::new();
        for key in tree.descendants(root) {
            if let Some(id) = tree.state(key).and_then(|s| s.unique_id) {
                if self.objects.get(&id) == Some(&key) {
                    self.objects.remove(&id);
                    evicted.push(id);
                }
            }
        }
        evicted
    }

    /// Returns and clears the pending resync request.
    pub fn take_resync_request(&mut self) -> bool {
        std::mem::take(&mut self.resync_requested)
    }

    pub fn resync_requested(&self) -> bool {
        self.resync_requested
    }
}
