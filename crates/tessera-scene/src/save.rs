//! Save files: one document per saved subtree, grouped by save name and
//! category.
//!
//! Paths look like `<save>/<Category>/<name>.json`. A top-level `hash` field,
//! the uppercase hex SHA-256 of the document serialized without it, is added
//! on write. It detects corruption only; there is no key.

use std::io;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use tessera_value::Value;
use tracing::{debug, warn};

use crate::codec::{self, EncodeMode};
use crate::error::SaveError;
use crate::tree::{NodeKey, SceneTree};
use crate::types::TypeRegistry;

/// Field holding the content hash.
pub const HASH_FIELD: &str = "hash";

// ---------------------------------------------------------------------------
// File stores
// ---------------------------------------------------------------------------

/// Text storage addressed by relative paths.
pub trait FileStore {
    fn load(&self, path: &Path) -> io::Result<String>;

    fn save(&mut self, path: &Path, text: &str) -> io::Result<()>;

    /// Returns `true` if `path` names a file or a directory holding files.
    fn exists(&self, path: &Path) -> bool;
}

/// [`FileStore`] rooted at a directory on disk.
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileStore for DiskStore {
    fn load(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(self.root.join(path))
    }

    fn save(&mut self, path: &Path, text: &str) -> io::Result<()> {
        let full = self.root.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(full, text)
    }

    fn exists(&self, path: &Path) -> bool {
        self.root.join(path).exists()
    }
}

/// In-memory [`FileStore`] for tests and tools.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: FxHashMap<PathBuf, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FileStore for MemoryStore {
    fn load(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn save(&mut self, path: &Path, text: &str) -> io::Result<()> {
        self.files.insert(path.to_path_buf(), text.to_owned());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.keys().any(|p| p.starts_with(path))
    }
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Uppercase hex SHA-256 of `value` serialized without its hash field.
pub fn content_hash(value: &Value) -> String {
    let mut stripped = value.clone();
    stripped.remove(HASH_FIELD);
    let mut hasher = Sha256::new();
    hasher.update(stripped.serialize().as_bytes());
    hex::encode_upper(hasher.finalize())
}

/// Replaces the hash field of `value` with a fresh content hash. A `Null`
/// value becomes an object holding only the hash; any other non-object is
/// replaced, so callers check the shape first.
pub fn add_hash(value: &mut Value) {
    let hash = content_hash(value);
    value.insert_key(HASH_FIELD, hash);
}

/// Returns `true` if `value` carries a hash field matching its content.
pub fn hash_matches(value: &Value) -> bool {
    match value[HASH_FIELD].as_str() {
        Some(stored) => stored == content_hash(value),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// SaveStore
// ---------------------------------------------------------------------------

/// Subdirectory a document is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveCategory {
    Level,
    Player,
    Ecs,
}

impl SaveCategory {
    pub fn dir_name(self) -> &'static str {
        match self {
            SaveCategory::Level => "Level",
            SaveCategory::Player => "Player",
            SaveCategory::Ecs => "ECS",
        }
    }
}

/// Reads and writes documents for the current save.
pub struct SaveStore {
    store: Box<dyn FileStore>,
    save_name: String,
    pretty: bool,
    verify_hash: bool,
}

impl SaveStore {
    pub fn new(store: Box<dyn FileStore>, save_name: impl Into<String>) -> Self {
        Self {
            store,
            save_name: save_name.into(),
            pretty: true,
            verify_hash: false,
        }
    }

    /// Writes indented documents when `true`.
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Rejects documents whose hash does not match on load when `true`.
    pub fn with_verify_hash(mut self, verify: bool) -> Self {
        self.verify_hash = verify;
        self
    }

    pub fn save_name(&self) -> &str {
        &self.save_name
    }

    /// Switches to a new, possibly empty, save.
    pub fn create_save(&mut self, name: impl Into<String>) {
        self.save_name = name.into();
        debug!(save = %self.save_name, "created save");
    }

    /// Switches to an existing save.
    pub fn load_save(&mut self, name: &str) -> Result<(), SaveError> {
        if !self.store.exists(Path::new(name)) {
            return Err(SaveError::MissingSave(name.to_owned()));
        }
        self.save_name = name.to_owned();
        debug!(save = %self.save_name, "loaded save");
        Ok(())
    }

    /// Relative path of document `name` in `category`.
    pub fn path_for(&self, name: &str, category: SaveCategory) -> PathBuf {
        Path::new(&self.save_name)
            .join(category.dir_name())
            .join(format!("{name}.json"))
    }

    /// Writes `value` with a fresh hash.
    pub fn save_data(
        &mut self,
        name: &str,
        value: &Value,
        category: SaveCategory,
    ) -> Result<(), SaveError> {
        let path = self.path_for(name, category);
        if !value.is_object() && !value.is_null() {
            return Err(SaveError::NotAnObject(path));
        }
        let mut doc = value.clone();
        add_hash(&mut doc);
        let text = if self.pretty {
            doc.serialize_pretty()
        } else {
            doc.serialize()
        };
        self.store
            .save(&path, &text)
            .map_err(|source| SaveError::Io { path, source })
    }

    /// Reads a document and strips its hash field.
    pub fn load_data(&self, name: &str, category: SaveCategory) -> Result<Value, SaveError> {
        let path = self.path_for(name, category);
        let text = self.store.load(&path).map_err(|source| SaveError::Io {
            path: path.clone(),
            source,
        })?;
        let mut doc = Value::parse(&text).map_err(|source| SaveError::Parse {
            path: path.clone(),
            source,
        })?;
        if !hash_matches(&doc) {
            if self.verify_hash {
                return Err(SaveError::HashMismatch(path));
            }
            warn!(path = %path.display(), "save hash mismatch");
        }
        doc.remove(HASH_FIELD);
        Ok(doc)
    }

    /// Encodes the subtree at `key` in save mode under the node's name.
    pub fn save_object(
        &mut self,
        tree: &SceneTree,
        key: NodeKey,
        category: SaveCategory,
    ) -> Result<(), SaveError> {
        let name = tree
            .state(key)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        let doc = codec::encode(tree, key, EncodeMode::Save);
        if doc.is_absent() {
            return Err(SaveError::NotPersistent(name));
        }
        self.save_data(&name, &doc, category)
    }

    /// Decodes a saved subtree into `tree`, detached.
    pub fn load_object(
        &self,
        tree: &mut SceneTree,
        types: &TypeRegistry,
        name: &str,
        category: SaveCategory,
    ) -> Result<NodeKey, SaveError> {
        let doc = self.load_data(name, category)?;
        Ok(codec::decode(tree, types, &doc, EncodeMode::Save)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::testing::Counter;
    use crate::groups;
    use crate::spatial::SpatialKind;
    use crate::tree::NodeState;

    fn memory_saves() -> SaveStore {
        SaveStore::new(Box::new(MemoryStore::new()), "Static")
    }

    #[test]
    fn test_hash_detects_changes() {
        let mut doc: Value = r#"{"a":1,"b":"x"}"#.parse().unwrap();
        add_hash(&mut doc);
        assert!(hash_matches(&doc));
        assert_eq!(doc[HASH_FIELD].as_str().unwrap().len(), 64);

        doc["a"].set(2);
        assert!(!hash_matches(&doc));

        let unhashed: Value = r#"{"a":1}"#.parse().unwrap();
        assert!(!hash_matches(&unhashed));
    }

    #[test]
    fn test_rehash_replaces_old_hash() {
        let mut doc: Value = r#"{"a":1}"#.parse().unwrap();
        add_hash(&mut doc);
        let first = doc[HASH_FIELD].as_str().unwrap().to_owned();
        add_hash(&mut doc);
        assert_eq!(doc[HASH_FIELD].as_str(), Some(first.as_str()));
    }

    #[test]
    fn test_save_and_load_data() {
        let mut saves = memory_saves();
        let doc: Value = r#"{"Score":12}"#.parse().unwrap();
        saves.save_data("stats", &doc, SaveCategory::Player).unwrap();

        assert_eq!(
            saves.path_for("stats", SaveCategory::Player),
            PathBuf::from("Static/Player/stats.json")
        );
        let loaded = saves.load_data("stats", SaveCategory::Player).unwrap();
        assert_eq!(loaded, doc);
        assert!(matches!(
            saves.load_data("stats", SaveCategory::Level),
            Err(SaveError::Io { .. })
        ));
    }

    #[test]
    fn test_non_object_document_is_refused() {
        let mut saves = memory_saves();
        let list: Value = "[1,2,3]".parse().unwrap();
        assert!(matches!(
            saves.save_data("list", &list, SaveCategory::Level),
            Err(SaveError::NotAnObject(path)) if path == Path::new("Static/Level/list.json")
        ));
        assert!(matches!(
            saves.save_data("word", &Value::from("text"), SaveCategory::Level),
            Err(SaveError::NotAnObject(_))
        ));
        assert!(saves.load_data("list", SaveCategory::Level).is_err());

        saves.save_data("empty", &Value::Null, SaveCategory::Level).unwrap();
        assert!(saves.load_data("empty", SaveCategory::Level).is_ok());
    }

    #[test]
    fn test_tampered_file_is_rejected_when_verifying() {
        let mut store = MemoryStore::new();
        store
            .save(
                Path::new("Static/Level/map.json"),
                r#"{"a":1,"hash":"00"}"#,
            )
            .unwrap();
        let lenient = SaveStore::new(Box::new(store), "Static");
        assert!(lenient.load_data("map", SaveCategory::Level).is_ok());

        let mut store = MemoryStore::new();
        store
            .save(
                Path::new("Static/Level/map.json"),
                r#"{"a":1,"hash":"00"}"#,
            )
            .unwrap();
        let strict = SaveStore::new(Box::new(store), "Static").with_verify_hash(true);
        assert!(matches!(
            strict.load_data("map", SaveCategory::Level),
            Err(SaveError::HashMismatch(_))
        ));
    }

    #[test]
    fn test_object_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut saves = SaveStore::new(Box::new(DiskStore::new(dir.path())), "Slot1")
            .with_verify_hash(true);

        let mut types = TypeRegistry::new();
        types
            .register_behavior("Counter", "Node2D", || Box::new(Counter::default()))
            .unwrap();
        let mut tree = SceneTree::new();
        let counter = Counter {
            value: 4,
            dirty: false,
            saved_note: "kept".into(),
        };
        let key = tree.create_with(
            NodeState::new("Chest", "Node2D", SpatialKind::Planar),
            Some(Box::new(counter)),
        );

        saves.save_object(&tree, key, SaveCategory::Level).unwrap();
        assert!(dir.path().join("Slot1/Level/Chest.json").exists());

        let mut fresh = SceneTree::new();
        let loaded = saves
            .load_object(&mut fresh, &types, "Chest", SaveCategory::Level)
            .unwrap();
        let chest = fresh.behavior_as::<Counter>(loaded).unwrap();
        assert_eq!(chest.value, 4);
        assert_eq!(chest.saved_note, "kept");
    }

    #[test]
    fn test_not_persistent_object_is_refused() {
        let mut saves = memory_saves();
        let mut tree = SceneTree::new();
        let mut state = NodeState::new("Temp", "Node", SpatialKind::Plain);
        state.add_group(groups::NOT_PERSISTENT);
        let key = tree.create(state);
        assert!(matches!(
            saves.save_object(&tree, key, SaveCategory::Level),
            Err(SaveError::NotPersistent(_))
        ));
    }

    #[test]
    fn test_load_save_requires_existing_save() {
        let mut saves = memory_saves();
        let doc: Value = r#"{"E":{}}"#.parse().unwrap();
        saves.save_data("ECS", &doc, SaveCategory::Ecs).unwrap();

        saves.create_save("Other");
        assert_eq!(saves.save_name(), "Other");
        saves.load_save("Static").unwrap();
        assert_eq!(saves.save_name(), "Static");
        assert!(matches!(
            saves.load_save("Missing"),
            Err(SaveError::MissingSave(_))
        ));
    }
}
