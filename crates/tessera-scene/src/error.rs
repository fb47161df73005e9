//! Error types for identity allocation, encoding, and save files.

use std::path::PathBuf;

use tessera_value::ParseError;

/// Errors from the identity registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// The shared id range ran into the self-only range.
    #[error("shared id range exhausted")]
    SharedExhausted,

    /// The self-only range reached `u32::MAX`.
    #[error("self-only id range exhausted")]
    SelfOnlyExhausted,

    /// The subtree root key is stale.
    #[error("node does not exist")]
    MissingNode,
}

/// Errors while registering types or decoding a node document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// `DerivedType` names no registered base type.
    #[error("unknown base type {0:?}")]
    UnknownBaseType(String),

    /// `Type` names no registered behavior.
    #[error("unknown behavior type {0:?}")]
    UnknownBehavior(String),

    /// The behavior was registered on a different base than the document says.
    #[error("behavior {behavior:?} refines {expected:?}, document says {found:?}")]
    BaseMismatch {
        behavior: String,
        expected: String,
        found: String,
    },

    /// A type name was registered twice.
    #[error("type {0:?} is already registered")]
    DuplicateType(String),

    /// The document is not an object or lacks a type.
    #[error("node document is missing {0:?}")]
    MissingField(&'static str),
}

/// Errors from the save store.
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    /// The file store failed to read or write.
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A save file did not parse.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    /// The stored hash does not match the content.
    #[error("hash mismatch in {0}")]
    HashMismatch(PathBuf),

    /// No save with that name exists.
    #[error("save {0:?} does not exist")]
    MissingSave(String),

    /// The node is excluded from save encoding.
    #[error("node {0:?} is not persistent")]
    NotPersistent(String),

    /// Save documents must be objects.
    #[error("{0} is not an object document")]
    NotAnObject(PathBuf),

    /// Two saved objects would share one document name.
    #[error("more than one object would be saved as {0:?}")]
    DuplicateName(String),

    /// The saved document could not be turned back into nodes.
    #[error(transparent)]
    Codec(#[from] CodecError),
}
