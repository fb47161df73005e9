//! Error types for the wire protocol and RPC registration.

use tessera_scene::UniqueId;
use tessera_value::ParseError;
use thiserror::Error;

/// A message that could not be turned into a [`Message`](crate::Message).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The bytes were not UTF-8.
    #[error("message is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("malformed message text: {0}")]
    Malformed(#[from] ParseError),

    #[error("message has no DataType")]
    MissingDataType,

    #[error("unknown DataType {0}")]
    UnknownDataType(i64),

    /// A required field is absent or has the wrong shape.
    #[error("message is missing field {0:?}")]
    MissingField(&'static str),

    #[error("invalid object id {0:?}")]
    InvalidId(String),
}

/// RPC registration and invocation failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    #[error("rpc method name is empty")]
    EmptyName,

    /// The target type is not known to the type registry.
    #[error("rpc target type {0:?} is not registered")]
    UnknownType(String),

    #[error("method {method:?} is already registered on {type_name:?}")]
    DuplicateMethod { type_name: String, method: String },

    /// The calling node has never been given an id, so peers cannot find it.
    #[error("rpc caller has no unique id")]
    NoId,

    #[error("argument {index} is malformed")]
    BadArgument { index: usize },

    #[error("{method:?} expects {expected} arguments, got {found}")]
    Arity {
        method: String,
        expected: usize,
        found: usize,
    },

    #[error("argument {index} of {method:?} has the wrong type")]
    ArgumentType { method: String, index: usize },

    #[error("no rpc target with id {0}")]
    UnknownTarget(UniqueId),

    #[error("{type_name:?} has no rpc method {method:?}")]
    UnknownMethod { type_name: String, method: String },
}
