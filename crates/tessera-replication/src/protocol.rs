//! Wire messages.
//!
//! Every message is a [`Value`] object whose `DataType` field holds the
//! [`DataType`] code, serialized as compact text. Object ids travel as
//! integers, or as strings when they key a map.

use tessera_scene::UniqueId;
use tessera_value::Value;

use crate::error::ProtocolError;

pub const DATA_TYPE: &str = "DataType";
pub const NETWORK_NODES: &str = "NetworkNodes";
pub const NODES: &str = "Nodes";
pub const OWNER: &str = "Owner";
pub const NODE: &str = "Node";
pub const UNIQUE_ID: &str = "UniqueId";
pub const CALLER: &str = "Caller";
pub const METHOD_NAME: &str = "MethodName";
pub const PARAMS: &str = "Params";
/// Owner id of a client input update.
pub const INPUT_OWNER: &str = "O";

/// Message discriminator. The numeric codes are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    RpcCall = 0,
    ClientInputUpdate = 1,
    ServerUpdate = 2,
    FullServerData = 3,
    ServerAdd = 4,
    ServerRemove = 5,
    RequestForceUpdate = 6,
}

impl DataType {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => DataType::RpcCall,
            1 => DataType::ClientInputUpdate,
            2 => DataType::ServerUpdate,
            3 => DataType::FullServerData,
            4 => DataType::ServerAdd,
            5 => DataType::ServerRemove,
            6 => DataType::RequestForceUpdate,
            _ => return None,
        })
    }
}

/// One object subtree in a full snapshot, with the id of the node it hangs
/// under.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedNode {
    pub owner: UniqueId,
    pub node: Value,
}

/// A decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Invoke `method` on the object `caller` on the receiving side.
    RpcCall {
        caller: UniqueId,
        method: String,
        params: Vec<Value>,
    },
    /// Client press-state snapshot: `A`, `M` and `MP` fields of `input`.
    ClientInputUpdate { owner: UniqueId, input: Value },
    /// Per-object deltas keyed by id.
    ServerUpdate { nodes: Vec<(UniqueId, Value)> },
    /// Bootstrap snapshot for a newly connected client.
    FullServerData {
        nodes: Vec<OwnedNode>,
        network_nodes: Vec<(UniqueId, Value)>,
    },
    ServerAdd { owner: UniqueId, node: Value },
    ServerRemove { id: UniqueId },
    RequestForceUpdate,
}

fn write_id_map(out: &mut Value, entries: &[(UniqueId, Value)]) {
    out.set(Value::object());
    for (id, data) in entries {
        out[id.to_string().as_str()] = data.clone();
    }
}

fn read_id_map(data: &Value) -> Result<Vec<(UniqueId, Value)>, ProtocolError> {
    data.entries()
        .map(|(k, v)| {
            let id = k
                .parse::<UniqueId>()
                .map_err(|_| ProtocolError::InvalidId(k.to_owned()))?;
            Ok((id, v.clone()))
        })
        .collect()
}

fn read_id(data: &Value, field: &'static str) -> Result<UniqueId, ProtocolError> {
    data[field].as_u32().ok_or(ProtocolError::MissingField(field))
}

impl Message {
    pub fn data_type(&self) -> DataType {
        match self {
            Message::RpcCall { .. } => DataType::RpcCall,
            Message::ClientInputUpdate { .. } => DataType::ClientInputUpdate,
            Message::ServerUpdate { .. } => DataType::ServerUpdate,
            Message::FullServerData { .. } => DataType::FullServerData,
            Message::ServerAdd { .. } => DataType::ServerAdd,
            Message::ServerRemove { .. } => DataType::ServerRemove,
            Message::RequestForceUpdate => DataType::RequestForceUpdate,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut out = Value::object();
        out[DATA_TYPE].set(self.data_type().code());
        match self {
            Message::RpcCall {
                caller,
                method,
                params,
            } => {
                out[CALLER].set(*caller);
                out[METHOD_NAME].set(method.as_str());
                out[PARAMS].set(Value::array());
                for param in params {
                    out[PARAMS].append(param.clone());
                }
            }
            Message::ClientInputUpdate { owner, input } => {
                out.merge(input.clone(), false);
                out[INPUT_OWNER].set(*owner);
            }
            Message::ServerUpdate { nodes } => write_id_map(&mut out[NETWORK_NODES], nodes),
            Message::FullServerData {
                nodes,
                network_nodes,
            } => {
                out[NODES].set(Value::array());
                for owned in nodes {
                    let mut entry = Value::object();
                    entry[OWNER].set(owned.owner);
                    entry[NODE] = owned.node.clone();
                    out[NODES].append(entry);
                }
                write_id_map(&mut out[NETWORK_NODES], network_nodes);
            }
            Message::ServerAdd { owner, node } => {
                out[OWNER].set(*owner);
                out[NODE] = node.clone();
            }
            Message::ServerRemove { id } => out[UNIQUE_ID].set(*id),
            Message::RequestForceUpdate => {}
        }
        out
    }

    pub fn from_value(data: &Value) -> Result<Self, ProtocolError> {
        let code = data[DATA_TYPE]
            .as_i64()
            .ok_or(ProtocolError::MissingDataType)?;
        let data_type = DataType::from_code(code).ok_or(ProtocolError::UnknownDataType(code))?;
        Ok(match data_type {
            DataType::RpcCall => Message::RpcCall {
                caller: read_id(data, CALLER)?,
                method: data[METHOD_NAME]
                    .as_str()
                    .ok_or(ProtocolError::MissingField(METHOD_NAME))?
                    .to_owned(),
                params: data[PARAMS].items().to_vec(),
            },
            DataType::ClientInputUpdate => {
                let mut input = data.clone();
                input.remove(DATA_TYPE);
                input.remove(INPUT_OWNER);
                Message::ClientInputUpdate {
                    owner: read_id(data, INPUT_OWNER)?,
                    input,
                }
            }
            DataType::ServerUpdate => Message::ServerUpdate {
                nodes: read_id_map(&data[NETWORK_NODES])?,
            },
            DataType::FullServerData => {
                let nodes = data[NODES]
                    .items()
                    .iter()
                    .map(|entry| {
                        Ok(OwnedNode {
                            owner: read_id(entry, OWNER)?,
                            node: entry[NODE].clone(),
                        })
                    })
                    .collect::<Result<_, ProtocolError>>()?;
                Message::FullServerData {
                    nodes,
                    network_nodes: read_id_map(&data[NETWORK_NODES])?,
                }
            }
            DataType::ServerAdd => {
                if !data[NODE].is_object() {
                    return Err(ProtocolError::MissingField(NODE));
                }
                Message::ServerAdd {
                    owner: read_id(data, OWNER)?,
                    node: data[NODE].clone(),
                }
            }
            DataType::ServerRemove => Message::ServerRemove {
                id: read_id(data, UNIQUE_ID)?,
            },
            DataType::RequestForceUpdate => Message::RequestForceUpdate,
        })
    }

    /// Wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        self.to_value().serialize().into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes)?;
        Self::from_value(&Value::parse(text)?)
    }
}
