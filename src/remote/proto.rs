//! Wire codec: one JSON text frame per message, two layers of
//! cmd-tagged unions.
//!
//! The node layer selects among error/handshake/heartbeat/new_client/
//! client; a client frame wraps the per-session system commands. Payload
//! constructors are picked by the cmd string, so the codec is hand-rolled
//! around raw JSON values rather than derived.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::core::creds::Credentials;
use crate::core::interface::{Interface, ItemsInterface};
use crate::core::item::Item;
use crate::node::system::SystemOrigin;

pub const API_VERSION: &str = "1.0";
pub const IMPL_ID: &str = "rs:1.0";
pub const WS_PATH: &str = "/ws";

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("unknown system command: {0}")]
    UnknownSystemCommand(String),
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported version: {0}")]
    UnsupportedVersion(String),
    #[error("implementation id not specified")]
    MissingImplId,
    #[error("wrong direction")]
    WrongDirection,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    pub version: String,
    #[serde(rename = "implId", default)]
    pub impl_id: String,
    #[serde(default)]
    pub node: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(rename = "beat")]
    pub count: i64,
    pub time: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewClient {
    pub client: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnBody {
    pub id: String,
    #[serde(default)]
    pub credentials: Credentials,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CredsBody {
    #[serde(default)]
    pub credentials: Credentials,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InitBody {
    pub interface: Interface,
    #[serde(default)]
    pub extends: Vec<String>,
    #[serde(default)]
    pub origin: SystemOrigin,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InvokeBody {
    pub hub: String,
    #[serde(default)]
    pub value: Vec<Item>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnBody {
    #[serde(rename = "return", default)]
    pub values: Vec<Item>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PushBody {
    pub hub: String,
    #[serde(default)]
    pub id: String,
    pub value: Item,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateBody {
    #[serde(default)]
    pub values: Vec<Item>,
    #[serde(default)]
    pub types: ItemsInterface,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StopBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NameBody {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusBody {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    pub status: i64,
}

/// Per-session system commands, carried inside a `client` frame.
#[derive(Clone, Debug, PartialEq)]
pub enum SystemPayload {
    None,
    Conn(ConnBody),
    Creds(CredsBody),
    Init(Box<InitBody>),
    Invoke(InvokeBody),
    Return(ReturnBody),
    Push(PushBody),
    Create(CreateBody),
    Load,
    Stop(StopBody),
    Start,
    Delete,
    Name(NameBody),
    Status(StatusBody),
    // Some dialects frame errors inside the client payload; both forms
    // are accepted and treated identically.
    Error(ErrorBody),
}

impl SystemPayload {
    pub fn cmd(&self) -> &'static str {
        match self {
            SystemPayload::None => "",
            SystemPayload::Conn(_) => "conn",
            SystemPayload::Creds(_) => "creds",
            SystemPayload::Init(_) => "init",
            SystemPayload::Invoke(_) => "invoke",
            SystemPayload::Return(_) => "return",
            SystemPayload::Push(_) => "push",
            SystemPayload::Create(_) => "create",
            SystemPayload::Load => "load",
            SystemPayload::Stop(_) => "stop",
            SystemPayload::Start => "start",
            SystemPayload::Delete => "delete",
            SystemPayload::Name(_) => "name",
            SystemPayload::Status(_) => "status",
            SystemPayload::Error(_) => "error",
        }
    }

    fn body(&self) -> Result<Option<JsonValue>, ProtoError> {
        let body = match self {
            SystemPayload::None => return Ok(None),
            SystemPayload::Conn(b) => serde_json::to_value(b)?,
            SystemPayload::Creds(b) => serde_json::to_value(b)?,
            SystemPayload::Init(b) => serde_json::to_value(b)?,
            SystemPayload::Invoke(b) => serde_json::to_value(b)?,
            SystemPayload::Return(b) => serde_json::to_value(b)?,
            SystemPayload::Push(b) => serde_json::to_value(b)?,
            SystemPayload::Create(b) => serde_json::to_value(b)?,
            SystemPayload::Load => JsonValue::Object(Default::default()),
            SystemPayload::Stop(b) => serde_json::to_value(b)?,
            SystemPayload::Start => JsonValue::Object(Default::default()),
            SystemPayload::Delete => JsonValue::Object(Default::default()),
            SystemPayload::Name(b) => serde_json::to_value(b)?,
            SystemPayload::Status(b) => serde_json::to_value(b)?,
            SystemPayload::Error(b) => serde_json::to_value(b)?,
        };
        Ok(Some(body))
    }

    fn decode(cmd: &str, body: Option<JsonValue>) -> Result<SystemPayload, ProtoError> {
        let body = body.unwrap_or(JsonValue::Null);
        let payload = match cmd {
            "" => SystemPayload::None,
            "conn" => SystemPayload::Conn(serde_json::from_value(body)?),
            "creds" => SystemPayload::Creds(serde_json::from_value(body)?),
            "init" => SystemPayload::Init(Box::new(serde_json::from_value(body)?)),
            "invoke" => SystemPayload::Invoke(serde_json::from_value(body)?),
            "return" => SystemPayload::Return(serde_json::from_value(body)?),
            "push" => SystemPayload::Push(serde_json::from_value(body)?),
            "create" => SystemPayload::Create(serde_json::from_value(body)?),
            "load" => SystemPayload::Load,
            "stop" => SystemPayload::Stop(match body {
                JsonValue::Null => StopBody::default(),
                other => serde_json::from_value(other)?,
            }),
            "start" => SystemPayload::Start,
            "delete" => SystemPayload::Delete,
            "name" => SystemPayload::Name(serde_json::from_value(body)?),
            "status" => SystemPayload::Status(serde_json::from_value(body)?),
            "error" => SystemPayload::Error(serde_json::from_value(body)?),
            other => return Err(ProtoError::UnknownSystemCommand(other.to_string())),
        };
        Ok(payload)
    }
}

/// A session-addressed frame.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientFrame {
    pub client: String,
    pub payload: SystemPayload,
}

/// Node-level payloads, selected by the outer cmd string.
#[derive(Clone, Debug, PartialEq)]
pub enum NodePayload {
    None,
    Error(ErrorBody),
    Handshake(Handshake),
    Heartbeat(Heartbeat),
    NewClient(NewClient),
    Client(Box<ClientFrame>),
}

impl NodePayload {
    pub fn cmd(&self) -> &'static str {
        match self {
            NodePayload::None => "",
            NodePayload::Error(_) => "error",
            NodePayload::Handshake(_) => "handshake",
            NodePayload::Heartbeat(_) => "heartbeat",
            NodePayload::NewClient(_) => "new_client",
            NodePayload::Client(_) => "client",
        }
    }
}

/// One frame on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeFrame {
    pub request: String,
    pub reference: String,
    pub payload: NodePayload,
}

#[derive(Serialize, Deserialize)]
struct RawNodeFrame {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    cmd: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    request: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<JsonValue>,
}

#[derive(Serialize, Deserialize)]
struct RawClientFrame {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    cmd: String,
    client: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<JsonValue>,
}

pub fn encode_frame(frame: &NodeFrame) -> Result<String, ProtoError> {
    let payload = match &frame.payload {
        NodePayload::None => None,
        NodePayload::Error(b) => Some(serde_json::to_value(b)?),
        NodePayload::Handshake(b) => Some(serde_json::to_value(b)?),
        NodePayload::Heartbeat(b) => Some(serde_json::to_value(b)?),
        NodePayload::NewClient(b) => Some(serde_json::to_value(b)?),
        NodePayload::Client(frame) => {
            let raw = RawClientFrame {
                cmd: frame.payload.cmd().to_string(),
                client: frame.client.clone(),
                payload: frame.payload.body()?,
            };
            Some(serde_json::to_value(&raw)?)
        }
    };
    let raw = RawNodeFrame {
        cmd: frame.payload.cmd().to_string(),
        request: frame.request.clone(),
        reference: frame.reference.clone(),
        payload,
    };
    Ok(serde_json::to_string(&raw)?)
}

pub fn decode_frame(text: &str) -> Result<NodeFrame, ProtoError> {
    let raw: RawNodeFrame = serde_json::from_str(text)?;
    let body = raw.payload.unwrap_or(JsonValue::Null);
    let payload = match raw.cmd.as_str() {
        "" => NodePayload::None,
        "error" => NodePayload::Error(serde_json::from_value(body)?),
        "handshake" => NodePayload::Handshake(serde_json::from_value(body)?),
        "heartbeat" => NodePayload::Heartbeat(serde_json::from_value(body)?),
        "new_client" => NodePayload::NewClient(serde_json::from_value(body)?),
        "client" => {
            let raw_client: RawClientFrame = serde_json::from_value(body)?;
            NodePayload::Client(Box::new(ClientFrame {
                client: raw_client.client,
                payload: SystemPayload::decode(&raw_client.cmd, raw_client.payload)?,
            }))
        }
        other => return Err(ProtoError::UnknownCommand(other.to_string())),
    };
    Ok(NodeFrame {
        request: raw.request,
        reference: raw.reference,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: NodeFrame) -> NodeFrame {
        let text = encode_frame(&frame).unwrap();
        decode_frame(&text).unwrap()
    }

    #[test]
    fn handshake_round_trip() {
        let frame = NodeFrame {
            request: "abc12345".to_string(),
            reference: String::new(),
            payload: NodePayload::Handshake(Handshake {
                version: API_VERSION.to_string(),
                impl_id: IMPL_ID.to_string(),
                node: "n1".to_string(),
                address: "ws://127.0.0.1:9000".to_string(),
            }),
        };
        assert_eq!(round_trip(frame.clone()), frame);

        let text = encode_frame(&frame).unwrap();
        let json: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(json["cmd"], "handshake");
        assert_eq!(json["payload"]["implId"], IMPL_ID);
    }

    #[test]
    fn heartbeat_uses_beat_field() {
        let frame = NodeFrame {
            request: String::new(),
            reference: String::new(),
            payload: NodePayload::Heartbeat(Heartbeat {
                count: 3,
                time: 1.5,
            }),
        };
        let text = encode_frame(&frame).unwrap();
        let json: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(json["payload"]["beat"], 3);
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn client_invoke_and_return() {
        let frame = NodeFrame {
            request: "req00001".to_string(),
            reference: String::new(),
            payload: NodePayload::Client(Box::new(ClientFrame {
                client: "cid12345".to_string(),
                payload: SystemPayload::Invoke(InvokeBody {
                    hub: "double".to_string(),
                    value: vec![Item::Int(21)],
                }),
            })),
        };
        assert_eq!(round_trip(frame.clone()), frame);

        let ret = NodeFrame {
            request: String::new(),
            reference: "req00001".to_string(),
            payload: NodePayload::Client(Box::new(ClientFrame {
                client: "cid12345".to_string(),
                payload: SystemPayload::Return(ReturnBody {
                    values: vec![Item::Int(42)],
                }),
            })),
        };
        let text = encode_frame(&ret).unwrap();
        let json: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(json["payload"]["payload"]["return"][0], 42);
        assert_eq!(round_trip(ret.clone()), ret);
    }

    #[test]
    fn empty_ack_frame() {
        let frame = NodeFrame {
            request: String::new(),
            reference: "req00001".to_string(),
            payload: NodePayload::None,
        };
        let text = encode_frame(&frame).unwrap();
        assert_eq!(round_trip(frame.clone()), frame);
        // No cmd or payload keys on the wire.
        let json: JsonValue = serde_json::from_str(&text).unwrap();
        assert!(json.get("cmd").is_none());
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn unknown_commands_fail_to_decode() {
        let err = decode_frame(r#"{"cmd":"bogus","payload":{}}"#).unwrap_err();
        assert!(matches!(err, ProtoError::UnknownCommand(_)));

        let err = decode_frame(
            r#"{"cmd":"client","payload":{"cmd":"bogus","client":"c","payload":{}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ProtoError::UnknownSystemCommand(_)));
    }

    #[test]
    fn error_inside_client_frame_is_accepted() {
        let frame = decode_frame(
            r#"{"cmd":"client","reference":"r1","payload":{"cmd":"error","client":"c","payload":{"error":"boom"}}}"#,
        )
        .unwrap();
        match frame.payload {
            NodePayload::Client(client) => match client.payload {
                SystemPayload::Error(body) => assert_eq!(body.error, "boom"),
                other => panic!("unexpected payload: {:?}", other),
            },
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn name_and_status_paths() {
        let frame = NodeFrame {
            request: String::new(),
            reference: String::new(),
            payload: NodePayload::Client(Box::new(ClientFrame {
                client: "c".to_string(),
                payload: SystemPayload::Status(StatusBody {
                    path: "/child".to_string(),
                    status: 256,
                }),
            })),
        };
        assert_eq!(round_trip(frame.clone()), frame);

        // Empty path is omitted on the wire and denotes the root system.
        let name = NodeFrame {
            request: String::new(),
            reference: String::new(),
            payload: NodePayload::Client(Box::new(ClientFrame {
                client: "c".to_string(),
                payload: SystemPayload::Name(NameBody {
                    path: String::new(),
                    name: "test1".to_string(),
                }),
            })),
        };
        let text = encode_frame(&name).unwrap();
        let json: JsonValue = serde_json::from_str(&text).unwrap();
        assert!(json["payload"]["payload"].get("path").is_none());
        assert_eq!(round_trip(name.clone()), name);
    }
}
