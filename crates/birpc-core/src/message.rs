use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// A single envelope on the wire: either a request/notification (`func` set)
/// or a response (`func` empty, exactly one of `result`/`error` set).
///
/// Payloads are kept as boxed raw JSON until a [`crate::registry::Registry`]
/// entry or a waiting caller actually needs the typed value, so the endpoint
/// never pays a decode it can't use (see [`crate::codec::Codec::unmarshal_args`]).
#[derive(Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    #[serde(rename = "fn", default, skip_serializing_if = "String::is_empty")]
    pub func: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Open error shape: `msg` is mandatory, everything else passes through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub msg: String,
    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RpcError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            extra: serde_json::Map::new(),
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.msg)
    }
}

impl std::error::Error for RpcError {}

impl Message {
    /// Builds an outbound request or notification. `id == 0` marks a
    /// notification: the peer must not send a reply for it.
    pub fn request(id: u64, func: impl Into<String>, args: Box<RawValue>) -> Self {
        Self {
            id,
            func: func.into(),
            args: Some(args),
            result: None,
            error: None,
        }
    }

    pub fn response_ok(id: u64, result: Box<RawValue>) -> Self {
        Self {
            id,
            func: String::new(),
            args: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn response_err(id: u64, error: RpcError) -> Self {
        Self {
            id,
            func: String::new(),
            args: None,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_request(&self) -> bool {
        !self.func.is_empty()
    }

    pub fn is_notification(&self) -> bool {
        self.is_request() && self.id == 0
    }
}
