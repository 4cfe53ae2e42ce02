//! The eight wire message variants and the envelope that carries them.
//!
//! The wire record for every message is `{"type": "<Tag>", "payload": {...}}`
//! (§6). `Envelope` is declared `#[serde(tag = "type", content = "payload")]`
//! so serde produces and consumes exactly that shape, and dispatch on the
//! tag is automatic rather than a hand-rolled match over a string.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol version every component must agree on. Frozen.
pub const PROTOCOL_VERSION: &str = "0.0.1";

/// Default topic used when a network config omits one.
pub const DEFAULT_TOPIC: &str = "default";

/// Length, in characters, of a magic correlation token.
pub const MAGIC_LEN: usize = 16;

/// Capacity of a tunnel's idle data-socket pool.
pub const TUNNEL_POOL_CAPACITY: usize = 100;

/// Timeout for `GetFreeTunnel` to acquire a pooled data socket.
pub const FREE_TUNNEL_TIMEOUT_MS: u64 = 5000;

/// Outward agent reconnect backoff.
pub const RETRY_INTERVAL_MS: u64 = 2000;

/// Outward agent heartbeat cadence.
pub const HEARTBEAT_INTERVAL_MS: u64 = 2000;

/// Outward agent liveness timeout.
pub const HEARTBEAT_TIMEOUT_MS: u64 = 20000;

/// Discriminant for [`Envelope`], mirrored for call sites that want to log
/// or compare a message's kind without matching on the full payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    OutRequest,
    OutDataRequest,
    NewDataRequest,
    DataActiveRequest,
    InRequest,
    Response,
    Ping,
    Pong,
}

impl MsgType {
    pub fn as_str(self) -> &'static str {
        match self {
            MsgType::OutRequest => "OutRequest",
            MsgType::OutDataRequest => "OutDataRequest",
            MsgType::NewDataRequest => "NewDataRequest",
            MsgType::DataActiveRequest => "DataActiveRequest",
            MsgType::InRequest => "InRequest",
            MsgType::Response => "Response",
            MsgType::Ping => "Ping",
            MsgType::Pong => "Pong",
        }
    }

    /// Recognize one of the eight wire tags. Anything else is `UnknownType`
    /// to the codec, distinct from a tag that is known but whose payload
    /// fails to decode (`DecodeError`, §4.1).
    pub fn from_str(tag: &str) -> Option<Self> {
        Some(match tag {
            "OutRequest" => MsgType::OutRequest,
            "OutDataRequest" => MsgType::OutDataRequest,
            "NewDataRequest" => MsgType::NewDataRequest,
            "DataActiveRequest" => MsgType::DataActiveRequest,
            "InRequest" => MsgType::InRequest,
            "Response" => MsgType::Response,
            "Ping" => MsgType::Ping,
            "Pong" => MsgType::Pong,
            _ => return None,
        })
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutRequestPayload {
    pub magic: String,
    pub version: String,
    #[serde(rename = "type")]
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutDataRequestPayload {
    pub magic: String,
    pub version: String,
    #[serde(rename = "type")]
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDataRequestPayload {
    pub magic: String,
    #[serde(rename = "type")]
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataActiveRequestPayload {
    pub magic: String,
    #[serde(rename = "type")]
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InRequestPayload {
    pub magic: String,
    pub version: String,
    #[serde(rename = "type")]
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub magic: String,
    pub request: String,
    pub message: String,
}

impl ResponsePayload {
    pub fn ok(magic: impl Into<String>, request: MsgType) -> Self {
        Self {
            magic: magic.into(),
            request: request.as_str().to_string(),
            message: String::new(),
        }
    }

    pub fn err(magic: impl Into<String>, request: MsgType, message: impl Into<String>) -> Self {
        Self {
            magic: magic.into(),
            request: request.as_str().to_string(),
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.message.is_empty()
    }
}

/// `Ping`/`Pong` carry no fields (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmptyPayload {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Envelope {
    OutRequest(OutRequestPayload),
    OutDataRequest(OutDataRequestPayload),
    NewDataRequest(NewDataRequestPayload),
    DataActiveRequest(DataActiveRequestPayload),
    InRequest(InRequestPayload),
    Response(ResponsePayload),
    Ping(EmptyPayload),
    Pong(EmptyPayload),
}

impl Envelope {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Envelope::OutRequest(_) => MsgType::OutRequest,
            Envelope::OutDataRequest(_) => MsgType::OutDataRequest,
            Envelope::NewDataRequest(_) => MsgType::NewDataRequest,
            Envelope::DataActiveRequest(_) => MsgType::DataActiveRequest,
            Envelope::InRequest(_) => MsgType::InRequest,
            Envelope::Response(_) => MsgType::Response,
            Envelope::Ping(_) => MsgType::Ping,
            Envelope::Pong(_) => MsgType::Pong,
        }
    }

    pub fn ping() -> Self {
        Envelope::Ping(EmptyPayload::default())
    }

    pub fn pong() -> Self {
        Envelope::Pong(EmptyPayload::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_request_round_trips() {
        let env = Envelope::OutRequest(OutRequestPayload {
            magic: "abcdefghij012345".into(),
            version: PROTOCOL_VERSION.into(),
            topic: "default".into(),
        });
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(
            json,
            r#"{"type":"OutRequest","payload":{"magic":"abcdefghij012345","version":"0.0.1","type":"default"}}"#
        );
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn all_eight_variants_round_trip() {
        let samples = vec![
            Envelope::OutRequest(OutRequestPayload {
                magic: "m".repeat(16),
                version: PROTOCOL_VERSION.into(),
                topic: "t".into(),
            }),
            Envelope::OutDataRequest(OutDataRequestPayload {
                magic: "m".repeat(16),
                version: PROTOCOL_VERSION.into(),
                topic: "t".into(),
            }),
            Envelope::NewDataRequest(NewDataRequestPayload {
                magic: "m".repeat(16),
                topic: "t".into(),
            }),
            Envelope::DataActiveRequest(DataActiveRequestPayload {
                magic: "m".repeat(16),
                topic: "t".into(),
            }),
            Envelope::InRequest(InRequestPayload {
                magic: "m".repeat(16),
                version: PROTOCOL_VERSION.into(),
                topic: "t".into(),
            }),
            Envelope::Response(ResponsePayload::ok("m".repeat(16), MsgType::InRequest)),
            Envelope::ping(),
            Envelope::pong(),
        ];
        for env in samples {
            let json = serde_json::to_vec(&env).unwrap();
            let back: Envelope = serde_json::from_slice(&json).unwrap();
            assert_eq!(back, env);
        }
    }

    #[test]
    fn msg_type_from_str_round_trips_all_eight_tags() {
        for t in [
            MsgType::OutRequest,
            MsgType::OutDataRequest,
            MsgType::NewDataRequest,
            MsgType::DataActiveRequest,
            MsgType::InRequest,
            MsgType::Response,
            MsgType::Ping,
            MsgType::Pong,
        ] {
            assert_eq!(MsgType::from_str(t.as_str()), Some(t));
        }
    }

    #[test]
    fn msg_type_from_str_rejects_unknown_tag() {
        assert_eq!(MsgType::from_str("NotARealType"), None);
    }

    #[test]
    fn response_ok_has_empty_message() {
        let r = ResponsePayload::ok("abc", MsgType::OutRequest);
        assert!(r.is_ok());
        let e = ResponsePayload::err("abc", MsgType::OutRequest, "boom");
        assert!(!e.is_ok());
    }
}
