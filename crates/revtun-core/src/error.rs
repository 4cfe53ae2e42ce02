//! The error kinds shared by the server, outward agent, and inward agent.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("truncated read: expected {expected} bytes, got {got}")]
    TruncatedRead { expected: u64, got: u64 },

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: String, got: String },

    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("no free tunnel available")]
    NoFreeTunnel,

    #[error("idle pool is full")]
    PoolFull,

    #[error("tunnel is closing")]
    TunnelClosing,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("heartbeat lost")]
    HeartbeatLost,

    #[error("invalid config: {0}")]
    ConfigInvalid(String),
}

pub type TunnelResult<T> = Result<T, TunnelError>;
