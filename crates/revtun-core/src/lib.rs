//! Shared protocol, framing, and concurrency primitives for the reverse
//! tunnel: wire codec, message types, shutdown gate, splice, and the
//! error type every other crate in the workspace propagates.

pub mod codec;
pub mod error;
pub mod magic;
pub mod message;
pub mod shutdown;
pub mod splice;

pub use error::{TunnelError, TunnelResult};
pub use message::{
    DataActiveRequestPayload, EmptyPayload, Envelope, InRequestPayload, MsgType,
    NewDataRequestPayload, OutDataRequestPayload, OutRequestPayload, ResponsePayload,
    DEFAULT_TOPIC, FREE_TUNNEL_TIMEOUT_MS, HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS,
    MAGIC_LEN, PROTOCOL_VERSION, RETRY_INTERVAL_MS, TUNNEL_POOL_CAPACITY,
};
pub use shutdown::{CompletionSignal, ShutdownGate};
