//! Accept loop and first-message dispatch (§4.4).
//!
//! Grounded on `original_source/svr.go::handle`/`main` for the dispatch
//! table and on the teacher's `WshServer::run` for the
//! accept-loop-plus-spawn-per-connection shape.

use crate::proxy::run_proxy;
use crate::registry::TunnelRegistry;
use revtun_core::{
    codec,
    message::ResponsePayload,
    Envelope, MsgType, TunnelError, TunnelResult, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

pub struct Server {
    registry: Arc<TunnelRegistry>,
}

impl Server {
    pub fn new() -> Self {
        Self {
            registry: TunnelRegistry::new(),
        }
    }

    /// Bind and accept forever, spawning one task per connection to read
    /// its first message and dispatch (§4.4). Returns only on listener
    /// error; the caller races this against the shutdown signal.
    pub async fn run(&self, addr: SocketAddr) -> TunnelResult<()> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, %addr, "failed to bind");
            e
        })?;
        tracing::info!(%addr, "rendezvous server listening");

        loop {
            let (socket, peer) = listener.accept().await?;
            let registry = self.registry.clone();
            tokio::spawn(async move {
                handle_accept(socket, peer, registry).await;
            });
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

/// Read exactly one message from a freshly accepted socket and dispatch on
/// its type (§4.4's table).
async fn handle_accept(mut socket: TcpStream, peer: SocketAddr, registry: Arc<TunnelRegistry>) {
    let first = match codec::read_msg(&mut socket).await {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(%peer, error = %e, "failed to read first message");
            return;
        }
    };

    match first {
        Envelope::OutRequest(req) => {
            if req.version != PROTOCOL_VERSION {
                let err = TunnelError::VersionMismatch {
                    expected: PROTOCOL_VERSION.to_string(),
                    got: req.version.clone(),
                };
                let resp = ResponsePayload::err(req.magic.clone(), MsgType::OutRequest, err.to_string());
                let _ = codec::write_msg(&mut socket, &Envelope::Response(resp)).await;
                return;
            }
            if req.topic.is_empty() {
                let resp = ResponsePayload::err(
                    req.magic.clone(),
                    MsgType::OutRequest,
                    "topic must not be empty".to_string(),
                );
                let _ = codec::write_msg(&mut socket, &Envelope::Response(resp)).await;
                return;
            }

            let ok = ResponsePayload::ok(req.magic.clone(), MsgType::OutRequest);
            if let Err(e) = codec::write_msg(&mut socket, &Envelope::Response(ok)).await {
                tracing::warn!(%peer, error = %e, "failed to ack OutRequest");
                return;
            }

            registry.register(req.topic, socket).await;
        }

        Envelope::OutDataRequest(req) => {
            if req.version != PROTOCOL_VERSION {
                let err = TunnelError::VersionMismatch {
                    expected: PROTOCOL_VERSION.to_string(),
                    got: req.version.clone(),
                };
                let resp = ResponsePayload::err(req.magic.clone(), MsgType::OutDataRequest, err.to_string());
                let _ = codec::write_msg(&mut socket, &Envelope::Response(resp)).await;
                return;
            }

            let tunnel = match registry.get(&req.topic).await {
                Some(t) => t,
                None => {
                    let err = TunnelError::UnknownTopic(req.topic.clone());
                    let resp = ResponsePayload::err(req.magic.clone(), MsgType::OutDataRequest, err.to_string());
                    let _ = codec::write_msg(&mut socket, &Envelope::Response(resp)).await;
                    return;
                }
            };

            match tunnel.reserve_pool_slot().await {
                Ok(permit) => {
                    let ok = ResponsePayload::ok(req.magic.clone(), MsgType::OutDataRequest);
                    if codec::write_msg(&mut socket, &Envelope::Response(ok))
                        .await
                        .is_ok()
                    {
                        permit.send(socket);
                    }
                    // On an ack write failure the permit is simply dropped,
                    // releasing the reserved pool slot; the socket is
                    // dropped too, closing it.
                }
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "could not reserve idle pool slot");
                    let resp = ResponsePayload::err(req.magic.clone(), MsgType::OutDataRequest, e.to_string());
                    let _ = codec::write_msg(&mut socket, &Envelope::Response(resp)).await;
                }
            }
        }

        Envelope::InRequest(req) => {
            run_proxy(socket, req, registry).await;
        }

        other => {
            let tag = other.msg_type();
            let resp = ResponsePayload::err(
                String::new(),
                tag,
                format!("unexpected first message: {tag}"),
            );
            let _ = codec::write_msg(&mut socket, &Envelope::Response(resp)).await;
        }
    }
}
