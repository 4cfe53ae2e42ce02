//! The ephemeral client↔data-socket bridge built for each `InRequest`
//! (§3, §4.6).
//!
//! Grounded on `original_source/svr.go`'s `proxy.loop()` for the sequence
//! (version check → topic lookup → register in tunnel → GetFreeTunnel →
//! DataActiveRequest handshake → reply → splice) and on the teacher's
//! `relay::broker::route` for the topic-lookup-and-reply shape.

use crate::tunnel::Tunnel;
use crate::registry::TunnelRegistry;
use revtun_core::{
    codec,
    magic::generate_magic,
    message::{DataActiveRequestPayload, InRequestPayload, ResponsePayload, PROTOCOL_VERSION},
    splice::splice,
    Envelope, MsgType, ShutdownGate, TunnelError, TunnelResult,
};
use std::sync::Arc;
use tokio::net::TcpStream;

/// One client conversation bridged onto a tunnel's data plane. Holds no
/// reference back to its owning tunnel (§9 "Cyclic references") — the
/// tunnel holds a strong handle to `Proxy` in its own proxy set, and the
/// only way back is through the `TunnelRegistry`, never a raw pointer.
pub struct Proxy {
    gate: ShutdownGate,
}

impl Proxy {
    fn new() -> Self {
        Self {
            gate: ShutdownGate::new(),
        }
    }

    pub fn begin_shutdown(&self) {
        self.gate.begin();
    }
}

/// Run one proxy's full lifecycle to completion, including the terminal
/// `Response` to the client on any failure path.
pub async fn run_proxy(mut client: TcpStream, req: InRequestPayload, registry: Arc<TunnelRegistry>) {
    let request_tag = MsgType::InRequest;

    if req.version != PROTOCOL_VERSION {
        let err = TunnelError::VersionMismatch {
            expected: PROTOCOL_VERSION.to_string(),
            got: req.version.clone(),
        };
        let resp = ResponsePayload::err(req.magic.clone(), request_tag, err.to_string());
        let _ = codec::write_msg(&mut client, &Envelope::Response(resp)).await;
        return;
    }

    let tunnel = match registry.get(&req.topic).await {
        Some(t) => t,
        None => {
            let err = TunnelError::UnknownTopic(req.topic.clone());
            let resp = ResponsePayload::err(req.magic.clone(), request_tag, err.to_string());
            let _ = codec::write_msg(&mut client, &Envelope::Response(resp)).await;
            return;
        }
    };

    let proxy = Arc::new(Proxy::new());
    let proxy_id = tunnel.add_proxy(proxy.clone()).await;

    let data_sock = match acquire_data_socket(&tunnel, &req.topic).await {
        Ok(sock) => sock,
        Err(e) => {
            tunnel.remove_proxy(proxy_id).await;
            let resp = ResponsePayload::err(req.magic.clone(), request_tag, e.to_string());
            let _ = codec::write_msg(&mut client, &Envelope::Response(resp)).await;
            return;
        }
    };

    let ok_resp = ResponsePayload::ok(req.magic.clone(), request_tag);
    if let Err(e) = codec::write_msg(&mut client, &Envelope::Response(ok_resp)).await {
        tracing::warn!(error = %e, "failed to ack InRequest");
        tunnel.remove_proxy(proxy_id).await;
        return;
    }

    let (client_to_data, data_to_client) = splice(client, data_sock, proxy.gate.clone()).await;
    tracing::debug!(
        topic = %req.topic,
        bytes_client_to_data = client_to_data,
        bytes_data_to_client = data_to_client,
        "proxy splice ended"
    );

    tunnel.remove_proxy(proxy_id).await;
    proxy.gate.complete();
}

async fn acquire_data_socket(tunnel: &Arc<Tunnel>, topic: &str) -> TunnelResult<TcpStream> {
    let mut data_sock = tunnel.get_free_tunnel().await?;
    let magic = generate_magic();
    let active = Envelope::DataActiveRequest(DataActiveRequestPayload {
        magic: magic.clone(),
        topic: topic.to_string(),
    });
    codec::write_msg(&mut data_sock, &active).await?;
    codec::check_response(&mut data_sock, &magic, MsgType::DataActiveRequest).await?;
    Ok(data_sock)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn dummy_stream_pair() -> (TcpStream, TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept_res, connect_res) = tokio::join!(listener.accept(), connect);
        (accept_res.unwrap().0, connect_res.unwrap())
    }

    #[tokio::test]
    async fn run_proxy_rejects_unknown_topic() {
        let registry = TunnelRegistry::new();
        let (client, mut peer) = dummy_stream_pair().await;

        let req = InRequestPayload {
            magic: generate_magic(),
            version: PROTOCOL_VERSION.to_string(),
            topic: "nonexistent".to_string(),
        };

        tokio::join!(
            run_proxy(client, req, registry),
            async {
                let resp = codec::read_msg(&mut peer).await.unwrap();
                match resp {
                    Envelope::Response(r) => assert!(!r.is_ok()),
                    other => panic!("expected Response, got {other:?}"),
                }
            }
        );
    }

    #[tokio::test]
    async fn run_proxy_rejects_version_mismatch() {
        let registry = TunnelRegistry::new();
        let (client, mut peer) = dummy_stream_pair().await;

        let req = InRequestPayload {
            magic: generate_magic(),
            version: "9.9.9".to_string(),
            topic: "whatever".to_string(),
        };

        tokio::join!(
            run_proxy(client, req, registry),
            async {
                let resp = codec::read_msg(&mut peer).await.unwrap();
                match resp {
                    Envelope::Response(r) => assert!(!r.is_ok()),
                    other => panic!("expected Response, got {other:?}"),
                }
            }
        );
    }
}
