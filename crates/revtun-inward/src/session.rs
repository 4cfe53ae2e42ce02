//! One accepted client connection: dial the rendezvous server, request a
//! proxy on this network's topic, then splice (§4.9).
//!
//! Grounded on `original_source/in/in.go::session` for the algorithm
//! (`loop`/`Run`/`Shutdown`), restructured per SPEC_FULL.md §9 "Cyclic
//! references": a `Session` never holds a back-pointer to its
//! `SessionRegistry`.

use crate::config::Network;
use revtun_core::{
    codec,
    magic::generate_magic,
    message::{InRequestPayload, PROTOCOL_VERSION},
    splice::splice,
    Envelope, MsgType, ShutdownGate, TunnelResult,
};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

pub struct Session {
    network: Network,
    gate: ShutdownGate,
    client_sock: Mutex<Option<TcpStream>>,
}

impl Session {
    pub fn new(network: Network, client_sock: TcpStream) -> Self {
        Self {
            network,
            gate: ShutdownGate::new(),
            client_sock: Mutex::new(Some(client_sock)),
        }
    }

    #[cfg(test)]
    pub fn new_for_test(network: Network, gate: ShutdownGate) -> Self {
        Self {
            network,
            gate,
            client_sock: Mutex::new(None),
        }
    }

    pub fn begin_shutdown(&self) {
        self.gate.begin();
    }
}

/// Run one client session to completion: dial S, request a proxy on this
/// network's topic, splice until either side closes (§4.9).
pub async fn run_session(session: std::sync::Arc<Session>) {
    let client = {
        let mut guard = session.client_sock.lock().await;
        match guard.take() {
            Some(s) => s,
            None => return,
        }
    };

    match connect_and_request(&session.network).await {
        Ok(server) => {
            let (to_server, to_client) = splice(client, server, session.gate.clone()).await;
            tracing::debug!(
                topic = %session.network.topic,
                bytes_client_to_server = to_server,
                bytes_server_to_client = to_client,
                "inward session splice ended"
            );
        }
        Err(e) => {
            tracing::warn!(topic = %session.network.topic, error = %e, "failed to establish proxy session");
        }
    }

    session.gate.complete();
}

async fn connect_and_request(network: &Network) -> TunnelResult<TcpStream> {
    let mut server = TcpStream::connect(network.server_addr()).await?;

    let magic = generate_magic();
    let req = Envelope::InRequest(InRequestPayload {
        magic: magic.clone(),
        version: PROTOCOL_VERSION.to_string(),
        topic: network.topic.clone(),
    });
    codec::write_msg(&mut server, &req).await?;
    codec::check_response(&mut server, &magic, MsgType::InRequest).await?;
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use revtun_core::message::ResponsePayload;
    use std::sync::Arc;

    async fn dummy_stream_pair() -> (TcpStream, TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept_res, connect_res) = tokio::join!(listener.accept(), connect);
        (accept_res.unwrap().0, connect_res.unwrap())
    }

    #[tokio::test]
    async fn run_session_completes_when_server_unreachable() {
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_port = probe.local_addr().unwrap().port();
        drop(probe);

        let network = Network {
            server_host: "127.0.0.1".into(),
            server_port,
            bind: "127.0.0.1".into(),
            port: 1,
            topic: "default".into(),
        };
        let (client, _peer) = dummy_stream_pair().await;
        let session = Arc::new(Session::new(network, client));

        tokio::time::timeout(std::time::Duration::from_secs(2), run_session(session))
            .await
            .expect("run_session should not hang when the server is unreachable");
    }

    #[tokio::test]
    async fn connect_and_request_succeeds_against_a_fake_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_port = listener.local_addr().unwrap().port();

        let fake_server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let msg = codec::read_msg(&mut sock).await.unwrap();
            let magic = match msg {
                Envelope::InRequest(req) => req.magic,
                other => panic!("expected InRequest, got {other:?}"),
            };
            let resp = Envelope::Response(ResponsePayload::ok(magic, MsgType::InRequest));
            codec::write_msg(&mut sock, &resp).await.unwrap();
        });

        let network = Network {
            server_host: "127.0.0.1".into(),
            server_port,
            bind: "127.0.0.1".into(),
            port: 1,
            topic: "default".into(),
        };

        let result = connect_and_request(&network).await;
        assert!(result.is_ok());
        fake_server.await.unwrap();
    }
}
