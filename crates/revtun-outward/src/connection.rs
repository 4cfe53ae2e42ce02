//! One data connection: a socket registered with S via `OutDataRequest`,
//! waiting for S to activate it with `DataActiveRequest` (§4.8).
//!
//! Grounded on `original_source/out/out.go::connection` for the algorithm
//! and lifecycle (`loop`/`Run`/`Shutdown`), restructured per SPEC_FULL.md
//! §9 "Cyclic references": a `Connection` never holds a back-pointer to its
//! `ConnectionRegistry`; the registry holds the only strong handle.

use crate::config::Network;
use revtun_core::{
    codec,
    message::{DataActiveRequestPayload, ResponsePayload},
    splice::splice,
    Envelope, MsgType, ShutdownGate, TunnelError,
};
use tokio::io::AsyncWriteExt as _;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

pub struct Connection {
    network: Network,
    gate: ShutdownGate,
    data_sock: Mutex<Option<TcpStream>>,
}

impl Connection {
    pub fn new(network: Network, data_sock: TcpStream) -> Self {
        Self {
            network,
            gate: ShutdownGate::new(),
            data_sock: Mutex::new(Some(data_sock)),
        }
    }

    #[cfg(test)]
    pub fn new_for_test(network: Network, gate: ShutdownGate) -> Self {
        Self {
            network,
            gate,
            data_sock: Mutex::new(None),
        }
    }

    pub fn begin_shutdown(&self) {
        self.gate.begin();
    }
}

/// Run one connection's full lifecycle: read the expected
/// `DataActiveRequest`, dial backend, reply, then splice until either side
/// closes (§4.8). Runs to completion even if the registry drops its last
/// strong reference, since the task owns its own `Arc<Connection>` clone.
pub async fn run_connection(conn: std::sync::Arc<Connection>) {
    let mut data_sock = {
        let mut guard = conn.data_sock.lock().await;
        match guard.take() {
            Some(s) => s,
            None => return,
        }
    };

    let result = tokio::select! {
        _ = conn.gate.wait_begin() => None,
        res = codec::read_msg(&mut data_sock) => Some(res),
    };

    let req = match result {
        None => {
            let _ = data_sock.shutdown().await;
            conn.gate.complete();
            return;
        }
        Some(Ok(Envelope::DataActiveRequest(req))) => req,
        Some(Ok(other)) => {
            tracing::warn!(msg_type = %other.msg_type(), "expected DataActiveRequest, got something else");
            conn.gate.complete();
            return;
        }
        Some(Err(e)) => {
            tracing::debug!(error = %e, "failed to read DataActiveRequest");
            conn.gate.complete();
            return;
        }
    };

    if req.topic != conn.network.topic {
        tracing::warn!(expected = %conn.network.topic, got = %req.topic, "topic mismatch on data connection");
        conn.gate.complete();
        return;
    }

    let backend = match TcpStream::connect(conn.network.backend_addr()).await {
        Ok(sock) => sock,
        Err(e) => {
            tracing::warn!(error = %e, backend = %conn.network.backend_addr(), "failed to dial backend");
            let err = TunnelError::ConnectFailed(e.to_string());
            let resp = ResponsePayload::err(req.magic.clone(), MsgType::DataActiveRequest, err.to_string());
            let _ = codec::write_msg(&mut data_sock, &Envelope::Response(resp)).await;
            conn.gate.complete();
            return;
        }
    };

    let ok = ResponsePayload::ok(req.magic.clone(), MsgType::DataActiveRequest);
    if let Err(e) = codec::write_msg(&mut data_sock, &Envelope::Response(ok)).await {
        tracing::warn!(error = %e, "failed to ack DataActiveRequest");
        conn.gate.complete();
        return;
    }

    let splice_gate = conn.gate.clone();
    let (to_backend, to_data) = splice(data_sock, backend, splice_gate).await;
    tracing::debug!(
        topic = %conn.network.topic,
        bytes_data_to_backend = to_backend,
        bytes_backend_to_data = to_data,
        "data connection splice ended"
    );

    conn.gate.complete();
}
