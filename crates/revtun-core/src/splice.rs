//! Full-duplex byte pump between two established TCP sockets, with shared
//! shutdown notification (§4.3).
//!
//! Two concurrent pumps run, one per direction. Whichever ends first (EOF
//! or error) fires the shared [`ShutdownGate`]; the other pump's `select!`
//! wakes on that and exits even mid-read, so the splice never leaks one
//! half running after the other has stopped (§4.3 invariant).

use crate::shutdown::ShutdownGate;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const BUF_SIZE: usize = 16 * 1024;

/// Splice `a` and `b` until both directions have ended. Returns
/// `(bytes_a_to_b, bytes_b_to_a)`. The gate is fired by whichever side ends
/// first; callers that also want to trigger shutdown from elsewhere (e.g. a
/// tunnel tearing down) can fire the same gate externally.
pub async fn splice(a: TcpStream, b: TcpStream, gate: ShutdownGate) -> (u64, u64) {
    let (a_read, a_write) = a.into_split();
    let (b_read, b_write) = b.into_split();

    let gate_ab = gate.clone();
    let gate_ba = gate.clone();

    let ab = tokio::spawn(pump(a_read, b_write, gate_ab));
    let ba = tokio::spawn(pump(b_read, a_write, gate_ba));

    let (n_ab, n_ba) = tokio::join!(ab, ba);
    (n_ab.unwrap_or(0), n_ba.unwrap_or(0))
}

async fn pump(
    mut reader: tokio::net::tcp::OwnedReadHalf,
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    gate: ShutdownGate,
) -> u64 {
    let mut buf = vec![0u8; BUF_SIZE];
    let mut total = 0u64;
    loop {
        tokio::select! {
            _ = gate.wait_begin() => break,
            res = reader.read(&mut buf) => {
                match res {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        total += n as u64;
                        if writer.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    gate.begin();
    let _ = writer.shutdown().await;
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept_res, connect_res) = tokio::join!(listener.accept(), connect);
        (accept_res.unwrap().0, connect_res.unwrap())
    }

    #[tokio::test]
    async fn splice_relays_both_directions_and_terminates() {
        let (client_a, mut client_a_peer) = loopback_pair().await;
        let (client_b, mut client_b_peer) = loopback_pair().await;

        let gate = ShutdownGate::new();
        let splice_task = tokio::spawn(splice(client_a, client_b, gate));

        client_a_peer.write_all(b"hello from a").await.unwrap();
        let mut buf = vec![0u8; 32];
        let n = client_b_peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello from a");

        client_b_peer.write_all(b"hello from b").await.unwrap();
        let n = client_a_peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello from b");

        drop(client_a_peer);
        drop(client_b_peer);

        let (n_ab, n_ba) = tokio::time::timeout(std::time::Duration::from_secs(2), splice_task)
            .await
            .expect("splice should terminate once both peers close")
            .unwrap();
        assert_eq!(n_ab, "hello from a".len() as u64);
        assert_eq!(n_ba, "hello from b".len() as u64);
    }

    #[tokio::test]
    async fn external_gate_fire_tears_down_both_pumps() {
        let (client_a, _client_a_peer) = loopback_pair().await;
        let (client_b, _client_b_peer) = loopback_pair().await;

        let gate = ShutdownGate::new();
        let gate_for_fire = gate.clone();
        let splice_task = tokio::spawn(splice(client_a, client_b, gate));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        gate_for_fire.begin();

        tokio::time::timeout(std::time::Duration::from_secs(2), splice_task)
            .await
            .expect("splice should terminate once gate fires externally")
            .unwrap();
    }
}
