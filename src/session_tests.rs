//! End-to-end sessions over loopback sockets: a scripted XMPP-like upstream,
//! the listener in between, and a scripted client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::config::{contains, ProxyConfig, Substitution};
use crate::listener::Listener;
use crate::tls::{Interceptor, TlsIdentity};
use crate::transcript::Transcript;

const STARTTLS: &[u8] = b"<starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>";
const PROCEED: &[u8] = b"<proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>";

async fn read_until<R: AsyncRead + Unpin>(stream: &mut R, needle: &[u8]) -> Vec<u8> {
    let mut seen = Vec::new();
    let mut buf = [0u8; 1024];
    while !contains(&seen, needle) {
        let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("timed out")
            .unwrap();
        assert!(n > 0, "stream closed before {:?} arrived", String::from_utf8_lossy(needle));
        seen.extend_from_slice(&buf[..n]);
    }
    seen
}

async fn start_proxy(upstream: SocketAddr, config: impl FnOnce(ProxyConfig) -> ProxyConfig) -> (SocketAddr, Transcript, TlsIdentity) {
    let identity = TlsIdentity::self_signed().unwrap();
    let interceptor = Interceptor::new(&identity).unwrap();
    let transcript = Transcript::memory();
    let config = Arc::new(config(ProxyConfig::new(upstream.to_string())));
    let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), config, interceptor, transcript.clone()).unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener.serve());
    (addr, transcript, identity)
}

/// Upstream that negotiates STARTTLS, then answers one stanza over TLS
async fn xmpp_upstream(listener: TcpListener, identity: TlsIdentity, reply: &'static [u8]) -> Vec<u8> {
    let (mut sock, _) = listener.accept().await.unwrap();
    read_until(&mut sock, b"<stream:stream").await;
    sock.write_all(b"<stream:features><starttls/></stream:features>").await.unwrap();
    read_until(&mut sock, b"<starttls").await;
    sock.write_all(PROCEED).await.unwrap();

    let mut tls = Interceptor::new(&identity).unwrap().accept_client(sock).await.unwrap();
    let received = read_until(&mut tls, b"</message>").await;
    tls.write_all(reply).await.unwrap();
    tls.flush().await.unwrap();
    // Hold the connection until the client is done reading
    let mut rest = [0u8; 16];
    let _ = tls.read(&mut rest).await;
    received
}

/// Session results are logged after the client socket is released
async fn wait_for_line(transcript: &Transcript, prefix: &str) {
    for _ in 0..100 {
        if transcript.lines().iter().any(|l| l.starts_with(prefix)) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no transcript line starting with {prefix:?}");
}

fn count(lines: &[String], wanted: &str) -> usize {
    lines.iter().filter(|l| *l == wanted).count()
}

#[tokio::test]
async fn starttls_session_is_intercepted_and_logged_in_cleartext() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    let upstream_identity = TlsIdentity::self_signed().unwrap();
    let server = tokio::spawn(xmpp_upstream(upstream, upstream_identity.clone(), b"<message>pong</message>"));

    let (proxy_addr, transcript, proxy_identity) = start_proxy(upstream_addr, |c| c).await;

    let mut sock = TcpStream::connect(proxy_addr).await.unwrap();
    sock.write_all(b"<stream:stream to='example.org'>").await.unwrap();
    read_until(&mut sock, b"</stream:features>").await;
    sock.write_all(STARTTLS).await.unwrap();
    read_until(&mut sock, b"<proceed").await;

    let client_tls = Interceptor::new(&TlsIdentity::self_signed().unwrap()).unwrap();
    let mut tls = client_tls.connect_server("localhost", sock).await.unwrap();

    // The client is talking to the proxy's certificate, not the upstream's
    let presented = tls.get_ref().1.peer_certificates().unwrap().to_vec();
    assert_eq!(presented, proxy_identity.certificates());
    assert_ne!(presented, upstream_identity.certificates());

    tls.write_all(b"<message>ping</message>").await.unwrap();
    tls.flush().await.unwrap();
    let reply = read_until(&mut tls, b"</message>").await;
    assert_eq!(reply, b"<message>pong</message>");
    drop(tls);

    assert_eq!(server.await.unwrap(), b"<message>ping</message>");

    let lines = transcript.lines();
    assert_eq!(count(&lines, "X1: client goes TLS"), 1);
    assert_eq!(count(&lines, "X1: server goes TLS"), 1);
    assert_eq!(count(&lines, "X1: eavesdropping TLS"), 1);
    assert!(lines.contains(&"C1|<message>ping</message>|".to_string()));
    assert!(lines.contains(&"S1|<message>pong</message>|".to_string()));

    let eavesdrop = lines.iter().position(|l| l == "X1: eavesdropping TLS").unwrap();
    let ping = lines.iter().position(|l| l == "C1|<message>ping</message>|").unwrap();
    assert!(eavesdrop < ping);
}

#[tokio::test]
async fn substitution_is_applied_inside_the_intercepted_session() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    let server = tokio::spawn(xmpp_upstream(
        upstream,
        TlsIdentity::self_signed().unwrap(),
        b"<message to='bob@remote'>hi</message>",
    ));

    let (proxy_addr, transcript, _) =
        start_proxy(upstream_addr, |c| c.with_substitution(Substitution::new("bob@local", "bob@remote"))).await;

    let mut sock = TcpStream::connect(proxy_addr).await.unwrap();
    sock.write_all(b"<stream:stream>").await.unwrap();
    read_until(&mut sock, b"</stream:features>").await;
    sock.write_all(STARTTLS).await.unwrap();
    read_until(&mut sock, b"<proceed").await;

    let client_tls = Interceptor::new(&TlsIdentity::self_signed().unwrap()).unwrap();
    let mut tls = client_tls.connect_server("localhost", sock).await.unwrap();
    tls.write_all(b"<message from='bob@local'>yo</message>").await.unwrap();
    tls.flush().await.unwrap();
    let reply = read_until(&mut tls, b"</message>").await;
    assert_eq!(reply, b"<message to='bob@local'>hi</message>");
    drop(tls);

    assert_eq!(server.await.unwrap(), b"<message from='bob@remote'>yo</message>");
    let lines = transcript.lines();
    assert!(lines.contains(&"C1|<message from='bob@remote'>yo</message>|".to_string()));
    assert!(lines.contains(&"S1|<message to='bob@remote'>hi</message>|".to_string()));
}

#[tokio::test]
async fn failing_session_does_not_affect_listener_or_other_sessions() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();

    // First upstream connection is dropped at once, later ones echo
    tokio::spawn(async move {
        let (first, _) = upstream.accept().await.unwrap();
        drop(first);
        loop {
            let (mut sock, _) = upstream.accept().await.unwrap();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match sock.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if sock.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    let (proxy_addr, transcript, _) = start_proxy(upstream_addr, |c| c).await;

    let mut doomed = TcpStream::connect(proxy_addr).await.unwrap();
    let mut buf = [0u8; 16];
    let n = timeout(Duration::from_secs(5), doomed.read(&mut buf)).await.unwrap().unwrap_or(0);
    assert_eq!(n, 0);

    for _ in 0..2 {
        let mut sock = TcpStream::connect(proxy_addr).await.unwrap();
        sock.write_all(b"<presence/>").await.unwrap();
        assert_eq!(read_until(&mut sock, b"<presence/>").await, b"<presence/>");
    }

    wait_for_line(&transcript, "X1: ").await;
    let lines = transcript.lines();
    assert!(lines.contains(&"X1: session terminated: failed to read from server: EOF".to_string()));
    assert!(lines.contains(&"C2|<presence/>|".to_string()));
    assert!(lines.contains(&"S3|<presence/>|".to_string()));
}

#[tokio::test]
async fn unreachable_upstream_is_reported_per_session() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = closed.local_addr().unwrap();
    drop(closed);

    let (proxy_addr, transcript, _) = start_proxy(upstream_addr, |c| c).await;
    let mut sock = TcpStream::connect(proxy_addr).await.unwrap();
    let mut buf = [0u8; 16];
    let n = timeout(Duration::from_secs(5), sock.read(&mut buf)).await.unwrap().unwrap_or(0);
    assert_eq!(n, 0);

    wait_for_line(&transcript, "X1: ").await;
    let lines = transcript.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("X1: failed to connect to server: "));
}
