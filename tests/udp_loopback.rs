//! Client and server transports talking over real UDP sockets on loopback

use dnstun::dns::{build_query, DnsError, T_NULL};
use dnstun::transport::{DnsTunnelClient, DnsTunnelServer};
use dnstun::{ChunkMessage, PayloadAssembler};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const TOPDOMAIN: &str = "tun.example.com";
const WAIT: Duration = Duration::from_secs(5);

async fn start_server() -> (DnsTunnelServer, String) {
    let server = DnsTunnelServer::bind("127.0.0.1:0".parse().unwrap(), TOPDOMAIN)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap().to_string();
    (server, addr)
}

#[tokio::test]
async fn test_payload_over_udp() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (server, addr) = start_server().await;
    let payload: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();

    // Serve until one payload has been assembled
    let server_task = tokio::spawn(async move {
        let mut assembler = PayloadAssembler::default();
        let mut queries = 0;
        loop {
            let Some(mut inbound) = server.recv_query().await.unwrap() else {
                continue;
            };
            queries += 1;
            let id = inbound.record.id().unwrap();
            let done = assembler.push(id, &inbound.chunk);
            server.send_response(&mut inbound.record, b"").await.unwrap();
            if let Some(payload) = done {
                return (payload, queries);
            }
        }
    });

    let mut client = DnsTunnelClient::connect(&addr, 0, TOPDOMAIN).await.unwrap();
    assert!(client.local_addr().unwrap().ip().is_loopback());

    // Wait out the handshake answer before any data goes up
    client.handshake().await.unwrap();
    timeout(WAIT, client.recv()).await.unwrap().unwrap();

    client.send_payload(&payload).await.unwrap();
    while client.is_sending() {
        timeout(WAIT, client.recv()).await.unwrap().unwrap();
    }

    let (received, queries) = timeout(WAIT, server_task).await.unwrap().unwrap();
    let capacity = client.session().chunk_capacity();
    assert_eq!(received, payload);
    assert_eq!(queries, 1 + payload.len().div_ceil(capacity));
}

#[tokio::test]
async fn test_downstream_over_udp() {
    let (server, addr) = start_server().await;

    let server_task = tokio::spawn(async move {
        let mut inbound = loop {
            if let Some(inbound) = server.recv_query().await.unwrap() {
                break inbound;
            }
        };
        server
            .send_response(&mut inbound.record, b"hello from the server")
            .await
            .unwrap();
        inbound.chunk
    });

    let mut client = DnsTunnelClient::connect(&addr, 0, TOPDOMAIN).await.unwrap();
    client.ping().await.unwrap();

    let downstream = timeout(WAIT, client.recv()).await.unwrap().unwrap();
    assert_eq!(downstream, Some(b"hello from the server".to_vec()));

    let chunk = timeout(WAIT, server_task).await.unwrap().unwrap();
    assert_eq!(chunk, ChunkMessage::Ping { counter: 0 });
}

#[tokio::test]
async fn test_server_drops_foreign_traffic() {
    let (server, addr) = start_server().await;

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender.connect(&addr).await.unwrap();

    // Not DNS at all
    sender.send(b"\x00\x01garbage").await.unwrap();
    let inbound = timeout(WAIT, server.recv_query()).await.unwrap().unwrap();
    assert!(inbound.is_none());

    // DNS, but for somebody else's domain
    let query = build_query(42, "www.example.org", T_NULL).unwrap();
    sender.send(&query).await.unwrap();
    let inbound = timeout(WAIT, server.recv_query()).await.unwrap().unwrap();
    assert!(inbound.is_none());
}

#[tokio::test]
async fn test_client_drops_garbage_response() {
    let (server, addr) = start_server().await;
    let mut client = DnsTunnelClient::connect(&addr, 0, TOPDOMAIN).await.unwrap();
    client.send_payload(b"abc").await.unwrap();

    // Learn the client's address from its query, then send junk from elsewhere
    let mut buf = vec![0u8; 2048];
    let (_, from) = server.recv_datagram(&mut buf).await.unwrap();
    let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    raw.send_to(b"not a dns message", from).await.unwrap();

    // Connected sockets ignore datagrams from other peers, so the junk
    // never reaches the session and the transfer stays pending
    let result = timeout(Duration::from_millis(200), client.recv()).await;
    assert!(result.is_err());
    assert!(client.is_sending());

    // Garbage handed straight to the client is dropped without error
    assert_eq!(client.handle_datagram(b"\xff\xff").await.unwrap(), None);
    assert!(client.is_sending());
}

#[tokio::test]
async fn test_send_failure_leaves_session_usable() {
    // Nobody listens on this port once the placeholder is gone
    let placeholder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = placeholder.local_addr().unwrap().to_string();
    drop(placeholder);

    let mut client = DnsTunnelClient::connect(&addr, 0, TOPDOMAIN).await.unwrap();
    client.send_payload(&[7u8; 300]).await.unwrap();

    // The port unreachable reply surfaces as an I/O error on the socket
    let err = timeout(WAIT, client.recv()).await.unwrap().unwrap_err();
    assert!(matches!(err, DnsError::Io(_)));
    assert!(!err.is_malformed());

    // The transfer is still there to be pinged away and resent
    assert!(client.is_sending());
    let _ = client.ping().await;
    assert_eq!(client.session().abandoned_len(), 300);

    // Whether or not the send goes out, the payload is back in flight
    let _ = client.resend_abandoned().await;
    assert!(client.is_sending());
    assert!(!client.session().has_abandoned());
    assert_eq!(client.session().pending_len(), 300);
}
