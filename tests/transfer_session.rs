//! End-to-end transfer between a client and a server session, with the
//! network replaced by direct hand-off (and the occasional lost packet).

use dnstun::{
    ChunkMessage, ClientSession, ClientState, OutboundQuery, PayloadAssembler, ResponseOutcome,
    ServerSession,
};
use rand::RngCore;
use std::net::SocketAddr;

const TOPDOMAIN: &str = "t.example.com";

struct Link {
    client: ClientSession,
    server: ServerSession,
    assembler: PayloadAssembler,
    delivered: Vec<Vec<u8>>,
    peer: SocketAddr,
}

impl Link {
    fn new(topdomain: &str) -> Self {
        Self {
            client: ClientSession::new(topdomain).unwrap(),
            server: ServerSession::new(topdomain).unwrap(),
            assembler: PayloadAssembler::default(),
            delivered: Vec::new(),
            peer: "203.0.113.9:33000".parse().unwrap(),
        }
    }

    /// Server side of one query: decode, assemble, answer
    fn serve(&mut self, query: &OutboundQuery, reply: &[u8]) -> (ChunkMessage, Vec<u8>) {
        let mut inbound = self.server.handle_query(&query.message, self.peer).unwrap();
        let id = inbound.record.id().unwrap();
        if let Some(payload) = self.assembler.push(id, &inbound.chunk) {
            self.delivered.push(payload);
        }
        let response = self.server.respond(&mut inbound.record, reply).unwrap();
        (inbound.chunk, response)
    }

    /// Full round trip of one query
    fn exchange(&mut self, query: &OutboundQuery, reply: &[u8]) -> ResponseOutcome {
        let (_, response) = self.serve(query, reply);
        self.client.handle_response(&response).unwrap()
    }

    /// Push a payload through, returning the number of round trips
    fn transfer(&mut self, payload: &[u8]) -> usize {
        let mut query = self.client.send_payload(payload).unwrap().unwrap();
        let mut round_trips = 0;
        loop {
            round_trips += 1;
            match self.exchange(&query, b"").next_query {
                Some(next) => query = next,
                None => return round_trips,
            }
        }
    }
}

#[test]
fn test_transfer_completion() {
    let mut rng = rand::thread_rng();
    let mut link = Link::new(TOPDOMAIN);
    let capacity = link.client.chunk_capacity();

    for len in [1, 2, capacity - 1, capacity, capacity + 1, 3 * capacity, 1500, 4096] {
        let mut payload = vec![0u8; len];
        rng.fill_bytes(&mut payload);

        let round_trips = link.transfer(&payload);

        assert_eq!(round_trips, len.div_ceil(capacity), "payload of {} bytes", len);
        assert_eq!(link.client.state(), ClientState::Idle);
        assert_eq!(link.delivered.pop(), Some(payload));
    }
}

#[test]
fn test_example_com_121_bytes() {
    let mut link = Link::new("example.com");
    let payload: Vec<u8> = (0..121).collect();

    let first = link.client.send_payload(&payload).unwrap().unwrap();
    let (chunk, response) = link.serve(&first, b"");
    assert!(matches!(chunk, ChunkMessage::Data { last: false, ref bytes } if bytes.len() == 118));

    let second = link
        .client
        .handle_response(&response)
        .unwrap()
        .next_query
        .unwrap();
    let (chunk, response) = link.serve(&second, b"");
    assert_eq!(
        chunk,
        ChunkMessage::Data {
            last: true,
            bytes: payload[118..].to_vec()
        }
    );

    assert_eq!(link.client.handle_response(&response).unwrap().next_query, None);
    assert_eq!(link.delivered, vec![payload]);
}

#[test]
fn test_lost_ack_then_ping_and_resend() {
    let mut link = Link::new(TOPDOMAIN);
    let payload = vec![0x5a; 400];

    let first = link.client.send_payload(&payload).unwrap().unwrap();
    let second = link.exchange(&first, b"").next_query.unwrap();

    // Server sees the second chunk but its answer is lost
    link.serve(&second, b"");
    assert_eq!(link.client.acked_len(), link.client.chunk_capacity());

    // Silence: the client pings, dropping the transfer on both ends
    let ping = link.client.ping().unwrap();
    assert_eq!(link.client.state(), ClientState::Idle);
    link.exchange(&ping, b"");
    assert_eq!(link.assembler.buffered(), 0);

    // Next tick: the abandoned payload starts over from its first byte
    assert_eq!(link.client.abandoned_len(), payload.len());
    let mut query = link.client.resend_abandoned().unwrap().unwrap();
    loop {
        match link.exchange(&query, b"").next_query {
            Some(next) => query = next,
            None => break,
        }
    }

    assert!(!link.client.has_abandoned());
    assert_eq!(link.delivered, vec![payload]);
}

#[test]
fn test_handshake_mid_transfer_keeps_payload() {
    let mut link = Link::new(TOPDOMAIN);
    let payload: Vec<u8> = (0..300u32).map(|i| i as u8).collect();

    let first = link.client.send_payload(&payload).unwrap().unwrap();
    let mut query = link.exchange(&first, b"").next_query.unwrap();

    // Handshake between the first and second chunk
    let handshake = link.client.handshake().unwrap();
    let outcome = link.exchange(&handshake, b"");
    assert!(!outcome.acked);
    assert!(link.client.is_sending());
    assert_eq!(link.assembler.buffered(), link.client.chunk_capacity());

    loop {
        match link.exchange(&query, b"").next_query {
            Some(next) => query = next,
            None => break,
        }
    }

    assert_eq!(link.client.state(), ClientState::Idle);
    assert_eq!(link.delivered, vec![payload]);
}

#[test]
fn test_resolver_retry_is_harmless() {
    let mut link = Link::new(TOPDOMAIN);
    let payload = vec![0x11; 300];

    let first = link.client.send_payload(&payload).unwrap().unwrap();

    // A resolver forwards the same query twice
    let (_, response_a) = link.serve(&first, b"");
    let (_, response_b) = link.serve(&first, b"");

    let outcome = link.client.handle_response(&response_a).unwrap();
    assert!(outcome.acked);
    let mut query = outcome.next_query.unwrap();

    let outcome = link.client.handle_response(&response_b).unwrap();
    assert!(!outcome.acked);
    assert_eq!(outcome.next_query, None);

    loop {
        match link.exchange(&query, b"").next_query {
            Some(next) => query = next,
            None => break,
        }
    }
    assert_eq!(link.delivered, vec![payload]);
}

#[test]
fn test_downstream_rides_on_pings() {
    let mut link = Link::new(TOPDOMAIN);
    let mut received = Vec::new();

    for block in [&b"first block"[..], b"second block", b"xy"] {
        let ping = link.client.ping().unwrap();
        if let Some(data) = link.exchange(&ping, block).downstream {
            received.push(data);
        }
    }

    // Two-byte answers are treated as empty
    assert_eq!(received, vec![b"first block".to_vec(), b"second block".to_vec()]);
}

#[test]
fn test_downstream_during_upload() {
    let mut link = Link::new(TOPDOMAIN);
    let mut query = link.client.send_payload(&[9u8; 250]).unwrap().unwrap();
    let mut received = Vec::new();

    loop {
        let outcome = link.exchange(&query, b"downstream");
        received.extend(outcome.downstream);
        match outcome.next_query {
            Some(next) => query = next,
            None => break,
        }
    }

    assert_eq!(received.len(), 3);
    assert_eq!(link.delivered, vec![vec![9u8; 250]]);
}

#[test]
fn test_handshake_first() {
    let mut link = Link::new(TOPDOMAIN);
    let handshake = link.client.handshake().unwrap();
    let (chunk, _) = link.serve(&handshake, b"");
    assert_eq!(chunk, ChunkMessage::Handshake { counter: 0 });

    let ping = link.client.ping().unwrap();
    let (chunk, _) = link.serve(&ping, b"");
    assert_eq!(chunk, ChunkMessage::Ping { counter: 1 });
}
