//! dnstun: IP-over-DNS tunnel
//!
//! Carries an opaque byte stream through DNS resolution infrastructure.
//! The client sends data upstream hex-encoded in query names under a
//! delegated suffix domain; the server answers each query with a NULL
//! record whose data is the downstream payload.
//!
//! ## Quick Start
//!
//! ```rust
//! use dnstun::{ChunkMessage, ClientSession, ServerSession};
//!
//! let mut client = ClientSession::new("t.example.com").unwrap();
//! let server = ServerSession::new("t.example.com").unwrap();
//!
//! // Client: first chunk of a payload
//! let query = client.send_payload(b"hello").unwrap().unwrap();
//!
//! // Server: decode it and answer
//! let peer = "192.0.2.1:5353".parse().unwrap();
//! let mut inbound = server.handle_query(&query.message, peer).unwrap();
//! assert_eq!(
//!     inbound.chunk,
//!     ChunkMessage::Data { last: true, bytes: b"hello".to_vec() }
//! );
//! let response = server.respond(&mut inbound.record, b"world").unwrap();
//!
//! // Client: the response acknowledges the chunk and carries data back
//! let outcome = client.handle_response(&response).unwrap();
//! assert!(outcome.acked);
//! assert_eq!(outcome.downstream, Some(b"world".to_vec()));
//! assert!(!client.is_sending());
//! ```
//!
//! ## Architecture
//!
//! ```text
//!   payload ──▶ ClientSession ──▶ ChunkEncoder ──▶ NULL query  ─┐
//!                    ▲                                          │ resolvers
//!                    └──── ack + downstream ◀── NULL answer ◀───┤
//!                                                               ▼
//!   payload ◀── PayloadAssembler ◀── ChunkDecoder ◀── ServerSession
//! ```

pub mod chunk;
pub mod client;
pub mod config;
pub mod dns;
pub mod server;
pub mod transport;

// Re-export core types
pub use chunk::{ChunkDecoder, ChunkEncoder, ChunkMessage, OutboundQuery};
pub use client::{ClientSession, ClientState, ResponseOutcome};
pub use config::TunnelConfig;
pub use dns::{DnsError, QueryRecord};
pub use server::{InboundQuery, PayloadAssembler, ServerSession};
pub use transport::{DnsTunnelClient, DnsTunnelServer};
