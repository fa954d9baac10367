//! Server query handling
//!
//! [`ServerSession`] turns inbound queries into a [`QueryRecord`] plus the
//! [`ChunkMessage`] encoded in the name, and answers each record exactly
//! once. [`PayloadAssembler`] glues data chunks back into payloads.

use crate::chunk::{ChunkDecoder, ChunkMessage, MAX_PAYLOAD_LEN};
use crate::dns::{parse_query, QueryRecord, Result};
use log::{debug, trace, warn};
use std::net::SocketAddr;

/// A decoded inbound query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundQuery {
    /// Needed to answer the query
    pub record: QueryRecord,
    /// What the client sent
    pub chunk: ChunkMessage,
}

/// Server side of a tunnel session
#[derive(Debug, Clone)]
pub struct ServerSession {
    decoder: ChunkDecoder,
}

impl ServerSession {
    /// Create a session serving the given suffix domain
    pub fn new(topdomain: &str) -> Result<Self> {
        Ok(Self {
            decoder: ChunkDecoder::new(topdomain)?,
        })
    }

    pub fn topdomain(&self) -> &str {
        self.decoder.suffix()
    }

    /// Parse a query from `from` and decode the chunk in its name
    pub fn handle_query(&self, message: &[u8], from: SocketAddr) -> Result<InboundQuery> {
        let record = parse_query(message, from)?;
        let chunk = self.decoder.decode(&record.name)?;

        trace!("Query {:?} from {}: {:?}", record.id(), from, chunk);
        Ok(InboundQuery { record, chunk })
    }

    /// Build the response to `record`, which can not be answered again
    pub fn respond(&self, record: &mut QueryRecord, payload: &[u8]) -> Result<Vec<u8>> {
        record.answer(payload)
    }
}

/// Reassembles payloads from the data chunks of one client
#[derive(Debug)]
pub struct PayloadAssembler {
    buf: Vec<u8>,
    last_id: Option<u16>,
    max_len: usize,
}

impl Default for PayloadAssembler {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_LEN)
    }
}

impl PayloadAssembler {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            last_id: None,
            max_len,
        }
    }

    /// Bytes collected towards the current payload
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Add the chunk received under transaction `id`.
    ///
    /// Returns the payload once its last chunk arrives. A chunk repeating
    /// the previous id is a resolver retry and is skipped. A ping drops any
    /// partial payload, since the client abandons it when pinging; a
    /// handshake leaves it alone.
    pub fn push(&mut self, id: u16, chunk: &ChunkMessage) -> Option<Vec<u8>> {
        match chunk {
            ChunkMessage::Data { last, bytes } => {
                if self.last_id == Some(id) {
                    trace!("Skipping repeated chunk {}", id);
                    return None;
                }
                self.last_id = Some(id);

                if self.buf.len() + bytes.len() > self.max_len {
                    warn!(
                        "Dropping payload exceeding {} bytes ({} buffered)",
                        self.max_len,
                        self.buf.len()
                    );
                    self.buf.clear();
                    return None;
                }
                self.buf.extend_from_slice(bytes);

                if *last {
                    Some(std::mem::take(&mut self.buf))
                } else {
                    None
                }
            }
            ChunkMessage::Ping { .. } => {
                if !self.buf.is_empty() {
                    debug!("Discarding {} bytes of abandoned payload", self.buf.len());
                    self.buf.clear();
                }
                self.last_id = None;
                None
            }
            // The client keeps its transfer going across a handshake
            ChunkMessage::Handshake { .. } => None,
        }
    }
}
