//! Client transfer state machine
//!
//! Stop-and-wait upload of one payload at a time. Each chunk travels as a
//! query; the response carrying the same transaction id acknowledges it
//! and releases the next chunk. The session never touches a socket: every
//! operation hands back the query to transmit, which keeps it usable from
//! any I/O loop (see [`crate::transport::DnsTunnelClient`]).
//!
//! ```text
//!            send_payload
//!   Idle ───────────────────▶ Sending ──┐ ack, more left
//!    ▲                          │  ▲    │ (next chunk)
//!    │   last ack / ping        │  └────┘
//!    └──────────────────────────┘
//! ```

use crate::chunk::{ChunkEncoder, ChunkMessage, OutboundQuery, MAX_PAYLOAD_LEN};
use crate::dns::{parse_response, DnsError, Result, T_NULL};
use log::{debug, trace};

/// Downstream payloads of this length or less carry nothing
const MIN_DOWNSTREAM_LEN: usize = 2;

/// Transfer state of a client session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No payload pending
    Idle,
    /// A payload is being sent, one chunk in flight
    Sending,
}

/// The single payload being uploaded
#[derive(Debug)]
struct PendingPayload {
    data: Vec<u8>,
    /// Bytes acknowledged so far
    cursor: usize,
    /// Size of the chunk currently in flight
    last_len: usize,
}

/// What a response did to the session
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ResponseOutcome {
    /// The response acknowledged the chunk in flight
    pub acked: bool,
    /// Next chunk to transmit, if the payload is not finished
    pub next_query: Option<OutboundQuery>,
    /// NULL record data for the layer above
    pub downstream: Option<Vec<u8>>,
}

/// Client side of a tunnel session
#[derive(Debug)]
pub struct ClientSession {
    encoder: ChunkEncoder,
    pending: Option<PendingPayload>,
    /// Payload dropped by the last ping, kept for a resend
    abandoned: Option<Vec<u8>>,
    /// Id of the last data chunk sent
    chunk_id: u16,
    /// Id of the last ping/handshake sent
    ping_id: u16,
}

impl ClientSession {
    /// Create a session for the given suffix domain
    pub fn new(topdomain: &str) -> Result<Self> {
        Ok(Self {
            encoder: ChunkEncoder::new(topdomain)?,
            pending: None,
            abandoned: None,
            chunk_id: 0,
            ping_id: 0,
        })
    }

    pub fn state(&self) -> ClientState {
        if self.pending.is_some() {
            ClientState::Sending
        } else {
            ClientState::Idle
        }
    }

    pub fn is_sending(&self) -> bool {
        self.pending.is_some()
    }

    /// Bytes of the pending payload acknowledged so far
    pub fn acked_len(&self) -> usize {
        self.pending.as_ref().map_or(0, |p| p.cursor)
    }

    /// Total length of the pending payload
    pub fn pending_len(&self) -> usize {
        self.pending.as_ref().map_or(0, |p| p.data.len())
    }

    /// Length of the payload a ping abandoned, 0 if none
    pub fn abandoned_len(&self) -> usize {
        self.abandoned.as_ref().map_or(0, Vec::len)
    }

    pub fn has_abandoned(&self) -> bool {
        self.abandoned.is_some()
    }

    /// Data bytes carried per chunk
    pub fn chunk_capacity(&self) -> usize {
        self.encoder.capacity()
    }

    pub fn topdomain(&self) -> &str {
        self.encoder.suffix()
    }

    /// Start sending a new payload, replacing any unfinished or abandoned
    /// one.
    ///
    /// Returns the first chunk's query. Empty payloads are ignored.
    pub fn send_payload(&mut self, data: &[u8]) -> Result<Option<OutboundQuery>> {
        if data.len() > MAX_PAYLOAD_LEN {
            return Err(DnsError::PayloadTooLarge(data.len(), MAX_PAYLOAD_LEN));
        }
        if data.is_empty() {
            return Ok(None);
        }

        if let Some(old) = &self.pending {
            debug!(
                "New payload preempts transfer at {}/{} bytes",
                old.cursor,
                old.data.len()
            );
        }

        self.abandoned = None;
        self.pending = Some(PendingPayload {
            data: data.to_vec(),
            cursor: 0,
            last_len: 0,
        });

        self.next_chunk()
    }

    /// Feed a response received from the server.
    ///
    /// A matching transaction id acknowledges the chunk in flight; the
    /// outcome then carries the next chunk, or none once the payload is
    /// complete. Other ids leave the transfer alone.
    pub fn handle_response(&mut self, message: &[u8]) -> Result<ResponseOutcome> {
        let parsed = parse_response(message)?;
        let mut outcome = ResponseOutcome::default();

        if let Some(pending) = self.pending.as_mut() {
            if parsed.id == self.chunk_id {
                outcome.acked = true;
                pending.cursor += pending.last_len;
                pending.last_len = 0;

                if pending.cursor >= pending.data.len() {
                    debug!("Payload of {} bytes delivered", pending.data.len());
                    self.pending = None;
                } else {
                    trace!("Ack {} at {}/{}", parsed.id, pending.cursor, pending.data.len());
                    outcome.next_query = self.next_chunk()?;
                }
            }
        }

        if parsed.record_type == Some(T_NULL) && parsed.data.len() > MIN_DOWNSTREAM_LEN {
            outcome.downstream = Some(parsed.data);
        }

        Ok(outcome)
    }

    /// Keepalive query. Abandons any unfinished payload, which stays
    /// available to [`resend_abandoned`](Self::resend_abandoned).
    pub fn ping(&mut self) -> Result<OutboundQuery> {
        if let Some(old) = self.pending.take() {
            debug!(
                "Ping abandons transfer at {}/{} bytes",
                old.cursor,
                old.data.len()
            );
            self.abandoned = Some(old.data);
        }

        let counter = self.ping_id;
        self.ping_id = self.ping_id.wrapping_add(1);
        self.encoder
            .encode_query(self.ping_id, &ChunkMessage::Ping { counter })
    }

    /// Start the payload abandoned by the last ping over from its first
    /// byte. Returns `None` when nothing was abandoned.
    pub fn resend_abandoned(&mut self) -> Result<Option<OutboundQuery>> {
        match self.abandoned.take() {
            Some(data) => self.send_payload(&data),
            None => Ok(None),
        }
    }

    /// Handshake query. Leaves any pending payload alone.
    pub fn handshake(&mut self) -> Result<OutboundQuery> {
        let counter = self.ping_id;
        self.ping_id = self.ping_id.wrapping_add(1);
        self.encoder
            .encode_query(self.ping_id, &ChunkMessage::Handshake { counter })
    }

    /// Encode the chunk at the cursor under a fresh data id
    fn next_chunk(&mut self) -> Result<Option<OutboundQuery>> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(None);
        };

        let chunk = self.encoder.next_data_chunk(&pending.data[pending.cursor..]);
        self.chunk_id = self.chunk_id.wrapping_add(1);
        let query = self.encoder.encode_query(self.chunk_id, &chunk)?;

        if let ChunkMessage::Data { bytes, .. } = &chunk {
            pending.last_len = bytes.len();
        }
        Ok(Some(query))
    }
}
