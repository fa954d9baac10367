//! UDP transports for the tunnel
//!
//! Thin `tokio` wrappers that own a UDP socket and drive a
//! [`ClientSession`] or [`ServerSession`] with it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dnstun::transport::DnsTunnelClient;
//!
//! # async fn run() -> dnstun::dns::Result<()> {
//! let mut client = DnsTunnelClient::connect("ns.example.com", 0, "t.example.com").await?;
//! client.handshake().await?;
//! client.send_payload(b"hello").await?;
//!
//! while client.is_sending() {
//!     if let Some(downstream) = client.recv().await? {
//!         println!("{} bytes from server", downstream.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::chunk::OutboundQuery;
use crate::client::ClientSession;
use crate::dns::{DnsError, QueryRecord, Result};
use crate::server::{InboundQuery, ServerSession};
use log::{debug, info};
use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::net::{lookup_host, UdpSocket};

/// Port DNS servers listen on
pub const DNS_PORT: u16 = 53;

/// Large enough for any UDP datagram
const RECV_BUF_LEN: usize = 64 * 1024;

/// Resolve `server` to a socket address.
///
/// Accepts `ip`, `ip:port`, `host` or `host:port`; port 53 when omitted.
/// IPv4 addresses are preferred.
pub async fn resolve_server(server: &str) -> Result<SocketAddr> {
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = server.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DNS_PORT));
    }

    let addrs: Vec<SocketAddr> = if server.contains(':') {
        lookup_host(server).await?.collect()
    } else {
        lookup_host((server, DNS_PORT)).await?.collect()
    };

    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| {
            DnsError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Could not resolve name {}", server),
            ))
        })
}

/// Client end of the tunnel
pub struct DnsTunnelClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    session: ClientSession,
}

impl DnsTunnelClient {
    /// Bind a local socket on `local_port` (0 for any) and aim it at `server`
    pub async fn connect(server: &str, local_port: u16, topdomain: &str) -> Result<Self> {
        let session = ClientSession::new(topdomain)?;
        let server_addr = resolve_server(server).await?;

        // Match the server's address family and loopback-ness
        let local_ip: IpAddr = match (server_addr.is_ipv4(), server_addr.ip().is_loopback()) {
            (true, true) => [127u8, 0, 0, 1].into(),
            (true, false) => [0u8; 4].into(),
            (false, true) => [0u16, 0, 0, 0, 0, 0, 0, 1].into(),
            (false, false) => [0u16; 8].into(),
        };

        let socket = UdpSocket::bind(SocketAddr::new(local_ip, local_port)).await?;
        socket.connect(server_addr).await?;

        info!(
            "DNS tunnel client bound to {} → server {} (topdomain {}, {} bytes per chunk)",
            socket.local_addr()?,
            server_addr,
            session.topdomain(),
            session.chunk_capacity()
        );

        Ok(Self {
            socket,
            server_addr,
            session,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    pub fn is_sending(&self) -> bool {
        self.session.is_sending()
    }

    /// Start uploading `data`, replacing any unfinished payload
    pub async fn send_payload(&mut self, data: &[u8]) -> Result<()> {
        if let Some(query) = self.session.send_payload(data)? {
            self.transmit(&query).await?;
        }
        Ok(())
    }

    /// Send a keepalive, abandoning any unfinished payload
    pub async fn ping(&mut self) -> Result<()> {
        let query = self.session.ping()?;
        self.transmit(&query).await
    }

    /// Send the payload the last ping abandoned again, from its first byte.
    /// Returns false when there was nothing to resend.
    pub async fn resend_abandoned(&mut self) -> Result<bool> {
        match self.session.resend_abandoned()? {
            Some(query) => {
                self.transmit(&query).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn handshake(&mut self) -> Result<()> {
        let query = self.session.handshake()?;
        self.transmit(&query).await
    }

    /// Wait for the next datagram from the server
    pub async fn recv_datagram(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.socket.recv(buf).await?)
    }

    /// Process a datagram from the server.
    ///
    /// Sends the next chunk when the datagram acknowledges one and returns
    /// the downstream payload it carried, if any. Malformed datagrams are
    /// dropped.
    pub async fn handle_datagram(&mut self, datagram: &[u8]) -> Result<Option<Vec<u8>>> {
        let outcome = match self.session.handle_response(datagram) {
            Ok(outcome) => outcome,
            Err(e) if e.is_malformed() => {
                debug!("Dropping response from {}: {}", self.server_addr, e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if let Some(query) = outcome.next_query {
            self.transmit(&query).await?;
        }
        Ok(outcome.downstream)
    }

    /// Receive and process one datagram
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        let n = self.recv_datagram(&mut buf).await?;
        self.handle_datagram(&buf[..n]).await
    }

    async fn transmit(&self, query: &OutboundQuery) -> Result<()> {
        debug!(
            "Sending query {} ({} bytes) to {}",
            query.id,
            query.message.len(),
            self.server_addr
        );
        self.socket.send(&query.message).await?;
        Ok(())
    }
}

/// Server end of the tunnel
pub struct DnsTunnelServer {
    socket: UdpSocket,
    session: ServerSession,
}

impl DnsTunnelServer {
    /// Listen for tunnel queries under `topdomain`
    pub async fn bind(listen_addr: SocketAddr, topdomain: &str) -> Result<Self> {
        let session = ServerSession::new(topdomain)?;
        let socket = UdpSocket::bind(listen_addr).await?;

        info!(
            "DNS tunnel server listening on UDP {} for *.{}",
            socket.local_addr()?,
            session.topdomain()
        );

        Ok(Self { socket, session })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn session(&self) -> &ServerSession {
        &self.session
    }

    /// Wait for the next datagram and its sender
    pub async fn recv_datagram(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buf).await?)
    }

    /// Decode a datagram from `from`; malformed ones are dropped
    pub fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) -> Option<InboundQuery> {
        match self.session.handle_query(datagram, from) {
            Ok(inbound) => Some(inbound),
            Err(e) => {
                debug!("Dropping query from {}: {}", from, e);
                None
            }
        }
    }

    /// Receive one datagram and decode it
    pub async fn recv_query(&self) -> Result<Option<InboundQuery>> {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        let (n, from) = self.recv_datagram(&mut buf).await?;
        Ok(self.handle_datagram(&buf[..n], from))
    }

    /// Answer `record` with `payload`, sent back to where the query came from
    pub async fn send_response(&self, record: &mut QueryRecord, payload: &[u8]) -> Result<()> {
        let id = record.id();
        let response = self.session.respond(record, payload)?;

        debug!(
            "Answering query {:?} to {} with {} bytes",
            id,
            record.from,
            payload.len()
        );
        self.socket.send_to(&response, record.from).await?;
        Ok(())
    }
}
