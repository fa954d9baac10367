//! dnstun - IP-over-DNS tunnel
//!
//! Moves a byte stream between two hosts through DNS queries and
//! responses. Standard input is sent through the tunnel and whatever
//! arrives from the other side is written to standard output.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dnstun::chunk::MAX_PAYLOAD_LEN;
use dnstun::server::PayloadAssembler;
use dnstun::transport::{DnsTunnelClient, DnsTunnelServer};
use dnstun::TunnelConfig;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Downstream bytes placed in one response
const RESPONSE_PAYLOAD_LEN: usize = 1024;

/// Datagram buffer size
const DATAGRAM_LEN: usize = 64 * 1024;

#[derive(Parser)]
#[command(name = "dnstun")]
#[command(version)]
#[command(long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_DATE"),
    ")"
))]
#[command(about = "Tunnel a byte stream through DNS queries and responses", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the client end: stdin goes up as queries, responses come down
    Client {
        /// DNS server to send queries to (host, host:port or ip[:port])
        #[arg(short, long)]
        server: Option<String>,

        /// Suffix domain delegated to the tunnel server
        #[arg(short, long, env = "DNSTUN_TOPDOMAIN")]
        topdomain: Option<String>,

        /// Local UDP port
        #[arg(short, long)]
        local_port: Option<u16>,

        /// Silence after which a keepalive ping is sent (e.g. "1s", "500ms")
        #[arg(short, long, value_parser = humantime::parse_duration)]
        ping_interval: Option<Duration>,
    },

    /// Run the server end: answers tunnel queries for the topdomain
    Server {
        /// Listen address
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Suffix domain delegated to this server
        #[arg(short, long, env = "DNSTUN_TOPDOMAIN")]
        topdomain: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let mut config = if let Some(path) = &cli.config {
        TunnelConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?
    } else {
        TunnelConfig::default()
    };

    match cli.command {
        Commands::Client {
            server,
            topdomain,
            local_port,
            ping_interval,
        } => {
            if let Some(topdomain) = topdomain {
                config.topdomain = topdomain;
            }
            if server.is_some() {
                config.client.server = server;
            }
            if let Some(port) = local_port {
                config.client.local_port = port;
            }
            if let Some(interval) = ping_interval {
                config.client.ping_interval = interval;
            }
            config.validate().map_err(anyhow::Error::msg)?;
            run_client(&config).await?;
        }
        Commands::Server { bind, topdomain } => {
            if let Some(topdomain) = topdomain {
                config.topdomain = topdomain;
            }
            if let Some(addr) = bind {
                config.server.listen_addr = addr;
            }
            config.validate().map_err(anyhow::Error::msg)?;
            run_server(&config).await?;
        }
    }

    Ok(())
}

async fn run_client(config: &TunnelConfig) -> Result<()> {
    let Some(server) = config.client.server.as_deref() else {
        bail!("No DNS server given (use --server or [client] server in the config)");
    };

    let mut client = DnsTunnelClient::connect(server, config.client.local_port, &config.topdomain)
        .await
        .with_context(|| format!("Failed to set up tunnel to {}", server))?;
    info!("Sending queries to {}", client.server_addr());

    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();

    // Handshake ids overlap data ids, so let its answer arrive before data goes up
    if let Err(e) = client.handshake().await {
        warn!("Handshake failed: {}", e);
    }
    match tokio::time::timeout(config.client.ping_interval, client.recv()).await {
        Ok(Ok(Some(payload))) => {
            stdout.write_all(&payload).await?;
            stdout.flush().await?;
        }
        Ok(Ok(None)) => debug!("Handshake answered"),
        Ok(Err(e)) => warn!("Handshake failed: {}", e),
        Err(_) => warn!("No answer to handshake within {:?}", config.client.ping_interval),
    }

    let mut input = vec![0u8; MAX_PAYLOAD_LEN];
    let mut datagram = vec![0u8; DATAGRAM_LEN];
    let mut stdin_open = true;

    loop {
        // Only take new input once the previous payload went through,
        // a new payload would preempt it
        let can_read =
            stdin_open && !client.is_sending() && !client.session().has_abandoned();

        tokio::select! {
            received = client.recv_datagram(&mut datagram) => {
                let n = match received {
                    Ok(n) => n,
                    Err(e) => {
                        warn!("Receive failed: {}", e);
                        continue;
                    }
                };
                match client.handle_datagram(&datagram[..n]).await {
                    Ok(Some(payload)) => {
                        stdout.write_all(&payload).await?;
                        stdout.flush().await?;
                    }
                    Ok(None) => {}
                    // The next ping tick recovers the stalled chunk
                    Err(e) => warn!("Failed to send next chunk: {}", e),
                }
            }
            read = stdin.read(&mut input), if can_read => {
                let n = read.context("Failed to read stdin")?;
                if n == 0 {
                    info!("Input closed");
                    stdin_open = false;
                } else if let Err(e) = client.send_payload(&input[..n]).await {
                    warn!("Failed to send payload of {} bytes: {}", n, e);
                }
            }
            _ = tokio::time::sleep(config.client.ping_interval) => {
                if client.is_sending() {
                    // Stalled transfer: the ping drops it, the next tick resends it
                    warn!(
                        "No answer for {:?}, restarting payload at {}/{} bytes",
                        config.client.ping_interval,
                        client.session().acked_len(),
                        client.session().pending_len()
                    );
                } else if client.session().has_abandoned() {
                    let len = client.session().abandoned_len();
                    match client.resend_abandoned().await {
                        Ok(_) => info!("Resending payload of {} bytes", len),
                        Err(e) => warn!("Resend of {} bytes failed: {}", len, e),
                    }
                    continue;
                } else {
                    debug!("No traffic for {:?}, pinging", config.client.ping_interval);
                }

                if let Err(e) = client.ping().await {
                    warn!("Ping failed: {}", e);
                }
            }
        }
    }
}

async fn run_server(config: &TunnelConfig) -> Result<()> {
    let server = DnsTunnelServer::bind(config.server.listen_addr, &config.topdomain)
        .await
        .with_context(|| format!("Failed to listen on {}", config.server.listen_addr))?;

    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut input = vec![0u8; RESPONSE_PAYLOAD_LEN];
    let mut datagram = vec![0u8; DATAGRAM_LEN];
    let mut stdin_open = true;

    let mut assembler = PayloadAssembler::default();
    let mut outbound: VecDeque<Vec<u8>> = VecDeque::new();

    loop {
        tokio::select! {
            received = server.recv_datagram(&mut datagram) => {
                let (n, from) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("Receive failed: {}", e);
                        continue;
                    }
                };
                let Some(mut inbound) = server.handle_datagram(&datagram[..n], from) else {
                    continue;
                };

                let id = inbound.record.id().unwrap_or_default();
                if let Some(payload) = assembler.push(id, &inbound.chunk) {
                    debug!("Payload of {} bytes from {}", payload.len(), from);
                    stdout.write_all(&payload).await?;
                    stdout.flush().await?;
                }

                let reply = outbound.pop_front().unwrap_or_default();
                if let Err(e) = server.send_response(&mut inbound.record, &reply).await {
                    warn!("Failed to answer {}: {}", from, e);
                    if !reply.is_empty() {
                        outbound.push_front(reply);
                    }
                }
            }
            read = stdin.read(&mut input), if stdin_open => {
                let n = read.context("Failed to read stdin")?;
                if n == 0 {
                    info!("Input closed");
                    stdin_open = false;
                } else {
                    outbound.push_back(input[..n].to_vec());
                }
            }
        }
    }
}
