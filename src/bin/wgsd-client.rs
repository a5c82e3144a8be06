//! WGSD client
//!
//! Looks up the peers published under a zone and configures their endpoints
//! on a local WireGuard device, once.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

use wgsd::discovery::encoder::Encoder;
use wgsd::discovery::walker::{WalkMode, Walker};
use wgsd::dns::client::DnsNetworkClient;
use wgsd::wireguard::uapi::{UapiClient, DEFAULT_SOCKET_DIR};

/// Configure WireGuard peer endpoints from DNS-SD records
#[derive(Parser)]
#[command(name = "wgsd-client")]
#[command(version)]
#[command(about = "WireGuard peer discovery client", long_about = None)]
struct Cli {
    /// WireGuard device to configure
    #[arg(short, long)]
    device: String,

    /// Zone the peers are published under
    #[arg(short, long)]
    zone: String,

    /// DNS server to query
    #[arg(long, value_name = "IP:PORT")]
    dns: SocketAddr,

    /// Resolve only this peer, by instance name or base64 public key
    #[arg(short, long = "peer", value_name = "NAME|KEY")]
    peers: Vec<String>,

    /// Refresh the endpoints of peers the device already has
    #[arg(long, conflicts_with = "peers")]
    known_peers: bool,

    /// Label encoder used by the zone (b32, hex[:N], sha1[:N])
    #[arg(short, long, default_value = "b32")]
    encoder: Encoder,

    /// Time allowed for each DNS exchange
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,

    /// Directory holding the WireGuard control sockets
    #[arg(long, default_value = DEFAULT_SOCKET_DIR)]
    uapi_dir: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("Failed to initialize logger: {}", e);
    }

    let mode = if cli.known_peers {
        WalkMode::KnownPeers
    } else if !cli.peers.is_empty() {
        WalkMode::Direct(cli.peers)
    } else {
        WalkMode::Enumerate
    };

    let client = DnsNetworkClient::with_timeout(cli.dns, Duration::from_millis(cli.timeout_ms));
    let walker = Arc::new(
        Walker::new(client, UapiClient::new(cli.uapi_dir), &cli.device, &cli.zone)
            .with_encoder(cli.encoder),
    );

    let cancel = CancellationToken::new();
    let mut task = {
        let walker = walker.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { walker.run(&mode, &cancel).await })
    };

    let joined = tokio::select! {
        res = &mut task => res,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted, stopping");
            cancel.cancel();
            task.await
        }
    };

    match joined {
        Ok(Ok(summary)) => log::info!(
            "{} target(s): {} applied, {} self, {} failed{}",
            summary.targets,
            summary.applied,
            summary.skipped_self,
            summary.failed,
            if summary.cancelled { " (cancelled)" } else { "" }
        ),
        Ok(Err(e)) => {
            log::error!("{}", e);
            process::exit(1);
        }
        Err(e) => {
            log::error!("walk task failed: {}", e);
            process::exit(1);
        }
    }
}
