use std::env;
use std::net::IpAddr;
use std::process;
use std::sync::Arc;
use std::thread;

use getopts::Options;
use log::LevelFilter;
use simple_logger::SimpleLogger;

use wgsd::discovery::config::{build_zones, load_zones, SelfConfig, ZoneConfig};
use wgsd::discovery::resolver::WgsdHandler;
use wgsd::discovery::zone::Zones;
use wgsd::dns::context::ServerContext;
use wgsd::dns::server::{DnsServer, DnsTcpServer, DnsUdpServer};
use wgsd::wireguard::uapi::{UapiClient, DEFAULT_SOCKET_DIR};

const DEFAULT_PORT: u16 = 53;
const DEFAULT_THREADS: usize = 20;

fn print_usage(program: &str, opts: Options) {
    let brief = format!(
        "Usage: {} (--config FILE | --zone NAME --device DEV) [options]",
        program
    );
    print!("{}", opts.usage(&brief));
}

fn fail(message: String) -> ! {
    log::error!("{}", message);
    process::exit(1);
}

/// Zones from `--config`, or the single zone described on the command line
fn zones_from_args(matches: &getopts::Matches) -> Result<Zones, String> {
    if let Some(path) = matches.opt_str("config") {
        return load_zones(&path).map_err(|e| e.to_string());
    }

    let (name, device) = match (matches.opt_str("zone"), matches.opt_str("device")) {
        (Some(name), Some(device)) => (name, device),
        _ => return Err("either --config or both --zone and --device are required".into()),
    };

    let self_endpoint = matches.opt_str("self-endpoint");
    let self_allowed_ips: Vec<String> = matches
        .opt_str("self-allowed-ips")
        .map(|list| {
            list.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let serve_self = matches.opt_present("serve-self")
        || self_endpoint.is_some()
        || !self_allowed_ips.is_empty();

    let config = ZoneConfig {
        name,
        device,
        encoder: matches.opt_str("encoder"),
        serve_self: if serve_self {
            Some(SelfConfig {
                endpoint: self_endpoint,
                allowed_ips: self_allowed_ips,
            })
        } else {
            None
        },
    };

    build_zones(&[config]).map_err(|e| e.to_string())
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt("c", "config", "Zone configuration file", "FILE");
    opts.optopt("z", "zone", "Serve a single zone", "NAME");
    opts.optopt("d", "device", "WireGuard device backing --zone", "DEVICE");
    opts.optopt(
        "e",
        "encoder",
        "Public key label encoder for --zone (b32, hex[:N], sha1[:N])",
        "ENCODER",
    );
    opts.optflag("", "serve-self", "Publish the local device as a peer of --zone");
    opts.optopt(
        "",
        "self-endpoint",
        "Endpoint published for the local device",
        "ADDR:PORT",
    );
    opts.optopt(
        "",
        "self-allowed-ips",
        "Comma-separated allowed IPs published for the local device",
        "CIDRS",
    );
    opts.optopt("l", "listen", "Address to listen on", "ADDR");
    opts.optopt("p", "port", "Port to listen on", "PORT");
    opts.optopt("t", "threads", "Worker threads per transport", "N");
    opts.optflag("", "no-udp", "Disable the UDP listener");
    opts.optflag("", "no-tcp", "Disable the TCP listener");
    opts.optopt(
        "",
        "uapi-dir",
        "Directory holding the WireGuard control sockets",
        "DIRECTORY",
    );
    opts.optflag("v", "verbose", "Log every query");

    let opt_matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            print_usage(&program, opts);
            process::exit(2);
        }
    };

    if opt_matches.opt_present("h") {
        print_usage(&program, opts);
        return;
    }

    let level = if opt_matches.opt_present("v") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("Failed to initialize logger: {}", e);
    }

    let zones = zones_from_args(&opt_matches).unwrap_or_else(|e| fail(e));

    let listen_addr = match opt_matches.opt_str("listen") {
        Some(addr) => addr
            .parse::<IpAddr>()
            .unwrap_or_else(|_| fail(format!("invalid listen address {:?}", addr))),
        None => IpAddr::from([0, 0, 0, 0]),
    };
    let port = match opt_matches.opt_str("port") {
        Some(port) => port
            .parse::<u16>()
            .unwrap_or_else(|_| fail(format!("invalid port {:?}", port))),
        None => DEFAULT_PORT,
    };
    let threads = match opt_matches.opt_str("threads") {
        Some(n) => match n.parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => fail(format!("invalid thread count {:?}", n)),
        },
        None => DEFAULT_THREADS,
    };
    let uapi_dir = opt_matches
        .opt_str("uapi-dir")
        .unwrap_or_else(|| DEFAULT_SOCKET_DIR.to_string());

    for zone in zones.iter() {
        log::info!(
            "Serving zone {} from device {} (encoder {}, self {})",
            zone.name,
            zone.device,
            zone.encoder,
            if zone.serve_self { "on" } else { "off" }
        );
    }

    let mut context = ServerContext::new(listen_addr, port);
    context.enable_udp = !opt_matches.opt_present("no-udp");
    context.enable_tcp = !opt_matches.opt_present("no-tcp");
    context.add_handler(Box::new(WgsdHandler::new(zones, UapiClient::new(uapi_dir))));

    if !context.enable_udp && !context.enable_tcp {
        fail("both listeners are disabled".into());
    }

    let context = Arc::new(context);

    log::info!("Listening on {}:{}", context.listen_addr, context.dns_port);

    if context.enable_udp {
        let udp_server = DnsUdpServer::new(context.clone(), threads);
        if let Err(e) = udp_server.run_server() {
            fail(format!("Failed to bind UDP listener: {}", e));
        }
    }

    if context.enable_tcp {
        let tcp_server = DnsTcpServer::new(context.clone(), threads);
        if let Err(e) = tcp_server.run_server() {
            fail(format!("Failed to bind TCP listener: {}", e));
        }
    }

    loop {
        thread::park();
    }
}
