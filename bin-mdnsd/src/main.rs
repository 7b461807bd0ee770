use bytes::BytesMut;
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use mdns_responder::clock::SystemClock;
use mdns_responder::engine::Engine;
use mdns_responder::publish::RecordId;
use mdns_responder::{MDNS_GROUP, MDNS_PORT};
use mdns_types::protocol::types::{Message, RecordTypeWithData, MAX_PACKET_LEN};

mod conf;

/// Create the mDNS socket: bound to the mDNS port, joined to the
/// multicast group on every requested interface (or the default one).
async fn multicast_socket(interfaces: &[Ipv4Addr], ttl: u32) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, MDNS_PORT)).await?;

    if interfaces.is_empty() {
        socket.join_multicast_v4(MDNS_GROUP, Ipv4Addr::UNSPECIFIED)?;
    } else {
        for interface in interfaces {
            socket.join_multicast_v4(MDNS_GROUP, *interface)?;
        }
    }

    socket.set_multicast_ttl_v4(ttl)?;
    socket.set_multicast_loop_v4(false)?;
    Ok(socket)
}

/// Best-effort guess of the address to publish in A records when none
/// is configured: the source address of a route towards the multicast
/// group.
fn guess_address() -> Option<Ipv4Addr> {
    let probe = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    probe.connect((MDNS_GROUP, MDNS_PORT)).ok()?;
    match probe.local_addr().ok()? {
        SocketAddr::V4(addr) => Some(*addr.ip()),
        SocketAddr::V6(_) => None,
    }
}

fn default_hostname() -> String {
    let hostname = gethostname::gethostname();
    let hostname = hostname.to_string_lossy();
    // strip any domain part; mDNS names live under .local.
    hostname
        .split('.')
        .next()
        .filter(|label| !label.is_empty())
        .unwrap_or("default")
        .to_ascii_lowercase()
}

fn publish_all(
    engine: &mut Engine<SystemClock>,
    services: &PathBuf,
    hostname: &str,
    address: Ipv4Addr,
) -> Vec<RecordId> {
    let files = match conf::service_files(services) {
        Ok(files) => files,
        Err(error) => {
            tracing::error!(path = %services.display(), %error, "cannot read services directory");
            process::exit(1);
        }
    };

    if files.is_empty() {
        tracing::warn!(path = %services.display(), "no .service files found");
    }

    let mut records = Vec::new();
    for path in files {
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "cannot read service file");
                continue;
            }
        };

        let config = conf::ServiceConfig::parse(&text);
        match conf::publish_service(engine, &config, hostname, address) {
            Ok(mut rs) => {
                tracing::info!(path = %path.display(), records = %rs.len(), "published service");
                records.append(&mut rs);
            }
            Err(error) => tracing::warn!(path = %path.display(), %error, "bad service file"),
        }
    }

    records
}

fn log_received(rr: &mdns_types::protocol::types::ResourceRecord) {
    match &rr.rtype_with_data {
        RecordTypeWithData::A { address } => {
            tracing::debug!(name = %rr.name, %address, "got A");
        }
        RecordTypeWithData::AAAA { address } => {
            tracing::debug!(name = %rr.name, %address, "got AAAA");
        }
        RecordTypeWithData::PTR { ptrdname } => {
            tracing::debug!(name = %rr.name, target = %ptrdname, "got PTR");
        }
        RecordTypeWithData::SRV { port, target, .. } => {
            tracing::debug!(name = %rr.name, %port, %target, "got SRV");
        }
        other => tracing::debug!(name = %rr.name, rtype = %other.rtype(), "got record"),
    }
}

async fn send_pending(engine: &mut Engine<SystemClock>, socket: &UdpSocket, frame: usize) {
    while let Some(outgoing) = engine.next_packet() {
        match outgoing.message.to_octets_bounded(frame) {
            Ok(octets) => {
                if let Err(error) = socket.send_to(&octets, outgoing.dest).await {
                    tracing::debug!(dest = %outgoing.dest, %error, "send failed");
                }
            }
            Err(error) => tracing::warn!(%error, "could not serialise outgoing message"),
        }
    }
}

fn begin_logging(level: &str) {
    let directive = match level {
        "none" => "off",
        "err" => "error",
        "notice" => "warn",
        "info" => "info",
        "debug" => "debug",
        other => {
            eprintln!("unknown log level: {other}");
            process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// the doc comments for this struct turn into the CLI help text
#[derive(Debug, Parser)]
#[clap(version)]
/// A small mDNS-SD (RFC 6762/6763) responder daemon.
///
/// Services are read from whitespace-delimited .service files; each
/// one publishes the DNS-SD enumeration PTR, an instance PTR, and
/// unique SRV, TXT, and A records for this host.
///
/// mdnsd always runs in the foreground and logs to stderr; use your
/// service supervisor for daemonisation.
struct Args {
    /// Interface address to announce on; may be given more than once
    #[clap(short, long = "interface", value_parser)]
    interface: Vec<Ipv4Addr>,

    /// Address to publish in A records (default: autodetected)
    #[clap(short, long, value_parser)]
    address: Option<Ipv4Addr>,

    /// Hostname to announce services under (default: system hostname)
    #[clap(short = 'H', long, value_parser)]
    hostname: Option<String>,

    /// Log level: none, err, notice, info, debug
    #[clap(short, long, value_parser, default_value = "notice")]
    log_level: String,

    /// Run in the foreground (mdnsd never detaches; accepted for
    /// compatibility)
    #[clap(short = 'n', long)]
    foreground: bool,

    /// Log via syslog (not supported; structured stderr is used
    /// instead)
    #[clap(short = 's', long)]
    syslog: bool,

    /// TTL of outgoing multicast packets
    #[clap(short, long, value_parser, default_value_t = 255)]
    ttl: u32,

    /// Maximum size of an emitted frame, in octets
    #[clap(long, value_parser, default_value_t = 1000)]
    frame: usize,

    /// Path to the mDNS-SD .service files
    #[clap(value_parser, default_value = "/etc/mdns.d")]
    services: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    begin_logging(&args.log_level);
    if args.syslog {
        tracing::warn!("syslog output is not supported; logging to stderr");
    }

    let frame = args.frame.min(MAX_PACKET_LEN);
    let hostname = args.hostname.clone().unwrap_or_else(default_hostname);
    let address = match args.address.or_else(guess_address) {
        Some(address) => address,
        None => {
            tracing::error!("could not determine an address to publish; use --address");
            process::exit(1);
        }
    };

    tracing::info!(%MDNS_GROUP, port = %MDNS_PORT, "binding mDNS socket");
    let socket = match multicast_socket(&args.interface, args.ttl).await {
        Ok(socket) => socket,
        Err(error) => {
            tracing::error!(%error, "could not set up multicast socket");
            process::exit(1);
        }
    };

    let mut engine = Engine::new(1, frame);
    engine.on_record_received(Box::new(log_received));
    let mut records = publish_all(&mut engine, &args.services, &hostname, address);

    let mut sigint = signal(SignalKind::interrupt()).expect("signal handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("signal handler");
    let mut sighup = signal(SignalKind::hangup()).expect("signal handler");
    let mut buf = vec![0u8; MAX_PACKET_LEN];

    tracing::info!(%hostname, %address, "mdnsd starting");

    loop {
        send_pending(&mut engine, &socket, frame).await;
        let wait = engine.sleep();

        tokio::select! {
            result = socket.recv_from(&mut buf) => match result {
                Ok((size, src)) => {
                    let bytes = BytesMut::from(&buf[..size]);
                    match Message::from_octets(bytes.as_ref()) {
                        Ok(message) => engine.receive(&message, src),
                        Err(error) => tracing::debug!(%src, %error, "dropping malformed datagram"),
                    }
                }
                Err(error) => tracing::debug!(%error, "recv error"),
            },

            () = sleep(wait.max(Duration::from_millis(1))) => {}

            _ = sigint.recv() => break,
            _ = sigterm.recv() => break,

            _ = sighup.recv() => {
                tracing::info!("SIGHUP: reloading service files");
                for record in records.drain(..) {
                    engine.done(record);
                }
                send_pending(&mut engine, &socket, frame).await;
                engine.flush();
                records = publish_all(&mut engine, &args.services, &hostname, address);
            }
        }
    }

    tracing::info!("mdnsd exiting");
    engine.shutdown();
    send_pending(&mut engine, &socket, frame).await;
}
