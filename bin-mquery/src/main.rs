use bytes::BytesMut;
use clap::Parser;
use std::net::Ipv4Addr;
use std::process;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, sleep_until, Instant};
use tracing_subscriber::EnvFilter;

use mdns_responder::clock::SystemClock;
use mdns_responder::engine::Engine;
use mdns_responder::query::QueryAction;
use mdns_types::protocol::types::{
    DomainName, Message, QueryType, RecordType, RecordTypeWithData, ResourceRecord, MAX_PACKET_LEN,
};

fn format_rdata(rr: &ResourceRecord) -> String {
    match &rr.rtype_with_data {
        RecordTypeWithData::A { address } => address.to_string(),
        RecordTypeWithData::AAAA { address } => address.to_string(),
        RecordTypeWithData::NS { nsdname } => nsdname.to_string(),
        RecordTypeWithData::CNAME { cname } => cname.to_string(),
        RecordTypeWithData::PTR { ptrdname } => ptrdname.to_string(),
        RecordTypeWithData::SRV {
            priority,
            weight,
            port,
            target,
        } => format!("{priority} {weight} {port} {target}"),
        RecordTypeWithData::TXT { octets } => format_txt(octets),
        RecordTypeWithData::Unknown { octets, .. } => format!("\\# {}", octets.len()),
    }
}

/// TXT rdata is a sequence of length-prefixed character-strings.
fn format_txt(octets: &[u8]) -> String {
    let mut out = Vec::new();
    let mut rest = octets;

    while let Some((&len, tail)) = rest.split_first() {
        let len = usize::from(len).min(tail.len());
        out.push(format!("\"{}\"", String::from_utf8_lossy(&tail[..len])));
        rest = &tail[len..];
    }

    out.join(" ")
}

// the doc comments for this struct turn into the CLI help text
#[derive(Debug, Parser)]
#[clap(version)]
/// mDNS query and browse utility.
///
/// Sends the question to 224.0.0.251:5353 from an ephemeral port (a
/// "legacy" query, so responders reply to us directly) and prints
/// every answer as it arrives until the timeout elapses.
struct Args {
    /// Name to query for, e.g. `_http._tcp.local.`
    #[clap(value_parser)]
    name: DomainName,

    /// Query type to ask for
    #[clap(default_value_t = QueryType::Record(RecordType::PTR), value_parser)]
    qtype: QueryType,

    /// Interface address to send from
    #[clap(short, long, value_parser)]
    interface: Option<Ipv4Addr>,

    /// Stop after this many seconds; 0 keeps browsing until ^C
    #[clap(short, long, value_parser, default_value_t = 5)]
    timeout: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let bind_address = args.interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
    let socket = match UdpSocket::bind((bind_address, 0)).await {
        Ok(socket) => socket,
        Err(error) => {
            eprintln!("could not bind socket: {error}");
            process::exit(1);
        }
    };

    let mut engine = Engine::new(1, 1000);
    engine.query(
        &args.name,
        args.qtype,
        Some(Box::new(|rr| {
            if rr.ttl == 0 {
                println!("; expired\t{}\t{}", rr.name, rr.rtype_with_data.rtype());
            } else {
                println!(
                    "{}\t{}\t{}\t{}",
                    rr.name,
                    rr.ttl,
                    rr.rtype_with_data.rtype(),
                    format_rdata(rr)
                );
            }
            QueryAction::Continue
        })),
    );

    let deadline = Instant::now()
        + if args.timeout == 0 {
            Duration::from_secs(86_400)
        } else {
            Duration::from_secs(args.timeout)
        };
    let mut buf = vec![0u8; MAX_PACKET_LEN];

    loop {
        while let Some(outgoing) = engine.next_packet() {
            let octets = match outgoing.message.to_octets() {
                Ok(octets) => octets,
                Err(error) => {
                    tracing::warn!(%error, "could not serialise message");
                    continue;
                }
            };

            if let Err(error) = socket.send_to(&octets, outgoing.dest).await {
                eprintln!("send failed: {error}");
                process::exit(1);
            }
        }

        let wait = engine.sleep().max(Duration::from_millis(1));

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

            () = sleep(wait) => {}
            () = sleep_until(deadline) => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = drive_shutdown(&mut engine, &socket).await;
}

/// Nothing is published, but shutting down cleanly keeps the engine's
/// contract symmetrical with the daemon.
async fn drive_shutdown(engine: &mut Engine<SystemClock>, socket: &UdpSocket) -> std::io::Result<()> {
    engine.shutdown();
    while let Some(outgoing) = engine.next_packet() {
        if let Ok(octets) = outgoing.message.to_octets() {
            socket.send_to(&octets, outgoing.dest).await?;
        }
    }
    Ok(())
}
