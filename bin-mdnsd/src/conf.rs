//! Service-file configuration.
//!
//! A service file is a sequence of whitespace-delimited key/value
//! lines; `#` starts a comment.  Recognised keys: `type`, `name`,
//! `port`, `target`, `cname`, and `txt key=value` (repeatable).

use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use mdns_responder::clock::Clock;
use mdns_responder::engine::Engine;
use mdns_responder::publish::RecordId;
use mdns_types::protocol::types::{DomainName, RecordType};

/// How the DNS-SD service enumeration meta-query is spelled.
pub const DISCO_NAME: &str = "_services._dns-sd._udp.local.";

/// Default TTL of the address/pointer records.
const RECORD_TTL: u32 = 120;

/// TXT records change rarely; they get a longer TTL.
const TXT_TTL: u32 = 4500;

#[derive(Debug, Default, Clone)]
pub struct ServiceConfig {
    pub stype: Option<String>,
    pub name: Option<String>,
    pub port: u16,
    pub target: Option<String>,
    pub cname: Option<String>,
    pub txt: Vec<String>,
}

impl ServiceConfig {
    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once(char::is_whitespace) else {
                tracing::debug!(%line, "skipping service-file line without a value");
                continue;
            };
            let value = value.trim();

            match key {
                "type" => config.stype = Some(value.to_string()),
                "name" => config.name = Some(value.to_string()),
                "port" => match value.parse() {
                    Ok(port) => config.port = port,
                    Err(_) => tracing::warn!(%value, "bad port number"),
                },
                "target" => config.target = Some(value.to_string()),
                "cname" => config.cname = Some(value.to_string()),
                "txt" => config.txt.push(value.to_string()),
                other => tracing::debug!(key = %other, "unknown service-file key"),
            }
        }

        config
    }
}

/// The `*.service` files under `dir`, sorted for a stable publication
/// order.
pub fn service_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "service") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Encode `key=value` strings as DNS TXT rdata: each pair becomes one
/// length-prefixed character-string.  No pairs encodes as a single
/// zero octet, the smallest legal TXT.
pub fn txt_rdata(entries: &[String]) -> Vec<u8> {
    let mut octets = Vec::new();

    for entry in entries {
        if !entry.contains('=') {
            tracing::warn!(%entry, "ignoring txt entry without '='");
            continue;
        }
        let bytes = entry.as_bytes();
        if bytes.len() > 255 {
            tracing::warn!(%entry, "ignoring oversized txt entry");
            continue;
        }
        #[allow(clippy::cast_possible_truncation)]
        octets.push(bytes.len() as u8);
        octets.extend_from_slice(bytes);
    }

    if octets.is_empty() {
        octets.push(0);
    }

    octets
}

/// Publish the record set for one service: the DNS-SD enumeration
/// pointer, the instance pointer, and the unique SRV/TXT/A records.
/// Returns the handles so a reload can de-list them again.
pub fn publish_service<C: Clock>(
    engine: &mut Engine<C>,
    config: &ServiceConfig,
    hostname: &str,
    address: Ipv4Addr,
) -> Result<Vec<RecordId>, String> {
    let name = config.name.as_deref().unwrap_or(hostname);
    let stype = config.stype.as_deref().unwrap_or("_http._tcp");

    let hlocal = parse_name(&format!("{name}.{stype}.local."))?;
    let nlocal = parse_name(&format!("{name}.local."))?;
    let tlocal = parse_name(&format!("{stype}.local."))?;
    let disco = parse_name(DISCO_NAME)?;
    let target = match &config.target {
        Some(target) => parse_name(target)?,
        None => hlocal.clone(),
    };

    let mut records = Vec::new();

    // announce that a service of this type exists at all
    let r = engine.publish_shared(disco, RecordType::PTR, RECORD_TTL);
    engine.set_host(r, tlocal.clone());
    records.push(r);

    // and that this instance provides it
    let r = engine.publish_shared(tlocal, RecordType::PTR, RECORD_TTL);
    engine.set_host(r, target);
    records.push(r);

    let r = engine.publish_unique(
        hlocal.clone(),
        RecordType::SRV,
        RECORD_TTL,
        conflict_handler(),
    );
    engine.set_srv(r, 0, 0, config.port, nlocal.clone());
    records.push(r);

    let r = engine.publish_unique(
        nlocal.clone(),
        RecordType::A,
        RECORD_TTL,
        conflict_handler(),
    );
    engine.set_ip(r, address);
    records.push(r);

    if let Some(cname) = &config.cname {
        let alias = parse_name(&format!("{cname}.local."))?;
        let r = engine.publish_shared(alias, RecordType::CNAME, RECORD_TTL);
        engine.set_host(r, nlocal);
        records.push(r);
    }

    let r = engine.publish_unique(hlocal, RecordType::TXT, TXT_TTL, conflict_handler());
    engine.set_raw(r, txt_rdata(&config.txt));
    records.push(r);

    Ok(records)
}

fn conflict_handler() -> Box<dyn FnMut(&DomainName, RecordType)> {
    Box::new(|name, rtype| {
        tracing::warn!(%name, %rtype, "conflicting record detected on link, de-listed");
    })
}

fn parse_name(s: &str) -> Result<DomainName, String> {
    s.parse()
        .map_err(|_| format!("bad name in service file: {s}"))
}
