//! The store of locally owned records.
//!
//! Shared records (like the PTRs of a service type) can be held by any
//! number of responders and are announced directly.  Unique records
//! (host A/AAAA, SRV, TXT) must be probed for before announcement, and
//! are defended against conflicting traffic afterwards.
//!
//! Records live in one owning map and are referred to everywhere else
//! (the scheduler's queues, unicast replies) by stable [`RecordId`]
//! handles, so de-listing a record can never leave a dangling pointer
//! behind.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Instant;

use mdns_types::protocol::types::{
    DomainName, QueryType, RecordClass, RecordType, RecordTypeWithData, ResourceRecord,
};

use crate::hash::{bucket, PUBLISH_BUCKETS};

/// A stable handle to a published record.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RecordId(u64);

/// Where a record is in its lifecycle.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum UniqueState {
    /// A shared record: no probing, no defence.
    Shared,

    /// A unique record part-way through probing; the counter is how
    /// many probes have been sent plus one, running 1 through 4.
    Probing(u8),

    /// A unique record which survived probing and has been (or is
    /// being) announced.
    Published,
}

pub type ConflictCallback = Box<dyn FnMut(&DomainName, RecordType)>;

/// The payload of a published record, kept in the shape the `set_*`
/// operations provide it in.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RecordData {
    Raw(Vec<u8>),
    Host(DomainName),
    Ip(Ipv4Addr),
    Ip6(Ipv6Addr),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: DomainName,
    },
}

pub struct PublishedRecord {
    pub name: DomainName,
    pub rtype: RecordType,
    pub ttl: u32,

    /// Unset until the first `set_*`; a record with no data is never
    /// put on the wire.
    pub data: Option<RecordData>,

    pub state: UniqueState,

    /// Announcements sent since the record last (re)entered the
    /// publish cycle.
    pub tries: u8,

    pub last_sent: Option<Instant>,

    pub(crate) conflict: Option<ConflictCallback>,
}

impl PublishedRecord {
    pub fn is_unique(&self) -> bool {
        !matches!(self.state, UniqueState::Shared)
    }

    pub fn is_probing(&self) -> bool {
        matches!(self.state, UniqueState::Probing(_))
    }

    /// The wire form of this record, or `None` if it has no payload
    /// yet (or the payload cannot express this record type).  The
    /// caller decides the cache-flush bit.
    pub fn to_wire(&self, rclass: RecordClass) -> Option<ResourceRecord> {
        let rtype_with_data = match (self.rtype, self.data.as_ref()?) {
            (RecordType::A, RecordData::Ip(address)) => RecordTypeWithData::A { address: *address },
            (RecordType::A, RecordData::Raw(octets)) if octets.len() == 4 => {
                RecordTypeWithData::A {
                    address: Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]),
                }
            }
            (RecordType::AAAA, RecordData::Ip6(address)) => RecordTypeWithData::AAAA {
                address: *address,
            },
            (RecordType::NS, RecordData::Host(target)) => RecordTypeWithData::NS {
                nsdname: target.clone(),
            },
            (RecordType::CNAME, RecordData::Host(target)) => RecordTypeWithData::CNAME {
                cname: target.clone(),
            },
            (RecordType::PTR, RecordData::Host(target)) => RecordTypeWithData::PTR {
                ptrdname: target.clone(),
            },
            (
                RecordType::SRV,
                RecordData::Srv {
                    priority,
                    weight,
                    port,
                    target,
                },
            ) => RecordTypeWithData::SRV {
                priority: *priority,
                weight: *weight,
                port: *port,
                target: target.clone(),
            },
            (RecordType::TXT, RecordData::Raw(octets)) => RecordTypeWithData::TXT {
                octets: octets.clone(),
            },
            _ => return None,
        };

        Some(ResourceRecord {
            name: self.name.clone(),
            rtype_with_data,
            rclass,
            cache_flush: false,
            ttl: self.ttl,
        })
    }

    /// Whether an incoming assertion carries the same data we publish.
    /// Name and type equality is the caller's lookup; a record with no
    /// data yet matches nothing, so any counter-assertion during early
    /// probing is a conflict.
    pub fn matches_answer(&self, rr: &ResourceRecord) -> bool {
        match (&self.data, &rr.rtype_with_data) {
            (None, _) => false,
            (Some(RecordData::Ip(a)), RecordTypeWithData::A { address }) => a == address,
            (Some(RecordData::Raw(octets)), RecordTypeWithData::A { address }) => {
                octets[..] == address.octets()
            }
            (Some(RecordData::Ip6(a)), RecordTypeWithData::AAAA { address }) => a == address,
            (Some(RecordData::Host(h)), RecordTypeWithData::NS { nsdname }) => h == nsdname,
            (Some(RecordData::Host(h)), RecordTypeWithData::CNAME { cname }) => h == cname,
            (Some(RecordData::Host(h)), RecordTypeWithData::PTR { ptrdname }) => h == ptrdname,
            (
                Some(RecordData::Srv {
                    priority,
                    weight,
                    port,
                    target,
                }),
                RecordTypeWithData::SRV {
                    priority: p,
                    weight: w,
                    port: pt,
                    target: t,
                },
            ) => priority == p && weight == w && port == pt && target == t,
            (Some(RecordData::Raw(octets)), RecordTypeWithData::TXT { octets: other }) => {
                octets == other
            }
            (Some(RecordData::Raw(octets)), RecordTypeWithData::Unknown { octets: other, .. }) => {
                octets == other
            }
            _ => false,
        }
    }
}

pub struct Publications {
    records: BTreeMap<RecordId, PublishedRecord>,
    buckets: Vec<Vec<RecordId>>,
    next_id: u64,
}

impl Publications {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            buckets: (0..PUBLISH_BUCKETS).map(|_| Vec::new()).collect(),
            next_id: 0,
        }
    }

    pub fn insert(
        &mut self,
        name: DomainName,
        rtype: RecordType,
        ttl: u32,
        state: UniqueState,
        conflict: Option<ConflictCallback>,
    ) -> RecordId {
        let id = RecordId(self.next_id);
        self.next_id += 1;
        self.buckets[bucket(&name, PUBLISH_BUCKETS)].push(id);
        self.records.insert(
            id,
            PublishedRecord {
                name,
                rtype,
                ttl,
                data: None,
                state,
                tries: 0,
                last_sent: None,
                conflict,
            },
        );

        id
    }

    pub fn get(&self, id: RecordId) -> Option<&PublishedRecord> {
        self.records.get(&id)
    }

    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut PublishedRecord> {
        self.records.get_mut(&id)
    }

    pub fn remove(&mut self, id: RecordId) -> Option<PublishedRecord> {
        let record = self.records.remove(&id)?;
        self.buckets[bucket(&record.name, PUBLISH_BUCKETS)].retain(|other| *other != id);
        Some(record)
    }

    /// Records a question for (name, qtype) would be answered from,
    /// in publication order.
    pub fn find_matching(&self, name: &DomainName, qtype: QueryType) -> Vec<RecordId> {
        self.buckets[bucket(name, PUBLISH_BUCKETS)]
            .iter()
            .copied()
            .filter(|id| {
                let record = &self.records[id];
                qtype.matches(record.rtype) && record.name == *name
            })
            .collect()
    }

    /// Records holding exactly (name, rtype).
    pub fn find_exact(&self, name: &DomainName, rtype: RecordType) -> Vec<RecordId> {
        self.find_matching(name, QueryType::Record(rtype))
    }

    pub fn ids(&self) -> Vec<RecordId> {
        self.records.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &PublishedRecord)> {
        self.records.iter().map(|(id, record)| (*id, record))
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for Publications {
    fn default() -> Self {
        Self::new()
    }
}
