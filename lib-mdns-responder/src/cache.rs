//! A time-indexed store of received resource records, keyed by
//! (name, type).
//!
//! Entries are stored with an absolute expiry of *half* the advertised
//! TTL plus eight seconds, so the engine re-queries before the
//! authoritative TTL actually lapses and a record that is still alive
//! gets refreshed rather than dropped.  An entry may carry a back-link
//! to the query it last satisfied; expiring a linked entry produces an
//! event the engine turns into a final TTL-0 callback.

use std::time::{Duration, Instant};

use mdns_types::protocol::types::{DomainName, QueryType, ResourceRecord};

use crate::hash::{bucket, CACHE_BUCKETS};
use crate::query::QueryId;

/// A record received from the network, plus its expiry bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The record as received; `ttl` stays the advertised value.
    pub rr: ResourceRecord,

    /// When this entry falls out of the cache.
    pub expires_at: Instant,

    /// The query this entry last satisfied, if any.
    pub query: Option<QueryId>,
}

/// Produced when a linked entry expires: the engine fires the query's
/// callback with `record` (which has `ttl == 0`).
#[derive(Debug, Clone)]
pub struct ExpiryEvent {
    pub query: QueryId,
    pub record: ResourceRecord,
}

/// The cache proper: bucketed chains of entries.
pub struct Cache {
    buckets: Vec<Vec<CacheEntry>>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        Self {
            buckets: (0..CACHE_BUCKETS).map(|_| Vec::new()).collect(),
        }
    }

    /// Process one incoming answer: cache-flush handling, goodbyes,
    /// TTL refresh, insertion.  `link` is the query the engine matched
    /// for this record's key, attached if the entry has no link yet.
    ///
    /// Returns the expiry events the flush/goodbye produced.
    pub fn insert(
        &mut self,
        rr: &ResourceRecord,
        now: Instant,
        link: Option<QueryId>,
    ) -> Vec<ExpiryEvent> {
        let idx = bucket(&rr.name, CACHE_BUCKETS);
        let chain = &mut self.buckets[idx];
        let rtype = rr.rtype_with_data.rtype();
        let mut events = Vec::new();

        if rr.cache_flush {
            // an authoritative peer replaces every prior record for
            // this (name, type)
            for entry in chain.iter_mut() {
                if entry.rr.name == rr.name && entry.rr.rtype_with_data.rtype() == rtype {
                    entry.expires_at = now;
                }
            }
            events.append(&mut sweep(chain, now));
        }

        if rr.ttl == 0 {
            // goodbye: only entries with matching data go
            for entry in chain.iter_mut() {
                if entry.rr.name == rr.name && entry.rr.rtype_with_data == rr.rtype_with_data {
                    entry.expires_at = now;
                }
            }
            events.append(&mut sweep(chain, now));
            return events;
        }

        let expires_at = expiry(now, rr.ttl);
        if let Some(entry) = chain
            .iter_mut()
            .find(|e| e.rr.name == rr.name && e.rr.rtype_with_data == rr.rtype_with_data)
        {
            // repeat announcement: refresh in place
            entry.rr.ttl = rr.ttl;
            entry.expires_at = expires_at;
            if entry.query.is_none() {
                entry.query = link;
            }
        } else {
            let mut stored = rr.clone();
            stored.cache_flush = false;
            chain.push(CacheEntry {
                rr: stored,
                expires_at,
                query: link,
            });
        }

        events
    }

    /// Attach `query` to every entry matching (name, qtype), returning
    /// the records so the engine can fire the brand-new query's
    /// callback for each.
    pub fn attach_query(
        &mut self,
        name: &DomainName,
        qtype: QueryType,
        query: QueryId,
    ) -> Vec<ResourceRecord> {
        let idx = bucket(name, CACHE_BUCKETS);
        let mut found = Vec::new();

        for entry in &mut self.buckets[idx] {
            if matches(entry, name, qtype) {
                entry.query = Some(query);
                found.push(entry.rr.clone());
            }
        }

        found
    }

    /// Drop all back-links to a removed query.
    pub fn detach_query(&mut self, query: QueryId) {
        for chain in &mut self.buckets {
            for entry in chain {
                if entry.query == Some(query) {
                    entry.query = None;
                }
            }
        }
    }

    /// Live entries for (name, qtype), with their expiry times.
    pub fn answers(&self, name: &DomainName, qtype: QueryType) -> Vec<(ResourceRecord, Instant)> {
        self.buckets[bucket(name, CACHE_BUCKETS)]
            .iter()
            .filter(|entry| matches(entry, name, qtype))
            .map(|entry| (entry.rr.clone(), entry.expires_at))
            .collect()
    }

    /// When the first entry for (name, qtype) expires, if any.
    pub fn earliest_expiry(&self, name: &DomainName, qtype: QueryType) -> Option<Instant> {
        self.buckets[bucket(name, CACHE_BUCKETS)]
            .iter()
            .filter(|entry| matches(entry, name, qtype))
            .map(|entry| entry.expires_at)
            .min()
    }

    /// Sweep the bucket holding `name`.
    pub fn expire_bucket_of(&mut self, name: &DomainName, now: Instant) -> Vec<ExpiryEvent> {
        sweep(&mut self.buckets[bucket(name, CACHE_BUCKETS)], now)
    }

    /// Brute-force sweep of every bucket.
    pub fn gc(&mut self, now: Instant) -> Vec<ExpiryEvent> {
        let mut events = Vec::new();
        for chain in &mut self.buckets {
            events.append(&mut sweep(chain, now));
        }
        events
    }

    /// Forget everything, without expiry events.  Used when the
    /// network under the engine has changed and nothing previously
    /// heard can be trusted.
    pub fn clear(&mut self) {
        for chain in &mut self.buckets {
            chain.clear();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }
}

/// Half the advertised TTL, plus a little slack.
fn expiry(now: Instant, ttl: u32) -> Instant {
    now + Duration::from_secs(u64::from(ttl / 2) + 8)
}

fn matches(entry: &CacheEntry, name: &DomainName, qtype: QueryType) -> bool {
    entry.rr.name == *name && qtype.matches(entry.rr.rtype_with_data.rtype())
}

fn sweep(chain: &mut Vec<CacheEntry>, now: Instant) -> Vec<ExpiryEvent> {
    let mut events = Vec::new();

    chain.retain(|entry| {
        if entry.expires_at <= now {
            if let Some(query) = entry.query {
                let mut record = entry.rr.clone();
                record.ttl = 0;
                events.push(ExpiryEvent { query, record });
            }
            false
        } else {
            true
        }
    });

    events
}
