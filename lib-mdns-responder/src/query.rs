//! The registry of outstanding questions.
//!
//! At most one query exists per (name, type); re-registering replaces
//! the callback.  The engine drives retries off `next_try` and keeps
//! `checkpoint` at the minimum of them all so `sleep` can report a
//! single horizon.

use std::collections::BTreeMap;
use std::time::Instant;

use mdns_types::protocol::types::{DomainName, QueryType, RecordType, ResourceRecord};

use crate::hash::{bucket, QUERY_BUCKETS};

/// A stable handle to a registered query.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct QueryId(u64);

impl QueryId {
    #[cfg(test)]
    pub(crate) fn for_tests(id: u64) -> Self {
        QueryId(id)
    }
}

/// What a callback wants done with its query.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum QueryAction {
    /// Keep the query registered.
    Continue,

    /// Deregister the query.
    Done,
}

pub type AnswerCallback = Box<dyn FnMut(&ResourceRecord) -> QueryAction>;

pub struct QueryEntry {
    pub name: DomainName,
    pub qtype: QueryType,

    /// When to next transmit this question; `None` quiesces it until a
    /// cache change re-arms it.
    pub next_try: Option<Instant>,

    /// Transmissions since the query was (re)armed.
    pub tries: u8,

    callback: AnswerCallback,
}

pub struct Queries {
    entries: BTreeMap<QueryId, QueryEntry>,
    buckets: Vec<Vec<QueryId>>,
    next_id: u64,

    /// Minimum over all `next_try` values.
    pub checkpoint: Option<Instant>,
}

impl Queries {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            buckets: (0..QUERY_BUCKETS).map(|_| Vec::new()).collect(),
            next_id: 0,
            checkpoint: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The registered query for exactly (name, qtype), if any.
    pub fn lookup(&self, name: &DomainName, qtype: QueryType) -> Option<QueryId> {
        self.buckets[bucket(name, QUERY_BUCKETS)]
            .iter()
            .copied()
            .find(|id| {
                let entry = &self.entries[id];
                entry.qtype == qtype && entry.name == *name
            })
    }

    /// The query an incoming record of `rtype` should feed: an exact
    /// registration wins over a wildcard one.
    pub fn lookup_for_record(&self, name: &DomainName, rtype: RecordType) -> Option<QueryId> {
        self.lookup(name, QueryType::Record(rtype))
            .or_else(|| self.lookup(name, QueryType::Wildcard))
    }

    /// Register a query, or replace the callback of an existing one.
    /// Returns the id and whether the registration is new.
    pub fn register(
        &mut self,
        name: DomainName,
        qtype: QueryType,
        callback: AnswerCallback,
    ) -> (QueryId, bool) {
        if let Some(id) = self.lookup(&name, qtype) {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.callback = callback;
            }
            return (id, false);
        }

        let id = QueryId(self.next_id);
        self.next_id += 1;
        self.buckets[bucket(&name, QUERY_BUCKETS)].push(id);
        self.entries.insert(
            id,
            QueryEntry {
                name,
                qtype,
                next_try: None,
                tries: 0,
                callback,
            },
        );

        (id, true)
    }

    pub fn remove(&mut self, id: QueryId) -> Option<QueryEntry> {
        let entry = self.entries.remove(&id)?;
        self.buckets[bucket(&entry.name, QUERY_BUCKETS)].retain(|other| *other != id);
        self.recompute_checkpoint();
        Some(entry)
    }

    pub fn contains(&self, id: QueryId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: QueryId) -> Option<&QueryEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: QueryId) -> Option<&mut QueryEntry> {
        self.entries.get_mut(&id)
    }

    /// Invoke the query's callback with an answer view.
    pub fn fire(&mut self, id: QueryId, record: &ResourceRecord) -> Option<QueryAction> {
        let entry = self.entries.get_mut(&id)?;
        Some((entry.callback)(record))
    }

    /// Queries whose `next_try` has arrived, in registration order.
    pub fn due(&self, now: Instant) -> Vec<QueryId> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.next_try.is_some_and(|at| at <= now))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn ids(&self) -> Vec<QueryId> {
        self.entries.keys().copied().collect()
    }

    /// Re-derive `checkpoint` from the entries.
    pub fn recompute_checkpoint(&mut self) {
        self.checkpoint = self.entries.values().filter_map(|entry| entry.next_try).min();
    }

    /// Pull `checkpoint` no later than `at`.
    pub fn bump_checkpoint(&mut self, at: Instant) {
        self.checkpoint = Some(self.checkpoint.map_or(at, |current| current.min(at)));
    }
}

impl Default for Queries {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdns_types::protocol::types::test_util::*;
    use mdns_types::protocol::types::RecordType;

    fn noop() -> AnswerCallback {
        Box::new(|_| QueryAction::Continue)
    }

    #[test]
    fn one_query_per_name_and_type() {
        let mut queries = Queries::new();

        let (a, fresh_a) = queries.register(
            domain("host.local."),
            QueryType::Record(RecordType::A),
            noop(),
        );
        let (b, fresh_b) = queries.register(
            domain("host.local."),
            QueryType::Record(RecordType::A),
            noop(),
        );

        assert!(fresh_a);
        assert!(!fresh_b);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_types_are_distinct_queries() {
        let mut queries = Queries::new();

        let (a, _) = queries.register(
            domain("host.local."),
            QueryType::Record(RecordType::A),
            noop(),
        );
        let (b, _) = queries.register(
            domain("host.local."),
            QueryType::Record(RecordType::AAAA),
            noop(),
        );

        assert_ne!(a, b);
    }

    #[test]
    fn record_lookup_prefers_exact_over_wildcard() {
        let mut queries = Queries::new();

        let (any, _) = queries.register(domain("host.local."), QueryType::Wildcard, noop());
        let (exact, _) = queries.register(
            domain("host.local."),
            QueryType::Record(RecordType::A),
            noop(),
        );

        assert_eq!(
            Some(exact),
            queries.lookup_for_record(&domain("host.local."), RecordType::A)
        );
        assert_eq!(
            Some(any),
            queries.lookup_for_record(&domain("host.local."), RecordType::TXT)
        );
    }

    #[test]
    fn remove_recomputes_checkpoint() {
        let mut queries = Queries::new();
        let now = Instant::now();

        let (a, _) = queries.register(
            domain("a.local."),
            QueryType::Record(RecordType::A),
            noop(),
        );
        let (b, _) = queries.register(
            domain("b.local."),
            QueryType::Record(RecordType::A),
            noop(),
        );

        queries.get_mut(a).unwrap().next_try = Some(now);
        queries.get_mut(b).unwrap().next_try = Some(now + std::time::Duration::from_secs(3));
        queries.recompute_checkpoint();
        assert_eq!(Some(now), queries.checkpoint);

        queries.remove(a);
        assert_eq!(
            Some(now + std::time::Duration::from_secs(3)),
            queries.checkpoint
        );
    }
}
