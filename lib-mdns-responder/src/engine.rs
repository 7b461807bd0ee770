//! The engine façade: binds the codec, cache, publication store,
//! scheduler, and query registry into a non-blocking protocol loop.
//!
//! All operations complete synchronously; the caller owns the socket
//! and the clock.  `receive` must be drained before `next_packet`
//! within one event tick so conflict checks and known-answer
//! suppression see a consistent picture.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use rand::Rng;

use mdns_types::protocol::types::{
    DomainName, Message, QueryClass, QueryType, Question, RecordClass, RecordType, ResourceRecord,
    MAX_PACKET_LEN,
};

use crate::cache::{Cache, ExpiryEvent};
use crate::clock::{Clock, SystemClock};
use crate::publish::{ConflictCallback, Publications, RecordData, RecordId, UniqueState};
use crate::query::{AnswerCallback, Queries, QueryAction, QueryId};
use crate::scheduler::{Scheduler, UnicastReply};
use crate::{MDNS_GROUP, MDNS_PORT};

/// Probe transmissions are spaced at least this far apart.
const PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// Spacing of announce retransmissions.
const PUBLISH_INTERVAL: Duration = Duration::from_secs(2);

/// Announcements per publish cycle.
const PUBLISH_TRIES: u8 = 4;

/// Retransmissions before a query quiesces against the cache.
const QUERY_TRIES: u8 = 3;

/// Interval of the brute-force cache sweep.
const GC_INTERVAL: Duration = Duration::from_secs(86_400);

/// A packet the engine wants sent, and where to.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub message: Message,
    pub dest: SocketAddr,
}

impl Outgoing {
    fn multicast(message: Message) -> Self {
        Self {
            message,
            dest: SocketAddr::V4(SocketAddrV4::new(MDNS_GROUP, MDNS_PORT)),
        }
    }
}

/// Observability hook: sees every incoming answer record before it is
/// cached.
pub type ReceiveCallback = Box<dyn FnMut(&ResourceRecord)>;

pub struct Engine<C = SystemClock> {
    clock: C,
    class: u16,
    frame: usize,
    shutdown: bool,

    /// Refreshed from the clock at every public entry point.
    now: Instant,

    /// When the next brute-force cache sweep runs.
    expire_all: Instant,

    cache: Cache,
    publications: Publications,
    queries: Queries,
    sched: Scheduler,

    received_callback: Option<ReceiveCallback>,
}

impl Engine<SystemClock> {
    /// A new engine for the given class of names (usually 1) and
    /// maximum frame size.
    pub fn new(class: u16, frame: usize) -> Self {
        Self::with_clock(SystemClock, class, frame)
    }
}

impl<C: Clock> Engine<C> {
    pub fn with_clock(clock: C, class: u16, frame: usize) -> Self {
        let now = clock.now();
        Self {
            clock,
            class,
            frame: frame.min(MAX_PACKET_LEN),
            shutdown: false,
            now,
            expire_all: now + GC_INTERVAL,
            cache: Cache::new(),
            publications: Publications::new(),
            queries: Queries::new(),
            sched: Scheduler::new(now),
            received_callback: None,
        }
    }

    fn rclass(&self) -> RecordClass {
        RecordClass::from(self.class)
    }

    /// Register the hook fired for every incoming answer record.
    pub fn on_record_received(&mut self, callback: ReceiveCallback) {
        self.received_callback = Some(callback);
    }

    // ------------------------------------------------------------------
    // I/O entry points

    /// Feed one received (already parsed) datagram into the engine.
    /// Malformed datagrams should be dropped by the caller; anything
    /// that parsed is safe here.
    pub fn receive(&mut self, message: &Message, src: SocketAddr) {
        if self.shutdown {
            return;
        }
        self.now = self.clock.now();

        if message.header.is_response {
            self.receive_response(message);
        } else {
            self.receive_question(message, src);
        }
    }

    fn receive_question(&mut self, message: &Message, src: SocketAddr) {
        for question in &message.questions {
            if !self.rclass().matches(question.qclass) {
                continue;
            }

            let matching = self
                .publications
                .find_matching(&question.name, question.qtype);
            if matching.is_empty() {
                continue;
            }

            let mut conflicted = false;
            let mut reply_record = None;

            for rid in matching {
                let Some(record) = self.publications.get(rid) else {
                    continue;
                };

                if record.is_probing() {
                    // a simultaneous prober puts its tie-break data in
                    // the authority section; different data means we
                    // lost
                    let conflict = message.authority.iter().any(|auth| {
                        auth.name == record.name
                            && auth.rtype_with_data.rtype() == record.rtype
                            && !record.matches_answer(auth)
                    });
                    if conflict {
                        tracing::debug!(name = %record.name, rtype = %record.rtype, "probe conflict");
                        self.trigger_conflict(rid);
                        conflicted = true;
                    }
                    continue;
                }

                if reply_record.is_none() {
                    reply_record = Some(rid);
                }

                // known-answer suppression: no reply if the questioner
                // already holds our data
                let suppressed = message.answers.iter().any(|an| {
                    an.name == record.name
                        && an.rtype_with_data.rtype() == record.rtype
                        && record.matches_answer(an)
                });
                if !suppressed {
                    self.send_record(rid);
                }
            }

            // legacy questioners get a unicast copy with their id
            if !conflicted && src.port() != MDNS_PORT {
                if let Some(record) = reply_record {
                    self.sched.unicast.push_back(UnicastReply {
                        id: message.header.id,
                        dest: src,
                        record,
                    });
                }
            }
        }
    }

    fn receive_response(&mut self, message: &Message) {
        for an in &message.answers {
            let rtype = an.rtype_with_data.rtype();

            // defence of published unique records
            for rid in self.publications.find_exact(&an.name, rtype) {
                let Some(record) = self.publications.get(rid) else {
                    continue;
                };
                if record.is_unique() && !record.matches_answer(an) {
                    tracing::debug!(name = %an.name, %rtype, "conflicting answer for unique record");
                    self.trigger_conflict(rid);
                }
            }

            if let Some(callback) = self.received_callback.as_mut() {
                callback(an);
            }

            let link = self.queries.lookup_for_record(&an.name, rtype);
            let events = self.cache.insert(an, self.now, link);
            self.dispatch_expiry(events);

            if an.ttl > 0 {
                if let Some(query) = link {
                    self.fire_answer(query, an);
                }
            }
        }
    }

    /// The next packet to transmit, if any.  Call repeatedly until it
    /// returns `None` before sleeping.
    pub fn next_packet(&mut self) -> Option<Outgoing> {
        self.now = self.clock.now();

        // unicast replies jump the queue
        while let Some(reply) = self.sched.unicast.pop_front() {
            if let Some(outgoing) = self.unicast_packet(&reply) {
                return Some(outgoing);
            }
        }

        let mut message = Message::response();
        let mut len = 12;
        let mut sent = 0;

        sent += self.drain_answer_queue(AnswerQueue::Now, &mut message, &mut len);

        if !self.sched.a_publish.is_empty() && self.sched.publish_at <= self.now {
            sent += self.drain_publish(&mut message, &mut len);
        }

        if self.shutdown {
            return (sent > 0).then(|| Outgoing::multicast(message));
        }

        if !self.sched.a_pause.is_empty() && self.sched.pause_at <= self.now {
            sent += self.drain_answer_queue(AnswerQueue::Pause, &mut message, &mut len);
        }

        if sent > 0 {
            return Some(Outgoing::multicast(message));
        }

        // nothing to answer; switch to question mode
        message.header.is_response = false;
        message.header.is_authoritative = false;

        if !self.sched.probing.is_empty() && self.sched.probe_at <= self.now {
            let probes = self.probe_packet(&mut message);
            if probes > 0 {
                return Some(Outgoing::multicast(message));
            }
        }

        if self
            .queries
            .checkpoint
            .is_some_and(|checkpoint| checkpoint <= self.now)
        {
            let asked = self.query_packet(&mut message, &mut len);
            if asked > 0 {
                return Some(Outgoing::multicast(message));
            }
        }

        if self.now > self.expire_all {
            let events = self.cache.gc(self.now);
            self.dispatch_expiry(events);
            self.expire_all = self.now + GC_INTERVAL;
        }

        None
    }

    /// How long the caller may wait before calling `next_packet`
    /// again.  Zero means there is immediate work.
    pub fn sleep(&mut self) -> Duration {
        self.now = self.clock.now();

        if self.sched.has_immediate() {
            return Duration::ZERO;
        }

        if !self.sched.a_pause.is_empty() {
            return self.sched.pause_at.saturating_duration_since(self.now);
        }

        if !self.sched.probing.is_empty() {
            return self.sched.probe_at.saturating_duration_since(self.now);
        }

        if !self.sched.a_publish.is_empty() {
            return self.sched.publish_at.saturating_duration_since(self.now);
        }

        if let Some(checkpoint) = self.queries.checkpoint {
            return checkpoint.saturating_duration_since(self.now);
        }

        // idle: wake to re-announce published records before their
        // TTLs lapse, or for the daily sweep, whichever is first
        let mut horizon = self.expire_all;
        let mut stale = Vec::new();
        for (id, record) in self.publications.iter() {
            if record.ttl == 0 || record.is_probing() {
                continue;
            }
            let resend =
                record.last_sent.unwrap_or(self.now) + Duration::from_secs(u64::from(record.ttl));
            horizon = horizon.min(resend);
            stale.push(id);
        }

        if stale.is_empty() {
            return self.expire_all.saturating_duration_since(self.now);
        }

        for id in stale {
            self.sched.push_pause(id);
        }

        // transmit 2 seconds ahead of the earliest expiry
        let wake = horizon
            .saturating_duration_since(self.now)
            .saturating_sub(Duration::from_secs(2));
        self.sched.pause_at = self.now + wake;
        wake
    }

    // ------------------------------------------------------------------
    // Queries

    /// Register a callback for answers to (name, qtype), or replace
    /// the callback of an existing registration.  `None` deregisters.
    /// Already-cached answers are delivered before this returns.
    pub fn query(&mut self, name: &DomainName, qtype: QueryType, callback: Option<AnswerCallback>) {
        self.now = self.clock.now();

        let Some(callback) = callback else {
            if let Some(query) = self.queries.lookup(name, qtype) {
                self.remove_query(query);
            }
            return;
        };

        let (query, fresh) = self.queries.register(name.clone(), qtype, callback);
        if !fresh {
            return;
        }

        for rr in self.cache.attach_query(name, qtype, query) {
            if !self.queries.contains(query) {
                return;
            }
            self.fire_answer(query, &rr);
        }

        // new question goes out at the next opportunity
        if let Some(entry) = self.queries.get_mut(query) {
            entry.tries = 0;
            entry.next_try = Some(self.now);
            self.queries.bump_checkpoint(self.now);
        }
    }

    /// The cached answers for (name, qtype), TTLs rewritten to the
    /// remaining time.
    pub fn list(&mut self, name: &DomainName, qtype: QueryType) -> Vec<ResourceRecord> {
        self.now = self.clock.now();

        self.cache
            .answers(name, qtype)
            .into_iter()
            .map(|(mut rr, expires_at)| {
                rr.ttl = remaining_secs(expires_at, self.now);
                rr
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Publication

    /// Publish a record any number of responders may hold.  Nothing
    /// goes on the wire until a `set_*` call provides the payload.
    pub fn publish_shared(&mut self, name: DomainName, rtype: RecordType, ttl: u32) -> RecordId {
        self.now = self.clock.now();
        self.publications
            .insert(name, rtype, ttl, UniqueState::Shared, None)
    }

    /// Publish a record this responder must own exclusively.  Probing
    /// starts immediately; `conflict` fires if ownership is lost at
    /// any point.
    pub fn publish_unique(
        &mut self,
        name: DomainName,
        rtype: RecordType,
        ttl: u32,
        conflict: ConflictCallback,
    ) -> RecordId {
        self.now = self.clock.now();
        let id = self
            .publications
            .insert(name, rtype, ttl, UniqueState::Probing(1), Some(conflict));
        self.sched.push_probing(id);
        self.sched.probe_at = self.now;
        id
    }

    pub fn set_raw(&mut self, id: RecordId, octets: Vec<u8>) {
        self.set_data(id, RecordData::Raw(octets));
    }

    pub fn set_host(&mut self, id: RecordId, name: DomainName) {
        self.set_data(id, RecordData::Host(name));
    }

    pub fn set_ip(&mut self, id: RecordId, address: Ipv4Addr) {
        self.set_data(id, RecordData::Ip(address));
    }

    pub fn set_ip6(&mut self, id: RecordId, address: Ipv6Addr) {
        self.set_data(id, RecordData::Ip6(address));
    }

    pub fn set_srv(
        &mut self,
        id: RecordId,
        priority: u16,
        weight: u16,
        port: u16,
        target: DomainName,
    ) {
        self.set_data(
            id,
            RecordData::Srv {
                priority,
                weight,
                port,
                target,
            },
        );
    }

    /// De-list a record: a goodbye if it made it to the wire, an
    /// immediate drop if it is still probing.  Stale ids are ignored
    /// (a conflict may have de-listed the record already).
    pub fn done(&mut self, id: RecordId) {
        self.now = self.clock.now();

        let Some(record) = self.publications.get_mut(id) else {
            return;
        };

        if record.is_probing() {
            self.sched.remove(id);
            self.publications.remove(id);
            return;
        }

        // goodbyes go straight out, shared or not: the pause window is
        // for aggregating answers, and a withdrawal must not sit in a
        // queue something else might clear
        record.ttl = 0;
        self.sched.remove_from_answer_queues(id);
        self.sched.push_now(id);
    }

    // ------------------------------------------------------------------
    // Lifecycle

    /// Mark every published record for a goodbye.  Drive `next_packet`
    /// until it returns `None` to get them on the wire.
    pub fn shutdown(&mut self) {
        self.now = self.clock.now();

        self.sched.clear_answer_queues();
        self.sched.probing.clear();

        for id in self.publications.ids() {
            if let Some(record) = self.publications.get_mut(id) {
                record.ttl = 0;
            }
            self.sched.push_now(id);
        }

        self.shutdown = true;
    }

    /// The network under the engine changed: drop the cache, re-arm
    /// every query, and take every published record back through its
    /// announce (unique: probe) cycle.
    pub fn flush(&mut self) {
        self.now = self.clock.now();

        self.cache.clear();
        self.sched.clear_answer_queues();
        self.sched.probing.clear();

        for query in self.queries.ids() {
            if let Some(entry) = self.queries.get_mut(query) {
                entry.tries = 0;
                entry.next_try = Some(self.now);
            }
        }
        self.queries.recompute_checkpoint();

        for id in self.publications.ids() {
            let Some(record) = self.publications.get_mut(id) else {
                continue;
            };
            record.tries = 0;
            record.last_sent = None;
            if record.is_unique() {
                record.state = UniqueState::Probing(1);
                self.sched.push_probing(id);
            } else {
                self.sched.push_publish(id);
            }
        }

        self.sched.probe_at = self.now;
        self.sched.publish_at = self.now;
    }

    // ------------------------------------------------------------------
    // Internals

    /// Store a record's payload and get the change announced.  While
    /// still probing only the payload moves; a published unique record
    /// goes back through probing so the new data is conflict-checked;
    /// a shared record is simply re-announced.
    fn set_data(&mut self, id: RecordId, data: RecordData) {
        self.now = self.clock.now();

        let Some(record) = self.publications.get_mut(id) else {
            return;
        };
        record.data = Some(data);

        match record.state {
            UniqueState::Probing(_) => {}
            UniqueState::Published => {
                record.state = UniqueState::Probing(1);
                record.tries = 0;
                self.sched.remove_from_answer_queues(id);
                self.sched.push_probing(id);
                self.sched.probe_at = self.now;
            }
            UniqueState::Shared => {
                record.tries = 0;
                self.sched.push_publish(id);
                self.sched.publish_at = self.now;
            }
        }
    }

    /// Dispatch cache expiry events to their queries' callbacks.
    fn dispatch_expiry(&mut self, events: Vec<ExpiryEvent>) {
        for event in events {
            if self.queries.contains(event.query) {
                self.fire_answer(event.query, &event.record);
            }
        }
    }

    fn fire_answer(&mut self, query: QueryId, record: &ResourceRecord) {
        if self.queries.fire(query, record) == Some(QueryAction::Done) {
            self.remove_query(query);
        }
    }

    fn remove_query(&mut self, query: QueryId) {
        self.cache.detach_query(query);
        self.queries.remove(query);
    }

    /// Fire the record's conflict handler and de-list it.
    fn trigger_conflict(&mut self, id: RecordId) {
        if let Some(record) = self.publications.get_mut(id) {
            let name = record.name.clone();
            let rtype = record.rtype;
            if let Some(callback) = record.conflict.as_mut() {
                callback(&name, rtype);
            }
        }
        self.done(id);
    }

    /// Get a record out as soon as its category allows: publish-cycle
    /// records piggyback on the next publish tick, unique records go
    /// immediately, shared answers wait out a short random pause so
    /// responders on a busy link aggregate.
    fn send_record(&mut self, id: RecordId) {
        if self.sched.a_publish.contains(&id) {
            self.sched.publish_at = self.now;
            return;
        }

        let Some(record) = self.publications.get(id) else {
            return;
        };

        if record.is_unique() {
            self.sched.remove_from_answer_queues(id);
            self.sched.push_now(id);
        } else {
            let jitter = rand::thread_rng().gen_range(20..=120);
            self.sched.pause_at = self.now + Duration::from_millis(jitter);
            self.sched.push_pause(id);
        }
    }

    fn remove_record(&mut self, id: RecordId) {
        self.sched.remove(id);
        self.publications.remove(id);
    }

    fn unicast_packet(&mut self, reply: &UnicastReply) -> Option<Outgoing> {
        let rclass = self.rclass();
        let record = self.publications.get(reply.record)?;
        // no cache-flush bit on a directed reply
        let rr = record.to_wire(rclass)?;

        let mut message = Message::response();
        message.header.id = reply.id;
        message.questions.push(Question {
            name: record.name.clone(),
            qtype: QueryType::Record(record.rtype),
            qclass: QueryClass::Record(rclass),
            unicast_response: false,
        });
        message.answers.push(rr);

        if let Some(record) = self.publications.get_mut(reply.record) {
            record.last_sent = Some(self.now);
        }

        Some(Outgoing {
            message,
            dest: reply.dest,
        })
    }

    /// Drain an answer queue into `message`, as far as the frame
    /// allows.  Goodbyes are freed once copied out.
    fn drain_answer_queue(
        &mut self,
        which: AnswerQueue,
        message: &mut Message,
        len: &mut usize,
    ) -> usize {
        let rclass = self.rclass();
        let mut sent = 0;

        loop {
            let front = match which {
                AnswerQueue::Now => self.sched.a_now.front(),
                AnswerQueue::Pause => self.sched.a_pause.front(),
            };
            let Some(&id) = front else { break };

            let Some(record) = self.publications.get(id) else {
                self.pop_queue(which);
                continue;
            };

            let Some(mut rr) = record.to_wire(rclass) else {
                // no payload to say goodbye with; just drop it
                let orphaned = record.ttl == 0;
                self.pop_queue(which);
                if orphaned {
                    self.remove_record(id);
                }
                continue;
            };
            rr.cache_flush = record.is_unique();

            if *len + rr.wire_len_estimate() >= self.frame {
                break;
            }

            self.pop_queue(which);
            *len += rr.wire_len_estimate();
            message.answers.push(rr);
            sent += 1;

            let mut goodbye = false;
            if let Some(record) = self.publications.get_mut(id) {
                record.last_sent = Some(self.now);
                goodbye = record.ttl == 0;
            }
            if goodbye {
                self.remove_record(id);
            }
        }

        sent
    }

    fn pop_queue(&mut self, which: AnswerQueue) {
        match which {
            AnswerQueue::Now => self.sched.a_now.pop_front(),
            AnswerQueue::Pause => self.sched.a_pause.pop_front(),
        };
    }

    /// One publish tick: retransmit the announce cycle.  Records stay
    /// queued until they have been announced `PUBLISH_TRIES` times;
    /// goodbyes are freed after one transmission.
    fn drain_publish(&mut self, message: &mut Message, len: &mut usize) -> usize {
        let rclass = self.rclass();
        let ids: Vec<RecordId> = self.sched.a_publish.iter().copied().collect();
        let mut sent = 0;

        for id in ids {
            let Some(record) = self.publications.get(id) else {
                self.sched.remove(id);
                continue;
            };

            let Some(mut rr) = record.to_wire(rclass) else {
                let orphaned = record.ttl == 0;
                self.sched.a_publish.retain(|other| *other != id);
                if orphaned {
                    self.remove_record(id);
                }
                continue;
            };
            rr.cache_flush = record.is_unique();

            if *len + rr.wire_len_estimate() >= self.frame {
                break;
            }

            *len += rr.wire_len_estimate();
            message.answers.push(rr);
            sent += 1;

            let mut goodbye = false;
            let mut finished = false;
            if let Some(record) = self.publications.get_mut(id) {
                record.tries += 1;
                record.last_sent = Some(self.now);
                goodbye = record.ttl == 0;
                finished = record.tries >= PUBLISH_TRIES;
            }

            if goodbye {
                self.remove_record(id);
            } else if finished {
                self.sched.a_publish.retain(|other| *other != id);
            }
        }

        if !self.sched.a_publish.is_empty() {
            self.sched.publish_at = self.now + PUBLISH_INTERVAL;
        }

        sent
    }

    /// One probe tick: a query packet asking for every name we are
    /// probing, with our tentative records in the authority section.
    /// A record that has sent its fourth probe is promoted and queued
    /// for announcement.
    fn probe_packet(&mut self, message: &mut Message) -> usize {
        let rclass = self.rclass();
        let ids: Vec<RecordId> = self.sched.probing.iter().copied().collect();
        let mut sent = 0;
        let mut promoted = Vec::new();

        for &id in &ids {
            if let Some(record) = self.publications.get(id) {
                message.questions.push(Question {
                    name: record.name.clone(),
                    qtype: QueryType::Record(record.rtype),
                    qclass: QueryClass::Record(rclass),
                    unicast_response: false,
                });
            }
        }

        for &id in &ids {
            let Some(record) = self.publications.get_mut(id) else {
                continue;
            };

            if let Some(rr) = record.to_wire(rclass) {
                message.authority.push(rr);
            }
            record.last_sent = Some(self.now);
            sent += 1;

            match record.state {
                UniqueState::Probing(tick) if tick >= 4 => promoted.push(id),
                UniqueState::Probing(tick) => record.state = UniqueState::Probing(tick + 1),
                _ => {}
            }
        }

        for id in promoted {
            self.sched.probing.retain(|other| *other != id);
            if let Some(record) = self.publications.get_mut(id) {
                record.state = UniqueState::Published;
                record.tries = 0;
            }
            self.sched.push_publish(id);
            self.sched.publish_at = self.now;
        }

        if sent > 0 {
            self.sched.probe_at = self.now + PROBE_INTERVAL;
        }

        sent
    }

    /// Retransmit due queries with their known answers attached, and
    /// quiesce queries that have exhausted their retries.
    fn query_packet(&mut self, message: &mut Message, len: &mut usize) -> usize {
        let rclass = self.rclass();
        let mut sent = 0;

        for query in self.queries.due(self.now) {
            if !self.queries.contains(query) {
                // a callback fired below may have deregistered it
                continue;
            }

            let (name, qtype, tries) = {
                let Some(entry) = self.queries.get(query) else {
                    continue;
                };
                (entry.name.clone(), entry.qtype, entry.tries)
            };

            if tries >= QUERY_TRIES {
                // out of retries: drop what has expired, then wait for
                // the survivors to near their own expiry
                let events = self.cache.expire_bucket_of(&name, self.now);
                self.dispatch_expiry(events);

                if let Some(entry) = self.queries.get_mut(query) {
                    entry.tries = 0;
                    entry.next_try = self
                        .cache
                        .earliest_expiry(&name, qtype)
                        .and_then(|at| at.checked_sub(Duration::from_secs(7)));
                }
                continue;
            }

            message.questions.push(Question {
                name: name.clone(),
                qtype,
                qclass: QueryClass::Record(rclass),
                unicast_response: false,
            });
            *len += name.octets.len() + 4;
            sent += 1;

            if let Some(entry) = self.queries.get_mut(query) {
                entry.tries += 1;
                entry.next_try = Some(self.now + Duration::from_secs(u64::from(entry.tries)));
            }

            // known-answer suppression: show what we already hold,
            // unless it is about to expire anyway
            for (mut rr, expires_at) in self.cache.answers(&name, qtype) {
                if expires_at <= self.now + Duration::from_secs(8) {
                    continue;
                }
                if *len + rr.wire_len_estimate() >= self.frame {
                    break;
                }
                rr.ttl = remaining_secs(expires_at, self.now);
                *len += rr.wire_len_estimate();
                message.answers.push(rr);
            }
        }

        self.queries.recompute_checkpoint();
        sent
    }
}

#[derive(Clone, Copy)]
enum AnswerQueue {
    Now,
    Pause,
}

#[allow(clippy::cast_possible_truncation)]
fn remaining_secs(expires_at: Instant, now: Instant) -> u32 {
    expires_at
        .saturating_duration_since(now)
        .as_secs()
        .min(u64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use mdns_types::protocol::types::test_util::*;

    fn engine() -> (Engine<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        (Engine::with_clock(clock.clone(), 1, 1000), clock)
    }

    #[test]
    fn sleep_is_zero_with_immediate_work() {
        let (mut engine, _clock) = engine();

        let id = engine.publish_unique(
            domain("host.local."),
            RecordType::A,
            120,
            Box::new(|_, _| {}),
        );
        engine.set_ip(id, std::net::Ipv4Addr::new(10, 0, 0, 5));

        // probing starts due immediately
        assert_eq!(Duration::ZERO, engine.sleep());
    }

    #[test]
    fn idle_engine_sleeps_until_gc() {
        let (mut engine, _clock) = engine();
        assert_eq!(GC_INTERVAL, engine.sleep());
    }

    #[test]
    fn set_data_on_published_record_restarts_probing() {
        let (mut engine, clock) = engine();

        let id = engine.publish_unique(
            domain("host.local."),
            RecordType::A,
            120,
            Box::new(|_, _| {}),
        );
        engine.set_ip(id, std::net::Ipv4Addr::new(10, 0, 0, 5));

        // run probing to completion
        for _ in 0..4 {
            assert!(engine.next_packet().is_some());
            clock.advance(Duration::from_millis(250));
        }
        assert_eq!(
            Some(UniqueState::Published),
            engine.publications.get(id).map(|r| r.state)
        );

        engine.set_ip(id, std::net::Ipv4Addr::new(10, 0, 0, 6));
        assert_eq!(
            Some(UniqueState::Probing(1)),
            engine.publications.get(id).map(|r| r.state)
        );
        assert!(engine.sched.probing.contains(&id));
    }

    #[test]
    fn stale_record_id_is_ignored() {
        let (mut engine, _clock) = engine();

        let id = engine.publish_shared(domain("x._http._tcp.local."), RecordType::PTR, 120);
        engine.set_host(id, domain("host.local."));
        engine.done(id);

        // drain the goodbye, then poke the stale handle
        while engine.next_packet().is_some() {}
        engine.set_host(id, domain("other.local."));
        engine.done(id);
        assert!(engine.next_packet().is_none());
    }
}
