//! The engine's timer queues.
//!
//! Four FIFO queues of record handles (`a_now`, `a_pause`, `probing`,
//! `a_publish`) plus the unicast-reply queue, each guarded by an
//! absolute deadline.  A record may sit on at most one answer queue at
//! a time; pushes are idempotent and removal clears a handle from
//! everything, including unicast replies that reference it.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Instant;

use crate::publish::RecordId;

/// A pending unicast reply to a legacy (non-5353) questioner.
#[derive(Debug, Clone)]
pub struct UnicastReply {
    /// Transaction id to echo.
    pub id: u16,
    pub dest: SocketAddr,
    pub record: RecordId,
}

pub struct Scheduler {
    /// Answers to multicast as soon as possible.
    pub a_now: VecDeque<RecordId>,

    /// Shared-record answers aggregated behind a short random pause.
    pub a_pause: VecDeque<RecordId>,

    /// Unique records being probed, in insertion order.
    pub probing: VecDeque<RecordId>,

    /// Records in the announce cycle.
    pub a_publish: VecDeque<RecordId>,

    pub unicast: VecDeque<UnicastReply>,

    pub pause_at: Instant,
    pub probe_at: Instant,
    pub publish_at: Instant,
}

impl Scheduler {
    pub fn new(now: Instant) -> Self {
        Self {
            a_now: VecDeque::new(),
            a_pause: VecDeque::new(),
            probing: VecDeque::new(),
            a_publish: VecDeque::new(),
            unicast: VecDeque::new(),
            pause_at: now,
            probe_at: now,
            publish_at: now,
        }
    }

    pub fn push_now(&mut self, id: RecordId) {
        push_unique(&mut self.a_now, id);
    }

    pub fn push_pause(&mut self, id: RecordId) {
        push_unique(&mut self.a_pause, id);
    }

    pub fn push_probing(&mut self, id: RecordId) {
        push_unique(&mut self.probing, id);
    }

    pub fn push_publish(&mut self, id: RecordId) {
        push_unique(&mut self.a_publish, id);
    }

    /// Take `id` off every queue, and drop unicast replies that would
    /// read it.
    pub fn remove(&mut self, id: RecordId) {
        self.a_now.retain(|other| *other != id);
        self.a_pause.retain(|other| *other != id);
        self.probing.retain(|other| *other != id);
        self.a_publish.retain(|other| *other != id);
        self.unicast.retain(|reply| reply.record != id);
    }

    /// Take `id` off the answer queues only, leaving probing alone.
    pub fn remove_from_answer_queues(&mut self, id: RecordId) {
        self.a_now.retain(|other| *other != id);
        self.a_pause.retain(|other| *other != id);
        self.a_publish.retain(|other| *other != id);
    }

    /// Is there work that should go out without any sleeping?
    pub fn has_immediate(&self) -> bool {
        !self.unicast.is_empty() || !self.a_now.is_empty()
    }

    pub fn clear_answer_queues(&mut self) {
        self.a_now.clear();
        self.a_pause.clear();
        self.a_publish.clear();
        self.unicast.clear();
    }
}

fn push_unique(queue: &mut VecDeque<RecordId>, id: RecordId) {
    if !queue.contains(&id) {
        queue.push_back(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::{Publications, UniqueState};
    use mdns_types::protocol::types::test_util::*;
    use mdns_types::protocol::types::RecordType;

    fn some_record() -> RecordId {
        let mut pubs = Publications::new();
        pubs.insert(
            domain("host.local."),
            RecordType::A,
            120,
            UniqueState::Shared,
            None,
        )
    }

    #[test]
    fn pushes_are_idempotent() {
        let mut sched = Scheduler::new(Instant::now());
        let id = some_record();

        sched.push_now(id);
        sched.push_now(id);

        assert_eq!(1, sched.a_now.len());
    }

    #[test]
    fn remove_clears_every_queue() {
        let mut sched = Scheduler::new(Instant::now());
        let id = some_record();

        sched.push_now(id);
        sched.push_pause(id);
        sched.push_probing(id);
        sched.push_publish(id);
        sched.unicast.push_back(UnicastReply {
            id: 7,
            dest: "192.0.2.7:54321".parse().unwrap(),
            record: id,
        });

        sched.remove(id);

        assert!(sched.a_now.is_empty());
        assert!(sched.a_pause.is_empty());
        assert!(sched.probing.is_empty());
        assert!(sched.a_publish.is_empty());
        assert!(sched.unicast.is_empty());
        assert!(!sched.has_immediate());
    }
}
