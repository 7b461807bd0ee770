//! End-to-end protocol scenarios, driven against a manual clock: no
//! test here sleeps or touches a socket.

use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

use mdns_responder::clock::ManualClock;
use mdns_responder::engine::{Engine, Outgoing};
use mdns_responder::query::QueryAction;
use mdns_responder::MDNS_PORT;
use mdns_types::protocol::types::test_util::*;
use mdns_types::protocol::types::*;

fn engine() -> (Engine<ManualClock>, ManualClock) {
    let clock = ManualClock::new();
    (Engine::with_clock(clock.clone(), 1, 1000), clock)
}

fn multicast_src() -> SocketAddr {
    SocketAddr::new(Ipv4Addr::new(192, 0, 2, 50).into(), MDNS_PORT)
}

fn drain(engine: &mut Engine<ManualClock>) -> Vec<Outgoing> {
    let mut out = Vec::new();
    while let Some(packet) = engine.next_packet() {
        out.push(packet);
    }
    out
}

/// Step the clock one second at a time, draining after each step.
fn run_for(engine: &mut Engine<ManualClock>, clock: &ManualClock, seconds: u64) -> Vec<Outgoing> {
    let mut out = Vec::new();
    for _ in 0..seconds {
        clock.advance(Duration::from_secs(1));
        out.append(&mut drain(engine));
    }
    out
}

#[test]
fn probe_publish_goodbye() {
    let (mut engine, clock) = engine();
    let conflicts = Rc::new(RefCell::new(Vec::new()));

    let record = {
        let conflicts = Rc::clone(&conflicts);
        engine.publish_unique(
            domain("host.local."),
            RecordType::A,
            120,
            Box::new(move |name, rtype| {
                conflicts.borrow_mut().push((name.to_dotted_string(), rtype));
            }),
        )
    };
    engine.set_ip(record, Ipv4Addr::new(10, 0, 0, 5));

    // four probes, at least 250ms apart
    for probe in 0..4 {
        let out = engine.next_packet().expect("probe packet");
        let message = out.message;

        assert!(!message.header.is_response, "probe {probe} is a query");
        assert_eq!(1, message.questions.len());
        assert_eq!(domain("host.local."), message.questions[0].name);
        assert_eq!(
            QueryType::Record(RecordType::A),
            message.questions[0].qtype
        );
        assert_eq!(1, message.authority.len());
        assert_eq!(
            RecordTypeWithData::A {
                address: Ipv4Addr::new(10, 0, 0, 5)
            },
            message.authority[0].rtype_with_data
        );

        if probe < 3 {
            // nothing more until the probe timer fires again
            assert!(engine.next_packet().is_none());
            assert_eq!(Duration::from_millis(250), engine.sleep());
            clock.advance(Duration::from_millis(250));
        }
    }

    // announcement with the cache-flush bit, then three retries at 2s
    for announce in 0..4 {
        let out = engine.next_packet().expect("announce packet");
        let message = out.message;

        assert!(message.header.is_response, "announce {announce}");
        assert!(message.header.is_authoritative);
        assert_eq!(1, message.answers.len());
        assert!(message.answers[0].cache_flush);
        assert_eq!(RecordClass::IN, message.answers[0].rclass);
        assert_eq!(120, message.answers[0].ttl);

        assert!(engine.next_packet().is_none());
        if announce < 3 {
            assert_eq!(Duration::from_secs(2), engine.sleep());
            clock.advance(Duration::from_secs(2));
        }
    }

    // de-listing broadcasts a goodbye
    engine.done(record);
    let out = engine.next_packet().expect("goodbye packet");
    assert_eq!(1, out.message.answers.len());
    assert_eq!(0, out.message.answers[0].ttl);
    assert!(engine.next_packet().is_none());

    assert!(conflicts.borrow().is_empty());
}

#[test]
fn probe_conflict_delists_and_fires_handler_once() {
    let (mut engine, clock) = engine();
    let conflicts = Rc::new(RefCell::new(Vec::new()));

    let record = {
        let conflicts = Rc::clone(&conflicts);
        engine.publish_unique(
            domain("host.local."),
            RecordType::A,
            120,
            Box::new(move |name, rtype| {
                conflicts.borrow_mut().push((name.to_dotted_string(), rtype));
            }),
        )
    };
    engine.set_ip(record, Ipv4Addr::new(10, 0, 0, 5));

    // first probe goes out
    assert!(engine.next_packet().is_some());

    // a simultaneous prober claims the same name with different data
    let mut incoming = Message::query(0);
    incoming
        .questions
        .push(question("host.local.", QueryType::Record(RecordType::A)));
    incoming
        .authority
        .push(a_record("host.local.", Ipv4Addr::new(10, 0, 0, 9)));
    engine.receive(&incoming, multicast_src());

    assert_eq!(
        vec![("host.local.".to_string(), RecordType::A)],
        conflicts.borrow().clone()
    );

    // the record never appears on the wire again
    clock.advance(Duration::from_millis(250));
    assert!(engine.next_packet().is_none());
    assert!(run_for(&mut engine, &clock, 5).is_empty());
}

#[test]
fn cache_refresh_and_expiry_callback() {
    let (mut engine, clock) = engine();
    let answers = Rc::new(RefCell::new(Vec::new()));

    {
        let answers = Rc::clone(&answers);
        engine.query(
            &domain("_http._tcp.local."),
            QueryType::Record(RecordType::PTR),
            Some(Box::new(move |rr| {
                answers.borrow_mut().push(rr.ttl);
                QueryAction::Continue
            })),
        );
    }

    // the new question goes straight out
    let out = engine.next_packet().expect("initial query");
    assert!(!out.message.header.is_response);
    assert_eq!(domain("_http._tcp.local."), out.message.questions[0].name);

    // an answer arrives with a 60 second TTL
    let mut response = Message::response();
    response.answers.push(ResourceRecord {
        ttl: 60,
        ..ptr_record("_http._tcp.local.", "srv1._http._tcp.local.")
    });
    engine.receive(&response, multicast_src());

    assert_eq!(vec![60], answers.borrow().clone());

    // retransmissions while retries last; the cached answer rides
    // along as a known answer with its TTL counted down
    let retry = run_for(&mut engine, &clock, 2)
        .into_iter()
        .find(|out| !out.message.questions.is_empty())
        .expect("retry with known answer");
    assert_eq!(1, retry.message.answers.len());
    assert!(retry.message.answers[0].ttl <= 60);

    // the entry is stored with half-life expiry (60/2 + 8 = 38s): the
    // engine re-queries around then, and expires the record shortly
    // after, firing the callback one last time with TTL 0
    run_for(&mut engine, &clock, 45);

    let seen = answers.borrow().clone();
    assert_eq!(Some(&0), seen.last(), "expiry callback fired: {seen:?}");
    assert!(seen.iter().filter(|ttl| **ttl == 0).count() == 1);

    // quiesced: no registered retry horizon remains
    assert!(engine.sleep() > Duration::from_secs(3600));
}

#[test]
fn name_compression_shares_suffix_bytes() {
    let mut message = Message::response();
    message
        .answers
        .push(ptr_record("one.local.", "srv.local."));
    message
        .answers
        .push(ptr_record("two.local.", "srv.local."));
    message
        .answers
        .push(ptr_record("six.local.", "srv.local."));

    let octets = message.clone().to_octets().unwrap();

    // "local" is spelled out exactly once
    let literal = [5, b'l', b'o', b'c', b'a', b'l'];
    let occurrences = octets
        .windows(literal.len())
        .filter(|window| **window == literal)
        .count();
    assert_eq!(1, occurrences);

    // later names compress into back-pointers
    let pointers = octets
        .iter()
        .filter(|octet| **octet & 0b1100_0000 == 0b1100_0000)
        .count();
    assert!(pointers >= 2, "expected pointers, got {pointers}");

    // and the compressed packet still decodes to the same message
    assert_eq!(Ok(message), Message::from_octets(&octets));
}

#[test]
fn unicast_reply_to_legacy_questioner() {
    let (mut engine, clock) = engine();

    let record = engine.publish_unique(
        domain("host.local."),
        RecordType::A,
        120,
        Box::new(|_, _| {}),
    );
    engine.set_ip(record, Ipv4Addr::new(10, 0, 0, 5));

    // run probing and announcing to completion
    for _ in 0..4 {
        assert!(engine.next_packet().is_some());
        clock.advance(Duration::from_millis(250));
    }
    run_for(&mut engine, &clock, 10);

    // a legacy questioner asks from an ephemeral port
    let legacy: SocketAddr = "192.0.2.7:54321".parse().unwrap();
    let mut incoming = Message::query(0x1d2c);
    incoming
        .questions
        .push(question("host.local.", QueryType::Record(RecordType::A)));
    engine.receive(&incoming, legacy);

    // first a unicast reply echoing the transaction id...
    let reply = engine.next_packet().expect("unicast reply");
    assert_eq!(legacy, reply.dest);
    assert_eq!(0x1d2c, reply.message.header.id);
    assert_eq!(1, reply.message.answers.len());
    assert_eq!(
        RecordTypeWithData::A {
            address: Ipv4Addr::new(10, 0, 0, 5)
        },
        reply.message.answers[0].rtype_with_data
    );
    assert!(!reply.message.answers[0].cache_flush);

    // ...then the same data multicast
    let multicast = engine.next_packet().expect("multicast answer");
    assert_eq!(MDNS_PORT, multicast.dest.port());
    assert_eq!(
        reply.message.answers[0].rtype_with_data,
        multicast.message.answers[0].rtype_with_data
    );
    assert!(multicast.message.answers[0].cache_flush);
}

#[test]
fn known_answer_suppression() {
    let (mut engine, clock) = engine();

    let record = engine.publish_shared(domain("_http._tcp.local."), RecordType::PTR, 120);
    engine.set_host(record, domain("one._http._tcp.local."));

    // announce cycle runs out
    run_for(&mut engine, &clock, 10);

    // the questioner already knows our answer
    let mut incoming = Message::query(0);
    incoming
        .questions
        .push(question("_http._tcp.local.", QueryType::Record(RecordType::PTR)));
    incoming
        .answers
        .push(ptr_record("_http._tcp.local.", "one._http._tcp.local."));
    engine.receive(&incoming, multicast_src());

    // no reply inside the pause window, or after it
    assert!(engine.next_packet().is_none());
    clock.advance(Duration::from_millis(200));
    assert!(engine.next_packet().is_none());

    // but a questioner with a different answer set does get a reply
    let mut incoming = Message::query(0);
    incoming
        .questions
        .push(question("_http._tcp.local.", QueryType::Record(RecordType::PTR)));
    incoming
        .answers
        .push(ptr_record("_http._tcp.local.", "other._http._tcp.local."));
    engine.receive(&incoming, multicast_src());

    clock.advance(Duration::from_millis(200));
    let reply = engine.next_packet().expect("reply after pause");
    assert_eq!(
        RecordTypeWithData::PTR {
            ptrdname: domain("one._http._tcp.local.")
        },
        reply.message.answers[0].rtype_with_data
    );
}

#[test]
fn delisting_a_shared_record_emits_an_immediate_goodbye() {
    let (mut engine, clock) = engine();

    let record = engine.publish_shared(domain("_http._tcp.local."), RecordType::PTR, 120);
    engine.set_host(record, domain("one._http._tcp.local."));
    run_for(&mut engine, &clock, 10);

    // a reload de-lists, drains without advancing the clock, then
    // flushes; the goodbye must not be parked behind a pause window
    // the flush would wipe
    engine.done(record);
    assert_eq!(Duration::ZERO, engine.sleep());

    let out = engine.next_packet().expect("goodbye");
    assert_eq!(1, out.message.answers.len());
    assert_eq!(0, out.message.answers[0].ttl);
    assert!(engine.next_packet().is_none());

    engine.flush();
    assert!(drain(&mut engine).is_empty());
}

#[test]
fn shutdown_broadcasts_goodbyes_for_everything() {
    let (mut engine, clock) = engine();

    let ptr = engine.publish_shared(domain("_http._tcp.local."), RecordType::PTR, 120);
    engine.set_host(ptr, domain("one._http._tcp.local."));
    let a = engine.publish_unique(
        domain("host.local."),
        RecordType::A,
        120,
        Box::new(|_, _| {}),
    );
    engine.set_ip(a, Ipv4Addr::new(10, 0, 0, 5));

    run_for(&mut engine, &clock, 10);

    engine.shutdown();
    let packets = drain(&mut engine);
    let goodbyes: Vec<&ResourceRecord> = packets
        .iter()
        .flat_map(|out| out.message.answers.iter())
        .collect();

    assert_eq!(2, goodbyes.len());
    assert!(goodbyes.iter().all(|rr| rr.ttl == 0));

    // drained: the engine is ready to be dropped
    assert!(engine.next_packet().is_none());

    // and incoming traffic is ignored
    let mut incoming = Message::query(0);
    incoming
        .questions
        .push(question("host.local.", QueryType::Record(RecordType::A)));
    engine.receive(&incoming, multicast_src());
    assert!(engine.next_packet().is_none());
}

#[test]
fn flush_reprobes_unique_records() {
    let (mut engine, clock) = engine();

    let record = engine.publish_unique(
        domain("host.local."),
        RecordType::A,
        120,
        Box::new(|_, _| {}),
    );
    engine.set_ip(record, Ipv4Addr::new(10, 0, 0, 5));
    run_for(&mut engine, &clock, 10);

    engine.flush();

    // probing starts over: the next packet is a probe query again
    let out = engine.next_packet().expect("re-probe");
    assert!(!out.message.header.is_response);
    assert_eq!(domain("host.local."), out.message.questions[0].name);
    assert_eq!(1, out.message.authority.len());
}

#[test]
fn query_retries_three_times_then_quiesces() {
    let (mut engine, clock) = engine();

    engine.query(
        &domain("nothing.local."),
        QueryType::Record(RecordType::A),
        Some(Box::new(|_| QueryAction::Continue)),
    );

    let mut transmissions = 0;
    transmissions += drain(&mut engine)
        .iter()
        .filter(|out| !out.message.questions.is_empty())
        .count();
    transmissions += run_for(&mut engine, &clock, 20)
        .iter()
        .filter(|out| !out.message.questions.is_empty())
        .count();

    // initial transmission plus the 1s/2s/3s backoff retries, but with
    // nothing cached the query then goes quiet
    assert_eq!(3, transmissions);
    assert!(run_for(&mut engine, &clock, 20).is_empty());
}

#[test]
fn registering_a_query_delivers_cached_answers_immediately() {
    let (mut engine, _clock) = engine();

    let mut response = Message::response();
    response
        .answers
        .push(ptr_record("_http._tcp.local.", "one._http._tcp.local."));
    response
        .answers
        .push(ptr_record("_http._tcp.local.", "two._http._tcp.local."));
    engine.receive(&response, multicast_src());

    let answers = Rc::new(RefCell::new(Vec::new()));
    {
        let answers = Rc::clone(&answers);
        engine.query(
            &domain("_http._tcp.local."),
            QueryType::Record(RecordType::PTR),
            Some(Box::new(move |rr| {
                answers.borrow_mut().push(rr.rtype_with_data.clone());
                QueryAction::Continue
            })),
        );
    }

    assert_eq!(2, answers.borrow().len());
}

#[test]
fn callback_sentinel_deregisters_query() {
    let (mut engine, _clock) = engine();
    let calls = Rc::new(RefCell::new(0));

    {
        let calls = Rc::clone(&calls);
        engine.query(
            &domain("host.local."),
            QueryType::Record(RecordType::A),
            Some(Box::new(move |_| {
                *calls.borrow_mut() += 1;
                QueryAction::Done
            })),
        );
    }

    let mut response = Message::response();
    response
        .answers
        .push(a_record("host.local.", Ipv4Addr::new(10, 0, 0, 5)));
    engine.receive(&response, multicast_src());
    engine.receive(&response, multicast_src());

    // deregistered after the first delivery
    assert_eq!(1, *calls.borrow());
}

#[test]
fn list_returns_remaining_ttls() {
    let (mut engine, clock) = engine();

    let mut response = Message::response();
    response
        .answers
        .push(a_record("host.local.", Ipv4Addr::new(10, 0, 0, 5)));
    engine.receive(&response, multicast_src());

    clock.advance(Duration::from_secs(10));
    let listed = engine.list(&domain("host.local."), QueryType::Record(RecordType::A));

    assert_eq!(1, listed.len());
    // stored with half-life expiry: 120/2 + 8 - 10 elapsed
    assert_eq!(58, listed[0].ttl);
}

#[test]
fn receive_hook_sees_answers_before_caching() {
    let (mut engine, _clock) = engine();
    let seen = Rc::new(RefCell::new(Vec::new()));

    {
        let seen = Rc::clone(&seen);
        engine.on_record_received(Box::new(move |rr| {
            seen.borrow_mut().push(rr.name.to_dotted_string());
        }));
    }

    let mut response = Message::response();
    response
        .answers
        .push(a_record("host.local.", Ipv4Addr::new(10, 0, 0, 5)));
    engine.receive(&response, multicast_src());

    assert_eq!(vec!["host.local.".to_string()], seen.borrow().clone());
}
