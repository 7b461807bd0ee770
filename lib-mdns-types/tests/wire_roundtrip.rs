use fake::{Fake, Faker};

use mdns_types::protocol::deserialise::ConsumableBuffer;
use mdns_types::protocol::serialise::WritableBuffer;
use mdns_types::protocol::types::*;

#[test]
fn roundtrip_message() {
    for _ in 0..100 {
        let original = arbitrary_message();
        let deserialised = Message::from_octets(&original.clone().to_octets().unwrap());

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_question() {
    for _ in 0..100 {
        let original = arbitrary_question();

        let mut buffer = WritableBuffer::default();
        original.clone().serialise(&mut buffer).unwrap();
        let deserialised = Question::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets));

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_resourcerecord() {
    for _ in 0..100 {
        let original = arbitrary_resourcerecord();

        let mut buffer = WritableBuffer::default();
        original.clone().serialise(&mut buffer).unwrap();
        let deserialised =
            ResourceRecord::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets));

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_domainname() {
    for _ in 0..100 {
        let original = arbitrary_domainname();

        let mut buffer = WritableBuffer::default();
        buffer.write_domain_name(&original).unwrap();
        let deserialised = DomainName::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets));

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn compressed_never_longer_than_uncompressed() {
    for _ in 0..100 {
        let message = arbitrary_message();

        let mut uncompressed = 12;
        for q in &message.questions {
            uncompressed += q.wire_len_estimate();
        }
        for rr in message
            .answers
            .iter()
            .chain(message.authority.iter())
            .chain(message.additional.iter())
        {
            uncompressed += rr.wire_len_estimate();
        }

        let octets = message.to_octets().unwrap();
        assert!(octets.len() <= uncompressed);
    }
}

#[test]
fn truncating_any_valid_message_does_not_panic() {
    for _ in 0..50 {
        let octets = arbitrary_message().to_octets().unwrap();
        for cut in 0..octets.len().min(64) {
            // most truncations fail to parse; none may panic
            let _ = Message::from_octets(&octets[..cut]);
        }
    }
}

fn arbitrary_message() -> Message {
    let mut message = Message {
        header: arbitrary_header(),
        questions: Vec::new(),
        answers: Vec::new(),
        authority: Vec::new(),
        additional: Vec::new(),
    };

    // keep runtime (and packet size) sane
    for _ in 0..(0..4).fake() {
        message.questions.push(arbitrary_question());
    }
    for _ in 0..(0..4).fake() {
        message.answers.push(arbitrary_resourcerecord());
    }
    for _ in 0..(0..4).fake() {
        message.authority.push(arbitrary_resourcerecord());
    }
    for _ in 0..(0..4).fake() {
        message.additional.push(arbitrary_resourcerecord());
    }

    message
}

fn arbitrary_header() -> Header {
    Header {
        id: Faker.fake(),
        is_response: Faker.fake(),
        opcode: arbitrary_opcode(),
        is_authoritative: Faker.fake(),
        is_truncated: Faker.fake(),
        recursion_desired: Faker.fake(),
        recursion_available: Faker.fake(),
        rcode: arbitrary_rcode(),
    }
}

fn arbitrary_question() -> Question {
    Question {
        name: arbitrary_domainname(),
        qtype: arbitrary_querytype(),
        qclass: arbitrary_queryclass(),
        unicast_response: Faker.fake(),
    }
}

fn arbitrary_resourcerecord() -> ResourceRecord {
    ResourceRecord {
        name: arbitrary_domainname(),
        rtype_with_data: arbitrary_recordtypewithdata(),
        rclass: arbitrary_recordclass(),
        cache_flush: Faker.fake(),
        ttl: Faker.fake(),
    }
}

fn arbitrary_recordtypewithdata() -> RecordTypeWithData {
    // this should match the `RecordTypeWithData` deserialisation
    match arbitrary_recordtype() {
        RecordType::A => RecordTypeWithData::A {
            address: Faker.fake(),
        },
        RecordType::NS => RecordTypeWithData::NS {
            nsdname: arbitrary_domainname(),
        },
        RecordType::CNAME => RecordTypeWithData::CNAME {
            cname: arbitrary_domainname(),
        },
        RecordType::PTR => RecordTypeWithData::PTR {
            ptrdname: arbitrary_domainname(),
        },
        RecordType::TXT => RecordTypeWithData::TXT {
            octets: arbitrary_octets((0..64).fake()),
        },
        RecordType::AAAA => RecordTypeWithData::AAAA {
            address: Faker.fake(),
        },
        RecordType::SRV => RecordTypeWithData::SRV {
            priority: Faker.fake(),
            weight: Faker.fake(),
            port: Faker.fake(),
            target: arbitrary_domainname(),
        },
        RecordType::Unknown(tag) => RecordTypeWithData::Unknown {
            tag,
            octets: arbitrary_octets((0..64).fake()),
        },
    }
}

fn arbitrary_domainname() -> DomainName {
    let num_labels = (1..4).fake::<usize>();
    let mut labels = Vec::<Vec<u8>>::new();
    let mut octets = Vec::<u8>::new();

    for _ in 0..num_labels {
        let label_len = (1..20).fake();
        let mut label = Vec::with_capacity(label_len as usize);
        octets.push(label_len);

        for _ in 0..label_len {
            let octet = Faker.fake::<u8>().to_ascii_lowercase();
            label.push(octet);
            octets.push(octet);
        }

        labels.push(label);
    }

    labels.push(Vec::new());
    octets.push(0);

    DomainName { labels, octets }
}

fn arbitrary_opcode() -> Opcode {
    // opcode is a 4-bit field
    (Faker.fake::<u8>() & 0b0000_1111).into()
}

fn arbitrary_rcode() -> Rcode {
    // rcode is a 4-bit field
    (Faker.fake::<u8>() & 0b0000_1111).into()
}

fn arbitrary_querytype() -> QueryType {
    Faker.fake::<u16>().into()
}

fn arbitrary_queryclass() -> QueryClass {
    Faker.fake::<u16>().into()
}

fn arbitrary_recordtype() -> RecordType {
    Faker.fake::<u16>().into()
}

fn arbitrary_recordclass() -> RecordClass {
    Faker.fake::<u16>().into()
}

fn arbitrary_octets(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(Faker.fake());
    }
    out
}
