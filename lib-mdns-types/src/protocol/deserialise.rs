//! Deserialisation of DNS messages from the network.  See the `types`
//! module for details of the format.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::protocol::types::*;

impl Message {
    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        if octets.len() > MAX_PACKET_LEN {
            return Err(Error::PacketTooLong);
        }

        Self::deserialise(&mut ConsumableBuffer::new(octets))
    }

    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let wire_header = WireHeader::deserialise(buffer)?;
        let id = wire_header.header.id;

        // the smallest possible question is 5 octets and the smallest
        // possible record is 11, so counts which could not fit in the
        // rest of the datagram are hostile.
        let entries = usize::from(wire_header.qdcount) * 5
            + (usize::from(wire_header.ancount)
                + usize::from(wire_header.nscount)
                + usize::from(wire_header.arcount))
                * 11;
        if entries > buffer.remaining() {
            return Err(Error::CountsTooLarge(id));
        }

        let mut questions = Vec::with_capacity(wire_header.qdcount.into());
        let mut answers = Vec::with_capacity(wire_header.ancount.into());
        let mut authority = Vec::with_capacity(wire_header.nscount.into());
        let mut additional = Vec::with_capacity(wire_header.arcount.into());

        for _ in 0..wire_header.qdcount {
            questions.push(Question::deserialise(id, buffer)?);
        }
        for _ in 0..wire_header.ancount {
            answers.push(ResourceRecord::deserialise(id, buffer)?);
        }
        for _ in 0..wire_header.nscount {
            authority.push(ResourceRecord::deserialise(id, buffer)?);
        }
        for _ in 0..wire_header.arcount {
            additional.push(ResourceRecord::deserialise(id, buffer)?);
        }

        Ok(Self {
            header: wire_header.header,
            questions,
            answers,
            authority,
            additional,
        })
    }
}

impl WireHeader {
    /// # Errors
    ///
    /// If the header is too short.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let id = buffer.next_u16().ok_or(Error::CompletelyBusted)?;
        let flags1 = buffer.next_u8().ok_or(Error::HeaderTooShort(id))?;
        let flags2 = buffer.next_u8().ok_or(Error::HeaderTooShort(id))?;
        let qdcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let ancount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let nscount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let arcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;

        Ok(Self {
            header: Header {
                id,
                is_response: flags1 & HEADER_MASK_QR != 0,
                opcode: Opcode::from((flags1 & HEADER_MASK_OPCODE) >> HEADER_OFFSET_OPCODE),
                is_authoritative: flags1 & HEADER_MASK_AA != 0,
                is_truncated: flags1 & HEADER_MASK_TC != 0,
                recursion_desired: flags1 & HEADER_MASK_RD != 0,
                recursion_available: flags2 & HEADER_MASK_RA != 0,
                rcode: Rcode::from((flags2 & HEADER_MASK_RCODE) >> HEADER_OFFSET_RCODE),
            },
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }
}

impl Question {
    /// # Errors
    ///
    /// If the question cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let qtype = buffer
            .next_u16()
            .map(QueryType::from)
            .ok_or(Error::QuestionTooShort(id))?;
        let raw_class = buffer.next_u16().ok_or(Error::QuestionTooShort(id))?;

        Ok(Self {
            name,
            qtype,
            qclass: QueryClass::from(raw_class & !CLASS_FLAG_MASK),
            unicast_response: raw_class & CLASS_FLAG_MASK != 0,
        })
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the record cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let rtype = buffer
            .next_u16()
            .map(RecordType::from)
            .ok_or(Error::ResourceRecordTooShort(id))?;
        let raw_class = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;
        let ttl = buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?;
        let rdlength = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;

        let rdata_start = buffer.position;

        let mut raw_rdata = || {
            if let Some(octets) = buffer.take(rdlength as usize) {
                Ok(octets.to_vec())
            } else {
                Err(Error::ResourceRecordTooShort(id))
            }
        };

        // for records which include domain names, deserialise them to
        // expand pointers.
        let rtype_with_data = match rtype {
            RecordType::A => RecordTypeWithData::A {
                address: Ipv4Addr::from(
                    buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                ),
            },
            RecordType::NS => RecordTypeWithData::NS {
                nsdname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::CNAME => RecordTypeWithData::CNAME {
                cname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::PTR => RecordTypeWithData::PTR {
                ptrdname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::TXT => RecordTypeWithData::TXT {
                octets: raw_rdata()?,
            },
            RecordType::AAAA => {
                let mut octets = [0u8; 16];
                for octet in &mut octets {
                    *octet = buffer.next_u8().ok_or(Error::ResourceRecordTooShort(id))?;
                }
                RecordTypeWithData::AAAA {
                    address: Ipv6Addr::from(octets),
                }
            }
            RecordType::SRV => RecordTypeWithData::SRV {
                priority: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                weight: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                port: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                target: DomainName::deserialise(id, buffer)?,
            },
            RecordType::Unknown(tag) => RecordTypeWithData::Unknown {
                tag,
                octets: raw_rdata()?,
            },
        };

        let rdata_stop = buffer.position;

        if rdata_stop == rdata_start + (rdlength as usize) {
            Ok(Self {
                name,
                rtype_with_data,
                rclass: RecordClass::from(raw_class & !CLASS_FLAG_MASK),
                cache_flush: raw_class & CLASS_FLAG_MASK != 0,
                ttl,
            })
        } else {
            Err(Error::ResourceRecordInvalid(id))
        }
    }
}

impl DomainName {
    /// # Errors
    ///
    /// If the domain cannot be parsed.
    #[allow(clippy::missing_panics_doc)]
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let mut octets = Vec::<u8>::with_capacity(DOMAINNAME_MAX_LEN);
        let mut labels = Vec::<Vec<u8>>::with_capacity(5);
        let start = buffer.position;

        'outer: loop {
            let size = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;

            if usize::from(size) <= LABEL_MAX_LEN {
                octets.push(size);

                if size == 0 {
                    labels.push(Vec::new());
                    break 'outer;
                }

                if let Some(os) = buffer.take(size as usize) {
                    let mut label = Vec::with_capacity(os.len());
                    for o in os {
                        let octet = o.to_ascii_lowercase();
                        octets.push(octet);
                        label.push(octet);
                    }
                    labels.push(label);
                } else {
                    return Err(Error::DomainTooShort(id));
                }

                if octets.len() > DOMAINNAME_MAX_LEN {
                    break 'outer;
                }
            } else if size >= 192 {
                // this requires re-parsing the pointed-to domain -
                // not great but works for now.
                let hi = size & 0b0011_1111;
                let lo = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;
                let ptr = u16::from_be_bytes([hi, lo]).into();

                // pointer must be to an earlier record (not merely a
                // different one: an earlier one: RFC 1035 section
                // 4.1.4), which also rules out loops.
                if ptr >= start {
                    return Err(Error::DomainPointerInvalid(id));
                }

                let mut other = DomainName::deserialise(id, &mut buffer.at_offset(ptr))?;
                octets.append(&mut other.octets);
                labels.append(&mut other.labels);
                break 'outer;
            } else {
                return Err(Error::DomainLabelInvalid(id));
            }
        }

        if octets.len() <= DOMAINNAME_MAX_LEN {
            Ok(DomainName { octets, labels })
        } else {
            Err(Error::DomainTooLong(id))
        }
    }
}

/// Errors encountered when parsing a datagram.  In all the errors
/// which have a `u16` parameter, that is the ID from the header, for
/// log correlation - mDNS never answers a malformed datagram.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// The datagram is not even 2 octets long, so it doesn't even
    /// contain a valid ID.
    CompletelyBusted,

    /// The datagram is longer than `MAX_PACKET_LEN`: not something a
    /// conforming mDNS peer would send.
    PacketTooLong,

    /// The header is missing one or more required fields.
    HeaderTooShort(u16),

    /// The section counts imply more entries than the datagram could
    /// possibly hold.
    CountsTooLarge(u16),

    /// A question ends with an incomplete field.
    QuestionTooShort(u16),

    /// A resource record ends with an incomplete field.
    ResourceRecordTooShort(u16),

    /// A resource record is the wrong format.
    ResourceRecordInvalid(u16),

    /// A domain is incomplete.
    DomainTooShort(u16),

    /// A domain is over 255 octets in size.
    DomainTooLong(u16),

    /// A domain pointer points to or after the current record.
    DomainPointerInvalid(u16),

    /// A domain label is longer than 63 octets, but not a pointer.
    DomainLabelInvalid(u16),
}

impl Error {
    pub fn id(self) -> Option<u16> {
        match self {
            Error::CompletelyBusted | Error::PacketTooLong => None,
            Error::HeaderTooShort(id)
            | Error::CountsTooLarge(id)
            | Error::QuestionTooShort(id)
            | Error::ResourceRecordTooShort(id)
            | Error::ResourceRecordInvalid(id)
            | Error::DomainTooShort(id)
            | Error::DomainTooLong(id)
            | Error::DomainPointerInvalid(id)
            | Error::DomainLabelInvalid(id) => Some(id),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::CompletelyBusted => write!(f, "datagram too short to carry an ID"),
            Error::PacketTooLong => write!(f, "datagram exceeds the protocol maximum"),
            Error::HeaderTooShort(id) => write!(f, "[{id}] truncated header"),
            Error::CountsTooLarge(id) => write!(f, "[{id}] section counts exceed datagram"),
            Error::QuestionTooShort(id) => write!(f, "[{id}] truncated question"),
            Error::ResourceRecordTooShort(id) => write!(f, "[{id}] truncated resource record"),
            Error::ResourceRecordInvalid(id) => write!(f, "[{id}] malformed resource record"),
            Error::DomainTooShort(id) => write!(f, "[{id}] truncated domain name"),
            Error::DomainTooLong(id) => write!(f, "[{id}] domain name over 255 octets"),
            Error::DomainPointerInvalid(id) => write!(f, "[{id}] bad compression pointer"),
            Error::DomainLabelInvalid(id) => write!(f, "[{id}] bad label length"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// A buffer which will be consumed by the parsing process.
pub struct ConsumableBuffer<'a> {
    octets: &'a [u8],
    position: usize,
}

impl<'a> ConsumableBuffer<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self {
            octets,
            position: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.octets.len().saturating_sub(self.position)
    }

    pub fn next_u8(&mut self) -> Option<u8> {
        if self.octets.len() > self.position {
            let a = self.octets[self.position];
            self.position += 1;
            Some(a)
        } else {
            None
        }
    }

    pub fn next_u16(&mut self) -> Option<u16> {
        if self.octets.len() > self.position + 1 {
            let a = self.octets[self.position];
            let b = self.octets[self.position + 1];
            self.position += 2;
            Some(u16::from_be_bytes([a, b]))
        } else {
            None
        }
    }

    pub fn next_u32(&mut self) -> Option<u32> {
        if self.octets.len() > self.position + 3 {
            let a = self.octets[self.position];
            let b = self.octets[self.position + 1];
            let c = self.octets[self.position + 2];
            let d = self.octets[self.position + 3];
            self.position += 4;
            Some(u32::from_be_bytes([a, b, c, d]))
        } else {
            None
        }
    }

    pub fn take(&mut self, size: usize) -> Option<&'a [u8]> {
        if self.octets.len() >= self.position + size {
            let slice = &self.octets[self.position..self.position + size];
            self.position += size;
            Some(slice)
        } else {
            None
        }
    }

    pub fn at_offset(&self, position: usize) -> ConsumableBuffer<'a> {
        Self {
            octets: self.octets,
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::test_util::*;

    #[test]
    fn deserialise_rejects_forward_pointer() {
        // header, then a question whose name points at itself
        let mut packet = vec![0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        packet.extend_from_slice(&[0b1100_0000, 12, 0, 1, 0, 1]);

        assert_eq!(
            Err(Error::DomainPointerInvalid(0)),
            Message::from_octets(&packet)
        );
    }

    #[test]
    fn deserialise_rejects_oversized_label() {
        let mut packet = vec![0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        packet.push(64); // not a pointer, not a valid label length
        packet.extend_from_slice(&[b'x'; 64]);
        packet.extend_from_slice(&[0, 0, 1, 0, 1]);

        assert_eq!(
            Err(Error::DomainLabelInvalid(0)),
            Message::from_octets(&packet)
        );
    }

    #[test]
    fn deserialise_rejects_hostile_counts() {
        // claims 65535 answers in a 12-octet datagram
        let packet = vec![0, 0, 0, 0, 0, 0, 255, 255, 0, 0, 0, 0];

        assert_eq!(Err(Error::CountsTooLarge(0)), Message::from_octets(&packet));
    }

    #[test]
    fn deserialise_rejects_truncated_rdata() {
        let mut packet = vec![0, 0, 0b1000_0000, 0, 0, 0, 0, 1, 0, 0, 0, 0];
        let rr = a_record("host.local.", std::net::Ipv4Addr::new(10, 0, 0, 5));
        let mut buf = crate::protocol::serialise::WritableBuffer::default();
        rr.serialise(&mut buf).unwrap();
        packet.extend_from_slice(&buf.octets[..buf.octets.len() - 2]);

        assert_eq!(
            Err(Error::ResourceRecordTooShort(0)),
            Message::from_octets(&packet)
        );
    }

    #[test]
    fn deserialise_lowercases_names() {
        let packet = {
            let mut p = vec![0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
            p.extend_from_slice(&[4, b'H', b'O', b'S', b'T', 5, b'l', b'o', b'c', b'a', b'l', 0]);
            p.extend_from_slice(&[0, 1, 0, 1]);
            p
        };

        let message = Message::from_octets(&packet).unwrap();
        assert_eq!(domain("host.local."), message.questions[0].name);
    }

    #[test]
    fn deserialise_splits_cache_flush_bit() {
        let mut message = Message::response();
        let mut rr = a_record("host.local.", std::net::Ipv4Addr::new(10, 0, 0, 5));
        rr.cache_flush = true;
        message.answers.push(rr);

        let octets = message.clone().to_octets().unwrap();
        let parsed = Message::from_octets(&octets).unwrap();

        assert!(parsed.answers[0].cache_flush);
        assert_eq!(RecordClass::IN, parsed.answers[0].rclass);
    }
}
