//! Serialisation of DNS messages to the wire format, with RFC 1035
//! section 4.1.4 label compression.  See the `types` module for
//! details of the format.

use crate::protocol::types::*;

impl Message {
    /// Serialise with the protocol-wide packet cap.
    ///
    /// # Errors
    ///
    /// If the message is invalid (the `Message` type permits more
    /// states than strictly allowed) or does not fit in
    /// `MAX_PACKET_LEN` octets.
    pub fn to_octets(self) -> Result<Vec<u8>, Error> {
        self.to_octets_bounded(MAX_PACKET_LEN)
    }

    /// Serialise with a caller-chosen frame size, for transports
    /// configured below the protocol maximum.
    ///
    /// # Errors
    ///
    /// If the message is invalid or exceeds the frame.
    pub fn to_octets_bounded(self, frame: usize) -> Result<Vec<u8>, Error> {
        let mut buffer = WritableBuffer::new(frame.min(MAX_PACKET_LEN));
        self.serialise(&mut buffer)?;
        Ok(buffer.octets)
    }

    /// # Errors
    ///
    /// If the message is invalid or overflows the buffer.
    pub fn serialise(self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        let qdcount = usize_to_u16(self.questions.len())?;
        let ancount = usize_to_u16(self.answers.len())?;
        let nscount = usize_to_u16(self.authority.len())?;
        let arcount = usize_to_u16(self.additional.len())?;

        self.header.serialise(buffer)?;
        buffer.write_u16(qdcount)?;
        buffer.write_u16(ancount)?;
        buffer.write_u16(nscount)?;
        buffer.write_u16(arcount)?;

        for question in self.questions {
            question.serialise(buffer)?;
        }
        for rr in self.answers {
            rr.serialise(buffer)?;
        }
        for rr in self.authority {
            rr.serialise(buffer)?;
        }
        for rr in self.additional {
            rr.serialise(buffer)?;
        }

        Ok(())
    }
}

impl Header {
    /// # Errors
    ///
    /// If the header overflows the buffer.
    pub fn serialise(self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        // octet 1
        let flag_qr = if self.is_response { HEADER_MASK_QR } else { 0 };
        let field_opcode = HEADER_MASK_OPCODE & (u8::from(self.opcode) << HEADER_OFFSET_OPCODE);
        let flag_aa = if self.is_authoritative {
            HEADER_MASK_AA
        } else {
            0
        };
        let flag_tc = if self.is_truncated { HEADER_MASK_TC } else { 0 };
        let flag_rd = if self.recursion_desired {
            HEADER_MASK_RD
        } else {
            0
        };
        // octet 2
        let flag_ra = if self.recursion_available {
            HEADER_MASK_RA
        } else {
            0
        };
        let field_rcode = HEADER_MASK_RCODE & (u8::from(self.rcode) << HEADER_OFFSET_RCODE);

        buffer.write_u16(self.id)?;
        buffer.write_u8(flag_qr | field_opcode | flag_aa | flag_tc | flag_rd)?;
        buffer.write_u8(flag_ra | field_rcode)
    }
}

impl Question {
    /// # Errors
    ///
    /// If the question overflows the buffer.
    pub fn serialise(self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        let flag = if self.unicast_response {
            CLASS_FLAG_MASK
        } else {
            0
        };

        buffer.write_domain_name(&self.name)?;
        buffer.write_u16(self.qtype.into())?;
        buffer.write_u16(u16::from(self.qclass) | flag)
    }

    /// Worst-case (uncompressed) serialised size.
    pub fn wire_len_estimate(&self) -> usize {
        self.name.octets.len() + 4
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the record overflows the buffer, or the RDATA is too long.
    pub fn serialise(self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        let flag = if self.cache_flush { CLASS_FLAG_MASK } else { 0 };

        buffer.write_domain_name(&self.name)?;
        buffer.write_u16(self.rtype_with_data.rtype().into())?;
        buffer.write_u16(u16::from(self.rclass) | flag)?;
        buffer.write_u32(self.ttl)?;

        // filled in below
        let rdlength_index = buffer.index();
        buffer.write_u16(0)?;

        match self.rtype_with_data {
            RecordTypeWithData::A { address } => buffer.write_octets(&address.octets())?,
            RecordTypeWithData::NS { nsdname } => buffer.write_domain_name(&nsdname)?,
            RecordTypeWithData::CNAME { cname } => buffer.write_domain_name(&cname)?,
            RecordTypeWithData::PTR { ptrdname } => buffer.write_domain_name(&ptrdname)?,
            RecordTypeWithData::TXT { octets } => buffer.write_octets(&octets)?,
            RecordTypeWithData::AAAA { address } => buffer.write_octets(&address.octets())?,
            RecordTypeWithData::SRV {
                priority,
                weight,
                port,
                target,
            } => {
                buffer.write_u16(priority)?;
                buffer.write_u16(weight)?;
                buffer.write_u16(port)?;
                buffer.write_domain_name(&target)?;
            }
            RecordTypeWithData::Unknown { octets, .. } => buffer.write_octets(&octets)?,
        };

        // -2 so we don't also include the 2 octets for the rdlength
        let rdlength = usize_to_u16(buffer.index() - rdlength_index - 2)?;
        let [hi, lo] = rdlength.to_be_bytes();
        buffer.octets[rdlength_index] = hi;
        buffer.octets[rdlength_index + 1] = lo;

        Ok(())
    }

    /// Worst-case (uncompressed) serialised size: the name, the fixed
    /// fields, and the RDATA before compression.  Serialising can only
    /// shrink this, so it is safe for packing records into a frame.
    pub fn wire_len_estimate(&self) -> usize {
        let rdata = match &self.rtype_with_data {
            RecordTypeWithData::A { .. } => 4,
            RecordTypeWithData::NS { nsdname } => nsdname.octets.len(),
            RecordTypeWithData::CNAME { cname } => cname.octets.len(),
            RecordTypeWithData::PTR { ptrdname } => ptrdname.octets.len(),
            RecordTypeWithData::TXT { octets } => octets.len(),
            RecordTypeWithData::AAAA { .. } => 16,
            RecordTypeWithData::SRV { target, .. } => 6 + target.octets.len(),
            RecordTypeWithData::Unknown { octets, .. } => octets.len(),
        };
        self.name.octets.len() + 10 + rdata
    }
}

/// Errors encountered when serialising a message.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// A counter does not fit in the desired width.
    CounterTooLarge { counter: usize, bits: u32 },

    /// A write would grow the packet past the frame size.
    FrameOverflow { index: usize, limit: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::CounterTooLarge { counter, bits } => {
                write!(f, "'{counter}' cannot be converted to a u{bits}")
            }
            Error::FrameOverflow { index, limit } => {
                write!(f, "write at index {index} exceeds the {limit}-octet frame")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// A buffer which can be written to, for serialisation purposes.
/// Remembers where labels were written so later names can be
/// compressed into back-pointers.
pub struct WritableBuffer {
    pub octets: Vec<u8>,
    limit: usize,
    /// Offsets of label starts usable as compression targets.
    ///
    /// INVARIANT: every offset is the first octet of a label run we
    /// wrote, and fits in a 14-bit pointer.
    targets: Vec<usize>,
}

impl Default for WritableBuffer {
    fn default() -> Self {
        Self::new(MAX_PACKET_LEN)
    }
}

impl WritableBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            octets: Vec::with_capacity(512),
            limit,
            targets: Vec::with_capacity(MAX_COMPRESSION_TARGETS),
        }
    }

    pub fn index(&self) -> usize {
        self.octets.len()
    }

    fn check_fits(&self, extra: usize) -> Result<(), Error> {
        if self.octets.len() + extra > self.limit {
            Err(Error::FrameOverflow {
                index: self.octets.len(),
                limit: self.limit,
            })
        } else {
            Ok(())
        }
    }

    /// # Errors
    ///
    /// If the write overflows the frame.
    pub fn write_u8(&mut self, octet: u8) -> Result<(), Error> {
        self.check_fits(1)?;
        self.octets.push(octet);
        Ok(())
    }

    /// # Errors
    ///
    /// If the write overflows the frame.
    pub fn write_u16(&mut self, value: u16) -> Result<(), Error> {
        self.check_fits(2)?;
        self.octets.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// # Errors
    ///
    /// If the write overflows the frame.
    pub fn write_u32(&mut self, value: u32) -> Result<(), Error> {
        self.check_fits(4)?;
        self.octets.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// # Errors
    ///
    /// If the write overflows the frame.
    pub fn write_octets(&mut self, octets: &[u8]) -> Result<(), Error> {
        self.check_fits(octets.len())?;
        self.octets.extend_from_slice(octets);
        Ok(())
    }

    /// Write a domain name, emitting a back-pointer for the longest
    /// suffix already present in the packet and recording the labels
    /// written literally as targets for later names.
    ///
    /// # Errors
    ///
    /// If the write overflows the frame.
    pub fn write_domain_name(&mut self, name: &DomainName) -> Result<(), Error> {
        let mut written: Vec<usize> = Vec::new();

        for (i, label) in name.labels.iter().enumerate() {
            if label.is_empty() {
                self.write_u8(0)?;
                break;
            }

            if let Some(target) = self.find_suffix(&name.labels[i..]) {
                #[allow(clippy::cast_possible_truncation)]
                self.write_u16(POINTER_MASK | target as u16)?;
                break;
            }

            written.push(self.index());
            #[allow(clippy::cast_possible_truncation)]
            self.write_u8(label.len() as u8)?;
            self.write_octets(label)?;
        }

        for offset in written {
            if self.targets.len() < MAX_COMPRESSION_TARGETS && offset <= POINTER_OFFSET_MAX {
                self.targets.push(offset);
            }
        }

        Ok(())
    }

    /// Find a previously-written label run equal to the given suffix
    /// (which ends with the empty root label), walking through any
    /// compression pointers in the stored data.
    fn find_suffix(&self, labels: &[Vec<u8>]) -> Option<usize> {
        'target: for &start in &self.targets {
            let mut offset = start;
            for label in labels {
                offset = self.resolve_pointers(offset);
                let len = self.octets[offset] as usize;

                if label.is_empty() {
                    if len == 0 {
                        return Some(start);
                    }
                    continue 'target;
                }

                if len != label.len() || self.octets[offset + 1..offset + 1 + len] != label[..] {
                    continue 'target;
                }
                offset += 1 + len;
            }
        }

        None
    }

    /// Follow a chain of compression pointers to the label they
    /// designate.  Only pointers this buffer wrote itself are ever
    /// followed, so the chain is strictly decreasing and terminates.
    fn resolve_pointers(&self, mut offset: usize) -> usize {
        while self.octets[offset] & 0b1100_0000 == 0b1100_0000 {
            offset =
                usize::from(u16::from_be_bytes([self.octets[offset] & 0b0011_1111, self.octets[offset + 1]]));
        }
        offset
    }
}

const POINTER_MASK: u16 = 0b1100_0000_0000_0000;
const POINTER_OFFSET_MAX: usize = 0b0011_1111_1111_1111;

/// Helper function to convert a `usize` into a `u16` (or return an error).
///
/// # Errors
///
/// If the value cannot be converted.
fn usize_to_u16(counter: usize) -> Result<u16, Error> {
    if let Ok(t) = u16::try_from(counter) {
        Ok(t)
    } else {
        Err(Error::CounterTooLarge {
            counter,
            bits: u16::BITS,
        })
    }
}
