//! Deserialisation of mDNS messages from the network. See the `types`
//! module for the format itself.
//!
//! Every fallible step here runs against attacker-controlled bytes: no
//! panics, no reads outside the buffer, and pointer chains are bounded so a
//! crafted message cannot force unbounded work.

use std::net::Ipv4Addr;

use bytes::Bytes;

use crate::protocol::constants::{
    DOMAINNAME_MAX_LEN, HEADER_MASK_AA, HEADER_MASK_OPCODE, HEADER_MASK_QR, HEADER_MASK_RA,
    HEADER_MASK_RCODE, HEADER_MASK_RD, HEADER_MASK_TC, HEADER_OFFSET_OPCODE, HEADER_OFFSET_RCODE,
    LABEL_MAX_LEN, MAX_POINTER_HOPS,
};
use crate::protocol::types::*;

impl Message {
    /// # Errors
    ///
    /// If the message cannot be parsed safely.
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        Self::deserialise(&mut ConsumableBuffer::new(octets))
    }

    /// # Errors
    ///
    /// If the message cannot be parsed safely.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let wire_header = WireHeader::deserialise(buffer)?;
        let mut questions = Vec::with_capacity(wire_header.qdcount.into());
        let mut answers = Vec::with_capacity(wire_header.ancount.into());
        let mut authority = Vec::with_capacity(wire_header.nscount.into());
        let mut additional = Vec::with_capacity(wire_header.arcount.into());

        for _ in 0..wire_header.qdcount {
            questions.push(Question::deserialise(buffer)?);
        }
        for _ in 0..wire_header.ancount {
            answers.push(ResourceRecord::deserialise(buffer)?);
        }
        for _ in 0..wire_header.nscount {
            authority.push(ResourceRecord::deserialise(buffer)?);
        }
        for _ in 0..wire_header.arcount {
            additional.push(ResourceRecord::deserialise(buffer)?);
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
        let id = buffer.next_u16().ok_or(Error::wire_format(buffer, "truncated header"))?;
        let flags1 = buffer.next_u8().ok_or(Error::wire_format(buffer, "truncated header"))?;
        let flags2 = buffer.next_u8().ok_or(Error::wire_format(buffer, "truncated header"))?;
        let qdcount = buffer.next_u16().ok_or(Error::wire_format(buffer, "truncated header"))?;
        let ancount = buffer.next_u16().ok_or(Error::wire_format(buffer, "truncated header"))?;
        let nscount = buffer.next_u16().ok_or(Error::wire_format(buffer, "truncated header"))?;
        let arcount = buffer.next_u16().ok_or(Error::wire_format(buffer, "truncated header"))?;

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
    /// If the question cannot be parsed safely.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(buffer)?;
        let qtype = QueryType::from(
            buffer
                .next_u16()
                .ok_or(Error::wire_format(buffer, "truncated question"))?,
        );
        let qclass = QClass::from(
            buffer
                .next_u16()
                .ok_or(Error::wire_format(buffer, "truncated question"))?,
        );

        Ok(Self {
            name,
            qtype,
            qclass,
        })
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the record cannot be parsed safely.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(buffer)?;
        let rtype = RecordType::from(
            buffer
                .next_u16()
                .ok_or(Error::wire_format(buffer, "truncated resource record"))?,
        );
        let rclass = RClass::from(
            buffer
                .next_u16()
                .ok_or(Error::wire_format(buffer, "truncated resource record"))?,
        );
        let ttl = buffer
            .next_u32()
            .ok_or(Error::wire_format(buffer, "truncated resource record"))?;
        let rdlength = buffer
            .next_u16()
            .ok_or(Error::wire_format(buffer, "truncated resource record"))?;

        let rdata_start = buffer.position();
        if buffer.remaining() < rdlength as usize {
            return Err(Error::wire_format(buffer, "rdlength extends past message end"));
        }
        let rdata_end = rdata_start + rdlength as usize;

        let rtype_with_data = match rtype {
            RecordType::A => RecordTypeWithData::A {
                address: Ipv4Addr::from(
                    buffer
                        .next_u32()
                        .ok_or(Error::wire_format(buffer, "truncated A rdata"))?,
                ),
            },
            RecordType::Ptr => RecordTypeWithData::Ptr {
                ptrdname: DomainName::deserialise(buffer)?,
            },
            RecordType::Srv => RecordTypeWithData::Srv {
                priority: buffer
                    .next_u16()
                    .ok_or(Error::wire_format(buffer, "truncated SRV rdata"))?,
                weight: buffer
                    .next_u16()
                    .ok_or(Error::wire_format(buffer, "truncated SRV rdata"))?,
                port: buffer
                    .next_u16()
                    .ok_or(Error::wire_format(buffer, "truncated SRV rdata"))?,
                target: DomainName::deserialise(buffer)?,
            },
            RecordType::Txt => {
                let mut entries = Vec::new();
                while buffer.position() < rdata_end {
                    let len = buffer
                        .next_u8()
                        .ok_or(Error::wire_format(buffer, "truncated TXT rdata"))?
                        as usize;
                    let bytes = buffer
                        .take(len)
                        .ok_or(Error::wire_format(buffer, "truncated TXT rdata"))?;
                    entries.push(Bytes::copy_from_slice(bytes));
                }
                RecordTypeWithData::Txt { entries }
            }
            RecordType::Unknown(tag) => {
                let octets = buffer
                    .take(rdlength as usize)
                    .ok_or(Error::wire_format(buffer, "truncated unknown rdata"))?;
                RecordTypeWithData::Unknown {
                    tag,
                    octets: Bytes::copy_from_slice(octets),
                }
            }
        };

        if buffer.position() != rdata_end {
            return Err(Error::wire_format(
                buffer,
                "rdlength does not match parsed rdata length",
            ));
        }

        Ok(Self {
            name,
            rtype_with_data,
            rclass,
            ttl,
        })
    }
}

impl DomainName {
    /// # Errors
    ///
    /// If the domain cannot be parsed safely: a label or pointer runs past
    /// the end of the buffer, a pointer targets the current position or
    /// later (no forward or self references), the pointer chain exceeds
    /// [`MAX_POINTER_HOPS`], or the decoded name exceeds
    /// [`DOMAINNAME_MAX_LEN`] octets.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        Self::deserialise_bounded(buffer, buffer.position(), 0)
    }

    fn deserialise_bounded(
        buffer: &mut ConsumableBuffer,
        start: usize,
        hops: usize,
    ) -> Result<Self, Error> {
        let mut labels = Vec::<String>::with_capacity(5);
        let mut wire_len = 0usize;

        loop {
            let size = buffer
                .next_u8()
                .ok_or(Error::wire_format(buffer, "truncated domain name"))?;

            if size == 0 {
                break;
            } else if usize::from(size) <= LABEL_MAX_LEN {
                let raw = buffer
                    .take(size as usize)
                    .ok_or(Error::wire_format(buffer, "truncated domain label"))?;
                let label = std::str::from_utf8(raw)
                    .map_err(|_| Error::wire_format(buffer, "domain label is not valid utf-8"))?
                    .to_string();
                wire_len += 1 + raw.len();
                if wire_len > DOMAINNAME_MAX_LEN {
                    return Err(Error::wire_format(buffer, "domain name exceeds 255 octets"));
                }
                labels.push(label);
            } else if size >= 192 {
                if hops >= MAX_POINTER_HOPS {
                    return Err(Error::wire_format(buffer, "too many compression pointer hops"));
                }
                let hi = size & 0b0011_1111;
                let lo = buffer
                    .next_u8()
                    .ok_or(Error::wire_format(buffer, "truncated compression pointer"))?;
                let ptr = usize::from(u16::from_be_bytes([hi, lo]));

                // A pointer must reference strictly earlier data (RFC 1035
                // §4.1.4): this alone prevents cycles, and the hop cap above
                // bounds the work done even for a long chain of distinct
                // earlier pointers.
                if ptr >= start {
                    return Err(Error::wire_format(buffer, "compression pointer is not strictly earlier"));
                }

                let mut pointee = buffer.at_offset(ptr);
                let suffix = Self::deserialise_bounded(&mut pointee, ptr, hops + 1)?;
                labels.extend(suffix.labels().iter().cloned());
                break;
            } else {
                return Err(Error::wire_format(buffer, "reserved domain label length"));
            }
        }

        DomainName::from_labels(labels)
            .ok_or_else(|| Error::wire_format(buffer, "domain name exceeds length limits"))
    }
}

/// Errors encountered while parsing a datagram. Every variant carries the
/// byte offset (into the original buffer) at which the problem was found,
/// and a short human-readable description; neither ever contains attacker
/// payload bytes.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Error {
    pub offset: usize,
    pub reason: &'static str,
}

impl Error {
    fn wire_format(buffer: &ConsumableBuffer, reason: &'static str) -> Self {
        Self {
            offset: buffer.position(),
            reason,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} at byte offset {}", self.reason, self.offset)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// A buffer which is consumed while parsing. All bounds checks live here so
/// no call site needs to re-derive them, and `position`/`at_offset` give
/// every error a meaningful byte offset to report.
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

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.octets.len().saturating_sub(self.position)
    }

    pub fn next_u8(&mut self) -> Option<u8> {
        let value = *self.octets.get(self.position)?;
        self.position += 1;
        Some(value)
    }

    pub fn next_u16(&mut self) -> Option<u16> {
        let bytes = self.octets.get(self.position..self.position + 2)?;
        self.position += 2;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn next_u32(&mut self) -> Option<u32> {
        let bytes = self.octets.get(self.position..self.position + 4)?;
        self.position += 4;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn take(&mut self, size: usize) -> Option<&'a [u8]> {
        let slice = self.octets.get(self.position..self.position + size)?;
        self.position += size;
        Some(slice)
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
    use std::net::Ipv4Addr;

    #[test]
    fn round_trips_a_record_message() {
        let msg = Message::response(vec![a_record("host.local", Ipv4Addr::new(10, 0, 0, 1), 120, true)], vec![]);
        let octets = msg.clone().into_octets().unwrap();
        let decoded = Message::from_octets(&octets).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn rejects_forward_pointer() {
        // A name whose first byte is a pointer to a later offset.
        let bytes = [0xC0, 0x02, 0x00];
        let mut buf = ConsumableBuffer::new(&bytes);
        let err = DomainName::deserialise(&mut buf).unwrap_err();
        assert_eq!(err.reason, "compression pointer is not strictly earlier");
    }

    #[test]
    fn rejects_label_over_63_octets() {
        let mut bytes = vec![64u8];
        bytes.extend(std::iter::repeat(b'a').take(64));
        bytes.push(0);
        let mut buf = ConsumableBuffer::new(&bytes);
        assert!(DomainName::deserialise(&mut buf).is_err());
    }

    #[test]
    fn rdlength_past_end_is_wire_format_error() {
        let mut msg = Message::response(vec![a_record("host.local", Ipv4Addr::new(1, 2, 3, 4), 120, true)], vec![]);
        msg.answers[0].ttl = 120;
        let mut octets = msg.into_octets().unwrap();
        // Corrupt the rdlength of the one answer record to claim more data
        // than is actually present.
        let len = octets.len();
        octets[len - 6] = 0xFF;
        octets[len - 5] = 0xFF;
        assert!(Message::from_octets(&octets).is_err());
    }

    #[test]
    fn txt_with_no_entries_round_trips() {
        let msg = Message::response(
            vec![ResourceRecord::new(
                domain("host.local"),
                RecordTypeWithData::Txt { entries: vec![] },
                120,
                true,
            )],
            vec![],
        );
        let octets = msg.clone().into_octets().unwrap();
        let decoded = Message::from_octets(&octets).unwrap();
        assert_eq!(msg, decoded);
        assert_eq!(decoded.answers[0].rtype_with_data, RecordTypeWithData::Txt { entries: vec![] });
    }

    #[test]
    fn unknown_record_type_parses_as_opaque() {
        let msg = Message::response(
            vec![ResourceRecord::new(
                domain("host.local"),
                RecordTypeWithData::Unknown {
                    tag: 999,
                    octets: bytes::Bytes::from_static(&[1, 2, 3]),
                },
                120,
                false,
            )],
            vec![],
        );
        let octets = msg.into_octets().unwrap();
        let decoded = Message::from_octets(&octets).unwrap();
        assert_eq!(decoded.answers[0].rtype_with_data.rtype(), RecordType::Unknown(999));
    }
}
