//! Serialisation of mDNS messages to the wire format. See the `types`
//! module for the format itself.

use std::collections::HashMap;

use crate::protocol::constants::{
    HEADER_MASK_AA, HEADER_MASK_OPCODE, HEADER_MASK_QR, HEADER_MASK_RA, HEADER_MASK_RCODE,
    HEADER_MASK_RD, HEADER_MASK_TC, HEADER_OFFSET_OPCODE, HEADER_OFFSET_RCODE,
};
use crate::protocol::types::*;

impl Message {
    /// # Errors
    ///
    /// If a section has more than 65535 entries.
    pub fn into_octets(&self) -> Result<Vec<u8>, Error> {
        let mut buffer = WritableBuffer::default();
        self.serialise(&mut buffer)?;
        Ok(buffer.octets)
    }

    /// # Errors
    ///
    /// If a section has more than 65535 entries.
    pub fn serialise(&self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        let qdcount = usize_to_u16(self.questions.len())?;
        let ancount = usize_to_u16(self.answers.len())?;
        let nscount = usize_to_u16(self.authority.len())?;
        let arcount = usize_to_u16(self.additional.len())?;

        self.header.serialise(buffer);
        buffer.write_u16(qdcount);
        buffer.write_u16(ancount);
        buffer.write_u16(nscount);
        buffer.write_u16(arcount);

        for question in &self.questions {
            question.serialise(buffer);
        }
        for rr in &self.answers {
            rr.serialise(buffer)?;
        }
        for rr in &self.authority {
            rr.serialise(buffer)?;
        }
        for rr in &self.additional {
            rr.serialise(buffer)?;
        }

        Ok(())
    }
}

impl Header {
    pub fn serialise(self, buffer: &mut WritableBuffer) {
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
        let flag_ra = if self.recursion_available {
            HEADER_MASK_RA
        } else {
            0
        };
        let field_rcode = HEADER_MASK_RCODE & (u8::from(self.rcode) << HEADER_OFFSET_RCODE);

        buffer.write_u16(self.id);
        buffer.write_u8(flag_qr | field_opcode | flag_aa | flag_tc | flag_rd);
        buffer.write_u8(flag_ra | field_rcode);
    }
}

impl Question {
    pub fn serialise(&self, buffer: &mut WritableBuffer) {
        buffer.write_name(&self.name);
        buffer.write_u16(self.qtype.into());
        buffer.write_u16(self.qclass.into());
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the RDATA is longer than 65535 octets.
    pub fn serialise(&self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        buffer.write_name(&self.name);
        buffer.write_u16(self.rtype_with_data.rtype().into());
        buffer.write_u16(self.rclass.into());
        buffer.write_u32(self.ttl);

        let rdlength_index = buffer.index();
        buffer.write_u16(0);
        let rdata_start = buffer.index();

        match &self.rtype_with_data {
            RecordTypeWithData::A { address } => buffer.write_octets(&address.octets()),
            RecordTypeWithData::Ptr { ptrdname } => buffer.write_name(ptrdname),
            RecordTypeWithData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                buffer.write_u16(*priority);
                buffer.write_u16(*weight);
                buffer.write_u16(*port);
                // SRV targets are not compressed in practice by
                // well-behaved mDNS stacks, and not compressing them keeps
                // the rdlength backpatch below simple.
                buffer.write_octets(&target.octets_uncompressed());
            }
            RecordTypeWithData::Txt { entries } => {
                // No special case for an empty `entries`: writing zero
                // length-prefixed strings here produces RDLENGTH 0, which is
                // exactly what the decode loop below turns back into
                // `entries: vec![]`. A single explicit empty string (RFC
                // 6763 §6.1's convention for "no attributes", `entries:
                // vec![Bytes::new()]`) already round-trips through the same
                // loop as a length-prefix octet of 0.
                for entry in entries {
                    buffer.write_u8(usize_to_u8(entry.len())?);
                    buffer.write_octets(entry);
                }
            }
            RecordTypeWithData::Unknown { octets, .. } => buffer.write_octets(octets),
        }

        let rdlength = usize_to_u16(buffer.index() - rdata_start)?;
        let [hi, lo] = rdlength.to_be_bytes();
        buffer.octets[rdlength_index] = hi;
        buffer.octets[rdlength_index + 1] = lo;

        Ok(())
    }
}

/// Errors encountered when serialising a message.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// A counter does not fit in the desired width.
    CounterTooLarge { counter: usize, bits: u32 },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::CounterTooLarge { counter, bits } => {
                write!(f, "'{counter}' cannot be converted to a u{bits}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// A buffer which can be written to, for serialisation purposes. Tracks
/// where each name it has written starts so later names can be compressed
/// into a pointer at any common suffix, per RFC 1035 §4.1.4.
pub struct WritableBuffer {
    pub octets: Vec<u8>,
    name_offsets: HashMap<Vec<String>, u16>,
}

impl Default for WritableBuffer {
    fn default() -> Self {
        Self {
            octets: Vec::with_capacity(512),
            name_offsets: HashMap::new(),
        }
    }
}

impl WritableBuffer {
    pub fn index(&self) -> usize {
        self.octets.len()
    }

    pub fn write_u8(&mut self, octet: u8) {
        self.octets.push(octet);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.octets.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.octets.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_octets(&mut self, octets: &[u8]) {
        self.octets.extend_from_slice(octets);
    }

    /// Writes a name, emitting a compression pointer to the longest
    /// previously-written suffix it shares, if that suffix started at an
    /// offset representable in a 14-bit pointer (the whole message must be
    /// under 16 KiB for a pointer to be usable at all; mDNS messages are
    /// bounded well below that).
    pub fn write_name(&mut self, name: &DomainName) {
        let labels = name.labels().to_vec();
        self.write_name_suffix(&labels);
    }

    fn write_name_suffix(&mut self, labels: &[String]) {
        if labels.is_empty() {
            self.write_u8(0);
            return;
        }

        let key: Vec<String> = labels.iter().map(|l| l.to_ascii_lowercase()).collect();
        if let Some(&offset) = self.name_offsets.get(&key) {
            self.write_u16(0xC000 | offset);
            return;
        }

        if let Ok(offset) = u16::try_from(self.index()) {
            if offset < 0x4000 {
                self.name_offsets.insert(key, offset);
            }
        }

        let label = &labels[0];
        let bytes = label.as_bytes();
        // Labels longer than 63 octets are rejected by `DomainName`'s
        // constructors, so this truncation to u8 never loses information.
        self.write_u8(bytes.len() as u8);
        self.write_octets(bytes);
        self.write_name_suffix(&labels[1..]);
    }
}

fn usize_to_u16(counter: usize) -> Result<u16, Error> {
    u16::try_from(counter).map_err(|_| Error::CounterTooLarge {
        counter,
        bits: u16::BITS,
    })
}

fn usize_to_u8(counter: usize) -> Result<u8, Error> {
    u8::try_from(counter).map_err(|_| Error::CounterTooLarge {
        counter,
        bits: u8::BITS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::test_util::*;
    use std::net::Ipv4Addr;

    #[test]
    fn sets_rdlength() {
        let mut buf = WritableBuffer::default();
        let rr = a_record("host.local", Ipv4Addr::new(10, 0, 0, 1), 120, true);
        rr.serialise(&mut buf).unwrap();
        assert_eq!(&buf.octets[buf.octets.len() - 6..], &[0, 4, 10, 0, 0, 1]);
    }

    #[test]
    fn repeated_name_is_compressed() {
        let mut buf = WritableBuffer::default();
        let ptr1 = ptr_record("_ipp._tcp.local", "A._ipp._tcp.local", 120);
        let ptr2 = ptr_record("_ipp._tcp.local", "B._ipp._tcp.local", 120);
        ptr1.serialise(&mut buf).unwrap();
        let first_len = buf.index();
        ptr2.serialise(&mut buf).unwrap();
        let second_len = buf.index() - first_len;
        // The second record's owner name ("_ipp._tcp.local") should compress
        // down to a two-octet pointer instead of repeating every label.
        assert!(second_len < first_len);
    }

    #[test]
    fn txt_with_no_entries_encodes_as_zero_length_rdata() {
        let mut buf = WritableBuffer::default();
        let rr = ResourceRecord::new(
            domain("host.local"),
            RecordTypeWithData::Txt { entries: vec![] },
            120,
            true,
        );
        rr.serialise(&mut buf).unwrap();
        assert_eq!(&buf.octets[buf.octets.len() - 2..], &[0, 0]);
    }

    #[test]
    fn txt_with_one_empty_entry_encodes_as_single_zero_octet() {
        let mut buf = WritableBuffer::default();
        let rr = ResourceRecord::new(
            domain("host.local"),
            RecordTypeWithData::Txt {
                entries: vec![bytes::Bytes::new()],
            },
            120,
            true,
        );
        rr.serialise(&mut buf).unwrap();
        assert_eq!(&buf.octets[buf.octets.len() - 3..], &[0, 1, 0]);
    }
}
