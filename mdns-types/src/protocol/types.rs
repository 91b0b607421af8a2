//! Core wire types for mDNS / DNS-SD messages. See [`crate::protocol`] for
//! the module overview and RFC references.

use bytes::Bytes;
use std::fmt;
use std::net::Ipv4Addr;

use crate::protocol::constants::{CLASS_MASK_CACHE_FLUSH, CLASS_MASK_QU, CLASS_MASK_VALUE};

/// Basic DNS message format, used for both queries and responses.
///
/// ```text
///     +---------------------+
///     |        Header       |
///     +---------------------+
///     |       Question      | the question for the name server
///     +---------------------+
///     |        Answer       | RRs answering the question
///     +---------------------+
///     |      Authority      | RRs pointing toward an authority
///     +---------------------+
///     |      Additional     | RRs holding additional information
///     +---------------------+
/// ```
///
/// See section 4.1 of RFC 1035; section 18 of RFC 6762 for the mDNS
/// reinterpretation of the header fields.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Message {
    /// Builds a one-shot mDNS query for a single question, with the QU bit
    /// (unicast-response requested) set on the question's class. mDNS
    /// queries always carry id 0.
    pub fn query(question: Question) -> Self {
        Self {
            header: Header {
                id: 0,
                is_response: false,
                opcode: Opcode::Query,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: false,
                recursion_available: false,
                rcode: Rcode::NoError,
            },
            questions: vec![question],
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// Builds an unsolicited (or query-triggered) mDNS response carrying no
    /// questions, as used for announcements, query answers, and goodbyes.
    pub fn response(answers: Vec<ResourceRecord>, additional: Vec<ResourceRecord>) -> Self {
        Self {
            header: Header {
                id: 0,
                is_response: true,
                opcode: Opcode::Query,
                is_authoritative: true,
                is_truncated: false,
                recursion_desired: false,
                recursion_available: false,
                rcode: Rcode::NoError,
            },
            questions: Vec::new(),
            answers,
            authority: Vec::new(),
            additional,
        }
    }

    pub fn is_query(&self) -> bool {
        !self.header.is_response
    }

    pub fn is_probe(&self) -> bool {
        self.is_query() && !self.authority.is_empty()
    }
}

/// Common header type for all messages.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      ID                       |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    QDCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    ANCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    NSCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    ARCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// mDNS queries always have id 0, QR=0, OPCODE=0, RD=0; responses have
/// QR=1, AA=1, OPCODE=0. See RFC 1035 §4.1.1 and RFC 6762 §18.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct Header {
    pub id: u16,
    pub is_response: bool,
    pub opcode: Opcode,
    pub is_authoritative: bool,
    pub is_truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub rcode: Rcode,
}

/// A `Header` as it appears on the network, with the section counts that
/// `Header` itself omits so callers can't construct a `Header` with counts
/// that disagree with the section vectors.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct WireHeader {
    pub header: Header,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

/// A four bit field specifying the kind of query. mDNS only ever uses
/// `Query`; other values are carried through unchanged for messages this
/// engine does not originate.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub enum Opcode {
    Query,
    IQuery,
    Status,
    Unknown(u8),
}

impl From<u8> for Opcode {
    fn from(octet: u8) -> Self {
        match octet {
            0 => Opcode::Query,
            1 => Opcode::IQuery,
            2 => Opcode::Status,
            other => Opcode::Unknown(other),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        match opcode {
            Opcode::Query => 0,
            Opcode::IQuery => 1,
            Opcode::Status => 2,
            Opcode::Unknown(octet) => octet,
        }
    }
}

/// Response code. mDNS responses are always `NoError`; other codes are
/// preserved for interoperability with unicast-capable peers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub enum Rcode {
    NoError,
    FormatError,
    ServerFailure,
    NameError,
    NotImplemented,
    Refused,
    Unknown(u8),
}

impl From<u8> for Rcode {
    fn from(octet: u8) -> Self {
        match octet {
            0 => Rcode::NoError,
            1 => Rcode::FormatError,
            2 => Rcode::ServerFailure,
            3 => Rcode::NameError,
            4 => Rcode::NotImplemented,
            5 => Rcode::Refused,
            other => Rcode::Unknown(other),
        }
    }
}

impl From<Rcode> for u8 {
    fn from(rcode: Rcode) -> Self {
        match rcode {
            Rcode::NoError => 0,
            Rcode::FormatError => 1,
            Rcode::ServerFailure => 2,
            Rcode::NameError => 3,
            Rcode::NotImplemented => 4,
            Rcode::Refused => 5,
            Rcode::Unknown(octet) => octet,
        }
    }
}

/// A single question: a name/type/class tuple, with the class's high bit
/// reinterpreted by mDNS as "QU" (unicast response requested).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct Question {
    pub name: DomainName,
    pub qtype: QueryType,
    pub qclass: QClass,
}

impl Question {
    pub fn new(name: DomainName, qtype: QueryType) -> Self {
        Self {
            name,
            qtype,
            qclass: QClass {
                class: RecordClass::In,
                unicast_response_requested: false,
            },
        }
    }

    #[must_use]
    pub fn requesting_unicast_response(mut self) -> Self {
        self.qclass.unicast_response_requested = true;
        self
    }

    /// Matches by case-insensitive name and by query type (`Any` matches
    /// any record type).
    pub fn matches(&self, rr: &ResourceRecord) -> bool {
        self.name.matches(&rr.name) && self.qtype.matches(rr.rtype_with_data.rtype())
    }
}

/// The class of a question, including the QU (unicast-response-requested)
/// bit carried in its top bit. See RFC 6762 §18.12.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct QClass {
    pub class: RecordClass,
    pub unicast_response_requested: bool,
}

impl From<u16> for QClass {
    fn from(raw: u16) -> Self {
        Self {
            class: RecordClass::from(raw & CLASS_MASK_VALUE),
            unicast_response_requested: raw & CLASS_MASK_QU != 0,
        }
    }
}

impl From<QClass> for u16 {
    fn from(qclass: QClass) -> Self {
        let value: u16 = qclass.class.into();
        if qclass.unicast_response_requested {
            value | CLASS_MASK_QU
        } else {
            value
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for QClass {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self {
            class: RecordClass::arbitrary(u)?,
            unicast_response_requested: bool::arbitrary(u)?,
        })
    }
}

/// A resource record: an owner name, its type-tagged data, a class (with
/// the cache-flush bit), and a TTL in seconds.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct ResourceRecord {
    pub name: DomainName,
    pub rtype_with_data: RecordTypeWithData,
    pub rclass: RClass,
    pub ttl: u32,
}

impl ResourceRecord {
    pub fn new(name: DomainName, data: RecordTypeWithData, ttl: u32, cache_flush: bool) -> Self {
        Self {
            name,
            rtype_with_data: data,
            rclass: RClass {
                class: RecordClass::In,
                cache_flush,
            },
            ttl,
        }
    }

    /// A goodbye record: the same owner/type/rdata with TTL forced to 0.
    #[must_use]
    pub fn goodbye(mut self) -> Self {
        self.ttl = 0;
        self
    }

    pub fn is_goodbye(&self) -> bool {
        self.ttl == 0
    }
}

/// The class of a resource record, including the cache-flush bit carried in
/// its top bit. See RFC 6762 §10.2.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RClass {
    pub class: RecordClass,
    pub cache_flush: bool,
}

impl From<u16> for RClass {
    fn from(raw: u16) -> Self {
        Self {
            class: RecordClass::from(raw & CLASS_MASK_VALUE),
            cache_flush: raw & CLASS_MASK_CACHE_FLUSH != 0,
        }
    }
}

impl From<RClass> for u16 {
    fn from(rclass: RClass) -> Self {
        let value: u16 = rclass.class.into();
        if rclass.cache_flush {
            value | CLASS_MASK_CACHE_FLUSH
        } else {
            value
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for RClass {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self {
            class: RecordClass::arbitrary(u)?,
            cache_flush: bool::arbitrary(u)?,
        })
    }
}

/// A resource record's type-tagged payload. This engine is polymorphic only
/// over the record types DNS-SD actually needs: everything else is carried
/// through as opaque octets rather than rejected.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum RecordTypeWithData {
    A {
        address: Ipv4Addr,
    },
    Ptr {
        ptrdname: DomainName,
    },
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: DomainName,
    },
    Txt {
        /// Ordered, length-prefixed character-strings. An empty vector
        /// serialises as a single zero octet (present but empty), matching
        /// the RFC 6763 §6.1 convention.
        entries: Vec<Bytes>,
    },
    Unknown {
        tag: u16,
        octets: Bytes,
    },
}

impl RecordTypeWithData {
    pub fn rtype(&self) -> RecordType {
        match self {
            RecordTypeWithData::A { .. } => RecordType::A,
            RecordTypeWithData::Ptr { .. } => RecordType::Ptr,
            RecordTypeWithData::Srv { .. } => RecordType::Srv,
            RecordTypeWithData::Txt { .. } => RecordType::Txt,
            RecordTypeWithData::Unknown { tag, .. } => RecordType::Unknown(*tag),
        }
    }

    /// Lexicographic comparison used to break probing ties: per RFC 6762
    /// §8.2, compare class (excluding the cache-flush bit), type, then
    /// rdata bytes, treating each as an unsigned byte sequence. Strict: an
    /// exact match returns `false` on both sides, so callers resolving a
    /// tie (a rival's assertion that is later than *or equal to* ours)
    /// should check the *absence* of the reverse comparison, not just the
    /// forward one.
    pub fn lexicographically_later_than(&self, other: &RecordTypeWithData) -> bool {
        self.rdata_octets_for_comparison() > other.rdata_octets_for_comparison()
    }

    fn rdata_octets_for_comparison(&self) -> Vec<u8> {
        match self {
            RecordTypeWithData::A { address } => address.octets().to_vec(),
            RecordTypeWithData::Ptr { ptrdname } => ptrdname.octets_uncompressed(),
            RecordTypeWithData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                let mut out = Vec::new();
                out.extend_from_slice(&priority.to_be_bytes());
                out.extend_from_slice(&weight.to_be_bytes());
                out.extend_from_slice(&port.to_be_bytes());
                out.extend_from_slice(&target.octets_uncompressed());
                out
            }
            RecordTypeWithData::Txt { entries } => {
                let mut out = Vec::new();
                for entry in entries {
                    out.push(entry.len() as u8);
                    out.extend_from_slice(entry);
                }
                out
            }
            RecordTypeWithData::Unknown { octets, .. } => octets.to_vec(),
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for RecordTypeWithData {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(match u.int_in_range(0..=4u8)? {
            0 => RecordTypeWithData::A {
                address: Ipv4Addr::from(u32::arbitrary(u)?),
            },
            1 => RecordTypeWithData::Ptr {
                ptrdname: DomainName::arbitrary(u)?,
            },
            2 => RecordTypeWithData::Srv {
                priority: u16::arbitrary(u)?,
                weight: u16::arbitrary(u)?,
                port: u16::arbitrary(u)?,
                target: DomainName::arbitrary(u)?,
            },
            3 => {
                let count: usize = u.int_in_range(0..=4)?;
                let mut entries = Vec::new();
                for _ in 0..count {
                    let len: usize = u.int_in_range(0..=32)?;
                    entries.push(Bytes::from(u.bytes(len)?.to_vec()));
                }
                RecordTypeWithData::Txt { entries }
            }
            _ => {
                let len: usize = u.int_in_range(0..=64)?;
                RecordTypeWithData::Unknown {
                    tag: u16::arbitrary(u)?,
                    octets: Bytes::from(u.bytes(len)?.to_vec()),
                }
            }
        })
    }
}

/// The type of a query. `Any` (type 255) matches a record of any type.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub enum QueryType {
    Record(RecordType),
    Any,
}

impl QueryType {
    pub fn matches(self, rtype: RecordType) -> bool {
        match self {
            QueryType::Any => true,
            QueryType::Record(t) => t == rtype,
        }
    }
}

impl From<u16> for QueryType {
    fn from(raw: u16) -> Self {
        match raw {
            255 => QueryType::Any,
            other => QueryType::Record(RecordType::from(other)),
        }
    }
}

impl From<QueryType> for u16 {
    fn from(qtype: QueryType) -> Self {
        match qtype {
            QueryType::Any => 255,
            QueryType::Record(t) => t.into(),
        }
    }
}

/// The record types this engine understands structurally. Anything else is
/// preserved as `Unknown(tag)` with opaque rdata rather than rejected.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub enum RecordType {
    A,
    Ptr,
    Srv,
    Txt,
    Unknown(u16),
}

impl From<u16> for RecordType {
    fn from(raw: u16) -> Self {
        match raw {
            1 => RecordType::A,
            12 => RecordType::Ptr,
            16 => RecordType::Txt,
            33 => RecordType::Srv,
            other => RecordType::Unknown(other),
        }
    }
}

impl From<RecordType> for u16 {
    fn from(rtype: RecordType) -> Self {
        match rtype {
            RecordType::A => 1,
            RecordType::Ptr => 12,
            RecordType::Txt => 16,
            RecordType::Srv => 33,
            RecordType::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::Ptr => write!(f, "PTR"),
            RecordType::Srv => write!(f, "SRV"),
            RecordType::Txt => write!(f, "TXT"),
            RecordType::Unknown(tag) => write!(f, "TYPE{tag}"),
        }
    }
}

/// The class of a record or question, excluding the cache-flush/QU bit.
/// mDNS uses `In` exclusively; other values are preserved for messages this
/// engine does not originate.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RecordClass {
    In,
    Unknown(u16),
}

impl From<u16> for RecordClass {
    fn from(raw: u16) -> Self {
        match raw {
            1 => RecordClass::In,
            other => RecordClass::Unknown(other),
        }
    }
}

impl From<RecordClass> for u16 {
    fn from(class: RecordClass) -> Self {
        match class {
            RecordClass::In => 1,
            RecordClass::Unknown(raw) => raw,
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for RecordClass {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(RecordClass::from(u16::arbitrary(u)? & crate::protocol::constants::CLASS_MASK_VALUE))
    }
}

/// A domain name as a sequence of UTF-8 labels. Unlike plain RFC 1035 DNS,
/// mDNS/DNS-SD names routinely contain non-ASCII text and spaces in the
/// left-most (service instance) label, so labels are stored as `String`
/// rather than raw ASCII octets; wire length limits are still enforced in
/// bytes, not characters.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct DomainName {
    labels: Vec<String>,
}

impl DomainName {
    pub fn root() -> Self {
        Self { labels: Vec::new() }
    }

    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Builds a name from labels, rejecting any label that is empty, longer
    /// than 63 octets when UTF-8 encoded, or whose combined wire encoding
    /// would exceed 255 octets.
    pub fn from_labels(labels: Vec<String>) -> Option<Self> {
        let mut wire_len = 1; // terminating root label
        for label in &labels {
            let len = label.len();
            if len == 0 || len > crate::protocol::constants::LABEL_MAX_LEN {
                return None;
            }
            wire_len += 1 + len;
        }
        if wire_len > crate::protocol::constants::DOMAINNAME_MAX_LEN {
            return None;
        }
        Some(Self { labels })
    }

    /// Parses a dotted-string representation, e.g. `"My Printer._ipp._tcp.local"`.
    /// A backslash escapes a literal `.` within a label, per the usual DNS
    /// presentation-format convention.
    pub fn from_dotted_string(s: &str) -> Option<Self> {
        if s == "." || s.is_empty() {
            return Some(Self::root());
        }
        let mut labels = Vec::new();
        let mut current = String::new();
        let mut chars = s.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' if chars.peek().is_some() => {
                    current.push(chars.next().unwrap());
                }
                '.' => {
                    labels.push(std::mem::take(&mut current));
                }
                other => current.push(other),
            }
        }
        if !current.is_empty() {
            labels.push(current);
        }
        Self::from_labels(labels)
    }

    pub fn to_dotted_string(&self) -> String {
        if self.is_root() {
            return ".".to_string();
        }
        self.labels
            .iter()
            .map(|l| l.replace('\\', "\\\\").replace('.', "\\."))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Appends `suffix`'s labels after `self`'s, used to build e.g.
    /// `instance._svc._proto.local` from an instance label and a service
    /// domain name.
    pub fn joined_with(&self, suffix: &DomainName) -> Option<Self> {
        let mut labels = self.labels.clone();
        labels.extend(suffix.labels.iter().cloned());
        Self::from_labels(labels)
    }

    /// Case-insensitive name comparison, per RFC 1035 §2.3.3 (ASCII
    /// case-folding only; non-ASCII labels compare byte-for-byte).
    pub fn matches(&self, other: &DomainName) -> bool {
        if self.labels.len() != other.labels.len() {
            return false;
        }
        self.labels
            .iter()
            .zip(other.labels.iter())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    /// The uncompressed wire encoding of this name: used for lexicographic
    /// tie-breaking and as the fallback when the encoder chooses not to
    /// compress.
    pub fn octets_uncompressed(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for label in &self.labels {
            let bytes = label.as_bytes();
            out.push(bytes.len() as u8);
            out.extend_from_slice(bytes);
        }
        out.push(0);
        out
    }

    pub fn encoded_len(&self) -> usize {
        self.labels.iter().map(|l| 1 + l.len()).sum::<usize>() + 1
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_dotted_string())
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for DomainName {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let num_labels = u.int_in_range(0..=6)?;
        let mut labels = Vec::new();
        let mut wire_len = 1usize;
        for _ in 0..num_labels {
            let len: usize = u.int_in_range(1..=20)?;
            if wire_len + 1 + len > crate::protocol::constants::DOMAINNAME_MAX_LEN {
                break;
            }
            let s: String = (0..len)
                .map(|_| {
                    let idx: u8 = u.int_in_range(0..=25).unwrap_or(0);
                    (b'a' + idx) as char
                })
                .collect();
            wire_len += 1 + s.len();
            labels.push(s);
        }
        Ok(DomainName { labels })
    }
}

#[cfg(any(feature = "test-util", test))]
pub mod test_util {
    use super::*;

    pub fn domain(dotted: &str) -> DomainName {
        DomainName::from_dotted_string(dotted).expect("valid test domain name")
    }

    pub fn a_record(name: &str, address: Ipv4Addr, ttl: u32, cache_flush: bool) -> ResourceRecord {
        ResourceRecord::new(domain(name), RecordTypeWithData::A { address }, ttl, cache_flush)
    }

    pub fn ptr_record(name: &str, ptrdname: &str, ttl: u32) -> ResourceRecord {
        ResourceRecord::new(
            domain(name),
            RecordTypeWithData::Ptr {
                ptrdname: domain(ptrdname),
            },
            ttl,
            false,
        )
    }

    pub fn srv_record(name: &str, port: u16, target: &str, ttl: u32) -> ResourceRecord {
        ResourceRecord::new(
            domain(name),
            RecordTypeWithData::Srv {
                priority: 0,
                weight: 0,
                port,
                target: domain(target),
            },
            ttl,
            true,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    #[test]
    fn dotted_string_round_trips() {
        let name = domain("My Printer._ipp._tcp.local");
        assert_eq!(name.to_dotted_string(), "My Printer._ipp._tcp.local");
    }

    #[test]
    fn name_matching_is_case_insensitive() {
        assert!(domain("Foo.Local").matches(&domain("foo.local")));
        assert!(!domain("foo.local").matches(&domain("bar.local")));
    }

    #[test]
    fn label_over_63_octets_rejected() {
        let long = "a".repeat(64);
        assert!(DomainName::from_labels(vec![long]).is_none());
        let ok = "a".repeat(63);
        assert!(DomainName::from_labels(vec![ok]).is_some());
    }

    #[test]
    fn qclass_round_trips_qu_bit() {
        let qc = QClass {
            class: RecordClass::In,
            unicast_response_requested: true,
        };
        let raw: u16 = qc.into();
        assert_eq!(QClass::from(raw), qc);
    }

    #[test]
    fn rclass_round_trips_cache_flush_bit() {
        let rc = RClass {
            class: RecordClass::In,
            cache_flush: true,
        };
        let raw: u16 = rc.into();
        assert_eq!(RClass::from(raw), rc);
    }

    #[test]
    fn lexicographic_tiebreak_compares_rdata() {
        let lower = a_record("host.local", Ipv4Addr::new(10, 0, 0, 1), 120, true);
        let higher = a_record("host.local", Ipv4Addr::new(10, 0, 0, 2), 120, true);
        assert!(higher
            .rtype_with_data
            .lexicographically_later_than(&lower.rtype_with_data));
        assert!(!lower
            .rtype_with_data
            .lexicographically_later_than(&higher.rtype_with_data));
    }

    #[test]
    fn srv_ptr_helpers_build_expected_shapes() {
        let ptr = ptr_record("_ipp._tcp.local", "My Printer._ipp._tcp.local", 120);
        assert_eq!(ptr.rtype_with_data.rtype(), RecordType::Ptr);
        let srv = srv_record("My Printer._ipp._tcp.local", 631, "pr.local", 120);
        assert_eq!(srv.rtype_with_data.rtype(), RecordType::Srv);
    }
}
