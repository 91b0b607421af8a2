//! Numeric constants for the wire format: header bit layout, name length
//! limits, and the well-known mDNS transport endpoint.

use std::net::Ipv4Addr;

/// Maximum encoded length of a domain name: the number of labels plus the
/// sum of the lengths of the labels, including the terminating root label.
pub const DOMAINNAME_MAX_LEN: usize = 255;

/// Maximum length of a single label in a domain name.
pub const LABEL_MAX_LEN: usize = 63;

/// Maximum number of pointer dereferences permitted while decompressing a
/// single domain name. Bounds decode time independent of the `ptr >= start`
/// monotonicity check, which alone guarantees termination but not a useful
/// bound on work done for a pathological chain of pointers.
pub const MAX_POINTER_HOPS: usize = 128;

/// Maximum mDNS message size accepted by the security admission pipeline.
pub const MAX_MESSAGE_LEN: usize = 9000;

/// The mDNS IPv4 multicast group, 224.0.0.251.
pub const MDNS_GROUP_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// The mDNS UDP port, used for both source and destination.
pub const MDNS_PORT: u16 = 5353;

/// Octet mask for the QR flag being set (response).
pub const HEADER_MASK_QR: u8 = 0b1000_0000;

/// Octet mask for the opcode field.
pub const HEADER_MASK_OPCODE: u8 = 0b0111_1000;

/// Offset for the opcode field.
pub const HEADER_OFFSET_OPCODE: usize = 3;

/// Octet mask for the AA flag being set (authoritative).
pub const HEADER_MASK_AA: u8 = 0b0000_0100;

/// Octet mask for the TC flag being set (truncated).
pub const HEADER_MASK_TC: u8 = 0b0000_0010;

/// Octet mask for the RD flag being set (recursion desired).
pub const HEADER_MASK_RD: u8 = 0b0000_0001;

/// Octet mask for the RA flag being set (recursion available).
pub const HEADER_MASK_RA: u8 = 0b1000_0000;

/// Octet mask for the rcode field.
pub const HEADER_MASK_RCODE: u8 = 0b0000_1111;

/// Offset for the rcode field.
pub const HEADER_OFFSET_RCODE: usize = 0;

/// High bit of a question's class field: "QU", a request for a unicast
/// reply rather than the default multicast one. See RFC 6762 §18.12.
pub const CLASS_MASK_QU: u16 = 0b1000_0000_0000_0000;

/// High bit of a resource record's class field: "cache-flush", the owner's
/// assertion that the name is unique and prior cached copies of it should
/// be flushed shortly after this record is seen. See RFC 6762 §10.2.
pub const CLASS_MASK_CACHE_FLUSH: u16 = 0b1000_0000_0000_0000;

/// Mask isolating the class value itself, excluding the QU/cache-flush bit.
pub const CLASS_MASK_VALUE: u16 = 0b0111_1111_1111_1111;
