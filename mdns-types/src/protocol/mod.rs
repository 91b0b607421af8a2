//! Wire format for mDNS / DNS-SD messages, derived from RFC 1035 with the
//! header and class-bit extensions of RFC 6762 and the record semantics of
//! RFC 6763.

pub mod constants;
pub mod deserialise;
pub mod serialise;
pub mod types;
