//! The engine's error taxonomy. Every fallible public operation returns one
//! of these variants; none of them wrap a panic or an `unwrap`.

use std::fmt;
use std::net::IpAddr;

use mdns_types::protocol::deserialise;

/// Errors surfaced by the querier and responder.
#[derive(Debug)]
pub enum Error {
    /// Caller-supplied input did not satisfy a declared constraint.
    Validation { field: &'static str, reason: String },

    /// Inbound bytes could not be parsed safely. Never fatal to the engine:
    /// callers see this only when they ask to decode a buffer directly.
    WireFormat(deserialise::Error),

    /// A socket-level failure: bind, join-group, send, or receive.
    Network { operation: &'static str, source: std::io::Error },

    /// Probing could not converge within the rename retry bound.
    Conflict { instance: String, attempts: u32 },

    /// A response would exceed the multicast size limit.
    Truncation { attempted_len: usize, limit: usize },

    /// The calling context was cancelled or its deadline elapsed.
    Cancellation,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Validation { field, reason } => write!(f, "invalid {field}: {reason}"),
            Error::WireFormat(e) => write!(f, "malformed message: {e}"),
            Error::Network { operation, source } => {
                write!(f, "network error during {operation}: {source}")
            }
            Error::Conflict { instance, attempts } => write!(
                f,
                "could not establish '{instance}' without conflict after {attempts} rename attempts"
            ),
            Error::Truncation { attempted_len, limit } => write!(
                f,
                "response of {attempted_len} octets exceeds the {limit} octet multicast limit"
            ),
            Error::Cancellation => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::WireFormat(e) => Some(e),
            Error::Network { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<deserialise::Error> for Error {
    fn from(e: deserialise::Error) -> Self {
        Error::WireFormat(e)
    }
}

impl Error {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Error::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn network(operation: &'static str, source: std::io::Error) -> Self {
        Error::Network { operation, source }
    }
}

/// A remediation hint attached to startup network errors, so a host program
/// can render something more useful than the raw `io::Error`.
pub fn startup_hint(operation: &'static str, source: &std::io::Error) -> Option<&'static str> {
    if source.kind() == std::io::ErrorKind::AddrInUse {
        Some("port 5353 is already bound; another mDNS responder (e.g. avahi-daemon, mDNSResponder) is probably running on this host")
    } else {
        let _ = operation;
        None
    }
}

/// Identifies why a packet was dropped by the security admission pipeline.
/// Not an `Error`: admission drops are expected traffic shaping, logged and
/// counted, never propagated to a caller.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AdmissionDrop {
    Oversize { len: usize },
    UntrustedSource { source: IpAddr },
    RateLimited { source: IpAddr },
}

impl fmt::Display for AdmissionDrop {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AdmissionDrop::Oversize { len } => write!(f, "oversize packet ({len} octets)"),
            AdmissionDrop::UntrustedSource { source } => {
                write!(f, "untrusted source address {source}")
            }
            AdmissionDrop::RateLimited { source } => write!(f, "rate limited source {source}"),
        }
    }
}
