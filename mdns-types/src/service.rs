//! The DNS-SD data model: a [`Service`] description and the [`RecordSet`]
//! of PTR/SRV/TXT/A records that advertises it on the network.

use std::net::Ipv4Addr;

use bytes::Bytes;

use crate::protocol::types::{DomainName, RecordTypeWithData, ResourceRecord};

/// TTL, in seconds, for the PTR/SRV/TXT records of a service. Not
/// configurable: this is the DNS-SD convention (RFC 6763 §6.1, §8) that
/// service-instance metadata changes more often than host addresses.
pub const SERVICE_RECORD_TTL: u32 = 120;

/// TTL, in seconds, for a host's A record. Not configurable.
pub const HOST_RECORD_TTL: u32 = 4500;

/// Errors raised constructing a [`Service`] from caller-supplied fields.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ValidationError {
    InstanceEmpty,
    InstanceTooLong { len: usize },
    ServiceTypeTooLong { name: String, len: usize },
    ServiceTypeMalformed { name: String },
    PortZero,
    TxtEntryTooLong { index: usize, len: usize },
    TxtTotalTooLong { len: usize },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ValidationError::InstanceEmpty => write!(f, "service instance name is empty"),
            ValidationError::InstanceTooLong { len } => {
                write!(f, "service instance name is {len} octets, limit is 63")
            }
            ValidationError::ServiceTypeTooLong { name, len } => {
                write!(f, "service type '{name}' is {len} characters, limit is 15")
            }
            ValidationError::ServiceTypeMalformed { name } => write!(
                f,
                "service type '{name}' must have the form _name._tcp or _name._udp"
            ),
            ValidationError::PortZero => write!(f, "service port must be nonzero"),
            ValidationError::TxtEntryTooLong { index, len } => {
                write!(f, "txt entry {index} is {len} octets, limit is 255")
            }
            ValidationError::TxtTotalTooLong { len } => {
                write!(f, "txt record total is {len} octets, limit is 1300")
            }
        }
    }
}

impl std::error::Error for ValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// A DNS-SD service description, as supplied by a caller of
/// [`Responder::register`](../../mdns_engine/responder/struct.Responder.html).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Service {
    instance: String,
    service_type: String,
    domain: String,
    port: u16,
    txt: Vec<(String, Vec<u8>)>,
    hostname: String,
    addresses: Vec<Ipv4Addr>,
}

impl Service {
    /// # Errors
    ///
    /// If `instance` is empty or exceeds 63 octets, `service_type` is not
    /// of the form `_name._tcp`/`_name._udp` with `name` at most 15
    /// characters, `port` is zero, or any TXT entry (or the TXT record as a
    /// whole) exceeds its length limit.
    pub fn new(
        instance: impl Into<String>,
        service_type: impl Into<String>,
        port: u16,
        hostname: impl Into<String>,
        addresses: Vec<Ipv4Addr>,
    ) -> Result<Self, ValidationError> {
        let instance = instance.into();
        let service_type = service_type.into();
        let hostname = hostname.into();

        let instance_len = instance.len();
        if instance_len == 0 {
            return Err(ValidationError::InstanceEmpty);
        }
        if instance_len > 63 {
            return Err(ValidationError::InstanceTooLong { len: instance_len });
        }

        validate_service_type(&service_type)?;

        if port == 0 {
            return Err(ValidationError::PortZero);
        }

        Ok(Self {
            instance,
            service_type,
            domain: "local".to_string(),
            port,
            txt: Vec::new(),
            hostname,
            addresses,
        })
    }

    /// # Errors
    ///
    /// If any TXT entry exceeds 255 octets or the combined TXT record
    /// exceeds 1300 octets.
    pub fn with_txt(mut self, txt: Vec<(String, Vec<u8>)>) -> Result<Self, ValidationError> {
        let mut total = 0usize;
        for (index, (key, value)) in txt.iter().enumerate() {
            let len = key.len() + 1 + value.len();
            if len > 255 {
                return Err(ValidationError::TxtEntryTooLong { index, len });
            }
            total += 1 + len; // length-prefix octet plus the entry itself
        }
        if total > 1300 {
            return Err(ValidationError::TxtTotalTooLong { len: total });
        }
        self.txt = txt;
        Ok(self)
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn addresses(&self) -> &[Ipv4Addr] {
        &self.addresses
    }

    /// The fully qualified type name, e.g. `_ipp._tcp.local`.
    pub fn service_type_domain(&self) -> DomainName {
        DomainName::from_dotted_string(&format!("{}.{}", self.service_type, self.domain))
            .expect("validated service type and domain produce a well-formed name")
    }

    /// The fully qualified instance name, e.g.
    /// `My Printer._ipp._tcp.local`.
    pub fn instance_domain(&self) -> DomainName {
        DomainName::from_dotted_string(&format!(
            "{}.{}.{}",
            self.instance, self.service_type, self.domain
        ))
        .expect("validated instance/service type/domain produce a well-formed name")
    }

    /// The fully qualified hostname, e.g. `pr.local`.
    pub fn hostname_domain(&self) -> DomainName {
        DomainName::from_dotted_string(&format!("{}.{}", self.hostname, self.domain))
            .expect("validated hostname and domain produce a well-formed name")
    }

    /// Replaces the instance label, used by the responder's rename rule on
    /// conflict. Returns `None` if the new label is empty.
    #[must_use]
    pub fn with_instance(mut self, instance: String) -> Option<Self> {
        if instance.is_empty() {
            return None;
        }
        self.instance = instance;
        Some(self)
    }

    /// Builds the PTR/SRV/TXT/A record set advertising this service, per
    /// RFC 6763 §§4, 6.
    pub fn record_set(&self) -> RecordSet {
        let ptr = ResourceRecord::new(
            self.service_type_domain(),
            RecordTypeWithData::Ptr {
                ptrdname: self.instance_domain(),
            },
            SERVICE_RECORD_TTL,
            false,
        );

        let srv = ResourceRecord::new(
            self.instance_domain(),
            RecordTypeWithData::Srv {
                priority: 0,
                weight: 0,
                port: self.port,
                target: self.hostname_domain(),
            },
            SERVICE_RECORD_TTL,
            true,
        );

        // RFC 6763 §6.1: a service with no additional data still carries a
        // TXT record, with rdata consisting of a single empty string.
        let entries = if self.txt.is_empty() {
            vec![Bytes::new()]
        } else {
            self.txt
                .iter()
                .map(|(key, value)| {
                    let mut entry = Vec::with_capacity(key.len() + 1 + value.len());
                    entry.extend_from_slice(key.as_bytes());
                    if !value.is_empty() {
                        entry.push(b'=');
                        entry.extend_from_slice(value);
                    }
                    Bytes::from(entry)
                })
                .collect()
        };
        let txt = ResourceRecord::new(
            self.instance_domain(),
            RecordTypeWithData::Txt { entries },
            SERVICE_RECORD_TTL,
            true,
        );

        let addresses = self
            .addresses
            .iter()
            .map(|address| {
                ResourceRecord::new(
                    self.hostname_domain(),
                    RecordTypeWithData::A { address: *address },
                    HOST_RECORD_TTL,
                    true,
                )
            })
            .collect();

        RecordSet {
            ptr,
            srv,
            txt,
            addresses,
        }
    }
}

fn validate_service_type(service_type: &str) -> Result<(), ValidationError> {
    let malformed = || ValidationError::ServiceTypeMalformed {
        name: service_type.to_string(),
    };

    let mut parts = service_type.split('.');
    let name = parts.next().ok_or_else(malformed)?;
    let proto = parts.next().ok_or_else(malformed)?;
    if parts.next().is_some() {
        return Err(malformed());
    }
    if !name.starts_with('_') || name.len() < 2 {
        return Err(malformed());
    }
    if proto != "_tcp" && proto != "_udp" {
        return Err(malformed());
    }
    let label = &name[1..];
    if label.len() > 15 {
        return Err(ValidationError::ServiceTypeTooLong {
            name: service_type.to_string(),
            len: label.len(),
        });
    }
    Ok(())
}

/// The four-record advertisement for a [`Service`]: a shared PTR, and
/// unique SRV/TXT/A records. See RFC 6762 §10 for the shared/unique
/// distinction.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct RecordSet {
    pub ptr: ResourceRecord,
    pub srv: ResourceRecord,
    pub txt: ResourceRecord,
    pub addresses: Vec<ResourceRecord>,
}

impl RecordSet {
    /// All unique records in this set: the ones subject to probing and
    /// conflict detection (everything but the shared PTR).
    pub fn unique_records(&self) -> Vec<&ResourceRecord> {
        let mut records = vec![&self.srv, &self.txt];
        records.extend(self.addresses.iter());
        records
    }

    /// All records in this set, in announcement order: PTR, SRV, TXT, then
    /// the address records.
    pub fn all_records(&self) -> Vec<ResourceRecord> {
        let mut records = vec![self.ptr.clone(), self.srv.clone(), self.txt.clone()];
        records.extend(self.addresses.iter().cloned());
        records
    }

    /// The same records with every TTL forced to 0, for a goodbye packet.
    pub fn goodbye_records(&self) -> Vec<ResourceRecord> {
        self.all_records().into_iter().map(ResourceRecord::goodbye).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> Service {
        Service::new(
            "My Printer",
            "_ipp._tcp",
            631,
            "pr",
            vec![Ipv4Addr::new(192, 168, 1, 100)],
        )
        .unwrap()
    }

    #[test]
    fn rejects_empty_instance() {
        assert_eq!(
            Service::new("", "_ipp._tcp", 631, "pr", vec![]).unwrap_err(),
            ValidationError::InstanceEmpty
        );
    }

    #[test]
    fn rejects_malformed_service_type() {
        assert!(Service::new("x", "ipp.tcp", 631, "pr", vec![]).is_err());
        assert!(Service::new("x", "_ipp._sctp", 631, "pr", vec![]).is_err());
    }

    #[test]
    fn rejects_zero_port() {
        assert_eq!(
            Service::new("x", "_ipp._tcp", 0, "pr", vec![]).unwrap_err(),
            ValidationError::PortZero
        );
    }

    #[test]
    fn record_set_has_expected_ttls_and_flush_bits() {
        let records = service().record_set();
        assert_eq!(records.ptr.ttl, SERVICE_RECORD_TTL);
        assert!(!records.ptr.rclass.cache_flush);
        assert_eq!(records.srv.ttl, SERVICE_RECORD_TTL);
        assert!(records.srv.rclass.cache_flush);
        assert_eq!(records.txt.ttl, SERVICE_RECORD_TTL);
        assert!(records.txt.rclass.cache_flush);
        for a in &records.addresses {
            assert_eq!(a.ttl, HOST_RECORD_TTL);
            assert!(a.rclass.cache_flush);
        }
    }

    #[test]
    fn record_set_txt_with_no_entries_carries_a_single_empty_string() {
        let records = service().record_set();
        assert_eq!(
            records.txt.rtype_with_data,
            RecordTypeWithData::Txt {
                entries: vec![Bytes::new()]
            }
        );
    }

    #[test]
    fn goodbye_zeroes_every_ttl() {
        let records = service().record_set();
        for rr in records.goodbye_records() {
            assert!(rr.is_goodbye());
        }
    }

    #[test]
    fn txt_record_total_length_is_enforced() {
        let huge_value = vec![0u8; 1300];
        assert!(service().with_txt(vec![("k".to_string(), huge_value)]).is_err());
    }
}
