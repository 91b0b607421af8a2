//! One-shot mDNS queries: issue, collect, deduplicate, honor cancellation
//! and deadlines.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{instrument, Instrument};

use mdns_types::protocol::types::{DomainName, Question, QueryType, RecordTypeWithData, ResourceRecord};

use crate::demux::{Demux, Sections};
use crate::error::Error;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy)]
pub struct QuerierOptions {
    pub default_timeout: Duration,
}

impl Default for QuerierOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(1),
        }
    }
}

/// A handle for issuing one-shot mDNS queries against a shared transport.
#[derive(Clone)]
pub struct Querier {
    transport: Arc<Transport>,
    demux: Demux,
    options: QuerierOptions,
}

impl Querier {
    pub fn new(transport: Arc<Transport>, demux: Demux, options: QuerierOptions) -> Self {
        Self {
            transport,
            demux,
            options,
        }
    }

    /// Issues a one-shot query for `name`/`qtype` and collects responses
    /// until `cancellation` fires or `timeout` elapses, whichever comes
    /// first. A timeout is not an error: it simply ends collection, and an
    /// empty result vector is a valid (if uninteresting) answer.
    ///
    /// Results are deduplicated by (name, type, rdata) in the order they
    /// were first observed.
    ///
    /// # Errors
    ///
    /// If `name` is not a well-formed domain name, or the transport cannot
    /// send the query.
    #[instrument(skip(self, cancellation), fields(%name, ?qtype))]
    pub async fn query(
        &self,
        name: &str,
        qtype: QueryType,
        timeout: Duration,
        cancellation: CancellationToken,
    ) -> Result<Vec<ResourceRecord>, Error> {
        let domain = DomainName::from_dotted_string(name)
            .ok_or_else(|| Error::validation("name", format!("'{name}' is not a well-formed domain name")))?;

        let question = Question::new(domain, qtype).requesting_unicast_response();
        let (handle, mut records_rx) = self.demux.register(question.clone(), Sections::AnswersOnly);

        let message = mdns_types::protocol::types::Message::query(question);
        let payload = message
            .into_octets()
            .map_err(|e| Error::validation("message", e.to_string()))?;
        self.transport.send(&payload).await?;

        let mut seen = HashSet::new();
        let mut results = Vec::new();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = cancellation.cancelled() => break,
                () = &mut deadline => break,
                maybe_record = records_rx.recv() => {
                    match maybe_record {
                        Some(record) => {
                            let key = dedup_key(&record);
                            if seen.insert(key) {
                                results.push(record);
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        drop(handle);
        Ok(results)
    }

    /// `query` with the querier's configured default timeout.
    pub async fn query_default(
        &self,
        name: &str,
        qtype: QueryType,
    ) -> Result<Vec<ResourceRecord>, Error> {
        self.query(name, qtype, self.options.default_timeout, CancellationToken::new())
            .instrument(tracing::info_span!("query_default"))
            .await
    }

    /// Leaves the multicast group and stops the underlying transport's
    /// receive loop. Any in-flight `query` calls see their matcher channel
    /// close and return whatever results they'd collected so far.
    pub async fn close(&self) {
        self.transport.close().await;
    }

    /// A token that fires when this querier's transport is closed.
    pub fn cancellation(&self) -> CancellationToken {
        self.transport.cancellation()
    }
}

fn dedup_key(record: &ResourceRecord) -> (String, u16, Vec<u8>) {
    let rtype: u16 = record.rtype_with_data.rtype().into();
    let rdata = match &record.rtype_with_data {
        RecordTypeWithData::A { address } => address.octets().to_vec(),
        RecordTypeWithData::Ptr { ptrdname } => ptrdname.octets_uncompressed(),
        RecordTypeWithData::Srv { target, .. } => target.octets_uncompressed(),
        RecordTypeWithData::Txt { entries } => entries.iter().flat_map(|e| e.to_vec()).collect(),
        RecordTypeWithData::Unknown { octets, .. } => octets.to_vec(),
    };
    (record.name.to_dotted_string().to_ascii_lowercase(), rtype, rdata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn dedup_key_distinguishes_rdata() {
        let a = mdns_types::protocol::types::test_util::a_record(
            "host.local",
            Ipv4Addr::new(10, 0, 0, 1),
            120,
            true,
        );
        let b = mdns_types::protocol::types::test_util::a_record(
            "host.local",
            Ipv4Addr::new(10, 0, 0, 2),
            120,
            true,
        );
        assert_ne!(dedup_key(&a), dedup_key(&b));
    }

    #[test]
    fn dedup_key_is_case_insensitive_on_name() {
        let lower = mdns_types::protocol::types::test_util::a_record(
            "host.local",
            Ipv4Addr::new(10, 0, 0, 1),
            120,
            true,
        );
        let upper = mdns_types::protocol::types::test_util::a_record(
            "HOST.LOCAL",
            Ipv4Addr::new(10, 0, 0, 1),
            120,
            true,
        );
        assert_eq!(dedup_key(&lower), dedup_key(&upper));
    }

    #[test]
    fn invalid_name_validation_message_mentions_field() {
        let err = Error::validation("name", "bad");
        assert!(err.to_string().contains("invalid name"));
    }
}
