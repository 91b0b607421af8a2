//! The single reader of the transport socket, demultiplexing inbound
//! messages to pending queriers (by question) and to the responder's
//! query-answering path.
//!
//! Grounded on the `listen_udp_task`/`mpsc` reply-channel pattern used to
//! bridge a single socket reader to many in-flight operations: each
//! querier registers a `(Question, Sender<ResourceRecord>)` pair instead of
//! reading the socket itself.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use mdns_types::protocol::types::{Message, Question, ResourceRecord};

use crate::security::SecurityFilter;
use crate::transport::Transport;

const MUTEX_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] demux matcher table mutex poisoned, cannot recover from this - aborting";

/// Which parts of an inbound message a matcher is interested in.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Sections {
    /// The answer section of response messages only. What a querier wants:
    /// a probe's authority-section assertions are not an answer to its
    /// question.
    AnswersOnly,
    /// The answer section of responses and the authority section of
    /// queries. What the probing state machine wants: a rival's probe
    /// carries its proposed records in the authority section, not answers.
    AnswersAndAuthority,
}

struct Matcher {
    question: Question,
    sections: Sections,
    sender: mpsc::Sender<ResourceRecord>,
}

/// A registration handle; dropping it deregisters the matcher.
pub struct MatcherHandle {
    id: u64,
    matchers: Arc<Mutex<Vec<(u64, Matcher)>>>,
}

impl Drop for MatcherHandle {
    fn drop(&mut self) {
        let mut matchers = self.matchers.lock().expect(MUTEX_POISON_MESSAGE);
        matchers.retain(|(id, _)| *id != self.id);
    }
}

/// Shared demultiplexer state and the background loop driving it.
#[derive(Clone)]
pub struct Demux {
    matchers: Arc<Mutex<Vec<(u64, Matcher)>>>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
    query_tx: mpsc::Sender<(Message, SocketAddr)>,
}

impl Demux {
    /// Spawns the receive loop on `transport` and returns a handle plus the
    /// receiving end of the query channel, which the responder drains.
    pub fn spawn(
        transport: Arc<Transport>,
        security: SecurityFilter,
    ) -> (Self, mpsc::Receiver<(Message, SocketAddr)>) {
        let (query_tx, query_rx) = mpsc::channel(64);
        let demux = Self {
            matchers: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            query_tx,
        };
        tokio::spawn(run_loop(transport, security, demux.clone()));
        (demux, query_rx)
    }

    /// Registers interest in `question`, restricted to `sections`. Matching
    /// records are sent to the returned channel until the handle is
    /// dropped or the channel's receiver is dropped.
    pub fn register(
        &self,
        question: Question,
        sections: Sections,
    ) -> (MatcherHandle, mpsc::Receiver<ResourceRecord>) {
        let (sender, receiver) = mpsc::channel(32);
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.matchers.lock().expect(MUTEX_POISON_MESSAGE).push((
            id,
            Matcher {
                question,
                sections,
                sender,
            },
        ));
        (
            MatcherHandle {
                id,
                matchers: self.matchers.clone(),
            },
            receiver,
        )
    }

    /// Delivers records from `message` to matchers whose question matches
    /// them, restricted to each matcher's registered section(s): a querier
    /// only ever sees the answer section of a response, while the
    /// responder's probing state machine also sees the authority section of
    /// other hosts' probes, where a conflicting assertion would appear.
    fn dispatch(&self, message: &Message) {
        let matchers = self.matchers.lock().expect(MUTEX_POISON_MESSAGE);
        for (_, matcher) in matchers.iter() {
            match matcher.sections {
                Sections::AnswersOnly => {
                    if !message.header.is_response {
                        continue;
                    }
                    for record in &message.answers {
                        if matcher.question.matches(record) {
                            // A full channel means the receiver has stopped
                            // reading (likely already cancelled); dropping
                            // the record here is correct, not an error.
                            let _ = matcher.sender.try_send(record.clone());
                        }
                    }
                }
                Sections::AnswersAndAuthority => {
                    for record in message.answers.iter().chain(message.authority.iter()) {
                        if matcher.question.matches(record) {
                            let _ = matcher.sender.try_send(record.clone());
                        }
                    }
                }
            }
        }
    }
}

async fn run_loop(transport: Arc<Transport>, security: SecurityFilter, demux: Demux) {
    let mut buffer = BytesMut::new();
    loop {
        let (len, source) = match transport.receive(&mut buffer).await {
            Ok(result) => result,
            Err(crate::error::Error::Cancellation) => break,
            Err(e) => {
                warn!(error = %e, "transport receive failed, stopping demux loop");
                break;
            }
        };

        if let Err(drop_reason) = security.admit(len, source.ip()) {
            trace!(%drop_reason, "admission pipeline dropped packet");
            continue;
        }

        let message = match Message::from_octets(&buffer[..len]) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, %source, "discarding unparseable mdns message");
                continue;
            }
        };

        demux.dispatch(&message);
        if !message.header.is_response && demux.query_tx.try_send((message, source)).is_err() {
            debug!("responder query channel full, dropping inbound query");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdns_types::protocol::types::test_util::a_record;
    use mdns_types::protocol::types::{QueryType, RecordType};
    use std::net::Ipv4Addr;

    fn test_demux() -> Demux {
        let (query_tx, _query_rx) = mpsc::channel(1);
        Demux {
            matchers: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            query_tx,
        }
    }

    #[tokio::test]
    async fn dispatch_delivers_matching_answers_to_registered_matcher() {
        let demux = test_demux();
        let question = Question::new(
            mdns_types::protocol::types::test_util::domain("host.local"),
            QueryType::Record(RecordType::A),
        );
        let (_handle, mut rx) = demux.register(question, Sections::AnswersOnly);

        let record = a_record("host.local", Ipv4Addr::new(10, 0, 0, 1), 120, true);
        let message = Message::response(vec![record.clone()], Vec::new());
        demux.dispatch(&message);

        assert_eq!(rx.recv().await, Some(record));
    }

    #[tokio::test]
    async fn answers_only_matcher_ignores_authority_section_of_a_probe() {
        let demux = test_demux();
        let question = Question::new(
            mdns_types::protocol::types::test_util::domain("host.local"),
            QueryType::Any,
        );
        let (_handle, mut rx) = demux.register(question.clone(), Sections::AnswersOnly);

        let record = a_record("host.local", Ipv4Addr::new(10, 0, 0, 1), 120, true);
        let mut probe = Message::query(question);
        probe.authority.push(record);
        demux.dispatch(&probe);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn answers_and_authority_matcher_also_checks_the_authority_section_for_probes() {
        let demux = test_demux();
        let question = Question::new(
            mdns_types::protocol::types::test_util::domain("host.local"),
            QueryType::Any,
        );
        let (_handle, mut rx) = demux.register(question.clone(), Sections::AnswersAndAuthority);

        let record = a_record("host.local", Ipv4Addr::new(10, 0, 0, 1), 120, true);
        let mut probe = Message::query(question);
        probe.authority.push(record.clone());
        demux.dispatch(&probe);

        assert_eq!(rx.recv().await, Some(record));
    }

    #[test]
    fn dropping_the_handle_deregisters_the_matcher() {
        let demux = test_demux();
        let question = Question::new(
            mdns_types::protocol::types::test_util::domain("host.local"),
            QueryType::Any,
        );
        let (handle, _rx) = demux.register(question, Sections::AnswersAndAuthority);
        assert_eq!(demux.matchers.lock().unwrap().len(), 1);
        drop(handle);
        assert_eq!(demux.matchers.lock().unwrap().len(), 0);
    }
}
