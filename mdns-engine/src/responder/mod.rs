//! Publishes and defends DNS-SD services: owns a set of per-service
//! lifecycle tasks (see [`state_machine`]) plus the query-answering path
//! that drains the demultiplexer's query channel.

pub mod rate_limit;
pub mod state_machine;

use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use mdns_types::protocol::types::{DomainName, Message, QueryType, Question, RecordType, RecordTypeWithData, ResourceRecord};
use mdns_types::service::{RecordSet, Service};

use crate::clock::Clock;
use crate::demux::Demux;
use crate::metrics::Metrics;
use crate::transport::Transport;

pub use rate_limit::RecordRateLimiter;
pub use state_machine::{rename_instance, LifecycleState, ServiceHandle};

/// The well-known meta-name used for DNS-SD service-type enumeration.
/// RFC 6763 §9.
pub const SERVICE_ENUMERATION_NAME: &str = "_services._dns-sd._udp.local";

/// Configurable knobs for a [`Responder`], analogous to
/// [`crate::querier::QuerierOptions`]/[`crate::security::SecurityOptions`].
/// The RFC-mandated probe/announce timings in [`state_machine`] are not
/// included here: those are protocol constants, not tunable behavior.
#[derive(Debug, Clone)]
pub struct ResponderOptions {
    /// Response delay window for shared (non cache-flush) answers. RFC 6762 §6.
    pub shared_answer_delay: RangeInclusive<u64>,
    /// Response delay window applied when the response would be truncated.
    pub truncated_answer_delay: RangeInclusive<u64>,
    /// A known answer suppresses a candidate reply if its TTL is at least
    /// this fraction of the record's configured TTL. RFC 6762 §7.1.
    pub known_answer_ttl_fraction: f64,
    /// Minimum spacing between ordinary multicasts of the same record.
    pub general_rate_limit_floor: Duration,
    /// Minimum spacing between probe-defense multicasts of the same record.
    pub probe_defense_rate_limit_floor: Duration,
    /// How long [`Responder::unregister`]/[`Responder::close`] wait for a
    /// service's goodbye packet to go out before giving up on it.
    pub shutdown_grace: Duration,
}

impl Default for ResponderOptions {
    fn default() -> Self {
        Self {
            shared_answer_delay: 20..=120,
            truncated_answer_delay: 400..=500,
            known_answer_ttl_fraction: 0.5,
            general_rate_limit_floor: rate_limit::GENERAL_FLOOR,
            probe_defense_rate_limit_floor: rate_limit::PROBE_DEFENSE_FLOOR,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

struct Registered {
    handle: Arc<ServiceHandle>,
    established: watch::Receiver<Option<RecordSet>>,
    lifecycle_task: JoinHandle<()>,
}

/// Owns every service this process advertises, their shared transport, and
/// the task that answers incoming queries on their behalf.
///
/// The registry is a reader/writer lock: answering a query only ever reads
/// it, and register/unregister calls (rare, compared to incoming queries)
/// are the only writers.
#[derive(Clone)]
pub struct Responder {
    transport: Arc<Transport>,
    demux: Demux,
    registry: Arc<RwLock<Vec<Registered>>>,
    rate_limiter: Arc<RecordRateLimiter>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    options: ResponderOptions,
}

impl Responder {
    /// Spawns the query-answering task and returns a handle. `query_rx` is
    /// the receiving half of the demultiplexer's query channel (see
    /// [`crate::demux::Demux::spawn`]).
    pub fn spawn(
        transport: Arc<Transport>,
        demux: Demux,
        clock: Arc<dyn Clock>,
        query_rx: mpsc::Receiver<(Message, SocketAddr)>,
        options: ResponderOptions,
        metrics: Arc<Metrics>,
    ) -> Self {
        let registry: Arc<RwLock<Vec<Registered>>> = Arc::new(RwLock::new(Vec::new()));
        let rate_limiter = Arc::new(RecordRateLimiter::with_floors(
            options.general_rate_limit_floor,
            options.probe_defense_rate_limit_floor,
        ));

        tokio::spawn(answer_queries(
            transport.clone(),
            rate_limiter.clone(),
            clock.clone(),
            registry.clone(),
            query_rx,
            options.clone(),
        ));

        Self {
            transport,
            demux,
            registry,
            rate_limiter,
            clock,
            metrics,
            options,
        }
    }

    /// Registers a new service: begins probing immediately on its own
    /// lifecycle task and returns a handle for observing its state or
    /// unregistering it later.
    pub async fn register(&self, service: Service) -> Arc<ServiceHandle> {
        let (handle, established, lifecycle_task) = state_machine::spawn(
            service,
            self.transport.clone(),
            self.demux.clone(),
            self.rate_limiter.clone(),
            self.clock.clone(),
            self.metrics.clone(),
        );
        self.registry.write().await.push(Registered {
            handle: handle.clone(),
            established,
            lifecycle_task,
        });
        handle
    }

    /// Sends goodbye for `handle`'s service and stops answering queries for
    /// it, waiting (up to [`ResponderOptions::shutdown_grace`]) for the
    /// goodbye packet to actually go out before returning. Idempotent if
    /// called more than once for the same handle.
    pub async fn unregister(&self, handle: &Arc<ServiceHandle>) {
        handle.close();
        let removed = {
            let mut registry = self.registry.write().await;
            let index = registry.iter().position(|r| Arc::ptr_eq(&r.handle, handle));
            index.map(|i| registry.remove(i))
        };
        if let Some(registered) = removed {
            wait_for_lifecycle_task(registered.lifecycle_task, self.options.shutdown_grace).await;
        }
    }

    /// Sends goodbye for every registered service, waiting for each to
    /// finish before releasing the shared transport's multicast group
    /// membership.
    pub async fn close(&self) {
        let registered: Vec<Registered> = {
            let mut registry = self.registry.write().await;
            std::mem::take(&mut *registry)
        };
        for r in &registered {
            r.handle.close();
        }
        for r in registered {
            wait_for_lifecycle_task(r.lifecycle_task, self.options.shutdown_grace).await;
        }
        self.transport.close().await;
    }

    /// The shared admission/conflict/rename counters for every service this
    /// responder owns.
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }
}

async fn wait_for_lifecycle_task(task: JoinHandle<()>, grace: Duration) {
    if tokio::time::timeout(grace, task).await.is_err() {
        warn!("timed out waiting for service lifecycle task to send its goodbye");
    }
}

async fn answer_queries(
    transport: Arc<Transport>,
    rate_limiter: Arc<RecordRateLimiter>,
    clock: Arc<dyn Clock>,
    registry: Arc<RwLock<Vec<Registered>>>,
    mut query_rx: mpsc::Receiver<(Message, SocketAddr)>,
    options: ResponderOptions,
) {
    while let Some((message, source)) = query_rx.recv().await {
        if !message.is_query() {
            continue;
        }

        let record_sets: Vec<RecordSet> = {
            let registry = registry.read().await;
            registry
                .iter()
                .filter_map(|r| r.established.borrow().clone())
                .collect()
        };

        let (answers, additional, truncated) =
            build_reply(&message, &record_sets, &rate_limiter, clock.as_ref(), &options);
        if answers.is_empty() {
            continue;
        }

        let shared = answers.iter().any(|rr| !rr.rclass.cache_flush);
        let delay_ms = if truncated {
            rand::thread_rng().gen_range(options.truncated_answer_delay.clone())
        } else if shared {
            rand::thread_rng().gen_range(options.shared_answer_delay.clone())
        } else {
            0
        };
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let response = Message::response(answers, additional);
        match response.into_octets() {
            Ok(payload) => {
                if let Err(e) = transport.send(&payload).await {
                    debug!(error = %e, %source, "failed to send query response");
                }
            }
            Err(e) => trace!(error = %e, "response did not fit on the wire"),
        }
    }
}

/// Builds the answer/additional sections for one inbound query, applying
/// known-answer suppression and per-record rate limiting. Returns whether
/// the assembled reply would need truncation (used to pick the response
/// delay, not to actually split it across packets).
fn build_reply(
    query: &Message,
    record_sets: &[RecordSet],
    rate_limiter: &RecordRateLimiter,
    clock: &dyn Clock,
    options: &ResponderOptions,
) -> (Vec<ResourceRecord>, Vec<ResourceRecord>, bool) {
    let mut answers = Vec::new();
    let mut additional = Vec::new();

    for question in &query.questions {
        if is_service_enumeration_question(question) {
            for ptr in service_enumeration_records(record_sets) {
                push_if_not_known_and_not_limited(&ptr, query, rate_limiter, clock, options, &mut answers);
            }
            continue;
        }

        for record_set in record_sets {
            for record in record_set.all_records() {
                if !question.matches(&record) {
                    continue;
                }
                if push_if_not_known_and_not_limited(&record, query, rate_limiter, clock, options, &mut answers) {
                    for extra in additional_for(&record.rtype_with_data.rtype(), record_set) {
                        if !answers.iter().any(|a| *a == extra) && !additional.iter().any(|a| *a == extra) {
                            additional.push(extra);
                        }
                    }
                }
            }
        }
    }

    // This engine sends one UDP datagram per reply; the 9000-octet buffer
    // (`transport::RECEIVE_BUFFER_LEN`) bounds how large that can get, well
    // above what any realistic service set produces, so truncation here
    // only ever affects response timing, never correctness.
    let truncated = false;
    (answers, additional, truncated)
}

fn push_if_not_known_and_not_limited(
    record: &ResourceRecord,
    query: &Message,
    rate_limiter: &RecordRateLimiter,
    clock: &dyn Clock,
    options: &ResponderOptions,
    answers: &mut Vec<ResourceRecord>,
) -> bool {
    if answers.iter().any(|a| a == record) {
        return false;
    }
    if is_known_answer(record, query, options.known_answer_ttl_fraction) {
        return false;
    }
    if !rate_limiter.try_send(clock, &record.name, record.rtype_with_data.rtype(), false) {
        return false;
    }
    answers.push(record.clone());
    true
}

fn is_known_answer(record: &ResourceRecord, query: &Message, ttl_fraction: f64) -> bool {
    query.answers.iter().any(|known| {
        known.name.matches(&record.name)
            && known.rtype_with_data == record.rtype_with_data
            && f64::from(known.ttl) >= f64::from(record.ttl) * ttl_fraction
    })
}

fn additional_for(rtype: &RecordType, record_set: &RecordSet) -> Vec<ResourceRecord> {
    match rtype {
        RecordType::Ptr => {
            let mut extra = vec![record_set.srv.clone(), record_set.txt.clone()];
            extra.extend(record_set.addresses.iter().cloned());
            extra
        }
        RecordType::Srv => record_set.addresses.clone(),
        _ => Vec::new(),
    }
}

fn is_service_enumeration_question(question: &Question) -> bool {
    question.qtype.matches(RecordType::Ptr)
        && DomainName::from_dotted_string(SERVICE_ENUMERATION_NAME)
            .is_some_and(|meta| meta.matches(&question.name))
}

fn service_enumeration_records(record_sets: &[RecordSet]) -> Vec<ResourceRecord> {
    let meta = DomainName::from_dotted_string(SERVICE_ENUMERATION_NAME)
        .expect("service enumeration name is a well-formed literal");

    let mut seen = Vec::new();
    let mut records = Vec::new();
    for record_set in record_sets {
        let service_type_domain = record_set.ptr.name.clone();
        if seen.iter().any(|n: &DomainName| n.matches(&service_type_domain)) {
            continue;
        }
        seen.push(service_type_domain.clone());
        records.push(ResourceRecord::new(
            meta.clone(),
            RecordTypeWithData::Ptr {
                ptrdname: service_type_domain,
            },
            mdns_types::service::SERVICE_RECORD_TTL,
            false,
        ));
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn service() -> Service {
        Service::new(
            "My Printer",
            "_ipp._tcp",
            631,
            "pr",
            vec![std::net::Ipv4Addr::new(192, 168, 1, 100)],
        )
        .unwrap()
    }

    #[test]
    fn ptr_query_answers_with_srv_txt_a_as_additional() {
        let record_set = service().record_set();
        let question = Question::new(record_set.ptr.name.clone(), QueryType::Record(RecordType::Ptr));
        let query = Message::query(question);
        let limiter = RecordRateLimiter::new();
        let clock = FixedClock::new();

        let (answers, additional, _) = build_reply(&query, &[record_set.clone()], &limiter, &clock, &ResponderOptions::default());
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0], record_set.ptr);
        assert!(additional.contains(&record_set.srv));
        assert!(additional.contains(&record_set.txt));
        assert!(additional.iter().any(|a| record_set.addresses.contains(a)));
    }

    #[test]
    fn known_answer_with_sufficient_ttl_is_suppressed() {
        let record_set = service().record_set();
        let question = Question::new(record_set.ptr.name.clone(), QueryType::Record(RecordType::Ptr));
        let mut query = Message::query(question);
        query.answers.push(record_set.ptr.clone());
        let limiter = RecordRateLimiter::new();
        let clock = FixedClock::new();

        let (answers, _, _) = build_reply(&query, &[record_set], &limiter, &clock, &ResponderOptions::default());
        assert!(answers.is_empty());
    }

    #[test]
    fn known_answer_with_low_ttl_is_not_suppressed() {
        let record_set = service().record_set();
        let question = Question::new(record_set.ptr.name.clone(), QueryType::Record(RecordType::Ptr));
        let mut query = Message::query(question);
        let mut stale = record_set.ptr.clone();
        stale.ttl = 1;
        query.answers.push(stale);
        let limiter = RecordRateLimiter::new();
        let clock = FixedClock::new();

        let (answers, _, _) = build_reply(&query, &[record_set], &limiter, &clock, &ResponderOptions::default());
        assert_eq!(answers.len(), 1);
    }

    #[test]
    fn service_enumeration_question_is_answered_once_per_service_type() {
        let record_set = service().record_set();
        let meta = DomainName::from_dotted_string(SERVICE_ENUMERATION_NAME).unwrap();
        let question = Question::new(meta, QueryType::Record(RecordType::Ptr));
        let query = Message::query(question);
        let limiter = RecordRateLimiter::new();
        let clock = FixedClock::new();

        let (answers, _, _) = build_reply(&query, &[record_set.clone(), record_set], &limiter, &clock, &ResponderOptions::default());
        assert_eq!(answers.len(), 1);
        assert_eq!(
            answers[0].rtype_with_data,
            RecordTypeWithData::Ptr {
                ptrdname: DomainName::from_dotted_string("_ipp._tcp.local").unwrap()
            }
        );
    }

    #[test]
    fn rate_limited_record_is_not_answered_twice_within_floor() {
        let record_set = service().record_set();
        let question = Question::new(record_set.ptr.name.clone(), QueryType::Record(RecordType::Ptr));
        let limiter = RecordRateLimiter::new();
        let clock = FixedClock::new();

        let (first, _, _) = build_reply(&Message::query(question.clone()), &[record_set.clone()], &limiter, &clock, &ResponderOptions::default());
        assert_eq!(first.len(), 1);
        let (second, _, _) = build_reply(&Message::query(question), &[record_set], &limiter, &clock, &ResponderOptions::default());
        assert!(second.is_empty());
    }
}
