//! Per-service lifecycle: probing, conflict detection and rename,
//! announcing, established steady state with ongoing conflict defense, and
//! goodbye on shutdown.
//!
//! Grounded on the same `tokio::select!` task shape as `crate::demux`'s
//! receive loop, here driven by a per-service cancellation token instead of
//! a single shared socket reader; conflict detection (both during probing
//! and while established) reuses `Demux`'s question-matcher registration
//! rather than re-reading the socket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use mdns_types::protocol::types::{DomainName, Header, Message, Opcode, QueryType, Question, Rcode, ResourceRecord};
use mdns_types::service::{RecordSet, Service};

use crate::clock::Clock;
use crate::demux::{Demux, MatcherHandle, Sections};
use crate::error::Error;
use crate::metrics::Metrics;
use crate::responder::rate_limit::RecordRateLimiter;
use crate::transport::Transport;

/// Probe interval. Not configurable: RFC 6762 §8.1 fixes it at 250ms.
const PROBE_INTERVAL: Duration = Duration::from_millis(250);
/// Number of probes sent before a name is considered unused. Not configurable.
const PROBE_COUNT: u32 = 3;
/// Upper bound on the random delay before the first probe. RFC 6762 §8.1.
const INITIAL_PROBE_DELAY_MAX: Duration = Duration::from_millis(250);
/// Delay between the two announcements. Not configurable: RFC 6762 §8.3.
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1);
/// Number of unsolicited announcements sent on reaching the established
/// state. Not configurable.
const ANNOUNCE_COUNT: u32 = 2;
/// Giving up after this many renames means something else on the network is
/// deliberately colliding with every name we try; RFC 6762 doesn't bound
/// this, but an unbounded retry loop is not a usable API.
const MAX_RENAME_ATTEMPTS: u32 = 100;

const MUTEX_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] service handle mutex poisoned, cannot recover from this - aborting";

/// Where a registered service currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LifecycleState {
    Probing,
    Announcing,
    Established,
    Goodbye,
}

/// Externally observable state for one registered service. The responder's
/// query-answering path reads `service`/`state`; only the lifecycle task
/// that owns a given handle ever writes to it.
pub struct ServiceHandle {
    service: Mutex<Service>,
    state: Mutex<LifecycleState>,
    cancellation: CancellationToken,
}

impl ServiceHandle {
    fn new(service: Service, cancellation: CancellationToken) -> Self {
        Self {
            service: Mutex::new(service),
            state: Mutex::new(LifecycleState::Probing),
            cancellation,
        }
    }

    /// The service's current (possibly renamed) description and lifecycle
    /// phase.
    pub fn snapshot(&self) -> (Service, LifecycleState) {
        (
            self.service.lock().expect(MUTEX_POISON_MESSAGE).clone(),
            *self.state.lock().expect(MUTEX_POISON_MESSAGE),
        )
    }

    /// Requests goodbye; the owning lifecycle task exits after sending it.
    pub fn close(&self) {
        self.cancellation.cancel();
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.lock().expect(MUTEX_POISON_MESSAGE) = state;
    }

    fn set_service(&self, service: Service) {
        *self.service.lock().expect(MUTEX_POISON_MESSAGE) = service;
    }
}

/// Appends `-2`, or increments an existing trailing `-N` suffix, to resolve
/// a probing conflict. RFC 6762 §9's example progression is `name`,
/// `name (2)`, `name (3)`, ...; this engine uses a hyphenated counter
/// instead, which is an equally compliant "different name" as far as the
/// protocol is concerned.
pub fn rename_instance(instance: &str) -> String {
    if let Some(dash) = instance.rfind('-') {
        let digits = &instance[dash + 1..];
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(n) = digits.parse::<u32>() {
                return format!("{}-{}", &instance[..dash], n + 1);
            }
        }
    }
    format!("{instance}-2")
}

/// Spawns a service's full lifecycle task: probe, announce, defend against
/// conflicts while established, and, on `handle.close()` or task drop, send
/// goodbye. `established` carries the currently-advertised record set
/// (`None` before the first successful probe round, and again after a
/// rename or goodbye). The returned [`JoinHandle`] completes once goodbye
/// has actually been sent; callers that need an orderly shutdown should
/// await it after calling `handle.close()`.
pub fn spawn(
    service: Service,
    transport: Arc<Transport>,
    demux: Demux,
    rate_limiter: Arc<RecordRateLimiter>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
) -> (Arc<ServiceHandle>, watch::Receiver<Option<RecordSet>>, JoinHandle<()>) {
    let cancellation = CancellationToken::new();
    let handle = Arc::new(ServiceHandle::new(service.clone(), cancellation.clone()));
    let (established_tx, established_rx) = watch::channel(None);

    let task_handle = handle.clone();
    let join_handle = tokio::spawn(async move {
        if let Err(e) = run(
            service,
            transport,
            demux,
            rate_limiter,
            clock,
            metrics,
            cancellation,
            task_handle,
            established_tx,
        )
        .await
        {
            warn!(error = %e, "service lifecycle task ended with an error");
        }
    });

    (handle, established_rx, join_handle)
}

/// The distinct owner names of a record set's unique (non-shared) records —
/// what probing and conflict monitoring both watch for rival assertions of.
fn owner_names(record_set: &RecordSet) -> Vec<DomainName> {
    let mut names = Vec::new();
    for record in record_set.unique_records() {
        if !names.iter().any(|n: &DomainName| n.matches(&record.name)) {
            names.push(record.name.clone());
        }
    }
    names
}

#[instrument(skip_all, fields(instance = %initial.instance()))]
async fn run(
    initial: Service,
    transport: Arc<Transport>,
    demux: Demux,
    rate_limiter: Arc<RecordRateLimiter>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    cancellation: CancellationToken,
    handle: Arc<ServiceHandle>,
    established_tx: watch::Sender<Option<RecordSet>>,
) -> Result<(), Error> {
    let mut service = initial;
    let mut attempts = 0u32;
    let mut record_set;

    'lifecycle: loop {
        record_set = 'probing: loop {
            handle.set_state(LifecycleState::Probing);
            let candidate = service.record_set();
            let names = owner_names(&candidate);

            let mut watchers: Vec<(MatcherHandle, mpsc::Receiver<ResourceRecord>)> = names
                .iter()
                .map(|name| demux.register(Question::new(name.clone(), QueryType::Any), Sections::AnswersAndAuthority))
                .collect();

            let initial_delay = Duration::from_millis(
                rand::thread_rng().gen_range(0..=INITIAL_PROBE_DELAY_MAX.as_millis() as u64),
            );
            if sleep_or_cancelled(initial_delay, &cancellation).await.is_err() {
                return Ok(());
            }

            let mut conflict = false;
            for probe_num in 0..PROBE_COUNT {
                let probe = Message {
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
                    questions: names.iter().cloned().map(|name| Question::new(name, QueryType::Any)).collect(),
                    answers: Vec::new(),
                    authority: candidate.unique_records().into_iter().cloned().collect(),
                    additional: Vec::new(),
                };
                let payload = probe
                    .into_octets()
                    .map_err(|e| Error::validation("probe message", e.to_string()))?;
                transport.send(&payload).await?;
                debug!(probe_num, "sent probe");

                if wait_for_conflict(&mut watchers, &candidate, PROBE_INTERVAL, &cancellation).await {
                    conflict = true;
                    break;
                }
            }
            drop(watchers);

            if !conflict {
                break 'probing candidate;
            }

            metrics.record_conflict();
            attempts += 1;
            if attempts > MAX_RENAME_ATTEMPTS {
                return Err(Error::Conflict {
                    instance: service.instance().to_string(),
                    attempts,
                });
            }
            let renamed = rename_instance(service.instance());
            warn!(from = %service.instance(), to = %renamed, "probe conflict detected, renaming");
            service = service
                .with_instance(renamed)
                .expect("rename_instance never produces an empty label");
            handle.set_service(service.clone());
            metrics.record_rename();
        };

        handle.set_state(LifecycleState::Announcing);
        for _ in 0..ANNOUNCE_COUNT {
            let response = Message::response(record_set.all_records(), Vec::new());
            let payload = response
                .into_octets()
                .map_err(|e| Error::validation("announcement message", e.to_string()))?;
            transport.send(&payload).await?;
            if sleep_or_cancelled(ANNOUNCE_INTERVAL, &cancellation).await.is_err() {
                break;
            }
        }

        handle.set_state(LifecycleState::Established);
        let _ = established_tx.send(Some(record_set.clone()));
        info!("service established");

        let names = owner_names(&record_set);
        let mut watchers: Vec<(MatcherHandle, mpsc::Receiver<ResourceRecord>)> = names
            .iter()
            .map(|name| demux.register(Question::new(name.clone(), QueryType::Any), Sections::AnswersAndAuthority))
            .collect();

        loop {
            let incoming = match watch_for_conflict(&mut watchers, &cancellation).await {
                Some(incoming) => incoming,
                None => {
                    drop(watchers);
                    handle.set_state(LifecycleState::Goodbye);
                    let goodbye = Message::response(record_set.goodbye_records(), Vec::new());
                    if let Ok(payload) = goodbye.into_octets() {
                        let _ = transport.send(&payload).await;
                    }
                    let _ = established_tx.send(None);
                    return Ok(());
                }
            };

            metrics.record_conflict();
            if outranks(&record_set, &incoming) {
                drop(watchers);
                let renamed = rename_instance(service.instance());
                warn!(from = %service.instance(), to = %renamed, "post-announcement conflict detected, renaming");
                service = service
                    .with_instance(renamed)
                    .expect("rename_instance never produces an empty label");
                handle.set_service(service.clone());
                metrics.record_rename();
                let _ = established_tx.send(None);
                continue 'lifecycle;
            }

            if rate_limiter.try_send(clock.as_ref(), &incoming.name, incoming.rtype_with_data.rtype(), true) {
                if let Some(ours) = record_set.unique_records().into_iter().find(|r| r.name.matches(&incoming.name)) {
                    debug!(name = %incoming.name, "defending established record against conflicting assertion");
                    let defend = Message::response(vec![ours.clone()], Vec::new());
                    if let Ok(payload) = defend.into_octets() {
                        let _ = transport.send(&payload).await;
                    }
                }
            }
        }
    }
}

async fn sleep_or_cancelled(duration: Duration, cancellation: &CancellationToken) -> Result<(), ()> {
    tokio::select! {
        () = tokio::time::sleep(duration) => Ok(()),
        () = cancellation.cancelled() => Err(()),
    }
}

/// Polls `watchers` for up to `window`, returning `true` as soon as one
/// observes a record that lexicographically outranks the corresponding
/// record in `record_set` (RFC 6762 §8.2: we lose the tie-break and must
/// rename; if ours outranks theirs instead, the other host backs off and we
/// keep probing under the current name).
async fn wait_for_conflict(
    watchers: &mut [(MatcherHandle, mpsc::Receiver<ResourceRecord>)],
    record_set: &RecordSet,
    window: Duration,
    cancellation: &CancellationToken,
) -> bool {
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);
    loop {
        for (_, rx) in watchers.iter_mut() {
            if let Ok(record) = rx.try_recv() {
                if outranks(record_set, &record) {
                    return true;
                }
            }
        }
        tokio::select! {
            () = &mut deadline => return false,
            () = cancellation.cancelled() => return false,
            () = tokio::time::sleep(Duration::from_millis(5)) => {}
        }
    }
}

/// Watches `watchers` for as long as the service stays established,
/// returning the first record observed bearing one of its own names (a
/// rival asserting the same name), or `None` once `cancellation` fires.
/// Unlike `wait_for_conflict`'s bounded probing window, this has no
/// deadline: an established service defends its name for as long as it is
/// registered.
async fn watch_for_conflict(
    watchers: &mut [(MatcherHandle, mpsc::Receiver<ResourceRecord>)],
    cancellation: &CancellationToken,
) -> Option<ResourceRecord> {
    loop {
        for (_, rx) in watchers.iter_mut() {
            if let Ok(record) = rx.try_recv() {
                return Some(record);
            }
        }
        tokio::select! {
            () = cancellation.cancelled() => return None,
            () = tokio::time::sleep(Duration::from_millis(5)) => {}
        }
    }
}

/// True if `incoming` is later than or equal to the matching record in
/// `record_set`: on an exact tie both sides would otherwise independently
/// decide they'd won, so equality defers the same as a strict loss.
fn outranks(record_set: &RecordSet, incoming: &ResourceRecord) -> bool {
    record_set.unique_records().into_iter().any(|ours| {
        ours.name.matches(&incoming.name)
            && !ours
                .rtype_with_data
                .lexicographically_later_than(&incoming.rtype_with_data)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_appends_suffix_to_plain_instance() {
        assert_eq!(rename_instance("My Printer"), "My Printer-2");
    }

    #[test]
    fn rename_increments_existing_numeric_suffix() {
        assert_eq!(rename_instance("My Printer-2"), "My Printer-3");
        assert_eq!(rename_instance("My Printer-9"), "My Printer-10");
    }

    #[test]
    fn rename_does_not_misparse_a_non_numeric_trailing_dash() {
        assert_eq!(rename_instance("Office-Printer"), "Office-Printer-2");
    }

    #[test]
    fn outranks_only_compares_matching_names() {
        let service = Service::new(
            "My Printer",
            "_ipp._tcp",
            631,
            "pr",
            vec![std::net::Ipv4Addr::new(10, 0, 0, 1)],
        )
        .unwrap();
        let record_set = service.record_set();

        let unrelated = mdns_types::protocol::types::test_util::a_record(
            "other.local",
            std::net::Ipv4Addr::new(10, 0, 0, 9),
            120,
            true,
        );
        assert!(!outranks(&record_set, &unrelated));

        let higher = mdns_types::protocol::types::test_util::srv_record(
            &service.instance_domain().to_dotted_string(),
            65535,
            "pr.local",
            120,
        );
        assert!(outranks(&record_set, &higher));
    }

    #[test]
    fn outranks_defers_on_an_exact_tie() {
        let service = Service::new(
            "My Printer",
            "_ipp._tcp",
            631,
            "pr",
            vec![std::net::Ipv4Addr::new(10, 0, 0, 1)],
        )
        .unwrap();
        let record_set = service.record_set();

        let identical = record_set.srv.clone();
        assert!(outranks(&record_set, &identical));
    }
}
