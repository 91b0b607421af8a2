//! Pre-parse admission pipeline: drop hostile or malformed traffic before
//! the codec allocates on it. Three stages run in order on every inbound
//! datagram: a size gate, a source-class gate, and a per-source sliding
//! window rate limiter with cooldown.
//!
//! The per-source table follows the same `Arc<Mutex<...>>` plus named
//! poison-message idiom as a resolver's shared record cache: operations are
//! O(1) under the lock, and a poisoned lock is an unrecoverable internal
//! error rather than something to silently paper over.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::clock::{Clock, RealClock};
use crate::error::AdmissionDrop;
use crate::metrics::Metrics;

/// Payloads larger than this are dropped before any parsing is attempted.
pub const MAX_MESSAGE_LEN: usize = mdns_types::protocol::constants::MAX_MESSAGE_LEN;

const MUTEX_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] rate limiter mutex poisoned, cannot recover from this - aborting";

#[derive(Debug, Clone, Copy)]
pub struct SecurityOptions {
    pub max_message_len: usize,
    pub rate_limit_threshold: u32,
    pub rate_limit_window: Duration,
    pub rate_limit_cooldown: Duration,
    pub idle_entry_timeout: Duration,
}

impl Default for SecurityOptions {
    fn default() -> Self {
        Self {
            max_message_len: MAX_MESSAGE_LEN,
            rate_limit_threshold: 100,
            rate_limit_window: Duration::from_secs(1),
            rate_limit_cooldown: Duration::from_secs(60),
            idle_entry_timeout: Duration::from_secs(5 * 60),
        }
    }
}

struct SourceState {
    window_start: Instant,
    count_in_window: u32,
    cooldown_until: Option<Instant>,
    last_activity: Instant,
    warned: bool,
}

/// The admission pipeline. Cheaply `Clone`-able; every clone shares the same
/// rate-limiter table and options.
#[derive(Clone)]
pub struct SecurityFilter {
    options: SecurityOptions,
    interfaces: Arc<Vec<ipnet::IpNet>>,
    table: Arc<Mutex<HashMap<IpAddr, SourceState>>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl SecurityFilter {
    pub fn new(options: SecurityOptions, bound_interface_subnets: Vec<ipnet::IpNet>, metrics: Arc<Metrics>) -> Self {
        Self {
            options,
            interfaces: Arc::new(bound_interface_subnets),
            table: Arc::new(Mutex::new(HashMap::new())),
            clock: Arc::new(RealClock),
            metrics,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs all three admission stages against a candidate packet. Returns
    /// `Ok(())` if the packet should proceed to parsing, or the reason it
    /// was dropped. Every outcome is counted in `metrics`.
    pub fn admit(&self, len: usize, source: IpAddr) -> Result<(), AdmissionDrop> {
        let result = self.admit_inner(len, source);
        match &result {
            Ok(()) => self.metrics.record_admitted(),
            Err(AdmissionDrop::RateLimited { .. }) => self.metrics.record_rate_limited(),
            Err(AdmissionDrop::Oversize { .. } | AdmissionDrop::UntrustedSource { .. }) => {
                self.metrics.record_dropped();
            }
        }
        result
    }

    fn admit_inner(&self, len: usize, source: IpAddr) -> Result<(), AdmissionDrop> {
        if len > self.options.max_message_len {
            warn!(len, "dropping oversize mdns packet");
            return Err(AdmissionDrop::Oversize { len });
        }

        if !self.is_trusted_source(source) {
            debug!(%source, "dropping packet from untrusted source");
            return Err(AdmissionDrop::UntrustedSource { source });
        }

        self.check_rate_limit(source)
    }

    fn is_trusted_source(&self, source: IpAddr) -> bool {
        match source {
            IpAddr::V4(v4) => {
                if v4.is_multicast() {
                    return false;
                }
                if is_link_local_v4(v4) {
                    return true;
                }
                self.interfaces.iter().any(|net| net.contains(&IpAddr::V4(v4)))
            }
            IpAddr::V6(_) => false,
        }
    }

    fn check_rate_limit(&self, source: IpAddr) -> Result<(), AdmissionDrop> {
        let now = self.clock.now();
        let mut table = self.table.lock().expect(MUTEX_POISON_MESSAGE);
        let entry = table.entry(source).or_insert_with(|| SourceState {
            window_start: now,
            count_in_window: 0,
            cooldown_until: None,
            last_activity: now,
            warned: false,
        });
        entry.last_activity = now;

        if let Some(until) = entry.cooldown_until {
            if now < until {
                if entry.warned {
                    debug!(%source, "dropping packet from source in cooldown");
                } else {
                    warn!(%source, "source entered rate-limit cooldown");
                    entry.warned = true;
                }
                return Err(AdmissionDrop::RateLimited { source });
            }
            entry.cooldown_until = None;
            entry.warned = false;
            entry.window_start = now;
            entry.count_in_window = 0;
        }

        if now.duration_since(entry.window_start) >= self.options.rate_limit_window {
            entry.window_start = now;
            entry.count_in_window = 0;
        }

        entry.count_in_window += 1;
        if entry.count_in_window > self.options.rate_limit_threshold {
            entry.cooldown_until = Some(now + self.options.rate_limit_cooldown);
            warn!(%source, "source exceeded rate limit, entering cooldown");
            entry.warned = true;
            return Err(AdmissionDrop::RateLimited { source });
        }

        Ok(())
    }

    /// Removes entries that have seen no activity for `idle_entry_timeout`
    /// and are not (or are no longer) in cooldown. Intended to be driven by
    /// a periodic background task.
    pub fn evict_idle_entries(&self) {
        let now = self.clock.now();
        let mut table = self.table.lock().expect(MUTEX_POISON_MESSAGE);
        table.retain(|_, state| {
            let cooling_down = state.cooldown_until.is_some_and(|until| now < until);
            cooling_down || now.duration_since(state.last_activity) < self.options.idle_entry_timeout
        });
    }

    #[cfg(test)]
    pub fn tracked_sources(&self) -> usize {
        self.table.lock().expect(MUTEX_POISON_MESSAGE).len()
    }

    /// The shared admission counters. Clones are cheap; all clones of a
    /// given filter (and anything else holding the same `Arc`) see the same
    /// counts.
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }
}

fn is_link_local_v4(address: Ipv4Addr) -> bool {
    let octets = address.octets();
    octets[0] == 169 && octets[1] == 254
}

/// Runs [`SecurityFilter::evict_idle_entries`] on an interval until
/// `cancellation` fires. Intended to be spawned once per transport.
pub async fn janitor_task(filter: SecurityFilter, cancellation: tokio_util::sync::CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            () = cancellation.cancelled() => break,
            _ = interval.tick() => filter.evict_idle_entries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> SecurityFilter {
        SecurityFilter::new(
            SecurityOptions {
                rate_limit_threshold: 3,
                ..SecurityOptions::default()
            },
            vec!["192.168.1.0/24".parse().unwrap()],
            Arc::new(Metrics::new()),
        )
    }

    #[test]
    fn oversize_packets_are_dropped() {
        let f = filter();
        let source = IpAddr::V4(Ipv4Addr::new(169, 254, 1, 1));
        assert_eq!(
            f.admit(MAX_MESSAGE_LEN + 1, source),
            Err(AdmissionDrop::Oversize { len: MAX_MESSAGE_LEN + 1 })
        );
    }

    #[test]
    fn multicast_sources_are_rejected() {
        let f = filter();
        let source = IpAddr::V4(Ipv4Addr::new(224, 0, 0, 251));
        assert_eq!(
            f.admit(10, source),
            Err(AdmissionDrop::UntrustedSource { source })
        );
    }

    #[test]
    fn link_local_and_bound_subnet_sources_are_trusted() {
        let f = filter();
        assert!(f
            .admit(10, IpAddr::V4(Ipv4Addr::new(169, 254, 3, 4)))
            .is_ok());
        assert!(f
            .admit(10, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)))
            .is_ok());
        assert!(f
            .admit(10, IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)))
            .is_err());
    }

    #[test]
    fn rate_limit_trips_after_threshold_and_recovers_after_cooldown() {
        let clock = Arc::new(crate::clock::FixedClock::new());
        let f = filter().with_clock(clock.clone());
        let source = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50));

        for _ in 0..3 {
            assert!(f.admit(10, source).is_ok());
        }
        assert_eq!(f.admit(10, source), Err(AdmissionDrop::RateLimited { source }));

        clock.advance(Duration::from_secs(61));
        assert!(f.admit(10, source).is_ok());
    }

    #[test]
    fn admission_outcomes_are_counted() {
        let f = filter();
        assert!(f.admit(10, IpAddr::V4(Ipv4Addr::new(169, 254, 1, 1))).is_ok());
        assert!(f
            .admit(MAX_MESSAGE_LEN + 1, IpAddr::V4(Ipv4Addr::new(169, 254, 1, 1)))
            .is_err());
        let metrics = f.metrics();
        assert_eq!(metrics.admitted(), 1);
        assert_eq!(metrics.dropped(), 1);
    }

    #[test]
    fn idle_entries_are_evicted() {
        let clock = Arc::new(crate::clock::FixedClock::new());
        let f = filter().with_clock(clock.clone());
        let source = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50));
        f.admit(10, source).unwrap();
        assert_eq!(f.tracked_sources(), 1);

        clock.advance(Duration::from_secs(6 * 60));
        f.evict_idle_entries();
        assert_eq!(f.tracked_sources(), 0);
    }
}
