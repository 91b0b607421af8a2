//! Per-record multicast rate limiting. A record may not be multicast again
//! within a floor interval of its last send; probe-defense responses use a
//! tighter floor than ordinary query answers, since they're a distinct
//! rule (RFC 6762 §6, §8.2).
//!
//! Grounded on the same `Mutex<HashMap<...>>` plus named poison-message
//! idiom as the admission pipeline's source table (`crate::security`) and,
//! before that, a resolver's `Arc<Mutex<Cache>>`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use mdns_types::protocol::types::{DomainName, RecordType};

use crate::clock::Clock;

const MUTEX_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] record rate limiter mutex poisoned, cannot recover from this - aborting";

/// Minimum spacing between ordinary multicasts of the same record.
pub const GENERAL_FLOOR: Duration = Duration::from_secs(1);

/// Minimum spacing between probe-defense multicasts of the same record.
pub const PROBE_DEFENSE_FLOOR: Duration = Duration::from_millis(250);

#[derive(Eq, PartialEq, Hash, Clone)]
struct Key {
    name: Vec<String>,
    rtype: RecordType,
}

fn key_for(name: &DomainName, rtype: RecordType) -> Key {
    Key {
        name: name.labels().iter().map(|l| l.to_ascii_lowercase()).collect(),
        rtype,
    }
}

pub struct RecordRateLimiter {
    general: Mutex<HashMap<Key, Instant>>,
    probe_defense: Mutex<HashMap<Key, Instant>>,
    general_floor: Duration,
    probe_defense_floor: Duration,
}

impl RecordRateLimiter {
    pub fn new() -> Self {
        Self::with_floors(GENERAL_FLOOR, PROBE_DEFENSE_FLOOR)
    }

    pub fn with_floors(general_floor: Duration, probe_defense_floor: Duration) -> Self {
        Self {
            general: Mutex::new(HashMap::new()),
            probe_defense: Mutex::new(HashMap::new()),
            general_floor,
            probe_defense_floor,
        }
    }

    /// Returns `true` and records the send if `name`/`rtype` has not been
    /// multicast within its floor interval; returns `false` (and does not
    /// update state) otherwise.
    pub fn try_send(
        &self,
        clock: &dyn Clock,
        name: &DomainName,
        rtype: RecordType,
        probe_defense: bool,
    ) -> bool {
        let (table, floor) = if probe_defense {
            (&self.probe_defense, self.probe_defense_floor)
        } else {
            (&self.general, self.general_floor)
        };
        let now = clock.now();
        let mut table = table.lock().expect(MUTEX_POISON_MESSAGE);
        let key = key_for(name, rtype);
        match table.get(&key) {
            Some(&last) if now.duration_since(last) < floor => false,
            _ => {
                table.insert(key, now);
                true
            }
        }
    }
}

impl Default for RecordRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use mdns_types::protocol::types::test_util::domain;

    #[test]
    fn blocks_repeated_send_within_floor_and_allows_after() {
        let clock = FixedClock::new();
        let limiter = RecordRateLimiter::new();
        let name = domain("host.local");

        assert!(limiter.try_send(&clock, &name, RecordType::A, false));
        assert!(!limiter.try_send(&clock, &name, RecordType::A, false));

        clock.advance(GENERAL_FLOOR + Duration::from_millis(1));
        assert!(limiter.try_send(&clock, &name, RecordType::A, false));
    }

    #[test]
    fn with_floors_overrides_the_defaults() {
        let clock = FixedClock::new();
        let limiter = RecordRateLimiter::with_floors(Duration::from_millis(10), Duration::from_millis(5));
        let name = domain("host.local");

        assert!(limiter.try_send(&clock, &name, RecordType::A, false));
        assert!(!limiter.try_send(&clock, &name, RecordType::A, false));
        clock.advance(Duration::from_millis(11));
        assert!(limiter.try_send(&clock, &name, RecordType::A, false));
    }

    #[test]
    fn probe_defense_floor_is_tighter_than_general() {
        let clock = FixedClock::new();
        let limiter = RecordRateLimiter::new();
        let name = domain("host.local");

        assert!(limiter.try_send(&clock, &name, RecordType::A, true));
        clock.advance(PROBE_DEFENSE_FLOOR + Duration::from_millis(1));
        assert!(limiter.try_send(&clock, &name, RecordType::A, true));
    }
}
