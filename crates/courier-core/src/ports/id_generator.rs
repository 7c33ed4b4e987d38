//! IdGenerator port - ジョブ ID の生成

use std::sync::Mutex;

use ulid::Ulid;

use crate::domain::JobId;
use crate::ports::Clock;

/// Generates job ids.
///
/// Ids must be strictly increasing within a process: stores list records in
/// id order and the engine relies on that for per-key FIFO on recovery.
pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;
}

/// ULID-based generator.
///
/// The timestamp part comes from the clock, so a `FixedClock` gives
/// deterministic timestamps. Ids created in the same millisecond (or with a
/// clock that went backwards) are derived by incrementing the previous one.
pub struct UlidGenerator<C> {
    clock: C,
    last: Mutex<Option<Ulid>>,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            last: Mutex::new(None),
        }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> JobId {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        let fresh = Ulid::from_parts(timestamp_ms, rand::random());

        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let next = match *last {
            Some(prev) if fresh <= prev => prev.increment().unwrap_or(fresh),
            _ => fresh,
        };
        *last = Some(next);
        JobId::from_ulid(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_job_id();
        let id2 = id_gen.generate_job_id();
        let id3 = id_gen.generate_job_id();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn ids_are_strictly_increasing_under_a_fixed_clock() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let ids: Vec<JobId> = (0..100).map(|_| id_gen.generate_job_id()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
        }

        let timestamp = ids[0].as_ulid().timestamp_ms();
        assert_eq!(timestamp, fixed_time.timestamp_millis() as u64);
    }
}
