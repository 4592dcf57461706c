//! Pure scheduling-decision helpers (§4.4): quantum bookkeeping, the
//! blocking-syscall gap test, and the ordering-key builder. Kept free of
//! locking so they're easy to unit test in isolation; `scheduler::Scheduler`
//! wires them into the actual stateful decision loop.

use crate::config::{QuantumUnit, SchedulerConfig};
use crate::ids::Timestamp;
use crate::runqueue::RunKey;

/// Has the running input's quantum expired? For instruction quanta this
/// compares the output's `quantum_used` counter; for microsecond quanta it
/// compares elapsed simulated time since the input was (re)scheduled.
pub fn quantum_expired(quantum: QuantumUnit, quantum_used: u64, elapsed_us: Timestamp) -> bool {
    match quantum {
        QuantumUnit::Instructions(n) => quantum_used >= n,
        QuantumUnit::Microseconds(n) => elapsed_us >= n,
    }
}

/// §4.4: a `MAYBE_BLOCKING_SYSCALL` following a `SYSCALL` marker with a
/// timestamp gap at or above the threshold is treated as a real block.
/// Returns the simulated block duration in microseconds, capped at
/// `block_time_max`, or `None` if the gap doesn't clear the threshold.
pub fn blocking_duration(config: &SchedulerConfig, pre_ts: Timestamp, post_ts: Timestamp) -> Option<Timestamp> {
    let gap = post_ts.saturating_sub(pre_ts);
    if gap < config.blocking_switch_threshold {
        return None;
    }
    let over = (gap - config.blocking_switch_threshold) as f64 * config.block_time_multiplier;
    Some((over as Timestamp).min(config.block_time_max))
}

/// Build the key an input is inserted into a runqueue with (§4.3): priority
/// first, then last-seen timestamp when `DEPENDENCY_TIMESTAMPS` is in
/// effect, then a stable tie-break by input ordinal.
pub fn run_key(
    config: &SchedulerConfig,
    priority: i32,
    last_timestamp: Timestamp,
    handle: crate::ids::InputHandle,
) -> RunKey {
    let ts_key = if config.dependency_timestamps {
        last_timestamp
    } else {
        0
    };
    RunKey::new(priority, ts_key, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_quantum_expires_at_boundary() {
        let q = QuantumUnit::Instructions(3);
        assert!(!quantum_expired(q, 2, 0));
        assert!(quantum_expired(q, 3, 0));
        assert!(quantum_expired(q, 4, 0));
    }

    #[test]
    fn microsecond_quantum_ignores_instruction_count() {
        let q = QuantumUnit::Microseconds(100);
        assert!(!quantum_expired(q, 1_000_000, 50));
        assert!(quantum_expired(q, 0, 100));
    }

    #[test]
    fn blocking_gap_below_threshold_is_not_blocking() {
        let mut cfg = SchedulerConfig::default();
        cfg.blocking_switch_threshold = 100;
        assert_eq!(blocking_duration(&cfg, 100, 150), None);
    }

    #[test]
    fn blocking_gap_above_threshold_is_capped() {
        let mut cfg = SchedulerConfig::default();
        cfg.blocking_switch_threshold = 100;
        cfg.block_time_multiplier = 2.0;
        cfg.block_time_max = 500;
        assert_eq!(blocking_duration(&cfg, 0, 1_000), Some(500));
        assert_eq!(blocking_duration(&cfg, 0, 150), Some(100));
    }
}
