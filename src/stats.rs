//! Per-output statistics counters (§3 Output, §8 `get_schedule_statistic`).
//! Kept as a plain struct of named counters (rather than a `HashMap`) so it
//! derives `Serialize` directly -- `schedule_stats_create.h` in the original
//! shows these numbers are consumed by a downstream analysis tool, not just
//! kept for internal bookkeeping.

use serde::Serialize;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum StatKind {
    Preempts,
    Migrations,
    DirectSwitchAttempts,
    DirectSwitchSuccesses,
    IdleRecords,
    WaitRecords,
    RunqueueSteals,
    OutputLimitHits,
    QuantumsExpired,
    BlockingSyscalls,
    Unschedules,
    Reschedules,
    SwitchesInputToInput,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct Stats {
    pub preempts: u64,
    pub migrations: u64,
    pub direct_switch_attempts: u64,
    pub direct_switch_successes: u64,
    pub idle_records: u64,
    pub wait_records: u64,
    pub runqueue_steals: u64,
    pub output_limit_hits: u64,
    pub quantums_expired: u64,
    pub blocking_syscalls: u64,
    pub unschedules: u64,
    pub reschedules: u64,
    pub switches_input_to_input: u64,
}

impl Stats {
    pub fn get(&self, kind: StatKind) -> u64 {
        match kind {
            StatKind::Preempts => self.preempts,
            StatKind::Migrations => self.migrations,
            StatKind::DirectSwitchAttempts => self.direct_switch_attempts,
            StatKind::DirectSwitchSuccesses => self.direct_switch_successes,
            StatKind::IdleRecords => self.idle_records,
            StatKind::WaitRecords => self.wait_records,
            StatKind::RunqueueSteals => self.runqueue_steals,
            StatKind::OutputLimitHits => self.output_limit_hits,
            StatKind::QuantumsExpired => self.quantums_expired,
            StatKind::BlockingSyscalls => self.blocking_syscalls,
            StatKind::Unschedules => self.unschedules,
            StatKind::Reschedules => self.reschedules,
            StatKind::SwitchesInputToInput => self.switches_input_to_input,
        }
    }
}
