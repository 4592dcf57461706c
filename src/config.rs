//! `SchedulerConfig`: the explicit value the design notes (§9) call for in
//! place of the teacher's `Flags::get()` global singleton (`flags.rs`).
//! Constructed once by the caller and borrowed by the `Scheduler` for the
//! run; nothing here is a `lazy_static`.

use crate::ids::{OutputOrdinal, Tid, Timestamp};
use std::collections::HashSet;

/// Which of §4.4's five scheduling modes is in effect.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SchedulingMode {
    /// Dynamic: any ready input may run on any output.
    MapToAnyOutput,
    /// Replay of a recorded per-cpu schedule; each output is bound to a
    /// cpuid and only accepts inputs previously observed on that cpuid.
    MapToRecordedOutput,
    /// Replay of a previously recorded scheduler run (§4.6).
    MapAsPreviously,
    /// Single output, all inputs interleaved by timestamp.
    Serial,
    /// One output per input, no interleaving.
    Parallel,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum QuantumUnit {
    Instructions(u64),
    Microseconds(u64),
}

impl Default for QuantumUnit {
    fn default() -> Self {
        QuantumUnit::Instructions(1_000_000)
    }
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub mode: SchedulingMode,
    pub num_outputs: usize,
    pub quantum: QuantumUnit,

    /// Honor `DIRECT_THREAD_SWITCH` markers (§4.4).
    pub honor_direct_switches: bool,

    /// Timestamp gap between `SYSCALL` and `MAYBE_BLOCKING_SYSCALL` at or
    /// above which the input is considered to have blocked.
    pub blocking_switch_threshold: Timestamp,
    /// Multiplier applied to `gap - threshold` to compute simulated block
    /// duration in microseconds.
    pub block_time_multiplier: f64,
    /// Upper bound on the computed block duration.
    pub block_time_max: Timestamp,

    /// Minimum elapsed time since an input last ran on an output before it
    /// may be migrated (stolen or rebalanced) elsewhere.
    pub migration_threshold: Timestamp,
    /// Period, in simulated microseconds, between rebalancing passes and
    /// between checks of the infinite-unschedule fallback.
    pub rebalance_period: Timestamp,
    /// If false, an all-unscheduled deadlock is broken by force-waking the
    /// input with the nearest wake time (or an arbitrary stable one if all
    /// timeouts are infinite) once `rebalance_period` has elapsed with no
    /// progress.
    pub honor_infinite_timeouts: bool,

    /// Constrain cross-output ordering by timestamp (§5).
    pub dependency_timestamps: bool,

    /// Verbosity knob independent of the ambient log level, mirroring
    /// `op_verbose` in the original `scheduler_launcher.cpp`; consulted by
    /// `log!` call sites in the policy and injector modules to decide
    /// whether a given `LogDebug` line is worth formatting at all.
    pub verbosity: u32,

    /// Restrict scheduling to these threads only; `init()` fails if this is
    /// disjoint from every workload's thread set (§7).
    pub only_threads: Option<HashSet<Tid>>,
    /// Restrict scheduling to these output ordinals only; `init()` fails if
    /// any is out of range (§7).
    pub only_shards: Option<HashSet<OutputOrdinal>>,
    /// Whether the output stream is core-sharded; combined with an online
    /// reader this is the one `NOT_IMPLEMENTED` combination (§7).
    pub core_sharded: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            mode: SchedulingMode::MapToAnyOutput,
            num_outputs: 1,
            quantum: QuantumUnit::default(),
            honor_direct_switches: true,
            blocking_switch_threshold: 500,
            block_time_multiplier: 1.0,
            block_time_max: 250_000,
            migration_threshold: 50,
            rebalance_period: 50_000,
            honor_infinite_timeouts: true,
            dependency_timestamps: false,
            verbosity: 0,
            only_threads: None,
            only_shards: None,
            core_sharded: false,
        }
    }
}
