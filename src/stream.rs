//! `OutputStream` (§6 "Stream contract"): the per-output handle a consumer
//! actually drives. Thin wrapper over [`crate::scheduler::Scheduler`] -- all
//! the state lives there so cloning a handle (if a caller wants one per
//! worker thread sharing an `Arc<Scheduler>`) is free.

use crate::error::Status;
use crate::ids::{InputId, InstrOrdinal, OutputOrdinal, RecordOrdinal, Tid, Timestamp, WorkloadIndex};
use crate::record::{FileType, Record};
use crate::scheduler::Scheduler;
use crate::stats::StatKind;
use std::sync::Arc;

/// One output's view onto a shared [`Scheduler`]. `§6` names this contract
/// `stream_t` in the original; every accessor here reflects the most
/// recently delivered record on this output, not some global scheduler
/// state.
pub struct OutputStream {
    scheduler: Arc<Scheduler>,
    ordinal: OutputOrdinal,
}

impl OutputStream {
    pub(crate) fn new(scheduler: Arc<Scheduler>, ordinal: OutputOrdinal) -> Self {
        OutputStream { scheduler, ordinal }
    }

    pub fn shard_index(&self) -> OutputOrdinal {
        self.ordinal
    }

    /// Advance one record. `now` lets the caller drive simulated time for
    /// microsecond quanta and blocking-syscall wakeups; pass `None` to use
    /// the scheduler's own wall-clock-free internal counter.
    pub fn next_record(&self, now: Option<Timestamp>) -> (Status, Option<Record>) {
        self.scheduler.next_record(self.ordinal, now)
    }

    pub fn get_record_ordinal(&self) -> RecordOrdinal {
        self.scheduler.get_record_ordinal(self.ordinal)
    }

    pub fn get_instruction_ordinal(&self) -> InstrOrdinal {
        self.scheduler.get_instruction_ordinal(self.ordinal)
    }

    pub fn get_last_timestamp(&self) -> Option<Timestamp> {
        self.scheduler.get_last_timestamp(self.ordinal)
    }

    pub fn get_tid(&self) -> Tid {
        self.scheduler.get_tid(self.ordinal)
    }

    pub fn get_workload_id(&self) -> WorkloadIndex {
        self.scheduler.get_workload_id(self.ordinal)
    }

    pub fn get_input_id(&self) -> Option<InputId> {
        self.scheduler.get_input_id(self.ordinal)
    }

    /// Stable identity of the currently running input's own reader, or
    /// `None` if nothing is running on this output right now (§6).
    pub fn get_input_interface(&self) -> Option<InputId> {
        self.get_input_id()
    }

    pub fn get_output_cpuid(&self) -> Option<u32> {
        self.scheduler.get_output_cpuid(self.ordinal)
    }

    pub fn get_filetype(&self) -> FileType {
        self.scheduler.get_filetype(self.ordinal)
    }

    pub fn get_shard_index(&self) -> OutputOrdinal {
        self.ordinal
    }

    pub fn is_record_synthetic(&self) -> bool {
        self.scheduler.is_record_synthetic(self.ordinal)
    }

    pub fn is_record_kernel(&self) -> bool {
        self.scheduler.is_record_kernel(self.ordinal)
    }

    /// Begin synthesizing NOP instructions at `pc` instead of pulling from
    /// whatever is running (§4.7). `false` if the last delivered record is
    /// still unread (`unread_last_record` pending).
    pub fn start_speculation(&self, pc: u64, save_current_record: bool) -> bool {
        self.scheduler.start_speculation(self.ordinal, pc, save_current_record)
    }

    /// End the innermost speculation frame. `false` if not currently
    /// speculating.
    pub fn stop_speculation(&self) -> bool {
        self.scheduler.stop_speculation(self.ordinal)
    }

    /// Re-deliver the last record on the next `next_record` call (§4.7).
    /// Refuses if the last record was itself speculative or already queued.
    pub fn unread_last_record(&self) -> bool {
        self.scheduler.unread_last_record(self.ordinal)
    }

    /// Mark this output active/inactive. Deactivating hands the running
    /// input back to the runqueue so another output can pick it up.
    pub fn set_active(&self, active: bool) {
        self.scheduler.set_active(self.ordinal, active)
    }

    pub fn get_schedule_statistic(&self, kind: StatKind) -> u64 {
        self.scheduler.get_schedule_statistic(self.ordinal, kind)
    }
}
