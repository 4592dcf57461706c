//! Small integer identities used throughout the scheduler.
//!
//! Per the arena design (see `scheduler::Shared`), inputs are never referred
//! to directly; every cross-input reference (direct switches, schedule /
//! unschedule by tid, bindings) goes through an `InputHandle`, a small index
//! into the arena. Handles never outlive the `Scheduler` that minted them.

use libc::pid_t;

pub type WorkloadIndex = u32;
pub type Tid = pid_t;
pub type Pid = pid_t;
pub type OutputOrdinal = usize;
pub type InstrOrdinal = u64;
pub type RecordOrdinal = u64;
pub type Timestamp = u64;

/// Number of bits reserved for the thread id in the low bits of [`InputId`].
const WORKLOAD_SHIFT: u32 = 32;

/// `(workload_index << shift) | thread_id`, exposed to the consumer as the
/// stable identity of an input, independent of arena placement.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, serde::Serialize)]
pub struct InputId(pub u64);

impl InputId {
    pub fn new(workload_index: WorkloadIndex, tid: Tid) -> Self {
        InputId(((workload_index as u64) << WORKLOAD_SHIFT) | (tid as u32 as u64))
    }

    pub fn workload_index(&self) -> WorkloadIndex {
        (self.0 >> WORKLOAD_SHIFT) as u32
    }

    pub fn tid(&self) -> Tid {
        (self.0 & 0xFFFF_FFFF) as u32 as pid_t
    }
}

impl std::fmt::Display for InputId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.workload_index(), self.tid())
    }
}

/// Arena index for an [`crate::input::Input`]. Cheap to copy, stable for the
/// lifetime of the `Scheduler`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct InputHandle(pub u32);

impl InputHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
