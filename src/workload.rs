//! Per-input construction parameters, gathered by the (out-of-scope)
//! caller and handed to [`crate::scheduler::Scheduler::new`].

use crate::ids::{OutputOrdinal, Pid, Tid, WorkloadIndex};
use crate::input::RegionOfInterest;
use crate::reader::Reader;

pub struct WorkloadSpec {
    pub workload_index: WorkloadIndex,
    pub tid: Tid,
    pub pid: Pid,
    pub reader: Box<dyn Reader>,
    pub priority: i32,
    /// Empty means "no restriction, any output may run this input".
    pub bindings: Vec<OutputOrdinal>,
    pub regions: Vec<RegionOfInterest>,
    pub starts_unscheduled: bool,
    /// Cap on the number of outputs concurrently running this workload's
    /// inputs (§4.4 "Output limit"). `None` means unconstrained.
    pub output_limit: Option<usize>,
    /// Whether this input is backed by an online/IPC reader rather than a
    /// file-backed one; combined with `core_sharded` this triggers the
    /// `NOT_IMPLEMENTED` init error (§7).
    pub is_online: bool,
}

impl WorkloadSpec {
    pub fn new(workload_index: WorkloadIndex, tid: Tid, pid: Pid, reader: Box<dyn Reader>) -> Self {
        WorkloadSpec {
            workload_index,
            tid,
            pid,
            reader,
            priority: 0,
            bindings: Vec::new(),
            regions: Vec::new(),
            starts_unscheduled: false,
            output_limit: None,
            is_online: false,
        }
    }
}
