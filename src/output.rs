//! Per-output cursor (§3 Output, §4.2).

use crate::ids::{InputHandle, InstrOrdinal, OutputOrdinal, Pid, RecordOrdinal, Tid, Timestamp};
use crate::record::{FileType, Record};
use crate::speculation::SpeculationFrame;
use crate::stats::Stats;
use std::collections::VecDeque;

pub struct Output {
    pub ordinal: OutputOrdinal,
    /// For `MapToRecordedOutput`/`MapAsPreviously`: the cpuid this output
    /// replays. `None` in dynamic modes.
    pub cpuid: Option<u32>,
    pub active: bool,

    pub running: Option<InputHandle>,
    /// Timestamp the currently running input last ran at on this output,
    /// used for the migration threshold check when another output tries to
    /// steal it away.
    pub running_since: Timestamp,

    pub record_ordinal: RecordOrdinal,
    pub instr_ordinal: InstrOrdinal,
    /// Quantum units consumed by the running input since it was last
    /// (re)scheduled on this output.
    pub quantum_used: u64,
    pub last_timestamp: Option<Timestamp>,
    pub filetype: FileType,

    pub spec_stack: Vec<SpeculationFrame>,

    /// Records spliced by the injection engine (context-switch or
    /// syscall-trace sequence) still waiting to be delivered on this
    /// output, ahead of the running input's own next record.
    pub pending_injection: VecDeque<Record>,

    pub last_delivered: Option<Record>,
    /// Set when the last delivered record was synthesized during
    /// speculation; `unread_last_record` refuses to re-queue those (§4.7).
    pub last_was_spec_synthetic: bool,
    pub unread_pending: bool,

    /// Direct-switch target requested by the running input's own trace,
    /// honored on its *next* scheduling decision (§4.4).
    pub pending_direct_switch: Option<InputHandle>,

    pub stats: Stats,

    /// Workload this output is currently counted against for that
    /// workload's output-limit (§4.4), if any.
    pub output_limit_workload: Option<crate::ids::WorkloadIndex>,

    /// (tid, pid) of the input last committed to this output, used to
    /// detect thread- vs process-switches for the injection engine (§4.5).
    pub prev_tid: Option<Tid>,
    pub prev_pid: Option<Pid>,
    /// Syscall number whose trace sequence should be spliced in before the
    /// next record is pulled from the running input (§4.5).
    pub pending_syscall_num: Option<u32>,
    /// Instruction ordinal at which the current `MAP_AS_PREVIOUSLY` run
    /// segment ends; `None` means run to EOF.
    pub replay_end: Option<InstrOrdinal>,
}

impl Output {
    pub fn new(ordinal: OutputOrdinal) -> Self {
        Output {
            ordinal,
            cpuid: None,
            active: true,
            running: None,
            running_since: 0,
            record_ordinal: 0,
            instr_ordinal: 0,
            quantum_used: 0,
            last_timestamp: None,
            filetype: FileType::empty(),
            spec_stack: Vec::new(),
            pending_injection: VecDeque::new(),
            last_delivered: None,
            last_was_spec_synthetic: false,
            unread_pending: false,
            pending_direct_switch: None,
            stats: Stats::default(),
            output_limit_workload: None,
            prev_tid: None,
            prev_pid: None,
            pending_syscall_num: None,
            replay_end: None,
        }
    }

    pub fn is_speculating(&self) -> bool {
        !self.spec_stack.is_empty()
    }

    /// Bump this output's own ordinals for a delivered record (I-3): every
    /// record counts here, real, injected, or speculative.
    pub fn bump(&mut self, rec: &Record) {
        self.record_ordinal += 1;
        if matches!(
            rec.kind,
            crate::record::RecordKind::Instruction { .. }
        ) {
            self.instr_ordinal += 1;
            // Quantum only advances for non-injected, non-speculative
            // instructions (§4.4); callers that deliver injected/spec
            // records bump via `bump` directly without touching
            // `quantum_used`, real instructions go through
            // `bump_with_quantum` instead.
        }
        if let Some(ts) = rec.timestamp {
            self.last_timestamp = ts.into();
        }
        self.last_was_spec_synthetic = self.is_speculating();
        self.last_delivered = Some(rec.clone());
        self.unread_pending = false;
    }

    pub fn bump_with_quantum(&mut self, rec: &Record) {
        self.bump(rec);
        if matches!(
            rec.kind,
            crate::record::RecordKind::Instruction { .. }
        ) && !rec.synthetic
            && !rec.kernel
        {
            self.quantum_used += 1;
        }
    }
}
