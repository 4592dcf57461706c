//! The trace record model (§3).
//!
//! A [`Record`] is a tagged variant over instructions, memory accesses,
//! markers, and the handful of structural record kinds (header, footer,
//! thread-id, process-id, thread-exit, raw encoding bytes). [`TraceRecord`]
//! is the seam the design notes (§9) call out for "template specialization
//! across record vs memref forms" in the original: the scheduler's internal
//! plumbing (quantum accounting, injection, speculation) is written against
//! this trait rather than `Record`'s concrete fields, even though this crate
//! ships a single implementor.

use crate::ids::{Pid, Tid, Timestamp};
use bitflags::bitflags;
use serde::{Serialize, Serializer};

bitflags! {
    /// OR-ed into an output's exposed filetype. `KERNEL_SYSCALLS` is set the
    /// first time a syscall-trace sequence is spliced into that output
    /// (§4.5).
    #[derive(Default)]
    pub struct FileType: u32 {
        const CORE_SHARDED      = 1 << 0;
        const SYSTEM_CALL_TRACE = 1 << 1;
        const KERNEL_SYSCALLS   = 1 << 2;
        const IFETCH            = 1 << 3;
    }
}

impl Serialize for FileType {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u32(self.bits())
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize)]
pub enum BranchKind {
    Conditional,
    Unconditional,
    Indirect,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize)]
pub enum MemRefKind {
    Load,
    Store,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize)]
pub enum SwitchKind {
    Thread,
    Process,
}

/// Marker subkinds named in §3. Most carry their `uintptr_t` payload inline
/// rather than in the surrounding `Record::value` so call sites can match on
/// the kind and get the typed payload in one step.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize)]
pub enum MarkerKind {
    Timestamp,
    Cpuid,
    Version,
    Filetype,
    Syscall(u32),
    MaybeBlockingSyscall,
    SyscallUnschedule,
    SyscallSchedule(Tid),
    SyscallArgTimeout(Timestamp),
    DirectThreadSwitch(Tid),
    KernelEvent,
    KernelXfer,
    ContextSwitchStart(SwitchKind),
    ContextSwitchEnd(SwitchKind),
    SyscallTraceStart(u32),
    SyscallTraceEnd(u32),
    BranchTarget(u64),
    CoreIdle,
    CoreWait,
    WindowId(u64),
    FuncId(u64),
    FuncArg(u64),
    FuncRetval(u64),
}

#[derive(Clone, Debug, Serialize)]
pub enum RecordKind {
    Instruction {
        pc: u64,
        branch: Option<BranchKind>,
        size: u16,
        indirect_target: Option<u64>,
        is_nop: bool,
    },
    MemRef {
        kind: MemRefKind,
        addr: u64,
        size: u16,
    },
    Marker {
        kind: MarkerKind,
        value: u64,
    },
    ThreadExit,
    Header {
        version: u32,
    },
    Footer,
    Encoding(Vec<u8>),
    ThreadId(Tid),
    ProcessId(Pid),
}

/// A single record flowing through the scheduler. `synthetic` is set on any
/// record the scheduler itself produced (injected sequences, speculation
/// nops, `CORE_IDLE`/`CORE_WAIT`, synthesized window/timestamp/cpuid
/// markers around a region-of-interest skip). `kernel` is set while
/// delivering a spliced context-switch sequence.
#[derive(Clone, Debug, Serialize)]
pub struct Record {
    pub kind: RecordKind,
    pub tid: Tid,
    pub pid: Pid,
    pub timestamp: Option<Timestamp>,
    pub cpuid: Option<u32>,
    pub filetype: FileType,
    pub synthetic: bool,
    pub kernel: bool,
}

impl Record {
    pub fn new(kind: RecordKind, tid: Tid, pid: Pid) -> Self {
        Record {
            kind,
            tid,
            pid,
            timestamp: None,
            cpuid: None,
            filetype: FileType::empty(),
            synthetic: false,
            kernel: false,
        }
    }

    pub fn synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }

    pub fn kernel(mut self) -> Self {
        self.kernel = true;
        self
    }
}

/// The generic seam alluded to in design note §9 ("template specialization
/// across record vs memref forms ... expressed as a single generic
/// scheduler parameterized by the record trait").
pub trait TraceRecord: Clone + std::fmt::Debug {
    fn is_instr(&self) -> bool;
    fn is_marker(&self) -> bool;
    fn marker_kind(&self) -> Option<MarkerKind>;
    fn pc(&self) -> Option<u64>;
    fn size(&self) -> u16;
    fn is_nop_instr(&self) -> bool;
    fn is_thread_exit(&self) -> bool;
    fn is_footer(&self) -> bool;
    fn tid(&self) -> Tid;
    fn pid(&self) -> Pid;
    fn timestamp(&self) -> Option<Timestamp>;
}

impl TraceRecord for Record {
    fn is_instr(&self) -> bool {
        matches!(self.kind, RecordKind::Instruction { .. })
    }

    fn is_marker(&self) -> bool {
        matches!(self.kind, RecordKind::Marker { .. })
    }

    fn marker_kind(&self) -> Option<MarkerKind> {
        match self.kind {
            RecordKind::Marker { kind, .. } => Some(kind),
            _ => None,
        }
    }

    fn pc(&self) -> Option<u64> {
        match self.kind {
            RecordKind::Instruction { pc, .. } => Some(pc),
            _ => None,
        }
    }

    fn size(&self) -> u16 {
        match self.kind {
            RecordKind::Instruction { size, .. } => size,
            RecordKind::MemRef { size, .. } => size,
            _ => 0,
        }
    }

    fn is_nop_instr(&self) -> bool {
        matches!(self.kind, RecordKind::Instruction { is_nop: true, .. })
    }

    fn is_thread_exit(&self) -> bool {
        matches!(self.kind, RecordKind::ThreadExit)
    }

    fn is_footer(&self) -> bool {
        matches!(self.kind, RecordKind::Footer)
    }

    fn tid(&self) -> Tid {
        self.tid
    }

    fn pid(&self) -> Pid {
        self.pid
    }

    fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }
}

/// Minimum architectural instruction size used to space out synthesized
/// speculation nops (§4.7): `pc`, `pc + L`, `pc + 2L`, ...
pub const MIN_INSTR_SIZE: u64 = 1;

/// Small `make_*` builders mirroring the original's `mock_reader.h`, used by
/// both the unit tests and the property tests so fixtures stay terse.
pub mod testing {
    use super::*;

    pub fn instr(pc: u64, tid: Tid, pid: Pid) -> Record {
        Record::new(
            RecordKind::Instruction {
                pc,
                branch: None,
                size: 1,
                indirect_target: None,
                is_nop: false,
            },
            tid,
            pid,
        )
    }

    pub fn nop_instr(pc: u64, tid: Tid, pid: Pid) -> Record {
        Record::new(
            RecordKind::Instruction {
                pc,
                branch: None,
                size: MIN_INSTR_SIZE as u16,
                indirect_target: None,
                is_nop: true,
            },
            tid,
            pid,
        )
        .synthetic()
    }

    pub fn memref(addr: u64, kind: MemRefKind, tid: Tid, pid: Pid) -> Record {
        Record::new(RecordKind::MemRef { kind, addr, size: 8 }, tid, pid)
    }

    pub fn marker(kind: MarkerKind, value: u64, tid: Tid, pid: Pid) -> Record {
        Record::new(RecordKind::Marker { kind, value }, tid, pid)
    }

    pub fn timestamp(ts: Timestamp, tid: Tid, pid: Pid) -> Record {
        let mut r = marker(MarkerKind::Timestamp, ts, tid, pid);
        r.timestamp = Some(ts);
        r
    }

    pub fn cpuid(cpu: u32, tid: Tid, pid: Pid) -> Record {
        let mut r = marker(MarkerKind::Cpuid, cpu as u64, tid, pid);
        r.cpuid = Some(cpu);
        r
    }

    pub fn header(version: u32, tid: Tid, pid: Pid) -> Record {
        Record::new(RecordKind::Header { version }, tid, pid)
    }

    pub fn footer(tid: Tid, pid: Pid) -> Record {
        Record::new(RecordKind::Footer, tid, pid)
    }

    pub fn thread_exit(tid: Tid, pid: Pid) -> Record {
        Record::new(RecordKind::ThreadExit, tid, pid)
    }

    pub fn thread_id(tid: Tid, pid: Pid) -> Record {
        Record::new(RecordKind::ThreadId(tid), tid, pid)
    }

    pub fn process_id(tid: Tid, pid: Pid) -> Record {
        Record::new(RecordKind::ProcessId(pid), tid, pid)
    }
}
