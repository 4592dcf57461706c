//! Per-thread cursor over a reader (§4.1): lookahead, ordinals, state, and
//! the region-of-interest skip logic that synthesizes replacement
//! timestamp/cpuid/`WINDOW_ID` markers when crossing between windows.

use crate::error::Status;
use crate::ids::{InputHandle, InputId, InstrOrdinal, OutputOrdinal, Pid, RecordOrdinal, Timestamp};
use crate::reader::Reader;
use crate::record::{MarkerKind, Record, RecordKind, TraceRecord};
use std::collections::VecDeque;

/// §3: an input is in exactly one of these states (invariant I-1); the
/// runqueue/wait-set membership implied by `Ready`/`BlockedUntil`/
/// `Unscheduled`/`WaitingOn` is tracked separately by `Shared`, this is just
/// the input's own view of itself.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum State {
    Ready,
    RunningOn(OutputOrdinal),
    BlockedUntil(Timestamp),
    Unscheduled,
    WaitingOn(crate::ids::Tid),
    Eof,
}

/// A `[start_instr, end_instr]` window of interest, inclusive, 1-based on
/// the input's raw (pre-filter) instruction ordinal.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct RegionOfInterest {
    pub start_instr: u64,
    pub end_instr: u64,
}

enum RegionAction {
    Deliver(Record),
    /// `first` is returned from this `pop`; the rest queue up in `pending`
    /// for subsequent calls, in order.
    DeliverWithPending(Record, Vec<Record>),
    Skip,
}

pub struct Input {
    pub id: InputId,
    pub handle: InputHandle,
    reader: Box<dyn Reader>,
    reader_eof: bool,
    /// Set when the reader itself failed rather than cleanly exhausting
    /// (§4.1, §7); consumed by the next `next_raw` call and surfaced as
    /// `Status::Error`, distinct from `Status::Eof`.
    reader_error: Option<String>,

    /// One-record lookahead queue (raw, pre-region-filter), per §4.1.
    lookahead: VecDeque<Record>,

    /// Already-filtered/synthesized records queued for delivery before the
    /// raw stream is consulted again (region-of-interest boundary crossing,
    /// `BRANCH_TARGET` gluing).
    pending: VecDeque<Record>,

    record_ordinal: RecordOrdinal,
    instr_ordinal: InstrOrdinal,
    raw_instr_count: u64,
    current_region_idx: Option<usize>,
    saved_timestamp: Option<Timestamp>,
    saved_cpuid: Option<u32>,

    pub last_timestamp: Option<Timestamp>,
    pub pid: Pid,
    pub priority: i32,
    pub bindings: Vec<OutputOrdinal>,
    pub regions: Vec<RegionOfInterest>,
    pub starts_unscheduled: bool,
    pub output_limit: Option<usize>,
    pub state: State,
    pub last_ran_time: Timestamp,
    /// Set when a `SYSCALL_SCHEDULE` woke this input while it was still
    /// running elsewhere, suppressing its *next* `SYSCALL_UNSCHEDULE`
    /// (§4.4). Resolves the double-wake open question (§9a) together with
    /// `Shared::wake_input`'s state check.
    pub suppress_next_unschedule: bool,

    /// True from the moment `pop_glued` returns a `BRANCH_TARGET` marker
    /// until its paired instruction is actually delivered; a preemption or
    /// context switch may not land in between (§9a).
    pub glued_pending: bool,
    /// Timestamp last observed at a `SYSCALL` marker, consumed by the next
    /// `MAYBE_BLOCKING_SYSCALL`.
    pub syscall_pre_ts: Option<Timestamp>,
    /// Set by `MAYBE_BLOCKING_SYSCALL`; resolved into `pending_block` by the
    /// post-syscall `TIMESTAMP` marker.
    pub awaiting_block_decision: Option<Timestamp>,
    /// Simulated block duration decided for this input; consumed at the top
    /// of the next delivery attempt, after the deciding record itself has
    /// already been handed to the consumer.
    pub pending_block: Option<Timestamp>,
    /// Set by `SYSCALL_UNSCHEDULE`; consumed the same way as `pending_block`.
    pub pending_unschedule: bool,
    pub pending_unschedule_wake: Option<Timestamp>,
}

impl Input {
    pub fn new(id: InputId, handle: InputHandle, reader: Box<dyn Reader>) -> Self {
        Input {
            id,
            handle,
            reader,
            reader_eof: false,
            reader_error: None,
            lookahead: VecDeque::new(),
            pending: VecDeque::new(),
            record_ordinal: 0,
            instr_ordinal: 0,
            raw_instr_count: 0,
            current_region_idx: None,
            saved_timestamp: None,
            saved_cpuid: None,
            last_timestamp: None,
            pid: 0,
            priority: 0,
            bindings: Vec::new(),
            regions: Vec::new(),
            starts_unscheduled: false,
            output_limit: None,
            state: State::Ready,
            last_ran_time: 0,
            suppress_next_unschedule: false,
            glued_pending: false,
            syscall_pre_ts: None,
            awaiting_block_decision: None,
            pending_block: None,
            pending_unschedule: false,
            pending_unschedule_wake: None,
        }
    }

    /// Push a record back to the front of the delivery queue without
    /// re-advancing ordinals; used to hold a glued instruction back one call
    /// after its `BRANCH_TARGET` marker was delivered on its own (§9a).
    pub fn unpop(&mut self, rec: Record) {
        self.pending.push_front(rec);
    }

    pub fn init(&mut self) -> bool {
        self.reader.init()
    }

    pub fn record_ordinal(&self) -> RecordOrdinal {
        self.record_ordinal
    }

    pub fn instruction_ordinal(&self) -> InstrOrdinal {
        self.instr_ordinal
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.state, State::Eof)
    }

    fn fill_raw(&mut self, want: usize) {
        while self.lookahead.len() < want && !self.reader_eof {
            match self.reader.read_next() {
                Ok(Some(r)) => self.lookahead.push_back(r),
                Ok(None) => self.reader_eof = true,
                Err(e) => {
                    self.reader_error = Some(e);
                    self.reader_eof = true;
                }
            }
        }
    }

    /// Read ahead up to `n` raw records without advancing any ordinal.
    /// Used by the policy to spot markers that require action before the
    /// input actually runs (syscall gap, direct switch target, ...).
    pub fn peek(&mut self, n: usize) -> &[Record] {
        self.fill_raw(n);
        let take = n.min(self.lookahead.len());
        self.lookahead.make_contiguous();
        &self.lookahead.as_slices().0[..take]
    }

    /// True unless the very next raw record is a `BRANCH_TARGET` marker
    /// that has not yet been paired with its instruction (§9a): a
    /// preemption or context-switch must never land between the two.
    pub fn at_safe_boundary(&mut self) -> bool {
        let peeked = self.peek(1);
        !matches!(
            peeked.first().and_then(|r| r.marker_kind()),
            Some(MarkerKind::BranchTarget(_))
        )
    }

    fn next_raw(&mut self) -> Result<Record, Status> {
        if let Some(r) = self.lookahead.pop_front() {
            return Ok(r);
        }
        self.fill_raw(1);
        match self.lookahead.pop_front() {
            Some(r) => Ok(r),
            None => {
                if let Some(err) = self.reader_error.take() {
                    // Not a clean EOF: leave `self.state` untouched so
                    // `is_eof()` doesn't report this input as finished.
                    return Err(Status::Error(err));
                }
                if let Some(bad) = self
                    .regions
                    .iter()
                    .find(|r| r.end_instr > self.raw_instr_count)
                {
                    return Err(Status::Error(format!(
                        "region of interest [{}, {}] extends past tid {}'s last instruction {}",
                        bad.start_instr, bad.end_instr, self.id.tid(), self.raw_instr_count
                    )));
                }
                self.state = State::Eof;
                Err(Status::Eof)
            }
        }
    }

    fn region_for(&self, idx: u64) -> Option<usize> {
        self.regions
            .iter()
            .position(|r| idx >= r.start_instr && idx <= r.end_instr)
    }

    fn synth_window_marker(&self, window: u64) -> Record {
        Record::new(
            RecordKind::Marker {
                kind: MarkerKind::WindowId(window),
                value: window,
            },
            self.id.tid(),
            0,
        )
        .synthetic()
    }

    fn synth_timestamp(&self, ts: Timestamp) -> Record {
        let mut r = Record::new(
            RecordKind::Marker {
                kind: MarkerKind::Timestamp,
                value: ts,
            },
            self.id.tid(),
            0,
        )
        .synthetic();
        r.timestamp = Some(ts);
        r
    }

    fn synth_cpuid(&self, cpu: u32) -> Record {
        let mut r = Record::new(
            RecordKind::Marker {
                kind: MarkerKind::Cpuid,
                value: cpu as u64,
            },
            self.id.tid(),
            0,
        )
        .synthetic();
        r.cpuid = Some(cpu);
        r
    }

    fn in_active_region(&self) -> bool {
        self.regions.is_empty() || self.current_region_idx.is_some()
    }

    /// Region-of-interest filter (§4.4 "Regions of interest"): records
    /// outside every window are dropped; the timestamp/cpuid immediately
    /// preceding a skip are remembered and resynthesized ahead of the first
    /// delivered record of the next window, with a `WINDOW_ID` marker ahead
    /// of that when this is not the first window entered.
    fn filter_region(&mut self, raw: Record) -> RegionAction {
        if self.regions.is_empty() {
            return RegionAction::Deliver(raw);
        }
        match raw.kind {
            RecordKind::Marker {
                kind: MarkerKind::Timestamp,
                value,
            } => {
                self.saved_timestamp = Some(value);
                if self.in_active_region() {
                    RegionAction::Deliver(raw)
                } else {
                    RegionAction::Skip
                }
            }
            RecordKind::Marker {
                kind: MarkerKind::Cpuid,
                value,
            } => {
                self.saved_cpuid = Some(value as u32);
                if self.in_active_region() {
                    RegionAction::Deliver(raw)
                } else {
                    RegionAction::Skip
                }
            }
            RecordKind::Instruction { .. } => {
                self.raw_instr_count += 1;
                let idx = self.raw_instr_count;
                match self.region_for(idx) {
                    Some(r) => {
                        if self.current_region_idx != Some(r) {
                            let had_prev = self.current_region_idx.is_some();
                            let mut seq = Vec::new();
                            if had_prev {
                                seq.push(self.synth_window_marker(r as u64));
                            }
                            if let Some(ts) = self.saved_timestamp {
                                seq.push(self.synth_timestamp(ts));
                            }
                            if let Some(cpu) = self.saved_cpuid {
                                seq.push(self.synth_cpuid(cpu));
                            }
                            seq.push(raw);
                            self.current_region_idx = Some(r);
                            let first = seq.remove(0);
                            RegionAction::DeliverWithPending(first, seq)
                        } else {
                            RegionAction::Deliver(raw)
                        }
                    }
                    None => RegionAction::Skip,
                }
            }
            _ => {
                if self.in_active_region() {
                    RegionAction::Deliver(raw)
                } else {
                    RegionAction::Skip
                }
            }
        }
    }

    fn bump_ordinals(&mut self, rec: &Record) {
        self.record_ordinal += 1;
        if rec.is_instr() {
            self.instr_ordinal += 1;
        }
        if let Some(ts) = rec.timestamp() {
            self.last_timestamp = Some(ts);
        }
    }

    /// Dequeue the next (region-filtered) record. Invariant I-4: this is
    /// the only place the input's ordinals advance; injection and
    /// speculation never call it.
    pub fn pop(&mut self) -> Result<Record, Status> {
        if let Some(rec) = self.pending.pop_front() {
            self.bump_ordinals(&rec);
            return Ok(rec);
        }
        loop {
            let raw = self.next_raw()?;
            match self.filter_region(raw) {
                RegionAction::Deliver(rec) => {
                    self.bump_ordinals(&rec);
                    return Ok(rec);
                }
                RegionAction::DeliverWithPending(first, rest) => {
                    self.pending.extend(rest);
                    self.bump_ordinals(&first);
                    return Ok(first);
                }
                RegionAction::Skip => continue,
            }
        }
    }

    /// `pop`, but glued to a following `BRANCH_TARGET` marker if present
    /// immediately ahead (§9a): returns the marker (if any) and the
    /// instruction it is attached to as one indivisible unit. Used at
    /// quantum/context-switch boundaries so a `BRANCH_TARGET` is never
    /// split from its instruction.
    pub fn pop_glued(&mut self) -> Result<(Option<Record>, Record), Status> {
        let first = self.pop()?;
        if matches!(
            first.marker_kind(),
            Some(MarkerKind::BranchTarget(_))
        ) {
            let instr = self.pop()?;
            Ok((Some(first), instr))
        } else {
            Ok((None, first))
        }
    }

    pub fn mark_running_on(&mut self, output: OutputOrdinal) {
        self.state = State::RunningOn(output);
    }

    pub fn mark_yielded(&mut self) {
        if !matches!(self.state, State::Eof) {
            self.state = State::Ready;
        }
    }
}
