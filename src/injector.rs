//! Injection engine (§4.5): splices caller-supplied context-switch and
//! syscall-trace record sequences into an output's stream without
//! advancing the owning input's ordinals.

use crate::error::SchedulerError;
use crate::reader::Reader;
use crate::record::{MarkerKind, Record, SwitchKind, TraceRecord};
use std::collections::HashMap;

pub struct SwitchSequence {
    pub kind: SwitchKind,
    pub records: Vec<Record>,
}

pub struct SyscallSequence {
    pub num: u32,
    pub records: Vec<Record>,
}

/// Parsed, validated injection sources. Sequences are marked `kernel()` up
/// front so the scheduler only has to clone-and-deliver them.
pub struct Injector {
    switch_sequences: HashMap<SwitchKindKey, Vec<SwitchSequence>>,
    syscall_sequences: HashMap<u32, SyscallSequence>,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
enum SwitchKindKey {
    Thread,
    Process,
}

impl From<SwitchKind> for SwitchKindKey {
    fn from(k: SwitchKind) -> Self {
        match k {
            SwitchKind::Thread => SwitchKindKey::Thread,
            SwitchKind::Process => SwitchKindKey::Process,
        }
    }
}

impl Injector {
    pub fn empty() -> Self {
        Injector {
            switch_sequences: HashMap::new(),
            syscall_sequences: HashMap::new(),
        }
    }

    /// Parse `CONTEXT_SWITCH_START(kind) .. CONTEXT_SWITCH_END(kind)`
    /// sequences out of a reader's full record stream.
    pub fn with_switch_reader(mut self, reader: &mut dyn Reader) -> Result<Self, SchedulerError> {
        if !reader.init() {
            return Err(SchedulerError::InvalidParameter(format!(
                "context-switch reader '{}' failed to init",
                reader.name()
            )));
        }
        let mut current: Option<(SwitchKind, Vec<Record>)> = None;
        loop {
            let rec = match reader.read_next() {
                Ok(Some(rec)) => rec,
                Ok(None) => break,
                Err(e) => {
                    return Err(SchedulerError::InvalidParameter(format!(
                        "context-switch reader '{}' failed: {}",
                        reader.name(),
                        e
                    )))
                }
            };
            match rec.marker_kind() {
                Some(MarkerKind::ContextSwitchStart(kind)) => {
                    if current.is_some() {
                        return Err(SchedulerError::InvalidParameter(
                            "nested CONTEXT_SWITCH_START in switch sequence reader".into(),
                        ));
                    }
                    current = Some((kind, vec![rec.kernel()]));
                }
                Some(MarkerKind::ContextSwitchEnd(kind)) => {
                    let (open_kind, mut seq) = current.take().ok_or_else(|| {
                        SchedulerError::InvalidParameter(
                            "CONTEXT_SWITCH_END without matching START".into(),
                        )
                    })?;
                    if open_kind != kind {
                        return Err(SchedulerError::InvalidParameter(
                            "CONTEXT_SWITCH_END kind mismatch".into(),
                        ));
                    }
                    seq.push(rec.kernel());
                    self.switch_sequences
                        .entry(open_kind.into())
                        .or_default()
                        .push(SwitchSequence {
                            kind: open_kind,
                            records: seq,
                        });
                }
                _ => {
                    if let Some((_, seq)) = current.as_mut() {
                        seq.push(rec.kernel());
                    }
                }
            }
        }
        if current.is_some() {
            return Err(SchedulerError::InvalidParameter(
                "unterminated CONTEXT_SWITCH_START in switch sequence reader".into(),
            ));
        }
        Ok(self)
    }

    /// Parse `SYSCALL_TRACE_START(num) .. SYSCALL_TRACE_END(num)` sequences.
    /// A duplicated `TRACE_START` for the same syscall number is a fatal
    /// config error (§4.5), validated here at init time.
    pub fn with_syscall_reader(mut self, reader: &mut dyn Reader) -> Result<Self, SchedulerError> {
        if !reader.init() {
            return Err(SchedulerError::InvalidParameter(format!(
                "syscall-trace reader '{}' failed to init",
                reader.name()
            )));
        }
        let mut current: Option<(u32, Vec<Record>)> = None;
        loop {
            let rec = match reader.read_next() {
                Ok(Some(rec)) => rec,
                Ok(None) => break,
                Err(e) => {
                    return Err(SchedulerError::InvalidParameter(format!(
                        "syscall-trace reader '{}' failed: {}",
                        reader.name(),
                        e
                    )))
                }
            };
            match rec.marker_kind() {
                Some(MarkerKind::SyscallTraceStart(num)) => {
                    if current.is_some() {
                        return Err(SchedulerError::InvalidParameter(format!(
                            "nested SYSCALL_TRACE_START({}) in syscall trace reader",
                            num
                        )));
                    }
                    if self.syscall_sequences.contains_key(&num) {
                        return Err(SchedulerError::InvalidParameter(format!(
                            "duplicate SYSCALL_TRACE_START for syscall {}",
                            num
                        )));
                    }
                    current = Some((num, vec![rec.kernel()]));
                }
                Some(MarkerKind::SyscallTraceEnd(num)) => {
                    let (open_num, mut seq) = current.take().ok_or_else(|| {
                        SchedulerError::InvalidParameter(
                            "SYSCALL_TRACE_END without matching START".into(),
                        )
                    })?;
                    if open_num != num {
                        return Err(SchedulerError::InvalidParameter(
                            "SYSCALL_TRACE_END num mismatch".into(),
                        ));
                    }
                    seq.push(rec.kernel());
                    self.syscall_sequences
                        .insert(open_num, SyscallSequence { num: open_num, records: seq });
                }
                _ => {
                    if let Some((_, seq)) = current.as_mut() {
                        seq.push(rec.kernel());
                    }
                }
            }
        }
        if current.is_some() {
            return Err(SchedulerError::InvalidParameter(
                "unterminated SYSCALL_TRACE_START in syscall trace reader".into(),
            ));
        }
        Ok(self)
    }

    /// Pop one instance of the switch sequence for `kind`. Sequences are
    /// reusable (cycled to the back) since a given kind typically splices
    /// many times over a run.
    pub fn context_switch_sequence(&mut self, kind: SwitchKind) -> Option<Vec<Record>> {
        let key = SwitchKindKey::from(kind);
        let pool = self.switch_sequences.get_mut(&key)?;
        if pool.is_empty() {
            return None;
        }
        let seq = pool.remove(0);
        let records = seq.records.clone();
        pool.push(seq);
        Some(records)
    }

    pub fn syscall_trace_sequence(&self, num: u32) -> Option<Vec<Record>> {
        self.syscall_sequences.get(&num).map(|s| s.records.clone())
    }

    pub fn has_syscall_trace(&self, num: u32) -> bool {
        self.syscall_sequences.contains_key(&num)
    }
}
