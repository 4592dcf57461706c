//! Record/replay of a schedule (§4.6, §6 recorded-schedule file format).
//!
//! Recording captures, per output, the sequence of `(input, start_instr,
//! end_instr, timestamp)` tuples actually delivered; replay enforces that
//! same sequence deterministically (I-6). The on-disk format is a logical
//! archive: one component per output, named by its decimal ordinal, holding
//! packed fixed-size entries.

use crate::ids::{InputHandle, InstrOrdinal, OutputOrdinal, Timestamp};
use crate::error::SchedulerError;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::Path;

pub const RUN_TO_EOF: u64 = u64::MAX;

#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ScheduleOp {
    Version = 0,
    Default = 1,
    Footer = 2,
}

impl ScheduleOp {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(ScheduleOp::Version),
            1 => Some(ScheduleOp::Default),
            2 => Some(ScheduleOp::Footer),
            _ => None,
        }
    }
}

/// One packed entry: `<op:u8, input:u32, start:u64, end:u64, timestamp:u64>`.
#[derive(Copy, Clone, Debug)]
pub struct ScheduleEntry {
    pub op: ScheduleOp,
    pub input: u32,
    pub start: u64,
    pub end: u64,
    pub timestamp: u64,
}

pub const ENTRY_SIZE: usize = 1 + 4 + 8 + 8 + 8;
static_assertions::const_assert_eq!(ENTRY_SIZE, 29);

impl ScheduleEntry {
    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0] = self.op as u8;
        buf[1..5].copy_from_slice(&self.input.to_le_bytes());
        buf[5..13].copy_from_slice(&self.start.to_le_bytes());
        buf[13..21].copy_from_slice(&self.end.to_le_bytes());
        buf[21..29].copy_from_slice(&self.timestamp.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; ENTRY_SIZE]) -> Result<Self, SchedulerError> {
        let op = ScheduleOp::from_u8(buf[0])
            .ok_or_else(|| SchedulerError::InvalidParameter("malformed schedule op byte".into()))?;
        Ok(ScheduleEntry {
            op,
            input: u32::from_le_bytes(buf[1..5].try_into().unwrap()),
            start: u64::from_le_bytes(buf[5..13].try_into().unwrap()),
            end: u64::from_le_bytes(buf[13..21].try_into().unwrap()),
            timestamp: u64::from_le_bytes(buf[21..29].try_into().unwrap()),
        })
    }
}

/// Accumulates the schedule as it is delivered; call [`ScheduleRecorder::note`]
/// every time an output's running input changes (including the very first
/// assignment), and [`ScheduleRecorder::close`] once at the end of the run.
#[derive(Default)]
pub struct ScheduleRecorder {
    per_output: BTreeMap<OutputOrdinal, Vec<ScheduleEntry>>,
}

impl ScheduleRecorder {
    pub fn new(num_outputs: usize) -> Self {
        let mut per_output = BTreeMap::new();
        for o in 0..num_outputs {
            per_output.insert(o, vec![ScheduleEntry {
                op: ScheduleOp::Version,
                input: 0,
                start: 1,
                end: 0,
                timestamp: 0,
            }]);
        }
        ScheduleRecorder { per_output }
    }

    /// Record that `input` started running on `output` at `start_instr`
    /// with the given timestamp. The previous entry (if any) is closed off
    /// at `start_instr` implicitly by this entry's own `start`.
    pub fn note_switch(
        &mut self,
        output: OutputOrdinal,
        input: InputHandle,
        start_instr: InstrOrdinal,
        timestamp: Timestamp,
    ) {
        let entries = self.per_output.entry(output).or_default();
        entries.push(ScheduleEntry {
            op: ScheduleOp::Default,
            input: input.0,
            start: start_instr,
            end: RUN_TO_EOF,
            timestamp,
        });
    }

    /// Fix up the `end` of the most recent entry on `output` once the input
    /// actually yields/preempts/EOFs at `end_instr`.
    pub fn close_run(&mut self, output: OutputOrdinal, end_instr: InstrOrdinal) {
        if let Some(entries) = self.per_output.get_mut(&output) {
            if let Some(last) = entries.last_mut() {
                if last.op == ScheduleOp::Default {
                    last.end = end_instr;
                }
            }
        }
    }

    pub fn close(&mut self) {
        for entries in self.per_output.values_mut() {
            entries.push(ScheduleEntry {
                op: ScheduleOp::Footer,
                input: 0,
                start: 0,
                end: 0,
                timestamp: 0,
            });
        }
    }

    pub fn write_to(&self, dir: &Path) -> io::Result<()> {
        std::fs::create_dir_all(dir)?;
        for (ordinal, entries) in &self.per_output {
            let path = dir.join(ordinal.to_string());
            let mut f = std::fs::File::create(path)?;
            for e in entries {
                f.write_all(&e.to_bytes())?;
            }
        }
        Ok(())
    }

    pub fn into_archive(self) -> BTreeMap<OutputOrdinal, Vec<ScheduleEntry>> {
        self.per_output
    }
}

/// Replays a previously recorded schedule, tolerating the legacy quirks
/// called out in §4.6.
pub struct Replayer {
    per_output: BTreeMap<OutputOrdinal, Vec<ScheduleEntry>>,
    cursor: BTreeMap<OutputOrdinal, usize>,
}

impl Replayer {
    pub fn from_archive(mut per_output: BTreeMap<OutputOrdinal, Vec<ScheduleEntry>>) -> Self {
        for entries in per_output.values_mut() {
            dedup_duplicate_zero_starts(entries);
            fixup_chunk_wraparound(entries);
        }
        let cursor = per_output.keys().map(|k| (*k, 0usize)).collect();
        Replayer { per_output, cursor }
    }

    pub fn read_from(dir: &Path, num_outputs: usize) -> Result<Self, SchedulerError> {
        let mut per_output = BTreeMap::new();
        for o in 0..num_outputs {
            let path = dir.join(o.to_string());
            let mut f = std::fs::File::open(&path).map_err(|e| {
                SchedulerError::InvalidParameter(format!(
                    "cannot open recorded schedule component {}: {}",
                    path.display(),
                    e
                ))
            })?;
            let mut bytes = Vec::new();
            f.read_to_end(&mut bytes)
                .map_err(|e| SchedulerError::InvalidParameter(e.to_string()))?;
            if bytes.len() % ENTRY_SIZE != 0 {
                return Err(SchedulerError::InvalidParameter(format!(
                    "malformed recorded schedule component {}: size not a multiple of {}",
                    path.display(),
                    ENTRY_SIZE
                )));
            }
            let mut entries = Vec::with_capacity(bytes.len() / ENTRY_SIZE);
            for chunk in bytes.chunks_exact(ENTRY_SIZE) {
                let arr: [u8; ENTRY_SIZE] = chunk.try_into().unwrap();
                entries.push(ScheduleEntry::from_bytes(&arr)?);
            }
            per_output.insert(o, entries);
        }
        Ok(Self::from_archive(per_output))
    }

    /// Next `Default`-op entry for `output`, in recorded order, skipping
    /// the leading `VERSION` and trailing `FOOTER` markers.
    pub fn next_entry(&mut self, output: OutputOrdinal) -> Option<ScheduleEntry> {
        loop {
            let entries = self.per_output.get(&output)?;
            let idx = self.cursor.get(&output).copied().unwrap_or(0);
            let entry = *entries.get(idx)?;
            *self.cursor.get_mut(&output).unwrap() = idx + 1;
            match entry.op {
                ScheduleOp::Version | ScheduleOp::Footer => continue,
                ScheduleOp::Default => return Some(entry),
            }
        }
    }

    pub fn peek_entry(&self, output: OutputOrdinal) -> Option<ScheduleEntry> {
        let entries = self.per_output.get(&output)?;
        let mut idx = self.cursor.get(&output).copied().unwrap_or(0);
        loop {
            let entry = *entries.get(idx)?;
            match entry.op {
                ScheduleOp::Version | ScheduleOp::Footer => idx += 1,
                ScheduleOp::Default => return Some(entry),
            }
        }
    }

    pub fn is_done(&self, output: OutputOrdinal) -> bool {
        self.peek_entry(output).is_none()
    }
}

/// Legacy bug workaround: recorded entries whose `start` appears to have
/// wrapped modulo a 10-million-instruction chunk boundary are normalized by
/// carrying the wrap count forward from the previous entry on the same
/// output.
fn fixup_chunk_wraparound(entries: &mut [ScheduleEntry]) {
    const CHUNK: u64 = 10_000_000;
    let mut carry: u64 = 0;
    let mut prev_start: u64 = 0;
    for e in entries.iter_mut() {
        if e.op != ScheduleOp::Default {
            continue;
        }
        let adjusted = e.start + carry;
        if adjusted < prev_start && e.start < CHUNK {
            carry += CHUNK;
        }
        e.start += carry;
        if e.end != RUN_TO_EOF {
            e.end += carry;
        }
        prev_start = e.start;
    }
}

/// Legacy bug workaround: duplicate `start == 0` entries for the same
/// output are deduplicated, keeping the later one (it reflects the final
/// corrected recording pass).
fn dedup_duplicate_zero_starts(entries: &mut Vec<ScheduleEntry>) {
    let mut seen_zero = false;
    let mut keep = Vec::with_capacity(entries.len());
    for e in entries.iter().rev() {
        if e.op == ScheduleOp::Default && e.start == 0 {
            if seen_zero {
                continue;
            }
            seen_zero = true;
        }
        keep.push(*e);
    }
    keep.reverse();
    *entries = keep;
}
