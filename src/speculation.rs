//! Nested speculation (§4.7): the consumer can tell an output to start
//! synthesizing NOP instructions at a program counter instead of pulling
//! from the running input, then later resume exactly where it left off.

use crate::ids::{InputHandle, InstrOrdinal, RecordOrdinal};
use crate::record::{testing, Record, MIN_INSTR_SIZE};

/// One nested speculation frame. `saved_record` is populated only when the
/// caller asked to save the last-delivered record (`save_current = true`);
/// it is re-delivered verbatim on `stop_speculation`.
pub struct SpeculationFrame {
    pub saved_input: Option<InputHandle>,
    pub saved_record_ordinal: RecordOrdinal,
    pub saved_instr_ordinal: InstrOrdinal,
    pub saved_record: Option<Record>,
    pub pc: u64,
    pub nops_emitted: u64,
}

impl SpeculationFrame {
    pub fn next_nop(&mut self, tid: crate::ids::Tid, pid: crate::ids::Pid) -> Record {
        let pc = self.pc + self.nops_emitted * MIN_INSTR_SIZE;
        self.nops_emitted += 1;
        let mut r = testing::nop_instr(pc, tid, pid);
        // `testing::nop_instr` marks itself synthetic; re-derive tid/pid in
        // case the caller wants those consistent with the running input.
        r.tid = tid;
        r.pid = pid;
        r
    }
}
