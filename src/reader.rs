//! The reader contract consumed by the scheduler (§6). Decoding of on-disk
//! trace formats is out of scope for this crate; readers for raw files,
//! post-processed directories, compressed archives, and IPC pipes are all
//! external collaborators that implement this trait.

use crate::record::Record;
use std::collections::VecDeque;

pub trait Reader: Send {
    /// Called once before the first `read_next`. Returns `false` if the
    /// underlying source could not be opened.
    fn init(&mut self) -> bool;

    /// Returns the next record, `Ok(None)` at a clean end of stream, or
    /// `Err` if the underlying source failed (truncated file, decode
    /// error, ...). No automatic retry is attempted by the scheduler on
    /// `Ok(None)`; EOF is sticky. An `Err` is propagated as a fatal
    /// scheduler error on the output that next pulls from this input
    /// (§4.1, §7) -- distinct from a clean EOF.
    fn read_next(&mut self) -> Result<Option<Record>, String>;

    /// Identity string for diagnostics (file path, shared-memory name, ...).
    fn name(&self) -> &str;
}

/// A reader over an in-memory vector of records, for tests -- the Rust
/// analogue of the original's `mock_reader_t` (`tests/mock_reader.h`).
pub struct VecReader {
    name: String,
    records: VecDeque<Record>,
}

impl VecReader {
    pub fn new(name: impl Into<String>, records: Vec<Record>) -> Self {
        VecReader {
            name: name.into(),
            records: records.into(),
        }
    }
}

impl Reader for VecReader {
    fn init(&mut self) -> bool {
        true
    }

    fn read_next(&mut self) -> Result<Option<Record>, String> {
        Ok(self.records.pop_front())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A reader that yields a fixed prefix of records, then fails with a fixed
/// error on the read that would otherwise observe EOF -- for exercising the
/// reader-error path distinct from clean exhaustion (§4.1, §7).
pub struct FailingReader {
    name: String,
    records: VecDeque<Record>,
    error: Option<String>,
}

impl FailingReader {
    pub fn new(name: impl Into<String>, records: Vec<Record>, error: impl Into<String>) -> Self {
        FailingReader {
            name: name.into(),
            records: records.into(),
            error: Some(error.into()),
        }
    }
}

impl Reader for FailingReader {
    fn init(&mut self) -> bool {
        true
    }

    fn read_next(&mut self) -> Result<Option<Record>, String> {
        match self.records.pop_front() {
            Some(r) => Ok(Some(r)),
            None => Err(self.error.take().unwrap_or_else(|| "reader exhausted".into())),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
