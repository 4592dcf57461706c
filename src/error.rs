//! Construction-time and runtime error types.
//!
//! `SchedulerError` covers the `init()`-time failures of §7: bad
//! configuration discovered while wiring up workloads, regions of interest,
//! or a recorded-schedule file. `Status` is the per-`next_record` runtime
//! result; `Status::Error` is terminal for the output that produced it.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("region of interest out of range: {0}")]
    RangeInvalid(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

pub type InitResult<T> = Result<T, SchedulerError>;

/// Runtime per-record status returned by `OutputStream::next_record`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// A real or synthesized record was written to the caller's buffer.
    Ok,
    /// This output has nothing to do right now but other outputs may still
    /// make progress (e.g. waiting on a `DEPENDENCY_TIMESTAMPS` ordering, or
    /// every input bound to this output is currently blocked elsewhere).
    Wait,
    /// This output is idle and the caller should advance simulated time
    /// before calling again. A synthetic `CORE_IDLE` marker was written.
    Idle,
    /// This output has no more work; every input bound (or assignable) to it
    /// has reached EOF.
    Eof,
    /// Fatal for this output. `get_error_string()` on the stream returns the
    /// message.
    Error(String),
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Error(_) | Status::Eof)
    }

    pub fn error_string(&self) -> Option<&str> {
        match self {
            Status::Error(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Ok => write!(f, "OK"),
            Status::Wait => write!(f, "WAIT"),
            Status::Idle => write!(f, "IDLE"),
            Status::Eof => write!(f, "EOF"),
            Status::Error(msg) => write!(f, "ERROR: {}", msg),
        }
    }
}
