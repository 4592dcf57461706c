//! tracesched: multiplexes recorded per-thread instruction/memory traces
//! onto a configurable number of output "cores" for downstream
//! cache/TLB/microarchitectural simulation.
//!
//! Construct a [`scheduler::Scheduler`] from a [`config::SchedulerConfig`]
//! and a set of [`workload::WorkloadSpec`]s, wrap it in an `Arc`, and drive
//! one [`stream::OutputStream`] per output (typically one per worker
//! thread).

#[macro_use]
mod log;

pub mod config;
pub mod error;
pub mod ids;
pub mod injector;
pub mod input;
pub mod output;
pub mod policy;
pub mod reader;
pub mod rebalance;
pub mod record;
pub mod replay;
pub mod runqueue;
pub mod scheduler;
pub mod speculation;
pub mod stats;
pub mod stream;
pub mod workload;

pub use error::{InitResult, SchedulerError, Status};
pub use scheduler::Scheduler;
pub use stream::OutputStream;
