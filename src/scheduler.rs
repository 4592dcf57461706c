//! The top-level orchestrator (§4.4, §5): wires `Input`/`Output` arenas,
//! the runqueue/wait set, the injection engine, record/replay, and the
//! rebalancer into the actual per-output `next_record` decision loop.
//!
//! One `Scheduler` instance is shared by every output's worker (§5): each
//! output's own `Mutex<Output>` is locked only by its own worker, and
//! `Shared` (the runqueues, wait set, and input arena) is locked briefly by
//! whichever output needs to mutate cross-output state. No code path ever
//! holds two `Output` locks at once, so lock ordering is simply "this
//! output's lock, then `Shared`'s" everywhere.

use crate::config::{SchedulerConfig, SchedulingMode};
use crate::error::{InitResult, SchedulerError, Status};
use crate::ids::{InputHandle, InputId, InstrOrdinal, OutputOrdinal, RecordOrdinal, Tid, Timestamp, WorkloadIndex};
use crate::injector::Injector;
use crate::input::{Input, State};
use crate::output::Output;
use crate::rebalance;
use crate::record::{MarkerKind, Record, RecordKind, TraceRecord};
use crate::replay::{Replayer, ScheduleRecorder};
use crate::runqueue::{RunqueueSet, WaitEntry, WaitSet};
use crate::stats::StatKind;
use crate::workload::WorkloadSpec;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Cross-output state guarded by a single mutex (§5): the input arena, the
/// per-output runqueues, the wait set, simulated clock, and output-limit
/// bookkeeping. Never locked while an `Output`'s own mutex from a *different*
/// output is held.
struct Shared {
    inputs: HashMap<InputHandle, Input>,
    tid_index: HashMap<(WorkloadIndex, Tid), InputHandle>,
    runqueues: RunqueueSet,
    wait_set: WaitSet,
    clock: Timestamp,
    last_rebalance: Timestamp,
    output_limits: HashMap<WorkloadIndex, HashSet<OutputOrdinal>>,
}

impl Shared {
    fn enqueue_ready(&mut self, config: &SchedulerConfig, handle: InputHandle, output: OutputOrdinal) {
        let (priority, ts) = match self.inputs.get_mut(&handle) {
            Some(i) => {
                i.state = State::Ready;
                (i.priority, i.last_timestamp.unwrap_or(0))
            }
            None => return,
        };
        let key = crate::policy::run_key(config, priority, ts, handle);
        self.runqueues.queues[output].push(key, handle);
    }

    fn find_in_workload(&self, workload: WorkloadIndex, tid: Tid) -> Option<InputHandle> {
        self.tid_index.get(&(workload, tid)).copied()
    }

    /// Double-wake coalescing (§9a): a no-op unless the target is currently
    /// unscheduled or blocked. Racing `SYSCALL_SCHEDULE`s against the
    /// rebalancer can't observe a half-applied wake because both routes
    /// take this same `Shared` mutex.
    fn wake_input(&mut self, config: &SchedulerConfig, handle: InputHandle, home_output: OutputOrdinal) {
        let state = match self.inputs.get(&handle) {
            Some(i) => i.state,
            None => return,
        };
        match state {
            State::RunningOn(_) => {
                if let Some(i) = self.inputs.get_mut(&handle) {
                    i.suppress_next_unschedule = true;
                }
            }
            State::Ready | State::Eof => {}
            State::Unscheduled | State::BlockedUntil(_) | State::WaitingOn(_) => {
                self.wait_set.remove(handle);
                self.enqueue_ready(config, handle, home_output);
            }
        }
    }

    /// Pull `target` out of whatever runqueue/wait-set entry holds it so a
    /// direct switch can seat it immediately. `false` if it's running
    /// elsewhere or already gone (§4.4: "allowed even if in the wait set").
    fn pull_for_direct_switch(&mut self, target: InputHandle) -> bool {
        let state = match self.inputs.get(&target) {
            Some(i) => i.state,
            None => return false,
        };
        match state {
            State::Eof | State::RunningOn(_) => false,
            State::Ready => self
                .runqueues
                .queues
                .iter_mut()
                .any(|q| q.take_first_matching(|h| h == target).is_some()),
            State::Unscheduled | State::BlockedUntil(_) | State::WaitingOn(_) => {
                self.wait_set.remove(target).is_some()
            }
        }
    }
}

enum PickResult {
    Scheduled(InputHandle),
    Wait,
    Idle,
    Eof,
}

enum DeliverOutcome {
    Delivered(Record),
    /// The running input left the output (blocked, unscheduled, or a
    /// direct-switch preemption); caller clears `out.running` and loops
    /// back into `pick_next`.
    Yielded,
    Eof,
    Error(String),
}

enum SideEffect {
    CheckTimeout,
    Schedule(Tid),
    DirectSwitch(Tid),
}

/// Multiplexes N inputs onto `config.num_outputs` outputs. Construct once
/// via [`Scheduler::new`]; drive each output independently (typically one
/// worker thread per output) through [`crate::stream::OutputStream`].
pub struct Scheduler {
    config: SchedulerConfig,
    injector: Mutex<Injector>,
    recorder: Option<Mutex<ScheduleRecorder>>,
    replayer: Option<Mutex<Replayer>>,
    outputs: Vec<Mutex<Output>>,
    shared: Mutex<Shared>,
}

fn verbosity_to_level(v: u32) -> crate::log::LogLevel {
    use crate::log::LogLevel::*;
    match v {
        0 => LogWarn,
        1 => LogInfo,
        _ => LogDebug,
    }
}

impl Scheduler {
    /// Validates and wires up a complete run (§7 for the error kinds).
    /// `replay_dir` is required iff `config.mode == MAP_AS_PREVIOUSLY`;
    /// `record_schedule` turns on schedule capture for later replay (§4.6).
    pub fn new(
        config: SchedulerConfig,
        workloads: Vec<WorkloadSpec>,
        injector: Injector,
        replay_dir: Option<&Path>,
        record_schedule: bool,
    ) -> InitResult<Scheduler> {
        if workloads.is_empty() {
            return Err(SchedulerError::InvalidParameter("workload set is empty".into()));
        }
        if config.num_outputs == 0 {
            return Err(SchedulerError::InvalidParameter(
                "num_outputs must be at least 1".into(),
            ));
        }
        if let Some(shards) = &config.only_shards {
            if shards.iter().any(|s| *s >= config.num_outputs) {
                return Err(SchedulerError::InvalidParameter(
                    "only_shards references an output ordinal out of range".into(),
                ));
            }
        }
        if let Some(threads) = &config.only_threads {
            let all: HashSet<Tid> = workloads.iter().map(|w| w.tid).collect();
            if threads.is_disjoint(&all) {
                return Err(SchedulerError::InvalidParameter(
                    "only_threads is disjoint from every workload's thread set".into(),
                ));
            }
        }
        if config.core_sharded && workloads.iter().any(|w| w.is_online) {
            return Err(SchedulerError::NotImplemented(
                "online readers combined with core-sharded output".into(),
            ));
        }
        let workloads = match &config.only_threads {
            Some(threads) => workloads.into_iter().filter(|w| threads.contains(&w.tid)).collect(),
            None => workloads,
        };

        for w in &workloads {
            let mut sorted = w.regions.clone();
            sorted.sort_by_key(|r| r.start_instr);
            for r in &sorted {
                if r.start_instr > r.end_instr {
                    return Err(SchedulerError::RangeInvalid(format!(
                        "region [{}, {}] is inverted for tid {}",
                        r.start_instr, r.end_instr, w.tid
                    )));
                }
            }
            for pair in sorted.windows(2) {
                if pair[0].end_instr >= pair[1].start_instr {
                    return Err(SchedulerError::InvalidParameter(format!(
                        "overlapping regions of interest for tid {}",
                        w.tid
                    )));
                }
            }
        }

        let num_outputs = config.num_outputs;
        let mut inputs = HashMap::new();
        let mut tid_index = HashMap::new();
        let mut runqueues = RunqueueSet::new(num_outputs);
        let mut wait_set = WaitSet::new();
        let mut rr = 0usize;

        for (i, w) in workloads.into_iter().enumerate() {
            let handle = InputHandle(i as u32);
            let id = InputId::new(w.workload_index, w.tid);
            let mut input = Input::new(id, handle, w.reader);
            if !input.init() {
                return Err(SchedulerError::InvalidParameter(format!(
                    "reader for tid {} failed to init",
                    w.tid
                )));
            }
            input.pid = w.pid;
            input.priority = w.priority;
            input.bindings = w.bindings.clone();
            input.regions = w.regions;
            input.starts_unscheduled = w.starts_unscheduled;
            input.output_limit = w.output_limit;

            tid_index.insert((w.workload_index, w.tid), handle);

            if w.starts_unscheduled {
                input.state = State::Unscheduled;
                wait_set.push(WaitEntry { handle, wake_time: None });
            } else {
                let target = if w.bindings.is_empty() {
                    rr % num_outputs
                } else {
                    w.bindings[rr % w.bindings.len()]
                };
                rr += 1;
                let key = crate::policy::run_key(&config, input.priority, 0, handle);
                runqueues.queues[target].push(key, handle);
            }

            inputs.insert(handle, input);
        }

        let replayer = match (config.mode, replay_dir) {
            (SchedulingMode::MapAsPreviously, Some(dir)) => {
                Some(Mutex::new(Replayer::read_from(dir, num_outputs)?))
            }
            (SchedulingMode::MapAsPreviously, None) => {
                return Err(SchedulerError::InvalidParameter(
                    "MAP_AS_PREVIOUSLY mode requires a recorded schedule directory".into(),
                ));
            }
            _ => None,
        };
        let recorder = if record_schedule {
            Some(Mutex::new(ScheduleRecorder::new(num_outputs)))
        } else {
            None
        };

        crate::log::set_level(verbosity_to_level(config.verbosity));
        log!(crate::log::LogDebug, "scheduler init: {} inputs, {} outputs", inputs.len(), num_outputs);

        let outputs = (0..num_outputs).map(|o| Mutex::new(Output::new(o))).collect();

        let shared = Shared {
            inputs,
            tid_index,
            runqueues,
            wait_set,
            clock: 0,
            last_rebalance: 0,
            output_limits: HashMap::new(),
        };

        Ok(Scheduler {
            config,
            injector: Mutex::new(injector),
            recorder,
            replayer,
            outputs,
            shared: Mutex::new(shared),
        })
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// One [`crate::stream::OutputStream`] handle per output, the entry
    /// point a caller actually drives (typically one per worker thread).
    pub fn streams(self: &std::sync::Arc<Self>) -> Vec<crate::stream::OutputStream> {
        (0..self.outputs.len())
            .map(|o| crate::stream::OutputStream::new(std::sync::Arc::clone(self), o))
            .collect()
    }

    /// Persist the captured schedule (only meaningful if `record_schedule`
    /// was set at construction).
    pub fn write_recorded_schedule(&self, dir: &Path) -> std::io::Result<()> {
        match &self.recorder {
            Some(rec) => {
                let mut r = rec.lock();
                r.close();
                r.write_to(dir)
            }
            None => Ok(()),
        }
    }

    fn synth_core_marker(&self, out: &mut Output, kind: MarkerKind) -> Record {
        let tid = out.prev_tid.unwrap_or(0);
        let pid = out.prev_pid.unwrap_or(0);
        let rec = Record::new(RecordKind::Marker { kind, value: 0 }, tid, pid).synthetic();
        out.bump(&rec);
        rec
    }

    fn release_output_limit(&self, shared: &mut Shared, out: &mut Output) {
        if let Some(w) = out.output_limit_workload.take() {
            if let Some(set) = shared.output_limits.get_mut(&w) {
                set.remove(&out.ordinal);
            }
        }
    }

    fn acquire_output_limit(&self, shared: &mut Shared, out: &mut Output, handle: InputHandle) {
        let (workload, cap) = match shared.inputs.get(&handle) {
            Some(i) => (i.id.workload_index(), i.output_limit),
            None => return,
        };
        if cap.is_some() {
            shared.output_limits.entry(workload).or_default().insert(out.ordinal);
            out.output_limit_workload = Some(workload);
        }
    }

    fn output_limit_allows(&self, shared: &Shared, output: OutputOrdinal, handle: InputHandle) -> bool {
        let (workload, cap) = match shared.inputs.get(&handle) {
            Some(i) => (i.id.workload_index(), i.output_limit),
            None => return true,
        };
        let cap = match cap {
            Some(c) => c,
            None => return true,
        };
        match shared.output_limits.get(&workload) {
            Some(set) => set.len() < cap || set.contains(&output),
            None => true,
        }
    }

    /// Preempt the running input at quantum expiry (§4.4): re-insert it at
    /// the back of this output's runqueue and clear `out.running`.
    fn preempt(&self, shared: &mut Shared, out: &mut Output, handle: InputHandle) {
        if let Some(rec) = &self.recorder {
            let end = shared.inputs.get(&handle).map(|i| i.instruction_ordinal()).unwrap_or(0);
            rec.lock().close_run(out.ordinal, end);
        }
        self.release_output_limit(shared, out);
        shared.enqueue_ready(&self.config, handle, out.ordinal);
        out.running = None;
        out.stats.preempts += 1;
    }

    /// Commit `handle` as the new running input on `out`: splices a
    /// context-switch sequence if the pid/tid changed (§4.5, I-5), queues
    /// synthesized thread-id/process-id headers, and notes the switch for
    /// schedule recording (§4.6).
    fn on_commit(&self, shared: &mut Shared, out: &mut Output, handle: InputHandle, now: Option<Timestamp>) -> bool {
        let now_val = now.unwrap_or(shared.clock);
        let (tid, pid, start_instr) = {
            let input = match shared.inputs.get_mut(&handle) {
                Some(i) => i,
                None => {
                    fatal!("on_commit: handle {:?} picked but missing from input arena", handle);
                    return false;
                }
            };
            input.state = State::RunningOn(out.ordinal);
            input.last_ran_time = now_val;
            (input.id.tid(), input.pid, input.instruction_ordinal())
        };

        let switch_kind = match (out.prev_pid, out.prev_tid) {
            (Some(p), _) if p != pid => Some(crate::record::SwitchKind::Process),
            (Some(_), Some(t)) if t != tid => Some(crate::record::SwitchKind::Thread),
            _ => None,
        };
        if let Some(kind) = switch_kind {
            let mut injector = self.injector.lock();
            if let Some(seq) = injector.context_switch_sequence(kind) {
                out.pending_injection.extend(seq);
            }
        }
        out.pending_injection
            .push_back(Record::new(RecordKind::ThreadId(tid), tid, pid).synthetic());
        out.pending_injection
            .push_back(Record::new(RecordKind::ProcessId(pid), tid, pid).synthetic());

        out.prev_tid = Some(tid);
        out.prev_pid = Some(pid);
        out.running = Some(handle);
        out.running_since = now_val;
        out.quantum_used = 0;

        if let Some(rec) = &self.recorder {
            rec.lock().note_switch(out.ordinal, handle, start_instr, now_val);
        }
        out.stats.reschedules += 1;
        if switch_kind.is_some() {
            out.stats.switches_input_to_input += 1;
        }
        true
    }

    /// §9a's open question on the rebalancer, applied here: sweep runnable
    /// surplus toward undersubscribed outputs once per `rebalance_period`.
    /// Driven by whichever output happens to call `pick_next` after the
    /// period elapses, rather than a dedicated timer thread (§5: one worker
    /// per output, no separate scheduler thread).
    fn maybe_rebalance(&self, shared: &mut Shared, now_val: Timestamp) {
        if self.config.mode == SchedulingMode::MapAsPreviously {
            return;
        }
        if now_val.saturating_sub(shared.last_rebalance) < self.config.rebalance_period {
            return;
        }
        let moves = rebalance::plan_rebalance(&shared.runqueues, &shared.inputs);
        for (from, handle, to) in moves {
            let (priority, ts) = match shared.inputs.get(&handle) {
                Some(i) => (i.priority, i.last_timestamp.unwrap_or(0)),
                None => continue,
            };
            if shared.runqueues.queues[from]
                .take_first_matching(|h| h == handle)
                .is_some()
            {
                let key = crate::policy::run_key(&self.config, priority, ts, handle);
                shared.runqueues.queues[to].push(key, handle);
            }
        }
        shared.last_rebalance = now_val;
    }

    /// §5 "Ordering guarantees": with `dependency_timestamps` on and more
    /// than one output, an output may not emit a record whose timestamp some
    /// other output could still beat -- so it must wait (busy-poll via
    /// `PickResult::Wait`) until every other output's next candidate is no
    /// earlier than its own.
    fn dependency_blocked(&self, shared: &Shared, output: OutputOrdinal, candidate_ts: Timestamp) -> bool {
        if !self.config.dependency_timestamps || self.config.num_outputs <= 1 {
            return false;
        }
        shared
            .runqueues
            .queues
            .iter()
            .enumerate()
            .any(|(o, q)| {
                o != output
                    && q.peek_front_entry()
                        .map(|(key, _)| key.timestamp_key() < candidate_ts)
                        .unwrap_or(false)
            })
    }

    fn replay_dependency_blocked(&self, replayer: &Replayer, output: OutputOrdinal, candidate_ts: Timestamp) -> bool {
        if !self.config.dependency_timestamps || self.config.num_outputs <= 1 {
            return false;
        }
        (0..self.config.num_outputs).any(|o| {
            o != output
                && replayer
                    .peek_entry(o)
                    .map(|e| e.timestamp < candidate_ts)
                    .unwrap_or(false)
        })
    }

    fn pick_next_replay(&self, shared: &Shared, out: &mut Output) -> PickResult {
        let replayer = match &self.replayer {
            Some(r) => r,
            None => return PickResult::Eof,
        };
        let mut replayer = replayer.lock();
        let blocked = match replayer.peek_entry(out.ordinal) {
            Some(entry) => self.replay_dependency_blocked(&replayer, out.ordinal, entry.timestamp),
            None => false,
        };
        if blocked {
            return PickResult::Wait;
        }
        match replayer.next_entry(out.ordinal) {
            Some(entry) => {
                let handle = InputHandle(entry.input);
                out.replay_end = if entry.end == crate::replay::RUN_TO_EOF {
                    None
                } else {
                    Some(entry.end)
                };
                if shared.inputs.contains_key(&handle) {
                    PickResult::Scheduled(handle)
                } else {
                    PickResult::Eof
                }
            }
            None => {
                if shared.inputs.values().all(|i| i.is_eof()) {
                    PickResult::Eof
                } else {
                    PickResult::Wait
                }
            }
        }
    }

    fn pick_next(&self, out: &mut Output, now: Option<Timestamp>) -> PickResult {
        let mut shared = self.shared.lock();
        let now_val = now.unwrap_or(shared.clock);

        let woken = shared.wait_set.drain_ready(now_val);
        for h in woken {
            shared.enqueue_ready(&self.config, h, out.ordinal);
        }

        self.maybe_rebalance(&mut shared, now_val);

        if let Some(target) = out.pending_direct_switch.take() {
            out.stats.direct_switch_attempts += 1;
            if self.config.honor_direct_switches && shared.pull_for_direct_switch(target) {
                out.stats.direct_switch_successes += 1;
                self.acquire_output_limit(&mut shared, out, target);
                return PickResult::Scheduled(target);
            }
        }

        if self.config.mode == SchedulingMode::MapAsPreviously {
            return self.pick_next_replay(&shared, out);
        }

        // §4.4/§7 `only_shards`: an output outside the restricted set never
        // receives work. Vacuously "done" once everything else is.
        if let Some(shards) = &self.config.only_shards {
            if !shards.contains(&out.ordinal) {
                return if shared.inputs.values().all(|i| i.is_eof()) {
                    PickResult::Eof
                } else {
                    PickResult::Idle
                };
            }
        }

        let mut output_limited = false;

        if let Some((key, handle)) = shared.runqueues.queues[out.ordinal].peek_front_entry() {
            if self.dependency_blocked(&shared, out.ordinal, key.timestamp_key()) {
                return PickResult::Wait;
            }
            if self.output_limit_allows(&shared, out.ordinal, handle) {
                shared.runqueues.queues[out.ordinal].pop_front();
                self.acquire_output_limit(&mut shared, out, handle);
                return PickResult::Scheduled(handle);
            }
            out.stats.output_limit_hits += 1;
            output_limited = true;
        }

        if let Some((donor, handle)) = rebalance::steal(
            &mut shared.runqueues,
            out.ordinal,
            &shared.inputs,
            now_val,
            self.config.migration_threshold,
        ) {
            if self.output_limit_allows(&shared, out.ordinal, handle) {
                out.stats.runqueue_steals += 1;
                out.stats.migrations += 1;
                self.acquire_output_limit(&mut shared, out, handle);
                return PickResult::Scheduled(handle);
            }
            // No output-limit slot right now; put it back where it came
            // from rather than drop it.
            out.stats.output_limit_hits += 1;
            output_limited = true;
            let (priority, ts) = shared
                .inputs
                .get(&handle)
                .map(|i| (i.priority, i.last_timestamp.unwrap_or(0)))
                .unwrap_or((0, 0));
            let key = crate::policy::run_key(&self.config, priority, ts, handle);
            shared.runqueues.queues[donor].push(key, handle);
        }

        // §4.4 "Output limit": blocked purely by another workload's output-
        // limit cap, not by a lack of runnable work -- yield IDLE for this
        // workload until a slot frees, rather than WAIT.
        if output_limited {
            return PickResult::Idle;
        }

        if shared.runqueues.total_runnable() == 0 {
            if !shared.wait_set.is_empty() {
                if now_val.saturating_sub(shared.last_rebalance) >= self.config.rebalance_period
                    && !self.config.honor_infinite_timeouts
                {
                    if let Some(handle) = shared.wait_set.nearest_wake() {
                        shared.wait_set.remove(handle);
                        shared.last_rebalance = now_val;
                        shared.enqueue_ready(&self.config, handle, out.ordinal);
                        self.acquire_output_limit(&mut shared, out, handle);
                        return PickResult::Scheduled(handle);
                    }
                }
                return PickResult::Wait;
            }
            if shared.inputs.values().all(|i| i.is_eof()) {
                return PickResult::Eof;
            }
            return PickResult::Idle;
        }

        PickResult::Wait
    }

    fn deliver_from_input(
        &self,
        shared: &mut Shared,
        out: &mut Output,
        handle: InputHandle,
        now: Option<Timestamp>,
    ) -> DeliverOutcome {
        let now_val = now.unwrap_or(shared.clock);

        let pending = {
            let input = match shared.inputs.get_mut(&handle) {
                Some(i) => i,
                None => return DeliverOutcome::Error("running input missing from arena".into()),
            };
            if let Some(dur) = input.pending_block.take() {
                Some((true, Some(now_val + dur)))
            } else if input.pending_unschedule {
                input.pending_unschedule = false;
                if input.suppress_next_unschedule {
                    input.suppress_next_unschedule = false;
                    input.pending_unschedule_wake = None;
                    None
                } else {
                    Some((false, input.pending_unschedule_wake.take()))
                }
            } else {
                None
            }
        };
        if let Some((is_block, wake_time)) = pending {
            if let Some(input) = shared.inputs.get_mut(&handle) {
                input.state = if is_block {
                    State::BlockedUntil(wake_time.unwrap_or(now_val))
                } else {
                    State::Unscheduled
                };
            }
            shared.wait_set.push(WaitEntry { handle, wake_time });
            if is_block {
                out.stats.blocking_syscalls += 1;
            } else {
                out.stats.unschedules += 1;
            }
            return DeliverOutcome::Yielded;
        }

        let (glue, rec) = {
            let input = match shared.inputs.get_mut(&handle) {
                Some(i) => i,
                None => {
                    fatal!("deliver_from_input: running handle {:?} missing from arena", handle);
                    return DeliverOutcome::Error("running input vanished from arena".into());
                }
            };
            match input.pop_glued() {
                Ok(v) => v,
                Err(Status::Eof) => {
                    input.state = State::Eof;
                    return DeliverOutcome::Eof;
                }
                Err(other) => return DeliverOutcome::Error(other.to_string()),
            }
        };

        if let Some(marker) = glue {
            let input = match shared.inputs.get_mut(&handle) {
                Some(i) => i,
                None => {
                    fatal!("deliver_from_input: running handle {:?} vanished before glue unpop", handle);
                    return DeliverOutcome::Error("running input vanished from arena".into());
                }
            };
            input.unpop(rec);
            input.glued_pending = true;
            out.bump_with_quantum(&marker);
            return DeliverOutcome::Delivered(marker);
        }

        let workload_index;
        let side_effect;
        {
            let input = match shared.inputs.get_mut(&handle) {
                Some(i) => i,
                None => {
                    fatal!("deliver_from_input: running handle {:?} vanished before side-effect dispatch", handle);
                    return DeliverOutcome::Error("running input vanished from arena".into());
                }
            };
            input.glued_pending = false;
            workload_index = input.id.workload_index();
            side_effect = rec.marker_kind().and_then(|mk| match mk {
                MarkerKind::Syscall(_) => {
                    input.syscall_pre_ts = input.last_timestamp;
                    None
                }
                MarkerKind::MaybeBlockingSyscall => {
                    input.awaiting_block_decision = input.syscall_pre_ts.take();
                    None
                }
                MarkerKind::Timestamp => {
                    if let Some(pre) = input.awaiting_block_decision.take() {
                        if let Some(dur) = crate::policy::blocking_duration(
                            &self.config,
                            pre,
                            rec.timestamp.unwrap_or(pre),
                        ) {
                            input.pending_block = Some(dur);
                        }
                    }
                    None
                }
                MarkerKind::SyscallUnschedule => {
                    input.pending_unschedule = true;
                    input.pending_unschedule_wake = None;
                    Some(SideEffect::CheckTimeout)
                }
                MarkerKind::SyscallSchedule(tid) => Some(SideEffect::Schedule(tid)),
                MarkerKind::DirectThreadSwitch(tid) => Some(SideEffect::DirectSwitch(tid)),
                _ => None,
            });
        }

        match side_effect {
            Some(SideEffect::CheckTimeout) => match shared.inputs.get_mut(&handle) {
                Some(input) => {
                    if let Some(MarkerKind::SyscallArgTimeout(v)) =
                        input.peek(1).first().and_then(|r| r.marker_kind())
                    {
                        input.pending_unschedule_wake = Some(now_val + v);
                    }
                }
                None => fatal!("deliver_from_input: running handle {:?} vanished before timeout check", handle),
            },
            Some(SideEffect::Schedule(tid)) => {
                if let Some(target) = shared.find_in_workload(workload_index, tid) {
                    shared.wake_input(&self.config, target, out.ordinal);
                }
            }
            Some(SideEffect::DirectSwitch(tid)) => {
                if let Some(target) = shared.find_in_workload(workload_index, tid) {
                    out.pending_direct_switch = Some(target);
                }
            }
            None => {}
        }

        if let Some(MarkerKind::Syscall(num)) = rec.marker_kind() {
            out.pending_syscall_num = Some(num);
        }
        if let Some(num) = out.pending_syscall_num.take() {
            let injector = self.injector.lock();
            if let Some(seq) = injector.syscall_trace_sequence(num) {
                out.filetype |= crate::record::FileType::KERNEL_SYSCALLS;
                out.pending_injection.extend(seq);
            } else if injector.has_syscall_trace(num) {
                out.pending_syscall_num = Some(num);
            }
        }

        out.bump_with_quantum(&rec);
        DeliverOutcome::Delivered(rec)
    }

    /// The core per-output decision loop (§4.2, §4.4). May iterate several
    /// times internally (preempt then re-pick, commit then deliver headers)
    /// before returning the one record the caller asked for.
    pub(crate) fn next_record(&self, output_ord: OutputOrdinal, now: Option<Timestamp>) -> (Status, Option<Record>) {
        let mut out = self.outputs[output_ord].lock();

        loop {
            if !out.active {
                return (Status::Idle, Some(self.synth_core_marker(&mut out, MarkerKind::CoreIdle)));
            }

            if out.unread_pending {
                out.unread_pending = false;
                let rec = out.last_delivered.clone();
                return (Status::Ok, rec);
            }

            if out.is_speculating() {
                let tid = out.prev_tid.unwrap_or(0);
                let pid = out.prev_pid.unwrap_or(0);
                let rec = match out.spec_stack.last_mut() {
                    Some(frame) => frame.next_nop(tid, pid),
                    None => {
                        fatal!("next_record: is_speculating() true but spec_stack empty");
                        return (Status::Error("speculation stack corrupted".into()), None);
                    }
                };
                out.bump(&rec);
                return (Status::Ok, Some(rec));
            }

            if let Some(rec) = out.pending_injection.pop_front() {
                out.bump(&rec);
                return (Status::Ok, Some(rec));
            }

            if let Some(handle) = out.running {
                let mut shared = self.shared.lock();
                let expired = match shared.inputs.get(&handle) {
                    Some(input) if input.glued_pending => false,
                    Some(input) if self.config.mode == SchedulingMode::MapAsPreviously => match out.replay_end {
                        Some(end) => input.instruction_ordinal() >= end,
                        None => false,
                    },
                    Some(_) => {
                        let elapsed = now.unwrap_or(shared.clock).saturating_sub(out.running_since);
                        crate::policy::quantum_expired(self.config.quantum, out.quantum_used, elapsed)
                    }
                    None => {
                        return (Status::Error("running input vanished from arena".into()), None);
                    }
                };
                if expired {
                    self.preempt(&mut shared, &mut out, handle);
                    out.stats.quantums_expired += 1;
                    continue;
                }
            }

            if out.running.is_none() {
                match self.pick_next(&mut out, now) {
                    PickResult::Scheduled(handle) => {
                        let mut shared = self.shared.lock();
                        if !self.on_commit(&mut shared, &mut out, handle, now) {
                            return (Status::Error("running input vanished from arena during commit".into()), None);
                        }
                        continue;
                    }
                    PickResult::Wait => {
                        out.stats.wait_records += 1;
                        return (Status::Wait, Some(self.synth_core_marker(&mut out, MarkerKind::CoreWait)));
                    }
                    PickResult::Idle => {
                        out.stats.idle_records += 1;
                        return (Status::Idle, Some(self.synth_core_marker(&mut out, MarkerKind::CoreIdle)));
                    }
                    PickResult::Eof => return (Status::Eof, None),
                }
            }

            let handle = match out.running {
                Some(h) => h,
                None => {
                    fatal!("next_record: running is None right after pick_next dispatch");
                    return (Status::Error("scheduler state corrupted: no running input".into()), None);
                }
            };
            let mut shared = self.shared.lock();
            match self.deliver_from_input(&mut shared, &mut out, handle, now) {
                DeliverOutcome::Delivered(rec) => return (Status::Ok, Some(rec)),
                DeliverOutcome::Yielded => {
                    self.release_output_limit(&mut shared, &mut out);
                    out.running = None;
                    continue;
                }
                DeliverOutcome::Eof => {
                    self.release_output_limit(&mut shared, &mut out);
                    out.running = None;
                    continue;
                }
                DeliverOutcome::Error(msg) => return (Status::Error(msg), None),
            }
        }
    }

    pub(crate) fn start_speculation(&self, output: OutputOrdinal, pc: u64, save_current: bool) -> bool {
        let mut out = self.outputs[output].lock();
        if out.unread_pending {
            return false;
        }
        let saved_record = if save_current { out.last_delivered.clone() } else { None };
        let (saved_input, saved_record_ordinal, saved_instr_ordinal) = match out.running {
            Some(h) => {
                let shared = self.shared.lock();
                match shared.inputs.get(&h) {
                    Some(input) => (Some(h), input.record_ordinal(), input.instruction_ordinal()),
                    None => (None, 0, 0),
                }
            }
            None => (None, 0, 0),
        };
        out.spec_stack.push(crate::speculation::SpeculationFrame {
            saved_input,
            saved_record_ordinal,
            saved_instr_ordinal,
            saved_record,
            pc,
            nops_emitted: 0,
        });
        true
    }

    pub(crate) fn stop_speculation(&self, output: OutputOrdinal) -> bool {
        let mut out = self.outputs[output].lock();
        let frame = match out.spec_stack.pop() {
            Some(f) => f,
            None => return false,
        };
        if let Some(rec) = frame.saved_record {
            out.last_delivered = Some(rec);
            out.unread_pending = true;
        }
        true
    }

    pub(crate) fn unread_last_record(&self, output: OutputOrdinal) -> bool {
        let mut out = self.outputs[output].lock();
        if out.unread_pending || out.is_speculating() || out.last_was_spec_synthetic || out.last_delivered.is_none() {
            return false;
        }
        out.unread_pending = true;
        true
    }

    pub(crate) fn set_active(&self, output: OutputOrdinal, active: bool) {
        let mut out = self.outputs[output].lock();
        out.active = active;
        if !active {
            if let Some(handle) = out.running.take() {
                let mut shared = self.shared.lock();
                self.release_output_limit(&mut shared, &mut out);
                shared.enqueue_ready(&self.config, handle, out.ordinal);
            }
        }
    }

    pub(crate) fn get_schedule_statistic(&self, output: OutputOrdinal, kind: StatKind) -> u64 {
        self.outputs[output].lock().stats.get(kind)
    }

    pub(crate) fn get_record_ordinal(&self, output: OutputOrdinal) -> RecordOrdinal {
        self.outputs[output].lock().record_ordinal
    }

    pub(crate) fn get_instruction_ordinal(&self, output: OutputOrdinal) -> InstrOrdinal {
        self.outputs[output].lock().instr_ordinal
    }

    pub(crate) fn get_last_timestamp(&self, output: OutputOrdinal) -> Option<Timestamp> {
        self.outputs[output].lock().last_timestamp
    }

    pub(crate) fn get_output_cpuid(&self, output: OutputOrdinal) -> Option<u32> {
        self.outputs[output].lock().cpuid
    }

    /// The output's `filetype` as exposed to the consumer (§4.5): OR-ed
    /// with `KERNEL_SYSCALLS` the first time a syscall-trace sequence is
    /// spliced into it.
    pub(crate) fn get_filetype(&self, output: OutputOrdinal) -> crate::record::FileType {
        self.outputs[output].lock().filetype
    }

    pub(crate) fn get_tid(&self, output: OutputOrdinal) -> Tid {
        self.outputs[output].lock().prev_tid.unwrap_or(0)
    }

    pub(crate) fn get_workload_id(&self, output: OutputOrdinal) -> WorkloadIndex {
        let running = self.outputs[output].lock().running;
        match running {
            Some(h) => self
                .shared
                .lock()
                .inputs
                .get(&h)
                .map(|i| i.id.workload_index())
                .unwrap_or(0),
            None => 0,
        }
    }

    pub(crate) fn get_input_id(&self, output: OutputOrdinal) -> Option<InputId> {
        let running = self.outputs[output].lock().running?;
        self.shared.lock().inputs.get(&running).map(|i| i.id)
    }

    pub(crate) fn is_record_synthetic(&self, output: OutputOrdinal) -> bool {
        self.outputs[output]
            .lock()
            .last_delivered
            .as_ref()
            .map(|r| r.synthetic)
            .unwrap_or(false)
    }

    pub(crate) fn is_record_kernel(&self, output: OutputOrdinal) -> bool {
        self.outputs[output]
            .lock()
            .last_delivered
            .as_ref()
            .map(|r| r.kernel)
            .unwrap_or(false)
    }
}

