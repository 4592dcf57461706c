//! Property tests for the ordinal/progress invariants named in §7 (U1-U6).

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use tracesched::config::{QuantumUnit, SchedulerConfig, SchedulingMode};
use tracesched::error::Status;
use tracesched::injector::Injector;
use tracesched::reader::VecReader;
use tracesched::record::{testing, MarkerKind, RecordKind, SwitchKind};
use tracesched::scheduler::Scheduler;
use tracesched::workload::WorkloadSpec;

proptest! {
    /// U1: per-output record ordinals only ever move forward, and every
    /// `Ok` delivery advances them by exactly one record.
    #[test]
    fn record_ordinal_is_monotone_and_matches_ok_count(n in 1usize..50) {
        let records: Vec<_> = (0..n as u64).map(|pc| testing::instr(pc, 1, 100)).collect();
        let workloads = vec![WorkloadSpec::new(0, 1, 100, Box::new(VecReader::new("a", records)))];
        let scheduler = Arc::new(
            Scheduler::new(SchedulerConfig::default(), workloads, Injector::empty(), None, false).unwrap(),
        );
        let streams = scheduler.streams();
        let out = &streams[0];

        let mut prev = 0;
        let mut ok_count = 0u64;
        loop {
            let (status, _) = out.next_record(None);
            let ordinal = out.get_record_ordinal();
            prop_assert!(ordinal >= prev);
            prev = ordinal;
            match status {
                Status::Ok => ok_count += 1,
                Status::Eof => break,
                Status::Error(msg) => prop_assert!(false, "scheduler error: {}", msg),
                Status::Wait | Status::Idle => {}
            }
        }
        prop_assert_eq!(ok_count, n as u64);
    }

    /// U2: instruction ordinal tracks only instruction records, never
    /// markers, and lands on exactly the instruction count once EOF.
    #[test]
    fn instruction_ordinal_counts_only_instructions(n_instr in 1usize..30, n_markers in 0usize..10) {
        let mut records = Vec::new();
        for i in 0..n_markers {
            records.push(testing::timestamp(i as u64, 1, 100));
        }
        for pc in 0..n_instr as u64 {
            records.push(testing::instr(pc, 1, 100));
        }
        let workloads = vec![WorkloadSpec::new(0, 1, 100, Box::new(VecReader::new("a", records)))];
        let scheduler = Arc::new(
            Scheduler::new(SchedulerConfig::default(), workloads, Injector::empty(), None, false).unwrap(),
        );
        let streams = scheduler.streams();
        let out = &streams[0];

        loop {
            let (status, _) = out.next_record(None);
            if status == Status::Eof {
                break;
            }
            prop_assert_ne!(status, Status::Wait);
        }
        prop_assert_eq!(out.get_instruction_ordinal(), n_instr as u64);
    }

    /// U3: at any given instant, at most one output reports itself running
    /// a particular input -- true even once the rebalancer starts moving
    /// inputs between outputs mid-run.
    #[test]
    fn at_most_one_output_runs_a_given_input(n_inputs in 2usize..6, n_instr in 1usize..10) {
        let num_outputs = 2.min(n_inputs);
        let mut config = SchedulerConfig::default();
        config.num_outputs = num_outputs;
        config.quantum = QuantumUnit::Instructions(1);

        let workloads: Vec<_> = (0..n_inputs)
            .map(|i| {
                let tid = (i + 1) as i32;
                let records: Vec<_> = (0..n_instr as u64).map(|pc| testing::instr(pc, tid, 100)).collect();
                WorkloadSpec::new(i as u32, tid, 100, Box::new(VecReader::new(format!("t{tid}"), records)))
            })
            .collect();

        let scheduler = Arc::new(
            Scheduler::new(config, workloads, Injector::empty(), None, false).unwrap(),
        );
        let streams = scheduler.streams();
        let mut done = vec![false; streams.len()];

        for _ in 0..2000 {
            if done.iter().all(|d| *d) {
                break;
            }
            for (ord, s) in streams.iter().enumerate() {
                if done[ord] {
                    continue;
                }
                let (status, _) = s.next_record(None);
                match status {
                    Status::Eof => done[ord] = true,
                    Status::Error(msg) => prop_assert!(false, "scheduler error: {}", msg),
                    Status::Ok | Status::Wait | Status::Idle => {}
                }
            }
            let mut running = HashSet::new();
            for s in &streams {
                if let Some(id) = s.get_input_id() {
                    prop_assert!(running.insert(id), "input {:?} appears to run on two outputs at once", id);
                }
            }
        }
    }

    /// U4: every delivered record advances the per-output record ordinal by
    /// exactly one, including records spliced in from an injected
    /// context-switch sequence rather than pulled from an input's reader.
    #[test]
    fn injected_context_switch_records_advance_record_ordinal_by_one(n_instr in 1usize..6) {
        let mut switch_reader = VecReader::new(
            "switch-seq",
            vec![
                testing::marker(MarkerKind::ContextSwitchStart(SwitchKind::Thread), 0, 0, 0).kernel(),
                testing::instr(9999, 0, 0).kernel(),
                testing::marker(MarkerKind::ContextSwitchEnd(SwitchKind::Thread), 0, 0, 0).kernel(),
            ],
        );
        let injector = Injector::empty().with_switch_reader(&mut switch_reader).unwrap();

        let a_records: Vec<_> = (0..n_instr as u64).map(|pc| testing::instr(pc, 1, 100)).collect();
        let b_records: Vec<_> = (0..n_instr as u64).map(|pc| testing::instr(pc + 100, 2, 100)).collect();

        let mut config = SchedulerConfig::default();
        config.num_outputs = 1;
        config.quantum = QuantumUnit::Instructions(1);

        let workloads = vec![
            WorkloadSpec::new(0, 1, 100, Box::new(VecReader::new("a", a_records))),
            WorkloadSpec::new(1, 2, 100, Box::new(VecReader::new("b", b_records))),
        ];

        let scheduler = Arc::new(Scheduler::new(config, workloads, injector, None, false).unwrap());
        let streams = scheduler.streams();
        let out = &streams[0];

        let mut prev_ordinal = 0u64;
        let mut saw_kernel_record = false;
        for _ in 0..(n_instr * 20 + 20) {
            let (status, _) = out.next_record(None);
            match status {
                Status::Eof => break,
                Status::Error(msg) => prop_assert!(false, "scheduler error: {}", msg),
                Status::Ok => {
                    let ordinal = out.get_record_ordinal();
                    prop_assert_eq!(
                        ordinal,
                        prev_ordinal + 1,
                        "every OK delivery, synthetic or not, advances the ordinal by exactly one"
                    );
                    prev_ordinal = ordinal;
                    if out.is_record_kernel() {
                        saw_kernel_record = true;
                    }
                }
                Status::Wait | Status::Idle => {}
            }
        }
        prop_assert!(saw_kernel_record, "expected at least one spliced context-switch record to be delivered");
    }

    /// U5: replaying a recorded single-input run reproduces exactly the
    /// same delivered instruction sequence.
    #[test]
    fn replay_reproduces_original_instruction_sequence(n in 1usize..40) {
        let records: Vec<_> = (0..n as u64).map(|pc| testing::instr(pc, 1, 100)).collect();
        let workload = WorkloadSpec::new(0, 1, 100, Box::new(VecReader::new("a", records.clone())));

        let config = SchedulerConfig::default();
        let scheduler = Arc::new(
            Scheduler::new(config.clone(), vec![workload], Injector::empty(), None, true).unwrap(),
        );
        let streams = scheduler.streams();
        let out = &streams[0];

        let mut original = Vec::new();
        for _ in 0..(n * 4 + 10) {
            let (status, rec) = out.next_record(None);
            match status {
                Status::Eof => break,
                Status::Error(msg) => prop_assert!(false, "scheduler error: {}", msg),
                Status::Ok => {
                    if let Some(rec) = rec {
                        if let RecordKind::Instruction { pc, .. } = rec.kind {
                            original.push(pc);
                        }
                    }
                }
                Status::Wait | Status::Idle => {}
            }
        }
        prop_assert_eq!(original.len(), n);

        let dir = tempfile::tempdir().unwrap();
        scheduler.write_recorded_schedule(dir.path()).unwrap();

        let mut replay_config = config;
        replay_config.mode = SchedulingMode::MapAsPreviously;
        let replay_workload = WorkloadSpec::new(0, 1, 100, Box::new(VecReader::new("a-replay", records)));
        let replay_scheduler = Arc::new(
            Scheduler::new(replay_config, vec![replay_workload], Injector::empty(), Some(dir.path()), false)
                .unwrap(),
        );
        let replay_streams = replay_scheduler.streams();
        let replay_out = &replay_streams[0];

        let mut replayed = Vec::new();
        for _ in 0..(n * 4 + 10) {
            let (status, rec) = replay_out.next_record(None);
            match status {
                Status::Eof => break,
                Status::Error(msg) => prop_assert!(false, "replay scheduler error: {}", msg),
                Status::Ok => {
                    if let Some(rec) = rec {
                        if let RecordKind::Instruction { pc, .. } = rec.kind {
                            replayed.push(pc);
                        }
                    }
                }
                Status::Wait | Status::Idle => {}
            }
        }
        prop_assert_eq!(replayed, original);
    }

    /// U6: stopping speculation always redelivers the exact record that was
    /// current when speculation started, regardless of how long the
    /// speculative run was.
    #[test]
    fn speculation_resume_redelivers_the_saved_record(k in 1usize..5, m in 1usize..5) {
        let config = SchedulerConfig::default();
        let records: Vec<_> = (1..=(k as u64 + 2)).map(|pc| testing::instr(pc, 1, 100)).collect();
        let workloads = vec![WorkloadSpec::new(0, 1, 100, Box::new(VecReader::new("a", records)))];
        let scheduler = Arc::new(Scheduler::new(config, workloads, Injector::empty(), None, false).unwrap());
        let streams = scheduler.streams();
        let out = &streams[0];

        let mut last_pc = 0u64;
        for _ in 0..k {
            let (status, rec) = out.next_record(None);
            prop_assert_eq!(status, Status::Ok);
            if let RecordKind::Instruction { pc, .. } = rec.unwrap().kind {
                last_pc = pc;
            }
        }

        prop_assert!(out.start_speculation(1000, true));

        let mut spec_pcs = Vec::new();
        for _ in 0..m {
            let (status, rec) = out.next_record(None);
            prop_assert_eq!(status, Status::Ok);
            let rec = rec.unwrap();
            prop_assert!(rec.synthetic);
            match rec.kind {
                RecordKind::Instruction { pc, is_nop, .. } => {
                    prop_assert!(is_nop);
                    spec_pcs.push(pc);
                }
                _ => prop_assert!(false, "expected a synthesized nop instruction while speculating"),
            }
        }
        for w in spec_pcs.windows(2) {
            prop_assert_eq!(w[1], w[0] + tracesched::record::MIN_INSTR_SIZE);
        }

        prop_assert!(out.stop_speculation());

        let (status, resumed) = out.next_record(None);
        prop_assert_eq!(status, Status::Ok);
        match resumed.unwrap().kind {
            RecordKind::Instruction { pc, .. } => prop_assert_eq!(
                pc,
                last_pc,
                "resuming should redeliver the record saved when speculation started"
            ),
            _ => prop_assert!(false, "expected the resumed record to be an instruction"),
        }
    }
}
