//! End-to-end scheduling scenarios.

use std::collections::HashSet;
use std::sync::Arc;
use tracesched::config::{QuantumUnit, SchedulerConfig, SchedulingMode};
use tracesched::error::Status;
use tracesched::injector::Injector;
use tracesched::input::RegionOfInterest;
use tracesched::reader::{FailingReader, VecReader};
use tracesched::record::{testing, MarkerKind, Record, RecordKind};
use tracesched::scheduler::Scheduler;
use tracesched::stats::StatKind;
use tracesched::workload::WorkloadSpec;

fn pc_of(rec: &Record) -> u64 {
    match rec.kind {
        RecordKind::Instruction { pc, .. } => pc,
        _ => panic!("not an instruction record: {:?}", rec.kind),
    }
}

#[test]
fn serial_ordering_merges_two_inputs_by_timestamp() {
    let a_records = vec![
        testing::timestamp(10, 1, 100),
        testing::instr(10, 1, 100),
        testing::timestamp(30, 1, 100),
        testing::instr(30, 1, 100),
        testing::timestamp(50, 1, 100),
        testing::instr(50, 1, 100),
    ];
    let b_records = vec![
        testing::timestamp(20, 2, 100),
        testing::instr(20, 2, 100),
        testing::timestamp(40, 2, 100),
        testing::instr(40, 2, 100),
        testing::timestamp(60, 2, 100),
        testing::instr(60, 2, 100),
    ];

    let mut config = SchedulerConfig::default();
    config.num_outputs = 1;
    config.quantum = QuantumUnit::Instructions(1);
    config.dependency_timestamps = true;

    let workloads = vec![
        WorkloadSpec::new(0, 1, 100, Box::new(VecReader::new("a", a_records))),
        WorkloadSpec::new(1, 2, 100, Box::new(VecReader::new("b", b_records))),
    ];

    let scheduler = Arc::new(Scheduler::new(config, workloads, Injector::empty(), None, false).unwrap());
    let streams = scheduler.streams();
    let out = &streams[0];

    let mut delivered = Vec::new();
    for _ in 0..64 {
        let (status, rec) = out.next_record(None);
        match status {
            Status::Eof => break,
            Status::Error(msg) => panic!("scheduler error: {msg}"),
            Status::Ok => {
                if let Some(rec) = rec {
                    if matches!(rec.kind, RecordKind::Instruction { .. }) {
                        delivered.push((rec.tid, pc_of(&rec)));
                    }
                }
            }
            Status::Wait | Status::Idle => {}
        }
    }

    assert_eq!(
        delivered,
        vec![(1, 10), (2, 20), (1, 30), (2, 40), (1, 50), (2, 60)]
    );
}

#[test]
fn blocking_syscall_defers_switch_until_post_timestamp() {
    let mut config = SchedulerConfig::default();
    config.num_outputs = 1;
    config.quantum = QuantumUnit::Instructions(1_000_000);
    config.blocking_switch_threshold = 100;
    config.block_time_multiplier = 1.0;
    config.block_time_max = 10_000;
    let gap = config.blocking_switch_threshold;

    let a_records = vec![
        testing::timestamp(120, 1, 100),
        testing::marker(MarkerKind::Syscall(1), 0, 1, 100),
        testing::marker(MarkerKind::MaybeBlockingSyscall, 0, 1, 100),
        testing::timestamp(120 + gap, 1, 100),
        testing::instr(999, 1, 100),
    ];
    let b_records = vec![testing::instr(5, 2, 100)];

    let workloads = vec![
        WorkloadSpec::new(0, 1, 100, Box::new(VecReader::new("a", a_records))),
        WorkloadSpec::new(1, 2, 100, Box::new(VecReader::new("b", b_records))),
    ];

    let scheduler = Arc::new(Scheduler::new(config, workloads, Injector::empty(), None, false).unwrap());
    let streams = scheduler.streams();
    let out = &streams[0];

    let mut seq = Vec::new();
    for _ in 0..4 {
        let (status, rec) = out.next_record(None);
        assert_eq!(status, Status::Ok);
        seq.push(rec.unwrap());
    }

    assert_eq!(seq[0].tid, 1);
    assert!(matches!(
        seq[1].kind,
        RecordKind::Marker { kind: MarkerKind::Syscall(1), .. }
    ));
    assert!(matches!(
        seq[2].kind,
        RecordKind::Marker { kind: MarkerKind::MaybeBlockingSyscall, .. }
    ));
    assert_eq!(seq[3].tid, 1);

    let (status, rec) = out.next_record(None);
    assert_eq!(status, Status::Ok);
    assert_eq!(
        rec.unwrap().tid,
        2,
        "output should switch to the other input once A blocks"
    );
}

fn direct_switch_scheduler(honor: bool) -> Arc<Scheduler> {
    let a_records = vec![
        testing::instr(1, 1, 100),
        testing::marker(MarkerKind::DirectThreadSwitch(3), 0, 1, 100),
        testing::marker(MarkerKind::SyscallUnschedule, 0, 1, 100),
    ];
    let b_records = vec![testing::instr(10, 2, 100)];
    let c_records = vec![testing::instr(20, 3, 100)];

    let mut config = SchedulerConfig::default();
    config.num_outputs = 1;
    config.honor_direct_switches = honor;

    let workloads = vec![
        WorkloadSpec::new(0, 1, 100, Box::new(VecReader::new("a", a_records))),
        WorkloadSpec::new(1, 2, 100, Box::new(VecReader::new("b", b_records))),
        WorkloadSpec::new(2, 3, 100, Box::new(VecReader::new("c", c_records))),
    ];
    Arc::new(Scheduler::new(config, workloads, Injector::empty(), None, false).unwrap())
}

#[test]
fn direct_thread_switch_jumps_the_queue_when_honored() {
    let scheduler = direct_switch_scheduler(true);
    let streams = scheduler.streams();
    let out = &streams[0];
    for _ in 0..3 {
        let (status, _) = out.next_record(None);
        assert_eq!(status, Status::Ok);
    }
    let (status, rec) = out.next_record(None);
    assert_eq!(status, Status::Ok);
    assert_eq!(rec.unwrap().tid, 3, "direct switch should hand off to C ahead of B");
}

#[test]
fn direct_thread_switch_falls_back_to_queue_order_when_disabled() {
    let scheduler = direct_switch_scheduler(false);
    let streams = scheduler.streams();
    let out = &streams[0];
    for _ in 0..3 {
        let (status, _) = out.next_record(None);
        assert_eq!(status, Status::Ok);
    }
    let (status, rec) = out.next_record(None);
    assert_eq!(status, Status::Ok);
    assert_eq!(rec.unwrap().tid, 2, "with direct switches disabled, B's queue slot wins");
}

#[test]
fn speculation_emits_nops_then_resumes_at_saved_record() {
    let config = SchedulerConfig::default();
    let records = vec![
        testing::instr(1, 1, 100),
        testing::instr(2, 1, 100),
        testing::instr(3, 1, 100),
    ];
    let workloads = vec![WorkloadSpec::new(0, 1, 100, Box::new(VecReader::new("a", records)))];

    let scheduler = Arc::new(Scheduler::new(config, workloads, Injector::empty(), None, false).unwrap());
    let streams = scheduler.streams();
    let out = &streams[0];

    let (_, rec1) = out.next_record(None);
    let (_, rec2) = out.next_record(None);
    assert_eq!(pc_of(&rec1.unwrap()), 1);
    assert_eq!(pc_of(&rec2.unwrap()), 2);

    assert!(out.start_speculation(100, true));

    let (status, spec1) = out.next_record(None);
    assert_eq!(status, Status::Ok);
    let spec1 = spec1.unwrap();
    assert!(spec1.synthetic);
    assert!(matches!(
        spec1.kind,
        RecordKind::Instruction { is_nop: true, pc: 100, .. }
    ));

    let (status, spec2) = out.next_record(None);
    assert_eq!(status, Status::Ok);
    let spec2 = spec2.unwrap();
    assert!(matches!(spec2.kind, RecordKind::Instruction { is_nop: true, .. }));
    assert_eq!(pc_of(&spec2), 101);

    assert!(out.stop_speculation());

    let (status, resumed) = out.next_record(None);
    assert_eq!(status, Status::Ok);
    assert_eq!(
        pc_of(&resumed.unwrap()),
        2,
        "stop_speculation should re-deliver the pre-speculation record"
    );
}

#[test]
fn instruction_quantum_round_robin_steals_from_an_idle_output() {
    let mut config = SchedulerConfig::default();
    config.num_outputs = 2;
    config.quantum = QuantumUnit::Instructions(1);
    config.migration_threshold = 0;

    let workloads: Vec<_> = (1i32..=7)
        .map(|tid| {
            let records = vec![testing::instr(tid as u64 * 10, tid, 100)];
            WorkloadSpec::new(
                (tid - 1) as u32,
                tid,
                100,
                Box::new(VecReader::new(format!("t{tid}"), records)),
            )
        })
        .collect();

    // Round robin at init time hands tids 1,3,5,7 to output 0 and 2,4,6 to
    // output 1 (§4.4). Output 0 is never driven here, so every one of its
    // inputs can only reach the consumer by being stolen onto output 1.
    let scheduler = Arc::new(
        Scheduler::new(config, workloads, Injector::empty(), None, false).unwrap(),
    );
    let streams = scheduler.streams();
    let out1 = &streams[1];

    let mut delivered_tids = HashSet::new();
    for _ in 0..500 {
        let (status, rec) = out1.next_record(None);
        match status {
            Status::Eof => break,
            Status::Error(msg) => panic!("scheduler error: {msg}"),
            Status::Ok => {
                if let Some(rec) = rec {
                    if matches!(rec.kind, RecordKind::Instruction { .. }) {
                        delivered_tids.insert(rec.tid);
                    }
                }
            }
            Status::Wait | Status::Idle => {}
        }
    }

    assert_eq!(
        delivered_tids,
        (1..=7).collect::<HashSet<_>>(),
        "output 1 should eventually run every input, including the 4 never scheduled onto output 0"
    );
    assert_eq!(
        out1.get_schedule_statistic(StatKind::RunqueueSteals),
        4,
        "the 4 inputs round-robined onto output 0 are never driven there, so output 1 must steal all of them"
    );
}

#[test]
fn reader_error_surfaces_as_status_error_not_eof() {
    let records = vec![testing::instr(1, 1, 100), testing::instr(2, 1, 100)];
    let workloads = vec![WorkloadSpec::new(
        0,
        1,
        100,
        Box::new(FailingReader::new("a", records, "disk read failed")),
    )];

    let scheduler = Arc::new(
        Scheduler::new(SchedulerConfig::default(), workloads, Injector::empty(), None, false).unwrap(),
    );
    let streams = scheduler.streams();
    let out = &streams[0];

    let mut saw_error = false;
    for _ in 0..16 {
        let (status, _) = out.next_record(None);
        match status {
            Status::Eof => panic!("a failing reader must never resolve as a clean EOF"),
            Status::Error(msg) => {
                assert!(msg.contains("disk read failed"));
                saw_error = true;
                break;
            }
            Status::Ok | Status::Wait | Status::Idle => {}
        }
    }
    assert!(saw_error, "expected the reader error to surface within 16 calls");
}

#[test]
fn replay_reproduces_region_of_interest_skip_round_trip() {
    let records = vec![
        testing::timestamp(5, 1, 100),
        testing::instr(1, 1, 100),
        testing::instr(2, 1, 100),
        testing::timestamp(9, 1, 100),
        testing::instr(3, 1, 100),
    ];
    let regions = vec![
        RegionOfInterest { start_instr: 1, end_instr: 1 },
        RegionOfInterest { start_instr: 3, end_instr: 3 },
    ];

    let mut workload = WorkloadSpec::new(0, 1, 100, Box::new(VecReader::new("a", records.clone())));
    workload.regions = regions.clone();

    let config = SchedulerConfig::default();
    let scheduler = Arc::new(
        Scheduler::new(config.clone(), vec![workload], Injector::empty(), None, true).unwrap(),
    );
    let streams = scheduler.streams();
    let out = &streams[0];

    let drain = |out: &tracesched::stream::OutputStream| -> Vec<u64> {
        let mut pcs = Vec::new();
        for _ in 0..32 {
            let (status, rec) = out.next_record(None);
            match status {
                Status::Eof => break,
                Status::Error(msg) => panic!("scheduler error: {msg}"),
                Status::Ok => {
                    if let Some(rec) = rec {
                        if matches!(rec.kind, RecordKind::Instruction { .. }) {
                            pcs.push(pc_of(&rec));
                        }
                    }
                }
                Status::Wait | Status::Idle => {}
            }
        }
        pcs
    };

    let original = drain(out);
    assert_eq!(original, vec![1, 3], "pc 2 falls outside both regions of interest");

    let dir = tempfile::tempdir().unwrap();
    scheduler.write_recorded_schedule(dir.path()).unwrap();

    let mut replay_workload =
        WorkloadSpec::new(0, 1, 100, Box::new(VecReader::new("a-replay", records)));
    replay_workload.regions = regions;

    let mut replay_config = config;
    replay_config.mode = SchedulingMode::MapAsPreviously;

    let replay_scheduler = Arc::new(
        Scheduler::new(
            replay_config,
            vec![replay_workload],
            Injector::empty(),
            Some(dir.path()),
            false,
        )
        .unwrap(),
    );
    let replay_streams = replay_scheduler.streams();
    let replayed = drain(&replay_streams[0]);

    assert_eq!(replayed, original, "replay must reproduce the same region-filtered sequence");
}
