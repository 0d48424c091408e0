use std::alloc::System;
use std::hint::black_box;
use std::net::Ipv4Addr;

use probestat::config::Config;
use probestat::engine::Engine;
use probestat::probe::event::{
    BlockRq, EventKind, FutexEnter, FutexExit, Header, NetPort, Payload, ProbeEvent, SchedSwitch,
    SchedWakeup, SockRef, SysEnter, SysExit, TcpCleanupRbuf, TcpSend,
};
use probestat::probe::parse::{encode_event, parse_event};
use serial_test::serial;
use stats_alloc::{Region, StatsAlloc, INSTRUMENTED_SYSTEM};

#[global_allocator]
static GLOBAL: &StatsAlloc<System> = &INSTRUMENTED_SYSTEM;

fn event(ts: u64, pid: u32, kind: EventKind, payload: Payload) -> ProbeEvent {
    ProbeEvent {
        header: Header {
            timestamp_ns: ts,
            pid,
            tid: pid,
            kind,
        },
        payload,
    }
}

fn peer() -> SockRef {
    SockRef {
        daddr: Ipv4Addr::new(10, 0, 0, 7),
        dport: NetPort::from_host(8545),
    }
}

/// One round of begin/end pairs and counters for `pid`, starting at `ts`.
fn round(ts: u64, pid: u32) -> [ProbeEvent; 10] {
    let rq = BlockRq {
        dev: 8 << 20,
        sector: u64::from(pid) * 8,
    };
    [
        event(
            ts,
            0,
            EventKind::SchedWakeup,
            Payload::SchedWakeup(SchedWakeup { target_pid: pid }),
        ),
        event(
            ts + 1_000,
            0,
            EventKind::SchedSwitch,
            Payload::SchedSwitch(SchedSwitch {
                prev_pid: 0,
                prev_state: 0,
                next_pid: pid,
            }),
        ),
        event(
            ts + 2_000,
            pid,
            EventKind::SysEnter,
            Payload::SysEnter(SysEnter { id: 202 }),
        ),
        event(
            ts + 3_000,
            pid,
            EventKind::SysExit,
            Payload::SysExit(SysExit { id: 202, ret: 0 }),
        ),
        event(
            ts + 4_000,
            pid,
            EventKind::FutexEnter,
            Payload::FutexEnter(FutexEnter { op: 0 }),
        ),
        event(
            ts + 9_000,
            pid,
            EventKind::FutexExit,
            Payload::FutexExit(FutexExit),
        ),
        event(
            ts + 10_000,
            pid,
            EventKind::BlockRqIssue,
            Payload::BlockRqIssue(rq),
        ),
        event(
            ts + 90_000,
            0,
            EventKind::BlockRqComplete,
            Payload::BlockRqComplete(rq),
        ),
        event(
            ts + 91_000,
            pid,
            EventKind::TcpSend,
            Payload::TcpSend(TcpSend {
                sock: peer(),
                size: 1_500,
            }),
        ),
        event(
            ts + 92_000,
            pid,
            EventKind::TcpCleanupRbuf,
            Payload::TcpCleanupRbuf(TcpCleanupRbuf {
                sock: peer(),
                copied: 512,
            }),
        ),
    ]
}

fn measure_alloc_counts<T>(f: impl FnOnce() -> T) -> (T, usize, usize) {
    // Calibrate for ambient allocator activity in the test harness process.
    let idle_region = Region::new(&GLOBAL);
    black_box(());
    let idle = idle_region.change();

    let region = Region::new(&GLOBAL);
    let output = f();
    let used = region.change();

    let allocations = used.allocations.saturating_sub(idle.allocations);
    let deallocations = used.deallocations.saturating_sub(idle.deallocations);
    (output, allocations, deallocations)
}

#[test]
#[serial]
fn dispatch_allocates_zero_after_warmup() {
    let engine = Engine::new(&Config::default());
    let pids = 1_000..1_064u32;

    // Warmup publishes every key once.
    let warmup: Vec<[ProbeEvent; 10]> = pids.clone().map(|pid| round(0, pid)).collect();
    for events in &warmup {
        for e in events {
            engine.dispatch(e);
        }
    }

    let steady: Vec<[ProbeEvent; 10]> = pids.map(|pid| round(1_000_000, pid)).collect();

    let (_, allocations, deallocations) = measure_alloc_counts(|| {
        for events in &steady {
            for e in events {
                engine.dispatch(black_box(e));
            }
        }
    });

    assert_eq!(allocations, 0, "dispatch allocated {allocations} times");
    assert_eq!(deallocations, 0, "dispatch freed {deallocations} times");

    let runqlat = engine.runqlat().unwrap().table();
    assert_eq!(runqlat.len(), 64);
}

#[test]
#[serial]
fn dispatch_allocates_zero_for_new_keys() {
    let engine = Engine::new(&Config::default());
    let events: Vec<[ProbeEvent; 10]> = (5_000..5_032u32).map(|pid| round(0, pid)).collect();

    let (_, allocations, _) = measure_alloc_counts(|| {
        for batch in &events {
            for e in batch {
                engine.dispatch(black_box(e));
            }
        }
    });

    assert_eq!(allocations, 0, "first-seen keys allocated {allocations} times");
}

#[test]
#[serial]
fn parse_event_allocates_zero() {
    let mut data = Vec::new();
    encode_event(&round(0, 42)[8], &mut data);

    let (_, allocations, deallocations) = measure_alloc_counts(|| {
        for _ in 0..512 {
            black_box(parse_event(black_box(&data)).expect("parse tcp_send"));
        }
    });

    assert_eq!(allocations, 0, "parse allocated {allocations} times");
    assert_eq!(deallocations, 0, "parse freed {deallocations} times");
}
