//! Pairing handlers: a begin event stores a timestamp, the matching end
//! event turns it into a duration that is accumulated unless it is stale.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::net::Ipv4Addr;

use crate::table::histogram::{percentiles, NUM_SLOTS};
use crate::table::key::{BlockRequest, PairContext, Pid, PidSyscall, SockAddr};
use crate::table::record::{
    BlockIo, Connect, ConnectLatency, Elapsed, Fault, IoLatency, LatencyStats, LatencyTotals,
    PageFaultStats,
};
use crate::table::{
    AccumTable, EndOutcome, Merge, MergeMode, PairingTable, Record, StalenessGuard, TableKey,
};

use super::event::{
    BlockRq, FaultEnter, FaultExit, FutexEnter, FutexExit, Header, ReclaimBegin, ReclaimEnd,
    SchedSwitch, SchedWakeup, SockSetState, SysEnter, SysExit, TcpConnect,
};
use super::{OnEvent, Outcome};

const TASK_INTERRUPTIBLE: u32 = 1;
const VM_FAULT_MAJOR: u64 = 0x4;
const FUTEX_CMD_MASK: i64 = 0x7f;
const FUTEX_WAIT: i64 = 0;
const FUTEX_LOCK_PI: i64 = 6;
const FUTEX_WAIT_BITSET: i64 = 9;
const TCP_ESTABLISHED: i32 = 1;
const TCP_SYN_SENT: i32 = 2;

/// Sizing of a watchdog's two tables.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogSizing {
    pub capacity: usize,
    pub pairing_capacity: usize,
    pub guard: StalenessGuard,
    pub mode: MergeMode,
}

/// A handler owning a pairing table keyed by `K` and an accumulation table
/// keyed by `A`. `T` distinguishes probes that share table shapes.
pub struct Watchdog<T, K, C, A, R> {
    pending: PairingTable<K, C>,
    table: AccumTable<A, R>,
    _probe: PhantomData<fn() -> T>,
}

impl<T, K: TableKey, C: PairContext, A: TableKey, R: Record> Watchdog<T, K, C, A, R> {
    pub fn new(name: &'static str, sizing: WatchdogSizing) -> Self {
        Self {
            pending: PairingTable::new(name, sizing.pairing_capacity, sizing.guard),
            table: AccumTable::new(name, sizing.capacity, sizing.mode),
            _probe: PhantomData,
        }
    }

    pub fn table(&self) -> &AccumTable<A, R> {
        &self.table
    }

    pub fn pending(&self) -> &PairingTable<K, C> {
        &self.pending
    }

    #[inline]
    fn begin(&self, key: K, timestamp_ns: u64, context: C) -> Outcome {
        Outcome::began(self.pending.begin(key, timestamp_ns, context))
    }

    /// End `key` and merge the sample built from the duration and context.
    #[inline]
    fn finish<S: Copy>(
        &self,
        key: K,
        timestamp_ns: u64,
        accumulate: impl FnOnce(u64, C) -> (A, S),
    ) -> Outcome
    where
        R: Merge<S>,
    {
        Outcome::settled(self.pending.end(key, timestamp_ns), |duration_ns, ctx| {
            let (akey, sample) = accumulate(duration_ns, ctx);
            self.table.upsert(akey, sample)
        })
    }
}

pub mod tags {
    //! Marker types naming each watchdog probe.
    pub enum RunqLat {}
    pub enum OffCpu {}
    pub enum PgFault {}
    pub enum LockWait {}
    pub enum DirectReclaim {}
    pub enum SyscallDissect {}
    pub enum IoLatency {}
    pub enum TcpConnLat {}
}

/// Run queue latency: wakeup to on-CPU.
pub type RunqLat = Watchdog<tags::RunqLat, Pid, (), Pid, LatencyStats>;
/// Involuntary off-CPU time: switched out (not sleeping) to switched back in.
pub type OffCpu = Watchdog<tags::OffCpu, Pid, (), Pid, LatencyTotals>;
/// Page fault handling time.
pub type PgFault = Watchdog<tags::PgFault, Pid, (), Pid, PageFaultStats>;
/// Futex wait time.
pub type LockWait = Watchdog<tags::LockWait, Pid, (), Pid, LatencyTotals>;
/// Direct reclaim stall time.
pub type DirectReclaim = Watchdog<tags::DirectReclaim, Pid, (), Pid, LatencyTotals>;
/// Per-process, per-syscall latency.
pub type SyscallDissect = Watchdog<tags::SyscallDissect, Pid, (), PidSyscall, LatencyStats>;
/// Block request latency per issuing process.
pub type IoLatencyProbe = Watchdog<tags::IoLatency, BlockRequest, Pid, Pid, IoLatency>;
/// TCP connect latency per connecting process.
pub type TcpConnLat = Watchdog<tags::TcpConnLat, SockAddr, Pid, Pid, ConnectLatency>;

impl OnEvent<SchedWakeup> for RunqLat {
    fn on_event(&self, header: &Header, event: &SchedWakeup) -> Outcome {
        if event.target_pid == 0 {
            return Outcome::Filtered;
        }
        self.begin(Pid(event.target_pid), header.timestamp_ns, ())
    }
}

impl OnEvent<SchedSwitch> for RunqLat {
    fn on_event(&self, header: &Header, event: &SchedSwitch) -> Outcome {
        if event.next_pid == 0 {
            return Outcome::Filtered;
        }
        let pid = Pid(event.next_pid);
        self.finish(pid, header.timestamp_ns, |d, ()| (pid, Elapsed(d)))
    }
}

impl OnEvent<SchedSwitch> for OffCpu {
    fn on_event(&self, header: &Header, event: &SchedSwitch) -> Outcome {
        let ts = header.timestamp_ns;

        // Voluntary sleepers are not contending for the CPU.
        let began = (event.prev_pid > 1 && event.prev_state & 0xff != TASK_INTERRUPTIBLE)
            .then(|| self.begin(Pid(event.prev_pid), ts, ()));

        let ended = if event.next_pid > 1 {
            let pid = Pid(event.next_pid);
            // The off-CPU ceiling is exclusive.
            match self.pending.end_stamped(pid, ts) {
                EndOutcome::Paired { duration_ns, .. }
                    if !self.pending.guard().admits_below(duration_ns) =>
                {
                    Outcome::Stale
                }
                end => Outcome::settled(end, |d, ()| self.table.upsert(pid, Elapsed(d))),
            }
        } else {
            Outcome::Filtered
        };

        match (began, ended) {
            (Some(began), Outcome::Filtered | Outcome::Unpaired) => began,
            (_, ended) => ended,
        }
    }
}

impl OnEvent<FaultEnter> for PgFault {
    fn on_event(&self, header: &Header, _event: &FaultEnter) -> Outcome {
        if header.pid == 0 {
            return Outcome::Filtered;
        }
        self.begin(Pid(header.pid), header.timestamp_ns, ())
    }
}

impl OnEvent<FaultExit> for PgFault {
    fn on_event(&self, header: &Header, event: &FaultExit) -> Outcome {
        if header.pid == 0 {
            return Outcome::Filtered;
        }
        let pid = Pid(header.pid);
        let major = event.ret & VM_FAULT_MAJOR != 0;
        self.finish(pid, header.timestamp_ns, |elapsed_ns, ()| {
            (pid, Fault { elapsed_ns, major })
        })
    }
}

impl OnEvent<FutexEnter> for LockWait {
    fn on_event(&self, header: &Header, event: &FutexEnter) -> Outcome {
        let waits = matches!(
            event.op & FUTEX_CMD_MASK,
            FUTEX_WAIT | FUTEX_LOCK_PI | FUTEX_WAIT_BITSET
        );
        if !waits || header.pid == 0 {
            return Outcome::Filtered;
        }
        self.begin(Pid(header.pid), header.timestamp_ns, ())
    }
}

impl OnEvent<FutexExit> for LockWait {
    fn on_event(&self, header: &Header, _event: &FutexExit) -> Outcome {
        if header.pid == 0 {
            return Outcome::Filtered;
        }
        let pid = Pid(header.pid);
        match self.pending.end(pid, header.timestamp_ns) {
            EndOutcome::Paired { duration_ns: 0, .. } => Outcome::Filtered,
            end => Outcome::settled(end, |d, ()| self.table.upsert(pid, Elapsed(d))),
        }
    }
}

impl OnEvent<ReclaimBegin> for DirectReclaim {
    fn on_event(&self, header: &Header, _event: &ReclaimBegin) -> Outcome {
        if header.pid == 0 {
            return Outcome::Filtered;
        }
        self.begin(Pid(header.pid), header.timestamp_ns, ())
    }
}

impl OnEvent<ReclaimEnd> for DirectReclaim {
    fn on_event(&self, header: &Header, _event: &ReclaimEnd) -> Outcome {
        if header.pid == 0 {
            return Outcome::Filtered;
        }
        let pid = Pid(header.pid);
        self.finish(pid, header.timestamp_ns, |d, ()| (pid, Elapsed(d)))
    }
}

impl OnEvent<SysEnter> for SyscallDissect {
    fn on_event(&self, header: &Header, _event: &SysEnter) -> Outcome {
        if header.pid == 0 {
            return Outcome::Filtered;
        }
        self.begin(Pid(header.pid), header.timestamp_ns, ())
    }
}

impl OnEvent<SysExit> for SyscallDissect {
    fn on_event(&self, header: &Header, event: &SysExit) -> Outcome {
        if header.pid == 0 {
            return Outcome::Filtered;
        }
        let key = PidSyscall {
            pid: header.pid,
            nr: event.id as u32,
        };
        self.finish(Pid(header.pid), header.timestamp_ns, |d, ()| (key, Elapsed(d)))
    }
}

/// Issue and completion both carry the request identity.
pub struct BlockRqIssue<'a>(pub &'a BlockRq);
pub struct BlockRqComplete<'a>(pub &'a BlockRq);

impl OnEvent<BlockRqIssue<'_>> for IoLatencyProbe {
    fn on_event(&self, header: &Header, event: &BlockRqIssue<'_>) -> Outcome {
        let rq = event.0;
        let key = BlockRequest {
            dev: rq.dev,
            sector: rq.sector,
        };
        self.begin(key, header.timestamp_ns, Pid(header.pid))
    }
}

impl OnEvent<BlockRqComplete<'_>> for IoLatencyProbe {
    fn on_event(&self, header: &Header, event: &BlockRqComplete<'_>) -> Outcome {
        let rq = event.0;
        let key = BlockRequest {
            dev: rq.dev,
            sector: rq.sector,
        };
        match self.pending.end(key, header.timestamp_ns) {
            EndOutcome::Paired { duration_ns: 0, .. }
            | EndOutcome::Paired {
                context: Pid(0), ..
            } => Outcome::Filtered,
            end => Outcome::settled(end, |elapsed_ns, pid| {
                self.table.upsert(
                    pid,
                    BlockIo {
                        elapsed_ns,
                        dev: rq.dev,
                    },
                )
            }),
        }
    }
}

/// Latency aggregated across every process issuing to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLatency {
    pub dev: u32,
    pub total_ns: u64,
    pub count: u64,
    pub p50_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
}

impl DeviceLatency {
    /// `major:minor` of a kernel-internal device number.
    pub fn device_name(&self) -> String {
        format!("{}:{}", self.dev >> 20, self.dev & 0xfffff)
    }
}

impl IoLatencyProbe {
    /// Fold per-process histograms into per-device percentiles, slowest p95
    /// first.
    pub fn by_device(&self) -> Vec<DeviceLatency> {
        let mut devices: HashMap<u32, (u64, u64, [u64; NUM_SLOTS])> = HashMap::new();
        for (_, rec) in self.table.snapshot() {
            if rec.count == 0 {
                continue;
            }
            let entry = devices.entry(rec.dev).or_insert((0, 0, [0; NUM_SLOTS]));
            entry.0 = entry.0.wrapping_add(rec.total_ns);
            entry.1 += u64::from(rec.count);
            for (dst, src) in entry.2.iter_mut().zip(rec.slots.iter()) {
                *dst += u64::from(*src);
            }
        }

        let mut out: Vec<DeviceLatency> = devices
            .into_iter()
            .map(|(dev, (total_ns, count, slots))| {
                let p = percentiles(&slots, count);
                DeviceLatency {
                    dev,
                    total_ns,
                    count,
                    p50_ns: p.p50_ns,
                    p95_ns: p.p95_ns,
                    p99_ns: p.p99_ns,
                }
            })
            .collect();
        out.sort_by(|a, b| b.p95_ns.cmp(&a.p95_ns).then(a.dev.cmp(&b.dev)));
        out
    }
}

impl OnEvent<TcpConnect> for TcpConnLat {
    fn on_event(&self, header: &Header, event: &TcpConnect) -> Outcome {
        if header.pid == 0 {
            return Outcome::Filtered;
        }
        self.begin(SockAddr(event.skaddr), header.timestamp_ns, Pid(header.pid))
    }
}

impl OnEvent<SockSetState> for TcpConnLat {
    fn on_event(&self, header: &Header, event: &SockSetState) -> Outcome {
        if event.old_state != TCP_SYN_SENT || event.new_state != TCP_ESTABLISHED {
            return Outcome::Filtered;
        }
        let daddr: Ipv4Addr = event.daddr;
        self.finish(SockAddr(event.skaddr), header.timestamp_ns, |elapsed_ns, pid| {
            let sample = Connect {
                elapsed_ns,
                pid: pid.0,
                daddr,
            };
            (pid, sample)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::probe::event::EventKind;

    const MS: u64 = 1_000_000;
    const SEC: u64 = 1_000_000_000;

    fn sizing(ceiling_secs: u64) -> WatchdogSizing {
        WatchdogSizing {
            capacity: 64,
            pairing_capacity: 64,
            guard: StalenessGuard::new(Duration::from_secs(ceiling_secs)),
            mode: MergeMode::Relaxed,
        }
    }

    fn at(ts: u64, pid: u32, kind: EventKind) -> Header {
        Header {
            timestamp_ns: ts,
            pid,
            tid: pid,
            kind,
        }
    }

    fn switch(prev: u32, prev_state: u32, next: u32) -> SchedSwitch {
        SchedSwitch {
            prev_pid: prev,
            prev_state,
            next_pid: next,
        }
    }

    #[test]
    fn test_runqlat_pairs_wakeup_with_switch() {
        let probe = RunqLat::new("runqlat", sizing(10));
        let wake = SchedWakeup { target_pid: 42 };
        assert_eq!(
            probe.on_event(&at(1_000, 0, EventKind::SchedWakeup), &wake),
            Outcome::Began
        );
        assert_eq!(
            probe.on_event(&at(4_000, 0, EventKind::SchedSwitch), &switch(7, 0, 42)),
            Outcome::Recorded
        );

        let rec = probe.table().get(Pid(42)).unwrap();
        assert_eq!(rec.count, 1);
        assert_eq!(rec.total_ns, 3_000);
        assert_eq!(rec.max_ns, 3_000);
        assert!(probe.pending().is_empty());
    }

    #[test]
    fn test_runqlat_stale_after_ten_seconds() {
        let probe = RunqLat::new("runqlat", sizing(10));
        probe.on_event(
            &at(0, 0, EventKind::SchedWakeup),
            &SchedWakeup { target_pid: 5 },
        );
        assert_eq!(
            probe.on_event(&at(11 * SEC, 0, EventKind::SchedSwitch), &switch(1, 0, 5)),
            Outcome::Stale
        );
        assert!(probe.table().get(Pid(5)).is_none());
        assert!(probe.pending().is_empty());
    }

    #[test]
    fn test_offcpu_skips_voluntary_sleep() {
        let probe = OffCpu::new("offcpu", sizing(30));
        let h = at(100, 0, EventKind::SchedSwitch);
        assert_eq!(
            probe.on_event(&h, &switch(50, TASK_INTERRUPTIBLE, 0)),
            Outcome::Filtered
        );
        assert!(!probe.pending().contains(Pid(50)));

        // Uninterruptible sleep is recorded.
        assert_eq!(probe.on_event(&h, &switch(50, 2, 0)), Outcome::Began);
        assert_eq!(
            probe.on_event(&at(600, 0, EventKind::SchedSwitch), &switch(0, 0, 50)),
            Outcome::Recorded
        );
        let rec = probe.table().get(Pid(50)).unwrap();
        assert_eq!(rec.total_ns, 500);
        assert_eq!(rec.count, 1);
    }

    #[test]
    fn test_offcpu_ignores_init_and_idle() {
        let probe = OffCpu::new("offcpu", sizing(30));
        let h = at(100, 0, EventKind::SchedSwitch);
        assert_eq!(probe.on_event(&h, &switch(1, 0, 1)), Outcome::Filtered);
        assert!(probe.pending().is_empty());
    }

    #[test]
    fn test_offcpu_thirty_one_second_gap_is_stale() {
        let probe = OffCpu::new("offcpu", sizing(30));
        probe.on_event(&at(1, 0, EventKind::SchedSwitch), &switch(9, 0, 0));
        assert_eq!(
            probe.on_event(&at(31 * SEC + 1, 0, EventKind::SchedSwitch), &switch(0, 0, 9)),
            Outcome::Stale
        );
        assert!(probe.table().is_empty());
    }

    #[test]
    fn test_offcpu_zero_start_is_unpaired_and_kept() {
        let offcpu = OffCpu::new("offcpu", sizing(30));
        offcpu.on_event(&at(0, 0, EventKind::SchedSwitch), &switch(9, 0, 0));
        assert_eq!(
            offcpu.on_event(&at(10, 0, EventKind::SchedSwitch), &switch(0, 0, 9)),
            Outcome::Unpaired
        );
        assert!(offcpu.table().is_empty());
        assert!(offcpu.pending().contains(Pid(9)));
    }

    #[test]
    fn test_offcpu_exactly_thirty_seconds_is_stale() {
        let offcpu = OffCpu::new("offcpu", sizing(30));
        offcpu.on_event(&at(5, 0, EventKind::SchedSwitch), &switch(9, 0, 0));
        assert_eq!(
            offcpu.on_event(&at(30 * SEC + 5, 0, EventKind::SchedSwitch), &switch(0, 0, 9)),
            Outcome::Stale
        );
        assert!(offcpu.table().is_empty());
        assert!(offcpu.pending().is_empty());

        offcpu.on_event(&at(40 * SEC, 0, EventKind::SchedSwitch), &switch(9, 0, 0));
        assert_eq!(
            offcpu.on_event(&at(70 * SEC - 1, 0, EventKind::SchedSwitch), &switch(0, 0, 9)),
            Outcome::Recorded
        );
        assert_eq!(offcpu.table().get(Pid(9)).unwrap().total_ns, 30 * SEC - 1);
    }

    #[test]
    fn test_pgfault_major_flag() {
        let probe = PgFault::new("pgfault", sizing(5));
        probe.on_event(&at(0, 3, EventKind::FaultEnter), &FaultEnter);
        probe.on_event(&at(10, 3, EventKind::FaultExit), &FaultExit { ret: 0x4 });
        probe.on_event(&at(20, 3, EventKind::FaultEnter), &FaultEnter);
        probe.on_event(&at(25, 3, EventKind::FaultExit), &FaultExit { ret: 0 });

        let rec = probe.table().get(Pid(3)).unwrap();
        assert_eq!(rec.count, 2);
        assert_eq!(rec.major_count, 1);
        assert_eq!(rec.total_ns, 15);
    }

    #[test]
    fn test_lockwait_filters_ops_and_zero_delta() {
        let probe = LockWait::new("lockwait", sizing(30));
        let h = at(100, 8, EventKind::FutexEnter);

        // FUTEX_WAKE is not a wait.
        assert_eq!(
            probe.on_event(&h, &FutexEnter { op: 1 }),
            Outcome::Filtered
        );
        // FUTEX_WAIT | FUTEX_PRIVATE_FLAG.
        assert_eq!(
            probe.on_event(&h, &FutexEnter { op: 128 }),
            Outcome::Began
        );
        assert_eq!(
            probe.on_event(&at(100, 8, EventKind::FutexExit), &FutexExit),
            Outcome::Filtered
        );
        assert!(probe.table().is_empty());

        probe.on_event(&h, &FutexEnter { op: 9 });
        assert_eq!(
            probe.on_event(&at(100 + 5 * MS, 8, EventKind::FutexExit), &FutexExit),
            Outcome::Recorded
        );
        assert_eq!(probe.table().get(Pid(8)).unwrap().total_ns, 5 * MS);
    }

    #[test]
    fn test_syscalldissect_keys_by_exit_number() {
        let probe = SyscallDissect::new("syscalldissect", sizing(30));
        probe.on_event(&at(0, 4, EventKind::SysEnter), &SysEnter { id: 0 });
        probe.on_event(&at(700, 4, EventKind::SysExit), &SysExit { id: 0, ret: 12 });
        probe.on_event(&at(1_000, 4, EventKind::SysEnter), &SysEnter { id: 1 });
        probe.on_event(&at(1_200, 4, EventKind::SysExit), &SysExit { id: 1, ret: 3 });

        let read = probe.table().get(PidSyscall { pid: 4, nr: 0 }).unwrap();
        let write = probe.table().get(PidSyscall { pid: 4, nr: 1 }).unwrap();
        assert_eq!(read.total_ns, 700);
        assert_eq!(write.total_ns, 200);
    }

    #[test]
    fn test_iolatency_attributes_to_issuer() {
        let probe = IoLatencyProbe::new("iolatency", sizing(30));
        let rq = BlockRq {
            dev: (8 << 20) | 16,
            sector: 2048,
        };
        assert_eq!(
            probe.on_event(&at(0, 77, EventKind::BlockRqIssue), &BlockRqIssue(&rq)),
            Outcome::Began
        );
        // Completion runs in interrupt context with pid 0.
        assert_eq!(
            probe.on_event(&at(3 * MS, 0, EventKind::BlockRqComplete), &BlockRqComplete(&rq)),
            Outcome::Recorded
        );

        let rec = probe.table().get(Pid(77)).unwrap();
        assert_eq!(rec.count, 1);
        assert_eq!(rec.max_ns, 3 * MS);
        assert_eq!(rec.dev, rq.dev);
        // 3000 us falls in [2048, 4096).
        assert_eq!(rec.slots[11], 1);
    }

    #[test]
    fn test_iolatency_skips_kernel_issued_requests() {
        let probe = IoLatencyProbe::new("iolatency", sizing(30));
        let rq = BlockRq { dev: 1, sector: 1 };
        probe.on_event(&at(0, 0, EventKind::BlockRqIssue), &BlockRqIssue(&rq));
        assert_eq!(
            probe.on_event(&at(50, 0, EventKind::BlockRqComplete), &BlockRqComplete(&rq)),
            Outcome::Filtered
        );
        assert!(probe.table().is_empty());
        assert!(probe.pending().is_empty());
    }

    #[test]
    fn test_iolatency_by_device() {
        let probe = IoLatencyProbe::new("iolatency", sizing(30));
        let fast = BlockRq {
            dev: 8 << 20,
            sector: 1,
        };
        let slow = BlockRq {
            dev: (259 << 20) | 1,
            sector: 1,
        };
        for pid in [10u32, 11] {
            probe.on_event(&at(0, pid, EventKind::BlockRqIssue), &BlockRqIssue(&fast));
            probe.on_event(&at(100_000, 0, EventKind::BlockRqComplete), &BlockRqComplete(&fast));
        }
        probe.on_event(&at(0, 12, EventKind::BlockRqIssue), &BlockRqIssue(&slow));
        probe.on_event(&at(50 * MS, 0, EventKind::BlockRqComplete), &BlockRqComplete(&slow));

        let devices = probe.by_device();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].dev, slow.dev);
        assert_eq!(devices[0].device_name(), "259:1");
        assert_eq!(devices[1].count, 2);
        assert_eq!(devices[1].device_name(), "8:0");
        assert!(devices[0].p95_ns > devices[1].p95_ns);
    }

    #[test]
    fn test_tcpconnlat_only_pairs_syn_sent_to_established() {
        let probe = TcpConnLat::new("tcpconnlat", sizing(30));
        let sk = 0xffff_8880_0000_1000u64;
        probe.on_event(&at(0, 300, EventKind::TcpConnect), &TcpConnect { skaddr: sk });

        let mut state = SockSetState {
            skaddr: sk,
            old_state: 7,
            new_state: 2,
            sport: 0,
            dport: 443,
            daddr: Ipv4Addr::new(93, 184, 216, 34),
        };
        assert_eq!(
            probe.on_event(&at(10, 0, EventKind::SockSetState), &state),
            Outcome::Filtered
        );

        state.old_state = TCP_SYN_SENT;
        state.new_state = TCP_ESTABLISHED;
        assert_eq!(
            probe.on_event(&at(2 * MS, 0, EventKind::SockSetState), &state),
            Outcome::Recorded
        );

        let rec = probe.table().get(Pid(300)).unwrap();
        assert_eq!(rec.count, 1);
        assert_eq!(rec.total_ns, 2 * MS);
        assert_eq!(rec.last_pid, 300);
        assert_eq!(rec.daddr, Ipv4Addr::new(93, 184, 216, 34));
    }
}
