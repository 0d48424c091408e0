//! Counting handlers: each event maps straight to one accumulation table
//! upsert.

use crate::table::key::{CgroupId, DropReason, Endpoint, ModuleKey, Pid, StateTransition, TracePair};
use crate::table::record::{
    ByteCounters, Counter, ExecFields, ExecRecord, Hit, ModuleFields, ModuleRecord, OomVictim,
    OomVictimSnapshot, Pages, PtraceFields, PtraceRecord, Received, ResetFields, ResetRecord,
    RetransFields, RetransRecord, RttSample, RttStats, Sent, SwapCounters, SwapPage,
    WritebackStats,
};
use crate::table::{AccumTable, MergeMode, Record, TableKey};

use super::event::{
    CgroupThrottle, Header, ModuleLoad, OomMarkVictim, ProcessExec, PtraceEnter, SkbDrop,
    SockSetState, SwapReadPage, SwapWritePage, TcpCleanupRbuf, TcpRcvEstablished, TcpRetransmit,
    TcpSend, TcpSendReset, WritebackWait,
};
use super::{OnEvent, Outcome};

/// ptrace requests worth recording: code injection and attach.
const PTRACE_POKETEXT: u64 = 4;
const PTRACE_POKEDATA: u64 = 5;
const PTRACE_SETREGS: u64 = 13;
const PTRACE_ATTACH: u64 = 16;
const PTRACE_SEIZE: u64 = 0x4206;

/// A handler owning a single accumulation table.
pub struct Sentinel<K, R> {
    table: AccumTable<K, R>,
}

impl<K: TableKey, R: Record> Sentinel<K, R> {
    pub fn new(name: &'static str, capacity: usize, mode: MergeMode) -> Self {
        Self {
            table: AccumTable::new(name, capacity, mode),
        }
    }

    pub fn table(&self) -> &AccumTable<K, R> {
        &self.table
    }
}

/// Process executions per pid, with the latest command line details.
pub type ExecSnoop = Sentinel<Pid, ExecRecord>;
/// Kernel module loads by name prefix.
pub type ModLoad = Sentinel<ModuleKey, ModuleRecord>;
/// CFS bandwidth throttling per cgroup.
pub type CgThrottle = Sentinel<CgroupId, Counter>;
/// Packet drops per drop reason.
pub type KfreeSkb = Sentinel<DropReason, Counter>;
/// Socket state transitions.
pub type SockState = Sentinel<StateTransition, Counter>;
/// TCP resets sent per pid.
pub type TcpReset = Sentinel<Pid, ResetRecord>;
/// TCP retransmissions per pid.
pub type TcpRetrans = Sentinel<Pid, RetransRecord>;
/// OOM killer victims.
pub type OomKill = Sentinel<Pid, OomVictim>;
/// Suspicious ptrace requests per tracer/target pair.
pub type PtraceDetect = Sentinel<TracePair, PtraceRecord>;
/// Swap page traffic per pid.
pub type SwapEvict = Sentinel<Pid, SwapCounters>;
/// Writeback stalls per pid.
pub type WbStall = Sentinel<Pid, WritebackStats>;
/// TCP payload bytes per pid.
pub type NetThroughput = Sentinel<Pid, ByteCounters>;
/// Smoothed RTT per remote endpoint.
pub type TcpRtt = Sentinel<Endpoint, RttStats>;

impl OnEvent<ProcessExec> for ExecSnoop {
    fn on_event(&self, header: &Header, event: &ProcessExec) -> Outcome {
        if header.pid == 0 {
            return Outcome::Filtered;
        }
        let fields = ExecFields {
            timestamp_ns: header.timestamp_ns,
            ppid: event.ppid,
            uid: event.uid,
            comm: event.comm,
            filename: event.filename,
        };
        Outcome::recorded(self.table.upsert(Pid(header.pid), fields))
    }
}

impl OnEvent<ModuleLoad> for ModLoad {
    fn on_event(&self, header: &Header, event: &ModuleLoad) -> Outcome {
        let fields = ModuleFields {
            timestamp_ns: header.timestamp_ns,
            name: event.name,
        };
        Outcome::recorded(self.table.upsert(ModuleKey::from_name(&event.name), fields))
    }
}

impl OnEvent<CgroupThrottle> for CgThrottle {
    fn on_event(&self, _header: &Header, event: &CgroupThrottle) -> Outcome {
        Outcome::recorded(self.table.upsert(CgroupId(event.cgroup_id), Hit))
    }
}

impl OnEvent<SkbDrop> for KfreeSkb {
    fn on_event(&self, _header: &Header, event: &SkbDrop) -> Outcome {
        if event.reason == 0 {
            return Outcome::Filtered;
        }
        Outcome::recorded(self.table.upsert(DropReason(event.reason), Hit))
    }
}

impl OnEvent<SockSetState> for SockState {
    fn on_event(&self, _header: &Header, event: &SockSetState) -> Outcome {
        let key = StateTransition {
            old: event.old_state as u16,
            new: event.new_state as u16,
        };
        Outcome::recorded(self.table.upsert(key, Hit))
    }
}

impl OnEvent<TcpSendReset> for TcpReset {
    fn on_event(&self, header: &Header, event: &TcpSendReset) -> Outcome {
        let fields = ResetFields {
            daddr: event.sock.daddr,
            dport: event.sock.dport.to_host(),
        };
        Outcome::recorded(self.table.upsert(Pid(header.pid), fields))
    }
}

impl OnEvent<TcpRetransmit> for TcpRetrans {
    fn on_event(&self, header: &Header, event: &TcpRetransmit) -> Outcome {
        let fields = RetransFields {
            sport: event.sport,
            dport: event.dport,
            daddr: event.daddr,
        };
        Outcome::recorded(self.table.upsert(Pid(header.pid), fields))
    }
}

impl OnEvent<OomMarkVictim> for OomKill {
    fn on_event(&self, header: &Header, event: &OomMarkVictim) -> Outcome {
        let victim = OomVictimSnapshot {
            timestamp_ns: header.timestamp_ns,
            total_vm: event.total_vm,
            anon_rss: event.anon_rss,
        };
        Outcome::recorded(self.table.upsert(Pid(event.victim_pid), victim))
    }
}

impl OnEvent<PtraceEnter> for PtraceDetect {
    fn on_event(&self, header: &Header, event: &PtraceEnter) -> Outcome {
        let suspicious = matches!(
            event.request,
            PTRACE_POKETEXT | PTRACE_POKEDATA | PTRACE_SETREGS | PTRACE_ATTACH | PTRACE_SEIZE
        );
        if !suspicious || header.pid == 0 {
            return Outcome::Filtered;
        }
        let key = TracePair {
            tracer: header.pid,
            target: event.target_pid,
        };
        let fields = PtraceFields {
            timestamp_ns: header.timestamp_ns,
            request: event.request,
            comm: event.comm,
        };
        Outcome::recorded(self.table.upsert(key, fields))
    }
}

impl OnEvent<SwapReadPage> for SwapEvict {
    fn on_event(&self, header: &Header, _event: &SwapReadPage) -> Outcome {
        if header.pid == 0 {
            return Outcome::Filtered;
        }
        Outcome::recorded(self.table.upsert(Pid(header.pid), SwapPage::Read))
    }
}

impl OnEvent<SwapWritePage> for SwapEvict {
    fn on_event(&self, header: &Header, _event: &SwapWritePage) -> Outcome {
        if header.pid == 0 {
            return Outcome::Filtered;
        }
        Outcome::recorded(self.table.upsert(Pid(header.pid), SwapPage::Write))
    }
}

impl OnEvent<WritebackWait> for WbStall {
    fn on_event(&self, header: &Header, event: &WritebackWait) -> Outcome {
        if header.pid == 0 {
            return Outcome::Filtered;
        }
        Outcome::recorded(self.table.upsert(Pid(header.pid), Pages(event.nr_pages)))
    }
}

impl OnEvent<TcpSend> for NetThroughput {
    fn on_event(&self, header: &Header, event: &TcpSend) -> Outcome {
        if header.pid == 0 {
            return Outcome::Filtered;
        }
        Outcome::recorded(self.table.upsert(Pid(header.pid), Sent(event.size)))
    }
}

impl OnEvent<TcpCleanupRbuf> for NetThroughput {
    fn on_event(&self, header: &Header, event: &TcpCleanupRbuf) -> Outcome {
        if header.pid == 0 || event.copied <= 0 {
            return Outcome::Filtered;
        }
        let copied = u64::from(event.copied.unsigned_abs());
        Outcome::recorded(self.table.upsert(Pid(header.pid), Received(copied)))
    }
}

impl OnEvent<TcpRcvEstablished> for TcpRtt {
    fn on_event(&self, header: &Header, event: &TcpRcvEstablished) -> Outcome {
        let srtt_us = event.srtt_us8 >> 3;
        if srtt_us == 0 {
            return Outcome::Filtered;
        }
        let key = Endpoint::new(event.sock.daddr, event.sock.dport.to_host());
        let sample = RttSample {
            srtt_us,
            pid: header.pid,
        };
        Outcome::recorded(self.table.upsert(key, sample))
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::probe::event::{EventKind, NetPort, SockRef};

    fn header(pid: u32, kind: EventKind) -> Header {
        Header {
            timestamp_ns: 1_000,
            pid,
            tid: pid,
            kind,
        }
    }

    fn sock(daddr: [u8; 4], port: u16) -> SockRef {
        SockRef {
            daddr: Ipv4Addr::from(daddr),
            dport: NetPort::from_host(port),
        }
    }

    #[test]
    fn test_execsnoop_ignores_idle_task() {
        let probe = ExecSnoop::new("execsnoop", 16, MergeMode::Relaxed);
        let exec = ProcessExec {
            ppid: 1,
            uid: 1000,
            comm: *b"bash\0\0\0\0\0\0\0\0\0\0\0\0",
            filename: [0u8; 128],
        };
        assert_eq!(
            probe.on_event(&header(0, EventKind::ProcessExec), &exec),
            Outcome::Filtered
        );
        assert_eq!(
            probe.on_event(&header(42, EventKind::ProcessExec), &exec),
            Outcome::Recorded
        );

        let rec = probe.table().get(Pid(42)).unwrap();
        assert_eq!(rec.count, 1);
        assert_eq!(rec.fields.uid, 1000);
        assert_eq!(rec.fields.timestamp_ns, 1_000);
        assert_eq!(&rec.fields.comm[..4], b"bash");
    }

    #[test]
    fn test_kfreeskb_skips_reason_zero() {
        let probe = KfreeSkb::new("kfreeskb", 16, MergeMode::Relaxed);
        let h = header(1, EventKind::SkbDrop);
        assert_eq!(probe.on_event(&h, &SkbDrop { reason: 0 }), Outcome::Filtered);
        probe.on_event(&h, &SkbDrop { reason: 2 });
        probe.on_event(&h, &SkbDrop { reason: 2 });
        assert_eq!(probe.table().get(DropReason(2)).unwrap().count, 2);
        assert!(probe.table().get(DropReason(0)).is_none());
    }

    #[test]
    fn test_ptracedetect_only_records_suspicious_requests() {
        let probe = PtraceDetect::new("ptracedetect", 16, MergeMode::Relaxed);
        let h = header(500, EventKind::PtraceEnter);
        let mut req = PtraceEnter {
            request: 0, // PTRACE_TRACEME
            target_pid: 600,
            comm: [0u8; 16],
        };
        assert_eq!(probe.on_event(&h, &req), Outcome::Filtered);

        req.request = PTRACE_SEIZE;
        assert_eq!(probe.on_event(&h, &req), Outcome::Recorded);
        req.request = PTRACE_POKETEXT;
        assert_eq!(probe.on_event(&h, &req), Outcome::Recorded);

        let rec = probe
            .table()
            .get(TracePair {
                tracer: 500,
                target: 600,
            })
            .unwrap();
        assert_eq!(rec.count, 2);
        assert_eq!(rec.fields.request, PTRACE_POKETEXT);

        assert_eq!(
            probe.on_event(&header(0, EventKind::PtraceEnter), &req),
            Outcome::Filtered
        );
    }

    #[test]
    fn test_netthroughput_counts_both_directions() {
        let probe = NetThroughput::new("netthroughput", 16, MergeMode::Relaxed);
        let h = header(7, EventKind::TcpSend);
        let s = sock([10, 0, 0, 1], 80);
        probe.on_event(&h, &TcpSend { sock: s, size: 1500 });
        probe.on_event(&h, &TcpCleanupRbuf { sock: s, copied: 300 });
        assert_eq!(
            probe.on_event(&h, &TcpCleanupRbuf { sock: s, copied: 0 }),
            Outcome::Filtered
        );
        assert_eq!(
            probe.on_event(&h, &TcpCleanupRbuf { sock: s, copied: -11 }),
            Outcome::Filtered
        );

        let rec = probe.table().get(Pid(7)).unwrap();
        assert_eq!(rec.sent, 1500);
        assert_eq!(rec.received, 300);
    }

    #[test]
    fn test_tcprtt_converts_units_and_normalizes_port() {
        let probe = TcpRtt::new("tcprtt", 16, MergeMode::Relaxed);
        let h = header(9, EventKind::TcpRcvEstablished);
        let s = sock([172, 16, 0, 4], 5432);

        assert_eq!(
            probe.on_event(&h, &TcpRcvEstablished { sock: s, srtt_us8: 7 }),
            Outcome::Filtered
        );
        probe.on_event(&h, &TcpRcvEstablished { sock: s, srtt_us8: 800 });

        let key = Endpoint::new(Ipv4Addr::new(172, 16, 0, 4), 5432);
        let rec = probe.table().get(key).unwrap();
        assert_eq!(rec.sum_us, 100);
        assert_eq!(rec.min_us, 100);
        assert_eq!(rec.last_pid, 9);
    }

    #[test]
    fn test_tcpreset_keeps_pid_zero_and_host_port() {
        let probe = TcpReset::new("tcpreset", 16, MergeMode::Relaxed);
        let h = header(0, EventKind::TcpSendReset);
        let event = TcpSendReset {
            sock: sock([1, 2, 3, 4], 8443),
        };
        assert_eq!(probe.on_event(&h, &event), Outcome::Recorded);
        let rec = probe.table().get(Pid(0)).unwrap();
        assert_eq!(rec.fields.dport, 8443);
        assert_eq!(rec.fields.daddr, Ipv4Addr::new(1, 2, 3, 4));
    }

    #[test]
    fn test_oomkill_overwrites_victim() {
        let probe = OomKill::new("oomkill", 16, MergeMode::Relaxed);
        let h = header(1, EventKind::OomMarkVictim);
        let mut event = OomMarkVictim {
            victim_pid: 321,
            total_vm: 100,
            anon_rss: 50,
        };
        probe.on_event(&h, &event);
        event.total_vm = 400;
        probe.on_event(&h, &event);

        let rec = probe.table().get(Pid(321)).unwrap();
        assert_eq!(rec.total_vm, 400);
        assert_eq!(rec.anon_rss, 50);
    }

    #[test]
    fn test_swapevict_splits_directions() {
        let probe = SwapEvict::new("swapevict", 16, MergeMode::Relaxed);
        let h = header(3, EventKind::SwapReadPage);
        probe.on_event(&h, &SwapReadPage);
        probe.on_event(&h, &SwapWritePage);
        probe.on_event(&h, &SwapWritePage);
        let rec = probe.table().get(Pid(3)).unwrap();
        assert_eq!(rec.read_pages, 1);
        assert_eq!(rec.write_pages, 2);
    }

    #[test]
    fn test_modload_keys_by_name_prefix() {
        let probe = ModLoad::new("modload", 16, MergeMode::Relaxed);
        let mut name = [0u8; 56];
        name[..12].copy_from_slice(b"nf_conntrack");
        let h = header(1, EventKind::ModuleLoad);
        probe.on_event(&h, &ModuleLoad { name });

        let rec = probe
            .table()
            .get(ModuleKey::from_name(b"nf_conntrack"))
            .unwrap();
        assert_eq!(rec.count, 1);
        assert_eq!(&rec.fields.name[..12], b"nf_conntrack");
    }
}
