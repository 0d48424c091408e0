use std::fmt;
use std::net::Ipv4Addr;

/// EventKind identifies the kernel hook an event was captured at.
/// Values are the `kind` byte of the wire header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    ProcessExec = 1,
    ModuleLoad = 2,
    CgroupThrottle = 3,
    SkbDrop = 4,
    SockSetState = 5,
    TcpSendReset = 6,
    TcpRetransmit = 7,
    OomMarkVictim = 8,
    PtraceEnter = 9,
    SwapReadPage = 10,
    SwapWritePage = 11,
    WritebackWait = 12,
    TcpSend = 13,
    TcpCleanupRbuf = 14,
    TcpRcvEstablished = 15,
    SchedWakeup = 16,
    SchedSwitch = 17,
    FaultEnter = 18,
    FaultExit = 19,
    FutexEnter = 20,
    FutexExit = 21,
    ReclaimBegin = 22,
    ReclaimEnd = 23,
    SysEnter = 24,
    SysExit = 25,
    BlockRqIssue = 26,
    BlockRqComplete = 27,
    TcpConnect = 28,
    TcpRecvEnter = 29,
    TcpRecvExit = 30,
}

/// Maximum EventKind value, used for array sizing.
pub const MAX_EVENT_KIND: usize = 30;

const ALL_KINDS: [EventKind; MAX_EVENT_KIND] = [
    EventKind::ProcessExec,
    EventKind::ModuleLoad,
    EventKind::CgroupThrottle,
    EventKind::SkbDrop,
    EventKind::SockSetState,
    EventKind::TcpSendReset,
    EventKind::TcpRetransmit,
    EventKind::OomMarkVictim,
    EventKind::PtraceEnter,
    EventKind::SwapReadPage,
    EventKind::SwapWritePage,
    EventKind::WritebackWait,
    EventKind::TcpSend,
    EventKind::TcpCleanupRbuf,
    EventKind::TcpRcvEstablished,
    EventKind::SchedWakeup,
    EventKind::SchedSwitch,
    EventKind::FaultEnter,
    EventKind::FaultExit,
    EventKind::FutexEnter,
    EventKind::FutexExit,
    EventKind::ReclaimBegin,
    EventKind::ReclaimEnd,
    EventKind::SysEnter,
    EventKind::SysExit,
    EventKind::BlockRqIssue,
    EventKind::BlockRqComplete,
    EventKind::TcpConnect,
    EventKind::TcpRecvEnter,
    EventKind::TcpRecvExit,
];

impl EventKind {
    /// Returns the canonical metric/log label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProcessExec => "process_exec",
            Self::ModuleLoad => "module_load",
            Self::CgroupThrottle => "cgroup_throttle",
            Self::SkbDrop => "skb_drop",
            Self::SockSetState => "sock_set_state",
            Self::TcpSendReset => "tcp_send_reset",
            Self::TcpRetransmit => "tcp_retransmit",
            Self::OomMarkVictim => "oom_mark_victim",
            Self::PtraceEnter => "ptrace_enter",
            Self::SwapReadPage => "swap_read_page",
            Self::SwapWritePage => "swap_write_page",
            Self::WritebackWait => "writeback_wait",
            Self::TcpSend => "tcp_send",
            Self::TcpCleanupRbuf => "tcp_cleanup_rbuf",
            Self::TcpRcvEstablished => "tcp_rcv_established",
            Self::SchedWakeup => "sched_wakeup",
            Self::SchedSwitch => "sched_switch",
            Self::FaultEnter => "fault_enter",
            Self::FaultExit => "fault_exit",
            Self::FutexEnter => "futex_enter",
            Self::FutexExit => "futex_exit",
            Self::ReclaimBegin => "reclaim_begin",
            Self::ReclaimEnd => "reclaim_end",
            Self::SysEnter => "sys_enter",
            Self::SysExit => "sys_exit",
            Self::BlockRqIssue => "block_rq_issue",
            Self::BlockRqComplete => "block_rq_complete",
            Self::TcpConnect => "tcp_connect",
            Self::TcpRecvEnter => "tcp_recv_enter",
            Self::TcpRecvExit => "tcp_recv_exit",
        }
    }

    /// Convert from a raw u8 value.
    pub fn from_u8(v: u8) -> Option<Self> {
        let idx = usize::from(v).checked_sub(1)?;
        ALL_KINDS.get(idx).copied()
    }

    /// Convert from the canonical label name.
    pub fn from_name(name: &str) -> Option<Self> {
        ALL_KINDS.iter().copied().find(|k| k.as_str() == name)
    }

    /// Returns all event kinds in wire order.
    pub fn all() -> &'static [Self] {
        &ALL_KINDS
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common event header (24 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub timestamp_ns: u64,
    /// Process id (tgid) of the current task.
    pub pid: u32,
    pub tid: u32,
    pub kind: EventKind,
}

/// A 16-bit port exactly as stored in a socket, in network byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetPort(pub [u8; 2]);

impl NetPort {
    pub fn from_host(port: u16) -> Self {
        Self(port.to_be_bytes())
    }

    pub fn to_host(self) -> u16 {
        u16::from_be_bytes(self.0)
    }
}

/// Remote endpoint read from a socket structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockRef {
    pub daddr: Ipv4Addr,
    pub dport: NetPort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExec {
    pub ppid: u32,
    pub uid: u32,
    pub comm: [u8; 16],
    pub filename: [u8; 128],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleLoad {
    pub name: [u8; 56],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CgroupThrottle {
    pub cgroup_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkbDrop {
    pub reason: u32,
}

/// Socket state change. Ports come from the tracepoint in host order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockSetState {
    pub skaddr: u64,
    pub old_state: i32,
    pub new_state: i32,
    pub sport: u16,
    pub dport: u16,
    pub daddr: Ipv4Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpSendReset {
    pub sock: SockRef,
}

/// Retransmission. Ports come from the tracepoint in host order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpRetransmit {
    pub sport: u16,
    pub dport: u16,
    pub daddr: Ipv4Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OomMarkVictim {
    pub victim_pid: u32,
    pub total_vm: u64,
    pub anon_rss: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtraceEnter {
    pub request: u64,
    pub target_pid: u32,
    /// Command name of the tracer.
    pub comm: [u8; 16],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapReadPage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapWritePage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritebackWait {
    pub nr_pages: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpSend {
    pub sock: SockRef,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpCleanupRbuf {
    pub sock: SockRef,
    pub copied: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpRcvEstablished {
    pub sock: SockRef,
    /// Smoothed RTT as kept by the kernel, in 1/8 microsecond units.
    pub srtt_us8: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedWakeup {
    pub target_pid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedSwitch {
    pub prev_pid: u32,
    pub prev_state: u32,
    pub next_pid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultEnter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultExit {
    pub ret: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FutexEnter {
    pub op: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FutexExit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimBegin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimEnd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysEnter {
    pub id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysExit {
    pub id: i64,
    pub ret: i64,
}

/// Block request issue or completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRq {
    pub dev: u32,
    pub sector: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpConnect {
    pub skaddr: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpRecvEnter {
    pub sock: SockRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpRecvExit;

/// A parsed event: common header plus a typed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeEvent {
    pub header: Header,
    pub payload: Payload,
}

/// Typed event payload variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    ProcessExec(ProcessExec),
    ModuleLoad(ModuleLoad),
    CgroupThrottle(CgroupThrottle),
    SkbDrop(SkbDrop),
    SockSetState(SockSetState),
    TcpSendReset(TcpSendReset),
    TcpRetransmit(TcpRetransmit),
    OomMarkVictim(OomMarkVictim),
    PtraceEnter(PtraceEnter),
    SwapReadPage(SwapReadPage),
    SwapWritePage(SwapWritePage),
    WritebackWait(WritebackWait),
    TcpSend(TcpSend),
    TcpCleanupRbuf(TcpCleanupRbuf),
    TcpRcvEstablished(TcpRcvEstablished),
    SchedWakeup(SchedWakeup),
    SchedSwitch(SchedSwitch),
    FaultEnter(FaultEnter),
    FaultExit(FaultExit),
    FutexEnter(FutexEnter),
    FutexExit(FutexExit),
    ReclaimBegin(ReclaimBegin),
    ReclaimEnd(ReclaimEnd),
    SysEnter(SysEnter),
    SysExit(SysExit),
    BlockRqIssue(BlockRq),
    BlockRqComplete(BlockRq),
    TcpConnect(TcpConnect),
    TcpRecvEnter(TcpRecvEnter),
    TcpRecvExit(TcpRecvExit),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_roundtrip() {
        for i in 1..=MAX_EVENT_KIND as u8 {
            let kind = EventKind::from_u8(i).expect("valid event kind");
            assert_eq!(kind as u8, i);
            assert_eq!(EventKind::from_name(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_event_kind_out_of_range() {
        assert_eq!(EventKind::from_u8(0), None);
        assert_eq!(EventKind::from_u8(MAX_EVENT_KIND as u8 + 1), None);
        assert_eq!(EventKind::from_u8(255), None);
        assert_eq!(EventKind::from_name("nope"), None);
    }

    #[test]
    fn test_all_kinds_in_wire_order() {
        let all = EventKind::all();
        assert_eq!(all.len(), MAX_EVENT_KIND);
        for (i, kind) in all.iter().enumerate() {
            assert_eq!(*kind as usize, i + 1);
        }
    }

    #[test]
    fn test_event_kind_display() {
        assert_eq!(EventKind::SchedSwitch.to_string(), "sched_switch");
        assert_eq!(format!("{}", EventKind::TcpRecvExit), "tcp_recv_exit");
    }

    #[test]
    fn test_net_port_byte_order() {
        let port = NetPort([0x01, 0xbb]);
        assert_eq!(port.to_host(), 443);
        assert_eq!(NetPort::from_host(443), port);
    }
}
