//! Probe handlers.
//!
//! A handler reacts to one or more event classes by filtering the event,
//! deriving a key and a sample from it, and applying the sample to its own
//! tables. Sentinel handlers count directly into an accumulation table;
//! watchdog handlers record a begin timestamp in a pairing table and, on the
//! matching end event, accumulate the elapsed duration.

pub mod event;
pub mod parse;
pub mod sentinel;
pub mod sockio;
pub mod stats;
pub mod watchdog;

use std::fmt;
use std::time::Duration;

use crate::table::{EndOutcome, Upsert};

use self::event::Header;

/// Reaction of a handler to an event of class `E`.
///
/// Handlers run concurrently on the event path: they never block, never
/// allocate and never fail. Everything they did is summarized by the
/// returned [`Outcome`].
pub trait OnEvent<E> {
    fn on_event(&self, header: &Header, event: &E) -> Outcome;
}

/// What a handler did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Outcome {
    /// Rejected by the handler's filter.
    Filtered = 0,
    /// A begin timestamp was recorded.
    Began = 1,
    /// A sample was merged into an accumulation table.
    Recorded = 2,
    /// A table was full or a concurrent insert of the same key won.
    Dropped = 3,
    /// An end event had no matching begin.
    Unpaired = 4,
    /// The begin-to-end duration exceeded the staleness ceiling.
    Stale = 5,
}

impl Outcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Filtered => "filtered",
            Self::Began => "began",
            Self::Recorded => "recorded",
            Self::Dropped => "dropped",
            Self::Unpaired => "unpaired",
            Self::Stale => "stale",
        }
    }

    pub fn all() -> &'static [Self] {
        &[
            Self::Filtered,
            Self::Began,
            Self::Recorded,
            Self::Dropped,
            Self::Unpaired,
            Self::Stale,
        ]
    }

    /// Outcome of merging a sample.
    pub fn recorded(upsert: Upsert) -> Self {
        match upsert {
            Upsert::Applied => Self::Recorded,
            Upsert::Dropped => Self::Dropped,
        }
    }

    /// Outcome of recording a begin timestamp.
    pub fn began(upsert: Upsert) -> Self {
        match upsert {
            Upsert::Applied => Self::Began,
            Upsert::Dropped => Self::Dropped,
        }
    }

    /// Outcome of an end event: `accumulate` runs only for a paired,
    /// non-stale duration.
    pub fn settled<C>(end: EndOutcome<C>, accumulate: impl FnOnce(u64, C) -> Upsert) -> Self {
        match end {
            EndOutcome::Unpaired => Self::Unpaired,
            EndOutcome::Stale { .. } => Self::Stale,
            EndOutcome::Paired {
                duration_ns,
                context,
                ..
            } => Self::recorded(accumulate(duration_ns, context)),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handler family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeClass {
    Sentinel,
    Watchdog,
}

/// Every probe the engine can wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    ExecSnoop,
    ModLoad,
    CgThrottle,
    KfreeSkb,
    SockState,
    TcpReset,
    TcpRetrans,
    OomKill,
    PtraceDetect,
    SwapEvict,
    WbStall,
    NetThroughput,
    TcpRtt,
    RunqLat,
    OffCpu,
    PgFault,
    LockWait,
    DirectReclaim,
    SyscallDissect,
    IoLatency,
    TcpConnLat,
    SockIo,
}

const ALL_PROBES: [ProbeKind; 22] = [
    ProbeKind::ExecSnoop,
    ProbeKind::ModLoad,
    ProbeKind::CgThrottle,
    ProbeKind::KfreeSkb,
    ProbeKind::SockState,
    ProbeKind::TcpReset,
    ProbeKind::TcpRetrans,
    ProbeKind::OomKill,
    ProbeKind::PtraceDetect,
    ProbeKind::SwapEvict,
    ProbeKind::WbStall,
    ProbeKind::NetThroughput,
    ProbeKind::TcpRtt,
    ProbeKind::RunqLat,
    ProbeKind::OffCpu,
    ProbeKind::PgFault,
    ProbeKind::LockWait,
    ProbeKind::DirectReclaim,
    ProbeKind::SyscallDissect,
    ProbeKind::IoLatency,
    ProbeKind::TcpConnLat,
    ProbeKind::SockIo,
];

impl ProbeKind {
    /// Returns the canonical configuration/metric name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExecSnoop => "execsnoop",
            Self::ModLoad => "modload",
            Self::CgThrottle => "cgthrottle",
            Self::KfreeSkb => "kfreeskb",
            Self::SockState => "sockstate",
            Self::TcpReset => "tcpreset",
            Self::TcpRetrans => "tcpretrans",
            Self::OomKill => "oomkill",
            Self::PtraceDetect => "ptracedetect",
            Self::SwapEvict => "swapevict",
            Self::WbStall => "wbstall",
            Self::NetThroughput => "netthroughput",
            Self::TcpRtt => "tcprtt",
            Self::RunqLat => "runqlat",
            Self::OffCpu => "offcpu",
            Self::PgFault => "pgfault",
            Self::LockWait => "lockwait",
            Self::DirectReclaim => "directreclaim",
            Self::SyscallDissect => "syscalldissect",
            Self::IoLatency => "iolatency",
            Self::TcpConnLat => "tcpconnlat",
            Self::SockIo => "sockio",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ALL_PROBES.iter().copied().find(|p| p.as_str() == name)
    }

    pub fn all() -> &'static [Self] {
        &ALL_PROBES
    }

    pub const fn class(self) -> ProbeClass {
        match self {
            Self::RunqLat
            | Self::OffCpu
            | Self::PgFault
            | Self::LockWait
            | Self::DirectReclaim
            | Self::SyscallDissect
            | Self::IoLatency
            | Self::TcpConnLat
            | Self::SockIo => ProbeClass::Watchdog,
            _ => ProbeClass::Sentinel,
        }
    }

    /// Event-style tables are read and cleared rather than read cumulatively.
    pub const fn clears_on_read(self) -> bool {
        matches!(
            self,
            Self::ExecSnoop | Self::ModLoad | Self::OomKill | Self::PtraceDetect
        )
    }

    /// Default accumulation table capacity.
    pub const fn default_capacity(self) -> usize {
        match self {
            Self::ModLoad | Self::KfreeSkb | Self::SockState | Self::PtraceDetect => 256,
            Self::CgThrottle | Self::OomKill => 1024,
            Self::SockIo => 16_384,
            Self::SyscallDissect => 32_768,
            _ => 10_240,
        }
    }

    /// Default pairing table capacity. `None` for sentinel probes.
    pub const fn default_pairing_capacity(self) -> Option<usize> {
        match self.class() {
            ProbeClass::Watchdog => Some(10_240),
            ProbeClass::Sentinel => None,
        }
    }

    /// Default staleness ceiling. `None` for sentinel probes.
    pub const fn default_ceiling(self) -> Option<Duration> {
        match self {
            Self::RunqLat => Some(Duration::from_secs(10)),
            Self::PgFault => Some(Duration::from_secs(5)),
            Self::OffCpu
            | Self::LockWait
            | Self::DirectReclaim
            | Self::SyscallDissect
            | Self::IoLatency
            | Self::TcpConnLat
            | Self::SockIo => Some(Duration::from_secs(30)),
            _ => None,
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
