//! The engine owns every enabled probe and routes parsed events to them.

use tracing::{debug, info};

use crate::config::{Config, MAX_CEILING};
use crate::export::{Occupancy, TableView};
use crate::probe::event::{Header, Payload, ProbeEvent};
use crate::probe::sentinel::{
    CgThrottle, ExecSnoop, KfreeSkb, ModLoad, NetThroughput, OomKill, PtraceDetect, Sentinel,
    SockState, SwapEvict, TcpReset, TcpRetrans, TcpRtt, WbStall,
};
use crate::probe::sockio::SockIo;
use crate::probe::stats::EventStats;
use crate::probe::watchdog::{
    BlockRqComplete, BlockRqIssue, DirectReclaim, IoLatencyProbe, LockWait, OffCpu, PgFault,
    RunqLat, SyscallDissect, TcpConnLat, WatchdogSizing,
};
use crate::probe::{OnEvent, ProbeKind};
use crate::table::{MergeMode, Record, StalenessGuard, TableKey};

/// Every probe, each present only when enabled.
pub struct Engine {
    mode: MergeMode,
    stats: EventStats,

    execsnoop: Option<ExecSnoop>,
    modload: Option<ModLoad>,
    cgthrottle: Option<CgThrottle>,
    kfreeskb: Option<KfreeSkb>,
    sockstate: Option<SockState>,
    tcpreset: Option<TcpReset>,
    tcpretrans: Option<TcpRetrans>,
    oomkill: Option<OomKill>,
    ptracedetect: Option<PtraceDetect>,
    swapevict: Option<SwapEvict>,
    wbstall: Option<WbStall>,
    netthroughput: Option<NetThroughput>,
    tcprtt: Option<TcpRtt>,

    runqlat: Option<RunqLat>,
    offcpu: Option<OffCpu>,
    pgfault: Option<PgFault>,
    lockwait: Option<LockWait>,
    directreclaim: Option<DirectReclaim>,
    syscalldissect: Option<SyscallDissect>,
    iolatency: Option<IoLatencyProbe>,
    tcpconnlat: Option<TcpConnLat>,
    sockio: Option<SockIo>,
}

impl Engine {
    /// Build every probe enabled in `cfg`. Tables are allocated up front.
    pub fn new(cfg: &Config) -> Self {
        let mode = cfg.merge_mode;

        let engine = Self {
            mode,
            stats: EventStats::new(),

            execsnoop: counting(cfg, ProbeKind::ExecSnoop),
            modload: counting(cfg, ProbeKind::ModLoad),
            cgthrottle: counting(cfg, ProbeKind::CgThrottle),
            kfreeskb: counting(cfg, ProbeKind::KfreeSkb),
            sockstate: counting(cfg, ProbeKind::SockState),
            tcpreset: counting(cfg, ProbeKind::TcpReset),
            tcpretrans: counting(cfg, ProbeKind::TcpRetrans),
            oomkill: counting(cfg, ProbeKind::OomKill),
            ptracedetect: counting(cfg, ProbeKind::PtraceDetect),
            swapevict: counting(cfg, ProbeKind::SwapEvict),
            wbstall: counting(cfg, ProbeKind::WbStall),
            netthroughput: counting(cfg, ProbeKind::NetThroughput),
            tcprtt: counting(cfg, ProbeKind::TcpRtt),

            runqlat: pairing(cfg, ProbeKind::RunqLat).map(|s| RunqLat::new("runqlat", s)),
            offcpu: pairing(cfg, ProbeKind::OffCpu).map(|s| OffCpu::new("offcpu", s)),
            pgfault: pairing(cfg, ProbeKind::PgFault).map(|s| PgFault::new("pgfault", s)),
            lockwait: pairing(cfg, ProbeKind::LockWait).map(|s| LockWait::new("lockwait", s)),
            directreclaim: pairing(cfg, ProbeKind::DirectReclaim)
                .map(|s| DirectReclaim::new("directreclaim", s)),
            syscalldissect: pairing(cfg, ProbeKind::SyscallDissect)
                .map(|s| SyscallDissect::new("syscalldissect", s)),
            iolatency: pairing(cfg, ProbeKind::IoLatency)
                .map(|s| IoLatencyProbe::new("iolatency", s)),
            tcpconnlat: pairing(cfg, ProbeKind::TcpConnLat)
                .map(|s| TcpConnLat::new("tcpconnlat", s)),
            sockio: pairing(cfg, ProbeKind::SockIo).map(|s| SockIo::new("sockio", s)),
        };

        let enabled = engine.enabled();
        info!(
            probes = enabled.len(),
            disabled = ProbeKind::all().len() - enabled.len(),
            merge_mode = mode.as_str(),
            "engine wired",
        );

        engine
    }

    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    pub fn stats(&self) -> &EventStats {
        &self.stats
    }

    /// Deliver one event to every probe subscribed to its class.
    pub fn dispatch(&self, event: &ProbeEvent) {
        let h = &event.header;
        self.stats.record(h.kind);

        match &event.payload {
            Payload::ProcessExec(e) => self.deliver(&self.execsnoop, h, e),
            Payload::ModuleLoad(e) => self.deliver(&self.modload, h, e),
            Payload::CgroupThrottle(e) => self.deliver(&self.cgthrottle, h, e),
            Payload::SkbDrop(e) => self.deliver(&self.kfreeskb, h, e),
            Payload::SockSetState(e) => {
                self.deliver(&self.sockstate, h, e);
                self.deliver(&self.tcpconnlat, h, e);
            }
            Payload::TcpSendReset(e) => self.deliver(&self.tcpreset, h, e),
            Payload::TcpRetransmit(e) => self.deliver(&self.tcpretrans, h, e),
            Payload::OomMarkVictim(e) => self.deliver(&self.oomkill, h, e),
            Payload::PtraceEnter(e) => self.deliver(&self.ptracedetect, h, e),
            Payload::SwapReadPage(e) => self.deliver(&self.swapevict, h, e),
            Payload::SwapWritePage(e) => self.deliver(&self.swapevict, h, e),
            Payload::WritebackWait(e) => self.deliver(&self.wbstall, h, e),
            Payload::TcpSend(e) => {
                self.deliver(&self.netthroughput, h, e);
                self.deliver(&self.sockio, h, e);
            }
            Payload::TcpCleanupRbuf(e) => {
                self.deliver(&self.netthroughput, h, e);
                self.deliver(&self.sockio, h, e);
            }
            Payload::TcpRcvEstablished(e) => self.deliver(&self.tcprtt, h, e),
            Payload::SchedWakeup(e) => self.deliver(&self.runqlat, h, e),
            Payload::SchedSwitch(e) => {
                self.deliver(&self.offcpu, h, e);
                self.deliver(&self.runqlat, h, e);
            }
            Payload::FaultEnter(e) => self.deliver(&self.pgfault, h, e),
            Payload::FaultExit(e) => self.deliver(&self.pgfault, h, e),
            Payload::FutexEnter(e) => self.deliver(&self.lockwait, h, e),
            Payload::FutexExit(e) => self.deliver(&self.lockwait, h, e),
            Payload::ReclaimBegin(e) => self.deliver(&self.directreclaim, h, e),
            Payload::ReclaimEnd(e) => self.deliver(&self.directreclaim, h, e),
            Payload::SysEnter(e) => self.deliver(&self.syscalldissect, h, e),
            Payload::SysExit(e) => self.deliver(&self.syscalldissect, h, e),
            Payload::BlockRqIssue(rq) => self.deliver(&self.iolatency, h, &BlockRqIssue(rq)),
            Payload::BlockRqComplete(rq) => {
                self.deliver(&self.iolatency, h, &BlockRqComplete(rq))
            }
            Payload::TcpConnect(e) => self.deliver(&self.tcpconnlat, h, e),
            Payload::TcpRecvEnter(e) => self.deliver(&self.sockio, h, e),
            Payload::TcpRecvExit(e) => self.deliver(&self.sockio, h, e),
        }
    }

    #[inline]
    fn deliver<P: OnEvent<E>, E>(&self, probe: &Option<P>, header: &Header, event: &E) {
        if let Some(probe) = probe {
            self.stats.record_outcome(probe.on_event(header, event));
        }
    }

    /// Enabled probes in catalogue order.
    pub fn enabled(&self) -> Vec<ProbeKind> {
        self.tables().into_iter().map(|(kind, _)| kind).collect()
    }

    /// Accumulation table of every enabled probe.
    pub fn tables(&self) -> Vec<(ProbeKind, &dyn TableView)> {
        wired([
            (ProbeKind::ExecSnoop, view(&self.execsnoop, |p| p.table())),
            (ProbeKind::ModLoad, view(&self.modload, |p| p.table())),
            (ProbeKind::CgThrottle, view(&self.cgthrottle, |p| p.table())),
            (ProbeKind::KfreeSkb, view(&self.kfreeskb, |p| p.table())),
            (ProbeKind::SockState, view(&self.sockstate, |p| p.table())),
            (ProbeKind::TcpReset, view(&self.tcpreset, |p| p.table())),
            (ProbeKind::TcpRetrans, view(&self.tcpretrans, |p| p.table())),
            (ProbeKind::OomKill, view(&self.oomkill, |p| p.table())),
            (ProbeKind::PtraceDetect, view(&self.ptracedetect, |p| p.table())),
            (ProbeKind::SwapEvict, view(&self.swapevict, |p| p.table())),
            (ProbeKind::WbStall, view(&self.wbstall, |p| p.table())),
            (ProbeKind::NetThroughput, view(&self.netthroughput, |p| p.table())),
            (ProbeKind::TcpRtt, view(&self.tcprtt, |p| p.table())),
            (ProbeKind::RunqLat, view(&self.runqlat, |p| p.table())),
            (ProbeKind::OffCpu, view(&self.offcpu, |p| p.table())),
            (ProbeKind::PgFault, view(&self.pgfault, |p| p.table())),
            (ProbeKind::LockWait, view(&self.lockwait, |p| p.table())),
            (ProbeKind::DirectReclaim, view(&self.directreclaim, |p| p.table())),
            (ProbeKind::SyscallDissect, view(&self.syscalldissect, |p| p.table())),
            (ProbeKind::IoLatency, view(&self.iolatency, |p| p.table())),
            (ProbeKind::TcpConnLat, view(&self.tcpconnlat, |p| p.table())),
            (ProbeKind::SockIo, view(&self.sockio, |p| p.table())),
        ])
    }

    /// Pairing table of every enabled watchdog probe.
    pub fn pending_tables(&self) -> Vec<(ProbeKind, &dyn Occupancy)> {
        wired([
            (ProbeKind::RunqLat, pending(&self.runqlat, |p| p.pending())),
            (ProbeKind::OffCpu, pending(&self.offcpu, |p| p.pending())),
            (ProbeKind::PgFault, pending(&self.pgfault, |p| p.pending())),
            (ProbeKind::LockWait, pending(&self.lockwait, |p| p.pending())),
            (ProbeKind::DirectReclaim, pending(&self.directreclaim, |p| p.pending())),
            (ProbeKind::SyscallDissect, pending(&self.syscalldissect, |p| p.pending())),
            (ProbeKind::IoLatency, pending(&self.iolatency, |p| p.pending())),
            (ProbeKind::TcpConnLat, pending(&self.tcpconnlat, |p| p.pending())),
            (ProbeKind::SockIo, pending(&self.sockio, |p| p.pending())),
        ])
    }

    pub fn execsnoop(&self) -> Option<&ExecSnoop> {
        self.execsnoop.as_ref()
    }

    pub fn modload(&self) -> Option<&ModLoad> {
        self.modload.as_ref()
    }

    pub fn cgthrottle(&self) -> Option<&CgThrottle> {
        self.cgthrottle.as_ref()
    }

    pub fn kfreeskb(&self) -> Option<&KfreeSkb> {
        self.kfreeskb.as_ref()
    }

    pub fn sockstate(&self) -> Option<&SockState> {
        self.sockstate.as_ref()
    }

    pub fn tcpreset(&self) -> Option<&TcpReset> {
        self.tcpreset.as_ref()
    }

    pub fn tcpretrans(&self) -> Option<&TcpRetrans> {
        self.tcpretrans.as_ref()
    }

    pub fn oomkill(&self) -> Option<&OomKill> {
        self.oomkill.as_ref()
    }

    pub fn ptracedetect(&self) -> Option<&PtraceDetect> {
        self.ptracedetect.as_ref()
    }

    pub fn swapevict(&self) -> Option<&SwapEvict> {
        self.swapevict.as_ref()
    }

    pub fn wbstall(&self) -> Option<&WbStall> {
        self.wbstall.as_ref()
    }

    pub fn netthroughput(&self) -> Option<&NetThroughput> {
        self.netthroughput.as_ref()
    }

    pub fn tcprtt(&self) -> Option<&TcpRtt> {
        self.tcprtt.as_ref()
    }

    pub fn runqlat(&self) -> Option<&RunqLat> {
        self.runqlat.as_ref()
    }

    pub fn offcpu(&self) -> Option<&OffCpu> {
        self.offcpu.as_ref()
    }

    pub fn pgfault(&self) -> Option<&PgFault> {
        self.pgfault.as_ref()
    }

    pub fn lockwait(&self) -> Option<&LockWait> {
        self.lockwait.as_ref()
    }

    pub fn directreclaim(&self) -> Option<&DirectReclaim> {
        self.directreclaim.as_ref()
    }

    pub fn syscalldissect(&self) -> Option<&SyscallDissect> {
        self.syscalldissect.as_ref()
    }

    pub fn iolatency(&self) -> Option<&IoLatencyProbe> {
        self.iolatency.as_ref()
    }

    pub fn tcpconnlat(&self) -> Option<&TcpConnLat> {
        self.tcpconnlat.as_ref()
    }

    pub fn sockio(&self) -> Option<&SockIo> {
        self.sockio.as_ref()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

/// Keep the tables of enabled probes, in order.
fn wired<'a, T: ?Sized, const N: usize>(
    tables: [(ProbeKind, Option<&'a T>); N],
) -> Vec<(ProbeKind, &'a T)> {
    tables
        .into_iter()
        .filter_map(|(kind, table)| table.map(|table| (kind, table)))
        .collect()
}

fn view<'a, P, T: TableView + 'a>(
    probe: &'a Option<P>,
    table: impl FnOnce(&'a P) -> &'a T,
) -> Option<&'a dyn TableView> {
    probe.as_ref().map(|p| table(p) as &dyn TableView)
}

fn pending<'a, P, T: Occupancy + 'a>(
    probe: &'a Option<P>,
    table: impl FnOnce(&'a P) -> &'a T,
) -> Option<&'a dyn Occupancy> {
    probe.as_ref().map(|p| table(p) as &dyn Occupancy)
}

fn counting<K: TableKey, R: Record>(cfg: &Config, kind: ProbeKind) -> Option<Sentinel<K, R>> {
    let settings = cfg.probe(kind);
    if !settings.enabled {
        debug!(probe = %kind, "probe disabled");
        return None;
    }
    debug!(probe = %kind, capacity = settings.capacity, "counting probe wired");
    Some(Sentinel::new(kind.as_str(), settings.capacity, cfg.merge_mode))
}

fn pairing(cfg: &Config, kind: ProbeKind) -> Option<WatchdogSizing> {
    let settings = cfg.probe(kind);
    if !settings.enabled {
        debug!(probe = %kind, "probe disabled");
        return None;
    }

    let pairing_capacity = settings.pairing_capacity.unwrap_or(settings.capacity);
    let ceiling = settings.staleness_ceiling.unwrap_or(MAX_CEILING);
    debug!(
        probe = %kind,
        capacity = settings.capacity,
        pairing_capacity,
        ceiling = ?ceiling,
        "pairing probe wired",
    );

    Some(WatchdogSizing {
        capacity: settings.capacity,
        pairing_capacity,
        guard: StalenessGuard::new(ceiling),
        mode: cfg.merge_mode,
    })
}
