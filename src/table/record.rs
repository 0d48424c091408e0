//! Fixed-shape records stored in accumulation tables, and the samples merged
//! into them.
//!
//! Every record is made of atomics, is all-zero on creation and is reset to
//! all-zero when its slot is reused.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};

use super::histogram::{Histogram, NUM_SLOTS};
use super::merge::{
    accumulate, clamp_u32, increment, increment_u32, track_max_u32, track_max_u64,
    track_min_nonzero_u32, MergeMode,
};

/// A record type stored in an accumulation table.
pub trait Record: Default + Send + Sync + 'static {
    /// Plain-value view of the record.
    type Snapshot: Copy + fmt::Debug + PartialEq + Send + 'static;

    fn snapshot(&self) -> Self::Snapshot;

    /// Zero every field.
    fn reset(&self);
}

/// Folds a sample of type `S` into a record.
pub trait Merge<S>: Record {
    fn merge(&self, sample: S, mode: MergeMode);
}

/// Primary monotonically growing quantity of a snapshot, used for deltas
/// and rates between reads.
pub trait Tally {
    fn tally(&self) -> u64;
}

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

/// One occurrence.
#[derive(Debug, Clone, Copy)]
pub struct Hit;

/// Bytes transmitted.
#[derive(Debug, Clone, Copy)]
pub struct Sent(pub u64);

/// Bytes received.
#[derive(Debug, Clone, Copy)]
pub struct Received(pub u64);

/// A begin-to-end duration in nanoseconds.
#[derive(Debug, Clone, Copy)]
pub struct Elapsed(pub u64);

#[derive(Debug, Clone, Copy)]
pub struct Fault {
    pub elapsed_ns: u64,
    pub major: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct BlockIo {
    pub elapsed_ns: u64,
    pub dev: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Connect {
    pub elapsed_ns: u64,
    pub pid: u32,
    pub daddr: Ipv4Addr,
}

#[derive(Debug, Clone, Copy)]
pub struct RttSample {
    pub srtt_us: u32,
    pub pid: u32,
}

/// Pages waited on during writeback.
#[derive(Debug, Clone, Copy)]
pub struct Pages(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapPage {
    Read,
    Write,
}

// ---------------------------------------------------------------------------
// Atomic field helpers
// ---------------------------------------------------------------------------

/// Fixed-size byte string stored as atomic words.
pub struct AtomicBytes<const WORDS: usize>([AtomicU64; WORDS]);

impl<const WORDS: usize> AtomicBytes<WORDS> {
    /// Overwrite with `bytes`, truncating or zero-padding to the field size.
    pub fn store(&self, bytes: &[u8]) {
        for (i, word) in self.0.iter().enumerate() {
            let mut chunk = [0u8; 8];
            if let Some(src) = bytes.get(i * 8..) {
                for (dst, b) in chunk.iter_mut().zip(src.iter()) {
                    *dst = *b;
                }
            }
            word.store(u64::from_le_bytes(chunk), Ordering::Relaxed);
        }
    }

    pub fn load<const N: usize>(&self) -> [u8; N] {
        let mut out = [0u8; N];
        for (chunk, word) in out.chunks_mut(8).zip(self.0.iter()) {
            let bytes = word.load(Ordering::Relaxed).to_le_bytes();
            for (dst, b) in chunk.iter_mut().zip(bytes.iter()) {
                *dst = *b;
            }
        }
        out
    }

    pub fn clear(&self) {
        for word in &self.0 {
            word.store(0, Ordering::Relaxed);
        }
    }
}

impl<const WORDS: usize> Default for AtomicBytes<WORDS> {
    fn default() -> Self {
        Self(std::array::from_fn(|_| AtomicU64::new(0)))
    }
}

/// Network-order IPv4 address as it sits in kernel memory.
fn ip_to_raw(ip: Ipv4Addr) -> u32 {
    u32::from_le_bytes(ip.octets())
}

fn raw_to_ip(raw: u32) -> Ipv4Addr {
    Ipv4Addr::from(raw.to_le_bytes())
}

// ---------------------------------------------------------------------------
// Counter
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Counter {
    count: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub count: u64,
}

impl Record for Counter {
    type Snapshot = CounterSnapshot;

    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            count: self.count.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }
}

impl Merge<Hit> for Counter {
    #[inline]
    fn merge(&self, _sample: Hit, _mode: MergeMode) {
        increment(&self.count);
    }
}

impl Tally for CounterSnapshot {
    fn tally(&self) -> u64 {
        self.count
    }
}

// ---------------------------------------------------------------------------
// Byte and page counters
// ---------------------------------------------------------------------------

/// Transmitted and received byte totals.
#[derive(Default)]
pub struct ByteCounters {
    sent: AtomicU64,
    received: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteCountersSnapshot {
    pub sent: u64,
    pub received: u64,
}

impl Record for ByteCounters {
    type Snapshot = ByteCountersSnapshot;

    fn snapshot(&self) -> ByteCountersSnapshot {
        ByteCountersSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.received.store(0, Ordering::Relaxed);
    }
}

impl Merge<Sent> for ByteCounters {
    #[inline]
    fn merge(&self, sample: Sent, _mode: MergeMode) {
        accumulate(&self.sent, sample.0);
    }
}

impl Merge<Received> for ByteCounters {
    #[inline]
    fn merge(&self, sample: Received, _mode: MergeMode) {
        accumulate(&self.received, sample.0);
    }
}

impl Tally for ByteCountersSnapshot {
    fn tally(&self) -> u64 {
        self.sent.wrapping_add(self.received)
    }
}

/// Swapped-in and swapped-out page counts.
#[derive(Default)]
pub struct SwapCounters {
    read_pages: AtomicU64,
    write_pages: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwapCountersSnapshot {
    pub read_pages: u64,
    pub write_pages: u64,
}

impl Record for SwapCounters {
    type Snapshot = SwapCountersSnapshot;

    fn snapshot(&self) -> SwapCountersSnapshot {
        SwapCountersSnapshot {
            read_pages: self.read_pages.load(Ordering::Relaxed),
            write_pages: self.write_pages.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.read_pages.store(0, Ordering::Relaxed);
        self.write_pages.store(0, Ordering::Relaxed);
    }
}

impl Merge<SwapPage> for SwapCounters {
    #[inline]
    fn merge(&self, sample: SwapPage, _mode: MergeMode) {
        match sample {
            SwapPage::Read => increment(&self.read_pages),
            SwapPage::Write => increment(&self.write_pages),
        }
    }
}

impl Tally for SwapCountersSnapshot {
    fn tally(&self) -> u64 {
        self.read_pages.wrapping_add(self.write_pages)
    }
}

/// Writeback stalls and the pages they waited on.
#[derive(Default)]
pub struct WritebackStats {
    count: AtomicU64,
    total_pages: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WritebackSnapshot {
    pub count: u64,
    pub total_pages: u64,
}

impl Record for WritebackStats {
    type Snapshot = WritebackSnapshot;

    fn snapshot(&self) -> WritebackSnapshot {
        WritebackSnapshot {
            count: self.count.load(Ordering::Relaxed),
            total_pages: self.total_pages.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.total_pages.store(0, Ordering::Relaxed);
    }
}

impl Merge<Pages> for WritebackStats {
    #[inline]
    fn merge(&self, sample: Pages, _mode: MergeMode) {
        increment(&self.count);
        accumulate(&self.total_pages, sample.0);
    }
}

impl Tally for WritebackSnapshot {
    fn tally(&self) -> u64 {
        self.count
    }
}

// ---------------------------------------------------------------------------
// Latency records
// ---------------------------------------------------------------------------

/// Total, count and clamped maximum of a duration.
#[derive(Default)]
pub struct LatencyStats {
    total_ns: AtomicU64,
    count: AtomicU32,
    max_ns: AtomicU32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyStatsSnapshot {
    pub total_ns: u64,
    pub count: u32,
    pub max_ns: u32,
}

impl LatencyStats {
    #[inline]
    fn add(&self, elapsed_ns: u64, mode: MergeMode) {
        accumulate(&self.total_ns, elapsed_ns);
        increment_u32(&self.count);
        track_max_u32(&self.max_ns, clamp_u32(elapsed_ns), mode);
    }
}

impl Record for LatencyStats {
    type Snapshot = LatencyStatsSnapshot;

    fn snapshot(&self) -> LatencyStatsSnapshot {
        LatencyStatsSnapshot {
            total_ns: self.total_ns.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
            max_ns: self.max_ns.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.total_ns.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        self.max_ns.store(0, Ordering::Relaxed);
    }
}

impl Merge<Elapsed> for LatencyStats {
    #[inline]
    fn merge(&self, sample: Elapsed, mode: MergeMode) {
        self.add(sample.0, mode);
    }
}

impl Tally for LatencyStatsSnapshot {
    fn tally(&self) -> u64 {
        u64::from(self.count)
    }
}

impl LatencyStatsSnapshot {
    pub fn mean_ns(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_ns / u64::from(self.count)
        }
    }
}

/// Total and count of a duration, no maximum.
#[derive(Default)]
pub struct LatencyTotals {
    total_ns: AtomicU64,
    count: AtomicU32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyTotalsSnapshot {
    pub total_ns: u64,
    pub count: u32,
}

impl Record for LatencyTotals {
    type Snapshot = LatencyTotalsSnapshot;

    fn snapshot(&self) -> LatencyTotalsSnapshot {
        LatencyTotalsSnapshot {
            total_ns: self.total_ns.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.total_ns.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
    }
}

impl Merge<Elapsed> for LatencyTotals {
    #[inline]
    fn merge(&self, sample: Elapsed, _mode: MergeMode) {
        accumulate(&self.total_ns, sample.0);
        increment_u32(&self.count);
    }
}

impl Tally for LatencyTotalsSnapshot {
    fn tally(&self) -> u64 {
        u64::from(self.count)
    }
}

/// Page fault handling time, split out by major faults.
#[derive(Default)]
pub struct PageFaultStats {
    total_ns: AtomicU64,
    count: AtomicU32,
    major_count: AtomicU32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageFaultSnapshot {
    pub total_ns: u64,
    pub count: u32,
    pub major_count: u32,
}

impl Record for PageFaultStats {
    type Snapshot = PageFaultSnapshot;

    fn snapshot(&self) -> PageFaultSnapshot {
        PageFaultSnapshot {
            total_ns: self.total_ns.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
            major_count: self.major_count.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.total_ns.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        self.major_count.store(0, Ordering::Relaxed);
    }
}

impl Merge<Fault> for PageFaultStats {
    #[inline]
    fn merge(&self, sample: Fault, _mode: MergeMode) {
        accumulate(&self.total_ns, sample.elapsed_ns);
        increment_u32(&self.count);
        if sample.major {
            increment_u32(&self.major_count);
        }
    }
}

impl Tally for PageFaultSnapshot {
    fn tally(&self) -> u64 {
        u64::from(self.count)
    }
}

/// Block I/O latency with a log2 histogram and the device last seen.
#[derive(Default)]
pub struct IoLatency {
    total_ns: AtomicU64,
    max_ns: AtomicU64,
    count: AtomicU32,
    histogram: Histogram,
    dev: AtomicU32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoLatencySnapshot {
    pub total_ns: u64,
    pub max_ns: u64,
    pub count: u32,
    pub slots: [u32; NUM_SLOTS],
    pub dev: u32,
}

impl Record for IoLatency {
    type Snapshot = IoLatencySnapshot;

    fn snapshot(&self) -> IoLatencySnapshot {
        IoLatencySnapshot {
            total_ns: self.total_ns.load(Ordering::Relaxed),
            max_ns: self.max_ns.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
            slots: self.histogram.snapshot(),
            dev: self.dev.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.total_ns.store(0, Ordering::Relaxed);
        self.max_ns.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        self.histogram.reset();
        self.dev.store(0, Ordering::Relaxed);
    }
}

impl Merge<BlockIo> for IoLatency {
    #[inline]
    fn merge(&self, sample: BlockIo, mode: MergeMode) {
        accumulate(&self.total_ns, sample.elapsed_ns);
        increment_u32(&self.count);
        track_max_u64(&self.max_ns, sample.elapsed_ns, mode);
        self.histogram.record_ns(sample.elapsed_ns);
        self.dev.store(sample.dev, Ordering::Relaxed);
    }
}

impl Tally for IoLatencySnapshot {
    fn tally(&self) -> u64 {
        u64::from(self.count)
    }
}

/// TCP connect latency with the last connecting pid and destination.
#[derive(Default)]
pub struct ConnectLatency {
    stats: LatencyStats,
    last_pid: AtomicU32,
    daddr: AtomicU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectLatencySnapshot {
    pub total_ns: u64,
    pub count: u32,
    pub max_ns: u32,
    pub last_pid: u32,
    pub daddr: Ipv4Addr,
}

impl Record for ConnectLatency {
    type Snapshot = ConnectLatencySnapshot;

    fn snapshot(&self) -> ConnectLatencySnapshot {
        let stats = self.stats.snapshot();
        ConnectLatencySnapshot {
            total_ns: stats.total_ns,
            count: stats.count,
            max_ns: stats.max_ns,
            last_pid: self.last_pid.load(Ordering::Relaxed),
            daddr: raw_to_ip(self.daddr.load(Ordering::Relaxed)),
        }
    }

    fn reset(&self) {
        self.stats.reset();
        self.last_pid.store(0, Ordering::Relaxed);
        self.daddr.store(0, Ordering::Relaxed);
    }
}

impl Merge<Connect> for ConnectLatency {
    #[inline]
    fn merge(&self, sample: Connect, mode: MergeMode) {
        self.stats.add(sample.elapsed_ns, mode);
        self.last_pid.store(sample.pid, Ordering::Relaxed);
        self.daddr.store(ip_to_raw(sample.daddr), Ordering::Relaxed);
    }
}

impl Tally for ConnectLatencySnapshot {
    fn tally(&self) -> u64 {
        u64::from(self.count)
    }
}

/// Smoothed round-trip time statistics in microseconds.
#[derive(Default)]
pub struct RttStats {
    sum_us: AtomicU64,
    count: AtomicU32,
    min_us: AtomicU32,
    max_us: AtomicU32,
    last_pid: AtomicU32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RttSnapshot {
    pub sum_us: u64,
    pub count: u32,
    pub min_us: u32,
    pub max_us: u32,
    pub last_pid: u32,
}

impl Record for RttStats {
    type Snapshot = RttSnapshot;

    fn snapshot(&self) -> RttSnapshot {
        RttSnapshot {
            sum_us: self.sum_us.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
            min_us: self.min_us.load(Ordering::Relaxed),
            max_us: self.max_us.load(Ordering::Relaxed),
            last_pid: self.last_pid.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.sum_us.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        self.min_us.store(0, Ordering::Relaxed);
        self.max_us.store(0, Ordering::Relaxed);
        self.last_pid.store(0, Ordering::Relaxed);
    }
}

impl Merge<RttSample> for RttStats {
    #[inline]
    fn merge(&self, sample: RttSample, mode: MergeMode) {
        accumulate(&self.sum_us, u64::from(sample.srtt_us));
        increment_u32(&self.count);
        track_min_nonzero_u32(&self.min_us, sample.srtt_us, mode);
        track_max_u32(&self.max_us, sample.srtt_us, mode);
        self.last_pid.store(sample.pid, Ordering::Relaxed);
    }
}

impl Tally for RttSnapshot {
    fn tally(&self) -> u64 {
        u64::from(self.count)
    }
}

/// Per-connection socket traffic and receive wait time.
#[derive(Default)]
pub struct SocketIo {
    tx_bytes: AtomicU64,
    rx_bytes: AtomicU64,
    recv_wait_ns: AtomicU64,
    recv_count: AtomicU32,
    max_recv_ns: AtomicU32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketIoSnapshot {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub recv_wait_ns: u64,
    pub recv_count: u32,
    pub max_recv_ns: u32,
}

impl Record for SocketIo {
    type Snapshot = SocketIoSnapshot;

    fn snapshot(&self) -> SocketIoSnapshot {
        SocketIoSnapshot {
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            recv_wait_ns: self.recv_wait_ns.load(Ordering::Relaxed),
            recv_count: self.recv_count.load(Ordering::Relaxed),
            max_recv_ns: self.max_recv_ns.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.tx_bytes.store(0, Ordering::Relaxed);
        self.rx_bytes.store(0, Ordering::Relaxed);
        self.recv_wait_ns.store(0, Ordering::Relaxed);
        self.recv_count.store(0, Ordering::Relaxed);
        self.max_recv_ns.store(0, Ordering::Relaxed);
    }
}

impl Merge<Sent> for SocketIo {
    #[inline]
    fn merge(&self, sample: Sent, _mode: MergeMode) {
        accumulate(&self.tx_bytes, sample.0);
    }
}

impl Merge<Received> for SocketIo {
    #[inline]
    fn merge(&self, sample: Received, _mode: MergeMode) {
        accumulate(&self.rx_bytes, sample.0);
    }
}

impl Merge<Elapsed> for SocketIo {
    #[inline]
    fn merge(&self, sample: Elapsed, mode: MergeMode) {
        accumulate(&self.recv_wait_ns, sample.0);
        increment_u32(&self.recv_count);
        track_max_u32(&self.max_recv_ns, clamp_u32(sample.0), mode);
    }
}

impl Tally for SocketIoSnapshot {
    fn tally(&self) -> u64 {
        self.tx_bytes.wrapping_add(self.rx_bytes)
    }
}

// ---------------------------------------------------------------------------
// OOM victims
// ---------------------------------------------------------------------------

/// Memory footprint of a process picked by the OOM killer. Overwritten on
/// every selection.
#[derive(Default)]
pub struct OomVictim {
    timestamp_ns: AtomicU64,
    total_vm: AtomicU64,
    anon_rss: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OomVictimSnapshot {
    pub timestamp_ns: u64,
    pub total_vm: u64,
    pub anon_rss: u64,
}

impl Record for OomVictim {
    type Snapshot = OomVictimSnapshot;

    fn snapshot(&self) -> OomVictimSnapshot {
        OomVictimSnapshot {
            timestamp_ns: self.timestamp_ns.load(Ordering::Relaxed),
            total_vm: self.total_vm.load(Ordering::Relaxed),
            anon_rss: self.anon_rss.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.timestamp_ns.store(0, Ordering::Relaxed);
        self.total_vm.store(0, Ordering::Relaxed);
        self.anon_rss.store(0, Ordering::Relaxed);
    }
}

impl Merge<OomVictimSnapshot> for OomVictim {
    #[inline]
    fn merge(&self, sample: OomVictimSnapshot, _mode: MergeMode) {
        self.timestamp_ns
            .store(sample.timestamp_ns, Ordering::Relaxed);
        self.total_vm.store(sample.total_vm, Ordering::Relaxed);
        self.anon_rss.store(sample.anon_rss, Ordering::Relaxed);
    }
}

impl Tally for OomVictimSnapshot {
    fn tally(&self) -> u64 {
        1
    }
}

// ---------------------------------------------------------------------------
// Descriptive counters
// ---------------------------------------------------------------------------

/// Descriptive fields stored beside a counter. Every sample overwrites them.
pub trait Descriptor: Default + Send + Sync + 'static {
    type Fields: Copy + fmt::Debug + PartialEq + Send + 'static;

    fn store(&self, fields: &Self::Fields);
    fn load(&self) -> Self::Fields;
    fn clear(&self);
}

/// Event counter carrying the descriptive fields of its latest event.
#[derive(Default)]
pub struct DescriptiveCounter<D> {
    count: AtomicU64,
    fields: D,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Described<F> {
    pub count: u64,
    pub fields: F,
}

impl<D: Descriptor> Record for DescriptiveCounter<D> {
    type Snapshot = Described<D::Fields>;

    fn snapshot(&self) -> Self::Snapshot {
        Described {
            count: self.count.load(Ordering::Relaxed),
            fields: self.fields.load(),
        }
    }

    fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.fields.clear();
    }
}

impl<D: Descriptor> Merge<D::Fields> for DescriptiveCounter<D> {
    #[inline]
    fn merge(&self, sample: D::Fields, _mode: MergeMode) {
        increment(&self.count);
        self.fields.store(&sample);
    }
}

impl<F> Tally for Described<F> {
    fn tally(&self) -> u64 {
        self.count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecFields {
    pub timestamp_ns: u64,
    pub ppid: u32,
    pub uid: u32,
    pub comm: [u8; 16],
    pub filename: [u8; 128],
}

#[derive(Default)]
pub struct ExecInfo {
    timestamp_ns: AtomicU64,
    ppid: AtomicU32,
    uid: AtomicU32,
    comm: AtomicBytes<2>,
    filename: AtomicBytes<16>,
}

impl Descriptor for ExecInfo {
    type Fields = ExecFields;

    fn store(&self, f: &ExecFields) {
        self.timestamp_ns.store(f.timestamp_ns, Ordering::Relaxed);
        self.ppid.store(f.ppid, Ordering::Relaxed);
        self.uid.store(f.uid, Ordering::Relaxed);
        self.comm.store(&f.comm);
        self.filename.store(&f.filename);
    }

    fn load(&self) -> ExecFields {
        ExecFields {
            timestamp_ns: self.timestamp_ns.load(Ordering::Relaxed),
            ppid: self.ppid.load(Ordering::Relaxed),
            uid: self.uid.load(Ordering::Relaxed),
            comm: self.comm.load(),
            filename: self.filename.load(),
        }
    }

    fn clear(&self) {
        self.timestamp_ns.store(0, Ordering::Relaxed);
        self.ppid.store(0, Ordering::Relaxed);
        self.uid.store(0, Ordering::Relaxed);
        self.comm.clear();
        self.filename.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleFields {
    pub timestamp_ns: u64,
    pub name: [u8; 56],
}

#[derive(Default)]
pub struct ModuleInfo {
    timestamp_ns: AtomicU64,
    name: AtomicBytes<7>,
}

impl Descriptor for ModuleInfo {
    type Fields = ModuleFields;

    fn store(&self, f: &ModuleFields) {
        self.timestamp_ns.store(f.timestamp_ns, Ordering::Relaxed);
        self.name.store(&f.name);
    }

    fn load(&self) -> ModuleFields {
        ModuleFields {
            timestamp_ns: self.timestamp_ns.load(Ordering::Relaxed),
            name: self.name.load(),
        }
    }

    fn clear(&self) {
        self.timestamp_ns.store(0, Ordering::Relaxed);
        self.name.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtraceFields {
    pub timestamp_ns: u64,
    pub request: u64,
    pub comm: [u8; 16],
}

#[derive(Default)]
pub struct PtraceInfo {
    timestamp_ns: AtomicU64,
    request: AtomicU64,
    comm: AtomicBytes<2>,
}

impl Descriptor for PtraceInfo {
    type Fields = PtraceFields;

    fn store(&self, f: &PtraceFields) {
        self.timestamp_ns.store(f.timestamp_ns, Ordering::Relaxed);
        self.request.store(f.request, Ordering::Relaxed);
        self.comm.store(&f.comm);
    }

    fn load(&self) -> PtraceFields {
        PtraceFields {
            timestamp_ns: self.timestamp_ns.load(Ordering::Relaxed),
            request: self.request.load(Ordering::Relaxed),
            comm: self.comm.load(),
        }
    }

    fn clear(&self) {
        self.timestamp_ns.store(0, Ordering::Relaxed);
        self.request.store(0, Ordering::Relaxed);
        self.comm.clear();
    }
}

/// Destination of the latest reset sent by a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetFields {
    pub daddr: Ipv4Addr,
    pub dport: u16,
}

#[derive(Default)]
pub struct ResetInfo {
    daddr: AtomicU32,
    dport: AtomicU16,
}

impl Descriptor for ResetInfo {
    type Fields = ResetFields;

    fn store(&self, f: &ResetFields) {
        self.daddr.store(ip_to_raw(f.daddr), Ordering::Relaxed);
        self.dport.store(f.dport, Ordering::Relaxed);
    }

    fn load(&self) -> ResetFields {
        ResetFields {
            daddr: raw_to_ip(self.daddr.load(Ordering::Relaxed)),
            dport: self.dport.load(Ordering::Relaxed),
        }
    }

    fn clear(&self) {
        self.daddr.store(0, Ordering::Relaxed);
        self.dport.store(0, Ordering::Relaxed);
    }
}

/// Connection of the latest retransmission by a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransFields {
    pub sport: u16,
    pub dport: u16,
    pub daddr: Ipv4Addr,
}

#[derive(Default)]
pub struct RetransInfo {
    sport: AtomicU16,
    dport: AtomicU16,
    daddr: AtomicU32,
}

impl Descriptor for RetransInfo {
    type Fields = RetransFields;

    fn store(&self, f: &RetransFields) {
        self.sport.store(f.sport, Ordering::Relaxed);
        self.dport.store(f.dport, Ordering::Relaxed);
        self.daddr.store(ip_to_raw(f.daddr), Ordering::Relaxed);
    }

    fn load(&self) -> RetransFields {
        RetransFields {
            sport: self.sport.load(Ordering::Relaxed),
            dport: self.dport.load(Ordering::Relaxed),
            daddr: raw_to_ip(self.daddr.load(Ordering::Relaxed)),
        }
    }

    fn clear(&self) {
        self.sport.store(0, Ordering::Relaxed);
        self.dport.store(0, Ordering::Relaxed);
        self.daddr.store(0, Ordering::Relaxed);
    }
}

pub type ExecRecord = DescriptiveCounter<ExecInfo>;
pub type ModuleRecord = DescriptiveCounter<ModuleInfo>;
pub type PtraceRecord = DescriptiveCounter<PtraceInfo>;
pub type ResetRecord = DescriptiveCounter<ResetInfo>;
pub type RetransRecord = DescriptiveCounter<RetransInfo>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_stats_clamps_max() {
        let stats = LatencyStats::default();
        stats.merge(Elapsed(1_000), MergeMode::Relaxed);
        stats.merge(Elapsed(10_000_000_000), MergeMode::Relaxed);

        let snap = stats.snapshot();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.total_ns, 10_000_001_000);
        assert_eq!(snap.max_ns, u32::MAX);
        assert_eq!(snap.mean_ns(), 5_000_000_500);
    }

    #[test]
    fn test_io_latency_keeps_unclamped_max_and_last_dev() {
        let io = IoLatency::default();
        io.merge(
            BlockIo {
                elapsed_ns: 5_000_000_000,
                dev: 8,
            },
            MergeMode::Strict,
        );
        io.merge(
            BlockIo {
                elapsed_ns: 2_000,
                dev: 9,
            },
            MergeMode::Strict,
        );

        let snap = io.snapshot();
        assert_eq!(snap.max_ns, 5_000_000_000);
        assert_eq!(snap.dev, 9);
        assert_eq!(snap.count, 2);
        assert_eq!(snap.slots[1], 1);
        assert_eq!(snap.slots[15], 1);
    }

    #[test]
    fn test_page_fault_counts_major() {
        let pf = PageFaultStats::default();
        pf.merge(
            Fault {
                elapsed_ns: 100,
                major: true,
            },
            MergeMode::Relaxed,
        );
        pf.merge(
            Fault {
                elapsed_ns: 50,
                major: false,
            },
            MergeMode::Relaxed,
        );
        assert_eq!(
            pf.snapshot(),
            PageFaultSnapshot {
                total_ns: 150,
                count: 2,
                major_count: 1,
            }
        );
    }

    #[test]
    fn test_rtt_min_ignores_unset() {
        let rtt = RttStats::default();
        rtt.merge(RttSample { srtt_us: 300, pid: 1 }, MergeMode::Relaxed);
        rtt.merge(RttSample { srtt_us: 100, pid: 2 }, MergeMode::Relaxed);
        rtt.merge(RttSample { srtt_us: 200, pid: 3 }, MergeMode::Relaxed);

        let snap = rtt.snapshot();
        assert_eq!(snap.min_us, 100);
        assert_eq!(snap.max_us, 300);
        assert_eq!(snap.sum_us, 600);
        assert_eq!(snap.last_pid, 3);
    }

    #[test]
    fn test_descriptive_counter_overwrites_fields() {
        let rec = ModuleRecord::default();
        let mut name = [0u8; 56];
        name[..3].copy_from_slice(b"kvm");
        rec.merge(
            ModuleFields {
                timestamp_ns: 1,
                name,
            },
            MergeMode::Relaxed,
        );
        name[..3].copy_from_slice(b"xfs");
        rec.merge(
            ModuleFields {
                timestamp_ns: 2,
                name,
            },
            MergeMode::Relaxed,
        );

        let snap = rec.snapshot();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.fields.timestamp_ns, 2);
        assert_eq!(&snap.fields.name[..3], b"xfs");

        rec.reset();
        assert_eq!(rec.snapshot().count, 0);
        assert_eq!(rec.snapshot().fields.name, [0u8; 56]);
    }

    #[test]
    fn test_atomic_bytes_truncates_and_pads() {
        let bytes: AtomicBytes<2> = AtomicBytes::default();
        bytes.store(b"0123456789abcdefOVERFLOW");
        let full: [u8; 16] = bytes.load();
        assert_eq!(&full, b"0123456789abcdef");

        bytes.store(b"sh");
        let short: [u8; 16] = bytes.load();
        assert_eq!(&short[..3], b"sh\0");
        assert!(short[2..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_connect_latency_keeps_network_address() {
        let rec = ConnectLatency::default();
        rec.merge(
            Connect {
                elapsed_ns: 250_000,
                pid: 77,
                daddr: Ipv4Addr::new(10, 0, 0, 5),
            },
            MergeMode::Relaxed,
        );
        let snap = rec.snapshot();
        assert_eq!(snap.daddr, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(snap.last_pid, 77);
        assert_eq!(snap.max_ns, 250_000);
    }

    #[test]
    fn test_socket_io_merges_each_direction() {
        let rec = SocketIo::default();
        rec.merge(Sent(100), MergeMode::Relaxed);
        rec.merge(Received(40), MergeMode::Relaxed);
        rec.merge(Elapsed(7_000), MergeMode::Relaxed);
        rec.merge(Elapsed(3_000), MergeMode::Relaxed);

        let snap = rec.snapshot();
        assert_eq!(snap.tx_bytes, 100);
        assert_eq!(snap.rx_bytes, 40);
        assert_eq!(snap.recv_wait_ns, 10_000);
        assert_eq!(snap.recv_count, 2);
        assert_eq!(snap.max_recv_ns, 7_000);
        assert_eq!(snap.tally(), 140);
    }
}
