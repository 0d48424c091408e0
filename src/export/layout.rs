//! Fixed binary layouts of table keys and records.
//!
//! Every layout is little-endian with the field order, widths and padding of
//! the kernel-side structure, so a raw table dump decodes without any
//! negotiation between writer and reader.

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::table::histogram::NUM_SLOTS;
use crate::table::key::{
    CgroupId, DropReason, Endpoint, ModuleKey, Pid, PidEndpoint, PidSyscall, StateTransition,
    TracePair,
};
use crate::table::record::{
    ByteCountersSnapshot, ConnectLatencySnapshot, CounterSnapshot, Described, ExecFields,
    IoLatencySnapshot, LatencyStatsSnapshot, LatencyTotalsSnapshot, ModuleFields,
    OomVictimSnapshot, PageFaultSnapshot, PtraceFields, ResetFields, RetransFields, RttSnapshot,
    SocketIoSnapshot, SwapCountersSnapshot, WritebackSnapshot,
};
use crate::table::{AccumTable, Record, TableKey};

/// Size of the dump header: entry count, key size, value size.
pub const DUMP_HEADER_SIZE: usize = 12;

/// Errors that can occur when decoding a table dump.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("dump too short: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("key size mismatch: dump has {found}, expected {expected}")]
    KeySize { expected: usize, found: usize },

    #[error("value size mismatch: dump has {found}, expected {expected}")]
    ValueSize { expected: usize, found: usize },

    #[error("field of {size} bytes at offset {offset} out of range")]
    Field { offset: usize, size: usize },
}

/// A value with a fixed binary layout of `SIZE` bytes.
pub trait Layout: Sized {
    const SIZE: usize;

    /// Append exactly `SIZE` bytes to `out`.
    fn encode(&self, out: &mut Vec<u8>);

    /// Decode from a buffer of at least `SIZE` bytes.
    fn decode(buf: &[u8]) -> Result<Self, LayoutError>;
}

// ---------------------------------------------------------------------------
// Field readers
// ---------------------------------------------------------------------------

fn field<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], LayoutError> {
    buf.get(offset..offset + N)
        .and_then(|s| s.try_into().ok())
        .ok_or(LayoutError::Field { offset, size: N })
}

fn u16_at(buf: &[u8], offset: usize) -> Result<u16, LayoutError> {
    field(buf, offset).map(u16::from_le_bytes)
}

fn u32_at(buf: &[u8], offset: usize) -> Result<u32, LayoutError> {
    field(buf, offset).map(u32::from_le_bytes)
}

fn u64_at(buf: &[u8], offset: usize) -> Result<u64, LayoutError> {
    field(buf, offset).map(u64::from_le_bytes)
}

/// IPv4 address stored in network order.
fn ip_at(buf: &[u8], offset: usize) -> Result<Ipv4Addr, LayoutError> {
    field::<4>(buf, offset).map(Ipv4Addr::from)
}

fn pad(out: &mut Vec<u8>, n: usize) {
    out.resize(out.len() + n, 0);
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

impl Layout for Pid {
    const SIZE: usize = 4;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self(u32_at(buf, 0)?))
    }
}

impl Layout for CgroupId {
    const SIZE: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self(u64_at(buf, 0)?))
    }
}

impl Layout for DropReason {
    const SIZE: usize = 4;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self(u32_at(buf, 0)?))
    }
}

impl Layout for ModuleKey {
    const SIZE: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self(u64_at(buf, 0)?))
    }
}

impl Layout for StateTransition {
    const SIZE: usize = 4;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.old.to_le_bytes());
        out.extend_from_slice(&self.new.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            old: u16_at(buf, 0)?,
            new: u16_at(buf, 2)?,
        })
    }
}

impl Layout for TracePair {
    const SIZE: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tracer.to_le_bytes());
        out.extend_from_slice(&self.target.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            tracer: u32_at(buf, 0)?,
            target: u32_at(buf, 4)?,
        })
    }
}

impl Layout for PidSyscall {
    const SIZE: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.pid.to_le_bytes());
        out.extend_from_slice(&self.nr.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            pid: u32_at(buf, 0)?,
            nr: u32_at(buf, 4)?,
        })
    }
}

impl Layout for Endpoint {
    const SIZE: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.daddr.octets());
        out.extend_from_slice(&self.dport.to_le_bytes());
        pad(out, 2);
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            daddr: ip_at(buf, 0)?,
            dport: u16_at(buf, 4)?,
        })
    }
}

impl Layout for PidEndpoint {
    const SIZE: usize = 12;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.pid.to_le_bytes());
        out.extend_from_slice(&self.daddr.octets());
        out.extend_from_slice(&self.dport.to_le_bytes());
        pad(out, 2);
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            pid: u32_at(buf, 0)?,
            daddr: ip_at(buf, 4)?,
            dport: u16_at(buf, 8)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

impl Layout for CounterSnapshot {
    const SIZE: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.count.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            count: u64_at(buf, 0)?,
        })
    }
}

impl Layout for ByteCountersSnapshot {
    const SIZE: usize = 16;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.sent.to_le_bytes());
        out.extend_from_slice(&self.received.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            sent: u64_at(buf, 0)?,
            received: u64_at(buf, 8)?,
        })
    }
}

impl Layout for SwapCountersSnapshot {
    const SIZE: usize = 16;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.read_pages.to_le_bytes());
        out.extend_from_slice(&self.write_pages.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            read_pages: u64_at(buf, 0)?,
            write_pages: u64_at(buf, 8)?,
        })
    }
}

impl Layout for WritebackSnapshot {
    const SIZE: usize = 16;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.total_pages.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            count: u64_at(buf, 0)?,
            total_pages: u64_at(buf, 8)?,
        })
    }
}

impl Layout for LatencyStatsSnapshot {
    const SIZE: usize = 16;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.total_ns.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.max_ns.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            total_ns: u64_at(buf, 0)?,
            count: u32_at(buf, 8)?,
            max_ns: u32_at(buf, 12)?,
        })
    }
}

impl Layout for LatencyTotalsSnapshot {
    const SIZE: usize = 16;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.total_ns.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        pad(out, 4);
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            total_ns: u64_at(buf, 0)?,
            count: u32_at(buf, 8)?,
        })
    }
}

impl Layout for PageFaultSnapshot {
    const SIZE: usize = 16;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.total_ns.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.major_count.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            total_ns: u64_at(buf, 0)?,
            count: u32_at(buf, 8)?,
            major_count: u32_at(buf, 12)?,
        })
    }
}

impl Layout for IoLatencySnapshot {
    const SIZE: usize = 24 + 4 * NUM_SLOTS + 4;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.total_ns.to_le_bytes());
        out.extend_from_slice(&self.max_ns.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        pad(out, 4);
        for slot in &self.slots {
            out.extend_from_slice(&slot.to_le_bytes());
        }
        out.extend_from_slice(&self.dev.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        let mut slots = [0u32; NUM_SLOTS];
        for (i, slot) in slots.iter_mut().enumerate() {
            *slot = u32_at(buf, 24 + 4 * i)?;
        }
        Ok(Self {
            total_ns: u64_at(buf, 0)?,
            max_ns: u64_at(buf, 8)?,
            count: u32_at(buf, 16)?,
            slots,
            dev: u32_at(buf, 24 + 4 * NUM_SLOTS)?,
        })
    }
}

impl Layout for ConnectLatencySnapshot {
    const SIZE: usize = 24;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.total_ns.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.max_ns.to_le_bytes());
        out.extend_from_slice(&self.last_pid.to_le_bytes());
        out.extend_from_slice(&self.daddr.octets());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            total_ns: u64_at(buf, 0)?,
            count: u32_at(buf, 8)?,
            max_ns: u32_at(buf, 12)?,
            last_pid: u32_at(buf, 16)?,
            daddr: ip_at(buf, 20)?,
        })
    }
}

impl Layout for RttSnapshot {
    const SIZE: usize = 24;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.sum_us.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.min_us.to_le_bytes());
        out.extend_from_slice(&self.max_us.to_le_bytes());
        out.extend_from_slice(&self.last_pid.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            sum_us: u64_at(buf, 0)?,
            count: u32_at(buf, 8)?,
            min_us: u32_at(buf, 12)?,
            max_us: u32_at(buf, 16)?,
            last_pid: u32_at(buf, 20)?,
        })
    }
}

impl Layout for SocketIoSnapshot {
    const SIZE: usize = 32;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tx_bytes.to_le_bytes());
        out.extend_from_slice(&self.rx_bytes.to_le_bytes());
        out.extend_from_slice(&self.recv_wait_ns.to_le_bytes());
        out.extend_from_slice(&self.recv_count.to_le_bytes());
        out.extend_from_slice(&self.max_recv_ns.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            tx_bytes: u64_at(buf, 0)?,
            rx_bytes: u64_at(buf, 8)?,
            recv_wait_ns: u64_at(buf, 16)?,
            recv_count: u32_at(buf, 24)?,
            max_recv_ns: u32_at(buf, 28)?,
        })
    }
}

impl Layout for OomVictimSnapshot {
    const SIZE: usize = 24;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.timestamp_ns.to_le_bytes());
        out.extend_from_slice(&self.total_vm.to_le_bytes());
        out.extend_from_slice(&self.anon_rss.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            timestamp_ns: u64_at(buf, 0)?,
            total_vm: u64_at(buf, 8)?,
            anon_rss: u64_at(buf, 16)?,
        })
    }
}

impl Layout for Described<ExecFields> {
    const SIZE: usize = 24 + 16 + 128;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.fields.timestamp_ns.to_le_bytes());
        out.extend_from_slice(&self.fields.ppid.to_le_bytes());
        out.extend_from_slice(&self.fields.uid.to_le_bytes());
        out.extend_from_slice(&self.fields.comm);
        out.extend_from_slice(&self.fields.filename);
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            count: u64_at(buf, 0)?,
            fields: ExecFields {
                timestamp_ns: u64_at(buf, 8)?,
                ppid: u32_at(buf, 16)?,
                uid: u32_at(buf, 20)?,
                comm: field(buf, 24)?,
                filename: field(buf, 40)?,
            },
        })
    }
}

impl Layout for Described<ModuleFields> {
    const SIZE: usize = 16 + 56;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.fields.timestamp_ns.to_le_bytes());
        out.extend_from_slice(&self.fields.name);
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            count: u64_at(buf, 0)?,
            fields: ModuleFields {
                timestamp_ns: u64_at(buf, 8)?,
                name: field(buf, 16)?,
            },
        })
    }
}

impl Layout for Described<PtraceFields> {
    const SIZE: usize = 24 + 16;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.fields.timestamp_ns.to_le_bytes());
        out.extend_from_slice(&self.fields.request.to_le_bytes());
        out.extend_from_slice(&self.fields.comm);
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            count: u64_at(buf, 0)?,
            fields: PtraceFields {
                timestamp_ns: u64_at(buf, 8)?,
                request: u64_at(buf, 16)?,
                comm: field(buf, 24)?,
            },
        })
    }
}

impl Layout for Described<ResetFields> {
    const SIZE: usize = 16;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.fields.daddr.octets());
        out.extend_from_slice(&self.fields.dport.to_le_bytes());
        pad(out, 2);
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            count: u64_at(buf, 0)?,
            fields: ResetFields {
                daddr: ip_at(buf, 8)?,
                dport: u16_at(buf, 12)?,
            },
        })
    }
}

/// The retransmit record keeps a 32-bit count; larger counts saturate.
impl Layout for Described<RetransFields> {
    const SIZE: usize = 12;

    fn encode(&self, out: &mut Vec<u8>) {
        let count = u32::try_from(self.count).unwrap_or(u32::MAX);
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&self.fields.sport.to_le_bytes());
        out.extend_from_slice(&self.fields.dport.to_le_bytes());
        out.extend_from_slice(&self.fields.daddr.octets());
    }

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            count: u64::from(u32_at(buf, 0)?),
            fields: RetransFields {
                sport: u16_at(buf, 4)?,
                dport: u16_at(buf, 6)?,
                daddr: ip_at(buf, 8)?,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Table dumps
// ---------------------------------------------------------------------------

/// Raw contents of an accumulation table: packed `(key, value)` entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDump {
    pub entries: usize,
    pub key_size: usize,
    pub value_size: usize,
    pub data: Vec<u8>,
}

impl TableDump {
    /// Serialize as `[entries u32][key_size u32][value_size u32]` followed
    /// by the packed entries.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DUMP_HEADER_SIZE + self.data.len());
        for n in [self.entries, self.key_size, self.value_size] {
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        out.extend_from_slice(&self.data);
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, LayoutError> {
        if buf.len() < DUMP_HEADER_SIZE {
            return Err(LayoutError::Truncated {
                needed: DUMP_HEADER_SIZE,
                available: buf.len(),
            });
        }
        let entries = u32_at(buf, 0)? as usize;
        let key_size = u32_at(buf, 4)? as usize;
        let value_size = u32_at(buf, 8)? as usize;

        let needed = entries
            .saturating_mul(key_size.saturating_add(value_size))
            .saturating_add(DUMP_HEADER_SIZE);
        if buf.len() < needed {
            return Err(LayoutError::Truncated {
                needed,
                available: buf.len(),
            });
        }

        Ok(Self {
            entries,
            key_size,
            value_size,
            data: buf[DUMP_HEADER_SIZE..needed].to_vec(),
        })
    }

    /// Decode typed entries, rejecting a dump written for other layouts.
    pub fn decode<K: Layout, V: Layout>(&self) -> Result<Vec<(K, V)>, LayoutError> {
        if self.key_size != K::SIZE {
            return Err(LayoutError::KeySize {
                expected: K::SIZE,
                found: self.key_size,
            });
        }
        if self.value_size != V::SIZE {
            return Err(LayoutError::ValueSize {
                expected: V::SIZE,
                found: self.value_size,
            });
        }

        let stride = K::SIZE + V::SIZE;
        let needed = self.entries * stride;
        if self.data.len() < needed {
            return Err(LayoutError::Truncated {
                needed,
                available: self.data.len(),
            });
        }

        self.data
            .chunks_exact(stride)
            .take(self.entries)
            .map(|entry| Ok((K::decode(entry)?, V::decode(&entry[K::SIZE..])?)))
            .collect()
    }
}

impl<K, R> AccumTable<K, R>
where
    K: TableKey + Layout,
    R: Record,
    R::Snapshot: Layout,
{
    /// Raw dump of every published entry.
    pub fn dump(&self) -> TableDump {
        let entries = self.snapshot();
        let stride = K::SIZE + R::Snapshot::SIZE;
        let mut data = Vec::with_capacity(entries.len() * stride);
        for (key, value) in &entries {
            key.encode(&mut data);
            value.encode(&mut data);
        }
        TableDump {
            entries: entries.len(),
            key_size: K::SIZE,
            value_size: R::Snapshot::SIZE,
            data,
        }
    }
}
