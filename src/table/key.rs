use std::fmt;
use std::net::Ipv4Addr;

/// Key of an accumulation or pairing table.
///
/// Keys are plain values that pack into two machine words. Packing must be
/// injective within a key type: two distinct keys never share a packed form.
pub trait TableKey: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    fn pack(&self) -> [u64; 2];
    fn unpack(words: [u64; 2]) -> Self;
}

/// Process identifier (tgid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

/// Control group identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CgroupId(pub u64);

/// Kernel packet drop reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DropReason(pub u32);

/// First eight bytes of a kernel module name, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleKey(pub u64);

/// Socket state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateTransition {
    pub old: u16,
    pub new: u16,
}

/// Tracer/target pair of a ptrace request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TracePair {
    pub tracer: u32,
    pub target: u32,
}

/// Per-process system call number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PidSyscall {
    pub pid: u32,
    pub nr: u32,
}

/// Remote IPv4 endpoint. The port is in host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub daddr: Ipv4Addr,
    pub dport: u16,
}

/// Remote endpoint as seen by one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PidEndpoint {
    pub pid: u32,
    pub daddr: Ipv4Addr,
    pub dport: u16,
}

/// In-flight block request identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    pub dev: u32,
    pub sector: u64,
}

/// Kernel address of a socket.
///
/// Addresses are recycled by the kernel once a socket is freed, so an entry
/// keyed by a stale address can pair with an unrelated later socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SockAddr(pub u64);

impl ModuleKey {
    /// Build the key from a NUL-padded module name.
    pub fn from_name(name: &[u8]) -> Self {
        let mut prefix = [0u8; 8];
        for (dst, src) in prefix.iter_mut().zip(name.iter()) {
            *dst = *src;
        }
        Self(u64::from_le_bytes(prefix))
    }
}

impl Endpoint {
    pub fn new(daddr: Ipv4Addr, dport: u16) -> Self {
        Self { daddr, dport }
    }

    fn packed(&self) -> u64 {
        (u64::from(u32::from(self.daddr)) << 16) | u64::from(self.dport)
    }

    fn from_packed(word: u64) -> Self {
        Self {
            daddr: Ipv4Addr::from((word >> 16) as u32),
            dport: word as u16,
        }
    }
}

impl TableKey for Pid {
    fn pack(&self) -> [u64; 2] {
        [u64::from(self.0), 0]
    }

    fn unpack(words: [u64; 2]) -> Self {
        Self(words[0] as u32)
    }
}

impl TableKey for CgroupId {
    fn pack(&self) -> [u64; 2] {
        [self.0, 0]
    }

    fn unpack(words: [u64; 2]) -> Self {
        Self(words[0])
    }
}

impl TableKey for DropReason {
    fn pack(&self) -> [u64; 2] {
        [u64::from(self.0), 0]
    }

    fn unpack(words: [u64; 2]) -> Self {
        Self(words[0] as u32)
    }
}

impl TableKey for ModuleKey {
    fn pack(&self) -> [u64; 2] {
        [self.0, 0]
    }

    fn unpack(words: [u64; 2]) -> Self {
        Self(words[0])
    }
}

impl TableKey for StateTransition {
    fn pack(&self) -> [u64; 2] {
        [(u64::from(self.old) << 16) | u64::from(self.new), 0]
    }

    fn unpack(words: [u64; 2]) -> Self {
        Self {
            old: (words[0] >> 16) as u16,
            new: words[0] as u16,
        }
    }
}

impl TableKey for TracePair {
    fn pack(&self) -> [u64; 2] {
        [(u64::from(self.tracer) << 32) | u64::from(self.target), 0]
    }

    fn unpack(words: [u64; 2]) -> Self {
        Self {
            tracer: (words[0] >> 32) as u32,
            target: words[0] as u32,
        }
    }
}

impl TableKey for PidSyscall {
    fn pack(&self) -> [u64; 2] {
        [(u64::from(self.pid) << 32) | u64::from(self.nr), 0]
    }

    fn unpack(words: [u64; 2]) -> Self {
        Self {
            pid: (words[0] >> 32) as u32,
            nr: words[0] as u32,
        }
    }
}

impl TableKey for Endpoint {
    fn pack(&self) -> [u64; 2] {
        [self.packed(), 0]
    }

    fn unpack(words: [u64; 2]) -> Self {
        Self::from_packed(words[0])
    }
}

impl TableKey for PidEndpoint {
    fn pack(&self) -> [u64; 2] {
        [
            (u64::from(self.pid) << 32) | u64::from(u32::from(self.daddr)),
            u64::from(self.dport),
        ]
    }

    fn unpack(words: [u64; 2]) -> Self {
        Self {
            pid: (words[0] >> 32) as u32,
            daddr: Ipv4Addr::from(words[0] as u32),
            dport: words[1] as u16,
        }
    }
}

impl TableKey for BlockRequest {
    fn pack(&self) -> [u64; 2] {
        [self.sector, u64::from(self.dev)]
    }

    fn unpack(words: [u64; 2]) -> Self {
        Self {
            dev: words[1] as u32,
            sector: words[0],
        }
    }
}

impl TableKey for SockAddr {
    fn pack(&self) -> [u64; 2] {
        [self.0, 0]
    }

    fn unpack(words: [u64; 2]) -> Self {
        Self(words[0])
    }
}

/// Context value stored beside a pairing table's start timestamp.
pub trait PairContext: Copy + Send + Sync + 'static {
    fn to_word(self) -> u64;
    fn from_word(word: u64) -> Self;
}

impl PairContext for () {
    fn to_word(self) -> u64 {
        0
    }

    fn from_word(_word: u64) -> Self {}
}

impl PairContext for Pid {
    fn to_word(self) -> u64 {
        u64::from(self.0)
    }

    fn from_word(word: u64) -> Self {
        Self(word as u32)
    }
}

impl PairContext for Endpoint {
    fn to_word(self) -> u64 {
        self.packed()
    }

    fn from_word(word: u64) -> Self {
        Self::from_packed(word)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid={}", self.0)
    }
}

impl fmt::Display for CgroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cgroup={}", self.0)
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reason={}", self.0)
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_le_bytes();
        write!(f, "module={}", printable(&bytes))
    }
}

impl fmt::Display for StateTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.old, self.new)
    }
}

impl fmt::Display for TracePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tracer={} target={}", self.tracer, self.target)
    }
}

impl fmt::Display for PidSyscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid={} nr={}", self.pid, self.nr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.daddr, self.dport)
    }
}

impl fmt::Display for PidEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid={} {}:{}", self.pid, self.daddr, self.dport)
    }
}

impl fmt::Display for BlockRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev={} sector={}", self.dev, self.sector)
    }
}

impl fmt::Display for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sock={:#x}", self.0)
    }
}

/// Render a NUL-padded kernel string, stopping at the first NUL.
pub fn printable(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(bytes.get(..end).unwrap_or_default()).into_owned()
}
