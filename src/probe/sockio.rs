//! Per-connection socket traffic: transmitted and received bytes counted
//! directly, plus receive wait time paired from `tcp_recvmsg` entry to exit.

use crate::table::key::{Endpoint, Pid, PidEndpoint};
use crate::table::record::{Elapsed, Received, Sent, SocketIo};
use crate::table::{AccumTable, PairingTable};

use super::event::{Header, SockRef, TcpCleanupRbuf, TcpRecvEnter, TcpRecvExit, TcpSend};
use super::watchdog::WatchdogSizing;
use super::{OnEvent, Outcome};

pub struct SockIo {
    pending: PairingTable<Pid, Endpoint>,
    table: AccumTable<PidEndpoint, SocketIo>,
}

impl SockIo {
    pub fn new(name: &'static str, sizing: WatchdogSizing) -> Self {
        Self {
            pending: PairingTable::new(name, sizing.pairing_capacity, sizing.guard),
            table: AccumTable::new(name, sizing.capacity, sizing.mode),
        }
    }

    pub fn table(&self) -> &AccumTable<PidEndpoint, SocketIo> {
        &self.table
    }

    pub fn pending(&self) -> &PairingTable<Pid, Endpoint> {
        &self.pending
    }
}

fn connection(pid: u32, sock: &SockRef) -> PidEndpoint {
    PidEndpoint {
        pid,
        daddr: sock.daddr,
        dport: sock.dport.to_host(),
    }
}

impl OnEvent<TcpSend> for SockIo {
    fn on_event(&self, header: &Header, event: &TcpSend) -> Outcome {
        if header.pid == 0 {
            return Outcome::Filtered;
        }
        let key = connection(header.pid, &event.sock);
        Outcome::recorded(self.table.upsert(key, Sent(event.size)))
    }
}

impl OnEvent<TcpCleanupRbuf> for SockIo {
    fn on_event(&self, header: &Header, event: &TcpCleanupRbuf) -> Outcome {
        if header.pid == 0 || event.copied <= 0 {
            return Outcome::Filtered;
        }
        let key = connection(header.pid, &event.sock);
        let copied = u64::from(event.copied.unsigned_abs());
        Outcome::recorded(self.table.upsert(key, Received(copied)))
    }
}

impl OnEvent<TcpRecvEnter> for SockIo {
    fn on_event(&self, header: &Header, event: &TcpRecvEnter) -> Outcome {
        if header.pid == 0 {
            return Outcome::Filtered;
        }
        let peer = Endpoint::new(event.sock.daddr, event.sock.dport.to_host());
        Outcome::began(self.pending.begin(Pid(header.pid), header.timestamp_ns, peer))
    }
}

impl OnEvent<TcpRecvExit> for SockIo {
    fn on_event(&self, header: &Header, _event: &TcpRecvExit) -> Outcome {
        if header.pid == 0 {
            return Outcome::Filtered;
        }
        let end = self.pending.end(Pid(header.pid), header.timestamp_ns);
        Outcome::settled(end, |waited_ns, peer| {
            let key = PidEndpoint {
                pid: header.pid,
                daddr: peer.daddr,
                dport: peer.dport,
            };
            self.table.upsert(key, Elapsed(waited_ns))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::*;
    use crate::probe::event::{EventKind, NetPort};
    use crate::table::{MergeMode, StalenessGuard};

    fn probe() -> SockIo {
        SockIo::new(
            "sockio",
            WatchdogSizing {
                capacity: 32,
                pairing_capacity: 32,
                guard: StalenessGuard::new(Duration::from_secs(30)),
                mode: MergeMode::Relaxed,
            },
        )
    }

    fn at(ts: u64, pid: u32, kind: EventKind) -> Header {
        Header {
            timestamp_ns: ts,
            pid,
            tid: pid,
            kind,
        }
    }

    fn peer() -> SockRef {
        SockRef {
            daddr: Ipv4Addr::new(10, 1, 2, 3),
            dport: NetPort::from_host(5432),
        }
    }

    fn key(pid: u32) -> PidEndpoint {
        PidEndpoint {
            pid,
            daddr: Ipv4Addr::new(10, 1, 2, 3),
            dport: 5432,
        }
    }

    #[test]
    fn test_traffic_is_keyed_per_connection() {
        let io = probe();
        let h = at(0, 20, EventKind::TcpSend);
        io.on_event(&h, &TcpSend { sock: peer(), size: 512 });
        io.on_event(&h, &TcpSend { sock: peer(), size: 512 });
        io.on_event(&h, &TcpCleanupRbuf { sock: peer(), copied: 64 });

        let rec = io.table().get(key(20)).unwrap();
        assert_eq!(rec.tx_bytes, 1024);
        assert_eq!(rec.rx_bytes, 64);
        assert_eq!(rec.recv_count, 0);
    }

    #[test]
    fn test_kernel_context_is_filtered() {
        let io = probe();
        let h = at(0, 0, EventKind::TcpSend);
        assert_eq!(
            io.on_event(&h, &TcpSend { sock: peer(), size: 1 }),
            Outcome::Filtered
        );
        assert_eq!(
            io.on_event(&h, &TcpRecvEnter { sock: peer() }),
            Outcome::Filtered
        );
        assert!(io.table().is_empty());
        assert!(io.pending().is_empty());
    }

    #[test]
    fn test_recv_wait_pairs_enter_with_exit() {
        let io = probe();
        assert_eq!(
            io.on_event(&at(1_000, 20, EventKind::TcpRecvEnter), &TcpRecvEnter { sock: peer() }),
            Outcome::Began
        );
        assert_eq!(
            io.on_event(&at(9_000, 20, EventKind::TcpRecvExit), &TcpRecvExit),
            Outcome::Recorded
        );
        assert_eq!(
            io.on_event(&at(9_500, 20, EventKind::TcpRecvExit), &TcpRecvExit),
            Outcome::Unpaired
        );

        let rec = io.table().get(key(20)).unwrap();
        assert_eq!(rec.recv_wait_ns, 8_000);
        assert_eq!(rec.recv_count, 1);
        assert_eq!(rec.max_recv_ns, 8_000);
    }

    #[test]
    fn test_stale_recv_is_discarded() {
        let io = probe();
        io.on_event(&at(1, 20, EventKind::TcpRecvEnter), &TcpRecvEnter { sock: peer() });
        assert_eq!(
            io.on_event(&at(40_000_000_000, 20, EventKind::TcpRecvExit), &TcpRecvExit),
            Outcome::Stale
        );
        assert!(io.table().get(key(20)).is_none());
    }
}
