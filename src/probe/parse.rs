//! Wire format for captured probe events.
//!
//! Every record is a 24-byte header followed by a fixed-size payload selected
//! by the header's kind byte. All integers are little-endian; addresses and
//! socket ports keep the byte order they had in kernel memory. Records are
//! stored back to back, each prefixed by its length as a little-endian u32.
//!
//! Length checks happen once per payload, then fixed-offset reads cannot fail.

use std::net::Ipv4Addr;

use thiserror::Error;

use super::event::{
    BlockRq, CgroupThrottle, EventKind, FaultEnter, FaultExit, FutexEnter, FutexExit, Header,
    ModuleLoad, NetPort, OomMarkVictim, Payload, ProbeEvent, ProcessExec, PtraceEnter,
    ReclaimBegin, ReclaimEnd, SchedSwitch, SchedWakeup, SkbDrop, SockRef, SockSetState,
    SwapReadPage, SwapWritePage, SysEnter, SysExit, TcpCleanupRbuf, TcpConnect, TcpRcvEstablished,
    TcpRecvEnter, TcpRecvExit, TcpRetransmit, TcpSend, TcpSendReset, WritebackWait,
};

/// Event header size in bytes.
pub const HEADER_SIZE: usize = 24;

/// Size of the length prefix in front of every framed record.
const FRAME_PREFIX: usize = 4;

/// Errors that can occur during event parsing.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("event too short: {size} bytes")]
    Truncated { size: usize },

    #[error("unknown event kind: {raw}")]
    UnknownEventKind { raw: u8 },

    #[error("reading {event_name}: unexpected end of data")]
    PayloadTruncated { event_name: &'static str },

    #[error("frame at offset {offset}: declared {declared} bytes, {available} available")]
    FrameTruncated {
        offset: usize,
        declared: usize,
        available: usize,
    },
}

/// Payload size in bytes for each event kind.
pub const fn payload_size(kind: EventKind) -> usize {
    match kind {
        EventKind::ProcessExec => 152,
        EventKind::ModuleLoad => 56,
        EventKind::SockSetState | EventKind::OomMarkVictim => 24,
        EventKind::PtraceEnter => 32,
        EventKind::TcpSend
        | EventKind::TcpCleanupRbuf
        | EventKind::TcpRcvEstablished
        | EventKind::SchedSwitch
        | EventKind::SysExit
        | EventKind::BlockRqIssue
        | EventKind::BlockRqComplete => 16,
        EventKind::CgroupThrottle
        | EventKind::SkbDrop
        | EventKind::TcpSendReset
        | EventKind::TcpRetransmit
        | EventKind::WritebackWait
        | EventKind::SchedWakeup
        | EventKind::FaultExit
        | EventKind::FutexEnter
        | EventKind::SysEnter
        | EventKind::TcpConnect
        | EventKind::TcpRecvEnter => 8,
        EventKind::SwapReadPage
        | EventKind::SwapWritePage
        | EventKind::FaultEnter
        | EventKind::FutexExit
        | EventKind::ReclaimBegin
        | EventKind::ReclaimEnd
        | EventKind::TcpRecvExit => 0,
    }
}

/// Parse one record (header and payload, no length prefix).
pub fn parse_event(data: &[u8]) -> Result<ProbeEvent, ParseError> {
    if data.len() < HEADER_SIZE {
        return Err(ParseError::Truncated { size: data.len() });
    }

    let kind_raw = read_u8(data, 16);
    let kind = EventKind::from_u8(kind_raw).ok_or(ParseError::UnknownEventKind { raw: kind_raw })?;

    let header = Header {
        timestamp_ns: read_u64_le(data, 0),
        pid: read_u32_le(data, 8),
        tid: read_u32_le(data, 12),
        kind,
    };

    let payload = data.get(HEADER_SIZE..).unwrap_or_default();
    ensure_payload(payload, payload_size(kind), kind.as_str())?;

    let payload = match kind {
        EventKind::ProcessExec => Payload::ProcessExec(ProcessExec {
            ppid: read_u32_le(payload, 0),
            uid: read_u32_le(payload, 4),
            comm: read_fixed(payload, 8),
            filename: read_fixed(payload, 24),
        }),
        EventKind::ModuleLoad => Payload::ModuleLoad(ModuleLoad {
            name: read_fixed(payload, 0),
        }),
        EventKind::CgroupThrottle => Payload::CgroupThrottle(CgroupThrottle {
            cgroup_id: read_u64_le(payload, 0),
        }),
        EventKind::SkbDrop => Payload::SkbDrop(SkbDrop {
            reason: read_u32_le(payload, 0),
        }),
        EventKind::SockSetState => Payload::SockSetState(SockSetState {
            skaddr: read_u64_le(payload, 0),
            old_state: read_i32_le(payload, 8),
            new_state: read_i32_le(payload, 12),
            sport: read_u16_le(payload, 16),
            dport: read_u16_le(payload, 18),
            daddr: read_ipv4(payload, 20),
        }),
        EventKind::TcpSendReset => Payload::TcpSendReset(TcpSendReset {
            sock: read_sock(payload),
        }),
        EventKind::TcpRetransmit => Payload::TcpRetransmit(TcpRetransmit {
            sport: read_u16_le(payload, 0),
            dport: read_u16_le(payload, 2),
            daddr: read_ipv4(payload, 4),
        }),
        EventKind::OomMarkVictim => Payload::OomMarkVictim(OomMarkVictim {
            victim_pid: read_u32_le(payload, 0),
            // pad[4] at 4-7
            total_vm: read_u64_le(payload, 8),
            anon_rss: read_u64_le(payload, 16),
        }),
        EventKind::PtraceEnter => Payload::PtraceEnter(PtraceEnter {
            request: read_u64_le(payload, 0),
            target_pid: read_u32_le(payload, 8),
            // pad[4] at 12-15
            comm: read_fixed(payload, 16),
        }),
        EventKind::SwapReadPage => Payload::SwapReadPage(SwapReadPage),
        EventKind::SwapWritePage => Payload::SwapWritePage(SwapWritePage),
        EventKind::WritebackWait => Payload::WritebackWait(WritebackWait {
            nr_pages: read_u64_le(payload, 0),
        }),
        EventKind::TcpSend => Payload::TcpSend(TcpSend {
            sock: read_sock(payload),
            size: read_u64_le(payload, 8),
        }),
        EventKind::TcpCleanupRbuf => Payload::TcpCleanupRbuf(TcpCleanupRbuf {
            sock: read_sock(payload),
            copied: read_i32_le(payload, 8),
        }),
        EventKind::TcpRcvEstablished => Payload::TcpRcvEstablished(TcpRcvEstablished {
            sock: read_sock(payload),
            srtt_us8: read_u32_le(payload, 8),
        }),
        EventKind::SchedWakeup => Payload::SchedWakeup(SchedWakeup {
            target_pid: read_u32_le(payload, 0),
        }),
        EventKind::SchedSwitch => Payload::SchedSwitch(SchedSwitch {
            prev_pid: read_u32_le(payload, 0),
            prev_state: read_u32_le(payload, 4),
            next_pid: read_u32_le(payload, 8),
        }),
        EventKind::FaultEnter => Payload::FaultEnter(FaultEnter),
        EventKind::FaultExit => Payload::FaultExit(FaultExit {
            ret: read_u64_le(payload, 0),
        }),
        EventKind::FutexEnter => Payload::FutexEnter(FutexEnter {
            op: read_i64_le(payload, 0),
        }),
        EventKind::FutexExit => Payload::FutexExit(FutexExit),
        EventKind::ReclaimBegin => Payload::ReclaimBegin(ReclaimBegin),
        EventKind::ReclaimEnd => Payload::ReclaimEnd(ReclaimEnd),
        EventKind::SysEnter => Payload::SysEnter(SysEnter {
            id: read_i64_le(payload, 0),
        }),
        EventKind::SysExit => Payload::SysExit(SysExit {
            id: read_i64_le(payload, 0),
            ret: read_i64_le(payload, 8),
        }),
        EventKind::BlockRqIssue => Payload::BlockRqIssue(read_block_rq(payload)),
        EventKind::BlockRqComplete => Payload::BlockRqComplete(read_block_rq(payload)),
        EventKind::TcpConnect => Payload::TcpConnect(TcpConnect {
            skaddr: read_u64_le(payload, 0),
        }),
        EventKind::TcpRecvEnter => Payload::TcpRecvEnter(TcpRecvEnter {
            sock: read_sock(payload),
        }),
        EventKind::TcpRecvExit => Payload::TcpRecvExit(TcpRecvExit),
    };

    Ok(ProbeEvent { header, payload })
}

/// Iterator over length-prefixed records in a captured buffer.
///
/// A truncated frame yields one error and ends the iteration.
pub struct Frames<'a> {
    data: &'a [u8],
    offset: usize,
    done: bool,
}

pub fn frames(data: &[u8]) -> Frames<'_> {
    Frames {
        data,
        offset: 0,
        done: false,
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Result<&'a [u8], ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.data.len() {
            return None;
        }
        let rest = self.data.get(self.offset..).unwrap_or_default();
        let available = rest.len().saturating_sub(FRAME_PREFIX);
        if rest.len() < FRAME_PREFIX {
            self.done = true;
            return Some(Err(ParseError::FrameTruncated {
                offset: self.offset,
                declared: FRAME_PREFIX,
                available: rest.len(),
            }));
        }
        let declared = read_u32_le(rest, 0) as usize;
        match rest.get(FRAME_PREFIX..FRAME_PREFIX + declared) {
            Some(frame) => {
                self.offset += FRAME_PREFIX + declared;
                Some(Ok(frame))
            }
            None => {
                self.done = true;
                Some(Err(ParseError::FrameTruncated {
                    offset: self.offset,
                    declared,
                    available,
                }))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Append `event` to `out` as a length-prefixed record.
pub fn encode_framed(event: &ProbeEvent, out: &mut Vec<u8>) {
    let len = HEADER_SIZE + payload_size(event.header.kind);
    out.extend_from_slice(&(len as u32).to_le_bytes());
    encode_event(event, out);
}

/// Append `event` to `out` as a bare record.
pub fn encode_event(event: &ProbeEvent, out: &mut Vec<u8>) {
    let h = &event.header;
    out.extend_from_slice(&h.timestamp_ns.to_le_bytes());
    out.extend_from_slice(&h.pid.to_le_bytes());
    out.extend_from_slice(&h.tid.to_le_bytes());
    out.push(h.kind as u8);
    out.extend_from_slice(&[0u8; 7]);

    let start = out.len();
    match &event.payload {
        Payload::ProcessExec(e) => {
            out.extend_from_slice(&e.ppid.to_le_bytes());
            out.extend_from_slice(&e.uid.to_le_bytes());
            out.extend_from_slice(&e.comm);
            out.extend_from_slice(&e.filename);
        }
        Payload::ModuleLoad(e) => out.extend_from_slice(&e.name),
        Payload::CgroupThrottle(e) => out.extend_from_slice(&e.cgroup_id.to_le_bytes()),
        Payload::SkbDrop(e) => out.extend_from_slice(&e.reason.to_le_bytes()),
        Payload::SockSetState(e) => {
            out.extend_from_slice(&e.skaddr.to_le_bytes());
            out.extend_from_slice(&e.old_state.to_le_bytes());
            out.extend_from_slice(&e.new_state.to_le_bytes());
            out.extend_from_slice(&e.sport.to_le_bytes());
            out.extend_from_slice(&e.dport.to_le_bytes());
            out.extend_from_slice(&e.daddr.octets());
        }
        Payload::TcpSendReset(e) => write_sock(&e.sock, out),
        Payload::TcpRetransmit(e) => {
            out.extend_from_slice(&e.sport.to_le_bytes());
            out.extend_from_slice(&e.dport.to_le_bytes());
            out.extend_from_slice(&e.daddr.octets());
        }
        Payload::OomMarkVictim(e) => {
            out.extend_from_slice(&e.victim_pid.to_le_bytes());
            out.extend_from_slice(&[0u8; 4]);
            out.extend_from_slice(&e.total_vm.to_le_bytes());
            out.extend_from_slice(&e.anon_rss.to_le_bytes());
        }
        Payload::PtraceEnter(e) => {
            out.extend_from_slice(&e.request.to_le_bytes());
            out.extend_from_slice(&e.target_pid.to_le_bytes());
            out.extend_from_slice(&[0u8; 4]);
            out.extend_from_slice(&e.comm);
        }
        Payload::WritebackWait(e) => out.extend_from_slice(&e.nr_pages.to_le_bytes()),
        Payload::TcpSend(e) => {
            write_sock(&e.sock, out);
            out.extend_from_slice(&e.size.to_le_bytes());
        }
        Payload::TcpCleanupRbuf(e) => {
            write_sock(&e.sock, out);
            out.extend_from_slice(&e.copied.to_le_bytes());
        }
        Payload::TcpRcvEstablished(e) => {
            write_sock(&e.sock, out);
            out.extend_from_slice(&e.srtt_us8.to_le_bytes());
        }
        Payload::SchedWakeup(e) => out.extend_from_slice(&e.target_pid.to_le_bytes()),
        Payload::SchedSwitch(e) => {
            out.extend_from_slice(&e.prev_pid.to_le_bytes());
            out.extend_from_slice(&e.prev_state.to_le_bytes());
            out.extend_from_slice(&e.next_pid.to_le_bytes());
        }
        Payload::FaultExit(e) => out.extend_from_slice(&e.ret.to_le_bytes()),
        Payload::FutexEnter(e) => out.extend_from_slice(&e.op.to_le_bytes()),
        Payload::SysEnter(e) => out.extend_from_slice(&e.id.to_le_bytes()),
        Payload::SysExit(e) => {
            out.extend_from_slice(&e.id.to_le_bytes());
            out.extend_from_slice(&e.ret.to_le_bytes());
        }
        Payload::BlockRqIssue(e) | Payload::BlockRqComplete(e) => {
            out.extend_from_slice(&e.dev.to_le_bytes());
            out.extend_from_slice(&[0u8; 4]);
            out.extend_from_slice(&e.sector.to_le_bytes());
        }
        Payload::TcpConnect(e) => out.extend_from_slice(&e.skaddr.to_le_bytes()),
        Payload::TcpRecvEnter(e) => write_sock(&e.sock, out),
        Payload::SwapReadPage(_)
        | Payload::SwapWritePage(_)
        | Payload::FaultEnter(_)
        | Payload::FutexExit(_)
        | Payload::ReclaimBegin(_)
        | Payload::ReclaimEnd(_)
        | Payload::TcpRecvExit(_) => {}
    }

    // Zero padding up to the fixed payload size.
    out.resize(start + payload_size(h.kind), 0);
}

fn write_sock(sock: &SockRef, out: &mut Vec<u8>) {
    out.extend_from_slice(&sock.daddr.octets());
    out.extend_from_slice(&sock.dport.0);
    out.extend_from_slice(&[0u8; 2]);
}

// ---------------------------------------------------------------------------
// Safe byte-reading helpers (no indexing, no panics)
// ---------------------------------------------------------------------------

#[inline(always)]
fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    if let Some(src) = data.get(offset..offset + N) {
        out.copy_from_slice(src);
    }
    out
}

#[inline(always)]
fn read_u8(data: &[u8], offset: usize) -> u8 {
    data.get(offset).copied().unwrap_or(0)
}

#[inline(always)]
fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(read_fixed::<2>(data, offset))
}

#[inline(always)]
fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(read_fixed::<4>(data, offset))
}

#[inline(always)]
fn read_u64_le(data: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(read_fixed::<8>(data, offset))
}

fn read_i32_le(data: &[u8], offset: usize) -> i32 {
    read_u32_le(data, offset) as i32
}

fn read_i64_le(data: &[u8], offset: usize) -> i64 {
    read_u64_le(data, offset) as i64
}

fn read_ipv4(data: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::from(read_fixed::<4>(data, offset))
}

/// Socket endpoint: daddr[4], dport[2] in network order, pad[2].
fn read_sock(data: &[u8]) -> SockRef {
    SockRef {
        daddr: read_ipv4(data, 0),
        dport: NetPort(read_fixed::<2>(data, 4)),
    }
}

fn read_block_rq(data: &[u8]) -> BlockRq {
    BlockRq {
        dev: read_u32_le(data, 0),
        // pad[4] at 4-7
        sector: read_u64_le(data, 8),
    }
}

fn ensure_payload(data: &[u8], need: usize, name: &'static str) -> Result<(), ParseError> {
    if data.len() < need {
        Err(ParseError::PayloadTruncated { event_name: name })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a 24-byte event header.
    fn header(ts: u64, pid: u32, tid: u32, kind: u8) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(&ts.to_le_bytes());
        buf.extend_from_slice(&pid.to_le_bytes());
        buf.extend_from_slice(&tid.to_le_bytes());
        buf.push(kind);
        buf.extend_from_slice(&[0u8; 7]); // pad
        buf
    }

    // -- Error cases --

    #[test]
    fn test_truncated_data() {
        let err = parse_event(&[0u8; 10]).unwrap_err();
        assert_eq!(err, ParseError::Truncated { size: 10 });
    }

    #[test]
    fn test_empty_data() {
        let err = parse_event(&[]).unwrap_err();
        assert_eq!(err, ParseError::Truncated { size: 0 });
    }

    #[test]
    fn test_unknown_event_kind() {
        let err = parse_event(&header(1, 2, 3, 200)).unwrap_err();
        assert_eq!(err, ParseError::UnknownEventKind { raw: 200 });
        assert_eq!(err.to_string(), "unknown event kind: 200");
    }

    #[test]
    fn test_header_only_truncates_payload() {
        let err = parse_event(&header(1, 2, 3, EventKind::SchedSwitch as u8)).unwrap_err();
        assert_eq!(
            err,
            ParseError::PayloadTruncated {
                event_name: "sched_switch"
            }
        );
    }

    #[test]
    fn test_short_payload() {
        let mut data = header(1, 2, 3, EventKind::ProcessExec as u8);
        data.extend_from_slice(&[0u8; 151]);
        assert!(matches!(
            parse_event(&data),
            Err(ParseError::PayloadTruncated { .. })
        ));
    }

    // -- Successful parses --

    #[test]
    fn test_zero_payload_event() {
        let data = header(42, 7, 8, EventKind::FaultEnter as u8);
        let event = parse_event(&data).unwrap();
        assert_eq!(event.header.timestamp_ns, 42);
        assert_eq!(event.header.pid, 7);
        assert_eq!(event.header.tid, 8);
        assert_eq!(event.payload, Payload::FaultEnter(FaultEnter));
    }

    #[test]
    fn test_sched_switch() {
        let mut data = header(1000, 1, 1, EventKind::SchedSwitch as u8);
        data.extend_from_slice(&55u32.to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&66u32.to_le_bytes());
        data.extend_from_slice(&[0u8; 4]);

        let event = parse_event(&data).unwrap();
        assert_eq!(
            event.payload,
            Payload::SchedSwitch(SchedSwitch {
                prev_pid: 55,
                prev_state: 2,
                next_pid: 66,
            })
        );
    }

    #[test]
    fn test_socket_port_keeps_network_order() {
        let mut data = header(1, 9, 9, EventKind::TcpRecvEnter as u8);
        data.extend_from_slice(&[10, 0, 0, 1]);
        data.extend_from_slice(&[0x1f, 0x90]); // 8080
        data.extend_from_slice(&[0, 0]);

        let event = parse_event(&data).unwrap();
        let Payload::TcpRecvEnter(e) = event.payload else {
            panic!("unexpected payload {:?}", event.payload);
        };
        assert_eq!(e.sock.daddr, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(e.sock.dport.to_host(), 8080);
    }

    #[test]
    fn test_sock_set_state_fields() {
        let mut data = header(5, 0, 0, EventKind::SockSetState as u8);
        data.extend_from_slice(&0xffff_8880_1234_5678u64.to_le_bytes());
        data.extend_from_slice(&2i32.to_le_bytes());
        data.extend_from_slice(&1i32.to_le_bytes());
        data.extend_from_slice(&40000u16.to_le_bytes());
        data.extend_from_slice(&443u16.to_le_bytes());
        data.extend_from_slice(&[192, 168, 1, 10]);

        let event = parse_event(&data).unwrap();
        assert_eq!(
            event.payload,
            Payload::SockSetState(SockSetState {
                skaddr: 0xffff_8880_1234_5678,
                old_state: 2,
                new_state: 1,
                sport: 40000,
                dport: 443,
                daddr: Ipv4Addr::new(192, 168, 1, 10),
            })
        );
    }

    #[test]
    fn test_encode_matches_parser_layout() {
        let event = ProbeEvent {
            header: Header {
                timestamp_ns: 77,
                pid: 10,
                tid: 11,
                kind: EventKind::PtraceEnter,
            },
            payload: Payload::PtraceEnter(PtraceEnter {
                request: 16,
                target_pid: 99,
                comm: *b"gdb\0\0\0\0\0\0\0\0\0\0\0\0\0",
            }),
        };
        let mut buf = Vec::new();
        encode_event(&event, &mut buf);
        assert_eq!(buf.len(), HEADER_SIZE + 32);
        assert_eq!(parse_event(&buf).unwrap(), event);
    }

    #[test]
    fn test_frames_split_records() {
        let events = [
            ProbeEvent {
                header: Header {
                    timestamp_ns: 1,
                    pid: 1,
                    tid: 1,
                    kind: EventKind::ReclaimBegin,
                },
                payload: Payload::ReclaimBegin(ReclaimBegin),
            },
            ProbeEvent {
                header: Header {
                    timestamp_ns: 2,
                    pid: 1,
                    tid: 1,
                    kind: EventKind::SkbDrop,
                },
                payload: Payload::SkbDrop(SkbDrop { reason: 3 }),
            },
        ];
        let mut buf = Vec::new();
        for e in &events {
            encode_framed(e, &mut buf);
        }

        let parsed: Vec<ProbeEvent> = frames(&buf)
            .map(|f| parse_event(f.unwrap()).unwrap())
            .collect();
        assert_eq!(parsed, events);
    }

    #[test]
    fn test_truncated_frame_stops_iteration() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 10]);

        let mut it = frames(&buf);
        assert_eq!(
            it.next(),
            Some(Err(ParseError::FrameTruncated {
                offset: 0,
                declared: 100,
                available: 10,
            }))
        );
        assert_eq!(it.next(), None);
    }

    #[test]
    fn test_frame_with_bad_record_does_not_stop_stream() {
        let mut buf = Vec::new();
        let bad = header(1, 1, 1, 250);
        buf.extend_from_slice(&(bad.len() as u32).to_le_bytes());
        buf.extend_from_slice(&bad);
        let good = ProbeEvent {
            header: Header {
                timestamp_ns: 2,
                pid: 4,
                tid: 4,
                kind: EventKind::SwapReadPage,
            },
            payload: Payload::SwapReadPage(SwapReadPage),
        };
        encode_framed(&good, &mut buf);

        let results: Vec<_> = frames(&buf).map(|f| parse_event(f.unwrap())).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().unwrap(), &good);
    }
}
