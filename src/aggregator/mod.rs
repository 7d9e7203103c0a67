//! The aggregation and flush engine: Slot Table, Packet Ring, Line Parser,
//! and Flush Engine from the spec, wired together behind one explicit
//! context object instead of the source's process-wide globals.

mod format;
mod ring;
mod slot;
mod table;

use std::time::{Duration, Instant};

use log::{error, trace, warn};

use crate::constants::{MAX_COUNTER_LENGTH, MIN_LINE_LENGTH, PACKET_MAX};

use ring::PacketRing;
use slot::MetricType;
use table::SlotTable;

/// What happened as a result of closing the active packet.
#[derive(Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued; the active packet was already empty.
    Noop,
    /// The closed packet was queued behind others still in flight.
    Queued,
    /// The closed packet was queued and the Send Watcher was just armed
    /// (the ring had been idle).
    Armed,
    /// The ring had lapped the consumer; the closed packet's data was
    /// dropped.
    Dropped,
}

/// Owns the Slot Table and Packet Ring for one downstream stream, with a
/// lifetime equal to the event loop (spec's "Global mutable state →
/// explicit context" design note).
pub struct Aggregator {
    table: SlotTable,
    ring: PacketRing,
    scratch: [u8; PACKET_MAX],
    last_flush_time: Instant,
}

impl Aggregator {
    pub fn new() -> Self {
        Aggregator {
            table: SlotTable::new(),
            ring: PacketRing::new(),
            scratch: [0u8; PACKET_MAX],
            last_flush_time: Instant::now(),
        }
    }

    /// Splits `datagram` on `\n` and runs each line through the parser.
    /// `datagram` must already end with `\n` (the UDP read path appends
    /// one if the sender omitted it).
    pub fn ingest_datagram(&mut self, datagram: &[u8]) {
        for line in datagram.split_inclusive(|&b| b == b'\n') {
            if line.len() <= MIN_LINE_LENGTH || line.len() >= PACKET_MAX - MAX_COUNTER_LENGTH {
                error!("dropping metric line of invalid length {}", line.len());
                continue;
            }
            self.process_line(line);
        }
    }

    fn process_line(&mut self, line: &[u8]) {
        let colon = match line.iter().position(|&b| b == b':') {
            Some(p) => p,
            None => {
                error!("invalid metric, missing ':': {:?}", String::from_utf8_lossy(line));
                return;
            }
        };
        let name = &line[..=colon];

        let mut slot_idx = match self.table.find_or_add(name) {
            Some(idx) => idx,
            None => {
                self.schedule_flush();
                match self.table.find_or_add(name) {
                    Some(idx) => idx,
                    None => {
                        error!("metric name too long to fit in any packet: {:?}", String::from_utf8_lossy(name));
                        return;
                    }
                }
            }
        };

        let mut rest = &line[colon + 1..];
        while !rest.is_empty() {
            let (segment, remainder) = match rest.iter().position(|&b| b == b':') {
                Some(p) => (&rest[..=p], &rest[p + 1..]),
                None => (rest, &rest[rest.len()..]),
            };
            rest = remainder;

            if segment.len() < 2 {
                error!("invalid metric segment for {:?}", String::from_utf8_lossy(name));
                continue;
            }
            let content = &segment[..segment.len() - 1];

            let pipe = match content.iter().position(|&b| b == b'|') {
                Some(p) => p,
                None => {
                    error!("invalid metric segment, missing '|': {:?}", String::from_utf8_lossy(content));
                    continue;
                }
            };
            let value_str = &content[..pipe];
            let type_and_rate = &content[pipe + 1..];
            let metric_type = match type_and_rate.first() {
                Some(b'c') => MetricType::Counter,
                _ => MetricType::Other,
            };

            let projected = if metric_type == MetricType::Counter { MAX_COUNTER_LENGTH } else { segment.len() };
            if self.table.active_bytes() + projected > PACKET_MAX {
                let preserved_type = self.table.slot(slot_idx).metric_type();
                self.schedule_flush();
                slot_idx = match self.table.find_or_add(name) {
                    Some(idx) => idx,
                    None => {
                        error!("metric name too long to fit in any packet: {:?}", String::from_utf8_lossy(name));
                        continue;
                    }
                };
                if preserved_type != MetricType::Unknown {
                    self.table.slot_mut(slot_idx).force_type(preserved_type);
                }
            }

            if !self.table.slot_mut(slot_idx).accepts_type(metric_type) {
                error!(
                    "type mismatch for {:?}: expected {:?}, got {:?}",
                    String::from_utf8_lossy(name),
                    self.table.slot(slot_idx).metric_type(),
                    metric_type
                );
                continue;
            }

            if metric_type == MetricType::Counter {
                let value: f64 = match std::str::from_utf8(value_str).ok().and_then(|s| s.parse().ok()) {
                    Some(v) => v,
                    None => {
                        error!("invalid counter value: {:?}", String::from_utf8_lossy(value_str));
                        continue;
                    }
                };
                let rate = parse_rate(&type_and_rate[1..]);
                if self.table.add_counter(slot_idx, value / rate).is_err() {
                    error!("counter value for {:?} would overflow the packet", String::from_utf8_lossy(name));
                }
            } else if self.table.append_other(slot_idx, content).is_err() {
                error!("value for {:?} would overflow the packet", String::from_utf8_lossy(name));
            }
        }
    }

    /// Closes the currently-filling packet and prepares the next one.
    pub fn schedule_flush(&mut self) -> FlushOutcome {
        if self.table.is_empty() {
            return FlushOutcome::Noop;
        }

        let need_to_arm = self.ring.is_idle();

        if !self.ring.next_slot_free() {
            error!(
                "packet ring overflow, dropping {} bytes across {} slots",
                self.table.active_bytes(),
                self.table.slots_used()
            );
            self.table.reset();
            return FlushOutcome::Dropped;
        }

        let mut written = 0usize;
        for slot in self.table.used_slots() {
            if slot.is_empty() {
                continue;
            }
            let payload = slot.payload();
            let plen = payload.len();
            self.scratch[written..written + plen].copy_from_slice(payload);
            self.scratch[written + plen - 1] = b'\n';
            written += plen;
        }
        trace!("flushing packet of {} bytes", written);

        self.ring.write_active_and_advance(&self.scratch[..written]);
        self.table.reset();

        if need_to_arm {
            FlushOutcome::Armed
        } else {
            FlushOutcome::Queued
        }
    }

    /// Forces a flush if the active packet has been idle longer than
    /// `interval`. Bounds per-metric latency when traffic is sparse.
    pub fn maybe_timer_flush(&mut self, now: Instant, interval: Duration) -> FlushOutcome {
        if self.table.active_bytes() > 0 && now.duration_since(self.last_flush_time) > interval {
            self.schedule_flush()
        } else {
            FlushOutcome::Noop
        }
    }

    pub fn pending_packet(&self) -> Option<&[u8]> {
        self.ring.pending()
    }

    pub fn ring_is_idle(&self) -> bool {
        self.ring.is_idle()
    }

    /// Called by the Send Watcher once a packet has actually gone out:
    /// advances the ring and resets the flush-latency clock (the source
    /// updates `last_flush_time` in the `sendto` callback, not at close
    /// time, so a backed-up ring doesn't fool the timer into firing
    /// early).
    pub fn mark_sent(&mut self, now: Instant) {
        self.ring.advance_flush();
        self.last_flush_time = now;
    }

    /// Drives the Send Watcher for one queued packet: calls `send` with
    /// the packet bytes, then advances the ring unless the socket would
    /// block (in which case the packet stays queued for the next
    /// writable event). UDP `sendto` errors are logged and still treated
    /// as sent, matching spec §4.5's best-effort policy.
    pub fn try_send_pending(&mut self, now: Instant, send: impl FnOnce(&[u8]) -> std::io::Result<()>) -> SendOutcome {
        let data = match self.ring.pending() {
            Some(data) => data,
            None => return SendOutcome::Empty,
        };
        match send(data) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return SendOutcome::Blocked,
            Err(e) => warn!("sendto() failed, advancing ring anyway (UDP is best-effort): {}", e),
        }
        self.ring.advance_flush();
        self.last_flush_time = now;
        SendOutcome::Sent
    }
}

/// Outcome of one `try_send_pending` call.
#[derive(Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing was queued.
    Empty,
    /// Something was queued but the socket isn't writable yet.
    Blocked,
    /// A packet was sent (or best-effort dropped) and the ring advanced.
    Sent,
}

fn parse_rate(after_type: &[u8]) -> f64 {
    if after_type.first() == Some(&b'|') && after_type.get(1) == Some(&b'@') {
        if let Ok(s) = std::str::from_utf8(&after_type[2..]) {
            if let Ok(rate) = s.parse::<f64>() {
                if rate > 0.0 && rate <= 1.0 {
                    return rate;
                }
                warn!("sample rate {} out of (0, 1], ignoring", rate);
            }
        }
    }
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn flush_and_take(agg: &mut Aggregator) -> Vec<u8> {
        agg.schedule_flush();
        let pkt = agg.pending_packet().expect("a packet should be queued").to_vec();
        agg.mark_sent(Instant::now());
        pkt
    }

    #[test]
    fn counter_merge() {
        let mut agg = Aggregator::new();
        agg.ingest_datagram(b"foo:1|c\n");
        agg.ingest_datagram(b"foo:2|c\n");
        agg.ingest_datagram(b"foo:3|c\n");
        assert_eq!(flush_and_take(&mut agg), b"foo:6|c\n");
    }

    #[test]
    fn sampled_counter() {
        let mut agg = Aggregator::new();
        agg.ingest_datagram(b"bar:10|c|@0.1\n");
        assert_eq!(flush_and_take(&mut agg), b"bar:100|c\n");
    }

    #[test]
    fn mixed_type_rejection() {
        let mut agg = Aggregator::new();
        agg.ingest_datagram(b"baz:5|c\n");
        agg.ingest_datagram(b"baz:7|ms\n");
        assert_eq!(flush_and_take(&mut agg), b"baz:5|c\n");
    }

    #[test]
    fn multi_value_in_one_line() {
        let mut agg = Aggregator::new();
        agg.ingest_datagram(b"q:1|c:2|c:3|c\n");
        assert_eq!(flush_and_take(&mut agg), b"q:6|c\n");
    }

    #[test]
    fn other_concatenation() {
        let mut agg = Aggregator::new();
        agg.ingest_datagram(b"t:200|ms\n");
        agg.ingest_datagram(b"t:250|ms\n");
        assert_eq!(flush_and_take(&mut agg), b"t:200|ms:250|ms\n");
    }

    #[test]
    fn capacity_rollover_produces_multiple_bounded_datagrams() {
        let mut agg = Aggregator::new();
        let mut names = vec![];
        // Each unique name is long enough that ~3 of them exceed PACKET_MAX
        // once combined with their counter values, forcing a mid-stream flush.
        for i in 0..200 {
            let name = format!("metric_name_number_{:04}", i);
            agg.ingest_datagram(format!("{}:1|c\n", name).as_bytes());
            names.push(name);
        }
        agg.schedule_flush();

        let mut seen = vec![];
        loop {
            match agg.pending_packet() {
                Some(pkt) => {
                    assert!(pkt.len() <= PACKET_MAX);
                    seen.push(pkt.to_vec());
                    agg.mark_sent(Instant::now());
                }
                None => break,
            }
        }
        assert!(seen.len() >= 2);
        let total_lines: usize = seen.iter().map(|p| p.iter().filter(|&&b| b == b'\n').count()).sum();
        assert_eq!(total_lines, names.len());
    }

    #[test]
    fn idle_flush_is_a_noop() {
        let mut agg = Aggregator::new();
        assert_eq!(agg.schedule_flush(), FlushOutcome::Noop);
        assert!(agg.ring_is_idle());
    }
}
