//! Wires the Slot Table / Packet Ring aggregator to the UDP receive path,
//! the Send Watcher, the Flush Timer, and DNS adoption inside one
//! single-threaded cooperative `mio` event loop (spec §5). Grounded in
//! shape on the pack's `metrics-exporter-tcp`, which drives a comparable
//! non-blocking metrics sink off `mio::Poll`/`Events`/`Token`.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, trace};
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};

use crate::aggregator::{Aggregator, FlushOutcome, SendOutcome};
use crate::config::Settings;
use crate::constants::DATA_BUF_SIZE;
use crate::downstream::{self, DnsMailbox};

const DATA: Token = Token(0);
const DOWNSTREAM: Token = Token(1);

pub fn run(settings: Settings) -> Result<(), String> {
    let (host, port) = downstream::split_host_port(&settings.downstream)?;
    let mut current_addr = downstream::resolve_initial(&host, port)?;
    info!("forwarding to {}", current_addr);

    let mailbox = Arc::new(DnsMailbox::new());
    let _dns_thread = if downstream::is_ipv4_literal(&host) {
        None
    } else {
        Some(downstream::spawn_refresher(
            host,
            port,
            Duration::from_secs(settings.dns_refresh_interval),
            Arc::clone(&mailbox),
        ))
    };

    let data_addr: SocketAddr = ([0, 0, 0, 0], settings.data_port).into();
    let mut data_socket = UdpSocket::bind(data_addr).map_err(|e| format!("failed to bind UDP listener on {}: {}", data_addr, e))?;
    let mut downstream_socket =
        UdpSocket::bind(([0, 0, 0, 0], 0).into()).map_err(|e| format!("failed to open downstream UDP socket: {}", e))?;

    let mut poll = Poll::new().map_err(|e| format!("failed to create event loop: {}", e))?;
    poll.registry().register(&mut data_socket, DATA, Interest::READABLE).map_err(|e| e.to_string())?;
    let mut armed = false;

    let sigint = Arc::new(AtomicBool::new(false));
    let sighup = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&sigint)).map_err(|e| e.to_string())?;
    signal_hook::flag::register(signal_hook::consts::SIGHUP, Arc::clone(&sighup)).map_err(|e| e.to_string())?;

    let flush_interval = Duration::from_secs_f64(settings.downstream_flush_interval.max(0.0));
    let health_check_interval = Duration::from_secs_f64(settings.downstream_health_check_interval.max(0.0));
    let mut next_flush_tick = Instant::now() + flush_interval;
    let mut next_health_check_tick = Instant::now() + health_check_interval;

    let mut aggregator = Aggregator::new();
    let mut events = Events::with_capacity(128);
    let mut recv_buf = [0u8; DATA_BUF_SIZE];

    loop {
        let timeout = soonest(&[next_flush_tick, next_health_check_tick]).saturating_duration_since(Instant::now());
        match poll.poll(&mut events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(format!("event loop poll() failed: {}", e)),
        }

        if sigint.load(Ordering::Relaxed) {
            info!("sigint received");
            return Ok(());
        }
        if sighup.swap(false, Ordering::Relaxed) {
            info!("sighup received");
        }

        for event in events.iter() {
            match event.token() {
                DATA => drain_datagrams(&data_socket, &mut recv_buf, &mut aggregator),
                DOWNSTREAM => drain_sends(&downstream_socket, &mut aggregator, current_addr),
                _ => unreachable!("unexpected mio token"),
            }
        }

        if !armed && !aggregator.ring_is_idle() {
            if let Err(e) = poll.registry().register(&mut downstream_socket, DOWNSTREAM, Interest::WRITABLE) {
                error!("failed to arm send watcher: {}", e);
            } else {
                armed = true;
            }
        }

        let now = Instant::now();
        if now >= next_flush_tick {
            if let FlushOutcome::Armed = aggregator.maybe_timer_flush(now, flush_interval) {
                if !armed {
                    if poll.registry().register(&mut downstream_socket, DOWNSTREAM, Interest::WRITABLE).is_ok() {
                        armed = true;
                    }
                }
            }
            next_flush_tick = now + flush_interval;
        }
        if now >= next_health_check_tick {
            if let Some(addr) = mailbox.try_adopt() {
                info!("adopted new downstream address {}", addr);
                current_addr = addr;
            }
            next_health_check_tick = now + health_check_interval;
        }

        if armed && aggregator.ring_is_idle() {
            let _ = poll.registry().deregister(&mut downstream_socket);
            armed = false;
        }
    }
}

fn soonest(deadlines: &[Instant]) -> Instant {
    *deadlines.iter().min().expect("at least one deadline")
}

fn drain_datagrams(socket: &UdpSocket, buf: &mut [u8; DATA_BUF_SIZE], aggregator: &mut Aggregator) {
    loop {
        match socket.recv_from(&mut buf[..DATA_BUF_SIZE - 1]) {
            Ok((len, from)) => {
                trace!("received {} bytes from {}", len, from);
                let mut len = len;
                if len > 0 && buf[len - 1] != b'\n' {
                    buf[len] = b'\n';
                    len += 1;
                }
                if len > 0 {
                    aggregator.ingest_datagram(&buf[..len]);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) => {
                error!("recv_from() failed: {}", e);
                break;
            }
        }
    }
}

fn drain_sends(socket: &UdpSocket, aggregator: &mut Aggregator, addr: SocketAddr) {
    loop {
        let now = Instant::now();
        let outcome = aggregator.try_send_pending(now, |packet| {
            let sent = socket.send_to(packet, addr)?;
            trace!("sent {} of {} bytes to {}", sent, packet.len(), addr);
            Ok(())
        });
        match outcome {
            SendOutcome::Sent => continue,
            SendOutcome::Blocked | SendOutcome::Empty => break,
        }
    }
}
