//! Downstream Endpoint: the sockaddr in active use by the Send Watcher,
//! plus the single-slot mailbox the DNS Refresher uses to hand the main
//! loop newly resolved addresses (spec §4.7, §5, §9's "Cross-thread flag
//! → atomic mailbox" design note).

use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use log::{error, info};

use crate::constants::MAX_DS;

/// Single-producer/single-consumer mailbox for resolved addresses. The
/// worker thread only writes when `ready == false`; the main loop only
/// reads when `ready == true`. The staging write happens-before the
/// release store; the acquire load happens-before the adopter's read.
pub struct DnsMailbox {
    ready: AtomicBool,
    staging: Mutex<[Option<SocketAddr>; MAX_DS]>,
}

impl DnsMailbox {
    pub fn new() -> Self {
        DnsMailbox { ready: AtomicBool::new(false), staging: Mutex::new([None; MAX_DS]) }
    }

    /// True if the worker's last batch hasn't been adopted yet. The
    /// worker skips resolving again while this holds, to avoid
    /// clobbering an unread batch.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Called from the DNS worker thread after a successful resolve.
    pub fn publish(&self, addrs: &[SocketAddr]) {
        let mut staging = self.staging.lock().expect("dns mailbox poisoned");
        for slot in staging.iter_mut() {
            *slot = None;
        }
        for (slot, addr) in staging.iter_mut().zip(addrs.iter()).take(MAX_DS) {
            *slot = Some(*addr);
        }
        drop(staging);
        self.ready.store(true, Ordering::Release);
    }

    /// Called from the main loop's adoption tick. Only the first staged
    /// address is ever adopted; the spec marks the rest of the array
    /// vestigial (see DESIGN.md).
    pub fn try_adopt(&self) -> Option<SocketAddr> {
        if !self.ready.load(Ordering::Acquire) {
            return None;
        }
        let staging = self.staging.lock().expect("dns mailbox poisoned");
        let addr = staging[0];
        drop(staging);
        self.ready.store(false, Ordering::Release);
        addr
    }
}

/// Parses a `downstream` config value (`host:port`). Returns the port and
/// either a literal IPv4 address (no DNS thread needed) or a hostname to
/// resolve in the background.
pub fn split_host_port(spec: &str) -> Result<(String, u16), String> {
    let (host, port) = spec.rsplit_once(':').ok_or_else(|| format!("downstream {:?} has no port", spec))?;
    let port: u16 = port.parse().map_err(|_| format!("invalid downstream port in {:?}", spec))?;
    Ok((host.to_string(), port))
}

pub fn is_ipv4_literal(host: &str) -> bool {
    host.parse::<Ipv4Addr>().is_ok()
}

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, std::io::Error> {
    (host, port).to_socket_addrs().map(|it| it.take(MAX_DS).collect())
}

/// Resolves `host:port` once, synchronously, before the event loop starts.
/// Avoids the source's warm-up gap where the live sockaddr is unset until
/// the first health-check tick adopts it (see DESIGN.md).
pub fn resolve_initial(host: &str, port: u16) -> Result<SocketAddr, String> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(SocketAddr::new(ip.into(), port));
    }
    resolve(host, port)
        .map_err(|e| format!("failed to resolve downstream host {:?}: {}", host, e))?
        .into_iter()
        .next()
        .ok_or_else(|| format!("no addresses found for downstream host {:?}", host))
}

/// Background worker: periodically re-resolves `host` and publishes the
/// result into `mailbox`. Never spawned when the configured host is a
/// valid IPv4 literal.
pub fn spawn_refresher(host: String, port: u16, interval: Duration, mailbox: std::sync::Arc<DnsMailbox>) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("dns-refresh".to_string())
        .spawn(move || loop {
            thread::sleep(interval);
            if mailbox.is_ready() {
                continue;
            }
            match resolve(&host, port) {
                Ok(addrs) if !addrs.is_empty() => {
                    info!("resolved {} to {} address(es)", host, addrs.len());
                    mailbox.publish(&addrs);
                }
                Ok(_) => error!("dns refresh for {} returned no addresses", host),
                Err(e) => error!("dns refresh for {} failed: {}", host, e),
            }
        })
        .expect("failed to spawn dns-refresh thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn split_host_port_parses_host_and_port() {
        assert_eq!(split_host_port("collector.internal:8125").unwrap(), ("collector.internal".to_string(), 8125));
        assert_eq!(split_host_port("127.0.0.1:8125").unwrap(), ("127.0.0.1".to_string(), 8125));
    }

    #[test]
    fn split_host_port_rejects_missing_port() {
        assert!(split_host_port("collector.internal").is_err());
    }

    #[test]
    fn ipv4_literal_detection() {
        assert!(is_ipv4_literal("127.0.0.1"));
        assert!(!is_ipv4_literal("collector.internal"));
    }

    #[test]
    fn mailbox_round_trips_one_address() {
        let mailbox = DnsMailbox::new();
        assert!(mailbox.try_adopt().is_none());

        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        mailbox.publish(&[addr]);
        assert!(mailbox.is_ready());
        assert_eq!(mailbox.try_adopt(), Some(addr));
        assert!(!mailbox.is_ready());
        assert!(mailbox.try_adopt().is_none());
    }
}
