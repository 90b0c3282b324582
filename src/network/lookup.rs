//! Reverse DNS and ident lookups for connecting users.
//!
//! Both results reach the engine through its normal reinjection paths: the
//! resolver task sends a [`Event::HostResolved`] and the ident lookup is a
//! worker-pool [`Job`] whose `finish` runs on the engine. Neither touches
//! the world from outside it. Timeouts fall back to the IP (for the host)
//! and a `~`-prefixed username (for the ident).

use std::io::{BufRead, BufReader, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use tokio::sync::mpsc;
use tracing::debug;

use crate::engine::Event;
use crate::engine::jobs::Job;
use crate::state::world::World;

/// Resolve `ip` back to a name and inject the result. A timeout or failure
/// injects `None` and the engine keeps the IP text.
pub fn spawn_reverse_dns(
    uid: String,
    ip: IpAddr,
    timeout: Duration,
    events: mpsc::Sender<Event>,
) {
    tokio::spawn(async move {
        let resolver = TokioResolver::builder_tokio()
            .map(|b| b.build())
            .unwrap_or_else(|_| {
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
                .build()
            });

        let host = match tokio::time::timeout(timeout, resolver.reverse_lookup(ip)).await {
            Ok(Ok(names)) => names
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_string()),
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "Reverse DNS failed");
                None
            }
            Err(_) => {
                debug!(ip = %ip, "Reverse DNS timed out");
                None
            }
        };
        let _ = events.send(Event::HostResolved { uid, host }).await;
    });
}

/// RFC 1413 ident query, run on the worker pool because it is plain
/// blocking socket I/O.
pub struct IdentJob {
    pub uid: String,
    pub peer: SocketAddr,
    pub local_port: u16,
    pub timeout: Duration,
    result: Option<String>,
}

impl IdentJob {
    pub fn new(uid: String, peer: SocketAddr, local_port: u16, timeout: Duration) -> Self {
        Self {
            uid,
            peer,
            local_port,
            timeout,
            result: None,
        }
    }

    fn query(&self) -> Option<String> {
        let ident_addr = SocketAddr::new(self.peer.ip(), 113);
        let stream = TcpStream::connect_timeout(&ident_addr, self.timeout).ok()?;
        stream.set_read_timeout(Some(self.timeout)).ok()?;
        stream.set_write_timeout(Some(self.timeout)).ok()?;

        let mut writer = stream.try_clone().ok()?;
        writer
            .write_all(format!("{}, {}\r\n", self.peer.port(), self.local_port).as_bytes())
            .ok()?;

        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).ok()?;
        // "<ports> : USERID : <os> : <user>"
        let mut fields = line.split(':').map(str::trim);
        let _ports = fields.next()?;
        if fields.next()? != "USERID" {
            return None;
        }
        let _os = fields.next()?;
        let user = fields.next()?.to_string();
        if user.is_empty() || user.contains([' ', '@']) {
            return None;
        }
        Some(user)
    }
}

impl Job for IdentJob {
    fn name(&self) -> &'static str {
        "ident-lookup"
    }

    fn run(&mut self, cancelled: &AtomicBool) {
        if cancelled.load(Ordering::Relaxed) {
            return;
        }
        self.result = self.query();
    }

    fn finish(self: Box<Self>, world: &mut World) {
        let ident_len = world.config.limits.ident_len;
        if let Some(user) = world.user_mut(&self.uid) {
            match self.result {
                Some(ident) => {
                    user.ident = ident.chars().take(ident_len).collect();
                    debug!(uid = %self.uid, ident = %user.ident, "Ident lookup succeeded");
                }
                None => {
                    debug!(uid = %self.uid, "Ident lookup failed");
                }
            }
            user.lookups_pending = user.lookups_pending.saturating_sub(1);
        }
        crate::handlers::connection::try_complete(world, &self.uid);
    }
}
