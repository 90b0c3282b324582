//! The state engine.
//!
//! One task owns the [`World`] and is the only place protocol state
//! mutates. Everything reaches it through the event queue: accepted
//! connections, parsed-off-socket lines, socket closures, resolver results
//! and finished worker jobs. Handlers run to completion; the loop's only
//! suspension point is its own select. At the end of every iteration the
//! cull queue is drained, so an object deferred for destruction dies
//! exactly once, never inside the handler that condemned it.

pub mod jobs;
pub mod timers;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::{ClassConfig, Config};
use crate::dispatch::{self, CommandTable};
use crate::handlers;
use crate::network::lookup;
use crate::state::persistence;
use crate::state::world::{Link, World};
use crate::xline::store;
use ember_proto::Message;

use jobs::{Job, WorkerPool};
use timers::{TimerHeap, TimerKind};

/// How often the maintenance sweep (pings, deadlines, throttles) runs.
const MAINTENANCE_PERIOD: Duration = Duration::from_secs(1);
/// How often expired X-lines are removed.
const XLINE_SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// Everything that can wake the engine.
pub enum Event {
    /// A listener accepted a connection.
    Accepted {
        addr: SocketAddr,
        local_port: u16,
        tls: bool,
        password: Option<String>,
        class: Arc<ClassConfig>,
        tx: mpsc::Sender<String>,
        throttle: watch::Sender<bool>,
        /// UID on success, kill reason otherwise.
        reply: oneshot::Sender<Result<String, String>>,
    },
    /// One line read from a connection, terminator stripped.
    Line { uid: String, line: String },
    /// The socket went away.
    Closed { uid: String, reason: Option<String> },
    /// Reverse DNS finished.
    HostResolved { uid: String, host: Option<String> },
    /// Stop the engine.
    Shutdown,
}

/// Cloneable handle the network layer uses to reach the engine.
#[derive(Clone)]
pub struct EngineHandle {
    pub events: mpsc::Sender<Event>,
}

pub struct Engine {
    pub world: World,
    events_rx: mpsc::Receiver<Event>,
    events_tx: mpsc::Sender<Event>,
    job_rx: mpsc::Receiver<Box<dyn Job>>,
    pool: WorkerPool,
    table: CommandTable,
    timers: TimerHeap,
}

impl Engine {
    pub fn new(config: Arc<Config>, config_path: String) -> (Self, EngineHandle) {
        let (events_tx, events_rx) = mpsc::channel(1024);
        let (job_tx, job_rx) = mpsc::channel(256);
        let pool = WorkerPool::new(config.server.worker_threads, job_tx);
        let mut world = World::new(config);
        world.config_path = config_path;
        let engine = Self {
            world,
            events_rx,
            events_tx: events_tx.clone(),
            job_rx,
            pool,
            table: handlers::build_table(),
            timers: TimerHeap::new(),
        };
        (engine, EngineHandle { events: events_tx })
    }

    /// Replay the databases and arm the periodic timers.
    pub fn bootstrap(&mut self) {
        let xline_path = PathBuf::from(&self.world.config.xline.db_path);
        match store::load(&xline_path) {
            Ok(stored) if !stored.is_empty() => {
                let count = self.world.xlines.restore(stored, self.world.casemap);
                info!(count, "Restored X-lines from database");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to load X-line database"),
        }

        if self.world.config.channeldb.enabled {
            if let Some(path) = self.world.config.channeldb.path.clone() {
                match persistence::load_channels(&PathBuf::from(&path), &self.world.modes) {
                    Ok(stored) if !stored.is_empty() => {
                        info!(count = stored.len(), "Restored permanent channels");
                        persistence::restore_channels(&mut self.world, stored);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Failed to load channel database"),
                }
                self.timers.schedule(
                    TimerKind::ChannelDbFlush,
                    Duration::from_secs(self.world.config.xline.save_interval_secs),
                    Some(Duration::from_secs(self.world.config.xline.save_interval_secs)),
                );
            }
        }

        self.timers
            .schedule(TimerKind::Maintenance, MAINTENANCE_PERIOD, Some(MAINTENANCE_PERIOD));
        self.timers
            .schedule(TimerKind::XLineSweep, XLINE_SWEEP_PERIOD, Some(XLINE_SWEEP_PERIOD));
        let flush = Duration::from_secs(self.world.config.xline.save_interval_secs);
        self.timers.schedule(TimerKind::XLineFlush, flush, Some(flush));
    }

    pub async fn run(mut self) {
        info!("State engine running");
        loop {
            let deadline = self
                .timers
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            let mut stop = false;
            tokio::select! {
                maybe = self.events_rx.recv() => match maybe {
                    Some(Event::Shutdown) | None => stop = true,
                    Some(event) => self.handle_event(event),
                },
                Some(job) = self.job_rx.recv() => {
                    debug!(job = job.name(), "Job finished");
                    job.finish(&mut self.world);
                },
                _ = tokio::time::sleep_until(deadline) => {
                    for kind in self.timers.pop_due(Instant::now()) {
                        self.fire_timer(kind);
                    }
                },
            }
            if stop {
                break;
            }

            // Deferred destruction happens here, once per iteration.
            self.world.drain_cull();

            // Without a linked network, routing descriptors terminate here.
            for routed in self.world.routes.drain(..) {
                trace!(
                    source = %routed.source_uid,
                    command = %routed.message.command,
                    route = ?routed.route,
                    "Routing descriptor dropped (unlinked server)"
                );
            }
        }

        info!("State engine stopping");
        self.flush_xlines();
        self.pool.shutdown();
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Accepted {
                addr,
                local_port,
                tls,
                password,
                class,
                tx,
                throttle,
                reply,
            } => {
                let result = self.accept(addr, local_port, tls, password, class, tx, throttle);
                let _ = reply.send(result);
            }
            Event::Line { uid, line } => {
                dispatch::dispatch_line(&mut self.world, &self.table, &uid, &line);
            }
            Event::Closed { uid, reason } => {
                let reason = reason.unwrap_or_else(|| "Connection closed".to_string());
                self.world.quit_user(&uid, &reason);
            }
            Event::HostResolved { uid, host } => {
                let host_len = self.world.config.limits.host_len;
                if let Some(user) = self.world.user_mut(&uid) {
                    if let Some(host) = host {
                        let host: String = host.chars().take(host_len).collect();
                        user.real_host = host.clone();
                        user.shown_host = host;
                    }
                    user.lookups_pending = user.lookups_pending.saturating_sub(1);
                }
                handlers::connection::try_complete(&mut self.world, &uid);
            }
            Event::Shutdown => {}
        }
    }

    /// Accept path: quota, Z-line, pre-user creation, lookups.
    #[allow(clippy::too_many_arguments)]
    fn accept(
        &mut self,
        addr: SocketAddr,
        local_port: u16,
        tls: bool,
        password: Option<String>,
        class: Arc<ClassConfig>,
        tx: mpsc::Sender<String>,
        throttle: watch::Sender<bool>,
    ) -> Result<String, String> {
        if self.world.conns_from_ip(addr.ip()) >= class.max_conns_per_ip {
            return Err("Too many connections from your IP".to_string());
        }

        // Z-lines kill before any data is read.
        if let Some(line) = self.world.xlines.check_ip(addr.ip(), World::now()) {
            self.world
                .server_notice(&format!("Z-lined connection from {}: {}", addr.ip(), line.reason));
            return Err(format!("Z-lined: {}", line.reason));
        }

        let link = Link {
            tx,
            throttle,
            addr,
            tls,
            password,
        };
        let resolve_timeout = Duration::from_secs(class.resolve_timeout_secs);
        let resolve_dns = class.resolve_hostnames;
        let lookup_ident = class.lookup_ident;
        let uid = self.world.create_user(link, class);

        if let Some(user) = self.world.user_mut(&uid) {
            user.lookups_pending =
                u8::from(resolve_dns) + u8::from(lookup_ident);
        }
        if resolve_dns {
            lookup::spawn_reverse_dns(uid.clone(), addr.ip(), resolve_timeout, self.events_tx.clone());
        }
        if lookup_ident {
            self.pool.submit(Box::new(lookup::IdentJob::new(
                uid.clone(),
                addr,
                local_port,
                resolve_timeout,
            )));
        }
        debug!(uid = %uid, addr = %addr, tls, "Connection accepted");
        Ok(uid)
    }

    fn fire_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Maintenance => self.maintenance(),
            TimerKind::XLineSweep => {
                let removed = self.world.xlines.sweep(World::now());
                for line in removed {
                    self.world.server_notice(&format!(
                        "Expired {}-line on {} (set by {})",
                        line.kind, line.pattern, line.setter
                    ));
                }
            }
            TimerKind::XLineFlush => self.flush_xlines(),
            TimerKind::ChannelDbFlush => self.flush_channels(),
        }
    }

    /// Once a second: registration deadlines, lookup timeouts, ping
    /// liveness, flood-throttle release.
    fn maintenance(&mut self) {
        let now = World::now();
        dispatch::release_throttles(&mut self.world);

        struct Pending {
            uid: String,
            action: Action,
        }
        enum Action {
            QuitRegistration,
            QuitPing(u64),
            FinishLookups,
            SendPing,
        }

        let mut pending: Vec<Pending> = Vec::new();
        for (uid, user) in &self.world.users {
            if user.quitting || !self.world.links.contains_key(uid) {
                continue;
            }
            let class = &user.class;
            if !user.registered {
                if now - user.connected_at >= class.registration_timeout_secs as i64 {
                    pending.push(Pending {
                        uid: uid.clone(),
                        action: Action::QuitRegistration,
                    });
                } else if user.lookups_pending > 0
                    && now - user.connected_at >= class.resolve_timeout_secs as i64
                {
                    pending.push(Pending {
                        uid: uid.clone(),
                        action: Action::FinishLookups,
                    });
                }
                continue;
            }
            let pingfreq = class.pingfreq_secs as i64;
            match user.ping_sent_at {
                Some(sent) if now - sent >= pingfreq => pending.push(Pending {
                    uid: uid.clone(),
                    action: Action::QuitPing(class.pingfreq_secs),
                }),
                None if now - user.last_activity >= pingfreq => pending.push(Pending {
                    uid: uid.clone(),
                    action: Action::SendPing,
                }),
                _ => {}
            }
        }

        for Pending { uid, action } in pending {
            match action {
                Action::QuitRegistration => {
                    self.world.quit_user(&uid, "Registration timed out");
                }
                Action::QuitPing(freq) => {
                    self.world
                        .quit_user(&uid, &format!("Ping timeout: {freq} seconds"));
                }
                Action::FinishLookups => {
                    if let Some(user) = self.world.user_mut(&uid) {
                        user.lookups_pending = 0;
                    }
                    handlers::connection::try_complete(&mut self.world, &uid);
                }
                Action::SendPing => {
                    let server = self.world.server_name().to_string();
                    let ping = Message::cmd("PING").trailing_param(server);
                    self.world.send_to(&uid, &ping);
                    if let Some(user) = self.world.user_mut(&uid) {
                        user.ping_sent_at = Some(now);
                    }
                }
            }
        }
    }

    /// Snapshot and write the X-line database off-thread when dirty.
    fn flush_xlines(&mut self) {
        if !self.world.xlines.is_dirty() {
            return;
        }
        let entries = self.world.xlines.all_entries();
        let path = PathBuf::from(&self.world.config.xline.db_path);
        self.world.xlines.mark_clean();
        self.pool.submit(Box::new(FlushXLinesJob {
            path,
            entries,
            failed: false,
        }));
    }

    /// Snapshot the permanent channels and write them off-thread.
    fn flush_channels(&mut self) {
        let Some(path) = self.world.config.channeldb.path.clone() else {
            return;
        };
        let text = persistence::render_channels(&self.world);
        self.pool.submit(Box::new(FlushChannelsJob {
            path: PathBuf::from(path),
            text,
        }));
    }
}

/// Writes the rendered channel database to disk.
struct FlushChannelsJob {
    path: PathBuf,
    text: String,
}

impl Job for FlushChannelsJob {
    fn name(&self) -> &'static str {
        "channeldb-flush"
    }

    fn run(&mut self, _cancelled: &AtomicBool) {
        if let Err(e) = persistence::write_text(&self.path, &self.text) {
            error!(error = %e, "Failed to write channel database");
        }
    }

    fn finish(self: Box<Self>, _world: &mut World) {}
}

/// Writes a snapshot of the X-line registry to disk.
struct FlushXLinesJob {
    path: PathBuf,
    entries: Vec<crate::xline::XLine>,
    failed: bool,
}

impl Job for FlushXLinesJob {
    fn name(&self) -> &'static str {
        "xline-flush"
    }

    fn run(&mut self, _cancelled: &AtomicBool) {
        if let Err(e) = store::save(&self.path, &self.entries) {
            error!(error = %e, "Failed to write X-line database");
            self.failed = true;
        }
    }

    fn finish(self: Box<Self>, world: &mut World) {
        if self.failed {
            // Try again on the next flush cycle.
            world.xlines.mark_dirty();
        } else {
            debug!(count = self.entries.len(), "X-line database written");
        }
    }
}
