//! The world: every user, channel, index and registry, owned by the engine
//! task.
//!
//! Nothing here is shared or locked; handlers receive `&mut World` and run
//! to completion. Connection tasks only touch the world indirectly through
//! the engine's event queue, and receive output through their per-connection
//! sender (the sendq).
//!
//! Users and channels never own each other: channels own memberships, users
//! carry the set of channel keys they sit in, and every mutator updates both
//! sides. Destruction is deferred to the cull queue drained at the end of
//! each engine iteration.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::caps::CapRegistry;
use crate::config::{ClassConfig, Config};
use crate::ext::{CoreSlots, ServiceRegistry, SlotRegistry, SlotTarget};
use crate::hooks::{self, Decision, Hooks, PreConnectEvent, QuitEvent};
use crate::modes::ModeRegistry;
use crate::state::channel::{Channel, Membership};
use crate::state::uid::UidGenerator;
use crate::state::user::User;
use crate::xline::XLineRegistry;
use ember_proto::{Casemap, Message, NumericBuilder, StandardReply};

/// Per-connection handle: how the engine reaches a socket.
#[derive(Debug)]
pub struct Link {
    /// Serialized outbound lines. The bounded capacity is the sendq;
    /// overflow kills the connection.
    pub tx: mpsc::Sender<String>,
    /// Read throttle: `true` pauses the reader (flood control).
    pub throttle: watch::Sender<bool>,
    pub addr: SocketAddr,
    /// Accepted on a TLS listener.
    pub tls: bool,
    /// Listener password, checked against PASS at registration.
    pub password: Option<String>,
}

/// Outcome of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegOutcome {
    /// Still missing NICK, USER or CAP END.
    NotReady,
    /// Transitioned to registered; caller sends the welcome burst.
    Registered,
    /// A pre-connect hook or an X-line refused the user; already quit.
    Denied,
}

pub struct World {
    pub config: Arc<Config>,
    /// Where the configuration came from, for REHASH.
    pub config_path: String,
    pub casemap: Casemap,
    /// All users by UID, including quitting ones awaiting the cull.
    pub users: HashMap<String, User>,
    /// Casemapped nick → UID.
    pub nicks: HashMap<String, String>,
    /// Casemapped name → channel.
    pub channels: HashMap<String, Channel>,
    /// UID → connection handle, local users only.
    pub links: HashMap<String, Link>,
    pub uid_gen: UidGenerator,
    pub xlines: XLineRegistry,
    pub caps: CapRegistry,
    pub hooks: Hooks,
    pub services: ServiceRegistry,
    pub modes: ModeRegistry,
    pub slots: SlotRegistry,
    /// Handles to the extension slots the core attaches itself.
    pub core_slots: CoreSlots,
    pub motd: Option<Vec<String>>,
    /// Startup time, for 003/RPL_CREATED.
    pub started_at: i64,
    /// Monotonic broadcast serial for exactly-once delivery.
    next_serial: u64,
    /// Deferred destruction, drained at the end of each loop iteration.
    pub cull_users: Vec<String>,
    pub cull_channels: Vec<String>,
    /// Routing descriptors produced by handlers, drained by the federation
    /// layer (or logged and dropped on unlinked servers).
    pub routes: Vec<crate::dispatch::RoutedCommand>,
}

impl World {
    pub fn new(config: Arc<Config>) -> Self {
        let casemap = config.casemap();
        let mut caps = CapRegistry::new();
        for listen in &config.listen {
            if listen.tls {
                if let Some(duration) = listen.sts_duration {
                    caps.register_sts(listen.port, duration);
                    break;
                }
            }
        }
        let motd = config.motd.load_lines();
        let mut slots = SlotRegistry::new();
        let core_slots = CoreSlots::register(&mut slots);
        Self {
            casemap,
            uid_gen: UidGenerator::new(&config.server.sid),
            users: HashMap::new(),
            nicks: HashMap::new(),
            channels: HashMap::new(),
            links: HashMap::new(),
            xlines: XLineRegistry::new(),
            caps,
            hooks: Hooks::default(),
            services: ServiceRegistry::new(),
            modes: ModeRegistry::new(),
            slots,
            core_slots,
            motd,
            started_at: Self::now(),
            next_serial: 0,
            cull_users: Vec::new(),
            cull_channels: Vec::new(),
            routes: Vec::new(),
            config_path: String::new(),
            config,
        }
    }

    pub fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    pub fn now_ms() -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }

    pub fn server_name(&self) -> &str {
        &self.config.server.name
    }

    /// Casemapped index key.
    pub fn key(&self, s: &str) -> String {
        self.casemap.key(s)
    }

    pub fn user(&self, uid: &str) -> Option<&User> {
        self.users.get(uid)
    }

    pub fn user_mut(&mut self, uid: &str) -> Option<&mut User> {
        self.users.get_mut(uid)
    }

    pub fn find_uid_by_nick(&self, nick: &str) -> Option<String> {
        self.nicks.get(&self.key(nick)).cloned()
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&self.key(name))
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        let key = self.key(name);
        self.channels.get_mut(&key)
    }

    /// Reserve a fresh broadcast serial.
    pub fn reserve_serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    // === Connection lifecycle ===

    /// Create the pre-user for an accepted connection and index it by UID.
    pub fn create_user(&mut self, link: Link, class: Arc<ClassConfig>) -> String {
        let uid = self.uid_gen.next_uid();
        let mut user = User::new(
            uid.clone(),
            link.addr.ip(),
            self.config.server.name.clone(),
            class,
            Self::now(),
        );
        user.secure = link.tls;
        self.links.insert(uid.clone(), link);
        self.users.insert(uid.clone(), user);
        debug!(uid = %uid, "User created");
        uid
    }

    /// Count current connections from one address (per-IP quota).
    pub fn conns_from_ip(&self, ip: std::net::IpAddr) -> u32 {
        self.links.values().filter(|l| l.addr.ip() == ip).count() as u32
    }

    // === Output ===

    /// Serialize and queue one message for a local user. A full sendq kills
    /// the connection.
    pub fn send_to(&mut self, uid: &str, msg: &Message) {
        let max_line = self.config.limits.max_line;
        let Some(link) = self.links.get(uid) else {
            return;
        };
        let wire = msg.to_wire(max_line);
        match link.tx.try_send(wire) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(uid = %uid, "SendQ exceeded");
                self.quit_user(uid, "SendQ exceeded");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Socket already gone; the Closed event will clean up.
            }
        }
    }

    /// Send a numeric built with [`NumericBuilder`].
    pub fn send_numeric(&mut self, uid: &str, numeric: NumericBuilder) {
        let target = self
            .user(uid)
            .map(|u| u.reply_nick().to_string())
            .unwrap_or_else(|| "*".to_string());
        let msg = numeric.message(&self.config.server.name.clone(), &target);
        self.send_to(uid, &msg);
    }

    /// Standard reply or NOTICE fallback, depending on the client's caps.
    pub fn send_standard(&mut self, uid: &str, reply: &StandardReply) {
        let server = self.config.server.name.clone();
        let (has_cap, nick) = match self.user(uid) {
            Some(u) => (u.has_cap("standard-replies"), u.reply_nick().to_string()),
            None => return,
        };
        let msg = if has_cap {
            reply.message(&server)
        } else {
            reply.fallback(&server, &nick)
        };
        self.send_to(uid, &msg);
    }

    /// Server notice to every +s oper.
    pub fn server_notice(&mut self, text: &str) {
        info!(notice = %text, "Server notice");
        let server = self.config.server.name.clone();
        let targets: Vec<(String, String)> = self
            .users
            .values()
            .filter(|u| u.registered && u.modes.snotices)
            .map(|u| (u.uid.clone(), u.reply_nick().to_string()))
            .collect();
        for (uid, nick) in targets {
            let msg = Message::cmd("NOTICE")
                .with_source(server.clone())
                .param(nick)
                .trailing_param(format!("*** {text}"));
            self.send_to(&uid, &msg);
        }
    }

    // === Nick handling ===

    /// Bind a validated nick to a user, maintaining the casemapped index.
    /// Fails when another live user holds an equivalent nick.
    pub fn set_nick(&mut self, uid: &str, nick: &str) -> Result<Option<String>, ()> {
        let key = self.key(nick);
        if let Some(holder) = self.nicks.get(&key) {
            if holder != uid {
                return Err(());
            }
        }
        let user = self.users.get_mut(uid).ok_or(())?;
        let old = user.nick.replace(nick.to_string());
        if let Some(old_nick) = &old {
            let old_key = self.casemap.key(old_nick);
            if old_key != key {
                self.nicks.remove(&old_key);
            }
        }
        self.nicks.insert(key, uid.to_string());
        Ok(old)
    }

    // === Registration ===

    /// Try to complete registration: all progress flags, then the
    /// pre-connect hook chain, then the X-line check against the finalized
    /// identity.
    pub fn try_register(&mut self, uid: &str) -> RegOutcome {
        let Some(user) = self.user(uid) else {
            return RegOutcome::NotReady;
        };
        if user.registered
            || user.quitting
            || !user.progress.complete()
            || user.lookups_pending > 0
        {
            return RegOutcome::NotReady;
        }

        // Listener password gate.
        let expected = self.links.get(uid).and_then(|l| l.password.clone());
        if let Some(expected) = expected {
            let supplied = self.user(uid).and_then(|u| u.password.clone());
            if supplied.as_deref() != Some(expected.as_str()) {
                self.quit_user(uid, "Password mismatch");
                return RegOutcome::Denied;
            }
        }

        let event = PreConnectEvent {
            uid: uid.to_string(),
        };
        if hooks::first_result(self, |h| &h.pre_connect, &event) == Decision::Deny {
            self.quit_user(uid, "Access denied by server policy");
            return RegOutcome::Denied;
        }

        // K/G/Z/Q/R evaluation against the finalized identity.
        let now = Self::now();
        let matched = self
            .user(uid)
            .and_then(|u| self.xlines.check_user(u, now, self.casemap));
        if let Some(line) = matched {
            let reason = format!("{}-lined: {}", line.kind, line.reason);
            self.server_notice(&format!(
                "Connection from {} denied ({} on {}): {}",
                self.users.get(uid).map(|u| u.hostmask()).unwrap_or_default(),
                line.kind,
                line.pattern,
                line.reason
            ));
            self.quit_user(uid, &reason);
            return RegOutcome::Denied;
        }

        if let Some(user) = self.users.get_mut(uid) {
            user.registered = true;
        }
        RegOutcome::Registered
    }

    // === Membership ===

    /// Insert a membership on both sides. Returns whether the channel was
    /// created (the caller decides founder policy).
    pub fn add_member(&mut self, uid: &str, name: &str, now: i64) -> bool {
        let key = self.key(name);
        let invite_slot = self.core_slots.invite_list;
        let created = !self.channels.contains_key(&key);
        let channel = self
            .channels
            .entry(key.clone())
            .or_insert_with(|| Channel::new(name, now));
        channel.members.insert(uid.to_string(), Membership::new(uid, now));
        // Joining consumes any pending invite.
        if let Some(invites) = channel.ext.get_mut(invite_slot) {
            invites.remove(uid);
        }
        if let Some(user) = self.users.get_mut(uid) {
            user.channels.insert(key);
        }
        created
    }

    /// Remove a membership on both sides; queue empty non-permanent
    /// channels for destruction.
    pub fn remove_member(&mut self, uid: &str, key: &str) {
        if let Some(channel) = self.channels.get_mut(key) {
            channel.members.remove(uid);
            if channel.members.is_empty() && !channel.is_permanent() {
                self.cull_channels.push(key.to_string());
            }
        }
        if let Some(user) = self.users.get_mut(uid) {
            user.channels.remove(key);
        }
    }

    // === Quit path ===

    /// The five-step quit: mark, broadcast to common-channel neighbors,
    /// tear memberships down, drop the nick index entry, queue the cull.
    pub fn quit_user(&mut self, uid: &str, reason: &str) {
        let Some(user) = self.users.get_mut(uid) else {
            return;
        };
        if user.quitting {
            return;
        }
        user.quitting = true;
        let hostmask = user.hostmask();
        let nick = user.nick.clone();
        let channel_keys: Vec<String> = user.channels.iter().cloned().collect();
        debug!(uid = %uid, reason = %reason, "User quitting");

        let quit_msg = Message::cmd("QUIT")
            .with_source(hostmask)
            .trailing_param(reason);
        crate::routing::broadcast_neighbors(self, uid, &quit_msg, false);

        for key in channel_keys {
            self.remove_member(uid, &key);
        }

        if let Some(nick) = nick {
            let key = self.casemap.key(&nick);
            if self.nicks.get(&key).map(String::as_str) == Some(uid) {
                self.nicks.remove(&key);
            }
        }

        // Tell the client why, then close.
        if let Some(link) = self.links.get(uid) {
            let error = Message::cmd("ERROR").trailing_param(format!("Closing link: ({reason})"));
            let _ = link.tx.try_send(error.to_wire(self.config.limits.max_line));
        }

        let mut event = QuitEvent {
            uid: uid.to_string(),
            reason: reason.to_string(),
        };
        hooks::notify_all(self, |h| &h.user_quit, &mut event);

        // Deregistration clears the slots flagged for it before the object
        // reaches the cull.
        let reset = self.slots.reset_ids_for(SlotTarget::User);
        if let Some(user) = self.users.get_mut(uid) {
            user.ext.reset(&reset);
        }

        self.cull_users.push(uid.to_string());
    }

    /// Drain the cull queue: the single place deferred-destroyed objects
    /// actually die.
    pub fn drain_cull(&mut self) {
        for uid in std::mem::take(&mut self.cull_users) {
            self.users.remove(&uid);
            self.links.remove(&uid);
        }
        for key in std::mem::take(&mut self.cull_channels) {
            if let Some(channel) = self.channels.get(&key) {
                if channel.members.is_empty() && !channel.is_permanent() {
                    debug!(channel = %channel.name, "Channel destroyed");
                    self.channels.remove(&key);
                }
            }
        }
    }

    // === Casemap migration ===

    /// Swap the lowering table and rebuild every casemapped index before any
    /// further dispatch. Users whose nicks collide under the new map keep
    /// their connection but are renamed to their UID; the caller broadcasts
    /// those renames. Colliding channels merge into the older one, with the
    /// newcomers' ranks dropped.
    pub fn swap_casemap(&mut self, new: Casemap) -> Vec<(String, String)> {
        if new == self.casemap {
            return Vec::new();
        }
        info!(from = %self.casemap.name(), to = %new.name(), "Casemap changed; rebuilding indexes");
        self.casemap = new;

        // Rebuild the nick index; earliest connection wins a collision.
        let mut order: Vec<(String, String, i64)> = self
            .users
            .values()
            .filter(|u| !u.quitting)
            .filter_map(|u| u.nick.clone().map(|n| (u.uid.clone(), n, u.connected_at)))
            .collect();
        order.sort_by_key(|(_, _, at)| *at);

        let mut renamed = Vec::new();
        self.nicks.clear();
        for (uid, nick, _) in order {
            let key = new.key(&nick);
            if self.nicks.contains_key(&key) {
                // Ambiguous under the new map: fall back to the UID.
                if let Some(user) = self.users.get_mut(&uid) {
                    user.nick = Some(uid.clone());
                }
                self.nicks.insert(new.key(&uid), uid.clone());
                renamed.push((uid, nick));
            } else {
                self.nicks.insert(key, uid);
            }
        }

        // Rebuild the channel index, merging collisions into the older side.
        let old_channels = std::mem::take(&mut self.channels);
        for (_, channel) in old_channels {
            let key = new.key(&channel.name);
            match self.channels.remove(&key) {
                None => {
                    self.channels.insert(key, channel);
                }
                Some(existing) => {
                    let (mut survivor, loser) = if existing.ts <= channel.ts {
                        (existing, channel)
                    } else {
                        (channel, existing)
                    };
                    for (uid, mut membership) in loser.members {
                        membership.ranks.clear();
                        survivor.members.entry(uid).or_insert(membership);
                    }
                    self.channels.insert(key, survivor);
                }
            }
        }

        // User channel-key sets must agree with the rebuilt channel index.
        let memberships: Vec<(String, String)> = self
            .channels
            .iter()
            .flat_map(|(key, c)| c.members.keys().map(move |uid| (uid.clone(), key.clone())))
            .collect();
        for user in self.users.values_mut() {
            user.channels.clear();
        }
        for (uid, key) in memberships {
            if let Some(user) = self.users.get_mut(&uid) {
                user.channels.insert(key);
            }
        }

        renamed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn world() -> World {
        let config = Config::parse(
            r#"
            [server]
            name = "irc.example.net"
            sid = "001"
            network = "EmberNet"
            description = "test"
            "#,
            "test",
        )
        .unwrap();
        World::new(Arc::new(config))
    }

    fn fake_link() -> (Link, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(64);
        let (throttle, _) = watch::channel(false);
        (
            Link {
                tx,
                throttle,
                addr: "127.0.0.1:50000".parse().unwrap(),
                tls: false,
                password: None,
            },
            rx,
        )
    }

    fn add_user(world: &mut World, nick: &str) -> String {
        let (link, rx) = fake_link();
        std::mem::forget(rx); // keep the channel open
        let class = Arc::new(crate::config::ClassConfig::default());
        let uid = world.create_user(link, class);
        world.set_nick(&uid, nick).unwrap();
        uid
    }

    #[test]
    fn nick_index_casemapped() {
        let mut w = world();
        let uid = add_user(&mut w, "Alice[1]");
        assert_eq!(w.find_uid_by_nick("alice{1}"), Some(uid.clone()));
        // A colliding nick is refused.
        let (link, rx) = fake_link();
        std::mem::forget(rx);
        let uid2 = w.create_user(link, Arc::new(crate::config::ClassConfig::default()));
        assert!(w.set_nick(&uid2, "ALICE{1}").is_err());
    }

    #[test]
    fn membership_bidirectional() {
        let mut w = world();
        let uid = add_user(&mut w, "alice");
        let created = w.add_member(&uid, "#Test", 100);
        assert!(created);
        let key = w.key("#Test");
        assert!(w.channels[&key].members.contains_key(&uid));
        assert!(w.users[&uid].channels.contains(&key));

        w.remove_member(&uid, &key);
        assert!(!w.users[&uid].channels.contains(&key));
        // Empty channel destroyed at the cull.
        w.drain_cull();
        assert!(!w.channels.contains_key(&key));
    }

    #[test]
    fn join_consumes_pending_invite() {
        let mut w = world();
        let alice = add_user(&mut w, "alice");
        let bob = add_user(&mut w, "bob");
        w.add_member(&alice, "#club", 100);
        let key = w.key("#club");
        let slot = w.core_slots.invite_list;
        w.channels
            .get_mut(&key)
            .unwrap()
            .ext
            .get_or_insert_with(slot, Default::default)
            .insert(bob.clone());

        w.add_member(&bob, "#club", 101);
        let invites = w.channels[&key].ext.get(slot).unwrap();
        assert!(!invites.contains(&bob));
    }

    #[test]
    fn quit_resets_flagged_user_slots() {
        let mut w = world();
        let uid = add_user(&mut w, "alice");
        let slot = w.core_slots.oper_account;
        w.users.get_mut(&uid).unwrap().ext.set(slot, "staff".to_string());

        w.quit_user(&uid, "bye");
        // oper-account is flagged reset-on-deregister.
        assert!(w.users[&uid].ext.get(slot).is_none());
    }

    #[test]
    fn permanent_channel_survives_cull() {
        let mut w = world();
        let uid = add_user(&mut w, "alice");
        w.add_member(&uid, "#keep", 100);
        let key = w.key("#keep");
        w.channels.get_mut(&key).unwrap().modes.insert('P');
        w.remove_member(&uid, &key);
        w.drain_cull();
        assert!(w.channels.contains_key(&key));
    }

    #[test]
    fn quit_removes_indexes_then_culls() {
        let mut w = world();
        let uid = add_user(&mut w, "alice");
        w.add_member(&uid, "#t", 100);
        w.quit_user(&uid, "bye");
        // Indexes cleared immediately, object lives until the cull.
        assert!(w.find_uid_by_nick("alice").is_none());
        assert!(w.users.contains_key(&uid));
        assert!(w.users[&uid].quitting);
        w.drain_cull();
        assert!(!w.users.contains_key(&uid));
    }

    #[test]
    fn casemap_swap_renames_collisions() {
        let mut w = world();
        // Distinct under rfc1459? No: "nick~" vs "nick^" are EQUAL under
        // rfc1459. Start from ascii, where they differ.
        w.casemap = Casemap::Ascii;
        let first = add_user(&mut w, "nick~");
        let second = add_user(&mut w, "nick^");
        assert_ne!(first, second);

        let renamed = w.swap_casemap(Casemap::Rfc1459);
        assert_eq!(renamed.len(), 1);
        let (loser_uid, old_nick) = &renamed[0];
        // The later connection lost and now answers to its UID.
        assert_eq!(loser_uid, &second);
        assert_eq!(old_nick, "nick^");
        assert_eq!(w.users[&second].nick.as_deref(), Some(second.as_str()));
        assert_eq!(w.find_uid_by_nick("NICK~"), Some(first));
    }

    #[test]
    fn serial_is_monotonic() {
        let mut w = world();
        let a = w.reserve_serial();
        let b = w.reserve_serial();
        assert!(b > a);
    }
}
