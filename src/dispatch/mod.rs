//! Command dispatch and flood accounting.
//!
//! One inbound line becomes one handler invocation: parse (with the tag and
//! RFC budgets), look the command up case-insensitively, enforce
//! minimum-parameter and registration gates, run the pre-command hook
//! chain, then the handler. Handlers report their outcome as a result code;
//! errors never cross this boundary as panics or exceptions.
//!
//! Every command carries a penalty (default 1000 pseudo-milliseconds) added
//! to a per-connection counter that decays at wall-clock rate. Past the
//! class ceiling the connection's reads pause; far past it, the client is
//! quit. A slow command from one connection never delays another: penalties
//! only ever gate their own connection's reads.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::hooks::{self, Decision, PreCommandEvent};
use crate::state::world::World;
use ember_proto::{parse_line, LineError, Message, Numeric, ParseLimits, Tag};

/// Default per-command penalty.
pub const DEFAULT_PENALTY_MS: u64 = 1_000;
/// Penalty for unparseable or oversize input.
pub const GARBAGE_PENALTY_MS: u64 = 2_000;
/// Penalty for unknown commands.
pub const UNKNOWN_PENALTY_MS: u64 = 500;
/// Extra penalty when a handler reports `Invalid`.
pub const INVALID_PENALTY_MS: u64 = 1_000;

/// Handler outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmdStatus {
    Success,
    Failure,
    Invalid,
}

/// Where the federation layer should carry this command, if anywhere.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteDescriptor {
    /// Stays on this server.
    LocalOnly,
    /// Propagate to every peer.
    Broadcast,
    /// Send to the server owning the given SID or name.
    Unicast(String),
    /// Message-style routing toward a nick or channel target.
    Target(String),
}

/// What a handler returns.
#[derive(Clone, Debug)]
pub struct CmdResult {
    pub status: CmdStatus,
    pub route: RouteDescriptor,
}

impl CmdResult {
    pub fn ok() -> Self {
        Self {
            status: CmdStatus::Success,
            route: RouteDescriptor::LocalOnly,
        }
    }

    pub fn ok_broadcast() -> Self {
        Self {
            status: CmdStatus::Success,
            route: RouteDescriptor::Broadcast,
        }
    }

    pub fn ok_target(target: impl Into<String>) -> Self {
        Self {
            status: CmdStatus::Success,
            route: RouteDescriptor::Target(target.into()),
        }
    }

    pub fn failure() -> Self {
        Self {
            status: CmdStatus::Failure,
            route: RouteDescriptor::LocalOnly,
        }
    }

    pub fn invalid() -> Self {
        Self {
            status: CmdStatus::Invalid,
            route: RouteDescriptor::LocalOnly,
        }
    }
}

/// A command accepted by the federation layer.
#[derive(Clone, Debug)]
pub struct RoutedCommand {
    pub source_uid: String,
    pub message: Message,
    pub route: RouteDescriptor,
}

/// Handler entry point. Runs to completion on the engine task.
pub type HandlerFn = fn(&mut World, &str, &Message) -> CmdResult;

/// One registered command.
pub struct CommandDef {
    pub name: &'static str,
    pub min_params: usize,
    pub penalty_ms: u64,
    /// Allowed from unregistered connections (CAP/PASS/NICK/USER/PING/QUIT).
    pub works_before_reg: bool,
    pub oper_only: bool,
    pub handler: HandlerFn,
}

impl CommandDef {
    pub fn new(name: &'static str, min_params: usize, handler: HandlerFn) -> Self {
        Self {
            name,
            min_params,
            penalty_ms: DEFAULT_PENALTY_MS,
            works_before_reg: false,
            oper_only: false,
            handler,
        }
    }

    pub fn pre_reg(mut self) -> Self {
        self.works_before_reg = true;
        self
    }

    pub fn oper_only(mut self) -> Self {
        self.oper_only = true;
        self
    }

    pub fn penalty(mut self, ms: u64) -> Self {
        self.penalty_ms = ms;
        self
    }
}

/// The command table.
#[derive(Default)]
pub struct CommandTable {
    map: HashMap<&'static str, CommandDef>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: CommandDef) {
        self.map.insert(def.name, def);
    }

    pub fn get(&self, name: &str) -> Option<&CommandDef> {
        self.map.get(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.map.keys().copied().collect()
    }
}

/// Inbound tag filtering: client-only (`+`-prefixed) tags are relayed to
/// capable recipients; clients may not inject server tags.
fn filter_inbound_tags(tags: &mut Vec<Tag>) {
    tags.retain(Tag::is_client_only);
}

/// Result of one dispatched line, for the engine's flood control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloodVerdict {
    Ok,
    /// Penalty above the class ceiling: pause reads.
    Throttle,
    /// Far past the ceiling: the user was quit.
    Killed,
}

/// Parse and dispatch one line from `uid`.
pub fn dispatch_line(world: &mut World, table: &CommandTable, uid: &str, raw: &str) -> FloodVerdict {
    let limits = ParseLimits {
        max_line: world.config.limits.max_line,
        max_tags: ParseLimits::default().max_tags,
    };

    let parsed = parse_line(raw, &limits);
    let mut msg = match parsed {
        Ok(msg) => msg,
        Err(err) => {
            debug!(uid = %uid, error = %err, "Rejected input line");
            match err {
                LineError::LineTooLong | LineError::TagsTooLong => {
                    world.send_numeric(
                        uid,
                        Numeric::ERR_INPUTTOOLONG
                            .build()
                            .trailing("Input line was too long"),
                    );
                }
                LineError::Empty | LineError::MissingCommand => {
                    world.send_numeric(
                        uid,
                        Numeric::ERR_UNKNOWNCOMMAND
                            .build()
                            .param("*")
                            .trailing("No command given"),
                    );
                }
            }
            return account(world, uid, GARBAGE_PENALTY_MS);
        }
    };

    filter_inbound_tags(&mut msg.tags);

    {
        let Some(user) = world.user_mut(uid) else {
            return FloodVerdict::Ok;
        };
        if user.quitting {
            return FloodVerdict::Ok;
        }
        user.last_activity = World::now();
    }

    let Some(def) = table.get(msg.command.as_str()) else {
        trace!(uid = %uid, command = %msg.command, "Unknown command");
        world.send_numeric(
            uid,
            Numeric::ERR_UNKNOWNCOMMAND
                .build()
                .param(&msg.command)
                .trailing("Unknown command"),
        );
        return account(world, uid, UNKNOWN_PENALTY_MS);
    };

    let registered = world.user(uid).map(|u| u.registered).unwrap_or(false);
    if !registered && !def.works_before_reg {
        world.send_numeric(
            uid,
            Numeric::ERR_NOTREGISTERED
                .build()
                .trailing("You have not registered"),
        );
        return account(world, uid, def.penalty_ms);
    }

    if msg.params.len() < def.min_params {
        world.send_numeric(
            uid,
            Numeric::ERR_NEEDMOREPARAMS
                .build()
                .param(def.name)
                .trailing("Not enough parameters"),
        );
        return account(world, uid, def.penalty_ms);
    }

    if def.oper_only && !world.user(uid).map(|u| u.modes.oper).unwrap_or(false) {
        world.send_numeric(
            uid,
            Numeric::ERR_NOPRIVILEGES
                .build()
                .trailing("Permission Denied - You're not an IRC operator"),
        );
        return account(world, uid, def.penalty_ms);
    }

    let event = PreCommandEvent {
        uid: uid.to_string(),
        command: msg.command.clone(),
        params: msg.params.clone(),
    };
    if hooks::first_result(world, |h| &h.pre_command, &event) == Decision::Deny {
        return account(world, uid, def.penalty_ms);
    }

    let result = (def.handler)(world, uid, &msg);

    if result.route != RouteDescriptor::LocalOnly {
        world.routes.push(RoutedCommand {
            source_uid: uid.to_string(),
            message: msg,
            route: result.route.clone(),
        });
    }

    let mut penalty = def.penalty_ms;
    if result.status == CmdStatus::Invalid {
        penalty += INVALID_PENALTY_MS;
    }
    account(world, uid, penalty)
}

/// Add penalty and decide the flood verdict against the user's class.
fn account(world: &mut World, uid: &str, add: u64) -> FloodVerdict {
    let now_ms = World::now_ms();
    let Some(user) = world.user_mut(uid) else {
        return FloodVerdict::Ok;
    };
    if user.quitting {
        return FloodVerdict::Ok;
    }
    let total = user.account_penalty(now_ms, add);
    let ceiling = user.class.penalty_ceiling_ms;
    if total > ceiling.saturating_mul(2) {
        world.quit_user(uid, "Excess flood");
        return FloodVerdict::Killed;
    }
    if total > ceiling {
        if let Some(link) = world.links.get(uid) {
            let _ = link.throttle.send(true);
        }
        return FloodVerdict::Throttle;
    }
    FloodVerdict::Ok
}

/// Release read throttles for users whose penalty has decayed below the
/// ceiling. Driven by the engine's maintenance timer.
pub fn release_throttles(world: &mut World) {
    let now_ms = World::now_ms();
    let uids: Vec<String> = world.links.keys().cloned().collect();
    for uid in uids {
        let below = match world.user_mut(&uid) {
            Some(user) => user.account_penalty(now_ms, 0) <= user.class.penalty_ceiling_ms,
            None => continue,
        };
        if below {
            if let Some(link) = world.links.get(&uid) {
                let _ = link.throttle.send(false);
            }
        }
    }
}
